//! Credential verification.
//!
//! The backend is chosen once, at startup: accounts live either in the local
//! store or in an LDAP directory. Both answer the same question through
//! [`Authenticator::authenticate`].

pub(crate) mod database;

pub use database::*;

use std::sync::Arc;

use crate::account::{Account, AccountStore};
use crate::crypto::PasswordManager;
use crate::ldap::{DirectoryClient, DirectoryError};

pub type Result<T> = std::result::Result<T, AuthError>;

/// Reasons an authentication attempt failed.
///
/// Details are for logs only, callers must not tell users which one happened.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("username doesn't exist")]
    AccountNotFound,
    #[error("username and password don't match")]
    PasswordMismatch,
    #[error("account level is not sufficient as owner")]
    InsufficientPrivilege,
    #[error("account store failed: {0}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
}

impl AuthError {
    /// Short label for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Directory(DirectoryError::NotFound) => "not_found",
            AuthError::Directory(DirectoryError::Ambiguous { .. }) => {
                "ambiguous"
            },
            AuthError::Directory(DirectoryError::FilterRender(_)) => {
                "invalid_filter"
            },
            AuthError::Directory(
                DirectoryError::BindVerification(_)
                | DirectoryError::EmptyPassword,
            ) => "invalid_credentials",
            AuthError::Directory(_) => "directory_unavailable",
            AuthError::AccountNotFound => "not_found",
            AuthError::PasswordMismatch => "invalid_credentials",
            AuthError::InsufficientPrivilege => "insufficient_privilege",
            AuthError::Store(_) => "store_unavailable",
        }
    }
}

pub trait ToStoreError<T> {
    fn catch(self) -> Result<T>;
}

impl<T, E> ToStoreError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn catch(self) -> Result<T> {
        self.map_err(|e| AuthError::Store(Box::new(e)))
    }
}

/// Where identities are checked.
#[derive(Clone)]
pub enum Backend {
    Database(DatabaseAuthenticator),
    Directory(DirectoryClient),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Database(_) => "database",
            Backend::Directory(_) => "ldap",
        }
    }
}

/// Entry point for every login attempt.
#[derive(Clone)]
pub struct Authenticator {
    backend: Backend,
}

impl Authenticator {
    /// Create a new [`Authenticator`].
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Check accounts against the local store.
    pub fn database(
        store: Arc<dyn AccountStore>,
        passwords: PasswordManager,
    ) -> Self {
        Self::new(Backend::Database(DatabaseAuthenticator::new(
            store, passwords,
        )))
    }

    /// Check accounts against an LDAP directory.
    pub fn directory(client: DirectoryClient) -> Self {
        Self::new(Backend::Directory(client))
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Verify `username`/`password`, asking for owner privileges when `owner`
    /// is set.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        owner: bool,
    ) -> Result<Account> {
        let result = match &self.backend {
            Backend::Database(database) => {
                database.authenticate(username, password, owner).await
            },
            Backend::Directory(directory) => directory
                .authenticate(username, password, owner)
                .await
                .map_err(AuthError::from),
        };

        let backend = self.backend.name();
        match &result {
            Ok(account) => tracing::info!(
                backend,
                username = %account.username,
                owner = account.owner,
                "authentication successful"
            ),
            Err(err @ AuthError::Store(_)) => tracing::error!(
                backend,
                %username,
                error = %err,
                "authentication failed"
            ),
            Err(err) => tracing::warn!(
                backend,
                %username,
                reason = err.reason(),
                error = %err,
                "authentication failed"
            ),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::database::MemoryStore;
    use super::*;
    use crate::account::AccountFilter;

    #[test]
    fn test_reasons_do_not_leak_directory_internals() {
        assert_eq!(AuthError::AccountNotFound.reason(), "not_found");
        assert_eq!(
            AuthError::from(DirectoryError::NotFound).reason(),
            "not_found"
        );
        assert_eq!(
            AuthError::from(DirectoryError::EmptyPassword).reason(),
            "invalid_credentials"
        );
        assert_eq!(
            AuthError::from(DirectoryError::Ambiguous { count: 3 }).reason(),
            "ambiguous"
        );
    }

    #[test]
    fn test_store_error() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::other("connection reset"));
        assert!(matches!(result.catch(), Err(AuthError::Store(_))));
    }

    #[tokio::test]
    async fn test_dispatch_to_database() {
        let store = Arc::new(MemoryStore::default());
        let auth =
            Authenticator::database(store.clone(), crate::crypto::test_manager());

        assert!(matches!(auth.backend(), Backend::Database(_)));

        let account = auth.authenticate("shiori", "gopher", true).await.unwrap();
        assert_eq!(account.id, crate::account::BOOTSTRAP_ID);
        assert!(
            store
                .list_accounts(AccountFilter { owner_only: true })
                .await
                .unwrap()
                .is_empty()
        );
    }
}
