//! Accounts stored locally.

use std::sync::Arc;

use crate::account::{Account, AccountFilter, AccountStore};
use crate::auth::{AuthError, Result};
use crate::crypto::{CryptoError, PasswordManager};

/// Credentials accepted while no owner account exists, so the first owner
/// can be created.
pub const BOOTSTRAP_USERNAME: &str = "shiori";
pub const BOOTSTRAP_PASSWORD: &str = "gopher";

/// Checks credentials against password hashes of the account store.
#[derive(Clone)]
pub struct DatabaseAuthenticator {
    store: Arc<dyn AccountStore>,
    passwords: PasswordManager,
}

impl DatabaseAuthenticator {
    /// Create a new [`DatabaseAuthenticator`].
    pub fn new(store: Arc<dyn AccountStore>, passwords: PasswordManager) -> Self {
        Self { store, passwords }
    }

    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        owner: bool,
    ) -> Result<Account> {
        if username == BOOTSTRAP_USERNAME
            && password == BOOTSTRAP_PASSWORD
            && self
                .store
                .list_accounts(AccountFilter { owner_only: true })
                .await?
                .is_empty()
        {
            tracing::warn!(
                "logged in with the default account, create an owner account to disable it"
            );
            return Ok(Account::bootstrap(BOOTSTRAP_USERNAME));
        }

        let Some(account) = self.store.get_account(username).await? else {
            // Unknown accounts pay the same Argon2 cost as a wrong password.
            let password = password.to_owned();
            let _ = self
                .blocking(move |passwords| passwords.verify_dummy(password))
                .await?;
            return Err(AuthError::AccountNotFound);
        };

        let hash = account.password_hash.clone();
        let password = password.to_owned();
        let verified = self
            .blocking(move |passwords| passwords.verify_password(password, &hash))
            .await?;

        match verified {
            Ok(()) => (),
            Err(CryptoError::Mismatch) => return Err(AuthError::PasswordMismatch),
            Err(err) => {
                tracing::error!(
                    account = account.id,
                    error = %err,
                    "stored password hash is unusable"
                );
                return Err(AuthError::PasswordMismatch);
            },
        }

        if owner && !account.owner {
            return Err(AuthError::InsufficientPrivilege);
        }

        Ok(account)
    }

    /// Argon2 is slow on purpose, keep it off the async workers.
    async fn blocking<F>(&self, f: F) -> Result<std::result::Result<(), CryptoError>>
    where
        F: FnOnce(&PasswordManager) -> std::result::Result<(), CryptoError>
            + Send
            + 'static,
    {
        let passwords = self.passwords.clone();
        tokio::task::spawn_blocking(move || f(&passwords))
            .await
            .map_err(|err| AuthError::Store(Box::new(err)))
    }
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemoryStore {
    accounts: Vec<Account>,
}

#[cfg(test)]
impl MemoryStore {
    pub(crate) fn with(mut self, username: &str, password: &str, owner: bool) -> Self {
        let password_hash =
            crate::crypto::test_manager().hash_password(password).unwrap();
        self.accounts.push(Account {
            id: self.accounts.len() as i32 + 1,
            username: username.into(),
            password_hash,
            owner,
        });
        self
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl AccountStore for MemoryStore {
    async fn list_accounts(&self, filter: AccountFilter) -> Result<Vec<Account>> {
        Ok(self
            .accounts
            .iter()
            .filter(|a| !filter.owner_only || a.owner)
            .cloned()
            .collect())
    }

    async fn get_account(&self, username: &str) -> Result<Option<Account>> {
        Ok(self.accounts.iter().find(|a| a.username == username).cloned())
    }
}
