//! Accounts and the read contract of the local account store.

mod repository;

pub use repository::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::Result;

/// Identifier of the bootstrap account, which is never persisted.
pub const BOOTSTRAP_ID: i32 = -1;

/// Account able to log into the bookmark manager.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow,
)]
pub struct Account {
    pub id: i32,
    pub username: String,
    #[serde(skip)]
    #[sqlx(rename = "password")]
    pub password_hash: String,
    pub owner: bool,
}

impl Account {
    /// Temporary owner usable while no owner account exists.
    pub fn bootstrap(username: impl Into<String>) -> Self {
        Self {
            id: BOOTSTRAP_ID,
            username: username.into(),
            password_hash: String::default(),
            owner: true,
        }
    }

    /// Identity vouched for by the directory.
    ///
    /// The directory has no local id, and privilege comes from the group the
    /// account was found in.
    pub fn from_directory(username: impl Into<String>, owner: bool) -> Self {
        Self {
            id: 0,
            username: username.into(),
            password_hash: String::default(),
            owner,
        }
    }
}

/// Options for [`AccountStore::list_accounts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountFilter {
    /// Only return accounts with the owner flag.
    pub owner_only: bool,
}

/// Read access to stored accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// List accounts matching `filter`.
    async fn list_accounts(&self, filter: AccountFilter) -> Result<Vec<Account>>;

    /// Find an account by its username.
    async fn get_account(&self, username: &str) -> Result<Option<Account>>;
}
