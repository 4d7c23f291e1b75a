//! Handle database requests.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

use crate::account::{Account, AccountFilter, AccountStore};
use crate::auth::{Result, ToStoreError};
use crate::config;

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "shiori";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// PostgreSQL backed [`AccountStore`].
#[derive(Clone)]
pub struct AccountRepository {
    pool: Pool<Postgres>,
}

impl AccountRepository {
    /// Create a new [`AccountRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Open a connection pool described by `config`.
    pub async fn connect(config: &config::Postgres) -> std::result::Result<Self, sqlx::Error> {
        let username = config.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let password = config.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let db = config.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME);
        let hostname = &config.address;

        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
            .connect(&addr)
            .await?;

        tracing::info!(%hostname, %db, "postgres connected");

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl AccountStore for AccountRepository {
    async fn list_accounts(&self, filter: AccountFilter) -> Result<Vec<Account>> {
        sqlx::query_as::<_, Account>(
            r#"SELECT id, username, password, owner
                FROM account
                WHERE $1 = FALSE OR owner = TRUE
                ORDER BY id"#,
        )
        .bind(filter.owner_only)
        .fetch_all(&self.pool)
        .await
        .catch()
    }

    async fn get_account(&self, username: &str) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>(
            r#"SELECT id, username, password, owner
                FROM account
                WHERE username = $1"#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .catch()
    }
}
