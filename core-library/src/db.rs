//! # Database
//!
//! SQLite pool backing the mutation log, the item store and the grid
//! projection. File databases run in WAL mode so reads (grid windows, flag
//! lookups) proceed while a drain or an index rebuild writes. Foreign keys
//! are enforced and the embedded migrations run before the pool is returned.
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("media.db")).await?;
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the store lives and how many connections it may hold.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path.into().display()),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Private in-memory store. Each connection to `:memory:` sees its own
    /// database, so the pool holds exactly one.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.database_url.ends_with(":memory:")
    }
}

/// Open the pool, apply migrations and verify it answers a query.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    if config.is_in_memory() && config.max_connections != 1 {
        return Err(LibraryError::invalid(
            "max_connections",
            "in-memory databases require a single connection",
        ));
    }

    let mut options = SqliteConnectOptions::from_str(&config.database_url)?
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(config.busy_timeout);
    if !config.is_in_memory() {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(config.max_connections)
        // A dropped in-memory connection takes its database with it.
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| {
            warn!(error = %e, url = %config.database_url, "database open failed");
            LibraryError::Database(e)
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| LibraryError::Migration(e.to_string()))?;
    health_check(&pool).await?;

    info!(
        url = %config.database_url,
        connections = config.max_connections,
        "database ready"
    );
    Ok(pool)
}

/// In-memory pool with migrations applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

pub async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await?;
    debug!("database health check passed");
    Ok(())
}
