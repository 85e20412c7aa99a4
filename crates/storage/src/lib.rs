mod domains;
mod push_state;
mod sites;

use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use thiserror::Error;

pub use domains::{DomainError, DomainRepository, NewDomain};
pub use push_state::{PushLogEntry, PushStateError, PushStateRepository};
pub use sites::{NewSite, SiteError, SiteRepository};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Foreign keys, WAL and the busy timeout are connection options so every
    /// pooled connection carries them.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for tenant site rows.
    pub fn sites(&self) -> SiteRepository {
        SiteRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for operator driven domain mutations.
    pub fn domains(&self) -> DomainRepository {
        DomainRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns the push state store used exclusively by the orchestrator.
    pub fn push_state(&self) -> PushStateRepository {
        PushStateRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// SQLITE_CONSTRAINT_UNIQUE, SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_FOREIGNKEY
const UNIQUE_VIOLATION_CODES: [&str; 2] = ["2067", "1555"];
const FOREIGN_KEY_VIOLATION_CODE: &str = "787";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| UNIQUE_VIOLATION_CODES.contains(&code.as_ref())),
        _ => false,
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| code.as_ref() == FOREIGN_KEY_VIOLATION_CODE),
        _ => false,
    }
}
