//! Database module for the bridge mapping store.
//!
//! Provides async SQLite access using SQLx for:
//! - Matrix room <-> IRC channel mapping entries with provenance
//! - Admin and PM room resolution
//! - Matrix user records and per-network client configuration
//! - The advisory channel mode cache and the ipv6 address counter

mod counter;
mod rooms;
mod servers;
mod users;

pub use counter::CounterRepository;
pub use rooms::RoomRepository;
pub use servers::ServerRepository;
pub use users::UserRepository;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Store errors.
///
/// Absence is never an error: lookups return `Ok(None)` or an empty
/// collection. These variants cover everything else.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A key component (room id, domain, channel, user id) is malformed or
    /// empty. Rejected before any storage access.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// The operation would violate a uniqueness invariant.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The underlying storage engine failed. Transient, retryable.
    #[error("storage unavailable: {0}")]
    Unavailable(sqlx::Error),
    /// A persisted value failed to parse into the entity model. Fatal for
    /// that key only; unrelated keys are unaffected.
    #[error("corrupt record for {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("migration error: {0}")]
    Migration(sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Build a `Corrupt` error for a key, logging it on the way out.
    pub(crate) fn corrupt(
        key: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        let key = key.into();
        tracing::error!(key = %key, error = %source, "Corrupt record in store");
        Self::Corrupt {
            key,
            source: Box::new(source),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err)
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migration(err)
    }
}

/// Reject empty key components before touching storage.
pub(crate) fn ensure_key(name: &str, value: &str) -> Result<(), StoreError> {
    if value.is_empty() {
        return Err(StoreError::InvalidKey(format!("empty {name}")));
    }
    Ok(())
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let pool = if path == ":memory:" {
            // Use a uniquely named shared-cache memory database per call.
            // `file::memory:` is global-ish and will collide across parallel tests.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:slirc-bridge-store-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        Self::run_migrations(&pool).await?;

        // WAL mode lets mapping lookups proceed while writes are in progress
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

        // NORMAL keeps transaction durability without a full fsync per write
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&pool)
            .await?;

        // Detect silent corruption from crashes before serving lookups
        let integrity_result: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&pool)
            .await?;

        if integrity_result != "ok" {
            tracing::error!(
                integrity_check = %integrity_result,
                "Database integrity check FAILED - corruption detected!"
            );
            return Err(StoreError::Unavailable(sqlx::Error::Io(
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Database integrity check failed: {}", integrity_result),
                ),
            )));
        }

        info!("Database integrity check passed");

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run embedded migrations.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(StoreError::Migration)?;

        info!("Database migrations checked/applied");
        Ok(())
    }

    /// Get room mapping repository.
    pub fn rooms(&self) -> RoomRepository<'_> {
        RoomRepository::new(&self.pool)
    }

    /// Get user repository.
    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    /// Get counter repository.
    pub fn counter(&self) -> CounterRepository<'_> {
        CounterRepository::new(&self.pool)
    }

    /// Get server config repository.
    pub fn servers(&self) -> ServerRepository<'_> {
        ServerRepository::new(&self.pool)
    }
}
