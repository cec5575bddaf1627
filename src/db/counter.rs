//! Monotonic counter repository.
//!
//! Backs the ipv6 address pool: each provisioned virtual identity consumes
//! one value. The increment is a single UPDATE, so SQLite's write lock
//! serializes allocations and no two callers can observe the same
//! pre-increment value.

use super::StoreError;
use sqlx::SqlitePool;
use tracing::warn;

const IPV6_COUNTER: &str = "ipv6";

/// Repository for the ipv6 allocation counter.
pub struct CounterRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CounterRepository<'a> {
    /// Create a new counter repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Read the current counter value without mutating it.
    pub async fn get(&self) -> Result<i64, StoreError> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT value FROM counters WHERE name = ?")
            .bind(IPV6_COUNTER)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(|(value,)| value).unwrap_or(0))
    }

    /// Atomically increment the counter and return the new value.
    pub async fn increment_and_get(&self) -> Result<i64, StoreError> {
        let (value,): (i64,) = sqlx::query_as(
            "UPDATE counters SET value = value + 1 WHERE name = ? RETURNING value",
        )
        .bind(IPV6_COUNTER)
        .fetch_one(self.pool)
        .await?;

        Ok(value)
    }

    /// Overwrite the counter value. Administrative recovery only; normal
    /// allocation goes through [`Self::increment_and_get`].
    pub async fn set(&self, value: i64) -> Result<(), StoreError> {
        warn!(value, "Counter value overridden");

        sqlx::query(
            "INSERT INTO counters (name, value) VALUES (?, ?) \
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        )
        .bind(IPV6_COUNTER)
        .bind(value)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}
