//! Server configuration snapshot repository.
//!
//! Stores the static configuration last applied for each IRC network so a
//! restarted bridge can detect what changed before re-applying config
//! mappings.

use super::{StoreError, ensure_key};
use sqlx::SqlitePool;

/// Repository for per-network config snapshots.
pub struct ServerRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ServerRepository<'a> {
    /// Create a new server repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert the configuration snapshot for a network.
    pub async fn set_server_config(
        &self,
        domain: &str,
        config: &serde_json::Value,
    ) -> Result<(), StoreError> {
        ensure_key("domain", domain)?;

        let config_json =
            serde_json::to_string(config).map_err(|e| StoreError::corrupt(domain, e))?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO servers (irc_domain, config_json, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(irc_domain) \
             DO UPDATE SET config_json = excluded.config_json, updated_at = excluded.updated_at",
        )
        .bind(domain)
        .bind(&config_json)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Get the configuration snapshot for a network.
    pub async fn get_server_config(
        &self,
        domain: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        ensure_key("domain", domain)?;

        let row = sqlx::query_as::<_, (String,)>(
            "SELECT config_json FROM servers WHERE irc_domain = ?",
        )
        .bind(domain)
        .fetch_optional(self.pool)
        .await?;

        row.map(|(config_json,)| {
            serde_json::from_str(&config_json).map_err(|e| StoreError::corrupt(domain, e))
        })
        .transpose()
    }
}
