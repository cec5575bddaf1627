//! User repository.
//!
//! Handles Matrix user records, per-network virtual client configuration,
//! feature flags, and credential storage.

use super::{StoreError, ensure_key};
use crate::models::{IrcClientConfig, JsonMap, MatrixUser, UserFeatures};
use sqlx::SqlitePool;
use tracing::debug;

type ConfigRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Create a new user repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a Matrix user record.
    pub async fn store_matrix_user(&self, user: &MatrixUser) -> Result<(), StoreError> {
        ensure_key("user id", &user.user_id)?;
        let localpart = user.localpart().ok_or_else(|| {
            StoreError::InvalidKey(format!("malformed matrix user id: {}", user.user_id))
        })?;

        let data_json = to_json(&user.user_id, &user.data)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO users (user_id, localpart, data_json, created_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(user_id) \
             DO UPDATE SET localpart = excluded.localpart, data_json = excluded.data_json",
        )
        .bind(&user.user_id)
        .bind(localpart)
        .bind(&data_json)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Look up a Matrix user by localpart.
    pub async fn get_matrix_user_by_localpart(
        &self,
        localpart: &str,
    ) -> Result<Option<MatrixUser>, StoreError> {
        ensure_key("localpart", localpart)?;

        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT user_id, data_json FROM users WHERE localpart = ?",
        )
        .bind(localpart)
        .fetch_optional(self.pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    /// Look up the Matrix user owning an IRC username on a network.
    ///
    /// The forward relation lives in the per-(user, domain) client config;
    /// this goes through the index on (domain, username) rather than
    /// scanning.
    pub async fn get_matrix_user_by_username(
        &self,
        domain: &str,
        username: &str,
    ) -> Result<Option<MatrixUser>, StoreError> {
        ensure_key("domain", domain)?;
        ensure_key("username", username)?;

        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT u.user_id, u.data_json FROM users u \
             JOIN client_configs c ON c.user_id = u.user_id \
             WHERE c.irc_domain = ? AND c.username = ?",
        )
        .bind(domain)
        .bind(username)
        .fetch_optional(self.pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    /// Get the virtual client configuration for a (user, network) pair.
    pub async fn get_irc_client_config(
        &self,
        user_id: &str,
        domain: &str,
    ) -> Result<Option<IrcClientConfig>, StoreError> {
        ensure_key("user id", user_id)?;
        ensure_key("domain", domain)?;

        let row = sqlx::query_as::<_, ConfigRow>(
            "SELECT user_id, irc_domain, username, password, ipv6, extra_json \
             FROM client_configs WHERE user_id = ? AND irc_domain = ?",
        )
        .bind(user_id)
        .bind(domain)
        .fetch_optional(self.pool)
        .await?;

        row.map(config_from_row).transpose()
    }

    /// Upsert the virtual client configuration for a (user, network) pair.
    pub async fn store_irc_client_config(
        &self,
        config: &IrcClientConfig,
    ) -> Result<(), StoreError> {
        ensure_key("user id", &config.user_id)?;
        ensure_key("domain", &config.domain)?;

        let key = format!("{} {}", config.user_id, config.domain);
        let extra_json = to_json(&key, &config.extra)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO client_configs \
             (user_id, irc_domain, username, password, ipv6, extra_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(user_id, irc_domain) \
             DO UPDATE SET username = excluded.username, password = excluded.password, \
                           ipv6 = excluded.ipv6, extra_json = excluded.extra_json",
        )
        .bind(&config.user_id)
        .bind(&config.domain)
        .bind(&config.username)
        .bind(&config.password)
        .bind(&config.ipv6)
        .bind(&extra_json)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Get a user's feature flags. Absent means no overrides: empty map.
    pub async fn get_user_features(&self, user_id: &str) -> Result<UserFeatures, StoreError> {
        ensure_key("user id", user_id)?;

        let row = sqlx::query_as::<_, (String,)>(
            "SELECT features_json FROM user_features WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        match row {
            Some((features_json,)) => {
                serde_json::from_str(&features_json).map_err(|e| StoreError::corrupt(user_id, e))
            }
            None => Ok(UserFeatures::new()),
        }
    }

    /// Replace a user's feature flags wholesale.
    ///
    /// Not a merge: callers wanting a partial update must read-modify-write.
    pub async fn store_user_features(
        &self,
        user_id: &str,
        features: &UserFeatures,
    ) -> Result<(), StoreError> {
        ensure_key("user id", user_id)?;

        let features_json =
            serde_json::to_string(features).map_err(|e| StoreError::corrupt(user_id, e))?;

        sqlx::query(
            "INSERT INTO user_features (user_id, features_json) VALUES (?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET features_json = excluded.features_json",
        )
        .bind(user_id)
        .bind(&features_json)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Store a credential for a (user, network) pair.
    ///
    /// Creates the client config row if none exists yet.
    pub async fn store_pass(
        &self,
        user_id: &str,
        domain: &str,
        pass: &str,
    ) -> Result<(), StoreError> {
        ensure_key("user id", user_id)?;
        ensure_key("domain", domain)?;

        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO client_configs (user_id, irc_domain, password, created_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(user_id, irc_domain) DO UPDATE SET password = excluded.password",
        )
        .bind(user_id)
        .bind(domain)
        .bind(pass)
        .bind(now)
        .execute(self.pool)
        .await?;

        debug!(user_id, domain, "Stored client credential");
        Ok(())
    }

    /// Remove the credential for a (user, network) pair.
    ///
    /// Removing an absent credential is a no-op.
    pub async fn remove_pass(&self, user_id: &str, domain: &str) -> Result<(), StoreError> {
        ensure_key("user id", user_id)?;
        ensure_key("domain", domain)?;

        let result = sqlx::query(
            "UPDATE client_configs SET password = NULL WHERE user_id = ? AND irc_domain = ?",
        )
        .bind(user_id)
        .bind(domain)
        .execute(self.pool)
        .await?;

        debug!(
            user_id,
            domain,
            updated = result.rows_affected(),
            "Removed client credential"
        );
        Ok(())
    }
}

fn to_json(key: &str, data: &JsonMap) -> Result<String, StoreError> {
    serde_json::to_string(data).map_err(|e| StoreError::corrupt(key, e))
}

fn user_from_row(row: (String, String)) -> Result<MatrixUser, StoreError> {
    let (user_id, data_json) = row;
    let data = serde_json::from_str(&data_json).map_err(|e| StoreError::corrupt(&user_id, e))?;
    Ok(MatrixUser { user_id, data })
}

fn config_from_row(row: ConfigRow) -> Result<IrcClientConfig, StoreError> {
    let (user_id, domain, username, password, ipv6, extra_json) = row;
    let key = format!("{user_id} {domain}");
    let extra = serde_json::from_str(&extra_json).map_err(|e| StoreError::corrupt(&key, e))?;
    Ok(IrcClientConfig {
        user_id,
        domain,
        username,
        password,
        ipv6,
        extra,
    })
}
