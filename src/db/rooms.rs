//! Room mapping repository.
//!
//! Handles Matrix room <-> IRC channel mapping entries with provenance,
//! admin and PM room resolution, and the advisory channel mode cache.

use super::{StoreError, ensure_key};
use crate::models::{
    ChannelMapping, ChannelMappings, IrcRoom, JsonMap, MatrixRoom, RoomEntry, RoomOrigin,
};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::debug;

/// Columns of a full mapping entry row, in the order `entry_from_row` expects.
const ENTRY_COLS: &str =
    "mapping_id, room_id, irc_domain, irc_channel, origin, matrix_json, remote_json";

type EntryRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
);

/// Repository for room mapping operations.
pub struct RoomRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RoomRepository<'a> {
    /// Create a new room repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist an IRC <-> Matrix room mapping.
    ///
    /// Idempotent: storing the same (room, domain, channel, origin) tuple
    /// again replaces the attached metadata instead of duplicating the row.
    pub async fn store_room(
        &self,
        irc_room: &IrcRoom,
        matrix_room: &MatrixRoom,
        origin: RoomOrigin,
    ) -> Result<(), StoreError> {
        let entry = RoomEntry::new(matrix_room.clone(), irc_room.clone(), Some(origin));
        self.upsert_room_entry(&entry).await
    }

    /// Get a single mapping entry.
    ///
    /// With `origin`, the exact tuple is looked up. Without it, any one
    /// matching entry is returned (the oldest, by insertion order) - this is
    /// ambiguous when the same tuple exists under several origins, and
    /// callers that care must use [`Self::mappings_for_channel_by_origin`].
    pub async fn get_room(
        &self,
        room_id: &str,
        domain: &str,
        channel: &str,
        origin: Option<RoomOrigin>,
    ) -> Result<Option<RoomEntry>, StoreError> {
        ensure_mapping_key(room_id, domain, channel)?;

        let row = match origin {
            Some(origin) => {
                sqlx::query_as::<_, EntryRow>(&format!(
                    "SELECT {ENTRY_COLS} FROM rooms \
                     WHERE room_id = ? AND irc_domain = ? AND irc_channel = ? AND origin = ?"
                ))
                .bind(room_id)
                .bind(domain)
                .bind(channel)
                .bind(origin.as_str())
                .fetch_optional(self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, EntryRow>(&format!(
                    "SELECT {ENTRY_COLS} FROM rooms \
                     WHERE room_id = ? AND irc_domain = ? AND irc_channel = ? \
                     ORDER BY rowid LIMIT 1"
                ))
                .bind(room_id)
                .bind(domain)
                .bind(channel)
                .fetch_optional(self.pool)
                .await?
            }
        };

        row.map(entry_from_row).transpose()
    }

    /// Remove the mapping entry matching all four key fields.
    ///
    /// Removing an absent entry is a no-op.
    pub async fn remove_room(
        &self,
        room_id: &str,
        domain: &str,
        channel: &str,
        origin: RoomOrigin,
    ) -> Result<(), StoreError> {
        ensure_mapping_key(room_id, domain, channel)?;

        let result = sqlx::query(
            "DELETE FROM rooms \
             WHERE room_id = ? AND irc_domain = ? AND irc_channel = ? AND origin = ?",
        )
        .bind(room_id)
        .bind(domain)
        .bind(channel)
        .bind(origin.as_str())
        .execute(self.pool)
        .await?;

        debug!(
            room_id,
            domain,
            channel,
            origin = %origin,
            removed = result.rows_affected(),
            "Removed room mapping"
        );
        Ok(())
    }

    /// Get the full Matrix room -> bridged channel view, grouped by room ID.
    ///
    /// Per-room channel order is insertion order; ordering across rooms is
    /// unspecified.
    pub async fn all_channel_mappings(&self) -> Result<ChannelMappings, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT room_id, irc_domain, irc_channel FROM rooms ORDER BY rowid",
        )
        .fetch_all(self.pool)
        .await?;

        let mut mappings: ChannelMappings = HashMap::new();
        for (room_id, domain, channel) in rows {
            mappings.entry(room_id).or_default().push(ChannelMapping {
                network_id: domain,
                channel,
            });
        }
        Ok(mappings)
    }

    /// Get provisioned mapping entries for one Matrix room.
    pub async fn get_provisioned_mappings(
        &self,
        room_id: &str,
    ) -> Result<Vec<RoomEntry>, StoreError> {
        ensure_key("room id", room_id)?;

        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLS} FROM rooms \
             WHERE room_id = ? AND origin = 'provision' ORDER BY rowid"
        ))
        .bind(room_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    /// Get the IRC channels mapped to one Matrix room, in insertion order.
    pub async fn irc_channels_for_room_id(&self, room_id: &str) -> Result<Vec<IrcRoom>, StoreError> {
        ensure_key("room id", room_id)?;

        let ids = [room_id.to_string()];
        let mut map = self.irc_channels_for_room_ids(&ids).await?;
        Ok(map.remove(room_id).unwrap_or_default())
    }

    /// Get the IRC channels mapped to a set of Matrix rooms.
    ///
    /// Semantically equal to calling [`Self::irc_channels_for_room_id`] per
    /// id, but issues one query per chunk of ids instead of one per id. Every
    /// requested id appears in the result, with an empty list if unmapped.
    pub async fn irc_channels_for_room_ids(
        &self,
        room_ids: &[String],
    ) -> Result<HashMap<String, Vec<IrcRoom>>, StoreError> {
        // SQLite caps host parameters per statement; stay well under it.
        const CHUNK: usize = 500;

        for id in room_ids {
            ensure_key("room id", id)?;
        }

        let mut map: HashMap<String, Vec<IrcRoom>> = room_ids
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();

        for chunk in room_ids.chunks(CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT room_id, irc_domain, irc_channel, remote_json FROM rooms \
                 WHERE room_id IN ({placeholders}) ORDER BY rowid"
            );

            let mut query = sqlx::query_as::<_, (String, String, String, String)>(&sql);
            for id in chunk {
                query = query.bind(id);
            }

            for (room_id, domain, channel, remote_json) in query.fetch_all(self.pool).await? {
                let key = RoomEntry::mapping_id(&room_id, &domain, &channel);
                let data = parse_json(&key, &remote_json)?;
                if let Some(channels) = map.get_mut(&room_id) {
                    channels.push(IrcRoom {
                        domain,
                        channel,
                        data,
                    });
                }
            }
        }

        Ok(map)
    }

    /// Get all Matrix rooms mapped to a channel, across origins.
    ///
    /// A room mapped under several origins appears once.
    pub async fn matrix_rooms_for_channel(
        &self,
        domain: &str,
        channel: &str,
    ) -> Result<Vec<MatrixRoom>, StoreError> {
        ensure_channel_key(domain, channel)?;

        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT room_id, matrix_json FROM rooms \
             WHERE irc_domain = ? AND irc_channel = ? ORDER BY rowid",
        )
        .bind(domain)
        .bind(channel)
        .fetch_all(self.pool)
        .await?;

        let mut seen = HashSet::new();
        let mut rooms = Vec::new();
        for (room_id, matrix_json) in rows {
            if !seen.insert(room_id.clone()) {
                continue;
            }
            let key = RoomEntry::mapping_id(&room_id, domain, channel);
            let data = parse_json(&key, &matrix_json)?;
            rooms.push(MatrixRoom { room_id, data });
        }
        Ok(rooms)
    }

    /// Get mapping entries for a channel, filtered by origin.
    ///
    /// With `allow_unset`, legacy entries written before provenance tracking
    /// (no origin recorded) are included as well.
    pub async fn mappings_for_channel_by_origin(
        &self,
        domain: &str,
        channel: &str,
        origins: &[RoomOrigin],
        allow_unset: bool,
    ) -> Result<Vec<RoomEntry>, StoreError> {
        ensure_channel_key(domain, channel)?;

        if origins.is_empty() && !allow_unset {
            return Ok(Vec::new());
        }

        let mut clauses = Vec::new();
        if !origins.is_empty() {
            let placeholders = vec!["?"; origins.len()].join(", ");
            clauses.push(format!("origin IN ({placeholders})"));
        }
        if allow_unset {
            clauses.push("origin IS NULL".to_string());
        }
        let sql = format!(
            "SELECT {ENTRY_COLS} FROM rooms \
             WHERE irc_domain = ? AND irc_channel = ? AND ({}) ORDER BY rowid",
            clauses.join(" OR ")
        );

        let mut query = sqlx::query_as::<_, EntryRow>(&sql).bind(domain).bind(channel);
        for origin in origins {
            query = query.bind(origin.as_str());
        }

        let rows = query.fetch_all(self.pool).await?;
        rows.into_iter().map(entry_from_row).collect()
    }

    /// Get the distinct channel names with at least one mapping on a network.
    pub async fn tracked_channels_for_network(
        &self,
        domain: &str,
    ) -> Result<Vec<String>, StoreError> {
        ensure_key("domain", domain)?;

        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT DISTINCT irc_channel FROM rooms WHERE irc_domain = ? ORDER BY irc_channel",
        )
        .bind(domain)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(|(channel,)| channel).collect())
    }

    /// Get the distinct Matrix room IDs with a config-origin mapping.
    pub async fn room_ids_from_config(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT DISTINCT room_id FROM rooms WHERE origin = 'config'",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(|(room_id,)| room_id).collect())
    }

    /// Remove every config-origin mapping. Used before reapplying a changed
    /// static configuration; mappings with other origins are untouched.
    pub async fn remove_config_mappings(&self) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM rooms WHERE origin = 'config'")
            .execute(self.pool)
            .await?;

        debug!(removed = result.rows_affected(), "Removed config-origin mappings");
        Ok(())
    }

    /// Upsert a caller-constructed mapping entry.
    ///
    /// The entry's `id` must equal the deterministic mapping id for its
    /// tuple; anything else would let two ids address one mapping.
    pub async fn upsert_room_entry(&self, entry: &RoomEntry) -> Result<(), StoreError> {
        ensure_mapping_key(
            &entry.matrix.room_id,
            &entry.remote.domain,
            &entry.remote.channel,
        )?;

        let expected = RoomEntry::mapping_id(
            &entry.matrix.room_id,
            &entry.remote.domain,
            &entry.remote.channel,
        );
        if entry.id != expected {
            return Err(StoreError::Conflict(format!(
                "entry id {:?} does not match mapping id {:?}",
                entry.id, expected
            )));
        }

        let matrix_json = to_json(&entry.id, &entry.matrix.data)?;
        let remote_json = to_json(&entry.id, &entry.remote.data)?;
        let now = chrono::Utc::now().timestamp();

        match entry.origin {
            Some(origin) => {
                sqlx::query(
                    "INSERT INTO rooms \
                     (mapping_id, room_id, irc_domain, irc_channel, origin, matrix_json, remote_json, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT(room_id, irc_domain, irc_channel, origin) \
                     DO UPDATE SET matrix_json = excluded.matrix_json, remote_json = excluded.remote_json",
                )
                .bind(&entry.id)
                .bind(&entry.matrix.room_id)
                .bind(&entry.remote.domain)
                .bind(&entry.remote.channel)
                .bind(origin.as_str())
                .bind(&matrix_json)
                .bind(&remote_json)
                .bind(now)
                .execute(self.pool)
                .await?;
            }
            None => {
                // The unique index treats NULL origins as distinct rows, so
                // replace legacy entries with delete-then-insert atomically.
                let mut tx = self.pool.begin().await?;
                sqlx::query(
                    "DELETE FROM rooms \
                     WHERE room_id = ? AND irc_domain = ? AND irc_channel = ? AND origin IS NULL",
                )
                .bind(&entry.matrix.room_id)
                .bind(&entry.remote.domain)
                .bind(&entry.remote.channel)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "INSERT INTO rooms \
                     (mapping_id, room_id, irc_domain, irc_channel, origin, matrix_json, remote_json, created_at) \
                     VALUES (?, ?, ?, ?, NULL, ?, ?, ?)",
                )
                .bind(&entry.id)
                .bind(&entry.matrix.room_id)
                .bind(&entry.remote.domain)
                .bind(&entry.remote.channel)
                .bind(&matrix_json)
                .bind(&remote_json)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
            }
        }

        Ok(())
    }

    /// Get the cached channel modes for rooms mapped to a channel.
    ///
    /// Returns Matrix room ID -> enabled mode letters. Advisory only: the
    /// cache may be empty or stale and is safe to recompute from the network.
    pub async fn get_channel_modes(
        &self,
        domain: &str,
        channel: &str,
    ) -> Result<HashMap<String, Vec<String>>, StoreError> {
        ensure_channel_key(domain, channel)?;

        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT DISTINCT r.room_id, m.mode FROM rooms r \
             JOIN channel_modes m ON m.room_id = r.room_id \
             WHERE r.irc_domain = ? AND r.irc_channel = ? \
             ORDER BY r.room_id, m.mode",
        )
        .bind(domain)
        .bind(channel)
        .fetch_all(self.pool)
        .await?;

        let mut modes: HashMap<String, Vec<String>> = HashMap::new();
        for (room_id, mode) in rows {
            modes.entry(room_id).or_default().push(mode);
        }
        Ok(modes)
    }

    /// Enable or disable a cached mode letter for one Matrix room.
    pub async fn set_room_mode(
        &self,
        room_id: &str,
        mode: &str,
        enabled: bool,
    ) -> Result<(), StoreError> {
        ensure_key("room id", room_id)?;
        ensure_key("mode", mode)?;

        if enabled {
            sqlx::query("INSERT OR IGNORE INTO channel_modes (room_id, mode) VALUES (?, ?)")
                .bind(room_id)
                .bind(mode)
                .execute(self.pool)
                .await?;
        } else {
            sqlx::query("DELETE FROM channel_modes WHERE room_id = ? AND mode = ?")
                .bind(room_id)
                .bind(mode)
                .execute(self.pool)
                .await?;
        }
        Ok(())
    }

    /// Look up an admin room by its Matrix room ID.
    pub async fn get_admin_room(&self, room_id: &str) -> Result<Option<MatrixRoom>, StoreError> {
        ensure_key("room id", room_id)?;

        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT room_id, matrix_json FROM admin_rooms WHERE room_id = ?",
        )
        .bind(room_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(matrix_room_from_row).transpose()
    }

    /// Look up the admin room for a Matrix user.
    pub async fn get_admin_room_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<MatrixRoom>, StoreError> {
        ensure_key("user id", user_id)?;

        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT room_id, matrix_json FROM admin_rooms WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(matrix_room_from_row).transpose()
    }

    /// Associate an admin room with a Matrix user.
    ///
    /// A user has at most one admin room; storing again supersedes the old
    /// association rather than keeping a duplicate.
    pub async fn store_admin_room(
        &self,
        room: &MatrixRoom,
        user_id: &str,
    ) -> Result<(), StoreError> {
        ensure_key("room id", &room.room_id)?;
        ensure_key("user id", user_id)?;

        let matrix_json = to_json(&room.room_id, &room.data)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO admin_rooms (user_id, room_id, matrix_json, created_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(user_id) \
             DO UPDATE SET room_id = excluded.room_id, matrix_json = excluded.matrix_json",
        )
        .bind(user_id)
        .bind(&room.room_id)
        .bind(&matrix_json)
        .bind(now)
        .execute(self.pool)
        .await?;

        debug!(user_id, room_id = %room.room_id, "Stored admin room");
        Ok(())
    }

    /// Look up the PM room for an ordered (real user, virtual user) pair.
    pub async fn get_pm_room(
        &self,
        real_user_id: &str,
        virtual_user_id: &str,
    ) -> Result<Option<MatrixRoom>, StoreError> {
        ensure_key("user id", real_user_id)?;
        ensure_key("user id", virtual_user_id)?;

        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT room_id, matrix_json FROM pm_rooms \
             WHERE real_user_id = ? AND virtual_user_id = ?",
        )
        .bind(real_user_id)
        .bind(virtual_user_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(matrix_room_from_row).transpose()
    }

    /// Look up a PM room by its Matrix room ID.
    pub async fn get_pm_room_by_room_id(
        &self,
        room_id: &str,
    ) -> Result<Option<MatrixRoom>, StoreError> {
        ensure_key("room id", room_id)?;

        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT room_id, matrix_json FROM pm_rooms WHERE room_id = ?",
        )
        .bind(room_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(matrix_room_from_row).transpose()
    }

    /// Associate a PM room with an ordered (real user, virtual user) pair.
    ///
    /// At most one PM room exists per pair; setting again replaces it.
    pub async fn set_pm_room(
        &self,
        irc_room: &IrcRoom,
        matrix_room: &MatrixRoom,
        real_user_id: &str,
        virtual_user_id: &str,
    ) -> Result<(), StoreError> {
        ensure_key("user id", real_user_id)?;
        ensure_key("user id", virtual_user_id)?;
        ensure_key("room id", &matrix_room.room_id)?;
        ensure_channel_key(&irc_room.domain, &irc_room.channel)?;

        let matrix_json = to_json(&matrix_room.room_id, &matrix_room.data)?;
        let remote_json = to_json(&matrix_room.room_id, &irc_room.data)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO pm_rooms \
             (real_user_id, virtual_user_id, room_id, irc_domain, irc_channel, matrix_json, remote_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(real_user_id, virtual_user_id) \
             DO UPDATE SET room_id = excluded.room_id, irc_domain = excluded.irc_domain, \
                           irc_channel = excluded.irc_channel, matrix_json = excluded.matrix_json, \
                           remote_json = excluded.remote_json",
        )
        .bind(real_user_id)
        .bind(virtual_user_id)
        .bind(&matrix_room.room_id)
        .bind(&irc_room.domain)
        .bind(&irc_room.channel)
        .bind(&matrix_json)
        .bind(&remote_json)
        .bind(now)
        .execute(self.pool)
        .await?;

        debug!(
            real_user_id,
            virtual_user_id,
            room_id = %matrix_room.room_id,
            "Set PM room"
        );
        Ok(())
    }
}

fn ensure_mapping_key(room_id: &str, domain: &str, channel: &str) -> Result<(), StoreError> {
    ensure_key("room id", room_id)?;
    ensure_channel_key(domain, channel)
}

fn ensure_channel_key(domain: &str, channel: &str) -> Result<(), StoreError> {
    ensure_key("domain", domain)?;
    ensure_key("channel", channel)
}

fn parse_json(key: &str, raw: &str) -> Result<JsonMap, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::corrupt(key, e))
}

fn to_json(key: &str, data: &JsonMap) -> Result<String, StoreError> {
    serde_json::to_string(data).map_err(|e| StoreError::corrupt(key, e))
}

fn entry_from_row(row: EntryRow) -> Result<RoomEntry, StoreError> {
    let (mapping_id, room_id, domain, channel, origin, matrix_json, remote_json) = row;

    let matrix_data = parse_json(&mapping_id, &matrix_json)?;
    let remote_data = parse_json(&mapping_id, &remote_json)?;
    let origin = origin
        .as_deref()
        .map(RoomOrigin::from_str)
        .transpose()
        .map_err(|e| StoreError::corrupt(&mapping_id, e))?;

    Ok(RoomEntry {
        id: mapping_id,
        matrix: MatrixRoom {
            room_id,
            data: matrix_data,
        },
        remote: IrcRoom {
            domain,
            channel,
            data: remote_data,
        },
        origin,
    })
}

fn matrix_room_from_row(row: (String, String)) -> Result<MatrixRoom, StoreError> {
    let (room_id, matrix_json) = row;
    let data = parse_json(&room_id, &matrix_json)?;
    Ok(MatrixRoom { room_id, data })
}
