//! Entity model for the bridge mapping store.
//!
//! These types are the currency of the repository APIs in [`crate::db`]:
//! room mapping entries with provenance, Matrix user records, per-network
//! virtual client configuration, and derived channel-mapping views.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Arbitrary metadata attached to rooms, users, and client configs.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// How a room mapping came to exist.
///
/// A closed set so that filter and removal logic is exhaustively checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomOrigin {
    /// Declared in the static bridge configuration.
    Config,
    /// Created through the provisioning API.
    Provision,
    /// Created via alias resolution.
    Alias,
    /// Created when a user joined a bridged channel.
    Join,
}

impl RoomOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Provision => "provision",
            Self::Alias => "alias",
            Self::Join => "join",
        }
    }
}

impl fmt::Display for RoomOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomOrigin {
    type Err = UnknownOrigin;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "config" => Ok(Self::Config),
            "provision" => Ok(Self::Provision),
            "alias" => Ok(Self::Alias),
            "join" => Ok(Self::Join),
            other => Err(UnknownOrigin(other.to_string())),
        }
    }
}

/// A persisted origin tag that is not part of the closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOrigin(pub String);

impl fmt::Display for UnknownOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown room origin: {}", self.0)
    }
}

impl std::error::Error for UnknownOrigin {}

/// A Matrix room reference: room ID plus arbitrary attached metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRoom {
    pub room_id: String,
    #[serde(default)]
    pub data: JsonMap,
}

impl MatrixRoom {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            data: JsonMap::new(),
        }
    }
}

/// An IRC channel reference: network domain, channel name, metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrcRoom {
    pub domain: String,
    pub channel: String,
    #[serde(default)]
    pub data: JsonMap,
}

impl IrcRoom {
    pub fn new(domain: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            channel: channel.into(),
            data: JsonMap::new(),
        }
    }
}

/// A persisted Matrix room <-> IRC channel mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomEntry {
    /// Deterministic identifier derived from the mapping tuple.
    pub id: String,
    pub matrix: MatrixRoom,
    pub remote: IrcRoom,
    /// `None` for rows written before provenance tracking existed.
    pub origin: Option<RoomOrigin>,
}

impl RoomEntry {
    /// Derive the stable identifier for a mapping tuple.
    ///
    /// Re-deriving for the same tuple always yields the same id, which is
    /// what makes `store`/`upsert` idempotent.
    pub fn mapping_id(room_id: &str, domain: &str, channel: &str) -> String {
        format!("{room_id} {domain} {channel}")
    }

    pub fn new(matrix: MatrixRoom, remote: IrcRoom, origin: Option<RoomOrigin>) -> Self {
        let id = Self::mapping_id(&matrix.room_id, &remote.domain, &remote.channel);
        Self {
            id,
            matrix,
            remote,
            origin,
        }
    }
}

/// One (network, channel) pair in the [`ChannelMappings`] view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapping {
    pub network_id: String,
    pub channel: String,
}

/// Derived view: Matrix room ID -> bridged channel pairs, in insertion order.
pub type ChannelMappings = HashMap<String, Vec<ChannelMapping>>;

/// A Matrix user known to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixUser {
    /// Full user ID, `@localpart:homeserver`.
    pub user_id: String,
    #[serde(default)]
    pub data: JsonMap,
}

impl MatrixUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            data: JsonMap::new(),
        }
    }

    /// The localpart of the user ID, if it is well formed.
    pub fn localpart(&self) -> Option<&str> {
        let rest = self.user_id.strip_prefix('@')?;
        let (localpart, server) = rest.split_once(':')?;
        if localpart.is_empty() || server.is_empty() {
            return None;
        }
        Some(localpart)
    }
}

/// Connection parameters for one user's virtual IRC identity on one network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrcClientConfig {
    pub user_id: String,
    pub domain: String,
    pub username: Option<String>,
    /// Stored credential for the virtual client, if any.
    pub password: Option<String>,
    /// Outbound IPv6 address allocated from the counter pool.
    pub ipv6: Option<String>,
    #[serde(default)]
    pub extra: JsonMap,
}

impl IrcClientConfig {
    pub fn new(user_id: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            domain: domain.into(),
            username: None,
            password: None,
            ipv6: None,
            extra: JsonMap::new(),
        }
    }
}

/// Sparse per-user feature flags. An absent key means the default applies.
pub type UserFeatures = HashMap<String, bool>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_round_trip() {
        for origin in [
            RoomOrigin::Config,
            RoomOrigin::Provision,
            RoomOrigin::Alias,
            RoomOrigin::Join,
        ] {
            assert_eq!(origin.as_str().parse::<RoomOrigin>().unwrap(), origin);
        }
        assert!("yolo".parse::<RoomOrigin>().is_err());
    }

    #[test]
    fn test_mapping_id_is_deterministic() {
        let a = RoomEntry::mapping_id("!abc:hs", "irc.example.com", "#chan");
        let b = RoomEntry::mapping_id("!abc:hs", "irc.example.com", "#chan");
        assert_eq!(a, b);
        assert_eq!(a, "!abc:hs irc.example.com #chan");

        let entry = RoomEntry::new(
            MatrixRoom::new("!abc:hs"),
            IrcRoom::new("irc.example.com", "#chan"),
            Some(RoomOrigin::Config),
        );
        assert_eq!(entry.id, a);
    }

    #[test]
    fn test_localpart() {
        assert_eq!(MatrixUser::new("@alice:hs.org").localpart(), Some("alice"));
        assert_eq!(MatrixUser::new("alice:hs.org").localpart(), None);
        assert_eq!(MatrixUser::new("@:hs.org").localpart(), None);
        assert_eq!(MatrixUser::new("@alice").localpart(), None);
    }
}
