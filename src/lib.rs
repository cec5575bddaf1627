//! # slirc-bridge-store
//!
//! Identity and room mapping store for the Straylight Matrix <-> IRC bridge.
//!
//! The store is the single source of truth for which Matrix room corresponds
//! to which IRC channel, which Matrix user owns which virtual IRC identity,
//! and how each mapping came to exist. Bridge workers call into it on every
//! protocol event - join, part, message, provisioning request, admin command -
//! to resolve or update mappings; the store itself is purely reactive.
//!
//! ## Layout
//!
//! - [`Database`] owns the SQLite pool and hands out repositories:
//!   - [`RoomRepository`] - mapping CRUD, origin-filtered queries, admin and
//!     PM room resolution, the advisory channel mode cache
//!   - [`UserRepository`] - Matrix users, per-network client configuration,
//!     feature flags, credentials
//!   - [`CounterRepository`] - the monotonic ipv6 allocation counter
//!   - [`ServerRepository`] - per-network static config snapshots
//!
//! Absence is a normal outcome throughout: lookups return `Ok(None)` or an
//! empty collection, and [`StoreError`] is reserved for invalid keys,
//! uniqueness conflicts, and storage failures.
//!
//! ```no_run
//! use slirc_bridge_store::{Database, IrcRoom, MatrixRoom, RoomOrigin};
//!
//! # async fn demo() -> Result<(), slirc_bridge_store::StoreError> {
//! let db = Database::new("bridge-store.db").await?;
//!
//! let irc = IrcRoom::new("irc.example.com", "#rust");
//! let matrix = MatrixRoom::new("!abc123:example.org");
//! db.rooms().store_room(&irc, &matrix, RoomOrigin::Config).await?;
//!
//! let entry = db
//!     .rooms()
//!     .get_room("!abc123:example.org", "irc.example.com", "#rust", Some(RoomOrigin::Config))
//!     .await?;
//! assert!(entry.is_some());
//! # Ok(())
//! # }
//! ```

mod db;
mod models;

pub use db::{
    CounterRepository, Database, RoomRepository, ServerRepository, StoreError, UserRepository,
};
pub use models::{
    ChannelMapping, ChannelMappings, IrcClientConfig, IrcRoom, JsonMap, MatrixRoom, MatrixUser,
    RoomEntry, RoomOrigin, UnknownOrigin, UserFeatures,
};
