//! Room mapping store integration tests.

use slirc_bridge_store::{Database, IrcRoom, MatrixRoom, RoomEntry, RoomOrigin, StoreError};

async fn test_db() -> anyhow::Result<Database> {
    Ok(Database::new(":memory:").await?)
}

fn chan(domain: &str, channel: &str) -> IrcRoom {
    IrcRoom::new(domain, channel)
}

fn room(room_id: &str) -> MatrixRoom {
    MatrixRoom::new(room_id)
}

#[tokio::test]
async fn test_store_and_get_round_trip() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    let mut irc = chan("irc.example.com", "#rust");
    irc.data
        .insert("key".to_string(), serde_json::json!("hunter2"));
    let matrix = room("!abc:example.org");

    rooms.store_room(&irc, &matrix, RoomOrigin::Config).await?;

    let entry = rooms
        .get_room(
            "!abc:example.org",
            "irc.example.com",
            "#rust",
            Some(RoomOrigin::Config),
        )
        .await?
        .expect("entry should exist");

    assert_eq!(
        entry.id,
        RoomEntry::mapping_id("!abc:example.org", "irc.example.com", "#rust")
    );
    assert_eq!(entry.matrix, matrix);
    assert_eq!(entry.remote, irc);
    assert_eq!(entry.origin, Some(RoomOrigin::Config));

    // Without an origin filter, any matching entry is returned
    let any = rooms
        .get_room("!abc:example.org", "irc.example.com", "#rust", None)
        .await?;
    assert!(any.is_some());

    Ok(())
}

#[tokio::test]
async fn test_store_is_idempotent_upsert() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    let mut irc = chan("irc.example.com", "#rust");
    let matrix = room("!abc:example.org");
    rooms.store_room(&irc, &matrix, RoomOrigin::Alias).await?;

    // Same tuple again with new metadata: replaced, not duplicated
    irc.data
        .insert("topic".to_string(), serde_json::json!("hello"));
    rooms.store_room(&irc, &matrix, RoomOrigin::Alias).await?;

    let mappings = rooms.all_channel_mappings().await?;
    assert_eq!(mappings["!abc:example.org"].len(), 1);

    let entry = rooms
        .get_room(
            "!abc:example.org",
            "irc.example.com",
            "#rust",
            Some(RoomOrigin::Alias),
        )
        .await?
        .unwrap();
    assert_eq!(
        entry.remote.data.get("topic"),
        Some(&serde_json::json!("hello"))
    );

    Ok(())
}

#[tokio::test]
async fn test_remove_is_exact_and_idempotent() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    let irc = chan("irc.example.com", "#rust");
    let matrix = room("!abc:example.org");
    rooms.store_room(&irc, &matrix, RoomOrigin::Config).await?;
    rooms.store_room(&irc, &matrix, RoomOrigin::Provision).await?;

    // Removal matches all four key fields: the provision row survives
    rooms
        .remove_room(
            "!abc:example.org",
            "irc.example.com",
            "#rust",
            RoomOrigin::Config,
        )
        .await?;

    assert!(
        rooms
            .get_room(
                "!abc:example.org",
                "irc.example.com",
                "#rust",
                Some(RoomOrigin::Config)
            )
            .await?
            .is_none()
    );
    assert!(
        rooms
            .get_room(
                "!abc:example.org",
                "irc.example.com",
                "#rust",
                Some(RoomOrigin::Provision)
            )
            .await?
            .is_some()
    );

    // Removing an already-absent entry is a no-op, not an error
    rooms
        .remove_room(
            "!abc:example.org",
            "irc.example.com",
            "#rust",
            RoomOrigin::Config,
        )
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_all_channel_mappings_grouping_and_order() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    let matrix = room("!abc:example.org");
    rooms
        .store_room(&chan("irc.example.com", "#b"), &matrix, RoomOrigin::Config)
        .await?;
    rooms
        .store_room(&chan("irc.example.com", "#a"), &matrix, RoomOrigin::Config)
        .await?;
    rooms
        .store_room(
            &chan("irc.other.net", "#c"),
            &room("!def:example.org"),
            RoomOrigin::Join,
        )
        .await?;

    let mappings = rooms.all_channel_mappings().await?;
    assert_eq!(mappings.len(), 2);

    // Per-room order is insertion order, not lexical
    let pairs: Vec<_> = mappings["!abc:example.org"]
        .iter()
        .map(|m| (m.network_id.as_str(), m.channel.as_str()))
        .collect();
    assert_eq!(
        pairs,
        vec![("irc.example.com", "#b"), ("irc.example.com", "#a")]
    );
    assert_eq!(mappings["!def:example.org"].len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_provisioned_mappings_filter() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    let matrix = room("!abc:example.org");
    rooms
        .store_room(&chan("irc.example.com", "#a"), &matrix, RoomOrigin::Config)
        .await?;
    rooms
        .store_room(
            &chan("irc.example.com", "#b"),
            &matrix,
            RoomOrigin::Provision,
        )
        .await?;

    let provisioned = rooms.get_provisioned_mappings("!abc:example.org").await?;
    assert_eq!(provisioned.len(), 1);
    assert_eq!(provisioned[0].remote.channel, "#b");
    assert_eq!(provisioned[0].origin, Some(RoomOrigin::Provision));

    Ok(())
}

#[tokio::test]
async fn test_batch_channels_matches_single_lookups() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    for (room_id, channel) in [
        ("!one:hs", "#a"),
        ("!one:hs", "#b"),
        ("!two:hs", "#c"),
        ("!three:hs", "#d"),
    ] {
        rooms
            .store_room(
                &chan("irc.example.com", channel),
                &room(room_id),
                RoomOrigin::Config,
            )
            .await?;
    }

    let ids: Vec<String> = ["!one:hs", "!two:hs", "!three:hs", "!unmapped:hs"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let batched = rooms.irc_channels_for_room_ids(&ids).await?;
    assert_eq!(batched.len(), ids.len());

    for id in &ids {
        let single = rooms.irc_channels_for_room_id(id).await?;
        assert_eq!(&batched[id], &single, "mismatch for {id}");
    }
    assert!(batched["!unmapped:hs"].is_empty());
    assert_eq!(batched["!one:hs"].len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_matrix_rooms_for_channel_dedupes_across_origins() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    let irc = chan("irc.example.com", "#rust");
    rooms
        .store_room(&irc, &room("!abc:hs"), RoomOrigin::Config)
        .await?;
    rooms
        .store_room(&irc, &room("!abc:hs"), RoomOrigin::Join)
        .await?;
    rooms
        .store_room(&irc, &room("!def:hs"), RoomOrigin::Alias)
        .await?;

    let matched = rooms
        .matrix_rooms_for_channel("irc.example.com", "#rust")
        .await?;
    let ids: Vec<_> = matched.iter().map(|r| r.room_id.as_str()).collect();
    assert_eq!(ids, vec!["!abc:hs", "!def:hs"]);

    Ok(())
}

#[tokio::test]
async fn test_origin_filter_with_allow_unset() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    let irc = chan("irc.example.com", "#rust");
    rooms
        .store_room(&irc, &room("!cfg:hs"), RoomOrigin::Config)
        .await?;
    rooms
        .store_room(&irc, &room("!join:hs"), RoomOrigin::Join)
        .await?;

    // Legacy entry written before provenance tracking: no origin
    let legacy = RoomEntry::new(room("!legacy:hs"), irc.clone(), None);
    rooms.upsert_room_entry(&legacy).await?;

    let strict = rooms
        .mappings_for_channel_by_origin(
            "irc.example.com",
            "#rust",
            &[RoomOrigin::Config],
            false,
        )
        .await?;
    assert_eq!(strict.len(), 1);
    assert_eq!(strict[0].matrix.room_id, "!cfg:hs");

    let with_unset = rooms
        .mappings_for_channel_by_origin(
            "irc.example.com",
            "#rust",
            &[RoomOrigin::Config],
            true,
        )
        .await?;
    let ids: Vec<_> = with_unset.iter().map(|e| e.matrix.room_id.as_str()).collect();
    assert_eq!(ids, vec!["!cfg:hs", "!legacy:hs"]);

    // allow_unset alone selects only legacy rows
    let only_unset = rooms
        .mappings_for_channel_by_origin("irc.example.com", "#rust", &[], true)
        .await?;
    assert_eq!(only_unset.len(), 1);
    assert_eq!(only_unset[0].origin, None);

    // No origins and no unset matches nothing
    let none = rooms
        .mappings_for_channel_by_origin("irc.example.com", "#rust", &[], false)
        .await?;
    assert!(none.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_tracked_channels_for_network() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    rooms
        .store_room(
            &chan("irc.example.com", "#rust"),
            &room("!a:hs"),
            RoomOrigin::Config,
        )
        .await?;
    rooms
        .store_room(
            &chan("irc.example.com", "#rust"),
            &room("!b:hs"),
            RoomOrigin::Join,
        )
        .await?;
    rooms
        .store_room(
            &chan("irc.example.com", "#go"),
            &room("!c:hs"),
            RoomOrigin::Alias,
        )
        .await?;
    rooms
        .store_room(
            &chan("irc.other.net", "#zig"),
            &room("!d:hs"),
            RoomOrigin::Config,
        )
        .await?;

    let tracked = rooms.tracked_channels_for_network("irc.example.com").await?;
    assert_eq!(tracked, vec!["#go".to_string(), "#rust".to_string()]);

    Ok(())
}

#[tokio::test]
async fn test_config_reload_leaves_other_origins_untouched() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    for (room_id, channel) in [("!a:hs", "#a"), ("!b:hs", "#b"), ("!c:hs", "#c")] {
        rooms
            .store_room(
                &chan("irc.example.com", channel),
                &room(room_id),
                RoomOrigin::Config,
            )
            .await?;
    }
    rooms
        .store_room(
            &chan("irc.example.com", "#keep"),
            &room("!keep:hs"),
            RoomOrigin::Provision,
        )
        .await?;

    let mut from_config = rooms.room_ids_from_config().await?;
    from_config.sort();
    assert_eq!(from_config, vec!["!a:hs", "!b:hs", "!c:hs"]);

    rooms.remove_config_mappings().await?;

    let mappings = rooms.all_channel_mappings().await?;
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings["!keep:hs"][0].channel, "#keep");
    assert!(rooms.room_ids_from_config().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_upsert_rejects_mismatched_entry_id() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    let mut entry = RoomEntry::new(
        room("!abc:hs"),
        chan("irc.example.com", "#rust"),
        Some(RoomOrigin::Provision),
    );
    entry.id = "something else".to_string();

    let err = rooms.upsert_room_entry(&entry).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    // Nothing was written
    assert!(
        rooms
            .get_room("!abc:hs", "irc.example.com", "#rust", None)
            .await?
            .is_none()
    );

    Ok(())
}

#[tokio::test]
async fn test_empty_key_components_are_rejected() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    let err = rooms
        .get_room("!abc:hs", "", "#rust", None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidKey(_)));

    let err = rooms
        .store_room(
            &chan("irc.example.com", ""),
            &room("!abc:hs"),
            RoomOrigin::Config,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidKey(_)));

    let err = rooms.set_room_mode("!abc:hs", "", true).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidKey(_)));

    Ok(())
}

#[tokio::test]
async fn test_channel_mode_cache() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    let irc = chan("irc.example.com", "#rust");
    rooms
        .store_room(&irc, &room("!a:hs"), RoomOrigin::Config)
        .await?;
    rooms
        .store_room(&irc, &room("!b:hs"), RoomOrigin::Join)
        .await?;

    // Empty cache is a valid state, not an error
    let empty = rooms.get_channel_modes("irc.example.com", "#rust").await?;
    assert!(empty.is_empty());

    // Rooms track modes independently even when mapped to the same channel
    rooms.set_room_mode("!a:hs", "s", true).await?;
    rooms.set_room_mode("!a:hs", "n", true).await?;
    rooms.set_room_mode("!b:hs", "s", true).await?;
    rooms.set_room_mode("!b:hs", "s", false).await?;

    let modes = rooms.get_channel_modes("irc.example.com", "#rust").await?;
    assert_eq!(modes["!a:hs"], vec!["n".to_string(), "s".to_string()]);
    assert!(!modes.contains_key("!b:hs"));

    Ok(())
}

#[tokio::test]
async fn test_admin_room_replacement() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    rooms
        .store_admin_room(&room("!admin1:hs"), "@alice:hs")
        .await?;
    rooms
        .store_admin_room(&room("!admin2:hs"), "@alice:hs")
        .await?;

    // The most recently stored room wins; the old association is gone
    let by_user = rooms.get_admin_room_for_user("@alice:hs").await?.unwrap();
    assert_eq!(by_user.room_id, "!admin2:hs");

    assert!(rooms.get_admin_room("!admin1:hs").await?.is_none());
    assert!(rooms.get_admin_room("!admin2:hs").await?.is_some());

    assert!(rooms.get_admin_room_for_user("@bob:hs").await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_pm_room_uniqueness_per_pair() -> anyhow::Result<()> {
    let db = test_db().await?;
    let rooms = db.rooms();

    let irc = chan("irc.example.com", "alice");
    rooms
        .set_pm_room(&irc, &room("!pm1:hs"), "@real:hs", "@irc_alice:hs")
        .await?;

    let found = rooms.get_pm_room("@real:hs", "@irc_alice:hs").await?.unwrap();
    assert_eq!(found.room_id, "!pm1:hs");

    // The pair is ordered: the reverse pair is a different key
    assert!(rooms.get_pm_room("@irc_alice:hs", "@real:hs").await?.is_none());

    // Re-setting the pair replaces the room
    rooms
        .set_pm_room(&irc, &room("!pm2:hs"), "@real:hs", "@irc_alice:hs")
        .await?;
    let found = rooms.get_pm_room("@real:hs", "@irc_alice:hs").await?.unwrap();
    assert_eq!(found.room_id, "!pm2:hs");

    let by_room = rooms.get_pm_room_by_room_id("!pm2:hs").await?.unwrap();
    assert_eq!(by_room.room_id, "!pm2:hs");
    assert!(rooms.get_pm_room_by_room_id("!pm1:hs").await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_file_backed_store_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("store.db");
    let path = path.to_str().unwrap();

    {
        let db = Database::new(path).await?;
        db.rooms()
            .store_room(
                &chan("irc.example.com", "#rust"),
                &room("!abc:hs"),
                RoomOrigin::Config,
            )
            .await?;
    }

    let db = Database::new(path).await?;
    let entry = db
        .rooms()
        .get_room("!abc:hs", "irc.example.com", "#rust", Some(RoomOrigin::Config))
        .await?;
    assert!(entry.is_some());

    Ok(())
}
