//! Crash recovery and durability: snapshot + WAL-tail replay, eviction
//! under a small memory budget, and snapshot retention.

use bri::{Db, DbConfig, Filter, FsyncMode, OpOptions};
use serde_json::json;
use tempfile::tempdir;

fn config(dir: &std::path::Path) -> DbConfig {
    DbConfig::new(dir, 64)
        .with_fsync_mode(FsyncMode::Immediate)
        .with_snapshot_interval_ms(60 * 60 * 1000)
}

#[test]
fn reopen_after_abrupt_close_replays_snapshot_plus_tail() {
    let dir = tempdir().unwrap();

    {
        let db = Db::open(config(dir.path())).unwrap();
        for n in 0..100 {
            db.add("user", json!({"n": n}), OpOptions::new()).unwrap();
        }
        // Snapshot covers the first hundred
        assert!(db.create_snapshot().unwrap().is_some());

        for n in 100..110 {
            db.add("user", json!({"n": n}), OpOptions::new()).unwrap();
        }
        // Abrupt close: handle dropped without disconnect
    }

    let db = Db::open(config(dir.path())).unwrap();
    let users = db.get_all("userS", Filter::All).unwrap();
    assert_eq!(users.len(), 110);

    // Both snapshot-era and tail-era documents are intact
    let low = db
        .get_all("userS", Filter::from(json!({"n": 0})))
        .unwrap();
    assert_eq!(low.len(), 1);
    let high = db
        .get_all("userS", Filter::from(json!({"n": 109})))
        .unwrap();
    assert_eq!(high.len(), 1);

    db.disconnect().unwrap();
}

#[test]
fn graceful_disconnect_then_reopen() {
    let dir = tempdir().unwrap();

    let id = {
        let db = Db::open(config(dir.path())).unwrap();
        let user = db
            .add("user", json!({"name": "Alice"}), OpOptions::new())
            .unwrap();
        db.disconnect().unwrap();
        user.id().to_string()
    };

    let db = Db::open(config(dir.path())).unwrap();
    let user = db.get("user", id.as_str()).unwrap().unwrap();
    assert_eq!(user.get("name"), Some(&json!("Alice")));
    db.disconnect().unwrap();
}

#[test]
fn tombstones_survive_recovery() {
    let dir = tempdir().unwrap();

    let (alive, dead) = {
        let db = Db::open(config(dir.path())).unwrap();
        let alive = db
            .add("user", json!({"name": "Alive"}), OpOptions::new())
            .unwrap();
        let dead = db
            .add("user", json!({"name": "Dead"}), OpOptions::new())
            .unwrap();
        db.del("user", dead.id(), Some("SYSTEM")).unwrap();
        (alive.id().to_string(), dead.id().to_string())
    };

    let db = Db::open(config(dir.path())).unwrap();
    assert!(db.get("user", alive.as_str()).unwrap().is_some());
    assert!(db.get("user", dead.as_str()).unwrap().is_none());

    let users = db.get_all("userS", Filter::All).unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].get("name"), Some(&json!("Alive")));

    db.disconnect().unwrap();
}

#[test]
fn saves_and_deletes_replay_in_commit_order() {
    let dir = tempdir().unwrap();

    let id = {
        let db = Db::open(config(dir.path())).unwrap();
        let mut user = db
            .add("user", json!({"name": "v1", "score": 0}), OpOptions::new())
            .unwrap();
        for n in 1..=5 {
            user.set("name", format!("v{n}"));
            user.set("score", n);
            user = user.save(&db, OpOptions::new()).unwrap();
        }
        user.id().to_string()
    };

    let db = Db::open(config(dir.path())).unwrap();
    let user = db.get("user", id.as_str()).unwrap().unwrap();
    assert_eq!(user.get("name"), Some(&json!("v5")));
    assert_eq!(user.get("score"), Some(&json!(5)));
    db.disconnect().unwrap();
}

#[test]
fn small_memory_budget_evicts_but_loses_nothing() {
    let dir = tempdir().unwrap();
    let config = DbConfig::new(dir.path(), 1)
        .with_fsync_mode(FsyncMode::Immediate)
        .with_eviction_threshold(0.002)
        .with_memory_target_percent(0.001)
        .with_snapshot_interval_ms(60 * 60 * 1000);

    let db = Db::open(config.clone()).unwrap();
    let filler = "x".repeat(512);
    let mut ids = Vec::new();
    for n in 0..50 {
        let doc = db
            .add("note", json!({"n": n, "filler": filler}), OpOptions::new())
            .unwrap();
        ids.push(doc.id().to_string());
    }

    let stats = db.stats().unwrap();
    assert!(
        stats.hot_bytes <= config.max_memory_bytes(),
        "hot tier stays within budget, got {}",
        stats.hot_bytes
    );

    // Every document still reads back, hot or cold
    for (n, id) in ids.iter().enumerate() {
        let doc = db.get("note", id.as_str()).unwrap().unwrap();
        assert_eq!(doc.get("n"), Some(&json!(n)));
    }

    db.disconnect().unwrap();
}

#[test]
fn snapshot_retention_keeps_configured_count() {
    let dir = tempdir().unwrap();
    let config = config(dir.path()).with_keep_snapshots(2);

    let db = Db::open(config).unwrap();
    for n in 0..5 {
        db.add("user", json!({"n": n}), OpOptions::new()).unwrap();
        db.create_snapshot().unwrap();
    }

    let snapshots: Vec<_> = std::fs::read_dir(dir.path().join("snapshots"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".snap"))
        .collect();
    assert_eq!(snapshots.len(), 2);

    db.disconnect().unwrap();
}

#[test]
fn truncated_wal_tail_is_discarded() {
    let dir = tempdir().unwrap();

    {
        let db = Db::open(config(dir.path())).unwrap();
        for n in 0..10 {
            db.add("user", json!({"n": n}), OpOptions::new()).unwrap();
        }
    }

    // Chop bytes off the newest WAL segment to simulate a torn write
    let wal_dir = dir.path().join("wal");
    let mut segments: Vec<_> = std::fs::read_dir(&wal_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    segments.sort();
    let newest = segments.last().unwrap();
    let len = std::fs::metadata(newest).unwrap().len();
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(newest)
        .unwrap();
    file.set_len(len - 7).unwrap();

    // Reopen: the torn record is gone, everything before it is intact
    let db = Db::open(config(dir.path())).unwrap();
    let users = db.get_all("userS", Filter::All).unwrap();
    assert_eq!(users.len(), 9, "the torn trailing record is discarded");
    db.disconnect().unwrap();
}
