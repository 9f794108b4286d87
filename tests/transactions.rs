//! Transaction recorder: buffered mutations, read-your-writes, pop,
//! rollback, and atomic commit.

use bri::{Db, DbConfig, Error, Filter, FsyncMode, OpOptions, TxnStatus};
use serde_json::json;
use tempfile::tempdir;

fn open_db(dir: &std::path::Path) -> Db {
    let config = DbConfig::new(dir, 64)
        .with_fsync_mode(FsyncMode::Immediate)
        .with_snapshot_interval_ms(60 * 60 * 1000);
    Db::open(config).unwrap()
}

#[test]
fn record_pop_commit() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    let txn_id = db.rec().unwrap();

    db.add("order", json!({"item": "book"}), OpOptions::new())
        .unwrap();
    db.add("payment", json!({"amount": 12}), OpOptions::new())
        .unwrap();

    let status = db.txn_status(None).unwrap();
    assert_eq!(status.txn_id, txn_id);
    assert_eq!(status.action_count, 2);
    assert_eq!(status.status, TxnStatus::Pending);

    // pop removes the payment
    let popped = db.pop(None).unwrap().unwrap();
    assert!(popped.event.target.starts_with("PAYMENT_"));

    let summary = db.fin(None).unwrap();
    assert_eq!(summary.entries, 1);
    assert_eq!(summary.collections, vec!["ORDER?"]);
    assert_eq!(summary.documents.len(), 1);

    // Only the order committed
    assert_eq!(db.get_all("orderS", Filter::All).unwrap().len(), 1);
    assert!(db.get_all("paymentS", Filter::All).unwrap().is_empty());

    assert_eq!(
        db.txn_status(Some(&txn_id)).unwrap().status,
        TxnStatus::Committed
    );

    db.disconnect().unwrap();
}

#[test]
fn rollback_leaves_no_trace() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    db.rec().unwrap();
    db.add("order", json!({"item": "book"}), OpOptions::new())
        .unwrap();
    db.nop(None).unwrap();

    assert!(db.get_all("orderS", Filter::All).unwrap().is_empty());
    assert_eq!(db.stats().unwrap().keys, 0);

    db.disconnect().unwrap();
}

#[test]
fn reads_inside_txn_observe_buffered_writes() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    // Pre-existing document
    let existing = db
        .add("user", json!({"name": "Before"}), OpOptions::new())
        .unwrap();

    db.rec().unwrap();
    let created = db
        .add("user", json!({"name": "Inside"}), OpOptions::new())
        .unwrap();

    // The buffered write is visible to get and get_all within the txn
    let seen = db.get("user", created.id()).unwrap().unwrap();
    assert_eq!(seen.get("name"), Some(&json!("Inside")));
    assert_eq!(db.get_all("userS", Filter::All).unwrap().len(), 2);

    // A buffered delete hides the document within the txn
    db.del("user", existing.id(), Some("SYSTEM")).unwrap();
    assert!(db.get("user", existing.id()).unwrap().is_none());
    assert_eq!(db.get_all("userS", Filter::All).unwrap().len(), 1);

    db.fin(None).unwrap();

    // After commit the same view holds
    assert!(db.get("user", existing.id()).unwrap().is_none());
    assert_eq!(db.get_all("userS", Filter::All).unwrap().len(), 1);

    db.disconnect().unwrap();
}

#[test]
fn only_one_active_txn_per_handle() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    db.rec().unwrap();
    assert!(matches!(db.rec(), Err(Error::TxnState { .. })));
    db.nop(None).unwrap();

    // After resolution a new txn may start
    db.rec().unwrap();
    db.fin(None).unwrap();

    db.disconnect().unwrap();
}

#[test]
fn txn_verbs_on_resolved_txns_fail() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    let txn_id = db.rec().unwrap();
    db.fin(None).unwrap();

    for result in [
        db.fin(Some(&txn_id)).map(|_| ()),
        db.nop(Some(&txn_id)),
        db.pop(Some(&txn_id)).map(|_| ()),
    ] {
        match result {
            Err(Error::TxnState { state }) => assert_eq!(state, "committed"),
            other => panic!("expected TxnState error, got {other:?}"),
        }
    }

    db.disconnect().unwrap();
}

#[test]
fn committed_txn_survives_reopen() {
    let dir = tempdir().unwrap();

    {
        let db = open_db(dir.path());
        db.rec().unwrap();
        db.add("order", json!({"item": "a"}), OpOptions::new())
            .unwrap();
        db.add("order", json!({"item": "b"}), OpOptions::new())
            .unwrap();
        db.fin(None).unwrap();
        // dropped without disconnect
    }

    let db = open_db(dir.path());
    assert_eq!(db.get_all("orderS", Filter::All).unwrap().len(), 2);
    db.disconnect().unwrap();
}

#[test]
fn rolled_back_txn_is_absent_after_reopen() {
    let dir = tempdir().unwrap();

    {
        let db = open_db(dir.path());
        db.rec().unwrap();
        db.add("order", json!({"item": "ghost"}), OpOptions::new())
            .unwrap();
        db.nop(None).unwrap();
    }

    let db = open_db(dir.path());
    assert!(db.get_all("orderS", Filter::All).unwrap().is_empty());
    db.disconnect().unwrap();
}

#[test]
fn save_inside_txn_buffers_until_fin() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());

    let mut user = db
        .add("user", json!({"name": "v1"}), OpOptions::new())
        .unwrap();

    db.rec().unwrap();
    user.set("name", "v2");
    let saved = user.save(&db, OpOptions::new()).unwrap();
    assert_eq!(saved.get("name"), Some(&json!("v2")));

    db.nop(None).unwrap();

    // The rollback discarded the save
    let fetched = db.get("user", saved.id()).unwrap().unwrap();
    assert_eq!(fetched.get("name"), Some(&json!("v1")));

    db.disconnect().unwrap();
}
