//! Startup recovery
//!
//! Recovery materialises the state a crashed (or cleanly closed) database
//! left behind: load the newest parseable snapshot, then replay every WAL
//! record whose LSN is greater than the snapshot's, in order. Partial and
//! corrupt WAL tails are discarded by the reader. Collection sets are
//! rebuilt strictly from the snapshot plus replayed `SAdd`/`SRem` records
//! — never inferred from document existence.

use crate::snapshot;
use crate::wal::{self, WalOp, WalSegment};
use bri_core::Result;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// Materialised state produced by recovery.
#[derive(Debug, Default)]
pub struct RecoveredState {
    /// `key → JSON-encoded document value`
    pub documents: HashMap<String, String>,
    /// `set key → members`
    pub sets: HashMap<String, BTreeSet<String>>,
    /// LSN the next WAL append should receive
    pub next_lsn: u64,
    /// LSN of the snapshot recovery started from, if any
    pub snapshot_lsn: Option<u64>,
    /// Number of WAL records replayed on top of the snapshot
    pub replayed: usize,
}

/// Recover the materialised state from `snapshots/` + `wal/`.
pub fn recover(wal_dir: &Path, snapshots_dir: &Path) -> Result<RecoveredState> {
    let mut state = RecoveredState::default();

    let snapshot_lsn = match snapshot::load_latest(snapshots_dir)? {
        Some(snap) => {
            state.documents = snap.documents.into_iter().collect();
            state.sets = snap.sets.into_iter().collect();
            state.snapshot_lsn = Some(snap.lsn);
            snap.lsn
        }
        None => 0,
    };

    let read = wal::read_all(wal_dir)?;

    // Cut the discarded tail off the newest segment so appends after
    // recovery never land behind garbage.
    if let Some(tail) = &read.dropped_tail {
        let mut segment = WalSegment::open_append(wal_dir, tail.segment_first_lsn)?;
        segment.truncate(tail.valid_end)?;
        segment.sync()?;
        warn!(
            target: "bri::recovery",
            segment = tail.segment_first_lsn,
            dropped_bytes = tail.segment_size - tail.valid_end,
            "truncated bad WAL tail"
        );
    }

    let mut last_lsn = snapshot_lsn;
    for record in read.records {
        if record.lsn <= snapshot_lsn {
            continue;
        }
        apply(&mut state, record.op);
        last_lsn = record.lsn;
        state.replayed += 1;
    }

    state.next_lsn = last_lsn + 1;

    info!(
        target: "bri::recovery",
        snapshot_lsn = ?state.snapshot_lsn,
        replayed = state.replayed,
        documents = state.documents.len(),
        sets = state.sets.len(),
        next_lsn = state.next_lsn,
        "recovery complete"
    );

    Ok(state)
}

fn apply(state: &mut RecoveredState, op: WalOp) {
    match op {
        WalOp::Set { key, value } => {
            state.documents.insert(key, value);
        }
        WalOp::Rename { old_key, new_key } => match state.documents.remove(&old_key) {
            Some(value) => {
                state.documents.insert(new_key, value);
            }
            None => warn!(
                target: "bri::recovery",
                old_key = %old_key,
                new_key = %new_key,
                "rename source missing during replay"
            ),
        },
        WalOp::SAdd { set_key, member } => {
            state.sets.entry(set_key).or_default().insert(member);
        }
        WalOp::SRem { set_key, member } => {
            if let Some(members) = state.sets.get_mut(&set_key) {
                members.remove(&member);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotState;
    use crate::wal::WalWriter;
    use bri_core::FsyncMode;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn writer(wal_dir: &Path, next_lsn: u64) -> WalWriter {
        WalWriter::open(wal_dir, [1u8; 16], 1024 * 1024, FsyncMode::Immediate, next_lsn).unwrap()
    }

    #[test]
    fn test_recover_empty() {
        let dir = tempdir().unwrap();
        let state = recover(&dir.path().join("wal"), &dir.path().join("snapshots")).unwrap();
        assert!(state.documents.is_empty());
        assert!(state.sets.is_empty());
        assert_eq!(state.next_lsn, 1);
        assert_eq!(state.snapshot_lsn, None);
    }

    #[test]
    fn test_recover_wal_only() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");

        let mut w = writer(&wal_dir, 1);
        w.append(WalOp::Set {
            key: "USER_a".into(),
            value: "{\"n\":1}".into(),
        })
        .unwrap();
        w.append(WalOp::SAdd {
            set_key: "USER?".into(),
            member: "USER_a".into(),
        })
        .unwrap();
        w.append(WalOp::Set {
            key: "USER_a".into(),
            value: "{\"n\":2}".into(),
        })
        .unwrap();
        w.close().unwrap();

        let state = recover(&wal_dir, &dir.path().join("snapshots")).unwrap();
        assert_eq!(state.documents["USER_a"], "{\"n\":2}");
        assert!(state.sets["USER?"].contains("USER_a"));
        assert_eq!(state.replayed, 3);
        assert_eq!(state.next_lsn, 4);
    }

    #[test]
    fn test_recover_snapshot_plus_tail() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        let snap_dir = dir.path().join("snapshots");

        // WAL covers lsns 1..=4
        let mut w = writer(&wal_dir, 1);
        for n in 1..=4u64 {
            w.append(WalOp::Set {
                key: format!("USER_{n}"),
                value: format!("{{\"n\":{n}}}"),
            })
            .unwrap();
        }
        w.close().unwrap();

        // Snapshot covers up to lsn 2 with different (older) values
        let mut documents = BTreeMap::new();
        documents.insert("USER_1".to_string(), "{\"n\":1}".to_string());
        documents.insert("USER_2".to_string(), "{\"n\":2}".to_string());
        snapshot::write(
            &snap_dir,
            &SnapshotState {
                lsn: 2,
                documents,
                sets: BTreeMap::new(),
            },
        )
        .unwrap();

        let state = recover(&wal_dir, &snap_dir).unwrap();
        assert_eq!(state.snapshot_lsn, Some(2));
        // Only lsns 3 and 4 replayed on top
        assert_eq!(state.replayed, 2);
        assert_eq!(state.documents.len(), 4);
        assert_eq!(state.next_lsn, 5);
    }

    #[test]
    fn test_bad_tail_discarded_and_repaired() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");

        let mut w = writer(&wal_dir, 1);
        for n in 1..=3u64 {
            w.append(WalOp::Set {
                key: format!("USER_{n}"),
                value: "{}".to_string(),
            })
            .unwrap();
        }
        w.close().unwrap();

        // Tear the last record
        let path = WalSegment::segment_path(&wal_dir, 1);
        let len = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        let state = recover(&wal_dir, &dir.path().join("snapshots")).unwrap();
        assert_eq!(state.replayed, 2);
        assert_eq!(state.next_lsn, 3);

        // The tail was physically truncated: appends resume cleanly
        let mut w = writer(&wal_dir, state.next_lsn);
        w.append(WalOp::Set {
            key: "USER_3".to_string(),
            value: "{\"retry\":true}".to_string(),
        })
        .unwrap();
        w.close().unwrap();

        let state = recover(&wal_dir, &dir.path().join("snapshots")).unwrap();
        assert_eq!(state.replayed, 3);
        assert_eq!(state.documents["USER_3"], "{\"retry\":true}");
    }

    #[test]
    fn test_rename_and_srem_replay() {
        let dir = tempdir().unwrap();
        let wal_dir = dir.path().join("wal");

        let mut w = writer(&wal_dir, 1);
        w.append(WalOp::Set {
            key: "USER_a".into(),
            value: "{}".into(),
        })
        .unwrap();
        w.append(WalOp::SAdd {
            set_key: "USER?".into(),
            member: "USER_a".into(),
        })
        .unwrap();
        w.append(WalOp::Rename {
            old_key: "USER_a".into(),
            new_key: "X:USER_a:X".into(),
        })
        .unwrap();
        w.append(WalOp::SRem {
            set_key: "USER?".into(),
            member: "USER_a".into(),
        })
        .unwrap();
        w.close().unwrap();

        let state = recover(&wal_dir, &dir.path().join("snapshots")).unwrap();
        assert!(!state.documents.contains_key("USER_a"));
        assert!(state.documents.contains_key("X:USER_a:X"));
        assert!(state.sets["USER?"].is_empty());
    }
}
