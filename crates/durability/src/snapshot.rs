//! Snapshots
//!
//! A snapshot is a self-contained, point-in-time dump of the materialised
//! state: every document value, every collection set, and the last LSN the
//! dump includes. The on-disk form is the JSS serialisation of
//!
//! ```text
//! { version: 2, lsn, documents: { key: value }, sets: { setKey: [member] } }
//! ```
//!
//! written atomically (temp file + fsync + rename) under `snapshots/` as
//! `snap-<timestamp>-<lsn>.snap`. Retention keeps the newest
//! `keep_snapshots` files. Loading walks newest-first and falls back to
//! the next older file when one fails to parse.

use bri_core::{jss, Error, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Snapshot format version
pub const SNAPSHOT_VERSION: u64 = 2;

/// Materialised state captured by (or restored from) a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotState {
    /// Last LSN included in this state
    pub lsn: u64,
    /// `key → JSON-encoded document value`
    pub documents: BTreeMap<String, String>,
    /// `set key → members`
    pub sets: BTreeMap<String, BTreeSet<String>>,
}

/// Outcome of a snapshot write.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    /// Final path of the snapshot file
    pub path: PathBuf,
    /// LSN the snapshot covers
    pub lsn: u64,
    /// File size in bytes
    pub size_bytes: u64,
}

/// Write a snapshot atomically and return its info.
pub fn write(dir: &Path, state: &SnapshotState) -> Result<SnapshotInfo> {
    fs::create_dir_all(dir)?;

    let timestamp = chrono::Utc::now().timestamp_millis();
    let path = dir.join(format!("snap-{}-{}.snap", timestamp, state.lsn));
    let tmp = path.with_extension("snap.tmp");

    let text = jss::stringify(&encode(state)?)?;
    let mut file = File::create(&tmp)?;
    file.write_all(text.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, &path)?;

    let size_bytes = fs::metadata(&path)?.len();
    info!(
        target: "bri::snapshot",
        path = %path.display(),
        lsn = state.lsn,
        documents = state.documents.len(),
        size_bytes,
        "snapshot written"
    );

    Ok(SnapshotInfo {
        path,
        lsn: state.lsn,
        size_bytes,
    })
}

/// Delete all but the newest `keep` snapshots. Returns how many were removed.
pub fn prune(dir: &Path, keep: usize) -> Result<usize> {
    let mut files = snapshot_files(dir)?;
    if files.len() <= keep {
        return Ok(0);
    }
    // files are sorted oldest-first
    let excess = files.len() - keep;
    let mut removed = 0;
    for (_, _, path) in files.drain(..excess) {
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(target: "bri::snapshot", path = %path.display(), "pruned snapshot");
                removed += 1;
            }
            Err(e) => warn!(
                target: "bri::snapshot",
                path = %path.display(),
                error = %e,
                "failed to prune snapshot"
            ),
        }
    }
    Ok(removed)
}

/// Load the newest parseable snapshot, falling back across corrupt ones.
///
/// Returns `None` when no usable snapshot exists.
pub fn load_latest(dir: &Path) -> Result<Option<SnapshotState>> {
    let files = snapshot_files(dir)?;
    for (_, _, path) in files.iter().rev() {
        match load_file(path) {
            Ok(state) => {
                debug!(
                    target: "bri::snapshot",
                    path = %path.display(),
                    lsn = state.lsn,
                    "loaded snapshot"
                );
                return Ok(Some(state));
            }
            Err(e) => warn!(
                target: "bri::snapshot",
                path = %path.display(),
                error = %e,
                "snapshot unreadable, falling back to older"
            ),
        }
    }
    Ok(None)
}

fn load_file(path: &Path) -> Result<SnapshotState> {
    let text = fs::read_to_string(path)?;
    decode(&jss::parse(&text)?)
}

fn encode(state: &SnapshotState) -> Result<Value> {
    let mut documents = Map::new();
    for (key, raw) in &state.documents {
        let value: Value = serde_json::from_str(raw).map_err(|e| {
            Error::serialization(format!("document at {key:?} is not valid JSON: {e}"))
        })?;
        documents.insert(key.clone(), value);
    }

    let mut sets = Map::new();
    for (set_key, members) in &state.sets {
        let items: Vec<Value> = members
            .iter()
            .map(|m| Value::String(m.clone()))
            .collect();
        sets.insert(set_key.clone(), Value::Array(items));
    }

    let mut root = Map::new();
    root.insert("version".to_string(), Value::from(SNAPSHOT_VERSION));
    root.insert("lsn".to_string(), Value::from(state.lsn));
    root.insert("documents".to_string(), Value::Object(documents));
    root.insert("sets".to_string(), Value::Object(sets));
    Ok(Value::Object(root))
}

fn decode(root: &Value) -> Result<SnapshotState> {
    let version = root
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::corruption("snapshot missing version"))?;
    if version != SNAPSHOT_VERSION {
        return Err(Error::corruption(format!(
            "unsupported snapshot version: {version}"
        )));
    }

    let lsn = root
        .get("lsn")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::corruption("snapshot missing lsn"))?;

    let mut documents = BTreeMap::new();
    let doc_map = root
        .get("documents")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::corruption("snapshot missing documents"))?;
    for (key, value) in doc_map {
        documents.insert(key.clone(), serde_json::to_string(value)?);
    }

    let mut sets = BTreeMap::new();
    let set_map = root
        .get("sets")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::corruption("snapshot missing sets"))?;
    for (set_key, value) in set_map {
        let items = value
            .as_array()
            .ok_or_else(|| Error::corruption(format!("set {set_key:?} is not an array")))?;
        let mut members = BTreeSet::new();
        for item in items {
            let member = item
                .as_str()
                .ok_or_else(|| Error::corruption(format!("non-string member in {set_key:?}")))?;
            members.insert(member.to_string());
        }
        sets.insert(set_key.clone(), members);
    }

    Ok(SnapshotState {
        lsn,
        documents,
        sets,
    })
}

/// All snapshot files in the directory, sorted oldest-first by
/// `(lsn, timestamp)`.
fn snapshot_files(dir: &Path) -> Result<Vec<(u64, i64, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(stem) = name.strip_prefix("snap-").and_then(|s| s.strip_suffix(".snap")) else {
            continue;
        };
        let Some((ts_str, lsn_str)) = stem.split_once('-') else {
            continue;
        };
        let (Ok(timestamp), Ok(lsn)) = (ts_str.parse::<i64>(), lsn_str.parse::<u64>()) else {
            continue;
        };
        files.push((lsn, timestamp, entry.path()));
    }
    files.sort();
    Ok(files)
}
