//! The tiered key/value engine
//!
//! [`KvEngine`] composes the storage tiers with the durability layer:
//!
//! - every mutation appends to the WAL before touching state, so the log
//!   is always ahead of both tiers
//! - values land in the hot tier marked dirty; the background worker (or
//!   eviction pressure) flushes them to cold files
//! - reads hit the hot tier first and rehydrate from cold files on miss
//! - collection sets live in memory and are persisted to `sets/` files
//!   the same way
//!
//! All mutations are serialised through one internal lock per engine —
//! that lock is the operation queue: at most one in-flight mutation, and
//! readers observe the monotonic commit order. Snapshot writes capture
//! their point-in-time view under the lock but write the file outside it.

use crate::background::BackgroundWorker;
use crate::bus::{EventBus, Subscription};
use bri_core::{ChangeEvent, DbConfig, Error, FsyncMode, Result};
use bri_durability::snapshot::{self, SnapshotInfo, SnapshotState};
use bri_durability::wal::{WalOp, WalWriter};
use bri_durability::recovery;
use bri_storage::{ColdTier, HotTier};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Engine counters reported by [`KvEngine::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Hot-tier byte footprint
    pub hot_bytes: u64,
    /// Number of live keys (tombstones included)
    pub keys: usize,
    /// Number of WAL segment files
    pub wal_segments: usize,
    /// Millisecond timestamp of the last snapshot this process wrote
    pub last_snapshot_at: Option<i64>,
}

struct EngineState {
    hot: HotTier,
    cold: ColdTier,
    wal: WalWriter,
    sets: HashMap<String, BTreeSet<String>>,
    /// Every key with a live value, resident or not
    key_index: BTreeSet<String>,
    /// Sets whose files are behind the in-memory index
    dirty_sets: BTreeSet<String>,
    last_snapshot_lsn: Option<u64>,
    last_snapshot_at: Option<i64>,
    closed: bool,
}

/// Tiered, WAL-backed key/value store with pub/sub.
pub struct KvEngine {
    config: DbConfig,
    state: Mutex<EngineState>,
    bus: EventBus,
    worker: Mutex<Option<BackgroundWorker>>,
}

impl KvEngine {
    /// Open (or create) the engine at `config.data_dir`.
    ///
    /// Runs recovery — newest valid snapshot plus the WAL tail past its
    /// LSN — then starts the background worker driving batched fsync,
    /// cold-tier flush, and periodic snapshots.
    pub fn open(config: DbConfig) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)?;

        let recovered = recovery::recover(&config.wal_dir(), &config.snapshots_dir())?;
        let cold = ColdTier::open(config.docs_dir(), config.sets_dir())?;
        let wal = WalWriter::open(
            &config.wal_dir(),
            *Uuid::new_v4().as_bytes(),
            config.wal_segment_size,
            config.fsync_mode,
            recovered.next_lsn,
        )?;

        let mut hot = HotTier::new();
        let mut key_index = BTreeSet::new();
        for (key, value) in recovered.documents {
            key_index.insert(key.clone());
            // Cold files may predate the replayed tail; treat everything
            // recovered as unflushed so the next flush settles them.
            hot.insert(&key, value, true);
        }
        let sets: HashMap<String, BTreeSet<String>> = recovered.sets.into_iter().collect();
        let dirty_sets: BTreeSet<String> = sets.keys().cloned().collect();

        let mut state = EngineState {
            hot,
            cold,
            wal,
            sets,
            key_index,
            dirty_sets,
            last_snapshot_lsn: recovered.snapshot_lsn,
            last_snapshot_at: None,
            closed: false,
        };
        Self::settle_eviction(&mut state, &config);

        let engine = Arc::new(KvEngine {
            config,
            state: Mutex::new(state),
            bus: EventBus::new(),
            worker: Mutex::new(None),
        });

        let worker = BackgroundWorker::spawn(
            Arc::downgrade(&engine),
            engine.config.fsync_interval_ms,
            engine.config.snapshot_interval_ms,
        );
        *engine.worker.lock() = Some(worker);

        let stats = engine.stats()?;
        info!(
            target: "bri::engine",
            data_dir = %engine.config.data_dir.display(),
            keys = stats.keys,
            wal_segments = stats.wal_segments,
            "engine open"
        );
        Ok(engine)
    }

    /// Read a value. Misses rehydrate from the cold tier.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;

        if let Some(value) = state.hot.get(key) {
            return Ok(Some(value.to_string()));
        }
        if !state.key_index.contains(key) {
            return Ok(None);
        }
        match state.cold.read(key)? {
            Some(value) => {
                state.hot.insert(key, value.clone(), false);
                Self::settle_eviction(&mut state, &self.config);
                Ok(Some(value))
            }
            None => {
                warn!(target: "bri::engine", key, "indexed key has no cold file");
                Ok(None)
            }
        }
    }

    /// Overwrite or insert a value.
    pub fn set(&self, key: &str, value: String) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        let record = state.wal.append(WalOp::Set {
            key: key.to_string(),
            value,
        })?;
        let op = record.op;
        Self::apply_locked(&mut state, &op)?;
        Self::settle_eviction(&mut state, &self.config);
        Ok(())
    }

    /// Add a member to a set.
    pub fn s_add(&self, set_key: &str, member: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        let record = state.wal.append(WalOp::SAdd {
            set_key: set_key.to_string(),
            member: member.to_string(),
        })?;
        let op = record.op;
        Self::apply_locked(&mut state, &op)
    }

    /// Remove a member from a set.
    pub fn s_rem(&self, set_key: &str, member: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        let record = state.wal.append(WalOp::SRem {
            set_key: set_key.to_string(),
            member: member.to_string(),
        })?;
        let op = record.op;
        Self::apply_locked(&mut state, &op)
    }

    /// Members of a set, sorted. Unknown sets read as empty.
    pub fn s_members(&self, set_key: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        Self::check_open(&state)?;
        Ok(state
            .sets
            .get(set_key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Raw member set, for overlay-aware callers.
    pub fn member_set(&self, set_key: &str) -> Result<BTreeSet<String>> {
        let state = self.state.lock();
        Self::check_open(&state)?;
        Ok(state.sets.get(set_key).cloned().unwrap_or_default())
    }

    /// Atomically move a key; the old key becomes non-existent.
    pub fn rename(&self, old_key: &str, new_key: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        if !state.key_index.contains(old_key) {
            return Err(Error::not_found(old_key));
        }
        let record = state.wal.append(WalOp::Rename {
            old_key: old_key.to_string(),
            new_key: new_key.to_string(),
        })?;
        let op = record.op;
        Self::apply_locked(&mut state, &op)
    }

    /// Apply a group of ops behind a single WAL barrier.
    ///
    /// The whole batch is appended and synced before any of it touches
    /// state; transaction commits ride on this.
    pub fn apply_batch(&self, ops: Vec<WalOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        let records = state.wal.append_batch(ops)?;
        for record in &records {
            Self::apply_locked(&mut state, &record.op)?;
        }
        Self::settle_eviction(&mut state, &self.config);
        Ok(())
    }

    /// Register a listener on a channel.
    pub fn subscribe(
        &self,
        channel: &str,
        listener: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.bus.subscribe(channel, listener)
    }

    /// Broadcast an event to a channel's listeners, in order.
    pub fn publish(&self, channel: &str, event: &ChangeEvent) {
        self.bus.publish(channel, event);
    }

    /// Write a snapshot of the current materialised state.
    ///
    /// Returns `None` when nothing changed since the last snapshot. The
    /// point-in-time view is captured under the engine lock; file I/O
    /// happens outside it.
    pub fn create_snapshot(&self) -> Result<Option<SnapshotInfo>> {
        let captured = {
            let mut state = self.state.lock();
            Self::check_open(&state)?;

            let lsn = state.wal.last_lsn().unwrap_or(0);
            if state.last_snapshot_lsn == Some(lsn) {
                return Ok(None);
            }

            let mut documents = BTreeMap::new();
            let keys: Vec<String> = state.key_index.iter().cloned().collect();
            for key in keys {
                let value = match state.hot.peek(&key) {
                    Some(value) => value.to_string(),
                    None => match state.cold.read(&key)? {
                        Some(value) => value,
                        None => {
                            warn!(target: "bri::snapshot", key = %key, "indexed key missing, skipped");
                            continue;
                        }
                    },
                };
                documents.insert(key, value);
            }
            let sets: BTreeMap<String, BTreeSet<String>> = state
                .sets
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            SnapshotState {
                lsn,
                documents,
                sets,
            }
        };

        let info = snapshot::write(&self.config.snapshots_dir(), &captured)?;
        snapshot::prune(&self.config.snapshots_dir(), self.config.keep_snapshots)?;

        let mut state = self.state.lock();
        state.last_snapshot_lsn = Some(info.lsn);
        state.last_snapshot_at = Some(chrono::Utc::now().timestamp_millis());
        Ok(Some(info))
    }

    /// Flush everything, write a final snapshot, and release the handle.
    ///
    /// Further operations on this engine fail with a storage error.
    pub fn disconnect(&self) -> Result<()> {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }

        {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            let failures = Self::flush_dirty_locked(&mut state);
            if failures > 0 {
                warn!(
                    target: "bri::engine",
                    failures, "cold-tier flushes failed during disconnect"
                );
            }
            state.wal.flush()?;
        }

        self.create_snapshot()?;

        let mut state = self.state.lock();
        state.closed = true;
        info!(target: "bri::engine", data_dir = %self.config.data_dir.display(), "engine closed");
        Ok(())
    }

    /// Engine counters.
    pub fn stats(&self) -> Result<EngineStats> {
        let state = self.state.lock();
        Self::check_open(&state)?;
        Ok(EngineStats {
            hot_bytes: state.hot.bytes(),
            keys: state.key_index.len(),
            wal_segments: state.wal.segment_count()?,
            last_snapshot_at: state.last_snapshot_at,
        })
    }

    /// The configuration this engine was opened with.
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// One background maintenance pass: batched fsync, cold flush, and —
    /// when due — a periodic snapshot. Failures are logged and retried on
    /// the next tick, never propagated.
    pub(crate) fn background_tick(&self, snapshot_due: bool) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            if self.config.fsync_mode == FsyncMode::Batched {
                if let Err(e) = state.wal.flush() {
                    error!(target: "bri::engine", error = %e, "batched WAL fsync failed; will retry");
                }
            }
            let failures = Self::flush_dirty_locked(&mut state);
            if failures > 0 {
                warn!(
                    target: "bri::engine",
                    failures, "cold-tier flushes failed; will retry"
                );
            }
        }

        if snapshot_due {
            match self.create_snapshot() {
                Ok(_) => {}
                Err(e) => warn!(
                    target: "bri::snapshot",
                    error = %e,
                    "periodic snapshot failed; will retry on next interval"
                ),
            }
        }
    }

    fn check_open(state: &EngineState) -> Result<()> {
        if state.closed {
            return Err(Error::storage("database handle is disconnected"));
        }
        Ok(())
    }

    /// Mutate in-memory state for an already-logged op.
    fn apply_locked(state: &mut EngineState, op: &WalOp) -> Result<()> {
        match op {
            WalOp::Set { key, value } => {
                state.hot.insert(key, value.clone(), true);
                state.key_index.insert(key.clone());
            }
            WalOp::Rename { old_key, new_key } => {
                if let Some((value, _)) = state.hot.remove(old_key) {
                    state.hot.insert(new_key, value, true);
                    state.cold.remove(old_key)?;
                } else {
                    state.cold.rename(old_key, new_key)?;
                }
                state.key_index.remove(old_key);
                state.key_index.insert(new_key.clone());
            }
            WalOp::SAdd { set_key, member } => {
                state
                    .sets
                    .entry(set_key.clone())
                    .or_default()
                    .insert(member.clone());
                state.dirty_sets.insert(set_key.clone());
            }
            WalOp::SRem { set_key, member } => {
                if let Some(members) = state.sets.get_mut(set_key) {
                    members.remove(member);
                }
                state.dirty_sets.insert(set_key.clone());
            }
        }
        Ok(())
    }

    /// Write dirty entries and set indexes to the cold tier.
    ///
    /// Returns the number of failures; failed entries stay dirty.
    fn flush_dirty_locked(state: &mut EngineState) -> usize {
        let mut failures = 0;

        for key in state.hot.dirty_keys() {
            let Some(value) = state.hot.peek(&key).map(str::to_string) else {
                continue;
            };
            match state.cold.write(&key, &value) {
                Ok(()) => state.hot.mark_clean(&key),
                Err(e) => {
                    warn!(target: "bri::engine", key = %key, error = %e, "cold flush failed");
                    failures += 1;
                }
            }
        }

        let set_keys: Vec<String> = state.dirty_sets.iter().cloned().collect();
        for set_key in set_keys {
            let members = state.sets.get(&set_key).cloned().unwrap_or_default();
            match state.cold.write_set(&set_key, &members) {
                Ok(()) => {
                    state.dirty_sets.remove(&set_key);
                }
                Err(e) => {
                    warn!(target: "bri::engine", set_key = %set_key, error = %e, "set flush failed");
                    failures += 1;
                }
            }
        }

        failures
    }

    /// Evict LRU entries until the byte footprint settles at the target.
    ///
    /// Dirty candidates are flushed first so an evicted key always
    /// rehydrates to its current value.
    fn settle_eviction(state: &mut EngineState, config: &DbConfig) {
        if state.hot.bytes() < config.eviction_trigger_bytes() {
            return;
        }
        let target = config.memory_target_bytes();
        while state.hot.bytes() > target {
            let Some(candidate) = state.hot.lru_candidate() else {
                break;
            };
            if state.hot.is_dirty(&candidate) {
                let Some(value) = state.hot.peek(&candidate).map(str::to_string) else {
                    break;
                };
                if let Err(e) = state.cold.write(&candidate, &value) {
                    warn!(
                        target: "bri::engine",
                        key = %candidate,
                        error = %e,
                        "flush before eviction failed; deferring eviction"
                    );
                    break;
                }
                state.hot.mark_clean(&candidate);
            }
            state.hot.remove(&candidate);
        }
    }
}

impl Drop for KvEngine {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }
    }
}
