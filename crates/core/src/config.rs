//! Database configuration
//!
//! All persistence and memory knobs live on [`DbConfig`]. Only `data_dir`
//! and `max_memory_mb` are required; everything else carries the documented
//! default and can be adjusted with the builder-style `with_*` methods.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default post-eviction hot-tier target, as a fraction of the budget
pub const DEFAULT_MEMORY_TARGET_PERCENT: f64 = 0.8;
/// Default eviction trigger, as a fraction of the budget
pub const DEFAULT_EVICTION_THRESHOLD: f64 = 0.8;
/// Default WAL segment size: 10 MiB
pub const DEFAULT_WAL_SEGMENT_SIZE: u64 = 10 * 1024 * 1024;
/// Default batched-fsync interval
pub const DEFAULT_FSYNC_INTERVAL_MS: u64 = 100;
/// Default snapshot interval: 30 minutes
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 30 * 60 * 1000;
/// Default snapshot retention count
pub const DEFAULT_KEEP_SNAPSHOTS: usize = 3;

/// When WAL appends are forced to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsyncMode {
    /// Flush on a timer (`fsync_interval_ms`); durability is bounded by
    /// the interval
    Batched,
    /// fsync after every record
    Immediate,
}

/// Configuration for a database handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Directory for all persistent files
    pub data_dir: PathBuf,
    /// Hot-tier byte budget, in MiB
    pub max_memory_mb: u64,
    /// Post-eviction target fraction of the budget
    pub memory_target_percent: f64,
    /// Eviction trigger fraction of the budget
    pub eviction_threshold: f64,
    /// Bytes per WAL segment before rotation
    pub wal_segment_size: u64,
    /// Fsync policy
    pub fsync_mode: FsyncMode,
    /// Batched fsync interval in milliseconds
    pub fsync_interval_ms: u64,
    /// Periodic snapshot interval in milliseconds
    pub snapshot_interval_ms: u64,
    /// How many snapshots to retain
    pub keep_snapshots: usize,
}

impl DbConfig {
    /// Create a configuration with the documented defaults.
    pub fn new(data_dir: impl Into<PathBuf>, max_memory_mb: u64) -> Self {
        DbConfig {
            data_dir: data_dir.into(),
            max_memory_mb,
            memory_target_percent: DEFAULT_MEMORY_TARGET_PERCENT,
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
            wal_segment_size: DEFAULT_WAL_SEGMENT_SIZE,
            fsync_mode: FsyncMode::Batched,
            fsync_interval_ms: DEFAULT_FSYNC_INTERVAL_MS,
            snapshot_interval_ms: DEFAULT_SNAPSHOT_INTERVAL_MS,
            keep_snapshots: DEFAULT_KEEP_SNAPSHOTS,
        }
    }

    /// Set the post-eviction target fraction.
    pub fn with_memory_target_percent(mut self, fraction: f64) -> Self {
        self.memory_target_percent = fraction;
        self
    }

    /// Set the eviction trigger fraction.
    pub fn with_eviction_threshold(mut self, fraction: f64) -> Self {
        self.eviction_threshold = fraction;
        self
    }

    /// Set the WAL segment rotation size in bytes.
    pub fn with_wal_segment_size(mut self, bytes: u64) -> Self {
        self.wal_segment_size = bytes;
        self
    }

    /// Set the fsync policy.
    pub fn with_fsync_mode(mut self, mode: FsyncMode) -> Self {
        self.fsync_mode = mode;
        self
    }

    /// Set the batched fsync interval.
    pub fn with_fsync_interval_ms(mut self, ms: u64) -> Self {
        self.fsync_interval_ms = ms;
        self
    }

    /// Set the periodic snapshot interval.
    pub fn with_snapshot_interval_ms(mut self, ms: u64) -> Self {
        self.snapshot_interval_ms = ms;
        self
    }

    /// Set the snapshot retention count.
    pub fn with_keep_snapshots(mut self, keep: usize) -> Self {
        self.keep_snapshots = keep;
        self
    }

    /// Hot-tier byte budget.
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb * 1024 * 1024
    }

    /// Byte level at which eviction starts.
    pub fn eviction_trigger_bytes(&self) -> u64 {
        (self.max_memory_bytes() as f64 * self.eviction_threshold) as u64
    }

    /// Byte level eviction settles to.
    pub fn memory_target_bytes(&self) -> u64 {
        (self.max_memory_bytes() as f64 * self.memory_target_percent) as u64
    }

    /// `<data_dir>/docs` — one file per live (and tombstoned) key.
    pub fn docs_dir(&self) -> PathBuf {
        self.data_dir.join("docs")
    }

    /// `<data_dir>/sets` — one file per collection set.
    pub fn sets_dir(&self) -> PathBuf {
        self.data_dir.join("sets")
    }

    /// `<data_dir>/wal` — WAL segment files.
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    /// `<data_dir>/snapshots` — snapshot files.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Base data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DbConfig::new("/tmp/bri", 64);
        assert_eq!(config.max_memory_bytes(), 64 * 1024 * 1024);
        assert_eq!(config.wal_segment_size, 10 * 1024 * 1024);
        assert_eq!(config.fsync_mode, FsyncMode::Batched);
        assert_eq!(config.fsync_interval_ms, 100);
        assert_eq!(config.keep_snapshots, 3);
    }

    #[test]
    fn test_thresholds() {
        let config = DbConfig::new("/tmp/bri", 10)
            .with_eviction_threshold(0.5)
            .with_memory_target_percent(0.25);
        assert_eq!(config.eviction_trigger_bytes(), 5 * 1024 * 1024);
        assert_eq!(config.memory_target_bytes(), 10 * 1024 * 1024 / 4);
    }

    #[test]
    fn test_directory_layout() {
        let config = DbConfig::new("/data/bri", 64);
        assert_eq!(config.docs_dir(), PathBuf::from("/data/bri/docs"));
        assert_eq!(config.sets_dir(), PathBuf::from("/data/bri/sets"));
        assert_eq!(config.wal_dir(), PathBuf::from("/data/bri/wal"));
        assert_eq!(
            config.snapshots_dir(),
            PathBuf::from("/data/bri/snapshots")
        );
    }

    #[test]
    fn test_fsync_mode_wire_names() {
        assert_eq!(
            serde_json::to_string(&FsyncMode::Batched).unwrap(),
            "\"batched\""
        );
        assert_eq!(
            serde_json::to_string(&FsyncMode::Immediate).unwrap(),
            "\"immediate\""
        );
    }
}
