//! Durability layer for the BRI engine
//!
//! Three concerns, one module each:
//!
//! - [`wal`] — append-only, length-prefixed, checksummed log segments with
//!   rotation and fsync policy
//! - [`snapshot`] — atomic point-in-time dumps of the materialised state
//!   with retention
//! - [`recovery`] — startup replay: newest valid snapshot + the WAL tail
//!   past its LSN

#![warn(missing_docs)]

pub mod recovery;
pub mod snapshot;
pub mod wal;

pub use recovery::{recover, RecoveredState};
pub use snapshot::{SnapshotInfo, SnapshotState, SNAPSHOT_VERSION};
pub use wal::{WalOp, WalRecord, WalWriter};
