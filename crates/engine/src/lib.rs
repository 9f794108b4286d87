//! The BRI storage engine
//!
//! [`KvEngine`] is the tiered key/value store: byte-bounded hot tier,
//! cold key files, write-ahead log, snapshots with retention, and crash
//! recovery on open. Around it live the in-process pub/sub [`bus`] and
//! the [`txn`] recorder that buffers CRUD actions for atomic commit.

#![warn(missing_docs)]

mod background;
pub mod bus;
pub mod kv;
pub mod txn;

pub use bus::{EventBus, Subscription};
pub use kv::{EngineStats, KvEngine};
pub use txn::{TxnAction, TxnRecorder, TxnStatus, TxnStatusInfo, TxnSummary};
