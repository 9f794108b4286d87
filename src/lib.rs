//! # BRI
//!
//! An embeddable document database with a reactive change-tracking
//! surface: a tiered key/value engine (byte-bounded hot tier, write-ahead
//! log, snapshots, crash recovery) under a typed CRUD router with
//! change-journaling documents, transactions, middleware, and pub/sub.
//!
//! # Quick Start
//!
//! ```no_run
//! use bri::{Db, DbConfig, OpOptions};
//! use serde_json::json;
//!
//! fn main() -> bri::Result<()> {
//!     let db = Db::open(DbConfig::new("./my-data", 64))?;
//!
//!     // Create
//!     let mut user = db.add("user", json!({"name": "Alice", "age": 28}), OpOptions::new())?;
//!
//!     // Mutate through the handle, flush with save
//!     user.set("name", "Alice Smith");
//!     let user = user.save(&db, OpOptions::new())?;
//!
//!     // Read back
//!     let found = db.get("user", user.id())?;
//!     assert!(found.is_some());
//!
//!     // Subscribe to the type's change channel
//!     let sub = db.subscribe("user", |event| println!("{:?}", event.action))?;
//!
//!     // Soft-delete
//!     db.del("user", user.id(), Some("SYSTEM"))?;
//!
//!     sub.unsubscribe();
//!     db.disconnect()?;
//!     Ok(())
//! }
//! ```
//!
//! # Surface
//!
//! | Verb | Method | Notes |
//! |------|--------|-------|
//! | `add` | [`Db::add`] | Generates `$ID`, stamps timestamps |
//! | `get` | [`Db::get`] | Singular; id, query, or predicate selector |
//! | `get` (group) | [`Db::get_all`] | All documents of a type, filtered |
//! | `set` | [`Db::set`] | Wholesale replace, `createdAt` preserved |
//! | `del` | [`Db::del`] | Soft-delete by tombstone rename |
//! | `sub` | [`Db::subscribe`] | Per-type change channel |
//! | txn  | [`Db::rec`]/[`Db::fin`]/[`Db::nop`]/[`Db::pop`] | Buffered atomic commit |
//!
//! Collection names are validated on every call: a lowercase alphanumeric
//! stem not ending in `s`, with an optional trailing `S` group marker
//! (`user`, `userS`). Documents are identified by `TYPE_token` ids.

pub use bri_api::{
    default_db, init_default, is_match, teardown_default, Change, Db, Document, Filter,
    Middleware, Next, OpContext, OpOptions, Operation, SaveBy, Selector, ValidatorHook,
};
pub use bri_core::{
    jss, Action, ChangeEvent, DbConfig, Error, FsyncMode, Result,
};
pub use bri_engine::{EngineStats, Subscription, TxnAction, TxnStatus, TxnStatusInfo, TxnSummary};

pub mod prelude;
