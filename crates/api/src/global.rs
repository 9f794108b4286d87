//! Process-wide default database
//!
//! A convenience mirroring the dynamic surface's `getDB` singleton. The
//! explicit [`Db`](crate::Db) handle is the primary API; the singleton
//! exists for embedders that want one shared handle with explicit
//! `init`/`teardown`.

use crate::database::Db;
use bri_core::{DbConfig, Error, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

static DEFAULT: Lazy<Mutex<Option<Db>>> = Lazy::new(|| Mutex::new(None));

/// Initialise the process-wide default database.
///
/// Fails if one is already initialised.
pub fn init_default(config: DbConfig) -> Result<Db> {
    let mut slot = DEFAULT.lock();
    if slot.is_some() {
        return Err(Error::storage("default database already initialised"));
    }
    let db = Db::open(config)?;
    *slot = Some(db.clone());
    Ok(db)
}

/// The default database, if initialised.
pub fn default_db() -> Option<Db> {
    DEFAULT.lock().clone()
}

/// Disconnect and clear the default database. A no-op when none is set.
pub fn teardown_default() -> Result<()> {
    let db = DEFAULT.lock().take();
    match db {
        Some(db) => db.disconnect(),
        None => Ok(()),
    }
}
