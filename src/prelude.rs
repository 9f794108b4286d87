//! Convenience re-exports for embedders.
//!
//! ```ignore
//! use bri::prelude::*;
//! ```

pub use crate::{
    Db, DbConfig, Document, Error, Filter, FsyncMode, OpOptions, Result, SaveBy, Selector,
};
