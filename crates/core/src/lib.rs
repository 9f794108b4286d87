//! Core vocabulary for the BRI document database
//!
//! This crate holds the pieces every other workspace member depends on:
//! the unified [`Error`] type, the id/type registry, document field
//! conventions, change events, configuration, and the JSS serialisation
//! used by snapshots and `to_jss()`.

#![warn(missing_docs)]

pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod id;
pub mod jss;

pub use config::{DbConfig, FsyncMode};
pub use error::{Error, Result};
pub use event::{Action, ChangeEvent};
