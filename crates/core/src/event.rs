//! Change events and subscription channels
//!
//! Every committed CRUD mutation is broadcast to the in-process bus on the
//! channel `db:sub:<type>`. The payload mirrors the remote channel
//! contract, so events are serde-serialisable as-is.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The mutation kind carried by a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Document created
    Add,
    /// Document wholesale replaced
    Set,
    /// Document soft-deleted
    Del,
    /// Document updated through a change journal flush
    Save,
}

/// A change notification delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened
    pub action: Action,
    /// `$ID` of the affected document
    pub target: String,
    /// `$ID` of the actor, when one was supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Free-form tag passed through from the operation's options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// The minimal change object, for `save` events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Value>,
}

impl ChangeEvent {
    /// Build an event with no actor, tag, or diff.
    pub fn new(action: Action, target: impl Into<String>) -> Self {
        ChangeEvent {
            action,
            target: target.into(),
            actor: None,
            tag: None,
            diff: None,
        }
    }
}

/// The subscription channel for a type: `db:sub:<type>`.
pub fn channel_for(type_name: &str) -> String {
    format!("db:sub:{}", type_name.to_lowercase())
}
