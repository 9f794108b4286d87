//! Id and type registry
//!
//! Every document is identified by a string id of the form `TYPE_token`:
//! an uppercase type prefix, an underscore, and a collision-resistant
//! random token (96 bits, URL-safe base64, no padding).
//!
//! The lowercase form of the type is the collection name (`user`); the
//! group form appends a single `S` (`userS`). Collection membership is
//! tracked in a set keyed by `TYPE?`; soft-deleted documents live at the
//! tombstone key `X:TYPE_token:X`, outside the set.
//!
//! The collection-name grammar is `^[a-z0-9]+(?<![sS])S?$`: a lowercase
//! alphanumeric stem that must not itself end in `s`, optionally followed
//! by the `S` group marker. The grammar is enforced by hand because the
//! lookbehind is the contract, not the regex engine.

use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

/// Number of random bytes in an id token (96 bits)
const TOKEN_BYTES: usize = 12;

/// A validated collection name: the lowercase type stem plus whether the
/// `S` group marker was present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionName {
    /// Lowercase type stem, e.g. `user`
    pub type_name: String,
    /// True when the name carried the trailing `S` group marker
    pub group: bool,
}

impl CollectionName {
    /// Uppercase type prefix, e.g. `USER`
    pub fn type_prefix(&self) -> String {
        self.type_name.to_uppercase()
    }

    /// The membership set key for this type, e.g. `USER?`
    pub fn set_key(&self) -> String {
        collection_key(&self.type_name)
    }
}

/// Validate a collection name against the naming grammar.
///
/// Accepts `user`, `x1`, `userS`; rejects `users`, `User`, `user-name`
/// and the empty string.
pub fn validate_collection_name(name: &str) -> Result<CollectionName> {
    if name.is_empty() {
        return Err(Error::bad_collection_name(name));
    }

    let (stem, group) = match name.strip_suffix('S') {
        Some(stem) => (stem, true),
        None => (name, false),
    };

    if stem.is_empty()
        || !stem.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        || stem.ends_with('s')
    {
        return Err(Error::bad_collection_name(name));
    }

    Ok(CollectionName {
        type_name: stem.to_string(),
        group,
    })
}

/// Generate a fresh id for a type: `TYPE_token`.
///
/// Tokens are unique within a process with overwhelming probability; no
/// coordination beyond the process-local RNG is needed.
pub fn new_id(type_name: &str) -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "{}_{}",
        type_name.to_uppercase(),
        URL_SAFE_NO_PAD.encode(bytes)
    )
}

/// Extract the type prefix of an id.
///
/// Fails with [`Error::BadId`] unless the id matches `^[A-Z0-9]+_.+$`.
pub fn type_of(id: &str) -> Result<&str> {
    let (prefix, token) = id.split_once('_').ok_or_else(|| Error::bad_id(id))?;
    if prefix.is_empty()
        || token.is_empty()
        || !prefix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(Error::bad_id(id));
    }
    Ok(prefix)
}

/// The membership set key for a type: `TYPE?`.
pub fn collection_key(type_name: &str) -> String {
    format!("{}?", type_name.to_uppercase())
}

/// The tombstone key a soft-deleted document is renamed to: `X:$ID:X`.
pub fn tombstone_key(id: &str) -> String {
    format!("X:{}:X", id)
}

/// Check whether a key is a tombstone key.
pub fn is_tombstone_key(key: &str) -> bool {
    key.starts_with("X:") && key.ends_with(":X")
}

/// Check that an id belongs to the given (lowercase) type.
///
/// Comparison is case-insensitive on the type side: `get.user("USER_x")`
/// and `get.user("user_x")` agree, but the stored prefix is uppercase.
pub fn check_type(id: &str, type_name: &str) -> Result<()> {
    let actual = type_of(id)?;
    if actual != type_name.to_uppercase() {
        return Err(Error::type_mismatch(type_name.to_uppercase(), actual));
    }
    Ok(())
}
