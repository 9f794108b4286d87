//! Document vocabulary
//!
//! Documents are JSON objects (`serde_json::Value::Object`). The engine
//! maintains a small set of reserved fields on every document:
//!
//! - `$ID` — immutable string identifier, set once by `add`
//! - `createdAt` — RFC 3339 instant, set once by `add`
//! - `updatedAt` — RFC 3339 instant, refreshed on every mutation
//! - `deletedAt` / `deletedBy` — stamped onto the tombstoned copy on
//!   soft-delete
//!
//! All other fields are user-defined and arbitrarily nested.

use chrono::Utc;
use serde_json::Value;

/// The immutable identifier field
pub const ID_FIELD: &str = "$ID";
/// Creation instant, immutable after `add`
pub const CREATED_AT: &str = "createdAt";
/// Last-mutation instant
pub const UPDATED_AT: &str = "updatedAt";
/// Soft-delete instant (tombstoned copies only)
pub const DELETED_AT: &str = "deletedAt";
/// Soft-delete actor (tombstoned copies only)
pub const DELETED_BY: &str = "deletedBy";

/// Current instant in the document timestamp format (RFC 3339, UTC).
pub fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Whether a top-level field may never be written after creation.
pub fn is_immutable_field(name: &str) -> bool {
    name == ID_FIELD || name == CREATED_AT
}

/// Read the `$ID` of a document value, if present and a string.
pub fn doc_id(value: &Value) -> Option<&str> {
    value.get(ID_FIELD).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_immutable_fields() {
        assert!(is_immutable_field(ID_FIELD));
        assert!(is_immutable_field(CREATED_AT));
        assert!(!is_immutable_field(UPDATED_AT));
        assert!(!is_immutable_field("name"));
    }

    #[test]
    fn test_doc_id() {
        let doc = json!({"$ID": "USER_abc", "name": "Alice"});
        assert_eq!(doc_id(&doc), Some("USER_abc"));
        assert_eq!(doc_id(&json!({"name": "Alice"})), None);
        assert_eq!(doc_id(&json!({"$ID": 42})), None);
    }

    #[test]
    fn test_now_is_rfc3339() {
        let ts = now();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
