//! The reactive document handle
//!
//! [`Document`] wraps a JSON object and journals every mutation made
//! through it. Mutations go through explicit path-based calls — `set`,
//! `remove`, and the array mutators — which apply the change to the
//! underlying value and record it. `save` then flushes a minimal change
//! set at **top-level-field granularity**: a change recorded at a nested
//! path persists the whole current top-level subtree it lives under.
//!
//! Writes to the immutable fields (`$ID`, `createdAt`) and writes of an
//! identical value are silent no-ops. Paths are dotted strings; numeric
//! segments index arrays (`"mentions.0"`).

use crate::database::Db;
use crate::options::OpOptions;
use bri_core::document::{is_immutable_field, ID_FIELD};
use bri_core::{jss, Error, Result};
use serde_json::Value;
use std::fmt;

/// One journaled mutation: the path it hit and the value written there
/// (`None` for a removal).
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Path segments from the document root
    pub path: Vec<String>,
    /// New value, or `None` when the property was removed
    pub value: Option<Value>,
}

/// A document plus its mutation journal.
#[derive(Debug, Clone)]
pub struct Document {
    id: String,
    data: Value,
    journal: Vec<Change>,
}

impl Document {
    /// Wrap a stored document value.
    ///
    /// The value must be a JSON object carrying a string `$ID`.
    pub fn from_value(data: Value) -> Result<Self> {
        let id = data
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::bad_id("<document without $ID>"))?
            .to_string();
        if !data.is_object() {
            return Err(Error::serialization("document must be a JSON object"));
        }
        Ok(Document {
            id,
            data,
            journal: Vec::new(),
        })
    }

    /// The document's `$ID`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read a value at a dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.data, &parse_path(path))
    }

    /// Write a value at a dotted path.
    ///
    /// Silent no-op when the root field is immutable, when the value is
    /// identical to the current one, or when the parent path does not
    /// resolve to a container.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let segs = parse_path(path);
        if segs.is_empty() || (segs.len() == 1 && is_immutable_field(&segs[0])) {
            return;
        }
        let new_value = value.into();
        if lookup(&self.data, &segs) == Some(&new_value) {
            return;
        }
        if !apply_set(&mut self.data, &segs, new_value.clone()) {
            return;
        }
        self.journal.push(Change {
            path: segs,
            value: Some(new_value),
        });
    }

    /// Remove a property at a dotted path. No-op when absent or immutable.
    pub fn remove(&mut self, path: &str) {
        let segs = parse_path(path);
        if segs.is_empty() || (segs.len() == 1 && is_immutable_field(&segs[0])) {
            return;
        }
        if lookup(&self.data, &segs).is_none() {
            return;
        }
        apply_remove(&mut self.data, &segs);
        self.journal.push(Change {
            path: segs,
            value: None,
        });
    }

    /// Append to the array at `path`.
    pub fn push(&mut self, path: &str, value: impl Into<Value>) {
        let segs = parse_path(path);
        let Some(Value::Array(items)) = lookup_mut(&mut self.data, &segs) else {
            return;
        };
        items.push(value.into());
        self.record_array(segs);
    }

    /// Remove and return the last element of the array at `path`.
    pub fn pop(&mut self, path: &str) -> Option<Value> {
        let segs = parse_path(path);
        let Some(Value::Array(items)) = lookup_mut(&mut self.data, &segs) else {
            return None;
        };
        let popped = items.pop();
        if popped.is_some() {
            self.record_array(segs);
        }
        popped
    }

    /// Remove and return the first element of the array at `path`.
    pub fn shift(&mut self, path: &str) -> Option<Value> {
        let segs = parse_path(path);
        let Some(Value::Array(items)) = lookup_mut(&mut self.data, &segs) else {
            return None;
        };
        if items.is_empty() {
            return None;
        }
        let shifted = items.remove(0);
        self.record_array(segs);
        Some(shifted)
    }

    /// Prepend to the array at `path`.
    pub fn unshift(&mut self, path: &str, value: impl Into<Value>) {
        let segs = parse_path(path);
        let Some(Value::Array(items)) = lookup_mut(&mut self.data, &segs) else {
            return;
        };
        items.insert(0, value.into());
        self.record_array(segs);
    }

    /// Remove `delete_count` elements at `start` and insert `items` there,
    /// returning the removed elements.
    pub fn splice(
        &mut self,
        path: &str,
        start: usize,
        delete_count: usize,
        new_items: Vec<Value>,
    ) -> Vec<Value> {
        let segs = parse_path(path);
        let Some(Value::Array(items)) = lookup_mut(&mut self.data, &segs) else {
            return Vec::new();
        };
        let start = start.min(items.len());
        let end = (start + delete_count).min(items.len());
        let removed: Vec<Value> = items.drain(start..end).collect();
        for (offset, item) in new_items.into_iter().enumerate() {
            items.insert(start + offset, item);
        }
        self.record_array(segs);
        removed
    }

    /// Whether any change has been journaled since the last `save`.
    pub fn has_changes(&self) -> bool {
        !self.journal.is_empty()
    }

    /// The journaled changes, in order.
    pub fn changes(&self) -> &[Change] {
        &self.journal
    }

    /// Flush journaled changes through the database's update path.
    ///
    /// With an empty journal this is a no-op returning an equal handle.
    /// Otherwise the minimal change set is persisted, the journal clears,
    /// and the freshly reconciled document is returned.
    pub fn save(&mut self, db: &Db, opts: OpOptions) -> Result<Document> {
        if self.journal.is_empty() {
            return Ok(self.clone());
        }
        let changes = self.take_change_set();
        let saved = db.update(&self.id, changes, opts)?;
        self.data = saved.data.clone();
        Ok(saved)
    }

    /// Resolve a field holding a foreign `$ID` (or an array of them) into
    /// the referenced document value(s), returning a new handle.
    ///
    /// Array references resolve sequentially, preserving order. A field
    /// that already holds a resolved document is left as-is.
    pub fn populate(&self, db: &Db, field: &str) -> Result<Document> {
        let mut data = self.data.clone();
        let object = data
            .as_object_mut()
            .expect("document data is always an object");
        let current = object
            .get(field)
            .ok_or_else(|| Error::not_found(format!("{}.{}", self.id, field)))?;

        let resolved = match current {
            Value::String(reference) => {
                let doc = db
                    .get_by_id(reference)?
                    .ok_or_else(|| Error::not_found(reference.clone()))?;
                doc.to_object()
            }
            Value::Array(references) => {
                let mut docs = Vec::with_capacity(references.len());
                for reference in references {
                    let reference = reference
                        .as_str()
                        .ok_or_else(|| Error::bad_id(reference.to_string()))?;
                    let doc = db
                        .get_by_id(reference)?
                        .ok_or_else(|| Error::not_found(reference))?;
                    docs.push(doc.to_object());
                }
                Value::Array(docs)
            }
            Value::Object(_) => current.clone(),
            other => return Err(Error::bad_id(other.to_string())),
        };

        object.insert(field.to_string(), resolved);
        Document::from_value(data)
    }

    /// Resolve several reference fields, sequentially.
    pub fn populate_many(&self, db: &Db, fields: &[&str]) -> Result<Document> {
        let mut doc = self.clone();
        for field in fields {
            doc = doc.populate(db, field)?;
        }
        Ok(doc)
    }

    /// Deep clone of the underlying value.
    pub fn to_object(&self) -> Value {
        self.data.clone()
    }

    /// The underlying value, borrowed.
    pub fn to_json(&self) -> &Value {
        &self.data
    }

    /// Canonical JSS serialisation of the document.
    pub fn to_jss(&self) -> Result<String> {
        jss::stringify(&self.data)
    }

    /// Drain the journal into the minimal change set, keyed by top-level
    /// field: a root-level change carries its recorded value (or removal),
    /// a nested change carries the whole current top-level subtree.
    /// Duplicates collapse, last write wins.
    pub(crate) fn take_change_set(&mut self) -> Vec<(String, Option<Value>)> {
        let mut out: Vec<(String, Option<Value>)> = Vec::new();
        let changes: Vec<Change> = self.journal.drain(..).collect();
        for change in changes {
            let head = change.path[0].clone();
            let entry = if change.path.len() == 1 {
                change.value
            } else {
                // Nested mutation: flush the whole current top-level field
                self.data.get(&head).cloned()
            };
            match out.iter_mut().find(|(key, _)| *key == head) {
                Some(slot) => slot.1 = entry,
                None => out.push((head, entry)),
            }
        }
        out
    }

    fn record_array(&mut self, segs: Vec<String>) {
        let snapshot = lookup(&self.data, &segs).cloned();
        self.journal.push(Change {
            path: segs,
            value: snapshot,
        });
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

fn parse_path(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split('.').map(str::to_string).collect()
}

fn lookup<'a>(value: &'a Value, segs: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for seg in segs {
        current = match current {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn lookup_mut<'a>(value: &'a mut Value, segs: &[String]) -> Option<&'a mut Value> {
    let mut current = value;
    for seg in segs {
        current = match current {
            Value::Object(map) => map.get_mut(seg)?,
            Value::Array(items) => items.get_mut(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `new_value` at `segs`, creating the final key when its parent is
/// an object (or extending an array by one slot). Returns false when the
/// parent does not resolve to a container.
fn apply_set(root: &mut Value, segs: &[String], new_value: Value) -> bool {
    let (last, parents) = segs.split_last().expect("path is non-empty");
    let Some(parent) = lookup_mut(root, parents) else {
        return false;
    };
    match parent {
        Value::Object(map) => {
            map.insert(last.clone(), new_value);
            true
        }
        Value::Array(items) => match last.parse::<usize>() {
            Ok(index) if index < items.len() => {
                items[index] = new_value;
                true
            }
            Ok(index) if index == items.len() => {
                items.push(new_value);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

fn apply_remove(root: &mut Value, segs: &[String]) {
    let (last, parents) = segs.split_last().expect("path is non-empty");
    let Some(parent) = lookup_mut(root, parents) else {
        return;
    };
    match parent {
        Value::Object(map) => {
            map.remove(last);
        }
        Value::Array(items) => {
            if let Ok(index) = last.parse::<usize>() {
                if index < items.len() {
                    items.remove(index);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        Document::from_value(json!({
            "$ID": "USER_abc",
            "createdAt": "2026-01-01T00:00:00+00:00",
            "updatedAt": "2026-01-01T00:00:00+00:00",
            "name": "Alice",
            "age": 28,
            "profile": {"city": "Berlin", "zip": "10115"},
            "tags": ["a", "b"]
        }))
        .unwrap()
    }

    #[test]
    fn test_from_value_requires_id() {
        assert!(Document::from_value(json!({"name": "x"})).is_err());
        assert_eq!(doc().id(), "USER_abc");
    }

    #[test]
    fn test_set_records_change() {
        let mut d = doc();
        d.set("name", "Alice Smith");
        assert_eq!(d.get("name"), Some(&json!("Alice Smith")));
        assert_eq!(d.changes().len(), 1);
        assert_eq!(d.changes()[0].path, vec!["name"]);
    }

    #[test]
    fn test_immutable_fields_are_silent_noops() {
        let mut d = doc();
        d.set("$ID", "USER_other");
        d.set("createdAt", "1999-01-01T00:00:00+00:00");
        d.remove("$ID");
        assert_eq!(d.id(), "USER_abc");
        assert_eq!(d.get("$ID"), Some(&json!("USER_abc")));
        assert!(!d.has_changes());
    }

    #[test]
    fn test_identical_value_is_noop() {
        let mut d = doc();
        d.set("name", "Alice");
        d.set("age", 28);
        assert!(!d.has_changes());
    }

    #[test]
    fn test_nested_set_and_lookup() {
        let mut d = doc();
        d.set("profile.city", "Hamburg");
        assert_eq!(d.get("profile.city"), Some(&json!("Hamburg")));
        assert_eq!(d.changes()[0].path, vec!["profile", "city"]);

        // Parent that doesn't resolve: silent no-op
        d.set("missing.deep.field", 1);
        assert_eq!(d.changes().len(), 1);
    }

    #[test]
    fn test_remove_records_absence() {
        let mut d = doc();
        d.remove("age");
        assert_eq!(d.get("age"), None);
        assert_eq!(d.changes()[0].value, None);

        // Removing a missing key records nothing
        d.remove("age");
        assert_eq!(d.changes().len(), 1);
    }

    #[test]
    fn test_array_mutators_record_full_array() {
        let mut d = doc();
        d.push("tags", "c");
        assert_eq!(d.get("tags"), Some(&json!(["a", "b", "c"])));
        assert_eq!(d.changes()[0].value, Some(json!(["a", "b", "c"])));

        assert_eq!(d.pop("tags"), Some(json!("c")));
        assert_eq!(d.shift("tags"), Some(json!("a")));
        d.unshift("tags", "z");
        assert_eq!(d.get("tags"), Some(&json!(["z", "b"])));

        let removed = d.splice("tags", 1, 1, vec![json!("m"), json!("n")]);
        assert_eq!(removed, vec![json!("b")]);
        assert_eq!(d.get("tags"), Some(&json!(["z", "m", "n"])));
    }

    #[test]
    fn test_array_mutators_ignore_non_arrays() {
        let mut d = doc();
        d.push("name", "x");
        assert_eq!(d.pop("name"), None);
        assert_eq!(d.get("name"), Some(&json!("Alice")));
        assert!(!d.has_changes());
    }

    #[test]
    fn test_change_set_top_level_granularity() {
        let mut d = doc();
        d.set("name", "Alice Smith");
        d.set("profile.city", "Hamburg");

        let changes = d.take_change_set();
        assert!(!d.has_changes());
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0], ("name".into(), Some(json!("Alice Smith"))));
        // Nested change flushes the whole current top-level subtree
        assert_eq!(
            changes[1],
            (
                "profile".into(),
                Some(json!({"city": "Hamburg", "zip": "10115"}))
            )
        );
    }

    #[test]
    fn test_change_set_collapses_duplicates() {
        let mut d = doc();
        d.set("name", "One");
        d.set("name", "Two");
        d.set("name", "Three");

        let changes = d.take_change_set();
        assert_eq!(changes, vec![("name".into(), Some(json!("Three")))]);
    }

    #[test]
    fn test_change_set_carries_removal() {
        let mut d = doc();
        d.remove("age");
        let changes = d.take_change_set();
        assert_eq!(changes, vec![("age".into(), None)]);
    }

    #[test]
    fn test_display_is_id() {
        assert_eq!(doc().to_string(), "USER_abc");
    }

    #[test]
    fn test_to_jss_roundtrip() {
        let d = doc();
        let text = d.to_jss().unwrap();
        let parsed = bri_core::jss::parse(&text).unwrap();
        assert_eq!(parsed, d.to_object());
    }
}
