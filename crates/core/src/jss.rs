//! JSS serialisation
//!
//! JSS is the canonical text form used for snapshots and `to_jss()`. It is
//! a JSON superset carrying three extensions in-band:
//!
//! - instants as `{"$date": "<rfc3339>"}` wrappers ([`date`]/[`as_date`])
//! - regular expressions as `{"$regex": {"source", "flags"}}` wrappers
//!   ([`regex`]/[`as_regex`])
//! - shared-structure pointers as strings of the form `$ref:<dotted.path>`,
//!   resolved on parse
//!
//! The value model is a tree, so [`stringify`] never emits `$ref` pointers
//! itself; it reserves the namespace by rejecting user strings that start
//! with `$ref:` and user object keys named `$ref`. [`parse`] resolves
//! pointers found in foreign JSS text (shared structure materialises as
//! equal subtrees) and refuses documents with a `$ref` key.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Reserved pointer prefix inside string values
const REF_PREFIX: &str = "$ref:";
/// Reserved object keys
const DATE_KEY: &str = "$date";
const REGEX_KEY: &str = "$regex";
const REF_KEY: &str = "$ref";

/// Upper bound on pointer-resolution passes; a chain deeper than this is
/// treated as unresolvable.
const MAX_REF_PASSES: usize = 32;

/// Serialise a value to JSS text.
///
/// Fails if the value uses the reserved `$ref` key or a string value in
/// the reserved `$ref:` namespace.
pub fn stringify(value: &Value) -> Result<String> {
    check_reserved(value)?;
    serde_json::to_string(value).map_err(Into::into)
}

/// Serialise a value to pretty-printed JSS text.
pub fn stringify_pretty(value: &Value) -> Result<String> {
    check_reserved(value)?;
    serde_json::to_string_pretty(value).map_err(Into::into)
}

/// Check that a value stays clear of JSS's reserved forms without
/// serialising it.
///
/// The CRUD layer runs this on every incoming document so that stored
/// state is always snapshot-encodable.
pub fn ensure_encodable(value: &Value) -> Result<()> {
    check_reserved(value)
}

/// Parse JSS text back into a value, resolving `$ref:<path>` pointers.
pub fn parse(text: &str) -> Result<Value> {
    let mut root: Value = serde_json::from_str(text)?;
    reject_ref_keys(&root)?;

    for _ in 0..MAX_REF_PASSES {
        let pending = collect_refs(&root);
        if pending.is_empty() {
            return Ok(root);
        }

        let mut progressed = false;
        for (location, target) in pending {
            let resolved = match lookup(&root, &target) {
                Some(value) => value,
                None => {
                    return Err(Error::corruption(format!(
                        "$ref target not found: {target:?}"
                    )))
                }
            };
            // Only ground pointers whose target is itself fully resolved;
            // chains settle over subsequent passes.
            if collect_refs(resolved).is_empty() {
                let replacement = resolved.clone();
                set_at(&mut root, &location, replacement);
                progressed = true;
            }
        }

        if !progressed {
            break;
        }
    }

    Err(Error::corruption("unresolvable $ref chain"))
}

/// Wrap an instant as a JSS date value.
pub fn date(instant: DateTime<Utc>) -> Value {
    let mut map = Map::new();
    map.insert(DATE_KEY.to_string(), Value::String(instant.to_rfc3339()));
    Value::Object(map)
}

/// Read a JSS date wrapper back as an instant.
pub fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let raw = map.get(DATE_KEY)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Wrap a regular expression as a JSS regex value.
pub fn regex(source: &str, flags: &str) -> Value {
    let mut inner = Map::new();
    inner.insert("source".to_string(), Value::String(source.to_string()));
    inner.insert("flags".to_string(), Value::String(flags.to_string()));
    let mut map = Map::new();
    map.insert(REGEX_KEY.to_string(), Value::Object(inner));
    Value::Object(map)
}

/// Read a JSS regex wrapper back as `(source, flags)`.
pub fn as_regex(value: &Value) -> Option<(&str, &str)> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let inner = map.get(REGEX_KEY)?.as_object()?;
    Some((inner.get("source")?.as_str()?, inner.get("flags")?.as_str()?))
}

/// Reject reserved forms a caller-supplied value may not use.
fn check_reserved(value: &Value) -> Result<()> {
    match value {
        Value::String(s) if s.starts_with(REF_PREFIX) => Err(Error::serialization(format!(
            "string value in reserved namespace: {s:?}"
        ))),
        Value::Object(map) => {
            if map.contains_key(REF_KEY) {
                return Err(Error::serialization("reserved key $ref"));
            }
            map.values().try_for_each(check_reserved)
        }
        Value::Array(items) => items.iter().try_for_each(check_reserved),
        _ => Ok(()),
    }
}

/// Refuse user fields named `$ref` in parsed input.
fn reject_ref_keys(value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            if map.contains_key(REF_KEY) {
                return Err(Error::corruption("refusing field named $ref"));
            }
            map.values().try_for_each(reject_ref_keys)
        }
        Value::Array(items) => items.iter().try_for_each(reject_ref_keys),
        _ => Ok(()),
    }
}

/// Collect `(location, target)` pairs for every pointer string in the tree.
fn collect_refs(value: &Value) -> Vec<(Vec<String>, String)> {
    let mut found = Vec::new();
    walk_refs(value, &mut Vec::new(), &mut found);
    found
}

fn walk_refs(value: &Value, path: &mut Vec<String>, found: &mut Vec<(Vec<String>, String)>) {
    match value {
        Value::String(s) => {
            if let Some(target) = s.strip_prefix(REF_PREFIX) {
                found.push((path.clone(), target.to_string()));
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                walk_refs(child, path, found);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                walk_refs(child, path, found);
                path.pop();
            }
        }
        _ => {}
    }
}

/// Look a dotted path up from the root. The empty path is the root itself.
fn lookup<'a>(root: &'a Value, target: &str) -> Option<&'a Value> {
    if target.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for segment in target.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Replace the value at a collected location.
fn set_at(root: &mut Value, location: &[String], replacement: Value) {
    let Some((last, parents)) = location.split_last() else {
        *root = replacement;
        return;
    };
    let mut current = root;
    for segment in parents {
        current = match current {
            Value::Object(map) => match map.get_mut(segment) {
                Some(child) => child,
                None => return,
            },
            Value::Array(items) => {
                let Ok(index) = segment.parse::<usize>() else {
                    return;
                };
                match items.get_mut(index) {
                    Some(child) => child,
                    None => return,
                }
            }
            _ => return,
        };
    }
    match current {
        Value::Object(map) => {
            map.insert(last.clone(), replacement);
        }
        Value::Array(items) => {
            if let Ok(index) = last.parse::<usize>() {
                if index < items.len() {
                    items[index] = replacement;
                }
            }
        }
        _ => {}
    }
}
