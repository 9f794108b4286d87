//! Selectors, group filters, and exact deep matching.

use serde_json::Value;

/// What singular `get` (and `del`) accept as a target.
///
/// Mirrors the dynamic surface: a string id, a document carrying `$ID`,
/// a query object, a predicate — or nothing at all, which is an error the
/// router reports as a missing selector.
pub enum Selector {
    /// The `undefined` case; always rejected
    Missing,
    /// A `TYPE_token` id
    Id(String),
    /// Match object without an `$ID` — scan and return the first match
    Query(Value),
    /// Arbitrary predicate over the document value
    Predicate(Box<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl Selector {
    /// Select by id.
    pub fn id(id: impl Into<String>) -> Self {
        Selector::Id(id.into())
    }

    /// Select by predicate.
    pub fn predicate(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Selector::Predicate(Box::new(f))
    }
}

impl From<&str> for Selector {
    fn from(id: &str) -> Self {
        Selector::Id(id.to_string())
    }
}

impl From<String> for Selector {
    fn from(id: String) -> Self {
        Selector::Id(id)
    }
}

impl From<Option<&str>> for Selector {
    fn from(id: Option<&str>) -> Self {
        match id {
            Some(id) => Selector::Id(id.to_string()),
            None => Selector::Missing,
        }
    }
}

impl From<Value> for Selector {
    fn from(value: Value) -> Self {
        let id = value
            .get(bri_core::document::ID_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);
        match id {
            Some(id) => Selector::Id(id),
            None => Selector::Query(value),
        }
    }
}

/// What group `get` accepts as a filter.
pub enum Filter {
    /// Every live document of the type
    All,
    /// Exact deep match against the query object
    Query(Value),
    /// Arbitrary predicate
    Predicate(Box<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl Filter {
    /// Filter by predicate.
    pub fn predicate(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Filter::Predicate(Box::new(f))
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All
    }
}

impl From<Value> for Filter {
    fn from(value: Value) -> Self {
        Filter::Query(value)
    }
}

/// Exact deep match.
///
/// Every key the query specifies must be present in the candidate and
/// strictly equal: nested objects compare exactly (their unspecified keys
/// are NOT ignored), arrays compare element-wise. Only the top level is
/// partial.
pub fn is_match(candidate: &Value, query: &Value) -> bool {
    let Some(query) = query.as_object() else {
        return false;
    };
    query
        .iter()
        .all(|(key, expected)| candidate.get(key) == Some(expected))
}
