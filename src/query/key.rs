use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::QueryError;

/// Structured identifier of one cacheable query.
///
/// A key is a name plus a parameter record, e.g. `book {bookId: "1"}`. Two keys
/// are equal when their names match and their parameters are deep-equal,
/// regardless of the order in which parameters were inserted. Equality and
/// hashing go through a canonical encoding computed once at construction.
#[derive(Clone)]
pub struct QueryKey {
    name: String,
    params: Value,
    canonical: String,
}

impl QueryKey {
    /// Creates a key with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_value(name, Value::Object(Map::new()))
    }

    /// Creates a key from any serializable parameter record.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Decode`] if `params` cannot be represented as JSON.
    pub fn with_params(name: impl Into<String>, params: &impl Serialize) -> Result<Self, QueryError> {
        Ok(Self::from_value(name, serde_json::to_value(params)?))
    }

    /// Creates a key from an already-built JSON parameter value.
    #[must_use]
    pub fn from_value(name: impl Into<String>, params: Value) -> Self {
        let name = name.into();
        let mut canonical = String::with_capacity(name.len() + 16);
        canonical.push_str(&name);
        canonical.push(':');
        encode(&params, &mut canonical);
        Self {
            name,
            params,
            canonical,
        }
    }

    /// Adds (or replaces) one parameter.
    #[must_use]
    pub fn param(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut params = match self.params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert(String::new(), other);
                map
            }
        };
        params.insert(key.into(), value.into());
        Self::from_value(self.name, Value::Object(params))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }

    /// The canonical encoding used for equality and as the cache map key.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

/// Writes `value` with object keys sorted at every depth.
fn encode(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                encode(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                encode(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl From<&str> for QueryKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_param_order_does_not_matter() {
        let a = QueryKey::new("bookSearch").param("query", "dune").param("page", 2);
        let b = QueryKey::new("bookSearch").param("page", 2).param("query", "dune");
        assert_eq!(a, b);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_nested_objects_are_sorted() {
        let a = QueryKey::from_value("q", json!({ "outer": { "b": 1, "a": [ { "y": 1, "x": 2 } ] } }));
        let b = QueryKey::from_value("q", json!({ "outer": { "a": [ { "x": 2, "y": 1 } ], "b": 1 } }));
        assert_eq!(a, b);
    }

    #[rstest]
    #[case(QueryKey::new("book").param("bookId", "1"), QueryKey::new("book").param("bookId", "2"))]
    #[case(QueryKey::new("book").param("bookId", "1"), QueryKey::new("books").param("bookId", "1"))]
    #[case(QueryKey::new("book").param("bookId", "1"), QueryKey::new("book").param("bookId", 1))]
    #[case(QueryKey::new("list-items"), QueryKey::new("list-items").param("page", 1))]
    fn test_distinct_keys(#[case] a: QueryKey, #[case] b: QueryKey) {
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_follows_equality() {
        let mut set = HashSet::new();
        set.insert(QueryKey::new("book").param("bookId", "1"));
        assert!(set.contains(&QueryKey::from_value("book", json!({ "bookId": "1" }))));
    }

    #[test]
    fn test_with_params_from_struct() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            book_id: String,
        }

        let key = QueryKey::with_params(
            "book",
            &Params {
                book_id: "42".to_string(),
            },
        )
        .expect("serializable params");
        assert_eq!(key, QueryKey::new("book").param("bookId", "42"));
        assert_eq!(key.name(), "book");
    }

    #[test]
    fn test_display_is_canonical() {
        let key = QueryKey::new("book").param("bookId", "1");
        assert_eq!(key.to_string(), r#"book:{"bookId":"1"}"#);
    }
}
