//! Document structure for reagg.
//!
//! A `Document` is one record of a collection or one row of a pipeline's
//! output: a map from field name to `Value`. Documents that flow through a
//! reactive session carry an identity field (see [`DocumentId`]).

use crate::error::{Error, Result};
use crate::value::Value;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};

/// Default name of the identity field.
pub const DEFAULT_ID_FIELD: &str = "_id";

/// A document: field name -> value, ordered by field name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    /// Creates an empty document.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Gets the value of a field.
    #[inline]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Gets a mutable reference to the value of a field.
    #[inline]
    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.fields.get_mut(field)
    }

    /// Sets a field, returning the previous value if any.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// Removes a field, returning its value if it was present.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Returns true if the field is present.
    #[inline]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Returns the number of fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if this document has no fields.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over `(field, value)` pairs in field order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.fields.iter()
    }

    /// Reads the identity stored under `id_field`.
    pub fn identity(&self, id_field: &str) -> Result<DocumentId> {
        match self.fields.get(id_field) {
            Some(value) => DocumentId::try_from(value),
            None => Err(Error::configuration(format!(
                "document has no identity field `{}`",
                id_field
            ))),
        }
    }

    /// Writes `id` under `id_field`, replacing whatever was there.
    pub fn set_identity(&mut self, id_field: &str, id: &DocumentId) {
        self.fields.insert(id_field.to_string(), id.to_value());
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Stable key used to match a result document across iterations.
///
/// Only integers and strings are accepted; floats, nulls and composite values
/// do not make reliable identities.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentId {
    /// Integer identity
    Int(i64),
    /// String identity
    Str(String),
}

impl DocumentId {
    /// Converts the identity back into a field value.
    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(v) => Value::Int64(*v),
            DocumentId::Str(v) => Value::String(v.clone()),
        }
    }
}

impl TryFrom<&Value> for DocumentId {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Int64(v) => Ok(DocumentId::Int(*v)),
            Value::String(v) => Ok(DocumentId::Str(v.clone())),
            other => Err(Error::configuration(format!(
                "{} value cannot be used as a document identity",
                other.type_name()
            ))),
        }
    }
}

impl From<i64> for DocumentId {
    fn from(v: i64) -> Self {
        DocumentId::Int(v)
    }
}

impl From<&str> for DocumentId {
    fn from(v: &str) -> Self {
        DocumentId::Str(v.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(v: String) -> Self {
        DocumentId::Str(v)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(v) => write!(f, "{}", v),
            DocumentId::Str(v) => write!(f, "{}", v),
        }
    }
}

/// Builds a [`Document`] from `field => value` pairs.
///
/// ```
/// use reagg_core::{doc, Value};
///
/// let d = doc! { "_id" => 1, "name" => "Alice" };
/// assert_eq!(d.get("name"), Some(&Value::String("Alice".into())));
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::Document::new() };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut document = $crate::Document::new();
        $( document.insert($field, $value); )+
        document
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_fields() {
        let mut d = Document::new().with("_id", 1).with("name", "Alice");
        assert_eq!(d.len(), 2);
        assert_eq!(d.get("name"), Some(&Value::String("Alice".into())));
        assert!(d.contains("_id"));

        assert_eq!(d.insert("name", "Bob"), Some(Value::String("Alice".into())));
        assert_eq!(d.remove("name"), Some(Value::String("Bob".into())));
        assert!(!d.contains("name"));
    }

    #[test]
    fn test_document_identity() {
        let d = doc! { "_id" => 7, "x" => 1.5 };
        assert_eq!(d.identity("_id").unwrap(), DocumentId::Int(7));

        let d = doc! { "key" => "abc" };
        assert_eq!(d.identity("key").unwrap(), DocumentId::Str("abc".into()));
    }

    #[test]
    fn test_document_identity_missing() {
        let d = doc! { "x" => 1 };
        let err = d.identity("_id").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("_id"));
    }

    #[test]
    fn test_document_identity_rejects_float() {
        let d = doc! { "_id" => 1.0 };
        assert!(d.identity("_id").is_err());

        let d = doc! { "_id" => Value::Null };
        assert!(d.identity("_id").is_err());
    }

    #[test]
    fn test_set_identity_overwrites() {
        let mut d = doc! { "_id" => "wrong", "x" => 1 };
        d.set_identity("_id", &DocumentId::Int(3));
        assert_eq!(d.get("_id"), Some(&Value::Int64(3)));
    }

    #[test]
    fn test_document_json() {
        let d: Document = serde_json::from_str(r#"{"_id": "a", "n": 2, "tags": ["x"]}"#).unwrap();
        assert_eq!(d.identity("_id").unwrap(), DocumentId::from("a"));
        assert_eq!(d.get("n"), Some(&Value::Int64(2)));

        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, r#"{"_id":"a","n":2,"tags":["x"]}"#);
    }

    #[test]
    fn test_document_id_display() {
        assert_eq!(DocumentId::Int(5).to_string(), "5");
        assert_eq!(DocumentId::from("k").to_string(), "k");
    }
}
