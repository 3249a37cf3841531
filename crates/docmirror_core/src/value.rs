//! Raw document field values.
//!
//! The engine never interprets these; it moves them from the store to the
//! sink, which builds its own projection from them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Named field values of one document, ordered by field name.
pub type Fields = BTreeMap<String, Value>;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing or empty value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number (all numerics are stored as f64).
    Number(f64),
    /// Text.
    Text(String),
    /// Multi-valued field.
    List(Vec<Value>),
}

impl Value {
    /// Creates a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Returns the text if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number if this is a numeric value.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns true for `Null` and for empty text or lists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Canonical key for equality indexes.
    ///
    /// Two values produce the same key iff they compare equal, with numbers
    /// normalized so `1` and `1.0` collide. Lists are not indexable as a
    /// whole; callers index their elements instead.
    #[must_use]
    pub fn index_key(&self) -> String {
        match self {
            Value::Null => "n:".to_string(),
            Value::Bool(b) => format!("b:{b}"),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("i:{}", *n as i64),
            Value::Number(n) => format!("f:{n}"),
            Value::Text(s) => format!("t:{s}"),
            Value::List(items) => {
                let keys: Vec<String> = items.iter().map(Value::index_key).collect();
                format!("l:[{}]", keys.join(","))
            }
        }
    }

    /// Iterates the scalar values: the elements of a list, or the value itself.
    pub fn scalars(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Value::List(items) => Box::new(items.iter()),
            other => Box::new(std::iter::once(other)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// The document fields a sink wants projected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldSet {
    /// Every field of the document.
    #[default]
    All,
    /// Only the named fields.
    Named(BTreeSet<String>),
}

impl FieldSet {
    /// Creates a field set from field names.
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Named(names.into_iter().map(Into::into).collect())
    }

    /// Returns true if the field is part of the projection.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        match self {
            FieldSet::All => true,
            FieldSet::Named(names) => names.contains(name),
        }
    }

    /// Copies the selected fields out of a document.
    ///
    /// Named fields missing from the document are omitted, not nulled.
    #[must_use]
    pub fn project(&self, fields: &Fields) -> Fields {
        match self {
            FieldSet::All => fields.clone(),
            FieldSet::Named(names) => names
                .iter()
                .filter_map(|name| fields.get(name).map(|v| (name.clone(), v.clone())))
                .collect(),
        }
    }
}
