//! Resource - Representing desired configuration and tracked state

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute tree of one resource instance, keyed by attribute name.
///
/// An attribute that was not supplied is absent from the map; it is never
/// represented by a zero value.
pub type Attributes = BTreeMap<String, Value>;

/// Attribute value of a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    /// Ordered collection; order is significant
    List(Vec<Value>),
    /// Unordered collection; compared as a multiset
    Set(Vec<Value>),
    /// Free-form key/value map (tags, cloud map attributes)
    Map(BTreeMap<String, Value>),
    /// Nested block whose keys are defined by a schema
    Block(Attributes),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => set_eq(a, b),
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Block(a), Value::Block(b)) => a == b,
            _ => false,
        }
    }
}

/// Multiset equality: every element of `a` pairs with exactly one equal element of `b`
fn set_eq(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    'outer: for item in a {
        for (i, candidate) in b.iter().enumerate() {
            if !used[i] && item == candidate {
                used[i] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

impl Value {
    /// Build a block from `(name, value)` pairs
    pub fn block<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Block(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a string map from `(key, value)` pairs
    pub fn string_map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), Value::String(v.into())))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&Attributes> {
        match self {
            Value::Block(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// Items of a list or set
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Short type label used in validation messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "String",
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
            Value::List(_) => "List",
            Value::Set(_) => "Set",
            Value::Map(_) => "Map",
            Value::Block(_) => "Block",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Opaque key that addresses one remote object for its whole lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State the host keeps for one resource instance between operations
///
/// Only the projected attributes are kept; the raw remote object is
/// re-derived on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedResource {
    /// Resource kind name (e.g., "appmesh_virtual_node")
    pub kind: String,
    pub identity: Identity,
    pub attributes: Attributes,
    /// Schema version the attributes were written with
    pub schema_version: u32,
}

impl TrackedResource {
    pub fn new(kind: impl Into<String>, identity: Identity, attributes: Attributes) -> Self {
        Self {
            kind: kind.into(),
            identity,
            attributes,
            schema_version: 0,
        }
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// Result of reading a tracked resource back from the remote system
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The object exists; attributes are the refreshed projection
    Present(TrackedResource),
    /// The object is gone; the host must drop it from tracked state
    Absent,
}

impl ReadOutcome {
    pub fn is_present(&self) -> bool {
        matches!(self, ReadOutcome::Present(_))
    }

    pub fn into_present(self) -> Option<TrackedResource> {
        match self {
            ReadOutcome::Present(r) => Some(r),
            ReadOutcome::Absent => None,
        }
    }
}
