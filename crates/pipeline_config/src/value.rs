//! Configuration value tree and the recursive merge rule.
//!
//! Component configurations and user override documents are arbitrary nested
//! documents. They are modelled as a tagged variant over scalars, sequences
//! and (insertion-ordered) mappings so merging is a pure function over the
//! tree, with no reflection over concrete config structs.
//!
//! # Merge rule
//!
//! | base      | override  | result                          |
//! |-----------|-----------|---------------------------------|
//! | any       | null      | base (null never erases)        |
//! | mapping   | mapping   | recurse key by key              |
//! | sequence  | sequence  | override replaces base wholesale|
//! | any       | any       | override                        |

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Insertion-ordered mapping used for every mapping node.
pub type Mapping = IndexMap<String, Value>;

/// Leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// A node of a configuration document.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Sequence(Vec<Value>),
    Mapping(Mapping),
}

impl Default for Value {
    fn default() -> Self {
        Value::Scalar(Scalar::Null)
    }
}

impl Value {
    /// An empty mapping node.
    pub fn mapping() -> Self {
        Value::Mapping(Mapping::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Scalar(Scalar::Null))
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Scalar(Scalar::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Looks up a key of a mapping node.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_mapping().and_then(|m| m.get(key))
    }

    /// Walks a path of mapping keys.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(self, |node, key| node.get(key))
    }

    /// Inserts into a mapping node, turning a non-mapping node into a mapping first.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        if !matches!(self, Value::Mapping(_)) {
            *self = Value::mapping();
        }
        if let Value::Mapping(m) = self {
            m.insert(key.into(), value.into());
        }
        self
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// `true` for null, empty strings, empty sequences and empty mappings.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Scalar(Scalar::Null) => true,
            Value::Scalar(Scalar::String(s)) => s.is_empty(),
            Value::Scalar(_) => false,
            Value::Sequence(s) => s.is_empty(),
            Value::Mapping(m) => m.is_empty(),
        }
    }

    /// Overlays `overlay` onto `self` in place.
    pub fn merge_from(&mut self, overlay: Value) {
        match (self, overlay) {
            (_, Value::Scalar(Scalar::Null)) => {}
            (Value::Mapping(base), Value::Mapping(overlay)) => {
                for (key, value) in overlay {
                    match base.get_mut(&key) {
                        Some(existing) => existing.merge_from(value),
                        None => {
                            base.insert(key, value);
                        }
                    }
                }
            }
            (base, overlay) => *base = overlay,
        }
    }
}

/// Pure form of [`Value::merge_from`].
pub fn merge_values(mut base: Value, overlay: Value) -> Value {
    base.merge_from(overlay);
    base
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(Scalar::String(s.to_owned()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(Scalar::String(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Scalar(Scalar::Int(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Scalar(Scalar::Float(f))
    }
}

impl From<Mapping> for Value {
    fn from(m: Mapping) -> Self {
        Value::Mapping(m)
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(items: Vec<V>) -> Self {
        Value::Sequence(items.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Mapping(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// YAML is the on-disk format; conversions go through serde_yaml's own tree.

fn key_to_string(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => "null".to_owned(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_owned())
            .unwrap_or_default(),
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(v: serde_yaml::Value) -> Self {
        match v {
            serde_yaml::Value::Null => Value::Scalar(Scalar::Null),
            serde_yaml::Value::Bool(b) => Value::Scalar(Scalar::Bool(b)),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Scalar(Scalar::Int(i)),
                None => Value::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            serde_yaml::Value::String(s) => Value::Scalar(Scalar::String(s)),
            serde_yaml::Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Value::from).collect())
            }
            serde_yaml::Value::Mapping(map) => Value::Mapping(
                map.into_iter()
                    .map(|(k, v)| (key_to_string(k), Value::from(v)))
                    .collect(),
            ),
            serde_yaml::Value::Tagged(tagged) => Value::from(tagged.value),
        }
    }
}

impl From<Value> for serde_yaml::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Scalar(Scalar::Null) => serde_yaml::Value::Null,
            Value::Scalar(Scalar::Bool(b)) => serde_yaml::Value::Bool(b),
            Value::Scalar(Scalar::Int(i)) => serde_yaml::Value::Number(i.into()),
            Value::Scalar(Scalar::Float(f)) => serde_yaml::Value::Number(f.into()),
            Value::Scalar(Scalar::String(s)) => serde_yaml::Value::String(s),
            Value::Sequence(seq) => {
                serde_yaml::Value::Sequence(seq.into_iter().map(Into::into).collect())
            }
            Value::Mapping(map) => serde_yaml::Value::Mapping(
                map.into_iter()
                    .map(|(k, v)| (serde_yaml::Value::String(k), v.into()))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_yaml::Value::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_yaml::Value::deserialize(deserializer).map(Value::from)
    }
}
