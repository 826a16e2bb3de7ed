//! Parameter values and immutable, insertion-ordered parameter sets.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::errors::ConfigError;

/// A concrete hyperparameter value.
///
/// Lists are opaque architecture descriptors once they sit inside a
/// [`ParameterSet`]; inside a search space they are candidate sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ParameterValue>),
}

impl ParameterValue {
    /// Convert a YAML node into a parameter value.
    pub fn from_yaml(name: &str, value: &serde_yaml::Value) -> Result<Self, ConfigError> {
        use serde_yaml::Value;

        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(ConfigError::InvalidParameter {
                        name: name.to_string(),
                        message: format!("unsupported number {n}"),
                    })
                }
            }
            Value::String(s) => Ok(Self::Text(s.clone())),
            Value::Sequence(items) => items
                .iter()
                .map(|item| Self::from_yaml(name, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            Value::Tagged(tagged) => Self::from_yaml(name, &tagged.value),
            Value::Null | Value::Mapping(_) => Err(ConfigError::InvalidParameter {
                name: name.to_string(),
                message: "expected a scalar or a list".to_string(),
            }),
        }
    }

    /// Convert a JSON node into a parameter value.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Self::List),
            Value::Null | Value::Object(_) => None,
        }
    }

    /// Render as a single table cell. Lists become compact JSON text.
    pub fn to_cell(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            // Debug keeps the trailing `.0` so floats reload as floats.
            Self::Float(f) => format!("{f:?}"),
            // Text that would read back as another type is written as a JSON string.
            Self::Text(s) => match Self::parse_bare(s) {
                Some(Self::Text(ref t)) if t == s && !s.starts_with('"') => s.clone(),
                _ => serde_json::to_string(s).unwrap_or_default(),
            },
            Self::List(_) => serde_json::to_string(self).unwrap_or_default(),
        }
    }

    /// Parse a table cell written by [`ParameterValue::to_cell`]. Empty cells are `None`.
    pub fn from_cell(cell: &str) -> Option<Self> {
        if cell.starts_with('"') {
            if let Ok(text) = serde_json::from_str::<String>(cell) {
                return Some(Self::Text(text));
            }
        }
        Self::parse_bare(cell)
    }

    fn parse_bare(cell: &str) -> Option<Self> {
        if cell.is_empty() {
            return None;
        }
        if cell == "true" || cell == "false" {
            return Some(Self::Bool(cell == "true"));
        }
        if let Ok(i) = cell.parse::<i64>() {
            return Some(Self::Int(i));
        }
        if let Ok(f) = cell.parse::<f64>() {
            return Some(Self::Float(f));
        }
        if cell.starts_with('[') {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(cell) {
                if let Some(value) = Self::from_json(&json) {
                    return Some(value);
                }
            }
        }
        Some(Self::Text(cell.to_string()))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        self.as_i64().and_then(|i| usize::try_from(i).ok())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::List(_) => write!(f, "{}", self.to_cell()),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<ParameterValue>> From<Vec<T>> for ParameterValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// An immutable mapping from hyperparameter name to value.
///
/// Keys keep their insertion order so tables and logs are reproducible. There
/// is no in-place mutation: [`ParameterSet::with`] and [`ParameterSet::merged`]
/// build new sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    entries: Vec<(String, ParameterValue)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new set with `key` bound to `value`. An existing key keeps its position.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    /// Return a new set holding every entry of `self` followed by those of `other`.
    pub fn merged(&self, other: &ParameterSet) -> ParameterSet {
        other
            .iter()
            .fold(self.clone(), |acc, (k, v)| acc.with(k, v.clone()))
    }

    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, ParameterValue)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, ParameterValue)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ParameterSet::new(), |acc, (k, v)| acc.with(k, v))
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        write!(f, "}}")
    }
}

impl Serialize for ParameterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParameterSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = ParameterSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of parameter names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut set = ParameterSet::new();
                while let Some((k, v)) = access.next_entry::<String, ParameterValue>()? {
                    set = set.with(k, v);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}
