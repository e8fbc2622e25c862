use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Scalar value stored in an [`ExecutionContext`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ContextValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Bool(value) => write!(f, "{}", value),
            ContextValue::Int(value) => write!(f, "{}", value),
            ContextValue::Float(value) => write!(f, "{}", value),
            ContextValue::String(value) => f.write_str(value),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::String(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::String(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Int(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValue::Float(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

/// Insertion-ordered key/value parameters of one unit of work.
///
/// A partitioner creates one context per partition; the worker that runs the
/// partition only reads it, typically to locate its input.
///
/// # Examples
///
/// ```
/// use partitioned_batch::core::context::ExecutionContext;
///
/// let mut context = ExecutionContext::new();
/// context.put_string("fileName", "names0.csv");
/// context.put_int("minValue", 1);
///
/// assert_eq!(context.get_string("fileName"), Some("names0.csv"));
/// assert_eq!(context.get_int("minValue"), Some(1));
/// assert_eq!(context.get_int("fileName"), None);
/// assert_eq!(context.keys().collect::<Vec<_>>(), vec!["fileName", "minValue"]);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct ExecutionContext {
    entries: IndexMap<String, ContextValue>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &str, value: impl Into<ContextValue>) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn put_string(&mut self, key: &str, value: impl Into<String>) {
        self.put(key, ContextValue::String(value.into()));
    }

    pub fn put_int(&mut self, key: &str, value: i64) {
        self.put(key, ContextValue::Int(value));
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(ContextValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(ContextValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(ContextValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
