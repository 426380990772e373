//! Dynamic values carried by props and component state.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::collections::map::HashMap;

/// A single prop or state field.
///
/// Equality is structural for scalars and records, and by reference for
/// [`Value::Opaque`] payloads.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Map(Rc<Record>),
    Opaque(Rc<dyn Any>),
}

impl Value {
    pub fn opaque<T: Any>(value: T) -> Self {
        Value::Opaque(Rc::new(value))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Rc<Record>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(any) => any.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Map(_) => "map",
            Value::Opaque(_) => "opaque",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Map(map) => write!(f, "{map:?}"),
            Value::Opaque(_) => f.write_str("<opaque>"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::Map(Rc::new(value))
    }
}

/// String-keyed bag of values: the shape of props attributes, component
/// state and legacy context.
#[derive(Clone, Default, PartialEq)]
pub struct Record {
    fields: HashMap<Rc<str>, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(Rc::from(key), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|key| &**key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(key, value)| (&**key, value))
    }

    /// Returns a new record with `patch` shallow-merged over `self`.
    pub fn merged(&self, patch: &Record) -> Record {
        let mut out = self.clone();
        for (key, value) in &patch.fields {
            out.fields.insert(Rc::clone(key), value.clone());
        }
        out
    }

    /// Keeps only the listed keys. Used to mask legacy context.
    pub fn masked(&self, keys: &[Rc<str>]) -> Record {
        let mut out = Record::new();
        for key in keys {
            if let Some(value) = self.fields.get(key) {
                out.fields.insert(Rc::clone(key), value.clone());
            }
        }
        out
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.fields.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        f.debug_map().entries(entries).finish()
    }
}

/// Shallow equality of two optional records: same reference, or same keys
/// with equal values.
pub fn shallow_equal(a: Option<&Rc<Record>>, b: Option<&Rc<Record>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Rc::ptr_eq(a, b) || **a == **b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_shallow_and_does_not_mutate_base() {
        let base = Record::new().with("a", 1).with("b", 2);
        let patch = Record::new().with("b", 3).with("c", "x");
        let merged = base.merged(&patch);
        assert_eq!(base.get("b"), Some(&Value::Int(2)));
        assert_eq!(merged.get("a"), Some(&Value::Int(1)));
        assert_eq!(merged.get("b"), Some(&Value::Int(3)));
        assert_eq!(merged.get("c").and_then(Value::as_str), Some("x"));
    }

    #[test]
    fn opaque_values_compare_by_reference() {
        let shared = Value::opaque(5u32);
        assert_eq!(shared, shared.clone());
        assert_ne!(Value::opaque(5u32), Value::opaque(5u32));
    }

    #[test]
    fn shallow_equal_treats_equal_contents_as_equal() {
        let a = Rc::new(Record::new().with("x", true));
        let b = Rc::new(Record::new().with("x", true));
        let c = Rc::new(Record::new().with("x", false));
        assert!(shallow_equal(Some(&a), Some(&b)));
        assert!(!shallow_equal(Some(&a), Some(&c)));
        assert!(!shallow_equal(Some(&a), None));
        assert!(shallow_equal(None, None));
    }

    #[test]
    fn masking_keeps_only_declared_keys() {
        let context = Record::new().with("theme", "dark").with("locale", "en");
        let masked = context.masked(&[Rc::from("theme"), Rc::from("missing")]);
        assert_eq!(masked.len(), 1);
        assert!(masked.contains_key("theme"));
    }
}
