use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt::{Display, Formatter};

use rust_decimal::Decimal;

use super::controller::{FormError, FormResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldKey(&'static str);

impl FieldKey {
    pub const fn new(value: &'static str) -> Self {
        Self(value)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl Borrow<str> for FieldKey {
    fn borrow(&self) -> &str {
        self.0
    }
}

impl From<&'static str> for FieldKey {
    fn from(value: &'static str) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ValueKind {
    Text,
    Bool,
    Number,
    List,
}

/// The value held by a single form field.
///
/// Numbers are kept as [`Decimal`] so range checks compare exactly what the
/// user typed instead of a rounded float.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Value {
    Text(String),
    Bool(bool),
    Number(Decimal),
    List(Vec<String>),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Text(_) => ValueKind::Text,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::List(_) => ValueKind::List,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Value::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Whitespace-only text and empty lists count as blank. Booleans and
    /// numbers always carry a value.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Text(text) => text.trim().is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(Decimal::from(value))
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::List(value)
    }
}

pub trait FromValue: Sized {
    const KIND: ValueKind;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for String {
    const KIND: ValueKind = ValueKind::Text;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_text().map(str::to_string)
    }
}

impl FromValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for Decimal {
    const KIND: ValueKind = ValueKind::Number;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_number()
    }
}

impl FromValue for Vec<String> {
    const KIND: ValueKind = ValueKind::List;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_list().map(<[String]>::to_vec)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValueMap(BTreeMap<FieldKey, Value>);

impl ValueMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_text)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn number(&self, key: &str) -> Option<Decimal> {
        self.get(key).and_then(Value::as_number)
    }

    pub fn list(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(Value::as_list)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: FieldKey, value: Value) -> Option<Value> {
        self.0.insert(key, value)
    }

    pub fn keys(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, FieldKey, Value> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn decode<T: FromValue>(&self, key: FieldKey) -> FormResult<T> {
        let value = self
            .get(key.as_str())
            .ok_or_else(|| FormError::UnknownField(key.to_string()))?;
        T::from_value(value).ok_or(FormError::ValueKindMismatch {
            field: key,
            expected: T::KIND,
            found: value.kind(),
        })
    }
}

impl FromIterator<(FieldKey, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (FieldKey, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ValueMap {
    type Item = (&'a FieldKey, &'a Value);
    type IntoIter = btree_map::Iter<'a, FieldKey, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
