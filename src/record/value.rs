//! Values stored in record fields.

use serde_json::Value;
use std::fmt;

use super::{DirtyCallback, ProxyList, ProxyMap, Record};

/// Which serialization of a record is being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
  /// Every non-null field.
  Full,
  /// Identifier plus dirty fields.
  Write,
}

/// A single field value.
///
/// Containers and nested records are shared handles; raw JSON is owned.
#[derive(Clone)]
pub enum FieldValue {
  Json(Value),
  Record(Record),
  List(ProxyList),
  Map(ProxyMap),
}

impl FieldValue {
  pub fn is_null(&self) -> bool {
    matches!(self, FieldValue::Json(Value::Null))
  }

  pub fn as_json(&self) -> Option<&Value> {
    match self {
      FieldValue::Json(value) => Some(value),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    self.as_json()?.as_str()
  }

  pub fn as_i64(&self) -> Option<i64> {
    self.as_json()?.as_i64()
  }

  pub fn as_record(&self) -> Option<&Record> {
    match self {
      FieldValue::Record(record) => Some(record),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&ProxyList> {
    match self {
      FieldValue::List(list) => Some(list),
      _ => None,
    }
  }

  pub fn as_map(&self) -> Option<&ProxyMap> {
    match self {
      FieldValue::Map(map) => Some(map),
      _ => None,
    }
  }

  /// Render as plain JSON.
  pub fn to_json(&self, view: View) -> Value {
    match self {
      FieldValue::Json(value) => value.clone(),
      FieldValue::Record(record) => Value::Object(record.serialize(view)),
      FieldValue::List(list) => list.to_json(view),
      FieldValue::Map(map) => map.to_json(view),
    }
  }

  /// Wrap raw JSON arrays and objects in proxy containers.
  pub(crate) fn into_tracked(self) -> Self {
    match self {
      FieldValue::Json(Value::Array(items)) => FieldValue::List(ProxyList::from_values(items)),
      FieldValue::Json(Value::Object(map)) => FieldValue::Map(ProxyMap::from_values(map)),
      other => other,
    }
  }

  /// Point the value's dirty callback at a new owner.
  pub(crate) fn bind(&self, callback: DirtyCallback) {
    match self {
      FieldValue::Json(_) => {}
      FieldValue::Record(record) => record.bind_parent(callback),
      FieldValue::List(list) => list.bind_parent(callback),
      FieldValue::Map(map) => map.bind_parent(callback),
    }
  }

  pub(crate) fn mark_clean(&self) {
    match self {
      FieldValue::Json(_) => {}
      FieldValue::Record(record) => record.mark_clean(),
      FieldValue::List(list) => list.mark_clean(),
      FieldValue::Map(map) => map.mark_clean(),
    }
  }

  pub(crate) fn mark_all_dirty(&self) {
    match self {
      FieldValue::Json(_) => {}
      FieldValue::Record(record) => record.mark_all_dirty(),
      FieldValue::List(list) => list.mark_all_dirty(),
      FieldValue::Map(map) => map.mark_all_dirty(),
    }
  }
}

impl fmt::Debug for FieldValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FieldValue::Json(value) => write!(f, "{}", value),
      FieldValue::Record(record) => fmt::Debug::fmt(record, f),
      FieldValue::List(list) => write!(f, "{}", list.to_json(View::Full)),
      FieldValue::Map(map) => write!(f, "{}", map.to_json(View::Full)),
    }
  }
}

impl From<Value> for FieldValue {
  fn from(value: Value) -> Self {
    FieldValue::Json(value)
  }
}

impl From<Record> for FieldValue {
  fn from(record: Record) -> Self {
    FieldValue::Record(record)
  }
}

impl From<&Record> for FieldValue {
  fn from(record: &Record) -> Self {
    FieldValue::Record(record.clone())
  }
}

impl From<Vec<Record>> for FieldValue {
  fn from(records: Vec<Record>) -> Self {
    FieldValue::List(ProxyList::from_items(
      records.into_iter().map(FieldValue::Record).collect(),
    ))
  }
}

impl From<ProxyList> for FieldValue {
  fn from(list: ProxyList) -> Self {
    FieldValue::List(list)
  }
}

impl From<ProxyMap> for FieldValue {
  fn from(map: ProxyMap) -> Self {
    FieldValue::Map(map)
  }
}

impl From<&str> for FieldValue {
  fn from(value: &str) -> Self {
    FieldValue::Json(Value::String(value.to_string()))
  }
}

impl From<String> for FieldValue {
  fn from(value: String) -> Self {
    FieldValue::Json(Value::String(value))
  }
}

impl From<i64> for FieldValue {
  fn from(value: i64) -> Self {
    FieldValue::Json(Value::from(value))
  }
}

impl From<bool> for FieldValue {
  fn from(value: bool) -> Self {
    FieldValue::Json(Value::Bool(value))
  }
}
