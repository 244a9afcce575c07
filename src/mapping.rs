//! JSON to record materialization.
//!
//! Objects whose key names a known kind become nested records; arrays whose
//! singular key names a known kind become lists of records; everything else
//! is stored as raw JSON. Finished records are marked clean and written to
//! the object cache.

use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::warn;

use crate::cache::CacheRegistry;
use crate::error::{Error, Result};
use crate::record::{FieldValue, KindRegistry, ProxyList, Record};
use crate::util::as_singular;

/// Keys renamed before kind lookup so they never resolve to a record type.
const RESERVED_KEYS: &[&str] = &["from", "system", "photo", "thumbnails"];

/// Outcome of mapping one JSON value.
#[derive(Debug, Clone)]
pub enum Materialized {
  Record(Record),
  /// Non-object input, returned unchanged.
  Passthrough(Value),
}

impl Materialized {
  pub fn into_record(self) -> Option<Record> {
    match self {
      Materialized::Record(record) => Some(record),
      Materialized::Passthrough(_) => None,
    }
  }
}

impl From<Materialized> for FieldValue {
  fn from(value: Materialized) -> Self {
    match value {
      Materialized::Record(record) => FieldValue::Record(record),
      Materialized::Passthrough(json) => FieldValue::Json(json),
    }
  }
}

/// Lookup key for a JSON key inside a record of kind `owner`.
///
/// `result` depends on its owner (`job_status` -> `job_status_result`) and
/// reserved keys get a trailing underscore.
pub fn format_key<'a>(key: &'a str, owner: Option<&str>) -> Cow<'a, str> {
  match (key, owner) {
    ("result", Some(owner)) => Cow::Owned(format!("{}_result", owner)),
    _ if RESERVED_KEYS.contains(&key) => Cow::Owned(format!("{}_", key)),
    _ => Cow::Borrowed(key),
  }
}

/// Builds records from JSON and registers them in the cache.
pub struct ObjectMapping {
  kinds: Arc<KindRegistry>,
  cache: Arc<CacheRegistry>,
}

impl ObjectMapping {
  pub fn new(kinds: Arc<KindRegistry>, cache: Arc<CacheRegistry>) -> Self {
    Self { kinds, cache }
  }

  pub fn kinds(&self) -> &KindRegistry {
    &self.kinds
  }

  pub fn cache(&self) -> &CacheRegistry {
    &self.cache
  }

  /// Map `json` as a record of `kind`, passing non-objects through.
  pub fn materialize(&self, kind: &str, json: &Value) -> Result<Materialized> {
    match json {
      Value::Object(object) => Ok(Materialized::Record(self.build(kind, object)?)),
      other => Ok(Materialized::Passthrough(other.clone())),
    }
  }

  /// Map `json` as a record of `kind`; non-objects are a mapping error.
  pub fn materialize_record(&self, kind: &str, json: &Value) -> Result<Record> {
    match json {
      Value::Object(object) => self.build(kind, object),
      other => Err(Error::mapping(
        kind,
        format!("expected an object, got {}", json_type(other)),
      )),
    }
  }

  /// Map every sideloaded collection in `page` so it lands in the cache.
  /// `skip` names the key holding the primary payload.
  pub fn materialize_sideloads(&self, page: &Map<String, Value>, skip: &str) -> Result<()> {
    for (key, value) in page {
      if key == skip {
        continue;
      }
      let Value::Array(items) = value else {
        continue;
      };
      let kind = as_singular(key);
      if !self.kinds.contains(&kind) {
        continue;
      }
      for item in items {
        self.materialize(&kind, item)?;
      }
    }
    Ok(())
  }

  /// Kind for a nested object under `key`: the key itself, else its singular.
  fn object_kind(&self, key: &str, owner: &str) -> Option<String> {
    let direct = format_key(key, Some(owner));
    if self.kinds.contains(&direct) {
      return Some(direct.into_owned());
    }
    let singular = format_key(&as_singular(key), Some(owner)).into_owned();
    self.kinds.contains(&singular).then_some(singular)
  }

  fn build(&self, kind: &str, object: &Map<String, Value>) -> Result<Record> {
    let record = self.kinds.instantiate(kind).inspect_err(|_| {
      warn!(kind, "payload names an unknown kind");
    })?;

    for (key, value) in object {
      let field = match value {
        Value::Object(nested) => match self.object_kind(key, record.kind()) {
          Some(nested_kind) => FieldValue::Record(self.build(&nested_kind, nested)?),
          None => FieldValue::Json(value.clone()),
        },
        Value::Array(items) => {
          let singular = as_singular(key);
          let item_kind = format_key(&singular, Some(record.kind()));
          if self.kinds.contains(&item_kind) {
            let mapped = items
              .iter()
              .map(|item| self.materialize(&item_kind, item).map(FieldValue::from))
              .collect::<Result<Vec<_>>>()?;
            FieldValue::List(ProxyList::from_items(mapped))
          } else {
            FieldValue::Json(value.clone())
          }
        }
        _ => FieldValue::Json(value.clone()),
      };
      record.set(key.as_str(), field);
    }

    record.mark_clean();
    self.cache.put(&record);
    Ok(record)
  }
}

fn json_type(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}
