//! Mutable records with dirty-field tracking.
//!
//! A [`Record`] is a shared handle onto one remote entity. Every write goes
//! through [`Record::set`], which records the field name in the dirty set.
//! Nested records and [`ProxyList`]/[`ProxyMap`] containers hold a callback
//! into their owner, so a mutation anywhere below a record dirties the field
//! that owns it.
//!
//! - [`Record::to_full_map`] emits every non-null field (cache and display).
//! - [`Record::to_write_map`] emits the identifier plus dirty fields only
//!   (create/update payloads).

mod kinds;
mod proxy;
mod value;

pub use kinds::{
  Audit, Comment, IdField, JobStatus, KindRegistry, KindSpec, Organization, Ticket, TicketAudit,
  User, Via,
};
pub use proxy::{ProxyList, ProxyMap};
pub use value::{FieldValue, View};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::cache::CacheRegistry;
use crate::util::{lock, read, write};

/// Notification fired by a nested value when it is mutated.
pub(crate) type DirtyCallback = Arc<dyn Fn() + Send + Sync>;

/// Shared handle onto a typed remote entity.
///
/// Cloning a `Record` clones the handle, not the data: the object cache and
/// the caller observe the same instance.
#[derive(Clone)]
pub struct Record {
  inner: Arc<RecordInner>,
}

struct RecordInner {
  spec: KindSpec,
  state: RwLock<RecordState>,
  parent: Mutex<Option<DirtyCallback>>,
}

#[derive(Default)]
struct RecordState {
  fields: BTreeMap<String, FieldValue>,
  dirty: BTreeSet<String>,
  /// Related records assigned locally through `set_related`.
  resolved: HashMap<String, Record>,
}

impl Record {
  /// Create an empty record of the given kind.
  pub fn new(spec: KindSpec) -> Self {
    Self {
      inner: Arc::new(RecordInner {
        spec,
        state: RwLock::new(RecordState::default()),
        parent: Mutex::new(None),
      }),
    }
  }

  /// Create a record with initial fields. Every passed field starts dirty.
  pub fn with_fields<K, V>(spec: KindSpec, fields: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: Into<String>,
    V: Into<FieldValue>,
  {
    let record = Self::new(spec);
    for (field, value) in fields {
      record.set(field, value);
    }
    record
  }

  pub fn spec(&self) -> &KindSpec {
    &self.inner.spec
  }

  /// Canonical kind tag, e.g. `ticket`.
  pub fn kind(&self) -> &str {
    self.inner.spec.tag()
  }

  /// Runtime type name, e.g. `Ticket`.
  pub fn type_name(&self) -> &str {
    self.inner.spec.type_name()
  }

  /// Whether both handles point at the same instance.
  pub fn ptr_eq(&self, other: &Record) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  /// Store `value` under `field` and mark the field dirty.
  ///
  /// Writes are tracked, not diffed: setting an unchanged value still dirties
  /// the field. Raw JSON arrays and objects are wrapped in proxy containers
  /// bound to this record.
  pub fn set(&self, field: impl Into<String>, value: impl Into<FieldValue>) {
    let field = field.into();
    let value = value.into().into_tracked();
    value.bind(self.field_callback(&field));
    {
      let mut state = write(&self.inner.state);
      if let Some(name) = field.strip_suffix("_id") {
        state.resolved.remove(name);
      }
      state.fields.insert(field.clone(), value);
      state.dirty.insert(field);
    }
    self.notify_parent();
  }

  /// Remove a field. The removal counts as a write.
  pub fn remove(&self, field: &str) -> Option<FieldValue> {
    let removed = {
      let mut state = write(&self.inner.state);
      state.dirty.insert(field.to_string());
      state.fields.remove(field)
    };
    self.notify_parent();
    removed
  }

  pub fn get(&self, field: &str) -> Option<FieldValue> {
    read(&self.inner.state).fields.get(field).cloned()
  }

  pub fn has(&self, field: &str) -> bool {
    read(&self.inner.state)
      .fields
      .get(field)
      .is_some_and(|value| !value.is_null())
  }

  pub fn get_str(&self, field: &str) -> Option<String> {
    self.get(field)?.as_str().map(str::to_string)
  }

  pub fn get_i64(&self, field: &str) -> Option<i64> {
    self.get(field)?.as_i64()
  }

  pub fn get_bool(&self, field: &str) -> Option<bool> {
    self.get(field)?.as_json()?.as_bool()
  }

  /// Nested record stored under `field`.
  pub fn record(&self, field: &str) -> Option<Record> {
    self.get(field)?.as_record().cloned()
  }

  /// List container stored under `field`.
  pub fn list(&self, field: &str) -> Option<ProxyList> {
    self.get(field)?.as_list().cloned()
  }

  /// Map container stored under `field`.
  pub fn map(&self, field: &str) -> Option<ProxyMap> {
    self.get(field)?.as_map().cloned()
  }

  /// Records held in the list stored under `field`.
  pub fn records(&self, field: &str) -> Vec<Record> {
    self
      .list(field)
      .map(|list| {
        (0..list.len())
          .filter_map(|i| list.get(i))
          .filter_map(|item| item.as_record().cloned())
          .collect()
      })
      .unwrap_or_default()
  }

  /// Names of all stored fields.
  pub fn field_names(&self) -> Vec<String> {
    read(&self.inner.state).fields.keys().cloned().collect()
  }

  /// Identifier under this kind's identifier rule.
  pub fn id(&self) -> Option<Value> {
    self
      .get(self.inner.spec.id_field().name())?
      .as_json()
      .filter(|value| !value.is_null())
      .cloned()
  }

  /// Identifier rendered as a cache key.
  pub fn cache_key(&self) -> Option<String> {
    self.id().as_ref().and_then(cache_key_of)
  }

  // --------------------------------------------------------------------------
  // Serialization
  // --------------------------------------------------------------------------

  /// Every non-null field, with shadow names normalised to their public name.
  pub fn to_full_map(&self) -> Map<String, Value> {
    self.serialize(View::Full)
  }

  /// The identifier plus dirty fields, for create/update payloads.
  pub fn to_write_map(&self) -> Map<String, Value> {
    self.serialize(View::Write)
  }

  pub(crate) fn serialize(&self, view: View) -> Map<String, Value> {
    let state = read(&self.inner.state);
    let id_field = self.inner.spec.id_field().name();
    let mut out = Map::new();
    for (name, value) in &state.fields {
      if value.is_null() {
        continue;
      }
      if view == View::Write && name != id_field && !state.dirty.contains(name) {
        continue;
      }
      out.insert(public_name(name).to_string(), value.to_json(view));
    }
    out
  }

  // --------------------------------------------------------------------------
  // Dirty tracking
  // --------------------------------------------------------------------------

  /// Fields written since the last clean point.
  pub fn dirty_fields(&self) -> Vec<String> {
    read(&self.inner.state).dirty.iter().cloned().collect()
  }

  pub fn is_dirty(&self) -> bool {
    !read(&self.inner.state).dirty.is_empty()
  }

  /// Forget pending writes here and in every nested record and container.
  pub fn mark_clean(&self) {
    let children = {
      let mut state = write(&self.inner.state);
      state.dirty.clear();
      tracked_children(&state)
    };
    for child in children {
      child.mark_clean();
    }
  }

  /// Mark every stored field dirty, recursively, to force a full overwrite.
  pub fn mark_all_dirty(&self) {
    let children = {
      let mut state = write(&self.inner.state);
      let names: Vec<String> = state.fields.keys().cloned().collect();
      state.dirty.extend(names);
      tracked_children(&state)
    };
    for child in children {
      child.mark_all_dirty();
    }
  }

  /// Mark one field dirty and propagate upwards.
  pub(crate) fn mark_dirty(&self, field: &str) {
    write(&self.inner.state).dirty.insert(field.to_string());
    self.notify_parent();
  }

  pub(crate) fn bind_parent(&self, callback: DirtyCallback) {
    *lock(&self.inner.parent) = Some(callback);
  }

  fn notify_parent(&self) {
    let callback = lock(&self.inner.parent).clone();
    if let Some(callback) = callback {
      callback();
    }
  }

  fn field_callback(&self, field: &str) -> DirtyCallback {
    let weak = Arc::downgrade(&self.inner);
    let field = field.to_string();
    Arc::new(move || {
      if let Some(inner) = weak.upgrade() {
        Record { inner }.mark_dirty(&field);
      }
    })
  }

  // --------------------------------------------------------------------------
  // Derived accessors
  // --------------------------------------------------------------------------

  /// Parse the ISO-8601 string stored under `field`.
  pub fn datetime(&self, field: &str) -> Option<DateTime<Utc>> {
    let raw = self.get_str(field)?;
    DateTime::parse_from_rfc3339(&raw)
      .ok()
      .map(|dt| dt.with_timezone(&Utc))
  }

  /// Store `value` under `field` as an ISO-8601 string.
  pub fn set_datetime(&self, field: &str, value: DateTime<Utc>) {
    self.set(
      field,
      Value::String(value.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
  }

  /// Related record referenced by `<name>_id`.
  ///
  /// A record assigned through [`Record::set_related`] is returned as-is;
  /// otherwise the id is looked up in `cache` under `kind`.
  pub fn related(&self, name: &str, kind: &str, cache: &CacheRegistry) -> Option<Record> {
    if let Some(local) = read(&self.inner.state).resolved.get(name) {
      return Some(local.clone());
    }
    let id = self.get(&related_id_field(name))?.as_json().and_then(cache_key_of)?;
    cache.get(kind, id)
  }

  /// Point `<name>_id` at `related` and keep the record for local reads.
  pub fn set_related(&self, name: &str, related: &Record) {
    let id = related.id().unwrap_or(Value::Null);
    self.set(related_id_field(name), id);
    write(&self.inner.state)
      .resolved
      .insert(name.to_string(), related.clone());
  }

  /// The raw id field backing a related accessor.
  pub(crate) fn related_id(&self, name: &str) -> Option<String> {
    self.get(&related_id_field(name))?.as_json().and_then(cache_key_of)
  }
}

impl fmt::Debug for Record {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct(self.type_name())
      .field("fields", &Value::Object(self.to_full_map()))
      .field("dirty", &self.dirty_fields())
      .finish()
  }
}

/// Render a JSON identifier as a cache key. Only strings and numbers qualify.
pub(crate) fn cache_key_of(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn related_id_field(name: &str) -> String {
  format!("{}_id", name)
}

/// Strip the leading underscore of a shadow field.
fn public_name(name: &str) -> &str {
  name.strip_prefix('_').unwrap_or(name)
}

fn tracked_children(state: &RecordState) -> Vec<FieldValue> {
  state
    .fields
    .values()
    .filter(|value| !matches!(value, FieldValue::Json(_)))
    .cloned()
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde_json::json;

  fn ticket() -> Record {
    Record::new(KindSpec::new("Ticket", IdField::Id))
  }

  fn keys(map: &Map<String, Value>) -> Vec<&str> {
    map.keys().map(String::as_str).collect()
  }

  #[test]
  fn test_constructor_fields_are_dirty() {
    let record = Record::with_fields(
      KindSpec::new("Ticket", IdField::Id),
      [("subject", json!("printer on fire")), ("priority", json!("high"))],
    );
    assert_eq!(keys(&record.to_write_map()), vec!["priority", "subject"]);
  }

  #[test]
  fn test_write_map_always_includes_id() {
    let record = ticket();
    record.set("id", json!(7));
    record.set("subject", json!("a"));
    record.mark_clean();
    assert_eq!(record.to_write_map(), json!({"id": 7}).as_object().cloned().unwrap());

    record.set("status", json!("solved"));
    assert_eq!(keys(&record.to_write_map()), vec!["id", "status"]);
  }

  #[test]
  fn test_full_map_skips_nulls() {
    let record = ticket();
    record.set("subject", json!("a"));
    record.set("assignee_id", Value::Null);
    assert_eq!(keys(&record.to_full_map()), vec!["subject"]);
    assert_eq!(keys(&record.to_write_map()), vec!["subject"]);
  }

  #[test]
  fn test_set_unchanged_value_still_dirties() {
    let record = ticket();
    record.set("subject", json!("a"));
    record.mark_clean();
    record.set("subject", json!("a"));
    assert_eq!(record.dirty_fields(), vec!["subject"]);
  }

  #[test]
  fn test_mark_all_dirty() {
    let record = ticket();
    record.set("subject", json!("a"));
    record.set("status", json!("open"));
    record.mark_clean();
    assert!(!record.is_dirty());

    record.mark_all_dirty();
    assert_eq!(record.dirty_fields(), vec!["status", "subject"]);
  }

  #[test]
  fn test_shadow_names_are_normalised() {
    let record = ticket();
    record.set("_created_at", json!("2024-01-01T00:00:00Z"));
    assert!(record.to_full_map().contains_key("created_at"));
  }

  #[test]
  fn test_nested_record_dirties_parent() {
    let parent = ticket();
    let via = Record::new(KindSpec::new("Via", IdField::Id));
    via.set("channel", json!("web"));
    parent.set("via", via.clone());
    parent.mark_clean();
    assert!(!via.is_dirty());

    via.set("channel", json!("email"));
    assert_eq!(parent.dirty_fields(), vec!["via"]);
    assert_eq!(parent.to_write_map()["via"], json!({"channel": "email"}));
  }

  #[test]
  fn test_list_mutation_dirties_owner() {
    let record = ticket();
    record.set("tags", json!(["a", "b"]));
    record.mark_clean();

    let tags = record.list("tags").unwrap();
    tags.push(json!("c"));
    assert!(tags.is_dirty());
    assert_eq!(record.to_write_map()["tags"], json!(["a", "b", "c"]));
  }

  #[test]
  fn test_remove_counts_as_write() {
    let record = ticket();
    record.set("subject", json!("a"));
    record.mark_clean();
    assert!(record.remove("subject").is_some());
    assert_eq!(record.dirty_fields(), vec!["subject"]);
    assert!(!record.has("subject"));
  }

  #[test]
  fn test_datetime_accessor() {
    let record = ticket();
    record.set("created_at", json!("2024-03-01T12:30:00Z"));
    let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
    assert_eq!(record.datetime("created_at"), Some(expected));

    record.mark_clean();
    record.set_datetime("due_at", expected);
    assert_eq!(record.get_str("due_at").as_deref(), Some("2024-03-01T12:30:00Z"));
    assert_eq!(record.dirty_fields(), vec!["due_at"]);
  }

  #[test]
  fn test_related_accessor_uses_local_value() {
    let cache = CacheRegistry::new();
    let record = ticket();
    let user = Record::new(KindSpec::new("User", IdField::Id));
    user.set("id", json!(42));

    record.set_related("assignee", &user);
    assert_eq!(record.get_i64("assignee_id"), Some(42));
    assert!(record.dirty_fields().contains(&"assignee_id".to_string()));
    let resolved = record.related("assignee", "user", &cache).unwrap();
    assert!(resolved.ptr_eq(&user));
  }

  #[test]
  fn test_related_accessor_falls_back_to_cache() {
    let cache = CacheRegistry::new();
    let user = Record::new(KindSpec::new("User", IdField::Id));
    user.set("id", json!(5));
    cache.put(&user);

    let record = ticket();
    record.set("requester_id", json!(5));
    let resolved = record.related("requester", "user", &cache).unwrap();
    assert!(resolved.ptr_eq(&user));
    assert!(record.related("assignee", "user", &cache).is_none());
  }

  #[test]
  fn test_key_identifier_rule() {
    let field = Record::new(KindSpec::new("UserField", IdField::Key));
    field.set("id", json!(1));
    field.set("key", json!("shoe_size"));
    assert_eq!(field.cache_key().as_deref(), Some("shoe_size"));
  }
}
