//! Per-kind cache registry shared by the mapper and the client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, trace};

use super::settings::{default_layout, CachePolicy, CacheSettings};
use super::storage::{open_storage, CacheStorage};
use crate::error::{Error, Result};
use crate::record::{FieldValue, IdField, Record};
use crate::util::{lock, read, write};

/// Cache instance for one kind.
struct TypedCache {
  id_field: IdField,
  storage: Mutex<Box<dyn CacheStorage>>,
}

impl TypedCache {
  fn new(kind: &str, settings: &CacheSettings) -> Self {
    Self {
      id_field: IdField::for_kind(kind),
      storage: Mutex::new(open_storage(settings)),
    }
  }

  fn key_of(&self, record: &Record) -> Option<String> {
    record
      .get(self.id_field.name())?
      .as_json()
      .and_then(crate::record::cache_key_of)
  }
}

/// Registry mapping a kind tag to its bounded cache.
///
/// One registry belongs to one client; separate clients never share entries.
/// Each kind's store sits behind its own lock so callers on several threads
/// can populate and evict concurrently.
pub struct CacheRegistry {
  caches: RwLock<HashMap<String, Arc<TypedCache>>>,
  disabled: AtomicBool,
}

impl CacheRegistry {
  /// Registry with the default per-kind layout.
  pub fn new() -> Self {
    let registry = Self::empty();
    for (kind, settings) in default_layout() {
      registry.configure(kind, &settings);
    }
    registry
  }

  /// Registry that caches nothing until kinds are configured.
  pub fn empty() -> Self {
    Self {
      caches: RwLock::new(HashMap::new()),
      disabled: AtomicBool::new(false),
    }
  }

  fn cache_for(&self, kind: &str) -> Option<Arc<TypedCache>> {
    if self.is_disabled() {
      return None;
    }
    read(&self.caches).get(kind).cloned()
  }

  /// Cached record for `(kind, key)`, if any.
  pub fn get(&self, kind: &str, key: impl ToString) -> Option<Record> {
    let cache = self.cache_for(kind)?;
    let record = lock(&cache.storage).get(&key.to_string());
    record
  }

  /// Cached instance sharing `record`'s kind and identifier.
  pub fn get_by_record(&self, record: &Record) -> Option<Record> {
    let cache = self.cache_for(record.kind())?;
    let key = cache.key_of(record)?;
    let cached = lock(&cache.storage).get(&key);
    cached
  }

  pub fn contains(&self, kind: &str, key: impl ToString) -> bool {
    self.get(kind, key).is_some()
  }

  /// Insert or replace `record` under its kind and identifier.
  ///
  /// Records of uncached kinds, or without an identifier, are skipped.
  pub fn put(&self, record: &Record) {
    let Some(cache) = self.cache_for(record.kind()) else {
      return;
    };
    let Some(key) = cache.key_of(record) else {
      return;
    };
    trace!(kind = record.kind(), %key, "caching record");
    lock(&cache.storage).insert(key, record.clone());
  }

  /// Store a field value, which must hold a record.
  pub fn put_value(&self, value: &FieldValue) -> Result<()> {
    match value {
      FieldValue::Record(record) => {
        self.put(record);
        Ok(())
      }
      FieldValue::Json(json) if json.is_null() => Err(Error::InvalidCacheItem("null".into())),
      FieldValue::Json(json) => Err(Error::InvalidCacheItem(format!("plain value {}", json))),
      FieldValue::List(_) => Err(Error::InvalidCacheItem("list".into())),
      FieldValue::Map(_) => Err(Error::InvalidCacheItem("map".into())),
    }
  }

  /// Evict `record`; absent entries are ignored.
  pub fn delete(&self, record: &Record) {
    let Some(cache) = self.cache_for(record.kind()) else {
      return;
    };
    if let Some(key) = cache.key_of(record) {
      trace!(kind = record.kind(), %key, "evicting record");
      lock(&cache.storage).remove(&key);
    }
  }

  pub fn delete_all(&self, records: &[Record]) {
    for record in records {
      self.delete(record);
    }
  }

  /// Set or replace the store for `kind`, carrying over current entries.
  pub fn configure(&self, kind: &str, settings: &CacheSettings) {
    let replacement = TypedCache::new(kind, settings);
    let mut caches = write(&self.caches);
    if let Some(existing) = caches.get(kind) {
      let entries = lock(&existing.storage).drain();
      debug!(
        kind,
        policy = settings.policy.name(),
        migrated = entries.len(),
        "replacing cache store"
      );
      let mut storage = lock(&replacement.storage);
      for entry in entries {
        storage.restore(entry);
      }
      drop(storage);
    } else {
      debug!(kind, policy = settings.policy.name(), "creating cache store");
    }
    caches.insert(kind.to_string(), Arc::new(replacement));
  }

  /// Drop every entry of `kind`.
  pub fn purge(&self, kind: &str) {
    if let Some(cache) = read(&self.caches).get(kind) {
      lock(&cache.storage).drain();
    }
  }

  pub fn policy(&self, kind: &str) -> Option<CachePolicy> {
    read(&self.caches)
      .get(kind)
      .map(|cache| lock(&cache.storage).policy())
  }

  pub fn max_size(&self, kind: &str) -> Option<usize> {
    read(&self.caches)
      .get(kind)
      .and_then(|cache| lock(&cache.storage).max_size())
  }

  /// Live entries cached for `kind`.
  pub fn len(&self, kind: &str) -> usize {
    read(&self.caches)
      .get(kind)
      .map(|cache| lock(&cache.storage).len())
      .unwrap_or(0)
  }

  /// Kinds with a configured store.
  pub fn kinds(&self) -> Vec<String> {
    let mut kinds: Vec<String> = read(&self.caches).keys().cloned().collect();
    kinds.sort();
    kinds
  }

  /// Stop serving and storing records. Existing entries are kept.
  pub fn disable(&self) {
    self.disabled.store(true, Ordering::SeqCst);
  }

  pub fn enable(&self) {
    self.disabled.store(false, Ordering::SeqCst);
  }

  pub fn is_disabled(&self) -> bool {
    self.disabled.load(Ordering::SeqCst)
  }
}

impl Default for CacheRegistry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::{KindSpec, Ticket, User};
  use serde_json::json;
  use std::thread;
  use std::time::Duration;

  fn ticket(id: i64) -> Record {
    let ticket = Ticket::new();
    ticket.set_id(id);
    ticket.into_record()
  }

  #[test]
  fn test_put_then_get_returns_same_instance() {
    let cache = CacheRegistry::new();
    let record = ticket(1);
    cache.put(&record);
    assert!(cache.get("ticket", 1).unwrap().ptr_eq(&record));
    assert!(cache.get_by_record(&record).unwrap().ptr_eq(&record));
  }

  #[test]
  fn test_last_put_wins() {
    let cache = CacheRegistry::new();
    let first = ticket(1);
    let second = ticket(1);
    cache.put(&first);
    cache.put(&second);
    assert!(cache.get("ticket", 1).unwrap().ptr_eq(&second));
    assert_eq!(cache.len("ticket"), 1);
  }

  #[test]
  fn test_get_miss_is_none() {
    let cache = CacheRegistry::new();
    assert!(cache.get("ticket", 404).is_none());
    assert!(cache.get("spaceship", 1).is_none());
  }

  #[test]
  fn test_put_value_rejects_non_records() {
    let cache = CacheRegistry::new();
    let err = cache.put_value(&FieldValue::Json(json!(null))).unwrap_err();
    assert!(matches!(err, Error::InvalidCacheItem(_)));
    assert!(cache.put_value(&FieldValue::Json(json!({"id": 1}))).is_err());
    assert!(cache.put_value(&FieldValue::Record(ticket(2))).is_ok());
    assert!(cache.contains("ticket", 2));
  }

  #[test]
  fn test_records_without_id_or_uncached_kind_are_skipped() {
    let cache = CacheRegistry::new();
    cache.put(&Ticket::new().into_record());
    assert_eq!(cache.len("ticket"), 0);

    let via = Record::new(KindSpec::new("Via", IdField::Id));
    via.set("id", json!(1));
    cache.put(&via);
    assert!(cache.get("via", 1).is_none());
  }

  #[test]
  fn test_key_rule_for_field_definitions() {
    let cache = CacheRegistry::new();
    let field = Record::new(KindSpec::new("UserField", IdField::Key));
    field.set("id", json!(77));
    field.set("key", json!("shoe_size"));
    cache.put(&field);
    assert!(cache.get("user_field", "shoe_size").is_some());
    assert!(cache.get("user_field", 77).is_none());
  }

  #[test]
  fn test_delete_single_and_many() {
    let cache = CacheRegistry::new();
    let records: Vec<Record> = (1..=3).map(ticket).collect();
    for record in &records {
      cache.put(record);
    }
    cache.delete(&records[0]);
    assert!(!cache.contains("ticket", 1));

    cache.delete_all(&records);
    assert_eq!(cache.len("ticket"), 0);

    // Absent keys are a no-op.
    cache.delete(&records[0]);
  }

  #[test]
  fn test_configure_migrates_entries() {
    let cache = CacheRegistry::new();
    let records: Vec<Record> = (1..=5).map(ticket).collect();
    for record in &records {
      cache.put(record);
    }
    cache.configure("ticket", &CacheSettings::lru(100));
    assert_eq!(cache.policy("ticket"), Some(CachePolicy::Lru));
    assert_eq!(cache.len("ticket"), 5);
    assert!(cache.get("ticket", 3).unwrap().ptr_eq(&records[2]));
  }

  #[test]
  fn test_configure_shrink_keeps_most_recent() {
    let cache = CacheRegistry::empty();
    cache.configure("ticket", &CacheSettings::lru(10));
    for id in 1..=4 {
      cache.put(&ticket(id));
    }
    cache.configure("ticket", &CacheSettings::lru(2));
    assert_eq!(cache.max_size("ticket"), Some(2));
    assert!(cache.contains("ticket", 3));
    assert!(cache.contains("ticket", 4));
    assert!(!cache.contains("ticket", 1));
  }

  #[test]
  fn test_configure_keeps_ttl_age() {
    let cache = CacheRegistry::empty();
    cache.configure("ticket", &CacheSettings::ttl(10, 3));
    cache.put(&ticket(1));
    thread::sleep(Duration::from_millis(1100));

    cache.configure("ticket", &CacheSettings::ttl(10, 1));
    assert!(!cache.contains("ticket", 1));
  }

  #[test]
  fn test_disable_and_enable() {
    let cache = CacheRegistry::new();
    cache.put(&ticket(1));
    cache.disable();
    assert!(cache.get("ticket", 1).is_none());
    cache.put(&ticket(2));
    cache.enable();
    assert!(cache.contains("ticket", 1));
    assert!(!cache.contains("ticket", 2));
  }

  #[test]
  fn test_purge() {
    let cache = CacheRegistry::new();
    cache.put(&ticket(1));
    cache.purge("ticket");
    assert_eq!(cache.len("ticket"), 0);
    assert_eq!(cache.policy("ticket"), Some(CachePolicy::Ttl));
  }

  #[test]
  fn test_registries_are_isolated() {
    let a = CacheRegistry::new();
    let b = CacheRegistry::new();
    a.put(&ticket(1));
    assert!(b.get("ticket", 1).is_none());
  }

  #[test]
  fn test_concurrent_population() {
    let cache = Arc::new(CacheRegistry::new());
    let handles: Vec<_> = (0..4)
      .map(|worker| {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
          for i in 0..50 {
            let user = User::new();
            user.set_id(worker * 1000 + i);
            cache.put(user.record());
          }
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }
    assert_eq!(cache.len("user"), 200);
  }
}
