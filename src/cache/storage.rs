//! Cache storage trait and its in-memory implementations.

use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use super::settings::{CachePolicy, CacheSettings};
use crate::record::Record;

/// An entry removed from a store, kept for migration into another.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: String,
  pub record: Record,
  /// When the record was first stored, for stores that track it.
  pub inserted_at: Option<Instant>,
}

impl CacheEntry {
  fn untimed((key, record): (String, Record)) -> Self {
    Self {
      key,
      record,
      inserted_at: None,
    }
  }
}

/// A keyed store of records for one kind.
///
/// Eviction is silent: a record may disappear between any two calls.
pub trait CacheStorage: Send {
  fn policy(&self) -> CachePolicy;

  /// Capacity, if bounded.
  fn max_size(&self) -> Option<usize>;

  fn get(&mut self, key: &str) -> Option<Record>;

  /// Insert or replace.
  fn insert(&mut self, key: String, record: Record);

  fn remove(&mut self, key: &str) -> Option<Record>;

  /// Number of live entries.
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Remove and return all live entries, least recently used first.
  fn drain(&mut self) -> Vec<CacheEntry>;

  /// Insert an entry drained from another store.
  fn restore(&mut self, entry: CacheEntry) {
    self.insert(entry.key, entry.record);
  }
}

/// Build an empty store for the given settings.
pub fn open_storage(settings: &CacheSettings) -> Box<dyn CacheStorage> {
  match settings.policy {
    CachePolicy::Lru => Box::new(LruStorage::new(settings.max_size)),
    CachePolicy::Ttl => Box::new(TtlStorage::new(settings.max_size, settings.ttl_duration())),
    CachePolicy::Unbounded => Box::new(UnboundedStorage::default()),
  }
}

fn capacity(max_size: usize) -> NonZeroUsize {
  NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN)
}

/// Size-bounded store evicting the least recently used entry.
pub struct LruStorage {
  entries: LruCache<String, Record>,
}

impl LruStorage {
  pub fn new(max_size: usize) -> Self {
    Self {
      entries: LruCache::new(capacity(max_size)),
    }
  }
}

impl CacheStorage for LruStorage {
  fn policy(&self) -> CachePolicy {
    CachePolicy::Lru
  }

  fn max_size(&self) -> Option<usize> {
    Some(self.entries.cap().get())
  }

  fn get(&mut self, key: &str) -> Option<Record> {
    self.entries.get(key).cloned()
  }

  fn insert(&mut self, key: String, record: Record) {
    self.entries.put(key, record);
  }

  fn remove(&mut self, key: &str) -> Option<Record> {
    self.entries.pop(key)
  }

  fn len(&self) -> usize {
    self.entries.len()
  }

  fn drain(&mut self) -> Vec<CacheEntry> {
    let mut drained = Vec::with_capacity(self.entries.len());
    while let Some(entry) = self.entries.pop_lru() {
      drained.push(CacheEntry::untimed(entry));
    }
    drained
  }
}

/// Size-bounded store whose entries expire a fixed time after insertion.
///
/// Expired entries are dropped lazily on access.
pub struct TtlStorage {
  entries: LruCache<String, (Record, Instant)>,
  ttl: Duration,
}

impl TtlStorage {
  pub fn new(max_size: usize, ttl: Duration) -> Self {
    Self {
      entries: LruCache::new(capacity(max_size)),
      ttl,
    }
  }

  fn is_live(&self, inserted_at: Instant) -> bool {
    inserted_at.elapsed() < self.ttl
  }
}

impl CacheStorage for TtlStorage {
  fn policy(&self) -> CachePolicy {
    CachePolicy::Ttl
  }

  fn max_size(&self) -> Option<usize> {
    Some(self.entries.cap().get())
  }

  fn get(&mut self, key: &str) -> Option<Record> {
    let inserted_at = self.entries.peek(key).map(|(_, at)| *at)?;
    if !self.is_live(inserted_at) {
      self.entries.pop(key);
      return None;
    }
    self.entries.get(key).map(|(record, _)| record.clone())
  }

  fn insert(&mut self, key: String, record: Record) {
    self.entries.put(key, (record, Instant::now()));
  }

  fn remove(&mut self, key: &str) -> Option<Record> {
    self.entries.pop(key).map(|(record, _)| record)
  }

  fn len(&self) -> usize {
    self
      .entries
      .iter()
      .filter(|(_, (_, at))| self.is_live(*at))
      .count()
  }

  fn drain(&mut self) -> Vec<CacheEntry> {
    let mut drained = Vec::with_capacity(self.entries.len());
    while let Some((key, (record, at))) = self.entries.pop_lru() {
      if self.is_live(at) {
        drained.push(CacheEntry {
          key,
          record,
          inserted_at: Some(at),
        });
      }
    }
    drained
  }

  /// Keeps the original insertion time so expiry is not reset.
  fn restore(&mut self, entry: CacheEntry) {
    let at = entry.inserted_at.unwrap_or_else(Instant::now);
    self.entries.put(entry.key, (entry.record, at));
  }
}

/// Plain map without eviction.
#[derive(Default)]
pub struct UnboundedStorage {
  entries: HashMap<String, Record>,
}

impl CacheStorage for UnboundedStorage {
  fn policy(&self) -> CachePolicy {
    CachePolicy::Unbounded
  }

  fn max_size(&self) -> Option<usize> {
    None
  }

  fn get(&mut self, key: &str) -> Option<Record> {
    self.entries.get(key).cloned()
  }

  fn insert(&mut self, key: String, record: Record) {
    self.entries.insert(key, record);
  }

  fn remove(&mut self, key: &str) -> Option<Record> {
    self.entries.remove(key)
  }

  fn len(&self) -> usize {
    self.entries.len()
  }

  fn drain(&mut self) -> Vec<CacheEntry> {
    self.entries.drain().map(CacheEntry::untimed).collect()
  }
}
