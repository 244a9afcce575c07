//! List and map containers that report mutations to their owner.
//!
//! Any structural change marks the container dirty and fires the owner's
//! callback. Nested plain arrays/objects are wrapped on first access and bound
//! back to the container, so a change at any depth reaches the root record.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use super::{DirtyCallback, FieldValue, View};
use crate::util::{lock, read, write};

struct ProxyInner<T> {
  items: RwLock<T>,
  dirty: AtomicBool,
  parent: Mutex<Option<DirtyCallback>>,
}

impl<T> ProxyInner<T> {
  fn new(items: T) -> Arc<Self> {
    Arc::new(Self {
      items: RwLock::new(items),
      dirty: AtomicBool::new(false),
      parent: Mutex::new(None),
    })
  }

  fn changed(&self) {
    self.dirty.store(true, Ordering::SeqCst);
    let callback = lock(&self.parent).clone();
    if let Some(callback) = callback {
      callback();
    }
  }
}

/// Build the callback a child element uses to reach its container.
fn element_callback<T: Send + Sync + 'static>(inner: &Arc<ProxyInner<T>>) -> DirtyCallback {
  let weak: Weak<ProxyInner<T>> = Arc::downgrade(inner);
  Arc::new(move || {
    if let Some(inner) = weak.upgrade() {
      inner.changed();
    }
  })
}

/// Wrap a raw container element in place and return the tracked value.
fn track_element(slot: &mut FieldValue, callback: DirtyCallback) -> FieldValue {
  if matches!(slot, FieldValue::Json(Value::Array(_) | Value::Object(_))) {
    let raw = std::mem::replace(slot, FieldValue::Json(Value::Null));
    *slot = raw.into_tracked();
  }
  slot.bind(callback);
  slot.clone()
}

// ============================================================================
// ProxyList
// ============================================================================

/// Dirty-tracking list stored in a record field.
#[derive(Clone)]
pub struct ProxyList {
  inner: Arc<ProxyInner<Vec<FieldValue>>>,
}

impl ProxyList {
  pub fn new() -> Self {
    Self::from_items(Vec::new())
  }

  pub fn from_values(values: Vec<Value>) -> Self {
    Self::from_items(values.into_iter().map(FieldValue::Json).collect())
  }

  pub fn from_items(items: Vec<FieldValue>) -> Self {
    let list = Self {
      inner: ProxyInner::new(Vec::new()),
    };
    let callback = list.callback();
    for item in &items {
      item.bind(callback.clone());
    }
    *write(&list.inner.items) = items;
    list
  }

  pub fn len(&self) -> usize {
    read(&self.inner.items).len()
  }

  pub fn is_empty(&self) -> bool {
    read(&self.inner.items).is_empty()
  }

  pub fn is_dirty(&self) -> bool {
    self.inner.dirty.load(Ordering::SeqCst)
  }

  /// Element at `index`; nested containers come back wrapped and bound here.
  pub fn get(&self, index: usize) -> Option<FieldValue> {
    let callback = self.callback();
    let mut items = write(&self.inner.items);
    items
      .get_mut(index)
      .map(|slot| track_element(slot, callback))
  }

  /// Replace the element at `index`, returning the previous value.
  /// Out-of-range indices leave the list untouched.
  pub fn set(&self, index: usize, value: impl Into<FieldValue>) -> Option<FieldValue> {
    let value = value.into();
    value.bind(self.callback());
    let previous = {
      let mut items = write(&self.inner.items);
      let slot = items.get_mut(index)?;
      std::mem::replace(slot, value)
    };
    self.inner.changed();
    Some(previous)
  }

  pub fn push(&self, value: impl Into<FieldValue>) {
    let value = value.into();
    value.bind(self.callback());
    write(&self.inner.items).push(value);
    self.inner.changed();
  }

  /// Insert before `index`; indices past the end append.
  pub fn insert(&self, index: usize, value: impl Into<FieldValue>) {
    let value = value.into();
    value.bind(self.callback());
    {
      let mut items = write(&self.inner.items);
      let index = index.min(items.len());
      items.insert(index, value);
    }
    self.inner.changed();
  }

  pub fn pop(&self) -> Option<FieldValue> {
    let popped = write(&self.inner.items).pop();
    if popped.is_some() {
      self.inner.changed();
    }
    popped
  }

  /// Delete the element at `index`.
  pub fn remove(&self, index: usize) -> Option<FieldValue> {
    let removed = {
      let mut items = write(&self.inner.items);
      (index < items.len()).then(|| items.remove(index))
    };
    if removed.is_some() {
      self.inner.changed();
    }
    removed
  }

  pub fn extend<I, V>(&self, values: I)
  where
    I: IntoIterator<Item = V>,
    V: Into<FieldValue>,
  {
    let callback = self.callback();
    let values: Vec<FieldValue> = values.into_iter().map(Into::into).collect();
    for value in &values {
      value.bind(callback.clone());
    }
    write(&self.inner.items).extend(values);
    self.inner.changed();
  }

  pub fn clear(&self) {
    write(&self.inner.items).clear();
    self.inner.changed();
  }

  /// Snapshot of the elements.
  pub fn to_vec(&self) -> Vec<FieldValue> {
    read(&self.inner.items).clone()
  }

  pub fn to_json(&self, view: View) -> Value {
    Value::Array(
      read(&self.inner.items)
        .iter()
        .map(|item| item.to_json(view))
        .collect(),
    )
  }

  pub fn mark_clean(&self) {
    self.inner.dirty.store(false, Ordering::SeqCst);
    for item in self.to_vec() {
      item.mark_clean();
    }
  }

  pub(crate) fn mark_all_dirty(&self) {
    self.inner.dirty.store(true, Ordering::SeqCst);
    for item in self.to_vec() {
      item.mark_all_dirty();
    }
  }

  pub(crate) fn bind_parent(&self, callback: DirtyCallback) {
    *lock(&self.inner.parent) = Some(callback);
  }

  fn callback(&self) -> DirtyCallback {
    element_callback(&self.inner)
  }
}

impl Default for ProxyList {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for ProxyList {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProxyList")
      .field("items", &self.to_json(View::Full))
      .field("dirty", &self.is_dirty())
      .finish()
  }
}

// ============================================================================
// ProxyMap
// ============================================================================

/// Dirty-tracking map stored in a record field.
#[derive(Clone)]
pub struct ProxyMap {
  inner: Arc<ProxyInner<BTreeMap<String, FieldValue>>>,
}

impl ProxyMap {
  pub fn new() -> Self {
    Self {
      inner: ProxyInner::new(BTreeMap::new()),
    }
  }

  pub fn from_values(values: Map<String, Value>) -> Self {
    let map = Self::new();
    *write(&map.inner.items) = values
      .into_iter()
      .map(|(key, value)| (key, FieldValue::Json(value)))
      .collect();
    map
  }

  pub fn len(&self) -> usize {
    read(&self.inner.items).len()
  }

  pub fn is_empty(&self) -> bool {
    read(&self.inner.items).is_empty()
  }

  pub fn is_dirty(&self) -> bool {
    self.inner.dirty.load(Ordering::SeqCst)
  }

  pub fn contains_key(&self, key: &str) -> bool {
    read(&self.inner.items).contains_key(key)
  }

  pub fn keys(&self) -> Vec<String> {
    read(&self.inner.items).keys().cloned().collect()
  }

  /// Value under `key`; nested containers come back wrapped and bound here.
  pub fn get(&self, key: &str) -> Option<FieldValue> {
    let callback = self.callback();
    let mut items = write(&self.inner.items);
    items
      .get_mut(key)
      .map(|slot| track_element(slot, callback))
  }

  pub fn insert(&self, key: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
    let value = value.into();
    value.bind(self.callback());
    let previous = write(&self.inner.items).insert(key.into(), value);
    self.inner.changed();
    previous
  }

  /// Delete `key`, returning its value.
  pub fn remove(&self, key: &str) -> Option<FieldValue> {
    let removed = write(&self.inner.items).remove(key);
    if removed.is_some() {
      self.inner.changed();
    }
    removed
  }

  /// Merge entries in, overwriting existing keys.
  pub fn extend<I, K, V>(&self, entries: I)
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<FieldValue>,
  {
    let callback = self.callback();
    {
      let mut items = write(&self.inner.items);
      for (key, value) in entries {
        let value = value.into();
        value.bind(callback.clone());
        items.insert(key.into(), value);
      }
    }
    self.inner.changed();
  }

  pub fn clear(&self) {
    write(&self.inner.items).clear();
    self.inner.changed();
  }

  pub fn to_json(&self, view: View) -> Value {
    Value::Object(
      read(&self.inner.items)
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json(view)))
        .collect(),
    )
  }

  pub fn mark_clean(&self) {
    self.inner.dirty.store(false, Ordering::SeqCst);
    for value in self.values() {
      value.mark_clean();
    }
  }

  pub(crate) fn mark_all_dirty(&self) {
    self.inner.dirty.store(true, Ordering::SeqCst);
    for value in self.values() {
      value.mark_all_dirty();
    }
  }

  pub(crate) fn bind_parent(&self, callback: DirtyCallback) {
    *lock(&self.inner.parent) = Some(callback);
  }

  fn values(&self) -> Vec<FieldValue> {
    read(&self.inner.items).values().cloned().collect()
  }

  fn callback(&self) -> DirtyCallback {
    element_callback(&self.inner)
  }
}

impl Default for ProxyMap {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for ProxyMap {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProxyMap")
      .field("items", &self.to_json(View::Full))
      .field("dirty", &self.is_dirty())
      .finish()
  }
}
