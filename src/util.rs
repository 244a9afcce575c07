//! Naming helpers and lock utilities.

use heck::ToSnakeCase;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Canonical kind tag for a record type name (`TicketAudit` -> `ticket_audit`).
pub fn kind_tag(type_name: &str) -> String {
  type_name.to_snake_case()
}

/// Singular form of a collection key (`tickets` -> `ticket`).
pub fn as_singular(key: &str) -> String {
  if let Some(stem) = key.strip_suffix("ies") {
    format!("{}y", stem)
  } else if let Some(stem) = key.strip_suffix("uses") {
    format!("{}us", stem)
  } else if let Some(stem) = key.strip_suffix("sses") {
    format!("{}ss", stem)
  } else if let Some(stem) = key.strip_suffix("xes") {
    format!("{}x", stem)
  } else if let Some(stem) = key.strip_suffix('s') {
    stem.to_string()
  } else {
    key.to_string()
  }
}

/// Plural form of a kind tag (`ticket` -> `tickets`, `sla_policy` -> `sla_policies`).
pub fn as_plural(kind: &str) -> String {
  let consonant_y = kind.strip_suffix('y').filter(|stem| {
    stem
      .chars()
      .last()
      .is_some_and(|c| !matches!(c, 'a' | 'e' | 'i' | 'o' | 'u'))
  });
  if let Some(stem) = consonant_y {
    format!("{}ies", stem)
  } else if kind.ends_with("us") || kind.ends_with("ss") || kind.ends_with('x') {
    format!("{}es", kind)
  } else {
    format!("{}s", kind)
  }
}

// The guarded data in this crate stays consistent across a panicking writer,
// so poisoned locks are entered rather than propagated.

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
  lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
  lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
