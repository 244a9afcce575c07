//! Policy and sizing types for the object cache.

use serde::Deserialize;
use std::time::Duration;

/// Default capacity of a per-kind store.
pub const DEFAULT_MAX_SIZE: usize = 10_000;

/// Default lifetime of an entry in a TTL store.
pub const DEFAULT_TTL_SECS: u64 = 30;

/// Eviction policy of a per-kind store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
  /// Size-bounded, least recently used entry evicted first.
  Lru,
  /// Size-bounded, entries expire after a fixed lifetime.
  Ttl,
  /// Plain map without eviction.
  Unbounded,
}

impl CachePolicy {
  pub fn name(&self) -> &'static str {
    match self {
      CachePolicy::Lru => "lru",
      CachePolicy::Ttl => "ttl",
      CachePolicy::Unbounded => "unbounded",
    }
  }
}

/// How one kind is cached.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheSettings {
  pub policy: CachePolicy,
  #[serde(default = "default_max_size")]
  pub max_size: usize,
  /// Entry lifetime for TTL stores
  #[serde(default)]
  pub ttl_secs: Option<u64>,
}

fn default_max_size() -> usize {
  DEFAULT_MAX_SIZE
}

impl CacheSettings {
  pub fn lru(max_size: usize) -> Self {
    Self {
      policy: CachePolicy::Lru,
      max_size,
      ttl_secs: None,
    }
  }

  pub fn ttl(max_size: usize, ttl_secs: u64) -> Self {
    Self {
      policy: CachePolicy::Ttl,
      max_size,
      ttl_secs: Some(ttl_secs),
    }
  }

  pub fn unbounded() -> Self {
    Self {
      policy: CachePolicy::Unbounded,
      max_size: DEFAULT_MAX_SIZE,
      ttl_secs: None,
    }
  }

  /// Entry lifetime, falling back to the default for TTL stores.
  pub fn ttl_duration(&self) -> Duration {
    Duration::from_secs(self.ttl_secs.unwrap_or(DEFAULT_TTL_SECS))
  }
}

/// Cache layout used when nothing is configured.
pub(crate) fn default_layout() -> Vec<(&'static str, CacheSettings)> {
  vec![
    ("user", CacheSettings::lru(DEFAULT_MAX_SIZE)),
    ("organization", CacheSettings::lru(DEFAULT_MAX_SIZE)),
    ("group", CacheSettings::lru(DEFAULT_MAX_SIZE)),
    ("brand", CacheSettings::lru(DEFAULT_MAX_SIZE)),
    ("ticket", CacheSettings::ttl(DEFAULT_MAX_SIZE, DEFAULT_TTL_SECS)),
    ("request", CacheSettings::lru(DEFAULT_MAX_SIZE)),
    ("ticket_field", CacheSettings::lru(DEFAULT_MAX_SIZE)),
    ("sharing_agreement", CacheSettings::ttl(DEFAULT_MAX_SIZE, 6000)),
    ("identity", CacheSettings::lru(DEFAULT_MAX_SIZE)),
    ("user_field", CacheSettings::lru(DEFAULT_MAX_SIZE)),
    ("organization_field", CacheSettings::lru(DEFAULT_MAX_SIZE)),
    ("audit", CacheSettings::lru(DEFAULT_MAX_SIZE)),
  ]
}
