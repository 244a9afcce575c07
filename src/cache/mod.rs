//! In-process object cache.
//!
//! This module keeps recently materialized records so repeated lookups skip
//! the network:
//! - One bounded store per kind (LRU, TTL or unbounded), each behind its own lock
//! - Identifier extraction per kind (`id`, or `key` for field definitions)
//! - Policy swaps at runtime without losing entries
//! - Nothing is persisted; the cache lives as long as its client

mod layer;
mod settings;
mod storage;

pub use layer::CacheRegistry;
pub use settings::{CachePolicy, CacheSettings};
pub use storage::{CacheEntry, CacheStorage, LruStorage, TtlStorage, UnboundedStorage};
