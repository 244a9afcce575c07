//! Client core for a helpdesk REST API.
//!
//! Payloads are materialized into [`Record`]s that track which fields were
//! written locally, collections are walked lazily through
//! [`ResultGenerator`], and every record fetched passes through a per-client
//! [`CacheRegistry`].

pub mod cache;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod mapping;
pub mod pagination;
pub mod record;
pub mod transport;
pub mod util;

pub use cache::{CachePolicy, CacheRegistry, CacheSettings};
pub use client::HelpdeskClient;
pub use config::Config;
pub use dispatch::{ApiValue, ResponseDispatcher, ResponseHandler};
pub use endpoint::{Endpoint, ListOptions, SortOrder};
pub use error::{Error, Result};
pub use mapping::{Materialized, ObjectMapping};
pub use pagination::{PageState, Pull, ResultGenerator};
pub use record::{FieldValue, KindRegistry, ProxyList, ProxyMap, Record};
pub use transport::{HttpTransport, Method, RateLimitPolicy, Response, Transport};
