use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

use crate::cache::CacheRegistry;
use crate::config::Config;
use crate::dispatch::{ApiValue, ResponseDispatcher};
use crate::endpoint::{self, Endpoint, ListOptions};
use crate::error::{Error, Result};
use crate::mapping::ObjectMapping;
use crate::pagination::ResultGenerator;
use crate::record::{KindRegistry, Record};
use crate::transport::{HttpTransport, Method, Transport};
use crate::util::as_plural;

/// Helpdesk API client
///
/// Owns one object cache; records fetched through one client are never
/// visible to another.
pub struct HelpdeskClient {
  base_url: String,
  transport: Arc<dyn Transport>,
  mapping: Arc<ObjectMapping>,
  dispatcher: ResponseDispatcher,
}

impl HelpdeskClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;

    let transport = HttpTransport::new(
      &config.helpdesk.email,
      token,
      config.timeout(),
      config.rate_limit,
    )?;

    Self::with_transport(
      &config.helpdesk.url,
      Arc::new(transport),
      config.cache_registry(),
    )
  }

  /// Client over any transport, e.g. a recording double in tests.
  pub fn with_transport(
    base_url: &str,
    transport: Arc<dyn Transport>,
    cache: CacheRegistry,
  ) -> Result<Self> {
    let parsed = Url::parse(base_url)
      .map_err(|e| Error::Config(format!("Invalid helpdesk url {}: {}", base_url, e)))?;
    let base_url = parsed.as_str().trim_end_matches('/').to_string();

    let mapping = Arc::new(ObjectMapping::new(
      Arc::new(KindRegistry::default()),
      Arc::new(cache),
    ));
    let dispatcher = ResponseDispatcher::new(Arc::clone(&mapping), Arc::clone(&transport));

    Ok(Self {
      base_url,
      transport,
      mapping,
      dispatcher,
    })
  }

  pub fn cache(&self) -> &CacheRegistry {
    self.mapping.cache()
  }

  pub fn kinds(&self) -> &KindRegistry {
    self.mapping.kinds()
  }

  fn call(&self, method: Method, path: &str, body: Option<&Value>, kind: &str) -> Result<ApiValue> {
    let url = format!("{}{}", self.base_url, path);
    let response = self.transport.send(method, &url, body)?;
    self.dispatcher.dispatch(&response, kind)
  }

  /// Get a single record, serving it from the cache when present
  pub fn get(&self, endpoint: &Endpoint, id: impl Display) -> Result<Record> {
    let key = id.to_string();
    if let Some(cached) = self.cache().get(endpoint.kind(), &key) {
      trace!(kind = endpoint.kind(), %key, "cache hit");
      return Ok(cached);
    }
    self
      .call(Method::Get, &endpoint.single(&key), None, endpoint.kind())?
      .into_record()
  }

  /// List every record of the endpoint, lazily
  pub fn list(&self, endpoint: &Endpoint) -> Result<ResultGenerator> {
    self.list_with(endpoint, &ListOptions::default())
  }

  pub fn list_with(&self, endpoint: &Endpoint, options: &ListOptions) -> Result<ResultGenerator> {
    self
      .call(Method::Get, &endpoint.collection_with(options), None, endpoint.kind())?
      .into_collection()
  }

  /// Fetch several records by id in one request
  pub fn show_many<T: Display>(&self, endpoint: &Endpoint, ids: &[T]) -> Result<ResultGenerator> {
    self
      .call(Method::Get, &endpoint.show_many(ids), None, endpoint.kind())?
      .into_collection()
  }

  /// Incremental export of records changed since `start_time`
  pub fn incremental(&self, endpoint: &Endpoint, start_time: DateTime<Utc>) -> Result<ResultGenerator> {
    self
      .call(Method::Get, &endpoint.incremental(start_time), None, endpoint.kind())?
      .into_collection()
  }

  pub fn count(&self, endpoint: &Endpoint) -> Result<u64> {
    self
      .call(Method::Get, &endpoint.count(), None, endpoint.kind())?
      .into_count()
  }

  pub fn tags(&self, endpoint: &Endpoint, id: impl Display) -> Result<Vec<String>> {
    self
      .call(Method::Get, &endpoint.tags(id), None, endpoint.kind())?
      .into_tags()
  }

  /// Search across kinds; each result carries its own kind
  pub fn search(&self, query: &str) -> Result<ResultGenerator> {
    self
      .call(Method::Get, &endpoint::search(query), None, "result")?
      .into_collection()
  }

  pub fn search_count(&self, query: &str) -> Result<u64> {
    self
      .call(Method::Get, &endpoint::search_count(query), None, "result")?
      .into_count()
  }

  /// Create a record from its dirty fields.
  ///
  /// Ticket creation answers with a ticket/audit bundle.
  pub fn create(&self, endpoint: &Endpoint, record: &Record) -> Result<Record> {
    check_kind(endpoint, std::slice::from_ref(record))?;
    let body = envelope(endpoint.kind(), Value::Object(record.to_write_map()));
    debug!(kind = endpoint.kind(), "creating record");
    self
      .call(Method::Post, &endpoint.collection(), Some(&body), endpoint.kind())?
      .into_record()
  }

  /// Create several records; answers with a job status
  pub fn create_many(&self, endpoint: &Endpoint, records: &[Record]) -> Result<Record> {
    check_kind(endpoint, records)?;
    let items = records
      .iter()
      .map(|record| Value::Object(record.to_write_map()))
      .collect();
    let body = envelope(&as_plural(endpoint.kind()), Value::Array(items));
    debug!(kind = endpoint.kind(), count = records.len(), "creating records");
    self
      .call(Method::Post, &endpoint.create_many(), Some(&body), endpoint.kind())?
      .into_record()
  }

  /// Send the record's dirty fields; the record is clean afterwards
  pub fn update(&self, endpoint: &Endpoint, record: &Record) -> Result<Record> {
    check_kind(endpoint, std::slice::from_ref(record))?;
    let id = identifier(record)?;
    let body = envelope(endpoint.kind(), Value::Object(record.to_write_map()));
    debug!(kind = endpoint.kind(), %id, "updating record");
    let updated = self
      .call(Method::Put, &endpoint.single(&id), Some(&body), endpoint.kind())?
      .into_record()?;
    record.mark_clean();
    Ok(updated)
  }

  /// Delete a record and evict it from the cache
  pub fn delete(&self, endpoint: &Endpoint, record: &Record) -> Result<()> {
    check_kind(endpoint, std::slice::from_ref(record))?;
    let id = identifier(record)?;
    debug!(kind = endpoint.kind(), %id, "deleting record");
    self.call(Method::Delete, &endpoint.single(&id), None, endpoint.kind())?;
    self.cache().delete(record);
    Ok(())
  }

  /// Delete several records; answers with a job status
  pub fn delete_many(&self, endpoint: &Endpoint, records: &[Record]) -> Result<Record> {
    check_kind(endpoint, records)?;
    let ids = records.iter().map(identifier).collect::<Result<Vec<_>>>()?;
    debug!(kind = endpoint.kind(), count = ids.len(), "deleting records");
    let job = self
      .call(Method::Delete, &endpoint.destroy_many(&ids), None, endpoint.kind())?
      .into_record()?;
    self.cache().delete_all(records);
    Ok(job)
  }

  /// Related record behind `<name>_id`, from the cache or the API
  pub fn related(&self, record: &Record, name: &str, kind: &str) -> Result<Option<Record>> {
    if let Some(found) = record.related(name, kind, self.cache()) {
      return Ok(Some(found));
    }
    match record.related_id(name) {
      Some(id) => self.get(&Endpoint::for_kind(kind), id).map(Some),
      None => Ok(None),
    }
  }
}

/// Every record must belong to the endpoint's kind before anything is sent.
fn check_kind(endpoint: &Endpoint, records: &[Record]) -> Result<()> {
  for record in records {
    if record.kind() != endpoint.kind() {
      return Err(Error::TypeMismatch {
        expected: endpoint.kind().to_string(),
        found: record.kind().to_string(),
      });
    }
  }
  Ok(())
}

fn identifier(record: &Record) -> Result<String> {
  record
    .cache_key()
    .ok_or_else(|| Error::mapping(record.kind(), "record has no identifier"))
}

fn envelope(key: &str, value: Value) -> Value {
  let mut body = Map::new();
  body.insert(key.to_string(), value);
  Value::Object(body)
}
