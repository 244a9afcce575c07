//! Lazy, forward-only iteration over paginated collections.

use chrono::Utc;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::mapping::ObjectMapping;
use crate::record::Record;
use crate::transport::Transport;
use crate::util::as_singular;

/// Incremental exports refuse start times this close to the present.
pub const INCREMENTAL_WINDOW_SECS: i64 = 5 * 60;

/// Result of one pull from a [`ResultGenerator`].
#[derive(Debug)]
pub enum Pull {
  Item(Record),
  EndOfStream,
}

/// Where a generator stands between pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
  HasBufferedItems,
  NeedsNextPage,
  Exhausted,
}

/// Pull-based stream over a paginated collection.
///
/// Items are materialized one at a time in server order. When the buffered
/// page runs out the generator follows the page's continuation (offset
/// `next_page`, cursor `links.next` or incremental `after_url`) with exactly
/// one fetch. Once exhausted, or after any error, it stays exhausted.
pub struct ResultGenerator {
  mapping: Arc<ObjectMapping>,
  transport: Arc<dyn Transport>,
  result_key: String,
  buffer: Vec<Value>,
  position: usize,
  continuation: Option<String>,
  end_time: Option<i64>,
  count: Option<u64>,
  exhausted: bool,
}

impl ResultGenerator {
  /// Start from the first page, whose items sit under `result_key`.
  pub fn new(
    mapping: Arc<ObjectMapping>,
    transport: Arc<dyn Transport>,
    result_key: impl Into<String>,
    page: &Value,
  ) -> Result<Self> {
    let mut generator = Self {
      mapping,
      transport,
      result_key: result_key.into(),
      buffer: Vec::new(),
      position: 0,
      continuation: None,
      end_time: None,
      count: None,
      exhausted: false,
    };
    generator.load_page(page)?;
    Ok(generator)
  }

  pub fn result_key(&self) -> &str {
    &self.result_key
  }

  /// Size of the currently buffered page, not of the remote collection.
  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }

  /// Total reported by the payload itself, when it carries one.
  pub fn reported_count(&self) -> Option<u64> {
    self.count
  }

  /// `end_time` of the last incremental page, as a unix timestamp.
  pub fn end_time(&self) -> Option<i64> {
    self.end_time
  }

  pub fn state(&self) -> PageState {
    if self.exhausted {
      PageState::Exhausted
    } else if self.position < self.buffer.len() {
      PageState::HasBufferedItems
    } else {
      PageState::NeedsNextPage
    }
  }

  /// Next record, fetching the following page when the buffer is spent.
  pub fn pull(&mut self) -> Result<Pull> {
    let pulled = self.advance();
    if pulled.is_err() {
      self.exhausted = true;
    }
    pulled
  }

  fn advance(&mut self) -> Result<Pull> {
    loop {
      if self.exhausted {
        return Ok(Pull::EndOfStream);
      }

      if let Some(item) = self.buffer.get(self.position) {
        self.position += 1;
        let kind = item_kind(item, &self.result_key);
        return self.mapping.materialize_record(&kind, item).map(Pull::Item);
      }

      if self.window_closed() {
        debug!(
          result_key = %self.result_key,
          end_time = ?self.end_time,
          "stopping: incremental window reached the present"
        );
        self.exhausted = true;
        continue;
      }

      match self.continuation.take() {
        Some(url) => self.fetch(&url)?,
        None => {
          trace!(result_key = %self.result_key, "stream exhausted");
          self.exhausted = true;
        }
      }
    }
  }

  fn fetch(&mut self, url: &str) -> Result<()> {
    debug!(%url, result_key = %self.result_key, "fetching next page");
    let response = self.transport.get(url)?;
    let page = response
      .json()
      .ok_or_else(|| Error::UnknownResponse(format!("page at {} has no JSON body", url)))?;
    self.load_page(page)
  }

  fn load_page(&mut self, page: &Value) -> Result<()> {
    let object = page.as_object().ok_or_else(|| {
      Error::UnknownResponse(format!("expected a `{}` page object", self.result_key))
    })?;

    self.buffer = match object.get(&self.result_key) {
      Some(Value::Array(items)) => items.clone(),
      _ => Vec::new(),
    };
    self.position = 0;
    self.continuation = continuation(object);
    if let Some(end_time) = object.get("end_time").and_then(Value::as_i64) {
      self.end_time = Some(end_time);
    }
    if let Some(count) = object.get("count").and_then(Value::as_u64) {
      self.count = Some(count);
    }

    self.mapping.materialize_sideloads(object, &self.result_key)?;
    trace!(
      result_key = %self.result_key,
      items = self.buffer.len(),
      has_more = self.continuation.is_some(),
      "loaded page"
    );
    Ok(())
  }

  /// Advancing would request a start time inside the forbidden window.
  fn window_closed(&self) -> bool {
    self
      .end_time
      .is_some_and(|end_time| Utc::now().timestamp() - end_time < INCREMENTAL_WINDOW_SECS)
  }
}

/// Per-item kind: an explicit `result_type`, else the singular result key.
fn item_kind(item: &Value, result_key: &str) -> String {
  match item.get("result_type").and_then(Value::as_str) {
    Some(kind) => kind.to_string(),
    None => as_singular(result_key),
  }
}

fn continuation(page: &Map<String, Value>) -> Option<String> {
  let url = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_string);

  if page.get("end_of_stream").and_then(Value::as_bool) == Some(true) {
    return None;
  }
  if let Some(next) = url(page.get("after_url")) {
    return Some(next);
  }
  let has_more = page
    .get("meta")
    .and_then(|meta| meta.get("has_more"))
    .and_then(Value::as_bool);
  match has_more {
    Some(true) => url(page.get("links").and_then(|links| links.get("next"))),
    Some(false) => None,
    None => url(page.get("next_page")),
  }
}

impl Iterator for ResultGenerator {
  type Item = Result<Record>;

  fn next(&mut self) -> Option<Self::Item> {
    match self.pull() {
      Ok(Pull::Item(record)) => Some(Ok(record)),
      Ok(Pull::EndOfStream) => None,
      Err(e) => Some(Err(e)),
    }
  }
}

impl fmt::Debug for ResultGenerator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultGenerator")
      .field("result_key", &self.result_key)
      .field("buffered", &self.buffer.len())
      .field("position", &self.position)
      .field("continuation", &self.continuation)
      .field("state", &self.state())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheRegistry;
  use crate::record::KindRegistry;
  use crate::transport::testing::FakeTransport;
  use serde_json::json;

  fn mapping() -> Arc<ObjectMapping> {
    Arc::new(ObjectMapping::new(
      Arc::new(KindRegistry::default()),
      Arc::new(CacheRegistry::new()),
    ))
  }

  fn tickets(ids: &[i64]) -> Value {
    Value::Array(ids.iter().map(|id| json!({"id": id})).collect())
  }

  fn ids(generator: ResultGenerator) -> Vec<i64> {
    generator
      .map(|record| record.unwrap().get_i64("id").unwrap())
      .collect()
  }

  #[test]
  fn test_single_page_yields_then_ends() {
    let transport = Arc::new(FakeTransport::new());
    let page = json!({"tickets": tickets(&[1, 2, 3]), "next_page": null, "count": 3});
    let mut generator = ResultGenerator::new(mapping(), transport.clone(), "tickets", &page).unwrap();

    assert_eq!(generator.len(), 3);
    assert_eq!(generator.reported_count(), Some(3));
    assert_eq!(generator.state(), PageState::HasBufferedItems);
    for _ in 0..3 {
      assert!(matches!(generator.pull().unwrap(), Pull::Item(_)));
    }
    assert!(matches!(generator.pull().unwrap(), Pull::EndOfStream));
    assert!(matches!(generator.pull().unwrap(), Pull::EndOfStream));
    assert_eq!(generator.state(), PageState::Exhausted);
    assert!(transport.requests().is_empty());
  }

  #[test]
  fn test_reported_count_reads_payload_without_fetching() {
    let transport = Arc::new(FakeTransport::new());
    let page = json!({"tickets": tickets(&[1]), "next_page": "/api/v2/tickets.json?page=2", "count": 4000});
    let generator = ResultGenerator::new(mapping(), transport.clone(), "tickets", &page).unwrap();

    assert_eq!(generator.reported_count(), Some(4000));
    assert_eq!(generator.reported_count(), Some(4000));
    assert_eq!(generator.len(), 1);
    assert_eq!(generator.state(), PageState::HasBufferedItems);
    assert!(transport.requests().is_empty());
  }

  #[test]
  fn test_follows_next_page() {
    let transport = Arc::new(FakeTransport::new());
    transport.reply(200, json!({"tickets": tickets(&[3]), "next_page": null}));
    let page = json!({"tickets": tickets(&[1, 2]), "next_page": "https://acme.example.com/api/v2/tickets.json?page=2"});
    let generator = ResultGenerator::new(mapping(), transport.clone(), "tickets", &page).unwrap();

    assert_eq!(ids(generator), vec![1, 2, 3]);
    assert_eq!(
      transport.urls(),
      vec!["https://acme.example.com/api/v2/tickets.json?page=2"]
    );
  }

  #[test]
  fn test_empty_page_with_continuation_fetches() {
    let transport = Arc::new(FakeTransport::new());
    transport.reply(200, json!({"tickets": tickets(&[7])}));
    let page = json!({"tickets": [], "next_page": "/api/v2/tickets.json?page=2"});
    let mut generator = ResultGenerator::new(mapping(), transport.clone(), "tickets", &page).unwrap();

    assert!(generator.is_empty());
    assert_eq!(generator.state(), PageState::NeedsNextPage);
    let first = generator.next().unwrap().unwrap();
    assert_eq!(first.get_i64("id"), Some(7));
    assert!(generator.next().is_none());
  }

  #[test]
  fn test_cursor_pagination() {
    let transport = Arc::new(FakeTransport::new());
    transport.reply(
      200,
      json!({"tickets": tickets(&[2]), "meta": {"has_more": false}, "links": {"next": "/ignored"}}),
    );
    let page = json!({
      "tickets": tickets(&[1]),
      "meta": {"has_more": true, "after_cursor": "abc"},
      "links": {"next": "/api/v2/tickets.json?page[after]=abc"}
    });
    let generator = ResultGenerator::new(mapping(), transport.clone(), "tickets", &page).unwrap();
    assert_eq!(ids(generator), vec![1, 2]);
    assert_eq!(transport.urls(), vec!["/api/v2/tickets.json?page[after]=abc"]);
  }

  #[test]
  fn test_incremental_end_of_stream() {
    let transport = Arc::new(FakeTransport::new());
    let page = json!({
      "tickets": tickets(&[1]),
      "after_url": "/api/v2/incremental/tickets/cursor.json?cursor=x",
      "end_of_stream": true
    });
    let generator = ResultGenerator::new(mapping(), transport.clone(), "tickets", &page).unwrap();
    assert_eq!(ids(generator), vec![1]);
    assert!(transport.requests().is_empty());
  }

  #[test]
  fn test_time_window_guard_stops_recent_pages() {
    let transport = Arc::new(FakeTransport::new());
    let page = json!({
      "tickets": tickets(&[1, 2]),
      "next_page": "/api/v2/incremental/tickets.json?start_time=123",
      "end_time": Utc::now().timestamp()
    });
    let generator = ResultGenerator::new(mapping(), transport.clone(), "tickets", &page).unwrap();
    assert_eq!(ids(generator), vec![1, 2]);
    assert!(transport.requests().is_empty());
  }

  #[test]
  fn test_time_window_guard_allows_old_pages() {
    let transport = Arc::new(FakeTransport::new());
    transport.reply(200, json!({"tickets": tickets(&[2]), "end_time": Utc::now().timestamp()}));
    let page = json!({
      "tickets": tickets(&[1]),
      "next_page": "/api/v2/incremental/tickets.json?start_time=123",
      "end_time": Utc::now().timestamp() - 3600
    });
    let generator = ResultGenerator::new(mapping(), transport.clone(), "tickets", &page).unwrap();
    assert_eq!(ids(generator), vec![1, 2]);
    assert_eq!(transport.requests().len(), 1);
  }

  #[test]
  fn test_fetch_failure_propagates_and_exhausts() {
    let transport = Arc::new(FakeTransport::new());
    transport.reply(500, json!({"error": "boom"}));
    let page = json!({"tickets": tickets(&[1]), "next_page": "/api/v2/tickets.json?page=2"});
    let mut generator = ResultGenerator::new(mapping(), transport, "tickets", &page).unwrap();

    assert!(generator.next().unwrap().is_ok());
    let err = generator.next().unwrap().unwrap_err();
    assert!(matches!(err, Error::Api { status: 500, .. }));
    assert!(generator.next().is_none());
    assert_eq!(generator.state(), PageState::Exhausted);
  }

  #[test]
  fn test_item_kind_from_result_type() {
    let transport = Arc::new(FakeTransport::new());
    let page = json!({
      "results": [
        {"id": 1, "result_type": "ticket"},
        {"id": 2, "result_type": "user"}
      ]
    });
    let generator = ResultGenerator::new(mapping(), transport, "results", &page).unwrap();
    let kinds: Vec<String> = generator
      .map(|record| record.unwrap().kind().to_string())
      .collect();
    assert_eq!(kinds, vec!["ticket", "user"]);
  }

  #[test]
  fn test_items_and_sideloads_are_cached() {
    let mapping = mapping();
    let transport = Arc::new(FakeTransport::new());
    let page = json!({"tickets": tickets(&[1]), "users": [{"id": 5}]});
    let mut generator =
      ResultGenerator::new(Arc::clone(&mapping), transport, "tickets", &page).unwrap();
    assert!(mapping.cache().contains("user", 5));

    let ticket = generator.next().unwrap().unwrap();
    assert!(mapping.cache().get("ticket", 1).unwrap().ptr_eq(&ticket));
  }

  #[test]
  fn test_non_object_page_is_rejected() {
    let transport = Arc::new(FakeTransport::new());
    let err = ResultGenerator::new(mapping(), transport, "tickets", &json!([1, 2])).unwrap_err();
    assert!(matches!(err, Error::UnknownResponse(_)));
  }
}
