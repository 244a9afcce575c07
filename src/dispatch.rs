//! Response dispatch: turn a completed response into the value callers see.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mapping::ObjectMapping;
use crate::pagination::ResultGenerator;
use crate::record::Record;
use crate::transport::{Method, Response, Transport};
use crate::util::{as_plural, as_singular};

/// Caller-facing shape of a dispatched response.
#[derive(Debug)]
pub enum ApiValue {
  Record(Record),
  Collection(ResultGenerator),
  Count(u64),
  Tags(Vec<String>),
  /// Success without a body; carries the status code.
  NoContent(u16),
}

impl ApiValue {
  fn shape(&self) -> &'static str {
    match self {
      ApiValue::Record(_) => "record",
      ApiValue::Collection(_) => "collection",
      ApiValue::Count(_) => "count",
      ApiValue::Tags(_) => "tags",
      ApiValue::NoContent(_) => "empty response",
    }
  }

  fn unexpected(&self, wanted: &str) -> Error {
    Error::UnknownResponse(format!("expected a {}, got a {}", wanted, self.shape()))
  }

  pub fn into_record(self) -> Result<Record> {
    match self {
      ApiValue::Record(record) => Ok(record),
      other => Err(other.unexpected("record")),
    }
  }

  pub fn into_collection(self) -> Result<ResultGenerator> {
    match self {
      ApiValue::Collection(generator) => Ok(generator),
      other => Err(other.unexpected("collection")),
    }
  }

  pub fn into_count(self) -> Result<u64> {
    match self {
      ApiValue::Count(count) => Ok(count),
      other => Err(other.unexpected("count")),
    }
  }

  pub fn into_tags(self) -> Result<Vec<String>> {
    match self {
      ApiValue::Tags(tags) => Ok(tags),
      other => Err(other.unexpected("tag list")),
    }
  }
}

/// One way of shaping a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHandler {
  Delete,
  Count,
  Tags,
  Search,
  Combination,
  Generic,
  HttpOk,
}

/// Handlers in the order they are tried; the first that applies wins.
pub const HANDLER_PRECEDENCE: [ResponseHandler; 7] = [
  // Bodyless DELETE replies would otherwise reach HttpOk, which is fine,
  // but deletes are matched by method before anything inspects the body.
  ResponseHandler::Delete,
  // Count and tag payloads carry `count`/`tags` keys that Generic would
  // misread as records or plain fields, so they are keyed on the URL first.
  // Count sits above Search so `/search/count.json` yields a number.
  ResponseHandler::Count,
  ResponseHandler::Tags,
  // Search results are polymorphic; each item names its own kind.
  ResponseHandler::Search,
  // A body holding both `ticket` and `audit` must become the bundle, not a
  // bare ticket, so this has to run before Generic.
  ResponseHandler::Combination,
  ResponseHandler::Generic,
  // Last: anything successful that had no JSON body.
  ResponseHandler::HttpOk,
];

impl ResponseHandler {
  pub fn applies_to(&self, response: &Response) -> bool {
    let path = response.path();
    match self {
      ResponseHandler::Delete => response.method == Method::Delete && response.json().is_none(),
      ResponseHandler::Count => path.ends_with("/count.json") || path.ends_with("/count"),
      ResponseHandler::Tags => {
        (path.ends_with("/tags.json") || path.ends_with("/tags")) && body_has(response, "tags")
      }
      ResponseHandler::Search => path.contains("/search") && body_has(response, "results"),
      ResponseHandler::Combination => body_has(response, "ticket") && body_has(response, "audit"),
      ResponseHandler::Generic => response.json().is_some_and(Value::is_object),
      ResponseHandler::HttpOk => response.is_success() && response.json().is_none(),
    }
  }

  fn build(&self, dispatcher: &ResponseDispatcher, response: &Response, kind: &str) -> Result<ApiValue> {
    match self {
      ResponseHandler::Delete | ResponseHandler::HttpOk => Ok(ApiValue::NoContent(response.status)),
      ResponseHandler::Count => {
        let count = match body(response)?.get("count") {
          Some(Value::Object(count)) => count.get("value").and_then(Value::as_u64),
          Some(count) => count.as_u64(),
          None => None,
        };
        count
          .map(ApiValue::Count)
          .ok_or_else(|| unknown(response, "count payload without a numeric value"))
      }
      ResponseHandler::Tags => {
        let tags = body(response)?
          .get("tags")
          .and_then(Value::as_array)
          .ok_or_else(|| unknown(response, "tags is not a list"))?;
        let tags = tags
          .iter()
          .map(|tag| {
            tag
              .as_str()
              .map(str::to_string)
              .ok_or_else(|| unknown(response, &format!("tag is not a string: {}", tag)))
          })
          .collect::<Result<Vec<_>>>()?;
        Ok(ApiValue::Tags(tags))
      }
      ResponseHandler::Search => dispatcher.collection("results", response),
      ResponseHandler::Combination => {
        let body = body(response)?;
        let bundle = Value::Object(
          ["ticket", "audit"]
            .into_iter()
            .filter_map(|key| Some((key.to_string(), body.get(key)?.clone())))
            .collect(),
        );
        let record = dispatcher.mapping.materialize_record("ticket_audit", &bundle)?;
        Ok(ApiValue::Record(record))
      }
      ResponseHandler::Generic => dispatcher.generic(response, kind),
    }
  }
}

fn body(response: &Response) -> Result<&Map<String, Value>> {
  response
    .json()
    .and_then(Value::as_object)
    .ok_or_else(|| unknown(response, "body is not a JSON object"))
}

fn body_has(response: &Response, key: &str) -> bool {
  response
    .json()
    .and_then(|body| body.get(key))
    .is_some_and(|value| !value.is_null())
}

fn unknown(response: &Response, reason: &str) -> Error {
  Error::UnknownResponse(format!(
    "{} {} ({}): {}",
    response.method,
    response.path(),
    response.status,
    reason
  ))
}

/// Picks a handler for each response and builds its value.
pub struct ResponseDispatcher {
  mapping: Arc<ObjectMapping>,
  transport: Arc<dyn Transport>,
}

impl ResponseDispatcher {
  pub fn new(mapping: Arc<ObjectMapping>, transport: Arc<dyn Transport>) -> Self {
    Self { mapping, transport }
  }

  /// First handler in precedence order that claims `response`.
  pub fn select(&self, response: &Response) -> Option<ResponseHandler> {
    HANDLER_PRECEDENCE
      .into_iter()
      .find(|handler| handler.applies_to(response))
  }

  /// Shape `response`, expecting records of `kind`.
  pub fn dispatch(&self, response: &Response, kind: &str) -> Result<ApiValue> {
    let handler = self
      .select(response)
      .ok_or_else(|| unknown(response, "no handler matched"))?;
    debug!(?handler, path = response.path(), status = response.status, "dispatching response");
    handler.build(self, response, kind)
  }

  fn collection(&self, result_key: &str, response: &Response) -> Result<ApiValue> {
    let page = response
      .json()
      .ok_or_else(|| unknown(response, "collection without a body"))?;
    let generator = ResultGenerator::new(
      Arc::clone(&self.mapping),
      Arc::clone(&self.transport),
      result_key,
      page,
    )?;
    Ok(ApiValue::Collection(generator))
  }

  /// Expected collection, then expected object, then any known object or
  /// collection in the body.
  fn generic(&self, response: &Response, kind: &str) -> Result<ApiValue> {
    let body = body(response)?;
    let kinds = self.mapping.kinds();

    let plural = as_plural(kind);
    if body.get(&plural).is_some_and(Value::is_array) {
      return self.collection(&plural, response);
    }
    if let Some(object) = body.get(kind).filter(|value| value.is_object()) {
      return self.mapping.materialize_record(kind, object).map(ApiValue::Record);
    }

    for (key, value) in body {
      if value.is_object() && kinds.contains(key) {
        return self.mapping.materialize_record(key, value).map(ApiValue::Record);
      }
    }
    for (key, value) in body {
      if value.is_array() && kinds.contains(&as_singular(key)) {
        return self.collection(key, response);
      }
    }

    Err(unknown(response, &format!("no `{}` payload", kind)))
  }
}
