//! Transport seam between the client core and the network.
//!
//! The core hands the transport fully formed URLs and JSON bodies and gets
//! back a [`Response`]. Authentication, retries and rate-limit handling live
//! entirely behind this trait.

mod http;

pub use http::{HttpTransport, RateLimitPolicy};

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    };
    f.write_str(name)
  }
}

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct Response {
  pub method: Method,
  pub url: String,
  pub status: u16,
  /// Header names are lower-cased.
  pub headers: BTreeMap<String, String>,
  body: Option<Value>,
  raw: String,
}

impl Response {
  pub fn new(method: Method, url: impl Into<String>, status: u16) -> Self {
    Self {
      method,
      url: url.into(),
      status,
      headers: BTreeMap::new(),
      body: None,
      raw: String::new(),
    }
  }

  pub fn with_json(mut self, body: Value) -> Self {
    self.raw = body.to_string();
    self.body = Some(body);
    self
  }

  /// Attach a raw body, parsed as JSON when possible.
  pub fn with_text(mut self, raw: impl Into<String>) -> Self {
    self.raw = raw.into();
    self.body = serde_json::from_str(&self.raw).ok();
    self
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  /// Parsed JSON body; `None` for empty or non-JSON bodies.
  pub fn json(&self) -> Option<&Value> {
    self.body.as_ref()
  }

  pub fn text(&self) -> &str {
    &self.raw
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Path component of the request URL.
  pub fn path(&self) -> &str {
    let without_scheme = self
      .url
      .split_once("://")
      .map(|(_, rest)| rest)
      .unwrap_or(&self.url);
    let path_start = without_scheme.find('/').unwrap_or(without_scheme.len());
    let path = &without_scheme[path_start..];
    path.split(['?', '#']).next().unwrap_or(path)
  }

  /// Turn non-2xx responses into errors; 404 becomes `RecordNotFound`.
  pub fn error_for_status(self) -> Result<Self> {
    match self.status {
      200..=299 => Ok(self),
      404 => Err(Error::RecordNotFound { body: self.raw }),
      status => Err(Error::Api {
        status,
        body: self.raw,
      }),
    }
  }
}

/// Issues HTTP requests for the client.
pub trait Transport: Send + Sync {
  /// Perform one logical request. Implementations return `Err` for
  /// rejected requests and handle any retrying themselves.
  fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response>;

  fn get(&self, url: &str) -> Result<Response> {
    self.send(Method::Get, url, None)
  }
}
