//! URL building for REST resources.
//!
//! Endpoints only produce paths and query strings; the client prefixes the
//! instance base URL. Continuation URLs handed back by the server are never
//! rebuilt here.

use chrono::{DateTime, Utc};
use std::fmt::Display;
use url::form_urlencoded;

use crate::util::as_plural;

const API_ROOT: &str = "/api/v2";

/// Sideloads and ordering for collection requests.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
  /// Related collections to sideload (`users`, `organizations`, ...).
  pub include: Vec<String>,
  pub sort_by: Option<String>,
  pub sort_order: Option<SortOrder>,
  pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
  Asc,
  Desc,
}

impl SortOrder {
  fn as_str(self) -> &'static str {
    match self {
      SortOrder::Asc => "asc",
      SortOrder::Desc => "desc",
    }
  }
}

impl ListOptions {
  pub fn include(mut self, sideload: impl Into<String>) -> Self {
    self.include.push(sideload.into());
    self
  }

  pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
    self.sort_by = Some(field.into());
    self.sort_order = Some(order);
    self
  }

  pub fn per_page(mut self, per_page: u32) -> Self {
    self.per_page = Some(per_page);
    self
  }

  fn params(&self) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if !self.include.is_empty() {
      params.push(("include", self.include.join(",")));
    }
    if let Some(sort_by) = &self.sort_by {
      params.push(("sort_by", sort_by.clone()));
    }
    if let Some(order) = self.sort_order {
      params.push(("sort_order", order.as_str().to_string()));
    }
    if let Some(per_page) = self.per_page {
      params.push(("per_page", per_page.to_string()));
    }
    params
  }
}

/// A REST resource serving records of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
  kind: String,
  path: String,
}

impl Endpoint {
  /// Resource at `path` (without `.json`), e.g. `/api/v2/tickets`.
  pub fn new(kind: impl Into<String>, path: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      path: path.into(),
    }
  }

  /// Conventional resource for `kind`: `/api/v2/<plural>`.
  pub fn for_kind(kind: &str) -> Self {
    Self::new(kind, format!("{}/{}", API_ROOT, as_plural(kind)))
  }

  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn path(&self) -> &str {
    &self.path
  }

  pub fn collection(&self) -> String {
    format!("{}.json", self.path)
  }

  pub fn collection_with(&self, options: &ListOptions) -> String {
    with_query(self.collection(), &options.params())
  }

  pub fn single(&self, id: impl Display) -> String {
    format!("{}/{}.json", self.path, id)
  }

  pub fn count(&self) -> String {
    format!("{}/count.json", self.path)
  }

  pub fn tags(&self, id: impl Display) -> String {
    format!("{}/{}/tags.json", self.path, id)
  }

  pub fn show_many<T: Display>(&self, ids: &[T]) -> String {
    with_query(format!("{}/show_many.json", self.path), &[("ids", join_ids(ids))])
  }

  pub fn create_many(&self) -> String {
    format!("{}/create_many.json", self.path)
  }

  pub fn destroy_many<T: Display>(&self, ids: &[T]) -> String {
    with_query(format!("{}/destroy_many.json", self.path), &[("ids", join_ids(ids))])
  }

  /// Incremental export starting at `start_time`.
  pub fn incremental(&self, start_time: DateTime<Utc>) -> String {
    with_query(
      format!("{}/incremental/{}.json", API_ROOT, as_plural(&self.kind)),
      &[("start_time", start_time.timestamp().to_string())],
    )
  }
}

/// Search across kinds.
pub fn search(query: &str) -> String {
  with_query(format!("{}/search.json", API_ROOT), &[("query", query.to_string())])
}

pub fn search_count(query: &str) -> String {
  with_query(format!("{}/search/count.json", API_ROOT), &[("query", query.to_string())])
}

fn join_ids<T: Display>(ids: &[T]) -> String {
  ids
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join(",")
}

fn with_query(path: String, params: &[(&str, String)]) -> String {
  if params.is_empty() {
    return path;
  }
  let query = form_urlencoded::Serializer::new(String::new())
    .extend_pairs(params.iter())
    .finish();
  format!("{}?{}", path, query)
}
