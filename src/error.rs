//! Error type shared by every layer of the client.

use thiserror::Error;

use crate::transport::Response;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client.
///
/// Errors raised locally (mapping, cache typing, dispatch, type checks) are
/// never downgraded to an empty value; transport errors pass through
/// pagination and dispatch untouched.
#[derive(Debug, Error)]
pub enum Error {
  /// A payload referenced a kind the registry does not know, or a record was
  /// required where the payload held a plain value.
  #[error("cannot map `{kind}`: {reason}")]
  Mapping { kind: String, reason: String },

  /// Something other than a record was offered to the object cache.
  #[error("{0} cannot be stored in the object cache")]
  InvalidCacheItem(String),

  /// No response handler recognised the payload.
  #[error("unknown response: {0}")]
  UnknownResponse(String),

  /// A write was given a record of the wrong kind for its endpoint.
  #[error("expected `{expected}` records, got `{found}`")]
  TypeMismatch { expected: String, found: String },

  /// The API rejected the request.
  #[error("API returned {status}: {body}")]
  Api { status: u16, body: String },

  /// The API reported that the requested identifier does not exist.
  #[error("record not found: {body}")]
  RecordNotFound { body: String },

  /// Rate limited while the transport was told not to retry.
  #[error("rate limited, retry after {retry_after}s")]
  RateLimited {
    retry_after: u64,
    response: Box<Response>,
  },

  /// Rate limited more often than the configured retry budget allows.
  #[error("rate-limit retry budget of {budget} exhausted")]
  RetryBudgetExceeded { budget: u32 },

  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("config error: {0}")]
  Config(String),
}

impl Error {
  pub(crate) fn mapping(kind: impl Into<String>, reason: impl Into<String>) -> Self {
    Error::Mapping {
      kind: kind.into(),
      reason: reason.into(),
    }
  }

  /// Whether the remote reported a missing record, either directly or as a
  /// generic 404 rejection.
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      Error::RecordNotFound { .. } | Error::Api { status: 404, .. }
    )
  }
}
