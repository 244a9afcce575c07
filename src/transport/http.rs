//! Blocking HTTP transport backed by reqwest.

use reqwest::blocking::Client;
use reqwest::header;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Method, Response, Transport};
use crate::error::{Error, Result};

/// Wait used when a 429 response carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// What to do when the API answers 429 Too Many Requests.
///
/// In config this is written `retry`, `raise` or `{ budget: N }`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "PolicyConfig")]
pub enum RateLimitPolicy {
  /// Sleep for the advertised delay and resend, indefinitely.
  #[default]
  Retry,
  /// Return `Error::RateLimited` immediately.
  Raise,
  /// Retry, but fail with `Error::RetryBudgetExceeded` once this many
  /// retries have been spent across every request of the transport.
  Budget(u32),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PolicyConfig {
  Mode(PolicyMode),
  Budget { budget: u32 },
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum PolicyMode {
  Retry,
  Raise,
}

impl From<PolicyConfig> for RateLimitPolicy {
  fn from(config: PolicyConfig) -> Self {
    match config {
      PolicyConfig::Mode(PolicyMode::Retry) => RateLimitPolicy::Retry,
      PolicyConfig::Mode(PolicyMode::Raise) => RateLimitPolicy::Raise,
      PolicyConfig::Budget { budget } => RateLimitPolicy::Budget(budget),
    }
  }
}

/// Transport issuing real HTTP requests with basic token authentication.
pub struct HttpTransport {
  http: Client,
  username: String,
  token: String,
  policy: RateLimitPolicy,
  /// Rate-limit retries spent so far, over the transport's lifetime.
  retries: AtomicU32,
}

impl HttpTransport {
  pub fn new(email: &str, token: String, timeout: Duration, policy: RateLimitPolicy) -> Result<Self> {
    let mut default_headers = header::HeaderMap::new();
    default_headers.insert(
      header::ACCEPT,
      header::HeaderValue::from_static("application/json"),
    );

    let http = Client::builder()
      .default_headers(default_headers)
      .user_agent(concat!("hdc/", env!("CARGO_PKG_VERSION")))
      .timeout(timeout)
      .build()?;

    Ok(Self {
      http,
      username: format!("{}/token", email),
      token,
      policy,
      retries: AtomicU32::new(0),
    })
  }

  /// Rate-limit retries spent so far.
  pub fn retries(&self) -> u32 {
    self.retries.load(Ordering::SeqCst)
  }

  fn execute(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response> {
    let method_value = match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    };

    let mut request = self
      .http
      .request(method_value, url)
      .basic_auth(&self.username, Some(&self.token));
    if let Some(body) = body {
      request = request.json(body);
    }

    debug!(%method, %url, "sending request");
    let reply = request.send()?;

    let status = reply.status().as_u16();
    let mut response = Response::new(method, url, status);
    for (name, value) in reply.headers() {
      if let Ok(value) = value.to_str() {
        response = response.with_header(name.as_str(), value);
      }
    }
    let text = reply.text()?;
    Ok(response.with_text(text))
  }

  /// Run `attempt` until it is not rate limited, as the policy allows.
  fn with_rate_limit<F>(&self, url: &str, mut attempt: F) -> Result<Response>
  where
    F: FnMut() -> Result<Response>,
  {
    loop {
      let response = attempt()?;
      if response.status != 429 {
        return response.error_for_status();
      }

      let wait = retry_after(&response);
      if self.policy == RateLimitPolicy::Raise {
        return Err(Error::RateLimited {
          retry_after: wait,
          response: Box::new(response),
        });
      }
      let spent = self.retries.fetch_add(1, Ordering::SeqCst);
      if let RateLimitPolicy::Budget(budget) = self.policy {
        if spent >= budget {
          return Err(Error::RetryBudgetExceeded { budget });
        }
      }

      warn!(%url, wait, retries = spent + 1, "rate limited, waiting before retry");
      thread::sleep(Duration::from_secs(wait));
    }
  }
}

/// Seconds to wait before resending a rate-limited request.
fn retry_after(response: &Response) -> u64 {
  response
    .header("retry-after")
    .and_then(|value| value.trim().parse().ok())
    .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

impl Transport for HttpTransport {
  fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response> {
    self.with_rate_limit(url, || self.execute(method, url, body))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::collections::VecDeque;

  fn transport(policy: RateLimitPolicy) -> HttpTransport {
    HttpTransport::new(
      "agent@example.com",
      "secret".into(),
      Duration::from_secs(5),
      policy,
    )
    .unwrap()
  }

  fn limited() -> Response {
    Response::new(Method::Get, "/x", 429).with_header("Retry-After", "0")
  }

  fn ok() -> Response {
    Response::new(Method::Get, "/x", 200).with_json(json!({"ok": true}))
  }

  /// Replay `replies` in order, counting attempts.
  fn replay(transport: &HttpTransport, replies: Vec<Response>) -> (Result<Response>, usize) {
    let mut replies = VecDeque::from(replies);
    let mut attempts = 0;
    let result = transport.with_rate_limit("/x", || {
      attempts += 1;
      Ok(replies.pop_front().unwrap())
    });
    (result, attempts)
  }

  #[test]
  fn test_retry_after_header() {
    let response = Response::new(Method::Get, "/x", 429).with_header("Retry-After", "12");
    assert_eq!(retry_after(&response), 12);
  }

  #[test]
  fn test_retry_after_default() {
    let response = Response::new(Method::Get, "/x", 429).with_header("Retry-After", "soon");
    assert_eq!(retry_after(&response), DEFAULT_RETRY_AFTER_SECS);
    let response = Response::new(Method::Get, "/x", 429);
    assert_eq!(retry_after(&response), DEFAULT_RETRY_AFTER_SECS);
  }

  #[test]
  fn test_policy_defaults_to_retry() {
    assert_eq!(RateLimitPolicy::default(), RateLimitPolicy::Retry);
  }

  #[test]
  fn test_policy_from_yaml() {
    let parse = |yaml: &str| serde_yaml::from_str::<RateLimitPolicy>(yaml).unwrap();
    assert_eq!(parse("retry"), RateLimitPolicy::Retry);
    assert_eq!(parse("raise"), RateLimitPolicy::Raise);
    assert_eq!(parse("{ budget: 3 }"), RateLimitPolicy::Budget(3));
    assert_eq!(parse("budget: 7"), RateLimitPolicy::Budget(7));
    assert!(serde_yaml::from_str::<RateLimitPolicy>("sometimes").is_err());
  }

  #[test]
  fn test_builds_basic_username() {
    let transport = transport(RateLimitPolicy::Raise);
    assert_eq!(transport.username, "agent@example.com/token");
    assert_eq!(transport.policy, RateLimitPolicy::Raise);
  }

  #[test]
  fn test_retry_resends_until_accepted() {
    let transport = transport(RateLimitPolicy::Retry);
    let (result, attempts) = replay(&transport, vec![limited(), limited(), ok()]);
    assert_eq!(result.unwrap().status, 200);
    assert_eq!(attempts, 3);
    assert_eq!(transport.retries(), 2);
  }

  #[test]
  fn test_raise_returns_delay_and_response() {
    let transport = transport(RateLimitPolicy::Raise);
    let limited = Response::new(Method::Get, "/x", 429).with_header("Retry-After", "17");
    let (result, attempts) = replay(&transport, vec![limited, ok()]);
    match result {
      Err(Error::RateLimited { retry_after, response }) => {
        assert_eq!(retry_after, 17);
        assert_eq!(response.status, 429);
      }
      other => panic!("expected RateLimited, got {:?}", other),
    }
    assert_eq!(attempts, 1);
  }

  #[test]
  fn test_budget_is_shared_across_requests() {
    let transport = transport(RateLimitPolicy::Budget(1));

    let (first, _) = replay(&transport, vec![limited(), ok()]);
    assert!(first.is_ok());
    assert_eq!(transport.retries(), 1);

    let (second, attempts) = replay(&transport, vec![limited(), ok()]);
    assert!(matches!(second, Err(Error::RetryBudgetExceeded { budget: 1 })));
    assert_eq!(attempts, 1);
  }

  #[test]
  fn test_budget_exhausted_within_one_request() {
    let transport = transport(RateLimitPolicy::Budget(2));
    let (result, attempts) = replay(&transport, vec![limited(), limited(), limited(), ok()]);
    assert!(matches!(result, Err(Error::RetryBudgetExceeded { budget: 2 })));
    assert_eq!(attempts, 3);
  }

  #[test]
  fn test_rejections_pass_through() {
    let transport = transport(RateLimitPolicy::Retry);
    let missing = Response::new(Method::Get, "/x", 404);
    let (result, _) = replay(&transport, vec![missing]);
    assert!(result.unwrap_err().is_not_found());
  }
}
