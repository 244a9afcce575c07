use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheRegistry, CacheSettings};
use crate::error::{Error, Result};
use crate::transport::RateLimitPolicy;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub helpdesk: HelpdeskConfig,
  #[serde(default)]
  pub rate_limit: RateLimitPolicy,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelpdeskConfig {
  /// Instance base URL, e.g. https://acme.zendesk.com
  pub url: String,
  pub email: String,
  /// Request timeout enforced by the transport
  pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Turn the object cache off entirely
  #[serde(default)]
  pub disabled: bool,
  /// Per-kind store overrides, keyed by kind tag
  #[serde(default)]
  pub kinds: BTreeMap<String, CacheSettings>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./hdc.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/hdc/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Config(format!("Config file not found: {}", p.display())));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(Error::Config(
        "No configuration file found. Create one at ~/.config/hdc/config.yaml".into(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("hdc.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("hdc").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

    Self::from_yaml(&contents)
      .map_err(|e| Error::Config(format!("Failed to parse config file {}: {}", path.display(), e)))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.helpdesk.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
  }

  /// Cache registry with the default layout plus configured overrides.
  pub fn cache_registry(&self) -> CacheRegistry {
    let registry = CacheRegistry::new();
    for (kind, settings) in &self.cache.kinds {
      registry.configure(kind, settings);
    }
    if self.cache.disabled {
      registry.disable();
    }
    registry
  }

  /// Get the API token from environment variables.
  ///
  /// Checks HDC_API_TOKEN first, then HELPDESK_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("HDC_API_TOKEN")
      .or_else(|_| std::env::var("HELPDESK_API_TOKEN"))
      .map_err(|_| {
        Error::Config(
          "API token not found. Set HDC_API_TOKEN or HELPDESK_API_TOKEN environment variable."
            .into(),
        )
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CachePolicy;

  #[test]
  fn test_minimal_config() {
    let config = Config::from_yaml(
      "helpdesk:\n  url: https://acme.zendesk.com\n  email: agent@acme.com\n",
    )
    .unwrap();
    assert_eq!(config.helpdesk.email, "agent@acme.com");
    assert_eq!(config.rate_limit, RateLimitPolicy::Retry);
    assert_eq!(config.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    assert!(!config.cache.disabled);

    let registry = config.cache_registry();
    assert_eq!(registry.policy("ticket"), Some(CachePolicy::Ttl));
    assert_eq!(registry.policy("user"), Some(CachePolicy::Lru));
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
helpdesk:
  url: https://acme.zendesk.com
  email: agent@acme.com
  timeout_secs: 5
rate_limit: { budget: 3 }
cache:
  kinds:
    ticket:
      policy: lru
      max_size: 50
    brand:
      policy: unbounded
    group:
      policy: ttl
      ttl_secs: 120
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.timeout(), Duration::from_secs(5));
    assert_eq!(config.rate_limit, RateLimitPolicy::Budget(3));

    let registry = config.cache_registry();
    assert_eq!(registry.policy("ticket"), Some(CachePolicy::Lru));
    assert_eq!(registry.max_size("ticket"), Some(50));
    assert_eq!(registry.policy("brand"), Some(CachePolicy::Unbounded));
    assert_eq!(registry.policy("group"), Some(CachePolicy::Ttl));
  }

  #[test]
  fn test_raise_and_disabled_cache() {
    let yaml = r#"
helpdesk:
  url: https://acme.zendesk.com
  email: agent@acme.com
rate_limit: raise
cache:
  disabled: true
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.rate_limit, RateLimitPolicy::Raise);
    assert!(config.cache_registry().is_disabled());
  }

  #[test]
  fn test_missing_fields_is_config_error() {
    let err = Config::from_yaml("helpdesk:\n  url: x\n").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
  }

  #[test]
  fn test_explicit_missing_path() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(matches!(err, Error::Config(msg) if msg.contains("not found")));
  }
}
