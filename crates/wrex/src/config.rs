//! Connection settings for the Web of Science API.
//!
//! A [`ConnectionConfig`] holds the three things every request needs: where to
//! send it, which API key to authenticate with, and the default query
//! parameters (database, page size and starting offset). Configs are plain
//! values: every [`Query`] clones the config it was started with, so changing
//! a config afterwards never affects queries already in flight.
//!
//! # Examples
//!
//! ```
//! use wrex::ConnectionConfig;
//!
//! # fn example() -> Result<(), wrex::errors::WrexError> {
//! let config = ConnectionConfig::new("my-api-key")?.with_page_size(50);
//! assert_eq!(config.page_size()?, 50);
//! assert_eq!(config.base_url(), wrex::config::DEFAULT_API_URL);
//! # Ok(())
//! # }
//! ```

use std::{
  collections::BTreeMap,
  fmt,
  path::{Path, PathBuf},
};

use url::Url;

use super::*;

/// Default endpoint of the Web of Science Expanded API.
pub const DEFAULT_API_URL: &str = "https://wos-api.clarivate.com/api/wos";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "WOS_API_KEY";

/// Environment variable overriding the API base URL.
pub const API_URL_ENV: &str = "WOS_API_URL";

/// Name of the page size parameter.
pub const PAGE_SIZE_PARAM: &str = "count";

/// Name of the 1-based starting offset parameter.
pub const FIRST_RECORD_PARAM: &str = "firstRecord";

/// Name of the free-text search parameter.
pub const USER_QUERY_PARAM: &str = "usrQuery";

/// Everything needed to talk to the Web of Science API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
  /// Base URL of the API, without a trailing `/query/...` segment
  base_url:           String,
  /// Personal API key sent as `X-ApiKey`
  api_key:            String,
  /// Query parameters sent with every request unless overridden
  #[serde(default = "default_parameters")]
  default_parameters: BTreeMap<String, Value>,
}

/// The parameters used when none are given: the core collection, 100 records
/// per page, starting at the first record.
fn default_parameters() -> BTreeMap<String, Value> {
  BTreeMap::from([
    ("databaseId".to_string(), Value::from("WOS")),
    (PAGE_SIZE_PARAM.to_string(), Value::from(100)),
    (FIRST_RECORD_PARAM.to_string(), Value::from(1)),
  ])
}

impl ConnectionConfig {
  /// Creates a config for the default endpoint with the default parameters.
  ///
  /// # Errors
  ///
  /// Returns [`WrexError::MissingApiKey`] if `api_key` is blank.
  pub fn new(api_key: impl Into<String>) -> Result<Self, WrexError> {
    let api_key = api_key.into();
    if api_key.trim().is_empty() {
      return Err(WrexError::MissingApiKey);
    }
    Ok(Self {
      base_url: DEFAULT_API_URL.to_string(),
      api_key,
      default_parameters: default_parameters(),
    })
  }

  /// Points the config at a different endpoint.
  ///
  /// A trailing slash is dropped so that `/query/<id>` can be appended.
  pub fn with_base_url(mut self, base_url: &str) -> Result<Self, WrexError> {
    Url::parse(base_url)?;
    self.base_url = base_url.trim_end_matches('/').to_string();
    Ok(self)
  }

  /// Replaces all default parameters.
  pub fn with_parameters(mut self, parameters: BTreeMap<String, Value>) -> Self {
    self.default_parameters = parameters;
    self
  }

  /// Sets a single default parameter.
  pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.default_parameters.insert(name.into(), value.into());
    self
  }

  /// Sets the number of records requested per page.
  pub fn with_page_size(self, page_size: usize) -> Self {
    self.with_parameter(PAGE_SIZE_PARAM, page_size)
  }

  /// The API base URL.
  pub fn base_url(&self) -> &str { &self.base_url }

  /// The API key.
  pub fn api_key(&self) -> &str { &self.api_key }

  /// The default query parameters.
  pub fn default_parameters(&self) -> &BTreeMap<String, Value> { &self.default_parameters }

  /// The configured page size (`count`).
  ///
  /// # Errors
  ///
  /// Returns [`WrexError::Defaults`] when `count` is absent or not a positive
  /// integer.
  pub fn page_size(&self) -> Result<usize, WrexError> {
    let count = self
      .default_parameters
      .get(PAGE_SIZE_PARAM)
      .ok_or_else(|| WrexError::Defaults(format!("`{PAGE_SIZE_PARAM}` is not set")))?;

    count
      .as_u64()
      .or_else(|| count.as_str().and_then(|s| s.parse().ok()))
      .filter(|&n| n > 0)
      .map(|n| n as usize)
      .ok_or_else(|| WrexError::Defaults(format!("`{PAGE_SIZE_PARAM}` must be positive, got {count}")))
  }

  /// Renders the default parameters as string pairs, ready for a query string.
  pub fn query_parameters(&self) -> Vec<(String, String)> {
    render_parameters(&self.default_parameters)
  }

  /// Builds a config from `WOS_API_KEY` and, if set, `WOS_API_URL`.
  pub fn from_env() -> Result<Self, WrexError> {
    let api_key = std::env::var(API_KEY_ENV).map_err(|_| WrexError::MissingApiKey)?;
    let config = Self::new(api_key)?;
    match std::env::var(API_URL_ENV) {
      Ok(url) => config.with_base_url(&url),
      Err(_) => Ok(config),
    }
  }

  /// Default location of the config file in the user's config directory.
  pub fn default_path() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("wrex").join("config.json")
  }

  /// Loads a config previously written with [`ConnectionConfig::save`].
  pub fn load(path: impl AsRef<Path>) -> Result<Self, WrexError> {
    let path = path.as_ref();
    debug!("Loading connection config from {}", path.display());
    let config: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    if config.api_key.trim().is_empty() {
      return Err(WrexError::MissingApiKey);
    }
    Url::parse(&config.base_url)?;
    Ok(config)
  }

  /// Writes the config as pretty-printed JSON, creating parent directories.
  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), WrexError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(self)?)?;
    debug!("Saved connection config to {}", path.display());
    Ok(())
  }

  /// The API key with everything past the first four characters hidden.
  fn masked_key(&self) -> String {
    let visible: String = self.api_key.chars().take(4).collect();
    format!("{visible}****")
  }
}

/// Renders parameter values as plain strings: strings unquoted, everything
/// else in its JSON spelling.
pub fn render_parameters(parameters: &BTreeMap<String, Value>) -> Vec<(String, String)> {
  parameters
    .iter()
    .map(|(name, value)| {
      let value = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
      };
      (name.clone(), value)
    })
    .collect()
}

impl fmt::Display for ConnectionConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Connection to WOS REST API @ {}\nAPI Key = {}\nDefaults = {}",
      self.base_url,
      self.masked_key(),
      serde_json::to_string(&self.default_parameters).map_err(|_| fmt::Error)?
    )
  }
}
