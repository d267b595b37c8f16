//! Error types for the wrex library.
//!
//! This module provides a single error type that covers every way an operation
//! against the Web of Science API can fail, including:
//! - HTTP status failures reported by the service
//! - Network and transport errors
//! - Responses whose JSON does not have the expected shape
//! - Configuration problems
//!
//! Missing fields inside a record are deliberately *not* errors; they are
//! reported as data through [`FieldMap::missing`](crate::fields::FieldMap::missing).
//!
//! # Examples
//!
//! ```no_run
//! use wrex::{errors::WrexError, ConnectionConfig, ReqwestTransport};
//!
//! # async fn example() -> Result<(), WrexError> {
//! let config = ConnectionConfig::new("my-api-key")?;
//! match wrex::start_query(&ReqwestTransport::new(), &config, "TS=(graphene)").await {
//!   Err(e) if e.is_rate_limited() => println!("Slow down: {e}"),
//!   Err(WrexError::Forbidden(msg)) => println!("Check your API key: {msg}"),
//!   Err(e) => return Err(e),
//!   Ok(mut query) => println!("{}", query.status()),
//! }
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

/// Errors that can occur when working with the wrex library.
///
/// The first five variants correspond one-to-one with the failure status codes
/// the Web of Science API documents. Each carries the message the service sent
/// back so it can be shown to the user verbatim.
#[derive(Error, Debug)]
pub enum WrexError {
  /// The service rejected the request with status 400.
  ///
  /// This usually means the query string uses a field tag the service does
  /// not know, or has unbalanced parentheses.
  #[error(
    "Query returned status code 400: \"Bad request\"\nResponse message: {0}\n\nCheck your query \
     structure to make sure you have correctly defined fields!"
  )]
  BadRequest(String),

  /// The service rejected the request with status 403.
  ///
  /// The API key is missing, wrong, or not entitled to the requested database.
  #[error(
    "Query returned status code 403: \"Forbidden\"\nResponse message: {0}\n\nHave you set the \
     correct API key?"
  )]
  Forbidden(String),

  /// The service answered with status 404.
  #[error("Query returned status code 404: \"Not found\"\nResponse message: {0}")]
  NotFound(String),

  /// The service throttled the request with status 429.
  ///
  /// This is the only status a caller is expected to retry, after backing off.
  /// The retrieval engine itself never retries.
  #[error(
    "Query returned status code 429: \"Throttle error\"\nResponse message: {0}\n\nCheck whether \
     you are hitting the API a lot at once!"
  )]
  RateLimited(String),

  /// The service failed internally with status 500.
  #[error("Query returned status code 500: \"Internal server error\"\nResponse message: {0}")]
  ServerError(String),

  /// Any other non-success status code.
  #[error("Query returned unexpected status code {status}\nResponse message: {message}")]
  UnexpectedStatus {
    /// The HTTP status code
    status:  u16,
    /// The message body sent by the service
    message: String,
  },

  /// A network request failed before a status code was received.
  ///
  /// This can occur when:
  /// - The network is unavailable
  /// - The server is unreachable
  /// - The request times out
  /// - TLS/SSL errors occur
  #[error(transparent)]
  Network(#[from] reqwest::Error),

  /// A response body was not valid JSON.
  #[error(transparent)]
  Json(#[from] serde_json::Error),

  /// A response body was valid JSON but lacked the structure every page must
  /// have (query counts, a record list, or a record UID).
  #[error("Malformed response: {0}")]
  MalformedResponse(String),

  /// A configured base URL could not be parsed.
  #[error(transparent)]
  InvalidUrl(#[from] url::ParseError),

  /// Reading or writing a configuration or export file failed.
  #[error(transparent)]
  Io(#[from] std::io::Error),

  /// The default query parameters are unusable, e.g. `count` is not a
  /// positive integer.
  #[error("Invalid default parameters: {0}")]
  Defaults(String),

  /// No API key was configured.
  #[error("No API key configured, set WOS_API_KEY or run `wrex init`")]
  MissingApiKey,
}

impl WrexError {
  /// Maps a failure status code and body onto the matching error variant.
  ///
  /// The Web of Science API sends error bodies of the form
  /// `{"message": "..."}`; when the body has that shape the message is
  /// extracted, otherwise the raw body is kept.
  pub fn from_status(status: u16, body: &str) -> Self {
    let message = serde_json::from_str::<serde_json::Value>(body)
      .ok()
      .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
      .unwrap_or_else(|| body.to_owned());

    match status {
      400 => WrexError::BadRequest(message),
      403 => WrexError::Forbidden(message),
      404 => WrexError::NotFound(message),
      429 => WrexError::RateLimited(message),
      500 => WrexError::ServerError(message),
      status => WrexError::UnexpectedStatus { status, message },
    }
  }

  /// Checks if this error is a throttling response.
  ///
  /// Callers use this to decide whether to wait and re-issue the request:
  ///
  /// ```
  /// use wrex::errors::WrexError;
  ///
  /// let err = WrexError::from_status(429, r#"{"message": "Too many requests"}"#);
  /// assert!(err.is_rate_limited());
  /// ```
  pub fn is_rate_limited(&self) -> bool { matches!(self, WrexError::RateLimited(_)) }
}
