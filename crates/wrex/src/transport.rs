//! HTTP transport used by the retrieval engine.
//!
//! The engine only needs one operation from the network: send a `GET` with
//! some headers and query parameters and hand back the status code and body
//! text. That operation is the [`Transport`] trait, so tests (or callers that
//! want deadlines, proxies or recording) can substitute their own
//! implementation. [`ReqwestTransport`] is the production implementation.
//!
//! # Examples
//!
//! ```no_run
//! use wrex::transport::{ReqwestTransport, Transport};
//!
//! # async fn example() -> Result<(), wrex::errors::WrexError> {
//! let transport = ReqwestTransport::new();
//! let (status, body) = transport
//!   .send(
//!     "https://wos-api.clarivate.com/api/wos",
//!     &[("X-ApiKey", "my-api-key")],
//!     &[("databaseId".into(), "WOS".into()), ("usrQuery".into(), "TS=(graphene)".into())],
//!   )
//!   .await?;
//! println!("{status}: {} bytes", body.len());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use super::*;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-ApiKey";

/// Sends `GET` requests on behalf of the retrieval engine.
///
/// Implementations return `Ok` for every response that arrived, whatever its
/// status; mapping failure statuses to errors is the engine's job. `Err` is
/// reserved for requests that produced no response at all.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Issues `GET url` and returns `(status, body)`.
  async fn send(
    &self,
    url: &str,
    headers: &[(&str, &str)],
    params: &[(String, String)],
  ) -> Result<(u16, String), WrexError>;
}

/// [`Transport`] backed by a pooled [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
  /// Internal web client used to connect to the API.
  client: reqwest::Client,
}

impl ReqwestTransport {
  /// Creates a transport that identifies itself as `wrex/<version>`.
  pub fn new() -> Self {
    let client = reqwest::Client::builder()
      .user_agent(concat!("wrex/", env!("CARGO_PKG_VERSION")))
      .build()
      .unwrap_or_else(|e| {
        warn!("Falling back to a default HTTP client: {e}");
        reqwest::Client::new()
      });
    Self { client }
  }

  /// Uses an existing client, e.g. one configured with timeouts or a proxy.
  pub fn with_client(client: reqwest::Client) -> Self { Self { client } }
}

impl Default for ReqwestTransport {
  fn default() -> Self { Self::new() }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(
    &self,
    url: &str,
    headers: &[(&str, &str)],
    params: &[(String, String)],
  ) -> Result<(u16, String), WrexError> {
    debug!("GET {url} with {params:?}");

    let mut request = self.client.get(url).query(params);
    for (name, value) in headers {
      request = request.header(*name, *value);
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    debug!("Response status {status}, {} bytes", body.len());
    trace!("Response body: {body}");

    Ok((status, body))
  }
}
