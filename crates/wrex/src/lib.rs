//! A library for retrieving complete result sets from the Web of Science API
//! and exporting them in the tagged text format used by bibliometric tools.
//!
//! The API hands out search results a page at a time, does not guarantee that
//! pages are consistent with each other, and returns records as deeply nested
//! documents whose node shapes vary from record to record. This crate
//! - pages through a search until every reported record has been seen
//!   ([`Query::retrieve_all`]), deduplicating by record UID and giving up
//!   cleanly when the service stops producing new records,
//! - flattens each record into a fixed set of two-letter [`FieldCode`]s
//!   ([`normalize()`]), recording what could not be found instead of failing,
//! - writes the result as a tagged text file ([`export()`]).
//!
//! # Example
//! ```rust,no_run
//! use wrex::{start_query, ConnectionConfig, ReqwestTransport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!   let config = ConnectionConfig::from_env()?;
//!   let transport = ReqwestTransport::new();
//!
//!   let mut query = start_query(&transport, &config, "TS=(metamaterials) AND PY=2019").await?;
//!   query.retrieve_all(&transport, None).await?;
//!
//!   for record in &query {
//!     println!("{record}");
//!   }
//!   query.write_export("savedrecs.txt", false).await?;
//!
//!   Ok(())
//! }
//! ```

#![warn(missing_docs, clippy::missing_docs_in_private_items)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, trace, warn};
#[cfg(test)] use tracing_test::traced_test;

pub mod config;
pub mod errors;
pub mod export;
pub mod extract;
pub mod fields;
pub mod normalize;
pub mod query;
pub mod record;
pub mod transport;

pub use config::ConnectionConfig;
use errors::WrexError;
pub use export::export;
pub use fields::{FieldCode, FieldMap, FieldValue};
pub use normalize::normalize;
pub use query::{fetch_by_id, start_query, Page, PageKind, Query, QueryState, QueryStatus};
pub use record::Record;
pub use transport::{ReqwestTransport, Transport};
