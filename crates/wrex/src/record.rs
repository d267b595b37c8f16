//! Records returned by the Web of Science API.
//!
//! A [`Record`] owns the raw JSON document exactly as the service returned it.
//! A few convenience attributes (title, year, author names) are pulled out
//! once when the record is created; the full canonical [`FieldMap`] is
//! computed lazily the first time it is asked for and cached afterwards.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use wrex::{FieldCode, Record};
//!
//! # fn example() -> Result<(), wrex::errors::WrexError> {
//! let mut record = Record::new(json!({
//!   "UID": "WOS:000000000000001",
//!   "static_data": {"summary": {
//!     "titles": {"title": {"type": "item", "content": "A single title"}},
//!     "pub_info": {"pubyear": 2021}
//!   }}
//! }))?;
//!
//! assert_eq!(record.title, "A single title");
//! assert_eq!(record.year, Some(2021));
//! assert!(record.fields().missing().contains(&FieldCode::Doi));
//!
//! // Recompute the cached fields on demand
//! let fields = record.regenerate();
//! assert!(fields.contains(FieldCode::EndOfRecord));
//! # Ok(())
//! # }
//! ```

use std::{fmt, sync::OnceLock};

use super::*;
use crate::extract::{dict_from, list_from, lookup, scalar_text};

/// A lazily computed value that can be thrown away and recomputed.
#[derive(Debug, Clone, Default)]
pub struct FieldCache {
  /// The cached map, if computed
  cell: OnceLock<FieldMap>,
}

impl FieldCache {
  /// Returns the cached map, computing it with `compute` if empty.
  pub fn get_or_compute(&self, compute: impl FnOnce() -> FieldMap) -> &FieldMap {
    self.cell.get_or_init(compute)
  }

  /// Whether a map is currently cached.
  pub fn is_cached(&self) -> bool { self.cell.get().is_some() }

  /// Drops the cached map so the next access recomputes it.
  pub fn invalidate(&mut self) { self.cell = OnceLock::new(); }
}

/// One bibliographic record.
#[derive(Debug, Clone)]
pub struct Record {
  /// The service-assigned unique identifier (`UID`), used for deduplication
  pub uid:     String,
  /// The item title, empty if the record has none
  pub title:   String,
  /// The publication year, if present
  pub year:    Option<i64>,
  /// Full names of the authors, in order
  pub authors: Vec<String>,
  /// The record document as returned by the service
  raw:         Value,
  /// Canonical fields, computed on first use
  fields:      FieldCache,
}

impl Record {
  /// Wraps a raw record document.
  ///
  /// Only `UID` is required; every other convenience attribute falls back to
  /// an empty value when the document does not carry it.
  ///
  /// # Errors
  ///
  /// Returns [`WrexError::MalformedResponse`] when the document has no
  /// textual `UID`.
  pub fn new(raw: Value) -> Result<Self, WrexError> {
    let uid = raw
      .get("UID")
      .and_then(Value::as_str)
      .ok_or_else(|| WrexError::MalformedResponse("record without a UID".into()))?
      .to_string();

    let summary = lookup(&raw, &["static_data", "summary"]).ok();

    let title = summary
      .and_then(|s| lookup(s, &["titles", "title"]).ok())
      .and_then(|t| dict_from(t, "type", "content").ok())
      .and_then(|titles| titles.get("item").and_then(|t| scalar_text(t).ok()))
      .unwrap_or_default();

    let year = summary.and_then(|s| lookup(s, &["pub_info", "pubyear"]).ok()).and_then(|y| {
      y.as_i64().or_else(|| y.as_str().and_then(|s| s.trim().parse().ok()))
    });

    let authors: Vec<String> = summary
      .and_then(|s| lookup(s, &["names", "name"]).ok())
      .and_then(|n| list_from(n, Some("full_name")).ok())
      .map(|names| names.into_iter().filter_map(|n| scalar_text(n).ok()).collect())
      .unwrap_or_default();

    trace!("Parsed record {uid}: {title:?} ({year:?})");

    Ok(Self { uid, title, year, authors, raw, fields: FieldCache::default() })
  }

  /// The raw record document.
  pub fn raw(&self) -> &Value { &self.raw }

  /// The canonical fields, computed on first call and cached.
  pub fn fields(&self) -> &FieldMap {
    self.fields.get_or_compute(|| {
      let fields = normalize(&self.raw);
      if !fields.missing().is_empty() {
        debug!(
          "Record {} is missing fields: {}",
          self.uid,
          fields.missing().iter().map(FieldCode::code).collect::<Vec<_>>().join(", ")
        );
      }
      fields
    })
  }

  /// Discards the cached fields and recomputes them.
  pub fn regenerate(&mut self) -> &FieldMap {
    self.fields.invalidate();
    self.fields()
  }

  /// Whether the canonical fields have been computed.
  pub fn is_normalized(&self) -> bool { self.fields.is_cached() }
}

impl fmt::Display for Record {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "UID: {}", self.uid)?;
    writeln!(f, "Title: {}", self.title)?;
    match self.authors.split_first() {
      Some((first, [])) => writeln!(f, "Authors: {first}"),
      Some((first, rest)) => writeln!(f, "Authors: {first} and {} other/s", rest.len()),
      None => writeln!(f, "Authors: none listed"),
    }
  }
}
