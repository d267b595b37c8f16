//! Serialization of a [`Query`]'s records into the tagged text format read by
//! bibliometric tools.
//!
//! The output opens with a file header naming the tool and its version, holds
//! one block per record with one `CODE value` line per canonical field, and
//! closes with the `EF` trailer:
//!
//! ```text
//! FN Web of Science Recursive EXplorer (wrex)
//! VR 0.1.0
//! PT J
//! AU Doe, J
//!    Roe, R
//! ...
//! ER
//! EF
//! ```
//!
//! Records are written in the record map's iteration order, which is not
//! sorted and may differ between runs.

use std::path::Path;

use super::*;

/// Tool name written on the `FN` header line.
pub const TOOL_NAME: &str = "Web of Science Recursive EXplorer (wrex)";

/// Trailer closing the file.
pub const FILE_END: &str = "EF";

/// Renders every record of `query` in the tagged text format.
///
/// With `verbose` set, each record's UID and missing fields are logged as
/// the record is written. The output is the same either way.
pub fn export(query: &Query, verbose: bool) -> String {
  let blocks: Vec<String> = query
    .iter()
    .map(|record| {
      let fields = record.fields();
      if verbose {
        info!("Exporting {}", record.uid);
        if !fields.missing().is_empty() {
          let missing: Vec<&str> = fields.missing().iter().map(FieldCode::code).collect();
          info!("  missing: {}", missing.join(", "));
        }
      }
      fields.to_string()
    })
    .collect();

  debug!("Exported {} records", blocks.len());
  format!(
    "FN {TOOL_NAME}\nVR {}\n{}\n{FILE_END}",
    env!("CARGO_PKG_VERSION"),
    blocks.join("\n")
  )
}

impl Query {
  /// Renders the query's records, see [`export`].
  pub fn export(&self, verbose: bool) -> String { export(self, verbose) }

  /// Renders the query's records and writes them to `path`.
  pub async fn write_export(&self, path: impl AsRef<Path>, verbose: bool) -> Result<(), WrexError> {
    let path = path.as_ref();
    tokio::fs::write(path, self.export(verbose)).await?;
    info!("Wrote {} records to {}", self.len(), path.display());
    Ok(())
  }
}
