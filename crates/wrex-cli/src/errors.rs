//! Error types for the wrex command line tool.
//!
//! Every failure the CLI can hit is one of:
//! - a prompt that could not be shown or answered,
//! - an error from the wrex library (HTTP status, network, malformed response,
//!   bad configuration),
//! - a file system error while writing the config or the export.
//!
//! The variants are transparent so the underlying message is what the user
//! sees when `main` returns an error.

use thiserror::Error;

/// Errors that can occur while running a `wrex` command.
#[derive(Error, Debug)]
pub enum WrexCliError {
  /// Errors from interactive prompts
  #[error(transparent)]
  Dialoguer(#[from] dialoguer::Error),

  /// Errors from the wrex library
  #[error(transparent)]
  Wrex(#[from] wrex::errors::WrexError),

  /// File system and IO operation errors
  #[error(transparent)]
  IO(#[from] std::io::Error),
}
