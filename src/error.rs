//! Error types for wptsync
//!
//! Errors fall into two scopes:
//! - Per-file errors (malformed metadata, filesystem failures) are logged and
//!   the run continues with the remaining files.
//! - Program errors (aborted preconditions, unresolvable builds, failed remote
//!   calls) unwind to the caller, which prints one line and exits non-zero.
//!
//! All errors use the `thiserror` crate.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for wptsync operations
///
/// # Examples
///
/// ```
/// use wptsync::Result;
///
/// fn plan() -> Result<usize> {
///   Ok(0)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
///
/// # Examples
///
/// ```
/// use wptsync::Error;
///
/// fn check(pending: usize) -> Result<(), Error> {
///   if pending > 0 {
///     return Err(Error::UpdateAbort("builds are still running".to_string()));
///   }
///   Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
  /// Malformed metadata, report or expectations file
  #[error(transparent)]
  Parse(#[from] ParseError),

  /// A precondition for the update was violated
  #[error("{0}")]
  UpdateAbort(String),

  /// A build could not be looked up
  #[error("unable to resolve build: {0}")]
  UnresolvedBuild(String),

  /// A remote procedure call failed
  #[error(transparent)]
  Rpc(#[from] RpcError),

  /// Filesystem error tied to a path
  #[error("{}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// A JSON input could not be decoded
  #[error("{}: {source}", path.display())]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// Configuration or metadata that is structurally valid but semantically wrong
  #[error("{0}")]
  InvalidMetadata(String),

  /// A git subprocess exited unsuccessfully
  #[error("git {command} failed: {stderr}")]
  Git { command: String, stderr: String },

  /// Network fetch failure
  #[error("failed to fetch '{url}': {reason}")]
  Fetch { url: String, reason: String },

  /// The run was cancelled before this task started
  #[error("cancelled")]
  Cancelled,
}

/// How far an error propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
  /// Logged against one file; the run continues
  PerFile,
  /// Aborts the whole run
  Program,
}

impl Error {
  /// Wrap an I/O error with the path it occurred on.
  pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
    Error::Io {
      path: path.as_ref().to_path_buf(),
      source,
    }
  }

  /// Wrap a JSON decode error with the path of the document.
  pub fn json(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
    Error::Json {
      path: path.as_ref().to_path_buf(),
      source,
    }
  }

  pub fn scope(&self) -> ErrorScope {
    match self {
      Error::Parse(_) | Error::Io { .. } => ErrorScope::PerFile,
      _ => ErrorScope::Program,
    }
  }
}

/// A file could not be parsed
///
/// # Examples
///
/// ```
/// use wptsync::error::ParseError;
///
/// let err = ParseError::new("fail.html.ini", 2, "EOL in list value (comment)");
/// assert_eq!(err.to_string(), "EOL in list value (comment): fail.html.ini line 2");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}: {} line {line}", path.display())]
pub struct ParseError {
  pub path: PathBuf,
  /// 1-based line number
  pub line: usize,
  pub message: String,
}

impl ParseError {
  pub fn new(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      line,
      message: message.into(),
    }
  }
}

/// A remote call returned an error
///
/// The payload is kept so the request can be reproduced by hand.
#[derive(Error, Debug, Clone)]
#[error("{op}: {message} (code: {code})")]
pub struct RpcError {
  pub op: String,
  pub message: String,
  pub code: u16,
  pub payload: serde_json::Value,
}

impl RpcError {
  /// Pretty-printed request payload for logs.
  pub fn payload_pretty(&self) -> String {
    serde_json::to_string_pretty(&self.payload).unwrap_or_else(|_| self.payload.to_string())
  }
}
