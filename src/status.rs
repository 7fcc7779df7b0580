//! Test statuses reported by the harness and written to metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome of a test or subtest.
///
/// The declaration order is the tie-break priority used when two statuses
/// were observed equally often: the earlier variant becomes the primary
/// expectation.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
  Pass,
  Ok,
  Fail,
  PreconditionFailed,
  Error,
  Timeout,
  Crash,
  Notrun,
  Skip,
}

impl Status {
  pub const ALL: [Status; 9] = [
    Status::Pass,
    Status::Ok,
    Status::Fail,
    Status::PreconditionFailed,
    Status::Error,
    Status::Timeout,
    Status::Crash,
    Status::Notrun,
    Status::Skip,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Status::Pass => "PASS",
      Status::Ok => "OK",
      Status::Fail => "FAIL",
      Status::PreconditionFailed => "PRECONDITION_FAILED",
      Status::Error => "ERROR",
      Status::Timeout => "TIMEOUT",
      Status::Crash => "CRASH",
      Status::Notrun => "NOTRUN",
      Status::Skip => "SKIP",
    }
  }

  /// Whether this status counts as a pass for harness-level or subtest results.
  pub fn is_passing(self) -> bool {
    matches!(self, Status::Pass | Status::Ok)
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "unknown status '{}'", self.0)
  }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for Status {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Status::ALL
      .into_iter()
      .find(|status| status.as_str() == s)
      .ok_or_else(|| UnknownStatus(s.to_string()))
  }
}
