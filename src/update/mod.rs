//! Rewriting metadata from observed results.
//!
//! [`tree`] groups configurations by outcome, [`property`] turns the groups
//! into conditional arms for each key, [`replay`] fills in configurations
//! without results, and [`updater`] applies all of it to one metadata file.

use std::fmt;
use std::str::FromStr;

pub mod migrate;
pub mod property;
pub mod replay;
pub mod tree;
pub mod updater;

pub use migrate::{Migrator, TestMigration};
pub use property::{BugUpdate, DisabledUpdate, ExpectedUpdate, PropertyUpdate, UpdateContext};
pub use updater::{FileOutcome, FileState, FileUpdate, MetadataUpdater, UpdateOptions};

/// How existing conditions are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OverwriteMode {
  /// Rebuild conditions from scratch; stale arms and subtests go away.
  Yes,
  /// Only touch arms already written; keep unobserved subtests.
  No,
  /// Like `Yes`, after replaying current metadata for unobserved configurations.
  #[default]
  Fill,
}

impl OverwriteMode {
  pub fn as_str(self) -> &'static str {
    match self {
      OverwriteMode::Yes => "yes",
      OverwriteMode::No => "no",
      OverwriteMode::Fill => "fill",
    }
  }
}

impl fmt::Display for OverwriteMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OverwriteMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "yes" => Ok(OverwriteMode::Yes),
      "no" => Ok(OverwriteMode::No),
      "fill" => Ok(OverwriteMode::Fill),
      other => Err(format!("invalid overwrite mode '{other}' (expected yes, no or fill)")),
    }
  }
}
