//! The code review change whose try jobs supply results.

use serde_json::{json, Value as Json};

use crate::error::{Error, Result};
use crate::git::Git;

pub const DEFAULT_GERRIT_HOST: &str = "chromium-review.googlesource.com";
pub const DEFAULT_PROJECT: &str = "chromium/src";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeList {
  pub gerrit_host: String,
  pub project: String,
  pub issue: u64,
  pub patchset: Option<u32>,
}

impl ChangeList {
  pub fn new(issue: u64) -> Self {
    Self {
      gerrit_host: DEFAULT_GERRIT_HOST.to_string(),
      project: DEFAULT_PROJECT.to_string(),
      issue,
      patchset: None,
    }
  }

  pub fn with_patchset(mut self, patchset: Option<u32>) -> Self {
    self.patchset = patchset;
    self
  }

  /// The change associated with the checked-out branch. An explicit
  /// `patchset` wins over the last uploaded one.
  pub fn from_git(git: &dyn Git, patchset: Option<u32>) -> Result<Self> {
    let issue = git
      .branch_config("gerritissue")?
      .and_then(|value| value.trim().parse().ok())
      .ok_or_else(|| Error::UpdateAbort("No issue number for current branch.".to_string()))?;
    let patchset = match patchset {
      Some(patchset) => Some(patchset),
      None => git
        .branch_config("gerritpatchset")?
        .and_then(|value| value.trim().parse().ok()),
    };
    Ok(Self::new(issue).with_patchset(patchset))
  }

  /// Short review URL, e.g. `https://crrev.com/c/1234/1`.
  pub fn url(&self) -> String {
    match self.patchset {
      Some(patchset) => format!("https://crrev.com/c/{}/{patchset}", self.issue),
      None => format!("https://crrev.com/c/{}", self.issue),
    }
  }

  /// Buildbucket `GerritChange` message.
  pub fn gerrit_change(&self) -> Json {
    let mut change = json!({
      "host": self.gerrit_host,
      "project": self.project,
      "change": self.issue,
    });
    if let Some(patchset) = self.patchset {
      change["patchset"] = json!(patchset);
    }
    change
  }
}
