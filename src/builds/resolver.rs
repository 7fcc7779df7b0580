//! Turning build specifiers into finished builds with results.

use std::collections::BTreeMap;
use std::io::BufRead;

use tracing::{info, warn};

use super::cl::ChangeList;
use super::rpc::{BuildRpc, BuildStatus};
use super::spec::Build;
use crate::error::{Error, Result};

/// Asks the operator a yes/no question.
pub trait Prompt: Send + Sync {
  fn confirm(&self, question: &str) -> bool;
}

/// Reads the answer from stdin; anything but `y`/`yes` declines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
  fn confirm(&self, question: &str) -> bool {
    info!("{question}");
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
      return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
  }
}

/// Always gives the same answer; for unattended runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrompt(pub bool);

impl Prompt for FixedPrompt {
  fn confirm(&self, question: &str) -> bool {
    info!("{question}");
    self.0
  }
}

pub const INCOMPLETE_ABORT: &str = "Aborting update due to build(s) with incomplete results.";
pub const PENDING_ABORT: &str =
  "Once all pending try jobs have finished, please re-run the tool to fetch new results.";
pub const NO_TRY_JOBS_ABORT: &str = "Aborted: no try jobs and '--no-trigger-jobs' or '--dry-run' passed.";

/// Render builds as the aligned table used in status logs.
pub fn format_build_table(builds: &[(&Build, BuildStatus)]) -> Vec<String> {
  let builder_width = builds
    .iter()
    .map(|(b, _)| b.builder.len())
    .max()
    .unwrap_or(0)
    .max(20);
  let status_width = builds
    .iter()
    .map(|(_, s)| s.as_str().len())
    .max()
    .unwrap_or(0)
    .max("STATUS".len());
  let row = |builder: &str, number: &str, status: &str, bucket: &str| {
    format!("  {builder:<builder_width$} {number:<7} {status:<status_width$} {bucket:<6}")
  };
  let mut lines = vec![row("BUILDER", "NUMBER", "STATUS", "BUCKET")];
  for (build, status) in builds {
    let number = build.number.map_or_else(|| "--".to_string(), |n| n.to_string());
    lines.push(row(&build.builder, &number, status.as_str(), &build.bucket));
  }
  lines
}

pub struct BuildResolver<'a> {
  rpc: &'a dyn BuildRpc,
  prompt: &'a dyn Prompt,
  can_trigger: bool,
}

impl<'a> BuildResolver<'a> {
  pub fn new(rpc: &'a dyn BuildRpc, prompt: &'a dyn Prompt) -> Self {
    Self {
      rpc,
      prompt,
      can_trigger: true,
    }
  }

  /// Whether missing try jobs may be scheduled. Off for `--no-trigger-jobs`
  /// and `--dry-run`.
  pub fn with_trigger_jobs(mut self, can_trigger: bool) -> Self {
    self.can_trigger = can_trigger;
    self
  }

  /// Resolve `builds` (or, when empty, the latest jobs of `try_builders`)
  /// into finished builds that have results.
  pub fn resolve(
    &self,
    builds: &[Build],
    try_builders: &[String],
    change: Option<&ChangeList>,
  ) -> Result<Vec<(Build, BuildStatus)>> {
    let mut statuses: BTreeMap<Build, BuildStatus> = BTreeMap::new();
    let mut latest_of: Vec<String> = Vec::new();
    if builds.is_empty() {
      latest_of.extend(try_builders.iter().cloned());
    }
    for build in builds {
      match build.number {
        Some(_) => {
          let (resolved, status) = self.rpc.get_build(build)?;
          statuses.insert(resolved, status);
        }
        None if build.is_try() => latest_of.push(build.builder.clone()),
        None => return Err(Error::UnresolvedBuild(build.to_string())),
      }
    }

    if !latest_of.is_empty() {
      let change = change
        .ok_or_else(|| Error::UpdateAbort("No issue number for current branch.".to_string()))?;
      info!(
        "Fetching status for {} build{} from {}.",
        latest_of.len(),
        if latest_of.len() == 1 { "" } else { "s" },
        change.url()
      );
      let jobs = self.rpc.latest_try_jobs(&latest_of, change)?;
      let missing: Vec<String> = latest_of
        .iter()
        .filter(|name| !jobs.iter().any(|(b, _)| &b.builder == *name))
        .cloned()
        .collect();
      if !missing.is_empty() {
        if self.can_trigger {
          self.rpc.trigger_try_jobs(&missing, change)?;
          for name in &missing {
            statuses.insert(Build::new(name.clone()), BuildStatus::Triggered);
          }
        } else if jobs.is_empty() && statuses.is_empty() {
          return Err(Error::UpdateAbort(NO_TRY_JOBS_ABORT.to_string()));
        } else {
          for name in &missing {
            warn!("No try job found for \"{name}\"");
          }
        }
      }
      statuses.extend(jobs);
    }

    self.check_statuses(&statuses)?;
    Ok(
      statuses
        .into_iter()
        .filter(|(_, status)| status.has_results())
        .collect(),
    )
  }

  fn check_statuses(&self, statuses: &BTreeMap<Build, BuildStatus>) -> Result<()> {
    let pending: Vec<(&Build, BuildStatus)> = statuses
      .iter()
      .filter(|(_, s)| s.is_pending())
      .map(|(b, s)| (b, *s))
      .collect();
    let finished: Vec<(&Build, BuildStatus)> = statuses
      .iter()
      .filter(|(_, s)| !s.is_pending())
      .map(|(b, s)| (b, *s))
      .collect();
    let incomplete: Vec<&Build> = finished
      .iter()
      .filter(|(_, s)| s.is_incomplete())
      .map(|(b, _)| *b)
      .collect();
    let mut needs_consent = false;

    if !incomplete.is_empty() {
      warn!("Some builds have incomplete results:");
      for build in &incomplete {
        warn!("  {build}");
      }
      warn!("Examples of incomplete results include:");
      warn!("  * Shard terminated the harness after timing out.");
      warn!("  * Harness exited early due to excessive unexpected failures.");
      warn!("  * Build failed on a non-test step.");
      warn!("Please consider retrying the failed builders or giving the builders more shards.");
      needs_consent = true;
    }

    if pending.is_empty() {
      info!("All builds finished.");
    } else {
      if finished.is_empty() {
        info!("No finished builds.");
      } else {
        info!("Finished builds:");
        for line in format_build_table(&finished) {
          info!("{line}");
        }
      }
      info!("Scheduled or started builds:");
      for line in format_build_table(&pending) {
        info!("{line}");
      }
      if !finished.iter().any(|(_, s)| s.has_results()) {
        return Err(Error::UpdateAbort(PENDING_ABORT.to_string()));
      }
      needs_consent = true;
    }

    if needs_consent && !self.prompt.confirm("Continue?") {
      return Err(Error::UpdateAbort(INCOMPLETE_ABORT.to_string()));
    }
    Ok(())
  }
}
