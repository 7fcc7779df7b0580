//! Driving a rebaseline: plan, copy, download, optimize.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::{error, info};

use super::copier::{BaselineCopier, BaselineCopy};
use super::fetcher::{BaselineFetcher, CacheStats, DownloadTask, TaskSource};
use super::optimize::BaselineOptimizer;
use super::results::{WebTestResult, WebTestResults, BASELINE_SUFFIXES};
use super::set::BaselineSet;
use super::{actual_name, baseline_name, is_reftest};
use crate::builds::Build;
use crate::config::{Port, PortHandle};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebaselineOptions {
  /// Prune platform baselines made redundant by the new ones.
  pub optimize: bool,
  /// Log what would happen without touching the checkout.
  pub dry_run: bool,
  /// Read actual outputs from this directory instead of fetching them.
  pub results_directory: Option<PathBuf>,
}

/// Results of one step of one build.
pub type StepResults = BTreeMap<(Build, String), WebTestResults>;

/// Files a rebaseline changed in the checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebaselineSummary {
  /// Baselines written or copied, sorted.
  pub written: Vec<PathBuf>,
  /// Baselines removed, sorted.
  pub removed: Vec<PathBuf>,
  pub failed: usize,
  pub cache_stats: CacheStats,
}

#[derive(Debug, Default)]
struct Plan {
  tasks: Vec<DownloadTask>,
  suffixes: BTreeMap<String, BTreeSet<&'static str>>,
  /// Pixel baselines of reftests that must not survive.
  stale: Vec<PathBuf>,
}

/// Suffixes worth rebaselining for a result: those with an actual output,
/// unless the test ended up passing.
pub fn suffixes_for_failure(result: &WebTestResult) -> Vec<&'static str> {
  if result.did_pass() {
    return Vec::new();
  }
  BASELINE_SUFFIXES
    .iter()
    .map(|(suffix, _)| *suffix)
    .filter(|suffix| result.baseline_url(suffix).is_some())
    .collect()
}

pub struct Rebaseliner {
  web_tests: PathBuf,
  ports: Vec<Port>,
  fetcher: BaselineFetcher,
  options: RebaselineOptions,
}

impl Rebaseliner {
  /// `ports` must include every port that can reach a rebaselined
  /// directory through its fallback chain.
  pub fn new(web_tests: impl Into<PathBuf>, ports: Vec<Port>, fetcher: BaselineFetcher) -> Self {
    Self {
      web_tests: web_tests.into(),
      ports,
      fetcher,
      options: RebaselineOptions::default(),
    }
  }

  pub fn with_options(mut self, options: RebaselineOptions) -> Self {
    self.options = options;
    self
  }

  fn port(&self, name: &str) -> Port {
    self
      .ports
      .iter()
      .find(|p| p.name() == name)
      .cloned()
      .unwrap_or_else(|| Port::new(name))
  }

  fn plan(&self, set: &BaselineSet, results: &StepResults) -> Plan {
    let mut plan = Plan::default();
    for task in set.iter() {
      let Some(result) = results
        .get(&(task.build.clone(), task.step_name.clone()))
        .and_then(|r| r.result_for_test(&task.test))
      else {
        continue;
      };
      let reftest = is_reftest(&self.web_tests, &task.test);
      let version_dir = self.port(&task.port_name).baseline_version_dir(&self.web_tests);
      for suffix in suffixes_for_failure(result) {
        let dest = version_dir.join(baseline_name(&task.test, suffix));
        if reftest && suffix == "png" {
          if dest.is_file() {
            plan.stale.push(dest);
          }
          continue;
        }
        let source = match (&self.options.results_directory, result.baseline_url(suffix)) {
          (Some(dir), _) => TaskSource::File(dir.join(actual_name(&task.test, suffix))),
          (None, Some(url)) => TaskSource::Url(url.to_string()),
          (None, None) => continue,
        };
        plan
          .suffixes
          .entry(task.test.clone())
          .or_default()
          .insert(suffix);
        plan.tasks.push(DownloadTask {
          test: task.test.clone(),
          suffix: suffix.to_string(),
          port_name: task.port_name.clone(),
          dest,
          source,
        });
      }
    }
    plan.tasks.sort();
    plan.stale.sort();
    plan.stale.dedup();
    plan
  }

  /// Rebaseline every test of `set` from `results`.
  pub fn rebaseline(&self, set: &BaselineSet, results: &StepResults) -> Result<RebaselineSummary> {
    let plan = self.plan(set, results);
    let mut summary = RebaselineSummary::default();
    if plan.suffixes.is_empty() && plan.stale.is_empty() {
      info!("No tests to rebaseline.");
      return Ok(summary);
    }
    let count = plan.suffixes.len();
    info!("Rebaselining {count} test{}.", if count == 1 { "" } else { "s" });

    let copier = BaselineCopier::new(&self.web_tests, self.ports.clone());
    let mut copies: BTreeMap<&str, Vec<BaselineCopy>> = BTreeMap::new();
    for (test, suffixes) in &plan.suffixes {
      for suffix in suffixes {
        copies
          .entry(test.as_str())
          .or_default()
          .extend(copier.find_baselines_to_copy(test, suffix, set));
      }
    }
    for (index, (test, suffixes)) in plan.suffixes.iter().enumerate() {
      if !self.options.dry_run {
        if let Some(test_copies) = copies.get(test.as_str()) {
          copier.write_copies(test_copies)?;
          summary.written.extend(test_copies.iter().map(|c| c.dest.clone()));
        }
      }
      let suffixes: Vec<&str> = suffixes.iter().copied().collect();
      info!(
        "Copied baselines for '{test}' ({}) ({}/{count})",
        suffixes.join(", "),
        index + 1
      );
    }

    if !self.options.dry_run {
      let fetched = self.fetcher.run(plan.tasks.clone())?;
      summary.failed = fetched.failures.len();
      summary.written.extend(fetched.written);
      for path in &plan.stale {
        std::fs::remove_file(path).map_err(|e| Error::io(path, e))?;
        summary.removed.push(path.clone());
      }
    }
    for (index, test) in plan.suffixes.keys().enumerate() {
      info!("Downloaded baselines for '{test}' ({}/{count})", index + 1);
    }
    summary.cache_stats = self.fetcher.cache_stats();

    if self.options.optimize && !self.options.dry_run {
      let optimizer = BaselineOptimizer::new(&self.web_tests, self.ports.clone());
      for (test, suffixes) in &plan.suffixes {
        for suffix in suffixes {
          summary.removed.extend(optimizer.optimize(test, suffix)?);
        }
      }
    }
    if summary.failed > 0 {
      error!("Failed to fetch {} baseline(s).", summary.failed);
    }

    summary.written.sort();
    summary.written.dedup();
    summary.removed.sort();
    summary.removed.dedup();
    summary.written.retain(|p| summary.removed.binary_search(p).is_err());
    Ok(summary)
  }
}
