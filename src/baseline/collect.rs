//! Gathering web-test results of try builds and choosing what to rebaseline.

use std::collections::BTreeSet;

use tracing::{info, warn};

use super::rebaseline::{suffixes_for_failure, StepResults};
use super::results::WebTestResults;
use super::set::BaselineSet;
use crate::builds::{Build, BuildRpc};
use crate::config::BuilderList;
use crate::error::{Error, Result};
use crate::resource::ResourceFetcher;

/// Artifacts holding a step's `full_results.json`.
pub const RESULTS_ARTIFACT_PREFIX: &str = "full_results";

/// Step of a bare `full_results.json` artifact.
pub const DEFAULT_STEP: &str = "blink_web_tests";

/// Step name carried by a results artifact ID: `full_results.json` belongs to
/// [`DEFAULT_STEP`], `full_results_<step>.json` to `<step>`.
pub fn step_for_artifact(artifact_id: &str) -> Option<String> {
  let rest = artifact_id
    .strip_prefix(RESULTS_ARTIFACT_PREFIX)?
    .strip_suffix(".json")?;
  match rest {
    "" => Some(DEFAULT_STEP.to_string()),
    _ => rest
      .strip_prefix('_')
      .filter(|step| !step.is_empty())
      .map(str::to_string),
  }
}

/// Fetch every step's results for `builds`. Builds without any results
/// artifact are returned separately.
pub fn fetch_step_results(
  rpc: &dyn BuildRpc,
  fetcher: &dyn ResourceFetcher,
  builds: &[Build],
) -> Result<(StepResults, Vec<Build>)> {
  let mut results = StepResults::new();
  let mut missing = Vec::new();
  for build in builds {
    let mut found = false;
    for artifact in rpc.list_artifacts(build)? {
      let Some(step) = step_for_artifact(&artifact.artifact_id) else {
        continue;
      };
      info!("Fetching results for {build}, {step}");
      let text = fetcher.fetch(&artifact.fetch_url)?.text(&artifact.fetch_url)?;
      let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| Error::Fetch {
        url: artifact.fetch_url.clone(),
        reason: e.to_string(),
      })?;
      match WebTestResults::from_json(&step, &json) {
        Some(step_results) => {
          results.insert((build.clone(), step), step_results);
          found = true;
        }
        None => warn!("Results for {build}, {step} have no tests"),
      }
    }
    if !found {
      missing.push(build.clone());
    }
  }
  Ok((results, missing))
}

/// Failures with something to rebaseline, restricted to `only` unless it is
/// empty. Requested tests that never failed with an actual output are
/// returned alongside the set.
pub fn failing_baselines(
  builders: &BuilderList,
  results: &StepResults,
  only: &BTreeSet<String>,
) -> (BaselineSet, Vec<String>) {
  let mut set = BaselineSet::new();
  for ((build, step), step_results) in results {
    for result in step_results.didnt_run_as_expected() {
      if !only.is_empty() && !only.contains(&result.test) {
        continue;
      }
      if suffixes_for_failure(result).is_empty() {
        continue;
      }
      if !set.add(builders, &result.test, build.clone(), step) {
        warn!("No port known for builder \"{}\"; skipping", build.builder);
      }
    }
  }
  let found: BTreeSet<&str> = set.all_tests().into_iter().collect();
  let unfound = only
    .iter()
    .filter(|test| !found.contains(test.as_str()))
    .cloned()
    .collect();
  (set, unfound)
}
