//! Placeholder results for enabled configurations nothing was observed on.
//!
//! The current metadata is evaluated for each such configuration and the
//! result fed back as if it had been observed, so synthesizing new conditions
//! cannot drop what is known about platforms outside the input.

use std::collections::BTreeSet;

use tracing::trace;

use crate::config::RunInfo;
use crate::manifest::TestType;
use crate::metadata::{Section, Value};
use crate::results::store::updated_configs_for;
use crate::results::{Observation, TestResults};
use crate::status::Status;

/// Which configurations a test should be replayed on.
pub fn replay_configs(
  props: &BTreeSet<String>,
  enabled: &BTreeSet<RunInfo>,
  results: &TestResults,
  keep_statuses: bool,
) -> BTreeSet<RunInfo> {
  if keep_statuses {
    return enabled.clone();
  }
  let updated = updated_configs_for(props, enabled, &results.test);
  enabled.difference(&updated).cloned().collect()
}

fn statuses(section: Option<&Section>, run_info: &RunInfo, default: Status) -> Vec<Status> {
  let parsed = section
    .and_then(|s| s.evaluate("expected", run_info))
    .and_then(|value: &Value| {
      value
        .items()
        .iter()
        .map(|s| s.parse::<Status>().ok())
        .collect::<Option<Vec<_>>>()
    });
  match parsed {
    Some(statuses) if !statuses.is_empty() => statuses,
    _ => vec![default],
  }
}

/// Inject replayed observations for `configs` into `results`, covering the
/// test and every subtest known from either the metadata or the results.
/// Returns how many configurations were replayed.
pub fn replay(
  test_type: TestType,
  section: Option<&Section>,
  configs: &BTreeSet<RunInfo>,
  results: &mut TestResults,
) -> usize {
  let mut subtests: BTreeSet<String> = results.subtests.keys().cloned().collect();
  if let Some(section) = section {
    subtests.extend(section.sections.iter().map(|s| s.name.clone()));
  }

  for run_info in configs {
    let test_statuses = statuses(section, run_info, test_type.default_status());
    trace!(config = %run_info, ?test_statuses, "replaying");
    results
      .test
      .extend(Observation::replayed(&test_statuses, run_info.clone()));
    for name in &subtests {
      let subsection = section.and_then(|s| s.subsection(name));
      let subtest_statuses = statuses(subsection, run_info, Status::Pass);
      results
        .subtests
        .entry(name.clone())
        .or_default()
        .extend(Observation::replayed(&subtest_statuses, run_info.clone()));
    }
  }
  configs.len()
}
