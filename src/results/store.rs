//! Aggregation of observed results per (test, subtest, configuration).

use std::collections::{BTreeMap, BTreeSet};

use super::report::WptReport;
use crate::config::{RunInfo, UpdateProperties};
use crate::error::{Error, Result};
use crate::status::Status;

/// One observed (or replayed) outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
  pub status: Status,
  /// Statuses kept alongside the primary one without being counted: the
  /// report's expectations in keep-statuses mode, or the intermittent
  /// statuses of a replayed expectation.
  pub kept: Vec<Status>,
  pub run_info: RunInfo,
  /// What the report said was expected.
  pub expected: Vec<Status>,
  /// Synthesized from current metadata rather than observed.
  pub replayed: bool,
}

impl Observation {
  pub fn observed(status: Status, run_info: RunInfo) -> Self {
    Self {
      status,
      kept: Vec::new(),
      run_info,
      expected: Vec::new(),
      replayed: false,
    }
  }

  pub fn replayed(statuses: &[Status], run_info: RunInfo) -> Option<Self> {
    let (&status, rest) = statuses.split_first()?;
    Some(Self {
      status,
      kept: rest.to_vec(),
      run_info,
      expected: statuses.to_vec(),
      replayed: true,
    })
  }
}

/// Observations for a test and its subtests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestResults {
  pub test: Vec<Observation>,
  pub subtests: BTreeMap<String, Vec<Observation>>,
}

impl TestResults {
  pub fn observations(&self, subtest: Option<&str>) -> &[Observation] {
    match subtest {
      None => &self.test,
      Some(name) => self.subtests.get(name).map(Vec::as_slice).unwrap_or(&[]),
    }
  }

  pub fn has_observed(&self) -> bool {
    self.test.iter().any(|o| !o.replayed)
  }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
  pub update_properties: UpdateProperties,
  pub keep_statuses: bool,
  /// Minimum retries of a test on one configuration for its results to count.
  pub min_samples: usize,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self {
      update_properties: UpdateProperties::default(),
      keep_statuses: false,
      min_samples: 1,
    }
  }
}

/// `test url → subtest → observations`.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
  props: BTreeSet<String>,
  tests: BTreeMap<String, TestResults>,
}

impl ResultStore {
  /// Fold reports into a store, dropping under-sampled (test, config) pairs.
  pub fn from_reports<'a, I>(reports: I, options: &StoreOptions) -> Result<Self>
  where
    I: IntoIterator<Item = &'a WptReport>,
  {
    let props = options.update_properties.all();
    let mut raw: BTreeMap<(String, RunInfo), Vec<TestResults>> = BTreeMap::new();
    let mut missing = BTreeSet::new();

    for report in reports {
      for result in &report.results {
        if result.status == Status::Skip {
          continue;
        }
        let run_info = report.run_info_for(result);
        missing.extend(props.iter().filter(|p| !run_info.contains(p)).cloned());

        let mut folded = TestResults::default();
        folded.test.push(fold_one(
          result.status,
          result.expected,
          &result.known_intermittent,
          &run_info,
          options.keep_statuses,
        ));
        for subtest in &result.subtests {
          folded.subtests.entry(subtest.name.clone()).or_default().push(fold_one(
            subtest.status,
            subtest.expected,
            &subtest.known_intermittent,
            &run_info,
            options.keep_statuses,
          ));
        }
        raw
          .entry((result.test.clone(), run_info))
          .or_default()
          .push(folded);
      }
    }

    if !missing.is_empty() {
      let names: Vec<String> = missing.into_iter().collect();
      return Err(Error::UpdateAbort(format!(
        "Missing properties in run info: {}",
        names.join(", ")
      )));
    }

    let mut tests: BTreeMap<String, TestResults> = BTreeMap::new();
    for ((test, _), samples) in raw {
      if samples.len() < options.min_samples {
        continue;
      }
      let entry = tests.entry(test).or_default();
      for sample in samples {
        entry.test.extend(sample.test);
        for (name, observations) in sample.subtests {
          entry.subtests.entry(name).or_default().extend(observations);
        }
      }
    }
    Ok(Self { props, tests })
  }

  pub fn is_empty(&self) -> bool {
    self.tests.is_empty()
  }

  pub fn tests(&self) -> impl Iterator<Item = &String> {
    self.tests.keys()
  }

  pub fn get(&self, test: &str) -> Option<&TestResults> {
    self.tests.get(test)
  }

  pub fn get_mut(&mut self, test: &str) -> Option<&mut TestResults> {
    self.tests.get_mut(test)
  }

  /// Remove and return a test's observations; used when handing a file's
  /// results to the worker that owns it.
  pub fn take(&mut self, test: &str) -> Option<TestResults> {
    self.tests.remove(test)
  }

  /// Configurations among `all_configs` that share their update-property
  /// projection with at least one real observation of the (sub)test.
  pub fn updated_configs(
    &self,
    all_configs: &BTreeSet<RunInfo>,
    test: &str,
    subtest: Option<&str>,
  ) -> BTreeSet<RunInfo> {
    match self.tests.get(test) {
      Some(results) => updated_configs_for(&self.props, all_configs, results.observations(subtest)),
      None => BTreeSet::new(),
    }
  }

  pub fn update_properties(&self) -> &BTreeSet<String> {
    &self.props
  }
}

/// See [`ResultStore::updated_configs`].
pub fn updated_configs_for(
  props: &BTreeSet<String>,
  all_configs: &BTreeSet<RunInfo>,
  observations: &[Observation],
) -> BTreeSet<RunInfo> {
  let observed: BTreeSet<RunInfo> = observations
    .iter()
    .filter(|o| !o.replayed)
    .map(|o| o.run_info.project(props))
    .collect();
  all_configs
    .iter()
    .filter(|config| observed.contains(&config.project(props)))
    .cloned()
    .collect()
}

fn fold_one(
  status: Status,
  expected: Option<Status>,
  known_intermittent: &[Status],
  run_info: &RunInfo,
  keep_statuses: bool,
) -> Observation {
  let expected: Vec<Status> = expected.into_iter().chain(known_intermittent.iter().copied()).collect();
  let mut observation = Observation::observed(status, run_info.clone());
  if keep_statuses {
    for s in &expected {
      if *s != status && !observation.kept.contains(s) {
        observation.kept.push(*s);
      }
    }
  }
  observation.expected = expected;
  observation
}
