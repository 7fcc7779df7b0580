//! Which baselines to fetch, from which build step, for which port.

use std::collections::BTreeSet;
use std::fmt;

use crate::builds::Build;
use crate::config::BuilderList;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BaselineTask {
  pub test: String,
  pub build: Build,
  pub step_name: String,
  /// Port whose version directory receives the new baselines.
  pub port_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaselineSet {
  tasks: BTreeSet<BaselineTask>,
}

impl BaselineSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(
    &mut self,
    test: impl Into<String>,
    build: Build,
    step_name: impl Into<String>,
    port_name: impl Into<String>,
  ) {
    self.tasks.insert(BaselineTask {
      test: test.into(),
      build,
      step_name: step_name.into(),
      port_name: port_name.into(),
    });
  }

  /// Add a task targeting the port that `build`'s builder runs on. Returns
  /// `false` when the builder is unknown.
  pub fn add(&mut self, builders: &BuilderList, test: &str, build: Build, step_name: &str) -> bool {
    let Some(port_name) = builders.port_name_for_builder(&build.builder) else {
      return false;
    };
    let port_name = port_name.to_string();
    self.insert(test, build, step_name, port_name);
    true
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &BaselineTask> {
    self.tasks.iter()
  }

  /// Distinct tests, sorted.
  pub fn all_tests(&self) -> Vec<&str> {
    let tests: BTreeSet<&str> = self.tasks.iter().map(|t| t.test.as_str()).collect();
    tests.into_iter().collect()
  }

  pub fn tasks_for<'a>(&'a self, test: &str) -> impl Iterator<Item = &'a BaselineTask> + 'a {
    let test = test.to_string();
    self.tasks.iter().filter(move |t| t.test == test)
  }

  pub fn build_port_pairs(&self, test: &str) -> Vec<(&Build, &str)> {
    self
      .tasks_for(test)
      .map(|t| (&t.build, t.port_name.as_str()))
      .collect()
  }

  /// Ports receiving a new baseline for `test`.
  pub fn ports_for(&self, test: &str) -> BTreeSet<&str> {
    self.tasks_for(test).map(|t| t.port_name.as_str()).collect()
  }
}

impl fmt::Display for BaselineSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.tasks.is_empty() {
      return f.write_str("<Empty TestBaselineSet>");
    }
    f.write_str("<TestBaselineSet with:")?;
    for task in &self.tasks {
      write!(
        f,
        "\n  {}: {}, {}, {}",
        task.test, task.build, task.step_name, task.port_name
      )?;
    }
    f.write_str(">")
  }
}
