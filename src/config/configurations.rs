//! The set of configurations tests are expected to run under.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::builders::{BuilderList, DEFAULT_PRODUCT};
use super::port::{PlatformTable, Port, PortHandle};
use super::run_info::{PropValue, RunInfo};
use crate::error::{Error, Result};
use crate::metadata::{evaluate_chain, Section, Value};

/// Value of `disabled` that explicitly re-enables a test.
pub const ENABLED_OVERRIDE: &str = "@False";

/// One entry of the `VirtualTestSuites` file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VirtualSuite {
  pub prefix: String,
  #[serde(default)]
  pub platforms: Vec<String>,
  #[serde(default)]
  pub bases: Vec<String>,
}

impl VirtualSuite {
  /// Load suites, skipping the string comments the file interleaves.
  pub fn load_all(path: &Path) -> Result<Vec<VirtualSuite>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let raw: Vec<serde_json::Value> = serde_json::from_str(&text).map_err(|e| Error::json(path, e))?;
    Ok(
      raw
        .into_iter()
        .filter(|entry| entry.is_object())
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect(),
    )
  }

  fn runs_wpt(&self) -> bool {
    self
      .bases
      .iter()
      .any(|base| base.starts_with("external/wpt") || base.starts_with("wpt_internal"))
  }

  fn runs_on(&self, os: &str) -> bool {
    self.platforms.is_empty() || self.platforms.iter().any(|p| p.eq_ignore_ascii_case(os))
  }
}

/// Whether an evaluated `disabled` value leaves the test enabled.
pub fn is_enabled_value(value: Option<&Value>) -> bool {
  match value {
    None => true,
    Some(value) => value.as_scalar() == Some(ENABLED_OVERRIDE),
  }
}

/// Configurations paired with the port that runs them.
#[derive(Debug, Clone, Default)]
pub struct TestConfigurations {
  configs: BTreeMap<RunInfo, Arc<dyn PortHandle>>,
}

impl TestConfigurations {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, run_info: RunInfo, port: Arc<dyn PortHandle>) {
    self.configs.insert(run_info, port);
  }

  /// Enumerate the configurations run by every wptrunner try builder.
  pub fn generate(
    builders: &BuilderList,
    platforms: &PlatformTable,
    virtual_suites: &[VirtualSuite],
    customize: impl Fn(Port) -> Port,
  ) -> Self {
    let mut out = Self::new();
    for name in builders.wptrunner_try_builders() {
      let Some(builder) = builders.get(name) else {
        continue;
      };
      let port = Arc::new(customize(platforms.port(&builder.port_name)));
      for (_, step) in builder.wptrunner_steps() {
        let product = step.product.as_deref().unwrap_or(DEFAULT_PRODUCT);
        let base: RunInfo = [
          ("product", PropValue::from(product)),
          ("os", PropValue::from(port.os())),
          ("port", PropValue::from(port.version())),
          ("debug", PropValue::Bool(builder.is_debug())),
          (
            "flag_specific",
            PropValue::from(step.flag_specific.clone().unwrap_or_default()),
          ),
          ("virtual_suite", PropValue::from("")),
        ]
        .into_iter()
        .collect();
        for suite in virtual_suites {
          if suite.runs_wpt() && suite.runs_on(port.os()) {
            out.insert(base.with("virtual_suite", suite.prefix.as_str()), port.clone());
          }
        }
        out.insert(base, port.clone());
      }
    }
    out
  }

  pub fn len(&self) -> usize {
    self.configs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.configs.is_empty()
  }

  pub fn all_configs(&self) -> BTreeSet<RunInfo> {
    self.configs.keys().cloned().collect()
  }

  pub fn port(&self, run_info: &RunInfo) -> Option<&Arc<dyn PortHandle>> {
    self.configs.get(run_info)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&RunInfo, &Arc<dyn PortHandle>)> {
    self.configs.iter()
  }

  /// Whether any configuration has `debug` set.
  pub fn any_debug(&self) -> bool {
    self
      .configs
      .keys()
      .any(|c| c.get("debug") == Some(&PropValue::Bool(true)))
  }

  /// Configurations where `test` runs: neither disabled by the `disabled` key
  /// (evaluated through `chain`, nearest section first) nor skipped by the port.
  ///
  /// `test` is the web test name; virtual configurations are asked about
  /// `virtual/<suite>/<test>`.
  pub fn enabled_configs(&self, test: &str, chain: &[&Section]) -> BTreeSet<RunInfo> {
    self
      .configs
      .iter()
      .filter(|(run_info, port)| {
        let disabled = evaluate_chain(chain, "disabled", run_info);
        if !is_enabled_value(disabled.as_ref()) {
          return false;
        }
        let name = match run_info.get_str("virtual_suite") {
          Some(suite) if !suite.is_empty() => format!("virtual/{suite}/{test}"),
          _ => test.to_string(),
        };
        !port.skips_test(&name)
      })
      .map(|(run_info, _)| run_info.clone())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::builders::fixtures;
  use crate::metadata::parse;

  #[test]
  fn generates_one_config_per_wptrunner_step() {
    let configs = TestConfigurations::generate(
      &fixtures::builders(),
      &PlatformTable::default(),
      &[],
      |port| port,
    );
    assert_eq!(configs.len(), 4);
    let products: BTreeSet<String> = configs
      .all_configs()
      .iter()
      .map(|c| format!("{}/{}", c.get_str("product").unwrap(), c.get_str("port").unwrap()))
      .collect();
    assert_eq!(
      products.into_iter().collect::<Vec<_>>(),
      vec![
        "chrome/trusty",
        "content_shell/mac10.11",
        "content_shell/trusty",
        "content_shell/win10"
      ]
    );
    assert!(!configs.any_debug());
  }

  #[test]
  fn virtual_suites_add_configs_on_their_platforms() {
    let suites = vec![
      VirtualSuite {
        prefix: "fake-vts".to_string(),
        platforms: vec!["Linux".to_string()],
        bases: vec!["external/wpt/dir".to_string()],
      },
      VirtualSuite {
        prefix: "web-only".to_string(),
        platforms: vec![],
        bases: vec!["fast/dom".to_string()],
      },
    ];
    let configs =
      TestConfigurations::generate(&fixtures::builders(), &PlatformTable::default(), &suites, |p| p);
    let virtual_count = configs
      .all_configs()
      .iter()
      .filter(|c| c.get_str("virtual_suite") == Some("fake-vts"))
      .count();
    assert_eq!(virtual_count, 2);
    assert_eq!(configs.len(), 6);
  }

  #[test]
  fn enabled_configs_honor_disabled_and_overrides() {
    let configs = TestConfigurations::generate(
      &fixtures::builders(),
      &PlatformTable::default(),
      &[],
      |port| port,
    );
    let dir = parse(Path::new("__dir__.ini"), "disabled: needs investigation\n").unwrap();
    let file = parse(
      Path::new("a.html.ini"),
      "[a.html]\n  disabled:\n    if product == \"chrome\": @False\n",
    )
    .unwrap();
    let test = file.test("a.html").unwrap();
    let enabled = configs.enabled_configs("external/wpt/a.html", &[test, &dir.root]);
    assert_eq!(enabled.len(), 1);
    assert_eq!(
      enabled.iter().next().unwrap().get_str("product"),
      Some("chrome")
    );
    assert_eq!(configs.enabled_configs("external/wpt/a.html", &[]).len(), 4);
  }
}
