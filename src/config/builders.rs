//! Registry of CI builders and the test steps they run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default product for wptrunner steps that do not name one.
pub const DEFAULT_PRODUCT: &str = "content_shell";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StepConfig {
  #[serde(default)]
  pub uses_wptrunner: bool,
  #[serde(default)]
  pub product: Option<String>,
  #[serde(default)]
  pub flag_specific: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuilderConfig {
  pub port_name: String,
  #[serde(default)]
  pub specifiers: Vec<String>,
  #[serde(default)]
  pub is_try_builder: bool,
  #[serde(default)]
  pub main: Option<String>,
  #[serde(default)]
  pub steps: BTreeMap<String, StepConfig>,
}

impl BuilderConfig {
  pub fn is_debug(&self) -> bool {
    self
      .specifiers
      .iter()
      .any(|s| s.eq_ignore_ascii_case("debug"))
  }

  /// OS version specifier (the first specifier that is not a build type).
  pub fn version_specifier(&self) -> Option<&str> {
    self
      .specifiers
      .iter()
      .map(String::as_str)
      .find(|s| !s.eq_ignore_ascii_case("release") && !s.eq_ignore_ascii_case("debug"))
  }

  pub fn wptrunner_steps(&self) -> impl Iterator<Item = (&String, &StepConfig)> {
    self.steps.iter().filter(|(_, step)| step.uses_wptrunner)
  }
}

/// All known builders, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuilderList {
  builders: BTreeMap<String, BuilderConfig>,
}

impl BuilderList {
  pub fn new(builders: BTreeMap<String, BuilderConfig>) -> Self {
    Self { builders }
  }

  pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
    Ok(Self::new(serde_json::from_str(text)?))
  }

  pub fn load(path: &Path) -> Result<Self> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Self::from_json_str(&text).map_err(|e| Error::json(path, e))
  }

  pub fn get(&self, builder: &str) -> Option<&BuilderConfig> {
    self.builders.get(builder)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &BuilderConfig)> {
    self.builders.iter()
  }

  pub fn all_builder_names(&self) -> Vec<&str> {
    self.builders.keys().map(String::as_str).collect()
  }

  pub fn try_builder_names(&self) -> Vec<&str> {
    self
      .builders
      .iter()
      .filter(|(_, b)| b.is_try_builder)
      .map(|(name, _)| name.as_str())
      .collect()
  }

  /// Try builders with at least one wptrunner step.
  pub fn wptrunner_try_builders(&self) -> Vec<&str> {
    self
      .builders
      .iter()
      .filter(|(_, b)| b.is_try_builder && b.wptrunner_steps().next().is_some())
      .map(|(name, _)| name.as_str())
      .collect()
  }

  /// Try builders that run non-wptrunner web test steps.
  pub fn web_test_try_builders(&self) -> Vec<&str> {
    self
      .builders
      .iter()
      .filter(|(_, b)| b.is_try_builder && b.steps.values().any(|s| !s.uses_wptrunner))
      .map(|(name, _)| name.as_str())
      .collect()
  }

  pub fn port_name_for_builder(&self, builder: &str) -> Option<&str> {
    self.get(builder).map(|b| b.port_name.as_str())
  }

  pub fn is_debug(&self, builder: &str) -> bool {
    self.get(builder).is_some_and(BuilderConfig::is_debug)
  }

  /// Lowercased version specifier of the builders running `port_name`.
  pub fn version_specifier_for_port_name(&self, port_name: &str) -> Option<String> {
    self
      .builders
      .values()
      .filter(|b| b.port_name == port_name)
      .find_map(|b| b.version_specifier())
      .map(str::to_ascii_lowercase)
  }

  /// Every distinct port name, sorted.
  pub fn all_port_names(&self) -> Vec<&str> {
    let set: BTreeSet<&str> = self.builders.values().map(|b| b.port_name.as_str()).collect();
    set.into_iter().collect()
  }

  /// Lowercased version specifiers covered by the try builders.
  pub fn try_version_specifiers(&self) -> BTreeSet<String> {
    self
      .builders
      .values()
      .filter(|b| b.is_try_builder)
      .filter_map(|b| b.version_specifier())
      .map(str::to_ascii_lowercase)
      .collect()
  }

  pub fn bucket_for_builder(&self, builder: &str) -> &'static str {
    match self.get(builder) {
      Some(b) if !b.is_try_builder => "ci",
      _ => "try",
    }
  }
}

#[cfg(test)]
pub(crate) mod fixtures {
  use super::BuilderList;

  /// Builders mirroring a small Blink-like matrix.
  pub fn builders() -> BuilderList {
    BuilderList::from_json_str(
      r#"{
        "test-linux-rel": {
          "port_name": "test-linux-trusty",
          "specifiers": ["Trusty", "Release"],
          "is_try_builder": true,
          "steps": {
            "blink_web_tests": {},
            "blink_wpt_tests": {"uses_wptrunner": true},
            "chrome_wpt_tests": {"uses_wptrunner": true, "product": "chrome"}
          }
        },
        "test-mac-rel": {
          "port_name": "test-mac-mac10.11",
          "specifiers": ["Mac10.11", "Release"],
          "is_try_builder": true,
          "steps": {"blink_web_tests": {}, "blink_wpt_tests": {"uses_wptrunner": true}}
        },
        "test-mac10.10-rel": {
          "port_name": "test-mac-mac10.10",
          "specifiers": ["Mac10.10", "Release"],
          "is_try_builder": true,
          "steps": {"blink_web_tests": {}}
        },
        "test-win7-rel": {
          "port_name": "test-win-win7",
          "specifiers": ["Win7", "Release"],
          "is_try_builder": true,
          "steps": {"blink_web_tests": {}}
        },
        "test-win10-rel": {
          "port_name": "test-win-win10",
          "specifiers": ["Win10", "Release"],
          "is_try_builder": true,
          "steps": {"blink_web_tests": {}, "blink_wpt_tests": {"uses_wptrunner": true}}
        },
        "Test Linux Debug": {
          "port_name": "test-linux-trusty",
          "specifiers": ["Trusty", "Debug"],
          "main": "chromium.linux",
          "steps": {"blink_web_tests": {}}
        }
      }"#,
    )
    .expect("fixture builders parse")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classifies_builders() {
    let builders = fixtures::builders();
    assert_eq!(
      builders.wptrunner_try_builders(),
      vec!["test-linux-rel", "test-mac-rel", "test-win10-rel"]
    );
    assert_eq!(builders.try_builder_names().len(), 5);
    assert!(builders.is_debug("Test Linux Debug"));
    assert!(!builders.is_debug("test-linux-rel"));
    assert_eq!(builders.bucket_for_builder("Test Linux Debug"), "ci");
    assert_eq!(builders.bucket_for_builder("test-linux-rel"), "try");
  }

  #[test]
  fn version_specifiers_are_lowercased() {
    let builders = fixtures::builders();
    assert_eq!(
      builders.version_specifier_for_port_name("test-mac-mac10.11"),
      Some("mac10.11".to_string())
    );
    let covered: Vec<_> = builders.try_version_specifiers().into_iter().collect();
    assert_eq!(covered, vec!["mac10.10", "mac10.11", "trusty", "win10", "win7"]);
  }

  #[test]
  fn port_names_are_sorted_and_unique() {
    assert_eq!(
      fixtures::builders().all_port_names(),
      vec![
        "test-linux-trusty",
        "test-mac-mac10.10",
        "test-mac-mac10.11",
        "test-win-win10",
        "test-win-win7"
      ]
    );
  }
}
