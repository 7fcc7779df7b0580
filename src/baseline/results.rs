//! Web-test results (`full_results.json`) as produced by a build step.
//!
//! ```json
//! {
//!   "path_delimiter": "/",
//!   "tests": {
//!     "external": {"wpt": {"a.html": {
//!       "expected": "PASS", "actual": "FAIL FAIL", "is_unexpected": true,
//!       "artifacts": {"actual_text": ["https://…/a-actual.txt"]}
//!     }}}
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde_json::Value as Json;

use crate::error::{Error, Result};

/// Baseline kinds and the artifact carrying the actual output for each.
pub const BASELINE_SUFFIXES: [(&str, &str); 3] = [
  ("txt", "actual_text"),
  ("png", "actual_image"),
  ("wav", "actual_audio"),
];

pub fn artifact_for_suffix(suffix: &str) -> Option<&'static str> {
  BASELINE_SUFFIXES
    .iter()
    .find(|(s, _)| *s == suffix)
    .map(|(_, artifact)| *artifact)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebTestResult {
  pub test: String,
  pub expected: Vec<String>,
  /// One status per attempt, in attempt order.
  pub actual: Vec<String>,
  pub is_unexpected: bool,
  pub is_regression: bool,
  /// Artifact name (`actual_text`, …) to URLs.
  pub artifacts: BTreeMap<String, Vec<String>>,
}

impl WebTestResult {
  /// The last attempt passed.
  pub fn did_pass(&self) -> bool {
    self.actual.last().is_some_and(|s| s == "PASS")
  }

  pub fn did_run_as_expected(&self) -> bool {
    !self.is_unexpected
  }

  /// Distinct statuses across attempts.
  pub fn actual_statuses(&self) -> BTreeSet<&str> {
    self.actual.iter().map(String::as_str).collect()
  }

  /// First URL recorded for `suffix`'s artifact.
  pub fn baseline_url(&self, suffix: &str) -> Option<&str> {
    let artifact = artifact_for_suffix(suffix)?;
    self
      .artifacts
      .get(artifact)
      .and_then(|urls| urls.first())
      .map(String::as_str)
  }
}

/// All results reported by one build step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebTestResults {
  step_name: String,
  results: BTreeMap<String, WebTestResult>,
}

impl WebTestResults {
  pub fn new(step_name: impl Into<String>, results: Vec<WebTestResult>) -> Self {
    Self {
      step_name: step_name.into(),
      results: results.into_iter().map(|r| (r.test.clone(), r)).collect(),
    }
  }

  pub fn from_json(step_name: &str, json: &Json) -> Option<Self> {
    let delimiter = json
      .get("path_delimiter")
      .and_then(Json::as_str)
      .unwrap_or("/");
    let tests = json.get("tests")?.as_object()?;
    let mut results = Vec::new();
    for (name, node) in tests {
      collect(name, node, delimiter, &mut results);
    }
    Some(Self::new(step_name, results))
  }

  pub fn parse(path: &Path, step_name: &str, text: &str) -> Result<Self> {
    let json: Json = serde_json::from_str(text).map_err(|e| Error::json(path, e))?;
    Self::from_json(step_name, &json)
      .ok_or_else(|| Error::InvalidMetadata(format!("{}: no 'tests' object", path.display())))
  }

  pub fn load(path: &Path, step_name: &str) -> Result<Self> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Self::parse(path, step_name, &text)
  }

  pub fn step_name(&self) -> &str {
    &self.step_name
  }

  pub fn is_empty(&self) -> bool {
    self.results.is_empty()
  }

  pub fn result_for_test(&self, test: &str) -> Option<&WebTestResult> {
    self.results.get(test)
  }

  pub fn iter(&self) -> impl Iterator<Item = &WebTestResult> {
    self.results.values()
  }

  pub fn didnt_run_as_expected(&self) -> impl Iterator<Item = &WebTestResult> {
    self.results.values().filter(|r| !r.did_run_as_expected())
  }
}

fn collect(prefix: &str, node: &Json, delimiter: &str, out: &mut Vec<WebTestResult>) {
  let Some(object) = node.as_object() else {
    return;
  };
  if object.contains_key("actual") {
    out.push(leaf(prefix, object));
    return;
  }
  for (name, child) in object {
    collect(&format!("{prefix}{delimiter}{name}"), child, delimiter, out);
  }
}

fn leaf(test: &str, object: &serde_json::Map<String, Json>) -> WebTestResult {
  let words = |key: &str| -> Vec<String> {
    object
      .get(key)
      .and_then(Json::as_str)
      .map(|s| s.split_whitespace().map(str::to_string).collect())
      .unwrap_or_default()
  };
  let flag = |key: &str| object.get(key).and_then(Json::as_bool).unwrap_or(false);
  let artifacts = object
    .get("artifacts")
    .and_then(Json::as_object)
    .map(|artifacts| {
      artifacts
        .iter()
        .map(|(name, urls)| {
          let urls = urls
            .as_array()
            .map(|urls| urls.iter().filter_map(Json::as_str).map(str::to_string).collect())
            .unwrap_or_default();
          (name.clone(), urls)
        })
        .collect()
    })
    .unwrap_or_default();
  WebTestResult {
    test: test.to_string(),
    expected: words("expected"),
    actual: words("actual"),
    is_unexpected: flag("is_unexpected"),
    is_regression: flag("is_regression"),
    artifacts,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn walks_the_test_trie() {
    let json = json!({
      "tests": {
        "external": {"wpt": {
          "a.html": {"expected": "PASS", "actual": "FAIL FAIL", "is_unexpected": true,
                     "artifacts": {"actual_text": ["https://r/a-actual.txt"]}},
          "b.html": {"expected": "PASS", "actual": "PASS"}
        }}
      }
    });
    let results = WebTestResults::from_json("blink_web_tests", &json).unwrap();
    assert_eq!(results.step_name(), "blink_web_tests");
    let a = results.result_for_test("external/wpt/a.html").unwrap();
    assert_eq!(a.actual, vec!["FAIL", "FAIL"]);
    assert!(!a.did_pass());
    assert_eq!(a.baseline_url("txt"), Some("https://r/a-actual.txt"));
    assert_eq!(a.baseline_url("png"), None);
    let unexpected: Vec<_> = results.didnt_run_as_expected().map(|r| r.test.as_str()).collect();
    assert_eq!(unexpected, vec!["external/wpt/a.html"]);
  }

  #[test]
  fn honours_the_path_delimiter() {
    let json = json!({
      "path_delimiter": "::",
      "tests": {"webdriver": {"t.py": {"actual": "PASS"}}}
    });
    let results = WebTestResults::from_json("webdriver", &json).unwrap();
    assert!(results.result_for_test("webdriver::t.py").is_some());
  }

  #[test]
  fn missing_tests_object_is_rejected() {
    let err = WebTestResults::parse(Path::new("r.json"), "s", "{}").unwrap_err();
    assert!(err.to_string().contains("no 'tests' object"));
  }
}
