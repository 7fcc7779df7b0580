//! One pass of the legacy updater over the checkout's expectation files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::info;

use super::tagged::TaggedExpectations;
use super::updater::ExpectationsUpdater;
use crate::baseline::WebTestResults;
use crate::error::{Error, Result};
use crate::git::Git;
use crate::metadata;

pub const GENERIC_EXPECTATIONS: &str = "TestExpectations";
pub const WEBDRIVER_EXPECTATIONS: &str = "WebDriverExpectations";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyRunOptions {
  /// Drop or rename lines of tests the change deleted or renamed.
  pub clean_up_test_expectations: bool,
  pub skip_slow_timeouts: bool,
  pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacySummary {
  pub lines_written: usize,
  /// Tests whose failures new baselines should fix, sorted.
  pub tests_to_rebaseline: Vec<String>,
  /// Expectation files whose contents changed.
  pub changed: Vec<PathBuf>,
}

struct ExpectationFile {
  path: PathBuf,
  original: String,
  parsed: TaggedExpectations,
}

impl ExpectationFile {
  /// A missing file reads as empty and is only created if lines land in it.
  fn load(path: PathBuf) -> Result<Self> {
    let original = if path.is_file() {
      std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?
    } else {
      String::new()
    };
    let parsed = TaggedExpectations::parse(&path.to_string_lossy(), &original)?;
    Ok(Self {
      path,
      original,
      parsed,
    })
  }

  fn is_changed(&self) -> bool {
    self.parsed.render() != self.original
  }
}

/// Update `TestExpectations` and `WebDriverExpectations` under `web_tests`
/// from the results of each port's build.
pub fn update_expectation_files(
  updater: &ExpectationsUpdater<'_>,
  web_tests: &Path,
  git: &dyn Git,
  builds: &[(String, Option<WebTestResults>)],
  options: LegacyRunOptions,
) -> Result<LegacySummary> {
  let failing = updater.collect(builds);
  let mut merged = updater.merge(failing);
  let tests_to_rebaseline = updater.take_tests_to_rebaseline(&mut merged);
  let dict = updater.line_dict(&merged);

  let mut generic = ExpectationFile::load(web_tests.join(GENERIC_EXPECTATIONS))?;
  let mut webdriver = ExpectationFile::load(web_tests.join(WEBDRIVER_EXPECTATIONS))?;

  if options.clean_up_test_expectations {
    let relative = |path: &Path| -> Option<String> {
      let relative = path.strip_prefix(web_tests).ok()?;
      Some(relative.to_string_lossy().replace('\\', "/"))
    };
    let deleted: BTreeSet<String> = git
      .changed_files(Some("D"))?
      .iter()
      .filter_map(|p| relative(p))
      .collect();
    let renamed: BTreeMap<String, String> = git
      .renamed_files()?
      .iter()
      .filter_map(|(from, to)| Some((relative(from)?, relative(to)?)))
      .collect();
    for file in [&mut generic, &mut webdriver] {
      updater.cleanup(&mut file.parsed, &deleted, &renamed, web_tests);
    }
  }

  let lines_written = updater.write_lines(&dict, &mut generic.parsed, &mut webdriver.parsed);
  if options.skip_slow_timeouts {
    updater.skip_slow_timeouts(&mut generic.parsed);
  }

  let mut changed = Vec::new();
  for file in [&generic, &webdriver] {
    if !file.is_changed() {
      continue;
    }
    if !options.dry_run {
      metadata::write_text(&file.path, &file.parsed.render())?;
    }
    info!("Updated {}", file.path.display());
    changed.push(file.path.clone());
  }
  Ok(LegacySummary {
    lines_written,
    tests_to_rebaseline,
    changed,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::baseline::WebTestResult;
  use crate::config::builders::fixtures::builders;
  use crate::config::PlatformTable;
  use crate::git::fake::FakeGit;
  use crate::manifest::fixtures::wpt_manifest;
  use crate::manifest::ManifestSet;
  use tempfile::TempDir;

  const GENERIC: &str = "\
# tags: [ Linux Mac Mac10.10 Mac10.11 Trusty Win Win7 Win10 ]
# results: [ Crash Failure Pass Skip Timeout ]

crbug.com/1 external/wpt/gone.html [ Failure ]

# ====== New tests from wpt-importer added here ======
";

  fn failing(test: &str, actual: &str) -> WebTestResult {
    WebTestResult {
      test: test.to_string(),
      expected: vec!["PASS".to_string()],
      actual: actual.split(' ').map(str::to_string).collect(),
      is_unexpected: true,
      ..WebTestResult::default()
    }
  }

  fn linux_results() -> Vec<(String, Option<WebTestResults>)> {
    vec![(
      "test-linux-trusty".to_string(),
      Some(WebTestResults::new(
        "blink_web_tests",
        vec![
          failing("external/wpt/crash.html", "CRASH"),
          failing("external/wpt/pass.html", "FAIL"),
        ],
      )),
    )]
  }

  #[test]
  fn writes_new_lines_and_cleans_up_deleted_tests() {
    let dir = TempDir::new().unwrap();
    let web_tests = dir.path();
    std::fs::write(web_tests.join(GENERIC_EXPECTATIONS), GENERIC).unwrap();
    let git = FakeGit {
      changed: [web_tests.join("external/wpt/gone.html")].into_iter().collect(),
      ..FakeGit::default()
    };
    let builders = builders();
    let platforms = PlatformTable::default();
    let manifests = ManifestSet::new(vec![wpt_manifest()]);
    let updater = ExpectationsUpdater::new(&builders, &platforms, &manifests);

    let summary = update_expectation_files(
      &updater,
      web_tests,
      &git,
      &linux_results(),
      LegacyRunOptions {
        clean_up_test_expectations: true,
        ..LegacyRunOptions::default()
      },
    )
    .unwrap();

    assert_eq!(summary.tests_to_rebaseline, vec!["external/wpt/pass.html"]);
    assert_eq!(summary.changed, vec![web_tests.join(GENERIC_EXPECTATIONS)]);
    let written = std::fs::read_to_string(web_tests.join(GENERIC_EXPECTATIONS)).unwrap();
    assert!(!written.contains("gone.html"));
    assert!(written.contains("external/wpt/crash.html [ Crash ]"));
    assert!(!web_tests.join(WEBDRIVER_EXPECTATIONS).exists());
  }

  #[test]
  fn dry_run_reports_without_writing() {
    let dir = TempDir::new().unwrap();
    let web_tests = dir.path();
    std::fs::write(web_tests.join(GENERIC_EXPECTATIONS), GENERIC).unwrap();
    let builders = builders();
    let platforms = PlatformTable::default();
    let manifests = ManifestSet::new(vec![wpt_manifest()]);
    let updater = ExpectationsUpdater::new(&builders, &platforms, &manifests);

    let summary = update_expectation_files(
      &updater,
      web_tests,
      &FakeGit::default(),
      &linux_results(),
      LegacyRunOptions {
        dry_run: true,
        ..LegacyRunOptions::default()
      },
    )
    .unwrap();
    assert_eq!(summary.changed.len(), 1);
    assert_eq!(
      std::fs::read_to_string(web_tests.join(GENERIC_EXPECTATIONS)).unwrap(),
      GENERIC
    );
  }
}
