//! Writes tag-guarded lines for tests that failed on try builders.
//!
//! Results from every build are merged into `test → port → result`, ports
//! without results inherit from their siblings, ports with identical outcomes
//! are grouped, and each group becomes one line per simplified platform
//! specifier. Tests whose failures are only baseline mismatches are handed to
//! the rebaseliner instead of getting a line.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::baseline::results::WebTestResults;
use crate::config::{BuilderList, PlatformTable, PortHandle};
use crate::expectations::tagged::{Line, TaggedExpectations, IMPORTER_MARKER};
use crate::manifest::ManifestSet;

/// Bug attached to lines written without a more specific one.
pub const UMBRELLA_BUG: &str = "crbug.com/626703";

const WEBDRIVER_PREFIX: &str = "external/wpt/webdriver/";

/// Statuses of one test on one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleTestResult {
  pub expected: String,
  /// Space-separated statuses across attempts and builds.
  pub actual: String,
  pub bug: String,
}

impl SimpleTestResult {
  pub fn new(actual: impl Into<String>) -> Self {
    Self {
      expected: String::new(),
      actual: actual.into(),
      bug: UMBRELLA_BUG.to_string(),
    }
  }

  pub fn statuses(&self) -> BTreeSet<&str> {
    self.actual.split_whitespace().collect()
  }
}

/// Port name to result.
pub type PortResults = BTreeMap<String, SimpleTestResult>;
/// Test name to per-port results.
pub type FailingResults = BTreeMap<String, PortResults>;
/// Test name to results keyed by the sorted ports sharing them.
pub type MergedResults = BTreeMap<String, BTreeMap<Vec<String>, SimpleTestResult>>;

/// Merge `source` into `target`; differing results for the same port have
/// their statuses joined.
pub fn merge_dicts(target: &mut FailingResults, source: FailingResults) {
  for (test, ports) in source {
    let entry = target.entry(test.clone()).or_default();
    for (port, result) in ports {
      match entry.get_mut(&port) {
        Some(existing) if *existing == result => {}
        Some(existing) => {
          info!("Joining differing results for {test} on {port}");
          existing.actual = format!("{} {}", existing.actual, result.actual);
        }
        None => {
          entry.insert(port, result);
        }
      }
    }
  }
}

fn os_name(port_name: &str) -> &str {
  match port_name.rfind('-') {
    Some(i) => &port_name[..i],
    None => port_name,
  }
}

/// Give each port in `ports_without_results` the union of statuses seen on
/// ports of the same OS, or on every port when none share its OS. A union of
/// only `PASS` is never inferred.
pub fn infer_missing_results(results: &mut FailingResults, ports_without_results: &[String]) {
  for missing in ports_without_results {
    warn!("No results for {missing}, inheriting from other builds");
    for (test, ports) in results.iter_mut() {
      let mut all = BTreeSet::new();
      let mut same_os = BTreeSet::new();
      for (port, result) in ports.iter() {
        if port == missing {
          continue;
        }
        let statuses: Vec<String> = result.statuses().into_iter().map(str::to_string).collect();
        if os_name(port) == os_name(missing) {
          same_os.extend(statuses.iter().cloned());
        }
        all.extend(statuses);
      }
      let statuses = if same_os.is_empty() { all } else { same_os };
      if statuses.is_empty() || (statuses.len() == 1 && statuses.contains("PASS")) {
        continue;
      }
      let inferred = SimpleTestResult::new(statuses.into_iter().collect::<Vec<_>>().join(" "));
      debug!("Inheriting {} for {test} on {missing}", inferred.actual);
      ports.insert(missing.clone(), inferred);
    }
  }
}

/// Group ports whose status sets are equal. Each group is keyed by its
/// sorted port names and keeps the first port's result.
pub fn merge_same_valued_keys(ports: &PortResults) -> BTreeMap<Vec<String>, SimpleTestResult> {
  let mut groups: Vec<(BTreeSet<String>, Vec<String>, SimpleTestResult)> = Vec::new();
  for (port, result) in ports {
    let statuses: BTreeSet<String> = result.statuses().into_iter().map(str::to_string).collect();
    match groups.iter_mut().find(|(s, _, _)| *s == statuses) {
      Some((_, members, _)) => members.push(port.clone()),
      None => groups.push((statuses, vec![port.clone()], result.clone())),
    }
  }
  groups
    .into_iter()
    .map(|(_, members, result)| (members, result))
    .collect()
}

/// Expectation results for a test that could not be rebaselined.
pub fn expectations_for(result: &SimpleTestResult) -> Vec<String> {
  let statuses = result.statuses();
  if statuses.contains("MISSING") {
    return vec!["Skip".to_string()];
  }
  let mut expectations = BTreeSet::new();
  for status in statuses {
    match status {
      "TEXT" | "IMAGE+TEXT" | "IMAGE" | "AUDIO" | "FAIL" => {
        expectations.insert("Failure".to_string());
      }
      "TIMEOUT" | "CRASH" | "PASS" => {
        expectations.insert(capitalize(status));
      }
      _ => {}
    }
  }
  expectations.into_iter().collect()
}

fn capitalize(s: &str) -> String {
  let lower = s.to_ascii_lowercase();
  let mut chars = lower.chars();
  match chars.next() {
    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
    None => String::new(),
  }
}

/// Shortest specifier list equivalent to `specifiers`.
///
/// A macro replaces its versions once every version some try builder covers
/// is present; if only macros remain and they are all of them, the line
/// applies everywhere and the result is empty.
pub fn simplify_specifiers<I, S>(
  specifiers: I,
  macros: &BTreeMap<String, Vec<String>>,
  covered: &BTreeSet<String>,
) -> Vec<String>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut specifiers: BTreeSet<String> = specifiers
    .into_iter()
    .map(|s| s.as_ref().to_ascii_lowercase())
    .collect();
  for (name, versions) in macros {
    let versions: BTreeSet<String> = versions
      .iter()
      .map(|v| v.to_ascii_lowercase())
      .filter(|v| covered.contains(v))
      .collect();
    if versions.is_empty() || !versions.is_subset(&specifiers) {
      continue;
    }
    specifiers.retain(|s| !versions.contains(s));
    specifiers.insert(name.to_ascii_lowercase());
  }
  let all_macros: BTreeSet<String> = macros.keys().map(|m| m.to_ascii_lowercase()).collect();
  if specifiers == all_macros {
    return Vec::new();
  }
  specifiers.iter().map(|s| capitalize(s)).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyOptions {
  /// Also write lines for tests that passed unexpectedly.
  pub include_unexpected_pass: bool,
  /// Only clean up lines for tests deleted or renamed by the change.
  pub clean_up_affected_tests_only: bool,
}

/// Lines to write, per test, and the version specifiers they re-derive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineDict {
  pub lines: BTreeMap<String, Vec<Line>>,
  pub configs_to_remove: BTreeMap<String, BTreeSet<String>>,
}

impl LineDict {
  pub fn is_empty(&self) -> bool {
    self.lines.is_empty()
  }
}

pub struct ExpectationsUpdater<'a> {
  builders: &'a BuilderList,
  macros: &'a BTreeMap<String, Vec<String>>,
  manifests: &'a ManifestSet,
  try_ports: Vec<Arc<dyn PortHandle>>,
  options: LegacyOptions,
}

impl<'a> ExpectationsUpdater<'a> {
  pub fn new(builders: &'a BuilderList, platforms: &'a PlatformTable, manifests: &'a ManifestSet) -> Self {
    Self {
      builders,
      macros: &platforms.specifier_macros,
      manifests,
      try_ports: Vec::new(),
      options: LegacyOptions::default(),
    }
  }

  /// Ports of the try builders, consulted for tests they skip.
  pub fn with_try_ports(mut self, ports: Vec<Arc<dyn PortHandle>>) -> Self {
    self.try_ports = ports;
    self
  }

  pub fn with_options(mut self, options: LegacyOptions) -> Self {
    self.options = options;
    self
  }

  pub fn is_wpt_test(&self, test: &str) -> bool {
    self
      .manifests
      .test_roots()
      .any(|root| test.starts_with(root) && test[root.len()..].starts_with('/'))
  }

  pub fn is_webdriver_test(&self, test: &str) -> bool {
    test.starts_with(WEBDRIVER_PREFIX)
  }

  pub fn is_reference_test(&self, test: &str) -> bool {
    self
      .manifests
      .find_test_name(test)
      .is_some_and(|(_, t)| t.test_type.is_reftest())
  }

  /// Failing WPT results of one build, keyed by test.
  pub fn failing_results(&self, port_name: &str, results: &WebTestResults) -> FailingResults {
    debug!(
      "Getting failing results dictionary for {} step on {port_name}",
      results.step_name()
    );
    let mut failing = FailingResults::new();
    for result in results.didnt_run_as_expected() {
      if result.did_pass() && !self.options.include_unexpected_pass {
        continue;
      }
      if !self.is_wpt_test(&result.test) {
        continue;
      }
      let statuses = result.actual_statuses();
      if statuses.contains("SKIP") {
        continue;
      }
      let actual = statuses.into_iter().collect::<Vec<_>>().join(" ");
      failing
        .entry(result.test.clone())
        .or_default()
        .insert(port_name.to_string(), SimpleTestResult::new(actual));
    }
    failing
  }

  /// Merge the failing results of every build. Builds without results
  /// inherit from the others.
  pub fn collect(&self, builds: &[(String, Option<WebTestResults>)]) -> FailingResults {
    let mut merged = FailingResults::new();
    let mut without_results = Vec::new();
    for (port_name, results) in builds {
      match results {
        Some(results) if !results.is_empty() => {
          info!("Merging failing results for {port_name}, {}", results.step_name());
          merge_dicts(&mut merged, self.failing_results(port_name, results));
        }
        _ => {
          warn!("No results for {port_name}");
          without_results.push(port_name.clone());
        }
      }
    }
    infer_missing_results(&mut merged, &without_results);
    merged
  }

  pub fn merge(&self, results: FailingResults) -> MergedResults {
    results
      .iter()
      .map(|(test, ports)| (test.clone(), merge_same_valued_keys(ports)))
      .collect()
  }

  pub fn can_rebaseline(&self, test: &str, result: &SimpleTestResult) -> bool {
    if self.is_reference_test(test) || self.is_webdriver_test(test) {
      return false;
    }
    let statuses = result.statuses();
    !["CRASH", "TIMEOUT", "MISSING"]
      .iter()
      .any(|s| statuses.contains(s))
  }

  /// Pull out tests that can be fixed by new baselines. Their results are
  /// rewritten as if the rebaseline succeeded: `FAIL` becomes `PASS`, and a
  /// group left with only `PASS` needs no line at all.
  pub fn take_tests_to_rebaseline(&self, merged: &mut MergedResults) -> Vec<String> {
    let mut tests = BTreeSet::new();
    for (test, groups) in merged.iter_mut() {
      let eligible: Vec<Vec<String>> = groups
        .iter()
        .filter(|(_, result)| self.can_rebaseline(test, result))
        .map(|(ports, _)| ports.clone())
        .collect();
      for ports in eligible {
        tests.insert(test.clone());
        let Some(result) = groups.get_mut(&ports) else {
          continue;
        };
        let mut statuses: BTreeSet<String> =
          result.statuses().into_iter().map(str::to_string).collect();
        if !statuses.remove("FAIL") {
          continue;
        }
        statuses.insert("PASS".to_string());
        if statuses.len() == 1 {
          groups.remove(&ports);
        } else {
          result.actual = statuses.into_iter().collect::<Vec<_>>().join(" ");
        }
      }
    }
    merged.retain(|_, groups| !groups.is_empty());
    tests.into_iter().collect()
  }

  fn version_specifier(&self, port_name: &str) -> Option<String> {
    self.builders.version_specifier_for_port_name(port_name)
  }

  fn simplify(&self, specifiers: &[String]) -> Vec<String> {
    simplify_specifiers(specifiers, self.macros, &self.builders.try_version_specifiers())
  }

  fn skipped_specifiers(&self, test: &str) -> Vec<String> {
    self
      .try_ports
      .iter()
      .filter(|port| port.skips_test(test))
      .filter_map(|port| self.version_specifier(port.name()))
      .collect()
  }

  /// One specifier per line to write; a single empty string means the
  /// line applies to every platform.
  pub fn normalized_specifiers(&self, test: &str, ports: &[String]) -> Vec<String> {
    let specifiers: Vec<String> = ports.iter().filter_map(|p| self.version_specifier(p)).collect();
    if specifiers.is_empty() {
      return vec![String::new()];
    }
    let mut extended = specifiers.clone();
    extended.extend(self.skipped_specifiers(test));
    if self.simplify(&extended).is_empty() {
      return vec![String::new()];
    }
    let simplified = self.simplify(&specifiers);
    if simplified.is_empty() {
      vec![String::new()]
    } else {
      simplified
    }
  }

  pub fn create_lines(&self, test: &str, ports: &[String], result: &SimpleTestResult) -> Vec<Line> {
    let expectations = expectations_for(result);
    let skip = expectations.iter().any(|e| e == "Skip");
    self
      .normalized_specifiers(test, ports)
      .into_iter()
      .map(|specifier| {
        let mut line = Line::new(test, expectations.clone());
        if !specifier.is_empty() {
          line = line.with_tags(vec![specifier]);
        }
        if !skip && !result.bug.is_empty() {
          line = line.with_bugs(vec![result.bug.clone()]);
        }
        line
      })
      .collect()
  }

  pub fn line_dict(&self, merged: &MergedResults) -> LineDict {
    let mut dict = LineDict::default();
    for (test, groups) in merged {
      if !self.is_wpt_test(test) {
        warn!("Non-WPT test \"{test}\" unexpectedly passed to create_line_dict.");
        continue;
      }
      for (ports, result) in groups {
        dict
          .lines
          .entry(test.clone())
          .or_default()
          .extend(self.create_lines(test, ports, result));
        dict
          .configs_to_remove
          .entry(test.clone())
          .or_default()
          .extend(ports.iter().filter_map(|p| self.version_specifier(p)));
      }
    }
    dict
  }

  /// Strip re-derived version specifiers from existing lines of each test.
  /// A line left covering no version is removed; an untagged line is first
  /// expanded to every version.
  pub fn remove_configurations(
    &self,
    expectations: &mut TaggedExpectations,
    configs_to_remove: &BTreeMap<String, BTreeSet<String>>,
  ) -> usize {
    let all_versions: BTreeSet<String> = self
      .macros
      .values()
      .flatten()
      .map(|v| v.to_ascii_lowercase())
      .collect();
    let everything: BTreeSet<String> = all_versions.clone();
    let mut emptied = BTreeSet::new();
    let mut rewritten: BTreeMap<usize, Vec<String>> = BTreeMap::new();

    for line in expectations.lines() {
      if line.is_glob {
        continue;
      }
      let Some(remove) = configs_to_remove.get(&line.test) else {
        continue;
      };
      let mut extra = Vec::new();
      let mut covered = BTreeSet::new();
      for tag in &line.tags {
        let lower = tag.to_ascii_lowercase();
        if let Some(versions) = self.macros.iter().find(|(m, _)| m.eq_ignore_ascii_case(&lower)) {
          covered.extend(versions.1.iter().map(|v| v.to_ascii_lowercase()));
        } else if all_versions.contains(&lower) {
          covered.insert(lower);
        } else {
          extra.push(tag.clone());
        }
      }
      if covered.is_empty() {
        covered = all_versions.clone();
      }
      let remaining: BTreeSet<String> = covered.difference(remove).cloned().collect();
      if remaining == covered {
        continue;
      }
      if remaining.is_empty() {
        emptied.insert(line.line_number);
        continue;
      }
      let mut tags: Vec<String> = simplify_specifiers(&remaining, self.macros, &everything)
        .iter()
        .map(|t| expectations.canonical_tag(t))
        .collect();
      tags.extend(extra);
      rewritten.insert(line.line_number, tags);
    }

    let removed = expectations.remove_lines(|line| emptied.contains(&line.line_number));
    expectations.modify_lines(|line| {
      if let Some(tags) = rewritten.get(&line.line_number) {
        line.tags = tags.clone();
      }
    });
    removed + rewritten.len()
  }

  /// Write new lines after the importer marker; WebDriver lines go to their
  /// own file. Returns how many lines were written.
  pub fn write_lines(
    &self,
    dict: &LineDict,
    generic: &mut TaggedExpectations,
    webdriver: &mut TaggedExpectations,
  ) -> usize {
    if dict.is_empty() {
      info!("No lines to write to TestExpectations or WebDriverExpectations.");
      return 0;
    }
    if !dict.configs_to_remove.is_empty() {
      info!("Clean up stale expectations that could conflict with new expectations");
      self.remove_configurations(generic, &dict.configs_to_remove);
      self.remove_configurations(webdriver, &dict.configs_to_remove);
    }

    let (webdriver_lines, generic_lines): (Vec<Line>, Vec<Line>) = dict
      .lines
      .values()
      .flatten()
      .cloned()
      .partition(|line| self.is_webdriver_test(&line.test));
    let written = webdriver_lines.len() + generic_lines.len();
    for (file, lines) in [(generic, generic_lines), (webdriver, webdriver_lines)] {
      if lines.is_empty() {
        continue;
      }
      let rendered: Vec<String> = lines.iter().map(Line::to_string).collect();
      info!("Lines to write to {}:\n {}", file.name(), rendered.join("\n"));
      file.insert_after_marker(IMPORTER_MARKER, lines);
    }
    written
  }

  /// Turn `[ Timeout ]` lines of slow tests into `[ Skip Timeout ]`.
  pub fn skip_slow_timeouts(&self, expectations: &mut TaggedExpectations) -> bool {
    info!("Skip Slow and Timeout tests.");
    let manifests = self.manifests;
    let mut changed = false;
    expectations.modify_lines(|line| {
      let only_timeout = line.results.len() == 1 && line.has_result("Timeout");
      if line.is_glob || !only_timeout {
        return;
      }
      let slow = manifests
        .find_test_name(&line.test)
        .is_some_and(|(_, test)| test.slow);
      if slow {
        line.results = vec!["Skip".to_string(), "Timeout".to_string()];
        changed = true;
      }
    });
    changed
  }

  /// The file a test comes from, relative to `web_tests`. `None` when a WPT
  /// test is no longer in any manifest.
  pub fn root_file(&self, test: &str) -> Option<String> {
    if self.is_webdriver_test(test) {
      return test.split(">>").next().map(str::to_string);
    }
    if self.is_wpt_test(test) {
      return self.manifests.file_for_test_name(test);
    }
    Some(test.to_string())
  }

  /// Drop lines for deleted tests and rename lines for renamed ones. Lines
  /// whose test no longer exists are dropped too, unless only tests affected
  /// by the change are cleaned up.
  pub fn cleanup(
    &self,
    expectations: &mut TaggedExpectations,
    deleted: &BTreeSet<String>,
    renamed: &BTreeMap<String, String>,
    web_tests: &Path,
  ) -> usize {
    info!("Updating {} for any removed or renamed tests.", expectations.name());
    let mut remove = BTreeSet::new();
    let mut renames: BTreeMap<usize, String> = BTreeMap::new();
    for line in expectations.lines() {
      if line.is_glob || line.test.is_empty() {
        continue;
      }
      let root = self.root_file(&line.test);
      match root {
        Some(root) if deleted.contains(&root) => {
          remove.insert(line.line_number);
        }
        Some(root) if renamed.contains_key(&root) => {
          let new_file = &renamed[&root];
          let new_name = if self.is_webdriver_test(&line.test) {
            let suffix = &line.test[root.len()..];
            format!("{new_file}{suffix}")
          } else if self.is_wpt_test(&line.test) {
            let old_stem = root.strip_suffix(".js").map(|s| format!("{s}.")).unwrap_or(root.clone());
            let new_stem = new_file
              .strip_suffix(".js")
              .map(|s| format!("{s}."))
              .unwrap_or(new_file.clone());
            line.test.replace(&old_stem, &new_stem)
          } else {
            new_file.clone()
          };
          renames.insert(line.line_number, new_name);
        }
        Some(root) if self.is_wpt_test(&line.test) || web_tests.join(&root).is_file() => {}
        _ => {
          if !self.options.clean_up_affected_tests_only {
            remove.insert(line.line_number);
          }
        }
      }
    }
    let removed = expectations.remove_lines(|line| remove.contains(&line.line_number));
    expectations.modify_lines(|line| {
      if let Some(name) = renames.get(&line.line_number) {
        line.test = name.clone();
      }
    });
    removed + renames.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::baseline::results::WebTestResult;
  use crate::config::builders::fixtures::builders;
  use crate::config::Port;
  use crate::manifest::fixtures::wpt_manifest;
  use tempfile::TempDir;

  fn platforms() -> PlatformTable {
    PlatformTable::from_json_str(
      r#"{"specifier_macros": {
        "win": ["win7", "win10"],
        "mac": ["mac10.10", "mac10.11"],
        "linux": ["trusty"]
      }}"#,
    )
    .unwrap()
  }

  fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  fn failing(test: &str, actual: &str) -> WebTestResult {
    WebTestResult {
      test: test.to_string(),
      expected: strings(&["PASS"]),
      actual: actual.split(' ').map(str::to_string).collect(),
      is_unexpected: true,
      ..WebTestResult::default()
    }
  }

  const GENERIC: &str = "\
# tags: [ Linux Mac Mac10.10 Mac10.11 Trusty Win Win7 Win10 ]
# results: [ Crash Failure Pass Skip Timeout ]

crbug.com/1 external/wpt/old.html [ Failure ]

# ====== New tests from wpt-importer added here ======
crbug.com/2 external/wpt/x.html [ Timeout ]
";

  #[test]
  fn simplifies_specifiers_against_try_coverage() {
    let macros: BTreeMap<String, Vec<String>> = [
      ("win".to_string(), strings(&["win7", "win10", "win11"])),
      ("linux".to_string(), strings(&["trusty"])),
    ]
    .into_iter()
    .collect();
    let covered = set(&["win7", "win10", "trusty"]);
    assert_eq!(simplify_specifiers(["Win7", "win10"], &macros, &covered), vec!["Win"]);
    assert!(simplify_specifiers(["win7", "win10", "trusty"], &macros, &covered).is_empty());

    let covered = set(&["win7", "win10", "win11", "trusty"]);
    assert_eq!(
      simplify_specifiers(["win7", "win10"], &macros, &covered),
      vec!["Win10", "Win7"]
    );
    assert!(simplify_specifiers(["win7", "win10", "win11", "trusty"], &macros, &covered).is_empty());
  }

  #[test]
  fn normalizes_ports_into_macro_specifiers() {
    let builders = builders();
    let platforms = platforms();
    let manifests = ManifestSet::new(vec![wpt_manifest()]);
    let updater = ExpectationsUpdater::new(&builders, &platforms, &manifests);
    let ports = strings(&[
      "test-mac-mac10.10",
      "test-mac-mac10.11",
      "test-win-win10",
      "test-win-win7",
    ]);
    assert_eq!(
      updater.normalized_specifiers("external/wpt/pass.html", &ports),
      vec!["Mac", "Win"]
    );
    let mut everywhere = ports.clone();
    everywhere.push("test-linux-trusty".to_string());
    assert_eq!(
      updater.normalized_specifiers("external/wpt/pass.html", &everywhere),
      vec![""]
    );
  }

  #[test]
  fn skipped_ports_extend_lines_to_all_platforms() {
    let builders = builders();
    let platforms = platforms();
    let manifests = ManifestSet::new(vec![wpt_manifest()]);
    let smoke: BTreeSet<String> = BTreeSet::new();
    let linux: Arc<dyn PortHandle> =
      Arc::new(Port::new("test-linux-trusty").with_smoke_tests(Arc::new(smoke)));
    let updater = ExpectationsUpdater::new(&builders, &platforms, &manifests).with_try_ports(vec![linux]);
    let ports = strings(&[
      "test-mac-mac10.10",
      "test-mac-mac10.11",
      "test-win-win10",
      "test-win-win7",
    ]);
    assert_eq!(
      updater.normalized_specifiers("external/wpt/pass.html", &ports),
      vec![""]
    );
  }

  #[test]
  fn identical_results_collapse_into_one_group() {
    let ports: PortResults = [
      ("test-win-win7", "FAIL TIMEOUT"),
      ("test-mac-mac10.11", "TIMEOUT FAIL"),
      ("test-linux-trusty", "FAIL TIMEOUT"),
      ("test-win-win10", "CRASH"),
    ]
    .into_iter()
    .map(|(p, a)| (p.to_string(), SimpleTestResult::new(a)))
    .collect();
    let merged = merge_same_valued_keys(&ports);
    assert_eq!(merged.len(), 2);
    let keys: Vec<_> = merged.keys().cloned().collect();
    assert_eq!(
      keys,
      vec![
        strings(&["test-linux-trusty", "test-mac-mac10.11", "test-win-win7"]),
        strings(&["test-win-win10"]),
      ]
    );
  }

  #[test]
  fn ports_without_results_inherit_from_the_same_os() {
    let mut results = FailingResults::new();
    let ports: PortResults = [
      ("test-mac-mac10.11", "TIMEOUT"),
      ("test-win-win10", "FAIL"),
      ("test-linux-trusty", "PASS"),
    ]
    .into_iter()
    .map(|(p, a)| (p.to_string(), SimpleTestResult::new(a)))
    .collect();
    results.insert("external/wpt/a.html".to_string(), ports);
    infer_missing_results(&mut results, &strings(&["test-mac-mac10.10", "test-linux-precise"]));

    let a = &results["external/wpt/a.html"];
    assert_eq!(a["test-mac-mac10.10"].actual, "TIMEOUT");
    assert_eq!(a["test-mac-mac10.10"].bug, UMBRELLA_BUG);
    // Only PASS on the same OS: nothing inferred.
    assert!(!a.contains_key("test-linux-precise"));
  }

  #[test]
  fn differing_results_for_a_port_are_joined() {
    let mut target = FailingResults::new();
    let entry = |actual: &str| -> FailingResults {
      [(
        "external/wpt/a.html".to_string(),
        [("test-win-win7".to_string(), SimpleTestResult::new(actual))].into_iter().collect(),
      )]
      .into_iter()
      .collect()
    };
    merge_dicts(&mut target, entry("FAIL"));
    merge_dicts(&mut target, entry("FAIL"));
    assert_eq!(target["external/wpt/a.html"]["test-win-win7"].actual, "FAIL");
    merge_dicts(&mut target, entry("TIMEOUT"));
    assert_eq!(target["external/wpt/a.html"]["test-win-win7"].actual, "FAIL TIMEOUT");
  }

  #[test]
  fn collects_failures_and_splits_rebaselineable_tests() {
    let builders = builders();
    let platforms = platforms();
    let manifests = ManifestSet::new(vec![wpt_manifest()]);
    let updater = ExpectationsUpdater::new(&builders, &platforms, &manifests);
    let linux = WebTestResults::new(
      "blink_web_tests",
      vec![
        failing("external/wpt/pass.html", "FAIL FAIL"),
        failing("external/wpt/crash.html", "CRASH"),
        failing("external/wpt/fail.html", "FAIL"),
        failing("external/wpt/slow.html", "FAIL PASS"),
        failing("external/wpt/variant.html?foo=baz", "SKIP"),
        failing("fast/not-wpt.html", "FAIL"),
      ],
    );
    let collected = updater.collect(&[("test-linux-trusty".to_string(), Some(linux))]);
    assert_eq!(
      collected.keys().map(String::as_str).collect::<Vec<_>>(),
      vec!["external/wpt/crash.html", "external/wpt/fail.html", "external/wpt/pass.html"]
    );

    let mut merged = updater.merge(collected);
    let rebaseline = updater.take_tests_to_rebaseline(&mut merged);
    assert_eq!(rebaseline, vec!["external/wpt/pass.html"]);
    // Reftests and crashes keep their lines; the rebaselined test needs none.
    assert_eq!(
      merged.keys().map(String::as_str).collect::<Vec<_>>(),
      vec!["external/wpt/crash.html", "external/wpt/fail.html"]
    );
  }

  #[test]
  fn writes_lines_after_the_marker_without_bugs_on_skips() {
    let builders = builders();
    let platforms = platforms();
    let manifests = ManifestSet::new(vec![wpt_manifest()]);
    let updater = ExpectationsUpdater::new(&builders, &platforms, &manifests);
    let mut merged = MergedResults::new();
    merged.insert(
      "external/wpt/crash.html".to_string(),
      [(strings(&["test-win-win10", "test-win-win7"]), SimpleTestResult::new("CRASH TIMEOUT"))]
        .into_iter()
        .collect(),
    );
    merged.insert(
      "external/wpt/a*b.html".to_string(),
      [(strings(&["test-mac-mac10.11"]), SimpleTestResult::new("MISSING"))]
        .into_iter()
        .collect(),
    );
    merged.insert(
      "external/wpt/webdriver/test.py".to_string(),
      [(strings(&["test-linux-trusty"]), SimpleTestResult::new("FAIL"))]
        .into_iter()
        .collect(),
    );
    let dict = updater.line_dict(&merged);
    let mut generic = TaggedExpectations::parse("TestExpectations", GENERIC).unwrap();
    let mut webdriver = TaggedExpectations::parse("WebDriverExpectations", "").unwrap();
    assert_eq!(updater.write_lines(&dict, &mut generic, &mut webdriver), 3);

    let rendered = generic.render();
    assert!(rendered.contains(
      "# ====== New tests from wpt-importer added here ======\n\
       [ Mac10.11 ] external/wpt/a\\*b.html [ Skip ]\n\
       crbug.com/626703 [ Win ] external/wpt/crash.html [ Crash Timeout ]\n\
       crbug.com/2 external/wpt/x.html [ Timeout ]\n"
    ));
    assert_eq!(
      webdriver.render(),
      "# ====== New tests from wpt-importer added here ======\n\
       crbug.com/626703 [ Linux ] external/wpt/webdriver/test.py [ Failure ]\n"
    );
  }

  #[test]
  fn rederived_configurations_are_removed_from_old_lines() {
    let builders = builders();
    let platforms = platforms();
    let manifests = ManifestSet::new(vec![wpt_manifest()]);
    let updater = ExpectationsUpdater::new(&builders, &platforms, &manifests);
    let text = "\
# tags: [ Linux Mac Mac10.10 Mac10.11 Trusty Win Win7 Win10 ]
# results: [ Failure Timeout ]
crbug.com/1 external/wpt/a.html [ Failure ]
crbug.com/1 [ Win7 ] external/wpt/b.html [ Timeout ]
";
    let mut expectations = TaggedExpectations::parse("TestExpectations", text).unwrap();
    let remove: BTreeMap<String, BTreeSet<String>> = [
      ("external/wpt/a.html".to_string(), set(&["win7", "win10", "mac10.10"])),
      ("external/wpt/b.html".to_string(), set(&["win7"])),
    ]
    .into_iter()
    .collect();
    assert_eq!(updater.remove_configurations(&mut expectations, &remove), 2);
    let lines: Vec<String> = expectations.lines().map(Line::to_string).collect();
    assert_eq!(
      lines,
      vec!["crbug.com/1 [ Linux Mac10.11 ] external/wpt/a.html [ Failure ]"]
    );
  }

  #[test]
  fn slow_timeouts_become_skips() {
    let builders = builders();
    let platforms = platforms();
    let manifests = ManifestSet::new(vec![wpt_manifest()]);
    let updater = ExpectationsUpdater::new(&builders, &platforms, &manifests);
    let text = "\
# results: [ Skip Timeout ]
external/wpt/slow.html [ Timeout ]
external/wpt/pass.html [ Timeout ]
";
    let mut expectations = TaggedExpectations::parse("TestExpectations", text).unwrap();
    assert!(updater.skip_slow_timeouts(&mut expectations));
    assert_eq!(
      expectations.render(),
      "# results: [ Skip Timeout ]\n\
       external/wpt/slow.html [ Skip Timeout ]\n\
       external/wpt/pass.html [ Timeout ]\n"
    );
  }

  #[test]
  fn cleans_up_deleted_renamed_and_missing_tests() {
    let builders = builders();
    let platforms = platforms();
    let manifests = ManifestSet::new(vec![wpt_manifest()]);
    let updater = ExpectationsUpdater::new(&builders, &platforms, &manifests);
    let web_tests = TempDir::new().unwrap();
    std::fs::create_dir_all(web_tests.path().join("fast")).unwrap();
    std::fs::write(web_tests.path().join("fast/kept.html"), "").unwrap();
    let text = "\
# results: [ Failure ]
external/wpt/pass.html [ Failure ]
external/wpt/dir/multiglob.https.any.worker.html [ Failure ]
external/wpt/gone.html [ Failure ]
fast/kept.html [ Failure ]
fast/removed.html [ Failure ]
external/wpt/dir/* [ Failure ]
";
    let mut expectations = TaggedExpectations::parse("TestExpectations", text).unwrap();
    let deleted = set(&["external/wpt/pass.html"]);
    let renamed: BTreeMap<String, String> = [(
      "external/wpt/dir/multiglob.https.any.js".to_string(),
      "external/wpt/dir/renamed.any.js".to_string(),
    )]
    .into_iter()
    .collect();
    assert_eq!(
      updater.cleanup(&mut expectations, &deleted, &renamed, web_tests.path()),
      4
    );
    let tests: Vec<&str> = expectations.lines().map(|l| l.test.as_str()).collect();
    assert_eq!(
      tests,
      vec![
        "external/wpt/dir/renamed.any.worker.html",
        "fast/kept.html",
        "external/wpt/dir/"
      ]
    );
  }
}
