//! wptreport documents.
//!
//! A report is either a single JSON object or newline-delimited objects. In
//! the latter form, lines without a `run_info` inherit the most recent one.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::config::RunInfo;
use crate::error::{Error, ParseError, Result};
use crate::status::Status;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubtestResult {
  pub name: String,
  pub status: Status,
  #[serde(default)]
  pub expected: Option<Status>,
  #[serde(default)]
  pub known_intermittent: Vec<Status>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestResult {
  pub test: String,
  pub status: Status,
  #[serde(default)]
  pub expected: Option<Status>,
  #[serde(default)]
  pub known_intermittent: Vec<Status>,
  #[serde(default)]
  pub subtests: Vec<SubtestResult>,
  /// Key into the report's `subsuites`; empty for the base configuration.
  #[serde(default)]
  pub subsuite: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WptReport {
  #[serde(default)]
  pub run_info: Option<RunInfo>,
  #[serde(default)]
  pub results: Vec<TestResult>,
  /// Extra run-info properties layered on results tagged with the subsuite.
  #[serde(default)]
  pub subsuites: BTreeMap<String, RunInfo>,
}

impl WptReport {
  /// Run info for one result, including its subsuite properties.
  pub fn run_info_for(&self, result: &TestResult) -> RunInfo {
    let base = self.run_info.clone().unwrap_or_default();
    match self.subsuites.get(&result.subsuite) {
      Some(extra) => base.merged(extra),
      None => base,
    }
  }
}

/// Parse report text from `path` (used for error messages only).
pub fn parse_reports(path: &Path, text: &str) -> Result<Vec<WptReport>> {
  let trimmed = text.trim();
  if trimmed.is_empty() {
    return Ok(Vec::new());
  }
  if let Ok(report) = serde_json::from_str::<WptReport>(trimmed) {
    return Ok(vec![report]);
  }

  let mut reports = Vec::new();
  let mut run_info: Option<RunInfo> = None;
  let mut subsuites = BTreeMap::new();
  for (index, line) in text.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    let mut report: WptReport = serde_json::from_str(line)
      .map_err(|e| Error::Parse(ParseError::new(path, index + 1, e.to_string())))?;
    match &report.run_info {
      Some(info) => run_info = Some(info.clone()),
      None => report.run_info = run_info.clone(),
    }
    if report.subsuites.is_empty() {
      report.subsuites = subsuites.clone();
    } else {
      subsuites = report.subsuites.clone();
    }
    reports.push(report);
  }
  Ok(reports)
}

/// Read and parse a report file.
pub fn read_reports(path: &Path) -> Result<Vec<WptReport>> {
  let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
  parse_reports(path, &text)
}
