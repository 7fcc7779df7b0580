//! Ports: the platform a configuration runs on.
//!
//! The configuration space only asks a port whether it skips a test; the
//! baseline machinery additionally needs its fallback chain.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::expectations::tagged::TaggedExpectations;

/// Platform-level tables that are not tied to a single builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PlatformTable {
  /// Port name to platform directories searched for baselines, most specific first.
  #[serde(default)]
  pub fallback_paths: BTreeMap<String, Vec<String>>,
  /// OS macro to the (lowercase) versions it stands for.
  #[serde(default)]
  pub specifier_macros: BTreeMap<String, Vec<String>>,
}

impl PlatformTable {
  pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
    serde_json::from_str(text)
  }

  pub fn load(path: &Path) -> Result<Self> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Self::from_json_str(&text).map_err(|e| Error::json(path, e))
  }

  /// Build the port named `name`, applying its fallback chain.
  pub fn port(&self, name: &str) -> Port {
    let mut port = Port::new(name);
    if let Some(fallback) = self.fallback_paths.get(name) {
      port.fallback = fallback.clone();
    }
    port
  }

  /// Every port with a declared fallback chain.
  pub fn port_names(&self) -> Vec<&str> {
    self.fallback_paths.keys().map(String::as_str).collect()
  }
}

/// The two questions the configuration space asks about a platform.
pub trait PortHandle: Send + Sync + fmt::Debug {
  fn name(&self) -> &str;

  /// Lowercased tags used to match tag-guarded expectation lines.
  fn tags(&self) -> &BTreeSet<String>;

  /// Why `test` is disabled outside of metadata (smoke-test restrictions,
  /// never-fix list), if it is.
  fn external_disable_reason(&self, test: &str) -> Option<String>;

  /// Whether this port does not run `test` at all.
  fn skips_test(&self, test: &str) -> bool {
    self.external_disable_reason(test).is_some()
  }
}

#[derive(Debug, Clone)]
pub struct Port {
  name: String,
  os: String,
  version: String,
  fallback: Vec<String>,
  tags: BTreeSet<String>,
  smoke_tests: Option<Arc<BTreeSet<String>>>,
  never_fix: Option<Arc<TaggedExpectations>>,
}

impl Port {
  /// Create a port from a name like `test-win-win7` or `linux-trusty`: the
  /// last segment is the OS version and the one before it the OS.
  pub fn new(name: &str) -> Self {
    let segments: Vec<&str> = name.split('-').collect();
    let (os, version) = match segments.as_slice() {
      [.., os, version] => (os.to_string(), version.to_string()),
      _ => (name.to_string(), name.to_string()),
    };
    let tags = [os.clone(), version.clone()].into_iter().collect();
    Self {
      name: name.to_string(),
      os,
      version,
      fallback: vec![name.to_string()],
      tags,
      smoke_tests: None,
      never_fix: None,
    }
  }

  pub fn os(&self) -> &str {
    &self.os
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn with_tags<I, S>(mut self, tags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self
      .tags
      .extend(tags.into_iter().map(|t| t.as_ref().to_ascii_lowercase()));
    self
  }

  pub fn with_fallback(mut self, fallback: Vec<String>) -> Self {
    self.fallback = fallback;
    self
  }

  /// Restrict the port to an explicit list of tests.
  pub fn with_smoke_tests(mut self, tests: Arc<BTreeSet<String>>) -> Self {
    self.smoke_tests = Some(tests);
    self
  }

  pub fn with_never_fix(mut self, never_fix: Arc<TaggedExpectations>) -> Self {
    self.never_fix = Some(never_fix);
    self
  }

  /// Platform directory names searched for baselines, most specific first.
  pub fn fallback_dirs(&self) -> &[String] {
    &self.fallback
  }

  /// Absolute platform directories searched for baselines. The generic
  /// location (next to the test) is searched after all of these.
  pub fn baseline_search_path(&self, web_tests: &Path) -> Vec<PathBuf> {
    self
      .fallback
      .iter()
      .map(|dir| web_tests.join("platform").join(dir))
      .collect()
  }

  /// Directory new baselines for this port are written to.
  pub fn baseline_version_dir(&self, web_tests: &Path) -> PathBuf {
    match self.fallback.first() {
      Some(dir) => web_tests.join("platform").join(dir),
      None => web_tests.join("platform").join(&self.name),
    }
  }
}

impl PortHandle for Port {
  fn name(&self) -> &str {
    &self.name
  }

  fn tags(&self) -> &BTreeSet<String> {
    &self.tags
  }

  fn external_disable_reason(&self, test: &str) -> Option<String> {
    if let Some(smoke) = &self.smoke_tests {
      if !smoke.contains(test) {
        return Some("not in the smoke test list".to_string());
      }
    }
    let never_fix = self.never_fix.as_ref()?;
    let line = never_fix.line_for(test, &self.tags)?;
    if line.is_skip() {
      Some("listed in NeverFixTests".to_string())
    } else {
      None
    }
  }
}
