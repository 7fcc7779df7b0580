//! Preserving what ports that are not rebaselined currently see.
//!
//! Writing a new baseline into a port's version directory changes the
//! resolution of every port that reaches that directory through its
//! fallback chain. Before any new baseline is written, each such port that
//! is not itself being rebaselined gets a copy of the baseline it used to
//! resolve to, placed in its own version directory. A port that resolved to
//! nothing gets an empty file, which keeps the "no baseline" outcome.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::set::BaselineSet;
use super::{baseline_name, resolution_dirs};
use crate::config::{Port, PortHandle};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BaselineCopy {
  /// `None` materializes an empty baseline.
  pub source: Option<PathBuf>,
  pub dest: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BaselineCopier {
  web_tests: PathBuf,
  ports: Vec<Port>,
}

impl BaselineCopier {
  /// `ports` is every port whose resolution must be preserved.
  pub fn new(web_tests: impl Into<PathBuf>, ports: Vec<Port>) -> Self {
    Self {
      web_tests: web_tests.into(),
      ports,
    }
  }

  fn port(&self, name: &str) -> Port {
    self
      .ports
      .iter()
      .find(|p| p.name() == name)
      .cloned()
      .unwrap_or_else(|| Port::new(name))
  }

  /// Copies needed before new (`test`, `suffix`) baselines from `set` are
  /// written. Copies to the same destination are deduplicated.
  pub fn find_baselines_to_copy(&self, test: &str, suffix: &str, set: &BaselineSet) -> Vec<BaselineCopy> {
    let covered_names = set.ports_for(test);
    let covered_dirs: BTreeSet<PathBuf> = covered_names
      .iter()
      .map(|name| self.port(name).baseline_version_dir(&self.web_tests))
      .collect();
    let name = baseline_name(test, suffix);
    let mut copies: BTreeMap<PathBuf, Option<PathBuf>> = BTreeMap::new();

    for port in &self.ports {
      if covered_names.contains(port.name()) {
        continue;
      }
      let dirs = resolution_dirs(port, &self.web_tests);
      let Some(first_covered) = dirs.iter().position(|d| covered_dirs.contains(d)) else {
        continue;
      };
      let current = dirs.iter().position(|d| d.join(&name).is_file());
      if current.is_some_and(|c| c < first_covered) {
        continue;
      }
      let dest_dir = &dirs[0];
      if first_covered == 0 || dest_dir.as_path() == self.web_tests.as_path() {
        continue;
      }
      let source = current.map(|c| dirs[c].join(&name));
      copies.entry(dest_dir.join(&name)).or_insert(source);
    }

    copies
      .into_iter()
      .map(|(dest, source)| BaselineCopy { source, dest })
      .collect()
  }

  /// Perform `copies`. All copies must be planned before any is written.
  pub fn write_copies(&self, copies: &[BaselineCopy]) -> Result<usize> {
    for copy in copies {
      if let Some(parent) = copy.dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
      }
      match &copy.source {
        Some(source) => {
          debug!(
            "Copying baseline from {} to {}",
            self.relative(source).display(),
            self.relative(&copy.dest).display()
          );
          std::fs::copy(source, &copy.dest).map_err(|e| Error::io(source, e))?;
        }
        None => {
          debug!("Writing empty baseline to {}", self.relative(&copy.dest).display());
          std::fs::write(&copy.dest, b"").map_err(|e| Error::io(&copy.dest, e))?;
        }
      }
    }
    Ok(copies.len())
  }

  fn relative<'a>(&self, path: &'a Path) -> &'a Path {
    path.strip_prefix(&self.web_tests).unwrap_or(path)
  }
}
