//! Removing platform baselines that fallback already supplies.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use super::{baseline_name, resolution_dirs};
use crate::config::Port;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct BaselineOptimizer {
  web_tests: PathBuf,
  ports: Vec<Port>,
}

impl BaselineOptimizer {
  pub fn new(web_tests: impl Into<PathBuf>, ports: Vec<Port>) -> Self {
    Self {
      web_tests: web_tests.into(),
      ports,
    }
  }

  /// Remove platform baselines of (`test`, `suffix`) whose content every
  /// port resolving to them would also get by falling back further.
  /// Returns the removed files.
  ///
  /// A baseline with nothing behind it is kept even when empty: it marks
  /// the absence of a baseline for the ports that reach it.
  pub fn optimize(&self, test: &str, suffix: &str) -> Result<Vec<PathBuf>> {
    let name = baseline_name(test, suffix);
    let chains: Vec<Vec<PathBuf>> = self
      .ports
      .iter()
      .map(|port| {
        resolution_dirs(port, &self.web_tests)
          .into_iter()
          .map(|dir| dir.join(&name))
          .collect()
      })
      .collect();
    let generic = self.web_tests.join(&name);
    let candidates: BTreeSet<&PathBuf> = chains.iter().flatten().filter(|p| **p != generic).collect();
    let mut digests: HashMap<PathBuf, Vec<u8>> = HashMap::new();
    let mut removed = Vec::new();

    loop {
      let mut removed_one = false;
      for candidate in &candidates {
        if !candidate.is_file() {
          continue;
        }
        if self.is_redundant(candidate, &chains, &mut digests)? {
          std::fs::remove_file(candidate).map_err(|e| Error::io(candidate, e))?;
          debug!("Removed redundant baseline {}", self.relative(candidate).display());
          removed.push((*candidate).clone());
          removed_one = true;
          break;
        }
      }
      if !removed_one {
        break;
      }
    }
    removed.sort();
    Ok(removed)
  }

  fn is_redundant(
    &self,
    candidate: &Path,
    chains: &[Vec<PathBuf>],
    digests: &mut HashMap<PathBuf, Vec<u8>>,
  ) -> Result<bool> {
    let own = digest(candidate, digests)?;
    let mut resolving = 0;
    for chain in chains {
      let Some(current) = chain.iter().position(|p| p.is_file()) else {
        continue;
      };
      if chain[current] != candidate {
        continue;
      }
      resolving += 1;
      let Some(fallback) = chain[current + 1..].iter().find(|p| p.is_file()) else {
        return Ok(false);
      };
      if digest(fallback, digests)? != own {
        return Ok(false);
      }
    }
    Ok(resolving > 0)
  }

  fn relative<'a>(&self, path: &'a Path) -> &'a Path {
    path.strip_prefix(&self.web_tests).unwrap_or(path)
  }
}

fn digest(path: &Path, digests: &mut HashMap<PathBuf, Vec<u8>>) -> Result<Vec<u8>> {
  if let Some(digest) = digests.get(path) {
    return Ok(digest.clone());
  }
  let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
  let digest = Sha256::digest(&bytes).to_vec();
  digests.insert(path.to_path_buf(), digest.clone());
  Ok(digest)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn ports() -> Vec<Port> {
    vec![
      Port::new("test-win-win7").with_fallback(vec!["test-win-win7".to_string()]),
      Port::new("test-win-win10")
        .with_fallback(vec!["test-win-win10".to_string(), "test-win-win7".to_string()]),
    ]
  }

  fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, contents).unwrap();
    path
  }

  #[test]
  fn removes_baselines_equal_to_their_fallback() {
    let dir = TempDir::new().unwrap();
    let web_tests = dir.path();
    write(web_tests, "a-expected.txt", "same");
    let win7 = write(web_tests, "platform/test-win-win7/a-expected.txt", "same");
    let win10 = write(web_tests, "platform/test-win-win10/a-expected.txt", "same");

    let removed = BaselineOptimizer::new(web_tests, ports()).optimize("a.html", "txt").unwrap();
    assert_eq!(removed, {
      let mut both = vec![win7.clone(), win10.clone()];
      both.sort();
      both
    });
    assert!(web_tests.join("a-expected.txt").exists());
  }

  #[test]
  fn keeps_differing_baselines() {
    let dir = TempDir::new().unwrap();
    let web_tests = dir.path();
    write(web_tests, "a-expected.txt", "generic");
    let win7 = write(web_tests, "platform/test-win-win7/a-expected.txt", "win7");
    let win10 = write(web_tests, "platform/test-win-win10/a-expected.txt", "win7");

    let removed = BaselineOptimizer::new(web_tests, ports()).optimize("a.html", "txt").unwrap();
    assert_eq!(removed, vec![win10]);
    assert!(win7.exists());
  }

  #[test]
  fn keeps_empty_markers_over_absent_fallback() {
    let dir = TempDir::new().unwrap();
    let web_tests = dir.path();
    let win7 = write(web_tests, "platform/test-win-win7/p-expected.png", "");
    let win10 = write(web_tests, "platform/test-win-win10/p-expected.png", "pixels");

    let removed = BaselineOptimizer::new(web_tests, ports()).optimize("p.html", "png").unwrap();
    assert!(removed.is_empty());
    assert!(win7.exists());
    assert!(win10.exists());
  }
}
