//! Rebaselining: planning, copying, downloading and pruning baseline files.
//!
//! A baseline for `dir/test.html` and suffix `txt` lives either next to the
//! test (`dir/test-expected.txt`, the generic baseline) or under a platform
//! directory (`platform/<dir>/dir/test-expected.txt`). A port resolves a
//! baseline by walking its fallback chain and then the generic location.

pub mod collect;
pub mod copier;
pub mod fetcher;
pub mod optimize;
pub mod rebaseline;
pub mod results;
pub mod set;

use std::path::{Path, PathBuf};

use crate::config::Port;

pub use collect::{failing_baselines, fetch_step_results, step_for_artifact};
pub use copier::{BaselineCopier, BaselineCopy};
pub use fetcher::{BaselineCache, BaselineFetcher, CacheStats, DownloadTask, TaskSource};
pub use optimize::BaselineOptimizer;
pub use rebaseline::{RebaselineOptions, RebaselineSummary, Rebaseliner, StepResults};
pub use results::{WebTestResult, WebTestResults, BASELINE_SUFFIXES};
pub use set::{BaselineSet, BaselineTask};

/// Reference files whose presence marks a reftest.
const REFERENCE_SUFFIXES: [&str; 5] = [
  "-expected.html",
  "-expected.xht",
  "-expected.xhtml",
  "-expected.svg",
  "-expected-mismatch.html",
];

/// The test path without its extension, with any query or fragment folded
/// in: `dir/foo.html?wss` becomes `dir/foo_wss`.
pub fn baseline_stem(test: &str) -> String {
  let (path, query) = match test.find(['?', '#']) {
    Some(index) => (&test[..index], Some(&test[index + 1..])),
    None => (test, None),
  };
  let file_start = path.rfind('/').map_or(0, |i| i + 1);
  let stem = match path[file_start..].rfind('.') {
    Some(dot) => &path[..file_start + dot],
    None => path,
  };
  match query {
    Some(query) if !query.is_empty() => {
      let query: String = query
        .chars()
        .map(|c| {
          if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '=') {
            c
          } else {
            '_'
          }
        })
        .collect();
      format!("{stem}_{query}")
    }
    _ => stem.to_string(),
  }
}

/// `dir/foo-expected.txt` for `dir/foo.html` and `txt`.
pub fn baseline_name(test: &str, suffix: &str) -> String {
  format!("{}-expected.{suffix}", baseline_stem(test))
}

/// `dir/foo-actual.txt`, as laid out in a local results directory.
pub fn actual_name(test: &str, suffix: &str) -> String {
  format!("{}-actual.{suffix}", baseline_stem(test))
}

/// Whether `test` is compared against a reference page rather than a
/// pixel baseline.
pub fn is_reftest(web_tests: &Path, test: &str) -> bool {
  let stem = baseline_stem(test);
  REFERENCE_SUFFIXES
    .iter()
    .any(|suffix| web_tests.join(format!("{stem}{suffix}")).is_file())
}

/// Directories a port searches for `test`'s baseline, most specific first,
/// ending with the generic location.
pub fn resolution_dirs(port: &Port, web_tests: &Path) -> Vec<PathBuf> {
  let mut dirs = port.baseline_search_path(web_tests);
  dirs.push(web_tests.to_path_buf());
  dirs
}

/// The file `port` currently uses for (`test`, `suffix`), if any.
pub fn resolve_baseline(port: &Port, web_tests: &Path, test: &str, suffix: &str) -> Option<PathBuf> {
  let name = baseline_name(test, suffix);
  resolution_dirs(port, web_tests)
    .into_iter()
    .map(|dir| dir.join(&name))
    .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn folds_queries_into_the_stem() {
    assert_eq!(baseline_name("dir/foo.html", "txt"), "dir/foo-expected.txt");
    assert_eq!(baseline_name("foo.html?wss", "txt"), "foo_wss-expected.txt");
    assert_eq!(
      baseline_name("a.any.worker.html?x=1&y", "txt"),
      "a.any.worker_x=1_y-expected.txt"
    );
    assert_eq!(actual_name("v.d/noext", "png"), "v.d/noext-actual.png");
  }

  #[test]
  fn resolves_through_the_fallback_chain() {
    let dir = TempDir::new().unwrap();
    let web_tests = dir.path();
    let port = Port::new("test-win-win10").with_fallback(vec![
      "test-win-win10".to_string(),
      "test-win-win7".to_string(),
    ]);
    assert_eq!(resolve_baseline(&port, web_tests, "a/t.html", "txt"), None);

    std::fs::create_dir_all(web_tests.join("a")).unwrap();
    std::fs::write(web_tests.join("a/t-expected.txt"), "generic").unwrap();
    assert_eq!(
      resolve_baseline(&port, web_tests, "a/t.html", "txt"),
      Some(web_tests.join("a/t-expected.txt"))
    );

    let win7 = web_tests.join("platform/test-win-win7/a");
    std::fs::create_dir_all(&win7).unwrap();
    std::fs::write(win7.join("t-expected.txt"), "win7").unwrap();
    assert_eq!(
      resolve_baseline(&port, web_tests, "a/t.html", "txt"),
      Some(win7.join("t-expected.txt"))
    );
  }

  #[test]
  fn detects_reftests_by_reference_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("r.html"), "").unwrap();
    assert!(!is_reftest(dir.path(), "r.html"));
    std::fs::write(dir.path().join("r-expected.html"), "").unwrap();
    assert!(is_reftest(dir.path(), "r.html"));
  }
}
