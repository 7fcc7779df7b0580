//! Git operations used by the updaters.
//!
//! All paths crossing the [`Git`] trait are absolute. [`CommandGit`] shells
//! out to the `git` binary in the checkout root.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{Error, Result};

/// Paths are passed to `git add`/`git rm` in chunks of this size.
const PATHS_PER_INVOCATION: usize = 256;

pub trait Git: Send + Sync {
  fn root(&self) -> &Path;

  /// Modified-but-unstaged and untracked files.
  fn unstaged_changes(&self) -> Result<BTreeSet<PathBuf>>;

  /// Files differing from `HEAD`, staged or not, plus untracked files.
  fn uncommitted_changes(&self) -> Result<BTreeSet<PathBuf>>;

  /// Files changed relative to the upstream branch, optionally restricted
  /// with a `--diff-filter` value.
  fn changed_files(&self, diff_filter: Option<&str>) -> Result<BTreeSet<PathBuf>>;

  /// Renames relative to the upstream branch, source to destination.
  fn renamed_files(&self) -> Result<BTreeMap<PathBuf, PathBuf>>;

  /// Which of `paths` are in the index.
  fn tracked(&self, paths: &[PathBuf]) -> Result<BTreeSet<PathBuf>>;

  fn add_list(&self, paths: &[PathBuf]) -> Result<()>;

  fn delete_list(&self, paths: &[PathBuf], ignore_unmatch: bool) -> Result<()>;

  /// `branch.<current branch>.<key>` from the Git config.
  fn branch_config(&self, key: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct CommandGit {
  root: PathBuf,
  upstream: String,
}

impl CommandGit {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      upstream: "origin/main".to_string(),
    }
  }

  pub fn with_upstream(mut self, upstream: impl Into<String>) -> Self {
    self.upstream = upstream.into();
    self
  }

  /// Discover the checkout containing `dir`.
  pub fn discover(dir: &Path) -> Result<Self> {
    let at_dir = Self::new(dir);
    let top = at_dir.run(&["rev-parse", "--show-toplevel"])?;
    Ok(Self::new(top.trim()))
  }

  fn command(&self, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(&self.root).args(args);
    cmd
  }

  fn run(&self, args: &[&str]) -> Result<String> {
    let output = self
      .command(args)
      .output()
      .map_err(|e| Error::io(&self.root, e))?;
    if !output.status.success() {
      return Err(Error::Git {
        command: args.join(" "),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }

  fn run_with_paths(&self, args: &[&str], paths: &[PathBuf]) -> Result<String> {
    let mut out = String::new();
    for chunk in paths.chunks(PATHS_PER_INVOCATION) {
      let mut cmd = self.command(args);
      cmd.arg("--").args(chunk);
      debug!("git {} ({} paths)", args.join(" "), chunk.len());
      let output = cmd.output().map_err(|e| Error::io(&self.root, e))?;
      if !output.status.success() {
        return Err(Error::Git {
          command: args.join(" "),
          stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
      }
      out.push_str(&String::from_utf8_lossy(&output.stdout));
    }
    Ok(out)
  }

  fn absolute_lines(&self, output: &str) -> BTreeSet<PathBuf> {
    output
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(|line| self.root.join(line))
      .collect()
  }

  fn untracked(&self) -> Result<BTreeSet<PathBuf>> {
    let output = self.run(&["ls-files", "--others", "--exclude-standard"])?;
    Ok(self.absolute_lines(&output))
  }
}

impl Git for CommandGit {
  fn root(&self) -> &Path {
    &self.root
  }

  fn unstaged_changes(&self) -> Result<BTreeSet<PathBuf>> {
    let mut paths = self.absolute_lines(&self.run(&["diff", "--name-only"])?);
    paths.extend(self.untracked()?);
    Ok(paths)
  }

  fn uncommitted_changes(&self) -> Result<BTreeSet<PathBuf>> {
    let mut paths = self.absolute_lines(&self.run(&["diff", "HEAD", "--name-only"])?);
    paths.extend(self.untracked()?);
    Ok(paths)
  }

  fn changed_files(&self, diff_filter: Option<&str>) -> Result<BTreeSet<PathBuf>> {
    let filter = diff_filter.map(|f| format!("--diff-filter={f}"));
    let mut args = vec!["diff", self.upstream.as_str(), "--name-only"];
    if let Some(filter) = &filter {
      args.push(filter);
    }
    Ok(self.absolute_lines(&self.run(&args)?))
  }

  fn renamed_files(&self) -> Result<BTreeMap<PathBuf, PathBuf>> {
    let output = self.run(&[
      "diff",
      self.upstream.as_str(),
      "-M90%",
      "--diff-filter=R",
      "--name-status",
    ])?;
    let mut renamed = BTreeMap::new();
    for line in output.lines() {
      let fields: Vec<&str> = line.split('\t').collect();
      match fields.as_slice() {
        [_, source, dest] => {
          renamed.insert(self.root.join(source), self.root.join(dest));
        }
        _ => debug!("ignoring rename line: {line}"),
      }
    }
    Ok(renamed)
  }

  fn tracked(&self, paths: &[PathBuf]) -> Result<BTreeSet<PathBuf>> {
    if paths.is_empty() {
      return Ok(BTreeSet::new());
    }
    let output = self.run_with_paths(&["ls-files", "--full-name"], paths)?;
    Ok(self.absolute_lines(&output))
  }

  fn add_list(&self, paths: &[PathBuf]) -> Result<()> {
    if !paths.is_empty() {
      self.run_with_paths(&["add"], paths)?;
    }
    Ok(())
  }

  fn delete_list(&self, paths: &[PathBuf], ignore_unmatch: bool) -> Result<()> {
    if paths.is_empty() {
      return Ok(());
    }
    let mut args = vec!["rm", "-q"];
    if ignore_unmatch {
      args.push("--ignore-unmatch");
    }
    self.run_with_paths(&args, paths)?;
    Ok(())
  }

  fn branch_config(&self, key: &str) -> Result<Option<String>> {
    let branch = self.run(&["symbolic-ref", "--short", "HEAD"])?;
    let name = format!("branch.{}.{key}", branch.trim());
    let output = self
      .command(&["config", &name])
      .output()
      .map_err(|e| Error::io(&self.root, e))?;
    // `git config` exits with 1 when the key is unset.
    if !output.status.success() {
      return Ok(None);
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok((!value.is_empty()).then_some(value))
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
  }

  fn init_repo(dir: &Path) {
    for args in [
      vec!["init", "-q"],
      vec!["config", "user.email", "dev@example.com"],
      vec!["config", "user.name", "Dev"],
      vec!["commit", "-q", "--allow-empty", "-m", "init"],
    ] {
      let status = Command::new("git").current_dir(dir).args(&args).status().unwrap();
      assert!(status.success());
    }
  }

  #[test]
  fn stages_and_reports_changes() {
    if !git_available() {
      return;
    }
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());
    let git = CommandGit::new(dir.path());
    let file = dir.path().join("a.ini");
    std::fs::write(&file, "[a.html]\n").unwrap();

    assert!(git.uncommitted_changes().unwrap().contains(&file));
    assert!(git.tracked(&[file.clone()]).unwrap().is_empty());
    git.add_list(&[file.clone()]).unwrap();
    assert_eq!(git.tracked(&[file.clone()]).unwrap().into_iter().collect::<Vec<_>>(), vec![file.clone()]);
    assert!(!git.unstaged_changes().unwrap().contains(&file));
  }

  #[test]
  fn failed_commands_surface_stderr() {
    if !git_available() {
      return;
    }
    let dir = TempDir::new().unwrap();
    init_repo(dir.path());
    let git = CommandGit::new(dir.path());
    let err = git
      .delete_list(&[dir.path().join("missing.ini")], false)
      .unwrap_err();
    assert!(matches!(err, Error::Git { .. }));
    git
      .delete_list(&[dir.path().join("missing.ini")], true)
      .unwrap();
  }
}
