//! Moving information from the generic `TestExpectations` file into metadata.
//!
//! Lines naming a test contribute their bugs and the comment block above
//! them to the test's section; `Skip` lines become `disabled` reasons for
//! the configurations whose port tags they match. `dir/*` globs do the same
//! for the directory's `__dir__.ini`.

use std::collections::BTreeSet;

use crate::expectations::tagged::{Line, TaggedExpectations};

/// Reason written for configurations a migrated `Skip` line applied to when
/// the line carries no comment.
pub const MIGRATED_SKIP_REASON: &str = "skipped in TestExpectations";

/// What one test (or directory) inherits from the expectations file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestMigration {
  pub bugs: Vec<String>,
  pub comments: Vec<String>,
  /// `Skip` lines, kept whole so their tags can be matched per port.
  pub skips: Vec<Line>,
  /// Source line numbers, for removal once migrated.
  pub line_numbers: Vec<usize>,
}

impl TestMigration {
  pub fn is_empty(&self) -> bool {
    self.line_numbers.is_empty()
  }

  fn absorb(&mut self, line: &Line, comments: Vec<String>) {
    for bug in &line.bugs {
      if !self.bugs.contains(bug) {
        self.bugs.push(bug.clone());
      }
    }
    for comment in comments {
      if !self.comments.contains(&comment) {
        self.comments.push(comment);
      }
    }
    if line.is_skip() {
      self.skips.push(line.clone());
    }
    self.line_numbers.push(line.line_number);
  }
}

/// Reason to write for a migrated `Skip` line.
pub fn skip_reason(line: &Line) -> String {
  line
    .comment
    .clone()
    .filter(|c| !c.is_empty())
    .unwrap_or_else(|| MIGRATED_SKIP_REASON.to_string())
}

#[derive(Debug, Clone)]
pub struct Migrator {
  expectations: TaggedExpectations,
}

impl Migrator {
  pub fn new(expectations: TaggedExpectations) -> Self {
    Self { expectations }
  }

  pub fn expectations(&self) -> &TaggedExpectations {
    &self.expectations
  }

  /// Whether `line`'s tags select a port carrying `tags`.
  pub fn applies(&self, line: &Line, tags: &BTreeSet<String>) -> bool {
    self.expectations.tags_apply(line, tags)
  }

  /// Lines naming `test_name` exactly.
  pub fn for_test(&self, test_name: &str) -> Option<TestMigration> {
    self.collect(|line| !line.is_glob && line.test == test_name)
  }

  /// `dir/*` lines for the directory `dir_name` (no trailing slash).
  pub fn for_directory(&self, dir_name: &str) -> Option<TestMigration> {
    let prefix = format!("{dir_name}/");
    self.collect(|line| line.is_glob && line.test == prefix)
  }

  /// Directory globs under `root` (a test root such as `external/wpt`),
  /// as directory names.
  pub fn directories_under(&self, root: &str) -> BTreeSet<String> {
    let prefix = format!("{root}/");
    self
      .expectations
      .lines()
      .filter(|line| line.is_glob && line.test.starts_with(&prefix) && line.test.ends_with('/'))
      .map(|line| line.test.trim_end_matches('/').to_string())
      .collect()
  }

  fn collect(&self, mut select: impl FnMut(&Line) -> bool) -> Option<TestMigration> {
    let mut migration = TestMigration::default();
    for line in self.expectations.lines() {
      if select(line) {
        let comments = self.expectations.comment_block_before(line.line_number);
        migration.absorb(line, comments);
      }
    }
    (!migration.is_empty()).then_some(migration)
  }

  /// Drop migrated lines; returns how many were removed.
  pub fn remove_migrated(&mut self, line_numbers: &BTreeSet<usize>) -> usize {
    self
      .expectations
      .remove_lines(|line| line_numbers.contains(&line.line_number))
  }
}
