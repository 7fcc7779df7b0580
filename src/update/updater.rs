//! Updating one metadata file from the results of the tests it covers.
//!
//! A file moves through `Idle → HasResults → Synthesized` and ends up
//! `Written`, `Unchanged` or `Deleted`. Nothing is written to disk here; the
//! caller decides what to do with a [`FileUpdate`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::migrate::{skip_reason, Migrator, TestMigration};
use super::property::{
  BugUpdate, DisabledUpdate, ExpectedUpdate, PropertyUpdate, UpdateContext, SLOW_TIMEOUT_REASON,
};
use super::replay::{replay, replay_configs};
use super::OverwriteMode;
use crate::config::{RunInfo, TestConfigurations, UpdateProperties};
use crate::error::Result;
use crate::manifest::{Manifest, ManifestTest, TestFile};
use crate::metadata::{self, DirectoryMetadata, MetadataFile, Section, Value, DIR_METADATA};
use crate::results::TestResults;
use crate::status::Status;

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
  pub props: UpdateProperties,
  pub mode: OverwriteMode,
  /// Reason to disable flaky configurations with, instead of writing
  /// intermittent statuses.
  pub disable_intermittent: Option<String>,
  pub keep_statuses: bool,
  /// `crbug.com/<n>` written to sections changed by this update.
  pub bug: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
  Written,
  Unchanged,
  Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
  Idle,
  HasResults,
  Synthesized,
  Done(FileOutcome),
}

impl FileState {
  fn advance(&mut self, next: FileState, path: &Path) {
    trace!(path = %path.display(), from = ?*self, to = ?next, "file state");
    *self = next;
  }
}

/// Result of updating one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
  pub path: PathBuf,
  pub outcome: FileOutcome,
  /// Rendered contents when `outcome` is `Written`.
  pub text: Option<String>,
  /// Section names whose contents changed.
  pub updated_sections: Vec<String>,
}

impl FileUpdate {
  fn unchanged(path: &Path) -> Self {
    Self {
      path: path.to_path_buf(),
      outcome: FileOutcome::Unchanged,
      text: None,
      updated_sections: Vec::new(),
    }
  }
}

/// Applies observed results to metadata files.
pub struct MetadataUpdater<'a> {
  options: &'a UpdateOptions,
  configs: &'a TestConfigurations,
  dir_metadata: &'a DirectoryMetadata,
  migrator: Option<&'a Migrator>,
}

impl<'a> MetadataUpdater<'a> {
  pub fn new(
    options: &'a UpdateOptions,
    configs: &'a TestConfigurations,
    dir_metadata: &'a DirectoryMetadata,
  ) -> Self {
    Self {
      options,
      configs,
      dir_metadata,
      migrator: None,
    }
  }

  pub fn with_migrator(mut self, migrator: Option<&'a Migrator>) -> Self {
    self.migrator = migrator;
    self
  }

  fn context(&self, implicit: Status) -> UpdateContext<'a> {
    UpdateContext {
      props: &self.options.props,
      mode: self.options.mode,
      implicit_default: Some(Value::scalar(implicit.as_str())),
    }
  }

  /// Migration work for the tests of `file`, keyed by URL.
  pub fn migrations(&self, manifest: &Manifest, file: &TestFile) -> BTreeMap<String, TestMigration> {
    let Some(migrator) = self.migrator else {
      return BTreeMap::new();
    };
    file
      .tests
      .iter()
      .filter_map(|test| {
        migrator
          .for_test(&manifest.test_name(&test.url))
          .map(|m| (test.url.clone(), m))
      })
      .collect()
  }

  /// Compute the update for `file`, whose metadata lives at `metadata_path`.
  /// `results` holds the observations of the file's tests, keyed by URL.
  pub fn update_file(
    &self,
    manifest: &Manifest,
    file: &TestFile,
    metadata_path: &Path,
    results: &BTreeMap<String, TestResults>,
  ) -> Result<FileUpdate> {
    let mut state = FileState::Idle;
    let migrations = self.migrations(manifest, file);
    let observed = file
      .tests
      .iter()
      .any(|t| results.get(&t.url).map_or(false, TestResults::has_observed));
    if !observed && migrations.is_empty() {
      return Ok(FileUpdate::unchanged(metadata_path));
    }
    state.advance(FileState::HasResults, metadata_path);

    let original = metadata::read_file(metadata_path)?;
    let mut metadata = original.clone().unwrap_or_default();
    let dir = metadata_path.parent().unwrap_or(metadata_path);
    let dir_files = self.dir_metadata.chain(dir)?;

    let mut updated_sections = Vec::new();
    let mut section_names = BTreeSet::new();
    for test in &file.tests {
      let section_name = manifest.section_name(&file.path, &test.url);
      section_names.insert(section_name.clone());
      let test_results = results.get(&test.url).filter(|r| r.has_observed());
      let migration = migrations.get(&test.url);
      if test_results.is_none() && migration.is_none() {
        continue;
      }

      let current = metadata.test(&section_name).cloned();
      let mut chain: Vec<&Section> = Vec::new();
      if let Some(section) = &current {
        chain.push(section);
      }
      chain.extend(dir_files.iter().map(|f| &f.root));
      let test_name = manifest.test_name(&test.url);
      let enabled = self.configs.enabled_configs(&test_name, &chain);

      let mut test_results = test_results.cloned().unwrap_or_default();
      if self.options.mode == OverwriteMode::Fill && test_results.has_observed() {
        let props = self.options.props.all();
        let configs = replay_configs(&props, &enabled, &test_results, self.options.keep_statuses);
        let replayed = replay(test.test_type, current.as_ref(), &configs, &mut test_results);
        debug!(test = %test.url, replayed, "replayed unobserved configurations");
      }

      let section = metadata.test_or_insert(&section_name);
      let before = section.clone();
      self.update_test(section, test, &test_results, migration);
      if section.is_modified() && *section != before {
        updated_sections.push(section_name);
      }
    }

    // Sections of tests that no longer exist in this file.
    metadata
      .root
      .retain_subsections(|section| section_names.contains(&section.name));
    metadata.root.prune_empty();
    state.advance(FileState::Synthesized, metadata_path);

    let update = finish(metadata_path, original.as_ref(), &metadata, updated_sections);
    state.advance(FileState::Done(update.outcome), metadata_path);
    Ok(update)
  }

  fn update_test(
    &self,
    section: &mut Section,
    test: &ManifestTest,
    results: &TestResults,
    migration: Option<&TestMigration>,
  ) {
    let props = &self.options.props;
    let disable = self.options.disable_intermittent.is_some();

    if results.has_observed() {
      let mut expected = ExpectedUpdate::new(props)
        .with_keep_statuses(self.options.keep_statuses)
        .with_disable_intermittent(disable);
      for observation in &results.test {
        expected.add(observation);
      }
      expected.update(section, &self.context(test.test_type.default_status()));

      for (name, observations) in &results.subtests {
        let mut expected = ExpectedUpdate::new(props)
          .with_keep_statuses(self.options.keep_statuses)
          .with_disable_intermittent(disable);
        for observation in observations {
          expected.add(observation);
        }
        if expected.is_empty() {
          continue;
        }
        let subsection = section.subsection_or_insert(name);
        expected.update(subsection, &self.context(Status::Pass));
      }
      if self.options.mode != OverwriteMode::No {
        section.retain_subsections(|s| results.subtests.contains_key(&s.name));
      }
    }

    let mut reasons = self.new_disable_reasons(test, results);
    if let Some(migration) = migration {
      self.add_skip_reasons(migration, &mut reasons);
    }
    if !reasons.is_empty() {
      let mut disabled = DisabledUpdate::new(props);
      let mut configs: BTreeSet<RunInfo> = results
        .test
        .iter()
        .map(|o| o.run_info.clone())
        .collect();
      configs.extend(reasons.keys().cloned());
      for run_info in &configs {
        match reasons.get(run_info) {
          Some(reason) => disabled.disable(run_info, reason.clone()),
          None => disabled.keep(run_info, section.evaluate("disabled", run_info)),
        }
      }
      disabled.update(section, &self.context(Status::Pass));
    }

    if let Some(migration) = migration {
      for comment in &migration.comments {
        if !section.comments.contains(comment) {
          section.comments.push(comment.clone());
          section.mark_modified();
        }
      }
    }

    let mut bugs = BugUpdate::new().with_overwrite(self.options.bug.clone());
    if let Some(migration) = migration {
      for bug in &migration.bugs {
        bugs.append(bug.clone());
      }
    }
    bugs.update(section, &self.context(Status::Pass));
  }

  /// Configurations that need a `disabled` reason they did not have.
  fn new_disable_reasons(&self, test: &ManifestTest, results: &TestResults) -> BTreeMap<RunInfo, String> {
    let mut per_config: BTreeMap<&RunInfo, (BTreeSet<Status>, bool)> = BTreeMap::new();
    for observation in results.test.iter().filter(|o| !o.replayed) {
      per_config
        .entry(&observation.run_info)
        .or_insert_with(|| (BTreeSet::new(), false))
        .0
        .insert(observation.status);
    }
    for observations in results.subtests.values() {
      let mut seen: BTreeMap<&RunInfo, BTreeSet<Status>> = BTreeMap::new();
      for observation in observations.iter().filter(|o| !o.replayed) {
        seen.entry(&observation.run_info).or_default().insert(observation.status);
      }
      for (run_info, statuses) in seen {
        if statuses.len() > 1 {
          if let Some(entry) = per_config.get_mut(run_info) {
            entry.1 = true;
          }
        }
      }
    }

    let mut reasons = BTreeMap::new();
    for (run_info, (statuses, flaky_subtest)) in per_config {
      let flaky = statuses.len() > 1 || flaky_subtest;
      let reason = match &self.options.disable_intermittent {
        Some(reason) if flaky => Some(reason.clone()),
        _ if test.slow && statuses.iter().all(|s| *s == Status::Timeout) => {
          Some(SLOW_TIMEOUT_REASON.to_string())
        }
        _ => None,
      };
      if let Some(reason) = reason {
        reasons.insert(run_info.clone(), reason);
      }
    }
    reasons
  }

  fn add_skip_reasons(&self, migration: &TestMigration, reasons: &mut BTreeMap<RunInfo, String>) {
    let Some(migrator) = self.migrator else {
      return;
    };
    for line in &migration.skips {
      for (run_info, port) in self.configs.iter() {
        if migrator.applies(line, port.tags()) {
          reasons
            .entry(run_info.clone())
            .or_insert_with(|| skip_reason(line));
        }
      }
    }
  }

  /// Fold a directory glob migration into the directory's `__dir__.ini`.
  pub fn update_directory(&self, dir: &Path, migration: &TestMigration) -> Result<FileUpdate> {
    let path = dir.join(DIR_METADATA);
    let original = metadata::read_file(&path)?;
    let mut file = original.clone().unwrap_or_default();
    let root = &mut file.root;

    let mut reasons = BTreeMap::new();
    self.add_skip_reasons(migration, &mut reasons);
    if !reasons.is_empty() {
      let mut disabled = DisabledUpdate::new(&self.options.props);
      for run_info in self.configs.all_configs() {
        match reasons.get(&run_info) {
          Some(reason) => disabled.disable(&run_info, reason.clone()),
          None => disabled.keep(&run_info, root.evaluate("disabled", &run_info)),
        }
      }
      disabled.update(root, &self.context(Status::Pass));
    }
    for comment in &migration.comments {
      if !root.comments.contains(comment) {
        root.comments.push(comment.clone());
        root.mark_modified();
      }
    }
    let mut bugs = BugUpdate::new();
    for bug in &migration.bugs {
      bugs.append(bug.clone());
    }
    bugs.update(root, &self.context(Status::Pass));

    Ok(finish(&path, original.as_ref(), &file, Vec::new()))
  }
}

fn finish(
  path: &Path,
  original: Option<&MetadataFile>,
  updated: &MetadataFile,
  updated_sections: Vec<String>,
) -> FileUpdate {
  let mut update = FileUpdate::unchanged(path);
  if !updated.is_modified() {
    return update;
  }
  if updated.is_empty() {
    if original.is_some() {
      update.outcome = FileOutcome::Deleted;
      update.updated_sections = updated_sections;
    }
    return update;
  }
  let text = metadata::serialize(updated);
  if original.map(metadata::serialize).as_deref() == Some(text.as_str()) {
    return update;
  }
  update.outcome = FileOutcome::Written;
  update.text = Some(text);
  update.updated_sections = updated_sections;
  update
}
