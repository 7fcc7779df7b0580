//! The metadata update pipeline, from build selection to staged files.
//!
//! A run plans the set of test files to update, resolves builds, streams
//! their reports into a [`ResultStore`], removes orphaned metadata and then
//! updates each planned file on a worker pool. Everything that mutates Git
//! state happens on the calling thread once the pool has drained.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rayon::ThreadPoolBuilder;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::builds::{bug_url, Build, BuildResolver, BuildRpc, BuildStatus, ChangeList, Prompt};
use crate::config::{BuilderList, TestConfigurations, UpdateProperties};
use crate::error::{Error, ErrorScope, Result};
use crate::expectations::TaggedExpectations;
use crate::git::Git;
use crate::manifest::{Manifest, ManifestSet, TestFile};
use crate::metadata::{self, DirectoryMetadata, DIR_METADATA};
use crate::resource::ResourceFetcher;
use crate::results::{parse_reports, read_reports, ResultStore, StoreOptions, TestResults, WptReport};
use crate::update::{FileOutcome, FileUpdate, MetadataUpdater, Migrator, OverwriteMode, UpdateOptions};

/// Prefix of the artifact IDs holding wptreport files.
pub const REPORT_ARTIFACT_PREFIX: &str = "wpt_reports";

pub use crate::expectations::run::GENERIC_EXPECTATIONS;

/// Shared flag telling pools to stop picking up new work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
  /// Test paths, directories or globs, relative to `web_tests` or to a
  /// test root. Empty selects every test file.
  pub include: Vec<String>,
  pub test_name_file: Option<PathBuf>,
  /// URL prefixes of tests to leave alone.
  pub exclude: Vec<String>,
  pub only_changed_tests: bool,
  pub builds: Vec<Build>,
  pub patchset: Option<u32>,
  pub update_properties: Option<UpdateProperties>,
  pub mode: OverwriteMode,
  pub disable_intermittent: Option<String>,
  pub keep_statuses: bool,
  pub migrate: bool,
  pub bug: Option<u64>,
  /// Local wptreport files, or directories of them.
  pub reports: Vec<PathBuf>,
  pub min_samples: usize,
  pub trigger_jobs: bool,
  pub dry_run: bool,
  pub jobs: usize,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self {
      include: Vec::new(),
      test_name_file: None,
      exclude: Vec::new(),
      only_changed_tests: false,
      builds: Vec::new(),
      patchset: None,
      update_properties: None,
      mode: OverwriteMode::Fill,
      disable_intermittent: None,
      keep_statuses: false,
      migrate: false,
      bug: None,
      reports: Vec::new(),
      min_samples: 4,
      trigger_jobs: true,
      dry_run: false,
      jobs: num_cpus::get(),
    }
  }
}

/// External systems a run talks to.
pub struct Services<'a> {
  pub git: &'a dyn Git,
  pub rpc: &'a dyn BuildRpc,
  pub fetcher: Arc<dyn ResourceFetcher>,
  pub prompt: &'a dyn Prompt,
}

/// What a run did, with paths relative to `web_tests`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
  pub planned: usize,
  pub updated: Vec<String>,
  pub deleted: Vec<String>,
  pub orphaned: Vec<String>,
  /// Files whose update failed, with the error.
  pub failed: Vec<(String, String)>,
  pub staged: usize,
}

struct PlannedFile<'m> {
  manifest: &'m Manifest,
  file: &'m TestFile,
  metadata_path: PathBuf,
  urls: Vec<String>,
}

struct FileTask<'m> {
  planned: &'m PlannedFile<'m>,
  results: BTreeMap<String, TestResults>,
}

pub struct Orchestrator<'a> {
  web_tests: PathBuf,
  builders: &'a BuilderList,
  configs: &'a TestConfigurations,
  manifests: &'a ManifestSet,
  services: Services<'a>,
  options: RunOptions,
  cancel: CancelToken,
}

impl<'a> Orchestrator<'a> {
  pub fn new(
    web_tests: impl Into<PathBuf>,
    builders: &'a BuilderList,
    configs: &'a TestConfigurations,
    manifests: &'a ManifestSet,
    services: Services<'a>,
  ) -> Self {
    Self {
      web_tests: web_tests.into(),
      builders,
      configs,
      manifests,
      services,
      options: RunOptions::default(),
      cancel: CancelToken::new(),
    }
  }

  pub fn with_options(mut self, options: RunOptions) -> Self {
    self.options = options;
    self
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  fn relative(&self, path: &Path) -> String {
    let relative = path.strip_prefix(&self.web_tests).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
  }

  fn check_cancelled(&self) -> Result<()> {
    if self.cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    Ok(())
  }

  pub fn run(&self) -> Result<RunSummary> {
    let planned = self.plan_files()?;
    if planned.is_empty() {
      return Err(Error::UpdateAbort("No metadata to update.".to_string()));
    }
    self.check_uncommitted(&planned)?;
    self.check_cancelled()?;

    let builds = self.resolve_builds()?;
    let reports = self.gather_reports(&builds)?;
    self.check_cancelled()?;

    let mut store = ResultStore::from_reports(
      &reports,
      &StoreOptions {
        update_properties: self.update_properties(),
        keep_statuses: self.options.keep_statuses,
        min_samples: self.options.min_samples,
      },
    )?;
    if store.tests().any(|test| !self.manifests.contains_url(test)) {
      warn!("Some builders have results for tests that are absent from your local checkout.");
      warn!("To update metadata for these tests, please rebase-update on tip-of-tree.");
    }

    let mut summary = RunSummary {
      planned: planned.len(),
      ..RunSummary::default()
    };
    let orphans = self.remove_orphans()?;
    summary.orphaned = orphans.iter().map(|p| self.relative(p)).collect();

    info!(
      "Updating expectations for up to {} test file{}.",
      planned.len(),
      if planned.len() == 1 { "" } else { "s" }
    );
    let tasks: Vec<FileTask<'_>> = planned
      .iter()
      .map(|planned| FileTask {
        planned,
        results: planned
          .urls
          .iter()
          .filter_map(|url| store.take(url).map(|r| (url.clone(), r)))
          .collect(),
      })
      .collect();

    let migrator = self.load_migrator()?;
    let update_options = self.update_options();
    let dir_metadata = DirectoryMetadata::new(&self.web_tests);
    let updater =
      MetadataUpdater::new(&update_options, self.configs, &dir_metadata).with_migrator(migrator.as_ref());

    let outcomes = self.update_files(&updater, &tasks)?;
    let mut to_add = Vec::new();
    let mut tombstones = orphans;
    let mut migrated_lines = BTreeSet::new();
    for (task, outcome) in tasks.iter().zip(outcomes) {
      let planned = task.planned;
      let relative = self.relative(&planned.metadata_path);
      match outcome {
        Ok(update) => {
          migrated_lines.extend(
            updater
              .migrations(planned.manifest, planned.file)
              .values()
              .flat_map(|m| m.line_numbers.iter().copied()),
          );
          self.record(&update, &planned.file.path, &mut summary, &mut to_add, &mut tombstones);
        }
        Err(err) if err.scope() == ErrorScope::PerFile => {
          match &err {
            Error::Parse(_) => error!("Failed to parse '{relative}': {err}"),
            _ => error!("Failed to update '{relative}': {err}"),
          }
          summary.failed.push((relative, err.to_string()));
        }
        Err(err) => return Err(err),
      }
    }

    if let Some(migrator) = &migrator {
      for root in self.manifests.test_roots() {
        for dir in migrator.directories_under(root) {
          let Some(migration) = migrator.for_directory(&dir) else {
            continue;
          };
          let update = updater.update_directory(&self.web_tests.join(&dir), &migration)?;
          self.apply(&update)?;
          migrated_lines.extend(migration.line_numbers.iter().copied());
          let name = format!("{dir}/{DIR_METADATA}");
          self.record(&update, &name, &mut summary, &mut to_add, &mut tombstones);
        }
      }
      if !migrated_lines.is_empty() {
        let mut remaining = migrator.clone();
        let removed = remaining.remove_migrated(&migrated_lines);
        debug!("Removed {removed} migrated expectation line(s)");
        let path = self.web_tests.join(GENERIC_EXPECTATIONS);
        if !self.options.dry_run {
          metadata::write_text(&path, &remaining.expectations().render())?;
        }
        to_add.push(path);
      }
    }

    summary.staged = self.stage(&to_add, &tombstones)?;
    info!(
      "Staged {} metadata file{}.",
      summary.staged,
      if summary.staged == 1 { "" } else { "s" }
    );
    if !summary.failed.is_empty() {
      error!(
        "Failed to update {} metadata file{}:",
        summary.failed.len(),
        if summary.failed.len() == 1 { "" } else { "s" }
      );
      for (path, _) in &summary.failed {
        error!("  {path}");
      }
    }
    Ok(summary)
  }

  fn record(
    &self,
    update: &FileUpdate,
    name: &str,
    summary: &mut RunSummary,
    to_add: &mut Vec<PathBuf>,
    tombstones: &mut Vec<PathBuf>,
  ) {
    match update.outcome {
      FileOutcome::Written => {
        info!("Updated '{name}'");
        summary.updated.push(self.relative(&update.path));
        to_add.push(update.path.clone());
      }
      FileOutcome::Deleted => {
        info!("Updated '{name}'");
        summary.deleted.push(self.relative(&update.path));
        tombstones.push(update.path.clone());
      }
      FileOutcome::Unchanged => {}
    }
  }

  // ====================================================================
  // Planning
  // ====================================================================

  fn include_patterns(&self) -> Result<Vec<String>> {
    let mut patterns = self.options.include.clone();
    if let Some(path) = &self.options.test_name_file {
      debug!("Reading list of tests from {}", path.display());
      let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
      patterns.extend(
        text
          .lines()
          .map(str::trim)
          .filter(|line| !line.is_empty() && !line.starts_with('#'))
          .map(str::to_string),
      );
    }
    Ok(patterns)
  }

  fn is_excluded(&self, url: &str) -> bool {
    let url = url.trim_start_matches('/');
    self
      .options
      .exclude
      .iter()
      .any(|prefix| url.starts_with(prefix.trim_start_matches('/')))
  }

  fn plan_files(&self) -> Result<Vec<PlannedFile<'a>>> {
    let patterns = self.include_patterns()?;
    let changed = if self.options.only_changed_tests {
      Some(self.services.git.changed_files(None)?)
    } else {
      None
    };

    let manifests: &'a ManifestSet = self.manifests;
    let mut planned = Vec::new();
    for manifest in manifests.iter() {
      for file in manifest.files() {
        let web_test_path = format!("{}/{}", manifest.test_root(), file.path);
        let candidates = [web_test_path.as_str(), file.path.as_str()];
        if !patterns.is_empty() && !patterns.iter().any(|p| matches_pattern(p, &candidates)) {
          continue;
        }
        let metadata_path = manifest.metadata_path(&self.web_tests, &file.path);
        if let Some(changed) = &changed {
          let source = self.web_tests.join(&web_test_path);
          if !changed.contains(&source) && !changed.contains(&metadata_path) {
            continue;
          }
        }
        let urls: Vec<String> = file
          .tests
          .iter()
          .map(|t| t.url.clone())
          .filter(|url| !self.is_excluded(url))
          .collect();
        if urls.is_empty() {
          continue;
        }
        planned.push(PlannedFile {
          manifest,
          file,
          metadata_path,
          urls,
        });
      }
    }
    planned.sort_by(|a, b| a.metadata_path.cmp(&b.metadata_path));
    Ok(planned)
  }

  fn check_uncommitted(&self, planned: &[PlannedFile<'_>]) -> Result<()> {
    let uncommitted = self.services.git.uncommitted_changes()?;
    let conflicts: Vec<String> = planned
      .iter()
      .filter(|p| uncommitted.contains(&p.metadata_path))
      .map(|p| self.relative(&p.metadata_path))
      .collect();
    if conflicts.is_empty() {
      return Ok(());
    }
    error!("Aborting: there are uncommitted metadata files:");
    for path in &conflicts {
      error!("  {path}");
    }
    Err(Error::UpdateAbort(
      "Please commit or reset these files to continue.".to_string(),
    ))
  }

  fn selected_builders(&self) -> Vec<String> {
    if self.options.builds.is_empty() {
      self
        .builders
        .wptrunner_try_builders()
        .into_iter()
        .map(str::to_string)
        .collect()
    } else {
      self.options.builds.iter().map(|b| b.builder.clone()).collect()
    }
  }

  fn update_properties(&self) -> UpdateProperties {
    match &self.options.update_properties {
      Some(props) => props.clone(),
      None => UpdateProperties::for_builds(
        self
          .selected_builders()
          .iter()
          .any(|name| self.builders.is_debug(name)),
      ),
    }
  }

  fn update_options(&self) -> UpdateOptions {
    UpdateOptions {
      props: self.update_properties(),
      mode: self.options.mode,
      disable_intermittent: self.options.disable_intermittent.clone(),
      keep_statuses: self.options.keep_statuses,
      bug: self.options.bug.map(bug_url),
    }
  }

  fn load_migrator(&self) -> Result<Option<Migrator>> {
    if !self.options.migrate {
      return Ok(None);
    }
    let path = self.web_tests.join(GENERIC_EXPECTATIONS);
    let expectations = TaggedExpectations::load(&path)?;
    Ok(Some(Migrator::new(expectations)))
  }

  // ====================================================================
  // Builds and reports
  // ====================================================================

  fn resolve_builds(&self) -> Result<Vec<(Build, BuildStatus)>> {
    if self.options.builds.is_empty() && !self.options.reports.is_empty() {
      debug!("Using local reports only");
      return Ok(Vec::new());
    }
    let needs_change = self.options.builds.is_empty()
      || self
        .options
        .builds
        .iter()
        .any(|b| b.number.is_none() && b.is_try());
    let change = if needs_change {
      Some(ChangeList::from_git(self.services.git, self.options.patchset)?)
    } else {
      None
    };
    let try_builders: Vec<String> = self
      .builders
      .wptrunner_try_builders()
      .into_iter()
      .map(str::to_string)
      .collect();
    BuildResolver::new(self.services.rpc, self.services.prompt)
      .with_trigger_jobs(self.options.trigger_jobs && !self.options.dry_run)
      .resolve(&self.options.builds, &try_builders, change.as_ref())
  }

  fn local_report_files(&self) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in &self.options.reports {
      if path.is_file() {
        files.push(path.clone());
      } else if path.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
          .map_err(|e| Error::io(path, e))?
          .filter_map(|entry| entry.ok().map(|e| e.path()))
          .filter(|p| p.is_file())
          .collect();
        entries.sort();
        files.extend(entries);
      } else {
        return Err(Error::UpdateAbort(format!(
          "'{}' is neither a regular file nor a directory",
          path.display()
        )));
      }
    }
    Ok(files)
  }

  /// Local reports first, then every report artifact of `builds`.
  fn gather_reports(&self, builds: &[(Build, BuildStatus)]) -> Result<Vec<WptReport>> {
    let mut reports = Vec::new();
    for path in self.local_report_files()? {
      reports.extend(read_reports(&path)?);
    }

    let mut urls = Vec::new();
    for (build, _) in builds {
      let artifacts = self.services.rpc.list_artifacts(build)?;
      urls.extend(
        artifacts
          .into_iter()
          .filter(|a| a.artifact_id.starts_with(REPORT_ARTIFACT_PREFIX))
          .map(|a| a.fetch_url),
      );
    }
    if !builds.is_empty() && urls.is_empty() {
      warn!("All builds are missing report artifacts.");
    }
    reports.extend(self.fetch_reports(&urls)?);

    if reports.is_empty() {
      warn!("No reports to process.");
    }
    for index in 0..reports.len() {
      info!("Processing wptrunner report ({}/{})", index + 1, reports.len());
    }
    Ok(reports)
  }

  fn fetch_reports(&self, urls: &[String]) -> Result<Vec<WptReport>> {
    if urls.is_empty() {
      return Ok(Vec::new());
    }
    let fetched: Mutex<Vec<(usize, Result<Vec<WptReport>>)>> = Mutex::new(Vec::new());
    let pool = self.pool()?;
    pool.scope(|s| {
      for (index, url) in urls.iter().enumerate() {
        let fetched = &fetched;
        let fetcher = &self.services.fetcher;
        let cancel = &self.cancel;
        s.spawn(move |_| {
          if cancel.is_cancelled() {
            return;
          }
          let parsed = fetcher
            .fetch(url)
            .and_then(|resource| resource.text(url))
            .and_then(|text| parse_reports(Path::new(url.as_str()), &text));
          if let Ok(mut fetched) = fetched.lock() {
            fetched.push((index, parsed));
          }
        });
      }
    });
    self.check_cancelled()?;

    let mut fetched = fetched
      .into_inner()
      .map_err(|_| Error::UpdateAbort("report fetch worker panicked".to_string()))?;
    fetched.sort_by_key(|(index, _)| *index);
    let mut reports = Vec::new();
    for (_, parsed) in fetched {
      reports.extend(parsed?);
    }
    Ok(reports)
  }

  // ====================================================================
  // Files
  // ====================================================================

  /// Metadata files whose test no longer exists in any manifest. Removed
  /// from disk unless this is a dry run.
  fn remove_orphans(&self) -> Result<Vec<PathBuf>> {
    let mut orphans = Vec::new();
    for root in self.manifests.test_roots() {
      let dir = self.web_tests.join(root);
      let infrastructure = dir.join("infrastructure");
      for entry in WalkDir::new(&dir).sort_by_file_name() {
        let Ok(entry) = entry else {
          continue;
        };
        let path = entry.path();
        if !entry.file_type().is_file()
          || path.extension().and_then(|e| e.to_str()) != Some("ini")
          || entry.file_name().to_str() == Some(DIR_METADATA)
          || path.starts_with(&infrastructure)
        {
          continue;
        }
        let relative = self.relative(path);
        let test_path = relative.strip_suffix(".ini").unwrap_or(&relative);
        if !self.manifests.contains_file(test_path) {
          orphans.push(path.to_path_buf());
        }
      }
    }
    orphans.sort();
    if orphans.is_empty() {
      return Ok(orphans);
    }

    warn!(
      "Deleting {} orphaned metadata file{}:",
      orphans.len(),
      if orphans.len() == 1 { "" } else { "s" }
    );
    for path in &orphans {
      warn!("  {}", self.relative(path));
    }
    if !self.options.dry_run {
      for path in &orphans {
        std::fs::remove_file(path).map_err(|e| Error::io(path, e))?;
      }
    }
    Ok(orphans)
  }

  fn pool(&self) -> Result<rayon::ThreadPool> {
    ThreadPoolBuilder::new()
      .num_threads(self.options.jobs.max(1))
      .build()
      .map_err(|e| Error::UpdateAbort(format!("failed to create thread pool: {e}")))
  }

  /// Update every file on the pool. Outcomes come back in task order.
  fn update_files(&self, updater: &MetadataUpdater<'_>, tasks: &[FileTask<'_>]) -> Result<Vec<Result<FileUpdate>>> {
    let outcomes: Mutex<Vec<(usize, Result<FileUpdate>)>> = Mutex::new(Vec::new());
    let pool = self.pool()?;
    pool.scope(|s| {
      for (index, task) in tasks.iter().enumerate() {
        let outcomes = &outcomes;
        s.spawn(move |_| {
          if self.cancel.is_cancelled() {
            return;
          }
          let planned = task.planned;
          let outcome = updater
            .update_file(planned.manifest, planned.file, &planned.metadata_path, &task.results)
            .and_then(|update| self.apply(&update).map(|()| update));
          if let Ok(mut outcomes) = outcomes.lock() {
            outcomes.push((index, outcome));
          }
        });
      }
    });
    self.check_cancelled()?;

    let mut outcomes = outcomes
      .into_inner()
      .map_err(|_| Error::UpdateAbort("metadata update worker panicked".to_string()))?;
    outcomes.sort_by_key(|(index, _)| *index);
    Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
  }

  fn apply(&self, update: &FileUpdate) -> Result<()> {
    if self.options.dry_run {
      return Ok(());
    }
    match (update.outcome, &update.text) {
      (FileOutcome::Written, Some(text)) => metadata::write_text(&update.path, text),
      (FileOutcome::Deleted, _) => match std::fs::remove_file(&update.path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::io(&update.path, err)),
      },
      _ => Ok(()),
    }
  }

  /// Stage written files and the tracked subset of deleted ones. Returns the
  /// number of staged paths, which a dry run reports without staging.
  fn stage(&self, to_add: &[PathBuf], tombstones: &[PathBuf]) -> Result<usize> {
    let git = self.services.git;
    let tracked: Vec<PathBuf> = if tombstones.is_empty() {
      Vec::new()
    } else {
      git.tracked(tombstones)?.into_iter().collect()
    };
    if !self.options.dry_run {
      if !to_add.is_empty() {
        git.add_list(to_add)?;
      }
      if !tracked.is_empty() {
        git.delete_list(&tracked, true)?;
      }
    }
    Ok(to_add.len() + tracked.len())
  }
}

/// Whether an include pattern selects any of `candidates`: an exact path, a
/// directory prefix or a glob.
fn matches_pattern(pattern: &str, candidates: &[&str]) -> bool {
  let pattern = pattern.trim_matches('/');
  if pattern.is_empty() {
    return true;
  }
  let glob = glob::Pattern::new(pattern).ok();
  candidates.iter().any(|candidate| {
    *candidate == pattern
      || candidate
        .strip_prefix(pattern)
        .is_some_and(|rest| rest.starts_with('/'))
      || glob.as_ref().is_some_and(|g| g.matches(candidate))
  })
}
