//! Update WPT metadata (`.ini`) files from try job results.
//!
//! Results come from wptrunner report artifacts of the selected builds,
//! from local `--report` files, or both. Updated files are staged with Git.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use common::args::{BuildArgs, LoggingArgs, WorkspaceArgs};
use tracing::info;
use wptsync::builds::{parse_bug, TerminalPrompt};
use wptsync::config::{Port, TestConfigurations, UpdateProperties};
use wptsync::expectations::TaggedExpectations;
use wptsync::git::CommandGit;
use wptsync::manifest::ManifestSet;
use wptsync::resource::HttpFetcher;
use wptsync::update::OverwriteMode;
use wptsync::{Orchestrator, RunOptions, Services};

#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
enum OverwriteArg {
  Fill,
  Yes,
  No,
}

impl OverwriteArg {
  fn as_mode(self) -> OverwriteMode {
    match self {
      OverwriteArg::Fill => OverwriteMode::Fill,
      OverwriteArg::Yes => OverwriteMode::Yes,
      OverwriteArg::No => OverwriteMode::No,
    }
  }
}

#[derive(Parser, Debug)]
#[command(name = "update_metadata", version, about)]
struct Args {
  /// Metadata files or directories to update, as paths or globs relative to the web tests root
  #[arg(value_name = "TEST")]
  include: Vec<String>,

  /// File listing tests to update, one per line (`#` starts a comment)
  #[arg(long)]
  test_name_file: Option<PathBuf>,

  /// URL prefix of tests to leave alone (repeatable)
  #[arg(long, value_name = "URL_PREFIX")]
  exclude: Vec<String>,

  /// Only update tests changed relative to the upstream branch
  #[arg(long)]
  only_changed_tests: bool,

  /// Bug to associate with updated expectations (number or crbug URL)
  #[arg(long, value_parser = parse_bug)]
  bug: Option<u64>,

  /// How existing conditions are treated
  #[arg(long, value_enum, default_value_t = OverwriteArg::Fill)]
  overwrite_conditions: OverwriteArg,

  /// Disable flaky tests with this reason instead of listing every status
  #[arg(long, value_name = "REASON")]
  disable_intermittent: Option<String>,

  /// Keep statuses that were not observed in this run
  #[arg(long)]
  keep_statuses: bool,

  /// Move matching TestExpectations lines into the metadata
  #[arg(long)]
  migrate: bool,

  /// Local wptreport file or directory of reports (repeatable)
  #[arg(long = "report", value_name = "PATH")]
  reports: Vec<PathBuf>,

  /// JSON file naming the run-info properties conditions may use
  #[arg(long)]
  update_properties: Option<PathBuf>,

  /// Statuses seen fewer times than this are folded into their neighbours
  #[arg(long, default_value_t = 4)]
  min_samples: usize,

  /// Log what would change without writing or staging anything
  #[arg(long)]
  dry_run: bool,

  #[command(flatten)]
  build: BuildArgs,

  #[command(flatten)]
  workspace: WorkspaceArgs,

  #[command(flatten)]
  logging: LoggingArgs,
}

fn main() {
  let args = Args::parse();
  args.logging.init();
  std::process::exit(common::failure::exit_code(&run(args)));
}

fn run(args: Args) -> Result<()> {
  let web_tests = args.workspace.canonical_web_tests()?;
  let builders = args.workspace.load_builders()?;
  let platforms = args.workspace.load_platforms()?;
  let virtual_suites = args.workspace.load_virtual_suites()?;
  let never_fix = load_never_fix(&web_tests)?;
  let configs = TestConfigurations::generate(&builders, &platforms, &virtual_suites, |port: Port| {
    match &never_fix {
      Some(never_fix) => port.with_never_fix(never_fix.clone()),
      None => port,
    }
  });
  let manifests = ManifestSet::load_default(&web_tests)?;
  let update_properties = args
    .update_properties
    .as_deref()
    .map(UpdateProperties::from_json_file)
    .transpose()?;

  let git = CommandGit::discover(&web_tests).context("web tests root is not inside a Git checkout")?;
  let rpc = args.build.rpc();
  let prompt = TerminalPrompt;
  let services = Services {
    git: &git,
    rpc: &rpc,
    fetcher: Arc::new(HttpFetcher::new()),
    prompt: &prompt,
  };
  let options = RunOptions {
    include: args.include,
    test_name_file: args.test_name_file,
    exclude: args.exclude,
    only_changed_tests: args.only_changed_tests,
    builds: args.build.parse_builds()?,
    patchset: args.build.patchset,
    update_properties,
    mode: args.overwrite_conditions.as_mode(),
    disable_intermittent: args.disable_intermittent,
    keep_statuses: args.keep_statuses,
    migrate: args.migrate,
    bug: args.bug,
    reports: args.reports,
    min_samples: args.min_samples,
    trigger_jobs: !args.build.no_trigger_jobs,
    dry_run: args.dry_run,
    jobs: args.workspace.jobs,
  };

  let summary = Orchestrator::new(&web_tests, &builders, &configs, &manifests, services)
    .with_options(options)
    .run()?;
  if summary.updated.is_empty() && summary.deleted.is_empty() {
    info!("No metadata files changed.");
  }
  Ok(())
}

fn load_never_fix(web_tests: &std::path::Path) -> Result<Option<Arc<TaggedExpectations>>> {
  let path = web_tests.join("NeverFixTests");
  if !path.is_file() {
    return Ok(None);
  }
  Ok(Some(Arc::new(TaggedExpectations::load(&path)?)))
}
