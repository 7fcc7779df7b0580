//! Fetch new baselines from the try jobs of the current change.
//!
//! Failing web tests with actual outputs are rebaselined into the version
//! directory of the port that ran them, after which redundant platform
//! baselines are pruned and the result is staged with Git.

mod common;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use common::args::{BuildArgs, LoggingArgs, WorkspaceArgs};
use tracing::{error, info, warn};
use wptsync::baseline::{
  failing_baselines, fetch_step_results, BaselineFetcher, RebaselineOptions, Rebaseliner,
};
use wptsync::builds::{BuildResolver, ChangeList, TerminalPrompt};
use wptsync::config::{BuilderList, PlatformTable, Port};
use wptsync::git::{CommandGit, Git};
use wptsync::resource::HttpFetcher;
use wptsync::Error;

#[derive(Parser, Debug)]
#[command(name = "rebaseline_cl", version, about)]
struct Args {
  /// Tests to rebaseline (default: every failing test with an actual output)
  #[arg(value_name = "TEST")]
  tests: Vec<String>,

  /// File listing tests to rebaseline, one per line (`#` starts a comment)
  #[arg(long)]
  test_name_file: Option<PathBuf>,

  /// Copy actual outputs from this local results directory instead of downloading them
  #[arg(long)]
  results_directory: Option<PathBuf>,

  /// Keep platform baselines that fallback makes redundant
  #[arg(long)]
  no_optimize: bool,

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
  let git = CommandGit::discover(&web_tests).context("web tests root is not inside a Git checkout")?;

  check_unstaged_baselines(&git, &web_tests)?;

  let mut only: BTreeSet<String> = args.tests.iter().cloned().collect();
  if let Some(path) = &args.test_name_file {
    info!("Reading list of tests to rebaseline from {}", path.display());
    only.extend(read_test_names(path)?);
    if only.is_empty() {
      info!("No tests to rebaseline.");
      return Ok(());
    }
  }

  let rpc = args.build.rpc();
  let prompt = TerminalPrompt;
  let builds = args.build.parse_builds()?;
  let try_builders: Vec<String> = builders
    .web_test_try_builders()
    .into_iter()
    .map(str::to_string)
    .collect();
  let needs_change = builds.is_empty() || builds.iter().any(|b| b.number.is_none());
  let change = if needs_change {
    Some(ChangeList::from_git(&git, args.build.patchset)?)
  } else {
    None
  };
  let resolved = BuildResolver::new(&rpc, &prompt)
    .with_trigger_jobs(!args.build.no_trigger_jobs && !args.dry_run)
    .resolve(&builds, &try_builders, change.as_ref())?;
  let resolved: Vec<_> = resolved.into_iter().map(|(build, _)| build).collect();

  let fetcher = Arc::new(HttpFetcher::new());
  let (results, missing) = fetch_step_results(&rpc, fetcher.as_ref(), &resolved)?;
  for build in &missing {
    warn!("No results found for {build}; its failures will not be rebaselined.");
  }

  let (set, unfound) = failing_baselines(&builders, &results, &only);
  if !unfound.is_empty() {
    warn!("Some tests have no failures with new baselines:");
    for test in &unfound {
      warn!("  {test}");
    }
  }

  let rebaseliner = Rebaseliner::new(
    &web_tests,
    all_ports(&builders, &platforms),
    BaselineFetcher::new(fetcher).with_workers(args.workspace.jobs),
  )
  .with_options(RebaselineOptions {
    optimize: !args.no_optimize,
    dry_run: args.dry_run,
    results_directory: args.results_directory.clone(),
  });
  let summary = rebaseliner.rebaseline(&set, &results)?;
  if summary.failed > 0 {
    return Err(Error::UpdateAbort(format!(
      "{} baseline(s) could not be fetched.",
      summary.failed
    ))
    .into());
  }

  if !args.dry_run && !summary.written.is_empty() {
    info!("Staging {} baselines with git.", summary.written.len());
    git.add_list(&summary.written)?;
  }
  if !args.dry_run && !summary.removed.is_empty() {
    git.delete_list(&summary.removed, true)?;
  }
  Ok(())
}

/// Every port a builder runs, so optimization sees every fallback chain.
fn all_ports(builders: &BuilderList, platforms: &PlatformTable) -> Vec<Port> {
  builders
    .all_port_names()
    .into_iter()
    .map(|name| platforms.port(name))
    .collect()
}

fn check_unstaged_baselines(git: &dyn Git, web_tests: &Path) -> Result<()> {
  let unstaged: Vec<PathBuf> = git
    .unstaged_changes()?
    .into_iter()
    .filter(|path| path.starts_with(web_tests) && is_baseline(path))
    .collect();
  if unstaged.is_empty() {
    return Ok(());
  }
  error!("Aborting: there are unstaged baselines:");
  for path in &unstaged {
    let relative = path.strip_prefix(web_tests).unwrap_or(path);
    error!("  {}", relative.display());
  }
  Err(Error::UpdateAbort("Please stage or discard these baselines to continue.".to_string()).into())
}

fn is_baseline(path: &Path) -> bool {
  path
    .file_name()
    .and_then(|name| name.to_str())
    .is_some_and(|name| name.contains("-expected."))
}

fn read_test_names(path: &Path) -> Result<Vec<String>> {
  let text = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read test names from {}", path.display()))?;
  Ok(
    text
      .lines()
      .map(|line| line.split('#').next().unwrap_or("").trim())
      .filter(|line| !line.is_empty())
      .map(str::to_string)
      .collect(),
  )
}
