//! Update the flat TestExpectations files from try job failures.
//!
//! WPT failures that new baselines can fix are rebaselined; the rest get
//! tag-guarded lines after the importer marker.

mod common;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use common::args::{BuildArgs, LoggingArgs, WorkspaceArgs};
use tracing::{info, warn};
use wptsync::baseline::{
  failing_baselines, fetch_step_results, BaselineFetcher, RebaselineOptions, Rebaseliner, StepResults,
  WebTestResults,
};
use wptsync::builds::{Build, BuildResolver, ChangeList, TerminalPrompt};
use wptsync::config::{BuilderList, PlatformTable, Port, PortHandle};
use wptsync::expectations::{
  update_expectation_files, ExpectationsUpdater, LegacyOptions, LegacyRunOptions, TaggedExpectations,
};
use wptsync::git::{CommandGit, Git};
use wptsync::manifest::ManifestSet;
use wptsync::resource::HttpFetcher;

#[derive(Parser, Debug)]
#[command(name = "update_expectations", version, about)]
struct Args {
  /// Also write lines for tests that passed unexpectedly
  #[arg(long)]
  include_unexpected_pass: bool,

  /// Drop or rename lines for tests this change deleted or renamed
  #[arg(long)]
  clean_up_test_expectations: bool,

  /// With cleanup, leave lines of tests the change did not touch alone
  #[arg(long)]
  clean_up_affected_tests_only: bool,

  /// Turn `[ Timeout ]` lines of slow tests into `[ Skip Timeout ]`
  #[arg(long)]
  skip_slow_timeouts: bool,

  /// Write lines for rebaselineable failures instead of fetching new baselines
  #[arg(long)]
  no_rebaseline: bool,

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
  let manifests = ManifestSet::load_default(&web_tests)?;
  let git = CommandGit::discover(&web_tests).context("web tests root is not inside a Git checkout")?;

  let rpc = args.build.rpc();
  let prompt = TerminalPrompt;
  let builds = args.build.parse_builds()?;
  let try_builders: Vec<String> = builders
    .web_test_try_builders()
    .into_iter()
    .map(str::to_string)
    .collect();
  let change = if builds.is_empty() || builds.iter().any(|b| b.number.is_none()) {
    Some(ChangeList::from_git(&git, args.build.patchset)?)
  } else {
    None
  };
  let resolved: Vec<Build> = BuildResolver::new(&rpc, &prompt)
    .with_trigger_jobs(!args.build.no_trigger_jobs && !args.dry_run)
    .resolve(&builds, &try_builders, change.as_ref())?
    .into_iter()
    .map(|(build, _)| build)
    .collect();

  let fetcher = Arc::new(HttpFetcher::new());
  let (results, _) = fetch_step_results(&rpc, fetcher.as_ref(), &resolved)?;
  let per_port = results_by_port(&builders, &resolved, &results);

  let updater = ExpectationsUpdater::new(&builders, &platforms, &manifests)
    .with_try_ports(try_ports(&builders, &platforms, &web_tests)?)
    .with_options(LegacyOptions {
      include_unexpected_pass: args.include_unexpected_pass,
      clean_up_affected_tests_only: args.clean_up_affected_tests_only,
    });
  let mut summary = update_expectation_files(
    &updater,
    &web_tests,
    &git,
    &per_port,
    LegacyRunOptions {
      clean_up_test_expectations: args.clean_up_test_expectations,
      skip_slow_timeouts: args.skip_slow_timeouts,
      dry_run: args.dry_run,
    },
  )?;
  info!("Wrote {} expectation line(s).", summary.lines_written);

  let mut to_stage = std::mem::take(&mut summary.changed);
  let mut removed = Vec::new();
  if !summary.tests_to_rebaseline.is_empty() && !args.no_rebaseline {
    let only: BTreeSet<String> = summary.tests_to_rebaseline.iter().cloned().collect();
    let (set, unfound) = failing_baselines(&builders, &results, &only);
    for test in &unfound {
      warn!("No actual output to rebaseline {test} from");
    }
    let ports: Vec<Port> = builders
      .all_port_names()
      .into_iter()
      .map(|name| platforms.port(name))
      .collect();
    let rebaselined = Rebaseliner::new(
      &web_tests,
      ports,
      BaselineFetcher::new(fetcher).with_workers(args.workspace.jobs),
    )
    .with_options(RebaselineOptions {
      optimize: true,
      dry_run: args.dry_run,
      results_directory: None,
    })
    .rebaseline(&set, &results)?;
    to_stage.extend(rebaselined.written);
    removed = rebaselined.removed;
  }

  if !args.dry_run {
    git.add_list(&to_stage)?;
    git.delete_list(&removed, true)?;
  }
  info!("Staged {} file(s).", to_stage.len() + removed.len());
  Ok(())
}

/// One entry per resolved build and step; builds without results get a
/// `None` entry so their port inherits the others' failures.
fn results_by_port(
  builders: &BuilderList,
  resolved: &[Build],
  results: &StepResults,
) -> Vec<(String, Option<WebTestResults>)> {
  let mut per_port = Vec::new();
  for build in resolved {
    let Some(port_name) = builders.port_name_for_builder(&build.builder) else {
      warn!("No port known for builder \"{}\"; skipping", build.builder);
      continue;
    };
    let before = per_port.len();
    per_port.extend(
      results
        .iter()
        .filter(|((b, _), _)| b == build)
        .map(|(_, r)| (port_name.to_string(), Some(r.clone()))),
    );
    if per_port.len() == before {
      per_port.push((port_name.to_string(), None));
    }
  }
  per_port
}

fn try_ports(
  builders: &BuilderList,
  platforms: &PlatformTable,
  web_tests: &std::path::Path,
) -> Result<Vec<Arc<dyn PortHandle>>> {
  let never_fix_path: PathBuf = web_tests.join("NeverFixTests");
  let never_fix = if never_fix_path.is_file() {
    Some(Arc::new(TaggedExpectations::load(&never_fix_path)?))
  } else {
    None
  };
  let names: BTreeSet<&str> = builders
    .try_builder_names()
    .into_iter()
    .filter_map(|builder| builders.port_name_for_builder(builder))
    .collect();
  Ok(
    names
      .into_iter()
      .map(|name| {
        let port = platforms.port(name);
        let port = match &never_fix {
          Some(never_fix) => port.with_never_fix(never_fix.clone()),
          None => port,
        };
        Arc::new(port) as Arc<dyn PortHandle>
      })
      .collect(),
  )
}
