use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use wptsync::builds::{parse_build_specifiers, Build, LuciBuildRpc};
use wptsync::config::{BuilderList, PlatformTable, VirtualSuite};

pub const DEFAULT_WEB_TESTS: &str = "third_party/blink/web_tests";
pub const DEFAULT_BUILDERS: &str = "third_party/blink/tools/blinkpy/common/config/builders.json";

#[derive(Debug, Clone, Args)]
pub struct WorkspaceArgs {
  /// Root of the web tests tree
  #[arg(long, default_value = DEFAULT_WEB_TESTS)]
  pub web_tests: PathBuf,

  /// Builder descriptions (JSON)
  #[arg(long, default_value = DEFAULT_BUILDERS)]
  pub builders: PathBuf,

  /// Port fallback paths and OS specifier macros (JSON)
  #[arg(long)]
  pub platforms: Option<PathBuf>,

  /// Virtual test suites (JSON); defaults to `<web-tests>/VirtualTestSuites`
  #[arg(long)]
  pub virtual_suites: Option<PathBuf>,

  /// Number of worker threads
  #[arg(long, short, default_value_t = num_cpus::get())]
  pub jobs: usize,
}

impl WorkspaceArgs {
  /// Absolute web tests root, so paths line up with those Git reports.
  pub fn canonical_web_tests(&self) -> Result<PathBuf> {
    std::fs::canonicalize(&self.web_tests)
      .with_context(|| format!("web tests root {} does not exist", self.web_tests.display()))
  }

  pub fn load_builders(&self) -> Result<BuilderList> {
    BuilderList::load(&self.builders)
      .with_context(|| format!("failed to load builders from {}", self.builders.display()))
  }

  /// An absent `--platforms` means ports without fallback and no macros.
  pub fn load_platforms(&self) -> Result<PlatformTable> {
    match &self.platforms {
      Some(path) => PlatformTable::load(path)
        .with_context(|| format!("failed to load platforms from {}", path.display())),
      None => Ok(PlatformTable::default()),
    }
  }

  pub fn load_virtual_suites(&self) -> Result<Vec<VirtualSuite>> {
    let path = match &self.virtual_suites {
      Some(path) => path.clone(),
      None => {
        let default = self.web_tests.join("VirtualTestSuites");
        if !default.is_file() {
          return Ok(Vec::new());
        }
        default
      }
    };
    VirtualSuite::load_all(&path)
      .with_context(|| format!("failed to load virtual suites from {}", path.display()))
  }
}

#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
  /// Builds to take results from: `[{ci|try}/]<builder>[:N[-M]]`, comma-separated or repeated
  #[arg(long = "build", value_name = "SPEC")]
  pub builds: Vec<String>,

  /// Patchset whose try jobs to use (default: latest uploaded)
  #[arg(long)]
  pub patchset: Option<u32>,

  /// Never schedule try jobs for builders that have none
  #[arg(long)]
  pub no_trigger_jobs: bool,

  /// OAuth token sent to the build services
  #[arg(long, value_name = "TOKEN")]
  pub auth_token: Option<String>,
}

impl BuildArgs {
  pub fn parse_builds(&self) -> Result<Vec<Build>> {
    let mut builds = Vec::new();
    for arg in &self.builds {
      builds.extend(parse_build_specifiers(arg)?);
    }
    Ok(builds)
  }

  pub fn rpc(&self) -> LuciBuildRpc {
    LuciBuildRpc::new(self.auth_token.clone())
  }
}

#[derive(Debug, Clone, Args)]
pub struct LoggingArgs {
  /// Log debug output
  #[arg(long, short)]
  pub verbose: bool,
}

impl LoggingArgs {
  pub fn init(&self) {
    wptsync::logging::init(self.verbose);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Harness {
    #[command(flatten)]
    build: BuildArgs,
    #[command(flatten)]
    workspace: WorkspaceArgs,
  }

  #[test]
  fn expands_repeated_and_comma_separated_builds() {
    let harness = Harness::parse_from([
      "harness",
      "--build",
      "linux-rel:3-4,ci/Mac Tests",
      "--build",
      "win-rel",
    ]);
    let builds = harness.build.parse_builds().unwrap();
    let rendered: Vec<String> = builds.iter().map(|b| format!("{}/{b}", b.bucket)).collect();
    assert_eq!(
      rendered,
      vec![
        "try/\"linux-rel\" build 3",
        "try/\"linux-rel\" build 4",
        "ci/\"Mac Tests\"",
        "try/\"win-rel\"",
      ]
    );
    assert_eq!(harness.workspace.web_tests, PathBuf::from(DEFAULT_WEB_TESTS));
  }

  #[test]
  fn rejects_bad_specifiers() {
    let harness = Harness::parse_from(["harness", "--build", "linux-rel:9-3"]);
    let err = harness.build.parse_builds().unwrap_err();
    assert!(err.to_string().contains("start build number must precede end"));
  }
}
