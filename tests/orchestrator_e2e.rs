use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tempfile::TempDir;
use wptsync::builds::{Artifact, Build, BuildRpc, BuildStatus, ChangeList, FixedPrompt};
use wptsync::config::{BuilderList, PlatformTable, TestConfigurations};
use wptsync::git::Git;
use wptsync::manifest::{Manifest, ManifestSet};
use wptsync::resource::{FetchedResource, ResourceFetcher};
use wptsync::{Error, Orchestrator, RunOptions, Services};

const BUILDERS: &str = r#"{
  "linux-wpt-rel": {
    "port_name": "linux-trusty",
    "specifiers": ["Trusty", "Release"],
    "is_try_builder": true,
    "steps": {"blink_wpt_tests": {"uses_wptrunner": true}}
  }
}"#;

const REPORT_URL: &str = "https://results.example/1000/wpt_reports_content_shell.json";

#[derive(Default)]
struct RecordingGit {
  root: PathBuf,
  uncommitted: BTreeSet<PathBuf>,
  added: Mutex<Vec<PathBuf>>,
}

impl Git for RecordingGit {
  fn root(&self) -> &Path {
    &self.root
  }

  fn unstaged_changes(&self) -> wptsync::Result<BTreeSet<PathBuf>> {
    Ok(self.uncommitted.clone())
  }

  fn uncommitted_changes(&self) -> wptsync::Result<BTreeSet<PathBuf>> {
    Ok(self.uncommitted.clone())
  }

  fn changed_files(&self, _diff_filter: Option<&str>) -> wptsync::Result<BTreeSet<PathBuf>> {
    Ok(BTreeSet::new())
  }

  fn renamed_files(&self) -> wptsync::Result<BTreeMap<PathBuf, PathBuf>> {
    Ok(BTreeMap::new())
  }

  fn tracked(&self, _paths: &[PathBuf]) -> wptsync::Result<BTreeSet<PathBuf>> {
    Ok(BTreeSet::new())
  }

  fn add_list(&self, paths: &[PathBuf]) -> wptsync::Result<()> {
    self.added.lock().unwrap().extend(paths.iter().cloned());
    Ok(())
  }

  fn delete_list(&self, _paths: &[PathBuf], _ignore_unmatch: bool) -> wptsync::Result<()> {
    Ok(())
  }

  fn branch_config(&self, _key: &str) -> wptsync::Result<Option<String>> {
    Ok(None)
  }
}

/// One finished build, numbered 1000, with a single report artifact.
struct OneBuildRpc;

impl BuildRpc for OneBuildRpc {
  fn latest_try_jobs(&self, _builders: &[String], _change: &ChangeList) -> wptsync::Result<Vec<(Build, BuildStatus)>> {
    Ok(Vec::new())
  }

  fn get_build(&self, build: &Build) -> wptsync::Result<(Build, BuildStatus)> {
    if build.number != Some(1000) {
      return Err(Error::UnresolvedBuild(build.to_string()));
    }
    Ok((build.clone().with_id("8000"), BuildStatus::TestFailure))
  }

  fn list_artifacts(&self, build: &Build) -> wptsync::Result<Vec<Artifact>> {
    assert_eq!(build.id.as_deref(), Some("8000"));
    Ok(vec![Artifact {
      artifact_id: "wpt_reports_content_shell.json".to_string(),
      fetch_url: REPORT_URL.to_string(),
    }])
  }

  fn trigger_try_jobs(&self, _builders: &[String], _change: &ChangeList) -> wptsync::Result<()> {
    panic!("no jobs should be triggered");
  }
}

struct StaticFetcher(BTreeMap<String, String>);

impl ResourceFetcher for StaticFetcher {
  fn fetch(&self, url: &str) -> wptsync::Result<FetchedResource> {
    match self.0.get(url) {
      Some(body) => Ok(FetchedResource::new(body.clone().into_bytes(), None)),
      None => Err(Error::Fetch {
        url: url.to_string(),
        reason: "HTTP 404".to_string(),
      }),
    }
  }
}

fn manifests() -> ManifestSet {
  let json = json!({
    "version": 8,
    "url_base": "/",
    "items": {"testharness": {
      "a.html": ["abc", [null, {}]],
      "b.html": ["abc", [null, {}]]
    }}
  });
  ManifestSet::new(vec![Manifest::from_json("external/wpt", "/", &json).unwrap()])
}

fn report() -> String {
  let run_info = json!({
    "product": "content_shell", "os": "linux", "port": "trusty",
    "debug": false, "flag_specific": "", "virtual_suite": ""
  });
  json!({
    "run_info": run_info,
    "results": [
      {"test": "/a.html", "status": "OK", "subtests": [
        {"name": "first", "status": "FAIL", "expected": "PASS"}
      ]},
      {"test": "/b.html", "status": "OK", "subtests": [
        {"name": "second", "status": "PASS"}
      ]}
    ]
  })
  .to_string()
}

#[test]
fn fetched_reports_update_and_stage_metadata() {
  let dir = TempDir::new().unwrap();
  let web_tests = dir.path().join("web_tests");
  std::fs::create_dir_all(web_tests.join("external/wpt")).unwrap();

  let builders = BuilderList::from_json_str(BUILDERS).unwrap();
  let configs = TestConfigurations::generate(&builders, &PlatformTable::default(), &[], |port| port);
  let manifests = manifests();
  let git = RecordingGit {
    root: dir.path().to_path_buf(),
    ..RecordingGit::default()
  };
  let prompt = FixedPrompt(false);
  let fetcher = StaticFetcher([(REPORT_URL.to_string(), report())].into_iter().collect());
  let services = Services {
    git: &git,
    rpc: &OneBuildRpc,
    fetcher: Arc::new(fetcher),
    prompt: &prompt,
  };

  let summary = Orchestrator::new(&web_tests, &builders, &configs, &manifests, services)
    .with_options(RunOptions {
      builds: vec![Build::new("linux-wpt-rel").with_number(1000)],
      min_samples: 1,
      jobs: 2,
      ..RunOptions::default()
    })
    .run()
    .unwrap();

  assert_eq!(summary.planned, 2);
  assert!(summary.failed.is_empty());
  let metadata = web_tests.join("external/wpt/a.html.ini");
  let written = std::fs::read_to_string(&metadata).unwrap();
  assert!(written.starts_with("[a.html]\n"), "{written}");
  assert!(written.contains("[first]"), "{written}");
  assert!(written.contains("expected: FAIL"), "{written}");
  // Everything in b.html passed, so it needs no metadata.
  assert!(!web_tests.join("external/wpt/b.html.ini").exists());
  assert_eq!(*git.added.lock().unwrap(), vec![metadata]);
}

#[test]
fn uncommitted_metadata_aborts_before_fetching() {
  let dir = TempDir::new().unwrap();
  let web_tests = dir.path().join("web_tests");
  std::fs::create_dir_all(web_tests.join("external/wpt")).unwrap();
  let metadata = web_tests.join("external/wpt/a.html.ini");
  std::fs::write(&metadata, "[a.html]\n  expected: TIMEOUT\n").unwrap();

  let builders = BuilderList::from_json_str(BUILDERS).unwrap();
  let configs = TestConfigurations::generate(&builders, &PlatformTable::default(), &[], |port| port);
  let manifests = manifests();
  let git = RecordingGit {
    root: dir.path().to_path_buf(),
    uncommitted: [metadata.clone()].into_iter().collect(),
    ..RecordingGit::default()
  };
  let prompt = FixedPrompt(false);
  let services = Services {
    git: &git,
    rpc: &OneBuildRpc,
    fetcher: Arc::new(StaticFetcher(BTreeMap::new())),
    prompt: &prompt,
  };

  let err = Orchestrator::new(&web_tests, &builders, &configs, &manifests, services)
    .with_options(RunOptions {
      builds: vec![Build::new("linux-wpt-rel").with_number(1000)],
      ..RunOptions::default()
    })
    .run()
    .unwrap_err();
  assert!(matches!(err, Error::UpdateAbort(_)));
  assert_eq!(
    std::fs::read_to_string(&metadata).unwrap(),
    "[a.html]\n  expected: TIMEOUT\n"
  );
  assert!(git.added.lock().unwrap().is_empty());
}
