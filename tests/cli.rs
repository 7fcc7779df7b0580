use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const BUILDERS: &str = r#"{
  "linux-wpt-rel": {
    "port_name": "linux-trusty",
    "specifiers": ["Trusty", "Release"],
    "is_try_builder": true,
    "steps": {"blink_web_tests": {}, "blink_wpt_tests": {"uses_wptrunner": true}}
  }
}"#;

const MANIFEST: &str = r#"{
  "version": 8,
  "url_base": "/",
  "items": {"testharness": {"a.html": ["abc", [null, {}]]}}
}"#;

const REPORT: &str = r#"{"run_info": {"product": "content_shell", "os": "linux", "port": "trusty", "debug": false, "flag_specific": "", "virtual_suite": ""}, "results": [{"test": "/a.html", "status": "OK", "subtests": [{"name": "first", "status": "FAIL"}]}]}"#;

fn git_available() -> bool {
  Command::new("git").arg("--version").output().is_ok()
}

fn git(dir: &Path, args: &[&str]) {
  let status = Command::new("git").current_dir(dir).args(args).status().unwrap();
  assert!(status.success(), "git {args:?} failed");
}

/// A committed checkout holding a web tests tree, plus a builders file and
/// a report outside of it.
struct Workspace {
  _checkout: TempDir,
  _inputs: TempDir,
  web_tests: PathBuf,
  builders: PathBuf,
  report: PathBuf,
}

fn workspace() -> Workspace {
  let checkout = TempDir::new().unwrap();
  let inputs = TempDir::new().unwrap();
  let web_tests = checkout.path().join("web_tests");
  std::fs::create_dir_all(web_tests.join("external/wpt")).unwrap();
  std::fs::write(web_tests.join("external/wpt/MANIFEST.json"), MANIFEST).unwrap();
  std::fs::write(web_tests.join("external/wpt/a.html"), "<!doctype html>\n").unwrap();
  for args in [
    vec!["init", "-q"],
    vec!["config", "user.email", "dev@example.com"],
    vec!["config", "user.name", "Dev"],
    vec!["add", "."],
    vec!["commit", "-q", "-m", "init"],
  ] {
    git(checkout.path(), &args);
  }
  let builders = inputs.path().join("builders.json");
  std::fs::write(&builders, BUILDERS).unwrap();
  let report = inputs.path().join("wpt_report.json");
  std::fs::write(&report, REPORT).unwrap();
  Workspace {
    _checkout: checkout,
    _inputs: inputs,
    web_tests,
    builders,
    report,
  }
}

fn run(bin: &str, workspace: &Workspace, extra: &[&str]) -> Output {
  Command::new(bin)
    .arg("--web-tests")
    .arg(&workspace.web_tests)
    .arg("--builders")
    .arg(&workspace.builders)
    .args(extra)
    .env_remove("RUST_LOG")
    .output()
    .unwrap()
}

#[test]
fn update_metadata_applies_local_reports() {
  if !git_available() {
    return;
  }
  let ws = workspace();
  let report = ws.report.to_string_lossy().to_string();
  let output = run(
    env!("CARGO_BIN_EXE_update_metadata"),
    &ws,
    &["--report", &report, "--min-samples", "1"],
  );
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(output.status.success(), "stderr: {stderr}");
  assert!(stderr.contains("Updating expectations for up to 1 test file."), "{stderr}");
  assert!(stderr.contains("Updated 'a.html'"), "{stderr}");

  let metadata = std::fs::read_to_string(ws.web_tests.join("external/wpt/a.html.ini")).unwrap();
  assert!(metadata.contains("[first]"), "{metadata}");
  assert!(metadata.contains("expected: FAIL"), "{metadata}");
}

#[test]
fn update_metadata_dry_run_writes_nothing() {
  if !git_available() {
    return;
  }
  let ws = workspace();
  let report = ws.report.to_string_lossy().to_string();
  let output = run(
    env!("CARGO_BIN_EXE_update_metadata"),
    &ws,
    &["--report", &report, "--min-samples", "1", "--dry-run"],
  );
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(output.status.success(), "stderr: {stderr}");
  assert!(stderr.contains("Updated 'a.html'"), "{stderr}");
  assert!(!ws.web_tests.join("external/wpt/a.html.ini").exists());
}

#[test]
fn update_metadata_rejects_missing_report_paths() {
  if !git_available() {
    return;
  }
  let ws = workspace();
  let missing = ws.web_tests.join("no-such-report.json");
  let missing = missing.to_string_lossy().to_string();
  let output = run(env!("CARGO_BIN_EXE_update_metadata"), &ws, &["--report", &missing]);
  assert_eq!(output.status.code(), Some(1));
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("is neither a regular file nor a directory"), "{stderr}");
}

#[test]
fn rebaseline_cl_refuses_unstaged_baselines() {
  if !git_available() {
    return;
  }
  let ws = workspace();
  std::fs::write(ws.web_tests.join("external/wpt/a-expected.txt"), "new\n").unwrap();
  let output = run(env!("CARGO_BIN_EXE_rebaseline_cl"), &ws, &[]);
  assert_eq!(output.status.code(), Some(1));
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("Aborting: there are unstaged baselines:"), "{stderr}");
  assert!(stderr.contains("external/wpt/a-expected.txt"), "{stderr}");
}

#[test]
fn update_expectations_rejects_bad_build_specifiers() {
  if !git_available() {
    return;
  }
  let ws = workspace();
  let output = run(
    env!("CARGO_BIN_EXE_update_expectations"),
    &ws,
    &["--build", "linux-wpt-rel:abc"],
  );
  assert_eq!(output.status.code(), Some(1));
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("invalid build specifier: 'linux-wpt-rel:abc'"), "{stderr}");
}
