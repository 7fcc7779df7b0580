//! Remote calls to the build and results services.
//!
//! [`BuildRpc`] is the narrow surface the resolver and the report gatherer
//! need. [`PrpcClient`] speaks the JSON flavour of pRPC: a POST of the request
//! message, answered with the response message behind a `)]}'` line.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use tracing::debug;

use super::cl::ChangeList;
use super::spec::Build;
use crate::error::{Error, Result, RpcError};

pub const BUILDBUCKET_HOST: &str = "cr-buildbucket.appspot.com";
pub const RESULTDB_HOST: &str = "results.api.cr.dev";
const XSSI_PREFIX: &str = ")]}'";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
  Scheduled,
  Started,
  /// Requested by this run; no build number yet.
  Triggered,
  Success,
  /// The build ran and some tests failed.
  TestFailure,
  InfraFailure,
  Canceled,
}

impl BuildStatus {
  /// Map a Buildbucket status string.
  pub fn from_bb_status(status: &str) -> Option<Self> {
    match status {
      "SCHEDULED" => Some(BuildStatus::Scheduled),
      "STARTED" => Some(BuildStatus::Started),
      "SUCCESS" => Some(BuildStatus::Success),
      "FAILURE" => Some(BuildStatus::TestFailure),
      "INFRA_FAILURE" => Some(BuildStatus::InfraFailure),
      "CANCELED" => Some(BuildStatus::Canceled),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      BuildStatus::Scheduled => "SCHEDULED",
      BuildStatus::Started => "STARTED",
      BuildStatus::Triggered => "TRIGGERED",
      BuildStatus::Success => "SUCCESS",
      BuildStatus::TestFailure => "TEST_FAILURE",
      BuildStatus::InfraFailure => "INFRA_FAILURE",
      BuildStatus::Canceled => "CANCELED",
    }
  }

  /// Still running or waiting to run.
  pub fn is_pending(self) -> bool {
    matches!(
      self,
      BuildStatus::Scheduled | BuildStatus::Started | BuildStatus::Triggered
    )
  }

  /// Finished, with results that may be missing or partial.
  pub fn is_incomplete(self) -> bool {
    matches!(self, BuildStatus::InfraFailure | BuildStatus::Canceled)
  }

  /// Finished with usable results.
  pub fn has_results(self) -> bool {
    matches!(self, BuildStatus::Success | BuildStatus::TestFailure)
  }
}

impl fmt::Display for BuildStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An artifact attached to a build's test invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
  pub artifact_id: String,
  pub fetch_url: String,
}

pub trait BuildRpc: Send + Sync {
  /// Latest build of each of `builders` for `change`.
  fn latest_try_jobs(&self, builders: &[String], change: &ChangeList) -> Result<Vec<(Build, BuildStatus)>>;

  /// Look up a numbered build, filling in its ID.
  fn get_build(&self, build: &Build) -> Result<(Build, BuildStatus)>;

  /// Artifacts of `build`'s test invocation.
  fn list_artifacts(&self, build: &Build) -> Result<Vec<Artifact>>;

  fn trigger_try_jobs(&self, builders: &[String], change: &ChangeList) -> Result<()>;
}

impl<T: BuildRpc + ?Sized> BuildRpc for Arc<T> {
  fn latest_try_jobs(&self, builders: &[String], change: &ChangeList) -> Result<Vec<(Build, BuildStatus)>> {
    (**self).latest_try_jobs(builders, change)
  }

  fn get_build(&self, build: &Build) -> Result<(Build, BuildStatus)> {
    (**self).get_build(build)
  }

  fn list_artifacts(&self, build: &Build) -> Result<Vec<Artifact>> {
    (**self).list_artifacts(build)
  }

  fn trigger_try_jobs(&self, builders: &[String], change: &ChangeList) -> Result<()> {
    (**self).trigger_try_jobs(builders, change)
  }
}

/// Remove the anti-XSSI line that precedes pRPC JSON responses.
pub fn strip_xssi_prefix(body: &str) -> &str {
  match body.strip_prefix(XSSI_PREFIX) {
    Some(rest) => rest.trim_start_matches(['\r', '\n']),
    None => body,
  }
}

/// JSON pRPC client for one host.
#[derive(Debug, Clone)]
pub struct PrpcClient {
  host: String,
  timeout: Duration,
  token: Option<String>,
}

impl PrpcClient {
  pub fn new(host: impl Into<String>) -> Self {
    Self {
      host: host.into(),
      timeout: Duration::from_secs(60),
      token: None,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// OAuth bearer token sent with every call.
  pub fn with_token(mut self, token: Option<String>) -> Self {
    self.token = token;
    self
  }

  /// Call `service.method` with `payload`.
  pub fn call(&self, service: &str, method: &str, payload: &Json) -> Result<Json> {
    let url = format!("https://{}/prpc/{service}/{method}", self.host);
    let rpc_error = |message: String, code: u16| -> Error {
      RpcError {
        op: method.to_string(),
        message,
        code,
        payload: payload.clone(),
      }
      .into()
    };
    debug!("pRPC {service}.{method}");

    let config = ureq::Agent::config_builder()
      .timeout_global(Some(self.timeout))
      .http_status_as_error(false)
      .build();
    let agent: ureq::Agent = config.into();
    let mut request = agent
      .post(&url)
      .header("Content-Type", "application/json")
      .header("Accept", "application/json");
    if let Some(token) = &self.token {
      request = request.header("Authorization", &format!("Bearer {token}"));
    }
    let mut response = request
      .send(payload.to_string())
      .map_err(|e| rpc_error(e.to_string(), 0))?;
    let code = response.status().as_u16();
    let body = response
      .body_mut()
      .read_to_string()
      .map_err(|e| rpc_error(e.to_string(), code))?;
    if !(200..300).contains(&code) {
      return Err(rpc_error(strip_xssi_prefix(&body).trim().to_string(), code));
    }
    serde_json::from_str(strip_xssi_prefix(&body)).map_err(|e| rpc_error(e.to_string(), code))
  }
}

/// [`BuildRpc`] backed by Buildbucket and ResultDB.
#[derive(Debug, Clone)]
pub struct LuciBuildRpc {
  buildbucket: PrpcClient,
  resultdb: PrpcClient,
  project: String,
}

impl LuciBuildRpc {
  pub fn new(token: Option<String>) -> Self {
    Self {
      buildbucket: PrpcClient::new(BUILDBUCKET_HOST).with_token(token.clone()),
      resultdb: PrpcClient::new(RESULTDB_HOST).with_token(token),
      project: "chromium".to_string(),
    }
  }

  fn builder_id(&self, builder: &str, bucket: &str) -> Json {
    json!({"project": self.project, "bucket": bucket, "builder": builder})
  }

  fn parse_build(build: &Json) -> Option<(Build, BuildStatus)> {
    let builder = build.pointer("/builder/builder")?.as_str()?;
    let bucket = build.pointer("/builder/bucket")?.as_str()?;
    let status = BuildStatus::from_bb_status(build.get("status")?.as_str()?)?;
    let mut parsed = Build::new(builder).with_bucket(bucket);
    if let Some(number) = build.get("number").and_then(Json::as_u64) {
      parsed = parsed.with_number(number);
    }
    if let Some(id) = build.get("id").and_then(Json::as_str) {
      parsed = parsed.with_id(id);
    }
    Some((parsed, status))
  }
}

const BUILD_FIELDS: &str = "builds.*.id,builds.*.number,builds.*.status,builds.*.builder";

impl BuildRpc for LuciBuildRpc {
  fn latest_try_jobs(&self, builders: &[String], change: &ChangeList) -> Result<Vec<(Build, BuildStatus)>> {
    let requests: Vec<Json> = builders
      .iter()
      .map(|builder| {
        json!({"searchBuilds": {
          "predicate": {
            "builder": self.builder_id(builder, "try"),
            "gerritChanges": [change.gerrit_change()],
          },
          "fields": BUILD_FIELDS,
          "pageSize": 1,
        }})
      })
      .collect();
    let payload = json!({ "requests": requests });
    let response = self.buildbucket.call("buildbucket.v2.Builds", "Batch", &payload)?;
    let mut builds = Vec::new();
    for entry in response
      .get("responses")
      .and_then(Json::as_array)
      .into_iter()
      .flatten()
    {
      let latest = entry
        .pointer("/searchBuilds/builds")
        .and_then(Json::as_array)
        .and_then(|builds| builds.first());
      if let Some(build) = latest.and_then(Self::parse_build) {
        builds.push(build);
      }
    }
    Ok(builds)
  }

  fn get_build(&self, build: &Build) -> Result<(Build, BuildStatus)> {
    let payload = json!({"requests": [{"getBuild": {
      "builder": self.builder_id(&build.builder, &build.bucket),
      "buildNumber": build.number,
      "fields": "id,number,status,builder",
    }}]});
    let response = self.buildbucket.call("buildbucket.v2.Builds", "Batch", &payload)?;
    response
      .pointer("/responses/0/getBuild")
      .and_then(Self::parse_build)
      .ok_or_else(|| Error::UnresolvedBuild(build.to_string()))
  }

  fn list_artifacts(&self, build: &Build) -> Result<Vec<Artifact>> {
    let id = build
      .id
      .as_deref()
      .ok_or_else(|| Error::UnresolvedBuild(build.to_string()))?;
    let mut artifacts = Vec::new();
    let mut page_token = String::new();
    loop {
      let payload = json!({
        "invocations": [format!("invocations/build-{id}")],
        "pageSize": 1000,
        "pageToken": page_token,
      });
      let response = self
        .resultdb
        .call("luci.resultdb.v1.ResultDB", "QueryArtifacts", &payload)?;
      if let Some(page) = response.get("artifacts") {
        let page: Vec<Artifact> =
          serde_json::from_value(page.clone()).map_err(|e| RpcError {
            op: "QueryArtifacts".to_string(),
            message: e.to_string(),
            code: 200,
            payload: payload.clone(),
          })?;
        artifacts.extend(page);
      }
      match response.get("nextPageToken").and_then(Json::as_str) {
        Some(token) if !token.is_empty() => page_token = token.to_string(),
        _ => break,
      }
    }
    Ok(artifacts)
  }

  fn trigger_try_jobs(&self, builders: &[String], change: &ChangeList) -> Result<()> {
    let requests: Vec<Json> = builders
      .iter()
      .map(|builder| {
        json!({"scheduleBuild": {
          "builder": self.builder_id(builder, "try"),
          "gerritChanges": [change.gerrit_change()],
        }})
      })
      .collect();
    self
      .buildbucket
      .call("buildbucket.v2.Builds", "Batch", &json!({ "requests": requests }))?;
    Ok(())
  }
}
