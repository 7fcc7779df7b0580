//! Read-only view of WPT `MANIFEST.json` files.
//!
//! Only two things are needed from a manifest: iterating tests by type and
//! converting between file paths and test URLs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TestType {
  Testharness,
  Reftest,
  PrintReftest,
  Crashtest,
  Wdspec,
}

impl TestType {
  pub const ALL: [TestType; 5] = [
    TestType::Testharness,
    TestType::Reftest,
    TestType::PrintReftest,
    TestType::Crashtest,
    TestType::Wdspec,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      TestType::Testharness => "testharness",
      TestType::Reftest => "reftest",
      TestType::PrintReftest => "print-reftest",
      TestType::Crashtest => "crashtest",
      TestType::Wdspec => "wdspec",
    }
  }

  /// Test-level status implied when metadata says nothing.
  pub fn default_status(self) -> Status {
    match self {
      TestType::Testharness | TestType::Wdspec => Status::Ok,
      TestType::Reftest | TestType::PrintReftest | TestType::Crashtest => Status::Pass,
    }
  }

  pub fn is_reftest(self) -> bool {
    matches!(self, TestType::Reftest | TestType::PrintReftest)
  }
}

impl fmt::Display for TestType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTest {
  pub url: String,
  pub test_type: TestType,
  /// `timeout=long`
  pub slow: bool,
  /// Reference URLs with their relation (`==` or `!=`), reftests only.
  pub references: Vec<(String, String)>,
}

/// A source file and the tests generated from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFile {
  /// Path relative to the test root, `/`-separated.
  pub path: String,
  pub tests: Vec<ManifestTest>,
}

#[derive(Debug, Clone)]
pub struct Manifest {
  test_root: String,
  url_base: String,
  files: BTreeMap<String, TestFile>,
  url_to_file: BTreeMap<String, String>,
}

impl Manifest {
  /// Parse manifest JSON mounted at `test_root` (e.g. `external/wpt`).
  pub fn from_json(test_root: &str, default_url_base: &str, json: &Json) -> Result<Self> {
    let url_base = json
      .get("url_base")
      .and_then(Json::as_str)
      .unwrap_or(default_url_base)
      .to_string();
    let items = json
      .get("items")
      .and_then(Json::as_object)
      .ok_or_else(|| Error::InvalidMetadata(format!("manifest for {test_root} has no items")))?;

    let mut manifest = Self {
      test_root: test_root.trim_end_matches('/').to_string(),
      url_base,
      files: BTreeMap::new(),
      url_to_file: BTreeMap::new(),
    };
    for test_type in TestType::ALL {
      if let Some(tree) = items.get(test_type.as_str()) {
        manifest.walk(test_type, tree, "");
      }
    }
    Ok(manifest)
  }

  pub fn load(path: &Path, test_root: &str, default_url_base: &str) -> Result<Self> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let json: Json = serde_json::from_str(&text).map_err(|e| Error::json(path, e))?;
    Self::from_json(test_root, default_url_base, &json)
  }

  fn walk(&mut self, test_type: TestType, node: &Json, prefix: &str) {
    let Some(children) = node.as_object() else {
      return;
    };
    for (name, child) in children {
      let path = if prefix.is_empty() {
        name.clone()
      } else {
        format!("{prefix}/{name}")
      };
      match child {
        Json::Object(_) => self.walk(test_type, child, &path),
        Json::Array(entry) => {
          // [hash, item, item, ...]
          for item in entry.iter().skip(1) {
            if let Some(test) = self.parse_item(test_type, &path, item) {
              self.url_to_file.insert(test.url.clone(), path.clone());
              self
                .files
                .entry(path.clone())
                .or_insert_with(|| TestFile {
                  path: path.clone(),
                  tests: Vec::new(),
                })
                .tests
                .push(test);
            }
          }
        }
        _ => {}
      }
    }
  }

  fn parse_item(&self, test_type: TestType, path: &str, item: &Json) -> Option<ManifestTest> {
    let fields = item.as_array()?;
    let url = match fields.first() {
      Some(Json::String(url)) if url.starts_with('/') => url.clone(),
      Some(Json::String(url)) => format!("{}{}", self.url_base, url),
      _ => format!("{}{}", self.url_base, path),
    };
    let mut references = Vec::new();
    if test_type.is_reftest() {
      if let Some(refs) = fields.get(1).and_then(Json::as_array) {
        for reference in refs {
          if let Some(pair) = reference.as_array() {
            if let (Some(Json::String(r)), Some(Json::String(rel))) = (pair.first(), pair.get(1)) {
              references.push((r.clone(), rel.clone()));
            }
          }
        }
      }
    }
    let slow = fields
      .last()
      .and_then(|extras| extras.get("timeout"))
      .and_then(Json::as_str)
      == Some("long");
    Some(ManifestTest {
      url,
      test_type,
      slow,
      references,
    })
  }

  pub fn test_root(&self) -> &str {
    &self.test_root
  }

  pub fn url_base(&self) -> &str {
    &self.url_base
  }

  pub fn files(&self) -> impl Iterator<Item = &TestFile> {
    self.files.values()
  }

  pub fn file(&self, path: &str) -> Option<&TestFile> {
    self.files.get(path)
  }

  pub fn file_for_url(&self, url: &str) -> Option<&TestFile> {
    self.url_to_file.get(url).and_then(|p| self.files.get(p))
  }

  pub fn test(&self, url: &str) -> Option<&ManifestTest> {
    self
      .file_for_url(url)
      .and_then(|f| f.tests.iter().find(|t| t.url == url))
  }

  pub fn contains_url(&self, url: &str) -> bool {
    self.url_to_file.contains_key(url)
  }

  /// Web test name, e.g. `external/wpt/dir/a.html?x=1` for `/dir/a.html?x=1`.
  pub fn test_name(&self, url: &str) -> String {
    let relative = url.strip_prefix(&self.url_base).unwrap_or(url.trim_start_matches('/'));
    format!("{}/{}", self.test_root, relative)
  }

  /// Inverse of [`Manifest::test_name`], if the name belongs to this manifest.
  pub fn url_for_test_name(&self, name: &str) -> Option<String> {
    let relative = name.strip_prefix(&self.test_root)?.strip_prefix('/')?;
    Some(format!("{}{}", self.url_base, relative))
  }

  /// Section name of `url` inside the metadata file for `file_path`.
  pub fn section_name(&self, file_path: &str, url: &str) -> String {
    let dir = match file_path.rfind('/') {
      Some(i) => &file_path[..=i],
      None => "",
    };
    let prefix = format!("{}{}", self.url_base, dir);
    url.strip_prefix(&prefix).unwrap_or(url).to_string()
  }

  /// Metadata path for a test file, under `web_tests`.
  pub fn metadata_path(&self, web_tests: &Path, file_path: &str) -> PathBuf {
    web_tests
      .join(&self.test_root)
      .join(format!("{file_path}.ini"))
  }
}

/// Every manifest in the checkout.
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
  manifests: Vec<Manifest>,
}

impl ManifestSet {
  pub fn new(manifests: Vec<Manifest>) -> Self {
    Self { manifests }
  }

  /// Load the standard `external/wpt` and `wpt_internal` manifests that exist
  /// under `web_tests`.
  pub fn load_default(web_tests: &Path) -> Result<Self> {
    let mut manifests = Vec::new();
    for (root, url_base) in [("external/wpt", "/"), ("wpt_internal", "/wpt_internal/")] {
      let path = web_tests.join(root).join("MANIFEST.json");
      if path.exists() {
        manifests.push(Manifest::load(&path, root, url_base)?);
      }
    }
    Ok(Self::new(manifests))
  }

  pub fn iter(&self) -> impl Iterator<Item = &Manifest> {
    self.manifests.iter()
  }

  pub fn find_url(&self, url: &str) -> Option<(&Manifest, &TestFile, &ManifestTest)> {
    self.manifests.iter().find_map(|m| {
      let file = m.file_for_url(url)?;
      let test = file.tests.iter().find(|t| t.url == url)?;
      Some((m, file, test))
    })
  }

  pub fn find_test_name(&self, name: &str) -> Option<(&Manifest, &ManifestTest)> {
    self.manifests.iter().find_map(|m| {
      let url = m.url_for_test_name(name)?;
      m.test(&url).map(|t| (m, t))
    })
  }

  pub fn contains_url(&self, url: &str) -> bool {
    self.manifests.iter().any(|m| m.contains_url(url))
  }

  /// Source file behind a test name, relative to `web_tests`.
  pub fn file_for_test_name(&self, name: &str) -> Option<String> {
    self.manifests.iter().find_map(|m| {
      let url = m.url_for_test_name(name)?;
      let file = m.file_for_url(&url)?;
      Some(format!("{}/{}", m.test_root, file.path))
    })
  }

  /// Whether the test file behind a metadata path (relative to `web_tests`,
  /// with `.ini` stripped) exists in some manifest.
  pub fn contains_file(&self, web_test_path: &str) -> bool {
    self.manifests.iter().any(|m| {
      web_test_path
        .strip_prefix(&m.test_root)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|rest| m.files.contains_key(rest))
    })
  }

  pub fn test_roots(&self) -> impl Iterator<Item = &str> {
    self.manifests.iter().map(|m| m.test_root.as_str())
  }
}
