//! Property-conditional metadata files (`<test file>.ini` and `__dir__.ini`).
//!
//! Files are parsed into an [`ast::MetadataFile`], mutated in memory and
//! written back through [`serialize::serialize`], which always produces the
//! canonical ordering.

pub mod ast;
pub mod expr;
pub mod parser;
pub mod serialize;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub use ast::{ConditionalArm, KeyValue, MetadataFile, Section, Value};
pub use expr::Expr;
pub use parser::parse;
pub use serialize::serialize;

use crate::config::RunInfo;
use crate::error::{Error, Result};

/// File name of directory-level metadata.
pub const DIR_METADATA: &str = "__dir__.ini";

/// Read and parse a metadata file; `Ok(None)` when it does not exist.
pub fn read_file(path: &Path) -> Result<Option<MetadataFile>> {
  match fs::read_to_string(path) {
    Ok(text) => Ok(Some(parse(path, &text)?)),
    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(err) => Err(Error::io(path, err)),
  }
}

/// What happened to a metadata file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
  Written,
  Deleted,
  /// The file was already absent and the content is empty.
  Absent,
}

/// Write `file` canonically, deleting the path instead when nothing remains.
pub fn write_file(path: &Path, file: &MetadataFile) -> Result<WriteOutcome> {
  let text = serialize(file);
  if text.is_empty() {
    return match fs::remove_file(path) {
      Ok(()) => Ok(WriteOutcome::Deleted),
      Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(WriteOutcome::Absent),
      Err(err) => Err(Error::io(path, err)),
    };
  }
  write_text(path, &text)?;
  Ok(WriteOutcome::Written)
}

/// Replace `path` with `text` through a sibling temporary file.
pub fn write_text(path: &Path, text: &str) -> Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
  }
  let mut tmp = path.as_os_str().to_owned();
  tmp.push(".tmp");
  let tmp = PathBuf::from(tmp);
  fs::write(&tmp, text).map_err(|e| Error::io(&tmp, e))?;
  fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
}

/// Evaluate `key` through a chain of sections, nearest first. The first
/// section holding an arm that matches wins.
pub fn evaluate_chain(chain: &[&Section], key: &str, run_info: &RunInfo) -> Option<Value> {
  chain
    .iter()
    .find_map(|section| section.evaluate(key, run_info))
    .cloned()
}

/// Lazily loaded `__dir__.ini` files, keyed by directory.
///
/// Lookups walk from a directory up to the metadata root; each directory is
/// parsed at most once.
#[derive(Debug)]
pub struct DirectoryMetadata {
  root: PathBuf,
  cache: Mutex<HashMap<PathBuf, Option<Arc<MetadataFile>>>>,
}

impl DirectoryMetadata {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      cache: Mutex::new(HashMap::new()),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn load(&self, dir: &Path) -> Result<Option<Arc<MetadataFile>>> {
    if let Ok(cache) = self.cache.lock() {
      if let Some(entry) = cache.get(dir) {
        return Ok(entry.clone());
      }
    }
    let loaded = read_file(&dir.join(DIR_METADATA))?.map(Arc::new);
    if let Ok(mut cache) = self.cache.lock() {
      cache.insert(dir.to_path_buf(), loaded.clone());
    }
    Ok(loaded)
  }

  /// `__dir__.ini` files that apply to `dir`, nearest first.
  pub fn chain(&self, dir: &Path) -> Result<Vec<Arc<MetadataFile>>> {
    let mut files = Vec::new();
    let mut current = Some(dir);
    while let Some(path) = current {
      if !path.starts_with(&self.root) {
        break;
      }
      if let Some(file) = self.load(path)? {
        files.push(file);
      }
      if path == self.root {
        break;
      }
      current = path.parent();
    }
    Ok(files)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PropValue;
  use tempfile::TempDir;

  #[test]
  fn missing_files_read_as_none() {
    let dir = TempDir::new().unwrap();
    assert!(read_file(&dir.path().join("nope.ini")).unwrap().is_none());
  }

  #[test]
  fn empty_files_are_deleted_on_write() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a/b.html.ini");
    let mut file = MetadataFile::new();
    file
      .test_or_insert("b.html")
      .set_value("expected", Value::scalar("FAIL"));
    assert_eq!(write_file(&path, &file).unwrap(), WriteOutcome::Written);
    assert_eq!(
      fs::read_to_string(&path).unwrap(),
      "[b.html]\n  expected: FAIL\n"
    );
    assert_eq!(
      write_file(&path, &MetadataFile::new()).unwrap(),
      WriteOutcome::Deleted
    );
    assert!(!path.exists());
    assert_eq!(
      write_file(&path, &MetadataFile::new()).unwrap(),
      WriteOutcome::Absent
    );
  }

  #[test]
  fn dir_metadata_chain_is_nearest_first() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("a/b")).unwrap();
    fs::write(root.join(DIR_METADATA), "disabled: root\n").unwrap();
    fs::write(root.join("a/b").join(DIR_METADATA), "disabled: @False\n").unwrap();
    let dirs = DirectoryMetadata::new(root);
    let chain = dirs.chain(&root.join("a/b")).unwrap();
    assert_eq!(chain.len(), 2);
    let sections: Vec<&Section> = chain.iter().map(|f| &f.root).collect();
    let run_info = RunInfo::from_iter([("os", PropValue::from("mac"))]);
    assert_eq!(
      evaluate_chain(&sections, "disabled", &run_info),
      Some(Value::scalar("@False"))
    );
    assert_eq!(
      evaluate_chain(&sections[1..], "disabled", &run_info),
      Some(Value::scalar("root"))
    );
  }
}
