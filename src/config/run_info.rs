//! Run-info property bags and the update-property declaration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single run-info property value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
  Bool(bool),
  Int(i64),
  Str(String),
}

impl From<&str> for PropValue {
  fn from(value: &str) -> Self {
    PropValue::Str(value.to_string())
  }
}

impl From<String> for PropValue {
  fn from(value: String) -> Self {
    PropValue::Str(value)
  }
}

impl From<bool> for PropValue {
  fn from(value: bool) -> Self {
    PropValue::Bool(value)
  }
}

impl fmt::Display for PropValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PropValue::Bool(b) => write!(f, "{b}"),
      PropValue::Int(n) => write!(f, "{n}"),
      PropValue::Str(s) => f.write_str(s),
    }
  }
}

/// An immutable configuration: property name to value.
///
/// Equality, ordering and hashing are over the full property map, so two
/// configurations compare equal iff every recognized value is equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RunInfo(BTreeMap<String, PropValue>);

impl PropValue {
  /// Convert a JSON scalar; nulls, arrays and objects have no property form.
  pub fn from_json(value: &serde_json::Value) -> Option<Self> {
    match value {
      serde_json::Value::Bool(b) => Some(PropValue::Bool(*b)),
      serde_json::Value::Number(n) => Some(match n.as_i64() {
        Some(i) => PropValue::Int(i),
        None => PropValue::Str(n.to_string()),
      }),
      serde_json::Value::String(s) => Some(PropValue::Str(s.clone())),
      _ => None,
    }
  }
}

impl<'de> Deserialize<'de> for RunInfo {
  fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(
      raw
        .into_iter()
        .filter_map(|(k, v)| PropValue::from_json(&v).map(|p| (k, p)))
        .collect(),
    )
  }
}

impl RunInfo {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, prop: &str) -> Option<&PropValue> {
    self.0.get(prop)
  }

  pub fn get_str(&self, prop: &str) -> Option<&str> {
    match self.0.get(prop) {
      Some(PropValue::Str(s)) => Some(s),
      _ => None,
    }
  }

  pub fn contains(&self, prop: &str) -> bool {
    self.0.contains_key(prop)
  }

  /// Copy with `prop` set to `value`.
  pub fn with(&self, prop: &str, value: impl Into<PropValue>) -> Self {
    let mut out = self.clone();
    out.0.insert(prop.to_string(), value.into());
    out
  }

  /// Copy with every property of `other` layered on top.
  pub fn merged(&self, other: &RunInfo) -> Self {
    let mut out = self.clone();
    for (k, v) in &other.0 {
      out.0.insert(k.clone(), v.clone());
    }
    out
  }

  /// Projection onto a subset of properties. Missing properties stay missing.
  pub fn project<'a, I>(&self, props: I) -> Self
  where
    I: IntoIterator<Item = &'a String>,
  {
    let mut out = BTreeMap::new();
    for prop in props {
      if let Some(value) = self.0.get(prop) {
        out.insert(prop.clone(), value.clone());
      }
    }
    RunInfo(out)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &PropValue)> {
    self.0.iter()
  }
}

impl<K: Into<String>> FromIterator<(K, PropValue)> for RunInfo {
  fn from_iter<T: IntoIterator<Item = (K, PropValue)>>(iter: T) -> Self {
    RunInfo(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
  }
}

impl fmt::Display for RunInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
    write!(f, "{{{}}}", parts.join(", "))
  }
}

/// Properties allowed to appear in synthesized conditions.
///
/// Conditions branch on a primary property first, and only inside that
/// branch on the property's dependents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProperties {
  #[serde(rename = "properties")]
  pub primary: Vec<String>,
  #[serde(default)]
  pub dependents: BTreeMap<String, Vec<String>>,
}

impl Default for UpdateProperties {
  fn default() -> Self {
    let mut dependents = BTreeMap::new();
    dependents.insert(
      "product".to_string(),
      vec!["os".to_string(), "virtual_suite".to_string()],
    );
    dependents.insert(
      "os".to_string(),
      vec!["port".to_string(), "flag_specific".to_string()],
    );
    Self {
      primary: vec!["product".to_string()],
      dependents,
    }
  }
}

impl UpdateProperties {
  /// Default properties, with `debug` promoted to primary when requested.
  pub fn for_builds(any_debug: bool) -> Self {
    let mut props = Self::default();
    if any_debug {
      props.primary.push("debug".to_string());
    }
    props
  }

  /// Every property that may appear in a condition.
  pub fn all(&self) -> BTreeSet<String> {
    let mut out: BTreeSet<String> = self.primary.iter().cloned().collect();
    for deps in self.dependents.values() {
      out.extend(deps.iter().cloned());
    }
    out
  }

  pub fn dependents_of(&self, prop: &str) -> &[String] {
    self.dependents.get(prop).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Load `{"properties": [..], "dependents": {..}}` from a JSON file.
  pub fn from_json_file(path: &Path) -> Result<Self> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|_| {
      Error::InvalidMetadata(format!("'{}' is not a valid JSON file", path.display()))
    })?;
    serde_json::from_value(value).map_err(|_| {
      Error::InvalidMetadata(format!(
        "'{}' does not conform to the update properties schema",
        path.display()
      ))
    })
  }
}
