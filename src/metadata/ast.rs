//! In-memory model of a metadata file.
//!
//! A file is a root [`Section`] whose children are per-test sections, which in
//! turn hold per-subtest sections. Every key maps to a list of conditional
//! arms; an unconditional value is a list holding a single default arm.

use std::fmt;

use super::expr::Expr;
use crate::config::RunInfo;

/// Right-hand side of a key or conditional arm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
  Scalar(String),
  List(Vec<String>),
}

impl Value {
  pub fn scalar(value: impl Into<String>) -> Self {
    Value::Scalar(value.into())
  }

  /// Build a value from a list, collapsing single-element lists to a scalar.
  pub fn from_items<I, S>(items: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut items: Vec<String> = items.into_iter().map(Into::into).collect();
    if items.len() == 1 {
      Value::Scalar(items.remove(0))
    } else {
      Value::List(items)
    }
  }

  /// All items, treating a scalar as a one-element list.
  pub fn items(&self) -> Vec<&str> {
    match self {
      Value::Scalar(s) => vec![s.as_str()],
      Value::List(items) => items.iter().map(String::as_str).collect(),
    }
  }

  pub fn as_scalar(&self) -> Option<&str> {
    match self {
      Value::Scalar(s) => Some(s),
      Value::List(items) if items.len() == 1 => Some(&items[0]),
      Value::List(_) => None,
    }
  }

  /// Structural equality that treats `x` and `[x]` as the same value.
  pub fn same_as(&self, other: &Value) -> bool {
    self.items() == other.items()
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&super::serialize::render_value(self))
  }
}

/// One `if <condition>: <value>` line, or the trailing default when
/// `condition` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalArm {
  pub condition: Option<Expr>,
  pub value: Value,
}

impl ConditionalArm {
  pub fn new(condition: Option<Expr>, value: Value) -> Self {
    Self { condition, value }
  }

  pub fn default(value: Value) -> Self {
    Self {
      condition: None,
      value,
    }
  }

  pub fn matches(&self, run_info: &RunInfo) -> bool {
    match &self.condition {
      Some(condition) => condition.matches(run_info),
      None => true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
  pub key: String,
  pub arms: Vec<ConditionalArm>,
  /// Comment lines directly above the key, `#` included.
  pub comments: Vec<String>,
}

impl KeyValue {
  pub fn new(key: impl Into<String>, arms: Vec<ConditionalArm>) -> Self {
    Self {
      key: key.into(),
      arms,
      comments: Vec::new(),
    }
  }

  pub fn unconditional(key: impl Into<String>, value: Value) -> Self {
    Self::new(key, vec![ConditionalArm::default(value)])
  }

  pub fn is_unconditional(&self) -> bool {
    self.arms.len() == 1 && self.arms[0].condition.is_none()
  }

  /// First matching arm's value; `None` when no arm matches and there is no default.
  pub fn evaluate(&self, run_info: &RunInfo) -> Option<&Value> {
    self
      .arms
      .iter()
      .find(|arm| arm.matches(run_info))
      .map(|arm| &arm.value)
  }

  /// Trailing default arm value, if present.
  pub fn default_value(&self) -> Option<&Value> {
    self
      .arms
      .last()
      .filter(|arm| arm.condition.is_none())
      .map(|arm| &arm.value)
  }

  /// Arms carrying a condition, in order.
  pub fn conditional_arms(&self) -> impl Iterator<Item = &ConditionalArm> {
    self.arms.iter().filter(|arm| arm.condition.is_some())
  }
}

/// A named block of keys and nested sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
  pub name: String,
  pub comments: Vec<String>,
  pub keys: Vec<KeyValue>,
  pub sections: Vec<Section>,
  modified: bool,
}

impl Section {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  pub fn get(&self, key: &str) -> Option<&KeyValue> {
    self.keys.iter().find(|kv| kv.key == key)
  }

  pub fn get_mut(&mut self, key: &str) -> Option<&mut KeyValue> {
    self.keys.iter_mut().find(|kv| kv.key == key)
  }

  pub fn has_key(&self, key: &str) -> bool {
    self.get(key).is_some()
  }

  /// Evaluate `key` against a configuration without any inheritance.
  pub fn evaluate(&self, key: &str, run_info: &RunInfo) -> Option<&Value> {
    self.get(key).and_then(|kv| kv.evaluate(run_info))
  }

  /// Replace the arms of `key`. An empty arm list removes the key. The
  /// section is marked modified only when the arms actually change.
  pub fn set_arms(&mut self, key: &str, arms: Vec<ConditionalArm>) -> bool {
    if arms.is_empty() {
      return self.remove_key(key);
    }
    match self.get_mut(key) {
      Some(existing) if arms_equal(&existing.arms, &arms) => false,
      Some(existing) => {
        existing.arms = arms;
        self.modified = true;
        true
      }
      None => {
        self.keys.push(KeyValue::new(key, arms));
        self.modified = true;
        true
      }
    }
  }

  pub fn set_value(&mut self, key: &str, value: Value) -> bool {
    self.set_arms(key, vec![ConditionalArm::default(value)])
  }

  pub fn remove_key(&mut self, key: &str) -> bool {
    let before = self.keys.len();
    self.keys.retain(|kv| kv.key != key);
    let removed = self.keys.len() != before;
    self.modified |= removed;
    removed
  }

  pub fn subsection(&self, name: &str) -> Option<&Section> {
    self.sections.iter().find(|s| s.name == name)
  }

  pub fn subsection_mut(&mut self, name: &str) -> Option<&mut Section> {
    self.sections.iter_mut().find(|s| s.name == name)
  }

  /// Return the named subsection, creating an empty one if needed.
  pub fn subsection_or_insert(&mut self, name: &str) -> &mut Section {
    let index = match self.sections.iter().position(|s| s.name == name) {
      Some(index) => index,
      None => {
        self.sections.push(Section::new(name));
        self.modified = true;
        self.sections.len() - 1
      }
    };
    &mut self.sections[index]
  }

  pub fn remove_subsection(&mut self, name: &str) -> Option<Section> {
    let index = self.sections.iter().position(|s| s.name == name)?;
    self.modified = true;
    Some(self.sections.remove(index))
  }

  /// Remove subsections for which `keep` returns false.
  pub fn retain_subsections(&mut self, mut keep: impl FnMut(&Section) -> bool) {
    let before = self.sections.len();
    self.sections.retain(|s| keep(s));
    self.modified |= self.sections.len() != before;
  }

  /// A section with no keys and no non-empty subsections carries no information.
  pub fn is_empty(&self) -> bool {
    self.keys.is_empty() && self.sections.iter().all(Section::is_empty)
  }

  /// Drop empty subsections recursively. Comments of dropped sections go with them.
  pub fn prune_empty(&mut self) {
    for section in &mut self.sections {
      section.prune_empty();
    }
    self.retain_subsections(|s| !s.is_empty());
  }

  pub fn mark_modified(&mut self) {
    self.modified = true;
  }

  /// Whether this section or any descendant was modified since parsing.
  pub fn is_modified(&self) -> bool {
    self.modified || self.sections.iter().any(Section::is_modified)
  }

  /// Sort keys and subsections by name, recursively. Arm order is untouched.
  pub fn sort(&mut self) {
    self.keys.sort_by(|a, b| a.key.cmp(&b.key));
    self.sections.sort_by(|a, b| a.name.cmp(&b.name));
    for section in &mut self.sections {
      section.sort();
    }
  }
}

fn arms_equal(a: &[ConditionalArm], b: &[ConditionalArm]) -> bool {
  a.len() == b.len()
    && a
      .iter()
      .zip(b)
      .all(|(x, y)| x.condition == y.condition && x.value.same_as(&y.value))
}

/// A parsed metadata file: a root section holding file-level keys
/// (`__dir__.ini` style) and one section per test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFile {
  pub root: Section,
}

impl MetadataFile {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn test(&self, name: &str) -> Option<&Section> {
    self.root.subsection(name)
  }

  pub fn test_mut(&mut self, name: &str) -> Option<&mut Section> {
    self.root.subsection_mut(name)
  }

  pub fn test_or_insert(&mut self, name: &str) -> &mut Section {
    self.root.subsection_or_insert(name)
  }

  pub fn is_empty(&self) -> bool {
    self.root.is_empty()
  }

  pub fn is_modified(&self) -> bool {
    self.root.is_modified()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PropValue;

  fn run_info(os: &str) -> RunInfo {
    RunInfo::from_iter([("os", PropValue::from(os))])
  }

  #[test]
  fn single_item_lists_collapse_to_scalars() {
    assert_eq!(Value::from_items(["FAIL"]), Value::scalar("FAIL"));
    assert_eq!(
      Value::from_items(["OK", "FAIL"]),
      Value::List(vec!["OK".into(), "FAIL".into()])
    );
    assert!(Value::scalar("FAIL").same_as(&Value::List(vec!["FAIL".into()])));
  }

  #[test]
  fn first_matching_arm_wins() {
    let kv = KeyValue::new(
      "expected",
      vec![
        ConditionalArm::new(Some(Expr::eq("os", "mac")), Value::scalar("TIMEOUT")),
        ConditionalArm::new(Some(Expr::eq("os", "mac")), Value::scalar("CRASH")),
        ConditionalArm::default(Value::scalar("FAIL")),
      ],
    );
    assert_eq!(kv.evaluate(&run_info("mac")), Some(&Value::scalar("TIMEOUT")));
    assert_eq!(kv.evaluate(&run_info("win")), Some(&Value::scalar("FAIL")));
  }

  #[test]
  fn no_default_means_unset() {
    let kv = KeyValue::new(
      "expected",
      vec![ConditionalArm::new(
        Some(Expr::eq("os", "mac")),
        Value::scalar("FAIL"),
      )],
    );
    assert_eq!(kv.evaluate(&run_info("linux")), None);
    assert_eq!(kv.default_value(), None);
  }

  #[test]
  fn setting_an_identical_value_is_not_a_modification() {
    let mut section = Section::new("a.html");
    section.keys.push(KeyValue::unconditional("expected", Value::scalar("FAIL")));
    assert!(!section.set_value("expected", Value::List(vec!["FAIL".into()])));
    assert!(!section.is_modified());
    assert!(section.set_value("expected", Value::scalar("TIMEOUT")));
    assert!(section.is_modified());
  }

  #[test]
  fn pruning_removes_empty_sections() {
    let mut file = MetadataFile::new();
    file.test_or_insert("a.html").subsection_or_insert("sub");
    file
      .test_or_insert("b.html")
      .set_value("expected", Value::scalar("FAIL"));
    file.root.prune_empty();
    assert!(file.test("a.html").is_none());
    assert!(file.test("b.html").is_some());
    assert!(!file.is_empty());
  }
}
