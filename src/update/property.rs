//! Per-key update strategies: `expected`, `disabled` and `bug`.
//!
//! Each strategy records values per configuration through
//! [`PropertyUpdate::set`] and rewrites its key in a section through
//! [`PropertyUpdate::update`]. The tree-backed strategies share
//! [`synthesize`], which turns observations into conditional arms.

use std::collections::{BTreeMap, BTreeSet};

use super::tree::{Counts, Leaf, Tree};
use super::OverwriteMode;
use crate::config::{RunInfo, UpdateProperties};
use crate::metadata::{ConditionalArm, Expr, KeyValue, Section, Value};
use crate::results::Observation;
use crate::status::Status;

/// Reason written for slow tests that time out on every run of a configuration.
pub const SLOW_TIMEOUT_REASON: &str = "times out even with `timeout=long`";

/// Inputs shared by every strategy for one section.
#[derive(Debug, Clone)]
pub struct UpdateContext<'a> {
  pub props: &'a UpdateProperties,
  pub mode: OverwriteMode,
  /// Value implied when the key is absent (`OK`/`PASS` for `expected`).
  pub implicit_default: Option<Value>,
}

/// How synthesized arms are shaped once leaf values are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmPolicy {
  /// Promote the most common value to the trailing default arm.
  PromoteDefault,
  /// Never write a default; keep arms with a value, sorted by value then
  /// condition.
  SortedWithoutDefault,
}

pub trait PropertyUpdate {
  type Observed: Ord + Clone + std::fmt::Debug;

  fn key(&self) -> &'static str;

  /// Record `value` for a configuration. A zero `count` keeps the value
  /// without weighing on which value is primary.
  fn set(&mut self, run_info: &RunInfo, value: Self::Observed, count: usize);

  /// Value for a group of configurations currently holding `current` that
  /// produced `observed`. `None` leaves the key unset for them.
  fn updated_value(&self, current: Option<&Value>, observed: &Counts<Self::Observed>)
    -> Option<Value>;

  /// Rewrite this key in `section`; returns whether it changed.
  fn update(&mut self, section: &mut Section, ctx: &UpdateContext<'_>) -> bool;
}

// ============================================================================
// Shared observation table
// ============================================================================

/// Observations keyed by reduced configuration, remembering one full run
/// info per reduced configuration to evaluate existing conditions against.
#[derive(Debug, Clone)]
pub struct Observations<V> {
  props: BTreeSet<String>,
  results: BTreeMap<RunInfo, Counts<V>>,
  full: BTreeMap<RunInfo, RunInfo>,
}

impl<V: Ord + Clone> Observations<V> {
  pub fn new(props: &UpdateProperties) -> Self {
    Self {
      props: props.all(),
      results: BTreeMap::new(),
      full: BTreeMap::new(),
    }
  }

  pub fn record(&mut self, run_info: &RunInfo, value: V, count: usize) {
    let reduced = run_info.project(&self.props);
    self
      .full
      .entry(reduced.clone())
      .or_insert_with(|| run_info.clone());
    *self
      .results
      .entry(reduced)
      .or_default()
      .entry(value)
      .or_insert(0) += count;
  }

  pub fn is_empty(&self) -> bool {
    self.results.is_empty()
  }

  pub fn results(&self) -> &BTreeMap<RunInfo, Counts<V>> {
    &self.results
  }

  fn full<'a>(&'a self, reduced: &'a RunInfo) -> &'a RunInfo {
    self.full.get(reduced).unwrap_or(reduced)
  }

  fn matches_any(&self, arm: &ConditionalArm) -> bool {
    self.full.values().any(|run_info| arm.matches(run_info))
  }

  /// What `current` evaluates to for every configuration in `run_infos`, if
  /// they all agree.
  fn current_for<'a>(
    &self,
    current: Option<&'a KeyValue>,
    run_infos: impl IntoIterator<Item = &'a RunInfo>,
  ) -> Option<Value> {
    let current = current?;
    let mut agreed: Option<&Value> = None;
    for reduced in run_infos {
      let value = current.evaluate(self.full(reduced))?;
      match agreed {
        None => agreed = Some(value),
        Some(seen) if seen.same_as(value) => {}
        Some(_) => return None,
      }
    }
    agreed.cloned()
  }

  fn counts_for<'a>(&self, run_infos: impl IntoIterator<Item = &'a RunInfo>) -> Counts<V> {
    let mut out = Counts::new();
    for reduced in run_infos {
      if let Some(counts) = self.results.get(reduced) {
        for (value, count) in counts {
          *out.entry(value.clone()).or_insert(0) += *count;
        }
      }
    }
    out
  }
}

// ============================================================================
// Arm synthesis
// ============================================================================

/// Compute the new arm list for `key`. Returns `None` when there is nothing
/// observed to update from.
pub fn synthesize<U>(
  update: &U,
  observations: &Observations<U::Observed>,
  current: Option<&KeyValue>,
  ctx: &UpdateContext<'_>,
  policy: ArmPolicy,
) -> Option<Vec<ConditionalArm>>
where
  U: PropertyUpdate + ?Sized,
{
  if observations.is_empty() {
    return None;
  }
  let tree = Tree::build(ctx.props, observations.results());
  let has_conditions = current.map_or(false, |kv| kv.conditional_arms().next().is_some());
  if ctx.mode == OverwriteMode::No && has_conditions {
    return Some(partial_arms(update, observations, &tree, current, ctx));
  }
  Some(full_arms(update, observations, &tree, current, ctx, policy))
}

fn full_arms<U>(
  update: &U,
  observations: &Observations<U::Observed>,
  tree: &Tree<U::Observed>,
  current: Option<&KeyValue>,
  ctx: &UpdateContext<'_>,
  policy: ArmPolicy,
) -> Vec<ConditionalArm>
where
  U: PropertyUpdate + ?Sized,
{
  let valued = tree
    .map_leaves(&mut |leaf: &Leaf<U::Observed>| {
      let current_value = observations.current_for(current, &leaf.run_infos);
      update.updated_value(current_value.as_ref(), &leaf.counts)
    })
    .collapse();
  let leaves: Vec<(Option<Expr>, usize, Option<Value>)> = valued
    .leaves()
    .into_iter()
    .map(|leaf| {
      let value = leaf.counts.keys().next().cloned().flatten();
      (leaf.condition(), leaf.run_infos.len(), value)
    })
    .collect();

  // Hand-written arms for configurations nothing was observed on survive.
  let retained: Vec<ConditionalArm> = current
    .map(|kv| {
      kv.conditional_arms()
        .filter(|arm| retain_unobserved(arm, observations, policy))
        .cloned()
        .collect()
    })
    .unwrap_or_default();

  let prev_default = current.and_then(KeyValue::default_value);
  let mut arms = match policy {
    ArmPolicy::PromoteDefault => promote_default(leaves, ctx, prev_default),
    ArmPolicy::SortedWithoutDefault => sorted_without_default(leaves),
  };
  if !retained.is_empty() {
    let mut out = retained;
    out.append(&mut arms);
    return out;
  }
  arms
}

fn retain_unobserved<V: Ord + Clone>(
  arm: &ConditionalArm,
  observations: &Observations<V>,
  policy: ArmPolicy,
) -> bool {
  if observations.matches_any(arm) {
    return false;
  }
  match policy {
    // Absent reasons fall through to `__dir__.ini`, so a dropped arm would
    // silently re-enable the test.
    ArmPolicy::SortedWithoutDefault => true,
    ArmPolicy::PromoteDefault => match &arm.condition {
      Some(condition) => !condition
        .variables()
        .iter()
        .all(|var| observations.props.contains(var)),
      None => false,
    },
  }
}

fn same(a: Option<&Value>, b: Option<&Value>) -> bool {
  match (a, b) {
    (Some(a), Some(b)) => a.same_as(b),
    (None, None) => true,
    _ => false,
  }
}

fn promote_default(
  leaves: Vec<(Option<Expr>, usize, Option<Value>)>,
  ctx: &UpdateContext<'_>,
  prev_default: Option<&Value>,
) -> Vec<ConditionalArm> {
  let implicit = ctx.implicit_default.as_ref();
  let leaves: Vec<(Option<Expr>, usize, Value)> = leaves
    .into_iter()
    .filter_map(|(condition, weight, value)| {
      value.or_else(|| implicit.cloned()).map(|v| (condition, weight, v))
    })
    .collect();

  if let [(None, _, value)] = leaves.as_slice() {
    if same(Some(value), implicit) {
      return Vec::new();
    }
    return vec![ConditionalArm::default(value.clone())];
  }

  // Weigh values by how many configurations they cover.
  let mut weights: Vec<(Value, usize)> = Vec::new();
  for (_, weight, value) in &leaves {
    match weights.iter_mut().find(|(v, _)| v.same_as(value)) {
      Some((_, total)) => *total += weight,
      None => weights.push((value.clone(), *weight)),
    }
  }
  let rank = |value: &Value| {
    (
      same(Some(value), implicit),
      same(Some(value), prev_default),
    )
  };
  let Some(default) = weights
    .iter()
    .max_by(|(a, wa), (b, wb)| {
      wa.cmp(wb)
        .then_with(|| rank(a).cmp(&rank(b)))
        .then_with(|| b.to_string().cmp(&a.to_string()))
    })
    .map(|(value, _)| value.clone())
  else {
    return Vec::new();
  };

  let mut arms: Vec<ConditionalArm> = leaves
    .into_iter()
    .filter(|(_, _, value)| !value.same_as(&default))
    .map(|(condition, _, value)| ConditionalArm::new(condition, value))
    .collect();
  if !same(Some(&default), implicit) {
    arms.push(ConditionalArm::default(default));
  }
  arms
}

fn sorted_without_default(leaves: Vec<(Option<Expr>, usize, Option<Value>)>) -> Vec<ConditionalArm> {
  if let [(None, _, value)] = leaves.as_slice() {
    return value.iter().cloned().map(ConditionalArm::default).collect();
  }
  let mut arms: Vec<ConditionalArm> = leaves
    .into_iter()
    .filter_map(|(condition, _, value)| value.map(|v| ConditionalArm::new(condition, v)))
    .collect();
  arms.sort_by_key(|arm| {
    (
      arm.value.to_string(),
      arm.condition.as_ref().map(|c| c.to_string()).unwrap_or_default(),
    )
  });
  arms
}

/// Update only the arms already written, adding arms for configurations none
/// of them claim.
fn partial_arms<U>(
  update: &U,
  observations: &Observations<U::Observed>,
  tree: &Tree<U::Observed>,
  current: Option<&KeyValue>,
  ctx: &UpdateContext<'_>,
) -> Vec<ConditionalArm>
where
  U: PropertyUpdate + ?Sized,
{
  let Some(current) = current else {
    return Vec::new();
  };
  let leaves = tree.leaves();
  let leaf_of = |reduced: &RunInfo| leaves.iter().position(|leaf| leaf.run_infos.contains(reduced));

  let mut claimed: BTreeSet<RunInfo> = BTreeSet::new();
  let mut kept: Vec<ConditionalArm> = Vec::new();
  for arm in current.conditional_arms() {
    let matching: Vec<&RunInfo> = observations
      .results()
      .keys()
      .filter(|reduced| !claimed.contains(*reduced) && arm.matches(observations.full(reduced)))
      .collect();
    if matching.is_empty() {
      kept.push(arm.clone());
      continue;
    }
    let key_sets: BTreeSet<Option<BTreeSet<U::Observed>>> = matching
      .iter()
      .map(|reduced| leaf_of(reduced).map(|i| leaves[i].counts.keys().cloned().collect()))
      .collect();
    if key_sets.len() != 1 {
      // The arm now spans configurations that behave differently.
      continue;
    }
    let counts = observations.counts_for(matching.iter().copied());
    if let Some(value) = update.updated_value(Some(&arm.value), &counts) {
      kept.push(ConditionalArm::new(arm.condition.clone(), value));
    }
    claimed.extend(matching.into_iter().cloned());
  }
  if let Some(default) = current.default_value() {
    kept.push(ConditionalArm::default(default.clone()));
  }

  let evaluate = |arms: &[ConditionalArm], run_info: &RunInfo| -> Option<Value> {
    arms
      .iter()
      .find(|arm| arm.matches(run_info))
      .map(|arm| arm.value.clone())
      .or_else(|| ctx.implicit_default.clone())
  };

  let mut added: Vec<ConditionalArm> = Vec::new();
  for leaf in &leaves {
    let unclaimed: Vec<&RunInfo> = leaf.run_infos.iter().filter(|r| !claimed.contains(*r)).collect();
    if unclaimed.is_empty() {
      continue;
    }
    let current_value = observations.current_for(Some(current), unclaimed.iter().copied());
    let counts = observations.counts_for(unclaimed.iter().copied());
    let Some(value) = update.updated_value(current_value.as_ref(), &counts) else {
      continue;
    };
    let redundant = unclaimed.iter().all(|reduced| {
      same(
        evaluate(&kept, observations.full(reduced)).as_ref(),
        Some(&value),
      )
    });
    if redundant {
      continue;
    }
    match leaf.condition() {
      Some(condition) => added.push(ConditionalArm::new(Some(condition), value)),
      None => {
        // No split happened; pin each configuration by its primary properties.
        let mut seen = BTreeSet::new();
        for reduced in unclaimed {
          let clauses: Vec<Expr> = ctx
            .props
            .primary
            .iter()
            .filter_map(|prop| reduced.get(prop).map(|value| Expr::clause(prop, value)))
            .collect();
          if let Some(condition) = Expr::conjunction(clauses) {
            if seen.insert(condition.to_string()) {
              added.push(ConditionalArm::new(Some(condition), value.clone()));
            }
          }
        }
      }
    }
  }
  added.append(&mut kept);
  added
}

fn apply(section: &mut Section, key: &str, arms: Option<Vec<ConditionalArm>>) -> bool {
  match arms {
    Some(arms) => section.set_arms(key, arms),
    None => false,
  }
}

// ============================================================================
// expected
// ============================================================================

/// Rewrites `expected` from observed statuses.
#[derive(Debug, Clone)]
pub struct ExpectedUpdate {
  observations: Observations<Status>,
  keep_statuses: bool,
  disable_intermittent: bool,
}

impl ExpectedUpdate {
  pub fn new(props: &UpdateProperties) -> Self {
    Self {
      observations: Observations::new(props),
      keep_statuses: false,
      disable_intermittent: false,
    }
  }

  pub fn with_keep_statuses(mut self, keep_statuses: bool) -> Self {
    self.keep_statuses = keep_statuses;
    self
  }

  /// Flaky configurations get `disabled` instead of a multi-status value.
  pub fn with_disable_intermittent(mut self, disable_intermittent: bool) -> Self {
    self.disable_intermittent = disable_intermittent;
    self
  }

  /// Record an observation: its status counts, kept statuses do not.
  pub fn add(&mut self, observation: &Observation) {
    self.set(&observation.run_info, observation.status, 1);
    for kept in &observation.kept {
      self.set(&observation.run_info, *kept, 0);
    }
  }

  pub fn is_empty(&self) -> bool {
    self.observations.is_empty()
  }
}

fn parse_statuses(value: &Value) -> Option<Vec<Status>> {
  value.items().iter().map(|s| s.parse().ok()).collect()
}

fn push_unique(out: &mut Vec<Status>, status: Status) {
  if !out.contains(&status) {
    out.push(status);
  }
}

impl PropertyUpdate for ExpectedUpdate {
  type Observed = Status;

  fn key(&self) -> &'static str {
    "expected"
  }

  fn set(&mut self, run_info: &RunInfo, value: Status, count: usize) {
    self.observations.record(run_info, value, count);
  }

  fn updated_value(&self, current: Option<&Value>, observed: &Counts<Status>) -> Option<Value> {
    let current_statuses = current.and_then(parse_statuses).unwrap_or_default();
    let mut counted: Vec<(Status, usize)> = observed
      .iter()
      .filter(|(_, count)| **count > 0)
      .map(|(status, count)| (*status, *count))
      .collect();
    counted.sort_by(|(a, ca), (b, cb)| cb.cmp(ca).then(a.cmp(b)));
    let uncounted = observed.iter().filter(|(_, count)| **count == 0).map(|(s, _)| *s);

    if self.disable_intermittent && counted.len() > 1 {
      return match current {
        Some(current) => Some(current.clone()),
        None => counted.first().map(|(s, _)| Value::scalar(s.as_str())),
      };
    }

    let mut statuses = Vec::new();
    if self.keep_statuses {
      if let Some(primary) = current_statuses.first() {
        push_unique(&mut statuses, *primary);
      }
      for (status, _) in &counted {
        push_unique(&mut statuses, *status);
      }
      for status in current_statuses.iter().skip(1) {
        push_unique(&mut statuses, *status);
      }
    } else {
      for (status, _) in &counted {
        push_unique(&mut statuses, *status);
      }
    }
    for status in uncounted {
      push_unique(&mut statuses, status);
    }
    if statuses.is_empty() {
      return current.cloned();
    }
    Some(Value::from_items(statuses.iter().map(|s| s.as_str())))
  }

  fn update(&mut self, section: &mut Section, ctx: &UpdateContext<'_>) -> bool {
    let arms = synthesize(
      &*self,
      &self.observations,
      section.get(self.key()),
      ctx,
      ArmPolicy::PromoteDefault,
    );
    apply(section, self.key(), arms)
  }
}

// ============================================================================
// disabled
// ============================================================================

/// Rewrites `disabled`. Each configuration is recorded with its new reason,
/// or with what it currently evaluates to so existing arms carry over.
#[derive(Debug, Clone)]
pub struct DisabledUpdate {
  observations: Observations<Option<String>>,
  new_reasons: usize,
}

impl DisabledUpdate {
  pub fn new(props: &UpdateProperties) -> Self {
    Self {
      observations: Observations::new(props),
      new_reasons: 0,
    }
  }

  /// Record a reason that was not in the metadata before.
  pub fn disable(&mut self, run_info: &RunInfo, reason: impl Into<String>) {
    self.new_reasons += 1;
    self.set(run_info, Some(reason.into()), 1);
  }

  /// Record the configuration's current value.
  pub fn keep(&mut self, run_info: &RunInfo, current: Option<&Value>) {
    let reason = current.map(|value| value.items().join(" "));
    self.set(run_info, reason, 1);
  }

  /// Whether any configuration needs a reason it did not have.
  pub fn has_new_reasons(&self) -> bool {
    self.new_reasons > 0
  }
}

impl PropertyUpdate for DisabledUpdate {
  type Observed = Option<String>;

  fn key(&self) -> &'static str {
    "disabled"
  }

  fn set(&mut self, run_info: &RunInfo, value: Option<String>, count: usize) {
    self.observations.record(run_info, value, count);
  }

  fn updated_value(
    &self,
    _current: Option<&Value>,
    observed: &Counts<Option<String>>,
  ) -> Option<Value> {
    observed
      .iter()
      .filter_map(|(reason, count)| reason.as_ref().map(|r| (r, *count)))
      .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| b.cmp(a)))
      .map(|(reason, _)| Value::scalar(reason.clone()))
  }

  fn update(&mut self, section: &mut Section, ctx: &UpdateContext<'_>) -> bool {
    if !self.has_new_reasons() {
      return false;
    }
    let ctx = UpdateContext {
      implicit_default: None,
      ..ctx.clone()
    };
    let arms = synthesize(
      &*self,
      &self.observations,
      section.get(self.key()),
      &ctx,
      ArmPolicy::SortedWithoutDefault,
    );
    apply(section, self.key(), arms)
  }
}

// ============================================================================
// bug
// ============================================================================

/// Appends bugs to an unconditional `bug` value.
#[derive(Debug, Clone, Default)]
pub struct BugUpdate {
  bugs: Vec<String>,
  overwrite: Option<String>,
}

impl BugUpdate {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace existing bugs with `bug` when the section was otherwise changed.
  pub fn with_overwrite(mut self, bug: Option<String>) -> Self {
    self.overwrite = bug;
    self
  }

  pub fn append(&mut self, bug: impl Into<String>) {
    let bug = bug.into();
    if !self.bugs.contains(&bug) {
      self.bugs.push(bug);
    }
  }
}

impl PropertyUpdate for BugUpdate {
  type Observed = String;

  fn key(&self) -> &'static str {
    "bug"
  }

  fn set(&mut self, _run_info: &RunInfo, value: String, _count: usize) {
    self.append(value);
  }

  fn updated_value(&self, current: Option<&Value>, observed: &Counts<String>) -> Option<Value> {
    let mut bugs: Vec<String> = current
      .map(|v| v.items().iter().map(|s| s.to_string()).collect())
      .unwrap_or_default();
    for bug in observed.keys() {
      if !bugs.contains(bug) {
        bugs.push(bug.clone());
      }
    }
    (!bugs.is_empty()).then(|| Value::from_items(bugs))
  }

  fn update(&mut self, section: &mut Section, _ctx: &UpdateContext<'_>) -> bool {
    if let Some(bug) = &self.overwrite {
      if section.is_modified() {
        return section.set_value(self.key(), Value::scalar(bug.clone()));
      }
    }
    if self.bugs.is_empty() {
      return false;
    }
    let current = match section.get(self.key()) {
      Some(kv) if !kv.is_unconditional() => return false,
      Some(kv) => kv.default_value().cloned(),
      None => None,
    };
    // Bugs keep the order they were appended in.
    let mut bugs: Vec<String> = current
      .as_ref()
      .map(|v| v.items().iter().map(|s| s.to_string()).collect())
      .unwrap_or_default();
    for bug in &self.bugs {
      if !bugs.contains(bug) {
        bugs.push(bug.clone());
      }
    }
    section.set_value(self.key(), Value::from_items(bugs))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PropValue;
  use crate::metadata::parse;
  use std::path::Path;

  fn os_props() -> UpdateProperties {
    UpdateProperties {
      primary: vec!["os".to_string()],
      dependents: BTreeMap::new(),
    }
  }

  fn config(os: &str) -> RunInfo {
    RunInfo::from_iter([("os", PropValue::from(os)), ("debug", PropValue::Bool(false))])
  }

  fn ctx(props: &UpdateProperties, mode: OverwriteMode) -> UpdateContext<'_> {
    UpdateContext {
      props,
      mode,
      implicit_default: Some(Value::scalar("PASS")),
    }
  }

  fn section(text: &str) -> Section {
    let file = parse(Path::new("t.ini"), text).unwrap();
    file.root.sections[0].clone()
  }

  fn rendered(section: &Section, key: &str) -> Vec<String> {
    section
      .get(key)
      .map(|kv| {
        kv.arms
          .iter()
          .map(|arm| match &arm.condition {
            Some(c) => format!("if {c}: {}", arm.value),
            None => arm.value.to_string(),
          })
          .collect()
      })
      .unwrap_or_default()
  }

  fn expected(results: &[(&str, Status)]) -> ExpectedUpdate {
    let props = os_props();
    let mut update = ExpectedUpdate::new(&props);
    for (os, status) in results {
      update.add(&Observation::observed(*status, config(os)));
    }
    update
  }

  #[test]
  fn splits_on_the_property_that_separates_results() {
    let props = os_props();
    let mut section = Section::new("t.html");
    let mut update = expected(&[("linux", Status::Pass), ("mac", Status::Fail), ("win", Status::Fail)]);
    assert!(update.update(&mut section, &ctx(&props, OverwriteMode::Yes)));
    assert_eq!(rendered(&section, "expected"), vec!["if os == \"linux\": PASS", "FAIL"]);
  }

  #[test]
  fn ties_prefer_the_implicit_default() {
    let props = os_props();
    let mut section = Section::new("t.html");
    let mut update = expected(&[("linux", Status::Pass), ("mac", Status::Timeout), ("win", Status::Fail)]);
    update.update(&mut section, &ctx(&props, OverwriteMode::Yes));
    assert_eq!(
      rendered(&section, "expected"),
      vec!["if os == \"mac\": TIMEOUT", "if os == \"win\": FAIL"]
    );
  }

  #[test]
  fn all_pass_removes_the_key() {
    let props = os_props();
    let mut section = section("[t.html]\n  expected: FAIL\n");
    let mut update = expected(&[("linux", Status::Pass), ("mac", Status::Pass)]);
    assert!(update.update(&mut section, &ctx(&props, OverwriteMode::Yes)));
    assert!(!section.has_key("expected"));
  }

  #[test]
  fn partial_update_only_touches_written_arms() {
    let props = os_props();
    let text = "[t.html]\n  expected:\n    if os == \"mac\": FAIL\n    if os == \"win\": FAIL\n";
    let mut section = section(text);
    let mut update = expected(&[("linux", Status::Pass), ("mac", Status::Fail), ("win", Status::Fail)]);
    assert!(!update.update(&mut section, &ctx(&props, OverwriteMode::No)));
    assert_eq!(
      rendered(&section, "expected"),
      vec!["if os == \"mac\": FAIL", "if os == \"win\": FAIL"]
    );

    // A changed result rewrites only the arm that claims it.
    let mut update = expected(&[("linux", Status::Pass), ("mac", Status::Timeout), ("win", Status::Fail)]);
    assert!(update.update(&mut section, &ctx(&props, OverwriteMode::No)));
    assert_eq!(
      rendered(&section, "expected"),
      vec!["if os == \"mac\": TIMEOUT", "if os == \"win\": FAIL"]
    );
  }

  #[test]
  fn partial_update_adds_arms_for_unclaimed_configs() {
    let props = os_props();
    let mut section = section("[t.html]\n  expected:\n    if os == \"mac\": FAIL\n");
    let mut update = expected(&[("mac", Status::Fail), ("win", Status::Crash), ("linux", Status::Pass)]);
    update.update(&mut section, &ctx(&props, OverwriteMode::No));
    assert_eq!(
      rendered(&section, "expected"),
      vec!["if os == \"win\": CRASH", "if os == \"mac\": FAIL"]
    );
  }

  #[test]
  fn full_update_keeps_arms_on_unobserved_properties() {
    let props = os_props();
    let text = "[t.html]\n  expected:\n    if flag_specific == \"x\": CRASH\n    FAIL\n";
    let mut section = section(text);
    let mut update = expected(&[("linux", Status::Timeout)]);
    update.update(&mut section, &ctx(&props, OverwriteMode::Yes));
    assert_eq!(
      rendered(&section, "expected"),
      vec!["if flag_specific == \"x\": CRASH", "TIMEOUT"]
    );
  }

  #[test]
  fn intermittent_statuses_are_ordered_by_count() {
    let update = ExpectedUpdate::new(&os_props());
    let mut counts = Counts::new();
    counts.insert(Status::Pass, 1);
    counts.insert(Status::Fail, 2);
    assert_eq!(
      update.updated_value(None, &counts),
      Some(Value::from_items(["FAIL", "PASS"]))
    );
  }

  #[test]
  fn keep_statuses_puts_new_statuses_after_the_current_primary() {
    let update = ExpectedUpdate::new(&os_props()).with_keep_statuses(true);
    let mut counts = Counts::new();
    counts.insert(Status::Pass, 1);
    counts.insert(Status::Crash, 1);
    counts.insert(Status::Fail, 0);
    let current = Value::from_items(["PASS", "FAIL"]);
    assert_eq!(
      update.updated_value(Some(&current), &counts),
      Some(Value::from_items(["PASS", "CRASH", "FAIL"]))
    );
  }

  #[test]
  fn disable_intermittent_keeps_the_current_expectation() {
    let update = ExpectedUpdate::new(&os_props()).with_disable_intermittent(true);
    let mut counts = Counts::new();
    counts.insert(Status::Ok, 1);
    counts.insert(Status::Fail, 1);
    let current = Value::scalar("FAIL");
    assert_eq!(update.updated_value(Some(&current), &counts), Some(current.clone()));
    assert_eq!(update.updated_value(None, &counts), Some(Value::scalar("OK")));
  }

  #[test]
  fn disabled_arms_are_sorted_and_never_defaulted() {
    let props = os_props();
    let mut section = Section::new("t.html");
    let mut update = DisabledUpdate::new(&props);
    update.disable(&config("win"), "flaky");
    update.disable(&config("mac"), "flaky");
    update.keep(&config("linux"), None);
    assert!(update.update(&mut section, &ctx(&props, OverwriteMode::Yes)));
    assert_eq!(
      rendered(&section, "disabled"),
      vec!["if os == \"mac\": flaky", "if os == \"win\": flaky"]
    );
  }

  #[test]
  fn disabled_arms_for_unobserved_configs_survive() {
    let props = os_props();
    let mut section = section("[t.html]\n  disabled:\n    if os == \"android\": not supported\n");
    let mut update = DisabledUpdate::new(&props);
    update.disable(&config("mac"), "flaky");
    update.keep(&config("linux"), None);
    update.update(&mut section, &ctx(&props, OverwriteMode::Yes));
    assert_eq!(
      rendered(&section, "disabled"),
      vec!["if os == \"android\": not supported", "if os == \"mac\": flaky"]
    );
  }

  #[test]
  fn disabled_is_untouched_without_new_reasons() {
    let props = os_props();
    let mut section = section("[t.html]\n  disabled: @False\n");
    let mut update = DisabledUpdate::new(&props);
    update.keep(&config("linux"), Some(&Value::scalar("@False")));
    assert!(!update.update(&mut section, &ctx(&props, OverwriteMode::Yes)));
    assert_eq!(rendered(&section, "disabled"), vec!["@False"]);
  }

  #[test]
  fn bugs_append_without_duplicates() {
    let props = os_props();
    let mut section = section("[t.html]\n  bug: crbug.com/1\n");
    let mut update = BugUpdate::new();
    update.append("crbug.com/1");
    update.append("crbug.com/2");
    assert!(update.update(&mut section, &ctx(&props, OverwriteMode::Yes)));
    assert_eq!(rendered(&section, "bug"), vec!["[crbug.com/1, crbug.com/2]"]);
  }

  #[test]
  fn bug_overwrite_applies_only_to_changed_sections() {
    let props = os_props();
    let mut section = section("[t.html]\n  bug: crbug.com/1\n");
    let mut update = BugUpdate::new().with_overwrite(Some("crbug.com/5".to_string()));
    assert!(!update.update(&mut section, &ctx(&props, OverwriteMode::Yes)));
    section.set_value("expected", Value::scalar("FAIL"));
    assert!(update.update(&mut section, &ctx(&props, OverwriteMode::Yes)));
    assert_eq!(rendered(&section, "bug"), vec!["crbug.com/5"]);
  }
}
