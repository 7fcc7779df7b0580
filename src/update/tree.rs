//! Decision trees over update properties.
//!
//! Results keyed by reduced configuration are split recursively on the
//! property that best separates distinct outcomes. Only primary properties
//! are candidates at the root; once a property has been split on, its
//! dependents become candidates below it. A property that separates nothing
//! is still split on when its dependents have not been tried, so results
//! differing only by `os` under a single `product` get `os` conditions.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{PropValue, RunInfo, UpdateProperties};
use crate::metadata::Expr;

/// Observed values for one configuration, with occurrence counts. A count of
/// zero records a value that must be kept without weighing on the choice of
/// primary.
pub type Counts<V> = BTreeMap<V, usize>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf<V> {
  /// Property constraints from the root to this leaf.
  pub path: Vec<(String, PropValue)>,
  pub run_infos: BTreeSet<RunInfo>,
  pub counts: Counts<V>,
}

impl<V> Leaf<V> {
  pub fn condition(&self) -> Option<Expr> {
    Expr::conjunction(
      self
        .path
        .iter()
        .map(|(prop, value)| Expr::clause(prop, value))
        .collect(),
    )
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tree<V> {
  Leaf(Leaf<V>),
  Branch {
    prop: String,
    children: Vec<(PropValue, Tree<V>)>,
  },
}

impl<V: Ord + Clone> Tree<V> {
  /// Build a tree from per-configuration results.
  pub fn build(props: &UpdateProperties, results: &BTreeMap<RunInfo, Counts<V>>) -> Self {
    let entries: Vec<(&RunInfo, &Counts<V>)> = results.iter().collect();
    build_node(props, props.primary.clone(), Vec::new(), &entries)
  }

  /// Leaves in depth-first order; siblings are visited in property-value order.
  pub fn leaves(&self) -> Vec<&Leaf<V>> {
    let mut out = Vec::new();
    self.collect_leaves(&mut out);
    out
  }

  fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Leaf<V>>) {
    match self {
      Tree::Leaf(leaf) => out.push(leaf),
      Tree::Branch { children, .. } => {
        for (_, child) in children {
          child.collect_leaves(out);
        }
      }
    }
  }

  fn distinct_outcomes(&self) -> usize {
    self
      .leaves()
      .iter()
      .map(|leaf| leaf.counts.keys().cloned().collect::<BTreeSet<V>>())
      .collect::<BTreeSet<_>>()
      .len()
  }

  /// Replace each leaf's counts with a computed value.
  pub fn map_leaves<W: Ord>(&self, f: &mut impl FnMut(&Leaf<V>) -> W) -> Tree<W> {
    match self {
      Tree::Leaf(leaf) => Tree::Leaf(Leaf {
        path: leaf.path.clone(),
        run_infos: leaf.run_infos.clone(),
        counts: single(f(leaf)),
      }),
      Tree::Branch { prop, children } => Tree::Branch {
        prop: prop.clone(),
        children: children
          .iter()
          .map(|(value, child)| (value.clone(), child.map_leaves(f)))
          .collect(),
      },
    }
  }
}

fn single<W>(value: W) -> BTreeMap<W, usize>
where
  W: Ord,
{
  let mut map = BTreeMap::new();
  map.insert(value, 1);
  map
}

impl<W: Ord + Clone> Tree<W> {
  /// Value of a tree produced by [`Tree::map_leaves`], if it is a leaf.
  pub fn leaf_value(&self) -> Option<&W> {
    match self {
      Tree::Leaf(leaf) => leaf.counts.keys().next(),
      Tree::Branch { .. } => None,
    }
  }

  /// Merge branches whose children all carry the same value, bottom-up.
  pub fn collapse(self) -> Self {
    match self {
      Tree::Leaf(_) => self,
      Tree::Branch { prop, children } => {
        let children: Vec<(PropValue, Tree<W>)> = children
          .into_iter()
          .map(|(value, child)| (value, child.collapse()))
          .collect();
        let first = children.first().and_then(|(_, c)| c.leaf_value()).cloned();
        let uniform = first.is_some()
          && children
            .iter()
            .all(|(_, c)| c.leaf_value().is_some() && c.leaf_value() == first.as_ref());
        match (uniform, first) {
          (true, Some(value)) => {
            let mut run_infos = BTreeSet::new();
            let mut path = Vec::new();
            for (_, child) in &children {
              if let Tree::Leaf(leaf) = child {
                run_infos.extend(leaf.run_infos.iter().cloned());
                if path.is_empty() {
                  path = leaf.path.clone();
                  path.pop();
                }
              }
            }
            Tree::Leaf(Leaf {
              path,
              run_infos,
              counts: single(value),
            })
          }
          _ => Tree::Branch { prop, children },
        }
      }
    }
  }
}

fn key_set<V: Ord + Clone>(entries: &[(&RunInfo, &Counts<V>)]) -> BTreeSet<V> {
  entries
    .iter()
    .flat_map(|(_, counts)| counts.keys().cloned())
    .collect()
}

fn combined<V: Ord + Clone>(entries: &[(&RunInfo, &Counts<V>)]) -> Counts<V> {
  let mut out = BTreeMap::new();
  for (_, counts) in entries {
    for (value, count) in counts.iter() {
      *out.entry(value.clone()).or_insert(0) += *count;
    }
  }
  out
}

fn build_node<V: Ord + Clone>(
  props: &UpdateProperties,
  available: Vec<String>,
  path: Vec<(String, PropValue)>,
  entries: &[(&RunInfo, &Counts<V>)],
) -> Tree<V> {
  let counts = combined(entries);
  let leaf = |counts: Counts<V>| {
    Tree::Leaf(Leaf {
      path: path.clone(),
      run_infos: entries.iter().map(|(r, _)| (*r).clone()).collect(),
      counts,
    })
  };
  if available.is_empty() || counts.len() <= 1 {
    return leaf(counts);
  }

  // Pick the property whose values separate the most distinct outcomes.
  let mut best: Option<(usize, &String, BTreeMap<PropValue, Vec<(&RunInfo, &Counts<V>)>>)> = None;
  // First property that separates nothing but has dependents left to try.
  let mut opener: Option<(usize, &String, BTreeMap<PropValue, Vec<(&RunInfo, &Counts<V>)>>)> = None;
  for prop in &available {
    let mut groups: BTreeMap<PropValue, Vec<(&RunInfo, &Counts<V>)>> = BTreeMap::new();
    let mut complete = true;
    for (run_info, counts) in entries {
      match run_info.get(prop) {
        Some(value) => groups.entry(value.clone()).or_default().push((*run_info, *counts)),
        None => {
          complete = false;
          break;
        }
      }
    }
    if !complete {
      continue;
    }
    let distinct: BTreeSet<BTreeSet<V>> = groups.values().map(|g| key_set(g)).collect();
    let score = distinct.len();
    if score > 1 {
      if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
        best = Some((score, prop, groups));
      }
    } else if opener.is_none() && has_unused_dependents(props, prop, &path) {
      opener = Some((score, prop, groups));
    }
  }

  let opened = best.is_none();
  let Some((_, prop, groups)) = best.or(opener) else {
    return leaf(counts);
  };

  let mut child_props: Vec<String> = available.iter().filter(|p| *p != prop).cloned().collect();
  for dependent in props.dependents_of(prop) {
    let already_used = path.iter().any(|(p, _)| p == dependent);
    if !already_used && !child_props.contains(dependent) {
      child_props.push(dependent.clone());
    }
  }

  let children = groups
    .into_iter()
    .map(|(value, group)| {
      let mut child_path = path.clone();
      child_path.push((prop.clone(), value.clone()));
      let child = build_node(props, child_props.clone(), child_path, &group);
      (value, child)
    })
    .collect();
  let tree = Tree::Branch {
    prop: prop.clone(),
    children,
  };
  // Nothing below the opening split told the outcomes apart.
  if opened && tree.distinct_outcomes() <= 1 {
    return leaf(counts);
  }
  tree
}

fn has_unused_dependents(props: &UpdateProperties, prop: &str, path: &[(String, PropValue)]) -> bool {
  props
    .dependents_of(prop)
    .iter()
    .any(|dependent| !path.iter().any(|(p, _)| p == dependent))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::status::Status;

  fn config(product: &str, os: &str) -> RunInfo {
    RunInfo::from_iter([
      ("product", PropValue::from(product)),
      ("os", PropValue::from(os)),
    ])
  }

  fn results(entries: &[(&str, &str, Status)]) -> BTreeMap<RunInfo, Counts<Status>> {
    entries
      .iter()
      .map(|(product, os, status)| (config(product, os), single(*status)))
      .collect()
  }

  fn props() -> UpdateProperties {
    let mut dependents = BTreeMap::new();
    dependents.insert("product".to_string(), vec!["os".to_string()]);
    UpdateProperties {
      primary: vec!["product".to_string()],
      dependents,
    }
  }

  #[test]
  fn uniform_results_make_a_single_leaf() {
    let tree = Tree::build(
      &props(),
      &results(&[("chrome", "linux", Status::Fail), ("content_shell", "mac", Status::Fail)]),
    );
    let leaves = tree.leaves();
    assert_eq!(leaves.len(), 1);
    assert!(leaves[0].path.is_empty());
    assert_eq!(leaves[0].run_infos.len(), 2);
  }

  #[test]
  fn dependents_are_only_used_below_their_primary() {
    let tree = Tree::build(
      &props(),
      &results(&[
        ("chrome", "linux", Status::Pass),
        ("content_shell", "mac", Status::Timeout),
        ("content_shell", "win", Status::Fail),
      ]),
    );
    let conditions: Vec<String> = tree
      .leaves()
      .iter()
      .map(|leaf| leaf.condition().map(|c| c.to_string()).unwrap_or_default())
      .collect();
    assert_eq!(
      conditions,
      vec![
        "product == \"chrome\"",
        "(product == \"content_shell\") and (os == \"mac\")",
        "(product == \"content_shell\") and (os == \"win\")",
      ]
    );
  }

  #[test]
  fn properties_without_a_split_are_not_used() {
    let primary_only = UpdateProperties {
      primary: vec!["os".to_string()],
      dependents: BTreeMap::new(),
    };
    let tree = Tree::build(
      &primary_only,
      &results(&[("chrome", "linux", Status::Pass), ("content_shell", "linux", Status::Fail)]),
    );
    // Only `os` may be used and it cannot separate the two results.
    let leaves = tree.leaves();
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0].counts.len(), 2);
  }

  #[test]
  fn dependents_are_tried_when_the_primary_does_not_split() {
    let tree = Tree::build(
      &props(),
      &results(&[
        ("content_shell", "linux", Status::Ok),
        ("content_shell", "mac", Status::Fail),
        ("content_shell", "win", Status::Ok),
      ]),
    );
    let conditions: Vec<String> = tree
      .leaves()
      .iter()
      .map(|leaf| leaf.condition().map(|c| c.to_string()).unwrap_or_default())
      .collect();
    assert_eq!(
      conditions,
      vec![
        "(product == \"content_shell\") and (os == \"linux\")",
        "(product == \"content_shell\") and (os == \"mac\")",
        "(product == \"content_shell\") and (os == \"win\")",
      ]
    );
  }

  #[test]
  fn opening_splits_that_separate_nothing_are_dropped() {
    let mut counts = Counts::new();
    counts.insert(Status::Ok, 1);
    counts.insert(Status::Fail, 1);
    let results: BTreeMap<RunInfo, Counts<Status>> = [
      (config("content_shell", "linux"), counts.clone()),
      (config("content_shell", "mac"), counts),
    ]
    .into_iter()
    .collect();
    let tree = Tree::build(&props(), &results);
    let leaves = tree.leaves();
    assert_eq!(leaves.len(), 1);
    assert!(leaves[0].path.is_empty());
    assert_eq!(leaves[0].counts.len(), 2);
  }

  #[test]
  fn collapse_merges_identical_siblings() {
    let tree = Tree::build(
      &props(),
      &results(&[
        ("chrome", "linux", Status::Pass),
        ("content_shell", "mac", Status::Timeout),
        ("content_shell", "win", Status::Fail),
      ]),
    );
    // Map every content_shell leaf to the same value.
    let mapped = tree.map_leaves(&mut |leaf: &Leaf<Status>| {
      if leaf.path[0].1 == PropValue::from("chrome") {
        "OK"
      } else {
        "FAIL"
      }
    });
    let collapsed = mapped.collapse();
    let leaves = collapsed.leaves();
    assert_eq!(leaves.len(), 2);
    assert_eq!(
      leaves[1].condition().unwrap().to_string(),
      "product == \"content_shell\""
    );
    assert_eq!(leaves[1].run_infos.len(), 2);
  }
}
