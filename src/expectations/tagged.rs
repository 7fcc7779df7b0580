//! Tag-guarded expectation files (`TestExpectations`, `NeverFixTests`, …).
//!
//! ```text
//! # tags: [ Linux Mac Win ]
//! # results: [ Failure Skip Timeout ]
//! crbug.com/123 [ Mac ] external/wpt/dir/a.html [ Failure Timeout ] # flaky
//! ```
//!
//! Tags on one line are ORed within a declared tag set and ANDed across
//! sets. Unparsed text (comments, blank lines, headers) is kept verbatim so a
//! file can be edited and written back without disturbing it.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use crate::error::{Error, ParseError, Result};

/// Marker after which the WPT importer appends generated lines.
pub const IMPORTER_MARKER: &str = "# ====== New tests from wpt-importer added here ======";

/// One expectation line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
  pub bugs: Vec<String>,
  /// Tags as written (case preserved).
  pub tags: Vec<String>,
  /// Test name or glob prefix, with `\*` escapes removed.
  pub test: String,
  pub is_glob: bool,
  pub results: Vec<String>,
  pub comment: Option<String>,
  /// 1-based line number in the source file; 0 for lines created in memory.
  pub line_number: usize,
}

impl Line {
  pub fn new<I, S>(test: impl Into<String>, results: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      bugs: Vec::new(),
      tags: Vec::new(),
      test: test.into(),
      is_glob: false,
      results: results.into_iter().map(Into::into).collect(),
      comment: None,
      line_number: 0,
    }
  }

  pub fn with_bugs(mut self, bugs: Vec<String>) -> Self {
    self.bugs = bugs;
    self
  }

  pub fn with_tags(mut self, tags: Vec<String>) -> Self {
    self.tags = tags;
    self
  }

  pub fn matches_test(&self, test: &str) -> bool {
    if self.is_glob {
      test.starts_with(&self.test)
    } else {
      self.test == test
    }
  }

  pub fn has_result(&self, result: &str) -> bool {
    self.results.iter().any(|r| r.eq_ignore_ascii_case(result))
  }

  pub fn is_skip(&self) -> bool {
    self.has_result("Skip")
  }
}

impl fmt::Display for Line {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for bug in &self.bugs {
      write!(f, "{bug} ")?;
    }
    if !self.tags.is_empty() {
      write!(f, "[ {} ] ", self.tags.join(" "))?;
    }
    f.write_str(&self.test.replace('*', "\\*"))?;
    if self.is_glob {
      f.write_str("*")?;
    }
    write!(f, " [ {} ]", self.results.join(" "))?;
    if let Some(comment) = &self.comment {
      write!(f, " # {comment}")?;
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
  Text(String),
  Expectation { line: Line, raw: Option<String> },
}

/// A parsed expectations file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaggedExpectations {
  name: String,
  tag_sets: Vec<Vec<String>>,
  result_names: Vec<String>,
  entries: Vec<Entry>,
}

impl TaggedExpectations {
  /// Parse `text`; `name` only labels errors.
  pub fn parse(name: &str, text: &str) -> std::result::Result<Self, ParseError> {
    let mut out = Self {
      name: name.to_string(),
      ..Self::default()
    };
    // Header lists may continue over several comment lines.
    let mut open_header: Option<(bool, Vec<String>)> = None;

    for (index, raw) in text.lines().enumerate() {
      let line_number = index + 1;
      let trimmed = raw.trim();

      if let Some((is_tags, mut items)) = open_header.take() {
        let body = trimmed.trim_start_matches('#');
        let closed = collect_header_items(body, &mut items);
        if closed {
          out.finish_header(is_tags, items);
        } else {
          open_header = Some((is_tags, items));
        }
        out.entries.push(Entry::Text(raw.to_string()));
        continue;
      }

      if trimmed.is_empty() || trimmed.starts_with('#') {
        let body = trimmed.trim_start_matches('#').trim_start();
        for (prefix, is_tags) in [("tags:", true), ("results:", false)] {
          if let Some(rest) = body.strip_prefix(prefix) {
            let rest = rest.trim_start();
            let Some(rest) = rest.strip_prefix('[') else {
              return Err(ParseError::new(name, line_number, "expected '[' in header"));
            };
            let mut items = Vec::new();
            if collect_header_items(rest, &mut items) {
              out.finish_header(is_tags, items);
            } else {
              open_header = Some((is_tags, items));
            }
          }
        }
        out.entries.push(Entry::Text(raw.to_string()));
        continue;
      }

      let line = out
        .parse_line(trimmed, line_number)
        .map_err(|message| ParseError::new(name, line_number, message))?;
      out.entries.push(Entry::Expectation {
        line,
        raw: Some(raw.to_string()),
      });
    }
    if open_header.is_some() {
      return Err(ParseError::new(
        name,
        text.lines().count(),
        "unterminated header list",
      ));
    }
    Ok(out)
  }

  pub fn load(path: &Path) -> Result<Self> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(Self::parse(&path.to_string_lossy(), &text)?)
  }

  fn finish_header(&mut self, is_tags: bool, items: Vec<String>) {
    if is_tags {
      self.tag_sets.push(items);
    } else {
      self.result_names.extend(items);
    }
  }

  fn parse_line(&self, text: &str, line_number: usize) -> std::result::Result<Line, String> {
    let (body, comment) = match text.find(" #") {
      Some(pos) => (&text[..pos], Some(text[pos + 2..].trim().to_string())),
      None => (text, None),
    };
    let spaced = body.replace('[', " [ ").replace(']', " ] ");
    let tokens: Vec<&str> = spaced.split_whitespace().collect();

    // Results are the trailing bracket group.
    if tokens.last() != Some(&"]") {
      return Err("missing results".to_string());
    }
    let results_open = tokens
      .iter()
      .rposition(|t| *t == "[")
      .ok_or_else(|| "missing results".to_string())?;
    let results: Vec<String> = tokens[results_open + 1..tokens.len() - 1]
      .iter()
      .map(|t| t.to_string())
      .collect();
    if results.is_empty() {
      return Err("missing results".to_string());
    }
    for result in &results {
      if !self.result_names.is_empty()
        && !self.result_names.iter().any(|r| r.eq_ignore_ascii_case(result))
      {
        return Err(format!("unknown result '{result}'"));
      }
    }

    let head = &tokens[..results_open];
    let Some((&test, before)) = head.split_last() else {
      return Err("missing test name".to_string());
    };
    if test == "]" {
      return Err("missing test name".to_string());
    }
    let (bugs, tags) = match before.iter().position(|t| *t == "[") {
      Some(open) => {
        if before.last() != Some(&"]") {
          return Err("malformed tag list".to_string());
        }
        let tags: Vec<String> = before[open + 1..before.len() - 1]
          .iter()
          .map(|t| t.to_string())
          .collect();
        (&before[..open], tags)
      }
      None => (before, Vec::new()),
    };
    for tag in &tags {
      if !self.tag_sets.is_empty() && self.tag_set_of(tag).is_none() {
        return Err(format!("unknown tag '{tag}'"));
      }
    }
    for bug in bugs {
      if !looks_like_bug(bug) {
        return Err(format!("invalid bug '{bug}'"));
      }
    }

    let (test, is_glob) = unescape_test(test);
    Ok(Line {
      bugs: bugs.iter().map(|b| b.to_string()).collect(),
      tags,
      test,
      is_glob,
      results,
      comment,
      line_number,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Index of the declared tag set containing `tag` (case-insensitive).
  pub fn tag_set_of(&self, tag: &str) -> Option<usize> {
    self
      .tag_sets
      .iter()
      .position(|set| set.iter().any(|t| t.eq_ignore_ascii_case(tag)))
  }

  /// The declared spelling of a tag, falling back to `tag` itself.
  pub fn canonical_tag(&self, tag: &str) -> String {
    self
      .tag_sets
      .iter()
      .flatten()
      .find(|t| t.eq_ignore_ascii_case(tag))
      .cloned()
      .unwrap_or_else(|| tag.to_string())
  }

  pub fn lines(&self) -> impl Iterator<Item = &Line> {
    self.entries.iter().filter_map(|entry| match entry {
      Entry::Expectation { line, .. } => Some(line),
      Entry::Text(_) => None,
    })
  }

  /// Whether `line`'s tags apply to a configuration carrying `tags`
  /// (lowercase).
  pub fn tags_apply(&self, line: &Line, tags: &BTreeSet<String>) -> bool {
    let mut groups: Vec<(Option<usize>, bool)> = Vec::new();
    for tag in &line.tags {
      let set = self.tag_set_of(tag);
      let hit = tags.contains(&tag.to_ascii_lowercase());
      match groups.iter_mut().find(|(s, _)| set.is_some() && *s == set) {
        Some((_, any)) => *any |= hit,
        None => groups.push((set, hit)),
      }
    }
    groups.iter().all(|(_, hit)| *hit)
  }

  /// The most specific line applying to `test` on a configuration with
  /// `tags`: an exact name beats a glob, and a longer glob a shorter one.
  pub fn line_for(&self, test: &str, tags: &BTreeSet<String>) -> Option<&Line> {
    let mut best: Option<&Line> = None;
    for line in self.lines() {
      if !line.matches_test(test) || !self.tags_apply(line, tags) {
        continue;
      }
      let better = match best {
        None => true,
        Some(current) => specificity(line) > specificity(current),
      };
      if better {
        best = Some(line);
      }
    }
    best
  }

  /// Lines naming `test` exactly.
  pub fn lines_for_test<'a>(&'a self, test: &'a str) -> impl Iterator<Item = &'a Line> + 'a {
    self.lines().filter(move |line| !line.is_glob && line.test == test)
  }

  /// Comment lines directly above the line at `line_number`.
  pub fn comment_block_before(&self, line_number: usize) -> Vec<String> {
    let Some(index) = self.entries.iter().position(|entry| {
      matches!(entry, Entry::Expectation { line, .. } if line.line_number == line_number)
    }) else {
      return Vec::new();
    };
    let mut block = Vec::new();
    for entry in self.entries[..index].iter().rev() {
      match entry {
        Entry::Text(text) if text.trim_start().starts_with('#') => block.push(text.trim().to_string()),
        _ => break,
      }
    }
    block.reverse();
    block
  }

  /// Drop every line for which `remove` returns true; returns how many went.
  pub fn remove_lines(&mut self, mut remove: impl FnMut(&Line) -> bool) -> usize {
    let before = self.entries.len();
    self.entries.retain(|entry| match entry {
      Entry::Expectation { line, .. } => !remove(line),
      Entry::Text(_) => true,
    });
    before - self.entries.len()
  }

  /// Rewrite lines in place; a line whose contents change is re-rendered.
  pub fn modify_lines(&mut self, mut modify: impl FnMut(&mut Line)) {
    for entry in &mut self.entries {
      if let Entry::Expectation { line, raw } = entry {
        let before = line.clone();
        modify(line);
        if *line != before {
          *raw = None;
        }
      }
    }
  }

  /// Insert `lines` right after `marker`, appending the marker first when
  /// the file lacks it.
  pub fn insert_after_marker(&mut self, marker: &str, lines: Vec<Line>) {
    let position = match self
      .entries
      .iter()
      .position(|entry| matches!(entry, Entry::Text(text) if text.trim() == marker))
    {
      Some(index) => index + 1,
      None => {
        if matches!(self.entries.last(), Some(Entry::Text(t)) if !t.trim().is_empty())
          || matches!(self.entries.last(), Some(Entry::Expectation { .. }))
        {
          self.entries.push(Entry::Text(String::new()));
        }
        self.entries.push(Entry::Text(marker.to_string()));
        self.entries.len()
      }
    };
    let new_entries = lines
      .into_iter()
      .map(|line| Entry::Expectation { line, raw: None });
    self.entries.splice(position..position, new_entries);
  }

  pub fn push_line(&mut self, line: Line) {
    self.entries.push(Entry::Expectation { line, raw: None });
  }

  /// Render the file; untouched lines keep their original text.
  pub fn render(&self) -> String {
    let mut out = String::new();
    for entry in &self.entries {
      match entry {
        Entry::Text(text) => out.push_str(text),
        Entry::Expectation { raw: Some(raw), .. } => out.push_str(raw),
        Entry::Expectation { line, raw: None } => out.push_str(&line.to_string()),
      }
      out.push('\n');
    }
    out
  }
}

fn specificity(line: &Line) -> (bool, usize) {
  (!line.is_glob, line.test.len())
}

/// Push items of a header list body; returns true once `]` is seen.
fn collect_header_items(body: &str, items: &mut Vec<String>) -> bool {
  let (list, closed) = match body.find(']') {
    Some(end) => (&body[..end], true),
    None => (body, false),
  };
  items.extend(list.split_whitespace().map(str::to_string));
  closed
}

fn looks_like_bug(token: &str) -> bool {
  token.starts_with("crbug.com/")
    || token.starts_with("skbug.com/")
    || token.starts_with("webkit.org/b/")
    || token.starts_with("Bug(")
    || token.starts_with("https://crbug.com/")
}

fn unescape_test(token: &str) -> (String, bool) {
  let mut out = String::with_capacity(token.len());
  let mut chars = token.chars().peekable();
  let mut is_glob = false;
  while let Some(c) = chars.next() {
    match c {
      '\\' if chars.peek() == Some(&'*') => {
        out.push('*');
        chars.next();
      }
      '*' if chars.peek().is_none() => is_glob = true,
      _ => out.push(c),
    }
  }
  (out, is_glob)
}

#[cfg(test)]
mod tests {
  use super::*;

  const FILE: &str = "\
# tags: [ Linux Mac Mac10.10
#         Win Win7 ]
# tags: [ Release Debug ]
# results: [ Failure Pass Skip Timeout ]

# Known flaky.
crbug.com/1 [ Mac ] external/wpt/a.html [ Failure Timeout ] # flaky
external/wpt/dir/* [ Skip ]
crbug.com/2 [ Win Debug ] external/wpt/dir/b.html [ Failure ]
external/wpt/literal\\*star.html [ Pass ]
";

  fn tags(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn parses_headers_and_lines() {
    let file = TaggedExpectations::parse("TestExpectations", FILE).unwrap();
    let lines: Vec<&Line> = file.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0].bugs, vec!["crbug.com/1"]);
    assert_eq!(lines[0].tags, vec!["Mac"]);
    assert_eq!(lines[0].results, vec!["Failure", "Timeout"]);
    assert_eq!(lines[0].comment.as_deref(), Some("flaky"));
    assert!(lines[1].is_glob);
    assert_eq!(lines[1].test, "external/wpt/dir/");
    assert_eq!(lines[3].test, "external/wpt/literal*star.html");
    assert!(!lines[3].is_glob);
    assert_eq!(file.tag_set_of("win7"), Some(0));
    assert_eq!(file.tag_set_of("debug"), Some(1));
  }

  #[test]
  fn tags_or_within_a_set_and_across_sets() {
    let file = TaggedExpectations::parse("TestExpectations", FILE).unwrap();
    let b = "external/wpt/dir/b.html";
    assert_eq!(
      file.line_for(b, &tags(&["win", "win7", "debug"])).unwrap().line_number,
      9
    );
    // The release config falls through to the directory glob.
    assert!(file.line_for(b, &tags(&["win", "win7", "release"])).unwrap().is_skip());
    assert!(file.line_for("external/wpt/a.html", &tags(&["linux"])).is_none());
  }

  #[test]
  fn rejects_undeclared_tags() {
    let err = TaggedExpectations::parse(
      "TestExpectations",
      "# tags: [ Mac ]\n[ Linux ] a.html [ Failure ]\n",
    )
    .unwrap_err();
    assert_eq!(err.line, 2);
    assert!(err.message.contains("unknown tag"));
  }

  #[test]
  fn rendering_preserves_untouched_text() {
    let mut file = TaggedExpectations::parse("TestExpectations", FILE).unwrap();
    assert_eq!(file.render(), FILE);
    file.remove_lines(|line| line.test == "external/wpt/a.html");
    file.insert_after_marker(
      IMPORTER_MARKER,
      vec![Line::new("external/wpt/new.html", ["Failure"]).with_bugs(vec!["crbug.com/9".to_string()])],
    );
    let rendered = file.render();
    assert!(!rendered.contains("a.html [ Failure Timeout ]"));
    assert!(rendered.ends_with(&format!(
      "\n{IMPORTER_MARKER}\ncrbug.com/9 external/wpt/new.html [ Failure ]\n"
    )));
  }

  #[test]
  fn comment_block_is_the_contiguous_comments_above_a_line() {
    let file = TaggedExpectations::parse("TestExpectations", FILE).unwrap();
    assert_eq!(file.comment_block_before(7), vec!["# Known flaky."]);
    assert!(file.comment_block_before(8).is_empty());
  }
}
