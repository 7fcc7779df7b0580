//! Line-oriented parser for metadata files.
//!
//! Nesting is expressed purely through indentation: a heading opens a section
//! that lasts until a line at the same or shallower indentation. A key with
//! an empty value starts a conditional block whose arms are indented deeper
//! than the key.

use std::path::Path;

use super::ast::{ConditionalArm, KeyValue, MetadataFile, Section, Value};
use super::expr::parse_condition;
use crate::error::ParseError;

struct OpenSection {
  indent: isize,
  section: Section,
}

struct OpenKey {
  indent: usize,
  line: usize,
  kv: KeyValue,
}

struct Parser<'a> {
  path: &'a Path,
  stack: Vec<OpenSection>,
  pending_key: Option<OpenKey>,
  pending_comments: Vec<String>,
}

/// Parse a metadata file. `path` is only used for error messages.
pub fn parse(path: &Path, text: &str) -> Result<MetadataFile, ParseError> {
  let mut parser = Parser {
    path,
    stack: vec![OpenSection {
      indent: -1,
      section: Section::new(""),
    }],
    pending_key: None,
    pending_comments: Vec::new(),
  };
  for (index, raw) in text.lines().enumerate() {
    parser.line(index + 1, raw.trim_end_matches('\r'))?;
  }
  parser.finish()
}

impl<'a> Parser<'a> {
  fn error(&self, line: usize, message: impl Into<String>) -> ParseError {
    ParseError::new(self.path, line, message)
  }

  fn line(&mut self, lineno: usize, raw: &str) -> Result<(), ParseError> {
    let content = raw.trim_start_matches(' ');
    if content.trim().is_empty() {
      return Ok(());
    }
    if content.starts_with('\t') {
      return Err(self.error(lineno, "tabs are not allowed in indentation"));
    }
    let indent = raw.len() - content.len();
    let content = content.trim_end();

    if content.starts_with('#') {
      self.pending_comments.push(content.to_string());
      return Ok(());
    }

    if let Some(open) = &self.pending_key {
      if indent > open.indent {
        return self.arm(lineno, content);
      }
      self.close_key()?;
    }

    if content.starts_with('[') {
      self.heading(lineno, indent, content)
    } else {
      self.key(lineno, indent, content)
    }
  }

  fn close_sections_at(&mut self, indent: usize) {
    while self.stack.len() > 1 && self.stack[self.stack.len() - 1].indent >= indent as isize {
      if let Some(done) = self.stack.pop() {
        if let Some(parent) = self.stack.last_mut() {
          parent.section.sections.push(done.section);
        }
      }
    }
  }

  fn heading(&mut self, lineno: usize, indent: usize, content: &str) -> Result<(), ParseError> {
    let (name, rest) = parse_heading(content).map_err(|msg| self.error(lineno, msg))?;
    if !(rest.is_empty() || rest.starts_with('#')) {
      return Err(self.error(lineno, "junk after section heading"));
    }
    self.close_sections_at(indent);
    let parent = &self.stack[self.stack.len() - 1].section;
    if parent.subsection(&name).is_some() {
      return Err(self.error(lineno, format!("duplicate section '{name}'")));
    }
    let mut section = Section::new(name);
    section.comments = std::mem::take(&mut self.pending_comments);
    self.stack.push(OpenSection {
      indent: indent as isize,
      section,
    });
    Ok(())
  }

  fn key(&mut self, lineno: usize, indent: usize, content: &str) -> Result<(), ParseError> {
    let Some((key, rest)) = content.split_once(':') else {
      return Err(self.error(lineno, "expected a key or section heading"));
    };
    let key = key.trim();
    if key.is_empty()
      || !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
      return Err(self.error(lineno, format!("invalid key '{key}'")));
    }
    self.close_sections_at(indent);
    if self.stack[self.stack.len() - 1].section.has_key(key) {
      return Err(self.error(lineno, format!("duplicate key '{key}'")));
    }

    let mut kv = KeyValue::new(key, Vec::new());
    kv.comments = std::mem::take(&mut self.pending_comments);
    let rest = rest.trim();
    if rest.is_empty() || rest.starts_with('#') {
      self.pending_key = Some(OpenKey {
        indent,
        line: lineno,
        kv,
      });
    } else {
      let value = parse_value(rest).map_err(|msg| self.error(lineno, msg))?;
      kv.arms.push(ConditionalArm::default(value));
      self.push_key(kv);
    }
    Ok(())
  }

  fn arm(&mut self, lineno: usize, content: &str) -> Result<(), ParseError> {
    let arm = if let Some(condition) = content.strip_prefix("if ") {
      let colon =
        find_condition_end(condition).ok_or_else(|| self.error(lineno, "missing ':' after condition"))?;
      let expr = parse_condition(&condition[..colon]).map_err(|msg| self.error(lineno, msg))?;
      let value = parse_value(condition[colon + 1..].trim()).map_err(|msg| self.error(lineno, msg))?;
      ConditionalArm::new(Some(expr), value)
    } else {
      let value = parse_value(content).map_err(|msg| self.error(lineno, msg))?;
      ConditionalArm::default(value)
    };
    let Some(open) = self.pending_key.as_mut() else {
      return Err(self.error(lineno, "conditional value without a key"));
    };
    if open.kv.default_value().is_some() {
      return Err(self.error(lineno, "default value must be the last arm"));
    }
    // Comments between arms move above the key.
    open.kv.comments.append(&mut self.pending_comments);
    open.kv.arms.push(arm);
    Ok(())
  }

  fn close_key(&mut self) -> Result<(), ParseError> {
    if let Some(open) = self.pending_key.take() {
      if open.kv.arms.is_empty() {
        return Err(self.error(open.line, "missing value"));
      }
      self.push_key(open.kv);
    }
    Ok(())
  }

  fn push_key(&mut self, kv: KeyValue) {
    if let Some(top) = self.stack.last_mut() {
      top.section.keys.push(kv);
    }
  }

  fn finish(mut self) -> Result<MetadataFile, ParseError> {
    self.close_key()?;
    self.close_sections_at(0);
    let mut root = match self.stack.pop() {
      Some(open) => open.section,
      None => Section::new(""),
    };
    // Trailing comments are kept with the file head.
    root.comments.append(&mut self.pending_comments);
    Ok(MetadataFile { root })
  }
}

fn parse_heading(content: &str) -> Result<(String, &str), String> {
  let mut name = String::new();
  let mut chars = content[1..].char_indices();
  while let Some((i, c)) = chars.next() {
    match c {
      '\\' => match chars.next() {
        Some((_, escaped)) => name.push(escaped),
        None => return Err("EOL in heading".to_string()),
      },
      ']' => {
        if name.is_empty() {
          return Err("empty section name".to_string());
        }
        return Ok((name, content[i + 2..].trim()));
      }
      _ => name.push(c),
    }
  }
  Err("EOL in heading".to_string())
}

/// Byte offset of the `:` that ends a condition, skipping quoted strings.
fn find_condition_end(text: &str) -> Option<usize> {
  let mut quote: Option<char> = None;
  let mut escaped = false;
  for (i, c) in text.char_indices() {
    if let Some(q) = quote {
      if escaped {
        escaped = false;
      } else if c == '\\' {
        escaped = true;
      } else if c == q {
        quote = None;
      }
      continue;
    }
    match c {
      '"' | '\'' => quote = Some(c),
      ':' => return Some(i),
      _ => {}
    }
  }
  None
}

/// Parse a scalar or list value with its trailing comment, if any, removed.
pub(crate) fn parse_value(text: &str) -> Result<Value, String> {
  let text = text.trim();
  if let Some(body) = text.strip_prefix('[') {
    return parse_list(body);
  }
  if text.starts_with('"') {
    let (value, rest) = parse_quoted(text)?;
    let rest = rest.trim();
    if !(rest.is_empty() || rest.starts_with('#')) {
      return Err("junk after quoted value".to_string());
    }
    return Ok(Value::Scalar(value));
  }
  let value = match text.find('#') {
    Some(i) => text[..i].trim_end(),
    None => text,
  };
  if value.is_empty() {
    return Err("missing value".to_string());
  }
  Ok(Value::Scalar(value.to_string()))
}

fn parse_list(body: &str) -> Result<Value, String> {
  let mut items = Vec::new();
  let mut rest = body.trim_start();
  loop {
    if let Some(after) = rest.strip_prefix(']') {
      let after = after.trim();
      if !(after.is_empty() || after.starts_with('#')) {
        return Err("junk after list value".to_string());
      }
      return Ok(Value::List(items));
    }
    if rest.is_empty() {
      return Err("EOL in list value".to_string());
    }
    if rest.starts_with('#') {
      return Err("EOL in list value (comment)".to_string());
    }
    let (item, remaining) = if rest.starts_with('"') {
      parse_quoted(rest)?
    } else {
      let end = rest
        .find(|c| c == ',' || c == ']' || c == '#')
        .unwrap_or(rest.len());
      (rest[..end].trim_end().to_string(), &rest[end..])
    };
    items.push(item);
    rest = remaining.trim_start();
    if let Some(after_comma) = rest.strip_prefix(',') {
      rest = after_comma.trim_start();
    } else if rest.starts_with('#') {
      return Err("EOL in list value (comment)".to_string());
    } else if !rest.starts_with(']') {
      if rest.is_empty() {
        return Err("EOL in list value".to_string());
      }
      return Err("expected ',' or ']' in list value".to_string());
    }
  }
}

fn parse_quoted(text: &str) -> Result<(String, &str), String> {
  let mut out = String::new();
  let mut chars = text.char_indices().skip(1);
  while let Some((i, c)) = chars.next() {
    match c {
      '\\' => match chars.next() {
        Some((_, 'n')) => out.push('\n'),
        Some((_, other)) => out.push(other),
        None => break,
      },
      '"' => return Ok((out, &text[i + 1..])),
      _ => out.push(c),
    }
  }
  Err("EOL in string".to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::metadata::expr::Expr;

  fn parse_str(text: &str) -> Result<MetadataFile, ParseError> {
    parse(Path::new("test.ini"), text)
  }

  #[test]
  fn parses_nested_sections_and_conditions() {
    let file = parse_str(
      "bug: crbug.com/123\n\
       [variant.html?foo=baz]\n\
       \x20 expected: [OK, CRASH]\n\
       \x20 [subtest 2]\n\
       \x20   disabled: @False\n\
       \x20   expected:\n\
       \x20     if os == \"win\": FAIL\n\
       \x20     if os == \"mac\": FAIL\n\
       \x20     PASS\n",
    )
    .unwrap();
    assert_eq!(
      file.root.get("bug").unwrap().default_value(),
      Some(&Value::scalar("crbug.com/123"))
    );
    let test = file.test("variant.html?foo=baz").unwrap();
    assert_eq!(
      test.get("expected").unwrap().default_value(),
      Some(&Value::List(vec!["OK".into(), "CRASH".into()]))
    );
    let subtest = test.subsection("subtest 2").unwrap();
    let expected = subtest.get("expected").unwrap();
    assert_eq!(expected.arms.len(), 3);
    assert_eq!(expected.arms[0].condition, Some(Expr::eq("os", "win")));
    assert_eq!(expected.default_value(), Some(&Value::scalar("PASS")));
    assert!(!file.is_modified());
  }

  #[test]
  fn comments_attach_to_the_following_section() {
    let file = parse_str(
      "[a.html]\n  bug: crbug.com/1\n\n# Keep this comment.\n[b.html]\n  expected: FAIL\n",
    )
    .unwrap();
    assert!(file.test("a.html").unwrap().comments.is_empty());
    assert_eq!(
      file.test("b.html").unwrap().comments,
      vec!["# Keep this comment.".to_string()]
    );
  }

  #[test]
  fn comments_between_arms_move_above_the_key() {
    let text = "[a.html]\n  expected:\n    # Flaky on mac.\n    if os == \"mac\": FAIL\n    # Everywhere else.\n    TIMEOUT\n";
    let file = parse_str(text).unwrap();
    let expected = file.test("a.html").unwrap().get("expected").unwrap();
    assert_eq!(
      expected.comments,
      vec!["# Flaky on mac.".to_string(), "# Everywhere else.".to_string()]
    );
    assert_eq!(expected.arms.len(), 2);
    assert_eq!(
      crate::metadata::serialize(&file),
      "[a.html]\n  # Flaky on mac.\n  # Everywhere else.\n  expected:\n    if os == \"mac\": FAIL\n    TIMEOUT\n"
    );
  }

  #[test]
  fn comment_inside_list_is_an_error_with_line_number() {
    let err = parse_str("[fail.html]\n  expected: [FAIL, # comment\n").unwrap_err();
    assert_eq!(err.line, 2);
    assert_eq!(
      err.to_string(),
      "EOL in list value (comment): test.ini line 2"
    );
  }

  #[test]
  fn headings_unescape_brackets() {
    let file = parse_str("[a.html]\n  [sub \\] name]\n    expected: FAIL\n").unwrap();
    assert!(file.test("a.html").unwrap().subsection("sub ] name").is_some());
  }

  #[test]
  fn rejects_structural_errors() {
    assert!(parse_str("[a.html]\n  expected:\n").is_err());
    assert!(parse_str("[a.html]\n[a.html]\n").is_err());
    assert!(parse_str("[a.html\n").is_err());
    assert!(parse_str("[a.html]\n  expected:\n    FAIL\n    if os == \"mac\": PASS\n").is_err());
    assert!(parse_str("[a.html]\n  just text\n").is_err());
  }

  #[test]
  fn quoted_values_keep_special_characters() {
    let file = parse_str("[a.html]\n  disabled: \"needs # and [brackets]\"\n").unwrap();
    assert_eq!(
      file.test("a.html").unwrap().get("disabled").unwrap().default_value(),
      Some(&Value::scalar("needs # and [brackets]"))
    );
  }

  #[test]
  fn key_after_subsection_closes_it() {
    let file = parse_str("[a.html]\n  [sub]\n    expected: FAIL\n  bug: crbug.com/2\n").unwrap();
    let test = file.test("a.html").unwrap();
    assert!(test.has_key("bug"));
    assert!(!test.subsection("sub").unwrap().has_key("bug"));
  }
}
