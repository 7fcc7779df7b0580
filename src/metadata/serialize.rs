//! Canonical rendering of metadata files.
//!
//! Output is independent of the order in which sections and keys were
//! inserted: a copy of the tree is sorted before it is written. Arms of a
//! conditional value keep their order.

use super::ast::{KeyValue, MetadataFile, Section, Value};

const INDENT: &str = "  ";

/// Render `file` canonically. An empty file renders as the empty string.
pub fn serialize(file: &MetadataFile) -> String {
  let mut sorted = file.root.clone();
  sorted.sort();
  let mut out = String::new();
  for comment in &sorted.comments {
    out.push_str(comment);
    out.push('\n');
  }
  write_body(&mut out, &sorted, 0);
  out
}

fn write_body(out: &mut String, section: &Section, depth: usize) {
  for kv in &section.keys {
    write_key(out, kv, depth);
  }
  for (i, child) in section.sections.iter().enumerate() {
    if i > 0 {
      out.push('\n');
    }
    let indent = INDENT.repeat(depth);
    for comment in &child.comments {
      out.push_str(&indent);
      out.push_str(comment);
      out.push('\n');
    }
    out.push_str(&indent);
    out.push('[');
    out.push_str(&escape_heading(&child.name));
    out.push_str("]\n");
    write_body(out, child, depth + 1);
  }
}

fn write_key(out: &mut String, kv: &KeyValue, depth: usize) {
  let indent = INDENT.repeat(depth);
  for comment in &kv.comments {
    out.push_str(&indent);
    out.push_str(comment);
    out.push('\n');
  }
  out.push_str(&indent);
  out.push_str(&kv.key);
  out.push(':');
  if kv.is_unconditional() {
    out.push(' ');
    out.push_str(&render_value(&kv.arms[0].value));
    out.push('\n');
    return;
  }
  out.push('\n');
  for arm in &kv.arms {
    out.push_str(&indent);
    out.push_str(INDENT);
    if let Some(condition) = &arm.condition {
      out.push_str(&format!("if {condition}: "));
    }
    out.push_str(&render_value(&arm.value));
    out.push('\n');
  }
}

/// Render a value as it appears after `key: `.
pub fn render_value(value: &Value) -> String {
  match value {
    Value::Scalar(s) => render_scalar(s),
    Value::List(items) if items.len() == 1 => render_scalar(&items[0]),
    Value::List(items) => {
      let rendered: Vec<String> = items.iter().map(|item| render_list_item(item)).collect();
      format!("[{}]", rendered.join(", "))
    }
  }
}

fn needs_quotes(s: &str) -> bool {
  s.is_empty()
    || s.trim() != s
    || s.contains('#')
    || s.contains('\n')
    || s.starts_with('[')
    || s.starts_with('"')
}

fn render_scalar(s: &str) -> String {
  if needs_quotes(s) {
    quote(s)
  } else {
    s.to_string()
  }
}

fn render_list_item(s: &str) -> String {
  if needs_quotes(s) || s.contains(',') || s.contains(']') {
    quote(s)
  } else {
    s.to_string()
  }
}

fn quote(s: &str) -> String {
  format!("\"{}\"", super::expr::escape_string(s))
}

fn escape_heading(name: &str) -> String {
  let mut out = String::with_capacity(name.len());
  for c in name.chars() {
    if c == ']' || c == '\\' {
      out.push('\\');
    }
    out.push(c);
  }
  out
}
