//! Condition expressions used in `if <expr>: <value>` arms.

use std::collections::BTreeSet;
use std::fmt;

use crate::config::{PropValue, RunInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
  Eq,
  NotEq,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
  /// A run-info property lookup
  Variable(String),
  Str(String),
  Number(i64),
  Bool(bool),
  Not(Box<Expr>),
  And(Vec<Expr>),
  Or(Vec<Expr>),
  Compare {
    op: CompareOp,
    left: Box<Expr>,
    right: Box<Expr>,
  },
}

impl Expr {
  /// `prop == "value"`
  pub fn eq(prop: &str, value: &str) -> Self {
    Expr::Compare {
      op: CompareOp::Eq,
      left: Box::new(Expr::Variable(prop.to_string())),
      right: Box::new(Expr::Str(value.to_string())),
    }
  }

  /// Clause constraining `prop` to `value`, rendered the way authors write it:
  /// bare (or negated) variables for booleans, equality otherwise.
  pub fn clause(prop: &str, value: &PropValue) -> Self {
    let variable = Expr::Variable(prop.to_string());
    match value {
      PropValue::Bool(true) => variable,
      PropValue::Bool(false) => Expr::Not(Box::new(variable)),
      PropValue::Int(n) => Expr::Compare {
        op: CompareOp::Eq,
        left: Box::new(variable),
        right: Box::new(Expr::Number(*n)),
      },
      PropValue::Str(s) => Expr::eq(prop, s),
    }
  }

  /// Conjunction of property clauses; a single clause is returned as-is.
  pub fn conjunction(clauses: Vec<Expr>) -> Option<Self> {
    match clauses.len() {
      0 => None,
      1 => clauses.into_iter().next(),
      _ => Some(Expr::And(clauses)),
    }
  }

  pub fn matches(&self, run_info: &RunInfo) -> bool {
    truthy(self.eval(run_info).as_ref())
  }

  fn eval(&self, run_info: &RunInfo) -> Option<PropValue> {
    match self {
      Expr::Variable(name) => run_info.get(name).cloned(),
      Expr::Str(s) => Some(PropValue::Str(s.clone())),
      Expr::Number(n) => Some(PropValue::Int(*n)),
      Expr::Bool(b) => Some(PropValue::Bool(*b)),
      Expr::Not(inner) => Some(PropValue::Bool(!inner.matches(run_info))),
      Expr::And(items) => Some(PropValue::Bool(items.iter().all(|e| e.matches(run_info)))),
      Expr::Or(items) => Some(PropValue::Bool(items.iter().any(|e| e.matches(run_info)))),
      Expr::Compare { op, left, right } => {
        let equal = match (left.eval(run_info), right.eval(run_info)) {
          (Some(l), Some(r)) => l == r,
          _ => false,
        };
        Some(PropValue::Bool(match op {
          CompareOp::Eq => equal,
          CompareOp::NotEq => !equal,
        }))
      }
    }
  }

  /// Names of every run-info property the expression reads.
  pub fn variables(&self) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    self.collect_variables(&mut out);
    out
  }

  fn collect_variables(&self, out: &mut BTreeSet<String>) {
    match self {
      Expr::Variable(name) => {
        out.insert(name.clone());
      }
      Expr::Not(inner) => inner.collect_variables(out),
      Expr::And(items) | Expr::Or(items) => {
        for item in items {
          item.collect_variables(out);
        }
      }
      Expr::Compare { left, right, .. } => {
        left.collect_variables(out);
        right.collect_variables(out);
      }
      Expr::Str(_) | Expr::Number(_) | Expr::Bool(_) => {}
    }
  }

  fn is_binary(&self) -> bool {
    matches!(self, Expr::And(_) | Expr::Or(_) | Expr::Compare { .. })
  }
}

fn truthy(value: Option<&PropValue>) -> bool {
  match value {
    None => false,
    Some(PropValue::Bool(b)) => *b,
    Some(PropValue::Int(n)) => *n != 0,
    Some(PropValue::Str(s)) => !s.is_empty(),
  }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
  if expr.is_binary() {
    write!(f, "({expr})")
  } else {
    write!(f, "{expr}")
  }
}

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Expr::Variable(name) => f.write_str(name),
      Expr::Str(s) => write!(f, "\"{}\"", escape_string(s)),
      Expr::Number(n) => write!(f, "{n}"),
      Expr::Bool(true) => f.write_str("True"),
      Expr::Bool(false) => f.write_str("False"),
      Expr::Not(inner) => {
        f.write_str("not ")?;
        write_operand(f, inner)
      }
      Expr::And(items) | Expr::Or(items) => {
        let joiner = if matches!(self, Expr::And(_)) { " and " } else { " or " };
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            f.write_str(joiner)?;
          }
          write_operand(f, item)?;
        }
        Ok(())
      }
      Expr::Compare { op, left, right } => {
        write_operand(f, left)?;
        f.write_str(match op {
          CompareOp::Eq => " == ",
          CompareOp::NotEq => " != ",
        })?;
        write_operand(f, right)
      }
    }
  }
}

pub(crate) fn escape_string(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '"' => out.push_str("\\\""),
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      _ => out.push(c),
    }
  }
  out
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Ident(String),
  Str(String),
  Number(i64),
  LParen,
  RParen,
  Eq,
  NotEq,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
  let mut tokens = Vec::new();
  let mut chars = input.chars().peekable();
  while let Some(&c) = chars.peek() {
    match c {
      ' ' | '\t' => {
        chars.next();
      }
      '(' => {
        chars.next();
        tokens.push(Token::LParen);
      }
      ')' => {
        chars.next();
        tokens.push(Token::RParen);
      }
      '=' | '!' => {
        chars.next();
        if chars.next() != Some('=') {
          return Err(format!("expected '=' after '{c}'"));
        }
        tokens.push(if c == '=' { Token::Eq } else { Token::NotEq });
      }
      '"' | '\'' => {
        chars.next();
        let mut s = String::new();
        loop {
          match chars.next() {
            None => return Err("EOL in string".to_string()),
            Some('\\') => match chars.next() {
              Some('n') => s.push('\n'),
              Some(other) => s.push(other),
              None => return Err("EOL in string".to_string()),
            },
            Some(q) if q == c => break,
            Some(other) => s.push(other),
          }
        }
        tokens.push(Token::Str(s));
      }
      c if c.is_ascii_digit() || c == '-' => {
        let mut s = String::new();
        s.push(c);
        chars.next();
        while let Some(&d) = chars.peek() {
          if d.is_ascii_digit() {
            s.push(d);
            chars.next();
          } else {
            break;
          }
        }
        let n = s.parse::<i64>().map_err(|_| format!("invalid number '{s}'"))?;
        tokens.push(Token::Number(n));
      }
      c if c.is_alphanumeric() || c == '_' => {
        let mut s = String::new();
        while let Some(&d) = chars.peek() {
          if d.is_alphanumeric() || d == '_' || d == '-' || d == '.' {
            s.push(d);
            chars.next();
          } else {
            break;
          }
        }
        tokens.push(Token::Ident(s));
      }
      other => return Err(format!("unexpected character '{other}' in condition")),
    }
  }
  Ok(tokens)
}

struct ExprParser {
  tokens: Vec<Token>,
  pos: usize,
}

impl ExprParser {
  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn next(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    token
  }

  fn peek_keyword(&self, keyword: &str) -> bool {
    matches!(self.peek(), Some(Token::Ident(s)) if s == keyword)
  }

  fn parse_or(&mut self) -> Result<Expr, String> {
    let mut items = vec![self.parse_and()?];
    while self.peek_keyword("or") {
      self.pos += 1;
      items.push(self.parse_and()?);
    }
    Ok(if items.len() == 1 { items.remove(0) } else { Expr::Or(items) })
  }

  fn parse_and(&mut self) -> Result<Expr, String> {
    let mut items = vec![self.parse_not()?];
    while self.peek_keyword("and") {
      self.pos += 1;
      items.push(self.parse_not()?);
    }
    Ok(if items.len() == 1 { items.remove(0) } else { Expr::And(items) })
  }

  fn parse_not(&mut self) -> Result<Expr, String> {
    if self.peek_keyword("not") {
      self.pos += 1;
      return Ok(Expr::Not(Box::new(self.parse_not()?)));
    }
    self.parse_compare()
  }

  fn parse_compare(&mut self) -> Result<Expr, String> {
    let left = self.parse_atom()?;
    let op = match self.peek() {
      Some(Token::Eq) => CompareOp::Eq,
      Some(Token::NotEq) => CompareOp::NotEq,
      _ => return Ok(left),
    };
    self.pos += 1;
    let right = self.parse_atom()?;
    Ok(Expr::Compare {
      op,
      left: Box::new(left),
      right: Box::new(right),
    })
  }

  fn parse_atom(&mut self) -> Result<Expr, String> {
    match self.next() {
      Some(Token::LParen) => {
        let inner = self.parse_or()?;
        match self.next() {
          Some(Token::RParen) => Ok(inner),
          _ => Err("expected ')'".to_string()),
        }
      }
      Some(Token::Str(s)) => Ok(Expr::Str(s)),
      Some(Token::Number(n)) => Ok(Expr::Number(n)),
      Some(Token::Ident(s)) => Ok(match s.as_str() {
        "True" => Expr::Bool(true),
        "False" => Expr::Bool(false),
        _ => Expr::Variable(s),
      }),
      Some(other) => Err(format!("unexpected token {other:?} in condition")),
      None => Err("unexpected end of condition".to_string()),
    }
  }
}

/// Parse the text between `if` and the arm's `:`.
pub fn parse_condition(input: &str) -> Result<Expr, String> {
  let tokens = tokenize(input)?;
  if tokens.is_empty() {
    return Err("empty condition".to_string());
  }
  let mut parser = ExprParser { tokens, pos: 0 };
  let expr = parser.parse_or()?;
  if parser.pos != parser.tokens.len() {
    return Err("trailing tokens in condition".to_string());
  }
  Ok(expr)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn info(pairs: &[(&str, PropValue)]) -> RunInfo {
    pairs.iter().cloned().collect()
  }

  #[test]
  fn renders_single_and_compound_conditions() {
    assert_eq!(Expr::eq("product", "chrome").to_string(), "product == \"chrome\"");
    let both = Expr::conjunction(vec![
      Expr::eq("product", "content_shell"),
      Expr::eq("os", "win"),
    ])
    .unwrap();
    assert_eq!(
      both.to_string(),
      "(product == \"content_shell\") and (os == \"win\")"
    );
    let debug = Expr::conjunction(vec![
      Expr::clause("debug", &PropValue::Bool(false)),
      Expr::eq("os", "mac"),
    ])
    .unwrap();
    assert_eq!(debug.to_string(), "not debug and (os == \"mac\")");
  }

  #[test]
  fn parses_what_it_renders() {
    for text in [
      "product == \"chrome\"",
      "(product == \"content_shell\") and (os == \"win\")",
      "debug",
      "not debug and (os != \"mac\")",
      "(os == \"linux\") or (os == \"mac\")",
      "version == 11",
    ] {
      let expr = parse_condition(text).unwrap();
      assert_eq!(expr.to_string(), text);
    }
  }

  #[test]
  fn evaluates_against_run_info() {
    let run_info = info(&[
      ("os", PropValue::from("mac")),
      ("debug", PropValue::Bool(true)),
      ("product", PropValue::from("content_shell")),
    ]);
    assert!(parse_condition("debug").unwrap().matches(&run_info));
    assert!(!parse_condition("not debug").unwrap().matches(&run_info));
    assert!(parse_condition("(os == \"mac\") and (product == \"content_shell\")")
      .unwrap()
      .matches(&run_info));
    assert!(parse_condition("os != \"win\"").unwrap().matches(&run_info));
    assert!(!parse_condition("flag_specific == \"x\"").unwrap().matches(&run_info));
  }

  #[test]
  fn reports_variables() {
    let expr = parse_condition("(os == \"mac\") and not debug").unwrap();
    let vars: Vec<_> = expr.variables().into_iter().collect();
    assert_eq!(vars, vec!["debug".to_string(), "os".to_string()]);
  }

  #[test]
  fn rejects_malformed_conditions() {
    assert!(parse_condition("").is_err());
    assert!(parse_condition("os = \"mac\"").is_err());
    assert!(parse_condition("(os == \"mac\"").is_err());
    assert!(parse_condition("os == \"mac").is_err());
  }
}
