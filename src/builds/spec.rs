//! Build specifiers given on the command line.
//!
//! `--build` takes a comma-separated list of `[{ci|try}/]<builder>[:N[-M]]`.
//! Builder names may contain spaces (`ci/Linux Tests:100`). A try builder
//! without a number means "the latest build for the current change".

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

pub const DEFAULT_BUCKET: &str = "try";

/// Most builds a single `N-M` range may expand to.
pub const MAX_BUILD_RANGE: u64 = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecifierError {
  #[error("invalid build specifier: '{0}'")]
  Invalid(String),
  #[error("start build number must precede end: '{0}'")]
  Range(String),
  #[error("build range covers more than 1000 builds: '{0}'")]
  RangeTooWide(String),
  #[error("invalid bug number or URL: '{0}'")]
  Bug(String),
}

/// One build of a builder, possibly not yet numbered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Build {
  pub builder: String,
  pub number: Option<u64>,
  pub bucket: String,
  /// Build ID assigned by the build service, once known.
  pub id: Option<String>,
}

impl Build {
  pub fn new(builder: impl Into<String>) -> Self {
    Self {
      builder: builder.into(),
      number: None,
      bucket: DEFAULT_BUCKET.to_string(),
      id: None,
    }
  }

  pub fn with_number(mut self, number: u64) -> Self {
    self.number = Some(number);
    self
  }

  pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
    self.bucket = bucket.into();
    self
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  pub fn is_try(&self) -> bool {
    self.bucket == "try"
  }
}

impl fmt::Display for Build {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "\"{}\"", self.builder)?;
    if let Some(number) = self.number {
      write!(f, " build {number}")?;
    }
    Ok(())
  }
}

fn specifier_pattern() -> &'static Regex {
  static SPECIFIER: OnceLock<Regex> = OnceLock::new();
  SPECIFIER.get_or_init(|| {
    Regex::new(r"^(?:(ci|try)/)?([^:]+?)(?::(\d+)(?:-(\d+))?)?$").expect("build specifier regex compiles")
  })
}

/// Parse one `--build` argument into builds, expanding ranges.
pub fn parse_build_specifiers(arg: &str) -> Result<Vec<Build>, SpecifierError> {
  let pattern = specifier_pattern();
  let mut builds = Vec::new();
  for specifier in arg.split(',') {
    let specifier = specifier.trim();
    let captures = pattern
      .captures(specifier)
      .ok_or_else(|| SpecifierError::Invalid(specifier.to_string()))?;
    let bucket = captures.get(1).map_or(DEFAULT_BUCKET, |m| m.as_str());
    let builder = captures[2].trim();
    if builder.is_empty() {
      return Err(SpecifierError::Invalid(specifier.to_string()));
    }
    let parse = |index: usize| -> Result<Option<u64>, SpecifierError> {
      captures
        .get(index)
        .map(|m| m.as_str().parse::<u64>())
        .transpose()
        .map_err(|_| SpecifierError::Invalid(specifier.to_string()))
    };
    let build = Build::new(builder).with_bucket(bucket);
    match (parse(3)?, parse(4)?) {
      (None, _) => builds.push(build),
      (Some(start), None) => builds.push(build.with_number(start)),
      (Some(start), Some(end)) => {
        if start > end {
          return Err(SpecifierError::Range(specifier.to_string()));
        }
        if end - start >= MAX_BUILD_RANGE {
          return Err(SpecifierError::RangeTooWide(specifier.to_string()));
        }
        builds.extend((start..=end).map(|n| build.clone().with_number(n)));
      }
    }
  }
  Ok(builds)
}

/// Accepts `123`, `crbug/123`, `crbug.com/123` and `https://crbug.com/123`.
pub fn parse_bug(arg: &str) -> Result<u64, SpecifierError> {
  static BUG: OnceLock<Regex> = OnceLock::new();
  let pattern = BUG.get_or_init(|| {
    Regex::new(r"^(?:(?:https?://)?crbug(?:\.com)?/)?(\d+)$").expect("bug regex compiles")
  });
  pattern
    .captures(arg.trim())
    .and_then(|c| c[1].parse().ok())
    .ok_or_else(|| SpecifierError::Bug(arg.to_string()))
}

/// How a bug number is written into metadata.
pub fn bug_url(number: u64) -> String {
  format!("crbug.com/{number}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_buckets_numbers_and_ranges() {
    let mut builds = parse_build_specifiers("ci/Linux Tests:100,linux-rel").unwrap();
    builds.extend(parse_build_specifiers("mac-rel:200").unwrap());
    builds.extend(parse_build_specifiers("ci/Mac12 Tests:300-302").unwrap());
    assert_eq!(
      builds,
      vec![
        Build::new("Linux Tests").with_bucket("ci").with_number(100),
        Build::new("linux-rel"),
        Build::new("mac-rel").with_number(200),
        Build::new("Mac12 Tests").with_bucket("ci").with_number(300),
        Build::new("Mac12 Tests").with_bucket("ci").with_number(301),
        Build::new("Mac12 Tests").with_bucket("ci").with_number(302),
      ]
    );
  }

  #[test]
  fn rejects_malformed_specifiers() {
    assert!(matches!(
      parse_build_specifiers("linux-rel:"),
      Err(SpecifierError::Invalid(_))
    ));
    assert!(matches!(
      parse_build_specifiers("linux-rel:nan"),
      Err(SpecifierError::Invalid(_))
    ));
    let err = parse_build_specifiers("Linux Tests:100-10").unwrap_err();
    assert_eq!(err.to_string(), "start build number must precede end: 'Linux Tests:100-10'");
  }

  #[test]
  fn rejects_ranges_wider_than_the_limit() {
    let err = parse_build_specifiers("linux-rel:1-4000000000").unwrap_err();
    assert_eq!(
      err.to_string(),
      "build range covers more than 1000 builds: 'linux-rel:1-4000000000'"
    );
    assert_eq!(parse_build_specifiers("linux-rel:1-1000").unwrap().len(), 1000);
    assert!(matches!(
      parse_build_specifiers("linux-rel:1-1001"),
      Err(SpecifierError::RangeTooWide(_))
    ));
  }

  #[test]
  fn parses_bug_numbers() {
    assert_eq!(parse_bug("123"), Ok(123));
    assert_eq!(parse_bug("crbug/123"), Ok(123));
    assert_eq!(parse_bug("crbug.com/123"), Ok(123));
    assert_eq!(parse_bug("https://crbug.com/123"), Ok(123));
    assert!(parse_bug("crbug.com/123a").is_err());
    assert!(parse_bug("cbug.com/123").is_err());
    assert_eq!(bug_url(123), "crbug.com/123");
  }

  #[test]
  fn displays_builds_like_log_lines() {
    assert_eq!(Build::new("MOCK Try Mac").with_number(4000).to_string(), "\"MOCK Try Mac\" build 4000");
    assert_eq!(Build::new("linux-rel").to_string(), "\"linux-rel\"");
  }
}
