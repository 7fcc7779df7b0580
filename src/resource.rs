//! Resource fetching abstraction
//!
//! Artifacts (reports, actual outputs) are fetched through the
//! [`ResourceFetcher`] trait so that the pipeline can be driven from the
//! network, from local files, or from in-memory fakes in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use wptsync::resource::{HttpFetcher, ResourceFetcher};
//!
//! let fetcher = HttpFetcher::new();
//! let artifact = fetcher.fetch("https://results.usercontent.cr.dev/a-actual.txt")?;
//! println!("Got {} bytes", artifact.bytes.len());
//! ```

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

/// Default User-Agent string used by HTTP fetchers
pub const DEFAULT_USER_AGENT: &str = "wptsync/0.1";

// ============================================================================
// Core types
// ============================================================================

/// Result of fetching a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
  pub bytes: Vec<u8>,
  pub content_type: Option<String>,
}

impl FetchedResource {
  pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
    Self {
      bytes,
      content_type,
    }
  }

  /// Interpret the body as UTF-8 text.
  pub fn text(&self, url: &str) -> Result<String> {
    String::from_utf8(self.bytes.clone()).map_err(|e| Error::Fetch {
      url: url.to_string(),
      reason: e.to_string(),
    })
  }
}

/// Fetches bytes by URL
///
/// Supported URL forms:
/// - `http://` and `https://`
/// - `file://`
/// - bare filesystem paths
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so a single fetcher can be shared by
/// a worker pool.
pub trait ResourceFetcher: Send + Sync {
  fn fetch(&self, url: &str) -> Result<FetchedResource>;
}

// Allow Arc<dyn ResourceFetcher> to be used as ResourceFetcher
impl<T: ResourceFetcher + ?Sized> ResourceFetcher for Arc<T> {
  fn fetch(&self, url: &str) -> Result<FetchedResource> {
    (**self).fetch(url)
  }
}

// ============================================================================
// HttpFetcher - Default implementation
// ============================================================================

/// Default resource fetcher
///
/// # Example
///
/// ```rust,ignore
/// use wptsync::resource::HttpFetcher;
/// use std::time::Duration;
///
/// let fetcher = HttpFetcher::new().with_timeout(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct HttpFetcher {
  timeout: Duration,
  user_agent: String,
  max_size: usize,
}

impl HttpFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the request timeout
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
    self.user_agent = user_agent.into();
    self
  }

  /// Set the maximum response size in bytes
  pub fn with_max_size(mut self, max_size: usize) -> Self {
    self.max_size = max_size;
    self
  }

  fn fetch_http(&self, url: &str) -> Result<FetchedResource> {
    let config = ureq::Agent::config_builder()
      .timeout_global(Some(self.timeout))
      .build();
    let agent: ureq::Agent = config.into();
    let fail = |reason: String| Error::Fetch {
      url: url.to_string(),
      reason,
    };

    let mut response = agent
      .get(url)
      .header("User-Agent", &self.user_agent)
      .call()
      .map_err(|e| fail(e.to_string()))?;
    let content_type = response
      .headers()
      .get("content-type")
      .and_then(|h| h.to_str().ok())
      .map(|s| s.to_string());
    let bytes = response
      .body_mut()
      .with_config()
      .limit(self.max_size as u64)
      .read_to_vec()
      .map_err(|e| fail(e.to_string()))?;
    Ok(FetchedResource::new(bytes, content_type))
  }

  fn fetch_file(&self, url: &str) -> Result<FetchedResource> {
    let path = match Url::parse(url) {
      Ok(parsed) if parsed.scheme() == "file" => parsed
        .to_file_path()
        .map_err(|_| Error::Fetch {
          url: url.to_string(),
          reason: "not a local path".to_string(),
        })?,
      _ => url.strip_prefix("file://").unwrap_or(url).into(),
    };
    let mut bytes = Vec::new();
    std::fs::File::open(&path)
      .and_then(|file| file.take(self.max_size as u64).read_to_end(&mut bytes))
      .map_err(|e| Error::Fetch {
        url: url.to_string(),
        reason: e.to_string(),
      })?;
    Ok(FetchedResource::new(bytes, None))
  }
}

impl Default for HttpFetcher {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(60),
      user_agent: DEFAULT_USER_AGENT.to_string(),
      max_size: 512 * 1024 * 1024,
    }
  }
}

impl ResourceFetcher for HttpFetcher {
  fn fetch(&self, url: &str) -> Result<FetchedResource> {
    if url.starts_with("http://") || url.starts_with("https://") {
      self.fetch_http(url)
    } else {
      // file:// URLs and bare paths
      self.fetch_file(url)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  #[test]
  fn fetches_local_files_by_path_and_url() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a-actual.txt");
    fs::write(&path, b"hello").unwrap();
    let fetcher = HttpFetcher::new();

    let by_path = fetcher.fetch(path.to_str().unwrap()).unwrap();
    assert_eq!(by_path.bytes, b"hello");
    let url = Url::from_file_path(&path).unwrap();
    let by_url = fetcher.fetch(url.as_str()).unwrap();
    assert_eq!(by_url.text(url.as_str()).unwrap(), "hello");
  }

  #[test]
  fn missing_files_are_fetch_errors() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.txt");
    let err = HttpFetcher::new().fetch(missing.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, Error::Fetch { .. }));
  }

  #[test]
  fn arc_fetchers_delegate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("x");
    fs::write(&path, b"x").unwrap();
    let shared: Arc<dyn ResourceFetcher> = Arc::new(HttpFetcher::new().with_max_size(16));
    assert_eq!(shared.fetch(path.to_str().unwrap()).unwrap().bytes, b"x");
  }
}
