//! Parallel baseline download with a URL-keyed cache.
//!
//! Tasks sharing a source URL are grouped and handled by one worker, so each
//! URL is requested at most once; the cache also spans successive runs of
//! the same fetcher.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rayon::ThreadPoolBuilder;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::orchestrator::CancelToken;
use crate::resource::ResourceFetcher;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskSource {
  Url(String),
  /// An actual output in a local results directory. An unreadable file
  /// means there is nothing to write.
  File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DownloadTask {
  pub test: String,
  pub suffix: String,
  pub port_name: String,
  pub dest: PathBuf,
  pub source: TaskSource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub hit_count: usize,
  pub hit_bytes: usize,
  pub total_count: usize,
  pub total_bytes: usize,
}

#[derive(Debug, Default)]
pub struct BaselineCache {
  entries: Mutex<HashMap<String, Arc<Vec<u8>>>>,
  stats: Mutex<CacheStats>,
}

impl BaselineCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Bytes for `url`, fetching them on first use.
  pub fn get_or_fetch(&self, url: &str, fetcher: &dyn ResourceFetcher) -> Result<Arc<Vec<u8>>> {
    let cached = self.entries.lock().ok().and_then(|e| e.get(url).cloned());
    let (bytes, hit) = match cached {
      Some(bytes) => (bytes, true),
      None => {
        let bytes = Arc::new(fetcher.fetch(url)?.bytes);
        if let Ok(mut entries) = self.entries.lock() {
          entries.insert(url.to_string(), Arc::clone(&bytes));
        }
        (bytes, false)
      }
    };
    if let Ok(mut stats) = self.stats.lock() {
      stats.total_count += 1;
      stats.total_bytes += bytes.len();
      if hit {
        stats.hit_count += 1;
        stats.hit_bytes += bytes.len();
      }
    }
    Ok(bytes)
  }

  pub fn stats(&self) -> CacheStats {
    self.stats.lock().map(|s| *s).unwrap_or_default()
  }
}

/// What a fetch run did.
#[derive(Debug, Default)]
pub struct FetchSummary {
  /// Destinations written, sorted.
  pub written: Vec<PathBuf>,
  /// Tasks whose local source was missing.
  pub skipped: Vec<DownloadTask>,
  pub failures: Vec<(DownloadTask, Error)>,
}

pub struct BaselineFetcher {
  fetcher: Arc<dyn ResourceFetcher>,
  cache: Arc<BaselineCache>,
  workers: usize,
  cancel: CancelToken,
}

impl BaselineFetcher {
  pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
    Self {
      fetcher,
      cache: Arc::new(BaselineCache::new()),
      workers: num_cpus::get(),
      cancel: CancelToken::new(),
    }
  }

  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers.max(1);
    self
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cache_stats(&self) -> CacheStats {
    self.cache.stats()
  }

  /// Run every task. Failures of single tasks are collected; cancellation
  /// stops tasks that have not started and surfaces as [`Error::Cancelled`]
  /// once the pool has drained.
  pub fn run(&self, tasks: Vec<DownloadTask>) -> Result<FetchSummary> {
    let mut groups: BTreeMap<TaskSource, Vec<DownloadTask>> = BTreeMap::new();
    for task in tasks {
      groups.entry(task.source.clone()).or_default().push(task);
    }

    let summary = Mutex::new(FetchSummary::default());
    let pool = ThreadPoolBuilder::new()
      .num_threads(self.workers)
      .build()
      .map_err(|e| Error::UpdateAbort(format!("failed to create thread pool: {e}")))?;

    pool.scope(|s| {
      for (source, group) in &groups {
        let summary = &summary;
        s.spawn(move |_| {
          for task in group {
            if self.cancel.is_cancelled() {
              return;
            }
            let outcome = self.run_one(source, task);
            let Ok(mut summary) = summary.lock() else {
              return;
            };
            match outcome {
              Ok(true) => summary.written.push(task.dest.clone()),
              Ok(false) => summary.skipped.push(task.clone()),
              Err(err) => {
                error!("Failed to fetch baseline for {} ({}): {err}", task.test, task.port_name);
                summary.failures.push((task.clone(), err));
              }
            }
          }
        });
      }
    });

    let mut summary = summary
      .into_inner()
      .map_err(|_| Error::UpdateAbort("baseline fetch worker panicked".to_string()))?;
    if self.cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    summary.written.sort();
    summary.skipped.sort();
    summary.failures.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(summary)
  }

  fn run_one(&self, source: &TaskSource, task: &DownloadTask) -> Result<bool> {
    let bytes = match source {
      TaskSource::Url(url) => self.cache.get_or_fetch(url, &*self.fetcher)?,
      TaskSource::File(path) => match std::fs::read(path) {
        Ok(bytes) => Arc::new(bytes),
        Err(err) => {
          debug!("No actual output at {}: {err}", path.display());
          return Ok(false);
        }
      },
    };
    if let Some(parent) = task.dest.parent() {
      std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    std::fs::write(&task.dest, bytes.as_slice()).map_err(|e| Error::io(&task.dest, e))?;
    debug!("Wrote {} ({} bytes)", task.dest.display(), bytes.len());
    Ok(true)
  }
}
