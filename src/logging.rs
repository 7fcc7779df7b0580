//! Log output for the command-line tools.
//!
//! Events are written to stderr as bare messages prefixed with their level,
//! without timestamps or targets, so two runs over the same inputs produce
//! the same log.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor `--verbose` says otherwise.
pub const DEFAULT_FILTER: &str = "info";

/// Filter enabled by `--verbose`.
pub const VERBOSE_FILTER: &str = "wptsync=debug,info";

/// `RUST_LOG` wins over `verbose`, which wins over [`DEFAULT_FILTER`].
pub fn filter(verbose: bool) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    EnvFilter::new(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER })
  })
}

/// Install the global subscriber. Later calls are ignored, which keeps
/// tests that share a process from fighting over it.
pub fn init(verbose: bool) {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter(verbose))
    .with_writer(std::io::stderr)
    .with_ansi(false)
    .with_target(false)
    .with_span_events(FmtSpan::NONE)
    .without_time()
    .try_init();
}
