pub mod baseline;
pub mod builds;
pub mod config;
pub mod error;
pub mod expectations;
pub mod git;
pub mod logging;
pub mod manifest;
pub mod metadata;
pub mod orchestrator;
pub mod resource;
pub mod results;
pub mod status;
pub mod update;

pub use error::{Error, Result};
pub use orchestrator::{CancelToken, Orchestrator, RunOptions, RunSummary, Services};
pub use status::Status;
