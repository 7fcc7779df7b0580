//! Flat, tag-guarded expectation files and the updater that writes them.

pub mod run;
pub mod tagged;
pub mod updater;

pub use run::{update_expectation_files, LegacyRunOptions, LegacySummary};
pub use tagged::{Line, TaggedExpectations, IMPORTER_MARKER};
pub use updater::{ExpectationsUpdater, LegacyOptions, SimpleTestResult, UMBRELLA_BUG};
