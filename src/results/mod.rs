//! Observed test results: wptreport parsing and per-test aggregation.

pub mod report;
pub mod store;

pub use report::{parse_reports, read_reports, SubtestResult, TestResult, WptReport};
pub use store::{Observation, ResultStore, StoreOptions, TestResults};
