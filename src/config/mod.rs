//! Configuration space: builders, ports and the run-info bags tests run under.

pub mod builders;
pub mod configurations;
pub mod port;
pub mod run_info;

pub use builders::{BuilderConfig, BuilderList, StepConfig};
pub use configurations::{is_enabled_value, TestConfigurations, VirtualSuite, ENABLED_OVERRIDE};
pub use port::{PlatformTable, Port, PortHandle};
pub use run_info::{PropValue, RunInfo, UpdateProperties};
