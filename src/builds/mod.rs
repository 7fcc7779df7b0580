//! Locating the builds whose results feed an update.

pub mod cl;
pub mod resolver;
pub mod rpc;
pub mod spec;

pub use cl::ChangeList;
pub use resolver::{BuildResolver, FixedPrompt, Prompt, TerminalPrompt};
pub use rpc::{Artifact, BuildRpc, BuildStatus, LuciBuildRpc, PrpcClient};
pub use spec::{bug_url, parse_bug, parse_build_specifiers, Build, SpecifierError};
