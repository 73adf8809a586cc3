//! CLI adapters that shell out to a locally installed model client.

mod process;
mod provider;
mod transcript;

pub use provider::{CliKind, DEFAULT_CLI_TIMEOUT, SubprocessProvider};
