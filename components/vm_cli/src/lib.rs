//! VM command-line library
//!
//! Provides the Runtime and supporting modules for the `cldc-vm` binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod config;
pub mod demos;
pub mod error;
pub mod logging;
pub mod runtime;

pub use cli::Cli;
pub use config::RunConfig;
pub use demos::Demo;
pub use error::{CliError, CliResult};
pub use runtime::{RunReport, Runtime};

/// Resolve the configuration for `cli` and run its demo
pub fn run(cli: &Cli) -> CliResult<RunReport> {
    let config = RunConfig::resolve(cli)?;
    Runtime::new(config)?.run_demo(cli.demo)
}
