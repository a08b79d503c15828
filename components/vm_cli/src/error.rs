//! Error types for the CLI

use bytecode_system::AssembleError;
use core_types::VmError;
use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    /// The VM failed
    #[error("VM error: {0}")]
    Vm(#[from] VmError),

    /// A configuration file could not be read
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File that was being read
        path: PathBuf,
        /// Underlying failure
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON for [`RunConfig`](crate::RunConfig)
    #[error("invalid configuration in {}: {source}", path.display())]
    Config {
        /// Offending file
        path: PathBuf,
        /// Parse failure
        source: serde_json::Error,
    },

    /// Guest code could not be assembled
    #[error("cannot assemble demo code: {0}")]
    Assemble(#[from] AssembleError),

    /// Every remaining thread waits and nothing can wake it
    #[error("deadlock: {0} thread(s) wait forever")]
    Deadlock(usize),

    /// The demo ran but produced the wrong result
    #[error("demo '{demo}' failed: {reason}")]
    DemoFailed {
        /// Demo name
        demo: &'static str,
        /// What did not match
        reason: String,
    },
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
