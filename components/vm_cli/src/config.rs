//! Run configuration: an optional JSON file with command-line overrides

use crate::cli::Cli;
use crate::error::{CliError, CliResult};
use interpreter::VmConfig;
use scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Worker threads per demo when nothing else is configured
pub const DEFAULT_THREADS: usize = 2;

/// Everything a run needs
///
/// ```json
/// {
///   "threads": 4,
///   "vm": { "gc_threshold": 1024 },
///   "scheduler": { "pacing": "sleep", "bunch_budget_ms": 16 }
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Worker threads started by the demo
    pub threads: usize,
    /// Interpreter settings
    pub vm: VmConfig,
    /// Scheduler settings
    pub scheduler: SchedulerConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            vm: VmConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load a JSON configuration file
    pub fn from_file(path: &Path) -> CliResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| CliError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The file named by `--config` (or the defaults), with the other
    /// flags applied on top
    pub fn resolve(cli: &Cli) -> CliResult<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(pacing) = cli.pacing {
            config.scheduler.pacing = pacing;
        }
        if let Some(bunch_size) = cli.bunch_size {
            config.scheduler.bunch_size = bunch_size;
        }
        if let Some(budget) = cli.budget_ms {
            config.scheduler.bunch_budget_ms = budget;
        }
        if let Some(threads) = cli.threads {
            config.threads = threads;
        }
        config.threads = config.threads.max(1);
        Ok(config)
    }
}
