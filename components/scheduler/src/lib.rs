//! Cooperative thread scheduler for the bytecode VM.
//!
//! This crate multiplexes the virtual threads of an [`interpreter::Vm`]
//! over the single host thread that owns it:
//! - [`Scheduler`] - bunch loop, wakeups, deferred collection
//! - [`Pacer`] - the three pacing strategies ([`Pacing`])
//! - [`SchedulerHandle`] - commands from other host threads
//!
//! # Examples
//!
//! ```
//! use interpreter::{Vm, VmConfig};
//! use scheduler::{Pacing, RunExit, Scheduler, SchedulerConfig};
//!
//! let config = SchedulerConfig {
//!     pacing: Pacing::Sleep,
//!     bunch_budget_ms: 1,
//!     ..SchedulerConfig::default()
//! };
//! let mut scheduler = Scheduler::new(Vm::new(VmConfig::default()).unwrap(), config);
//!
//! // no threads, nothing to do
//! assert_eq!(scheduler.run_loop().unwrap(), RunExit::Finished);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod handle;
pub mod pacing;
#[allow(clippy::module_inception)]
pub mod scheduler;
pub mod stats;

pub use config::{Pacing, ParsePacingError, SchedulerConfig};
pub use handle::{Command, SchedulerHandle};
pub use pacing::Pacer;
pub use scheduler::{BunchReport, RunExit, Scheduler};
pub use stats::SchedulerStats;
