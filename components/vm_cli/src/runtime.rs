//! Runtime orchestration for demo execution
//!
//! The Runtime owns a [`Scheduler`] (and through it the [`Vm`]), installs
//! a demo, drives the run loop and checks the result.

use crate::config::RunConfig;
use crate::demos::Demo;
use crate::error::{CliError, CliResult};
use interpreter::Vm;
use memory_manager::GcStats;
use scheduler::{RunExit, Scheduler, SchedulerStats};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::info;

/// Outcome of one demo run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The demo that ran
    pub demo: Demo,
    /// Why the run loop returned
    pub exit: RunExit,
    /// Demo-specific result line
    pub summary: String,
    /// Scheduler counters
    pub scheduler: SchedulerStats,
    /// Collector counters
    pub gc: GcStats,
    /// Wall-clock time of the run loop
    pub elapsed: Duration,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", self.demo.name(), self.summary)?;
        writeln!(
            f,
            "  scheduler: {} bunches, {} steps, {} retries, {} wakeups, {} finished, {} uncaught, {} link failures",
            self.scheduler.bunches,
            self.scheduler.steps,
            self.scheduler.retries,
            self.scheduler.wakeups,
            self.scheduler.threads_finished,
            self.scheduler.uncaught_exceptions,
            self.scheduler.link_failures
        )?;
        writeln!(
            f,
            "  heap: {} collections, {} allocated, {} freed, {} live",
            self.gc.collections, self.gc.allocations, self.gc.total_freed, self.gc.live_objects
        )?;
        write!(f, "  time: {:.1?}", self.elapsed)
    }
}

/// Runs demos under one configuration
#[derive(Debug)]
pub struct Runtime {
    config: RunConfig,
    scheduler: Scheduler,
}

impl Runtime {
    /// Create a fresh VM and scheduler for `config`
    ///
    /// # Example
    /// ```
    /// use vm_cli::{Demo, RunConfig, Runtime};
    ///
    /// let mut runtime = Runtime::new(RunConfig::default()).unwrap();
    /// let report = runtime.run_demo(Demo::Counter).unwrap();
    /// assert_eq!(report.summary, "count = 2000");
    /// ```
    pub fn new(config: RunConfig) -> CliResult<Self> {
        let vm = Vm::new(config.vm)?;
        Ok(Self {
            config,
            scheduler: Scheduler::new(vm, config.scheduler),
        })
    }

    /// The active configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// The scheduler driving the VM
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Install `demo`, run until every thread is done and verify the
    /// result
    pub fn run_demo(&mut self, demo: Demo) -> CliResult<RunReport> {
        let check = demo.install(&mut self.scheduler, self.config.threads)?;
        info!(
            demo = demo.name(),
            threads = self.config.threads,
            pacing = %self.config.scheduler.pacing,
            "running demo"
        );

        let started = Instant::now();
        let exit = self.scheduler.run_loop()?;
        let elapsed = started.elapsed();
        if exit == RunExit::Deadlocked {
            return Err(CliError::Deadlock(self.scheduler.vm().threads().len()));
        }

        let summary = check.verify(demo, &self.scheduler)?;
        Ok(RunReport {
            demo,
            exit,
            summary,
            scheduler: self.scheduler.stats(),
            gc: self.scheduler.vm().gc_stats(),
            elapsed,
        })
    }
}
