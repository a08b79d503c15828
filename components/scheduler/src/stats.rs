//! Scheduler statistics

use serde::Serialize;

/// Counters kept by a [`Scheduler`](crate::Scheduler)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Bunches run
    pub bunches: u64,
    /// Interpreter steps taken, retries included
    pub steps: u64,
    /// Steps that made no progress (contended monitor, class being
    /// initialized elsewhere)
    pub retries: u64,
    /// Waiting threads moved back by an elapsed timer
    pub wakeups: u64,
    /// Collections run between bunches
    pub collections: u64,
    /// Threads that returned normally
    pub threads_finished: u64,
    /// Threads killed by an uncaught exception
    pub uncaught_exceptions: u64,
    /// Threads ended by a method that could not be linked
    pub link_failures: u64,
}
