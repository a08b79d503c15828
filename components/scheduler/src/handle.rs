//! Host-thread access to a running scheduler
//!
//! The VM itself is single-threaded. An unrelated host thread (a UI or
//! network thread) talks to it only by queueing [`Command`]s, which the
//! scheduler drains between bunches.

use crate::stats::SchedulerStats;
use crossbeam::channel::Sender;
use interpreter::ThreadId;
use parking_lot::Mutex;
use std::sync::Arc;

/// A request from outside the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Move a waiting thread back to the runnable list
    Attach(ThreadId),
    /// Collect garbage before the next bunch
    RequestGc,
    /// Leave the run loop after the current bunch
    Stop,
}

/// Cloneable, `Send` handle to a [`Scheduler`](crate::Scheduler)
///
/// Every method returns false once the scheduler has been dropped.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: Sender<Command>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl SchedulerHandle {
    pub(crate) fn new(commands: Sender<Command>, stats: Arc<Mutex<SchedulerStats>>) -> Self {
        Self { commands, stats }
    }

    /// Ask for thread `id` to be attached
    pub fn attach(&self, id: ThreadId) -> bool {
        self.send(Command::Attach(id))
    }

    /// Ask for a garbage collection
    pub fn request_gc(&self) -> bool {
        self.send(Command::RequestGc)
    }

    /// Ask the run loop to return
    pub fn stop(&self) -> bool {
        self.send(Command::Stop)
    }

    /// Snapshot of the scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        *self.stats.lock()
    }

    fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }
}
