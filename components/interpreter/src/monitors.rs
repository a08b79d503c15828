//! Monitor operations
//!
//! Entering never blocks the host: a contended enter reports
//! [`Flow::Retry`](crate::dispatch::Flow) and the scheduler comes back to
//! the same instruction later.

use crate::exceptions::Unwind;
use crate::thread::{Thread, ThreadId};
use crate::vm::Vm;
use core_types::{ExceptionKind, Reference, VmError};
use memory_manager::MonitorEnter;
use tracing::trace;

impl Vm {
    /// Try to enter the monitor of `object` on behalf of `thread`
    pub(crate) fn monitor_enter(&mut self, thread: ThreadId, object: Reference) -> Result<MonitorEnter, Unwind> {
        let target = self
            .heap
            .get_mut(object)
            .ok_or(VmError::DanglingReference(object))?;
        match target.monitor.enter(thread) {
            Ok(outcome) => Ok(outcome),
            Err(_) => Err(VmError::MonitorOverflow(object).into()),
        }
    }

    /// Leave one level of the monitor of `object`
    pub(crate) fn monitor_exit(&mut self, thread: ThreadId, object: Reference) -> Result<(), Unwind> {
        let target = self
            .heap
            .get_mut(object)
            .ok_or(VmError::DanglingReference(object))?;
        match target.monitor.exit(thread) {
            Ok(_) => Ok(()),
            Err(_) => Err(self.raise(ExceptionKind::IllegalMonitorState, None)),
        }
    }

    fn check_owner(&mut self, thread: ThreadId, object: Reference) -> Result<(), Unwind> {
        let owned = self
            .heap
            .get(object)
            .ok_or(VmError::DanglingReference(object))?
            .monitor
            .is_owned_by(thread);
        if !owned {
            return Err(self.raise(
                ExceptionKind::IllegalMonitorState,
                Some("current thread not owner".to_string()),
            ));
        }
        Ok(())
    }

    /// `Object.wait`: give up the monitor and park in its wait set.
    ///
    /// The full reentrancy count is saved and restored before the thread
    /// runs again. A zero timeout waits for a notify or an interrupt only.
    pub(crate) fn monitor_wait(
        &mut self,
        thread: &mut Thread,
        object: Reference,
        timeout_ms: u64,
    ) -> Result<(), Unwind> {
        let id = thread.id();
        self.check_owner(id, object)?;
        if std::mem::take(&mut thread.interrupted) {
            return Err(self.raise(ExceptionKind::Interrupted, None));
        }
        let released = self
            .heap
            .get_mut(object)
            .ok_or(VmError::DanglingReference(object))?
            .monitor
            .release_all(id);
        let Ok(count) = released else {
            return Err(self.raise(ExceptionKind::IllegalMonitorState, None));
        };
        let wake_at = (timeout_ms > 0).then(|| self.now_ms().saturating_add(timeout_ms));
        thread.pending_reacquire = Some((object, count));
        self.threads.detach_on(id, wake_at, Some(object));
        trace!(thread = id, %object, count, "waiting on monitor");
        Ok(())
    }

    /// `Object.notify` / `Object.notifyAll`
    pub(crate) fn monitor_notify(&mut self, thread: ThreadId, object: Reference, all: bool) -> Result<(), Unwind> {
        self.check_owner(thread, object)?;
        if all {
            let woken = self.threads.notify_all(object);
            trace!(thread, %object, woken = woken.len(), "notify all");
        } else if let Some(woken) = self.threads.notify_one(object) {
            trace!(thread, %object, woken, "notify");
        }
        Ok(())
    }

    /// Take back a monitor given up by `wait`; false while it is held by
    /// another thread
    pub(crate) fn reacquire(&mut self, thread: ThreadId, object: Reference, count: u16) -> Result<bool, VmError> {
        let target = self
            .heap
            .get_mut(object)
            .ok_or(VmError::DanglingReference(object))?;
        Ok(target.monitor.restore(thread, count))
    }

    /// Free every monitor still owned by a thread that is gone
    pub(crate) fn release_monitors_of(&mut self, thread: ThreadId) {
        for (reference, object) in self.heap.iter_mut() {
            if object.monitor.is_owned_by(thread) {
                let _ = object.monitor.release_all(thread);
                trace!(thread, %reference, "released monitor of finished thread");
            }
        }
    }
}
