//! Class initialization
//!
//! The first active use of a class runs its `<clinit>` as an ordinary frame
//! pushed on the triggering thread, most distant superclass first. The
//! triggering instruction is not advanced, so once the initializer returns
//! (through `ReturnInPlace`) the same instruction executes again and finds
//! the class ready. Another thread touching a class mid-initialization
//! retries until the owner finishes.

use crate::dispatch::Flow;
use crate::exceptions::Unwind;
use crate::thread::Thread;
use crate::vm::Vm;
use bytecode_system::{link, ClassId, InitState};
use core_types::ExceptionKind;
use tracing::debug;

impl Vm {
    /// Make sure `class` may be used by `thread`.
    ///
    /// Returns `None` when execution can proceed, or the flow to apply
    /// instead (an initializer frame was pushed, or another thread holds
    /// the initialization).
    pub(crate) fn ensure_initialized(
        &mut self,
        thread: &mut Thread,
        class: ClassId,
    ) -> Result<Option<Flow>, Unwind> {
        if self.registry.class(class).init == InitState::Initialized {
            return Ok(None);
        }

        let me = thread.id();
        let mut pending = None;
        let mut current = Some(class);
        while let Some(id) = current {
            let runtime = self.registry.class(id);
            match runtime.init {
                InitState::Initialized => break,
                InitState::InProgress(owner) if owner == me => {}
                InitState::InProgress(_) => return Ok(Some(Flow::Retry)),
                InitState::Failed => {
                    let name = runtime.name.clone();
                    return Err(self.no_class_def(name));
                }
                InitState::Uninitialized => pending = Some(id),
            }
            current = runtime.super_class;
        }

        match pending {
            Some(target) => self.start_initializer(thread, target).map(Some),
            None => Ok(None),
        }
    }

    fn start_initializer(&mut self, thread: &mut Thread, class: ClassId) -> Result<Flow, Unwind> {
        let Some(clinit) = self.registry.class(class).clinit else {
            self.registry.class_mut(class).init = InitState::Initialized;
            return Ok(Flow::Stay);
        };
        if thread.depth() >= self.config().max_call_depth {
            return Err(self.raise(ExceptionKind::StackOverflow, None));
        }
        let code = link(&mut self.registry, clinit)?;
        self.registry.class_mut(class).init = InitState::InProgress(thread.id());
        debug!(
            thread = thread.id(),
            class = %self.registry.class(class).name,
            "running static initializer"
        );
        thread.push_frame(code);
        Ok(Flow::Stay)
    }

    /// `<clinit>` of the executing frame returned normally
    pub(crate) fn finish_initializer(&mut self, thread: &mut Thread) -> Result<Flow, Unwind> {
        let method = thread.frame_mut()?.method();
        thread.pop_frame();
        let class = self.registry.method(method).class;
        self.registry.class_mut(class).init = InitState::Initialized;
        debug!(
            thread = thread.id(),
            class = %self.registry.class(class).name,
            "class initialized"
        );
        Ok(Flow::Stay)
    }
}
