//! Guest exceptions
//!
//! Raising allocates a throwable of a bootstrap class. Unwinding searches
//! the exception table of each frame from the top of the stack down; frames
//! without a matching handler are popped, releasing the monitor of a
//! synchronized method. When the stack runs out the thread ends with
//! [`ThreadExit::Threw`] and the trace captured at the throw site. A link
//! failure unwinds the same way but cannot be caught.

use crate::natives::NativeError;
use crate::thread::{Thread, ThreadExit};
use crate::vm::{StepOutcome, Vm};
use bytecode_system::{InitState, CLINIT};
use core_types::{ExceptionKind, LinkError, Reference, StackFrame, Value, VmError};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// How an instruction left the normal path
#[derive(Debug)]
pub(crate) enum Unwind {
    /// A guest exception object is propagating
    Throw(Reference),
    /// The VM cannot continue
    Fatal(VmError),
}

impl From<VmError> for Unwind {
    fn from(err: VmError) -> Self {
        Unwind::Fatal(err)
    }
}

impl From<LinkError> for Unwind {
    fn from(err: LinkError) -> Self {
        Unwind::Fatal(err.into())
    }
}

impl Vm {
    /// Allocate a throwable of class `class_name` with an optional detail
    /// message. No constructor runs.
    pub fn new_exception(&mut self, class_name: &str, message: Option<&str>) -> Result<Reference, VmError> {
        let class = self.lookup_class(class_name)?;
        let exception = self.new_instance(class)?;
        if let Some(text) = message {
            let text = self.new_string(text)?;
            let slot = self.known.detail_message as usize;
            if let Some(object) = self.heap.get_mut(exception) {
                object.fields[slot] = Value::Reference(text);
            }
        }
        Ok(exception)
    }

    /// Build the exception for `kind`, ready to unwind
    pub(crate) fn raise(&mut self, kind: ExceptionKind, message: Option<String>) -> Unwind {
        self.throw_new(kind.class_name(), message)
    }

    pub(crate) fn throw_new(&mut self, class_name: &str, message: Option<String>) -> Unwind {
        match self.new_exception(class_name, message.as_deref()) {
            Ok(exception) => Unwind::Throw(exception),
            Err(err) => Unwind::Fatal(err),
        }
    }

    pub(crate) fn native_unwind(&mut self, err: NativeError) -> Unwind {
        match err {
            NativeError::Throw(kind, message) => self.raise(kind, message),
            NativeError::ThrowNew(class, message) => self.throw_new(class, message),
            NativeError::ThrowObject(exception) if exception.is_null() => {
                self.raise(ExceptionKind::NullPointer, None)
            }
            NativeError::ThrowObject(exception) => Unwind::Throw(exception),
            NativeError::Fatal(err) => Unwind::Fatal(err),
        }
    }

    /// Frames of `thread`, innermost first
    pub(crate) fn stack_trace(&self, thread: &Thread) -> Vec<StackFrame> {
        thread
            .frames()
            .iter()
            .rev()
            .map(|frame| {
                let method = self.registry.method(frame.method());
                let offset = frame.offset();
                StackFrame {
                    class_name: self.registry.class(method.class).name.clone(),
                    method_name: method.name.clone(),
                    descriptor: method.descriptor.clone(),
                    offset,
                    line: frame.code().line_for(offset),
                }
            })
            .collect()
    }

    /// Transfer control to the nearest handler for `exception`
    pub(crate) fn unwind(&mut self, thread: &mut Thread, exception: Reference) -> Result<StepOutcome, VmError> {
        let class = self
            .heap
            .get(exception)
            .ok_or(VmError::DanglingReference(exception))?
            .class;
        let mut trace = None;

        while let Some(frame) = thread.frame() {
            let offset = frame.offset();
            let code = Arc::clone(frame.code());
            let handler = code.handlers.iter().find(|h| {
                h.covers(offset)
                    && h.catch_type
                        .map_or(true, |catch| self.registry.is_assignable(class, catch))
            });
            if let Some(handler) = handler {
                let frame = thread.frame_mut()?;
                frame.clear_stack();
                frame.push(Value::Reference(exception))?;
                frame.ip = handler.handler;
                return Ok(StepOutcome::Executed);
            }
            if trace.is_none() {
                trace = Some(self.stack_trace(thread));
            }
            self.pop_frame_abruptly(thread);
        }

        let trace = trace.unwrap_or_default();
        let class = self.registry.class(class).name.clone();
        let message = self.exception_message(exception);
        error!(
            thread = thread.id(),
            exception = %class,
            message = message.as_deref().unwrap_or(""),
            "uncaught exception"
        );
        for frame in &trace {
            error!(thread = thread.id(), "    {}", frame);
        }
        thread.exit = Some(ThreadExit::Threw {
            class,
            message,
            trace,
        });
        Ok(StepOutcome::Executed)
    }

    /// End `thread` because a method it called could not be linked. Its
    /// frames are popped as if by an uncaught exception.
    pub(crate) fn fail_link(&mut self, thread: &mut Thread, err: LinkError) {
        let trace = self.stack_trace(thread);
        error!(thread = thread.id(), error = %err, "link failure ended thread");
        for frame in &trace {
            error!(thread = thread.id(), "    {}", frame);
        }
        while thread.frame().is_some() {
            self.pop_frame_abruptly(thread);
        }
        thread.exit = Some(ThreadExit::LinkFailed(err));
    }

    /// Pop a frame that completed with an exception
    fn pop_frame_abruptly(&mut self, thread: &mut Thread) {
        let method = match thread.frame() {
            Some(frame) => frame.method(),
            None => return,
        };
        if let Some(monitor) = thread.pop_frame() {
            if let Some(object) = self.heap.get_mut(monitor) {
                if object.monitor.exit(thread.id()).is_err() {
                    warn!(thread = thread.id(), %monitor, "unwound frame did not own its monitor");
                }
            }
        }
        let method = self.registry.method(method);
        if method.name == CLINIT {
            let class = method.class;
            if self.registry.class(class).init == InitState::InProgress(thread.id()) {
                debug!(class = %self.registry.class(class).name, "static initializer failed");
                self.registry.class_mut(class).init = InitState::Failed;
            }
        }
    }

    /// Check `reference` for null before dereferencing it
    pub(crate) fn non_null(&mut self, reference: Reference) -> Result<Reference, Unwind> {
        if reference.is_null() {
            return Err(self.raise(ExceptionKind::NullPointer, None));
        }
        Ok(reference)
    }

    /// `NoClassDefFoundError` for a class whose initializer failed
    pub(crate) fn no_class_def(&mut self, name: String) -> Unwind {
        self.raise(ExceptionKind::NoClassDefFound, Some(name))
    }
}
