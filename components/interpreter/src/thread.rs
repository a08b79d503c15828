//! Virtual threads
//!
//! A thread is a stack of frame slots. Slots above the active depth are
//! kept after their frames return so the next call at that depth can reuse
//! their buffers.

use crate::frame::Frame;
use bytecode_system::LinkedCode;
use core_types::{ExceptionKind, LinkError, Reference, StackFrame, Value, VmError};
use std::sync::Arc;

/// Numeric id of a thread; 0 is never handed out
pub type ThreadId = u16;

/// How a thread ended
#[derive(Debug, Clone, PartialEq)]
pub enum ThreadExit {
    /// The bottom frame returned
    Returned(Option<Value>),
    /// An exception reached the bottom of the stack
    Threw {
        /// Internal class name of the exception
        class: String,
        /// Its detail message
        message: Option<String>,
        /// Frames active when it was thrown, innermost first
        trace: Vec<StackFrame>,
    },
    /// A method it called could not be linked
    LinkFailed(LinkError),
}

impl ThreadExit {
    /// Returned value, or the uncaught exception as an error
    pub fn into_result(self) -> Result<Option<Value>, VmError> {
        match self {
            ThreadExit::Returned(value) => Ok(value),
            ThreadExit::Threw {
                class,
                message,
                trace,
            } => Err(VmError::UncaughtException {
                class,
                message,
                trace,
            }),
            ThreadExit::LinkFailed(err) => Err(VmError::Link(err)),
        }
    }

    /// Check if the thread died with an exception
    pub fn is_uncaught(&self) -> bool {
        matches!(self, ThreadExit::Threw { .. })
    }
}

/// A virtual thread
#[derive(Debug)]
pub struct Thread {
    id: ThreadId,
    object: Reference,
    slots: Vec<Frame>,
    depth: usize,
    /// Monitor and count to reacquire before running again (after `wait`)
    pub(crate) pending_reacquire: Option<(Reference, u16)>,
    /// Exception to raise as soon as the thread runs again
    pub(crate) pending_exception: Option<ExceptionKind>,
    /// Instruction index of the native invoke that put the thread to
    /// wait; a pending exception is raised there
    pub(crate) blocked_at: Option<usize>,
    /// Interrupt flag (`Thread.interrupt`)
    pub(crate) interrupted: bool,
    pub(crate) exit: Option<ThreadExit>,
}

impl Thread {
    /// Empty thread; `object` is its `java/lang/Thread` instance or null
    /// for a synthetic thread
    pub fn new(id: ThreadId, object: Reference) -> Self {
        Thread {
            id,
            object,
            slots: Vec::new(),
            depth: 0,
            pending_reacquire: None,
            pending_exception: None,
            blocked_at: None,
            interrupted: false,
            exit: None,
        }
    }

    /// Thread id
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// The guest `Thread` object, null for synthetic threads
    pub fn object(&self) -> Reference {
        self.object
    }

    pub(crate) fn set_object(&mut self, object: Reference) {
        self.object = object;
    }

    /// Number of active frames
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Check if the last frame has been popped
    pub fn is_finished(&self) -> bool {
        self.depth == 0
    }

    /// How the thread ended, once it has
    pub fn exit(&self) -> Option<&ThreadExit> {
        self.exit.as_ref()
    }

    /// Active frames, bottom first
    pub fn frames(&self) -> &[Frame] {
        &self.slots[..self.depth]
    }

    /// The executing frame
    pub fn frame(&self) -> Option<&Frame> {
        self.depth.checked_sub(1).map(|top| &self.slots[top])
    }

    /// The executing frame, mutably
    pub fn frame_mut(&mut self) -> Result<&mut Frame, VmError> {
        let top = self.depth.checked_sub(1).ok_or(VmError::StackUnderflow)?;
        Ok(&mut self.slots[top])
    }

    /// The frame below the executing one
    pub fn caller_mut(&mut self) -> Option<&mut Frame> {
        let index = self.depth.checked_sub(2)?;
        Some(&mut self.slots[index])
    }

    /// Activate a frame for `code`, reusing a recycled slot when one exists
    pub fn push_frame(&mut self, code: Arc<LinkedCode>) -> &mut Frame {
        if self.depth < self.slots.len() {
            self.slots[self.depth].reinitialize(code);
        } else {
            self.slots.push(Frame::new(code));
        }
        self.depth += 1;
        &mut self.slots[self.depth - 1]
    }

    /// Deactivate the executing frame; its slot stays for reuse.
    /// Returns the monitor it held, if any.
    pub fn pop_frame(&mut self) -> Option<Reference> {
        let top = self.depth.checked_sub(1)?;
        self.depth = top;
        self.slots[top].monitor.take()
    }

    /// Every reference this thread keeps alive
    pub fn references(&self) -> impl Iterator<Item = Reference> + '_ {
        self.frames()
            .iter()
            .flat_map(Frame::references)
            .chain(std::iter::once(self.object))
            .chain(self.pending_reacquire.map(|(monitor, _)| monitor))
            .filter(|r| !r.is_null())
    }
}
