//! Method invocation and return
//!
//! An invoke leaves the caller's instruction pointer on the invoke itself;
//! the matching return pushes the result and moves it past. Arguments are
//! popped into the callee's leading locals, receiver first.

use crate::dispatch::Flow;
use crate::exceptions::Unwind;
use crate::thread::{Thread, ThreadExit};
use crate::vm::Vm;
use bytecode_system::{link, MethodId, Opcode, Operand};
use core_types::{ExceptionKind, LinkErrorKind, Value, VmError};
use memory_manager::MonitorEnter;
use tracing::trace;

/// What the VM needs to know about a call target
struct Callee {
    method: MethodId,
    is_static: bool,
    is_native: bool,
    is_abstract: bool,
    is_synchronized: bool,
    arg_count: usize,
}

impl Vm {
    fn callee(&self, method: MethodId) -> Callee {
        let m = self.registry.method(method);
        Callee {
            method,
            is_static: m.is_static(),
            is_native: m.is_native(),
            is_abstract: m.is_abstract() || (m.code.is_none() && !m.is_native()),
            is_synchronized: m.is_synchronized(),
            arg_count: m.arg_count(),
        }
    }

    /// Execute an `invoke*` instruction
    pub(crate) fn invoke(&mut self, thread: &mut Thread, opcode: Opcode, operand: &Operand) -> Result<Flow, Unwind> {
        let method = match *operand {
            Operand::Method(method) => method,
            Operand::Virtual {
                vptr,
                arg_count,
                resolved,
            } => {
                let depth = (arg_count as usize).saturating_sub(1);
                let receiver = thread.frame_mut()?.peek_ref(depth)?;
                let receiver = self.non_null(receiver)?;
                let class = self
                    .heap
                    .get(receiver)
                    .ok_or(VmError::DanglingReference(receiver))?
                    .class;
                match self.registry.dispatch(class, vptr) {
                    Some(method) => method,
                    None => {
                        let name = self.registry.qualified_name(resolved);
                        return Err(self.raise(ExceptionKind::AbstractMethod, Some(name)));
                    }
                }
            }
            _ => {
                return Err(VmError::UnsupportedOpcode {
                    opcode: opcode.byte(),
                    method: self.registry.qualified_name(thread.frame_mut()?.method()),
                    offset: thread.frame_mut()?.offset(),
                }
                .into())
            }
        };

        let callee = self.callee(method);
        if opcode == Opcode::Invokestatic {
            let class = self.registry.method(method).class;
            if let Some(flow) = self.ensure_initialized(thread, class)? {
                return Ok(flow);
            }
        } else if !callee.is_static {
            let receiver = thread.frame_mut()?.peek_ref(callee.arg_count.saturating_sub(1))?;
            self.non_null(receiver)?;
        }

        if callee.is_native {
            return self.call_native(thread, &callee);
        }
        if callee.is_abstract {
            let name = self.registry.qualified_name(method);
            return Err(self.raise(ExceptionKind::AbstractMethod, Some(name)));
        }
        self.push_call(thread, &callee)
    }

    fn push_call(&mut self, thread: &mut Thread, callee: &Callee) -> Result<Flow, Unwind> {
        if thread.depth() >= self.config().max_call_depth {
            return Err(self.raise(ExceptionKind::StackOverflow, None));
        }
        let code = link(&mut self.registry, callee.method)?;

        let monitor = if callee.is_synchronized {
            let object = if callee.is_static {
                let class = self.registry.method(callee.method).class;
                self.class_mirror(class)?
            } else {
                thread.frame_mut()?.peek_ref(callee.arg_count.saturating_sub(1))?
            };
            match self.monitor_enter(thread.id(), object)? {
                MonitorEnter::Acquired => Some(object),
                MonitorEnter::Contended => return Ok(Flow::Retry),
            }
        } else {
            None
        };

        let mut args = std::mem::take(&mut self.arg_buffer);
        let popped = pop_arguments(thread, callee.arg_count, &mut args);
        let result = popped.and_then(|()| {
            let frame = thread.push_frame(code);
            frame.monitor = monitor;
            frame.set_arguments(&args)
        });
        self.arg_buffer = args;
        result?;
        trace!(
            thread = thread.id(),
            depth = thread.depth(),
            method = callee.method.0,
            "entered method"
        );
        Ok(Flow::Stay)
    }

    fn call_native(&mut self, thread: &mut Thread, callee: &Callee) -> Result<Flow, Unwind> {
        let Some(bridge) = self.natives.get(callee.method) else {
            return Err(self.link_error(callee.method, LinkErrorKind::MissingNative).into());
        };
        let mut args = Vec::with_capacity(callee.arg_count);
        pop_arguments(thread, callee.arg_count, &mut args)?;
        let ip = thread.frame_mut()?.ip;
        match bridge(self, thread, &args) {
            Ok(value) => {
                if let Some(value) = value {
                    thread.frame_mut()?.push(value)?;
                }
                if self.threads.waiting(thread.id()).is_some() {
                    thread.blocked_at = Some(ip);
                }
                Ok(Flow::Next)
            }
            Err(err) => Err(self.native_unwind(err)),
        }
    }

    /// Complete the executing frame with `value`.
    ///
    /// A synchronized method releases its monitor while its frame is still
    /// on the stack, so a failed release is thrown from the callee.
    pub(crate) fn return_from(&mut self, thread: &mut Thread, value: Option<Value>) -> Result<Flow, Unwind> {
        if let Some(monitor) = thread.frame_mut()?.monitor.take() {
            self.monitor_exit(thread.id(), monitor)?;
        }
        thread.pop_frame();
        match thread.frame_mut() {
            Ok(caller) => {
                if let Some(value) = value {
                    caller.push(value)?;
                }
                caller.ip += 1;
            }
            Err(_) => thread.exit = Some(ThreadExit::Returned(value)),
        }
        Ok(Flow::Stay)
    }
}

/// Pop `count` call arguments off the executing frame, receiver first
fn pop_arguments(thread: &mut Thread, count: usize, args: &mut Vec<Value>) -> Result<(), VmError> {
    args.clear();
    let frame = thread.frame_mut()?;
    for _ in 0..count {
        args.push(frame.pop()?);
    }
    args.reverse();
    Ok(())
}
