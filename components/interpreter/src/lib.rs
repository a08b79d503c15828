//! Bytecode interpreter for the CLDC virtual machine
//!
//! This crate provides the execution core:
//! - Frames, virtual threads and the thread table with its waiting pool
//! - A single-instruction dispatch loop over linked code
//! - Method invocation, native bridges and lazy class initialization
//! - Exception dispatch, propagation and stack traces
//! - Monitors, `wait`/`notify`, sleeping and interrupts
//! - The bootstrap `java.lang` classes and their natives
//!
//! Nothing in here loops over threads. Callers drive execution with
//! [`Vm::step`]; the scheduler crate turns that into time-sliced bunches.
//!
//! # Example
//!
//! ```
//! use bytecode_system::{access, ClassDef, CodeBuilder, Opcode};
//! use core_types::Value;
//! use interpreter::{StepOutcome, ThreadExit, Vm, VmConfig};
//!
//! let mut vm = Vm::new(VmConfig::default()).unwrap();
//! let mut body = CodeBuilder::new(1, 0);
//! body.iconst(7).op(Opcode::Ireturn);
//! let mut def = ClassDef::new("app/Main", Some("java/lang/Object"));
//! def.method("seven", "()I", access::STATIC, body.finish().unwrap());
//! vm.define_class(def).unwrap();
//!
//! let seven = vm.find_method("app/Main", "seven", "()I").unwrap();
//! let thread = vm.spawn(seven, &[]).unwrap();
//! let outcome = loop {
//!     match vm.step(thread).unwrap() {
//!         StepOutcome::Terminated(exit) => break exit,
//!         _ => {}
//!     }
//! };
//! assert_eq!(outcome, ThreadExit::Returned(Some(Value::Int(7))));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arith;
pub mod bootstrap;
pub mod clock;
pub mod config;
mod dispatch;
mod exceptions;
pub mod frame;
mod init;
mod invoke;
mod lang;
mod monitors;
pub mod natives;
pub mod thread;
pub mod threads;
pub mod vm;

// Re-export main types at crate root
pub use bootstrap::{
    CLASS_CLASS, RUNNABLE_CLASS, STRING_CLASS, SYSTEM_CLASS, THREAD_CLASS, THROWABLE_CLASS,
    VECTOR_CLASS,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::VmConfig;
pub use frame::Frame;
pub use lang::VectorData;
pub use natives::{
    int_arg, long_arg, object_arg, ref_arg, NativeError, NativeMethod, NativeRegistry,
    NativeResult,
};
pub use thread::{Thread, ThreadExit, ThreadId};
pub use threads::{ThreadTable, Waiting};
pub use vm::{StepOutcome, Vm};
