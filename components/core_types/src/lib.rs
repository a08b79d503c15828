//! Core value types and error tiers for the bytecode VM.
//!
//! This crate provides the foundational types shared by every other
//! component: the tagged operand representation, heap references and the
//! three tiers of failure (link errors, fatal VM errors, guest exceptions).
//!
//! # Overview
//!
//! - [`Value`] - Tagged representation of operand stack and field values
//! - [`ValueTag`] - Primitive kind recorded next to every stack slot
//! - [`Reference`] - Opaque heap handle, `0` is null
//! - [`LinkError`] - Unresolvable symbolic reference in a method body
//! - [`VmError`] - Host-level defect, fatal to the whole VM
//! - [`ExceptionKind`] - Guest exceptions raised by the interpreter itself
//! - [`StackFrame`] - One line of a guest stack trace
//!
//! # Examples
//!
//! ```
//! use core_types::{Reference, Value, ValueTag};
//!
//! let v = Value::Long(-7);
//! assert_eq!(v.tag(), ValueTag::Long);
//! assert_eq!(Value::from_bits(v.tag(), v.to_bits()), v);
//!
//! assert!(Value::NULL.as_reference().unwrap().is_null());
//! assert!(!Reference::new(3).is_null());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod trace;
mod value;

pub use error::{ExceptionKind, LinkError, LinkErrorKind, VmError};
pub use trace::StackFrame;
pub use value::{Reference, Value, ValueTag};
