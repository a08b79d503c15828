//! Host-implemented methods
//!
//! A native bridge receives the VM, the calling thread and the popped
//! arguments (receiver first). It never gets a frame of its own: whatever it
//! returns is pushed straight onto the caller's operand stack.

use crate::thread::Thread;
use crate::vm::Vm;
use bytecode_system::MethodId;
use core_types::{ExceptionKind, Reference, Value, VmError};
use std::collections::HashMap;
use thiserror::Error;

/// Failure of a native bridge
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NativeError {
    /// Raise a guest exception of the given kind
    #[error("{}", .0.class_name())]
    Throw(ExceptionKind, Option<String>),
    /// Raise a guest exception of a bootstrap class by name
    #[error("{0}")]
    ThrowNew(&'static str, Option<String>),
    /// Rethrow an existing exception object
    #[error("exception object {0}")]
    ThrowObject(Reference),
    /// Host-level failure
    #[error(transparent)]
    Fatal(#[from] VmError),
}

/// What a native returns: the value to push, if the method is not `void`
pub type NativeResult = Result<Option<Value>, NativeError>;

/// A native bridge
pub type NativeMethod = fn(&mut Vm, &mut Thread, &[Value]) -> NativeResult;

/// Bridges bound to methods
#[derive(Debug, Default, Clone)]
pub struct NativeRegistry {
    bindings: HashMap<MethodId, NativeMethod>,
}

impl NativeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `bridge` to `method`, replacing any earlier binding
    pub fn bind(&mut self, method: MethodId, bridge: NativeMethod) {
        self.bindings.insert(method, bridge);
    }

    /// Bridge bound to `method`
    pub fn get(&self, method: MethodId) -> Option<NativeMethod> {
        self.bindings.get(&method).copied()
    }

    /// Number of bound methods
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if nothing is bound
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Argument `index` as an `int`
pub fn int_arg(args: &[Value], index: usize) -> Result<i32, NativeError> {
    match args.get(index) {
        Some(Value::Int(v)) => Ok(*v),
        Some(other) => Err(VmError::TagMismatch {
            expected: core_types::ValueTag::Int,
            found: other.tag(),
        }
        .into()),
        None => Err(VmError::StackUnderflow.into()),
    }
}

/// Argument `index` as a `long`
pub fn long_arg(args: &[Value], index: usize) -> Result<i64, NativeError> {
    match args.get(index) {
        Some(Value::Long(v)) => Ok(*v),
        Some(other) => Err(VmError::TagMismatch {
            expected: core_types::ValueTag::Long,
            found: other.tag(),
        }
        .into()),
        None => Err(VmError::StackUnderflow.into()),
    }
}

/// Argument `index` as a reference, possibly null
pub fn ref_arg(args: &[Value], index: usize) -> Result<Reference, NativeError> {
    match args.get(index) {
        Some(Value::Reference(r)) => Ok(*r),
        Some(other) => Err(VmError::TagMismatch {
            expected: core_types::ValueTag::Reference,
            found: other.tag(),
        }
        .into()),
        None => Err(VmError::StackUnderflow.into()),
    }
}

/// Argument `index` as a non-null reference
pub fn object_arg(args: &[Value], index: usize) -> Result<Reference, NativeError> {
    let reference = ref_arg(args, index)?;
    if reference.is_null() {
        return Err(NativeError::Throw(ExceptionKind::NullPointer, None));
    }
    Ok(reference)
}
