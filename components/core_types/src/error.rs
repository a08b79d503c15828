//! Error tiers.
//!
//! - [`LinkError`]: a method body refers to something that cannot be
//!   resolved. Fatal to the method, never retried.
//! - [`VmError`]: a defect in the linker or interpreter (or a resource that
//!   ran out). Fatal to the whole VM and invisible to guest handlers.
//! - [`ExceptionKind`]: guest-level exceptions raised by the interpreter
//!   itself. These unwind like any thrown object.

use crate::StackFrame;
use thiserror::Error;

/// Guest exceptions the interpreter raises on its own.
///
/// Each kind maps onto the class the guest program can catch.
///
/// # Examples
///
/// ```
/// use core_types::ExceptionKind;
///
/// assert_eq!(
///     ExceptionKind::Arithmetic.class_name(),
///     "java/lang/ArithmeticException"
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// Dereference of `null`
    NullPointer,
    /// Integer division or remainder by zero
    Arithmetic,
    /// Array index outside `[0, length)`
    ArrayIndexOutOfBounds,
    /// Array allocation with a negative length
    NegativeArraySize,
    /// Failed `checkcast`
    ClassCast,
    /// `aastore` of an incompatible element
    ArrayStore,
    /// `monitorexit`, `wait` or `notify` without owning the monitor
    IllegalMonitorState,
    /// Call depth limit exceeded
    StackOverflow,
    /// Touching a class whose initializer failed
    NoClassDefFound,
    /// Virtual call with no concrete implementation
    AbstractMethod,
    /// Interrupted wait or sleep
    Interrupted,
    /// `new` naming an abstract class or an interface
    Instantiation,
}

impl ExceptionKind {
    /// Internal name of the guest class for this kind.
    pub fn class_name(self) -> &'static str {
        match self {
            ExceptionKind::NullPointer => "java/lang/NullPointerException",
            ExceptionKind::Arithmetic => "java/lang/ArithmeticException",
            ExceptionKind::ArrayIndexOutOfBounds => "java/lang/ArrayIndexOutOfBoundsException",
            ExceptionKind::NegativeArraySize => "java/lang/NegativeArraySizeException",
            ExceptionKind::ClassCast => "java/lang/ClassCastException",
            ExceptionKind::ArrayStore => "java/lang/ArrayStoreException",
            ExceptionKind::IllegalMonitorState => "java/lang/IllegalMonitorStateException",
            ExceptionKind::StackOverflow => "java/lang/StackOverflowError",
            ExceptionKind::NoClassDefFound => "java/lang/NoClassDefFoundError",
            ExceptionKind::AbstractMethod => "java/lang/AbstractMethodError",
            ExceptionKind::Interrupted => "java/lang/InterruptedException",
            ExceptionKind::Instantiation => "java/lang/InstantiationError",
        }
    }

    /// Every kind, in declaration order.
    pub const ALL: [ExceptionKind; 12] = [
        ExceptionKind::NullPointer,
        ExceptionKind::Arithmetic,
        ExceptionKind::ArrayIndexOutOfBounds,
        ExceptionKind::NegativeArraySize,
        ExceptionKind::ClassCast,
        ExceptionKind::ArrayStore,
        ExceptionKind::IllegalMonitorState,
        ExceptionKind::StackOverflow,
        ExceptionKind::NoClassDefFound,
        ExceptionKind::AbstractMethod,
        ExceptionKind::Interrupted,
        ExceptionKind::Instantiation,
    ];
}

/// Why a symbolic reference could not be linked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkErrorKind {
    /// Referenced class is not loaded
    #[error("class {0} not found")]
    MissingClass(String),
    /// A class with this name is already defined
    #[error("class {0} defined twice")]
    DuplicateClass(String),
    /// Field not declared by the class or its supertypes
    #[error("field {class}.{name}:{descriptor} not found")]
    MissingField {
        /// Class searched first
        class: String,
        /// Field name
        name: String,
        /// Field descriptor
        descriptor: String,
    },
    /// Method not declared by the class or its supertypes
    #[error("method {class}.{name}{descriptor} not found")]
    MissingMethod {
        /// Class searched first
        class: String,
        /// Method name
        name: String,
        /// Method descriptor
        descriptor: String,
    },
    /// Constant pool index out of range or of the wrong kind
    #[error("constant pool entry #{index}: expected {expected}")]
    BadConstant {
        /// Offending index
        index: u16,
        /// Entry kind the instruction needs
        expected: &'static str,
    },
    /// Descriptor string could not be parsed
    #[error("malformed descriptor {0:?}")]
    MalformedDescriptor(String),
    /// Branch or handler offset does not start an instruction
    #[error("branch target {target} is not an instruction boundary")]
    BadBranchTarget {
        /// Absolute byte offset that was targeted
        target: i64,
    },
    /// Code bytes could not be decoded
    #[error("malformed code at offset {offset}: {reason}")]
    MalformedCode {
        /// Byte offset of the bad instruction
        offset: u32,
        /// What went wrong
        reason: String,
    },
    /// Static initializer with an unusable shape
    #[error("invalid initializer: {0}")]
    InvalidInitializer(String),
    /// Native method without a registered bridge
    #[error("no native binding registered")]
    MissingNative,
    /// Method has no code to link
    #[error("method has no code")]
    NoCode,
}

/// A fatal link failure, with full class/method context.
///
/// # Examples
///
/// ```
/// use core_types::{LinkError, LinkErrorKind};
///
/// let err = LinkError::new(
///     "app/Main",
///     "run",
///     "()V",
///     LinkErrorKind::MissingClass("app/Gone".into()),
/// );
/// assert_eq!(
///     err.to_string(),
///     "link error in app/Main.run()V: class app/Gone not found"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("link error in {class}.{method}{descriptor}: {kind}")]
pub struct LinkError {
    /// Class declaring the method being linked
    pub class: String,
    /// Name of the method being linked
    pub method: String,
    /// Descriptor of the method being linked
    pub descriptor: String,
    /// What could not be resolved
    pub kind: LinkErrorKind,
}

impl LinkError {
    /// Builds a link error for the given method.
    pub fn new(
        class: impl Into<String>,
        method: impl Into<String>,
        descriptor: impl Into<String>,
        kind: LinkErrorKind,
    ) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
            descriptor: descriptor.into(),
            kind,
        }
    }
}

/// Host-level failure. Reaching one of these means the VM cannot continue.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// Link failure surfaced while executing
    #[error(transparent)]
    Link(#[from] LinkError),
    /// Opcode that the interpreter does not implement
    #[error("unsupported opcode {opcode:#04x} in {method} at offset {offset}")]
    UnsupportedOpcode {
        /// Raw opcode byte
        opcode: u8,
        /// Qualified method name
        method: String,
        /// Byte offset of the instruction
        offset: u32,
    },
    /// Instruction pointer left the linked code
    #[error("instruction pointer {ip} out of range in {method}")]
    BadInstructionPointer {
        /// Offending index
        ip: usize,
        /// Qualified method name
        method: String,
    },
    /// Push past the declared `max_stack`
    #[error("operand stack overflow (max {max})")]
    StackOverflow {
        /// Declared capacity
        max: usize,
    },
    /// Pop from an empty operand stack
    #[error("operand stack underflow")]
    StackUnderflow,
    /// Slot tag differs from what the instruction requires
    #[error("expected {expected} on operand stack, found {found}")]
    TagMismatch {
        /// Kind the instruction needs
        expected: crate::ValueTag,
        /// Kind actually present
        found: crate::ValueTag,
    },
    /// Local variable index outside `max_locals`
    #[error("local variable {index} out of range (max {max})")]
    BadLocal {
        /// Offending index
        index: usize,
        /// Declared capacity
        max: usize,
    },
    /// Non-null handle with no heap object behind it
    #[error("dangling reference {0}")]
    DanglingReference(crate::Reference),
    /// Object of an unexpected shape (e.g. array opcode on an instance)
    #[error("object {reference} is not {expected}")]
    WrongObjectKind {
        /// The object
        reference: crate::Reference,
        /// What the instruction needed
        expected: &'static str,
    },
    /// Handle counter wrapped
    #[error("heap handle space exhausted")]
    HandlesExhausted,
    /// No thread with that id is registered
    #[error("unknown thread {0}")]
    UnknownThread(u32),
    /// Thread id space exhausted
    #[error("thread ids exhausted")]
    ThreadIdsExhausted,
    /// Monitor reentrancy counter overflowed
    #[error("monitor on {0} entered too many times")]
    MonitorOverflow(crate::Reference),
    /// A synchronous call could not make progress
    #[error("synchronous call blocked: {0}")]
    SynchronousCallBlocked(String),
    /// A synchronous call finished with an unhandled guest exception
    #[error("uncaught exception {class}{}", .message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    UncaughtException {
        /// Internal class name of the thrown object
        class: String,
        /// Detail message, if the object carries one
        message: Option<String>,
        /// Trace captured when the throw reached the bottom of the stack
        trace: Vec<StackFrame>,
    },
}
