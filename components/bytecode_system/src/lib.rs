//! Bytecode system for the CLDC virtual machine
//!
//! This crate provides the instruction set, the consumed class model and
//! everything needed to turn a method body into dispatch-ready form.
//!
//! # Features
//!
//! - Full JVM opcode table and a raw instruction decoder
//! - A label-based assembler for building method bodies in memory
//! - Constant pools, field and method descriptors
//! - A class registry with field layouts, virtual pointers and dispatch
//!   tables
//! - The linker, producing [`LinkedCode`] with instruction-index branches
//!
//! # Example
//!
//! ```
//! use bytecode_system::{access, link, ClassDef, ClassRegistry, CodeBuilder, Opcode};
//!
//! let mut registry = ClassRegistry::new();
//! registry.define(ClassDef::new("java/lang/Object", None)).unwrap();
//!
//! let mut body = CodeBuilder::new(2, 2);
//! body.iload(0).iload(1).op(Opcode::Iadd).op(Opcode::Ireturn);
//!
//! let mut def = ClassDef::new("app/Math", Some("java/lang/Object"));
//! def.method("add", "(II)I", access::STATIC, body.finish().unwrap());
//! let class = registry.define(def).unwrap();
//!
//! let add = registry.declared_method(class, "add", "(II)I").unwrap();
//! let linked = link(&mut registry, add).unwrap();
//! assert_eq!(linked.len(), 4);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod class_def;
pub mod constant_pool;
pub mod descriptor;
pub mod instruction;
pub mod linked;
pub mod linker;
pub mod opcode;
pub mod registry;
pub mod vtable;

// Re-export main types at crate root
pub use assembler::{AssembleError, CodeBuilder, Label};
pub use class_def::{access, ClassDef, Code, ExceptionTableEntry, FieldDef, LineNumber, MethodDef};
pub use constant_pool::{Constant, ConstantPool, MemberRef};
pub use descriptor::{ArrayKind, FieldType, MethodDescriptor};
pub use instruction::{decode, RawInstruction};
pub use linked::{FieldRef, LinkedCode, LinkedHandler, LinkedInstruction, Operand};
pub use linker::{link, CLINIT};
pub use opcode::Opcode;
pub use registry::{
    ArrayElement, ClassId, ClassRegistry, FieldInfo, InitState, MethodId, RuntimeClass,
    RuntimeMethod, OBJECT_CLASS,
};
pub use vtable::{DispatchTable, VirtualPointer, VirtualPointers};
