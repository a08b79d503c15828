//! Linked (resolved) instructions
//!
//! The linker turns every raw instruction into a [`LinkedInstruction`]:
//! the same opcode plus an [`Operand`] that needs no further lookups at
//! execution time. Branch targets are instruction indices.

use crate::class_def::LineNumber;
use crate::opcode::Opcode;
use crate::registry::{ClassId, MethodId};
use crate::vtable::VirtualPointer;
use core_types::ValueTag;
use std::sync::Arc;

/// Resolved field accessor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    /// Declaring class; initialized before a static access
    pub class: ClassId,
    /// Slot in the object's fields or the class's statics
    pub slot: u16,
    /// Kind of the stored value
    pub tag: ValueTag,
}

/// Pre-resolved operand of a linked instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// `int` immediate (`bipush`, `sipush`, `ldc`)
    Int(i32),
    /// `long` immediate
    Long(i64),
    /// `float` immediate
    Float(f32),
    /// `double` immediate
    Double(f64),
    /// String literal, interned when executed
    String(Arc<str>),
    /// Local variable index
    Local(u16),
    /// `iinc` local index and delta
    Iinc {
        /// Local variable index
        index: u16,
        /// Signed increment
        delta: i32,
    },
    /// Branch target instruction index
    Branch(usize),
    /// `tableswitch` jump table
    Table {
        /// Key of the first target
        low: i32,
        /// Index taken for keys outside `[low, low + targets.len())`
        default: usize,
        /// Indices for consecutive keys
        targets: Box<[usize]>,
    },
    /// `lookupswitch` jump table, sorted by key
    Lookup {
        /// Index taken when no key matches
        default: usize,
        /// `(key, index)` pairs in ascending key order
        pairs: Box<[(i32, usize)]>,
    },
    /// Resolved field accessor
    Field(FieldRef),
    /// Concrete call target (`invokestatic`, `invokespecial`)
    Method(MethodId),
    /// Dynamically dispatched call (`invokevirtual`, `invokeinterface`)
    Virtual {
        /// Signature to look up in the receiver's dispatch table
        vptr: VirtualPointer,
        /// Stack values consumed, receiver included
        arg_count: u16,
        /// Symbolically resolved method, for diagnostics
        resolved: MethodId,
    },
    /// Resolved class (`new`, `anewarray`, `newarray`, `checkcast`,
    /// `instanceof`, `ldc` of a class constant)
    Class(ClassId),
    /// `multianewarray` class and dimension count
    MultiArray {
        /// Array class of the result
        class: ClassId,
        /// Dimensions to allocate
        dimensions: u8,
    },
}

/// One dispatch-ready instruction
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedInstruction {
    /// Opcode, possibly rewritten by the linker
    pub opcode: Opcode,
    /// Resolved operand
    pub operand: Operand,
    /// Byte offset of the original instruction
    pub offset: u32,
}

/// Exception handler in linked form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkedHandler {
    /// First covered byte offset (inclusive)
    pub start: u32,
    /// End of the covered range (exclusive)
    pub end: u32,
    /// Instruction index of the handler
    pub handler: usize,
    /// Catch type, `None` for catch-all
    pub catch_type: Option<ClassId>,
}

impl LinkedHandler {
    /// Check if the handler covers byte offset `offset`
    pub fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// A fully linked method body
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedCode {
    /// The method this body belongs to
    pub method: MethodId,
    /// Instructions addressed by index
    pub instructions: Vec<LinkedInstruction>,
    /// Exception handlers in priority order
    pub handlers: Vec<LinkedHandler>,
    /// Line number table
    pub line_numbers: Vec<LineNumber>,
    /// Declared operand stack depth
    pub max_stack: usize,
    /// Declared local variable count
    pub max_locals: usize,
}

impl LinkedCode {
    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Check if the body is empty
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Instruction at `index`
    pub fn get(&self, index: usize) -> Option<&LinkedInstruction> {
        self.instructions.get(index)
    }

    /// Source line of byte offset `offset`, if known
    pub fn line_for(&self, offset: u32) -> Option<u16> {
        self.line_numbers
            .iter()
            .filter(|entry| entry.start_pc as u32 <= offset)
            .max_by_key(|entry| entry.start_pc)
            .map(|entry| entry.line)
    }
}
