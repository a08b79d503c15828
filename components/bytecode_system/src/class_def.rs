//! The consumed class model
//!
//! A [`ClassDef`] is a class as handed over by the class loader: name,
//! supertypes, constant pool, fields and methods with their code. The
//! builder-style helpers exist for embedders and tests that assemble
//! classes in memory.

use crate::constant_pool::ConstantPool;
use crate::instruction::{decode, RawInstruction};
use core_types::{LinkErrorKind, Value};

/// Access and property flags
pub mod access {
    /// `ACC_PUBLIC`
    pub const PUBLIC: u16 = 0x0001;
    /// `ACC_PRIVATE`
    pub const PRIVATE: u16 = 0x0002;
    /// `ACC_PROTECTED`
    pub const PROTECTED: u16 = 0x0004;
    /// `ACC_STATIC`
    pub const STATIC: u16 = 0x0008;
    /// `ACC_FINAL`
    pub const FINAL: u16 = 0x0010;
    /// `ACC_SYNCHRONIZED`
    pub const SYNCHRONIZED: u16 = 0x0020;
    /// `ACC_NATIVE`
    pub const NATIVE: u16 = 0x0100;
    /// `ACC_INTERFACE`
    pub const INTERFACE: u16 = 0x0200;
    /// `ACC_ABSTRACT`
    pub const ABSTRACT: u16 = 0x0400;
}

/// One exception table row, in byte offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    /// First covered offset (inclusive)
    pub start_pc: u16,
    /// End of the covered range (exclusive)
    pub end_pc: u16,
    /// Offset of the handler
    pub handler_pc: u16,
    /// Constant pool index of the catch type, 0 to catch everything
    pub catch_type: u16,
}

/// Line number table row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    /// First offset of the line
    pub start_pc: u16,
    /// Source line
    pub line: u16,
}

/// A method body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Code {
    /// Declared operand stack depth
    pub max_stack: u16,
    /// Declared number of local variable indices
    pub max_locals: u16,
    /// Encoded instructions
    pub bytes: Vec<u8>,
    /// Exception handlers in priority order
    pub exception_table: Vec<ExceptionTableEntry>,
    /// Offset to source line mapping
    pub line_numbers: Vec<LineNumber>,
}

impl Code {
    /// Create a body without handlers or line numbers
    pub fn new(max_stack: u16, max_locals: u16, bytes: Vec<u8>) -> Self {
        Self {
            max_stack,
            max_locals,
            bytes,
            exception_table: Vec::new(),
            line_numbers: Vec::new(),
        }
    }

    /// Add an exception handler row
    pub fn with_handler(mut self, start_pc: u16, end_pc: u16, handler_pc: u16, catch_type: u16) -> Self {
        self.exception_table.push(ExceptionTableEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        });
        self
    }

    /// Replace the line number table
    pub fn with_lines(mut self, lines: Vec<LineNumber>) -> Self {
        self.line_numbers = lines;
        self
    }

    /// Decode the body into raw instructions
    pub fn instructions(&self) -> Result<Vec<RawInstruction>, LinkErrorKind> {
        decode(&self.bytes)
    }
}

/// A declared field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
    /// Access flags
    pub access_flags: u16,
    /// `ConstantValue` of a static field, if any
    pub constant_value: Option<Value>,
}

impl FieldDef {
    /// Create a field
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, access_flags: u16) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags,
            constant_value: None,
        }
    }

    /// Check if the field is static
    pub fn is_static(&self) -> bool {
        self.access_flags & access::STATIC != 0
    }
}

/// A declared method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Access flags
    pub access_flags: u16,
    /// Body, absent for native and abstract methods
    pub code: Option<Code>,
}

impl MethodDef {
    /// Create a method with a body
    pub fn new(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        access_flags: u16,
        code: Code,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags,
            code: Some(code),
        }
    }

    /// Create a native method; the bridge is bound separately
    pub fn native(name: impl Into<String>, descriptor: impl Into<String>, access_flags: u16) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags: access_flags | access::NATIVE,
            code: None,
        }
    }

    /// Create an abstract method
    pub fn abstract_method(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags: access::PUBLIC | access::ABSTRACT,
            code: None,
        }
    }
}

/// A loaded class, before registration
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    /// Internal name (`java/lang/Object`)
    pub name: String,
    /// Superclass internal name, `None` only for the root class
    pub super_name: Option<String>,
    /// Directly implemented interfaces
    pub interfaces: Vec<String>,
    /// Access flags
    pub access_flags: u16,
    /// The class constant pool
    pub constant_pool: ConstantPool,
    /// Declared fields
    pub fields: Vec<FieldDef>,
    /// Declared methods
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    /// Create an empty public class
    pub fn new(name: impl Into<String>, super_name: Option<&str>) -> Self {
        Self {
            name: name.into(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            access_flags: access::PUBLIC,
            constant_pool: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Create an empty interface
    pub fn interface(name: impl Into<String>) -> Self {
        let mut def = Self::new(name, Some("java/lang/Object"));
        def.access_flags |= access::INTERFACE | access::ABSTRACT;
        def
    }

    /// Check if this is an interface
    pub fn is_interface(&self) -> bool {
        self.access_flags & access::INTERFACE != 0
    }

    /// Add a directly implemented interface
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Add a field
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a method
    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    /// Add a field by name, descriptor and flags
    pub fn field(&mut self, name: &str, descriptor: &str, access_flags: u16) -> &mut Self {
        self.fields.push(FieldDef::new(name, descriptor, access_flags));
        self
    }

    /// Add a method by name, descriptor, flags and body
    pub fn method(&mut self, name: &str, descriptor: &str, access_flags: u16, code: Code) -> &mut Self {
        self.methods
            .push(MethodDef::new(name, descriptor, access_flags, code));
        self
    }
}
