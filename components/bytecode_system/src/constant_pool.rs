//! Constant pool of a loaded class
//!
//! The pool is consumed already parsed: symbolic references carry their
//! class, member name and descriptor as strings rather than chains of
//! `NameAndType`/`Utf8` indices. Index 0 is unused and `long`/`double`
//! entries occupy two indices, so bytecode operands address the pool
//! exactly as they address a class-file pool.

use core_types::LinkErrorKind;

/// A symbolic field or method reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Internal name of the class named by the reference
    pub class: String,
    /// Member name
    pub name: String,
    /// Field or method descriptor
    pub descriptor: String,
}

impl MemberRef {
    /// Create a member reference
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

/// One constant pool entry
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Raw modified-UTF8 text
    Utf8(String),
    /// `int` literal
    Integer(i32),
    /// `float` literal
    Float(f32),
    /// `long` literal (two indices)
    Long(i64),
    /// `double` literal (two indices)
    Double(f64),
    /// Class reference by internal name (or array descriptor)
    Class(String),
    /// String literal
    String(String),
    /// Field reference
    Field(MemberRef),
    /// Class method reference
    Method(MemberRef),
    /// Interface method reference
    InterfaceMethod(MemberRef),
}

impl Constant {
    /// Short kind name used in link diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "utf8",
            Constant::Integer(_) => "integer",
            Constant::Float(_) => "float",
            Constant::Long(_) => "long",
            Constant::Double(_) => "double",
            Constant::Class(_) => "class",
            Constant::String(_) => "string",
            Constant::Field(_) => "field reference",
            Constant::Method(_) => "method reference",
            Constant::InterfaceMethod(_) => "interface method reference",
        }
    }

    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// Indexed constant pool
///
/// # Examples
///
/// ```
/// use bytecode_system::{Constant, ConstantPool};
///
/// let mut pool = ConstantPool::new();
/// let big = pool.long(1 << 40);
/// let name = pool.string("hello");
///
/// assert_eq!(big, 1);
/// assert_eq!(name, 3); // longs take two indices
/// assert_eq!(pool.get(name), Some(&Constant::String("hello".into())));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConstantPool {
    entries: Vec<Option<Constant>>,
}

impl ConstantPool {
    /// Create an empty pool (only the reserved index 0)
    pub fn new() -> Self {
        Self {
            entries: vec![None],
        }
    }

    /// Number of indices, including the reserved index 0
    pub fn len(&self) -> usize {
        self.entries.len().max(1)
    }

    /// Check if the pool holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    /// Entry at `index`, if there is one
    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize).and_then(Option::as_ref)
    }

    /// Append an entry, reusing an equal existing one
    pub fn push(&mut self, constant: Constant) -> u16 {
        if self.entries.is_empty() {
            self.entries.push(None);
        }
        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.as_ref() == Some(&constant))
        {
            return index as u16;
        }
        let index = self.entries.len() as u16;
        let wide = constant.is_wide();
        self.entries.push(Some(constant));
        if wide {
            self.entries.push(None);
        }
        index
    }

    /// Add an `int` constant
    pub fn integer(&mut self, value: i32) -> u16 {
        self.push(Constant::Integer(value))
    }

    /// Add a `float` constant
    pub fn float(&mut self, value: f32) -> u16 {
        self.push(Constant::Float(value))
    }

    /// Add a `long` constant
    pub fn long(&mut self, value: i64) -> u16 {
        self.push(Constant::Long(value))
    }

    /// Add a `double` constant
    pub fn double(&mut self, value: f64) -> u16 {
        self.push(Constant::Double(value))
    }

    /// Add a string literal
    pub fn string(&mut self, text: impl Into<String>) -> u16 {
        self.push(Constant::String(text.into()))
    }

    /// Add a class reference
    pub fn class(&mut self, name: impl Into<String>) -> u16 {
        self.push(Constant::Class(name.into()))
    }

    /// Add a field reference
    pub fn field(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.push(Constant::Field(MemberRef::new(class, name, descriptor)))
    }

    /// Add a class method reference
    pub fn method(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.push(Constant::Method(MemberRef::new(class, name, descriptor)))
    }

    /// Add an interface method reference
    pub fn interface_method(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.push(Constant::InterfaceMethod(MemberRef::new(
            class, name, descriptor,
        )))
    }

    fn entry(&self, index: u16, expected: &'static str) -> Result<&Constant, LinkErrorKind> {
        self.get(index)
            .ok_or(LinkErrorKind::BadConstant { index, expected })
    }

    /// Class name at `index`
    pub fn class_name(&self, index: u16) -> Result<&str, LinkErrorKind> {
        match self.entry(index, "class")? {
            Constant::Class(name) => Ok(name),
            _ => Err(LinkErrorKind::BadConstant {
                index,
                expected: "class",
            }),
        }
    }

    /// Field reference at `index`
    pub fn field_ref(&self, index: u16) -> Result<&MemberRef, LinkErrorKind> {
        match self.entry(index, "field reference")? {
            Constant::Field(member) => Ok(member),
            _ => Err(LinkErrorKind::BadConstant {
                index,
                expected: "field reference",
            }),
        }
    }

    /// Method or interface method reference at `index`
    ///
    /// The flag is true for interface method references.
    pub fn method_ref(&self, index: u16) -> Result<(&MemberRef, bool), LinkErrorKind> {
        match self.entry(index, "method reference")? {
            Constant::Method(member) => Ok((member, false)),
            Constant::InterfaceMethod(member) => Ok((member, true)),
            _ => Err(LinkErrorKind::BadConstant {
                index,
                expected: "method reference",
            }),
        }
    }

    /// Iterate over `(index, entry)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_ref().map(|c| (index as u16, c)))
    }
}
