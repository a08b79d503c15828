//! Field and method descriptors

use core_types::{LinkErrorKind, ValueTag};
use std::fmt;

/// Primitive element kind of an array, numbered like the `newarray` atype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArrayKind {
    /// `boolean[]`
    Boolean = 4,
    /// `char[]`
    Char = 5,
    /// `float[]`
    Float = 6,
    /// `double[]`
    Double = 7,
    /// `byte[]`
    Byte = 8,
    /// `short[]`
    Short = 9,
    /// `int[]`
    Int = 10,
    /// `long[]`
    Long = 11,
}

impl ArrayKind {
    /// Decode a `newarray` atype operand
    pub fn from_atype(atype: u8) -> Option<ArrayKind> {
        Some(match atype {
            4 => ArrayKind::Boolean,
            5 => ArrayKind::Char,
            6 => ArrayKind::Float,
            7 => ArrayKind::Double,
            8 => ArrayKind::Byte,
            9 => ArrayKind::Short,
            10 => ArrayKind::Int,
            11 => ArrayKind::Long,
            _ => return None,
        })
    }

    /// The `newarray` atype operand
    pub fn atype(self) -> u8 {
        self as u8
    }

    /// Descriptor character (`Z`, `C`, `F`, ...)
    pub fn descriptor_char(self) -> char {
        match self {
            ArrayKind::Boolean => 'Z',
            ArrayKind::Char => 'C',
            ArrayKind::Float => 'F',
            ArrayKind::Double => 'D',
            ArrayKind::Byte => 'B',
            ArrayKind::Short => 'S',
            ArrayKind::Int => 'I',
            ArrayKind::Long => 'J',
        }
    }

    /// Computational kind of an element once loaded onto the stack
    pub fn tag(self) -> ValueTag {
        match self {
            ArrayKind::Float => ValueTag::Float,
            ArrayKind::Double => ValueTag::Double,
            ArrayKind::Long => ValueTag::Long,
            _ => ValueTag::Int,
        }
    }
}

/// A parsed field descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// A primitive type
    Primitive(ArrayKind),
    /// An object type by internal class name
    Object(String),
    /// An array type with the given component
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parse a complete field descriptor such as `I` or `[Ljava/lang/String;`
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_system::{ArrayKind, FieldType};
    ///
    /// let ty = FieldType::parse("[[J").unwrap();
    /// assert_eq!(ty.dimensions(), 2);
    /// assert_eq!(ty.descriptor(), "[[J");
    /// assert_eq!(FieldType::parse("Z").unwrap(), FieldType::Primitive(ArrayKind::Boolean));
    /// assert!(FieldType::parse("Lfoo").is_err());
    /// ```
    pub fn parse(descriptor: &str) -> Result<FieldType, LinkErrorKind> {
        let (ty, rest) = Self::parse_prefix(descriptor)?;
        if rest.is_empty() {
            Ok(ty)
        } else {
            Err(LinkErrorKind::MalformedDescriptor(descriptor.to_string()))
        }
    }

    /// Parse a class constant name: either an internal name or an array
    /// descriptor
    pub fn from_class_name(name: &str) -> Result<FieldType, LinkErrorKind> {
        if name.starts_with('[') {
            Self::parse(name)
        } else if name.is_empty() {
            Err(LinkErrorKind::MalformedDescriptor(String::new()))
        } else {
            Ok(FieldType::Object(name.to_string()))
        }
    }

    fn parse_prefix(input: &str) -> Result<(FieldType, &str), LinkErrorKind> {
        let malformed = || LinkErrorKind::MalformedDescriptor(input.to_string());
        let mut chars = input.chars();
        let first = chars.next().ok_or_else(malformed)?;
        let rest = chars.as_str();
        let primitive = |kind| Ok((FieldType::Primitive(kind), rest));
        match first {
            'Z' => primitive(ArrayKind::Boolean),
            'C' => primitive(ArrayKind::Char),
            'F' => primitive(ArrayKind::Float),
            'D' => primitive(ArrayKind::Double),
            'B' => primitive(ArrayKind::Byte),
            'S' => primitive(ArrayKind::Short),
            'I' => primitive(ArrayKind::Int),
            'J' => primitive(ArrayKind::Long),
            'L' => {
                let end = rest.find(';').ok_or_else(malformed)?;
                if end == 0 {
                    return Err(malformed());
                }
                Ok((FieldType::Object(rest[..end].to_string()), &rest[end + 1..]))
            }
            '[' => {
                let (component, rest) = Self::parse_prefix(rest)?;
                Ok((FieldType::Array(Box::new(component)), rest))
            }
            _ => Err(malformed()),
        }
    }

    /// Computational kind of a value of this type
    pub fn tag(&self) -> ValueTag {
        match self {
            FieldType::Primitive(kind) => kind.tag(),
            FieldType::Object(_) | FieldType::Array(_) => ValueTag::Reference,
        }
    }

    /// Check if values of this type are references
    pub fn is_reference(&self) -> bool {
        !matches!(self, FieldType::Primitive(_))
    }

    /// Number of array dimensions (0 for non-arrays)
    pub fn dimensions(&self) -> usize {
        match self {
            FieldType::Array(component) => 1 + component.dimensions(),
            _ => 0,
        }
    }

    /// Descriptor string
    pub fn descriptor(&self) -> String {
        self.to_string()
    }

    /// Name used for the class of this type: the internal name for
    /// objects, the descriptor for arrays
    pub fn class_name(&self) -> String {
        match self {
            FieldType::Object(name) => name.clone(),
            other => other.descriptor(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Primitive(kind) => write!(f, "{}", kind.descriptor_char()),
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(component) => write!(f, "[{}", component),
        }
    }
}

/// A parsed method descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub params: Vec<FieldType>,
    /// Return type, `None` for `void`
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parse a method descriptor such as `(IJ)Ljava/lang/String;`
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_system::MethodDescriptor;
    ///
    /// let desc = MethodDescriptor::parse("(IJ[B)V").unwrap();
    /// assert_eq!(desc.params.len(), 3);
    /// assert_eq!(desc.param_local_slots(), 4);
    /// assert!(desc.ret.is_none());
    /// ```
    pub fn parse(descriptor: &str) -> Result<MethodDescriptor, LinkErrorKind> {
        let malformed = || LinkErrorKind::MalformedDescriptor(descriptor.to_string());
        let mut rest = descriptor.strip_prefix('(').ok_or_else(malformed)?;
        let mut params = Vec::new();
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                rest = after;
                break;
            }
            let (param, after) = FieldType::parse_prefix(rest).map_err(|_| malformed())?;
            params.push(param);
            rest = after;
        }
        let ret = if rest == "V" {
            None
        } else {
            Some(FieldType::parse(rest).map_err(|_| malformed())?)
        };
        Ok(MethodDescriptor { params, ret })
    }

    /// Number of local variable indices the parameters occupy
    pub fn param_local_slots(&self) -> usize {
        self.params.iter().map(|p| p.tag().local_slots()).sum()
    }

    /// Kind of the returned value, `None` for `void`
    pub fn return_tag(&self) -> Option<ValueTag> {
        self.ret.as_ref().map(FieldType::tag)
    }
}
