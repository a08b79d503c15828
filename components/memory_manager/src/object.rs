//! Heap object representation.
//!
//! Every object carries its class, its monitor word and the instance fields
//! declared by its class hierarchy. Arrays, strings and host-backed objects
//! add a [`Payload`].

use crate::monitor::MonitorWord;
use bytecode_system::{ArrayKind, ClassId};
use core_types::{Reference, Value, ValueTag};
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// State attached to an object by the embedder.
///
/// Implementors that hold references outside declared fields (dynamic
/// collections, caches) must announce them from [`HostObject::trace`],
/// otherwise the collector frees what they point to.
pub trait HostObject: fmt::Debug + Send + 'static {
    /// Push every reference held by this payload
    fn trace(&self, _out: &mut Vec<Reference>) {}

    /// Upcast for downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete type
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Invalid array element access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArrayAccessError {
    /// Index outside `[0, length)`
    #[error("index {index} out of bounds for length {length}")]
    OutOfBounds {
        /// Requested index
        index: i64,
        /// Array length
        length: usize,
    },
    /// Value kind does not match the element kind
    #[error("cannot store {found} into {expected} array")]
    WrongKind {
        /// Element kind name
        expected: &'static str,
        /// Kind of the offered value
        found: ValueTag,
    },
}

/// Typed array storage
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// `boolean[]`, stored as bytes
    Boolean(Vec<i8>),
    /// `byte[]`
    Byte(Vec<i8>),
    /// `char[]`
    Char(Vec<u16>),
    /// `short[]`
    Short(Vec<i16>),
    /// `int[]`
    Int(Vec<i32>),
    /// `long[]`
    Long(Vec<i64>),
    /// `float[]`
    Float(Vec<f32>),
    /// `double[]`
    Double(Vec<f64>),
    /// Any reference array
    Reference(Vec<Reference>),
}

macro_rules! each_array {
    ($data:expr, $vec:ident => $body:expr) => {
        match $data {
            ArrayData::Boolean($vec) => $body,
            ArrayData::Byte($vec) => $body,
            ArrayData::Char($vec) => $body,
            ArrayData::Short($vec) => $body,
            ArrayData::Int($vec) => $body,
            ArrayData::Long($vec) => $body,
            ArrayData::Float($vec) => $body,
            ArrayData::Double($vec) => $body,
            ArrayData::Reference($vec) => $body,
        }
    };
}

impl ArrayData {
    /// Zero-filled primitive array
    pub fn primitive(kind: ArrayKind, length: usize) -> Self {
        match kind {
            ArrayKind::Boolean => ArrayData::Boolean(vec![0; length]),
            ArrayKind::Byte => ArrayData::Byte(vec![0; length]),
            ArrayKind::Char => ArrayData::Char(vec![0; length]),
            ArrayKind::Short => ArrayData::Short(vec![0; length]),
            ArrayKind::Int => ArrayData::Int(vec![0; length]),
            ArrayKind::Long => ArrayData::Long(vec![0; length]),
            ArrayKind::Float => ArrayData::Float(vec![0.0; length]),
            ArrayKind::Double => ArrayData::Double(vec![0.0; length]),
        }
    }

    /// Null-filled reference array
    pub fn references(length: usize) -> Self {
        ArrayData::Reference(vec![Reference::NULL; length])
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        each_array!(self, v => v.len())
    }

    /// Check if the array has no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element kind name, for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            ArrayData::Boolean(_) => "boolean",
            ArrayData::Byte(_) => "byte",
            ArrayData::Char(_) => "char",
            ArrayData::Short(_) => "short",
            ArrayData::Int(_) => "int",
            ArrayData::Long(_) => "long",
            ArrayData::Float(_) => "float",
            ArrayData::Double(_) => "double",
            ArrayData::Reference(_) => "reference",
        }
    }

    fn index(&self, index: i64) -> Result<usize, ArrayAccessError> {
        let length = self.len();
        usize::try_from(index)
            .ok()
            .filter(|&i| i < length)
            .ok_or(ArrayAccessError::OutOfBounds { index, length })
    }

    /// Load an element, widened to its stack kind
    pub fn get(&self, index: i32) -> Result<Value, ArrayAccessError> {
        let i = self.index(index as i64)?;
        Ok(match self {
            ArrayData::Boolean(v) | ArrayData::Byte(v) => Value::Int(v[i] as i32),
            ArrayData::Char(v) => Value::Int(v[i] as i32),
            ArrayData::Short(v) => Value::Int(v[i] as i32),
            ArrayData::Int(v) => Value::Int(v[i]),
            ArrayData::Long(v) => Value::Long(v[i]),
            ArrayData::Float(v) => Value::Float(v[i]),
            ArrayData::Double(v) => Value::Double(v[i]),
            ArrayData::Reference(v) => Value::Reference(v[i]),
        })
    }

    /// Store an element, narrowing ints to the element width
    pub fn set(&mut self, index: i32, value: Value) -> Result<(), ArrayAccessError> {
        let i = self.index(index as i64)?;
        let expected = self.kind_name();
        let wrong = ArrayAccessError::WrongKind {
            expected,
            found: value.tag(),
        };
        match (self, value) {
            (ArrayData::Boolean(v), Value::Int(x)) => v[i] = (x & 1) as i8,
            (ArrayData::Byte(v), Value::Int(x)) => v[i] = x as i8,
            (ArrayData::Char(v), Value::Int(x)) => v[i] = x as u16,
            (ArrayData::Short(v), Value::Int(x)) => v[i] = x as i16,
            (ArrayData::Int(v), Value::Int(x)) => v[i] = x,
            (ArrayData::Long(v), Value::Long(x)) => v[i] = x,
            (ArrayData::Float(v), Value::Float(x)) => v[i] = x,
            (ArrayData::Double(v), Value::Double(x)) => v[i] = x,
            (ArrayData::Reference(v), Value::Reference(x)) => v[i] = x,
            _ => return Err(wrong),
        }
        Ok(())
    }

    /// Copy `length` elements of `self` starting at `src` to `dst`,
    /// handling overlap like `System.arraycopy`
    pub fn copy_within(&mut self, src: usize, dst: usize, length: usize) -> Result<(), ArrayAccessError> {
        self.check_range(src, length)?;
        self.check_range(dst, length)?;
        each_array!(self, v => v.copy_within(src..src + length, dst));
        Ok(())
    }

    /// Copy `length` elements from `other[src..]` into `self[dst..]`
    pub fn copy_from(
        &mut self,
        dst: usize,
        other: &ArrayData,
        src: usize,
        length: usize,
    ) -> Result<(), ArrayAccessError> {
        other.check_range(src, length)?;
        self.check_range(dst, length)?;
        let expected = self.kind_name();
        match (self, other) {
            (ArrayData::Boolean(a), ArrayData::Boolean(b))
            | (ArrayData::Byte(a), ArrayData::Byte(b)) => {
                a[dst..dst + length].copy_from_slice(&b[src..src + length])
            }
            (ArrayData::Char(a), ArrayData::Char(b)) => {
                a[dst..dst + length].copy_from_slice(&b[src..src + length])
            }
            (ArrayData::Short(a), ArrayData::Short(b)) => {
                a[dst..dst + length].copy_from_slice(&b[src..src + length])
            }
            (ArrayData::Int(a), ArrayData::Int(b)) => {
                a[dst..dst + length].copy_from_slice(&b[src..src + length])
            }
            (ArrayData::Long(a), ArrayData::Long(b)) => {
                a[dst..dst + length].copy_from_slice(&b[src..src + length])
            }
            (ArrayData::Float(a), ArrayData::Float(b)) => {
                a[dst..dst + length].copy_from_slice(&b[src..src + length])
            }
            (ArrayData::Double(a), ArrayData::Double(b)) => {
                a[dst..dst + length].copy_from_slice(&b[src..src + length])
            }
            (ArrayData::Reference(a), ArrayData::Reference(b)) => {
                a[dst..dst + length].copy_from_slice(&b[src..src + length])
            }
            (_, other) => {
                return Err(ArrayAccessError::WrongKind {
                    expected,
                    found: match other {
                        ArrayData::Long(_) => ValueTag::Long,
                        ArrayData::Float(_) => ValueTag::Float,
                        ArrayData::Double(_) => ValueTag::Double,
                        ArrayData::Reference(_) => ValueTag::Reference,
                        _ => ValueTag::Int,
                    },
                })
            }
        }
        Ok(())
    }

    fn check_range(&self, start: usize, length: usize) -> Result<(), ArrayAccessError> {
        let end = start.checked_add(length);
        match end {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(ArrayAccessError::OutOfBounds {
                index: start as i64 + length as i64,
                length: self.len(),
            }),
        }
    }

    /// Reference elements, empty for primitive arrays
    pub fn reference_elements(&self) -> &[Reference] {
        match self {
            ArrayData::Reference(v) => v,
            _ => &[],
        }
    }
}

/// Object kind-specific storage
#[derive(Debug)]
pub enum Payload {
    /// Plain instance
    None,
    /// Array elements
    Array(ArrayData),
    /// `java/lang/String` contents as UTF-16 code units
    Str(Vec<u16>),
    /// Embedder-defined state
    Host(Box<dyn HostObject>),
}

/// A heap-resident object
#[derive(Debug)]
pub struct HeapObject {
    /// Class of the object
    pub class: ClassId,
    /// Packed monitor state
    pub monitor: MonitorWord,
    /// Instance fields in layout order
    pub fields: Vec<Value>,
    /// Kind-specific storage
    pub payload: Payload,
    pub(crate) marked: bool,
}

impl HeapObject {
    /// Plain instance with the given field values
    pub fn instance(class: ClassId, fields: Vec<Value>) -> Self {
        Self::with_payload(class, fields, Payload::None)
    }

    /// Array object
    pub fn array(class: ClassId, data: ArrayData) -> Self {
        Self::with_payload(class, Vec::new(), Payload::Array(data))
    }

    /// String object
    pub fn string(class: ClassId, text: &str) -> Self {
        Self::with_payload(class, Vec::new(), Payload::Str(text.encode_utf16().collect()))
    }

    /// Object with an arbitrary payload
    pub fn with_payload(class: ClassId, fields: Vec<Value>, payload: Payload) -> Self {
        Self {
            class,
            monitor: MonitorWord::FREE,
            fields,
            payload,
            marked: false,
        }
    }

    /// Array storage, if this is an array
    pub fn as_array(&self) -> Option<&ArrayData> {
        match &self.payload {
            Payload::Array(data) => Some(data),
            _ => None,
        }
    }

    /// Mutable array storage, if this is an array
    pub fn as_array_mut(&mut self) -> Option<&mut ArrayData> {
        match &mut self.payload {
            Payload::Array(data) => Some(data),
            _ => None,
        }
    }

    /// UTF-16 contents, if this is a string
    pub fn as_utf16(&self) -> Option<&[u16]> {
        match &self.payload {
            Payload::Str(units) => Some(units),
            _ => None,
        }
    }

    /// Host payload downcast to `T`
    pub fn host<T: HostObject>(&self) -> Option<&T> {
        match &self.payload {
            Payload::Host(host) => host.as_any().downcast_ref(),
            _ => None,
        }
    }

    /// Mutable host payload downcast to `T`
    pub fn host_mut<T: HostObject>(&mut self) -> Option<&mut T> {
        match &mut self.payload {
            Payload::Host(host) => host.as_any_mut().downcast_mut(),
            _ => None,
        }
    }

    /// Push every reference this object holds: reference fields, reference
    /// array elements and whatever a host payload announces
    pub fn trace(&self, out: &mut Vec<Reference>) {
        out.extend(
            self.fields
                .iter()
                .filter_map(Value::as_reference)
                .filter(|r| !r.is_null()),
        );
        match &self.payload {
            Payload::Array(data) => out.extend(
                data.reference_elements()
                    .iter()
                    .copied()
                    .filter(|r| !r.is_null()),
            ),
            Payload::Host(host) => host.trace(out),
            Payload::None | Payload::Str(_) => {}
        }
    }
}
