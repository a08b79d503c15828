//! Tagged operand values.
//!
//! Every operand stack slot, local variable and field holds a 64-bit word
//! plus a [`ValueTag`] describing how to read it. `long` and `double` are
//! category-2 values: they are *wide* in the JVM sense but still occupy a
//! single tagged slot here.

use std::fmt;

/// Opaque handle identifying a heap-resident object.
///
/// Handle `0` is reserved for `null`. Handles are allocated from a
/// monotonically increasing counter and never reused.
///
/// # Examples
///
/// ```
/// use core_types::Reference;
///
/// assert!(Reference::NULL.is_null());
/// assert_eq!(Reference::new(12).raw(), 12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Reference(u32);

impl Reference {
    /// The null reference.
    pub const NULL: Reference = Reference(0);

    /// Wraps a raw handle value.
    pub const fn new(raw: u32) -> Self {
        Reference(raw)
    }

    /// Returns the raw handle value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns true for the null handle.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "@{}", self.0)
        }
    }
}

/// Primitive kind of a tagged slot.
///
/// `boolean`, `byte`, `char` and `short` are widened to [`ValueTag::Int`]
/// on the operand stack, exactly like the JVM computational types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueTag {
    /// 32-bit two's complement integer
    Int = 0,
    /// 64-bit two's complement integer (category 2)
    Long = 1,
    /// IEEE-754 binary32
    Float = 2,
    /// IEEE-754 binary64 (category 2)
    Double = 3,
    /// Heap reference
    Reference = 4,
}

impl ValueTag {
    /// Returns true for category-2 kinds (`long`, `double`).
    pub fn is_wide(self) -> bool {
        matches!(self, ValueTag::Long | ValueTag::Double)
    }

    /// Number of local variable indices a value of this kind occupies.
    pub fn local_slots(self) -> usize {
        if self.is_wide() {
            2
        } else {
            1
        }
    }

    /// Lower-case kind name, as used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ValueTag::Int => "int",
            ValueTag::Long => "long",
            ValueTag::Float => "float",
            ValueTag::Double => "double",
            ValueTag::Reference => "reference",
        }
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed JVM value.
///
/// This is the decoded form of a `(tag, word)` pair. Frames store the raw
/// word and the tag separately; fields and array elements store `Value`
/// directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// `int` (and the narrower integral kinds)
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// Object or array reference, possibly null
    Reference(Reference),
}

impl Value {
    /// The null reference value.
    pub const NULL: Value = Value::Reference(Reference::NULL);

    /// Returns the tag describing this value.
    pub fn tag(&self) -> ValueTag {
        match self {
            Value::Int(_) => ValueTag::Int,
            Value::Long(_) => ValueTag::Long,
            Value::Float(_) => ValueTag::Float,
            Value::Double(_) => ValueTag::Double,
            Value::Reference(_) => ValueTag::Reference,
        }
    }

    /// Encodes the payload as a 64-bit word.
    ///
    /// Floating point values are stored bit-exact so that NaN payloads and
    /// signed zeros survive a round trip through a frame.
    pub fn to_bits(self) -> u64 {
        match self {
            Value::Int(v) => v as u32 as u64,
            Value::Long(v) => v as u64,
            Value::Float(v) => v.to_bits() as u64,
            Value::Double(v) => v.to_bits(),
            Value::Reference(r) => r.raw() as u64,
        }
    }

    /// Decodes a word previously produced by [`Value::to_bits`].
    pub fn from_bits(tag: ValueTag, bits: u64) -> Value {
        match tag {
            ValueTag::Int => Value::Int(bits as u32 as i32),
            ValueTag::Long => Value::Long(bits as i64),
            ValueTag::Float => Value::Float(f32::from_bits(bits as u32)),
            ValueTag::Double => Value::Double(f64::from_bits(bits)),
            ValueTag::Reference => Value::Reference(Reference::new(bits as u32)),
        }
    }

    /// Zero value of the given kind (`0`, `0L`, `0.0f`, `0.0`, `null`).
    pub fn zero(tag: ValueTag) -> Value {
        Value::from_bits(tag, 0)
    }

    /// Returns true for category-2 values.
    pub fn is_wide(&self) -> bool {
        self.tag().is_wide()
    }

    /// Returns the `int` payload, if this is an int.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the `long` payload, if this is a long.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the `float` payload, if this is a float.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the `double` payload, if this is a double.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the reference payload, if this is a reference.
    pub fn as_reference(&self) -> Option<Reference> {
        match self {
            Value::Reference(r) => Some(*r),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::NULL
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Reference(r)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}L", v),
            Value::Float(v) => write!(f, "{}f", v),
            Value::Double(v) => write!(f, "{}d", v),
            Value::Reference(r) => write!(f, "{}", r),
        }
    }
}
