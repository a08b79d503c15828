//! Method activations
//!
//! A frame stores its operand stack and its locals as raw 64-bit words with
//! a parallel tag array. Every push writes both arrays and every pop reads
//! the tag before moving the cursor, so the two never drift apart. The tags
//! tell `pop2`/`dup2` apart from their category-1 forms and tell the
//! collector which slots hold references.
//!
//! A `long` or `double` takes one operand stack slot but two local indices;
//! the upper index is tagged `int` and holds zero.

use arrayvec::ArrayVec;
use bytecode_system::{LinkedCode, MethodId};
use core_types::{Reference, Value, ValueTag, VmError};
use std::sync::Arc;

/// Up to two stack values forming one or two words
pub type Words = ArrayVec<(u64, ValueTag), 2>;

/// One method activation
#[derive(Debug, Clone)]
pub struct Frame {
    method: MethodId,
    code: Arc<LinkedCode>,
    /// Index of the executing instruction
    pub ip: usize,
    stack: Vec<u64>,
    stack_tags: Vec<ValueTag>,
    locals: Vec<u64>,
    local_tags: Vec<ValueTag>,
    /// Monitor entered on behalf of a synchronized method
    pub monitor: Option<Reference>,
}

fn mismatch(expected: ValueTag, found: ValueTag) -> VmError {
    VmError::TagMismatch { expected, found }
}

impl Frame {
    /// Fresh frame for `code`
    pub fn new(code: Arc<LinkedCode>) -> Self {
        let mut frame = Frame {
            method: code.method,
            code: Arc::clone(&code),
            ip: 0,
            stack: Vec::new(),
            stack_tags: Vec::new(),
            locals: Vec::new(),
            local_tags: Vec::new(),
            monitor: None,
        };
        frame.reinitialize(code);
        frame
    }

    /// Reuse this frame's buffers for another activation.
    ///
    /// Returns true when the existing buffers were large enough and no
    /// allocation happened.
    pub fn reinitialize(&mut self, code: Arc<LinkedCode>) -> bool {
        let reused = self.stack.capacity() >= code.max_stack
            && self.locals.capacity() >= code.max_locals;
        self.method = code.method;
        self.ip = 0;
        self.monitor = None;
        self.stack.clear();
        self.stack_tags.clear();
        self.stack.reserve(code.max_stack);
        self.stack_tags.reserve(code.max_stack);
        self.locals.clear();
        self.local_tags.clear();
        self.locals.resize(code.max_locals, 0);
        self.local_tags.resize(code.max_locals, ValueTag::Int);
        self.code = code;
        reused
    }

    /// Method being executed
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Linked body being executed
    pub fn code(&self) -> &Arc<LinkedCode> {
        &self.code
    }

    /// Byte offset of the executing instruction
    pub fn offset(&self) -> u32 {
        self.code.get(self.ip).map(|i| i.offset).unwrap_or(0)
    }

    /// Number of values on the operand stack
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Declared operand stack capacity
    pub fn max_stack(&self) -> usize {
        self.code.max_stack
    }

    /// Push a raw word with its tag
    pub fn push_word(&mut self, bits: u64, tag: ValueTag) -> Result<(), VmError> {
        if self.stack.len() >= self.code.max_stack {
            return Err(VmError::StackOverflow {
                max: self.code.max_stack,
            });
        }
        self.stack.push(bits);
        self.stack_tags.push(tag);
        Ok(())
    }

    /// Pop a raw word with its tag
    pub fn pop_word(&mut self) -> Result<(u64, ValueTag), VmError> {
        let tag = self.stack_tags.pop().ok_or(VmError::StackUnderflow)?;
        let bits = self.stack.pop().ok_or(VmError::StackUnderflow)?;
        Ok((bits, tag))
    }

    /// Push a value
    pub fn push(&mut self, value: Value) -> Result<(), VmError> {
        self.push_word(value.to_bits(), value.tag())
    }

    /// Pop a value of any kind
    pub fn pop(&mut self) -> Result<Value, VmError> {
        let (bits, tag) = self.pop_word()?;
        Ok(Value::from_bits(tag, bits))
    }

    /// Pop a value of kind `expected`
    pub fn pop_tagged(&mut self, expected: ValueTag) -> Result<Value, VmError> {
        match self.stack_tags.last() {
            Some(&tag) if tag == expected => self.pop(),
            Some(&tag) => Err(mismatch(expected, tag)),
            None => Err(VmError::StackUnderflow),
        }
    }

    /// Pop an `int`
    pub fn pop_int(&mut self) -> Result<i32, VmError> {
        self.pop_tagged(ValueTag::Int).map(|v| v.to_bits() as u32 as i32)
    }

    /// Pop a `long`
    pub fn pop_long(&mut self) -> Result<i64, VmError> {
        self.pop_tagged(ValueTag::Long).map(|v| v.to_bits() as i64)
    }

    /// Pop a `float`
    pub fn pop_float(&mut self) -> Result<f32, VmError> {
        self.pop_tagged(ValueTag::Float)
            .map(|v| f32::from_bits(v.to_bits() as u32))
    }

    /// Pop a `double`
    pub fn pop_double(&mut self) -> Result<f64, VmError> {
        self.pop_tagged(ValueTag::Double)
            .map(|v| f64::from_bits(v.to_bits()))
    }

    /// Pop a reference
    pub fn pop_ref(&mut self) -> Result<Reference, VmError> {
        self.pop_tagged(ValueTag::Reference)
            .map(|v| Reference::new(v.to_bits() as u32))
    }

    /// Value `depth` slots below the top, without popping
    pub fn peek(&self, depth: usize) -> Result<Value, VmError> {
        let index = self
            .stack
            .len()
            .checked_sub(depth + 1)
            .ok_or(VmError::StackUnderflow)?;
        Ok(Value::from_bits(self.stack_tags[index], self.stack[index]))
    }

    /// Reference `depth` slots below the top, without popping
    pub fn peek_ref(&self, depth: usize) -> Result<Reference, VmError> {
        match self.peek(depth)? {
            Value::Reference(r) => Ok(r),
            other => Err(mismatch(ValueTag::Reference, other.tag())),
        }
    }

    /// Pop values covering exactly `words` words (1 or 2), bottom first.
    ///
    /// This is the building block of `pop`, `pop2` and the `dup` family: a
    /// category-2 value counts as two words.
    pub fn take_words(&mut self, words: usize) -> Result<Words, VmError> {
        let mut taken = Words::new();
        let mut covered = 0;
        while covered < words {
            let (bits, tag) = self.pop_word()?;
            covered += tag.local_slots();
            if covered > words {
                return Err(mismatch(ValueTag::Int, tag));
            }
            taken.push((bits, tag));
        }
        taken.reverse();
        Ok(taken)
    }

    /// Push words previously returned by [`Frame::take_words`]
    pub fn put_words(&mut self, words: &Words) -> Result<(), VmError> {
        for &(bits, tag) in words {
            self.push_word(bits, tag)?;
        }
        Ok(())
    }

    /// Drop every operand stack value
    pub fn clear_stack(&mut self) {
        self.stack.clear();
        self.stack_tags.clear();
    }

    fn check_local(&self, index: usize, slots: usize) -> Result<(), VmError> {
        if index + slots > self.locals.len() {
            return Err(VmError::BadLocal {
                index,
                max: self.locals.len(),
            });
        }
        Ok(())
    }

    /// Read local `index`, which must hold a value of kind `expected`
    pub fn load(&self, index: u16, expected: ValueTag) -> Result<Value, VmError> {
        let index = index as usize;
        self.check_local(index, 1)?;
        match self.local_tags[index] {
            tag if tag == expected => Ok(Value::from_bits(tag, self.locals[index])),
            tag => Err(mismatch(expected, tag)),
        }
    }

    /// Write local `index`; wide values also claim `index + 1`
    pub fn store(&mut self, index: u16, value: Value) -> Result<(), VmError> {
        let index = index as usize;
        let tag = value.tag();
        self.check_local(index, tag.local_slots())?;
        self.locals[index] = value.to_bits();
        self.local_tags[index] = tag;
        if tag.is_wide() {
            self.locals[index + 1] = 0;
            self.local_tags[index + 1] = ValueTag::Int;
        }
        Ok(())
    }

    /// Copy call arguments (receiver first) into the leading locals
    pub fn set_arguments(&mut self, args: &[Value]) -> Result<(), VmError> {
        let mut index = 0u16;
        for &arg in args {
            self.store(index, arg)?;
            index += arg.tag().local_slots() as u16;
        }
        Ok(())
    }

    /// Non-null references on the stack, in locals and in the held monitor
    pub fn references(&self) -> impl Iterator<Item = Reference> + '_ {
        let tagged = |(bits, tag): (&u64, &ValueTag)| {
            (*tag == ValueTag::Reference).then(|| Reference::new(*bits as u32))
        };
        self.stack
            .iter()
            .zip(&self.stack_tags)
            .filter_map(tagged)
            .chain(self.locals.iter().zip(&self.local_tags).filter_map(tagged))
            .chain(self.monitor)
            .filter(|r| !r.is_null())
    }
}
