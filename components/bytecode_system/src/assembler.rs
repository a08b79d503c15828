//! Bytecode assembler
//!
//! [`CodeBuilder`] emits method bodies with symbolic labels for branches,
//! switches and exception ranges. It is how in-memory classes (bootstrap
//! classes, demos, tests) get their code bytes.

use crate::class_def::{Code, ExceptionTableEntry, LineNumber};
use crate::descriptor::ArrayKind;
use crate::opcode::Opcode;
use thiserror::Error;

/// Errors reported by [`CodeBuilder::finish`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    /// A label was referenced but never bound
    #[error("label {0} referenced but never bound")]
    UnboundLabel(usize),
    /// A label was bound at two offsets
    #[error("label {0} bound twice")]
    LabelBoundTwice(usize),
    /// A short branch does not fit in 16 bits
    #[error("branch at offset {0} out of 16-bit range")]
    BranchOutOfRange(u32),
    /// Offset exceeds the 16-bit exception/line table range
    #[error("offset {0} too large for the exception table")]
    OffsetTooLarge(u32),
}

/// Branch target placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
struct Fixup {
    at: usize,
    base: u32,
    label: Label,
    wide: bool,
}

#[derive(Debug)]
struct PendingHandler {
    start: Label,
    end: Label,
    handler: Label,
    catch_type: u16,
}

/// Incremental method body builder
///
/// # Examples
///
/// ```
/// use bytecode_system::{CodeBuilder, Opcode};
///
/// // static int abs(int x) { return x < 0 ? -x : x; }
/// let mut b = CodeBuilder::new(2, 1);
/// let positive = b.new_label();
/// b.iload(0).branch(Opcode::Ifge, positive);
/// b.iload(0).op(Opcode::Ineg).op(Opcode::Ireturn);
/// b.bind(positive).iload(0).op(Opcode::Ireturn);
///
/// let code = b.finish().unwrap();
/// assert_eq!(code.bytes[1], Opcode::Ifge.byte());
/// assert_eq!(&code.bytes[2..4], &[0, 6]);
/// ```
#[derive(Debug)]
pub struct CodeBuilder {
    bytes: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
    handlers: Vec<PendingHandler>,
    lines: Vec<LineNumber>,
    max_stack: u16,
    max_locals: u16,
    error: Option<AssembleError>,
}

impl CodeBuilder {
    /// Start a body with the given stack depth and local count
    pub fn new(max_stack: u16, max_locals: u16) -> Self {
        Self {
            bytes: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            lines: Vec::new(),
            max_stack,
            max_locals,
            error: None,
        }
    }

    /// Current byte offset
    pub fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Emit an operand-less instruction
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.bytes.push(opcode.byte());
        self
    }

    /// Emit an instruction with a one-byte operand
    pub fn op_u8(&mut self, opcode: Opcode, operand: u8) -> &mut Self {
        self.bytes.push(opcode.byte());
        self.bytes.push(operand);
        self
    }

    /// Emit an instruction with a two-byte operand (usually a pool index)
    pub fn op_u16(&mut self, opcode: Opcode, operand: u16) -> &mut Self {
        self.bytes.push(opcode.byte());
        self.bytes.extend_from_slice(&operand.to_be_bytes());
        self
    }

    /// Push an int constant using the shortest encoding
    ///
    /// Values outside the `sipush` range need a pool constant and `ldc`.
    pub fn iconst(&mut self, value: i32) -> &mut Self {
        match value {
            -1 => self.op(Opcode::IconstM1),
            0 => self.op(Opcode::Iconst0),
            1 => self.op(Opcode::Iconst1),
            2 => self.op(Opcode::Iconst2),
            3 => self.op(Opcode::Iconst3),
            4 => self.op(Opcode::Iconst4),
            5 => self.op(Opcode::Iconst5),
            v if i8::try_from(v).is_ok() => self.op_u8(Opcode::Bipush, v as i8 as u8),
            v => self.op_u16(Opcode::Sipush, v as i16 as u16),
        }
    }

    /// Load a constant pool entry (`ldc`, or `ldc_w` above index 255)
    pub fn ldc(&mut self, index: u16) -> &mut Self {
        match u8::try_from(index) {
            Ok(small) => self.op_u8(Opcode::Ldc, small),
            Err(_) => self.op_u16(Opcode::LdcW, index),
        }
    }

    /// Load a `long` or `double` pool entry
    pub fn ldc2(&mut self, index: u16) -> &mut Self {
        self.op_u16(Opcode::Ldc2W, index)
    }

    /// Emit a local variable instruction, with `wide` when needed
    pub fn local(&mut self, opcode: Opcode, index: u16) -> &mut Self {
        match u8::try_from(index) {
            Ok(small) => self.op_u8(opcode, small),
            Err(_) => {
                self.bytes.push(Opcode::Wide.byte());
                self.op_u16(opcode, index)
            }
        }
    }

    fn short_local(&mut self, base: Opcode, short0: Opcode, index: u16) -> &mut Self {
        if index < 4 {
            self.bytes.push(short0.byte() + index as u8);
            self
        } else {
            self.local(base, index)
        }
    }

    /// `iload`
    pub fn iload(&mut self, index: u16) -> &mut Self {
        self.short_local(Opcode::Iload, Opcode::Iload0, index)
    }

    /// `lload`
    pub fn lload(&mut self, index: u16) -> &mut Self {
        self.short_local(Opcode::Lload, Opcode::Lload0, index)
    }

    /// `fload`
    pub fn fload(&mut self, index: u16) -> &mut Self {
        self.short_local(Opcode::Fload, Opcode::Fload0, index)
    }

    /// `dload`
    pub fn dload(&mut self, index: u16) -> &mut Self {
        self.short_local(Opcode::Dload, Opcode::Dload0, index)
    }

    /// `aload`
    pub fn aload(&mut self, index: u16) -> &mut Self {
        self.short_local(Opcode::Aload, Opcode::Aload0, index)
    }

    /// `istore`
    pub fn istore(&mut self, index: u16) -> &mut Self {
        self.short_local(Opcode::Istore, Opcode::Istore0, index)
    }

    /// `lstore`
    pub fn lstore(&mut self, index: u16) -> &mut Self {
        self.short_local(Opcode::Lstore, Opcode::Lstore0, index)
    }

    /// `fstore`
    pub fn fstore(&mut self, index: u16) -> &mut Self {
        self.short_local(Opcode::Fstore, Opcode::Fstore0, index)
    }

    /// `dstore`
    pub fn dstore(&mut self, index: u16) -> &mut Self {
        self.short_local(Opcode::Dstore, Opcode::Dstore0, index)
    }

    /// `astore`
    pub fn astore(&mut self, index: u16) -> &mut Self {
        self.short_local(Opcode::Astore, Opcode::Astore0, index)
    }

    /// `iinc`, with `wide` when the index or delta need it
    pub fn iinc(&mut self, index: u16, delta: i16) -> &mut Self {
        match (u8::try_from(index), i8::try_from(delta)) {
            (Ok(small), Ok(d)) => {
                self.bytes.extend_from_slice(&[Opcode::Iinc.byte(), small, d as u8]);
            }
            _ => {
                self.bytes.extend_from_slice(&[Opcode::Wide.byte(), Opcode::Iinc.byte()]);
                self.bytes.extend_from_slice(&index.to_be_bytes());
                self.bytes.extend_from_slice(&delta.to_be_bytes());
            }
        }
        self
    }

    /// `newarray` of a primitive kind
    pub fn newarray(&mut self, kind: ArrayKind) -> &mut Self {
        self.op_u8(Opcode::Newarray, kind.atype())
    }

    /// `multianewarray`
    pub fn multianewarray(&mut self, class_index: u16, dimensions: u8) -> &mut Self {
        self.op_u16(Opcode::Multianewarray, class_index);
        self.bytes.push(dimensions);
        self
    }

    /// `invokeinterface`; `count` is the argument word count including
    /// the receiver
    pub fn invokeinterface(&mut self, index: u16, count: u8) -> &mut Self {
        self.op_u16(Opcode::Invokeinterface, index);
        self.bytes.extend_from_slice(&[count, 0]);
        self
    }

    /// Allocate an unbound label
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset
    pub fn bind(&mut self, label: Label) -> &mut Self {
        let offset = self.offset();
        match self.labels.get_mut(label.0) {
            Some(slot @ None) => *slot = Some(offset),
            _ => {
                self.error.get_or_insert(AssembleError::LabelBoundTwice(label.0));
            }
        }
        self
    }

    /// Allocate a label bound to the current offset
    pub fn here(&mut self) -> Label {
        let label = self.new_label();
        self.bind(label);
        label
    }

    /// Emit a branch to `label` (short form, or 32-bit for `goto_w`)
    pub fn branch(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        let base = self.offset();
        self.bytes.push(opcode.byte());
        let wide = matches!(opcode, Opcode::GotoW | Opcode::JsrW);
        self.fixups.push(Fixup {
            at: self.bytes.len(),
            base,
            label,
            wide,
        });
        let width = if wide { 4 } else { 2 };
        self.bytes.extend(std::iter::repeat(0).take(width));
        self
    }

    fn start_switch(&mut self, opcode: Opcode) -> u32 {
        let base = self.offset();
        self.bytes.push(opcode.byte());
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
        base
    }

    fn switch_word(&mut self, base: u32, label: Label) {
        self.fixups.push(Fixup {
            at: self.bytes.len(),
            base,
            label,
            wide: true,
        });
        self.bytes.extend_from_slice(&[0; 4]);
    }

    /// `tableswitch` over `low..low + targets.len()`
    pub fn tableswitch(&mut self, low: i32, default: Label, targets: &[Label]) -> &mut Self {
        let base = self.start_switch(Opcode::Tableswitch);
        self.switch_word(base, default);
        let high = low + targets.len() as i32 - 1;
        self.bytes.extend_from_slice(&low.to_be_bytes());
        self.bytes.extend_from_slice(&high.to_be_bytes());
        for &target in targets {
            self.switch_word(base, target);
        }
        self
    }

    /// `lookupswitch`; pairs are sorted by key before emission
    pub fn lookupswitch(&mut self, default: Label, pairs: &[(i32, Label)]) -> &mut Self {
        let base = self.start_switch(Opcode::Lookupswitch);
        self.switch_word(base, default);
        self.bytes
            .extend_from_slice(&(pairs.len() as i32).to_be_bytes());
        let mut sorted = pairs.to_vec();
        sorted.sort_by_key(|(key, _)| *key);
        for (key, target) in sorted {
            self.bytes.extend_from_slice(&key.to_be_bytes());
            self.switch_word(base, target);
        }
        self
    }

    /// Register an exception handler for `[start, end)`
    ///
    /// `catch_type` is a constant pool class index, or 0 for catch-all.
    pub fn handler(&mut self, start: Label, end: Label, handler: Label, catch_type: u16) -> &mut Self {
        self.handlers.push(PendingHandler {
            start,
            end,
            handler,
            catch_type,
        });
        self
    }

    /// Mark the current offset as the start of source line `line`
    pub fn line(&mut self, line: u16) -> &mut Self {
        let start_pc = self.offset() as u16;
        self.lines.push(LineNumber { start_pc, line });
        self
    }

    fn resolve(&self, label: Label) -> Result<u32, AssembleError> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or(AssembleError::UnboundLabel(label.0))
    }

    fn table_offset(&self, label: Label) -> Result<u16, AssembleError> {
        let offset = self.resolve(label)?;
        u16::try_from(offset).map_err(|_| AssembleError::OffsetTooLarge(offset))
    }

    /// Patch branches and produce the body
    pub fn finish(mut self) -> Result<Code, AssembleError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        for fixup in &self.fixups {
            let target = self.resolve(fixup.label)?;
            let relative = target as i64 - fixup.base as i64;
            if fixup.wide {
                let bytes = (relative as i32).to_be_bytes();
                self.bytes[fixup.at..fixup.at + 4].copy_from_slice(&bytes);
            } else {
                let short = i16::try_from(relative)
                    .map_err(|_| AssembleError::BranchOutOfRange(fixup.base))?;
                self.bytes[fixup.at..fixup.at + 2].copy_from_slice(&short.to_be_bytes());
            }
        }
        let mut exception_table = Vec::with_capacity(self.handlers.len());
        for pending in &self.handlers {
            exception_table.push(ExceptionTableEntry {
                start_pc: self.table_offset(pending.start)?,
                end_pc: self.table_offset(pending.end)?,
                handler_pc: self.table_offset(pending.handler)?,
                catch_type: pending.catch_type,
            });
        }
        Ok(Code {
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            bytes: self.bytes,
            exception_table,
            line_numbers: self.lines,
        })
    }
}
