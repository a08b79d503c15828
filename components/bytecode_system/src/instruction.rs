//! Raw (unlinked) instructions
//!
//! A [`RawInstruction`] is one decoded instruction of a method body: its
//! byte offset, its opcode and the operand bytes exactly as they appear in
//! the code array. Switch operands are stored without their alignment
//! padding. A `wide` prefix is folded into the instruction it modifies.

use crate::opcode::Opcode;
use core_types::LinkErrorKind;

/// A single undecoded-operand instruction, addressed by byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInstruction {
    /// Byte offset of the opcode within the method body
    pub offset: u32,
    /// The opcode (the modified opcode when `wide` is set)
    pub opcode: Opcode,
    /// Operand bytes following the opcode (after switch padding)
    pub operands: Vec<u8>,
    /// True when the instruction was prefixed by `wide`
    pub wide: bool,
}

impl RawInstruction {
    /// Create an instruction with no operands
    pub fn new(offset: u32, opcode: Opcode) -> Self {
        Self {
            offset,
            opcode,
            operands: Vec::new(),
            wide: false,
        }
    }

    /// Create an instruction with operand bytes
    pub fn with_operands(offset: u32, opcode: Opcode, operands: Vec<u8>) -> Self {
        Self {
            offset,
            opcode,
            operands,
            wide: false,
        }
    }

    fn bytes<const N: usize>(&self, at: usize) -> Result<[u8; N], LinkErrorKind> {
        self.operands
            .get(at..at + N)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| LinkErrorKind::MalformedCode {
                offset: self.offset,
                reason: format!("{} operand truncated", self.opcode.mnemonic()),
            })
    }

    /// Unsigned byte operand at `at`
    pub fn u8_at(&self, at: usize) -> Result<u8, LinkErrorKind> {
        Ok(self.bytes::<1>(at)?[0])
    }

    /// Signed byte operand at `at`
    pub fn i8_at(&self, at: usize) -> Result<i8, LinkErrorKind> {
        Ok(self.bytes::<1>(at)?[0] as i8)
    }

    /// Big-endian unsigned short operand at `at`
    pub fn u16_at(&self, at: usize) -> Result<u16, LinkErrorKind> {
        Ok(u16::from_be_bytes(self.bytes::<2>(at)?))
    }

    /// Big-endian signed short operand at `at`
    pub fn i16_at(&self, at: usize) -> Result<i16, LinkErrorKind> {
        Ok(i16::from_be_bytes(self.bytes::<2>(at)?))
    }

    /// Big-endian signed int operand at `at`
    pub fn i32_at(&self, at: usize) -> Result<i32, LinkErrorKind> {
        Ok(i32::from_be_bytes(self.bytes::<4>(at)?))
    }

    /// Local variable index operand, honouring `wide`
    pub fn local_index(&self) -> Result<u16, LinkErrorKind> {
        if self.wide {
            self.u16_at(0)
        } else {
            Ok(self.u8_at(0)? as u16)
        }
    }

    /// Absolute byte offset reached by a relative branch of `relative` bytes
    pub fn branch_target(&self, relative: i32) -> i64 {
        self.offset as i64 + relative as i64
    }
}

fn malformed(offset: usize, reason: impl Into<String>) -> LinkErrorKind {
    LinkErrorKind::MalformedCode {
        offset: offset as u32,
        reason: reason.into(),
    }
}

fn read_i32(code: &[u8], at: usize) -> Result<i32, LinkErrorKind> {
    code.get(at..at + 4)
        .and_then(|slice| slice.try_into().ok())
        .map(i32::from_be_bytes)
        .ok_or_else(|| malformed(at, "switch table truncated"))
}

/// Decode a method body into raw instructions.
///
/// Switch padding is computed relative to the start of `code`, as required
/// by the class file format.
///
/// # Examples
///
/// ```
/// use bytecode_system::{decode, Opcode};
///
/// // iconst_1; bipush 7; iadd; ireturn
/// let code = [0x04, 0x10, 0x07, 0x60, 0xac];
/// let raw = decode(&code).unwrap();
///
/// assert_eq!(raw.len(), 4);
/// assert_eq!(raw[1].opcode, Opcode::Bipush);
/// assert_eq!(raw[1].operands, vec![0x07]);
/// assert_eq!(raw[3].offset, 4);
/// ```
pub fn decode(code: &[u8]) -> Result<Vec<RawInstruction>, LinkErrorKind> {
    let mut out = Vec::new();
    let mut pc = 0usize;

    while pc < code.len() {
        let start = pc;
        let byte = code[pc];
        let mut opcode =
            Opcode::from_byte(byte).ok_or_else(|| malformed(start, format!("unknown opcode {:#04x}", byte)))?;
        if opcode == Opcode::ReturnInPlace {
            return Err(malformed(start, "internal opcode in class file"));
        }
        pc += 1;

        let mut wide = false;
        let operand_len = match opcode {
            Opcode::Wide => {
                let inner = code
                    .get(pc)
                    .copied()
                    .and_then(Opcode::from_byte)
                    .ok_or_else(|| malformed(start, "wide without opcode"))?;
                pc += 1;
                wide = true;
                opcode = inner;
                match inner {
                    Opcode::Iinc => 4,
                    Opcode::Iload
                    | Opcode::Lload
                    | Opcode::Fload
                    | Opcode::Dload
                    | Opcode::Aload
                    | Opcode::Istore
                    | Opcode::Lstore
                    | Opcode::Fstore
                    | Opcode::Dstore
                    | Opcode::Astore
                    | Opcode::Ret => 2,
                    other => {
                        return Err(malformed(
                            start,
                            format!("wide cannot modify {}", other.mnemonic()),
                        ))
                    }
                }
            }
            Opcode::Tableswitch => {
                pc = (pc + 3) & !3;
                let low = read_i32(code, pc + 4)?;
                let high = read_i32(code, pc + 8)?;
                if low > high {
                    return Err(malformed(start, "tableswitch low > high"));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                12 + count * 4
            }
            Opcode::Lookupswitch => {
                pc = (pc + 3) & !3;
                let npairs = read_i32(code, pc + 4)?;
                if npairs < 0 {
                    return Err(malformed(start, "lookupswitch with negative pair count"));
                }
                8 + npairs as usize * 8
            }
            other => other.operand_width().unwrap_or(0),
        };

        let operands = code
            .get(pc..pc + operand_len)
            .ok_or_else(|| malformed(start, format!("{} operand truncated", opcode.mnemonic())))?
            .to_vec();
        pc += operand_len;

        out.push(RawInstruction {
            offset: start as u32,
            opcode,
            operands,
            wide,
        });
    }

    Ok(out)
}
