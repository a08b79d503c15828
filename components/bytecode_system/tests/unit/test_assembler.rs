//! Tests for CodeBuilder

use bytecode_system::{decode, AssembleError, CodeBuilder, Opcode};

/// Test exception handlers are recorded with byte offsets
#[test]
fn test_handler_offsets() {
    let mut b = CodeBuilder::new(2, 1);
    let start = b.here();
    b.iconst(1).iconst(0).op(Opcode::Idiv).op(Opcode::Ireturn);
    let end = b.here();
    b.op(Opcode::Pop).iconst(-1).op(Opcode::Ireturn);
    b.handler(start, end, end, 4);
    let code = b.finish().unwrap();
    let entry = code.exception_table[0];
    assert_eq!((entry.start_pc, entry.end_pc, entry.handler_pc), (0, 4, 4));
    assert_eq!(entry.catch_type, 4);
}

/// Test line numbers are recorded at the current offset
#[test]
fn test_line_numbers() {
    let mut b = CodeBuilder::new(1, 0);
    b.line(10).iconst(0);
    b.line(11).op(Opcode::Ireturn);
    let code = b.finish().unwrap();
    assert_eq!(code.line_numbers[1].start_pc, 1);
    assert_eq!(code.line_numbers[1].line, 11);
}

/// Test binding a label twice is reported by finish()
#[test]
fn test_label_bound_twice() {
    let mut b = CodeBuilder::new(0, 0);
    let label = b.here();
    b.op(Opcode::Nop);
    b.bind(label);
    assert_eq!(b.finish().unwrap_err(), AssembleError::LabelBoundTwice(0));
}

/// Test goto_w uses a 32-bit offset
#[test]
fn test_goto_w() {
    let mut b = CodeBuilder::new(0, 0);
    let end = b.new_label();
    b.branch(Opcode::GotoW, end);
    b.bind(end).op(Opcode::Return);
    let raw = decode(&b.finish().unwrap().bytes).unwrap();
    assert_eq!(raw[0].i32_at(0).unwrap(), 5);
}
