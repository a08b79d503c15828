//! Tests for the raw instruction decoder

use bytecode_system::{decode, CodeBuilder, Opcode};
use core_types::LinkErrorKind;

/// Test decode() assigns byte offsets to every instruction
#[test]
fn test_decode_offsets() {
    // iconst_0; istore_1; iinc 1 1; iload_1; ireturn
    let code = [0x03, 0x3c, 0x84, 0x01, 0x01, 0x1b, 0xac];
    let raw = decode(&code).unwrap();
    let offsets: Vec<u32> = raw.iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2, 5, 6]);
}

/// Test decode() keeps invokeinterface count bytes as operands
#[test]
fn test_decode_invokeinterface_width() {
    let mut b = CodeBuilder::new(1, 1);
    b.aload(0).invokeinterface(3, 1).op(Opcode::Return);
    let raw = decode(&b.finish().unwrap().bytes).unwrap();
    assert_eq!(raw[1].operands, vec![0, 3, 1, 0]);
    assert_eq!(raw[2].offset, 6);
}

/// Test decode() of lookupswitch skips padding relative to code start
#[test]
fn test_decode_lookupswitch() {
    let mut b = CodeBuilder::new(1, 1);
    b.iload(0).op(Opcode::Nop);
    let done = b.new_label();
    b.lookupswitch(done, &[(1, done)]);
    b.bind(done).op(Opcode::Return);
    let raw = decode(&b.finish().unwrap().bytes).unwrap();
    assert_eq!(raw[2].opcode, Opcode::Lookupswitch);
    // 4-byte aligned table starts at 4: default, npairs, one pair
    assert_eq!(raw[2].operands.len(), 16);
    assert_eq!(raw[3].offset, 20);
}

/// Test decode() rejects a switch table cut short
#[test]
fn test_decode_truncated_switch() {
    let err = decode(&[0xaa, 0x00, 0x00, 0x00, 0x00]).unwrap_err();
    assert!(matches!(err, LinkErrorKind::MalformedCode { .. }));
}

/// Test decode() rejects the linker-internal opcode
#[test]
fn test_decode_rejects_return_in_place() {
    assert!(decode(&[Opcode::ReturnInPlace.byte()]).is_err());
}

/// Test decode() rejects wide applied to a non-local instruction
#[test]
fn test_decode_rejects_bad_wide() {
    assert!(decode(&[0xc4, 0x60]).is_err());
}
