//! Contract tests verifying the bytecode_system API surface.
//! These tests ensure the exported types and functions exist with the
//! expected signatures and basic behaviour.

use bytecode_system::{
    access, decode, link, ArrayKind, ClassDef, ClassId, ClassRegistry, CodeBuilder, ConstantPool,
    FieldType, LinkedCode, MethodDescriptor, MethodId, Opcode, VirtualPointer, VirtualPointers,
};
use core_types::LinkError;
use std::sync::Arc;

/// Test Opcode contract: from_byte(u8) -> Option<Opcode>
#[test]
fn contract_opcode_from_byte() {
    assert_eq!(Opcode::from_byte(0x60), Some(Opcode::Iadd));
    assert_eq!(Opcode::Iadd.mnemonic(), "iadd");
}

/// Test decode contract: decode(&[u8]) -> Result<Vec<RawInstruction>, LinkErrorKind>
#[test]
fn contract_decode() {
    let raw = decode(&[0xb1]).unwrap();
    assert_eq!(raw[0].opcode, Opcode::Return);
}

/// Test ClassRegistry contract: define(ClassDef) -> Result<ClassId, LinkError>
#[test]
fn contract_registry_define() {
    let mut registry = ClassRegistry::new();
    let id: Result<ClassId, LinkError> = registry.define(ClassDef::new("java/lang/Object", None));
    assert!(id.is_ok());
    assert_eq!(registry.len(), 1);
}

/// Test link contract: link(&mut ClassRegistry, MethodId) -> Result<Arc<LinkedCode>, LinkError>
#[test]
fn contract_link() {
    let mut registry = ClassRegistry::new();
    registry.define(ClassDef::new("java/lang/Object", None)).unwrap();
    let mut b = CodeBuilder::new(0, 0);
    b.op(Opcode::Return);
    let mut def = ClassDef::new("A", Some("java/lang/Object"));
    def.method("f", "()V", access::STATIC, b.finish().unwrap());
    let class = registry.define(def).unwrap();
    let method: MethodId = registry.declared_method(class, "f", "()V").unwrap();
    let linked: Arc<LinkedCode> = link(&mut registry, method).unwrap();
    assert_eq!(linked.method, method);
}

/// Test VirtualPointers contract: intern(name, descriptor) -> VirtualPointer
#[test]
fn contract_virtual_pointers() {
    let mut vptrs = VirtualPointers::new();
    let vp: VirtualPointer = vptrs.intern("run", "()V");
    assert_eq!(vp, VirtualPointer(0));
}

/// Test descriptor contracts: FieldType::parse / MethodDescriptor::parse
#[test]
fn contract_descriptors() {
    assert_eq!(
        FieldType::parse("[B").unwrap(),
        FieldType::Array(Box::new(FieldType::Primitive(ArrayKind::Byte)))
    );
    assert_eq!(MethodDescriptor::parse("(Z)V").unwrap().params.len(), 1);
}

/// Test ConstantPool contract: index 0 is reserved
#[test]
fn contract_constant_pool_reserved_zero() {
    let mut pool = ConstantPool::new();
    assert!(pool.get(0).is_none());
    assert_eq!(pool.integer(5), 1);
}
