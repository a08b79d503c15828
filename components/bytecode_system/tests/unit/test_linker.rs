//! Tests for the linker

use bytecode_system::{
    access, link, ClassDef, ClassRegistry, CodeBuilder, ExceptionTableEntry, Opcode, Operand,
    OBJECT_CLASS,
};
use core_types::LinkErrorKind;

fn with_object() -> ClassRegistry {
    let mut registry = ClassRegistry::new();
    registry.define(ClassDef::new(OBJECT_CLASS, None)).unwrap();
    registry
}

fn define_static(
    registry: &mut ClassRegistry,
    mut def: ClassDef,
    name: &str,
    descriptor: &str,
    code: bytecode_system::Code,
) -> bytecode_system::MethodId {
    def.method(name, descriptor, access::STATIC, code);
    let class = registry.define(def).unwrap();
    registry.declared_method(class, name, descriptor).unwrap()
}

/// Test tableswitch offsets become instruction indices
#[test]
fn test_tableswitch_targets() {
    let mut registry = with_object();
    let mut b = CodeBuilder::new(1, 1);
    let (zero, one, two, other) = (b.new_label(), b.new_label(), b.new_label(), b.new_label());
    b.iload(0).tableswitch(0, other, &[zero, one, two]);
    b.bind(zero).iconst(10).op(Opcode::Ireturn);
    b.bind(one).iconst(11).op(Opcode::Ireturn);
    b.bind(two).iconst(12).op(Opcode::Ireturn);
    b.bind(other).iconst(-1).op(Opcode::Ireturn);
    let def = ClassDef::new("S", Some(OBJECT_CLASS));
    let method = define_static(&mut registry, def, "f", "(I)I", b.finish().unwrap());

    let linked = link(&mut registry, method).unwrap();
    assert_eq!(
        linked.instructions[1].operand,
        Operand::Table {
            low: 0,
            default: 8,
            targets: vec![2, 4, 6].into_boxed_slice(),
        }
    );
}

/// Test a branch into the middle of an instruction is rejected
#[test]
fn test_bad_branch_target() {
    let mut registry = with_object();
    // goto +1 lands inside the goto itself
    let code = bytecode_system::Code::new(0, 0, vec![0xa7, 0x00, 0x01, 0xb1]);
    let def = ClassDef::new("S", Some(OBJECT_CLASS));
    let method = define_static(&mut registry, def, "f", "()V", code);
    let err = link(&mut registry, method).unwrap_err();
    assert_eq!(err.kind, LinkErrorKind::BadBranchTarget { target: 1 });
}

/// Test virtual calls resolve to a virtual pointer and argument count
#[test]
fn test_invokevirtual_becomes_virtual_pointer() {
    let mut registry = with_object();
    let mut target = CodeBuilder::new(1, 3);
    target.iload(1).op(Opcode::Ireturn);
    let mut callee = ClassDef::new("Counter", Some(OBJECT_CLASS));
    callee.method("pick", "(IJ)I", access::PUBLIC, target.finish().unwrap());
    registry.define(callee).unwrap();

    let mut def = ClassDef::new("Caller", Some(OBJECT_CLASS));
    let pick = def.constant_pool.method("Counter", "pick", "(IJ)I");
    let mut b = CodeBuilder::new(3, 1);
    b.aload(0).iconst(1).op(Opcode::Lconst0);
    b.op_u16(Opcode::Invokevirtual, pick).op(Opcode::Ireturn);
    let method = define_static(&mut registry, def, "call", "(LCounter;)I", b.finish().unwrap());

    let linked = link(&mut registry, method).unwrap();
    let vp = registry.virtual_pointers().get("pick", "(IJ)I").unwrap();
    match linked.instructions[3].operand {
        Operand::Virtual { vptr, arg_count, .. } => {
            assert_eq!(vptr, vp);
            assert_eq!(arg_count, 3);
        }
        ref other => panic!("unexpected operand {:?}", other),
    }
}

/// Test anewarray and newarray materialize array classes
#[test]
fn test_array_allocation_classes() {
    let mut registry = with_object();
    let mut def = ClassDef::new("A", Some(OBJECT_CLASS));
    let object = def.constant_pool.class(OBJECT_CLASS);
    let mut b = CodeBuilder::new(1, 0);
    b.iconst(3).op_u16(Opcode::Anewarray, object).op(Opcode::Pop);
    b.iconst(3).newarray(bytecode_system::ArrayKind::Char).op(Opcode::Pop);
    b.op(Opcode::Return);
    let method = define_static(&mut registry, def, "f", "()V", b.finish().unwrap());

    let linked = link(&mut registry, method).unwrap();
    let objects = registry.lookup("[Ljava/lang/Object;").unwrap();
    let chars = registry.lookup("[C").unwrap();
    assert_eq!(linked.instructions[1].operand, Operand::Class(objects));
    assert_eq!(linked.instructions[4].operand, Operand::Class(chars));
}

/// Test exception table handler offsets become indices and catch types resolve
#[test]
fn test_exception_table_linking() {
    let mut registry = with_object();
    let mut def = ClassDef::new("A", Some(OBJECT_CLASS));
    let catch = def.constant_pool.class(OBJECT_CLASS);
    let mut b = CodeBuilder::new(1, 0);
    let (start, end, handler) = (b.new_label(), b.new_label(), b.new_label());
    b.bind(start).op(Opcode::AconstNull).op(Opcode::Athrow);
    b.bind(end).bind(handler).op(Opcode::Return);
    b.handler(start, end, handler, catch);
    b.handler(start, end, handler, 0);
    let method = define_static(&mut registry, def, "f", "()V", b.finish().unwrap());

    let linked = link(&mut registry, method).unwrap();
    assert_eq!(linked.handlers.len(), 2);
    assert_eq!(linked.handlers[0].handler, 2);
    assert_eq!(linked.handlers[0].catch_type, registry.lookup(OBJECT_CLASS));
    assert_eq!(linked.handlers[1].catch_type, None);
}

/// Test a handler pointing between instructions is rejected
#[test]
fn test_bad_handler_offset() {
    let mut registry = with_object();
    let mut code = bytecode_system::Code::new(1, 0, vec![0x10, 0x05, 0x57, 0xb1]);
    code.exception_table.push(ExceptionTableEntry {
        start_pc: 0,
        end_pc: 2,
        handler_pc: 1,
        catch_type: 0,
    });
    let def = ClassDef::new("A", Some(OBJECT_CLASS));
    let method = define_static(&mut registry, def, "f", "()V", code);
    assert!(matches!(
        link(&mut registry, method).unwrap_err().kind,
        LinkErrorKind::BadBranchTarget { target: 1 }
    ));
}

/// Test ldc resolves ints, strings and classes; ldc2_w requires wide constants
#[test]
fn test_ldc_constants() {
    let mut registry = with_object();
    let mut def = ClassDef::new("A", Some(OBJECT_CLASS));
    let big = def.constant_pool.integer(1 << 20);
    let text = def.constant_pool.string("hi");
    let class = def.constant_pool.class("A");
    let mut b = CodeBuilder::new(3, 0);
    b.ldc(big).ldc(text).ldc(class).op(Opcode::Return);
    let method = define_static(&mut registry, def, "f", "()V", b.finish().unwrap());
    let linked = link(&mut registry, method).unwrap();
    assert_eq!(linked.instructions[0].operand, Operand::Int(1 << 20));
    assert_eq!(linked.instructions[1].operand, Operand::String("hi".into()));
    assert_eq!(
        linked.instructions[2].operand,
        Operand::Class(registry.lookup("A").unwrap())
    );

    let mut def = ClassDef::new("B", Some(OBJECT_CLASS));
    let int = def.constant_pool.integer(1);
    let mut b = CodeBuilder::new(2, 0);
    b.ldc2(int).op(Opcode::Return);
    let method = define_static(&mut registry, def, "g", "()V", b.finish().unwrap());
    assert!(matches!(
        link(&mut registry, method).unwrap_err().kind,
        LinkErrorKind::BadConstant { .. }
    ));
}

/// Test jsr is left for the interpreter to reject
#[test]
fn test_jsr_left_unresolved() {
    let mut registry = with_object();
    let code = bytecode_system::Code::new(1, 1, vec![0xa8, 0x00, 0x03, 0xb1]);
    let def = ClassDef::new("A", Some(OBJECT_CLASS));
    let method = define_static(&mut registry, def, "f", "()V", code);
    let linked = link(&mut registry, method).unwrap();
    assert_eq!(linked.instructions[0].opcode, Opcode::Jsr);
    assert_eq!(linked.instructions[0].operand, Operand::None);
}

/// Test native methods cannot be linked
#[test]
fn test_native_method_has_no_code() {
    let mut registry = with_object();
    let class = registry
        .define(ClassDef::new("N", Some(OBJECT_CLASS)).with_method(
            bytecode_system::MethodDef::native("hash", "()I", access::PUBLIC),
        ))
        .unwrap();
    let method = registry.declared_method(class, "hash", "()I").unwrap();
    assert_eq!(
        link(&mut registry, method).unwrap_err().kind,
        LinkErrorKind::NoCode
    );
}
