//! Contract tests for the interpreter API
//!
//! These tests pin down the behavior embedders and the scheduler rely on.

use bytecode_system::{access, ClassDef, CodeBuilder, MethodDef, Opcode};
use core_types::{LinkErrorKind, Value, VmError};
use interpreter::{
    int_arg, ManualClock, NativeResult, StepOutcome, Thread, ThreadExit, Vm, VmConfig,
};
use std::sync::Arc;

fn vm() -> Vm {
    Vm::new(VmConfig::default()).unwrap()
}

fn run(vm: &mut Vm, id: u16) -> ThreadExit {
    for _ in 0..100_000 {
        if let StepOutcome::Terminated(exit) = vm.step(id).unwrap() {
            return exit;
        }
    }
    panic!("thread {} did not finish", id);
}

fn define_static(vm: &mut Vm, class: &str, name: &str, desc: &str, body: CodeBuilder) {
    let mut def = ClassDef::new(class, Some("java/lang/Object"));
    def.method(name, desc, access::PUBLIC | access::STATIC, body.finish().unwrap());
    vm.define_class(def).unwrap();
}

/// Test Vm::new contract: bootstrap classes are loaded
#[test]
fn test_vm_new_contract() {
    let vm = vm();
    for name in [
        "java/lang/Object",
        "java/lang/String",
        "java/lang/Class",
        "java/lang/Thread",
        "java/lang/Throwable",
        "java/lang/NullPointerException",
        "java/lang/InterruptedException",
        "java/util/Vector",
    ] {
        assert!(vm.lookup_class(name).is_ok(), "{} should be loaded", name);
    }
    assert!(vm.threads().is_empty());
}

/// Test find_method contract: missing members are link errors
#[test]
fn test_find_method_missing_contract() {
    let vm = vm();
    match vm.find_method("java/lang/Object", "frobnicate", "()V") {
        Err(VmError::Link(err)) => {
            assert!(matches!(err.kind, LinkErrorKind::MissingMethod { .. }))
        }
        other => panic!("expected a link error, got {:?}", other),
    }
    assert!(vm.lookup_class("app/Missing").is_err());
}

/// Test call_now contract: runs to completion and returns the value
#[test]
fn test_call_now_contract() {
    let mut vm = vm();
    let mut body = CodeBuilder::new(2, 1);
    body.iload(0).iconst(100).op(Opcode::Iadd).op(Opcode::Ireturn);
    define_static(&mut vm, "app/Calc", "plus100", "(I)I", body);

    let method = vm.find_method("app/Calc", "plus100", "(I)I").unwrap();
    let result = vm.call_now(method, &[Value::Int(-1)]).unwrap();
    assert_eq!(result, Some(Value::Int(99)));
    assert!(vm.threads().is_empty(), "synthetic thread is removed");
}

/// Test call_now contract: uncaught exceptions become errors
#[test]
fn test_call_now_uncaught_contract() {
    let mut vm = vm();
    let mut body = CodeBuilder::new(2, 0);
    body.iconst(1).iconst(0).op(Opcode::Idiv).op(Opcode::Ireturn);
    define_static(&mut vm, "app/Div", "boom", "()I", body);

    let method = vm.find_method("app/Div", "boom", "()I").unwrap();
    match vm.call_now(method, &[]) {
        Err(VmError::UncaughtException {
            class,
            message,
            trace,
        }) => {
            assert_eq!(class, "java/lang/ArithmeticException");
            assert_eq!(message.as_deref(), Some("/ by zero"));
            assert_eq!(trace.len(), 1);
            assert_eq!(trace[0].method_name, "boom");
        }
        other => panic!("expected uncaught exception, got {:?}", other),
    }
}

/// Test call_now contract: a call that would sleep is refused
#[test]
fn test_call_now_blocked_contract() {
    let mut vm = vm();
    let mut def = ClassDef::new("app/Sleepy", Some("java/lang/Object"));
    let sleep = def.constant_pool.method("java/lang/Thread", "sleep", "(J)V");
    let mut body = CodeBuilder::new(2, 0);
    body.op(Opcode::Lconst1)
        .op_u16(Opcode::Invokestatic, sleep)
        .op(Opcode::Return);
    def.method("nap", "()V", access::STATIC, body.finish().unwrap());
    vm.define_class(def).unwrap();

    let method = vm.find_method("app/Sleepy", "nap", "()V").unwrap();
    assert!(matches!(
        vm.call_now(method, &[]),
        Err(VmError::SynchronousCallBlocked(name)) if name.contains("nap")
    ));
    assert!(vm.threads().is_empty());
}

/// Test spawn/step contract: a spawned thread is runnable until it ends
#[test]
fn test_spawn_and_step_contract() {
    let mut vm = vm();
    let mut body = CodeBuilder::new(1, 0);
    body.iconst(5).op(Opcode::Ireturn);
    define_static(&mut vm, "app/Five", "five", "()I", body);

    let method = vm.find_method("app/Five", "five", "()I").unwrap();
    let id = vm.spawn(method, &[]).unwrap();
    assert!(vm.threads().is_runnable(id));

    assert_eq!(vm.step(id).unwrap(), StepOutcome::Executed);
    assert_eq!(run(&mut vm, id), ThreadExit::Returned(Some(Value::Int(5))));
    assert!(!vm.threads().contains(id));
    assert!(matches!(vm.step(id), Err(VmError::UnknownThread(_))));
}

/// Test link contract: linking is done once and cached
#[test]
fn test_link_is_idempotent_contract() {
    let mut vm = vm();
    let mut body = CodeBuilder::new(0, 0);
    body.op(Opcode::Return);
    define_static(&mut vm, "app/Once", "run", "()V", body);

    let method = vm.find_method("app/Once", "run", "()V").unwrap();
    let first = vm.link_method(method).unwrap();
    let second = vm.link_method(method).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

/// Test link contract: a missing callee fails at link time, not earlier
#[test]
fn test_link_failure_contract() {
    let mut vm = vm();
    let mut def = ClassDef::new("app/Broken", Some("java/lang/Object"));
    let missing = def.constant_pool.method("app/Nowhere", "gone", "()V");
    let mut body = CodeBuilder::new(0, 0);
    body.op_u16(Opcode::Invokestatic, missing).op(Opcode::Return);
    def.method("run", "()V", access::STATIC, body.finish().unwrap());
    vm.define_class(def).unwrap();

    let method = vm.find_method("app/Broken", "run", "()V").unwrap();
    assert!(matches!(vm.link_method(method), Err(VmError::Link(_))));
}

fn triple(_vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    Ok(Some(Value::Int(int_arg(args, 0)?.wrapping_mul(3))))
}

/// Test register_native contract: bridges receive popped arguments
#[test]
fn test_register_native_contract() {
    let mut vm = vm();
    let def = ClassDef::new("app/Host", Some("java/lang/Object"))
        .with_method(MethodDef::native("triple", "(I)I", access::STATIC));
    vm.define_class(def).unwrap();
    vm.register_native("app/Host", "triple", "(I)I", triple)
        .unwrap();

    let method = vm.find_method("app/Host", "triple", "(I)I").unwrap();
    let mut body = CodeBuilder::new(1, 0);
    let mut caller = ClassDef::new("app/UsesHost", Some("java/lang/Object"));
    let index = caller.constant_pool.method("app/Host", "triple", "(I)I");
    body.iconst(14)
        .op_u16(Opcode::Invokestatic, index)
        .op(Opcode::Ireturn);
    caller.method("run", "()I", access::STATIC, body.finish().unwrap());
    vm.define_class(caller).unwrap();

    let run = vm.find_method("app/UsesHost", "run", "()I").unwrap();
    assert_eq!(vm.call_now(run, &[]).unwrap(), Some(Value::Int(42)));
    assert!(vm.spawn(method, &[Value::Int(1)]).is_err(), "natives have no frame");
}

/// Test register_native contract: only declared methods can be bound
#[test]
fn test_register_native_undeclared_contract() {
    let mut vm = vm();
    assert!(vm
        .register_native("java/lang/Object", "missing", "()V", triple)
        .is_err());
}

/// Test native without a binding contract: calling it is a link error
#[test]
fn test_unbound_native_contract() {
    let mut vm = vm();
    let def = ClassDef::new("app/Unbound", Some("java/lang/Object"))
        .with_method(MethodDef::native("nothing", "()V", access::STATIC));
    vm.define_class(def).unwrap();

    let mut caller = ClassDef::new("app/CallsUnbound", Some("java/lang/Object"));
    let index = caller.constant_pool.method("app/Unbound", "nothing", "()V");
    let mut body = CodeBuilder::new(0, 0);
    body.op_u16(Opcode::Invokestatic, index).op(Opcode::Return);
    caller.method("run", "()V", access::STATIC, body.finish().unwrap());
    vm.define_class(caller).unwrap();

    let run = vm.find_method("app/CallsUnbound", "run", "()V").unwrap();
    match vm.call_now(run, &[]) {
        Err(VmError::Link(err)) => assert_eq!(err.kind, LinkErrorKind::MissingNative),
        other => panic!("expected a link error, got {:?}", other),
    }
}

/// Test field access contract: fields are readable and writable by name
#[test]
fn test_field_access_contract() {
    let mut vm = vm();
    let mut def = ClassDef::new("app/Point", Some("java/lang/Object"));
    def.field("x", "I", access::PUBLIC)
        .field("label", "Ljava/lang/String;", access::PUBLIC);
    let class = vm.define_class(def).unwrap();

    let point = vm.new_instance(class).unwrap();
    assert_eq!(vm.get_field(point, "x").unwrap(), Value::Int(0));
    vm.set_field(point, "x", Value::Int(12)).unwrap();
    assert_eq!(vm.get_field(point, "x").unwrap(), Value::Int(12));
    assert!(vm.get_field(point, "y").is_err());
}

/// Test clock contract: currentTimeMillis reads the injected clock
#[test]
fn test_clock_contract() {
    let clock = ManualClock::new(1_000);
    let mut vm = Vm::with_clock(VmConfig::default(), Arc::new(clock.clone())).unwrap();
    let mut def = ClassDef::new("app/Time", Some("java/lang/Object"));
    let now = def
        .constant_pool
        .method("java/lang/System", "currentTimeMillis", "()J");
    let mut body = CodeBuilder::new(2, 0);
    body.op_u16(Opcode::Invokestatic, now).op(Opcode::Lreturn);
    def.method("now", "()J", access::STATIC, body.finish().unwrap());
    vm.define_class(def).unwrap();

    let method = vm.find_method("app/Time", "now", "()J").unwrap();
    clock.advance(234);
    assert_eq!(vm.call_now(method, &[]).unwrap(), Some(Value::Long(1_234)));
}

/// Test collect_garbage contract: unreachable objects are freed
#[test]
fn test_collect_garbage_contract() {
    let mut vm = vm();
    let kept = vm.new_string("kept").unwrap();
    let dropped = vm.new_string("dropped").unwrap();
    vm.pin(kept);

    let outcome = vm.collect_garbage();
    assert!(outcome.freed >= 1);
    assert!(vm.heap().contains(kept));
    assert!(!vm.heap().contains(dropped));
    assert!(vm.gc_stats().collections >= 1);
}

/// Test StepOutcome contract: only Retry and Waiting are no-progress
#[test]
fn test_step_outcome_progress_contract() {
    assert!(StepOutcome::Executed.made_progress());
    assert!(StepOutcome::Terminated(ThreadExit::Returned(None)).made_progress());
    assert!(!StepOutcome::Retry.made_progress());
    assert!(!StepOutcome::Waiting.made_progress());
}
