//! Integration tests for the interpreter
//!
//! Whole programs assembled in memory and driven through `Vm::step`:
//! monitors, wait/notify, sleeping, class initialization, collection and
//! the bootstrap library.

use bytecode_system::{access, ArrayKind, ClassDef, ClassId, CodeBuilder, Opcode};
use core_types::{Reference, Value, ValueTag, VmError};
use interpreter::{Clock, ManualClock, StepOutcome, ThreadExit, VectorData, Vm, VmConfig, Waiting};
use std::sync::Arc;

const STEP_LIMIT: usize = 100_000;

fn vm() -> Vm {
    Vm::new(VmConfig::default()).unwrap()
}

fn vm_with_clock(start: u64) -> (Vm, ManualClock) {
    let clock = ManualClock::new(start);
    let vm = Vm::with_clock(VmConfig::default(), Arc::new(clock.clone())).unwrap();
    (vm, clock)
}

fn run(vm: &mut Vm, id: u16) -> ThreadExit {
    for _ in 0..STEP_LIMIT {
        if let StepOutcome::Terminated(exit) = vm.step(id).unwrap() {
            return exit;
        }
    }
    panic!("thread {} did not finish", id);
}

fn run_until_waiting(vm: &mut Vm, id: u16) {
    for _ in 0..STEP_LIMIT {
        match vm.step(id).unwrap() {
            StepOutcome::Waiting => return,
            StepOutcome::Terminated(exit) => panic!("thread {} ended early: {:?}", id, exit),
            _ => {}
        }
    }
    panic!("thread {} never waited", id);
}

/// Round-robin every runnable thread until none is left
fn run_all(vm: &mut Vm) {
    for _ in 0..STEP_LIMIT {
        let runnable = vm.threads().runnable().to_vec();
        if runnable.is_empty() {
            assert_eq!(vm.threads().waiting_count(), 0, "deadlocked");
            return;
        }
        for id in runnable {
            vm.step(id).unwrap();
        }
    }
    panic!("threads did not finish");
}

/// `app/Box`: a one-slot mailbox with synchronized `take` and `put`
fn define_box(vm: &mut Vm) -> ClassId {
    let mut def = ClassDef::new("app/Box", Some("java/lang/Object"));
    def.field("value", "I", access::PRIVATE);
    let value = def.constant_pool.field("app/Box", "value", "I");
    let wait = def.constant_pool.method("java/lang/Object", "wait", "()V");
    let notify_all = def.constant_pool.method("java/lang/Object", "notifyAll", "()V");

    let mut take = CodeBuilder::new(2, 1);
    let top = take.here();
    let ready = take.new_label();
    take.aload(0)
        .op_u16(Opcode::Getfield, value)
        .branch(Opcode::Ifne, ready)
        .aload(0)
        .op_u16(Opcode::Invokevirtual, wait)
        .branch(Opcode::Goto, top)
        .bind(ready)
        .aload(0)
        .op_u16(Opcode::Getfield, value)
        .op(Opcode::Ireturn);
    def.method(
        "take",
        "()I",
        access::PUBLIC | access::SYNCHRONIZED,
        take.finish().unwrap(),
    );

    let mut put = CodeBuilder::new(2, 2);
    put.aload(0)
        .iload(1)
        .op_u16(Opcode::Putfield, value)
        .aload(0)
        .op_u16(Opcode::Invokevirtual, notify_all)
        .op(Opcode::Return);
    def.method(
        "put",
        "(I)V",
        access::PUBLIC | access::SYNCHRONIZED,
        put.finish().unwrap(),
    );
    vm.define_class(def).unwrap()
}

// ============================================================================
// Monitors and wait/notify
// ============================================================================

#[test]
fn test_wait_notify_handoff() {
    let mut vm = vm();
    let class = define_box(&mut vm);
    let cell = vm.new_instance(class).unwrap();
    let take = vm.find_method("app/Box", "take", "()I").unwrap();
    let put = vm.find_method("app/Box", "put", "(I)V").unwrap();

    let consumer = vm.spawn(take, &[Value::Reference(cell)]).unwrap();
    run_until_waiting(&mut vm, consumer);
    assert_eq!(
        vm.threads().waiting(consumer),
        Some(Waiting {
            wake_at: None,
            monitor: Some(cell)
        })
    );
    assert!(vm.heap().get(cell).unwrap().monitor.is_free());

    let producer = vm
        .spawn(put, &[Value::Reference(cell), Value::Int(42)])
        .unwrap();
    assert_eq!(run(&mut vm, producer), ThreadExit::Returned(None));
    assert!(vm.threads().is_runnable(consumer));
    assert_eq!(
        run(&mut vm, consumer),
        ThreadExit::Returned(Some(Value::Int(42)))
    );
    assert!(vm.heap().get(cell).unwrap().monitor.is_free());
}

#[test]
fn test_contended_monitor_retries() {
    let mut vm = vm();
    let class = define_box(&mut vm);
    let cell = vm.new_instance(class).unwrap();
    let put = vm.find_method("app/Box", "put", "(I)V").unwrap();

    vm.heap_mut()
        .get_mut(cell)
        .unwrap()
        .monitor
        .enter(99)
        .unwrap();
    let producer = vm
        .spawn(put, &[Value::Reference(cell), Value::Int(7)])
        .unwrap();
    assert_eq!(vm.step(producer).unwrap(), StepOutcome::Retry);
    assert_eq!(vm.step(producer).unwrap(), StepOutcome::Retry);

    vm.heap_mut().get_mut(cell).unwrap().monitor.exit(99).unwrap();
    assert_eq!(run(&mut vm, producer), ThreadExit::Returned(None));
    assert_eq!(vm.get_field(cell, "value").unwrap(), Value::Int(7));
}

#[test]
fn test_monitor_reentrancy() {
    let mut vm = vm();
    let mut body = CodeBuilder::new(2, 1);
    body.aload(0)
        .op(Opcode::Monitorenter)
        .aload(0)
        .op(Opcode::Monitorenter)
        .aload(0)
        .op(Opcode::Monitorexit)
        .aload(0)
        .op(Opcode::Monitorexit)
        .iconst(1)
        .op(Opcode::Ireturn);
    let mut def = ClassDef::new("app/Locks", Some("java/lang/Object"));
    def.method(
        "nested",
        "(Ljava/lang/Object;)I",
        access::STATIC,
        body.finish().unwrap(),
    );
    vm.define_class(def).unwrap();

    let object = vm.lookup_class("java/lang/Object").unwrap();
    let target = vm.new_instance(object).unwrap();
    let nested = vm
        .find_method("app/Locks", "nested", "(Ljava/lang/Object;)I")
        .unwrap();
    assert_eq!(
        vm.call_now(nested, &[Value::Reference(target)]).unwrap(),
        Some(Value::Int(1))
    );
    assert!(vm.heap().get(target).unwrap().monitor.is_free());
}

#[test]
fn test_monitorexit_without_owning() {
    let mut vm = vm();
    let mut body = CodeBuilder::new(1, 1);
    body.aload(0).op(Opcode::Monitorexit).op(Opcode::Return);
    let mut def = ClassDef::new("app/BadLock", Some("java/lang/Object"));
    def.method(
        "release",
        "(Ljava/lang/Object;)V",
        access::STATIC,
        body.finish().unwrap(),
    );
    vm.define_class(def).unwrap();

    let object = vm.lookup_class("java/lang/Object").unwrap();
    let target = vm.new_instance(object).unwrap();
    let release = vm
        .find_method("app/BadLock", "release", "(Ljava/lang/Object;)V")
        .unwrap();
    assert!(matches!(
        vm.call_now(release, &[Value::Reference(target)]),
        Err(VmError::UncaughtException { class, .. })
            if class == "java/lang/IllegalMonitorStateException"
    ));
}

#[test]
fn test_synchronized_return_without_monitor_throws_from_callee() {
    let mut vm = vm();
    let mut def = ClassDef::new("app/Leaky", Some("java/lang/Object"));
    let leave = def.constant_pool.method("app/Leaky", "leave", "()V");
    let mut body = CodeBuilder::new(1, 1);
    body.aload(0).op(Opcode::Monitorexit).op(Opcode::Return);
    def.method(
        "leave",
        "()V",
        access::PUBLIC | access::SYNCHRONIZED,
        body.finish().unwrap(),
    );
    let mut run_body = CodeBuilder::new(1, 1);
    run_body
        .aload(0)
        .op_u16(Opcode::Invokevirtual, leave)
        .op(Opcode::Return);
    def.method(
        "run",
        "(Lapp/Leaky;)V",
        access::STATIC,
        run_body.finish().unwrap(),
    );
    let class = vm.define_class(def).unwrap();

    let leaky = vm.new_instance(class).unwrap();
    let run_method = vm.find_method("app/Leaky", "run", "(Lapp/Leaky;)V").unwrap();
    match vm.call_now(run_method, &[Value::Reference(leaky)]) {
        Err(VmError::UncaughtException { class, trace, .. }) => {
            assert_eq!(class, "java/lang/IllegalMonitorStateException");
            assert_eq!(trace.len(), 2);
            assert_eq!(trace[0].method_name, "leave");
            assert_eq!(trace[1].method_name, "run");
        }
        other => panic!("expected IllegalMonitorStateException, got {:?}", other),
    }
    assert!(vm.heap().get(leaky).unwrap().monitor.is_free());
}

#[test]
fn test_notify_without_owning() {
    let mut vm = vm();
    let mut def = ClassDef::new("app/Rude", Some("java/lang/Object"));
    let notify = def.constant_pool.method("java/lang/Object", "notify", "()V");
    let mut body = CodeBuilder::new(1, 1);
    body.aload(0)
        .op_u16(Opcode::Invokevirtual, notify)
        .op(Opcode::Return);
    def.method(
        "poke",
        "(Ljava/lang/Object;)V",
        access::STATIC,
        body.finish().unwrap(),
    );
    vm.define_class(def).unwrap();

    let object = vm.lookup_class("java/lang/Object").unwrap();
    let target = vm.new_instance(object).unwrap();
    let poke = vm
        .find_method("app/Rude", "poke", "(Ljava/lang/Object;)V")
        .unwrap();
    match vm.call_now(poke, &[Value::Reference(target)]) {
        Err(VmError::UncaughtException { class, message, .. }) => {
            assert_eq!(class, "java/lang/IllegalMonitorStateException");
            assert_eq!(message.as_deref(), Some("current thread not owner"));
        }
        other => panic!("expected IllegalMonitorStateException, got {:?}", other),
    }
}

// ============================================================================
// Sleeping and interrupts
// ============================================================================

#[test]
fn test_sleep_wakes_on_time() {
    let (mut vm, clock) = vm_with_clock(1_000);
    let mut def = ClassDef::new("app/Nap", Some("java/lang/Object"));
    let sleep = def.constant_pool.method("java/lang/Thread", "sleep", "(J)V");
    let fifty = def.constant_pool.long(50);
    let mut body = CodeBuilder::new(2, 0);
    body.ldc2(fifty)
        .op_u16(Opcode::Invokestatic, sleep)
        .iconst(1)
        .op(Opcode::Ireturn);
    def.method("nap", "()I", access::STATIC, body.finish().unwrap());
    vm.define_class(def).unwrap();

    let nap = vm.find_method("app/Nap", "nap", "()I").unwrap();
    let id = vm.spawn(nap, &[]).unwrap();
    run_until_waiting(&mut vm, id);
    assert_eq!(vm.threads().waiting(id).unwrap().wake_at, Some(1_050));

    clock.advance(49);
    assert_eq!(vm.threads_mut().wake_due(clock.now_ms()), 0);
    clock.advance(1);
    assert_eq!(vm.threads_mut().wake_due(clock.now_ms()), 1);
    assert_eq!(run(&mut vm, id), ThreadExit::Returned(Some(Value::Int(1))));
}

#[test]
fn test_interrupt_wakes_sleeping_thread() {
    let mut vm = vm();
    let mut def = ClassDef::new("app/Sleeper", Some("java/lang/Thread"));
    let sleep = def.constant_pool.method("java/lang/Thread", "sleep", "(J)V");
    let interrupt = def.constant_pool.method("java/lang/Thread", "interrupt", "()V");
    let long_time = def.constant_pool.long(10_000);
    let mut run_body = CodeBuilder::new(2, 1);
    run_body
        .ldc2(long_time)
        .op_u16(Opcode::Invokestatic, sleep)
        .op(Opcode::Return);
    def.method("run", "()V", access::PUBLIC, run_body.finish().unwrap());
    let mut wake = CodeBuilder::new(1, 1);
    wake.aload(0)
        .op_u16(Opcode::Invokevirtual, interrupt)
        .op(Opcode::Return);
    def.method(
        "wake",
        "(Ljava/lang/Thread;)V",
        access::STATIC,
        wake.finish().unwrap(),
    );
    let class = vm.define_class(def).unwrap();

    let sleeper = vm.new_instance(class).unwrap();
    let id = vm.start_thread(sleeper).unwrap();
    assert_eq!(
        vm.get_field(sleeper, "threadId").unwrap(),
        Value::Int(id as i32)
    );
    run_until_waiting(&mut vm, id);

    let wake = vm
        .find_method("app/Sleeper", "wake", "(Ljava/lang/Thread;)V")
        .unwrap();
    vm.call_now(wake, &[Value::Reference(sleeper)]).unwrap();
    assert!(vm.threads().is_runnable(id));

    match run(&mut vm, id) {
        ThreadExit::Threw { class, .. } => assert_eq!(class, "java/lang/InterruptedException"),
        other => panic!("expected InterruptedException, got {:?}", other),
    }
    assert_eq!(vm.get_field(sleeper, "threadId").unwrap(), Value::Int(0));
}

/// `app/Catcher extends Thread`: `run()` blocks in `body`, which covers the
/// blocking invoke with an InterruptedException handler that sets `caught`
fn define_catcher(vm: &mut Vm, body: impl FnOnce(&mut ClassDef, &mut CodeBuilder)) -> ClassId {
    let mut def = ClassDef::new("app/Catcher", Some("java/lang/Thread"));
    def.field("caught", "I", access::STATIC);
    let interrupt = def.constant_pool.method("java/lang/Thread", "interrupt", "()V");
    let mut run_body = CodeBuilder::new(3, 1);
    body(&mut def, &mut run_body);
    def.method("run", "()V", access::PUBLIC, run_body.finish().unwrap());
    let mut wake = CodeBuilder::new(1, 1);
    wake.aload(0)
        .op_u16(Opcode::Invokevirtual, interrupt)
        .op(Opcode::Return);
    def.method(
        "wake",
        "(Ljava/lang/Thread;)V",
        access::STATIC,
        wake.finish().unwrap(),
    );
    vm.define_class(def).unwrap()
}

fn interrupt_catcher(vm: &mut Vm, class: ClassId) -> Reference {
    let catcher = vm.new_instance(class).unwrap();
    let id = vm.start_thread(catcher).unwrap();
    run_until_waiting(vm, id);

    let wake = vm
        .find_method("app/Catcher", "wake", "(Ljava/lang/Thread;)V")
        .unwrap();
    vm.call_now(wake, &[Value::Reference(catcher)]).unwrap();
    assert_eq!(run(vm, id), ThreadExit::Returned(None));
    catcher
}

#[test]
fn test_interrupted_sleep_is_caught_around_the_call() {
    let mut vm = vm();
    let class = define_catcher(&mut vm, |def, body| {
        let sleep = def.constant_pool.method("java/lang/Thread", "sleep", "(J)V");
        let caught = def.constant_pool.field("app/Catcher", "caught", "I");
        let interrupted = def.constant_pool.class("java/lang/InterruptedException");
        let long_time = def.constant_pool.long(10_000);
        let done = body.new_label();
        let start = body.here();
        body.ldc2(long_time).op_u16(Opcode::Invokestatic, sleep);
        let end = body.here();
        body.branch(Opcode::Goto, done);
        let handler = body.here();
        body.op(Opcode::Pop)
            .iconst(7)
            .op_u16(Opcode::Putstatic, caught)
            .bind(done)
            .op(Opcode::Return);
        body.handler(start, end, handler, interrupted);
    });

    interrupt_catcher(&mut vm, class);
    assert_eq!(vm.get_static(class, "caught"), Some(Value::Int(7)));
}

#[test]
fn test_interrupted_wait_is_caught_with_the_monitor_held() {
    let mut vm = vm();
    let class = define_catcher(&mut vm, |def, body| {
        let wait = def.constant_pool.method("java/lang/Object", "wait", "()V");
        let caught = def.constant_pool.field("app/Catcher", "caught", "I");
        let interrupted = def.constant_pool.class("java/lang/InterruptedException");
        let done = body.new_label();
        body.aload(0).op(Opcode::Monitorenter);
        let start = body.here();
        body.aload(0).op_u16(Opcode::Invokevirtual, wait);
        let end = body.here();
        body.branch(Opcode::Goto, done);
        let handler = body.here();
        body.op(Opcode::Pop)
            .iconst(7)
            .op_u16(Opcode::Putstatic, caught)
            .bind(done)
            .aload(0)
            .op(Opcode::Monitorexit)
            .op(Opcode::Return);
        body.handler(start, end, handler, interrupted);
    });

    let catcher = interrupt_catcher(&mut vm, class);
    assert_eq!(vm.get_static(class, "caught"), Some(Value::Int(7)));
    assert!(vm.heap().get(catcher).unwrap().monitor.is_free());
}

#[test]
fn test_interrupt_trace_points_at_the_blocking_call() {
    let mut vm = vm();
    let class = define_catcher(&mut vm, |def, body| {
        let sleep = def.constant_pool.method("java/lang/Thread", "sleep", "(J)V");
        let long_time = def.constant_pool.long(10_000);
        body.ldc2(long_time)
            .op_u16(Opcode::Invokestatic, sleep)
            .op(Opcode::Return);
    });
    let catcher = vm.new_instance(class).unwrap();
    let id = vm.start_thread(catcher).unwrap();
    run_until_waiting(&mut vm, id);
    let wake = vm
        .find_method("app/Catcher", "wake", "(Ljava/lang/Thread;)V")
        .unwrap();
    vm.call_now(wake, &[Value::Reference(catcher)]).unwrap();

    match run(&mut vm, id) {
        ThreadExit::Threw { class, trace, .. } => {
            assert_eq!(class, "java/lang/InterruptedException");
            // ldc2_w takes three bytes; the invoke follows it
            assert_eq!(trace[0].offset, 3);
        }
        other => panic!("expected InterruptedException, got {:?}", other),
    }
}

#[test]
fn test_guest_thread_runs_its_runnable() {
    let mut vm = vm();

    let mut job = ClassDef::new("app/Job", Some("java/lang/Object")).implements("java/lang/Runnable");
    job.field("runs", "I", access::STATIC);
    let runs = job.constant_pool.field("app/Job", "runs", "I");
    let object_init = job.constant_pool.method("java/lang/Object", "<init>", "()V");
    let mut init = CodeBuilder::new(1, 1);
    init.aload(0)
        .op_u16(Opcode::Invokespecial, object_init)
        .op(Opcode::Return);
    job.method("<init>", "()V", access::PUBLIC, init.finish().unwrap());
    let mut run_body = CodeBuilder::new(2, 1);
    run_body
        .op_u16(Opcode::Getstatic, runs)
        .iconst(1)
        .op(Opcode::Iadd)
        .op_u16(Opcode::Putstatic, runs)
        .op(Opcode::Return);
    job.method("run", "()V", access::PUBLIC, run_body.finish().unwrap());
    let job_class = vm.define_class(job).unwrap();

    let mut main = ClassDef::new("app/Main", Some("java/lang/Object"));
    let thread = main.constant_pool.class("java/lang/Thread");
    let job_ref = main.constant_pool.class("app/Job");
    let job_init = main.constant_pool.method("app/Job", "<init>", "()V");
    let thread_init = main
        .constant_pool
        .method("java/lang/Thread", "<init>", "(Ljava/lang/Runnable;)V");
    let start = main.constant_pool.method("java/lang/Thread", "start", "()V");
    let mut body = CodeBuilder::new(4, 0);
    body.op_u16(Opcode::New, thread)
        .op(Opcode::Dup)
        .op_u16(Opcode::New, job_ref)
        .op(Opcode::Dup)
        .op_u16(Opcode::Invokespecial, job_init)
        .op_u16(Opcode::Invokespecial, thread_init)
        .op_u16(Opcode::Invokevirtual, start)
        .op(Opcode::Return);
    main.method("main", "()V", access::STATIC, body.finish().unwrap());
    vm.define_class(main).unwrap();

    let entry = vm.find_method("app/Main", "main", "()V").unwrap();
    vm.spawn(entry, &[]).unwrap();
    run_all(&mut vm);
    assert_eq!(vm.get_static(job_class, "runs"), Some(Value::Int(1)));
    assert!(vm.threads().is_empty());
}

// ============================================================================
// Class initialization
// ============================================================================

#[test]
fn test_superclass_initializes_first_and_once() {
    let mut vm = vm();

    let mut base = ClassDef::new("app/Base", Some("java/lang/Object"));
    base.field("seen", "I", access::STATIC);
    let seen = base.constant_pool.field("app/Base", "seen", "I");
    let mut clinit = CodeBuilder::new(1, 0);
    clinit
        .iconst(5)
        .op_u16(Opcode::Putstatic, seen)
        .op(Opcode::Return);
    base.method("<clinit>", "()V", access::STATIC, clinit.finish().unwrap());
    vm.define_class(base).unwrap();

    let mut sub = ClassDef::new("app/Sub", Some("app/Base"));
    sub.field("copy", "I", access::STATIC)
        .field("runs", "I", access::STATIC);
    let base_seen = sub.constant_pool.field("app/Base", "seen", "I");
    let copy = sub.constant_pool.field("app/Sub", "copy", "I");
    let runs = sub.constant_pool.field("app/Sub", "runs", "I");
    let mut clinit = CodeBuilder::new(2, 0);
    clinit
        .op_u16(Opcode::Getstatic, base_seen)
        .op_u16(Opcode::Putstatic, copy)
        .op_u16(Opcode::Getstatic, runs)
        .iconst(1)
        .op(Opcode::Iadd)
        .op_u16(Opcode::Putstatic, runs)
        .op(Opcode::Return);
    sub.method("<clinit>", "()V", access::STATIC, clinit.finish().unwrap());
    let mut get = CodeBuilder::new(1, 0);
    get.op_u16(Opcode::Getstatic, copy).op(Opcode::Ireturn);
    sub.method("get", "()I", access::STATIC, get.finish().unwrap());
    let sub_class = vm.define_class(sub).unwrap();

    let get = vm.find_method("app/Sub", "get", "()I").unwrap();
    assert_eq!(vm.call_now(get, &[]).unwrap(), Some(Value::Int(5)));
    assert_eq!(vm.call_now(get, &[]).unwrap(), Some(Value::Int(5)));
    assert_eq!(vm.get_static(sub_class, "runs"), Some(Value::Int(1)));
}

#[test]
fn test_failed_initializer_poisons_the_class() {
    let mut vm = vm();
    let mut def = ClassDef::new("app/Bad", Some("java/lang/Object"));
    def.field("v", "I", access::STATIC);
    let v = def.constant_pool.field("app/Bad", "v", "I");
    let mut clinit = CodeBuilder::new(2, 0);
    clinit
        .iconst(1)
        .iconst(0)
        .op(Opcode::Idiv)
        .op_u16(Opcode::Putstatic, v)
        .op(Opcode::Return);
    def.method("<clinit>", "()V", access::STATIC, clinit.finish().unwrap());
    let mut get = CodeBuilder::new(1, 0);
    get.op_u16(Opcode::Getstatic, v).op(Opcode::Ireturn);
    def.method("get", "()I", access::STATIC, get.finish().unwrap());
    vm.define_class(def).unwrap();

    let get = vm.find_method("app/Bad", "get", "()I").unwrap();
    assert!(matches!(
        vm.call_now(get, &[]),
        Err(VmError::UncaughtException { class, .. }) if class == "java/lang/ArithmeticException"
    ));
    assert!(matches!(
        vm.call_now(get, &[]),
        Err(VmError::UncaughtException { class, .. }) if class == "java/lang/NoClassDefFoundError"
    ));
}

#[test]
fn test_initialization_in_progress_elsewhere_retries() {
    let (mut vm, clock) = vm_with_clock(0);
    let mut def = ClassDef::new("app/Slow", Some("java/lang/Object"));
    def.field("v", "I", access::STATIC);
    let v = def.constant_pool.field("app/Slow", "v", "I");
    let sleep = def.constant_pool.method("java/lang/Thread", "sleep", "(J)V");
    let mut clinit = CodeBuilder::new(2, 0);
    clinit
        .op(Opcode::Lconst1)
        .op_u16(Opcode::Invokestatic, sleep)
        .iconst(3)
        .op_u16(Opcode::Putstatic, v)
        .op(Opcode::Return);
    def.method("<clinit>", "()V", access::STATIC, clinit.finish().unwrap());
    let mut get = CodeBuilder::new(1, 0);
    get.op_u16(Opcode::Getstatic, v).op(Opcode::Ireturn);
    def.method("get", "()I", access::STATIC, get.finish().unwrap());
    vm.define_class(def).unwrap();

    let get = vm.find_method("app/Slow", "get", "()I").unwrap();
    let first = vm.spawn(get, &[]).unwrap();
    let second = vm.spawn(get, &[]).unwrap();
    run_until_waiting(&mut vm, first);
    assert_eq!(vm.step(second).unwrap(), StepOutcome::Retry);

    clock.advance(1);
    vm.threads_mut().wake_due(clock.now_ms());
    assert_eq!(run(&mut vm, first), ThreadExit::Returned(Some(Value::Int(3))));
    assert_eq!(run(&mut vm, second), ThreadExit::Returned(Some(Value::Int(3))));
}

// ============================================================================
// Garbage collection
// ============================================================================

#[test]
fn test_waiting_thread_keeps_its_locals_alive() {
    let (mut vm, clock) = vm_with_clock(0);
    let mut def = ClassDef::new("app/Holder", Some("java/lang/Object"));
    let object = def.constant_pool.class("java/lang/Object");
    let object_init = def.constant_pool.method("java/lang/Object", "<init>", "()V");
    let sleep = def.constant_pool.method("java/lang/Thread", "sleep", "(J)V");
    let delay = def.constant_pool.long(1_000);
    let mut body = CodeBuilder::new(4, 1);
    body.op_u16(Opcode::New, object)
        .op(Opcode::Dup)
        .op_u16(Opcode::Invokespecial, object_init)
        .astore(0)
        .ldc2(delay)
        .op_u16(Opcode::Invokestatic, sleep)
        .aload(0)
        .op(Opcode::Areturn);
    def.method(
        "hold",
        "()Ljava/lang/Object;",
        access::STATIC,
        body.finish().unwrap(),
    );
    vm.define_class(def).unwrap();

    let hold = vm
        .find_method("app/Holder", "hold", "()Ljava/lang/Object;")
        .unwrap();
    let id = vm.spawn(hold, &[]).unwrap();
    run_until_waiting(&mut vm, id);
    let held = vm.threads().get(id).unwrap().frames()[0]
        .load(0, ValueTag::Reference)
        .unwrap();

    let object_class = vm.lookup_class("java/lang/Object").unwrap();
    let garbage = vm.new_instance(object_class).unwrap();
    vm.collect_garbage();
    let Value::Reference(held) = held else {
        panic!("local 0 should hold a reference");
    };
    assert!(vm.heap().contains(held));
    assert!(!vm.heap().contains(garbage));

    clock.advance(1_000);
    vm.threads_mut().wake_due(clock.now_ms());
    assert_eq!(
        run(&mut vm, id),
        ThreadExit::Returned(Some(Value::Reference(held)))
    );
}

#[test]
fn test_system_gc_is_only_requested() {
    let mut vm = vm();
    let mut def = ClassDef::new("app/Gc", Some("java/lang/Object"));
    let gc = def.constant_pool.method("java/lang/System", "gc", "()V");
    let mut body = CodeBuilder::new(0, 0);
    body.op_u16(Opcode::Invokestatic, gc).op(Opcode::Return);
    def.method("run", "()V", access::STATIC, body.finish().unwrap());
    vm.define_class(def).unwrap();

    let before = vm.gc_stats().collections;
    let run = vm.find_method("app/Gc", "run", "()V").unwrap();
    vm.call_now(run, &[]).unwrap();
    assert_eq!(vm.gc_stats().collections, before);
    assert!(vm.take_gc_request());
}

// ============================================================================
// Bootstrap library
// ============================================================================

fn define_vector_program(vm: &mut Vm) {
    let mut def = ClassDef::new("app/Lists", Some("java/lang/Object"));
    let vector = def.constant_pool.class("java/util/Vector");
    let object = def.constant_pool.class("java/lang/Object");
    let object_init = def.constant_pool.method("java/lang/Object", "<init>", "()V");
    let init = def.constant_pool.method("java/util/Vector", "<init>", "()V");
    let add = def
        .constant_pool
        .method("java/util/Vector", "addElement", "(Ljava/lang/Object;)V");
    let remove = def
        .constant_pool
        .method("java/util/Vector", "removeElementAt", "(I)V");
    let size = def.constant_pool.method("java/util/Vector", "size", "()I");
    let at = def
        .constant_pool
        .method("java/util/Vector", "elementAt", "(I)Ljava/lang/Object;");
    let a = def.constant_pool.string("a");
    let b = def.constant_pool.string("b");

    let mut count = CodeBuilder::new(3, 1);
    count
        .op_u16(Opcode::New, vector)
        .op(Opcode::Dup)
        .op_u16(Opcode::Invokespecial, init)
        .astore(0)
        .aload(0)
        .ldc(a)
        .op_u16(Opcode::Invokevirtual, add)
        .aload(0)
        .ldc(b)
        .op_u16(Opcode::Invokevirtual, add)
        .aload(0)
        .iconst(0)
        .op_u16(Opcode::Invokevirtual, remove)
        .aload(0)
        .op_u16(Opcode::Invokevirtual, size)
        .op(Opcode::Ireturn);
    def.method("count", "()I", access::STATIC, count.finish().unwrap());

    let mut past_end = CodeBuilder::new(3, 0);
    past_end
        .op_u16(Opcode::New, vector)
        .op(Opcode::Dup)
        .op_u16(Opcode::Invokespecial, init)
        .iconst(3)
        .op_u16(Opcode::Invokevirtual, at)
        .op(Opcode::Areturn);
    def.method(
        "pastEnd",
        "()Ljava/lang/Object;",
        access::STATIC,
        past_end.finish().unwrap(),
    );

    let mut holding = CodeBuilder::new(4, 0);
    holding
        .op_u16(Opcode::New, vector)
        .op(Opcode::Dup)
        .op_u16(Opcode::Invokespecial, init)
        .op(Opcode::Dup)
        .op_u16(Opcode::New, object)
        .op(Opcode::Dup)
        .op_u16(Opcode::Invokespecial, object_init)
        .op_u16(Opcode::Invokevirtual, add)
        .op(Opcode::Areturn);
    def.method(
        "holding",
        "()Ljava/util/Vector;",
        access::STATIC,
        holding.finish().unwrap(),
    );
    vm.define_class(def).unwrap();
}

#[test]
fn test_vector_operations() {
    let mut vm = vm();
    define_vector_program(&mut vm);
    let count = vm.find_method("app/Lists", "count", "()I").unwrap();
    assert_eq!(vm.call_now(count, &[]).unwrap(), Some(Value::Int(1)));

    let past_end = vm
        .find_method("app/Lists", "pastEnd", "()Ljava/lang/Object;")
        .unwrap();
    match vm.call_now(past_end, &[]) {
        Err(VmError::UncaughtException { class, message, .. }) => {
            assert_eq!(class, "java/lang/ArrayIndexOutOfBoundsException");
            assert_eq!(message.as_deref(), Some("Index 3 out of bounds for length 0"));
        }
        other => panic!("expected an index error, got {:?}", other),
    }
}

#[test]
fn test_vector_elements_are_traced() {
    let mut vm = vm();
    define_vector_program(&mut vm);
    let holding = vm
        .find_method("app/Lists", "holding", "()Ljava/util/Vector;")
        .unwrap();
    let Some(Value::Reference(list)) = vm.call_now(holding, &[]).unwrap() else {
        panic!("expected a vector");
    };
    vm.pin(list);
    let element = vm.heap().get(list).unwrap().host::<VectorData>().unwrap().elements()[0];

    vm.collect_garbage();
    assert!(vm.heap().contains(element));

    vm.unpin(list);
    vm.collect_garbage();
    assert!(!vm.heap().contains(list));
    assert!(!vm.heap().contains(element));
}

#[test]
fn test_string_natives() {
    let mut vm = vm();
    let mut def = ClassDef::new("app/Text", Some("java/lang/Object"));
    let hello = def.constant_pool.string("hello");
    let world = def.constant_pool.string(" world");
    let ab = def.constant_pool.string("ab");
    let concat = def.constant_pool.method(
        "java/lang/String",
        "concat",
        "(Ljava/lang/String;)Ljava/lang/String;",
    );
    let length = def.constant_pool.method("java/lang/String", "length", "()I");
    let hash = def.constant_pool.method("java/lang/String", "hashCode", "()I");
    let equals = def
        .constant_pool
        .method("java/lang/String", "equals", "(Ljava/lang/Object;)Z");
    let value_of = def
        .constant_pool
        .method("java/lang/String", "valueOf", "(I)Ljava/lang/String;");
    let twelve = def.constant_pool.string("12");

    let mut joined = CodeBuilder::new(2, 0);
    joined
        .ldc(hello)
        .ldc(world)
        .op_u16(Opcode::Invokevirtual, concat)
        .op_u16(Opcode::Invokevirtual, length)
        .op(Opcode::Ireturn);
    def.method("joined", "()I", access::STATIC, joined.finish().unwrap());

    let mut hashed = CodeBuilder::new(1, 0);
    hashed
        .ldc(ab)
        .op_u16(Opcode::Invokevirtual, hash)
        .op(Opcode::Ireturn);
    def.method("hashed", "()I", access::STATIC, hashed.finish().unwrap());

    // a computed "12" is equal to, but not identical with, the literal
    let mut same = CodeBuilder::new(2, 0);
    let different = same.new_label();
    same.iconst(12)
        .op_u16(Opcode::Invokestatic, value_of)
        .ldc(twelve)
        .branch(Opcode::IfAcmpeq, different)
        .iconst(12)
        .op_u16(Opcode::Invokestatic, value_of)
        .ldc(twelve)
        .op_u16(Opcode::Invokevirtual, equals)
        .op(Opcode::Ireturn)
        .bind(different)
        .iconst(-1)
        .op(Opcode::Ireturn);
    def.method("same", "()I", access::STATIC, same.finish().unwrap());
    vm.define_class(def).unwrap();

    let joined = vm.find_method("app/Text", "joined", "()I").unwrap();
    assert_eq!(vm.call_now(joined, &[]).unwrap(), Some(Value::Int(11)));
    let hashed = vm.find_method("app/Text", "hashed", "()I").unwrap();
    assert_eq!(vm.call_now(hashed, &[]).unwrap(), Some(Value::Int(3105)));
    let same = vm.find_method("app/Text", "same", "()I").unwrap();
    assert_eq!(vm.call_now(same, &[]).unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_class_name_of_instance() {
    let mut vm = vm();
    let class = define_box(&mut vm);
    let mut def = ClassDef::new("app/Names", Some("java/lang/Object"));
    let get_class = def
        .constant_pool
        .method("java/lang/Object", "getClass", "()Ljava/lang/Class;");
    let get_name = def
        .constant_pool
        .method("java/lang/Class", "getName", "()Ljava/lang/String;");
    let mut body = CodeBuilder::new(1, 1);
    body.aload(0)
        .op_u16(Opcode::Invokevirtual, get_class)
        .op_u16(Opcode::Invokevirtual, get_name)
        .op(Opcode::Areturn);
    def.method(
        "nameOf",
        "(Ljava/lang/Object;)Ljava/lang/String;",
        access::STATIC,
        body.finish().unwrap(),
    );
    vm.define_class(def).unwrap();

    let instance = vm.new_instance(class).unwrap();
    let name_of = vm
        .find_method("app/Names", "nameOf", "(Ljava/lang/Object;)Ljava/lang/String;")
        .unwrap();
    let Some(Value::Reference(name)) = vm.call_now(name_of, &[Value::Reference(instance)]).unwrap()
    else {
        panic!("expected a string");
    };
    assert_eq!(vm.string_value(name).as_deref(), Some("app.Box"));
}

#[test]
fn test_arraycopy_handles_overlap() {
    let mut vm = vm();
    let mut def = ClassDef::new("app/Copy", Some("java/lang/Object"));
    let arraycopy = def.constant_pool.method(
        "java/lang/System",
        "arraycopy",
        "(Ljava/lang/Object;ILjava/lang/Object;II)V",
    );
    let mut body = CodeBuilder::new(5, 1);
    body.iconst(3)
        .newarray(ArrayKind::Int)
        .astore(0)
        .aload(0)
        .iconst(0)
        .iconst(7)
        .op(Opcode::Iastore)
        .aload(0)
        .iconst(1)
        .iconst(8)
        .op(Opcode::Iastore)
        .aload(0)
        .iconst(0)
        .aload(0)
        .iconst(1)
        .iconst(2)
        .op_u16(Opcode::Invokestatic, arraycopy)
        .aload(0)
        .iconst(2)
        .op(Opcode::Iaload)
        .op(Opcode::Ireturn);
    def.method("shift", "()I", access::STATIC, body.finish().unwrap());

    let mut mismatch = CodeBuilder::new(5, 0);
    mismatch
        .iconst(1)
        .newarray(ArrayKind::Int)
        .iconst(0)
        .iconst(1)
        .newarray(ArrayKind::Long)
        .iconst(0)
        .iconst(1)
        .op_u16(Opcode::Invokestatic, arraycopy)
        .op(Opcode::Return);
    def.method("mismatch", "()V", access::STATIC, mismatch.finish().unwrap());
    vm.define_class(def).unwrap();

    let shift = vm.find_method("app/Copy", "shift", "()I").unwrap();
    assert_eq!(vm.call_now(shift, &[]).unwrap(), Some(Value::Int(8)));
    let mismatch = vm.find_method("app/Copy", "mismatch", "()V").unwrap();
    assert!(matches!(
        vm.call_now(mismatch, &[]),
        Err(VmError::UncaughtException { class, .. }) if class == "java/lang/ArrayStoreException"
    ));
}

#[test]
fn test_uncaught_exception_in_spawned_thread() {
    let mut vm = vm();
    let mut def = ClassDef::new("app/Npe", Some("java/lang/Object"));
    let hash = def.constant_pool.method("java/lang/Object", "hashCode", "()I");
    let mut body = CodeBuilder::new(1, 0);
    body.line(10)
        .op(Opcode::AconstNull)
        .line(11)
        .op_u16(Opcode::Invokevirtual, hash)
        .op(Opcode::Ireturn);
    def.method("run", "()I", access::STATIC, body.finish().unwrap());
    vm.define_class(def).unwrap();

    let run_method = vm.find_method("app/Npe", "run", "()I").unwrap();
    let id = vm.spawn(run_method, &[]).unwrap();
    match run(&mut vm, id) {
        ThreadExit::Threw { class, trace, .. } => {
            assert_eq!(class, "java/lang/NullPointerException");
            assert_eq!(trace[0].method_name, "run");
            assert_eq!(trace[0].line, Some(11));
        }
        other => panic!("expected NullPointerException, got {:?}", other),
    }
    assert!(!vm.threads().contains(id));
}

#[test]
fn test_stepping_unknown_thread() {
    let mut vm = vm();
    assert!(matches!(vm.step(9), Err(VmError::UnknownThread(9))));
    assert!(vm.heap().get(Reference::NULL).is_none());
}
