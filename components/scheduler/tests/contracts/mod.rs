//! Contract tests for the scheduler API

use bytecode_system::{access, ClassDef, CodeBuilder, Opcode};
use core_types::{Value, VmError};
use interpreter::{ManualClock, StepOutcome, ThreadExit, Vm, VmConfig};
use scheduler::{BunchReport, Pacing, RunExit, Scheduler, SchedulerConfig};
use std::sync::Arc;

fn config(bunch_size: usize) -> SchedulerConfig {
    SchedulerConfig {
        bunch_size,
        bunch_budget_ms: 1,
        pacing: Pacing::Unlimited,
        ..SchedulerConfig::default()
    }
}

/// `app/Work` with:
/// - `one()I` returning 1 in two steps
/// - `spin()V` looping forever
/// - `lock(Ljava/lang/Object;)V` entering and leaving a monitor
/// - `gc()V` calling `System.gc`
/// - `nap(J)V` sleeping
/// - `boom()I` dividing by zero
/// - `outer()V` calling `broken()V`, whose body names a missing method
fn define_work(vm: &mut Vm) {
    let mut def = ClassDef::new("app/Work", Some("java/lang/Object"));
    let broken = def.constant_pool.method("app/Work", "broken", "()V");
    let gone = def.constant_pool.method("app/Work", "gone", "()V");
    let gc = def.constant_pool.method("java/lang/System", "gc", "()V");
    let sleep = def.constant_pool.method("java/lang/Thread", "sleep", "(J)V");

    let mut body = CodeBuilder::new(1, 0);
    body.iconst(1).op(Opcode::Ireturn);
    def.method("one", "()I", access::STATIC, body.finish().unwrap());

    let mut body = CodeBuilder::new(0, 0);
    let top = body.here();
    body.branch(Opcode::Goto, top);
    def.method("spin", "()V", access::STATIC, body.finish().unwrap());

    let mut body = CodeBuilder::new(1, 1);
    body.aload(0)
        .op(Opcode::Monitorenter)
        .aload(0)
        .op(Opcode::Monitorexit)
        .op(Opcode::Return);
    def.method("lock", "(Ljava/lang/Object;)V", access::STATIC, body.finish().unwrap());

    let mut body = CodeBuilder::new(0, 0);
    body.op_u16(Opcode::Invokestatic, gc).op(Opcode::Return);
    def.method("gc", "()V", access::STATIC, body.finish().unwrap());

    let mut body = CodeBuilder::new(2, 2);
    body.lload(0)
        .op_u16(Opcode::Invokestatic, sleep)
        .op(Opcode::Return);
    def.method("nap", "(J)V", access::STATIC, body.finish().unwrap());

    let mut body = CodeBuilder::new(2, 0);
    body.iconst(1).iconst(0).op(Opcode::Idiv).op(Opcode::Ireturn);
    def.method("boom", "()I", access::STATIC, body.finish().unwrap());

    let mut body = CodeBuilder::new(0, 0);
    body.op_u16(Opcode::Invokestatic, broken).op(Opcode::Return);
    def.method("outer", "()V", access::STATIC, body.finish().unwrap());

    let mut body = CodeBuilder::new(0, 0);
    body.op_u16(Opcode::Invokestatic, gone).op(Opcode::Return);
    def.method("broken", "()V", access::STATIC, body.finish().unwrap());

    vm.define_class(def).unwrap();
}

fn scheduler_with(vm: Vm, bunch_size: usize) -> Scheduler {
    let mut vm = vm;
    define_work(&mut vm);
    Scheduler::new(vm, config(bunch_size))
}

fn scheduler(bunch_size: usize) -> Scheduler {
    scheduler_with(Vm::new(VmConfig::default()).unwrap(), bunch_size)
}

fn spawn(scheduler: &mut Scheduler, name: &str, desc: &str, args: &[Value]) -> u16 {
    let method = scheduler.vm().find_method("app/Work", name, desc).unwrap();
    scheduler.register_thread(method, args).unwrap()
}

/// Test run_loop contract: runs every thread to completion
#[test]
fn test_run_loop_finishes_contract() {
    let mut scheduler = scheduler(64);
    let a = spawn(&mut scheduler, "one", "()I", &[]);
    let b = spawn(&mut scheduler, "one", "()I", &[]);

    assert_eq!(scheduler.run_loop().unwrap(), RunExit::Finished);
    assert_eq!(
        scheduler.exits(),
        &[
            (a, ThreadExit::Returned(Some(Value::Int(1)))),
            (b, ThreadExit::Returned(Some(Value::Int(1)))),
        ]
    );
    let stats = scheduler.stats();
    assert_eq!(stats.threads_finished, 2);
    assert_eq!(stats.steps, 4);
    assert!(scheduler.vm().threads().is_empty());
}

/// Test run_bunch contract: one step per runnable thread per pass,
/// in registration order, until the quota is spent
#[test]
fn test_bunch_round_robin_contract() {
    let mut scheduler = scheduler(3);
    let a = spawn(&mut scheduler, "one", "()I", &[]);
    let b = spawn(&mut scheduler, "one", "()I", &[]);

    // a, b, a: only a has taken both of its steps
    let report = scheduler.run_bunch().unwrap();
    assert_eq!(
        report,
        BunchReport {
            steps: 3,
            retries: 0,
            finished: 1
        }
    );
    assert_eq!(scheduler.exits()[0].0, a);

    let report = scheduler.run_bunch().unwrap();
    assert_eq!(report.steps, 1, "the bunch ends once nothing is runnable");
    assert_eq!(scheduler.exits()[1].0, b);
}

/// Test run_bunch contract: a pass cut by the quota resumes in the next
/// bunch, so a tiny bunch size cannot starve later threads
#[test]
fn test_pass_continues_across_bunches_contract() {
    let mut scheduler = scheduler(1);
    spawn(&mut scheduler, "spin", "()V", &[]);
    let b = spawn(&mut scheduler, "one", "()I", &[]);

    for _ in 0..4 {
        assert_eq!(scheduler.run_bunch().unwrap().steps, 1);
    }
    assert_eq!(
        scheduler.exits(),
        &[(b, ThreadExit::Returned(Some(Value::Int(1))))]
    );
}

/// Test run_bunch contract: a thread whose id was recycled mid-pass waits
/// for the next pass
#[test]
fn test_recycled_id_joins_next_pass_contract() {
    let mut scheduler = scheduler(1);
    spawn(&mut scheduler, "spin", "()V", &[]);
    let early = spawn(&mut scheduler, "one", "()I", &[]);
    assert_eq!(scheduler.run_bunch().unwrap().steps, 1);

    // the host finishes `early` itself while the pass still names it
    let vm = scheduler.vm_mut();
    while !matches!(vm.step(early).unwrap(), StepOutcome::Terminated(_)) {}
    let late = spawn(&mut scheduler, "one", "()I", &[]);
    assert_eq!(late, early);

    let ip = |scheduler: &Scheduler| scheduler.vm().threads().get(late).unwrap().frame().unwrap().ip;
    assert_eq!(scheduler.run_bunch().unwrap().steps, 1);
    assert_eq!(ip(&scheduler), 0);
    scheduler.run_bunch().unwrap();
    assert_eq!(ip(&scheduler), 1);
}

/// Test run_bunch contract: a contended monitor costs retries, not progress
#[test]
fn test_bunch_counts_retries_contract() {
    let mut scheduler = scheduler(5);
    let object_class = scheduler.vm().lookup_class("java/lang/Object").unwrap();
    let object = scheduler.vm_mut().new_instance(object_class).unwrap();
    scheduler.vm_mut().pin(object);
    scheduler
        .vm_mut()
        .heap_mut()
        .get_mut(object)
        .unwrap()
        .monitor
        .enter(99)
        .unwrap();

    let id = spawn(
        &mut scheduler,
        "lock",
        "(Ljava/lang/Object;)V",
        &[Value::Reference(object)],
    );
    let report = scheduler.run_bunch().unwrap();
    assert_eq!(report.steps, 5);
    assert_eq!(report.retries, 4);

    scheduler
        .vm_mut()
        .heap_mut()
        .get_mut(object)
        .unwrap()
        .monitor
        .exit(99)
        .unwrap();
    assert_eq!(scheduler.run_loop().unwrap(), RunExit::Finished);
    assert_eq!(scheduler.exits(), &[(id, ThreadExit::Returned(None))]);
    assert_eq!(scheduler.stats().retries, 4);
}

/// Test detach contract: a timed detach is undone between bunches once
/// the clock has passed the wake time
#[test]
fn test_timed_detach_contract() {
    let clock = ManualClock::new(0);
    let vm = Vm::with_clock(VmConfig::default(), Arc::new(clock.clone())).unwrap();
    let mut scheduler = scheduler_with(vm, 16);
    let id = spawn(&mut scheduler, "one", "()I", &[]);

    scheduler.detach(id, Some(100)).unwrap();
    assert_eq!(scheduler.run_bunch().unwrap().steps, 0);
    assert_eq!(scheduler.between_bunches(), 0);

    clock.advance(100);
    assert_eq!(scheduler.between_bunches(), 1);
    assert_eq!(scheduler.run_bunch().unwrap().finished, 1);
    assert_eq!(scheduler.stats().wakeups, 1);
}

/// Test detach contract: unknown threads are an error
#[test]
fn test_detach_unknown_contract() {
    let mut scheduler = scheduler(16);
    assert!(matches!(
        scheduler.detach(42, None),
        Err(VmError::UnknownThread(42))
    ));
}

/// Test attach contract: only waiting threads can be attached
#[test]
fn test_attach_contract() {
    let mut scheduler = scheduler(16);
    let id = spawn(&mut scheduler, "one", "()I", &[]);
    assert!(!scheduler.attach(id), "already runnable");
    scheduler.detach(id, None).unwrap();
    assert!(scheduler.attach(id));
    assert!(scheduler.vm().threads().is_runnable(id));
}

/// Test run_loop contract: untimed waiters with no way to wake them end
/// the loop
#[test]
fn test_deadlock_contract() {
    let mut scheduler = scheduler(16);
    let id = spawn(&mut scheduler, "one", "()I", &[]);
    scheduler.detach(id, None).unwrap();
    assert_eq!(scheduler.run_loop().unwrap(), RunExit::Deadlocked);
    assert!(scheduler.vm().threads().contains(id));
}

/// Test SchedulerHandle contract: a host thread can attach a waiting thread
#[test]
fn test_handle_attach_contract() {
    let mut scheduler = scheduler(16);
    let id = spawn(&mut scheduler, "one", "()I", &[]);
    scheduler.detach(id, None).unwrap();

    let handle = scheduler.handle();
    let host = std::thread::spawn(move || handle.attach(id));
    assert_eq!(scheduler.run_loop().unwrap(), RunExit::Finished);
    assert!(host.join().unwrap());
}

/// Test SchedulerHandle contract: stop ends the loop with threads left
#[test]
fn test_handle_stop_contract() {
    let mut scheduler = scheduler(16);
    let id = spawn(&mut scheduler, "spin", "()V", &[]);
    let handle = scheduler.handle();
    assert!(handle.stop());

    assert_eq!(scheduler.run_loop().unwrap(), RunExit::Stopped);
    assert!(scheduler.vm().threads().is_runnable(id));
}

/// Test SchedulerHandle contract: sends fail once the scheduler is gone
#[test]
fn test_handle_after_drop_contract() {
    let mut scheduler = scheduler(16);
    let handle = scheduler.handle();
    drop(scheduler);
    assert!(!handle.request_gc());
    assert!(!handle.stop());
}

/// Test deferred collection contract: System.gc is serviced between bunches
#[test]
fn test_guest_gc_request_contract() {
    let mut scheduler = scheduler(16);
    spawn(&mut scheduler, "gc", "()V", &[]);
    let before = scheduler.vm().gc_stats().collections;

    scheduler.run_bunch().unwrap();
    assert_eq!(scheduler.vm().gc_stats().collections, before);
    scheduler.between_bunches();
    assert_eq!(scheduler.vm().gc_stats().collections, before + 1);
    assert_eq!(scheduler.stats().collections, 1);
}

/// Test deferred collection contract: host requests collect unreachable
/// objects
#[test]
fn test_host_gc_request_contract() {
    let mut scheduler = scheduler(16);
    let garbage = scheduler.vm_mut().new_string("garbage").unwrap();
    let handle = scheduler.handle();
    assert!(handle.request_gc());

    scheduler.between_bunches();
    assert!(!scheduler.vm().heap().contains(garbage));
    assert_eq!(handle.stats().collections, 1);
}

/// Test run_loop contract: sleeping threads are woken by their timer
#[test]
fn test_sleep_wakeup_contract() {
    let mut scheduler = scheduler(16);
    let id = spawn(&mut scheduler, "nap", "(J)V", &[Value::Long(5)]);
    assert_eq!(scheduler.run_loop().unwrap(), RunExit::Finished);
    assert_eq!(scheduler.exits(), &[(id, ThreadExit::Returned(None))]);
    assert_eq!(scheduler.stats().wakeups, 1);
}

/// Test run_for contract: control comes back after the iteration limit
#[test]
fn test_run_for_contract() {
    let mut scheduler = scheduler(8);
    spawn(&mut scheduler, "spin", "()V", &[]);
    assert_eq!(scheduler.run_for(3).unwrap(), None);
    let stats = scheduler.stats();
    assert_eq!(stats.bunches, 3);
    assert_eq!(stats.steps, 24);
}

/// Test statistics contract: uncaught exceptions are counted apart
#[test]
fn test_uncaught_counted_contract() {
    let mut scheduler = scheduler(64);
    spawn(&mut scheduler, "boom", "()I", &[]);
    spawn(&mut scheduler, "one", "()I", &[]);
    assert_eq!(scheduler.run_loop().unwrap(), RunExit::Finished);

    let stats = scheduler.stats();
    assert_eq!(stats.uncaught_exceptions, 1);
    assert_eq!(stats.threads_finished, 1);
    let uncaught = scheduler
        .exits()
        .iter()
        .filter(|(_, exit)| exit.is_uncaught())
        .count();
    assert_eq!(uncaught, 1);
}

/// Test run_loop contract: a link failure ends only the calling thread
#[test]
fn test_link_failure_ends_one_thread_contract() {
    let mut scheduler = scheduler(64);
    let a = spawn(&mut scheduler, "outer", "()V", &[]);
    let b = spawn(&mut scheduler, "one", "()I", &[]);
    assert_eq!(scheduler.run_loop().unwrap(), RunExit::Finished);

    let exits = scheduler.exits().to_vec();
    assert_eq!(exits.len(), 2);
    match &exits[0] {
        (id, ThreadExit::LinkFailed(err)) => {
            assert_eq!(*id, a);
            assert_eq!(err.method, "broken");
        }
        other => panic!("expected a link failure, got {:?}", other),
    }
    assert_eq!(exits[1], (b, ThreadExit::Returned(Some(Value::Int(1)))));
    let stats = scheduler.stats();
    assert_eq!(stats.link_failures, 1);
    assert_eq!(stats.threads_finished, 1);

    // the failure stays on the method; the next caller gets it back
    let broken = scheduler.vm().find_method("app/Work", "broken", "()V").unwrap();
    let first = scheduler.vm().registry().method(broken).link_failure.clone();
    assert!(first.is_some());
    let c = spawn(&mut scheduler, "outer", "()V", &[]);
    assert_eq!(scheduler.run_loop().unwrap(), RunExit::Finished);
    assert_eq!(
        scheduler.exits().last(),
        Some(&(c, ThreadExit::LinkFailed(first.unwrap())))
    );
}
