//! Built-in guest programs
//!
//! Each demo defines its classes in the VM, registers its threads with
//! the scheduler and afterwards checks what the threads computed.

use crate::error::{CliError, CliResult};
use bytecode_system::{access, ArrayKind, ClassDef, ClassId, CodeBuilder, Opcode};
use clap::ValueEnum;
use core_types::Value;
use interpreter::{ThreadExit, ThreadId};
use scheduler::Scheduler;

/// Increments per counter thread
pub const COUNTER_ITERATIONS: i32 = 1_000;
/// Values passed through each producer-consumer channel
pub const MESSAGES: i32 = 100;
/// Arrays allocated per garbage thread
pub const CHURN_ALLOCATIONS: i32 = 20_000;
/// Calls made by each guarded exceptions thread
pub const FAULT_CALLS: i32 = 30;

/// A demo program
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    /// Threads incrementing a shared counter under a monitor
    Counter,
    /// Producer and consumer pairs handing values over with wait/notify
    ProducerConsumer,
    /// Allocation churn forcing collections
    Garbage,
    /// Guest exceptions thrown, caught and escaping
    Exceptions,
}

impl Demo {
    /// Every demo, in listing order
    pub const ALL: [Demo; 4] = [
        Demo::Counter,
        Demo::ProducerConsumer,
        Demo::Garbage,
        Demo::Exceptions,
    ];

    /// Command-line name
    pub fn name(self) -> &'static str {
        match self {
            Demo::Counter => "counter",
            Demo::ProducerConsumer => "producer-consumer",
            Demo::Garbage => "garbage",
            Demo::Exceptions => "exceptions",
        }
    }

    /// One-line description
    pub fn describe(self) -> &'static str {
        match self {
            Demo::Counter => "threads increment a shared counter under a monitor",
            Demo::ProducerConsumer => "producer/consumer pairs using wait and notifyAll",
            Demo::Garbage => "allocation churn that forces garbage collections",
            Demo::Exceptions => "exceptions caught by handlers and one left uncaught",
        }
    }

    /// Define the demo's classes and register its threads
    pub(crate) fn install(self, scheduler: &mut Scheduler, threads: usize) -> CliResult<Check> {
        match self {
            Demo::Counter => install_counter(scheduler, threads),
            Demo::ProducerConsumer => install_producer_consumer(scheduler, threads),
            Demo::Garbage => install_garbage(scheduler, threads),
            Demo::Exceptions => install_exceptions(scheduler, threads),
        }
    }
}

/// What a finished demo must have produced
#[derive(Debug)]
pub(crate) enum Check {
    Counter {
        class: ClassId,
        expected: i32,
    },
    Returns {
        threads: Vec<ThreadId>,
        expected: i32,
    },
    Exceptions {
        guarded: Vec<ThreadId>,
        expected: i32,
        unguarded: ThreadId,
    },
}

impl Check {
    /// Compare the run against the expectation; returns a summary line
    pub(crate) fn verify(&self, demo: Demo, scheduler: &Scheduler) -> CliResult<String> {
        let fail = |reason: String| CliError::DemoFailed {
            demo: demo.name(),
            reason,
        };
        match self {
            Check::Counter { class, expected } => match scheduler.vm().get_static(*class, "count") {
                Some(Value::Int(count)) if count == *expected => Ok(format!("count = {}", count)),
                other => Err(fail(format!("count is {:?}, expected {}", other, expected))),
            },
            Check::Returns { threads, expected } => {
                for &id in threads {
                    let exit = exit_of(scheduler, id);
                    if exit != Some(&ThreadExit::Returned(Some(Value::Int(*expected)))) {
                        return Err(fail(format!("thread {} ended with {:?}", id, exit)));
                    }
                }
                Ok(format!("{} thread(s) returned {}", threads.len(), expected))
            }
            Check::Exceptions {
                guarded,
                expected,
                unguarded,
            } => {
                for &id in guarded {
                    let exit = exit_of(scheduler, id);
                    if exit != Some(&ThreadExit::Returned(Some(Value::Int(*expected)))) {
                        return Err(fail(format!("thread {} ended with {:?}", id, exit)));
                    }
                }
                match exit_of(scheduler, *unguarded) {
                    Some(ThreadExit::Threw { class, message, .. }) => Ok(format!(
                        "{} guarded thread(s) returned {}; thread {} died with {}: {}",
                        guarded.len(),
                        expected,
                        unguarded,
                        class.replace('/', "."),
                        message.as_deref().unwrap_or("")
                    )),
                    other => Err(fail(format!(
                        "thread {} should have thrown, ended with {:?}",
                        unguarded, other
                    ))),
                }
            }
        }
    }
}

fn exit_of(scheduler: &Scheduler, id: ThreadId) -> Option<&ThreadExit> {
    scheduler
        .exits()
        .iter()
        .find(|(thread, _)| *thread == id)
        .map(|(_, exit)| exit)
}

fn spawn(scheduler: &mut Scheduler, class: &str, name: &str, desc: &str, args: &[Value]) -> CliResult<ThreadId> {
    let method = scheduler.vm().find_method(class, name, desc)?;
    Ok(scheduler.register_thread(method, args)?)
}

/// `app/Counter`: `run(I)V` adds 1 to `count` n times, each time under
/// the monitor of `LOCK`, yielding while holding it
fn install_counter(scheduler: &mut Scheduler, threads: usize) -> CliResult<Check> {
    let mut def = ClassDef::new("app/Counter", Some("java/lang/Object"));
    def.field("LOCK", "Ljava/lang/Object;", access::STATIC | access::PRIVATE)
        .field("count", "I", access::STATIC | access::PRIVATE);
    let lock = def
        .constant_pool
        .field("app/Counter", "LOCK", "Ljava/lang/Object;");
    let count = def.constant_pool.field("app/Counter", "count", "I");
    let object = def.constant_pool.class("java/lang/Object");
    let object_init = def.constant_pool.method("java/lang/Object", "<init>", "()V");
    let yield_now = def.constant_pool.method("java/lang/Thread", "yield", "()V");

    let mut clinit = CodeBuilder::new(2, 0);
    clinit
        .op_u16(Opcode::New, object)
        .op(Opcode::Dup)
        .op_u16(Opcode::Invokespecial, object_init)
        .op_u16(Opcode::Putstatic, lock)
        .op(Opcode::Return);
    def.method("<clinit>", "()V", access::STATIC, clinit.finish()?);

    let mut run = CodeBuilder::new(2, 3);
    let done = run.new_label();
    run.iconst(0).istore(2);
    let top = run.here();
    run.iload(2)
        .iload(0)
        .branch(Opcode::IfIcmpge, done)
        .op_u16(Opcode::Getstatic, lock)
        .op(Opcode::Dup)
        .astore(1)
        .op(Opcode::Monitorenter)
        .op_u16(Opcode::Getstatic, count)
        .iconst(1)
        .op(Opcode::Iadd)
        .op_u16(Opcode::Putstatic, count)
        .op_u16(Opcode::Invokestatic, yield_now)
        .aload(1)
        .op(Opcode::Monitorexit)
        .iinc(2, 1)
        .branch(Opcode::Goto, top)
        .bind(done)
        .op(Opcode::Return);
    def.method("run", "(I)V", access::PUBLIC | access::STATIC, run.finish()?);
    let class = scheduler.vm_mut().define_class(def)?;

    for _ in 0..threads {
        spawn(
            scheduler,
            "app/Counter",
            "run",
            "(I)V",
            &[Value::Int(COUNTER_ITERATIONS)],
        )?;
    }
    Ok(Check::Counter {
        class,
        expected: COUNTER_ITERATIONS * threads as i32,
    })
}

/// `app/Channel` holds one value at a time; `put` and `take` are
/// synchronized and wait until the slot is empty or full
fn define_channel(scheduler: &mut Scheduler) -> CliResult<ClassId> {
    let mut def = ClassDef::new("app/Channel", Some("java/lang/Object"));
    def.field("value", "I", access::PRIVATE)
        .field("full", "I", access::PRIVATE);
    let value = def.constant_pool.field("app/Channel", "value", "I");
    let full = def.constant_pool.field("app/Channel", "full", "I");
    let wait = def.constant_pool.method("java/lang/Object", "wait", "()V");
    let notify_all = def.constant_pool.method("java/lang/Object", "notifyAll", "()V");
    let put = def.constant_pool.method("app/Channel", "put", "(I)V");
    let take = def.constant_pool.method("app/Channel", "take", "()I");
    let synced = access::PUBLIC | access::SYNCHRONIZED;

    let mut body = CodeBuilder::new(2, 2);
    let store = body.new_label();
    let check = body.here();
    body.aload(0)
        .op_u16(Opcode::Getfield, full)
        .branch(Opcode::Ifeq, store)
        .aload(0)
        .op_u16(Opcode::Invokevirtual, wait)
        .branch(Opcode::Goto, check)
        .bind(store)
        .aload(0)
        .iload(1)
        .op_u16(Opcode::Putfield, value)
        .aload(0)
        .iconst(1)
        .op_u16(Opcode::Putfield, full)
        .aload(0)
        .op_u16(Opcode::Invokevirtual, notify_all)
        .op(Opcode::Return);
    def.method("put", "(I)V", synced, body.finish()?);

    let mut body = CodeBuilder::new(2, 1);
    let load = body.new_label();
    let check = body.here();
    body.aload(0)
        .op_u16(Opcode::Getfield, full)
        .branch(Opcode::Ifne, load)
        .aload(0)
        .op_u16(Opcode::Invokevirtual, wait)
        .branch(Opcode::Goto, check)
        .bind(load)
        .aload(0)
        .iconst(0)
        .op_u16(Opcode::Putfield, full)
        .aload(0)
        .op_u16(Opcode::Invokevirtual, notify_all)
        .aload(0)
        .op_u16(Opcode::Getfield, value)
        .op(Opcode::Ireturn);
    def.method("take", "()I", synced, body.finish()?);

    // produce(channel, n): put 1..=n
    let mut body = CodeBuilder::new(2, 3);
    let done = body.new_label();
    body.iconst(1).istore(2);
    let top = body.here();
    body.iload(2)
        .iload(1)
        .branch(Opcode::IfIcmpgt, done)
        .aload(0)
        .iload(2)
        .op_u16(Opcode::Invokevirtual, put)
        .iinc(2, 1)
        .branch(Opcode::Goto, top)
        .bind(done)
        .op(Opcode::Return);
    def.method("produce", "(Lapp/Channel;I)V", access::STATIC, body.finish()?);

    // consume(channel, n): sum of n takes
    let mut body = CodeBuilder::new(2, 4);
    let done = body.new_label();
    body.iconst(0).istore(3).iconst(0).istore(2);
    let top = body.here();
    body.iload(2)
        .iload(1)
        .branch(Opcode::IfIcmpge, done)
        .iload(3)
        .aload(0)
        .op_u16(Opcode::Invokevirtual, take)
        .op(Opcode::Iadd)
        .istore(3)
        .iinc(2, 1)
        .branch(Opcode::Goto, top)
        .bind(done)
        .iload(3)
        .op(Opcode::Ireturn);
    def.method("consume", "(Lapp/Channel;I)I", access::STATIC, body.finish()?);

    Ok(scheduler.vm_mut().define_class(def)?)
}

fn install_producer_consumer(scheduler: &mut Scheduler, pairs: usize) -> CliResult<Check> {
    let channel_class = define_channel(scheduler)?;
    let mut consumers = Vec::with_capacity(pairs);
    for _ in 0..pairs {
        let channel = scheduler.vm_mut().new_instance(channel_class)?;
        let channel = Value::Reference(channel);
        let n = Value::Int(MESSAGES);
        consumers.push(spawn(
            scheduler,
            "app/Channel",
            "consume",
            "(Lapp/Channel;I)I",
            &[channel, n],
        )?);
        spawn(
            scheduler,
            "app/Channel",
            "produce",
            "(Lapp/Channel;I)V",
            &[channel, n],
        )?;
    }
    Ok(Check::Returns {
        threads: consumers,
        expected: MESSAGES * (MESSAGES + 1) / 2,
    })
}

/// `app/Churn.churn(I)I` allocates n int arrays, keeping only the last 16
/// alive, then asks for a collection
fn install_garbage(scheduler: &mut Scheduler, threads: usize) -> CliResult<Check> {
    let mut def = ClassDef::new("app/Churn", Some("java/lang/Object"));
    let object = def.constant_pool.class("java/lang/Object");
    let gc = def.constant_pool.method("java/lang/System", "gc", "()V");

    let mut body = CodeBuilder::new(4, 3);
    let done = body.new_label();
    body.iconst(16)
        .op_u16(Opcode::Anewarray, object)
        .astore(1)
        .iconst(0)
        .istore(2);
    let top = body.here();
    body.iload(2)
        .iload(0)
        .branch(Opcode::IfIcmpge, done)
        .aload(1)
        .iload(2)
        .iconst(15)
        .op(Opcode::Iand)
        .iconst(32)
        .newarray(ArrayKind::Int)
        .op(Opcode::Aastore)
        .iinc(2, 1)
        .branch(Opcode::Goto, top)
        .bind(done)
        .op_u16(Opcode::Invokestatic, gc)
        .iload(2)
        .op(Opcode::Ireturn);
    def.method("churn", "(I)I", access::STATIC, body.finish()?);
    scheduler.vm_mut().define_class(def)?;

    let mut ids = Vec::with_capacity(threads);
    for _ in 0..threads {
        ids.push(spawn(
            scheduler,
            "app/Churn",
            "churn",
            "(I)I",
            &[Value::Int(CHURN_ALLOCATIONS)],
        )?);
    }
    Ok(Check::Returns {
        threads: ids,
        expected: CHURN_ALLOCATIONS,
    })
}

/// `app/Faults`:
/// - `risky(I)I` throws `IllegalArgumentException` for i % 3 == 0,
///   divides by zero for i % 3 == 1 and returns i otherwise
/// - `guarded(I)I` sums `risky(0..n)`, counting -1 per caught exception
/// - `unguarded()V` calls `risky(0)` without a handler
fn install_exceptions(scheduler: &mut Scheduler, threads: usize) -> CliResult<Check> {
    let mut def = ClassDef::new("app/Faults", Some("java/lang/Object"));
    let iae = def.constant_pool.class("java/lang/IllegalArgumentException");
    let iae_init = def.constant_pool.method(
        "java/lang/IllegalArgumentException",
        "<init>",
        "(Ljava/lang/String;)V",
    );
    let message = def.constant_pool.string("bad input");
    let runtime_exception = def.constant_pool.class("java/lang/RuntimeException");
    let risky = def.constant_pool.method("app/Faults", "risky", "(I)I");

    let mut body = CodeBuilder::new(3, 1);
    let not_zero = body.new_label();
    let plain = body.new_label();
    body.line(10)
        .iload(0)
        .iconst(3)
        .op(Opcode::Irem)
        .branch(Opcode::Ifne, not_zero)
        .line(11)
        .op_u16(Opcode::New, iae)
        .op(Opcode::Dup)
        .ldc(message)
        .op_u16(Opcode::Invokespecial, iae_init)
        .op(Opcode::Athrow)
        .bind(not_zero)
        .line(13)
        .iload(0)
        .iconst(3)
        .op(Opcode::Irem)
        .iconst(1)
        .branch(Opcode::IfIcmpne, plain)
        .line(14)
        .iconst(10)
        .iload(0)
        .iload(0)
        .op(Opcode::Isub)
        .op(Opcode::Idiv)
        .op(Opcode::Ireturn)
        .bind(plain)
        .line(16)
        .iload(0)
        .op(Opcode::Ireturn);
    def.method("risky", "(I)I", access::STATIC, body.finish()?);

    let mut body = CodeBuilder::new(2, 3);
    let done = body.new_label();
    let next = body.new_label();
    body.iconst(0).istore(2).iconst(0).istore(1);
    let top = body.here();
    body.iload(1).iload(0).branch(Opcode::IfIcmpge, done);
    let start = body.here();
    body.line(21)
        .iload(2)
        .iload(1)
        .op_u16(Opcode::Invokestatic, risky)
        .op(Opcode::Iadd)
        .istore(2);
    let end = body.here();
    body.branch(Opcode::Goto, next);
    let handler = body.here();
    body.op(Opcode::Pop)
        .iinc(2, -1)
        .bind(next)
        .iinc(1, 1)
        .branch(Opcode::Goto, top)
        .bind(done)
        .iload(2)
        .op(Opcode::Ireturn);
    body.handler(start, end, handler, runtime_exception);
    def.method("guarded", "(I)I", access::STATIC, body.finish()?);

    let mut body = CodeBuilder::new(1, 0);
    body.line(30)
        .iconst(0)
        .op_u16(Opcode::Invokestatic, risky)
        .op(Opcode::Pop)
        .op(Opcode::Return);
    def.method("unguarded", "()V", access::STATIC, body.finish()?);
    scheduler.vm_mut().define_class(def)?;

    let mut guarded = Vec::with_capacity(threads);
    for _ in 0..threads {
        guarded.push(spawn(
            scheduler,
            "app/Faults",
            "guarded",
            "(I)I",
            &[Value::Int(FAULT_CALLS)],
        )?);
    }
    let unguarded = spawn(scheduler, "app/Faults", "unguarded", "()V", &[])?;
    Ok(Check::Exceptions {
        guarded,
        expected: guarded_sum(FAULT_CALLS),
        unguarded,
    })
}

/// Result of `guarded(n)`
fn guarded_sum(n: i32) -> i32 {
    (0..n).map(|i| if i % 3 == 2 { i } else { -1 }).sum()
}
