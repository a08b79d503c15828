//! The bunch scheduler
//!
//! Execution is grouped into bunches of `bunch_size` turns. Within a
//! bunch every runnable thread gets one interpreter step per pass, in
//! registration order, until the quota is spent. Between bunches the
//! scheduler drains host commands, attaches threads whose timers have
//! elapsed, runs a requested collection and then paces.

use crate::config::SchedulerConfig;
use crate::handle::{Command, SchedulerHandle};
use crate::pacing::Pacer;
use crate::stats::SchedulerStats;
use bytecode_system::MethodId;
use core_types::{Reference, Value, VmError};
use crossbeam::channel::{self, Receiver, Sender};
use interpreter::{StepOutcome, ThreadExit, ThreadId, Vm};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Why [`Scheduler::run_loop`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Every thread has terminated
    Finished,
    /// A [`Command::Stop`] was received
    Stopped,
    /// Threads remain but all wait without a timer, and no host handle
    /// exists that could attach them
    Deadlocked,
}

/// What one bunch did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BunchReport {
    /// Interpreter steps taken
    pub steps: usize,
    /// Steps that made no progress
    pub retries: usize,
    /// Threads that terminated during the bunch
    pub finished: usize,
}

/// Drives a [`Vm`] round-robin over its runnable threads
///
/// # Examples
///
/// ```
/// use bytecode_system::{access, ClassDef, CodeBuilder, Opcode};
/// use interpreter::{ThreadExit, Vm, VmConfig};
/// use scheduler::{RunExit, Scheduler, SchedulerConfig};
/// use core_types::Value;
///
/// let mut vm = Vm::new(VmConfig::default()).unwrap();
/// let mut body = CodeBuilder::new(1, 0);
/// body.iconst(7).op(Opcode::Ireturn);
/// let mut def = ClassDef::new("app/Seven", Some("java/lang/Object"));
/// def.method("seven", "()I", access::STATIC, body.finish().unwrap());
/// vm.define_class(def).unwrap();
///
/// let mut scheduler = Scheduler::new(vm, SchedulerConfig::default());
/// let seven = scheduler.vm().find_method("app/Seven", "seven", "()I").unwrap();
/// let id = scheduler.register_thread(seven, &[]).unwrap();
///
/// assert_eq!(scheduler.run_loop().unwrap(), RunExit::Finished);
/// assert_eq!(
///     scheduler.exits(),
///     &[(id, ThreadExit::Returned(Some(Value::Int(7))))]
/// );
/// ```
#[derive(Debug)]
pub struct Scheduler {
    vm: Vm,
    config: SchedulerConfig,
    pacer: Pacer,
    sender: Sender<Command>,
    commands: Receiver<Command>,
    stats: Arc<Mutex<SchedulerStats>>,
    exits: Vec<(ThreadId, ThreadExit)>,
    /// Rest of the current round-robin pass, with the generation each
    /// thread had when the pass began
    pass: VecDeque<(ThreadId, u64)>,
    gc_requested: bool,
    stop_requested: bool,
    handles_issued: bool,
}

impl Scheduler {
    /// Take ownership of `vm`
    pub fn new(vm: Vm, config: SchedulerConfig) -> Self {
        let (sender, commands) = channel::unbounded();
        Self {
            vm,
            pacer: Pacer::new(&config),
            config,
            sender,
            commands,
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
            exits: Vec::new(),
            pass: VecDeque::new(),
            gc_requested: false,
            stop_requested: false,
            handles_issued: false,
        }
    }

    /// The driven VM
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Mutable access to the driven VM
    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    /// Give the VM back
    pub fn into_vm(self) -> Vm {
        self.vm
    }

    /// Active configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// A handle for other host threads
    pub fn handle(&mut self) -> SchedulerHandle {
        self.handles_issued = true;
        SchedulerHandle::new(self.sender.clone(), Arc::clone(&self.stats))
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> SchedulerStats {
        *self.stats.lock()
    }

    /// How every terminated thread ended, in termination order
    pub fn exits(&self) -> &[(ThreadId, ThreadExit)] {
        &self.exits
    }

    /// Drain the recorded exits
    pub fn take_exits(&mut self) -> Vec<(ThreadId, ThreadExit)> {
        std::mem::take(&mut self.exits)
    }

    /// Register a thread running `method`; it joins the end of the
    /// runnable list
    pub fn register_thread(&mut self, method: MethodId, args: &[Value]) -> Result<ThreadId, VmError> {
        self.vm.spawn(method, args)
    }

    /// Register a thread for a guest `java/lang/Thread` object
    pub fn start_thread(&mut self, object: Reference) -> Result<ThreadId, VmError> {
        self.vm.start_thread(object)
    }

    /// Move thread `id` to the waiting pool, to be attached again after
    /// `wake_after_ms` or, with `None`, only by an explicit attach
    pub fn detach(&mut self, id: ThreadId, wake_after_ms: Option<u64>) -> Result<(), VmError> {
        if !self.vm.threads().contains(id) {
            return Err(VmError::UnknownThread(id.into()));
        }
        let wake_at = wake_after_ms.map(|ms| self.vm.now_ms().saturating_add(ms));
        self.vm.threads_mut().detach(id, wake_at);
        trace!(thread = id, ?wake_at, "detached thread");
        Ok(())
    }

    /// Move a waiting thread back to the runnable list. Returns false if
    /// it was not waiting.
    pub fn attach(&mut self, id: ThreadId) -> bool {
        self.vm.threads_mut().attach(id)
    }

    /// Collect garbage before the next bunch
    pub fn request_gc(&mut self) {
        self.gc_requested = true;
    }

    /// Run one bunch.
    ///
    /// A pass cut short by the quota is continued by the next bunch.
    /// Threads registered or attached during a pass join on the next
    /// pass. The bunch ends early when nothing is runnable.
    pub fn run_bunch(&mut self) -> Result<BunchReport, VmError> {
        let quota = self.config.bunch_size.max(1);
        let mut report = BunchReport::default();
        let mut finished = 0;
        let mut uncaught = 0;
        let mut link_failures = 0;

        while report.steps < quota {
            if self.pass.is_empty() {
                let threads = self.vm.threads();
                self.pass.extend(
                    threads
                        .runnable()
                        .iter()
                        .filter_map(|&id| Some((id, threads.generation(id)?))),
                );
                if self.pass.is_empty() {
                    break;
                }
            }
            let Some((id, generation)) = self.pass.pop_front() else {
                break;
            };
            let threads = self.vm.threads();
            // a recycled id belongs to a thread that joins on the next pass
            if threads.generation(id) != Some(generation) || !threads.is_runnable(id) {
                continue;
            }
            let outcome = self.vm.step(id)?;
            report.steps += 1;
            match outcome {
                StepOutcome::Retry => report.retries += 1,
                StepOutcome::Terminated(exit) => {
                    report.finished += 1;
                    match exit {
                        ThreadExit::Returned(_) => finished += 1,
                        ThreadExit::Threw { .. } => uncaught += 1,
                        ThreadExit::LinkFailed(_) => link_failures += 1,
                    }
                    self.exits.push((id, exit));
                }
                StepOutcome::Executed | StepOutcome::Waiting => {}
            }
        }

        let mut stats = self.stats.lock();
        stats.bunches += 1;
        stats.steps += report.steps as u64;
        stats.retries += report.retries as u64;
        stats.threads_finished += finished;
        stats.uncaught_exceptions += uncaught;
        stats.link_failures += link_failures;
        drop(stats);
        trace!(
            steps = report.steps,
            retries = report.retries,
            finished = report.finished,
            "bunch done"
        );
        Ok(report)
    }

    /// Housekeeping between bunches: host commands, elapsed timers and a
    /// pending collection. Returns the number of threads woken by timers.
    pub fn between_bunches(&mut self) -> usize {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }

        let now = self.vm.now_ms();
        let woken = self.vm.threads_mut().wake_due(now);
        if woken > 0 {
            trace!(woken, now, "timers elapsed");
        }

        let guest_request = self.vm.take_gc_request();
        let host_request = std::mem::take(&mut self.gc_requested);
        let collected = guest_request || host_request;
        if collected {
            let outcome = self.vm.collect_garbage();
            trace!(
                marked = outcome.marked,
                freed = outcome.freed,
                "collection between bunches"
            );
        }

        let mut stats = self.stats.lock();
        stats.wakeups += woken as u64;
        if collected {
            stats.collections += 1;
        }
        woken
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Attach(id) => {
                if !self.vm.threads_mut().attach(id) {
                    debug!(thread = id, "host attach ignored, thread not waiting");
                }
            }
            Command::RequestGc => self.gc_requested = true,
            Command::Stop => self.stop_requested = true,
        }
    }

    /// One iteration of the run loop
    fn turn(&mut self) -> Result<Option<RunExit>, VmError> {
        self.between_bunches();
        if std::mem::take(&mut self.stop_requested) {
            return Ok(Some(RunExit::Stopped));
        }
        if self.vm.threads().is_empty() {
            return Ok(Some(RunExit::Finished));
        }

        if self.vm.threads().runnable().is_empty() {
            match self.vm.threads().next_wakeup() {
                Some(at) => {
                    let remaining = at.saturating_sub(self.vm.now_ms());
                    self.pacer.idle(Duration::from_millis(remaining));
                }
                None if self.handles_issued => {
                    let timeout = self.pacer.budget().max(Duration::from_millis(1));
                    if let Ok(command) = self.commands.recv_timeout(timeout) {
                        self.apply(command);
                    }
                }
                None => {
                    debug!(
                        waiting = self.vm.threads().waiting_count(),
                        "no runnable thread can ever be woken"
                    );
                    return Ok(Some(RunExit::Deadlocked));
                }
            }
            return Ok(None);
        }

        let started = Instant::now();
        self.run_bunch()?;
        self.pacer.pace(started);
        Ok(None)
    }

    /// Run bunches until every thread has terminated or a stop is
    /// requested.
    ///
    /// While all threads wait, the loop idles until the earliest timer.
    /// Threads waiting without a timer end the loop with
    /// [`RunExit::Deadlocked`] unless a [`SchedulerHandle`] was handed out,
    /// in which case it keeps waiting for a host attach.
    pub fn run_loop(&mut self) -> Result<RunExit, VmError> {
        loop {
            if let Some(exit) = self.turn()? {
                debug!(?exit, stats = ?self.stats(), "run loop finished");
                return Ok(exit);
            }
        }
    }

    /// Like [`Scheduler::run_loop`], but give control back after at most
    /// `limit` iterations; `None` means the loop would continue.
    ///
    /// Embedders tie this to their own time base, e.g. a display refresh.
    pub fn run_for(&mut self, limit: usize) -> Result<Option<RunExit>, VmError> {
        for _ in 0..limit {
            if let Some(exit) = self.turn()? {
                return Ok(Some(exit));
            }
        }
        Ok(None)
    }
}
