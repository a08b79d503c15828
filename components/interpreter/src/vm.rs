//! The virtual machine
//!
//! [`Vm`] owns every piece of runtime state: the class registry, the heap,
//! the thread table and the native bindings. It never runs threads on its
//! own. A scheduler (or a test) drives it one instruction at a time through
//! [`Vm::step`].

use crate::bootstrap::{self, WellKnown};
use crate::clock::{Clock, SystemClock};
use crate::config::VmConfig;
use crate::dispatch::Flow;
use crate::exceptions::Unwind;
use crate::natives::{NativeMethod, NativeRegistry};
use crate::thread::{Thread, ThreadExit, ThreadId};
use crate::threads::ThreadTable;
use bytecode_system::{link, ClassDef, ClassId, ClassRegistry, InitState, LinkedCode, MethodId};
use core_types::{LinkError, LinkErrorKind, Reference, Value, VmError};
use memory_manager::{GcOutcome, GcStats, Heap, RootSet};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// What a single [`Vm::step`] achieved
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// An instruction completed or control moved between frames
    Executed,
    /// No progress; the same instruction runs again on the next step
    Retry,
    /// The thread is in the waiting pool
    Waiting,
    /// The thread finished and has been removed
    Terminated(ThreadExit),
}

impl StepOutcome {
    /// Check if the step made progress
    pub fn made_progress(&self) -> bool {
        !matches!(self, StepOutcome::Retry | StepOutcome::Waiting)
    }
}

/// The virtual machine
///
/// # Examples
///
/// ```
/// use bytecode_system::{access, ClassDef, CodeBuilder, Opcode};
/// use core_types::Value;
/// use interpreter::{Vm, VmConfig};
///
/// let mut vm = Vm::new(VmConfig::default()).unwrap();
///
/// let mut body = CodeBuilder::new(2, 2);
/// body.iload(0).iload(1).op(Opcode::Imul).op(Opcode::Ireturn);
/// let mut def = ClassDef::new("app/Math", Some("java/lang/Object"));
/// def.method("mul", "(II)I", access::STATIC, body.finish().unwrap());
/// vm.define_class(def).unwrap();
///
/// let mul = vm.find_method("app/Math", "mul", "(II)I").unwrap();
/// let product = vm.call_now(mul, &[Value::Int(6), Value::Int(7)]).unwrap();
/// assert_eq!(product, Some(Value::Int(42)));
/// ```
#[derive(Debug)]
pub struct Vm {
    pub(crate) registry: ClassRegistry,
    pub(crate) heap: Heap,
    pub(crate) threads: ThreadTable,
    pub(crate) natives: NativeRegistry,
    pub(crate) known: WellKnown,
    config: VmConfig,
    clock: Arc<dyn Clock>,
    pinned: HashMap<Reference, usize>,
    gc_requested: bool,
    active_steps: usize,
    pub(crate) arg_buffer: Vec<Value>,
}

impl Vm {
    /// Create a VM with the bootstrap classes loaded, reading time from the
    /// system clock
    pub fn new(config: VmConfig) -> Result<Self, VmError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a VM reading time from `clock`
    pub fn with_clock(config: VmConfig, clock: Arc<dyn Clock>) -> Result<Self, VmError> {
        let mut registry = ClassRegistry::new();
        let known = bootstrap::define_classes(&mut registry)?;
        let mut vm = Vm {
            registry,
            heap: Heap::with_threshold(config.gc_threshold),
            threads: ThreadTable::new(),
            natives: NativeRegistry::new(),
            known,
            config,
            clock,
            pinned: HashMap::new(),
            gc_requested: false,
            active_steps: 0,
            arg_buffer: Vec::new(),
        };
        crate::lang::bind_natives(&mut vm)?;
        info!(
            classes = vm.registry.len(),
            natives = vm.natives.len(),
            "virtual machine ready"
        );
        Ok(vm)
    }

    /// Runtime configuration
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Clock behind `System.currentTimeMillis` and timed waits
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Loaded classes and methods
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// The object heap
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The object heap, mutably
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// The thread table
    pub fn threads(&self) -> &ThreadTable {
        &self.threads
    }

    /// The thread table, mutably (attach, detach, wake-ups)
    pub fn threads_mut(&mut self) -> &mut ThreadTable {
        &mut self.threads
    }

    /// Register an application class
    pub fn define_class(&mut self, def: ClassDef) -> Result<ClassId, VmError> {
        let name = def.name.clone();
        let id = self.registry.define(def)?;
        debug!(class = %name, id = %id, "defined class");
        Ok(id)
    }

    /// Class by internal name
    pub fn lookup_class(&self, name: &str) -> Result<ClassId, VmError> {
        self.registry.lookup(name).ok_or_else(|| {
            LinkError::new(name, "<class>", "", LinkErrorKind::MissingClass(name.to_string()))
                .into()
        })
    }

    /// Resolve `class.name(descriptor)`, searching supertypes
    pub fn find_method(&self, class: &str, name: &str, descriptor: &str) -> Result<MethodId, VmError> {
        let id = self.lookup_class(class)?;
        self.registry.find_method(id, name, descriptor).ok_or_else(|| {
            LinkError::new(
                class,
                name,
                descriptor,
                LinkErrorKind::MissingMethod {
                    class: class.to_string(),
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                },
            )
            .into()
        })
    }

    /// Bind a host bridge to a declared method
    pub fn register_native(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        bridge: NativeMethod,
    ) -> Result<MethodId, VmError> {
        let id = self.lookup_class(class)?;
        let method = self.registry.declared_method(id, name, descriptor).ok_or_else(|| {
            LinkError::new(
                class,
                name,
                descriptor,
                LinkErrorKind::MissingMethod {
                    class: class.to_string(),
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                },
            )
        })?;
        self.natives.bind(method, bridge);
        Ok(method)
    }

    /// Link a method ahead of its first call
    pub fn link_method(&mut self, method: MethodId) -> Result<Arc<LinkedCode>, VmError> {
        Ok(link(&mut self.registry, method)?)
    }

    /// Allocate an instance of `class` with every field zeroed.
    /// No constructor runs.
    pub fn new_instance(&mut self, class: ClassId) -> Result<Reference, VmError> {
        let fields = self.registry.class(class).zeroed_fields();
        self.heap.allocate_instance(class, fields)
    }

    /// Allocate a fresh (non-interned) string
    pub fn new_string(&mut self, text: &str) -> Result<Reference, VmError> {
        self.heap.allocate_string(self.known.string, text)
    }

    /// Canonical string for `text`
    pub fn intern(&mut self, text: &str) -> Result<Reference, VmError> {
        self.heap.intern(self.known.string, text)
    }

    /// Contents of a string object
    pub fn string_value(&self, reference: Reference) -> Option<String> {
        self.heap.string_value(reference)
    }

    /// The `java/lang/Class` object of `class`, created on first request
    pub fn class_mirror(&mut self, class: ClassId) -> Result<Reference, VmError> {
        let existing = self.registry.class(class).mirror;
        if !existing.is_null() {
            return Ok(existing);
        }
        let mut fields = self.registry.class(self.known.class).zeroed_fields();
        fields[self.known.class_id as usize] = Value::Int(class.0 as i32);
        let mirror = self.heap.allocate_instance(self.known.class, fields)?;
        self.registry.class_mut(class).mirror = mirror;
        Ok(mirror)
    }

    /// Class represented by a mirror object
    pub fn mirrored_class(&self, mirror: Reference) -> Option<ClassId> {
        let object = self.heap.get(mirror)?;
        if object.class != self.known.class {
            return None;
        }
        object.fields[self.known.class_id as usize]
            .as_int()
            .map(|id| ClassId(id as u32))
    }

    fn field_slot(&self, object: Reference, name: &str) -> Result<(usize, ClassId), VmError> {
        let class = self
            .heap
            .get(object)
            .ok_or(VmError::DanglingReference(object))?
            .class;
        let slot = self.registry.class(class).field_slot(name).ok_or_else(|| {
            let class_name = self.registry.class(class).name.clone();
            LinkError::new(
                class_name.clone(),
                "<field>",
                "",
                LinkErrorKind::MissingField {
                    class: class_name,
                    name: name.to_string(),
                    descriptor: String::new(),
                },
            )
        })?;
        Ok((slot as usize, class))
    }

    /// Read an instance field by name
    pub fn get_field(&self, object: Reference, name: &str) -> Result<Value, VmError> {
        let (slot, _) = self.field_slot(object, name)?;
        self.heap
            .get(object)
            .map(|o| o.fields[slot])
            .ok_or(VmError::DanglingReference(object))
    }

    /// Write an instance field by name
    pub fn set_field(&mut self, object: Reference, name: &str, value: Value) -> Result<(), VmError> {
        let (slot, _) = self.field_slot(object, name)?;
        let target = self
            .heap
            .get_mut(object)
            .ok_or(VmError::DanglingReference(object))?;
        target.fields[slot] = value;
        Ok(())
    }

    /// Read a static field by name
    pub fn get_static(&self, class: ClassId, name: &str) -> Option<Value> {
        let runtime = self.registry.class(class);
        runtime
            .static_fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| runtime.statics[f.slot as usize])
    }

    /// Detail message of a throwable
    pub fn exception_message(&self, exception: Reference) -> Option<String> {
        let object = self.heap.get(exception)?;
        let message = object.fields.get(self.known.detail_message as usize)?;
        message
            .as_reference()
            .filter(|r| !r.is_null())
            .and_then(|r| self.heap.string_value(r))
    }

    /// Keep `reference` alive across collections until a matching unpin
    pub fn pin(&mut self, reference: Reference) {
        if !reference.is_null() {
            *self.pinned.entry(reference).or_insert(0) += 1;
        }
    }

    /// Drop one pin of `reference`
    pub fn unpin(&mut self, reference: Reference) {
        if let Some(count) = self.pinned.get_mut(&reference) {
            *count -= 1;
            if *count == 0 {
                self.pinned.remove(&reference);
            }
        }
    }

    /// Collection statistics
    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Ask for a collection between scheduling bunches (`System.gc`)
    pub fn request_gc(&mut self) {
        self.gc_requested = true;
    }

    /// Consume a pending explicit collection request
    pub fn take_gc_request(&mut self) -> bool {
        std::mem::take(&mut self.gc_requested)
    }

    /// Run a full mark-sweep collection.
    ///
    /// Roots are static fields, class mirrors, every thread's frames and
    /// the pinned set; interned strings are added by the heap. Called from
    /// inside a step (by a native) the collection is only requested, since
    /// the stepping thread is not in the table at that point.
    pub fn collect_garbage(&mut self) -> GcOutcome {
        if self.active_steps > 0 {
            self.heap.request_collection();
            return GcOutcome::default();
        }
        let mut roots = RootSet::new();
        roots.extend(self.registry.static_references());
        for thread in self.threads.iter() {
            roots.extend(thread.references());
        }
        roots.extend(self.pinned.keys().copied());
        self.heap.collect_garbage(&roots)
    }

    pub(crate) fn prepare_thread(
        &mut self,
        id: ThreadId,
        object: Reference,
        method: MethodId,
        args: &[Value],
    ) -> Result<Thread, VmError> {
        let target = self.registry.method(method);
        let class = target.class;
        if target.is_native() {
            return Err(self.link_error(method, LinkErrorKind::NoCode));
        }
        let synchronized = target.is_synchronized();
        let is_static = target.is_static();
        let code = link(&mut self.registry, method)?;
        let mut thread = Thread::new(id, object);
        let frame = thread.push_frame(code);
        frame.set_arguments(args)?;
        if synchronized {
            // taken by the first step, like a monitor given up by wait
            let monitor = match (is_static, args.first()) {
                (false, Some(Value::Reference(receiver))) if !receiver.is_null() => *receiver,
                (false, _) => return Err(VmError::StackUnderflow),
                (true, _) => self.class_mirror(class)?,
            };
            frame.monitor = Some(monitor);
            thread.pending_reacquire = Some((monitor, 1));
        }
        // classes without <clinit> are marked one per call; stop at the
        // first pushed initializer or at a class owned by another thread
        while self.registry.class(class).init != InitState::Initialized {
            match self.ensure_initialized(&mut thread, class) {
                Ok(Some(Flow::Stay)) if thread.depth() == 1 => {}
                Ok(_) => break,
                Err(unwind) => return Err(self.unwind_error(unwind)),
            }
        }
        Ok(thread)
    }

    /// Create a runnable thread executing `method` with `args`
    /// (receiver first for instance methods)
    pub fn spawn(&mut self, method: MethodId, args: &[Value]) -> Result<ThreadId, VmError> {
        let id = self.threads.allocate_id()?;
        let thread = self.prepare_thread(id, Reference::NULL, method, args)?;
        debug!(thread = id, method = %self.registry.qualified_name(method), "spawned thread");
        self.threads.register(thread);
        Ok(id)
    }

    /// Start a guest `java/lang/Thread` object: a new thread runs its
    /// `run()` method
    pub fn start_thread(&mut self, object: Reference) -> Result<ThreadId, VmError> {
        let class = self
            .heap
            .get(object)
            .ok_or(VmError::DanglingReference(object))?
            .class;
        let run = self.registry.dispatch(class, self.known.run).ok_or_else(|| {
            LinkError::new(
                self.registry.class(class).name.clone(),
                "run",
                "()V",
                LinkErrorKind::MissingMethod {
                    class: self.registry.class(class).name.clone(),
                    name: "run".to_string(),
                    descriptor: "()V".to_string(),
                },
            )
        })?;
        let id = self.threads.allocate_id()?;
        let thread = self.prepare_thread(id, object, run, &[Value::Reference(object)])?;
        if let Some(target) = self.heap.get_mut(object) {
            target.fields[self.known.thread_id as usize] = Value::Int(id as i32);
        }
        debug!(thread = id, object = %object, "started guest thread");
        self.threads.register(thread);
        Ok(id)
    }

    /// Run `method` to completion on a synthetic, unscheduled thread.
    ///
    /// Fails with [`VmError::SynchronousCallBlocked`] if the call would have
    /// to wait for another thread (a contended monitor, `wait`, `sleep`).
    /// Uncaught guest exceptions come back as
    /// [`VmError::UncaughtException`].
    pub fn call_now(&mut self, method: MethodId, args: &[Value]) -> Result<Option<Value>, VmError> {
        let id = self.threads.allocate_id()?;
        let thread = self.prepare_thread(id, Reference::NULL, method, args)?;
        self.threads.insert_unscheduled(thread);
        loop {
            match self.step(id) {
                Ok(StepOutcome::Executed) => {}
                Ok(StepOutcome::Terminated(exit)) => return exit.into_result(),
                Ok(StepOutcome::Retry) | Ok(StepOutcome::Waiting) => {
                    self.abandon(id);
                    return Err(VmError::SynchronousCallBlocked(
                        self.registry.qualified_name(method),
                    ));
                }
                Err(err) => {
                    self.abandon(id);
                    return Err(err);
                }
            }
        }
    }

    /// Execute one instruction of thread `id`.
    ///
    /// A link failure ends only this thread, with
    /// [`ThreadExit::LinkFailed`]. A pending automatic collection runs at
    /// the end of the outermost step, when every thread is back in the
    /// table.
    pub fn step(&mut self, id: ThreadId) -> Result<StepOutcome, VmError> {
        if self.threads.waiting(id).is_some() {
            return Ok(StepOutcome::Waiting);
        }
        let mut thread = self.threads.take(id)?;
        self.active_steps += 1;
        let result = self.step_thread(&mut thread);
        self.active_steps -= 1;

        let outcome = match result {
            Ok(_) if thread.is_finished() => {
                let exit = thread
                    .exit
                    .take()
                    .unwrap_or(ThreadExit::Returned(None));
                self.threads.put_back(thread);
                self.retire(id);
                StepOutcome::Terminated(exit)
            }
            Ok(outcome) => {
                self.threads.put_back(thread);
                if self.threads.waiting(id).is_some() {
                    StepOutcome::Waiting
                } else {
                    outcome
                }
            }
            Err(VmError::Link(err)) => {
                self.fail_link(&mut thread, err);
                let exit = thread
                    .exit
                    .take()
                    .unwrap_or(ThreadExit::Returned(None));
                self.threads.put_back(thread);
                self.retire(id);
                StepOutcome::Terminated(exit)
            }
            Err(err) => {
                self.threads.put_back(thread);
                return Err(err);
            }
        };

        if self.active_steps == 0 && self.heap.collection_requested() {
            let result = self.collect_garbage();
            trace!(freed = result.freed, "automatic collection");
        }
        Ok(outcome)
    }

    /// Remove a finished thread: release what it still holds and recycle
    /// its id
    fn retire(&mut self, id: ThreadId) {
        if let Some(thread) = self.threads.remove(id) {
            let object = thread.object();
            if let Some(target) = self.heap.get_mut(object) {
                if let Some(slot) = target.fields.get_mut(self.known.thread_id as usize) {
                    *slot = Value::Int(0);
                }
            }
        }
        self.release_monitors_of(id);
        debug!(thread = id, "thread finished");
    }

    fn abandon(&mut self, id: ThreadId) {
        self.threads.remove(id);
        self.release_monitors_of(id);
    }

    pub(crate) fn link_error(&self, method: MethodId, kind: LinkErrorKind) -> VmError {
        let m = self.registry.method(method);
        LinkError::new(
            self.registry.class(m.class).name.clone(),
            m.name.clone(),
            m.descriptor.clone(),
            kind,
        )
        .into()
    }

    /// Turn an unwind that escaped outside of any frame into an error
    pub(crate) fn unwind_error(&self, unwind: Unwind) -> VmError {
        match unwind {
            Unwind::Fatal(err) => err,
            Unwind::Throw(exception) => VmError::UncaughtException {
                class: self
                    .heap
                    .get(exception)
                    .map(|o| self.registry.class(o.class).name.clone())
                    .unwrap_or_default(),
                message: self.exception_message(exception),
                trace: Vec::new(),
            },
        }
    }
}
