//! Native members of the bootstrap classes

use crate::bootstrap::{
    CLASS_CLASS, STRING_CLASS, SYSTEM_CLASS, THREAD_CLASS, THROWABLE_CLASS, VECTOR_CLASS,
};
use crate::exceptions::Unwind;
use crate::natives::{int_arg, long_arg, object_arg, ref_arg, NativeError, NativeMethod, NativeResult};
use crate::thread::Thread;
use crate::vm::Vm;
use bytecode_system::{ArrayElement, OBJECT_CLASS};
use core_types::{ExceptionKind, Reference, Value, VmError};
use memory_manager::{ArrayAccessError, HostObject, Payload};
use std::any::Any;
use tracing::trace;

const ILLEGAL_ARGUMENT: &str = "java/lang/IllegalArgumentException";

const BINDINGS: &[(&str, &str, &str, NativeMethod)] = &[
    (OBJECT_CLASS, "hashCode", "()I", object_hash_code),
    (OBJECT_CLASS, "toString", "()Ljava/lang/String;", object_to_string),
    (OBJECT_CLASS, "getClass", "()Ljava/lang/Class;", object_get_class),
    (OBJECT_CLASS, "wait", "()V", object_wait),
    (OBJECT_CLASS, "wait", "(J)V", object_wait_timeout),
    (OBJECT_CLASS, "notify", "()V", object_notify),
    (OBJECT_CLASS, "notifyAll", "()V", object_notify_all),
    (STRING_CLASS, "length", "()I", string_length),
    (STRING_CLASS, "charAt", "(I)C", string_char_at),
    (STRING_CLASS, "equals", "(Ljava/lang/Object;)Z", string_equals),
    (STRING_CLASS, "hashCode", "()I", string_hash_code),
    (STRING_CLASS, "toString", "()Ljava/lang/String;", string_to_string),
    (STRING_CLASS, "intern", "()Ljava/lang/String;", string_intern),
    (STRING_CLASS, "concat", "(Ljava/lang/String;)Ljava/lang/String;", string_concat),
    (STRING_CLASS, "valueOf", "(I)Ljava/lang/String;", string_value_of),
    (CLASS_CLASS, "getName", "()Ljava/lang/String;", class_get_name),
    (CLASS_CLASS, "isArray", "()Z", class_is_array),
    (THROWABLE_CLASS, "toString", "()Ljava/lang/String;", throwable_to_string),
    (THREAD_CLASS, "start", "()V", thread_start),
    (THREAD_CLASS, "isAlive", "()Z", thread_is_alive),
    (THREAD_CLASS, "interrupt", "()V", thread_interrupt),
    (THREAD_CLASS, "currentThread", "()Ljava/lang/Thread;", thread_current),
    (THREAD_CLASS, "sleep", "(J)V", thread_sleep),
    (THREAD_CLASS, "yield", "()V", thread_yield),
    (SYSTEM_CLASS, "currentTimeMillis", "()J", system_current_time_millis),
    (
        SYSTEM_CLASS,
        "arraycopy",
        "(Ljava/lang/Object;ILjava/lang/Object;II)V",
        system_arraycopy,
    ),
    (SYSTEM_CLASS, "identityHashCode", "(Ljava/lang/Object;)I", system_identity_hash_code),
    (SYSTEM_CLASS, "gc", "()V", system_gc),
    (VECTOR_CLASS, "<init>", "()V", vector_init),
    (VECTOR_CLASS, "addElement", "(Ljava/lang/Object;)V", vector_add_element),
    (VECTOR_CLASS, "elementAt", "(I)Ljava/lang/Object;", vector_element_at),
    (VECTOR_CLASS, "removeElementAt", "(I)V", vector_remove_element_at),
    (VECTOR_CLASS, "size", "()I", vector_size),
    (VECTOR_CLASS, "isEmpty", "()Z", vector_is_empty),
    (VECTOR_CLASS, "removeAllElements", "()V", vector_remove_all_elements),
];

/// Bind every bootstrap native
pub(crate) fn bind_natives(vm: &mut Vm) -> Result<(), VmError> {
    for &(class, name, descriptor, bridge) in BINDINGS {
        vm.register_native(class, name, descriptor, bridge)?;
    }
    Ok(())
}

fn lift(unwind: Unwind) -> NativeError {
    match unwind {
        Unwind::Throw(exception) => NativeError::ThrowObject(exception),
        Unwind::Fatal(err) => NativeError::Fatal(err),
    }
}

fn string_result(vm: &mut Vm, text: &str) -> NativeResult {
    Ok(Some(Value::Reference(vm.new_string(text)?)))
}

fn out_of_bounds(index: i64, length: usize) -> NativeError {
    NativeError::Throw(
        ExceptionKind::ArrayIndexOutOfBounds,
        Some(format!("Index {} out of bounds for length {}", index, length)),
    )
}

// java/lang/Object

fn object_hash_code(_vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    Ok(Some(Value::Int(this.raw() as i32)))
}

fn object_to_string(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let class = vm
        .heap()
        .get(this)
        .ok_or(VmError::DanglingReference(this))?
        .class;
    let text = format!("{}@{:x}", vm.external_name(class), this.raw());
    string_result(vm, &text)
}

fn object_get_class(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let class = vm
        .heap()
        .get(this)
        .ok_or(VmError::DanglingReference(this))?
        .class;
    Ok(Some(Value::Reference(vm.class_mirror(class)?)))
}

fn object_wait(vm: &mut Vm, thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    vm.monitor_wait(thread, this, 0).map_err(lift)?;
    Ok(None)
}

fn object_wait_timeout(vm: &mut Vm, thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let timeout = long_arg(args, 1)?;
    if timeout < 0 {
        return Err(NativeError::ThrowNew(
            ILLEGAL_ARGUMENT,
            Some("timeout value is negative".to_string()),
        ));
    }
    vm.monitor_wait(thread, this, timeout as u64).map_err(lift)?;
    Ok(None)
}

fn object_notify(vm: &mut Vm, thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    vm.monitor_notify(thread.id(), this, false).map_err(lift)?;
    Ok(None)
}

fn object_notify_all(vm: &mut Vm, thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    vm.monitor_notify(thread.id(), this, true).map_err(lift)?;
    Ok(None)
}

// java/lang/String

fn utf16(vm: &Vm, string: Reference) -> Result<&[u16], NativeError> {
    vm.heap()
        .get(string)
        .and_then(|o| o.as_utf16())
        .ok_or_else(|| {
            VmError::WrongObjectKind {
                reference: string,
                expected: "a string",
            }
            .into()
        })
}

fn string_length(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    Ok(Some(Value::Int(utf16(vm, this)?.len() as i32)))
}

fn string_char_at(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let index = int_arg(args, 1)?;
    let chars = utf16(vm, this)?;
    match usize::try_from(index).ok().and_then(|i| chars.get(i)) {
        Some(&c) => Ok(Some(Value::Int(c as i32))),
        None => Err(NativeError::ThrowNew(
            "java/lang/StringIndexOutOfBoundsException",
            Some(format!("index {} out of bounds for length {}", index, chars.len())),
        )),
    }
}

fn string_equals(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let other = ref_arg(args, 1)?;
    let equal = this == other
        || match vm.heap().get(other).and_then(|o| o.as_utf16()) {
            Some(other) => other == utf16(vm, this)?,
            None => false,
        };
    Ok(Some(Value::Int(equal as i32)))
}

fn string_hash_code(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let hash = utf16(vm, this)?
        .iter()
        .fold(0i32, |h, &c| h.wrapping_mul(31).wrapping_add(c as i32));
    Ok(Some(Value::Int(hash)))
}

fn string_to_string(_vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    Ok(Some(Value::Reference(object_arg(args, 0)?)))
}

fn string_intern(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let text = String::from_utf16_lossy(utf16(vm, this)?);
    Ok(Some(Value::Reference(vm.intern(&text)?)))
}

fn string_concat(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let other = object_arg(args, 1)?;
    let mut text = String::from_utf16_lossy(utf16(vm, this)?);
    text.push_str(&String::from_utf16_lossy(utf16(vm, other)?));
    string_result(vm, &text)
}

fn string_value_of(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let value = int_arg(args, 0)?;
    string_result(vm, &value.to_string())
}

// java/lang/Class

fn mirrored(vm: &Vm, args: &[Value]) -> Result<bytecode_system::ClassId, NativeError> {
    let this = object_arg(args, 0)?;
    vm.mirrored_class(this).ok_or_else(|| {
        VmError::WrongObjectKind {
            reference: this,
            expected: "a class mirror",
        }
        .into()
    })
}

fn class_get_name(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let class = mirrored(vm, args)?;
    let name = vm.external_name(class);
    string_result(vm, &name)
}

fn class_is_array(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let class = mirrored(vm, args)?;
    Ok(Some(Value::Int(vm.registry().class(class).is_array() as i32)))
}

// java/lang/Throwable

fn throwable_to_string(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let class = vm
        .heap()
        .get(this)
        .ok_or(VmError::DanglingReference(this))?
        .class;
    let mut text = vm.external_name(class);
    if let Some(message) = vm.exception_message(this) {
        text.push_str(": ");
        text.push_str(&message);
    }
    string_result(vm, &text)
}

// java/lang/Thread

fn running_id(vm: &Vm, object: Reference) -> Result<u16, NativeError> {
    let id = vm.get_field(object, "threadId")?.as_int().unwrap_or_default();
    Ok(id as u16)
}

fn thread_start(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    if running_id(vm, this)? != 0 {
        return Err(NativeError::ThrowNew(
            "java/lang/IllegalThreadStateException",
            Some("thread already started".to_string()),
        ));
    }
    vm.start_thread(this)?;
    Ok(None)
}

fn thread_is_alive(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    Ok(Some(Value::Int((running_id(vm, this)? != 0) as i32)))
}

fn thread_interrupt(vm: &mut Vm, thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let target = running_id(vm, this)?;
    if target == 0 {
        return Ok(None);
    }
    if target == thread.id() {
        thread.interrupted = true;
        return Ok(None);
    }
    let blocked = vm.threads().waiting(target).is_some();
    if let Some(other) = vm.threads_mut().get_mut(target) {
        if blocked {
            other.pending_exception = Some(ExceptionKind::Interrupted);
        } else {
            other.interrupted = true;
        }
    }
    if blocked {
        vm.threads_mut().attach(target);
        trace!(thread = thread.id(), target, "interrupted waiting thread");
    }
    Ok(None)
}

fn thread_current(vm: &mut Vm, thread: &mut Thread, _args: &[Value]) -> NativeResult {
    if thread.object().is_null() {
        let object = vm.new_instance(vm.known.thread)?;
        vm.set_field(object, "threadId", Value::Int(thread.id() as i32))?;
        thread.set_object(object);
    }
    Ok(Some(Value::Reference(thread.object())))
}

fn thread_sleep(vm: &mut Vm, thread: &mut Thread, args: &[Value]) -> NativeResult {
    let millis = long_arg(args, 0)?;
    if millis < 0 {
        return Err(NativeError::ThrowNew(
            ILLEGAL_ARGUMENT,
            Some("timeout value is negative".to_string()),
        ));
    }
    if std::mem::take(&mut thread.interrupted) {
        return Err(NativeError::Throw(ExceptionKind::Interrupted, None));
    }
    if millis == 0 {
        vm.threads_mut().yield_now(thread.id());
    } else {
        let wake_at = vm.now_ms().saturating_add(millis as u64);
        vm.threads_mut().detach(thread.id(), Some(wake_at));
    }
    Ok(None)
}

fn thread_yield(vm: &mut Vm, thread: &mut Thread, _args: &[Value]) -> NativeResult {
    vm.threads_mut().yield_now(thread.id());
    Ok(None)
}

// java/lang/System

fn system_current_time_millis(vm: &mut Vm, _thread: &mut Thread, _args: &[Value]) -> NativeResult {
    Ok(Some(Value::Long(vm.now_ms() as i64)))
}

fn array_error(err: ArrayAccessError) -> NativeError {
    match err {
        ArrayAccessError::OutOfBounds { index, length } => out_of_bounds(index, length),
        ArrayAccessError::WrongKind { .. } => NativeError::Throw(ExceptionKind::ArrayStore, None),
    }
}

fn system_arraycopy(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let src = object_arg(args, 0)?;
    let src_pos = int_arg(args, 1)?;
    let dst = object_arg(args, 2)?;
    let dst_pos = int_arg(args, 3)?;
    let length = int_arg(args, 4)?;

    let element = |vm: &Vm, array: Reference| {
        vm.heap()
            .get(array)
            .and_then(|o| vm.registry().class(o.class).element)
            .ok_or_else(|| {
                NativeError::Throw(
                    ExceptionKind::ArrayStore,
                    Some("arraycopy: argument is not an array".to_string()),
                )
            })
    };
    let src_element = element(vm, src)?;
    let dst_element = element(vm, dst)?;
    if src_pos < 0 || dst_pos < 0 || length < 0 {
        return Err(NativeError::Throw(
            ExceptionKind::ArrayIndexOutOfBounds,
            Some(format!(
                "arraycopy: negative position or length ({}, {}, {})",
                src_pos, dst_pos, length
            )),
        ));
    }
    let (src_pos, dst_pos, length) = (src_pos as usize, dst_pos as usize, length as usize);

    if let (ArrayElement::Reference(from), ArrayElement::Reference(to)) = (src_element, dst_element) {
        if !vm.registry().is_assignable(from, to) {
            let data = vm
                .heap()
                .get(src)
                .and_then(|o| o.as_array())
                .ok_or(VmError::DanglingReference(src))?;
            let end = (src_pos + length).min(data.len());
            let elements = data.reference_elements().get(src_pos..end).unwrap_or_default();
            for &element in elements.iter().filter(|r| !r.is_null()) {
                let class = vm.heap().get(element).map(|o| o.class);
                if !class.is_some_and(|c| vm.registry().is_assignable(c, to)) {
                    return Err(NativeError::Throw(ExceptionKind::ArrayStore, None));
                }
            }
        }
    }

    if src == dst {
        let data = vm
            .heap_mut()
            .get_mut(src)
            .and_then(|o| o.as_array_mut())
            .ok_or(VmError::DanglingReference(src))?;
        data.copy_within(src_pos, dst_pos, length).map_err(array_error)?;
        return Ok(None);
    }

    // lend the source payload out so both arrays can be borrowed at once
    let source = vm
        .heap_mut()
        .get_mut(src)
        .ok_or(VmError::DanglingReference(src))?;
    let payload = std::mem::replace(&mut source.payload, Payload::None);
    let copied = match (&payload, vm.heap_mut().get_mut(dst).and_then(|o| o.as_array_mut())) {
        (Payload::Array(from), Some(to)) => to.copy_from(dst_pos, from, src_pos, length).map_err(array_error),
        _ => Err(VmError::DanglingReference(dst).into()),
    };
    if let Some(source) = vm.heap_mut().get_mut(src) {
        source.payload = payload;
    }
    copied?;
    Ok(None)
}

fn system_identity_hash_code(_vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    Ok(Some(Value::Int(ref_arg(args, 0)?.raw() as i32)))
}

fn system_gc(vm: &mut Vm, _thread: &mut Thread, _args: &[Value]) -> NativeResult {
    vm.request_gc();
    Ok(None)
}

// java/util/Vector

/// Storage behind a `java.util.Vector`
#[derive(Debug, Default)]
pub struct VectorData {
    elements: Vec<Reference>,
}

impl VectorData {
    /// Stored elements in order
    pub fn elements(&self) -> &[Reference] {
        &self.elements
    }
}

impl HostObject for VectorData {
    fn trace(&self, out: &mut Vec<Reference>) {
        out.extend(self.elements.iter().copied().filter(|r| !r.is_null()));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn vector<'a>(vm: &'a mut Vm, this: Reference) -> Result<&'a mut VectorData, NativeError> {
    vm.heap_mut()
        .get_mut(this)
        .and_then(|o| o.host_mut::<VectorData>())
        .ok_or_else(|| {
            VmError::WrongObjectKind {
                reference: this,
                expected: "a constructed Vector",
            }
            .into()
        })
}

fn vector_init(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let object = vm
        .heap_mut()
        .get_mut(this)
        .ok_or(VmError::DanglingReference(this))?;
    object.payload = Payload::Host(Box::new(VectorData::default()));
    Ok(None)
}

fn vector_add_element(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let element = ref_arg(args, 1)?;
    vector(vm, this)?.elements.push(element);
    Ok(None)
}

fn vector_element_at(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let index = int_arg(args, 1)?;
    let elements = &vector(vm, this)?.elements;
    match usize::try_from(index).ok().and_then(|i| elements.get(i)) {
        Some(&element) => Ok(Some(Value::Reference(element))),
        None => Err(out_of_bounds(index as i64, elements.len())),
    }
}

fn vector_remove_element_at(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    let index = int_arg(args, 1)?;
    let elements = &mut vector(vm, this)?.elements;
    match usize::try_from(index).ok().filter(|&i| i < elements.len()) {
        Some(i) => {
            elements.remove(i);
            Ok(None)
        }
        None => Err(out_of_bounds(index as i64, elements.len())),
    }
}

fn vector_size(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    Ok(Some(Value::Int(vector(vm, this)?.elements.len() as i32)))
}

fn vector_is_empty(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    Ok(Some(Value::Int(vector(vm, this)?.elements.is_empty() as i32)))
}

fn vector_remove_all_elements(vm: &mut Vm, _thread: &mut Thread, args: &[Value]) -> NativeResult {
    let this = object_arg(args, 0)?;
    vector(vm, this)?.elements.clear();
    Ok(None)
}
