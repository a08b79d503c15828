//! Dispatch loop for linked bytecode
//!
//! [`Vm::step_thread`] executes exactly one instruction of one thread. Every
//! opcode handler reports a [`Flow`] telling the loop where the instruction
//! pointer goes next; guest exceptions and fatal errors leave through
//! [`Unwind`].

use crate::arith;
use crate::exceptions::Unwind;
use crate::frame::Words;
use crate::thread::Thread;
use crate::vm::{StepOutcome, Vm};
use bytecode_system::{ArrayElement, ClassId, LinkedInstruction, Opcode, Operand};
use core_types::{ExceptionKind, Reference, Value, ValueTag, VmError};
use memory_manager::{ArrayAccessError, ArrayData, MonitorEnter};
use std::sync::Arc;

/// Where control goes after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Fall through to the next instruction
    Next,
    /// Continue at the given instruction index
    Jump(usize),
    /// Leave every instruction pointer alone (a frame was pushed or popped)
    Stay,
    /// Nothing happened; execute the same instruction again later
    Retry,
}

impl Vm {
    /// Execute one instruction of `thread`
    pub(crate) fn step_thread(&mut self, thread: &mut Thread) -> Result<StepOutcome, VmError> {
        if thread.is_finished() {
            return Ok(StepOutcome::Executed);
        }
        if let Some((monitor, count)) = thread.pending_reacquire {
            if !self.reacquire(thread.id(), monitor, count)? {
                return Ok(StepOutcome::Retry);
            }
            thread.pending_reacquire = None;
        }
        let blocked_at = thread.blocked_at.take();
        if let Some(kind) = thread.pending_exception.take() {
            // the blocking invoke is the throwing instruction
            if let Some(ip) = blocked_at {
                thread.frame_mut()?.ip = ip;
            }
            return match self.raise(kind, None) {
                Unwind::Throw(exception) => self.unwind(thread, exception),
                Unwind::Fatal(err) => Err(err),
            };
        }

        let frame = thread.frame_mut()?;
        let code = Arc::clone(frame.code());
        let ip = frame.ip;
        let Some(instruction) = code.get(ip) else {
            return Err(VmError::BadInstructionPointer {
                ip,
                method: self.registry.qualified_name(code.method),
            });
        };

        match self.execute(thread, instruction) {
            Ok(Flow::Next) => {
                thread.frame_mut()?.ip += 1;
                Ok(StepOutcome::Executed)
            }
            Ok(Flow::Jump(target)) => {
                thread.frame_mut()?.ip = target;
                Ok(StepOutcome::Executed)
            }
            Ok(Flow::Stay) => Ok(StepOutcome::Executed),
            Ok(Flow::Retry) => Ok(StepOutcome::Retry),
            Err(Unwind::Throw(exception)) => self.unwind(thread, exception),
            Err(Unwind::Fatal(err)) => Err(err),
        }
    }

    fn malformed(&self, thread: &Thread, instruction: &LinkedInstruction) -> VmError {
        VmError::UnsupportedOpcode {
            opcode: instruction.opcode.byte(),
            method: thread
                .frame()
                .map(|f| self.registry.qualified_name(f.method()))
                .unwrap_or_default(),
            offset: instruction.offset,
        }
    }

    fn branch(&self, thread: &Thread, instruction: &LinkedInstruction) -> Result<usize, VmError> {
        match instruction.operand {
            Operand::Branch(target) => Ok(target),
            _ => Err(self.malformed(thread, instruction)),
        }
    }

    fn local_index(&self, thread: &Thread, instruction: &LinkedInstruction) -> Result<u16, VmError> {
        match instruction.operand {
            Operand::Local(index) => Ok(index),
            _ => Err(self.malformed(thread, instruction)),
        }
    }

    fn class_operand(&self, thread: &Thread, instruction: &LinkedInstruction) -> Result<ClassId, VmError> {
        match instruction.operand {
            Operand::Class(class) => Ok(class),
            _ => Err(self.malformed(thread, instruction)),
        }
    }

    /// Binary name of a class (`java.lang.String`)
    pub(crate) fn external_name(&self, class: ClassId) -> String {
        self.registry.class(class).name.replace('/', ".")
    }

    fn class_of(&self, object: Reference) -> Result<ClassId, VmError> {
        self.heap
            .get(object)
            .map(|o| o.class)
            .ok_or(VmError::DanglingReference(object))
    }

    fn execute(&mut self, thread: &mut Thread, instruction: &LinkedInstruction) -> Result<Flow, Unwind> {
        macro_rules! frame {
            () => {
                thread.frame_mut()?
            };
        }
        macro_rules! push {
            ($value:expr) => {{
                let value = $value;
                frame!().push(value)?;
                Flow::Next
            }};
        }
        macro_rules! unary {
            ($pop:ident, $wrap:path, |$a:ident| $e:expr) => {{
                let f = frame!();
                let $a = f.$pop()?;
                f.push($wrap($e))?;
                Flow::Next
            }};
        }
        macro_rules! binary {
            ($pop:ident, $wrap:path, |$a:ident, $b:ident| $e:expr) => {{
                let f = frame!();
                let $b = f.$pop()?;
                let $a = f.$pop()?;
                f.push($wrap($e))?;
                Flow::Next
            }};
        }
        macro_rules! shift {
            ($pop:ident, $wrap:path, $op:path) => {{
                let f = frame!();
                let count = f.pop_int()?;
                let value = f.$pop()?;
                f.push($wrap($op(value, count)))?;
                Flow::Next
            }};
        }
        macro_rules! checked {
            ($pop:ident, $wrap:path, $op:path) => {{
                let f = frame!();
                let b = f.$pop()?;
                let a = f.$pop()?;
                match $op(a, b) {
                    Some(result) => {
                        f.push($wrap(result))?;
                        Flow::Next
                    }
                    None => {
                        return Err(self.raise(ExceptionKind::Arithmetic, Some("/ by zero".to_string())))
                    }
                }
            }};
        }
        macro_rules! jump_if {
            ($cond:expr) => {{
                if $cond {
                    Flow::Jump(self.branch(thread, instruction)?)
                } else {
                    Flow::Next
                }
            }};
        }
        macro_rules! load {
            ($tag:expr) => {{
                let index = self.local_index(thread, instruction)?;
                let f = frame!();
                let value = f.load(index, $tag)?;
                f.push(value)?;
                Flow::Next
            }};
        }
        macro_rules! store {
            ($tag:expr) => {{
                let index = self.local_index(thread, instruction)?;
                let f = frame!();
                let value = f.pop_tagged($tag)?;
                f.store(index, value)?;
                Flow::Next
            }};
        }
        macro_rules! array_load {
            () => {{
                let f = frame!();
                let index = f.pop_int()?;
                let array = f.pop_ref()?;
                let value = self.array_load(array, index)?;
                push!(value)
            }};
        }
        macro_rules! array_store {
            ($tag:expr) => {{
                let f = frame!();
                let value = f.pop_tagged($tag)?;
                let index = f.pop_int()?;
                let array = f.pop_ref()?;
                self.array_store(array, index, value)?;
                Flow::Next
            }};
        }

        let opcode = instruction.opcode;
        let flow = match opcode {
            Opcode::Nop => Flow::Next,

            // constants
            Opcode::AconstNull => push!(Value::NULL),
            Opcode::IconstM1
            | Opcode::Iconst0
            | Opcode::Iconst1
            | Opcode::Iconst2
            | Opcode::Iconst3
            | Opcode::Iconst4
            | Opcode::Iconst5 => push!(Value::Int(opcode.byte() as i32 - Opcode::Iconst0.byte() as i32)),
            Opcode::Lconst0 | Opcode::Lconst1 => {
                push!(Value::Long((opcode.byte() - Opcode::Lconst0.byte()) as i64))
            }
            Opcode::Fconst0 | Opcode::Fconst1 | Opcode::Fconst2 => {
                push!(Value::Float((opcode.byte() - Opcode::Fconst0.byte()) as f32))
            }
            Opcode::Dconst0 | Opcode::Dconst1 => {
                push!(Value::Double((opcode.byte() - Opcode::Dconst0.byte()) as f64))
            }
            Opcode::Bipush | Opcode::Sipush => match instruction.operand {
                Operand::Int(value) => push!(Value::Int(value)),
                _ => return Err(self.malformed(thread, instruction).into()),
            },
            Opcode::Ldc | Opcode::LdcW | Opcode::Ldc2W => {
                let value = match &instruction.operand {
                    Operand::Int(v) => Value::Int(*v),
                    Operand::Float(v) => Value::Float(*v),
                    Operand::Long(v) => Value::Long(*v),
                    Operand::Double(v) => Value::Double(*v),
                    Operand::String(text) => Value::Reference(self.intern(text)?),
                    Operand::Class(class) => Value::Reference(self.class_mirror(*class)?),
                    _ => return Err(self.malformed(thread, instruction).into()),
                };
                push!(value)
            }

            // locals
            Opcode::Iload | Opcode::Iload0 | Opcode::Iload1 | Opcode::Iload2 | Opcode::Iload3 => {
                load!(ValueTag::Int)
            }
            Opcode::Lload | Opcode::Lload0 | Opcode::Lload1 | Opcode::Lload2 | Opcode::Lload3 => {
                load!(ValueTag::Long)
            }
            Opcode::Fload | Opcode::Fload0 | Opcode::Fload1 | Opcode::Fload2 | Opcode::Fload3 => {
                load!(ValueTag::Float)
            }
            Opcode::Dload | Opcode::Dload0 | Opcode::Dload1 | Opcode::Dload2 | Opcode::Dload3 => {
                load!(ValueTag::Double)
            }
            Opcode::Aload | Opcode::Aload0 | Opcode::Aload1 | Opcode::Aload2 | Opcode::Aload3 => {
                load!(ValueTag::Reference)
            }
            Opcode::Istore | Opcode::Istore0 | Opcode::Istore1 | Opcode::Istore2 | Opcode::Istore3 => {
                store!(ValueTag::Int)
            }
            Opcode::Lstore | Opcode::Lstore0 | Opcode::Lstore1 | Opcode::Lstore2 | Opcode::Lstore3 => {
                store!(ValueTag::Long)
            }
            Opcode::Fstore | Opcode::Fstore0 | Opcode::Fstore1 | Opcode::Fstore2 | Opcode::Fstore3 => {
                store!(ValueTag::Float)
            }
            Opcode::Dstore | Opcode::Dstore0 | Opcode::Dstore1 | Opcode::Dstore2 | Opcode::Dstore3 => {
                store!(ValueTag::Double)
            }
            Opcode::Astore | Opcode::Astore0 | Opcode::Astore1 | Opcode::Astore2 | Opcode::Astore3 => {
                store!(ValueTag::Reference)
            }
            Opcode::Iinc => match instruction.operand {
                Operand::Iinc { index, delta } => {
                    let f = frame!();
                    let value = f.load(index, ValueTag::Int)?.as_int().unwrap_or_default();
                    f.store(index, Value::Int(value.wrapping_add(delta)))?;
                    Flow::Next
                }
                _ => return Err(self.malformed(thread, instruction).into()),
            },

            // arrays
            Opcode::Iaload
            | Opcode::Laload
            | Opcode::Faload
            | Opcode::Daload
            | Opcode::Aaload
            | Opcode::Baload
            | Opcode::Caload
            | Opcode::Saload => array_load!(),
            Opcode::Iastore | Opcode::Bastore | Opcode::Castore | Opcode::Sastore => {
                array_store!(ValueTag::Int)
            }
            Opcode::Lastore => array_store!(ValueTag::Long),
            Opcode::Fastore => array_store!(ValueTag::Float),
            Opcode::Dastore => array_store!(ValueTag::Double),
            Opcode::Aastore => array_store!(ValueTag::Reference),
            Opcode::Newarray | Opcode::Anewarray => {
                let class = self.class_operand(thread, instruction)?;
                let length = frame!().pop_int()?;
                let array = self.new_array(class, length)?;
                push!(Value::Reference(array))
            }
            Opcode::Multianewarray => match instruction.operand {
                Operand::MultiArray { class, dimensions } => {
                    let f = frame!();
                    let mut counts = Vec::with_capacity(dimensions as usize);
                    for _ in 0..dimensions {
                        counts.push(f.pop_int()?);
                    }
                    counts.reverse();
                    if let Some(negative) = counts.iter().find(|&&c| c < 0) {
                        return Err(self.raise(ExceptionKind::NegativeArraySize, Some(negative.to_string())));
                    }
                    let array = self.new_multi_array(class, &counts)?;
                    push!(Value::Reference(array))
                }
                _ => return Err(self.malformed(thread, instruction).into()),
            },
            Opcode::Arraylength => {
                let array = frame!().pop_ref()?;
                let array = self.non_null(array)?;
                let length = self.array_data(array)?.len();
                push!(Value::Int(length as i32))
            }

            // operand stack
            Opcode::Pop => {
                frame!().take_words(1)?;
                Flow::Next
            }
            Opcode::Pop2 => {
                frame!().take_words(2)?;
                Flow::Next
            }
            Opcode::Dup => self.shuffle(thread, 1, 0)?,
            Opcode::DupX1 => self.shuffle(thread, 1, 1)?,
            Opcode::DupX2 => self.shuffle(thread, 1, 2)?,
            Opcode::Dup2 => self.shuffle(thread, 2, 0)?,
            Opcode::Dup2X1 => self.shuffle(thread, 2, 1)?,
            Opcode::Dup2X2 => self.shuffle(thread, 2, 2)?,
            Opcode::Swap => {
                let f = frame!();
                let a = f.take_words(1)?;
                let b = f.take_words(1)?;
                f.put_words(&a)?;
                f.put_words(&b)?;
                Flow::Next
            }

            // arithmetic
            Opcode::Iadd => binary!(pop_int, Value::Int, |a, b| a.wrapping_add(b)),
            Opcode::Ladd => binary!(pop_long, Value::Long, |a, b| a.wrapping_add(b)),
            Opcode::Fadd => binary!(pop_float, Value::Float, |a, b| a + b),
            Opcode::Dadd => binary!(pop_double, Value::Double, |a, b| a + b),
            Opcode::Isub => binary!(pop_int, Value::Int, |a, b| a.wrapping_sub(b)),
            Opcode::Lsub => binary!(pop_long, Value::Long, |a, b| a.wrapping_sub(b)),
            Opcode::Fsub => binary!(pop_float, Value::Float, |a, b| a - b),
            Opcode::Dsub => binary!(pop_double, Value::Double, |a, b| a - b),
            Opcode::Imul => binary!(pop_int, Value::Int, |a, b| a.wrapping_mul(b)),
            Opcode::Lmul => binary!(pop_long, Value::Long, |a, b| a.wrapping_mul(b)),
            Opcode::Fmul => binary!(pop_float, Value::Float, |a, b| a * b),
            Opcode::Dmul => binary!(pop_double, Value::Double, |a, b| a * b),
            Opcode::Idiv => checked!(pop_int, Value::Int, arith::div),
            Opcode::Ldiv => checked!(pop_long, Value::Long, arith::div),
            Opcode::Fdiv => binary!(pop_float, Value::Float, |a, b| a / b),
            Opcode::Ddiv => binary!(pop_double, Value::Double, |a, b| a / b),
            Opcode::Irem => checked!(pop_int, Value::Int, arith::rem),
            Opcode::Lrem => checked!(pop_long, Value::Long, arith::rem),
            Opcode::Frem => binary!(pop_float, Value::Float, |a, b| a % b),
            Opcode::Drem => binary!(pop_double, Value::Double, |a, b| a % b),
            Opcode::Ineg => unary!(pop_int, Value::Int, |a| a.wrapping_neg()),
            Opcode::Lneg => unary!(pop_long, Value::Long, |a| a.wrapping_neg()),
            Opcode::Fneg => unary!(pop_float, Value::Float, |a| -a),
            Opcode::Dneg => unary!(pop_double, Value::Double, |a| -a),
            Opcode::Ishl => shift!(pop_int, Value::Int, arith::ishl),
            Opcode::Ishr => shift!(pop_int, Value::Int, arith::ishr),
            Opcode::Iushr => shift!(pop_int, Value::Int, arith::iushr),
            Opcode::Lshl => shift!(pop_long, Value::Long, arith::lshl),
            Opcode::Lshr => shift!(pop_long, Value::Long, arith::lshr),
            Opcode::Lushr => shift!(pop_long, Value::Long, arith::lushr),
            Opcode::Iand => binary!(pop_int, Value::Int, |a, b| a & b),
            Opcode::Land => binary!(pop_long, Value::Long, |a, b| a & b),
            Opcode::Ior => binary!(pop_int, Value::Int, |a, b| a | b),
            Opcode::Lor => binary!(pop_long, Value::Long, |a, b| a | b),
            Opcode::Ixor => binary!(pop_int, Value::Int, |a, b| a ^ b),
            Opcode::Lxor => binary!(pop_long, Value::Long, |a, b| a ^ b),

            // conversions
            Opcode::I2l => unary!(pop_int, Value::Long, |a| a as i64),
            Opcode::I2f => unary!(pop_int, Value::Float, |a| a as f32),
            Opcode::I2d => unary!(pop_int, Value::Double, |a| a as f64),
            Opcode::L2i => unary!(pop_long, Value::Int, |a| a as i32),
            Opcode::L2f => unary!(pop_long, Value::Float, |a| a as f32),
            Opcode::L2d => unary!(pop_long, Value::Double, |a| a as f64),
            Opcode::F2i => unary!(pop_float, Value::Int, |a| arith::f2i(a)),
            Opcode::F2l => unary!(pop_float, Value::Long, |a| arith::f2l(a)),
            Opcode::F2d => unary!(pop_float, Value::Double, |a| a as f64),
            Opcode::D2i => unary!(pop_double, Value::Int, |a| arith::d2i(a)),
            Opcode::D2l => unary!(pop_double, Value::Long, |a| arith::d2l(a)),
            Opcode::D2f => unary!(pop_double, Value::Float, |a| a as f32),
            Opcode::I2b => unary!(pop_int, Value::Int, |a| a as i8 as i32),
            Opcode::I2c => unary!(pop_int, Value::Int, |a| a as u16 as i32),
            Opcode::I2s => unary!(pop_int, Value::Int, |a| a as i16 as i32),

            // comparisons
            Opcode::Lcmp => binary!(pop_long, Value::Int, |a, b| arith::lcmp(a, b)),
            Opcode::Fcmpl => binary!(pop_float, Value::Int, |a, b| arith::fcmp(a, b, -1)),
            Opcode::Fcmpg => binary!(pop_float, Value::Int, |a, b| arith::fcmp(a, b, 1)),
            Opcode::Dcmpl => binary!(pop_double, Value::Int, |a, b| arith::fcmp(a, b, -1)),
            Opcode::Dcmpg => binary!(pop_double, Value::Int, |a, b| arith::fcmp(a, b, 1)),

            // control
            Opcode::Ifeq => jump_if!(frame!().pop_int()? == 0),
            Opcode::Ifne => jump_if!(frame!().pop_int()? != 0),
            Opcode::Iflt => jump_if!(frame!().pop_int()? < 0),
            Opcode::Ifge => jump_if!(frame!().pop_int()? >= 0),
            Opcode::Ifgt => jump_if!(frame!().pop_int()? > 0),
            Opcode::Ifle => jump_if!(frame!().pop_int()? <= 0),
            Opcode::IfIcmpeq
            | Opcode::IfIcmpne
            | Opcode::IfIcmplt
            | Opcode::IfIcmpge
            | Opcode::IfIcmpgt
            | Opcode::IfIcmple => {
                let f = frame!();
                let b = f.pop_int()?;
                let a = f.pop_int()?;
                jump_if!(match opcode {
                    Opcode::IfIcmpeq => a == b,
                    Opcode::IfIcmpne => a != b,
                    Opcode::IfIcmplt => a < b,
                    Opcode::IfIcmpge => a >= b,
                    Opcode::IfIcmpgt => a > b,
                    _ => a <= b,
                })
            }
            Opcode::IfAcmpeq | Opcode::IfAcmpne => {
                let f = frame!();
                let b = f.pop_ref()?;
                let a = f.pop_ref()?;
                jump_if!((a == b) == (opcode == Opcode::IfAcmpeq))
            }
            Opcode::Ifnull => jump_if!(frame!().pop_ref()?.is_null()),
            Opcode::Ifnonnull => jump_if!(!frame!().pop_ref()?.is_null()),
            Opcode::Goto | Opcode::GotoW => Flow::Jump(self.branch(thread, instruction)?),
            Opcode::Tableswitch => match &instruction.operand {
                Operand::Table {
                    low,
                    default,
                    targets,
                } => {
                    let key = frame!().pop_int()?;
                    let index = key as i64 - *low as i64;
                    let target = usize::try_from(index)
                        .ok()
                        .and_then(|i| targets.get(i))
                        .copied()
                        .unwrap_or(*default);
                    Flow::Jump(target)
                }
                _ => return Err(self.malformed(thread, instruction).into()),
            },
            Opcode::Lookupswitch => match &instruction.operand {
                Operand::Lookup { default, pairs } => {
                    let key = frame!().pop_int()?;
                    let target = pairs
                        .binary_search_by_key(&key, |&(k, _)| k)
                        .map(|i| pairs[i].1)
                        .unwrap_or(*default);
                    Flow::Jump(target)
                }
                _ => return Err(self.malformed(thread, instruction).into()),
            },

            // returns
            Opcode::Ireturn => {
                let value = frame!().pop_tagged(ValueTag::Int)?;
                self.return_from(thread, Some(value))?
            }
            Opcode::Lreturn => {
                let value = frame!().pop_tagged(ValueTag::Long)?;
                self.return_from(thread, Some(value))?
            }
            Opcode::Freturn => {
                let value = frame!().pop_tagged(ValueTag::Float)?;
                self.return_from(thread, Some(value))?
            }
            Opcode::Dreturn => {
                let value = frame!().pop_tagged(ValueTag::Double)?;
                self.return_from(thread, Some(value))?
            }
            Opcode::Areturn => {
                let value = frame!().pop_tagged(ValueTag::Reference)?;
                self.return_from(thread, Some(value))?
            }
            Opcode::Return => self.return_from(thread, None)?,
            Opcode::ReturnInPlace => self.finish_initializer(thread)?,

            // fields
            Opcode::Getstatic | Opcode::Putstatic | Opcode::Getfield | Opcode::Putfield => {
                let Operand::Field(field) = instruction.operand else {
                    return Err(self.malformed(thread, instruction).into());
                };
                if let Some(flow) = self.ensure_initialized(thread, field.class)? {
                    return Ok(flow);
                }
                let slot = field.slot as usize;
                match opcode {
                    Opcode::Getstatic => {
                        let value = self.registry.class(field.class).statics[slot];
                        push!(value)
                    }
                    Opcode::Putstatic => {
                        let value = frame!().pop_tagged(field.tag)?;
                        self.registry.class_mut(field.class).statics[slot] = value;
                        Flow::Next
                    }
                    Opcode::Getfield => {
                        let object = frame!().pop_ref()?;
                        let object = self.non_null(object)?;
                        let value = *self.instance_field(object, slot)?;
                        push!(value)
                    }
                    _ => {
                        let f = frame!();
                        let value = f.pop_tagged(field.tag)?;
                        let object = f.pop_ref()?;
                        let object = self.non_null(object)?;
                        *self.instance_field(object, slot)? = value;
                        Flow::Next
                    }
                }
            }

            // calls
            Opcode::Invokevirtual | Opcode::Invokespecial | Opcode::Invokestatic | Opcode::Invokeinterface => {
                self.invoke(thread, opcode, &instruction.operand)?
            }

            // objects
            Opcode::New => {
                let class = self.class_operand(thread, instruction)?;
                let runtime = self.registry.class(class);
                if runtime.is_abstract() || runtime.is_interface() || runtime.is_array() {
                    let name = self.external_name(class);
                    return Err(self.raise(ExceptionKind::Instantiation, Some(name)));
                }
                if let Some(flow) = self.ensure_initialized(thread, class)? {
                    return Ok(flow);
                }
                let object = self.new_instance(class)?;
                push!(Value::Reference(object))
            }
            Opcode::Athrow => {
                let exception = frame!().pop_ref()?;
                let exception = self.non_null(exception)?;
                return Err(Unwind::Throw(exception));
            }
            Opcode::Checkcast => {
                let target = self.class_operand(thread, instruction)?;
                let object = frame!().peek_ref(0)?;
                if !object.is_null() {
                    let class = self.class_of(object)?;
                    if !self.registry.is_assignable(class, target) {
                        let message = format!(
                            "{} cannot be cast to {}",
                            self.external_name(class),
                            self.external_name(target)
                        );
                        return Err(self.raise(ExceptionKind::ClassCast, Some(message)));
                    }
                }
                Flow::Next
            }
            Opcode::Instanceof => {
                let target = self.class_operand(thread, instruction)?;
                let object = frame!().pop_ref()?;
                let is_instance = !object.is_null() && {
                    let class = self.class_of(object)?;
                    self.registry.is_assignable(class, target)
                };
                push!(Value::Int(is_instance as i32))
            }
            Opcode::Monitorenter => {
                let object = frame!().peek_ref(0)?;
                let object = self.non_null(object)?;
                match self.monitor_enter(thread.id(), object)? {
                    MonitorEnter::Acquired => {
                        frame!().pop_ref()?;
                        Flow::Next
                    }
                    MonitorEnter::Contended => Flow::Retry,
                }
            }
            Opcode::Monitorexit => {
                let object = frame!().pop_ref()?;
                let object = self.non_null(object)?;
                self.monitor_exit(thread.id(), object)?;
                Flow::Next
            }

            Opcode::Jsr | Opcode::JsrW | Opcode::Ret | Opcode::Wide | Opcode::Invokedynamic => {
                return Err(self.malformed(thread, instruction).into())
            }
        };
        Ok(flow)
    }

    /// The `dup` family: copy the top `words` words and insert the copy
    /// below the next `skip` words
    fn shuffle(&mut self, thread: &mut Thread, words: usize, skip: usize) -> Result<Flow, Unwind> {
        let f = thread.frame_mut()?;
        let top = f.take_words(words)?;
        let below: Words = if skip > 0 { f.take_words(skip)? } else { Words::new() };
        f.put_words(&top)?;
        f.put_words(&below)?;
        f.put_words(&top)?;
        Ok(Flow::Next)
    }

    fn instance_field(&mut self, object: Reference, slot: usize) -> Result<&mut Value, VmError> {
        self.heap
            .get_mut(object)
            .ok_or(VmError::DanglingReference(object))?
            .fields
            .get_mut(slot)
            .ok_or(VmError::WrongObjectKind {
                reference: object,
                expected: "an instance with this field",
            })
    }

    fn array_data(&self, array: Reference) -> Result<&ArrayData, VmError> {
        self.heap
            .get(array)
            .ok_or(VmError::DanglingReference(array))?
            .as_array()
            .ok_or(VmError::WrongObjectKind {
                reference: array,
                expected: "an array",
            })
    }

    pub(crate) fn array_error(&mut self, array: Reference, err: ArrayAccessError) -> Unwind {
        match err {
            ArrayAccessError::OutOfBounds { index, length } => self.raise(
                ExceptionKind::ArrayIndexOutOfBounds,
                Some(format!("Index {} out of bounds for length {}", index, length)),
            ),
            ArrayAccessError::WrongKind { expected, .. } => VmError::WrongObjectKind {
                reference: array,
                expected,
            }
            .into(),
        }
    }

    fn array_load(&mut self, array: Reference, index: i32) -> Result<Value, Unwind> {
        let array = self.non_null(array)?;
        let loaded = self.array_data(array)?.get(index);
        loaded.map_err(|err| self.array_error(array, err))
    }

    fn array_store(&mut self, array: Reference, index: i32, value: Value) -> Result<(), Unwind> {
        let array = self.non_null(array)?;
        let length = self.array_data(array)?.len();
        if index < 0 || index as usize >= length {
            let err = ArrayAccessError::OutOfBounds {
                index: index as i64,
                length,
            };
            return Err(self.array_error(array, err));
        }
        if let Value::Reference(element) = value {
            if !element.is_null() {
                self.check_array_store(array, element)?;
            }
        }
        let stored = self
            .heap
            .get_mut(array)
            .and_then(|o| o.as_array_mut())
            .ok_or(VmError::DanglingReference(array))?
            .set(index, value);
        stored.map_err(|err| self.array_error(array, err))
    }

    /// `aastore` type check: the element must fit the array's component type
    fn check_array_store(&mut self, array: Reference, element: Reference) -> Result<(), Unwind> {
        let array_class = self.class_of(array)?;
        let element_class = self.class_of(element)?;
        if let Some(ArrayElement::Reference(component)) = self.registry.class(array_class).element {
            if !self.registry.is_assignable(element_class, component) {
                let name = self.external_name(element_class);
                return Err(self.raise(ExceptionKind::ArrayStore, Some(name)));
            }
        }
        Ok(())
    }

    /// Allocate a one-dimensional array of array class `class`
    pub(crate) fn new_array(&mut self, class: ClassId, length: i32) -> Result<Reference, Unwind> {
        if length < 0 {
            return Err(self.raise(ExceptionKind::NegativeArraySize, Some(length.to_string())));
        }
        let data = match self.registry.class(class).element {
            Some(ArrayElement::Primitive(kind)) => ArrayData::primitive(kind, length as usize),
            Some(ArrayElement::Reference(_)) => ArrayData::references(length as usize),
            None => {
                return Err(VmError::WrongObjectKind {
                    reference: Reference::NULL,
                    expected: "an array class",
                }
                .into())
            }
        };
        Ok(self.heap.allocate_array(class, data)?)
    }

    fn new_multi_array(&mut self, class: ClassId, counts: &[i32]) -> Result<Reference, Unwind> {
        let Some((&length, rest)) = counts.split_first() else {
            return Err(VmError::StackUnderflow.into());
        };
        let array = self.new_array(class, length)?;
        if rest.is_empty() {
            return Ok(array);
        }
        let Some(ArrayElement::Reference(component)) = self.registry.class(class).element else {
            return Ok(array);
        };
        for index in 0..length {
            let child = self.new_multi_array(component, rest)?;
            let stored = self
                .heap
                .get_mut(array)
                .and_then(|o| o.as_array_mut())
                .ok_or(VmError::DanglingReference(array))?
                .set(index, Value::Reference(child));
            stored.map_err(|err| self.array_error(array, err))?;
        }
        Ok(array)
    }
}
