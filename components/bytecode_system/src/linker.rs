//! The linker
//!
//! Linking is a one-shot, per-method transformation of the raw instruction
//! stream into [`LinkedCode`]. Symbolic constant pool operands become
//! resolved classes, fields, methods and virtual pointers; relative byte
//! branches become instruction indices. The result is cached on the
//! method, so linking again is a no-op that hands back the same body.

use crate::constant_pool::{Constant, ConstantPool};
use crate::descriptor::ArrayKind;
use crate::instruction::RawInstruction;
use crate::linked::{FieldRef, LinkedCode, LinkedHandler, LinkedInstruction, Operand};
use crate::opcode::Opcode;
use crate::registry::{ClassRegistry, MethodId};
use core_types::{LinkError, LinkErrorKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Name of static initializers
pub const CLINIT: &str = "<clinit>";

/// Link `method`, or return the body linked earlier.
///
/// Every failure carries the declaring class, method name and descriptor.
/// A failure is kept on the method and returned again by later calls.
///
/// # Examples
///
/// ```
/// use bytecode_system::{access, link, ClassDef, ClassRegistry, CodeBuilder, Opcode, Operand};
///
/// let mut b = CodeBuilder::new(1, 0);
/// let end = b.new_label();
/// b.op(Opcode::Iconst1).branch(Opcode::Goto, end);
/// b.bind(end).op(Opcode::Ireturn);
///
/// let mut registry = ClassRegistry::new();
/// registry.define(ClassDef::new("java/lang/Object", None)).unwrap();
/// let mut def = ClassDef::new("app/Main", Some("java/lang/Object"));
/// def.method("one", "()I", access::STATIC, b.finish().unwrap());
/// let class = registry.define(def).unwrap();
/// let method = registry.declared_method(class, "one", "()I").unwrap();
///
/// let linked = link(&mut registry, method).unwrap();
/// assert_eq!(linked.instructions[1].operand, Operand::Branch(2));
/// ```
pub fn link(registry: &mut ClassRegistry, method: MethodId) -> Result<Arc<LinkedCode>, LinkError> {
    let runtime = registry.method(method);
    if let Some(linked) = &runtime.linked {
        return Ok(Arc::clone(linked));
    }
    if let Some(failure) = &runtime.link_failure {
        return Err(failure.clone());
    }
    link_body(registry, method).map_err(|err| {
        registry.method_mut(method).link_failure = Some(err.clone());
        err
    })
}

fn link_body(registry: &mut ClassRegistry, method: MethodId) -> Result<Arc<LinkedCode>, LinkError> {
    let runtime = registry.method(method);
    let class = registry.class(runtime.class);
    let context = (
        class.name.clone(),
        runtime.name.clone(),
        runtime.descriptor.clone(),
    );
    let error = |kind| LinkError::new(&context.0, &context.1, &context.2, kind);

    let code = runtime.code.clone().ok_or_else(|| error(LinkErrorKind::NoCode))?;
    let pool = Arc::clone(&class.constant_pool);
    let in_initializer = runtime.name == CLINIT;
    if in_initializer && (!runtime.is_static() || runtime.descriptor != "()V") {
        return Err(error(LinkErrorKind::InvalidInitializer(format!(
            "{}{} must be static and take no arguments",
            CLINIT, runtime.descriptor
        ))));
    }

    let raw = code.instructions().map_err(error)?;
    let offsets: HashMap<u32, usize> = raw
        .iter()
        .enumerate()
        .map(|(index, instruction)| (instruction.offset, index))
        .collect();

    let mut instructions = Vec::with_capacity(raw.len());
    for instruction in &raw {
        let linked = link_instruction(registry, &pool, instruction, &offsets, in_initializer)
            .map_err(error)?;
        instructions.push(linked);
    }

    let mut handlers = Vec::with_capacity(code.exception_table.len());
    for entry in &code.exception_table {
        let handler = *offsets
            .get(&(entry.handler_pc as u32))
            .ok_or_else(|| {
                error(LinkErrorKind::BadBranchTarget {
                    target: entry.handler_pc as i64,
                })
            })?;
        let catch_type = match entry.catch_type {
            0 => None,
            index => {
                let name = pool.class_name(index).map_err(error)?;
                Some(registry.resolve_class(name).map_err(error)?)
            }
        };
        handlers.push(LinkedHandler {
            start: entry.start_pc as u32,
            end: entry.end_pc as u32,
            handler,
            catch_type,
        });
    }

    let linked = Arc::new(LinkedCode {
        method,
        instructions,
        handlers,
        line_numbers: code.line_numbers.clone(),
        max_stack: code.max_stack as usize,
        max_locals: code.max_locals as usize,
    });
    debug!(
        method = %format!("{}.{}{}", context.0, context.1, context.2),
        instructions = linked.len(),
        "linked method"
    );
    registry.method_mut(method).linked = Some(Arc::clone(&linked));
    Ok(linked)
}

fn implicit_local(opcode: Opcode) -> Option<u16> {
    let byte = opcode.byte();
    match byte {
        0x1a..=0x2d => Some(((byte - 0x1a) % 4) as u16),
        0x3b..=0x4e => Some(((byte - 0x3b) % 4) as u16),
        _ => None,
    }
}

fn loadable_constant(
    registry: &mut ClassRegistry,
    pool: &ConstantPool,
    index: u16,
    wide: bool,
) -> Result<Operand, LinkErrorKind> {
    let bad = || LinkErrorKind::BadConstant {
        index,
        expected: if wide { "long or double" } else { "loadable constant" },
    };
    match (pool.get(index).ok_or_else(bad)?, wide) {
        (Constant::Integer(v), false) => Ok(Operand::Int(*v)),
        (Constant::Float(v), false) => Ok(Operand::Float(*v)),
        (Constant::String(text), false) => Ok(Operand::String(Arc::from(text.as_str()))),
        (Constant::Class(name), false) => Ok(Operand::Class(registry.resolve_class(name)?)),
        (Constant::Long(v), true) => Ok(Operand::Long(*v)),
        (Constant::Double(v), true) => Ok(Operand::Double(*v)),
        _ => Err(bad()),
    }
}

fn link_instruction(
    registry: &mut ClassRegistry,
    pool: &ConstantPool,
    raw: &RawInstruction,
    offsets: &HashMap<u32, usize>,
    in_initializer: bool,
) -> Result<LinkedInstruction, LinkErrorKind> {
    let target = |relative: i32| -> Result<usize, LinkErrorKind> {
        let absolute = raw.branch_target(relative);
        u32::try_from(absolute)
            .ok()
            .and_then(|offset| offsets.get(&offset).copied())
            .ok_or(LinkErrorKind::BadBranchTarget { target: absolute })
    };

    let mut opcode = raw.opcode;
    if let Some(index) = implicit_local(opcode) {
        return Ok(LinkedInstruction {
            opcode,
            operand: Operand::Local(index),
            offset: raw.offset,
        });
    }
    let operand = match opcode {
        Opcode::Bipush => Operand::Int(raw.i8_at(0)? as i32),
        Opcode::Sipush => Operand::Int(raw.i16_at(0)? as i32),
        Opcode::Ldc => loadable_constant(registry, pool, raw.u8_at(0)? as u16, false)?,
        Opcode::LdcW => loadable_constant(registry, pool, raw.u16_at(0)?, false)?,
        Opcode::Ldc2W => loadable_constant(registry, pool, raw.u16_at(0)?, true)?,

        Opcode::Iload
        | Opcode::Lload
        | Opcode::Fload
        | Opcode::Dload
        | Opcode::Aload
        | Opcode::Istore
        | Opcode::Lstore
        | Opcode::Fstore
        | Opcode::Dstore
        | Opcode::Astore => Operand::Local(raw.local_index()?),
        Opcode::Iinc => Operand::Iinc {
            index: raw.local_index()?,
            delta: if raw.wide {
                raw.i16_at(2)? as i32
            } else {
                raw.i8_at(1)? as i32
            },
        },

        Opcode::Jsr | Opcode::JsrW | Opcode::Ret | Opcode::Invokedynamic => Operand::None,
        op if op.is_short_branch() => Operand::Branch(target(raw.i16_at(0)? as i32)?),
        Opcode::GotoW => Operand::Branch(target(raw.i32_at(0)?)?),
        Opcode::Tableswitch => {
            let default = target(raw.i32_at(0)?)?;
            let low = raw.i32_at(4)?;
            let high = raw.i32_at(8)?;
            let count = (high as i64 - low as i64 + 1) as usize;
            let targets = (0..count)
                .map(|i| target(raw.i32_at(12 + 4 * i)?))
                .collect::<Result<Vec<_>, _>>()?;
            Operand::Table {
                low,
                default,
                targets: targets.into_boxed_slice(),
            }
        }
        Opcode::Lookupswitch => {
            let default = target(raw.i32_at(0)?)?;
            let npairs = raw.i32_at(4)?.max(0) as usize;
            let mut pairs = (0..npairs)
                .map(|i| Ok((raw.i32_at(8 + 8 * i)?, target(raw.i32_at(12 + 8 * i)?)?)))
                .collect::<Result<Vec<_>, LinkErrorKind>>()?;
            pairs.sort_by_key(|(key, _)| *key);
            Operand::Lookup {
                default,
                pairs: pairs.into_boxed_slice(),
            }
        }

        Opcode::Getstatic | Opcode::Putstatic | Opcode::Getfield | Opcode::Putfield => {
            let member = pool.field_ref(raw.u16_at(0)?)?;
            let class = registry.resolve_class(&member.class)?;
            let wants_static = matches!(opcode, Opcode::Getstatic | Opcode::Putstatic);
            let field = registry
                .find_field(class, &member.name, &member.descriptor)
                .filter(|field| field.is_static() == wants_static)
                .ok_or_else(|| LinkErrorKind::MissingField {
                    class: member.class.clone(),
                    name: member.name.clone(),
                    descriptor: member.descriptor.clone(),
                })?;
            Operand::Field(FieldRef {
                class: field.declaring,
                slot: field.slot,
                tag: field.tag(),
            })
        }

        Opcode::Invokestatic
        | Opcode::Invokespecial
        | Opcode::Invokevirtual
        | Opcode::Invokeinterface => {
            let (member, _) = pool.method_ref(raw.u16_at(0)?)?;
            let class = registry.resolve_class(&member.class)?;
            let method = registry
                .find_method(class, &member.name, &member.descriptor)
                .ok_or_else(|| LinkErrorKind::MissingMethod {
                    class: member.class.clone(),
                    name: member.name.clone(),
                    descriptor: member.descriptor.clone(),
                })?;
            let overridable = registry.method(method).vptr.is_some();
            let arg_count = registry.method(method).arg_count() as u16;
            let dynamic = matches!(opcode, Opcode::Invokevirtual | Opcode::Invokeinterface);
            if dynamic && overridable {
                Operand::Virtual {
                    vptr: registry.virtual_pointer(&member.name, &member.descriptor),
                    arg_count,
                    resolved: method,
                }
            } else {
                // private methods reached through invokevirtual
                if dynamic {
                    opcode = Opcode::Invokespecial;
                }
                Operand::Method(method)
            }
        }

        Opcode::New | Opcode::Checkcast | Opcode::Instanceof => {
            Operand::Class(registry.resolve_class(pool.class_name(raw.u16_at(0)?)?)?)
        }
        Opcode::Anewarray => {
            let component = registry.resolve_class(pool.class_name(raw.u16_at(0)?)?)?;
            Operand::Class(registry.array_of(component)?)
        }
        Opcode::Newarray => {
            let atype = raw.u8_at(0)?;
            let kind = ArrayKind::from_atype(atype).ok_or_else(|| LinkErrorKind::MalformedCode {
                offset: raw.offset,
                reason: format!("invalid newarray type {}", atype),
            })?;
            Operand::Class(registry.primitive_array(kind)?)
        }
        Opcode::Multianewarray => {
            let name = pool.class_name(raw.u16_at(0)?)?;
            let dimensions = raw.u8_at(2)?;
            let rank = name.bytes().take_while(|&b| b == b'[').count();
            if dimensions == 0 || dimensions as usize > rank {
                return Err(LinkErrorKind::MalformedCode {
                    offset: raw.offset,
                    reason: format!("{} dimensions requested for {}", dimensions, name),
                });
            }
            Operand::MultiArray {
                class: registry.resolve_class(name)?,
                dimensions,
            }
        }

        Opcode::Return if in_initializer => {
            opcode = Opcode::ReturnInPlace;
            Operand::None
        }
        Opcode::Ireturn | Opcode::Lreturn | Opcode::Freturn | Opcode::Dreturn | Opcode::Areturn
            if in_initializer =>
        {
            return Err(LinkErrorKind::InvalidInitializer(format!(
                "{} in static initializer",
                opcode.mnemonic()
            )))
        }
        _ => Operand::None,
    };

    Ok(LinkedInstruction {
        opcode,
        operand,
        offset: raw.offset,
    })
}
