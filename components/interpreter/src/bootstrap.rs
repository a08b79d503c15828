//! Bootstrap class library
//!
//! The smallest `java.lang` a CLDC program can run against, plus
//! `java.util.Vector`. Simple members are real bytecode assembled here;
//! everything that needs the VM's internals is native and bound in
//! [`crate::lang`].

use bytecode_system::{
    access, ClassDef, ClassId, ClassRegistry, Code, CodeBuilder, MethodDef, Opcode, VirtualPointer,
    OBJECT_CLASS,
};
use core_types::{ExceptionKind, LinkError, LinkErrorKind, VmError};

/// `java/lang/String`
pub const STRING_CLASS: &str = "java/lang/String";
/// `java/lang/Class`
pub const CLASS_CLASS: &str = "java/lang/Class";
/// `java/lang/Throwable`
pub const THROWABLE_CLASS: &str = "java/lang/Throwable";
/// `java/lang/Thread`
pub const THREAD_CLASS: &str = "java/lang/Thread";
/// `java/lang/Runnable`
pub const RUNNABLE_CLASS: &str = "java/lang/Runnable";
/// `java/lang/System`
pub const SYSTEM_CLASS: &str = "java/lang/System";
/// `java/util/Vector`
pub const VECTOR_CLASS: &str = "java/util/Vector";

/// Throwables besides the [`ExceptionKind`] classes, each after its
/// superclass
const THROWABLE_HIERARCHY: &[(&str, &str)] = &[
    ("java/lang/Exception", THROWABLE_CLASS),
    ("java/lang/Error", THROWABLE_CLASS),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/IllegalThreadStateException", "java/lang/IllegalArgumentException"),
    ("java/lang/StringIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/LinkageError", "java/lang/Error"),
    ("java/lang/IncompatibleClassChangeError", "java/lang/LinkageError"),
];

fn kind_superclass(kind: ExceptionKind) -> &'static str {
    match kind {
        ExceptionKind::ArrayIndexOutOfBounds => "java/lang/IndexOutOfBoundsException",
        ExceptionKind::StackOverflow => "java/lang/VirtualMachineError",
        ExceptionKind::NoClassDefFound => "java/lang/LinkageError",
        ExceptionKind::AbstractMethod | ExceptionKind::Instantiation => {
            "java/lang/IncompatibleClassChangeError"
        }
        ExceptionKind::Interrupted => "java/lang/Exception",
        _ => "java/lang/RuntimeException",
    }
}

/// Classes and slots the VM reaches into directly
#[derive(Debug, Clone, Copy)]
pub(crate) struct WellKnown {
    pub object: ClassId,
    pub string: ClassId,
    pub class: ClassId,
    pub thread: ClassId,
    /// `Throwable.detailMessage`
    pub detail_message: u16,
    /// `Class.classId`
    pub class_id: u16,
    /// `Thread.threadId`, 0 while not running
    pub thread_id: u16,
    /// `run()V`
    pub run: VirtualPointer,
}

fn assemble(class: &str, method: &str, descriptor: &str, body: CodeBuilder) -> Result<Code, VmError> {
    body.finish().map_err(|err| {
        LinkError::new(
            class,
            method,
            descriptor,
            LinkErrorKind::MalformedCode {
                offset: 0,
                reason: err.to_string(),
            },
        )
        .into()
    })
}

/// Constructor that only chains to the superclass constructor
fn chained_init(def: &mut ClassDef, super_name: &str, descriptor: &str) -> Result<(), VmError> {
    let takes_message = descriptor != "()V";
    let target = def.constant_pool.method(super_name, "<init>", descriptor);
    let mut b = CodeBuilder::new(2, 2);
    b.aload(0);
    if takes_message {
        b.aload(1);
    }
    b.op_u16(Opcode::Invokespecial, target).op(Opcode::Return);
    let code = assemble(&def.name, "<init>", descriptor, b)?;
    def.method("<init>", descriptor, access::PUBLIC, code);
    Ok(())
}

fn object_class() -> Result<ClassDef, VmError> {
    let mut def = ClassDef::new(OBJECT_CLASS, None);

    let mut init = CodeBuilder::new(0, 1);
    init.op(Opcode::Return);
    let code = assemble(OBJECT_CLASS, "<init>", "()V", init)?;
    def.method("<init>", "()V", access::PUBLIC, code);

    let mut equals = CodeBuilder::new(2, 2);
    let different = equals.new_label();
    equals
        .aload(0)
        .aload(1)
        .branch(Opcode::IfAcmpne, different)
        .op(Opcode::Iconst1)
        .op(Opcode::Ireturn);
    equals.bind(different).op(Opcode::Iconst0).op(Opcode::Ireturn);
    let code = assemble(OBJECT_CLASS, "equals", "(Ljava/lang/Object;)Z", equals)?;
    def.method("equals", "(Ljava/lang/Object;)Z", access::PUBLIC, code);

    let final_native = access::PUBLIC | access::FINAL;
    Ok(def
        .with_method(MethodDef::native("hashCode", "()I", access::PUBLIC))
        .with_method(MethodDef::native("toString", "()Ljava/lang/String;", access::PUBLIC))
        .with_method(MethodDef::native("getClass", "()Ljava/lang/Class;", final_native))
        .with_method(MethodDef::native("wait", "()V", final_native))
        .with_method(MethodDef::native("wait", "(J)V", final_native))
        .with_method(MethodDef::native("notify", "()V", final_native))
        .with_method(MethodDef::native("notifyAll", "()V", final_native)))
}

fn string_class() -> ClassDef {
    let mut def = ClassDef::new(STRING_CLASS, Some(OBJECT_CLASS));
    def.access_flags |= access::FINAL;
    def.with_method(MethodDef::native("length", "()I", access::PUBLIC))
        .with_method(MethodDef::native("charAt", "(I)C", access::PUBLIC))
        .with_method(MethodDef::native("equals", "(Ljava/lang/Object;)Z", access::PUBLIC))
        .with_method(MethodDef::native("hashCode", "()I", access::PUBLIC))
        .with_method(MethodDef::native("toString", "()Ljava/lang/String;", access::PUBLIC))
        .with_method(MethodDef::native("intern", "()Ljava/lang/String;", access::PUBLIC))
        .with_method(MethodDef::native(
            "concat",
            "(Ljava/lang/String;)Ljava/lang/String;",
            access::PUBLIC,
        ))
        .with_method(MethodDef::native(
            "valueOf",
            "(I)Ljava/lang/String;",
            access::PUBLIC | access::STATIC,
        ))
}

fn class_class() -> ClassDef {
    let mut def = ClassDef::new(CLASS_CLASS, Some(OBJECT_CLASS));
    def.access_flags |= access::FINAL;
    def.field("classId", "I", access::PRIVATE);
    def.with_method(MethodDef::native("getName", "()Ljava/lang/String;", access::PUBLIC))
        .with_method(MethodDef::native("isArray", "()Z", access::PUBLIC))
}

fn throwable_class() -> Result<ClassDef, VmError> {
    let mut def = ClassDef::new(THROWABLE_CLASS, Some(OBJECT_CLASS));
    def.field("detailMessage", "Ljava/lang/String;", access::PRIVATE);
    let message = def
        .constant_pool
        .field(THROWABLE_CLASS, "detailMessage", "Ljava/lang/String;");
    let object_init = def.constant_pool.method(OBJECT_CLASS, "<init>", "()V");

    chained_init(&mut def, OBJECT_CLASS, "()V")?;

    let mut init = CodeBuilder::new(2, 2);
    init.aload(0)
        .op_u16(Opcode::Invokespecial, object_init)
        .aload(0)
        .aload(1)
        .op_u16(Opcode::Putfield, message)
        .op(Opcode::Return);
    let code = assemble(THROWABLE_CLASS, "<init>", "(Ljava/lang/String;)V", init)?;
    def.method("<init>", "(Ljava/lang/String;)V", access::PUBLIC, code);

    let mut get = CodeBuilder::new(1, 1);
    get.aload(0).op_u16(Opcode::Getfield, message).op(Opcode::Areturn);
    let code = assemble(THROWABLE_CLASS, "getMessage", "()Ljava/lang/String;", get)?;
    def.method("getMessage", "()Ljava/lang/String;", access::PUBLIC, code);

    Ok(def.with_method(MethodDef::native("toString", "()Ljava/lang/String;", access::PUBLIC)))
}

fn exception_class(name: &str, super_name: &str) -> Result<ClassDef, VmError> {
    let mut def = ClassDef::new(name, Some(super_name));
    chained_init(&mut def, super_name, "()V")?;
    chained_init(&mut def, super_name, "(Ljava/lang/String;)V")?;
    Ok(def)
}

fn thread_class() -> Result<ClassDef, VmError> {
    let mut def = ClassDef::new(THREAD_CLASS, Some(OBJECT_CLASS)).implements(RUNNABLE_CLASS);
    def.field("target", "Ljava/lang/Runnable;", access::PRIVATE)
        .field("threadId", "I", access::PRIVATE);
    let target = def
        .constant_pool
        .field(THREAD_CLASS, "target", "Ljava/lang/Runnable;");
    let object_init = def.constant_pool.method(OBJECT_CLASS, "<init>", "()V");
    let run = def.constant_pool.interface_method(RUNNABLE_CLASS, "run", "()V");

    chained_init(&mut def, OBJECT_CLASS, "()V")?;

    let mut init = CodeBuilder::new(2, 2);
    init.aload(0)
        .op_u16(Opcode::Invokespecial, object_init)
        .aload(0)
        .aload(1)
        .op_u16(Opcode::Putfield, target)
        .op(Opcode::Return);
    let code = assemble(THREAD_CLASS, "<init>", "(Ljava/lang/Runnable;)V", init)?;
    def.method("<init>", "(Ljava/lang/Runnable;)V", access::PUBLIC, code);

    // run() { if (target != null) target.run(); }
    let mut body = CodeBuilder::new(2, 1);
    let none = body.new_label();
    body.aload(0)
        .op_u16(Opcode::Getfield, target)
        .op(Opcode::Dup)
        .branch(Opcode::Ifnull, none)
        .invokeinterface(run, 1)
        .op(Opcode::Return);
    body.bind(none).op(Opcode::Pop).op(Opcode::Return);
    let code = assemble(THREAD_CLASS, "run", "()V", body)?;
    def.method("run", "()V", access::PUBLIC, code);

    let static_native = access::PUBLIC | access::STATIC;
    Ok(def
        .with_method(MethodDef::native("start", "()V", access::PUBLIC))
        .with_method(MethodDef::native("isAlive", "()Z", access::PUBLIC | access::FINAL))
        .with_method(MethodDef::native("interrupt", "()V", access::PUBLIC))
        .with_method(MethodDef::native("currentThread", "()Ljava/lang/Thread;", static_native))
        .with_method(MethodDef::native("sleep", "(J)V", static_native))
        .with_method(MethodDef::native("yield", "()V", static_native)))
}

fn system_class() -> ClassDef {
    let static_native = access::PUBLIC | access::STATIC;
    let mut def = ClassDef::new(SYSTEM_CLASS, Some(OBJECT_CLASS));
    def.access_flags |= access::FINAL;
    def.with_method(MethodDef::native("currentTimeMillis", "()J", static_native))
        .with_method(MethodDef::native(
            "arraycopy",
            "(Ljava/lang/Object;ILjava/lang/Object;II)V",
            static_native,
        ))
        .with_method(MethodDef::native(
            "identityHashCode",
            "(Ljava/lang/Object;)I",
            static_native,
        ))
        .with_method(MethodDef::native("gc", "()V", static_native))
}

fn vector_class() -> ClassDef {
    ClassDef::new(VECTOR_CLASS, Some(OBJECT_CLASS))
        .with_method(MethodDef::native("<init>", "()V", access::PUBLIC))
        .with_method(MethodDef::native("addElement", "(Ljava/lang/Object;)V", access::PUBLIC))
        .with_method(MethodDef::native("elementAt", "(I)Ljava/lang/Object;", access::PUBLIC))
        .with_method(MethodDef::native("removeElementAt", "(I)V", access::PUBLIC))
        .with_method(MethodDef::native("size", "()I", access::PUBLIC))
        .with_method(MethodDef::native("isEmpty", "()Z", access::PUBLIC))
        .with_method(MethodDef::native("removeAllElements", "()V", access::PUBLIC))
}

/// Register the bootstrap classes
pub(crate) fn define_classes(registry: &mut ClassRegistry) -> Result<WellKnown, VmError> {
    let object = registry.define(object_class()?)?;
    let string = registry.define(string_class())?;
    let class = registry.define(class_class())?;
    registry.define(ClassDef::interface(RUNNABLE_CLASS).with_method(MethodDef::abstract_method("run", "()V")))?;
    let thread = registry.define(thread_class()?)?;
    let throwable = registry.define(throwable_class()?)?;
    for &(name, super_name) in THROWABLE_HIERARCHY {
        registry.define(exception_class(name, super_name)?)?;
    }
    for kind in ExceptionKind::ALL {
        registry.define(exception_class(kind.class_name(), kind_superclass(kind))?)?;
    }
    registry.define(system_class())?;
    registry.define(vector_class())?;
    let run = registry.virtual_pointer("run", "()V");

    let slot = |class: ClassId, name: &str| {
        registry.class(class).field_slot(name).ok_or_else(|| {
            LinkError::new(
                registry.class(class).name.clone(),
                "<class>",
                "",
                LinkErrorKind::MissingField {
                    class: registry.class(class).name.clone(),
                    name: name.to_string(),
                    descriptor: String::new(),
                },
            )
        })
    };
    let known = WellKnown {
        object,
        string,
        class,
        thread,
        detail_message: slot(throwable, "detailMessage")?,
        class_id: slot(class, "classId")?,
        thread_id: slot(thread, "threadId")?,
        run,
    };
    Ok(known)
}
