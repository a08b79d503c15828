//! Runtime class registry
//!
//! Registering a [`ClassDef`] produces a [`RuntimeClass`] with its field
//! layout, static storage and methods, and rebuilds every dispatch table.
//! Superclasses and interfaces must be registered before their subtypes.
//! Array classes are materialized on demand by the linker.

use crate::class_def::{access, ClassDef, Code};
use crate::constant_pool::ConstantPool;
use crate::descriptor::{ArrayKind, FieldType, MethodDescriptor};
use crate::linked::LinkedCode;
use crate::vtable::{DispatchTable, VirtualPointer, VirtualPointers};
use core_types::{LinkError, LinkErrorKind, Reference, Value, ValueTag};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Root of the class hierarchy
pub const OBJECT_CLASS: &str = "java/lang/Object";

/// Index of a registered class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Index of a registered method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

impl MethodId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Static initialization progress of a class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// `<clinit>` has not started
    Uninitialized,
    /// `<clinit>` is running on the given thread
    InProgress(u16),
    /// Ready for use
    Initialized,
    /// `<clinit>` completed abruptly
    Failed,
}

/// Element type of an array class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayElement {
    /// Primitive elements
    Primitive(ArrayKind),
    /// Reference elements of the given class
    Reference(ClassId),
}

/// A field slot in an instance layout or a class's static storage
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
    /// Parsed descriptor
    pub field_type: FieldType,
    /// Access flags
    pub access_flags: u16,
    /// Class declaring the field
    pub declaring: ClassId,
    /// Index into the object's field vector or the class's statics
    pub slot: u16,
}

impl FieldInfo {
    /// Check if the field is static
    pub fn is_static(&self) -> bool {
        self.access_flags & access::STATIC != 0
    }

    /// Kind of the stored value
    pub fn tag(&self) -> ValueTag {
        self.field_type.tag()
    }
}

/// A registered class
#[derive(Debug, Clone)]
pub struct RuntimeClass {
    /// Registry index
    pub id: ClassId,
    /// Internal name, or the descriptor for array classes
    pub name: String,
    /// Superclass, `None` for the root class
    pub super_class: Option<ClassId>,
    /// Directly implemented interfaces
    pub interfaces: Vec<ClassId>,
    /// Access flags
    pub access_flags: u16,
    /// Constant pool shared with the linker
    pub constant_pool: Arc<ConstantPool>,
    /// Instance layout, inherited fields first
    pub instance_fields: Vec<FieldInfo>,
    /// Declared static fields
    pub static_fields: Vec<FieldInfo>,
    /// Static field storage, indexed by [`FieldInfo::slot`]
    pub statics: Vec<Value>,
    /// Declared methods
    pub methods: Vec<MethodId>,
    /// Virtual dispatch table
    pub dispatch: DispatchTable,
    /// Static initialization progress
    pub init: InitState,
    /// The static initializer, if declared
    pub clinit: Option<MethodId>,
    /// Element type, for array classes
    pub element: Option<ArrayElement>,
    /// `java/lang/Class` object for this class, null until first needed
    pub mirror: Reference,
}

impl RuntimeClass {
    /// Check if this is an interface
    pub fn is_interface(&self) -> bool {
        self.access_flags & access::INTERFACE != 0
    }

    /// Check if this is an array class
    pub fn is_array(&self) -> bool {
        self.element.is_some()
    }

    /// Check if this class can be instantiated with `new`
    pub fn is_abstract(&self) -> bool {
        self.access_flags & (access::ABSTRACT | access::INTERFACE) != 0
    }

    /// Zero values for a fresh instance
    pub fn zeroed_fields(&self) -> Vec<Value> {
        self.instance_fields
            .iter()
            .map(|f| Value::zero(f.tag()))
            .collect()
    }

    /// Instance field declared by this exact class
    pub fn declared_field(&self, name: &str, descriptor: &str) -> Option<&FieldInfo> {
        self.static_fields
            .iter()
            .chain(self.instance_fields.iter().filter(|f| f.declaring == self.id))
            .find(|f| f.name == name && f.descriptor == descriptor)
    }

    /// Instance field slot by name, searching the whole layout
    pub fn field_slot(&self, name: &str) -> Option<u16> {
        self.instance_fields
            .iter()
            .rev()
            .find(|f| f.name == name)
            .map(|f| f.slot)
    }
}

/// A registered method
#[derive(Debug, Clone)]
pub struct RuntimeMethod {
    /// Registry index
    pub id: MethodId,
    /// Declaring class
    pub class: ClassId,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Parsed descriptor
    pub signature: MethodDescriptor,
    /// Access flags
    pub access_flags: u16,
    /// Unlinked body
    pub code: Option<Arc<Code>>,
    /// Linked body, filled once by the linker
    pub linked: Option<Arc<LinkedCode>>,
    /// First link failure; the method is never linked again
    pub link_failure: Option<LinkError>,
    /// Dispatch signature, for overridable instance methods
    pub vptr: Option<VirtualPointer>,
}

impl RuntimeMethod {
    /// Check if the method is static
    pub fn is_static(&self) -> bool {
        self.access_flags & access::STATIC != 0
    }

    /// Check if the method is host-implemented
    pub fn is_native(&self) -> bool {
        self.access_flags & access::NATIVE != 0
    }

    /// Check if the method has no implementation
    pub fn is_abstract(&self) -> bool {
        self.access_flags & access::ABSTRACT != 0
    }

    /// Check if invoking the method enters a monitor
    pub fn is_synchronized(&self) -> bool {
        self.access_flags & access::SYNCHRONIZED != 0
    }

    /// Operand stack values consumed by a call, receiver included
    pub fn arg_count(&self) -> usize {
        self.signature.params.len() + usize::from(!self.is_static())
    }
}

/// Every loaded class and method, plus the virtual pointer numbering
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<RuntimeClass>,
    methods: Vec<RuntimeMethod>,
    by_name: HashMap<String, ClassId>,
    vptrs: VirtualPointers,
}

fn class_error(class: &str, kind: LinkErrorKind) -> LinkError {
    LinkError::new(class, "<class>", "", kind)
}

impl ClassRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered classes, arrays included
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Register a class and rebuild dispatch tables
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_system::{ClassDef, ClassRegistry};
    ///
    /// let mut registry = ClassRegistry::new();
    /// let object = registry.define(ClassDef::new("java/lang/Object", None)).unwrap();
    /// let point = registry
    ///     .define(ClassDef::new("app/Point", Some("java/lang/Object")))
    ///     .unwrap();
    ///
    /// assert!(registry.is_assignable(point, object));
    /// assert!(registry.define(ClassDef::new("app/Point", None)).is_err());
    /// ```
    pub fn define(&mut self, def: ClassDef) -> Result<ClassId, LinkError> {
        if self.by_name.contains_key(&def.name) {
            return Err(class_error(
                &def.name,
                LinkErrorKind::DuplicateClass(def.name.clone()),
            ));
        }
        let id = ClassId(self.classes.len() as u32);

        let super_class = match &def.super_name {
            Some(name) => Some(self.lookup(name).ok_or_else(|| {
                class_error(&def.name, LinkErrorKind::MissingClass(name.clone()))
            })?),
            None => None,
        };
        let interfaces = def
            .interfaces
            .iter()
            .map(|name| {
                self.lookup(name).ok_or_else(|| {
                    class_error(&def.name, LinkErrorKind::MissingClass(name.clone()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut instance_fields = super_class
            .map(|s| self.class(s).instance_fields.clone())
            .unwrap_or_default();
        let mut static_fields = Vec::new();
        let mut statics = Vec::new();
        for field in &def.fields {
            let field_type = FieldType::parse(&field.descriptor)
                .map_err(|kind| LinkError::new(&def.name, &field.name, &field.descriptor, kind))?;
            let (list_len, is_static) = if field.is_static() {
                (static_fields.len(), true)
            } else {
                (instance_fields.len(), false)
            };
            let info = FieldInfo {
                name: field.name.clone(),
                descriptor: field.descriptor.clone(),
                access_flags: field.access_flags,
                declaring: id,
                slot: list_len as u16,
                field_type,
            };
            if is_static {
                statics.push(
                    field
                        .constant_value
                        .filter(|v| v.tag() == info.tag())
                        .unwrap_or_else(|| Value::zero(info.tag())),
                );
                static_fields.push(info);
            } else {
                instance_fields.push(info);
            }
        }

        let mut methods = Vec::with_capacity(def.methods.len());
        let mut clinit = None;
        for method in def.methods {
            let signature = MethodDescriptor::parse(&method.descriptor).map_err(|kind| {
                LinkError::new(&def.name, &method.name, &method.descriptor, kind)
            })?;
            let method_id = MethodId(self.methods.len() as u32);
            let overridable = method.access_flags & (access::STATIC | access::PRIVATE) == 0
                && !method.name.starts_with('<');
            let vptr = overridable.then(|| self.vptrs.intern(&method.name, &method.descriptor));
            if method.name == "<clinit>" {
                clinit = Some(method_id);
            }
            self.methods.push(RuntimeMethod {
                id: method_id,
                class: id,
                name: method.name,
                descriptor: method.descriptor,
                signature,
                access_flags: method.access_flags,
                code: method.code.map(Arc::new),
                linked: None,
                link_failure: None,
                vptr,
            });
            methods.push(method_id);
        }

        let init = if clinit.is_some() {
            InitState::Uninitialized
        } else {
            InitState::Initialized
        };
        debug!(class = %def.name, methods = methods.len(), "defined class");
        self.by_name.insert(def.name.clone(), id);
        self.classes.push(RuntimeClass {
            id,
            name: def.name,
            super_class,
            interfaces,
            access_flags: def.access_flags,
            constant_pool: Arc::new(def.constant_pool),
            instance_fields,
            static_fields,
            statics,
            methods,
            dispatch: DispatchTable::new(),
            init,
            clinit,
            element: None,
            mirror: Reference::NULL,
        });
        self.rebuild_dispatch_tables();
        Ok(id)
    }

    /// Recompute every class's dispatch table from its superclass chain,
    /// most-derived definition winning
    pub fn rebuild_dispatch_tables(&mut self) {
        let mut tables: Vec<DispatchTable> = Vec::with_capacity(self.classes.len());
        for class in &self.classes {
            let mut table = class
                .super_class
                .map(|s| tables[s.index()].clone())
                .unwrap_or_default();
            for &method_id in &class.methods {
                let method = &self.methods[method_id.index()];
                if let (Some(vp), false) = (method.vptr, method.is_abstract()) {
                    table.insert(vp, method_id);
                }
            }
            tables.push(table);
        }
        for (class, table) in self.classes.iter_mut().zip(tables) {
            class.dispatch = table;
        }
    }

    /// Class id by internal name
    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    /// Class by id
    pub fn class(&self, id: ClassId) -> &RuntimeClass {
        &self.classes[id.index()]
    }

    /// Mutable class by id
    pub fn class_mut(&mut self, id: ClassId) -> &mut RuntimeClass {
        &mut self.classes[id.index()]
    }

    /// Method by id
    pub fn method(&self, id: MethodId) -> &RuntimeMethod {
        &self.methods[id.index()]
    }

    /// Mutable method by id
    pub fn method_mut(&mut self, id: MethodId) -> &mut RuntimeMethod {
        &mut self.methods[id.index()]
    }

    /// All classes in registration order
    pub fn classes(&self) -> impl Iterator<Item = &RuntimeClass> {
        self.classes.iter()
    }

    /// `Class.method(descriptor)` display name
    pub fn qualified_name(&self, method: MethodId) -> String {
        let m = self.method(method);
        format!("{}.{}{}", self.class(m.class).name, m.name, m.descriptor)
    }

    /// The virtual pointer numbering
    pub fn virtual_pointers(&self) -> &VirtualPointers {
        &self.vptrs
    }

    /// Virtual pointer for a signature, assigned on first request
    pub fn virtual_pointer(&mut self, name: &str, descriptor: &str) -> VirtualPointer {
        self.vptrs.intern(name, descriptor)
    }

    /// Concrete method bound to `vp` in `class`
    pub fn dispatch(&self, class: ClassId, vp: VirtualPointer) -> Option<MethodId> {
        self.class(class).dispatch.get(vp)
    }

    /// Method declared by exactly `class`
    pub fn declared_method(&self, class: ClassId, name: &str, descriptor: &str) -> Option<MethodId> {
        self.class(class).methods.iter().copied().find(|&m| {
            let method = self.method(m);
            method.name == name && method.descriptor == descriptor
        })
    }

    /// Resolve a method: the class, its superclasses, then superinterfaces
    pub fn find_method(&self, class: ClassId, name: &str, descriptor: &str) -> Option<MethodId> {
        let mut current = Some(class);
        while let Some(id) = current {
            if let Some(found) = self.declared_method(id, name, descriptor) {
                return Some(found);
            }
            current = self.class(id).super_class;
        }
        self.superinterfaces(class)
            .into_iter()
            .find_map(|iface| self.declared_method(iface, name, descriptor))
    }

    /// Resolve a field: the class, its superinterfaces, then its superclass
    pub fn find_field(&self, class: ClassId, name: &str, descriptor: &str) -> Option<&FieldInfo> {
        let runtime = self.class(class);
        if let Some(field) = runtime.declared_field(name, descriptor) {
            return Some(field);
        }
        for &iface in &runtime.interfaces {
            if let Some(field) = self.find_field(iface, name, descriptor) {
                return Some(field);
            }
        }
        runtime
            .super_class
            .and_then(|s| self.find_field(s, name, descriptor))
    }

    /// Every interface `class` implements, directly or through supertypes
    pub fn superinterfaces(&self, class: ClassId) -> Vec<ClassId> {
        let mut seen = Vec::new();
        let mut queue: VecDeque<ClassId> = VecDeque::new();
        let mut current = Some(class);
        while let Some(id) = current {
            queue.extend(self.class(id).interfaces.iter().copied());
            current = self.class(id).super_class;
        }
        while let Some(iface) = queue.pop_front() {
            if !seen.contains(&iface) {
                seen.push(iface);
                queue.extend(self.class(iface).interfaces.iter().copied());
            }
        }
        seen
    }

    /// Check if `from` is `to` or one of its subclasses
    pub fn is_subclass(&self, from: ClassId, to: ClassId) -> bool {
        let mut current = Some(from);
        while let Some(id) = current {
            if id == to {
                return true;
            }
            current = self.class(id).super_class;
        }
        false
    }

    /// Check if a value of class `from` can be stored where `to` is expected
    pub fn is_assignable(&self, from: ClassId, to: ClassId) -> bool {
        if from == to {
            return true;
        }
        let target = self.class(to);
        match (self.class(from).element, target.element) {
            (Some(ArrayElement::Primitive(a)), Some(ArrayElement::Primitive(b))) => a == b,
            (Some(ArrayElement::Reference(a)), Some(ArrayElement::Reference(b))) => {
                self.is_assignable(a, b)
            }
            (Some(_), Some(_)) => false,
            _ if target.is_interface() => self.superinterfaces(from).contains(&to),
            _ => self.is_subclass(from, to),
        }
    }

    /// Resolve a class constant name, materializing array classes
    pub fn resolve_class(&mut self, name: &str) -> Result<ClassId, LinkErrorKind> {
        if name.starts_with('[') {
            let ty = FieldType::parse(name)?;
            self.array_class(&ty)
        } else {
            self.lookup(name)
                .ok_or_else(|| LinkErrorKind::MissingClass(name.to_string()))
        }
    }

    /// Class of an array type, created on first request
    pub fn array_class(&mut self, ty: &FieldType) -> Result<ClassId, LinkErrorKind> {
        let name = ty.class_name();
        if let Some(id) = self.lookup(&name) {
            return Ok(id);
        }
        let element = match ty {
            FieldType::Array(component) => match component.as_ref() {
                FieldType::Primitive(kind) => ArrayElement::Primitive(*kind),
                FieldType::Object(class) => ArrayElement::Reference(self.resolve_class(class)?),
                nested @ FieldType::Array(_) => ArrayElement::Reference(self.array_class(nested)?),
            },
            _ => return Err(LinkErrorKind::MalformedDescriptor(name)),
        };
        let object = self
            .lookup(OBJECT_CLASS)
            .ok_or_else(|| LinkErrorKind::MissingClass(OBJECT_CLASS.to_string()))?;
        let id = ClassId(self.classes.len() as u32);
        debug!(class = %name, "materialized array class");
        self.by_name.insert(name.clone(), id);
        let dispatch = self.class(object).dispatch.clone();
        self.classes.push(RuntimeClass {
            id,
            name,
            super_class: Some(object),
            interfaces: Vec::new(),
            access_flags: access::PUBLIC | access::FINAL,
            constant_pool: Arc::new(ConstantPool::new()),
            instance_fields: Vec::new(),
            static_fields: Vec::new(),
            statics: Vec::new(),
            methods: Vec::new(),
            dispatch,
            init: InitState::Initialized,
            clinit: None,
            element: Some(element),
            mirror: Reference::NULL,
        });
        Ok(id)
    }

    /// Array class whose elements are instances of `component`
    pub fn array_of(&mut self, component: ClassId) -> Result<ClassId, LinkErrorKind> {
        let component_type = FieldType::from_class_name(&self.class(component).name)?;
        self.array_class(&FieldType::Array(Box::new(component_type)))
    }

    /// Array class of a primitive element kind
    pub fn primitive_array(&mut self, kind: ArrayKind) -> Result<ClassId, LinkErrorKind> {
        self.array_class(&FieldType::Array(Box::new(FieldType::Primitive(kind))))
    }

    /// Non-null references held by static fields and class mirrors
    pub fn static_references(&self) -> impl Iterator<Item = Reference> + '_ {
        self.classes.iter().flat_map(|class| {
            class
                .statics
                .iter()
                .filter_map(Value::as_reference)
                .chain(std::iter::once(class.mirror))
                .filter(|r| !r.is_null())
        })
    }
}
