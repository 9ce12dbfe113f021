//! Runtime class records: the linked form of a decoded class file.

use std::collections::HashMap;
use std::rc::Rc;

use jclass::access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use jclass::attributes::Code;
use jclass::class_file::ClassFile;
use jclass::descriptors::{BaseType, FieldType, MethodDescriptor, TypeKind};

use crate::runtime_pool::RuntimeConstantPool;
use crate::value::ObjRef;

/// Index of a class in the bootstrap loader's arena. Classes are never
/// freed, so an id stays valid for the lifetime of the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub(crate) u32);

/// Linkage progress of a class, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkageStatus {
    Allocated,
    Prepared,
    UnderInitialization,
    Initialized,
}

/// A field record after preparation. For instance fields `offset` is a byte
/// offset into the object payload; for static fields it is a byte offset
/// into the defining class's static block.
#[derive(Debug, Clone)]
pub struct JField {
    pub name: String,
    pub descriptor: String,
    pub ty: FieldType,
    pub access_flags: u16,
    pub offset: usize,
    /// Constant pool index of the `ConstantValue`, for static finals.
    pub constant_value: Option<u16>,
}

impl JField {
    pub fn is_static(&self) -> bool {
        FieldAccessFlags::is_set(self.access_flags, FieldAccessFlags::AccStatic)
    }

    /// Bytes one value of this field's type occupies in a payload.
    pub fn width(&self) -> usize {
        field_width(&self.ty)
    }
}

/// Bytes one value of the given type occupies in an object payload or a
/// static block. References are stored as full 8-byte slots.
pub fn field_width(ty: &FieldType) -> usize {
    if ty.is_reference_or_array() {
        return 8;
    }
    match ty.kind {
        TypeKind::Primitive(BaseType::Byte | BaseType::Boolean) => 1,
        TypeKind::Primitive(BaseType::Char | BaseType::Short) => 2,
        TypeKind::Primitive(BaseType::Int | BaseType::Float) => 4,
        TypeKind::Primitive(BaseType::Long | BaseType::Double) => 8,
        TypeKind::Object(_) => 8,
    }
}

/// A method record after preparation.
#[derive(Debug, Clone)]
pub struct JMethod {
    pub name: String,
    pub descriptor: String,
    pub parsed: MethodDescriptor,
    pub access_flags: u16,
    /// Shared so a frame can keep the bytecode alive without borrowing the
    /// class arena across a call.
    pub code: Option<Rc<Code>>,
}

impl JMethod {
    pub fn is_static(&self) -> bool {
        MethodAccessFlags::is_set(self.access_flags, MethodAccessFlags::AccStatic)
    }

    pub fn is_native(&self) -> bool {
        MethodAccessFlags::is_set(self.access_flags, MethodAccessFlags::AccNative)
    }

    pub fn is_abstract(&self) -> bool {
        MethodAccessFlags::is_set(self.access_flags, MethodAccessFlags::AccAbstract)
    }
}

/// What kind of class a [`JClass`] record describes.
#[derive(Debug, Clone)]
pub enum ClassKind {
    /// An ordinary class or interface with a decoded class file behind it.
    Instance,
    /// An array class. `component` is the type of one element; for
    /// reference or nested-array components `component_class` names the
    /// loaded class of that element type.
    Array {
        component: FieldType,
        component_class: Option<ClassId>,
        dimensions: u8,
    },
}

/// A loaded class. Owned by the bootstrap loader's arena; all
/// cross-references between classes are [`ClassId`]s into that arena.
#[derive(Debug)]
pub struct JClass {
    pub name: String,
    pub kind: ClassKind,
    /// Present for instance classes, absent for arrays.
    pub class_file: Option<ClassFile>,
    pub access_flags: u16,
    pub status: LinkageStatus,
    pub super_class: Option<ClassId>,
    pub interfaces: Vec<ClassId>,
    /// Instance fields (inherited ones first, offsets preserved) and the
    /// statics this class itself declares.
    pub fields: Vec<JField>,
    field_index: HashMap<(String, String), usize>,
    pub methods: Vec<JMethod>,
    method_index: HashMap<(String, String), usize>,
    /// Total payload size of one instance, in bytes.
    pub instance_size: usize,
    /// Zero-initialised storage for the statics declared here.
    pub static_block: Vec<u8>,
    pub runtime_pool: RuntimeConstantPool,
    /// The `java/lang/Class` mirror, created on first request.
    pub mirror: Option<ObjRef>,
}

impl JClass {
    pub fn new_instance(class_file: ClassFile) -> JClass {
        JClass {
            name: class_file.class_name().to_string(),
            kind: ClassKind::Instance,
            access_flags: class_file.access_flags,
            class_file: Some(class_file),
            status: LinkageStatus::Allocated,
            super_class: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            field_index: HashMap::new(),
            methods: Vec::new(),
            method_index: HashMap::new(),
            instance_size: 0,
            static_block: Vec::new(),
            runtime_pool: RuntimeConstantPool::default(),
            mirror: None,
        }
    }

    pub fn new_array(name: &str, component: FieldType, component_class: Option<ClassId>, dimensions: u8) -> JClass {
        JClass {
            name: name.to_string(),
            kind: ClassKind::Array {
                component,
                component_class,
                dimensions,
            },
            class_file: None,
            access_flags: ClassAccessFlags::AccPublic as u16 | ClassAccessFlags::AccFinal as u16,
            status: LinkageStatus::Allocated,
            super_class: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            field_index: HashMap::new(),
            methods: Vec::new(),
            method_index: HashMap::new(),
            instance_size: 0,
            static_block: Vec::new(),
            runtime_pool: RuntimeConstantPool::default(),
            mirror: None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, ClassKind::Array { .. })
    }

    pub fn is_interface(&self) -> bool {
        ClassAccessFlags::is_set(self.access_flags, ClassAccessFlags::AccInterface)
    }

    /// An ordinary, non-array, non-interface class.
    pub fn is_class_type(&self) -> bool {
        !self.is_array() && !self.is_interface()
    }

    /// The element type of this array class.
    pub fn component_type(&self) -> Option<&FieldType> {
        match &self.kind {
            ClassKind::Array { component, .. } => Some(component),
            ClassKind::Instance => None,
        }
    }

    pub fn component_class(&self) -> Option<ClassId> {
        match &self.kind {
            ClassKind::Array { component_class, .. } => *component_class,
            ClassKind::Instance => None,
        }
    }

    /// The binary name with `.` separators, as Java source spells it.
    pub fn java_name(&self) -> String {
        self.name.replace('/', ".")
    }

    pub(crate) fn push_field(&mut self, field: JField) {
        let key = (field.name.clone(), field.descriptor.clone());
        self.field_index.insert(key, self.fields.len());
        self.fields.push(field);
    }

    pub(crate) fn push_method(&mut self, method: JMethod) {
        let key = (method.name.clone(), method.descriptor.clone());
        self.method_index.insert(key, self.methods.len());
        self.methods.push(method);
    }

    /// Looks up a field declared in (or copied into) this class only.
    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.field_index.get(&(name.to_string(), descriptor.to_string())).copied()
    }

    pub fn find_field_by_name(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Looks up a method declared in this class only.
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.method_index.get(&(name.to_string(), descriptor.to_string())).copied()
    }

    pub fn field(&self, index: usize) -> &JField {
        &self.fields[index]
    }

    pub fn method(&self, index: usize) -> &JMethod {
        &self.methods[index]
    }
}
