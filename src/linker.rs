//! Link-time preparation: super/interface linkage, field layout, method
//! tables. Initialization (`<clinit>`) happens later, on first active use,
//! and is driven by the VM because it executes bytecode.

use std::rc::Rc;

use jclass::access_flags::FieldAccessFlags;
use jclass::descriptors::{FieldType, MethodDescriptor};
use log::trace;

use crate::class::{field_width, ClassId, JField, JMethod, LinkageStatus};
use crate::errors::{VmError, VmErrorKind};
use crate::loader::BootstrapClassLoader;

/// Payload alignment of object headers and payload ends.
pub const OBJECT_ALIGNMENT: usize = 8;

pub fn align_to(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

struct FieldSpec {
    name: String,
    descriptor: String,
    access_flags: u16,
    constant_value: Option<u16>,
}

struct MethodSpec {
    name: String,
    descriptor: String,
    access_flags: u16,
    code: Option<Rc<jclass::attributes::Code>>,
}

/// Moves a class from `Allocated` to `Prepared`: links the hierarchy,
/// assigns field offsets and builds the method table. Idempotent.
pub fn prepare(loader: &mut BootstrapClassLoader, id: ClassId) -> Result<(), VmError> {
    if loader.class(id).status >= LinkageStatus::Prepared {
        return Ok(());
    }

    if loader.class(id).is_array() {
        return prepare_array(loader, id);
    }

    let (super_name, interface_names, field_specs, method_specs) = {
        let class = loader.class(id);
        let class_file = class
            .class_file
            .as_ref()
            .expect("instance classes keep their class file");

        let super_name = class_file.super_class_name().map(str::to_string);
        let interface_names: Vec<String> =
            class_file.interface_names().iter().map(|s| s.to_string()).collect();

        let field_specs: Vec<FieldSpec> = class_file
            .fields
            .iter()
            .map(|field| FieldSpec {
                name: class_file.field_name(field).to_string(),
                descriptor: class_file.field_descriptor(field).to_string(),
                access_flags: field.access_flags,
                constant_value: field.constant_value(),
            })
            .collect();

        let method_specs: Vec<MethodSpec> = class_file
            .methods
            .iter()
            .map(|method| MethodSpec {
                name: class_file.method_name(method).to_string(),
                descriptor: class_file.method_descriptor(method).to_string(),
                access_flags: method.access_flags,
                code: method.code().map(|code| Rc::new(code.clone())),
            })
            .collect();

        (super_name, interface_names, field_specs, method_specs)
    };

    // Super class and super interfaces are prepared before this class: the
    // field layout below starts where the super-class payload ends.
    let super_class = match &super_name {
        Some(name) => Some(loader.load_class(name)?),
        None => None,
    };
    let mut interfaces = Vec::with_capacity(interface_names.len());
    for name in &interface_names {
        interfaces.push(loader.load_class(name)?);
    }

    link_fields(loader, id, super_class, field_specs)?;

    {
        let class = loader.class_mut(id);
        class.super_class = super_class;
        class.interfaces = interfaces;
        for spec in method_specs {
            let parsed = MethodDescriptor::parse(&spec.descriptor).ok_or_else(|| {
                VmError::new(
                    VmErrorKind::ClassNotFound,
                    format!("unparseable method descriptor {}", spec.descriptor),
                )
            })?;
            class.push_method(JMethod {
                name: spec.name,
                descriptor: spec.descriptor,
                parsed,
                access_flags: spec.access_flags,
                code: spec.code,
            });
        }
        class.status = LinkageStatus::Prepared;
        trace!(
            "prepared {} ({} bytes/instance, {} static bytes)",
            class.name,
            class.instance_size,
            class.static_block.len()
        );
    }

    Ok(())
}

/// Field layout. Instance fields of the super class are copied in first so
/// their offsets are preserved on inheritance; the fields declared here
/// follow, each aligned to its own width. Statics get offsets into this
/// class's own static block.
fn link_fields(
    loader: &mut BootstrapClassLoader,
    id: ClassId,
    super_class: Option<ClassId>,
    specs: Vec<FieldSpec>,
) -> Result<(), VmError> {
    let mut inherited: Vec<JField> = Vec::new();
    let mut instance_offset = 0usize;
    if let Some(super_id) = super_class {
        let super_record = loader.class(super_id);
        instance_offset = super_record.instance_size;
        inherited.extend(
            super_record
                .fields
                .iter()
                .filter(|field| !field.is_static())
                .cloned(),
        );
    }

    let mut static_offset = 0usize;

    let class = loader.class_mut(id);
    for field in inherited {
        class.push_field(field);
    }

    for spec in specs {
        let ty = FieldType::parse(&spec.descriptor).ok_or_else(|| {
            VmError::new(
                VmErrorKind::ClassNotFound,
                format!("unparseable field descriptor {}", spec.descriptor),
            )
        })?;
        let width = field_width(&ty);
        let is_static = FieldAccessFlags::is_set(spec.access_flags, FieldAccessFlags::AccStatic);

        let offset = if is_static {
            static_offset = align_to(static_offset, width);
            let offset = static_offset;
            static_offset += width;
            offset
        } else {
            instance_offset = align_to(instance_offset, width);
            let offset = instance_offset;
            instance_offset += width;
            offset
        };

        class.push_field(JField {
            name: spec.name,
            descriptor: spec.descriptor,
            ty,
            access_flags: spec.access_flags,
            offset,
            constant_value: spec.constant_value,
        });
    }

    class.instance_size = align_to(instance_offset, OBJECT_ALIGNMENT);
    class.static_block = vec![0u8; align_to(static_offset, OBJECT_ALIGNMENT)];

    Ok(())
}

/// Array classes have a fixed shape: super class `java/lang/Object`,
/// interfaces `Cloneable` and `java/io/Serializable`, no fields or methods
/// of their own.
fn prepare_array(loader: &mut BootstrapClassLoader, id: ClassId) -> Result<(), VmError> {
    let super_class = loader.load_class("java/lang/Object")?;
    let cloneable = loader.load_class("java/lang/Cloneable")?;
    let serializable = loader.load_class("java/io/Serializable")?;

    let class = loader.class_mut(id);
    class.super_class = Some(super_class);
    class.interfaces = vec![cloneable, serializable];
    class.status = LinkageStatus::Prepared;
    Ok(())
}
