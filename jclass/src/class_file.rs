//! The top-level class file structure ([JVMS §4.1](https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.1)).

use std::io::Cursor;

use byteorder::{ReadBytesExt, BE};
use log::debug;

use crate::attributes::{self, AttributeInfo, Code};
use crate::constants::ConstantPool;
use crate::errors::{FormatCause, FormatError};

const MAGIC: u32 = 0xCAFE_BABE;

/// A field declared by this class or interface, before linkage.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl FieldInfo {
    /// The `ConstantValue` index, when the field carries one.
    pub fn constant_value(&self) -> Option<u16> {
        self.attributes.iter().find_map(|attr| match attr {
            AttributeInfo::ConstantValue(index) => Some(*index),
            _ => None,
        })
    }
}

/// A method declared by this class or interface, before linkage.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl MethodInfo {
    pub fn code(&self) -> Option<&Code> {
        self.attributes.iter().find_map(|attr| match attr {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }
}

/// A decoded class file. Immutable after decode.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    /// Decodes a big-endian class file blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<ClassFile, FormatError> {
        let mut cursor = Cursor::new(bytes);

        let magic = cursor.read_u32::<BE>()?;
        if magic != MAGIC {
            return Err(FormatError::new(
                FormatCause::BadMagic(magic),
                "expected 0xCAFEBABE",
            ));
        }

        let minor_version = cursor.read_u16::<BE>()?;
        let major_version = cursor.read_u16::<BE>()?;

        let constant_pool_count = cursor.read_u16::<BE>()?;
        let constant_pool = ConstantPool::read(&mut cursor, constant_pool_count)?;

        let access_flags = cursor.read_u16::<BE>()?;
        let this_class = cursor.read_u16::<BE>()?;
        let super_class = cursor.read_u16::<BE>()?;

        let interfaces_count = cursor.read_u16::<BE>()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(cursor.read_u16::<BE>()?);
        }

        let field_count = cursor.read_u16::<BE>()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let access_flags = cursor.read_u16::<BE>()?;
            let name_index = cursor.read_u16::<BE>()?;
            let descriptor_index = cursor.read_u16::<BE>()?;
            let attributes = attributes::read_attributes(&constant_pool, &mut cursor)?;
            fields.push(FieldInfo {
                access_flags,
                name_index,
                descriptor_index,
                attributes,
            });
        }

        let method_count = cursor.read_u16::<BE>()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            let access_flags = cursor.read_u16::<BE>()?;
            let name_index = cursor.read_u16::<BE>()?;
            let descriptor_index = cursor.read_u16::<BE>()?;
            let attributes = attributes::read_attributes(&constant_pool, &mut cursor)?;
            methods.push(MethodInfo {
                access_flags,
                name_index,
                descriptor_index,
                attributes,
            });
        }

        let class_attributes = attributes::read_attributes(&constant_pool, &mut cursor)?;

        let class_file = ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes: class_attributes,
        };

        debug!(
            "decoded class {} (version {}.{}, {} fields, {} methods)",
            class_file.class_name(),
            major_version,
            minor_version,
            class_file.fields.len(),
            class_file.methods.len()
        );

        Ok(class_file)
    }

    /// The binary name of this class, in internal `/`-separated form.
    pub fn class_name(&self) -> &str {
        self.constant_pool.class_name(self.this_class)
    }

    /// The binary name of the direct superclass; `None` only for
    /// `java/lang/Object`.
    pub fn super_class_name(&self) -> Option<&str> {
        self.constant_pool.optional_class_name(self.super_class)
    }

    /// The binary names of the direct superinterfaces, in declaration order.
    pub fn interface_names(&self) -> Vec<&str> {
        self.interfaces
            .iter()
            .map(|&index| self.constant_pool.class_name(index))
            .collect()
    }

    pub fn field_name(&self, field: &FieldInfo) -> &str {
        self.constant_pool.utf8(field.name_index)
    }

    pub fn field_descriptor(&self, field: &FieldInfo) -> &str {
        self.constant_pool.utf8(field.descriptor_index)
    }

    pub fn method_name(&self, method: &MethodInfo) -> &str {
        self.constant_pool.utf8(method.name_index)
    }

    pub fn method_descriptor(&self, method: &MethodInfo) -> &str {
        self.constant_pool.utf8(method.descriptor_index)
    }
}
