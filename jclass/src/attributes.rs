//! Attribute decoding ([JVMS §4.7](https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7)).
//!
//! Only the attributes the runtime consumes get a typed representation;
//! everything else is skipped over using its declared byte length and kept
//! as an [`AttributeInfo::Unknown`] blob so nothing is silently lost.

use std::io::{Cursor, Read};

use byteorder::{ReadBytesExt, BE};
use log::trace;

use crate::constants::ConstantPool;
use crate::errors::FormatError;

/// One `[startPc, endPc)` range of the exception table, with the handler
/// target and the constant pool index of the caught class (0 is catch-all).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

/// An entry of the `LineNumberTable` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,
}

/// An entry of `LocalVariableTable` or `LocalVariableTypeTable`; the fifth
/// field is the descriptor index for the former and the signature index for
/// the latter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

/// The `Code` attribute of a non-abstract, non-native method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<AttributeInfo>,
}

impl Code {
    pub fn line_number_table(&self) -> Option<&[LineNumber]> {
        self.attributes.iter().find_map(|attr| match attr {
            AttributeInfo::LineNumberTable(table) => Some(table.as_slice()),
            _ => None,
        })
    }

    /// The raw `StackMapTable` payload, undecoded.
    pub fn stack_map_table(&self) -> Option<&[u8]> {
        self.attributes.iter().find_map(|attr| match attr {
            AttributeInfo::StackMapTable(bytes) => Some(bytes.as_slice()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeInfo {
    /// Constant pool index of the initial value of a static field.
    ConstantValue(u16),
    Code(Code),
    /// Constant pool indices of the declared thrown classes.
    Exceptions(Vec<u16>),
    LineNumberTable(Vec<LineNumber>),
    LocalVariableTable(Vec<LocalVariable>),
    LocalVariableTypeTable(Vec<LocalVariable>),
    /// Raw payload; consumers wanting slot kinds decode it themselves.
    StackMapTable(Vec<u8>),
    Unknown { name: String, info: Vec<u8> },
}

/// Reads an attribute list: a `u16` count followed by that many entries.
pub fn read_attributes(
    constant_pool: &ConstantPool,
    cursor: &mut Cursor<&[u8]>,
) -> Result<Vec<AttributeInfo>, FormatError> {
    let count = cursor.read_u16::<BE>()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        attributes.push(read_attribute(constant_pool, cursor)?);
    }
    Ok(attributes)
}

fn read_attribute(
    constant_pool: &ConstantPool,
    cursor: &mut Cursor<&[u8]>,
) -> Result<AttributeInfo, FormatError> {
    let name_index = cursor.read_u16::<BE>()?;
    let length = cursor.read_u32::<BE>()?;
    let name = constant_pool.utf8(name_index);

    let attribute = match name {
        "ConstantValue" => AttributeInfo::ConstantValue(cursor.read_u16::<BE>()?),
        "Code" => AttributeInfo::Code(read_code(constant_pool, cursor)?),
        "Exceptions" => {
            let exception_count = cursor.read_u16::<BE>()?;
            let mut indices = Vec::with_capacity(exception_count as usize);
            for _ in 0..exception_count {
                indices.push(cursor.read_u16::<BE>()?);
            }
            AttributeInfo::Exceptions(indices)
        }
        "LineNumberTable" => {
            let entry_count = cursor.read_u16::<BE>()?;
            let mut table = Vec::with_capacity(entry_count as usize);
            for _ in 0..entry_count {
                table.push(LineNumber {
                    start_pc: cursor.read_u16::<BE>()?,
                    line_number: cursor.read_u16::<BE>()?,
                });
            }
            AttributeInfo::LineNumberTable(table)
        }
        "LocalVariableTable" | "LocalVariableTypeTable" => {
            let entry_count = cursor.read_u16::<BE>()?;
            let mut table = Vec::with_capacity(entry_count as usize);
            for _ in 0..entry_count {
                table.push(LocalVariable {
                    start_pc: cursor.read_u16::<BE>()?,
                    length: cursor.read_u16::<BE>()?,
                    name_index: cursor.read_u16::<BE>()?,
                    descriptor_index: cursor.read_u16::<BE>()?,
                    index: cursor.read_u16::<BE>()?,
                });
            }
            if name == "LocalVariableTable" {
                AttributeInfo::LocalVariableTable(table)
            } else {
                AttributeInfo::LocalVariableTypeTable(table)
            }
        }
        "StackMapTable" => {
            let mut info = vec![0u8; length as usize];
            cursor.read_exact(&mut info)?;
            AttributeInfo::StackMapTable(info)
        }
        _ => {
            trace!("skipping attribute {name} ({length} bytes)");
            let mut info = vec![0u8; length as usize];
            cursor.read_exact(&mut info)?;
            AttributeInfo::Unknown {
                name: name.into(),
                info,
            }
        }
    };

    Ok(attribute)
}

fn read_code(
    constant_pool: &ConstantPool,
    cursor: &mut Cursor<&[u8]>,
) -> Result<Code, FormatError> {
    let max_stack = cursor.read_u16::<BE>()?;
    let max_locals = cursor.read_u16::<BE>()?;

    let code_length = cursor.read_u32::<BE>()?;
    let mut code = vec![0u8; code_length as usize];
    cursor.read_exact(&mut code)?;

    let handler_count = cursor.read_u16::<BE>()?;
    let mut exception_table = Vec::with_capacity(handler_count as usize);
    for _ in 0..handler_count {
        exception_table.push(ExceptionHandler {
            start_pc: cursor.read_u16::<BE>()?,
            end_pc: cursor.read_u16::<BE>()?,
            handler_pc: cursor.read_u16::<BE>()?,
            catch_type: cursor.read_u16::<BE>()?,
        });
    }

    let attributes = read_attributes(constant_pool, cursor)?;

    Ok(Code {
        max_stack,
        max_locals,
        code,
        exception_table,
        attributes,
    })
}
