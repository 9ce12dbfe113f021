//! The symbolic constant pool ([JVMS §4.4](https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4)).

use std::io::Cursor;

use byteorder::{ReadBytesExt, BE};

use crate::encoding;
use crate::errors::{FormatCause, FormatError};

/// Constant pool tags as they appear on disk.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Utf8 = 1,
    Integer = 3,
    Float = 4,
    Long = 5,
    Double = 6,
    Class = 7,
    String = 8,
    Fieldref = 9,
    Methodref = 10,
    InterfaceMethodref = 11,
    NameAndType = 12,
    MethodHandle = 15,
    MethodType = 16,
    Dynamic = 17,
    InvokeDynamic = 18,
    Module = 19,
    Package = 20,
}

impl Tag {
    fn from_u8(value: u8) -> Option<Tag> {
        match value {
            1 => Some(Tag::Utf8),
            3 => Some(Tag::Integer),
            4 => Some(Tag::Float),
            5 => Some(Tag::Long),
            6 => Some(Tag::Double),
            7 => Some(Tag::Class),
            8 => Some(Tag::String),
            9 => Some(Tag::Fieldref),
            10 => Some(Tag::Methodref),
            11 => Some(Tag::InterfaceMethodref),
            12 => Some(Tag::NameAndType),
            15 => Some(Tag::MethodHandle),
            16 => Some(Tag::MethodType),
            17 => Some(Tag::Dynamic),
            18 => Some(Tag::InvokeDynamic),
            19 => Some(Tag::Module),
            20 => Some(Tag::Package),
            _ => None,
        }
    }
}

/// One decoded constant pool entry.
///
/// `Reserved` fills index 0, which no entry may occupy; `Empty` fills the
/// second slot behind every `Long` and `Double`, which take two indices.
#[derive(Debug, Clone, PartialEq)]
pub enum CpInfo {
    Reserved,
    Empty,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

/// An indexed constant pool. Valid indices are `1..=len()`, except the
/// `Empty` filler slots, which no symbolic reference may point at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<CpInfo>,
}

impl ConstantPool {
    /// Reads `count - 1` entries from the cursor, where `count` is the
    /// `constant_pool_count` item that was just read.
    pub fn read(cursor: &mut Cursor<&[u8]>, count: u16) -> Result<ConstantPool, FormatError> {
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(CpInfo::Reserved);

        let mut index = 1u16;
        while index < count {
            let tag_byte = cursor.read_u8()?;
            let Some(tag) = Tag::from_u8(tag_byte) else {
                return Err(FormatError::new(
                    FormatCause::InvalidConstantTag(tag_byte),
                    &format!("at constant pool index {index}"),
                ));
            };

            let entry = match tag {
                Tag::Utf8 => {
                    let length = cursor.read_u16::<BE>()?;
                    let mut bytes = vec![0u8; length as usize];
                    std::io::Read::read_exact(cursor, &mut bytes)?;
                    CpInfo::Utf8(encoding::decode_modified_utf8(&bytes)?)
                }
                Tag::Integer => CpInfo::Integer(cursor.read_i32::<BE>()?),
                Tag::Float => CpInfo::Float(f32::from_bits(cursor.read_u32::<BE>()?)),
                Tag::Long => CpInfo::Long(cursor.read_i64::<BE>()?),
                Tag::Double => CpInfo::Double(f64::from_bits(cursor.read_u64::<BE>()?)),
                Tag::Class => CpInfo::Class {
                    name_index: cursor.read_u16::<BE>()?,
                },
                Tag::String => CpInfo::String {
                    string_index: cursor.read_u16::<BE>()?,
                },
                Tag::Fieldref => CpInfo::Fieldref {
                    class_index: cursor.read_u16::<BE>()?,
                    name_and_type_index: cursor.read_u16::<BE>()?,
                },
                Tag::Methodref => CpInfo::Methodref {
                    class_index: cursor.read_u16::<BE>()?,
                    name_and_type_index: cursor.read_u16::<BE>()?,
                },
                Tag::InterfaceMethodref => CpInfo::InterfaceMethodref {
                    class_index: cursor.read_u16::<BE>()?,
                    name_and_type_index: cursor.read_u16::<BE>()?,
                },
                Tag::NameAndType => CpInfo::NameAndType {
                    name_index: cursor.read_u16::<BE>()?,
                    descriptor_index: cursor.read_u16::<BE>()?,
                },
                Tag::MethodHandle => CpInfo::MethodHandle {
                    reference_kind: cursor.read_u8()?,
                    reference_index: cursor.read_u16::<BE>()?,
                },
                Tag::MethodType => CpInfo::MethodType {
                    descriptor_index: cursor.read_u16::<BE>()?,
                },
                Tag::Dynamic => CpInfo::Dynamic {
                    bootstrap_method_attr_index: cursor.read_u16::<BE>()?,
                    name_and_type_index: cursor.read_u16::<BE>()?,
                },
                Tag::InvokeDynamic => CpInfo::InvokeDynamic {
                    bootstrap_method_attr_index: cursor.read_u16::<BE>()?,
                    name_and_type_index: cursor.read_u16::<BE>()?,
                },
                Tag::Module => CpInfo::Module {
                    name_index: cursor.read_u16::<BE>()?,
                },
                Tag::Package => CpInfo::Package {
                    name_index: cursor.read_u16::<BE>()?,
                },
            };

            let is_two_slots = matches!(tag, Tag::Long | Tag::Double);
            entries.push(entry);
            index += 1;
            if is_two_slots {
                // Long and double constants take two consecutive slots.
                entries.push(CpInfo::Empty);
                index += 1;
            }
        }

        Ok(ConstantPool { entries })
    }

    /// Number of slots including the reserved index 0.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Fetches a raw entry. Panics on an out-of-range index: symbolic
    /// references into nowhere mean the class file is corrupt, and decode
    /// has already validated everything it can.
    pub fn entry(&self, index: u16) -> &CpInfo {
        match self.entries.get(index as usize) {
            Some(entry) => entry,
            None => panic!(
                "constant pool index {index} out of range (size {})",
                self.entries.len()
            ),
        }
    }

    /// The string payload of a `CONSTANT_Utf8` entry.
    pub fn utf8(&self, index: u16) -> &str {
        match self.entry(index) {
            CpInfo::Utf8(s) => s,
            other => panic!("constant pool index {index} is {other:?}, expected Utf8"),
        }
    }

    /// The class name referenced by a `CONSTANT_Class` entry.
    pub fn class_name(&self, index: u16) -> &str {
        match self.entry(index) {
            CpInfo::Class { name_index } => self.utf8(*name_index),
            other => panic!("constant pool index {index} is {other:?}, expected Class"),
        }
    }

    /// Like [`Self::class_name`], but maps index 0 to `None`. Used for
    /// `super_class`, which is 0 only on `java/lang/Object`.
    pub fn optional_class_name(&self, index: u16) -> Option<&str> {
        if index == 0 {
            None
        } else {
            Some(self.class_name(index))
        }
    }

    /// The `(name, descriptor)` pair of a `CONSTANT_NameAndType` entry.
    pub fn name_and_type(&self, index: u16) -> (&str, &str) {
        match self.entry(index) {
            CpInfo::NameAndType {
                name_index,
                descriptor_index,
            } => (self.utf8(*name_index), self.utf8(*descriptor_index)),
            other => panic!("constant pool index {index} is {other:?}, expected NameAndType"),
        }
    }
}
