//! The runtime constant pool: per-class caches of resolved symbolic
//! references, keyed by constant pool index.
//!
//! Resolution itself needs the loader, the heap and the intern table, so it
//! lives on [`crate::vm::Vm`] (`rcp_class`, `rcp_field`, `rcp_method`,
//! `rcp_string`); this type only holds the results. Every cache is
//! populated on first lookup and never invalidated: classes are not
//! unloaded and interned strings are permanent.

use std::collections::HashMap;

use crate::class::ClassId;
use crate::value::ObjRef;

#[derive(Debug, Default)]
pub struct RuntimeConstantPool {
    /// `CONSTANT_Class` index → loaded class.
    pub(crate) classes: HashMap<u16, ClassId>,
    /// `CONSTANT_Fieldref` index → (defining class, field table index).
    pub(crate) fields: HashMap<u16, (ClassId, usize)>,
    /// `CONSTANT_Methodref` / `CONSTANT_InterfaceMethodref` index →
    /// (defining class, method table index).
    pub(crate) methods: HashMap<u16, (ClassId, usize)>,
    /// `CONSTANT_String` index → interned instance.
    pub(crate) strings: HashMap<u16, ObjRef>,
}
