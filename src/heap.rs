//! The managed heap: a pair of semispaces plus the permanent region.
//!
//! Objects are addressed through opaque [`ObjRef`] handles. A handle into
//! the collected space is the object's position in the current from-space
//! and is renumbered by every collection; anything holding such a handle
//! across a collection without pinning it reads garbage afterwards, the
//! moral equivalent of a stale raw pointer. Handles into the permanent
//! region (interned strings, class mirrors) are stable for the process
//! lifetime.
//!
//! An object is a small header (class, identity hash, array length) plus a
//! byte payload laid out by the linker: fields live at their assigned byte
//! offsets, array elements at `index * element_width`. References inside
//! payloads are stored as raw handle bits in 8-byte slots, which is what the
//! collector walks when tracing.

use std::cell::RefCell;
use std::rc::Rc;

use jclass::descriptors::{BaseType, FieldType, TypeKind};
use log::debug;

use crate::class::{field_width, ClassId, JField};
use crate::gc::RootList;
use crate::linker::align_to;
use crate::loader::BootstrapClassLoader;
use crate::errors::{VmError, VmErrorKind};
use crate::string_heap::StringHeap;
use crate::value::{ObjRef, Value};

/// Accounted bytes of an object header.
const HEADER_BYTES: usize = 16;

/// High bit marks handles into the permanent region.
const PERM_BIT: u32 = 0x8000_0000;

const LENGTH_NONE: i32 = -1;

/// One allocated object.
#[derive(Debug)]
pub(crate) struct HeapObject {
    pub(crate) class: ClassId,
    pub(crate) hash: i32,
    /// Element count for arrays, [`LENGTH_NONE`] for plain instances.
    pub(crate) length: i32,
    pub(crate) payload: Box<[u8]>,
}

impl HeapObject {
    pub(crate) fn accounted_size(&self) -> usize {
        HEADER_BYTES + align_to(self.payload.len(), 8)
    }

    /// Placeholder left behind when an object is evacuated.
    pub(crate) fn tombstone() -> HeapObject {
        HeapObject {
            class: ClassId(u32::MAX),
            hash: 0,
            length: LENGTH_NONE,
            payload: Box::new([]),
        }
    }
}

pub struct JavaHeap {
    pub(crate) from_space: Vec<HeapObject>,
    pub(crate) to_space: Vec<HeapObject>,
    /// Accounted bytes in the current from-space; the bump pointer.
    pub(crate) used: usize,
    pub(crate) semispace_size: usize,
    pub(crate) perm: Vec<HeapObject>,
    perm_used: usize,
    perm_size: usize,
    pub(crate) roots: Rc<RefCell<RootList>>,
    pub(crate) gc_locked: bool,
    pub(crate) gc_after_every_allocation: bool,
    pub(crate) collection_count: u64,
    pub(crate) interned: StringHeap,
    next_hash: u32,
}

impl JavaHeap {
    pub fn new(max_heap_size: usize, perm_size: usize, gc_after_every_allocation: bool) -> JavaHeap {
        JavaHeap {
            from_space: Vec::new(),
            to_space: Vec::new(),
            used: 0,
            semispace_size: max_heap_size / 2,
            perm: Vec::new(),
            perm_used: 0,
            perm_size,
            roots: Rc::new(RefCell::new(RootList::default())),
            gc_locked: false,
            gc_after_every_allocation,
            collection_count: 0,
            interned: StringHeap::default(),
            next_hash: 0,
        }
    }

    // Handle encoding
    //==--------------------------------------------------------------------==

    fn heap_ref(index: usize) -> ObjRef {
        ObjRef(index as u32 + 1)
    }

    fn perm_ref(index: usize) -> ObjRef {
        ObjRef(PERM_BIT | (index as u32 + 1))
    }

    pub(crate) fn is_perm(r: ObjRef) -> bool {
        r.0 & PERM_BIT != 0
    }

    pub(crate) fn object(&self, r: ObjRef) -> &HeapObject {
        assert!(!r.is_null(), "null reference dereferenced");
        let index = (r.0 & !PERM_BIT) as usize - 1;
        if Self::is_perm(r) {
            &self.perm[index]
        } else {
            &self.from_space[index]
        }
    }

    pub(crate) fn object_mut(&mut self, r: ObjRef) -> &mut HeapObject {
        assert!(!r.is_null(), "null reference dereferenced");
        let index = (r.0 & !PERM_BIT) as usize - 1;
        if Self::is_perm(r) {
            &mut self.perm[index]
        } else {
            &mut self.from_space[index]
        }
    }

    // Allocation
    //==--------------------------------------------------------------------==

    /// The identity hash is fixed at allocation time so a later move cannot
    /// change it.
    fn fresh_hash(&mut self) -> i32 {
        self.next_hash = self.next_hash.wrapping_add(1);
        (self.next_hash.wrapping_mul(0x9E37_79B9) | 1) as i32
    }

    fn instance_object(&mut self, loader: &BootstrapClassLoader, class: ClassId) -> HeapObject {
        let size = loader.class(class).instance_size;
        HeapObject {
            class,
            hash: self.fresh_hash(),
            length: LENGTH_NONE,
            payload: vec![0u8; size].into_boxed_slice(),
        }
    }

    fn array_object(&mut self, loader: &BootstrapClassLoader, class: ClassId, length: i32) -> HeapObject {
        let component = loader
            .class(class)
            .component_type()
            .expect("array allocation against a non-array class");
        let size = length as usize * field_width(component);
        HeapObject {
            class,
            hash: self.fresh_hash(),
            length,
            payload: vec![0u8; size].into_boxed_slice(),
        }
    }

    fn push_object(&mut self, object: HeapObject) -> Option<ObjRef> {
        let size = object.accounted_size();
        if self.used + size > self.semispace_size {
            return None;
        }
        self.used += size;
        self.from_space.push(object);
        Some(Self::heap_ref(self.from_space.len() - 1))
    }

    /// Bump allocation in the current from-space. `None` means the space is
    /// full and the caller should collect and retry.
    pub fn try_allocate_instance(&mut self, loader: &BootstrapClassLoader, class: ClassId) -> Option<ObjRef> {
        let object = self.instance_object(loader, class);
        self.push_object(object)
    }

    pub fn try_allocate_array(
        &mut self,
        loader: &BootstrapClassLoader,
        class: ClassId,
        length: i32,
    ) -> Option<ObjRef> {
        let object = self.array_object(loader, class, length);
        self.push_object(object)
    }

    fn push_perm_object(&mut self, object: HeapObject) -> Result<ObjRef, VmError> {
        let size = object.accounted_size();
        if self.perm_used + size > self.perm_size {
            return Err(VmError::new(VmErrorKind::OutOfMemory, "permanent region exhausted"));
        }
        self.perm_used += size;
        self.perm.push(object);
        Ok(Self::perm_ref(self.perm.len() - 1))
    }

    /// Allocates in the permanent region: traced from, never moved, never
    /// freed. Interned strings and class mirrors live here.
    pub fn allocate_perm_instance(
        &mut self,
        loader: &BootstrapClassLoader,
        class: ClassId,
    ) -> Result<ObjRef, VmError> {
        let object = self.instance_object(loader, class);
        self.push_perm_object(object)
    }

    pub fn allocate_perm_array(
        &mut self,
        loader: &BootstrapClassLoader,
        class: ClassId,
        length: i32,
    ) -> Result<ObjRef, VmError> {
        let object = self.array_object(loader, class, length);
        self.push_perm_object(object)
    }

    // Header access
    //==--------------------------------------------------------------------==

    pub fn class_of(&self, r: ObjRef) -> ClassId {
        self.object(r).class
    }

    pub fn identity_hash(&self, r: ObjRef) -> i32 {
        self.object(r).hash
    }

    pub fn array_length(&self, r: ObjRef) -> i32 {
        let length = self.object(r).length;
        assert!(length >= 0, "array length read on a non-array object");
        length
    }

    pub fn used_bytes(&self) -> usize {
        self.used
    }

    /// Objects currently in the collected space (the permanent region not
    /// included).
    pub fn object_count(&self) -> usize {
        self.from_space.len()
    }

    pub fn collection_count(&self) -> u64 {
        self.collection_count
    }

    // Typed payload access
    //==--------------------------------------------------------------------==

    pub fn field_value(&self, field: &JField, object: ObjRef) -> Value {
        read_slot(&self.object(object).payload, field.offset, &field.ty)
    }

    pub fn set_field_value(&mut self, field: &JField, object: ObjRef, value: Value) {
        let offset = field.offset;
        let ty = field.ty.clone();
        write_slot(&mut self.object_mut(object).payload, offset, &ty, value);
    }

    /// Reads a static field straight from the defining class's block.
    pub fn static_field_value(&self, loader: &BootstrapClassLoader, class: ClassId, field_index: usize) -> Value {
        let record = loader.class(class);
        let field = record.field(field_index);
        read_slot(&record.static_block, field.offset, &field.ty)
    }

    pub fn array_get(&self, loader: &BootstrapClassLoader, array: ObjRef, index: i32) -> Value {
        let component = loader
            .class(self.class_of(array))
            .component_type()
            .expect("array access against a non-array class")
            .clone();
        let offset = index as usize * field_width(&component);
        read_slot(&self.object(array).payload, offset, &component)
    }

    pub fn array_set(&mut self, loader: &BootstrapClassLoader, array: ObjRef, index: i32, value: Value) {
        let component = loader
            .class(self.class_of(array))
            .component_type()
            .expect("array access against a non-array class")
            .clone();
        let offset = index as usize * field_width(&component);
        write_slot(&mut self.object_mut(array).payload, offset, &component, value);
    }

    /// Copies raw bytes into a `byte[]` payload. Used by string interning.
    pub fn array_fill_bytes(&mut self, array: ObjRef, bytes: &[u8]) {
        let payload = &mut self.object_mut(array).payload;
        payload[..bytes.len()].copy_from_slice(bytes);
    }

    pub fn array_as_bytes(&self, array: ObjRef) -> &[u8] {
        &self.object(array).payload
    }

    // Raw offset access, for `Unsafe` and the collector
    //==--------------------------------------------------------------------==

    pub fn read_i32_at(&self, object: ObjRef, offset: usize) -> i32 {
        let payload = &self.object(object).payload;
        i32::from_le_bytes(payload[offset..offset + 4].try_into().expect("offset in bounds"))
    }

    pub fn write_i32_at(&mut self, object: ObjRef, offset: usize, value: i32) {
        let payload = &mut self.object_mut(object).payload;
        payload[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn read_i64_at(&self, object: ObjRef, offset: usize) -> i64 {
        let payload = &self.object(object).payload;
        i64::from_le_bytes(payload[offset..offset + 8].try_into().expect("offset in bounds"))
    }

    pub fn write_i64_at(&mut self, object: ObjRef, offset: usize, value: i64) {
        let payload = &mut self.object_mut(object).payload;
        payload[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn read_ref_at(&self, object: ObjRef, offset: usize) -> ObjRef {
        ObjRef(self.read_i64_at(object, offset) as u64 as u32)
    }

    pub fn write_ref_at(&mut self, object: ObjRef, offset: usize, value: ObjRef) {
        self.write_i64_at(object, offset, value.0 as i64);
    }

    pub(crate) fn log_pressure(&self) {
        debug!(
            "heap: {} of {} bytes used, {} objects, {} collections",
            self.used,
            self.semispace_size,
            self.from_space.len(),
            self.collection_count
        );
    }
}

/// Reads one typed value from a payload. Sub-int primitives widen to int:
/// byte and short sign-extend, char zero-extends, boolean masks to one bit.
pub(crate) fn read_slot(payload: &[u8], offset: usize, ty: &FieldType) -> Value {
    if ty.is_reference_or_array() {
        let raw = u64::from_le_bytes(payload[offset..offset + 8].try_into().expect("slot in bounds"));
        return Value::Reference(ObjRef(raw as u32));
    }
    match ty.kind {
        TypeKind::Primitive(BaseType::Byte) => Value::Int(payload[offset] as i8 as i32),
        TypeKind::Primitive(BaseType::Boolean) => Value::Int((payload[offset] & 1) as i32),
        TypeKind::Primitive(BaseType::Char) => {
            let raw = u16::from_le_bytes(payload[offset..offset + 2].try_into().expect("slot in bounds"));
            Value::Int(raw as i32)
        }
        TypeKind::Primitive(BaseType::Short) => {
            let raw = i16::from_le_bytes(payload[offset..offset + 2].try_into().expect("slot in bounds"));
            Value::Int(raw as i32)
        }
        TypeKind::Primitive(BaseType::Int) => {
            Value::Int(i32::from_le_bytes(payload[offset..offset + 4].try_into().expect("slot in bounds")))
        }
        TypeKind::Primitive(BaseType::Float) => {
            Value::Float(f32::from_le_bytes(payload[offset..offset + 4].try_into().expect("slot in bounds")))
        }
        TypeKind::Primitive(BaseType::Long) => {
            Value::Long(i64::from_le_bytes(payload[offset..offset + 8].try_into().expect("slot in bounds")))
        }
        TypeKind::Primitive(BaseType::Double) => {
            Value::Double(f64::from_le_bytes(payload[offset..offset + 8].try_into().expect("slot in bounds")))
        }
        TypeKind::Object(_) => unreachable!("reference types are handled above"),
    }
}

/// Writes one typed value into a payload, truncating sub-int primitives.
pub(crate) fn write_slot(payload: &mut [u8], offset: usize, ty: &FieldType, value: Value) {
    if ty.is_reference_or_array() {
        let raw = value.as_reference().0 as u64;
        payload[offset..offset + 8].copy_from_slice(&raw.to_le_bytes());
        return;
    }
    match ty.kind {
        TypeKind::Primitive(BaseType::Byte) => payload[offset] = value.as_int() as u8,
        TypeKind::Primitive(BaseType::Boolean) => payload[offset] = (value.as_int() & 1) as u8,
        TypeKind::Primitive(BaseType::Char) => {
            payload[offset..offset + 2].copy_from_slice(&(value.as_int() as u16).to_le_bytes());
        }
        TypeKind::Primitive(BaseType::Short) => {
            payload[offset..offset + 2].copy_from_slice(&(value.as_int() as i16).to_le_bytes());
        }
        TypeKind::Primitive(BaseType::Int) => {
            payload[offset..offset + 4].copy_from_slice(&value.as_int().to_le_bytes());
        }
        TypeKind::Primitive(BaseType::Float) => {
            payload[offset..offset + 4].copy_from_slice(&value.as_float().to_le_bytes());
        }
        TypeKind::Primitive(BaseType::Long) => {
            payload[offset..offset + 8].copy_from_slice(&value.as_long().to_le_bytes());
        }
        TypeKind::Primitive(BaseType::Double) => {
            payload[offset..offset + 8].copy_from_slice(&value.as_double().to_le_bytes());
        }
        TypeKind::Object(_) => unreachable!("reference types are handled above"),
    }
}
