//! The copying collector: Cheney's algorithm over the two semispaces, plus
//! the root list behind pinning handles.
//!
//! A collection swaps the spaces, evacuates every root into the new
//! from-space, then scans the copied objects in allocation order, copying
//! whatever they reference until the scan catches up with the bump pointer.
//! A forwarding map keeps each object from being copied twice. The roots
//! are the pinned handles, every reference-typed static field of every
//! loaded class, every reference slot in the permanent region, and every
//! reference slot in the live frames of the running thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::heap::{HeapObject, JavaHeap};
use crate::loader::BootstrapClassLoader;
use crate::thread::JavaThread;
use crate::value::{ObjRef, Value};

/// The explicit root list. Slots are stable indices, so a pinned handle can
/// find its (possibly relocated) referent after any number of collections.
#[derive(Debug, Default)]
pub struct RootList {
    slots: Vec<Option<ObjRef>>,
    free: Vec<usize>,
}

impl RootList {
    fn insert(&mut self, reference: ObjRef) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(reference);
                slot
            }
            None => {
                self.slots.push(Some(reference));
                self.slots.len() - 1
            }
        }
    }

    fn remove(&mut self, slot: usize) {
        self.slots[slot] = None;
        self.free.push(slot);
    }

    fn get(&self, slot: usize) -> ObjRef {
        self.slots[slot].expect("read through a released GC root")
    }

    fn live_slots_mut(&mut self) -> impl Iterator<Item = &mut ObjRef> {
        self.slots.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An owning pin on a heap object. While the handle lives, the object is a
/// GC root; reading through [`GcRoot::get`] always yields the current,
/// post-relocation handle. Dropping the handle unpins.
pub struct GcRoot {
    slot: Option<usize>,
    roots: Rc<RefCell<RootList>>,
}

impl GcRoot {
    pub fn get(&self) -> ObjRef {
        match self.slot {
            Some(slot) => self.roots.borrow().get(slot),
            None => ObjRef::NULL,
        }
    }
}

impl Drop for GcRoot {
    fn drop(&mut self) {
        if let Some(slot) = self.slot {
            self.roots.borrow_mut().remove(slot);
        }
    }
}

impl JavaHeap {
    /// Marks an object as a GC root for as long as the returned handle
    /// lives. Pinning null yields a handle that always reads null.
    pub fn pin(&self, reference: ObjRef) -> GcRoot {
        let slot = if reference.is_null() {
            None
        } else {
            Some(self.roots.borrow_mut().insert(reference))
        };
        GcRoot {
            slot,
            roots: Rc::clone(&self.roots),
        }
    }

    /// Prevents collections from running until [`Self::unlock_gc`]. Also
    /// the reentrancy guard: a collection triggered while one is underway
    /// is a no-op.
    pub fn lock_gc(&mut self) {
        self.gc_locked = true;
    }

    pub fn unlock_gc(&mut self) {
        self.gc_locked = false;
    }

    /// Runs one stop-the-world copying collection.
    pub fn collect(&mut self, loader: &mut BootstrapClassLoader, mut thread: Option<&mut JavaThread>) {
        if self.gc_locked {
            return;
        }
        self.gc_locked = true;
        self.log_pressure();

        // Swap the spaces; the objects to evacuate now sit in to-space and
        // the new from-space fills from its start.
        std::mem::swap(&mut self.from_space, &mut self.to_space);
        self.from_space.clear();
        self.used = 0;

        let mut forwarding: HashMap<u32, u32> = HashMap::new();

        // Pinned roots.
        let roots = Rc::clone(&self.roots);
        for slot in roots.borrow_mut().live_slots_mut() {
            *slot = self.evacuate(*slot, &mut forwarding);
        }

        // The permanent region is not moved, but everything it points at is
        // a root.
        for index in 0..self.perm.len() {
            let reference = Self::perm_handle(index);
            self.trace_object(reference, loader, &mut forwarding);
        }

        // Reference-typed static fields of every loaded class.
        for class_index in 0..loader.class_count() {
            let class_id = crate::class::ClassId(class_index as u32);
            let offsets: Vec<usize> = loader
                .class(class_id)
                .fields
                .iter()
                .filter(|field| field.is_static() && field.ty.is_reference_or_array())
                .map(|field| field.offset)
                .collect();
            for offset in offsets {
                let block = &loader.class(class_id).static_block;
                let old = ObjRef(u64::from_le_bytes(
                    block[offset..offset + 8].try_into().expect("static slot in bounds"),
                ) as u32);
                let new = self.evacuate(old, &mut forwarding);
                let block = &mut loader.class_mut(class_id).static_block;
                block[offset..offset + 8].copy_from_slice(&(new.0 as u64).to_le_bytes());
            }
        }

        // Live frame slots of the running thread. The slot tag says which
        // ones hold references.
        if let Some(thread) = thread.as_deref_mut() {
            for frame in &mut thread.frames {
                for value in frame.locals.iter_mut().chain(frame.stack.iter_mut()) {
                    if let Value::Reference(reference) = value {
                        *reference = self.evacuate(*reference, &mut forwarding);
                    }
                }
            }
            if let Some(pending) = thread.pending_exception {
                thread.pending_exception = Some(self.evacuate(pending, &mut forwarding));
            }
            if let Some(instance) = thread.instance {
                thread.instance = Some(self.evacuate(instance, &mut forwarding));
            }
        }

        // Cheney scan: walk the copied objects in order, evacuating their
        // referents, until the scan pointer reaches the bump pointer.
        let mut scan = 0usize;
        while scan < self.from_space.len() {
            let reference = Self::heap_handle(scan);
            self.trace_object(reference, loader, &mut forwarding);
            scan += 1;
        }

        self.to_space.clear();
        self.collection_count += 1;
        self.gc_locked = false;
        debug!(
            "collection {} done: {} objects survive ({} bytes)",
            self.collection_count,
            self.from_space.len(),
            self.used
        );
    }

    fn heap_handle(index: usize) -> ObjRef {
        ObjRef(index as u32 + 1)
    }

    fn perm_handle(index: usize) -> ObjRef {
        ObjRef(0x8000_0000 | (index as u32 + 1))
    }

    /// Copies one object out of to-space, returning its new handle. Null
    /// and permanent handles pass through, already-copied objects resolve
    /// through the forwarding map.
    fn evacuate(&mut self, reference: ObjRef, forwarding: &mut HashMap<u32, u32>) -> ObjRef {
        if reference.is_null() || Self::is_perm(reference) {
            return reference;
        }
        let old_index = reference.0 - 1;
        if let Some(&new_index) = forwarding.get(&old_index) {
            return Self::heap_handle(new_index as usize);
        }

        let object = std::mem::replace(&mut self.to_space[old_index as usize], HeapObject::tombstone());
        self.used += object.accounted_size();
        self.from_space.push(object);
        let new_index = (self.from_space.len() - 1) as u32;
        forwarding.insert(old_index, new_index);
        Self::heap_handle(new_index as usize)
    }

    /// Evacuates and rewrites every reference slot of one already-copied
    /// (or permanent) object.
    fn trace_object(
        &mut self,
        reference: ObjRef,
        loader: &BootstrapClassLoader,
        forwarding: &mut HashMap<u32, u32>,
    ) {
        let class_id = self.class_of(reference);
        let class = loader.class(class_id);

        let offsets: Vec<usize> = if let Some(component) = class.component_type() {
            if component.is_reference_or_array() {
                let length = self.array_length(reference) as usize;
                (0..length).map(|index| index * 8).collect()
            } else {
                Vec::new()
            }
        } else {
            class
                .fields
                .iter()
                .filter(|field| !field.is_static() && field.ty.is_reference_or_array())
                .map(|field| field.offset)
                .collect()
        };

        for offset in offsets {
            let old = self.read_ref_at(reference, offset);
            let new = self.evacuate(old, forwarding);
            self.write_ref_at(reference, offset, new);
        }
    }
}
