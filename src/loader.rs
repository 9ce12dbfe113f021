//! The bootstrap class loader: a monotone arena of loaded classes keyed by
//! binary name, plus the search logic that turns a name into class bytes.
//!
//! Classes reference each other freely (super class, interfaces, runtime
//! constant pool, mirror), so the arena owns every [`JClass`] and all
//! cross-references are [`ClassId`]s. Loaded classes are never evicted.

use std::collections::HashMap;

use jclass::class_file::ClassFile;
use jclass::descriptors::FieldType;
use log::debug;

use crate::class::{ClassId, ClassKind, JClass, LinkageStatus};
use crate::class_path::{BootstrapArchive, ClassPath};
use crate::errors::VmError;
use crate::linker;

pub struct BootstrapClassLoader {
    classes: Vec<JClass>,
    by_name: HashMap<String, ClassId>,
    class_path: ClassPath,
    bootstrap_archive: BootstrapArchive,
}

impl BootstrapClassLoader {
    pub fn new(class_path: ClassPath) -> BootstrapClassLoader {
        BootstrapClassLoader {
            classes: Vec::new(),
            by_name: HashMap::new(),
            class_path,
            bootstrap_archive: BootstrapArchive::from_env(),
        }
    }

    pub fn class(&self, id: ClassId) -> &JClass {
        &self.classes[id.0 as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut JClass {
        &mut self.classes[id.0 as usize]
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    /// Resolves a binary name to a prepared class, loading and linking it on
    /// first use.
    pub fn load_class(&mut self, name: &str) -> Result<ClassId, VmError> {
        if let Some(id) = self.lookup(name) {
            return Ok(id);
        }

        if name.starts_with('[') {
            return self.load_array_class(name);
        }

        let bytes = self
            .locate_bytes(name)
            .ok_or_else(|| VmError::class_not_found(name))?;
        let id = self.define_class(&bytes)?;

        // A class file that spells a different name than the one it was
        // found under is a linkage error in a real loader; here the decoded
        // name simply wins, and the requested alias maps to it as well.
        if self.class(id).name != name {
            self.by_name.insert(name.to_string(), id);
        }

        Ok(id)
    }

    /// Installs a class straight from its bytes, the way `defineClass`
    /// would. Returns the existing record when the name is already loaded.
    pub fn define_class(&mut self, bytes: &[u8]) -> Result<ClassId, VmError> {
        let class_file = ClassFile::from_bytes(bytes)?;
        if let Some(id) = self.lookup(class_file.class_name()) {
            return Ok(id);
        }

        let record = JClass::new_instance(class_file);
        debug!("defining class {}", record.name);
        let id = self.install(record);
        linker::prepare(self, id)?;
        Ok(id)
    }

    fn load_array_class(&mut self, name: &str) -> Result<ClassId, VmError> {
        let field_type = FieldType::parse(name)
            .filter(FieldType::is_array)
            .ok_or_else(|| VmError::class_not_found(name))?;

        // Resolve the component class before installing the array record:
        // an element type that does not load means the array does not either.
        let component = field_type
            .component_type()
            .expect("an array type always has a component");
        let component_class = if component.is_reference_or_array() {
            let component_name = if component.is_array() {
                component.to_string()
            } else {
                component
                    .as_object_name()
                    .expect("non-array reference component is an object type")
                    .to_string()
            };
            Some(self.load_class(&component_name)?)
        } else {
            None
        };

        let record = JClass::new_array(name, component, component_class, field_type.dimensions);
        let id = self.install(record);
        linker::prepare(self, id)?;
        Ok(id)
    }

    fn install(&mut self, record: JClass) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.by_name.insert(record.name.clone(), id);
        self.classes.push(record);
        id
    }

    /// Searches the bootstrap archive for platform classes and the
    /// classpath for everything else.
    fn locate_bytes(&mut self, name: &str) -> Option<Vec<u8>> {
        if name.starts_with("java/") || name.starts_with("sun/") || name.starts_with("jdk/") {
            self.bootstrap_archive.read_as_binary(name)
        } else {
            self.class_path.search(name)
        }
    }

    // Assignability and lookup walks. These only read the arena, so they
    // live here where the whole hierarchy is visible.
    //==--------------------------------------------------------------------==

    /// `instanceof` / `checkcast` / `athrow` assignability: is a value of
    /// class `s` usable where class `t` is expected?
    pub fn is_instance_of(&self, s: ClassId, t: ClassId) -> bool {
        if s == t {
            return true;
        }
        let s_class = self.class(s);
        let t_class = self.class(t);

        if s_class.is_class_type() {
            if t_class.is_class_type() {
                return self.has_super_class(s, t);
            }
            if t_class.is_interface() {
                return self.has_super_interface(s, t);
            }
            return false;
        }

        if s_class.is_interface() {
            if t_class.is_class_type() {
                return t_class.name == "java/lang/Object";
            }
            if t_class.is_interface() {
                return self.has_super_interface(s, t);
            }
            return false;
        }

        // s is an array class.
        if t_class.is_class_type() {
            return t_class.name == "java/lang/Object";
        }
        if t_class.is_interface() {
            return t_class.name == "java/lang/Cloneable" || t_class.name == "java/io/Serializable";
        }
        if let (
            ClassKind::Array { component: sc, component_class: sc_class, .. },
            ClassKind::Array { component: tc, component_class: tc_class, .. },
        ) = (&s_class.kind, &t_class.kind)
        {
            if let (Some(sp), Some(tp)) = (sc.as_primitive(), tc.as_primitive()) {
                return sp == tp;
            }
            if let (Some(sc_id), Some(tc_id)) = (sc_class, tc_class) {
                return self.is_instance_of(*sc_id, *tc_id);
            }
        }
        false
    }

    fn has_super_class(&self, mut s: ClassId, t: ClassId) -> bool {
        loop {
            if s == t {
                return true;
            }
            match self.class(s).super_class {
                Some(super_id) => s = super_id,
                None => return false,
            }
        }
    }

    /// Walks the transitive super-interface set of `s`, including the
    /// interfaces inherited through super classes.
    pub fn has_super_interface(&self, s: ClassId, t: ClassId) -> bool {
        let mut work_list: Vec<ClassId> = self.class(s).interfaces.clone();
        while let Some(interface) = work_list.pop() {
            if interface == t {
                return true;
            }
            work_list.extend_from_slice(&self.class(interface).interfaces);
        }

        match self.class(s).super_class {
            Some(super_id) => self.has_super_interface(super_id, t),
            None => false,
        }
    }

    /// Method lookup for both virtual dispatch and resolution: defining
    /// class first, then the super-class chain, then super-interfaces
    /// depth-first.
    pub fn lookup_method(&self, class: ClassId, name: &str, descriptor: &str) -> Option<(ClassId, usize)> {
        if let Some(index) = self.class(class).find_method(name, descriptor) {
            return Some((class, index));
        }

        if let Some(super_id) = self.class(class).super_class {
            if let Some(found) = self.lookup_method(super_id, name, descriptor) {
                return Some(found);
            }
        }

        for &interface in &self.class(class).interfaces {
            if let Some(found) = self.lookup_method(interface, name, descriptor) {
                return Some(found);
            }
        }

        None
    }

    /// Field lookup: defining class, then super-interfaces, then the
    /// super-class chain ([JVMS §5.4.3.2](https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-5.html#jvms-5.4.3.2)).
    pub fn lookup_field(&self, class: ClassId, name: &str, descriptor: &str) -> Option<(ClassId, usize)> {
        if let Some(index) = self.class(class).find_field(name, descriptor) {
            return Some((class, index));
        }

        for &interface in &self.class(class).interfaces {
            if let Some(found) = self.lookup_field(interface, name, descriptor) {
                return Some(found);
            }
        }

        if let Some(super_id) = self.class(class).super_class {
            return self.lookup_field(super_id, name, descriptor);
        }

        None
    }

    /// True once `walk super_class*` from `class` reaches `java/lang/Object`.
    /// Holds for every prepared class; mostly useful for assertions and
    /// tests.
    pub fn hierarchy_is_rooted(&self, class: ClassId) -> bool {
        let mut current = class;
        loop {
            let record = self.class(current);
            if record.status < LinkageStatus::Prepared {
                return false;
            }
            match record.super_class {
                Some(super_id) => current = super_id,
                None => return record.name == "java/lang/Object",
            }
        }
    }
}
