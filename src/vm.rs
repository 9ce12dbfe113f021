//! The virtual machine value: loader, heap, native registry, and the
//! resolution and allocation entry points the interpreter runs against.
//!
//! Nothing here is a process-wide singleton; tests build one `Vm` per test.

use jclass::constants::CpInfo;
use log::{debug, warn};
use std::collections::HashMap;

use crate::class::{ClassId, JField, LinkageStatus};
use crate::class_path::ClassPath;
use crate::errors::{Unwind, VmError, VmErrorKind};
use crate::heap::JavaHeap;
use crate::loader::BootstrapClassLoader;
use crate::native::NativeMethodRegistry;
use crate::string_heap;
use crate::thread::JavaThread;
use crate::value::{ObjRef, Value};

pub struct VmSettings {
    /// Total size of the collected heap; each semispace gets half.
    pub max_heap_size: usize,
    /// Size of the permanent region (interned strings, mirrors).
    pub perm_size: usize,
    /// Diagnostic mode: run a collection after every allocation.
    pub run_gc_after_every_allocation: bool,
    /// Ordered classpath entries, directories or jars.
    pub class_path: Vec<String>,
}

impl Default for VmSettings {
    fn default() -> VmSettings {
        VmSettings {
            max_heap_size: 64 << 20,
            perm_size: 8 << 20,
            run_gc_after_every_allocation: false,
            class_path: vec![".".to_string()],
        }
    }
}

pub struct Vm {
    pub loader: BootstrapClassLoader,
    pub heap: JavaHeap,
    pub natives: NativeMethodRegistry,
    mirror_classes: HashMap<ObjRef, ClassId>,
}

impl Vm {
    pub fn new(settings: VmSettings) -> Vm {
        let mut class_path = ClassPath::new();
        for entry in &settings.class_path {
            class_path.add_entry(entry);
        }

        let mut natives = NativeMethodRegistry::default();
        crate::native::register_builtins(&mut natives);

        Vm {
            loader: BootstrapClassLoader::new(class_path),
            heap: JavaHeap::new(
                settings.max_heap_size,
                settings.perm_size,
                settings.run_gc_after_every_allocation,
            ),
            natives,
            mirror_classes: HashMap::new(),
        }
    }

    pub fn resolve_class(&mut self, name: &str) -> Result<ClassId, VmError> {
        self.loader.load_class(name)
    }

    /// Installs a class from raw bytes, bypassing the classpath search.
    pub fn define_class(&mut self, bytes: &[u8]) -> Result<ClassId, VmError> {
        self.loader.define_class(bytes)
    }

    // Initialization
    //==--------------------------------------------------------------------==

    /// Moves a class to `Initialized` on its first active use: super class
    /// and super interfaces first, then the `ConstantValue` statics, then
    /// `<clinit>`. Reentry while already under initialization is a no-op,
    /// which is what makes recursive initialization from a `<clinit>` safe.
    pub fn initialize_class(&mut self, thread: &mut JavaThread, class: ClassId) -> Result<(), Unwind> {
        if self.loader.class(class).status >= LinkageStatus::UnderInitialization {
            return Ok(());
        }
        self.loader.class_mut(class).status = LinkageStatus::UnderInitialization;

        let (super_class, interfaces) = {
            let record = self.loader.class(class);
            (record.super_class, record.interfaces.clone())
        };
        if let Some(super_class) = super_class {
            self.initialize_class(thread, super_class)?;
        }
        for interface in interfaces {
            self.initialize_class(thread, interface)?;
        }

        self.initialize_constant_values(thread, class)?;

        if let Some(clinit) = self.loader.class(class).find_method("<clinit>", "()V") {
            debug!("running <clinit> of {}", self.loader.class(class).name);
            thread.execute_call(self, class, clinit, Vec::new())?;
        }

        self.loader.class_mut(class).status = LinkageStatus::Initialized;
        Ok(())
    }

    /// Copies every `ConstantValue` into its static slot.
    fn initialize_constant_values(&mut self, thread: &mut JavaThread, class: ClassId) -> Result<(), Unwind> {
        let constants: Vec<(usize, u16)> = self
            .loader
            .class(class)
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.is_static())
            .filter_map(|(index, field)| field.constant_value.map(|cv| (index, cv)))
            .collect();

        for (field_index, cv_index) in constants {
            let entry = {
                let class_file = self
                    .loader
                    .class(class)
                    .class_file
                    .as_ref()
                    .expect("statics only exist on instance classes");
                class_file.constant_pool.entry(cv_index).clone()
            };
            let value = match entry {
                CpInfo::Integer(value) => Value::Int(value),
                CpInfo::Float(value) => Value::Float(value),
                CpInfo::Long(value) => Value::Long(value),
                CpInfo::Double(value) => Value::Double(value),
                CpInfo::String { .. } => match self.rcp_string(class, cv_index) {
                    Ok(string) => Value::Reference(string),
                    Err(err) => return Err(thread.throw_vm_error(self, &err)),
                },
                other => {
                    let err = VmError::new(
                        VmErrorKind::Internal,
                        format!("invalid ConstantValue entry {other:?}"),
                    );
                    return Err(thread.throw_vm_error(self, &err));
                }
            };
            self.set_static_field(class, field_index, value);
        }
        Ok(())
    }

    // Allocation. Both paths collect on exhaustion and retry once; a second
    // failure is a genuine OutOfMemoryError.
    //==--------------------------------------------------------------------==

    pub fn allocate_instance(&mut self, thread: &mut JavaThread, class: ClassId) -> Result<ObjRef, VmError> {
        if let Some(instance) = self.heap.try_allocate_instance(&self.loader, class) {
            return Ok(self.after_allocation(thread, instance));
        }
        self.heap.collect(&mut self.loader, Some(thread));
        self.heap
            .try_allocate_instance(&self.loader, class)
            .ok_or_else(|| VmError::new(VmErrorKind::OutOfMemory, "Java heap space"))
    }

    pub fn allocate_array(&mut self, thread: &mut JavaThread, class: ClassId, length: i32) -> Result<ObjRef, VmError> {
        if let Some(array) = self.heap.try_allocate_array(&self.loader, class, length) {
            return Ok(self.after_allocation(thread, array));
        }
        self.heap.collect(&mut self.loader, Some(thread));
        self.heap
            .try_allocate_array(&self.loader, class, length)
            .ok_or_else(|| VmError::new(VmErrorKind::OutOfMemory, "Java heap space"))
    }

    /// In the collect-after-every-allocation diagnostic mode the fresh
    /// object has no reachable reference yet, so it is pinned across the
    /// collection and the relocated handle handed back.
    fn after_allocation(&mut self, thread: &mut JavaThread, fresh: ObjRef) -> ObjRef {
        if !self.heap.gc_after_every_allocation {
            return fresh;
        }
        let pinned = self.heap.pin(fresh);
        self.heap.collect(&mut self.loader, Some(thread));
        pinned.get()
    }

    pub fn run_gc(&mut self, thread: &mut JavaThread) {
        self.heap.collect(&mut self.loader, Some(thread));
    }

    // Mirrors
    //==--------------------------------------------------------------------==

    /// The `java/lang/Class` instance for a class, created in the permanent
    /// region on first request. (Creating mirrors eagerly during prepare
    /// would recurse through the Object/Class cycle.)
    pub fn mirror(&mut self, class: ClassId) -> Result<ObjRef, VmError> {
        if let Some(mirror) = self.loader.class(class).mirror {
            return Ok(mirror);
        }
        let class_class = self.loader.load_class("java/lang/Class")?;
        let mirror = self.heap.allocate_perm_instance(&self.loader, class_class)?;
        self.loader.class_mut(class).mirror = Some(mirror);
        self.mirror_classes.insert(mirror, class);
        Ok(mirror)
    }

    /// Maps a mirror instance back to the class it reflects.
    pub fn class_of_mirror(&self, mirror: ObjRef) -> Option<ClassId> {
        self.mirror_classes.get(&mirror).copied()
    }

    // String interning
    //==--------------------------------------------------------------------==

    /// Interns a string: one permanent `java/lang/String` per distinct
    /// content, with a UTF-16LE `byte[]` behind its `value` field.
    pub fn intern(&mut self, contents: &str) -> Result<ObjRef, VmError> {
        if let Some(existing) = self.heap.interned.get(contents) {
            return Ok(existing);
        }

        let string_class = self.loader.load_class("java/lang/String")?;
        let byte_array_class = self.loader.load_class("[B")?;

        let bytes = string_heap::to_utf16_le_bytes(contents);
        let value_array = self
            .heap
            .allocate_perm_array(&self.loader, byte_array_class, bytes.len() as i32)?;
        self.heap.array_fill_bytes(value_array, &bytes);

        let instance = self.heap.allocate_perm_instance(&self.loader, string_class)?;
        self.set_field(instance, "value", "[B", Value::Reference(value_array));
        // Code unit storage is always UTF-16 here, never compact Latin-1.
        self.set_field(instance, "coder", "B", Value::Int(1));

        self.heap.interned.insert(contents.to_string(), instance);
        Ok(instance)
    }

    /// Reads the character content of a `java/lang/String` instance.
    pub fn string_value(&self, string: ObjRef) -> Option<String> {
        let value = self
            .get_field(string, "value", "[B")?
            .as_reference_opt()
            .filter(|r| !r.is_null())?;
        string_heap::from_utf16_le_bytes(self.heap.array_as_bytes(value))
    }

    // Field access helpers shared by natives and the VM itself
    //==--------------------------------------------------------------------==

    fn instance_field(&self, object: ObjRef, name: &str, descriptor: &str) -> Option<JField> {
        let class = self.heap.class_of(object);
        let (declaring, index) = self.loader.lookup_field(class, name, descriptor)?;
        let field = self.loader.class(declaring).field(index);
        if field.is_static() {
            return None;
        }
        Some(field.clone())
    }

    pub fn get_field(&self, object: ObjRef, name: &str, descriptor: &str) -> Option<Value> {
        let field = self.instance_field(object, name, descriptor)?;
        Some(self.heap.field_value(&field, object))
    }

    pub fn set_field(&mut self, object: ObjRef, name: &str, descriptor: &str, value: Value) -> bool {
        match self.instance_field(object, name, descriptor) {
            Some(field) => {
                self.heap.set_field_value(&field, object, value);
                true
            }
            None => {
                debug!("no instance field {name}:{descriptor} on the target object");
                false
            }
        }
    }

    pub fn set_static_field(&mut self, class: ClassId, field_index: usize, value: Value) {
        let field = self.loader.class(class).field(field_index).clone();
        debug_assert!(field.is_static(), "static store against an instance field");
        let block = &mut self.loader.class_mut(class).static_block;
        crate::heap::write_slot(block, field.offset, &field.ty, value);
    }

    pub fn get_static_field_by_name(&self, class: ClassId, name: &str, descriptor: &str) -> Option<Value> {
        let (declaring, index) = self.loader.lookup_field(class, name, descriptor)?;
        Some(self.heap.static_field_value(&self.loader, declaring, index))
    }

    pub fn set_static_field_by_name(
        &mut self,
        class: ClassId,
        name: &str,
        descriptor: &str,
        value: Value,
    ) -> bool {
        match self.loader.lookup_field(class, name, descriptor) {
            Some((declaring, index)) => {
                self.set_static_field(declaring, index, value);
                true
            }
            None => false,
        }
    }

    // Runtime constant pool resolution
    //==--------------------------------------------------------------------==

    pub fn rcp_class(&mut self, class: ClassId, index: u16) -> Result<ClassId, VmError> {
        if let Some(&cached) = self.loader.class(class).runtime_pool.classes.get(&index) {
            return Ok(cached);
        }
        let name = self.constant_pool_of(class).class_name(index).to_string();
        let resolved = self.loader.load_class(&name)?;
        self.loader
            .class_mut(class)
            .runtime_pool
            .classes
            .insert(index, resolved);
        Ok(resolved)
    }

    pub fn rcp_field(&mut self, class: ClassId, index: u16) -> Result<(ClassId, usize), VmError> {
        if let Some(&cached) = self.loader.class(class).runtime_pool.fields.get(&index) {
            return Ok(cached);
        }
        let (owner_name, field_name, descriptor) = {
            let constant_pool = self.constant_pool_of(class);
            // The operand index comes straight off the unverified bytecode
            // stream, so a wrong tag is a reportable error, not a VM bug.
            let CpInfo::Fieldref {
                class_index,
                name_and_type_index,
            } = constant_pool.entry(index)
            else {
                return Err(VmError::new(
                    VmErrorKind::Internal,
                    format!("constant pool index {index} is not a field reference"),
                ));
            };
            let owner = constant_pool.class_name(*class_index).to_string();
            let (name, descriptor) = constant_pool.name_and_type(*name_and_type_index);
            (owner, name.to_string(), descriptor.to_string())
        };

        let owner = self.loader.load_class(&owner_name)?;
        let resolved = self
            .loader
            .lookup_field(owner, &field_name, &descriptor)
            .ok_or_else(|| VmError::no_such_field(&owner_name, &field_name, &descriptor))?;
        self.loader
            .class_mut(class)
            .runtime_pool
            .fields
            .insert(index, resolved);
        Ok(resolved)
    }

    pub fn rcp_method(&mut self, class: ClassId, index: u16) -> Result<(ClassId, usize), VmError> {
        if let Some(&cached) = self.loader.class(class).runtime_pool.methods.get(&index) {
            return Ok(cached);
        }
        let (owner_name, method_name, descriptor) = {
            let constant_pool = self.constant_pool_of(class);
            // javac freely mixes the two reference kinds for interface
            // targets of invokespecial and invokestatic, so both resolve
            // the same way.
            let (class_index, name_and_type_index) = match constant_pool.entry(index) {
                CpInfo::Methodref {
                    class_index,
                    name_and_type_index,
                }
                | CpInfo::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                } => (*class_index, *name_and_type_index),
                _ => {
                    return Err(VmError::new(
                        VmErrorKind::Internal,
                        format!("constant pool index {index} is not a method reference"),
                    ))
                }
            };
            let owner = constant_pool.class_name(class_index).to_string();
            let (name, descriptor) = constant_pool.name_and_type(name_and_type_index);
            (owner, name.to_string(), descriptor.to_string())
        };

        let owner = self.loader.load_class(&owner_name)?;
        let resolved = self
            .loader
            .lookup_method(owner, &method_name, &descriptor)
            .ok_or_else(|| VmError::no_such_method(&owner_name, &method_name, &descriptor))?;
        self.loader
            .class_mut(class)
            .runtime_pool
            .methods
            .insert(index, resolved);
        Ok(resolved)
    }

    pub fn rcp_string(&mut self, class: ClassId, index: u16) -> Result<ObjRef, VmError> {
        if let Some(&cached) = self.loader.class(class).runtime_pool.strings.get(&index) {
            return Ok(cached);
        }
        let contents = {
            let constant_pool = self.constant_pool_of(class);
            let CpInfo::String { string_index } = constant_pool.entry(index) else {
                return Err(VmError::new(
                    VmErrorKind::Internal,
                    format!("constant pool index {index} is not a string constant"),
                ));
            };
            constant_pool.utf8(*string_index).to_string()
        };
        let interned = self.intern(&contents)?;
        self.loader
            .class_mut(class)
            .runtime_pool
            .strings
            .insert(index, interned);
        Ok(interned)
    }

    fn constant_pool_of(&self, class: ClassId) -> &jclass::constants::ConstantPool {
        &self
            .loader
            .class(class)
            .class_file
            .as_ref()
            .expect("symbolic references resolve against instance classes")
            .constant_pool
    }

    // Entry point
    //==--------------------------------------------------------------------==

    /// Resolves the named class and runs `main([Ljava/lang/String;)V`.
    /// Returns the process exit status: 0 on normal return, 1 when the
    /// class or method cannot be resolved or the main thread dies on an
    /// uncaught exception.
    pub fn run_main(&mut self, main_class_name: &str) -> i32 {
        let binary_name = main_class_name.replace('.', "/");
        let mut thread = JavaThread::new("main");

        self.bootstrap(&mut thread);

        let class = match self.resolve_class(&binary_name) {
            Ok(class) => class,
            Err(err) => {
                eprintln!("Error: Could not find or load main class {main_class_name}");
                debug!("main class resolution failed: {err}");
                return 1;
            }
        };

        if self.initialize_class(&mut thread, class).is_err() {
            if let Some(exception) = thread.clear_exception() {
                thread.report_uncaught(self, exception);
            }
            return 1;
        }

        let main_method = self
            .loader
            .lookup_method(class, "main", "([Ljava/lang/String;)V")
            .filter(|&(declaring, index)| self.loader.class(declaring).method(index).is_static());
        let Some((declaring, index)) = main_method else {
            eprintln!("Error: Main method not found in class {main_class_name}");
            return 1;
        };

        // Program arguments are not forwarded yet; main sees a null array.
        match thread.execute_call(self, declaring, index, vec![Value::NULL]) {
            Ok(_) => 0,
            Err(Unwind) => {
                if let Some(exception) = thread.clear_exception() {
                    thread.report_uncaught(self, exception);
                }
                1
            }
        }
    }

    /// Best-effort VM bootstrap against a real `java.base`: core classes,
    /// the main thread instance, and `System.out` / `System.err` wired to
    /// the host file descriptors. Skipped quietly when the platform
    /// classes are not reachable, so classpath-only workloads (and tests)
    /// run without a bootstrap archive.
    fn bootstrap(&mut self, thread: &mut JavaThread) {
        if self.loader.load_class("java/lang/Object").is_err() {
            debug!("platform classes unavailable; skipping VM bootstrap");
            return;
        }
        if self.try_bootstrap(thread).is_none() {
            warn!("VM bootstrap incomplete; System.out may be unavailable");
            // A half-finished bootstrap leaves a pending exception behind.
            thread.clear_exception();
        }
    }

    fn require_initialized(&mut self, thread: &mut JavaThread, name: &str) -> Option<ClassId> {
        let class = self.loader.load_class(name).ok()?;
        self.initialize_class(thread, class).ok()?;
        Some(class)
    }

    fn try_bootstrap(&mut self, thread: &mut JavaThread) -> Option<()> {
        for name in ["java/lang/Object", "java/lang/Class", "java/lang/String", "java/lang/Throwable"] {
            self.require_initialized(thread, name)?;
        }

        let thread_group_class = self.require_initialized(thread, "java/lang/ThreadGroup")?;
        let group = self.allocate_instance(thread, thread_group_class).ok()?;
        let group_pin = self.heap.pin(group);
        let name = self.intern("main").ok()?;
        self.set_field(group_pin.get(), "name", "Ljava/lang/String;", Value::Reference(name));
        self.set_field(group_pin.get(), "maxPriority", "I", Value::Int(10));

        let thread_class = self.require_initialized(thread, "java/lang/Thread")?;
        let instance = self.allocate_instance(thread, thread_class).ok()?;
        let instance_pin = self.heap.pin(instance);
        let thread_name = self.intern("main").ok()?;
        self.set_field(instance_pin.get(), "name", "Ljava/lang/String;", Value::Reference(thread_name));
        self.set_field(
            instance_pin.get(),
            "group",
            "Ljava/lang/ThreadGroup;",
            Value::Reference(group_pin.get()),
        );
        self.set_field(instance_pin.get(), "priority", "I", Value::Int(10));
        thread.instance = Some(instance_pin.get());

        self.require_initialized(thread, "java/lang/System")?;
        let fd_class = self.require_initialized(thread, "java/io/FileDescriptor")?;
        let fos_class = self.require_initialized(thread, "java/io/FileOutputStream")?;
        let buffered_class = self.require_initialized(thread, "java/io/BufferedOutputStream")?;
        let ps_class = self.require_initialized(thread, "java/io/PrintStream")?;
        let system_class = self.loader.lookup("java/lang/System")?;

        for (fd_name, stream_name, stream_descriptor) in [
            ("out", "out", "Ljava/io/PrintStream;"),
            ("err", "err", "Ljava/io/PrintStream;"),
        ] {
            let descriptor = self
                .get_static_field_by_name(fd_class, fd_name, "Ljava/io/FileDescriptor;")?
                .as_reference();
            if descriptor.is_null() {
                return None;
            }

            let fos = self.allocate_instance(thread, fos_class).ok()?;
            let fos_pin = self.heap.pin(fos);
            self.set_field(fos_pin.get(), "fd", "Ljava/io/FileDescriptor;", Value::Reference(descriptor));
            self.set_field(fos_pin.get(), "append", "Z", Value::Int(0));

            let buffered = self.allocate_instance(thread, buffered_class).ok()?;
            let buffered_pin = self.heap.pin(buffered);
            let (ctor_class, ctor) =
                self.loader.lookup_method(buffered_class, "<init>", "(Ljava/io/OutputStream;)V")?;
            thread
                .execute_call(
                    self,
                    ctor_class,
                    ctor,
                    vec![Value::Reference(buffered_pin.get()), Value::Reference(fos_pin.get())],
                )
                .ok()?;

            let stream = self.allocate_instance(thread, ps_class).ok()?;
            let stream_pin = self.heap.pin(stream);
            let (ctor_class, ctor) =
                self.loader.lookup_method(ps_class, "<init>", "(ZLjava/io/OutputStream;)V")?;
            thread
                .execute_call(
                    self,
                    ctor_class,
                    ctor,
                    vec![
                        Value::Reference(stream_pin.get()),
                        Value::Int(1),
                        Value::Reference(buffered_pin.get()),
                    ],
                )
                .ok()?;

            self.set_static_field_by_name(
                system_class,
                stream_name,
                stream_descriptor,
                Value::Reference(stream_pin.get()),
            );
        }

        Some(())
    }
}
