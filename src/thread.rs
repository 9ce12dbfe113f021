//! The per-thread call stack, invocation paths and the exception model.

use log::{debug, warn};

use crate::errors::{Unwind, VmError, VmErrorKind};
use crate::frame::Frame;
use crate::class::ClassId;
use crate::interpreter;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

/// A Java thread: an ordered chain of frames, the pending exception that
/// drives unwinding, and the `java/lang/Thread` instance mirroring it (when
/// the platform classes are available).
pub struct JavaThread {
    pub name: String,
    pub frames: Vec<Frame>,
    pub pending_exception: Option<ObjRef>,
    pub instance: Option<ObjRef>,
}

impl JavaThread {
    pub fn new(name: &str) -> JavaThread {
        JavaThread {
            name: name.to_string(),
            frames: Vec::new(),
            pending_exception: None,
            instance: None,
        }
    }

    pub fn frame(&self) -> &Frame {
        self.frames.last().expect("no active frame")
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    // Invocation
    //==--------------------------------------------------------------------==

    /// Runs a method with already-shuffled arguments. Arguments land in the
    /// low local-variable slots, category-2 values occupying two each. The
    /// frame is pushed here and popped on every exit path; `Err` means the
    /// callee left a pending exception behind for the caller to handle.
    pub fn execute_call(
        &mut self,
        vm: &mut Vm,
        class: ClassId,
        method_index: usize,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Unwind> {
        let (is_native, name, descriptor, code) = {
            let method = vm.loader.class(class).method(method_index);
            (
                method.is_native(),
                method.name.clone(),
                method.descriptor.clone(),
                method.code.clone(),
            )
        };

        if is_native {
            return self.execute_native(vm, class, method_index, &name, &descriptor, args);
        }

        let Some(code) = code else {
            let class_name = vm.loader.class(class).name.clone();
            return Err(self.throw_by_name(
                vm,
                "java/lang/InternalError",
                &format!("attempted to run {class_name}.{name}{descriptor} without code"),
            ));
        };

        let mut frame = Frame::new(class, method_index, code);
        let mut slot = 0u16;
        for arg in args {
            frame.store(slot, arg);
            slot += if arg.is_category_two() { 2 } else { 1 };
        }
        self.frames.push(frame);

        let result = interpreter::interpret(vm, self);
        self.frames.pop();
        result
    }

    fn execute_native(
        &mut self,
        vm: &mut Vm,
        class: ClassId,
        method_index: usize,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Unwind> {
        let class_name = vm.loader.class(class).name.clone();
        let Some(handler) = vm.natives.lookup(&class_name, name, descriptor) else {
            let signature = format!("{}.{name}{descriptor}", class_name.replace('/', "."));
            debug!("no native handler registered for {signature}");
            return Err(self.throw_vm_error(
                vm,
                &VmError::new(VmErrorKind::UnsatisfiedLink, signature),
            ));
        };

        // Native methods still get a frame so that the caller-sensitive
        // natives and stack traces see them.
        self.frames
            .push(Frame::new(class, method_index, std::rc::Rc::default()));
        let result = handler(vm, self, &args);
        self.frames.pop();

        match self.pending_exception {
            Some(_) => Err(Unwind),
            None => Ok(result),
        }
    }

    /// Argument shuffle at an `invoke*` site: pops one operand per declared
    /// parameter (plus the receiver for instance methods) off the current
    /// frame, reverses them into argument order, runs the call, and pushes
    /// the result back. A pending exception is left for the caller's
    /// handler search.
    pub fn invoke(&mut self, vm: &mut Vm, class: ClassId, method_index: usize) {
        let (param_count, is_static) = {
            let method = vm.loader.class(class).method(method_index);
            (method.parsed.parameters.len(), method.is_static())
        };

        let frame = self.frame_mut();
        let mut args = Vec::with_capacity(param_count + 1);
        for _ in 0..param_count {
            args.push(frame.pop());
        }
        if !is_static {
            args.push(frame.pop());
        }
        args.reverse();

        if let Ok(Some(value)) = self.execute_call(vm, class, method_index, args) {
            self.frame_mut().push(value);
        }
    }

    // Exceptions
    //==--------------------------------------------------------------------==

    /// Enters unwind mode with an already-constructed exception instance.
    pub fn throw(&mut self, exception: ObjRef) -> Unwind {
        if self.pending_exception.is_some() {
            warn!("throwing while an exception is already pending; replacing it");
        }
        self.pending_exception = Some(exception);
        Unwind
    }

    pub fn clear_exception(&mut self) -> Option<ObjRef> {
        self.pending_exception.take()
    }

    /// Builds and throws an instance of the named exception class with the
    /// given detail message.
    pub fn throw_by_name(&mut self, vm: &mut Vm, class_name: &str, message: &str) -> Unwind {
        match self.make_exception(vm, class_name, message) {
            Ok(exception) => self.throw(exception),
            // The exception class itself failed to initialize; its failure
            // is already pending.
            Err(unwind) => unwind,
        }
    }

    /// Raises the Java exception corresponding to a VM-level failure.
    pub fn throw_vm_error(&mut self, vm: &mut Vm, error: &VmError) -> Unwind {
        self.throw_by_name(vm, error.exception_class(), error.message())
    }

    fn make_exception(
        &mut self,
        vm: &mut Vm,
        class_name: &str,
        message: &str,
    ) -> Result<ObjRef, Unwind> {
        let class = match vm.loader.load_class(class_name) {
            Ok(class) => class,
            Err(err) => {
                // Without the exception class there is no Java-level way to
                // report anything; this is a broken bootstrap environment.
                panic!("cannot raise {class_name}: {err}");
            }
        };
        vm.initialize_class(self, class)?;

        let exception = match vm.allocate_instance(self, class) {
            Ok(exception) => exception,
            Err(err) => {
                assert!(
                    class_name != "java/lang/OutOfMemoryError",
                    "heap exhausted while raising OutOfMemoryError"
                );
                return Err(self.throw_vm_error(vm, &err));
            }
        };

        // Building the stack trace allocates; keep the exception pinned so
        // a collection in the middle cannot invalidate it.
        let pinned = vm.heap.pin(exception);

        if let Ok(message_ref) = vm.intern(message) {
            vm.set_field(pinned.get(), "detailMessage", "Ljava/lang/String;", Value::Reference(message_ref));
        }
        if let Some(trace) = self.create_stack_trace(vm) {
            vm.set_field(
                pinned.get(),
                "stackTrace",
                "[Ljava/lang/StackTraceElement;",
                Value::Reference(trace),
            );
        }

        Ok(pinned.get())
    }

    /// Builds a `StackTraceElement[]` describing the current call stack,
    /// topmost frame first, skipping the exception-construction frames
    /// (everything assignable to `Throwable` at the top of the stack).
    ///
    /// Returns `None` when the platform classes are not available; callers
    /// degrade to exceptions without a backtrace.
    pub fn create_stack_trace(&mut self, vm: &mut Vm) -> Option<ObjRef> {
        let element_class = vm.loader.load_class("java/lang/StackTraceElement").ok()?;
        let array_class = vm.loader.load_class("[Ljava/lang/StackTraceElement;").ok()?;
        let throwable_class = vm.loader.load_class("java/lang/Throwable").ok()?;

        let mut include = false;
        let mut frames: Vec<(ClassId, usize, u64)> = Vec::new();
        for frame in self.frames.iter().rev() {
            if !include && !vm.loader.is_instance_of(frame.class, throwable_class) {
                include = true;
            }
            if include {
                frames.push((frame.class, frame.method_index, frame.pc));
            }
        }

        let array = vm
            .allocate_array(self, array_class, frames.len() as i32)
            .ok()?;
        // Pinned so the elements allocated below cannot invalidate it.
        let pinned = vm.heap.pin(array);

        for (index, (class, method_index, pc)) in frames.iter().enumerate() {
            let element = vm.allocate_instance(self, element_class).ok()?;

            let class_record = vm.loader.class(*class);
            let declaring = class_record.java_name();
            let method = class_record.method(*method_index);
            let method_name = method.name.clone();
            let line = method
                .code
                .as_ref()
                .and_then(|code| code.line_number_table())
                .and_then(|table| {
                    table
                        .iter()
                        .take_while(|entry| entry.start_pc as u64 <= *pc)
                        .last()
                })
                .map(|entry| entry.line_number as i32);

            if let Ok(name_ref) = vm.intern(&declaring) {
                vm.set_field(element, "declaringClass", "Ljava/lang/String;", Value::Reference(name_ref));
            }
            if let Ok(name_ref) = vm.intern(&method_name) {
                vm.set_field(element, "methodName", "Ljava/lang/String;", Value::Reference(name_ref));
            }
            if let Some(line) = line {
                vm.set_field(element, "lineNumber", "I", Value::Int(line));
            }

            let array = pinned.get();
            vm.heap.array_set(&vm.loader, array, index as i32, Value::Reference(element));
        }

        Some(pinned.get())
    }

    /// Prints the uncaught-exception report the main thread emits before
    /// the process exits: `Exception <class>: '<message>'` followed by one
    /// line per stack trace element.
    pub fn report_uncaught(&mut self, vm: &mut Vm, exception: ObjRef) {
        let class_name = vm.loader.class(vm.heap.class_of(exception)).java_name();
        let message = vm
            .get_field(exception, "detailMessage", "Ljava/lang/String;")
            .and_then(Value::as_reference_opt)
            .filter(|r| !r.is_null())
            .and_then(|r| vm.string_value(r))
            .unwrap_or_default();

        eprintln!("Exception {class_name}: '{message}'");

        let trace = vm
            .get_field(exception, "stackTrace", "[Ljava/lang/StackTraceElement;")
            .and_then(Value::as_reference_opt)
            .filter(|r| !r.is_null())
            .or_else(|| {
                vm.get_field(exception, "backtrace", "Ljava/lang/Object;")
                    .and_then(Value::as_reference_opt)
                    .filter(|r| !r.is_null())
            });

        let Some(trace) = trace else {
            return;
        };
        for index in 0..vm.heap.array_length(trace) {
            let element = vm.heap.array_get(&vm.loader, trace, index).as_reference();
            if element.is_null() {
                continue;
            }
            let declaring = vm
                .get_field(element, "declaringClass", "Ljava/lang/String;")
                .and_then(Value::as_reference_opt)
                .filter(|r| !r.is_null())
                .and_then(|r| vm.string_value(r))
                .unwrap_or_else(|| "<unknown>".to_string());
            let method = vm
                .get_field(element, "methodName", "Ljava/lang/String;")
                .and_then(Value::as_reference_opt)
                .filter(|r| !r.is_null())
                .and_then(|r| vm.string_value(r))
                .unwrap_or_else(|| "<unknown>".to_string());
            eprintln!("  at {declaring}.{method}");
        }
    }
}
