//! The native-method bridge.
//!
//! The core consumes natives through a lookup capability keyed by
//! `(class name, method name, descriptor)`; a handle is a plain function of
//! `(vm, thread, args)` returning the optional result value. Handles raise
//! Java exceptions by setting the thread's pending exception, exactly like
//! interpreted code.
//!
//! The built-in set registered by [`register_builtins`] covers what the
//! platform classes need during early bootstrap plus the `org.geevm.util`
//! test-support printer. Tests and embedders can register more.

use std::collections::HashMap;

use crate::thread::JavaThread;
use crate::value::Value;
use crate::vm::Vm;

mod geevm_util;
mod java_io;
mod java_lang;
mod jdk_internal;

/// A registered native implementation.
pub type NativeHandle = fn(&mut Vm, &mut JavaThread, &[Value]) -> Option<Value>;

#[derive(Default)]
pub struct NativeMethodRegistry {
    methods: HashMap<(String, String, String), NativeHandle>,
}

impl NativeMethodRegistry {
    pub fn register(&mut self, class: &str, name: &str, descriptor: &str, handle: NativeHandle) {
        self.methods
            .insert((class.to_string(), name.to_string(), descriptor.to_string()), handle);
    }

    pub fn lookup(&self, class: &str, name: &str, descriptor: &str) -> Option<NativeHandle> {
        self.methods
            .get(&(class.to_string(), name.to_string(), descriptor.to_string()))
            .copied()
    }
}

/// Shared no-op body for the various `registerNatives` and init hooks.
pub(crate) fn noop(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    None
}

pub fn register_builtins(registry: &mut NativeMethodRegistry) {
    java_lang::register(registry);
    java_io::register(registry);
    jdk_internal::register(registry);
    geevm_util::register(registry);
}
