//! Natives under `jdk.internal`: the subset of `Unsafe` the platform
//! classes use during bootstrap, the CDS and Signal stubs, caller-class
//! reflection and the raw system properties.

use std::sync::atomic::{fence, Ordering};

use super::{noop, NativeMethodRegistry};
use crate::class::field_width;
use crate::thread::JavaThread;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

pub(super) fn register(registry: &mut NativeMethodRegistry) {
    // jdk.internal.misc.Unsafe
    registry.register("jdk/internal/misc/Unsafe", "registerNatives", "()V", noop);
    registry.register("jdk/internal/misc/Unsafe", "arrayBaseOffset0", "(Ljava/lang/Class;)I", unsafe_array_base_offset);
    registry.register("jdk/internal/misc/Unsafe", "arrayIndexScale0", "(Ljava/lang/Class;)I", unsafe_array_index_scale);
    registry.register(
        "jdk/internal/misc/Unsafe",
        "objectFieldOffset1",
        "(Ljava/lang/Class;Ljava/lang/String;)J",
        unsafe_object_field_offset,
    );
    registry.register("jdk/internal/misc/Unsafe", "storeFence", "()V", unsafe_store_fence);
    registry.register(
        "jdk/internal/misc/Unsafe",
        "compareAndSetInt",
        "(Ljava/lang/Object;JII)Z",
        unsafe_compare_and_set_int,
    );
    registry.register(
        "jdk/internal/misc/Unsafe",
        "compareAndSetLong",
        "(Ljava/lang/Object;JJJ)Z",
        unsafe_compare_and_set_long,
    );
    registry.register(
        "jdk/internal/misc/Unsafe",
        "compareAndSetReference",
        "(Ljava/lang/Object;JLjava/lang/Object;Ljava/lang/Object;)Z",
        unsafe_compare_and_set_reference,
    );
    registry.register(
        "jdk/internal/misc/Unsafe",
        "getReferenceVolatile",
        "(Ljava/lang/Object;J)Ljava/lang/Object;",
        unsafe_get_reference_volatile,
    );
    registry.register(
        "jdk/internal/misc/Unsafe",
        "getIntVolatile",
        "(Ljava/lang/Object;J)I",
        unsafe_get_int_volatile,
    );

    // jdk.internal.misc.CDS: class-data sharing is always off.
    registry.register("jdk/internal/misc/CDS", "isDumpingClassList0", "()Z", report_false);
    registry.register("jdk/internal/misc/CDS", "isDumpingArchive0", "()Z", report_false);
    registry.register("jdk/internal/misc/CDS", "isSharingEnabled0", "()Z", report_false);
    registry.register("jdk/internal/misc/CDS", "initializeFromArchive", "(Ljava/lang/Class;)V", noop);
    registry.register("jdk/internal/misc/CDS", "getRandomSeedForDumping", "()J", report_zero_long);

    // jdk.internal.misc.Signal
    registry.register("jdk/internal/misc/Signal", "findSignal0", "(Ljava/lang/String;)I", signal_find);
    registry.register("jdk/internal/misc/Signal", "handle0", "(IJ)J", report_zero_long);

    // jdk.internal.reflect.Reflection
    registry.register(
        "jdk/internal/reflect/Reflection",
        "getCallerClass",
        "()Ljava/lang/Class;",
        reflection_get_caller_class,
    );

    // jdk.internal.util.SystemProps$Raw
    registry.register(
        "jdk/internal/util/SystemProps$Raw",
        "platformProperties",
        "()[Ljava/lang/String;",
        raw_platform_properties,
    );
    registry.register(
        "jdk/internal/util/SystemProps$Raw",
        "vmProperties",
        "()[Ljava/lang/String;",
        raw_vm_properties,
    );
}

fn report_false(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    Some(Value::Int(0))
}

fn report_zero_long(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    Some(Value::Long(0))
}

fn signal_find(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    Some(Value::Int(-1))
}

/// Array payloads start at offset zero in this object model.
fn unsafe_array_base_offset(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    Some(Value::Int(0))
}

fn unsafe_array_index_scale(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let mirror = args[1].as_reference();
    let scale = vm
        .class_of_mirror(mirror)
        .and_then(|class| vm.loader.class(class).component_type().map(field_width))
        .unwrap_or(8);
    Some(Value::Int(scale as i32))
}

fn unsafe_object_field_offset(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let mirror = args[1].as_reference();
    let name = args[2].as_reference();

    let offset = vm.class_of_mirror(mirror).and_then(|class| {
        let field_name = vm.string_value(name)?;
        let record = vm.loader.class(class);
        let index = record.find_field_by_name(&field_name)?;
        Some(record.field(index).offset as i64)
    });
    Some(Value::Long(offset.unwrap_or(-1)))
}

fn unsafe_store_fence(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    fence(Ordering::Acquire);
    None
}

// The compare-and-set family operates on the raw slot named by the offset,
// which is how `objectFieldOffset` hands field positions back to Java code.
// Execution is single-threaded (§5), so plain read/compare/write is
// sequentially consistent by construction.

fn unsafe_compare_and_set_int(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let object = args[1].as_reference();
    let offset = args[2].as_long() as usize;
    let expected = args[3].as_int();
    let desired = args[4].as_int();

    if vm.heap.read_i32_at(object, offset) == expected {
        vm.heap.write_i32_at(object, offset, desired);
        return Some(Value::Int(1));
    }
    Some(Value::Int(0))
}

fn unsafe_compare_and_set_long(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let object = args[1].as_reference();
    let offset = args[2].as_long() as usize;
    let expected = args[3].as_long();
    let desired = args[4].as_long();

    if vm.heap.read_i64_at(object, offset) == expected {
        vm.heap.write_i64_at(object, offset, desired);
        return Some(Value::Int(1));
    }
    Some(Value::Int(0))
}

fn unsafe_compare_and_set_reference(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let object = args[1].as_reference();
    let offset = args[2].as_long() as usize;
    let expected = args[3].as_reference();
    let desired = args[4].as_reference();

    if vm.heap.read_ref_at(object, offset) == expected {
        vm.heap.write_ref_at(object, offset, desired);
        return Some(Value::Int(1));
    }
    Some(Value::Int(0))
}

fn unsafe_get_reference_volatile(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let object = args[1].as_reference();
    let offset = args[2].as_long() as usize;
    Some(Value::Reference(vm.heap.read_ref_at(object, offset)))
}

fn unsafe_get_int_volatile(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let object = args[1].as_reference();
    let offset = args[2].as_long() as usize;
    Some(Value::Int(vm.heap.read_i32_at(object, offset)))
}

/// The class of the caller of the method calling this native: below the
/// native frame sits the method that invoked `getCallerClass`, and below
/// that its caller.
fn reflection_get_caller_class(vm: &mut Vm, thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    let caller = thread
        .frames
        .len()
        .checked_sub(3)
        .map(|index| thread.frames[index].class);
    let Some(caller) = caller else {
        return Some(Value::NULL);
    };
    match vm.mirror(caller) {
        Ok(mirror) => Some(Value::Reference(mirror)),
        Err(err) => {
            thread.throw_vm_error(vm, &err);
            None
        }
    }
}

fn intern_into(vm: &mut Vm, array: ObjRef, index: i32, contents: &str) {
    if let Ok(interned) = vm.intern(contents) {
        vm.heap.array_set(&vm.loader, array, index, Value::Reference(interned));
    }
}

/// The fixed-index property table `java.lang.System` reads during
/// `initPhase1`; only the entries the platform code insists on are filled.
fn raw_platform_properties(vm: &mut Vm, thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    let raw_class = vm.loader.lookup("jdk/internal/util/SystemProps$Raw")?;
    let length = vm
        .get_static_field_by_name(raw_class, "FIXED_LENGTH", "I")?
        .as_int();

    let array_class = match vm.loader.load_class("[Ljava/lang/String;") {
        Ok(class) => class,
        Err(err) => {
            thread.throw_vm_error(vm, &err);
            return None;
        }
    };
    let array = match vm.allocate_array(thread, array_class, length) {
        Ok(array) => array,
        Err(err) => {
            thread.throw_vm_error(vm, &err);
            return None;
        }
    };
    let pinned = vm.heap.pin(array);

    let temp_dir = std::env::temp_dir().to_string_lossy().into_owned();
    intern_into(vm, pinned.get(), 4, "UTF-8"); // native.encoding
    intern_into(vm, pinned.get(), 5, "/"); // file.separator
    intern_into(vm, pinned.get(), 18, &temp_dir); // java.io.tmpdir
    intern_into(vm, pinned.get(), 19, "\n"); // line.separator
    intern_into(vm, pinned.get(), 23, ":"); // path.separator
    intern_into(vm, pinned.get(), 36, &temp_dir); // user.dir
    intern_into(vm, pinned.get(), 37, &temp_dir); // user.home
    intern_into(vm, pinned.get(), 38, "user"); // user.name

    Some(Value::Reference(pinned.get()))
}

/// Key/value pairs of the VM properties; `java.home` comes from the
/// `JDK17_PATH` environment variable.
fn raw_vm_properties(vm: &mut Vm, thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    let array_class = match vm.loader.load_class("[Ljava/lang/String;") {
        Ok(class) => class,
        Err(err) => {
            thread.throw_vm_error(vm, &err);
            return None;
        }
    };
    let array = match vm.allocate_array(thread, array_class, 2) {
        Ok(array) => array,
        Err(err) => {
            thread.throw_vm_error(vm, &err);
            return None;
        }
    };
    let pinned = vm.heap.pin(array);

    let java_home = std::env::var("JDK17_PATH").unwrap_or_default();
    intern_into(vm, pinned.get(), 0, "java.home");
    intern_into(vm, pinned.get(), 1, &java_home);

    Some(Value::Reference(pinned.get()))
}
