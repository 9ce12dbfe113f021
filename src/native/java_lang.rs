//! Natives of the `java.lang` classes.

use log::warn;

use super::{noop, NativeMethodRegistry};
use crate::thread::JavaThread;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

pub(super) fn register(registry: &mut NativeMethodRegistry) {
    // java.lang.Object
    registry.register("java/lang/Object", "registerNatives", "()V", noop);
    registry.register("java/lang/Object", "hashCode", "()I", object_hash_code);
    registry.register("java/lang/Object", "getClass", "()Ljava/lang/Class;", object_get_class);
    registry.register("java/lang/Object", "notifyAll", "()V", noop);
    registry.register("java/lang/Object", "wait", "()V", noop);
    registry.register("java/lang/Object", "wait", "(J)V", noop);

    // java.lang.System
    registry.register("java/lang/System", "registerNatives", "()V", noop);
    registry.register(
        "java/lang/System",
        "initProperties",
        "(Ljava/util/Properties;)Ljava/util/Properties;",
        system_init_properties,
    );
    registry.register("java/lang/System", "nanoTime", "()J", system_nano_time);
    registry.register(
        "java/lang/System",
        "arraycopy",
        "(Ljava/lang/Object;ILjava/lang/Object;II)V",
        system_arraycopy,
    );
    registry.register("java/lang/System", "identityHashCode", "(Ljava/lang/Object;)I", system_identity_hash);
    registry.register("java/lang/System", "setIn0", "(Ljava/io/InputStream;)V", system_set_in0);
    registry.register("java/lang/System", "setOut0", "(Ljava/io/PrintStream;)V", system_set_out0);
    registry.register("java/lang/System", "setErr0", "(Ljava/io/PrintStream;)V", system_set_err0);

    // java.lang.Class
    registry.register("java/lang/Class", "registerNatives", "()V", noop);
    registry.register(
        "java/lang/Class",
        "getPrimitiveClass",
        "(Ljava/lang/String;)Ljava/lang/Class;",
        class_get_primitive_class,
    );
    registry.register(
        "java/lang/Class",
        "desiredAssertionStatus0",
        "(Ljava/lang/Class;)Z",
        class_desired_assertion_status,
    );
    registry.register("java/lang/Class", "isPrimitive", "()Z", class_is_primitive);
    registry.register("java/lang/Class", "getName0", "()Ljava/lang/String;", class_name0);
    registry.register("java/lang/Class", "initClassName", "()Ljava/lang/String;", class_init_name);
    registry.register(
        "java/lang/Class",
        "forName0",
        "(Ljava/lang/String;ZLjava/lang/ClassLoader;Ljava/lang/Class;)Ljava/lang/Class;",
        class_for_name0,
    );

    // java.lang.Float / java.lang.Double
    registry.register("java/lang/Float", "floatToRawIntBits", "(F)I", float_to_raw_int_bits);
    registry.register("java/lang/Float", "intBitsToFloat", "(I)F", int_bits_to_float);
    registry.register("java/lang/Double", "doubleToRawLongBits", "(D)J", double_to_raw_long_bits);
    registry.register("java/lang/Double", "longBitsToDouble", "(J)D", long_bits_to_double);

    // java.lang.Thread
    registry.register("java/lang/Thread", "registerNatives", "()V", noop);
    registry.register("java/lang/Thread", "currentThread", "()Ljava/lang/Thread;", thread_current);
    registry.register("java/lang/Thread", "setPriority0", "(I)V", noop);
    registry.register("java/lang/Thread", "isAlive", "()Z", thread_is_alive);
    registry.register("java/lang/Thread", "start0", "()V", thread_start0);

    // java.lang.Throwable
    registry.register(
        "java/lang/Throwable",
        "fillInStackTrace",
        "(I)Ljava/lang/Throwable;",
        throwable_fill_in_stack_trace,
    );
    registry.register("java/lang/Throwable", "getStackTraceDepth", "()I", throwable_stack_trace_depth);
    registry.register(
        "java/lang/Throwable",
        "getStackTraceElement",
        "(I)Ljava/lang/StackTraceElement;",
        throwable_stack_trace_element,
    );

    // java.lang.Runtime / java.lang.String
    registry.register("java/lang/Runtime", "availableProcessors", "()I", runtime_available_processors);
    registry.register("java/lang/String", "intern", "()Ljava/lang/String;", string_intern);
    registry.register("java/lang/StringUTF16", "isBigEndian", "()Z", string_utf16_is_big_endian);
}

fn object_hash_code(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let object = args[0].as_reference();
    Some(Value::Int(vm.heap.identity_hash(object)))
}

fn object_get_class(vm: &mut Vm, thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let object = args[0].as_reference();
    let class = vm.heap.class_of(object);
    match vm.mirror(class) {
        Ok(mirror) => Some(Value::Reference(mirror)),
        Err(err) => {
            thread.throw_vm_error(vm, &err);
            None
        }
    }
}

fn system_init_properties(_vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    Some(args[0])
}

fn system_nano_time(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_nanos() as i64)
        .unwrap_or(0);
    Some(Value::Long(nanos))
}

fn system_identity_hash(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let object = args[0].as_reference();
    if object.is_null() {
        return Some(Value::Int(0));
    }
    Some(Value::Int(vm.heap.identity_hash(object)))
}

fn system_arraycopy(vm: &mut Vm, thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let src = args[0].as_reference();
    let src_pos = args[1].as_int();
    let dest = args[2].as_reference();
    let dest_pos = args[3].as_int();
    let length = args[4].as_int();

    if src.is_null() || dest.is_null() {
        thread.throw_by_name(vm, "java/lang/NullPointerException", "arraycopy");
        return None;
    }
    let src_len = vm.heap.array_length(src);
    let dest_len = vm.heap.array_length(dest);
    if length < 0
        || src_pos < 0
        || dest_pos < 0
        || src_pos as i64 + length as i64 > src_len as i64
        || dest_pos as i64 + length as i64 > dest_len as i64
    {
        thread.throw_by_name(vm, "java/lang/ArrayIndexOutOfBoundsException", "arraycopy");
        return None;
    }

    // Copy out first so overlapping ranges behave.
    let values: Vec<Value> = (0..length)
        .map(|index| vm.heap.array_get(&vm.loader, src, src_pos + index))
        .collect();
    for (index, value) in values.into_iter().enumerate() {
        vm.heap.array_set(&vm.loader, dest, dest_pos + index as i32, value);
    }
    None
}

fn set_system_stream(vm: &mut Vm, field: &str, descriptor: &str, value: Value) {
    if let Some(system) = vm.loader.lookup("java/lang/System") {
        vm.set_static_field_by_name(system, field, descriptor, value);
    }
}

fn system_set_in0(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    set_system_stream(vm, "in", "Ljava/io/InputStream;", args[0]);
    None
}

fn system_set_out0(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    set_system_stream(vm, "out", "Ljava/io/PrintStream;", args[0]);
    None
}

fn system_set_err0(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    set_system_stream(vm, "err", "Ljava/io/PrintStream;", args[0]);
    None
}

/// The wrapper class reflecting each primitive name. `char` maps to
/// `java/lang/Character`, matching the Java naming.
const PRIMITIVE_CLASSES: &[(&str, &str)] = &[
    ("boolean", "java/lang/Boolean"),
    ("byte", "java/lang/Byte"),
    ("char", "java/lang/Character"),
    ("short", "java/lang/Short"),
    ("int", "java/lang/Integer"),
    ("long", "java/lang/Long"),
    ("float", "java/lang/Float"),
    ("double", "java/lang/Double"),
];

fn class_get_primitive_class(vm: &mut Vm, thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let name = args[0].as_reference();
    let Some(contents) = vm.string_value(name) else {
        thread.throw_by_name(vm, "java/lang/InternalError", "getPrimitiveClass on a non-string");
        return None;
    };
    let Some(&(_, class_name)) = PRIMITIVE_CLASSES.iter().find(|&&(n, _)| n == contents) else {
        let message = format!("unknown primitive type {contents}");
        thread.throw_by_name(vm, "java/lang/InternalError", &message);
        return None;
    };
    let class = match vm.loader.load_class(class_name) {
        Ok(class) => class,
        Err(err) => {
            thread.throw_vm_error(vm, &err);
            return None;
        }
    };
    match vm.mirror(class) {
        Ok(mirror) => Some(Value::Reference(mirror)),
        Err(err) => {
            thread.throw_vm_error(vm, &err);
            None
        }
    }
}

fn class_desired_assertion_status(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    Some(Value::Int(0))
}

fn class_is_primitive(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let mirror = args[0].as_reference();
    let result = vm
        .class_of_mirror(mirror)
        .map(|class| {
            let name = vm.loader.class(class).name.as_str();
            PRIMITIVE_CLASSES.iter().any(|&(_, wrapper)| wrapper == name)
        })
        .unwrap_or(false);
    Some(Value::Int(result as i32))
}

fn mirror_name(vm: &mut Vm, thread: &mut JavaThread, mirror: ObjRef) -> Option<ObjRef> {
    let class = vm.class_of_mirror(mirror)?;
    let dotted = vm.loader.class(class).java_name();
    match vm.intern(&dotted) {
        Ok(interned) => Some(interned),
        Err(err) => {
            thread.throw_vm_error(vm, &err);
            None
        }
    }
}

fn class_name0(vm: &mut Vm, thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let mirror = args[0].as_reference();
    mirror_name(vm, thread, mirror).map(Value::Reference)
}

fn class_init_name(vm: &mut Vm, thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let mirror = args[0].as_reference();
    let name = mirror_name(vm, thread, mirror)?;
    vm.set_field(mirror, "name", "Ljava/lang/String;", Value::Reference(name));
    Some(Value::Reference(name))
}

fn class_for_name0(vm: &mut Vm, thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let name = args[0].as_reference();
    let initialize = args[1].as_int() != 0;
    // args[2] is the class loader; only the bootstrap loader exists.

    let Some(contents) = vm.string_value(name) else {
        thread.throw_by_name(vm, "java/lang/NullPointerException", "forName(null)");
        return None;
    };
    let binary_name = contents.replace('.', "/");
    let class = match vm.loader.load_class(&binary_name) {
        Ok(class) => class,
        Err(err) => {
            thread.throw_vm_error(vm, &err);
            return None;
        }
    };
    if initialize && vm.initialize_class(thread, class).is_err() {
        return None;
    }
    match vm.mirror(class) {
        Ok(mirror) => Some(Value::Reference(mirror)),
        Err(err) => {
            thread.throw_vm_error(vm, &err);
            None
        }
    }
}

fn float_to_raw_int_bits(_vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    Some(Value::Int(args[0].as_float().to_bits() as i32))
}

fn int_bits_to_float(_vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    Some(Value::Float(f32::from_bits(args[0].as_int() as u32)))
}

fn double_to_raw_long_bits(_vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    Some(Value::Long(args[0].as_double().to_bits() as i64))
}

fn long_bits_to_double(_vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    Some(Value::Double(f64::from_bits(args[0].as_long() as u64)))
}

fn thread_current(_vm: &mut Vm, thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    Some(Value::Reference(thread.instance.unwrap_or(ObjRef::NULL)))
}

fn thread_is_alive(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    Some(Value::Int(0))
}

/// Threads are scheduled cooperatively: `start0` runs the target's `run()`
/// to completion on the caller's stack. An exception escaping `run` kills
/// only that logical thread, so it is reported and swallowed here.
fn thread_start0(vm: &mut Vm, thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let target = args[0].as_reference();
    let class = vm.heap.class_of(target);
    let Some((declaring, index)) = vm.loader.lookup_method(class, "run", "()V") else {
        thread.throw_by_name(vm, "java/lang/NoSuchMethodError", "run()V");
        return None;
    };
    if thread
        .execute_call(vm, declaring, index, vec![Value::Reference(target)])
        .is_err()
    {
        if let Some(exception) = thread.clear_exception() {
            thread.report_uncaught(vm, exception);
        }
    }
    None
}

fn throwable_fill_in_stack_trace(vm: &mut Vm, thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let throwable = args[0].as_reference();
    let pinned = vm.heap.pin(throwable);
    let Some(trace) = thread.create_stack_trace(vm) else {
        warn!("stack trace classes unavailable; fillInStackTrace is a no-op");
        return Some(Value::Reference(pinned.get()));
    };

    let throwable = pinned.get();
    vm.set_field(throwable, "backtrace", "Ljava/lang/Object;", Value::Reference(trace));
    vm.set_field(throwable, "stackTrace", "[Ljava/lang/StackTraceElement;", Value::NULL);
    let depth = vm.heap.array_length(trace);
    vm.set_field(throwable, "depth", "I", Value::Int(depth));
    Some(Value::Reference(throwable))
}

fn backtrace_of(vm: &Vm, throwable: ObjRef) -> Option<ObjRef> {
    vm.get_field(throwable, "backtrace", "Ljava/lang/Object;")
        .and_then(Value::as_reference_opt)
        .filter(|reference| !reference.is_null())
}

fn throwable_stack_trace_depth(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let throwable = args[0].as_reference();
    let depth = backtrace_of(vm, throwable)
        .map(|trace| vm.heap.array_length(trace))
        .unwrap_or(0);
    Some(Value::Int(depth))
}

fn throwable_stack_trace_element(vm: &mut Vm, thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let throwable = args[0].as_reference();
    let index = args[1].as_int();
    let Some(trace) = backtrace_of(vm, throwable) else {
        thread.throw_by_name(vm, "java/lang/IndexOutOfBoundsException", "no backtrace");
        return None;
    };
    if index < 0 || index >= vm.heap.array_length(trace) {
        thread.throw_by_name(vm, "java/lang/IndexOutOfBoundsException", &index.to_string());
        return None;
    }
    Some(vm.heap.array_get(&vm.loader, trace, index))
}

fn runtime_available_processors(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    let count = std::thread::available_parallelism()
        .map(|parallelism| parallelism.get() as i32)
        .unwrap_or(1);
    Some(Value::Int(count))
}

fn string_intern(vm: &mut Vm, thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let string = args[0].as_reference();
    let Some(contents) = vm.string_value(string) else {
        thread.throw_by_name(vm, "java/lang/InternalError", "intern on a malformed string");
        return None;
    };
    match vm.intern(&contents) {
        Ok(interned) => Some(Value::Reference(interned)),
        Err(err) => {
            thread.throw_vm_error(vm, &err);
            None
        }
    }
}

fn string_utf16_is_big_endian(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    // String payloads are always stored low byte first.
    Some(Value::Int(0))
}
