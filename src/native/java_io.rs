//! Natives of the `java.io` stream classes. Only the standard output and
//! error descriptors reach the host process.

use std::io::Write;

use log::warn;

use super::{noop, NativeMethodRegistry};
use crate::thread::JavaThread;
use crate::value::Value;
use crate::vm::Vm;

pub(super) fn register(registry: &mut NativeMethodRegistry) {
    registry.register("java/io/FileOutputStream", "initIDs", "()V", noop);
    registry.register("java/io/FileOutputStream", "writeBytes", "([BIIZ)V", fos_write_bytes);

    registry.register("java/io/FileDescriptor", "initIDs", "()V", noop);
    registry.register("java/io/FileDescriptor", "getHandle", "(I)J", fd_get_handle);
    registry.register("java/io/FileDescriptor", "getAppend", "(I)Z", fd_get_append);
}

fn fos_write_bytes(vm: &mut Vm, thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let stream = args[0].as_reference();
    let bytes = args[1].as_reference();
    let offset = args[2].as_int();
    let length = args[3].as_int();

    if bytes.is_null() {
        thread.throw_by_name(vm, "java/lang/NullPointerException", "writeBytes(null)");
        return None;
    }

    let fd = vm
        .get_field(stream, "fd", "Ljava/io/FileDescriptor;")
        .and_then(Value::as_reference_opt)
        .filter(|descriptor| !descriptor.is_null())
        .and_then(|descriptor| vm.get_field(descriptor, "fd", "I"))
        .map(Value::as_int);
    let Some(fd) = fd else {
        thread.throw_by_name(vm, "java/io/IOException", "stream has no file descriptor");
        return None;
    };

    let payload = vm.heap.array_as_bytes(bytes);
    let array_length = payload.len() as i32;
    if offset < 0 || length < 0 || offset as i64 + length as i64 > array_length as i64 {
        thread.throw_by_name(vm, "java/lang/ArrayIndexOutOfBoundsException", "writeBytes");
        return None;
    }
    let slice = payload[offset as usize..(offset + length) as usize].to_vec();

    let written = match fd {
        1 => {
            let mut out = std::io::stdout();
            out.write_all(&slice).and_then(|()| out.flush())
        }
        2 => {
            let mut err = std::io::stderr();
            err.write_all(&slice).and_then(|()| err.flush())
        }
        other => {
            warn!("writeBytes to unsupported file descriptor {other}");
            Ok(())
        }
    };

    if written.is_err() {
        thread.throw_by_name(vm, "java/io/IOException", "write failed");
    }
    None
}

fn fd_get_handle(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    Some(Value::Long(-1))
}

fn fd_get_append(_vm: &mut Vm, _thread: &mut JavaThread, _args: &[Value]) -> Option<Value> {
    Some(Value::Int(0))
}
