//! The `org.geevm.util.Printer` test-support natives: typed `println`
//! overloads writing straight to stdout, no `System.out` machinery needed.

use super::NativeMethodRegistry;
use crate::thread::JavaThread;
use crate::value::Value;
use crate::vm::Vm;

const PRINTER: &str = "org/geevm/util/Printer";

pub(super) fn register(registry: &mut NativeMethodRegistry) {
    registry.register(PRINTER, "println", "(I)V", println_int);
    registry.register(PRINTER, "println", "(J)V", println_long);
    registry.register(PRINTER, "println", "(F)V", println_float);
    registry.register(PRINTER, "println", "(D)V", println_double);
    registry.register(PRINTER, "println", "(C)V", println_char);
    registry.register(PRINTER, "println", "(Z)V", println_boolean);
    registry.register(PRINTER, "println", "(Ljava/lang/String;)V", println_string);
}

fn println_int(_vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    println!("{}", args[0].as_int());
    None
}

fn println_long(_vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    println!("{}", args[0].as_long());
    None
}

fn println_float(_vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    println!("{}", args[0].as_float());
    None
}

fn println_double(_vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    println!("{}", args[0].as_double());
    None
}

fn println_char(_vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let value = char::from_u32(args[0].as_int() as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
    println!("{value}");
    None
}

fn println_boolean(_vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    println!("{}", if args[0].as_int() == 0 { "false" } else { "true" });
    None
}

fn println_string(vm: &mut Vm, _thread: &mut JavaThread, args: &[Value]) -> Option<Value> {
    let string = args[0].as_reference();
    if string.is_null() {
        println!("null");
        return None;
    }
    match vm.string_value(string) {
        Some(contents) => println!("{contents}"),
        None => println!("{string:?}"),
    }
    None
}
