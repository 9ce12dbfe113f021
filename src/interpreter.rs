//! The bytecode dispatch loop.
//!
//! [`interpret`] runs the top frame of a thread until it returns or
//! unwinds. Unwinding is explicit data flow: a pending exception on the
//! thread plus an [`Unwind`] result, never a host panic. The pending
//! exception is inspected at the top of every iteration, so an exception
//! raised anywhere (an opcode, a callee, a class initializer) goes through
//! the same handler search against the current method's exception table.

use std::io::Cursor;
use std::rc::Rc;

use byteorder::{ReadBytesExt, BE};
use jclass::attributes::Code;
use jclass::constants::CpInfo;
use log::warn;

use crate::class::ClassId;
use crate::errors::Unwind;
use crate::ops::Mnemonic;
use crate::thread::JavaThread;
use crate::value::{ObjRef, Value};
use crate::vm::Vm;

// The cursor reads from an in-memory code array; running out of bytes in
// the middle of an instruction means the class file lied about its code
// length. That is a decode-level corruption, not a recoverable condition.

fn fetch_u8(cursor: &mut Cursor<&[u8]>) -> u8 {
    cursor.read_u8().expect("bytecode ends inside an instruction")
}

fn fetch_u16(cursor: &mut Cursor<&[u8]>) -> u16 {
    cursor.read_u16::<BE>().expect("bytecode ends inside an instruction")
}

fn fetch_i16(cursor: &mut Cursor<&[u8]>) -> i16 {
    cursor.read_i16::<BE>().expect("bytecode ends inside an instruction")
}

fn fetch_i32(cursor: &mut Cursor<&[u8]>) -> i32 {
    cursor.read_i32::<BE>().expect("bytecode ends inside an instruction")
}

/// Branch targets are relative to the opcode's own position.
fn branch(cursor: &mut Cursor<&[u8]>, opcode_pos: u64, offset: i64) {
    cursor.set_position((opcode_pos as i64 + offset) as u64);
}

fn branch_if(cursor: &mut Cursor<&[u8]>, opcode_pos: u64, condition: bool) {
    let offset = fetch_i16(cursor);
    if condition {
        branch(cursor, opcode_pos, offset as i64);
    }
}

/// Executes the current frame. `Ok` carries the return value; `Err` means
/// the frame was abandoned with the thread's pending exception set.
pub fn interpret(vm: &mut Vm, thread: &mut JavaThread) -> Result<Option<Value>, Unwind> {
    let (code, current_class) = {
        let frame = thread.frame();
        (Rc::clone(&frame.code), frame.class)
    };
    let bytes: &[u8] = &code.code;
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(thread.frame().pc);

    loop {
        // Handle an exception raised by the previous iteration (or by the
        // class initializer / callee it entered). The frame's pc still
        // points at the faulting instruction.
        if thread.pending_exception.is_some() {
            let handler_pc = find_handler(vm, thread, &code, current_class)?;
            cursor.set_position(handler_pc);
        }

        let opcode_pos = cursor.position();
        if opcode_pos as usize >= bytes.len() {
            return Err(thread.throw_by_name(
                vm,
                "java/lang/InternalError",
                "execution ran off the end of the code array",
            ));
        }
        thread.frame_mut().pc = opcode_pos;

        match Mnemonic::from(fetch_u8(&mut cursor)) {
            Mnemonic::Nop => {}

            // Constants
            //==--------------------------------------------------------==//
            Mnemonic::AconstNull => thread.frame_mut().push_reference(ObjRef::NULL),
            Mnemonic::IconstM1 => thread.frame_mut().push_int(-1),
            Mnemonic::Iconst0 => thread.frame_mut().push_int(0),
            Mnemonic::Iconst1 => thread.frame_mut().push_int(1),
            Mnemonic::Iconst2 => thread.frame_mut().push_int(2),
            Mnemonic::Iconst3 => thread.frame_mut().push_int(3),
            Mnemonic::Iconst4 => thread.frame_mut().push_int(4),
            Mnemonic::Iconst5 => thread.frame_mut().push_int(5),
            Mnemonic::Lconst0 => thread.frame_mut().push_long(0),
            Mnemonic::Lconst1 => thread.frame_mut().push_long(1),
            Mnemonic::Fconst0 => thread.frame_mut().push_float(0.0),
            Mnemonic::Fconst1 => thread.frame_mut().push_float(1.0),
            Mnemonic::Fconst2 => thread.frame_mut().push_float(2.0),
            Mnemonic::Dconst0 => thread.frame_mut().push_double(0.0),
            Mnemonic::Dconst1 => thread.frame_mut().push_double(1.0),
            Mnemonic::Bipush => {
                let value = fetch_u8(&mut cursor) as i8 as i32;
                thread.frame_mut().push_int(value);
            }
            Mnemonic::Sipush => {
                let value = fetch_i16(&mut cursor) as i32;
                thread.frame_mut().push_int(value);
            }
            Mnemonic::Ldc => {
                let index = fetch_u8(&mut cursor) as u16;
                load_constant(vm, thread, current_class, index);
            }
            Mnemonic::LdcW => {
                let index = fetch_u16(&mut cursor);
                load_constant(vm, thread, current_class, index);
            }
            Mnemonic::Ldc2W => {
                let index = fetch_u16(&mut cursor);
                let entry = constant_entry(vm, current_class, index);
                match entry {
                    CpInfo::Long(value) => thread.frame_mut().push_long(value),
                    CpInfo::Double(value) => thread.frame_mut().push_double(value),
                    other => {
                        let _ = thread.throw_by_name(
                            vm,
                            "java/lang/InternalError",
                            &format!("unsupported ldc2_w constant {other:?}"),
                        );
                    }
                }
            }

            // Loads and stores
            //==--------------------------------------------------------==//
            Mnemonic::Iload | Mnemonic::Lload | Mnemonic::Fload | Mnemonic::Dload | Mnemonic::Aload => {
                let index = fetch_u8(&mut cursor) as u16;
                let value = thread.frame().load(index);
                thread.frame_mut().push(value);
            }
            Mnemonic::Iload0 | Mnemonic::Lload0 | Mnemonic::Fload0 | Mnemonic::Dload0 | Mnemonic::Aload0 => {
                let value = thread.frame().load(0);
                thread.frame_mut().push(value);
            }
            Mnemonic::Iload1 | Mnemonic::Lload1 | Mnemonic::Fload1 | Mnemonic::Dload1 | Mnemonic::Aload1 => {
                let value = thread.frame().load(1);
                thread.frame_mut().push(value);
            }
            Mnemonic::Iload2 | Mnemonic::Lload2 | Mnemonic::Fload2 | Mnemonic::Dload2 | Mnemonic::Aload2 => {
                let value = thread.frame().load(2);
                thread.frame_mut().push(value);
            }
            Mnemonic::Iload3 | Mnemonic::Lload3 | Mnemonic::Fload3 | Mnemonic::Dload3 | Mnemonic::Aload3 => {
                let value = thread.frame().load(3);
                thread.frame_mut().push(value);
            }
            Mnemonic::Istore | Mnemonic::Lstore | Mnemonic::Fstore | Mnemonic::Dstore | Mnemonic::Astore => {
                let index = fetch_u8(&mut cursor) as u16;
                let value = thread.frame_mut().pop();
                thread.frame_mut().store(index, value);
            }
            Mnemonic::Istore0 | Mnemonic::Lstore0 | Mnemonic::Fstore0 | Mnemonic::Dstore0 | Mnemonic::Astore0 => {
                let value = thread.frame_mut().pop();
                thread.frame_mut().store(0, value);
            }
            Mnemonic::Istore1 | Mnemonic::Lstore1 | Mnemonic::Fstore1 | Mnemonic::Dstore1 | Mnemonic::Astore1 => {
                let value = thread.frame_mut().pop();
                thread.frame_mut().store(1, value);
            }
            Mnemonic::Istore2 | Mnemonic::Lstore2 | Mnemonic::Fstore2 | Mnemonic::Dstore2 | Mnemonic::Astore2 => {
                let value = thread.frame_mut().pop();
                thread.frame_mut().store(2, value);
            }
            Mnemonic::Istore3 | Mnemonic::Lstore3 | Mnemonic::Fstore3 | Mnemonic::Dstore3 | Mnemonic::Astore3 => {
                let value = thread.frame_mut().pop();
                thread.frame_mut().store(3, value);
            }

            // Array loads and stores
            //==--------------------------------------------------------==//
            Mnemonic::Iaload
            | Mnemonic::Laload
            | Mnemonic::Faload
            | Mnemonic::Daload
            | Mnemonic::Aaload
            | Mnemonic::Baload
            | Mnemonic::Caload
            | Mnemonic::Saload => {
                let index = thread.frame_mut().pop_int();
                let array = thread.frame_mut().pop_reference();
                if let Some(value) = checked_array_get(vm, thread, array, index) {
                    thread.frame_mut().push(value);
                }
            }
            Mnemonic::Iastore
            | Mnemonic::Lastore
            | Mnemonic::Fastore
            | Mnemonic::Dastore
            | Mnemonic::Aastore
            | Mnemonic::Bastore
            | Mnemonic::Castore
            | Mnemonic::Sastore => {
                let value = thread.frame_mut().pop();
                let index = thread.frame_mut().pop_int();
                let array = thread.frame_mut().pop_reference();
                checked_array_set(vm, thread, array, index, value);
            }

            // Operand stack shuffling
            //==--------------------------------------------------------==//
            Mnemonic::Pop => {
                thread.frame_mut().pop();
            }
            Mnemonic::Pop2 => {
                let value = thread.frame_mut().pop();
                if !value.is_category_two() {
                    thread.frame_mut().pop();
                }
            }
            Mnemonic::Dup => {
                let value = thread.frame_mut().pop();
                let frame = thread.frame_mut();
                frame.push(value);
                frame.push(value);
            }
            Mnemonic::DupX1 => {
                let frame = thread.frame_mut();
                let value1 = frame.pop();
                let value2 = frame.pop();
                frame.push(value1);
                frame.push(value2);
                frame.push(value1);
            }
            Mnemonic::DupX2 => {
                let frame = thread.frame_mut();
                let value1 = frame.pop();
                let value2 = frame.pop();
                if value2.is_category_two() {
                    frame.push(value1);
                    frame.push(value2);
                    frame.push(value1);
                } else {
                    let value3 = frame.pop();
                    frame.push(value1);
                    frame.push(value3);
                    frame.push(value2);
                    frame.push(value1);
                }
            }
            Mnemonic::Dup2 => {
                let frame = thread.frame_mut();
                let value1 = frame.pop();
                if value1.is_category_two() {
                    frame.push(value1);
                    frame.push(value1);
                } else {
                    let value2 = frame.pop();
                    frame.push(value2);
                    frame.push(value1);
                    frame.push(value2);
                    frame.push(value1);
                }
            }
            Mnemonic::Dup2X1 => {
                let frame = thread.frame_mut();
                let value1 = frame.pop();
                if value1.is_category_two() {
                    let value2 = frame.pop();
                    frame.push(value1);
                    frame.push(value2);
                    frame.push(value1);
                } else {
                    let value2 = frame.pop();
                    let value3 = frame.pop();
                    frame.push(value2);
                    frame.push(value1);
                    frame.push(value3);
                    frame.push(value2);
                    frame.push(value1);
                }
            }
            Mnemonic::Dup2X2 => {
                let frame = thread.frame_mut();
                let value1 = frame.pop();
                if value1.is_category_two() {
                    let value2 = frame.pop();
                    if value2.is_category_two() {
                        frame.push(value1);
                        frame.push(value2);
                        frame.push(value1);
                    } else {
                        let value3 = frame.pop();
                        frame.push(value1);
                        frame.push(value3);
                        frame.push(value2);
                        frame.push(value1);
                    }
                } else {
                    let value2 = frame.pop();
                    let value3 = frame.pop();
                    if value3.is_category_two() {
                        frame.push(value2);
                        frame.push(value1);
                        frame.push(value3);
                        frame.push(value2);
                        frame.push(value1);
                    } else {
                        let value4 = frame.pop();
                        frame.push(value2);
                        frame.push(value1);
                        frame.push(value4);
                        frame.push(value3);
                        frame.push(value2);
                        frame.push(value1);
                    }
                }
            }
            Mnemonic::Swap => {
                let frame = thread.frame_mut();
                let value1 = frame.pop();
                let value2 = frame.pop();
                frame.push(value1);
                frame.push(value2);
            }

            // Arithmetic. Integer forms wrap in two's complement; float
            // forms are IEEE 754.
            //==--------------------------------------------------------==//
            Mnemonic::Iadd => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                frame.push_int(value1.wrapping_add(value2));
            }
            Mnemonic::Ladd => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_long();
                let value1 = frame.pop_long();
                frame.push_long(value1.wrapping_add(value2));
            }
            Mnemonic::Fadd => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_float();
                let value1 = frame.pop_float();
                frame.push_float(value1 + value2);
            }
            Mnemonic::Dadd => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_double();
                let value1 = frame.pop_double();
                frame.push_double(value1 + value2);
            }
            Mnemonic::Isub => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                frame.push_int(value1.wrapping_sub(value2));
            }
            Mnemonic::Lsub => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_long();
                let value1 = frame.pop_long();
                frame.push_long(value1.wrapping_sub(value2));
            }
            Mnemonic::Fsub => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_float();
                let value1 = frame.pop_float();
                frame.push_float(value1 - value2);
            }
            Mnemonic::Dsub => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_double();
                let value1 = frame.pop_double();
                frame.push_double(value1 - value2);
            }
            Mnemonic::Imul => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                frame.push_int(value1.wrapping_mul(value2));
            }
            Mnemonic::Lmul => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_long();
                let value1 = frame.pop_long();
                frame.push_long(value1.wrapping_mul(value2));
            }
            Mnemonic::Fmul => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_float();
                let value1 = frame.pop_float();
                frame.push_float(value1 * value2);
            }
            Mnemonic::Dmul => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_double();
                let value1 = frame.pop_double();
                frame.push_double(value1 * value2);
            }
            Mnemonic::Idiv => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                if value2 == 0 {
                    let _ = thread.throw_by_name(vm, "java/lang/ArithmeticException", "/ by zero");
                } else {
                    thread.frame_mut().push_int(value1.wrapping_div(value2));
                }
            }
            Mnemonic::Ldiv => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_long();
                let value1 = frame.pop_long();
                if value2 == 0 {
                    let _ = thread.throw_by_name(vm, "java/lang/ArithmeticException", "/ by zero");
                } else {
                    thread.frame_mut().push_long(value1.wrapping_div(value2));
                }
            }
            Mnemonic::Fdiv => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_float();
                let value1 = frame.pop_float();
                frame.push_float(value1 / value2);
            }
            Mnemonic::Ddiv => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_double();
                let value1 = frame.pop_double();
                frame.push_double(value1 / value2);
            }
            Mnemonic::Irem => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                if value2 == 0 {
                    let _ = thread.throw_by_name(vm, "java/lang/ArithmeticException", "/ by zero");
                } else {
                    // Defined as v1 - (v1 / v2) * v2.
                    thread.frame_mut().push_int(value1.wrapping_rem(value2));
                }
            }
            Mnemonic::Lrem => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_long();
                let value1 = frame.pop_long();
                if value2 == 0 {
                    let _ = thread.throw_by_name(vm, "java/lang/ArithmeticException", "/ by zero");
                } else {
                    thread.frame_mut().push_long(value1.wrapping_rem(value2));
                }
            }
            Mnemonic::Frem => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_float();
                let value1 = frame.pop_float();
                frame.push_float(value1 % value2);
            }
            Mnemonic::Drem => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_double();
                let value1 = frame.pop_double();
                frame.push_double(value1 % value2);
            }
            Mnemonic::Ineg => {
                let value = thread.frame_mut().pop_int();
                thread.frame_mut().push_int(value.wrapping_neg());
            }
            Mnemonic::Lneg => {
                let value = thread.frame_mut().pop_long();
                thread.frame_mut().push_long(value.wrapping_neg());
            }
            Mnemonic::Fneg => {
                let value = thread.frame_mut().pop_float();
                thread.frame_mut().push_float(-value);
            }
            Mnemonic::Dneg => {
                let value = thread.frame_mut().pop_double();
                thread.frame_mut().push_double(-value);
            }

            // Shifts mask the shift amount to 5 bits (int) or 6 bits (long).
            Mnemonic::Ishl => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                frame.push_int(value1.wrapping_shl(value2 as u32 & 0x1F));
            }
            Mnemonic::Lshl => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_long();
                frame.push_long(value1.wrapping_shl(value2 as u32 & 0x3F));
            }
            Mnemonic::Ishr => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                frame.push_int(value1.wrapping_shr(value2 as u32 & 0x1F));
            }
            Mnemonic::Lshr => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_long();
                frame.push_long(value1.wrapping_shr(value2 as u32 & 0x3F));
            }
            Mnemonic::Iushr => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                frame.push_int(((value1 as u32) >> (value2 as u32 & 0x1F)) as i32);
            }
            Mnemonic::Lushr => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_long();
                frame.push_long(((value1 as u64) >> (value2 as u32 & 0x3F)) as i64);
            }
            Mnemonic::Iand => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                frame.push_int(value1 & value2);
            }
            Mnemonic::Land => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_long();
                let value1 = frame.pop_long();
                frame.push_long(value1 & value2);
            }
            Mnemonic::Ior => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                frame.push_int(value1 | value2);
            }
            Mnemonic::Lor => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_long();
                let value1 = frame.pop_long();
                frame.push_long(value1 | value2);
            }
            Mnemonic::Ixor => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                frame.push_int(value1 ^ value2);
            }
            Mnemonic::Lxor => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_long();
                let value1 = frame.pop_long();
                frame.push_long(value1 ^ value2);
            }
            Mnemonic::Iinc => {
                let index = fetch_u8(&mut cursor) as u16;
                let increment = fetch_u8(&mut cursor) as i8 as i32;
                let frame = thread.frame_mut();
                let value = frame.load_int(index);
                frame.store_int(index, value.wrapping_add(increment));
            }

            // Conversions
            //==--------------------------------------------------------==//
            Mnemonic::I2l => {
                let value = thread.frame_mut().pop_int();
                thread.frame_mut().push_long(value as i64);
            }
            Mnemonic::I2f => {
                let value = thread.frame_mut().pop_int();
                thread.frame_mut().push_float(value as f32);
            }
            Mnemonic::I2d => {
                let value = thread.frame_mut().pop_int();
                thread.frame_mut().push_double(value as f64);
            }
            Mnemonic::L2i => {
                let value = thread.frame_mut().pop_long();
                thread.frame_mut().push_int(value as i32);
            }
            Mnemonic::L2f => {
                let value = thread.frame_mut().pop_long();
                thread.frame_mut().push_float(value as f32);
            }
            Mnemonic::L2d => {
                let value = thread.frame_mut().pop_long();
                thread.frame_mut().push_double(value as f64);
            }
            Mnemonic::F2i => {
                // `as` saturates and maps NaN to zero, which is exactly the
                // JVM narrowing rule.
                let value = thread.frame_mut().pop_float();
                thread.frame_mut().push_int(value as i32);
            }
            Mnemonic::F2l => {
                let value = thread.frame_mut().pop_float();
                thread.frame_mut().push_long(value as i64);
            }
            Mnemonic::F2d => {
                let value = thread.frame_mut().pop_float();
                thread.frame_mut().push_double(value as f64);
            }
            Mnemonic::D2i => {
                let value = thread.frame_mut().pop_double();
                thread.frame_mut().push_int(value as i32);
            }
            Mnemonic::D2l => {
                let value = thread.frame_mut().pop_double();
                thread.frame_mut().push_long(value as i64);
            }
            Mnemonic::D2f => {
                let value = thread.frame_mut().pop_double();
                thread.frame_mut().push_float(value as f32);
            }
            Mnemonic::I2b => {
                let value = thread.frame_mut().pop_int();
                thread.frame_mut().push_int(value as i8 as i32);
            }
            Mnemonic::I2c => {
                let value = thread.frame_mut().pop_int();
                thread.frame_mut().push_int(value as u16 as i32);
            }
            Mnemonic::I2s => {
                let value = thread.frame_mut().pop_int();
                thread.frame_mut().push_int(value as i16 as i32);
            }

            // Comparisons
            //==--------------------------------------------------------==//
            Mnemonic::Lcmp => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_long();
                let value1 = frame.pop_long();
                frame.push_int(match value1.cmp(&value2) {
                    std::cmp::Ordering::Greater => 1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Less => -1,
                });
            }
            Mnemonic::Fcmpl | Mnemonic::Fcmpg => {
                let nan_result = if matches!(Mnemonic::from(bytes[opcode_pos as usize]), Mnemonic::Fcmpg) {
                    1
                } else {
                    -1
                };
                let frame = thread.frame_mut();
                let value2 = frame.pop_float();
                let value1 = frame.pop_float();
                frame.push_int(float_compare(value1 as f64, value2 as f64, nan_result));
            }
            Mnemonic::Dcmpl | Mnemonic::Dcmpg => {
                let nan_result = if matches!(Mnemonic::from(bytes[opcode_pos as usize]), Mnemonic::Dcmpg) {
                    1
                } else {
                    -1
                };
                let frame = thread.frame_mut();
                let value2 = frame.pop_double();
                let value1 = frame.pop_double();
                frame.push_int(float_compare(value1, value2, nan_result));
            }

            // Branches
            //==--------------------------------------------------------==//
            Mnemonic::Ifeq => {
                let value = thread.frame_mut().pop_int();
                branch_if(&mut cursor, opcode_pos, value == 0);
            }
            Mnemonic::Ifne => {
                let value = thread.frame_mut().pop_int();
                branch_if(&mut cursor, opcode_pos, value != 0);
            }
            Mnemonic::Iflt => {
                let value = thread.frame_mut().pop_int();
                branch_if(&mut cursor, opcode_pos, value < 0);
            }
            Mnemonic::Ifge => {
                let value = thread.frame_mut().pop_int();
                branch_if(&mut cursor, opcode_pos, value >= 0);
            }
            Mnemonic::Ifgt => {
                let value = thread.frame_mut().pop_int();
                branch_if(&mut cursor, opcode_pos, value > 0);
            }
            Mnemonic::Ifle => {
                let value = thread.frame_mut().pop_int();
                branch_if(&mut cursor, opcode_pos, value <= 0);
            }
            Mnemonic::IfIcmpeq => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                branch_if(&mut cursor, opcode_pos, value1 == value2);
            }
            Mnemonic::IfIcmpne => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                branch_if(&mut cursor, opcode_pos, value1 != value2);
            }
            Mnemonic::IfIcmplt => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                branch_if(&mut cursor, opcode_pos, value1 < value2);
            }
            Mnemonic::IfIcmpge => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                branch_if(&mut cursor, opcode_pos, value1 >= value2);
            }
            Mnemonic::IfIcmpgt => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                branch_if(&mut cursor, opcode_pos, value1 > value2);
            }
            Mnemonic::IfIcmple => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_int();
                let value1 = frame.pop_int();
                branch_if(&mut cursor, opcode_pos, value1 <= value2);
            }
            Mnemonic::IfAcmpeq => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_reference();
                let value1 = frame.pop_reference();
                branch_if(&mut cursor, opcode_pos, value1 == value2);
            }
            Mnemonic::IfAcmpne => {
                let frame = thread.frame_mut();
                let value2 = frame.pop_reference();
                let value1 = frame.pop_reference();
                branch_if(&mut cursor, opcode_pos, value1 != value2);
            }
            Mnemonic::Ifnull => {
                let value = thread.frame_mut().pop_reference();
                branch_if(&mut cursor, opcode_pos, value.is_null());
            }
            Mnemonic::Ifnonnull => {
                let value = thread.frame_mut().pop_reference();
                branch_if(&mut cursor, opcode_pos, !value.is_null());
            }
            Mnemonic::Goto => {
                let offset = fetch_i16(&mut cursor);
                branch(&mut cursor, opcode_pos, offset as i64);
            }
            Mnemonic::GotoW => {
                let offset = fetch_i32(&mut cursor);
                branch(&mut cursor, opcode_pos, offset as i64);
            }
            Mnemonic::Tableswitch => {
                skip_switch_padding(&mut cursor);
                let default = fetch_i32(&mut cursor);
                let low = fetch_i32(&mut cursor);
                let high = fetch_i32(&mut cursor);
                let mut offsets = Vec::with_capacity((high - low + 1) as usize);
                for _ in low..=high {
                    offsets.push(fetch_i32(&mut cursor));
                }
                let index = thread.frame_mut().pop_int();
                let target = if index < low || index > high {
                    default
                } else {
                    offsets[(index - low) as usize]
                };
                branch(&mut cursor, opcode_pos, target as i64);
            }
            Mnemonic::Lookupswitch => {
                skip_switch_padding(&mut cursor);
                let default = fetch_i32(&mut cursor);
                let npairs = fetch_i32(&mut cursor);
                let mut pairs = Vec::with_capacity(npairs as usize);
                for _ in 0..npairs {
                    pairs.push((fetch_i32(&mut cursor), fetch_i32(&mut cursor)));
                }
                let key = thread.frame_mut().pop_int();
                let target = pairs
                    .iter()
                    .find(|&&(matched, _)| matched == key)
                    .map(|&(_, offset)| offset)
                    .unwrap_or(default);
                branch(&mut cursor, opcode_pos, target as i64);
            }

            // Returns
            //==--------------------------------------------------------==//
            Mnemonic::Ireturn
            | Mnemonic::Lreturn
            | Mnemonic::Freturn
            | Mnemonic::Dreturn
            | Mnemonic::Areturn => {
                let value = thread.frame_mut().pop();
                return Ok(Some(value));
            }
            Mnemonic::Return => return Ok(None),

            // Field access
            //==--------------------------------------------------------==//
            Mnemonic::Getstatic => {
                let index = fetch_u16(&mut cursor);
                let (class, field_index) = match vm.rcp_field(current_class, index) {
                    Ok(found) => found,
                    Err(err) => {
                        let _ = thread.throw_vm_error(vm, &err);
                        continue;
                    }
                };
                if vm.initialize_class(thread, class).is_err() {
                    continue;
                }
                let value = vm.heap.static_field_value(&vm.loader, class, field_index);
                thread.frame_mut().push(value);
            }
            Mnemonic::Putstatic => {
                let index = fetch_u16(&mut cursor);
                let (class, field_index) = match vm.rcp_field(current_class, index) {
                    Ok(found) => found,
                    Err(err) => {
                        let _ = thread.throw_vm_error(vm, &err);
                        continue;
                    }
                };
                if vm.initialize_class(thread, class).is_err() {
                    continue;
                }
                let value = thread.frame_mut().pop();
                vm.set_static_field(class, field_index, value);
            }
            Mnemonic::Getfield => {
                let index = fetch_u16(&mut cursor);
                let (class, field_index) = match vm.rcp_field(current_class, index) {
                    Ok(found) => found,
                    Err(err) => {
                        let _ = thread.throw_vm_error(vm, &err);
                        continue;
                    }
                };
                let object = thread.frame_mut().pop_reference();
                if object.is_null() {
                    let field_name = vm.loader.class(class).field(field_index).name.clone();
                    let _ = thread.throw_by_name(
                        vm,
                        "java/lang/NullPointerException",
                        &format!("cannot read field \"{field_name}\""),
                    );
                    continue;
                }
                let field = vm.loader.class(class).field(field_index).clone();
                let value = vm.heap.field_value(&field, object);
                thread.frame_mut().push(value);
            }
            Mnemonic::Putfield => {
                let index = fetch_u16(&mut cursor);
                let (class, field_index) = match vm.rcp_field(current_class, index) {
                    Ok(found) => found,
                    Err(err) => {
                        let _ = thread.throw_vm_error(vm, &err);
                        continue;
                    }
                };
                let value = thread.frame_mut().pop();
                let object = thread.frame_mut().pop_reference();
                if object.is_null() {
                    let field_name = vm.loader.class(class).field(field_index).name.clone();
                    let _ = thread.throw_by_name(
                        vm,
                        "java/lang/NullPointerException",
                        &format!("cannot assign field \"{field_name}\""),
                    );
                    continue;
                }
                let field = vm.loader.class(class).field(field_index).clone();
                vm.heap.set_field_value(&field, object, value);
            }

            // Invocation
            //==--------------------------------------------------------==//
            Mnemonic::Invokevirtual => {
                let index = fetch_u16(&mut cursor);
                invoke_instance_method(vm, thread, current_class, index);
            }
            Mnemonic::Invokeinterface => {
                let index = fetch_u16(&mut cursor);
                // The historical count and zero bytes.
                fetch_u8(&mut cursor);
                fetch_u8(&mut cursor);
                invoke_instance_method(vm, thread, current_class, index);
            }
            Mnemonic::Invokespecial => {
                let index = fetch_u16(&mut cursor);
                let (class, method_index) = match vm.rcp_method(current_class, index) {
                    Ok(found) => found,
                    Err(err) => {
                        let _ = thread.throw_vm_error(vm, &err);
                        continue;
                    }
                };
                let param_count = vm.loader.class(class).method(method_index).parsed.parameters.len();
                if thread.frame().peek(param_count).as_reference().is_null() {
                    let _ = thread.throw_by_name(vm, "java/lang/NullPointerException", "");
                    continue;
                }
                thread.invoke(vm, class, method_index);
            }
            Mnemonic::Invokestatic => {
                let index = fetch_u16(&mut cursor);
                let (class, method_index) = match vm.rcp_method(current_class, index) {
                    Ok(found) => found,
                    Err(err) => {
                        let _ = thread.throw_vm_error(vm, &err);
                        continue;
                    }
                };
                if vm.initialize_class(thread, class).is_err() {
                    continue;
                }
                thread.invoke(vm, class, method_index);
            }
            Mnemonic::Invokedynamic => {
                fetch_u16(&mut cursor);
                fetch_u16(&mut cursor);
                let _ = thread.throw_by_name(
                    vm,
                    "java/lang/InternalError",
                    "invokedynamic is not supported",
                );
            }

            // Object creation and type tests
            //==--------------------------------------------------------==//
            Mnemonic::New => {
                let index = fetch_u16(&mut cursor);
                let class = match vm.rcp_class(current_class, index) {
                    Ok(class) => class,
                    Err(err) => {
                        let _ = thread.throw_vm_error(vm, &err);
                        continue;
                    }
                };
                let record = vm.loader.class(class);
                if record.is_interface() || record.is_array() {
                    let name = record.java_name();
                    let _ = thread.throw_by_name(vm, "java/lang/InstantiationError", &name);
                    continue;
                }
                if vm.initialize_class(thread, class).is_err() {
                    continue;
                }
                match vm.allocate_instance(thread, class) {
                    Ok(instance) => thread.frame_mut().push_reference(instance),
                    Err(err) => {
                        let _ = thread.throw_vm_error(vm, &err);
                    }
                }
            }
            Mnemonic::Newarray => {
                let kind = fetch_u8(&mut cursor);
                let count = thread.frame_mut().pop_int();
                let class_name = match kind {
                    4 => "[Z",
                    5 => "[C",
                    6 => "[F",
                    7 => "[D",
                    8 => "[B",
                    9 => "[S",
                    10 => "[I",
                    11 => "[J",
                    other => {
                        let _ = thread.throw_by_name(
                            vm,
                            "java/lang/InternalError",
                            &format!("newarray with invalid component kind {other}"),
                        );
                        continue;
                    }
                };
                allocate_array_checked(vm, thread, class_name, count);
            }
            Mnemonic::Anewarray => {
                let index = fetch_u16(&mut cursor);
                let count = thread.frame_mut().pop_int();
                let component = match vm.rcp_class(current_class, index) {
                    Ok(class) => class,
                    Err(err) => {
                        let _ = thread.throw_vm_error(vm, &err);
                        continue;
                    }
                };
                let component_name = &vm.loader.class(component).name;
                let array_name = if component_name.starts_with('[') {
                    format!("[{component_name}")
                } else {
                    format!("[L{component_name};")
                };
                allocate_array_checked(vm, thread, &array_name, count);
            }
            Mnemonic::Multianewarray => {
                let index = fetch_u16(&mut cursor);
                let dimensions = fetch_u8(&mut cursor) as usize;
                let array_class = match vm.rcp_class(current_class, index) {
                    Ok(class) => class,
                    Err(err) => {
                        let _ = thread.throw_vm_error(vm, &err);
                        continue;
                    }
                };
                let mut counts = Vec::with_capacity(dimensions);
                for _ in 0..dimensions {
                    counts.push(thread.frame_mut().pop_int());
                }
                counts.reverse();
                if let Some(&negative) = counts.iter().find(|&&count| count < 0) {
                    let _ = thread.throw_by_name(
                        vm,
                        "java/lang/NegativeArraySizeException",
                        &negative.to_string(),
                    );
                    continue;
                }
                match allocate_multi_array(vm, thread, array_class, &counts) {
                    Ok(array) => thread.frame_mut().push_reference(array),
                    Err(Unwind) => {}
                }
            }
            Mnemonic::Arraylength => {
                let array = thread.frame_mut().pop_reference();
                if array.is_null() {
                    let _ = thread.throw_by_name(
                        vm,
                        "java/lang/NullPointerException",
                        "cannot read the array length",
                    );
                    continue;
                }
                let length = vm.heap.array_length(array);
                thread.frame_mut().push_int(length);
            }
            Mnemonic::Checkcast => {
                let index = fetch_u16(&mut cursor);
                let object = thread.frame_mut().pop_reference();
                if object.is_null() {
                    thread.frame_mut().push_reference(object);
                } else {
                    let target = match vm.rcp_class(current_class, index) {
                        Ok(class) => class,
                        Err(err) => {
                            let _ = thread.throw_vm_error(vm, &err);
                            continue;
                        }
                    };
                    let source = vm.heap.class_of(object);
                    if vm.loader.is_instance_of(source, target) {
                        thread.frame_mut().push_reference(object);
                    } else {
                        let message = format!(
                            "class {} cannot be cast to class {}",
                            vm.loader.class(source).java_name(),
                            vm.loader.class(target).java_name()
                        );
                        let _ = thread.throw_by_name(vm, "java/lang/ClassCastException", &message);
                    }
                }
            }
            Mnemonic::Instanceof => {
                let index = fetch_u16(&mut cursor);
                let object = thread.frame_mut().pop_reference();
                if object.is_null() {
                    thread.frame_mut().push_int(0);
                } else {
                    let target = match vm.rcp_class(current_class, index) {
                        Ok(class) => class,
                        Err(err) => {
                            let _ = thread.throw_vm_error(vm, &err);
                            continue;
                        }
                    };
                    let source = vm.heap.class_of(object);
                    let result = vm.loader.is_instance_of(source, target);
                    thread.frame_mut().push_int(result as i32);
                }
            }

            // Exceptions and monitors
            //==--------------------------------------------------------==//
            Mnemonic::Athrow => {
                let exception = thread.frame_mut().pop_reference();
                if exception.is_null() {
                    let _ = thread.throw_by_name(vm, "java/lang/NullPointerException", "throwing null");
                } else {
                    let _ = thread.throw(exception);
                }
            }
            // No synchronization: monitors only consume their operand.
            Mnemonic::Monitorenter | Mnemonic::Monitorexit => {
                thread.frame_mut().pop_reference();
            }

            Mnemonic::Wide => {
                let modified = Mnemonic::from(fetch_u8(&mut cursor));
                let index = fetch_u16(&mut cursor);
                match modified {
                    Mnemonic::Iload
                    | Mnemonic::Lload
                    | Mnemonic::Fload
                    | Mnemonic::Dload
                    | Mnemonic::Aload => {
                        let value = thread.frame().load(index);
                        thread.frame_mut().push(value);
                    }
                    Mnemonic::Istore
                    | Mnemonic::Lstore
                    | Mnemonic::Fstore
                    | Mnemonic::Dstore
                    | Mnemonic::Astore => {
                        let value = thread.frame_mut().pop();
                        thread.frame_mut().store(index, value);
                    }
                    Mnemonic::Iinc => {
                        let increment = fetch_i16(&mut cursor) as i32;
                        let frame = thread.frame_mut();
                        let value = frame.load_int(index);
                        frame.store_int(index, value.wrapping_add(increment));
                    }
                    other => {
                        let _ = thread.throw_by_name(
                            vm,
                            "java/lang/InternalError",
                            &format!("unsupported wide form {other:?}"),
                        );
                    }
                }
            }

            unsupported @ (Mnemonic::Jsr
            | Mnemonic::Ret
            | Mnemonic::JsrW
            | Mnemonic::Breakpoint
            | Mnemonic::Impdep1
            | Mnemonic::Impdep2) => {
                let _ = thread.throw_by_name(
                    vm,
                    "java/lang/InternalError",
                    &format!("unsupported opcode {unsupported:?}"),
                );
            }
            Mnemonic::Unknown(opcode) => {
                let _ = thread.throw_by_name(
                    vm,
                    "java/lang/InternalError",
                    &format!("unknown opcode {opcode:#04X}"),
                );
            }
        }
    }
}

/// Searches the current method's exception table for a live handler of the
/// pending exception. On a match the frame is rewired (stack cleared, the
/// exception pushed as the sole operand) and the handler pc returned; on no
/// match the frame unwinds to its caller.
fn find_handler(
    vm: &mut Vm,
    thread: &mut JavaThread,
    code: &Code,
    current_class: ClassId,
) -> Result<u64, Unwind> {
    let pc = thread.frame().pc;
    let exception = thread
        .pending_exception
        .expect("handler search without a pending exception");
    let exception_class = vm.heap.class_of(exception);

    for entry in &code.exception_table {
        if pc < entry.start_pc as u64 || pc >= entry.end_pc as u64 {
            continue;
        }
        let caught = if entry.catch_type == 0 {
            // Catch-all, as compiled for finally blocks.
            true
        } else {
            match vm.rcp_class(current_class, entry.catch_type) {
                Ok(catch_class) => vm.loader.is_instance_of(exception_class, catch_class),
                Err(err) => {
                    warn!("cannot resolve catch type of a handler: {err}");
                    false
                }
            }
        };
        if caught {
            thread.clear_exception();
            let frame = thread.frame_mut();
            frame.clear_stack();
            frame.push_reference(exception);
            return Ok(entry.handler_pc as u64);
        }
    }

    Err(Unwind)
}

fn constant_entry(vm: &Vm, class: ClassId, index: u16) -> CpInfo {
    vm.loader
        .class(class)
        .class_file
        .as_ref()
        .expect("bytecode always belongs to an instance class")
        .constant_pool
        .entry(index)
        .clone()
}

/// `ldc` / `ldc_w`: int, float, string or class constants.
fn load_constant(vm: &mut Vm, thread: &mut JavaThread, class: ClassId, index: u16) {
    match constant_entry(vm, class, index) {
        CpInfo::Integer(value) => thread.frame_mut().push_int(value),
        CpInfo::Float(value) => thread.frame_mut().push_float(value),
        CpInfo::String { .. } => match vm.rcp_string(class, index) {
            Ok(string) => thread.frame_mut().push_reference(string),
            Err(err) => {
                let _ = thread.throw_vm_error(vm, &err);
            }
        },
        CpInfo::Class { .. } => {
            let loaded = match vm.rcp_class(class, index) {
                Ok(loaded) => loaded,
                Err(err) => {
                    let _ = thread.throw_vm_error(vm, &err);
                    return;
                }
            };
            match vm.mirror(loaded) {
                Ok(mirror) => thread.frame_mut().push_reference(mirror),
                Err(err) => {
                    let _ = thread.throw_vm_error(vm, &err);
                }
            }
        }
        other => {
            let _ = thread.throw_by_name(
                vm,
                "java/lang/InternalError",
                &format!("unsupported ldc constant {other:?}"),
            );
        }
    }
}

/// Shared path of `invokevirtual` and `invokeinterface`: resolve the
/// declared method, null-check the receiver at its stack depth, then
/// dispatch on the receiver's runtime class.
fn invoke_instance_method(
    vm: &mut Vm,
    thread: &mut JavaThread,
    current_class: ClassId,
    index: u16,
) {
    let (declared_class, declared_index) = match vm.rcp_method(current_class, index) {
        Ok(found) => found,
        Err(err) => {
            let _ = thread.throw_vm_error(vm, &err);
            return;
        }
    };

    let (name, descriptor, param_count) = {
        let method = vm.loader.class(declared_class).method(declared_index);
        (
            method.name.clone(),
            method.descriptor.clone(),
            method.parsed.parameters.len(),
        )
    };

    let receiver = thread.frame().peek(param_count).as_reference();
    if receiver.is_null() {
        let class_name = vm.loader.class(declared_class).java_name();
        let message = format!("cannot invoke \"{class_name}.{name}\"");
        let _ = thread.throw_by_name(vm, "java/lang/NullPointerException", &message);
        return;
    }

    let runtime_class = vm.heap.class_of(receiver);
    let Some((target_class, target_index)) = vm.loader.lookup_method(runtime_class, &name, &descriptor)
    else {
        let err = crate::errors::VmError::no_such_method(
            &vm.loader.class(runtime_class).name,
            &name,
            &descriptor,
        );
        let _ = thread.throw_vm_error(vm, &err);
        return;
    };

    if vm.loader.class(target_class).method(target_index).is_abstract() {
        let _ = thread.throw_by_name(
            vm,
            "java/lang/AbstractMethodError",
            &format!("{name}{descriptor}"),
        );
        return;
    }

    thread.invoke(vm, target_class, target_index);
}

/// `newarray` / `anewarray`: negative-size check, resolve the array class,
/// allocate, push.
fn allocate_array_checked(vm: &mut Vm, thread: &mut JavaThread, class_name: &str, count: i32) {
    if count < 0 {
        let _ = thread.throw_by_name(
            vm,
            "java/lang/NegativeArraySizeException",
            &count.to_string(),
        );
        return;
    }
    let class = match vm.loader.load_class(class_name) {
        Ok(class) => class,
        Err(err) => {
            let _ = thread.throw_vm_error(vm, &err);
            return;
        }
    };
    match vm.allocate_array(thread, class, count) {
        Ok(array) => thread.frame_mut().push_reference(array),
        Err(err) => {
            let _ = thread.throw_vm_error(vm, &err);
        }
    }
}

/// Builds the nested arrays of `multianewarray`, outermost dimension first.
/// Descent stops at a zero count, leaving the deeper elements null.
fn allocate_multi_array(
    vm: &mut Vm,
    thread: &mut JavaThread,
    class: ClassId,
    counts: &[i32],
) -> Result<ObjRef, Unwind> {
    let array = match vm.allocate_array(thread, class, counts[0]) {
        Ok(array) => array,
        Err(err) => return Err(thread.throw_vm_error(vm, &err)),
    };
    if counts.len() > 1 && counts[0] > 0 {
        let component_class = vm
            .loader
            .class(class)
            .component_class()
            .expect("a multi-dimensional array has array components");
        let pinned = vm.heap.pin(array);
        for index in 0..counts[0] {
            let element = allocate_multi_array(vm, thread, component_class, &counts[1..])?;
            let array = pinned.get();
            vm.heap.array_set(&vm.loader, array, index, Value::Reference(element));
        }
        return Ok(pinned.get());
    }
    Ok(array)
}

fn checked_array_get(vm: &mut Vm, thread: &mut JavaThread, array: ObjRef, index: i32) -> Option<Value> {
    if array.is_null() {
        let _ = thread.throw_by_name(vm, "java/lang/NullPointerException", "null array read");
        return None;
    }
    let length = vm.heap.array_length(array);
    if index < 0 || index >= length {
        let _ = thread.throw_by_name(
            vm,
            "java/lang/ArrayIndexOutOfBoundsException",
            &format!("Index {index} out of bounds for length {length}"),
        );
        return None;
    }
    Some(vm.heap.array_get(&vm.loader, array, index))
}

fn checked_array_set(vm: &mut Vm, thread: &mut JavaThread, array: ObjRef, index: i32, value: Value) {
    if array.is_null() {
        let _ = thread.throw_by_name(vm, "java/lang/NullPointerException", "null array store");
        return;
    }
    let length = vm.heap.array_length(array);
    if index < 0 || index >= length {
        let _ = thread.throw_by_name(
            vm,
            "java/lang/ArrayIndexOutOfBoundsException",
            &format!("Index {index} out of bounds for length {length}"),
        );
        return;
    }
    vm.heap.array_set(&vm.loader, array, index, value);
}

/// `tableswitch` / `lookupswitch` pad to a four-byte boundary counted from
/// the start of the code array.
fn skip_switch_padding(cursor: &mut Cursor<&[u8]>) {
    let misalignment = cursor.position() % 4;
    if misalignment != 0 {
        cursor.set_position(cursor.position() + (4 - misalignment));
    }
}

/// The shared `fcmp<op>` / `dcmp<op>` semantics: the variants differ only in
/// which value an unordered comparison produces.
fn float_compare(value1: f64, value2: f64, nan_result: i32) -> i32 {
    if value1 > value2 {
        1
    } else if value1 == value2 {
        0
    } else if value1 < value2 {
        -1
    } else {
        nan_result
    }
}
