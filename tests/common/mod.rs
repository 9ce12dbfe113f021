//! Test support: an in-memory class file assembler and the minimal set of
//! platform classes the runtime needs, so the suite runs without a real
//! `java.base` archive.

// Each test binary uses a different slice of this module.
#![allow(dead_code)]

use std::collections::HashMap;

use byteorder::{WriteBytesExt, BE};
use geevm::thread::JavaThread;
use geevm::vm::{Vm, VmSettings};

/// Opcode bytes used by the hand-assembled test methods.
#[allow(dead_code)]
pub mod op {
    pub const ACONST_NULL: u8 = 0x01;
    pub const ICONST_0: u8 = 0x03;
    pub const ICONST_1: u8 = 0x04;
    pub const ICONST_2: u8 = 0x05;
    pub const ICONST_3: u8 = 0x06;
    pub const ICONST_5: u8 = 0x08;
    pub const ICONST_M1: u8 = 0x02;
    pub const LCONST_1: u8 = 0x0A;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC2_W: u8 = 0x14;
    pub const ILOAD_0: u8 = 0x1A;
    pub const ILOAD_1: u8 = 0x1B;
    pub const ILOAD_2: u8 = 0x1C;
    pub const LLOAD_0: u8 = 0x1E;
    pub const LLOAD_2: u8 = 0x20;
    pub const ALOAD_0: u8 = 0x2A;
    pub const ALOAD_1: u8 = 0x2B;
    pub const IALOAD: u8 = 0x2E;
    pub const ISTORE_0: u8 = 0x3B;
    pub const ISTORE_1: u8 = 0x3C;
    pub const ASTORE_0: u8 = 0x4B;
    pub const ASTORE_1: u8 = 0x4C;
    pub const IASTORE: u8 = 0x4F;
    pub const POP: u8 = 0x57;
    pub const DUP: u8 = 0x59;
    pub const IADD: u8 = 0x60;
    pub const LADD: u8 = 0x61;
    pub const IDIV: u8 = 0x6C;
    pub const IINC: u8 = 0x84;
    pub const I2L: u8 = 0x85;
    pub const LCMP: u8 = 0x94;
    pub const IFEQ: u8 = 0x99;
    pub const IF_ICMPGE: u8 = 0xA2;
    pub const GOTO: u8 = 0xA7;
    pub const TABLESWITCH: u8 = 0xAA;
    pub const LOOKUPSWITCH: u8 = 0xAB;
    pub const IRETURN: u8 = 0xAC;
    pub const LRETURN: u8 = 0xAD;
    pub const ARETURN: u8 = 0xB0;
    pub const RETURN: u8 = 0xB1;
    pub const GETSTATIC: u8 = 0xB2;
    pub const PUTSTATIC: u8 = 0xB3;
    pub const GETFIELD: u8 = 0xB4;
    pub const PUTFIELD: u8 = 0xB5;
    pub const INVOKEVIRTUAL: u8 = 0xB6;
    pub const INVOKESPECIAL: u8 = 0xB7;
    pub const INVOKESTATIC: u8 = 0xB8;
    pub const NEW: u8 = 0xBB;
    pub const NEWARRAY: u8 = 0xBC;
    pub const ANEWARRAY: u8 = 0xBD;
    pub const ARRAYLENGTH: u8 = 0xBE;
    pub const ATHROW: u8 = 0xBF;
    pub const CHECKCAST: u8 = 0xC0;
    pub const INSTANCEOF: u8 = 0xC1;
}

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;

#[derive(Clone)]
enum Constant {
    Utf8(String),
    Integer(i32),
    Long(i64),
    Class(u16),
    String(u16),
    NameAndType(u16, u16),
    Fieldref(u16, u16),
    Methodref(u16, u16),
}

impl Constant {
    /// Long and double constants take two pool slots.
    fn slots(&self) -> u16 {
        match self {
            Constant::Long(_) => 2,
            _ => 1,
        }
    }
}

pub struct CodeSpec {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    /// `(start_pc, end_pc, handler_pc, catch class index or 0)`
    pub handlers: Vec<(u16, u16, u16, u16)>,
}

pub fn code(max_stack: u16, max_locals: u16, bytes: Vec<u8>) -> CodeSpec {
    CodeSpec {
        max_stack,
        max_locals,
        code: bytes,
        handlers: Vec::new(),
    }
}

struct FieldSpec {
    access_flags: u16,
    name: u16,
    descriptor: u16,
    constant_value: Option<u16>,
}

struct MethodSpec {
    access_flags: u16,
    name: u16,
    descriptor: u16,
    code: Option<CodeSpec>,
}

/// Assembles one class file. Constant pool entries are deduplicated, and
/// the indices handed back can be embedded into code with [`hi`]/[`lo`].
pub struct ClassBuilder {
    name: String,
    super_name: Option<String>,
    access_flags: u16,
    interfaces: Vec<String>,
    constants: Vec<Constant>,
    next_index: u16,
    dedupe: HashMap<String, u16>,
    fields: Vec<FieldSpec>,
    methods: Vec<MethodSpec>,
}

pub fn hi(index: u16) -> u8 {
    (index >> 8) as u8
}

pub fn lo(index: u16) -> u8 {
    (index & 0xFF) as u8
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: Option<&str>) -> ClassBuilder {
        ClassBuilder {
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            access_flags: ACC_PUBLIC | ACC_SUPER,
            interfaces: Vec::new(),
            constants: Vec::new(),
            next_index: 1,
            dedupe: HashMap::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn interface(name: &str) -> ClassBuilder {
        let mut builder = ClassBuilder::new(name, Some("java/lang/Object"));
        builder.access_flags = ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT;
        builder
    }

    fn push(&mut self, key: String, constant: Constant) -> u16 {
        if let Some(&existing) = self.dedupe.get(&key) {
            return existing;
        }
        let index = self.next_index;
        self.next_index += constant.slots();
        self.constants.push(constant);
        self.dedupe.insert(key, index);
        index
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        self.push(format!("u:{text}"), Constant::Utf8(text.to_string()))
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.push(format!("c:{name}"), Constant::Class(name_index))
    }

    pub fn string(&mut self, text: &str) -> u16 {
        let text_index = self.utf8(text);
        self.push(format!("s:{text}"), Constant::String(text_index))
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.push(format!("i:{value}"), Constant::Integer(value))
    }

    pub fn long(&mut self, value: i64) -> u16 {
        self.push(format!("j:{value}"), Constant::Long(value))
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.push(
            format!("nt:{name}:{descriptor}"),
            Constant::NameAndType(name_index, descriptor_index),
        )
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let nat_index = self.name_and_type(name, descriptor);
        self.push(
            format!("f:{class}:{name}:{descriptor}"),
            Constant::Fieldref(class_index, nat_index),
        )
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let nat_index = self.name_and_type(name, descriptor);
        self.push(
            format!("m:{class}:{name}:{descriptor}"),
            Constant::Methodref(class_index, nat_index),
        )
    }

    pub fn field(&mut self, access_flags: u16, name: &str, descriptor: &str) -> &mut Self {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.fields.push(FieldSpec {
            access_flags,
            name,
            descriptor,
            constant_value: None,
        });
        self
    }

    pub fn field_with_constant(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        constant_value: u16,
    ) -> &mut Self {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.fields.push(FieldSpec {
            access_flags,
            name,
            descriptor,
            constant_value: Some(constant_value),
        });
        self
    }

    pub fn method(&mut self, access_flags: u16, name: &str, descriptor: &str, code: CodeSpec) -> &mut Self {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.methods.push(MethodSpec {
            access_flags,
            name,
            descriptor,
            code: Some(code),
        });
        self
    }

    /// Declares a method with no code: abstract or native.
    pub fn method_without_code(&mut self, access_flags: u16, name: &str, descriptor: &str) -> &mut Self {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.methods.push(MethodSpec {
            access_flags,
            name,
            descriptor,
            code: None,
        });
        self
    }

    pub fn implements(&mut self, name: &str) -> &mut Self {
        self.interfaces.push(name.to_string());
        self
    }

    pub fn build(&mut self) -> Vec<u8> {
        let this_class = self.class(&self.name.clone());
        let super_class = match self.super_name.clone() {
            Some(name) => self.class(&name),
            None => 0,
        };
        let interface_indices: Vec<u16> = self
            .interfaces
            .clone()
            .iter()
            .map(|name| self.class(name))
            .collect();
        let code_attr = if self.methods.iter().any(|m| m.code.is_some()) {
            self.utf8("Code")
        } else {
            0
        };
        let constant_value_attr = if self.fields.iter().any(|f| f.constant_value.is_some()) {
            self.utf8("ConstantValue")
        } else {
            0
        };

        let mut bytes: Vec<u8> = Vec::new();
        bytes.write_u32::<BE>(0xCAFEBABE).unwrap();
        bytes.write_u16::<BE>(0).unwrap();
        bytes.write_u16::<BE>(61).unwrap();

        bytes.write_u16::<BE>(self.next_index).unwrap();
        for constant in &self.constants {
            match constant {
                Constant::Utf8(text) => {
                    bytes.write_u8(1).unwrap();
                    bytes.write_u16::<BE>(text.len() as u16).unwrap();
                    bytes.extend_from_slice(text.as_bytes());
                }
                Constant::Integer(value) => {
                    bytes.write_u8(3).unwrap();
                    bytes.write_i32::<BE>(*value).unwrap();
                }
                Constant::Long(value) => {
                    bytes.write_u8(5).unwrap();
                    bytes.write_i64::<BE>(*value).unwrap();
                }
                Constant::Class(name) => {
                    bytes.write_u8(7).unwrap();
                    bytes.write_u16::<BE>(*name).unwrap();
                }
                Constant::String(text) => {
                    bytes.write_u8(8).unwrap();
                    bytes.write_u16::<BE>(*text).unwrap();
                }
                Constant::Fieldref(class, nat) => {
                    bytes.write_u8(9).unwrap();
                    bytes.write_u16::<BE>(*class).unwrap();
                    bytes.write_u16::<BE>(*nat).unwrap();
                }
                Constant::Methodref(class, nat) => {
                    bytes.write_u8(10).unwrap();
                    bytes.write_u16::<BE>(*class).unwrap();
                    bytes.write_u16::<BE>(*nat).unwrap();
                }
                Constant::NameAndType(name, descriptor) => {
                    bytes.write_u8(12).unwrap();
                    bytes.write_u16::<BE>(*name).unwrap();
                    bytes.write_u16::<BE>(*descriptor).unwrap();
                }
            }
        }

        bytes.write_u16::<BE>(self.access_flags).unwrap();
        bytes.write_u16::<BE>(this_class).unwrap();
        bytes.write_u16::<BE>(super_class).unwrap();

        bytes.write_u16::<BE>(interface_indices.len() as u16).unwrap();
        for index in interface_indices {
            bytes.write_u16::<BE>(index).unwrap();
        }

        bytes.write_u16::<BE>(self.fields.len() as u16).unwrap();
        for field in &self.fields {
            bytes.write_u16::<BE>(field.access_flags).unwrap();
            bytes.write_u16::<BE>(field.name).unwrap();
            bytes.write_u16::<BE>(field.descriptor).unwrap();
            match field.constant_value {
                Some(constant) => {
                    bytes.write_u16::<BE>(1).unwrap();
                    bytes.write_u16::<BE>(constant_value_attr).unwrap();
                    bytes.write_u32::<BE>(2).unwrap();
                    bytes.write_u16::<BE>(constant).unwrap();
                }
                None => bytes.write_u16::<BE>(0).unwrap(),
            }
        }

        bytes.write_u16::<BE>(self.methods.len() as u16).unwrap();
        for method in &self.methods {
            bytes.write_u16::<BE>(method.access_flags).unwrap();
            bytes.write_u16::<BE>(method.name).unwrap();
            bytes.write_u16::<BE>(method.descriptor).unwrap();
            match &method.code {
                Some(spec) => {
                    bytes.write_u16::<BE>(1).unwrap();
                    bytes.write_u16::<BE>(code_attr).unwrap();
                    let length = 12 + spec.code.len() as u32 + spec.handlers.len() as u32 * 8;
                    bytes.write_u32::<BE>(length).unwrap();
                    bytes.write_u16::<BE>(spec.max_stack).unwrap();
                    bytes.write_u16::<BE>(spec.max_locals).unwrap();
                    bytes.write_u32::<BE>(spec.code.len() as u32).unwrap();
                    bytes.extend_from_slice(&spec.code);
                    bytes.write_u16::<BE>(spec.handlers.len() as u16).unwrap();
                    for (start, end, handler, catch_type) in &spec.handlers {
                        bytes.write_u16::<BE>(*start).unwrap();
                        bytes.write_u16::<BE>(*end).unwrap();
                        bytes.write_u16::<BE>(*handler).unwrap();
                        bytes.write_u16::<BE>(*catch_type).unwrap();
                    }
                    bytes.write_u16::<BE>(0).unwrap();
                }
                None => bytes.write_u16::<BE>(0).unwrap(),
            }
        }

        bytes.write_u16::<BE>(0).unwrap();
        bytes
    }
}

/// A default constructor chaining to the superclass.
fn default_ctor(builder: &mut ClassBuilder, super_name: &str) {
    let super_init = builder.method_ref(super_name, "<init>", "()V");
    builder.method(
        ACC_PUBLIC,
        "<init>",
        "()V",
        code(
            1,
            1,
            vec![op::ALOAD_0, op::INVOKESPECIAL, hi(super_init), lo(super_init), op::RETURN],
        ),
    );
}

/// A `(String)` constructor chaining to the superclass.
fn message_ctor(builder: &mut ClassBuilder, super_name: &str) {
    let super_init = builder.method_ref(super_name, "<init>", "(Ljava/lang/String;)V");
    builder.method(
        ACC_PUBLIC,
        "<init>",
        "(Ljava/lang/String;)V",
        code(
            2,
            2,
            vec![
                op::ALOAD_0,
                op::ALOAD_1,
                op::INVOKESPECIAL,
                hi(super_init),
                lo(super_init),
                op::RETURN,
            ],
        ),
    );
}

fn throwable_subclass(name: &str, super_name: &str) -> Vec<u8> {
    let mut builder = ClassBuilder::new(name, Some(super_name));
    default_ctor(&mut builder, super_name);
    message_ctor(&mut builder, super_name);
    builder.build()
}

/// Installs the platform classes the runtime itself depends on: `Object`,
/// `Class`, `String`, the array interfaces, `StackTraceElement` and the
/// `Throwable` hierarchy the VM raises.
pub fn install_bootstrap_classes(vm: &mut Vm) {
    let mut object = ClassBuilder::new("java/lang/Object", None);
    object.method(ACC_PUBLIC, "<init>", "()V", code(0, 1, vec![op::RETURN]));
    object.method_without_code(ACC_PUBLIC | ACC_NATIVE, "hashCode", "()I");
    object.method_without_code(ACC_PUBLIC | ACC_NATIVE, "getClass", "()Ljava/lang/Class;");
    vm.define_class(&object.build()).unwrap();

    vm.define_class(&ClassBuilder::interface("java/lang/Cloneable").build())
        .unwrap();
    vm.define_class(&ClassBuilder::interface("java/io/Serializable").build())
        .unwrap();

    let mut class_class = ClassBuilder::new("java/lang/Class", Some("java/lang/Object"));
    class_class.field(ACC_PUBLIC, "name", "Ljava/lang/String;");
    vm.define_class(&class_class.build()).unwrap();

    let mut string = ClassBuilder::new("java/lang/String", Some("java/lang/Object"));
    string
        .field(ACC_PUBLIC, "value", "[B")
        .field(ACC_PUBLIC, "coder", "B")
        .field(ACC_PUBLIC, "hash", "I")
        .field(ACC_PUBLIC, "hashIsZero", "Z");
    string.implements("java/io/Serializable");
    vm.define_class(&string.build()).unwrap();

    let mut element = ClassBuilder::new("java/lang/StackTraceElement", Some("java/lang/Object"));
    element
        .field(ACC_PUBLIC, "declaringClass", "Ljava/lang/String;")
        .field(ACC_PUBLIC, "methodName", "Ljava/lang/String;")
        .field(ACC_PUBLIC, "lineNumber", "I");
    vm.define_class(&element.build()).unwrap();

    let mut throwable = ClassBuilder::new("java/lang/Throwable", Some("java/lang/Object"));
    throwable
        .field(ACC_PUBLIC, "detailMessage", "Ljava/lang/String;")
        .field(ACC_PUBLIC, "backtrace", "Ljava/lang/Object;")
        .field(ACC_PUBLIC, "stackTrace", "[Ljava/lang/StackTraceElement;")
        .field(ACC_PUBLIC, "depth", "I");
    throwable.method_without_code(
        ACC_PUBLIC | ACC_NATIVE,
        "fillInStackTrace",
        "(I)Ljava/lang/Throwable;",
    );
    let object_init = throwable.method_ref("java/lang/Object", "<init>", "()V");
    let fill_in = throwable.method_ref("java/lang/Throwable", "fillInStackTrace", "(I)Ljava/lang/Throwable;");
    throwable.method(
        ACC_PUBLIC,
        "<init>",
        "()V",
        code(
            2,
            1,
            vec![
                op::ALOAD_0,
                op::INVOKESPECIAL,
                hi(object_init),
                lo(object_init),
                op::ALOAD_0,
                op::ICONST_0,
                op::INVOKEVIRTUAL,
                hi(fill_in),
                lo(fill_in),
                op::POP,
                op::RETURN,
            ],
        ),
    );
    let message_field = throwable.field_ref("java/lang/Throwable", "detailMessage", "Ljava/lang/String;");
    throwable.method(
        ACC_PUBLIC,
        "<init>",
        "(Ljava/lang/String;)V",
        code(
            2,
            2,
            vec![
                op::ALOAD_0,
                op::INVOKESPECIAL,
                hi(object_init),
                lo(object_init),
                op::ALOAD_0,
                op::ALOAD_1,
                op::PUTFIELD,
                hi(message_field),
                lo(message_field),
                op::ALOAD_0,
                op::ICONST_0,
                op::INVOKEVIRTUAL,
                hi(fill_in),
                lo(fill_in),
                op::POP,
                op::RETURN,
            ],
        ),
    );
    vm.define_class(&throwable.build()).unwrap();

    for (name, super_name) in [
        ("java/lang/Exception", "java/lang/Throwable"),
        ("java/lang/Error", "java/lang/Throwable"),
        ("java/lang/RuntimeException", "java/lang/Exception"),
        ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
        ("java/lang/ArrayIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
        ("java/lang/NullPointerException", "java/lang/RuntimeException"),
        ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
        ("java/lang/ClassCastException", "java/lang/RuntimeException"),
        ("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
        ("java/lang/OutOfMemoryError", "java/lang/Error"),
        ("java/lang/InternalError", "java/lang/Error"),
        ("java/lang/NoClassDefFoundError", "java/lang/Error"),
        ("java/lang/NoSuchFieldError", "java/lang/Error"),
        ("java/lang/NoSuchMethodError", "java/lang/Error"),
        ("java/lang/UnsatisfiedLinkError", "java/lang/Error"),
        ("java/lang/AbstractMethodError", "java/lang/Error"),
        ("java/lang/InstantiationError", "java/lang/Error"),
    ] {
        vm.define_class(&throwable_subclass(name, super_name)).unwrap();
    }
}

/// A VM with the bootstrap classes installed and a main thread, the setup
/// every scenario test starts from.
#[allow(dead_code)]
pub fn vm_with_bootstrap() -> (Vm, JavaThread) {
    let settings = VmSettings {
        class_path: Vec::new(),
        ..VmSettings::default()
    };
    let mut vm = Vm::new(settings);
    install_bootstrap_classes(&mut vm);
    (vm, JavaThread::new("main"))
}

/// Like [`vm_with_bootstrap`] with a deliberately small heap, for tests
/// that want collections to happen.
#[allow(dead_code)]
pub fn vm_with_small_heap(max_heap_size: usize) -> (Vm, JavaThread) {
    let settings = VmSettings {
        class_path: Vec::new(),
        max_heap_size,
        ..VmSettings::default()
    };
    let mut vm = Vm::new(settings);
    install_bootstrap_classes(&mut vm);
    (vm, JavaThread::new("main"))
}
