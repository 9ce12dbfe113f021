//! Decodes class files assembled in-test, byte by byte, so no binary
//! fixtures are needed.

use byteorder::{WriteBytesExt, BE};
use jclass::attributes::AttributeInfo;
use jclass::class_file::ClassFile;
use jclass::constants::CpInfo;
use jclass::errors::FormatCause;

/// Assembles a minimal class file with one `main([Ljava/lang/String;)V`
/// method whose body is a single `return`.
fn minimal_class_bytes() -> Vec<u8> {
    let mut constant_pool: Vec<u8> = Vec::new();
    let mut count: u16 = 1;
    let mut push_utf8 = |pool: &mut Vec<u8>, text: &str| -> u16 {
        pool.write_u8(1).unwrap();
        pool.write_u16::<BE>(text.len() as u16).unwrap();
        pool.extend_from_slice(text.as_bytes());
        count += 1;
        count - 1
    };

    let this_name = push_utf8(&mut constant_pool, "Demo");
    let super_name = push_utf8(&mut constant_pool, "java/lang/Object");
    let main_name = push_utf8(&mut constant_pool, "main");
    let main_desc = push_utf8(&mut constant_pool, "([Ljava/lang/String;)V");
    let code_name = push_utf8(&mut constant_pool, "Code");

    // Two CONSTANT_Class entries referencing the names above.
    constant_pool.write_u8(7).unwrap();
    constant_pool.write_u16::<BE>(this_name).unwrap();
    let this_class = count;
    count += 1;
    constant_pool.write_u8(7).unwrap();
    constant_pool.write_u16::<BE>(super_name).unwrap();
    let super_class = count;
    count += 1;

    let mut bytes: Vec<u8> = Vec::new();
    bytes.write_u32::<BE>(0xCAFEBABE).unwrap();
    bytes.write_u16::<BE>(0).unwrap(); // minor
    bytes.write_u16::<BE>(61).unwrap(); // major, Java 17
    bytes.write_u16::<BE>(count).unwrap();
    bytes.extend_from_slice(&constant_pool);
    bytes.write_u16::<BE>(0x0021).unwrap(); // ACC_PUBLIC | ACC_SUPER
    bytes.write_u16::<BE>(this_class).unwrap();
    bytes.write_u16::<BE>(super_class).unwrap();
    bytes.write_u16::<BE>(0).unwrap(); // interfaces
    bytes.write_u16::<BE>(0).unwrap(); // fields

    bytes.write_u16::<BE>(1).unwrap(); // methods
    bytes.write_u16::<BE>(0x0009).unwrap(); // ACC_PUBLIC | ACC_STATIC
    bytes.write_u16::<BE>(main_name).unwrap();
    bytes.write_u16::<BE>(main_desc).unwrap();
    bytes.write_u16::<BE>(1).unwrap(); // one attribute: Code
    bytes.write_u16::<BE>(code_name).unwrap();
    let code_body: &[u8] = &[0xB1]; // return
    bytes.write_u32::<BE>(12 + code_body.len() as u32).unwrap();
    bytes.write_u16::<BE>(0).unwrap(); // max_stack
    bytes.write_u16::<BE>(1).unwrap(); // max_locals
    bytes.write_u32::<BE>(code_body.len() as u32).unwrap();
    bytes.extend_from_slice(code_body);
    bytes.write_u16::<BE>(0).unwrap(); // exception table
    bytes.write_u16::<BE>(0).unwrap(); // code attributes

    bytes.write_u16::<BE>(0).unwrap(); // class attributes
    bytes
}

#[test]
fn decodes_a_minimal_class() {
    let class_file = ClassFile::from_bytes(&minimal_class_bytes()).unwrap();

    assert_eq!(class_file.major_version, 61);
    assert_eq!(class_file.class_name(), "Demo");
    assert_eq!(class_file.super_class_name(), Some("java/lang/Object"));
    assert!(class_file.interface_names().is_empty());

    assert_eq!(class_file.methods.len(), 1);
    let main = &class_file.methods[0];
    assert_eq!(class_file.method_name(main), "main");
    assert_eq!(class_file.method_descriptor(main), "([Ljava/lang/String;)V");

    let code = main.code().expect("main should carry a Code attribute");
    assert_eq!(code.max_locals, 1);
    assert_eq!(code.code, vec![0xB1]);
    assert!(code.exception_table.is_empty());
}

#[test]
fn rejects_bad_magic() {
    let mut bytes = minimal_class_bytes();
    bytes[0] = 0xDE;
    let err = ClassFile::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err.cause(), FormatCause::BadMagic(_)));
}

#[test]
fn rejects_short_read() {
    let bytes = minimal_class_bytes();
    let err = ClassFile::from_bytes(&bytes[..bytes.len() - 6]).unwrap_err();
    assert!(matches!(err.cause(), FormatCause::UnexpectedEof));
}

#[test]
fn unknown_attributes_are_skipped_by_length() {
    // Append a class-level attribute with an unrecognised name.
    let mut bytes = minimal_class_bytes();

    // Rewrite the constant pool count and append one more Utf8 entry is
    // intrusive; instead reuse the "Demo" Utf8 (index 1) as the attribute
    // name, which no decoder special-cases.
    let len = bytes.len();
    bytes[len - 2..].copy_from_slice(&1u16.to_be_bytes());
    bytes.write_u16::<BE>(1).unwrap(); // name: "Demo"
    bytes.write_u32::<BE>(3).unwrap();
    bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

    let class_file = ClassFile::from_bytes(&bytes).unwrap();
    assert_eq!(class_file.attributes.len(), 1);
    match &class_file.attributes[0] {
        AttributeInfo::Unknown { name, info } => {
            assert_eq!(name, "Demo");
            assert_eq!(info, &vec![0xAA, 0xBB, 0xCC]);
        }
        other => panic!("expected Unknown attribute, got {other:?}"),
    }
}

#[test]
fn constant_pool_exposes_entries_by_index() {
    let class_file = ClassFile::from_bytes(&minimal_class_bytes()).unwrap();
    assert_eq!(class_file.constant_pool.utf8(1), "Demo");
    assert!(matches!(
        class_file.constant_pool.entry(6),
        CpInfo::Class { .. }
    ));
}
