//! Loading, linking and assignability.

mod common;

use common::{vm_with_bootstrap, ClassBuilder, ACC_PUBLIC, ACC_STATIC};
use geevm::errors::VmErrorKind;

#[test]
fn every_prepared_class_is_rooted_at_object() {
    let (mut vm, _thread) = vm_with_bootstrap();
    for name in [
        "java/lang/Object",
        "java/lang/String",
        "java/lang/RuntimeException",
        "[I",
        "[Ljava/lang/String;",
    ] {
        let class = vm.resolve_class(name).unwrap();
        assert!(vm.loader.hierarchy_is_rooted(class), "{name} should reach Object");
    }
}

#[test]
fn loading_is_monotone() {
    let (mut vm, _thread) = vm_with_bootstrap();
    let first = vm.resolve_class("java/lang/String").unwrap();
    let second = vm.resolve_class("java/lang/String").unwrap();
    assert_eq!(first, second);

    let mut builder = ClassBuilder::new("Once", Some("java/lang/Object"));
    let defined = vm.define_class(&builder.build()).unwrap();
    let mut again = ClassBuilder::new("Once", Some("java/lang/Object"));
    assert_eq!(vm.define_class(&again.build()).unwrap(), defined);
    assert_eq!(vm.resolve_class("Once").unwrap(), defined);
}

#[test]
fn missing_classes_surface_as_class_not_found() {
    let (mut vm, _thread) = vm_with_bootstrap();
    let err = vm.resolve_class("does/not/Exist").unwrap_err();
    assert_eq!(*err.kind(), VmErrorKind::ClassNotFound);
    assert_eq!(err.exception_class(), "java/lang/NoClassDefFoundError");
}

#[test]
fn subclass_layout_extends_the_superclass() {
    let (mut vm, _thread) = vm_with_bootstrap();

    let mut base = ClassBuilder::new("LayoutBase", Some("java/lang/Object"));
    base.field(ACC_PUBLIC, "a", "I").field(ACC_PUBLIC, "b", "J");
    let base_class = vm.define_class(&base.build()).unwrap();

    let mut derived = ClassBuilder::new("LayoutDerived", Some("LayoutBase"));
    derived.field(ACC_PUBLIC, "c", "B");
    let derived_class = vm.define_class(&derived.build()).unwrap();

    let base_record = vm.loader.class(base_class);
    let a_index = base_record.find_field("a", "I").unwrap();
    let b_index = base_record.find_field("b", "J").unwrap();
    let a_offset = base_record.field(a_index).offset;
    let b_offset = base_record.field(b_index).offset;
    assert_eq!(a_offset, 0);
    // Category-2 fields are aligned to their 8-byte width.
    assert_eq!(b_offset, 8);
    assert_eq!(base_record.instance_size, 16);

    let derived_record = vm.loader.class(derived_class);
    // Inherited fields keep their offsets; new fields start after the
    // superclass payload.
    let inherited_a = derived_record.find_field("a", "I").unwrap();
    let inherited_b = derived_record.find_field("b", "J").unwrap();
    assert_eq!(derived_record.field(inherited_a).offset, a_offset);
    assert_eq!(derived_record.field(inherited_b).offset, b_offset);
    let c_index = derived_record.find_field("c", "B").unwrap();
    assert!(derived_record.field(c_index).offset >= base_record.instance_size);
}

#[test]
fn static_fields_live_in_their_own_block() {
    let (mut vm, _thread) = vm_with_bootstrap();
    let mut builder = ClassBuilder::new("Statics", Some("java/lang/Object"));
    builder
        .field(ACC_PUBLIC | ACC_STATIC, "s1", "I")
        .field(ACC_PUBLIC | ACC_STATIC, "s2", "J")
        .field(ACC_PUBLIC, "instance", "I");
    let class = vm.define_class(&builder.build()).unwrap();

    let record = vm.loader.class(class);
    let s1 = record.field(record.find_field("s1", "I").unwrap());
    let s2 = record.field(record.find_field("s2", "J").unwrap());
    let instance = record.field(record.find_field("instance", "I").unwrap());

    assert!(s1.is_static());
    assert!(s2.is_static());
    assert!(!instance.is_static());
    // Instance layout is unaffected by the statics.
    assert_eq!(instance.offset, 0);
    assert_eq!(s1.offset, 0);
    assert_eq!(s2.offset, 8);
    assert!(record.static_block.len() >= 16);
}

#[test]
fn class_assignability_follows_the_hierarchy() {
    let (mut vm, _thread) = vm_with_bootstrap();
    let object = vm.resolve_class("java/lang/Object").unwrap();
    let throwable = vm.resolve_class("java/lang/Throwable").unwrap();
    let runtime = vm.resolve_class("java/lang/RuntimeException").unwrap();

    assert!(vm.loader.is_instance_of(runtime, throwable));
    assert!(vm.loader.is_instance_of(runtime, object));
    assert!(!vm.loader.is_instance_of(throwable, runtime));
}

#[test]
fn interface_assignability() {
    let (mut vm, _thread) = vm_with_bootstrap();
    vm.define_class(&ClassBuilder::interface("tests/Marker").build()).unwrap();

    let mut impl_builder = ClassBuilder::new("tests/Marked", Some("java/lang/Object"));
    impl_builder.implements("tests/Marker");
    let marked = vm.define_class(&impl_builder.build()).unwrap();

    let mut sub_builder = ClassBuilder::new("tests/MarkedSub", Some("tests/Marked"));
    let marked_sub = vm.define_class(&sub_builder.build()).unwrap();

    let marker = vm.resolve_class("tests/Marker").unwrap();
    let object = vm.resolve_class("java/lang/Object").unwrap();

    assert!(vm.loader.is_instance_of(marked, marker));
    // Interfaces inherited through the superclass count too.
    assert!(vm.loader.is_instance_of(marked_sub, marker));
    // An interface value fits only Object among classes.
    assert!(vm.loader.is_instance_of(marker, object));
    assert!(!vm.loader.is_instance_of(object, marker));
}

#[test]
fn array_assignability() {
    let (mut vm, _thread) = vm_with_bootstrap();
    let object = vm.resolve_class("java/lang/Object").unwrap();
    let cloneable = vm.resolve_class("java/lang/Cloneable").unwrap();
    let serializable = vm.resolve_class("java/io/Serializable").unwrap();

    let int_array = vm.resolve_class("[I").unwrap();
    let long_array = vm.resolve_class("[J").unwrap();
    let string_array = vm.resolve_class("[Ljava/lang/String;").unwrap();
    let object_array = vm.resolve_class("[Ljava/lang/Object;").unwrap();
    let nested_int = vm.resolve_class("[[I").unwrap();

    // Arrays are Objects, Cloneable and Serializable.
    assert!(vm.loader.is_instance_of(int_array, object));
    assert!(vm.loader.is_instance_of(int_array, cloneable));
    assert!(vm.loader.is_instance_of(int_array, serializable));

    // Same primitive component only.
    assert!(vm.loader.is_instance_of(int_array, int_array));
    assert!(!vm.loader.is_instance_of(int_array, long_array));

    // Reference components are covariant.
    assert!(vm.loader.is_instance_of(string_array, object_array));
    assert!(!vm.loader.is_instance_of(object_array, string_array));

    // A nested primitive array is an array of references.
    assert!(vm.loader.is_instance_of(nested_int, object_array));
}

#[test]
fn array_classes_know_their_components() {
    let (mut vm, _thread) = vm_with_bootstrap();
    let nested = vm.resolve_class("[[Ljava/lang/String;").unwrap();
    let record = vm.loader.class(nested);
    assert!(record.is_array());
    assert_eq!(record.component_type().unwrap().to_string(), "[Ljava/lang/String;");

    let component = record.component_class().unwrap();
    assert_eq!(vm.loader.class(component).name, "[Ljava/lang/String;");
    assert_eq!(
        vm.loader.class(component).component_class(),
        Some(vm.resolve_class("java/lang/String").unwrap())
    );
}

#[test]
fn method_lookup_walks_supers_and_interfaces() {
    let (mut vm, _thread) = vm_with_bootstrap();
    let runtime = vm.resolve_class("java/lang/RuntimeException").unwrap();
    let throwable = vm.resolve_class("java/lang/Throwable").unwrap();

    // fillInStackTrace is declared on Throwable only.
    let (declaring, index) = vm
        .loader
        .lookup_method(runtime, "fillInStackTrace", "(I)Ljava/lang/Throwable;")
        .unwrap();
    assert_eq!(declaring, throwable);
    assert!(vm.loader.class(declaring).method(index).is_native());

    assert!(vm.loader.lookup_method(runtime, "missing", "()V").is_none());
}
