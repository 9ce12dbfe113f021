//! Copying-collector behaviour: pinning, root tracing, stability across
//! back-to-back cycles.

mod common;

use common::{code, hi, lo, op, vm_with_bootstrap, vm_with_small_heap, ClassBuilder, ACC_PUBLIC, ACC_STATIC};
use geevm::value::Value;

const SENTINEL: i64 = 0xDEAD_BEEF_CAFE_BABE_u64 as i64;

#[test]
fn pinned_array_survives_collection_bit_identically() {
    // Small heap so ordinary allocation pressure forces a collection.
    let (mut vm, mut thread) = vm_with_small_heap(256 * 1024);
    let long_array = vm.resolve_class("[J").unwrap();

    // A doomed object first, so the survivor does not keep its slot by
    // accident and the handle visibly moves.
    vm.allocate_array(&mut thread, long_array, 16).unwrap();

    let array = vm.allocate_array(&mut thread, long_array, 1024).unwrap();
    for index in 0..1024 {
        vm.heap.array_set(&vm.loader, array, index, Value::Long(SENTINEL));
    }
    let pinned = vm.heap.pin(array);
    let hash_before = vm.heap.identity_hash(array);

    let collections_before = vm.heap.collection_count();
    while vm.heap.collection_count() == collections_before {
        vm.allocate_array(&mut thread, long_array, 512).unwrap();
    }

    let survivor = pinned.get();
    assert_ne!(survivor, array, "the survivor should have been relocated");
    assert_eq!(vm.heap.class_of(survivor), long_array);
    assert_eq!(vm.heap.identity_hash(survivor), hash_before);
    assert_eq!(vm.heap.array_length(survivor), 1024);
    for index in 0..1024 {
        assert_eq!(
            vm.heap.array_get(&vm.loader, survivor, index),
            Value::Long(SENTINEL),
            "element {index} after collection"
        );
    }
}

#[test]
fn unpinned_objects_are_collected() {
    let (mut vm, mut thread) = vm_with_bootstrap();
    let int_array = vm.resolve_class("[I").unwrap();

    let keep = vm.allocate_array(&mut thread, int_array, 4).unwrap();
    vm.allocate_array(&mut thread, int_array, 4).unwrap();
    vm.allocate_array(&mut thread, int_array, 4).unwrap();
    let pinned = vm.heap.pin(keep);

    vm.heap.collect(&mut vm.loader, None);

    assert_eq!(vm.heap.object_count(), 1);
    assert_eq!(vm.heap.class_of(pinned.get()), int_array);
}

#[test]
fn back_to_back_collections_preserve_the_reachable_set() {
    let (mut vm, mut thread) = vm_with_bootstrap();
    let int_array = vm.resolve_class("[I").unwrap();

    let first = vm.allocate_array(&mut thread, int_array, 8).unwrap();
    vm.heap.array_set(&vm.loader, first, 3, Value::Int(77));
    let second = vm.allocate_array(&mut thread, int_array, 2).unwrap();
    let first_pin = vm.heap.pin(first);
    let second_pin = vm.heap.pin(second);
    let hashes = (vm.heap.identity_hash(first), vm.heap.identity_hash(second));

    vm.heap.collect(&mut vm.loader, None);
    let after_first = (
        vm.heap.object_count(),
        vm.heap.identity_hash(first_pin.get()),
        vm.heap.identity_hash(second_pin.get()),
    );

    vm.heap.collect(&mut vm.loader, None);
    let after_second = (
        vm.heap.object_count(),
        vm.heap.identity_hash(first_pin.get()),
        vm.heap.identity_hash(second_pin.get()),
    );

    assert_eq!(after_first, after_second);
    assert_eq!(after_first.1, hashes.0);
    assert_eq!(after_first.2, hashes.1);
    assert_eq!(vm.heap.array_get(&vm.loader, first_pin.get(), 3), Value::Int(77));
}

#[test]
fn reference_fields_are_traced_and_rewritten() {
    let (mut vm, mut thread) = vm_with_bootstrap();
    let mut holder = ClassBuilder::new("Holder", Some("java/lang/Object"));
    holder.field(ACC_PUBLIC, "target", "Ljava/lang/Object;");
    let holder_class = vm.define_class(&holder.build()).unwrap();
    let int_array = vm.resolve_class("[I").unwrap();

    // Doomed filler so surviving handles change.
    vm.allocate_array(&mut thread, int_array, 4).unwrap();

    let holder_ref = vm.allocate_instance(&mut thread, holder_class).unwrap();
    let target = vm.allocate_array(&mut thread, int_array, 3).unwrap();
    vm.heap.array_set(&vm.loader, target, 1, Value::Int(123));
    vm.set_field(holder_ref, "target", "Ljava/lang/Object;", Value::Reference(target));

    // Only the holder is pinned; the target must survive through the field.
    let pinned = vm.heap.pin(holder_ref);
    vm.heap.collect(&mut vm.loader, None);

    assert_eq!(vm.heap.object_count(), 2);
    let new_target = vm
        .get_field(pinned.get(), "target", "Ljava/lang/Object;")
        .unwrap()
        .as_reference();
    assert_ne!(new_target, target);
    assert_eq!(vm.heap.class_of(new_target), int_array);
    assert_eq!(vm.heap.array_get(&vm.loader, new_target, 1), Value::Int(123));
}

#[test]
fn static_fields_are_gc_roots() {
    let (mut vm, mut thread) = vm_with_bootstrap();
    let mut owner = ClassBuilder::new("StaticOwner", Some("java/lang/Object"));
    owner.field(ACC_PUBLIC | ACC_STATIC, "kept", "Ljava/lang/Object;");
    let owner_class = vm.define_class(&owner.build()).unwrap();
    let int_array = vm.resolve_class("[I").unwrap();

    let kept = vm.allocate_array(&mut thread, int_array, 5).unwrap();
    vm.heap.array_set(&vm.loader, kept, 0, Value::Int(9));
    vm.set_static_field_by_name(owner_class, "kept", "Ljava/lang/Object;", Value::Reference(kept));

    vm.heap.collect(&mut vm.loader, None);

    assert_eq!(vm.heap.object_count(), 1);
    let survivor = vm
        .get_static_field_by_name(owner_class, "kept", "Ljava/lang/Object;")
        .unwrap()
        .as_reference();
    assert!(!survivor.is_null());
    assert_eq!(vm.heap.array_get(&vm.loader, survivor, 0), Value::Int(9));
}

#[test]
fn live_frame_slots_are_gc_roots() {
    let (mut vm, mut thread) = vm_with_bootstrap();

    // A static method whose local holds the only reference to an array
    // while a native call triggers a collection mid-frame.
    let mut builder = ClassBuilder::new("FrameRoots", Some("java/lang/Object"));
    let force_gc = builder.method_ref("FrameRoots", "forceGc", "()V");
    builder.method_without_code(
        ACC_PUBLIC | ACC_STATIC | common::ACC_NATIVE,
        "forceGc",
        "()V",
    );
    builder.method(
        ACC_PUBLIC | ACC_STATIC,
        "run",
        "()I",
        code(
            3,
            1,
            vec![
                op::ICONST_3,
                op::NEWARRAY,
                10, // int[]
                op::ASTORE_0,
                op::ALOAD_0,
                op::ICONST_1,
                op::BIPUSH,
                55,
                op::IASTORE,
                op::INVOKESTATIC,
                hi(force_gc),
                lo(force_gc),
                op::ALOAD_0,
                op::ICONST_1,
                op::IALOAD,
                op::IRETURN,
            ],
        ),
    );
    let class = vm.define_class(&builder.build()).unwrap();

    fn force_gc_native(
        vm: &mut geevm::vm::Vm,
        thread: &mut geevm::thread::JavaThread,
        _args: &[Value],
    ) -> Option<Value> {
        vm.run_gc(thread);
        None
    }
    vm.natives.register("FrameRoots", "forceGc", "()V", force_gc_native);

    let index = vm.loader.class(class).find_method("run", "()I").unwrap();
    let result = thread.execute_call(&mut vm, class, index, Vec::new());
    assert_eq!(result, Ok(Some(Value::Int(55))));
}

#[test]
fn interned_strings_are_permanent_and_stable() {
    let (mut vm, mut thread) = vm_with_bootstrap();
    let first = vm.intern("stable contents").unwrap();

    // Churn the collected heap; the interned string lives elsewhere.
    let int_array = vm.resolve_class("[I").unwrap();
    vm.allocate_array(&mut thread, int_array, 16).unwrap();
    vm.heap.collect(&mut vm.loader, None);
    vm.heap.collect(&mut vm.loader, None);

    let second = vm.intern("stable contents").unwrap();
    assert_eq!(first, second);
    assert_eq!(vm.string_value(first).as_deref(), Some("stable contents"));
}

#[test]
fn collect_after_every_allocation_keeps_fresh_objects() {
    let settings = geevm::vm::VmSettings {
        class_path: Vec::new(),
        run_gc_after_every_allocation: true,
        ..geevm::vm::VmSettings::default()
    };
    let mut vm = geevm::vm::Vm::new(settings);
    common::install_bootstrap_classes(&mut vm);
    let mut thread = geevm::thread::JavaThread::new("main");

    let int_array = vm.resolve_class("[I").unwrap();
    let array = vm.allocate_array(&mut thread, int_array, 3).unwrap();
    // The diagnostic collection already ran; the handle must be usable.
    vm.heap.array_set(&vm.loader, array, 2, Value::Int(5));
    assert_eq!(vm.heap.array_get(&vm.loader, array, 2), Value::Int(5));
    assert!(vm.heap.collection_count() >= 1);
}
