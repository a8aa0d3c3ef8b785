// Every collection moves the strings and arrays the handles refer to and overwrites the old
// payload. Factories that allocate must read their sources through handles to see the moved
// copies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::mem::gc::gc_trigger::GCTriggerType;
use crate::mem::handle_scope::{HandleScope, VMHandle};
use crate::mem::heap_manager::ObjectInit;
use crate::mem::object_header::ObjectHeader;
use crate::runtime::class::ClassRoot;
use crate::runtime::coretypes::array::Array;
use crate::runtime::coretypes::string::CoreString;
use crate::runtime::thread::ManagedThread;
use crate::util::constants::DEFAULT_OBJECT_ALIGNMENT;
use crate::util::test_util::fixtures::RuntimeFixture;
use crate::util::ObjectReference;
use crate::vm::PandaVm;

const STALE_BYTE: u8 = b'#';

fn move_object(vm: &dyn PandaVm, object: ObjectReference) -> ObjectReference {
    let header = ObjectHeader::from_object(object);
    let Some(klass) = header.class() else {
        return object;
    };
    let payload_offset = if klass.is_string_class() {
        CoreString::data_offset()
    } else if klass.is_array_class() {
        Array::data_offset()
    } else {
        return object;
    };
    let size = header.object_size();
    let thread = ManagedThread::current().unwrap();
    let copy = vm
        .heap_manager()
        .allocate_object(klass, size, DEFAULT_OBJECT_ALIGNMENT, &thread, ObjectInit::CallerInitialized)
        .unwrap();
    unsafe {
        std::ptr::copy_nonoverlapping(
            object.to_raw_address().to_ptr::<u8>(),
            copy.to_raw_address().to_mut_ptr::<u8>(),
            size,
        );
        std::ptr::write_bytes(
            (object.to_raw_address() + payload_offset).to_mut_ptr::<u8>(),
            STALE_BYTE,
            size - payload_offset,
        );
    }
    copy
}

/// A runtime that collects before every allocation and moves the handled objects each time.
fn moving_runtime() -> (RuntimeFixture, Arc<AtomicUsize>) {
    let fixture = RuntimeFixture::with_options(|options| {
        options.gc_trigger_type = GCTriggerType::Debug;
        options.gc_debug_trigger_start = 0;
    });
    let moves = Arc::new(AtomicUsize::new(0));
    let counter = moves.clone();
    fixture
        .runtime
        .memory_manager()
        .get_gc()
        .set_relocator(Some(Box::new(move |vm: &dyn PandaVm, object: ObjectReference| {
            let moved = move_object(vm, object);
            if moved != object {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            moved
        })));
    (fixture, moves)
}

fn text(object: ObjectReference) -> String {
    String::from_utf16(&CoreString::from_object(object).unwrap().to_utf16()).unwrap()
}

fn is_stale(object: ObjectReference) -> bool {
    let stale_unit = u16::from_le_bytes([STALE_BYTE, STALE_BYTE]);
    CoreString::from_object(object)
        .unwrap()
        .data()
        .units()
        .all(|unit| unit == STALE_BYTE as u16 || unit == stale_unit)
}

/// Run `build` on the current location of `source`. Checks that `source` moved while `build`
/// allocated, so the result can only be right if it was read from the moved copy.
fn build_from_moving_source(
    source: &VMHandle<'_>,
    build: impl FnOnce(ObjectReference) -> Option<ObjectReference>,
) -> ObjectReference {
    let old = source.get();
    let result = build(old).unwrap();
    assert_ne!(source.get(), old);
    result
}

#[test]
fn collections_move_handled_strings() {
    let (fixture, moves) = moving_runtime();
    let ctx = fixture.string_context();
    let scope = HandleScope::new(fixture.thread());
    let panda = scope.handle(ctx.create_from_utf8(b"panda", true).unwrap());
    let old = panda.get();
    let before = moves.load(Ordering::SeqCst);

    ctx.create_from_utf8(b"trigger", true).unwrap();

    assert!(moves.load(Ordering::SeqCst) > before);
    assert_ne!(panda.get(), old);
    assert!(is_stale(old));
    assert_eq!(text(panda.get()), "panda");
    assert_eq!(fixture.runtime.memory_manager().get_heap_manager().verify_heap(), 0);
}

#[test]
fn copies_read_the_moved_source() {
    let (fixture, _) = moving_runtime();
    let ctx = fixture.string_context();
    let scope = HandleScope::new(fixture.thread());
    let narrow = scope.handle(ctx.create_from_utf8(b"panda", true).unwrap());
    let wide = scope.handle(ctx.create_from_utf8("панда".as_bytes(), true).unwrap());

    let copy = build_from_moving_source(&narrow, |src| ctx.create_from_string(src));
    assert_eq!(text(copy), "panda");
    let copy = build_from_moving_source(&wide, |src| ctx.create_from_string(src));
    assert_eq!(text(copy), "панда");
}

#[test]
fn concatenation_reads_both_moved_sources() {
    let (fixture, _) = moving_runtime();
    let ctx = fixture.string_context();
    let scope = HandleScope::new(fixture.thread());
    let first = scope.handle(ctx.create_from_utf8(b"red ", true).unwrap());
    let second = scope.handle(ctx.create_from_utf8("панда".as_bytes(), true).unwrap());
    let second_before = second.get();

    let joined = build_from_moving_source(&first, |src| ctx.concat(src, second.get()));

    assert_ne!(second.get(), second_before);
    assert!(is_stale(second_before));
    assert_eq!(text(joined), "red панда");
}

#[test]
fn replacement_reads_the_moved_source() {
    let (fixture, _) = moving_runtime();
    let ctx = fixture.string_context();
    let scope = HandleScope::new(fixture.thread());
    let source = scope.handle(ctx.create_from_utf8(b"banana", true).unwrap());

    let replaced = build_from_moving_source(&source, |src| ctx.do_replace(src, 'a' as u16, 'o' as u16));

    assert_eq!(text(replaced), "bonono");
    assert_eq!(text(source.get()), "banana");
}

#[test]
fn substrings_read_the_moved_source() {
    let (fixture, _) = moving_runtime();
    let ctx = fixture.string_context();
    let scope = HandleScope::new(fixture.thread());
    let narrow = scope.handle(ctx.create_from_utf8(b"red panda", true).unwrap());
    let wide = scope.handle(ctx.create_from_utf8("малая панда".as_bytes(), true).unwrap());

    let tail = build_from_moving_source(&narrow, |src| ctx.fast_sub_string(src, 4, 5));
    assert_eq!(text(tail), "panda");
    let tail = build_from_moving_source(&wide, |src| ctx.fast_sub_string(src, 6, 5));
    assert_eq!(text(tail), "панда");
}

#[test]
fn arrays_are_read_after_they_moved() {
    let (fixture, _) = moving_runtime();
    let ctx = fixture.string_context();
    let scope = HandleScope::new(fixture.thread());
    let source = scope.handle(ctx.create_from_utf8("панда".as_bytes(), true).unwrap());

    let chars = scope.handle(build_from_moving_source(&source, |src| ctx.to_char_array(src)));
    assert_eq!(Array::from_object(chars.get()).unwrap().data::<u16>(), &utf16("панда")[..]);

    let string = build_from_moving_source(&chars, |array| ctx.create_new_string_from_chars(1, 3, array));
    assert_eq!(text(string), "анд");

    let klass = fixture.extension().get_class_root(ClassRoot::ArrayU8).unwrap();
    let heap = fixture.runtime.memory_manager().get_heap_manager();
    let bytes = scope.handle(Array::create(heap, &klass, 5, fixture.thread()).unwrap());
    let array = Array::from_object(bytes.get()).unwrap();
    for (i, &b) in b"panda".iter().enumerate() {
        array.set::<u8>(i, b);
    }
    let string = build_from_moving_source(&bytes, |array| ctx.create_new_string_from_bytes(0, 5, 0, array));
    assert_eq!(text(string), "panda");
}

fn utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}
