// Collections see handles, class objects and global references as roots, and never disturb the
// objects they visit.

use crate::mem::gc::gc_trigger::GCTriggerType;
use crate::mem::gc::{GCTask, GCTaskCause};
use crate::mem::global_object_storage::GlobalRefType;
use crate::mem::handle_scope::HandleScope;
use crate::mem::object_header::ObjectHeader;
use crate::runtime::coretypes::string::CoreString;
use crate::util::test_util::fixtures::{with_fixture, RuntimeFixture};

fn collect(fixture: &RuntimeFixture) -> usize {
    let mm = fixture.runtime.memory_manager();
    assert!(mm.get_gc().wait_for_gc(GCTask::new(GCTaskCause::ExplicitCause)));
    mm.get_gc_stats().get_last_roots()
}

#[test]
fn loaded_classes_are_roots() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let mut class_objects = 0;
        fixture.extension().visit_loaded_classes(&mut |klass| {
            if klass.managed_object().is_some() {
                class_objects += 1;
            }
        });
        assert!(class_objects > 0);
        assert!(collect(fixture) >= class_objects);
    });
}

#[test]
fn explicit_collections_are_counted() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let stats = fixture.runtime.memory_manager().get_gc_stats();
        let before = stats.get_collections();
        collect(fixture);
        collect(fixture);
        assert_eq!(stats.get_collections(), before + 2);
        assert!(stats.get_collections_by_cause(GCTaskCause::ExplicitCause) >= 2);
        assert!(stats.get_max_pause() >= stats.get_last_pause());
    });
}

#[test]
fn handles_are_roots_while_their_scope_lives() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let ctx = fixture.string_context();
        let baseline = collect(fixture);
        {
            let scope = HandleScope::new(fixture.thread());
            let first = scope.handle(ctx.create_from_utf8(b"first", true).unwrap());
            let second = scope.handle(ctx.create_from_utf8(b"second", true).unwrap());
            assert_eq!(collect(fixture), baseline + 2);
            // Two handles to one object make one root.
            second.set(first.get());
            assert_eq!(collect(fixture), baseline + 1);
            assert!(!ObjectHeader::from_object(first.get()).is_marked());
        }
        assert!(fixture.thread().handle_storage().is_empty());
        assert_eq!(collect(fixture), baseline);
    });
}

#[test]
fn global_references_are_roots_and_weak_ones_are_not() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let ctx = fixture.string_context();
        let storage = fixture.runtime.memory_manager().get_global_object_storage();
        let baseline = collect(fixture);

        let string = ctx.create_from_utf8(b"global", false).unwrap();
        let global = storage.add(string, GlobalRefType::Global).unwrap();
        let weak = storage.add(ctx.create_from_utf8(b"weak", false).unwrap(), GlobalRefType::Weak).unwrap();
        assert_eq!(storage.get_size(GlobalRefType::Global), 1);
        assert_eq!(storage.get_size(GlobalRefType::Weak), 1);
        assert_eq!(collect(fixture), baseline + 1);
        assert_eq!(storage.get(global), Some(string));

        storage.remove(global);
        storage.remove(weak);
        assert_eq!(storage.get(global), None);
        assert_eq!(collect(fixture), baseline);
    });
}

#[test]
fn stopped_gc_ignores_requests() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let mm = fixture.runtime.memory_manager();
        mm.stop_gc();
        assert!(!mm.get_gc().wait_for_gc(GCTask::new(GCTaskCause::ExplicitCause)));
        assert_eq!(mm.get_gc_stats().get_collections_by_cause(GCTaskCause::ExplicitCause), 0);
        mm.start_gc();
        assert!(mm.get_gc().wait_for_gc(GCTask::new(GCTaskCause::ExplicitCause)));
    });
}

#[test]
fn debug_trigger_collects_on_every_allocation() {
    let fixture = RuntimeFixture::with_options(|options| {
        options.gc_trigger_type = GCTriggerType::Debug;
        options.gc_debug_trigger_start = 0;
    });
    let stats = fixture.runtime.memory_manager().get_gc_stats();
    let ctx = fixture.string_context();
    let before = stats.get_collections_by_cause(GCTaskCause::HeapUsageThresholdCause);

    let hello = ctx.create_from_utf8(b"hello, ", true).unwrap();
    let scope = HandleScope::new(fixture.thread());
    let hello = scope.handle(hello);
    let world = scope.handle(ctx.create_from_utf8("мир".as_bytes(), true).unwrap());
    let greeting = ctx.concat(hello.get(), world.get()).unwrap();
    let replaced = ctx.do_replace(greeting, 'l' as u16, 'L' as u16).unwrap();

    assert!(stats.get_collections_by_cause(GCTaskCause::HeapUsageThresholdCause) >= before + 4);
    let greeting = CoreString::from_object(greeting).unwrap();
    assert!(greeting.is_utf16());
    assert!(greeting.strings_are_equal_utf16(&"hello, мир".encode_utf16().collect::<Vec<_>>()));
    assert!(CoreString::from_object(replaced)
        .unwrap()
        .strings_are_equal_utf16(&"heLLo, мир".encode_utf16().collect::<Vec<_>>()));
    assert!(CoreString::from_object(hello.get())
        .unwrap()
        .strings_are_equal_mutf8(b"hello, "));
}

#[test]
fn never_trigger_leaves_collection_to_explicit_requests() {
    let fixture = RuntimeFixture::with_options(|options| {
        options.gc_trigger_type = GCTriggerType::DebugNever;
    });
    let stats = fixture.runtime.memory_manager().get_gc_stats();
    let ctx = fixture.string_context();
    for i in 0..100 {
        ctx.create_from_utf8(format!("string {}", i).as_bytes(), true).unwrap();
    }
    assert_eq!(stats.get_collections_by_cause(GCTaskCause::HeapUsageThresholdCause), 0);
    let before = stats.get_collections();
    collect(&fixture);
    assert_eq!(stats.get_collections(), before + 1);
}
