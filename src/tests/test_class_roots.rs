use strum::IntoEnumIterator;

use crate::mem::object_header::{ObjectHeader, OBJECT_HEADER_SIZE};
use crate::runtime::class::{AccessFlags, Class, ClassRoot, ClassState, TypeId};
use crate::runtime::class_helper::ClassHelper;
use crate::runtime::coretypes::class::ClassObject;
use crate::util::test_util::fixtures::{with_fixture, RuntimeFixture};

#[test]
fn every_root_exists_and_is_initialized() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let ext = fixture.extension();
        for root in ClassRoot::iter() {
            let klass = ext
                .get_class_root(root)
                .unwrap_or_else(|| panic!("class root {} is missing", root));
            assert_eq!(klass.get_state(), ClassState::Initialized, "{}", root);
            assert_eq!(ext.find_loaded_class(klass.descriptor(), None), Some(klass));
        }
    });
}

#[test]
fn registering_a_second_root_keeps_the_first() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let ext = fixture.extension();
        let heap = fixture.runtime.memory_manager().get_heap_manager();
        let object_root = ext.get_class_root(ClassRoot::Object).unwrap();
        let objects = heap.get_objects_count();
        let loaded = ext.num_loaded_classes();

        let duplicate = ext
            .create_class(object_root.descriptor(), 0, 0, Class::compute_class_size(0, 0, 0))
            .unwrap();
        let duplicate_object = duplicate.managed_object().unwrap();
        let registered = fixture.runtime.class_linker().add_class_root(ext, duplicate);

        assert_eq!(registered, object_root);
        assert!(!heap.is_live_object(duplicate_object));
        assert_eq!(heap.get_objects_count(), objects);
        assert_eq!(ext.num_loaded_classes(), loaded);
        assert_eq!(ext.get_class_root(ClassRoot::Object), Some(object_root));
    });
}

#[test]
fn class_of_classes_describes_itself() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let ext = fixture.extension();
        let class_class = ext.get_class_root(ClassRoot::Class).unwrap();
        let object = class_class.managed_object().unwrap();
        let header_class = ObjectHeader::from_object(object).class().unwrap();
        assert!(std::ptr::eq(header_class, &*class_class));
        assert!(class_class.is_class_class());
        assert_eq!(ClassObject::from_object(object).runtime_class(), Some(class_class));

        // every other class object is an instance of it
        let string_class = ext.get_class_root(ClassRoot::String).unwrap();
        let string_object = string_class.managed_object().unwrap();
        let header_class = ObjectHeader::from_object(string_object).class().unwrap();
        assert!(std::ptr::eq(header_class, &*class_class));
    });
}

#[test]
fn object_class_comes_from_the_boot_files() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let ext = fixture.extension();
        let object_class = ext.get_class_root(ClassRoot::Object).unwrap();
        assert_eq!(object_class.descriptor(), b"Lpanda/Object;");
        assert_eq!(object_class.source().unwrap().filename, "test-boot.abc");
        assert_eq!(object_class.object_size(), OBJECT_HEADER_SIZE);
        assert_eq!(object_class.get_base(), None);
        assert_eq!(ext.get_class_root(ClassRoot::Class).unwrap().get_base(), Some(object_class));
    });
}

#[test]
fn string_root() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let ext = fixture.extension();
        let string_class = ext.get_class_root(ClassRoot::String).unwrap();
        assert!(string_class.is_string_class());
        assert!(string_class.is_final());
        assert_eq!(string_class.get_base(), ext.get_class_root(ClassRoot::Object));
        assert!(ext.is_compressed_strings_enabled());
    });
}

#[test]
fn compressed_strings_follow_the_options() {
    let fixture = RuntimeFixture::with_options(|options| options.compressed_strings_enabled = false);
    assert!(!fixture.extension().is_compressed_strings_enabled());
    assert!(!fixture.string_context().is_compressed_strings_enabled());
}

#[test]
fn primitive_roots() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let ext = fixture.extension();
        let i32_class = ext.get_class_root(ClassRoot::I32).unwrap();
        assert_eq!(i32_class.get_type(), TypeId::I32);
        assert_eq!(i32_class.descriptor(), b"I");
        assert!(i32_class.is_primitive());
        assert!(!i32_class.is_instantiable());
        assert_eq!(i32_class.get_base(), None);
        for root in ClassRoot::iter().filter(|root| root.is_primitive()) {
            let klass = ext.get_class_root(root).unwrap();
            assert_eq!(
                klass.access_flags(),
                AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ABSTRACT,
                "{}",
                root
            );
            assert_eq!(klass.vtable_size(), 0);
            assert_eq!(klass.imt_size(), 0);
        }
    });
}

#[test]
fn array_roots_wrap_their_components() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let ext = fixture.extension();
        let object_class = ext.get_class_root(ClassRoot::Object);
        let array_roots = ClassRoot::iter().filter(|root| root.is_array());
        assert_eq!(array_roots.clone().count(), 14);
        for root in array_roots {
            let klass = ext.get_class_root(root).unwrap();
            let component = klass.get_component_type().unwrap();
            assert!(klass.is_array_class(), "{}", root);
            assert_eq!(klass.get_base(), object_class, "{}", root);
            assert_eq!(
                klass.descriptor(),
                &ClassHelper::get_array_descriptor(component.descriptor())[..]
            );
            let flags = klass.access_flags();
            assert!(flags.contains(AccessFlags::FINAL | AccessFlags::ABSTRACT), "{}", root);
            assert!(!flags.contains(AccessFlags::INTERFACE));
            assert!(klass.is_instantiable());
        }
        let u16_array = ext.get_class_root(ClassRoot::ArrayU16).unwrap();
        assert_eq!(u16_array.get_component_type(), ext.get_class_root(ClassRoot::U16));
        assert_eq!(u16_array.component_size(), 2);
        let string_array = ext.get_class_root(ClassRoot::ArrayString).unwrap();
        assert_eq!(string_array.descriptor(), b"[Lpanda/String;");
        assert_eq!(string_array.get_component_type(), ext.get_class_root(ClassRoot::String));
        let class_array = ext.get_class_root(ClassRoot::ArrayClass).unwrap();
        assert_eq!(class_array.get_component_type(), ext.get_class_root(ClassRoot::Class));
    });
}

#[test]
fn array_classes_share_the_object_layout() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let ext = fixture.extension();
        let object_class = ext.get_class_root(ClassRoot::Object).unwrap();
        for root in ClassRoot::iter().filter(|root| root.is_array()) {
            let klass = ext.get_class_root(root).unwrap();
            assert_eq!(klass.vtable_size(), object_class.vtable_size());
            assert_eq!(klass.class_size(), ext.get_class_size(ClassRoot::Object));
        }
    });
}

#[test]
fn arrays_of_loaded_classes() {
    with_fixture::<RuntimeFixture, _>(|fixture| {
        let ext = fixture.extension();
        let array = ext.get_class(b"[[LTestBase;", None, None).unwrap();
        let inner = array.get_component_type().unwrap();
        assert_eq!(inner.descriptor(), b"[LTestBase;");
        assert_eq!(inner.get_component_type().unwrap().descriptor(), b"LTestBase;");
        assert_eq!(array.get_state(), ClassState::Initialized);
        assert_eq!(ext.get_class(b"[[LTestBase;", None, None), Some(array));
    });
}
