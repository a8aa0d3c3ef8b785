//! The class linker extension of panda assembly. It creates the class roots in boot order and
//! maps class linker errors to the core exception classes.

use crate::mem::heap_manager::ObjectInit;
use crate::mem::object_header::{ObjectHeader, OBJECT_HEADER_SIZE};
use crate::runtime::class::{AccessFlags, Class, ClassPtr, ClassRoot, ClassState, TypeId};
use crate::runtime::class_helper::ClassHelper;
use crate::runtime::class_linker::error::{ClassLinkerError, ClassLinkerErrorHandler, SuppressErrorHandler};
use crate::runtime::class_linker::extension::{ClassLinkerExtension, ExtensionBase};
use crate::runtime::coretypes::array::Array;
use crate::runtime::coretypes::class::ClassObject;
use crate::runtime::coretypes::string::CoreString;
use crate::runtime::exceptions::throw_exception_on_current;
use crate::runtime::language::LanguageContext;
use crate::runtime::thread::ManagedThread;
use crate::util::constants::DEFAULT_OBJECT_ALIGNMENT;

/// Primitive roots with their types, in creation order.
const PRIMITIVE_ROOTS: [(ClassRoot, TypeId); 12] = [
    (ClassRoot::U1, TypeId::U1),
    (ClassRoot::I8, TypeId::I8),
    (ClassRoot::U8, TypeId::U8),
    (ClassRoot::I16, TypeId::I16),
    (ClassRoot::U16, TypeId::U16),
    (ClassRoot::I32, TypeId::I32),
    (ClassRoot::U32, TypeId::U32),
    (ClassRoot::I64, TypeId::I64),
    (ClassRoot::U64, TypeId::U64),
    (ClassRoot::F32, TypeId::F32),
    (ClassRoot::F64, TypeId::F64),
    (ClassRoot::Tagged, TypeId::Tagged),
];

/// Array roots with the roots of their components, in creation order.
const PRIMITIVE_ARRAY_ROOTS: [(ClassRoot, ClassRoot); 12] = [
    (ClassRoot::ArrayU1, ClassRoot::U1),
    (ClassRoot::ArrayI8, ClassRoot::I8),
    (ClassRoot::ArrayU8, ClassRoot::U8),
    (ClassRoot::ArrayI16, ClassRoot::I16),
    (ClassRoot::ArrayU16, ClassRoot::U16),
    (ClassRoot::ArrayI32, ClassRoot::I32),
    (ClassRoot::ArrayU32, ClassRoot::U32),
    (ClassRoot::ArrayI64, ClassRoot::I64),
    (ClassRoot::ArrayU64, ClassRoot::U64),
    (ClassRoot::ArrayF32, ClassRoot::F32),
    (ClassRoot::ArrayF64, ClassRoot::F64),
    (ClassRoot::ArrayTagged, ClassRoot::Tagged),
];

/// Raises the core exception that matches a class linker error on the current thread.
pub struct CoreErrorHandler {
    ctx: &'static dyn LanguageContext,
}

impl CoreErrorHandler {
    pub fn new(ctx: &'static dyn LanguageContext) -> Self {
        CoreErrorHandler { ctx }
    }
}

impl ClassLinkerErrorHandler for CoreErrorHandler {
    fn on_error(&self, error: ClassLinkerError, message: &str) {
        let descriptor = match error {
            ClassLinkerError::ClassNotFound => self.ctx.get_class_not_found_exception_descriptor(),
            ClassLinkerError::FieldNotFound => self.ctx.get_no_such_field_error_descriptor(),
            ClassLinkerError::MethodNotFound => self.ctx.get_no_such_method_error_descriptor(),
            ClassLinkerError::NoClassDef => self.ctx.get_no_class_def_found_error_descriptor(),
            ClassLinkerError::ClassCircularity => self.ctx.get_class_circularity_error_descriptor(),
            _ => {
                error!("Unhandled class linker error {}: {}", error, message);
                panic!("Unhandled class linker error {}", error);
            }
        };
        throw_exception_on_current(descriptor, message);
    }
}

pub struct CoreClassLinkerExtension {
    base: ExtensionBase,
    error_handler: CoreErrorHandler,
}

impl CoreClassLinkerExtension {
    pub fn new(ctx: &'static dyn LanguageContext) -> Self {
        CoreClassLinkerExtension {
            base: ExtensionBase::new(ctx),
            error_handler: CoreErrorHandler::new(ctx),
        }
    }

    fn as_dyn(&self) -> &dyn ClassLinkerExtension {
        self
    }

    fn create_root_class(&self, root: ClassRoot, descriptor: &[u8]) -> Option<ClassPtr> {
        let klass = self.create_class(
            descriptor,
            self.get_class_vtable_size(root),
            self.get_class_imt_size(root),
            self.get_class_size(root),
        );
        if klass.is_none() {
            error!("Cannot create class root {}", root);
        }
        klass
    }

    /// The class of classes. Its managed object is an instance of itself.
    fn initialize_class_class_root(&self) -> Option<ClassPtr> {
        let ext = self.as_dyn();
        if let Some(existing) = ext.get_class_root(ClassRoot::Class) {
            return Some(existing);
        }
        let ctx = self.base.language_context();
        let klass = self.create_root_class(ClassRoot::Class, ctx.get_class_class_descriptor())?;
        klass.set_class_class();
        klass.set_access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL);
        klass.set_object_size(std::mem::size_of::<ClassObject>());
        if let Some(object) = klass.managed_object() {
            ObjectHeader::from_object(object).set_class(&klass);
        }
        ext.set_class_root(ClassRoot::Class, klass);
        Some(klass)
    }

    /// The object class of the boot class files, or a minimal one if they do not define it.
    fn initialize_object_class_root(&self) -> Option<ClassPtr> {
        let ext = self.as_dyn();
        let descriptor = self.base.language_context().get_object_class_descriptor();
        let klass = match ext.get_class(descriptor, None, Some(&SuppressErrorHandler)) {
            Some(klass) => klass,
            None => {
                debug!("Boot class files do not define {}", ClassHelper::get_name(descriptor));
                let klass = self.create_root_class(ClassRoot::Object, descriptor)?;
                klass.set_object_size(OBJECT_HEADER_SIZE);
                klass.set_access_flags(AccessFlags::PUBLIC);
                klass
            }
        };
        ext.set_class_root(ClassRoot::Object, klass);
        Some(klass)
    }

    fn initialize_string_class_root(&self, object_class: ClassPtr, compressed_strings_enabled: bool) -> Option<ClassPtr> {
        let ext = self.as_dyn();
        let descriptor = self.base.language_context().get_string_class_descriptor();
        let klass = self.create_root_class(ClassRoot::String, descriptor)?;
        klass.set_base(Some(object_class));
        klass.set_string_class();
        klass.set_access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL);
        klass.set_object_size(CoreString::data_offset());
        self.base.set_compressed_strings_enabled(compressed_strings_enabled);
        ext.set_class_root(ClassRoot::String, klass);
        Some(klass)
    }
}

impl ClassLinkerExtension for CoreClassLinkerExtension {
    fn base(&self) -> &ExtensionBase {
        &self.base
    }

    fn initialize_impl(&self, compressed_strings_enabled: bool) -> bool {
        let ext = self.as_dyn();
        let ctx = self.base.language_context();

        let Some(class_class) = self.initialize_class_class_root() else {
            return false;
        };
        let Some(object_class) = self.initialize_object_class_root() else {
            return false;
        };
        class_class.set_base(Some(object_class));
        if self
            .initialize_string_class_root(object_class, compressed_strings_enabled)
            .is_none()
        {
            return false;
        }
        if !ext.initialize_array_class_root(
            ClassRoot::ArrayClass,
            ClassRoot::Class,
            ctx.get_class_array_class_descriptor(),
        ) {
            return false;
        }

        for (root, type_id) in PRIMITIVE_ROOTS {
            if !ext.initialize_primitive_class_root(root, type_id) {
                error!("Cannot create primitive class root {}", root);
                return false;
            }
        }
        for ((array_root, component_root), (_, type_id)) in PRIMITIVE_ARRAY_ROOTS.into_iter().zip(PRIMITIVE_ROOTS) {
            let Some(component_descriptor) = ClassHelper::get_primitive_descriptor(type_id) else {
                return false;
            };
            let descriptor = ClassHelper::get_array_descriptor(component_descriptor);
            if !ext.initialize_array_class_root(array_root, component_root, &descriptor) {
                return false;
            }
        }
        if !ext.initialize_array_class_root(
            ClassRoot::ArrayString,
            ClassRoot::String,
            ctx.get_string_array_class_descriptor(),
        ) {
            return false;
        }
        debug!("Created the class roots of {}", ext.get_language());
        true
    }

    fn initialize_array_class(&self, array_class: ClassPtr, component_class: ClassPtr) {
        let object_class = self.as_dyn().get_class_root(ClassRoot::Object);
        array_class.set_base(object_class);
        array_class.set_component_type(Some(component_class));
        let flags = (component_class.access_flags() & !AccessFlags::INTERFACE)
            | AccessFlags::FINAL
            | AccessFlags::ABSTRACT;
        array_class.set_access_flags(flags);
        array_class.set_object_size(Array::data_offset());
        array_class.set_state(ClassState::Initialized);
    }

    fn initialize_primitive_class(&self, primitive_class: ClassPtr) {
        primitive_class.set_access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ABSTRACT);
        primitive_class.set_state(ClassState::Initialized);
    }

    fn get_class_vtable_size(&self, root: ClassRoot) -> usize {
        if root.is_array() {
            return self.get_array_class_vtable_size();
        }
        0
    }

    fn get_class_imt_size(&self, root: ClassRoot) -> usize {
        if root.is_array() {
            return self.get_array_class_imt_size();
        }
        0
    }

    fn get_class_size(&self, root: ClassRoot) -> usize {
        if root.is_array() {
            return self.get_array_class_size();
        }
        Class::compute_class_size(0, 0, 0)
    }

    fn get_array_class_vtable_size(&self) -> usize {
        self.get_class_vtable_size(ClassRoot::Object)
    }

    fn get_array_class_imt_size(&self) -> usize {
        self.get_class_imt_size(ClassRoot::Object)
    }

    fn get_array_class_size(&self) -> usize {
        self.get_class_size(ClassRoot::Object)
    }

    fn create_class(&self, descriptor: &[u8], vtable_size: usize, imt_size: usize, size: usize) -> Option<ClassPtr> {
        let ext = self.as_dyn();
        let Some(thread) = ManagedThread::current() else {
            error!(
                "Cannot create class {}: no managed thread is attached",
                ClassHelper::get_name(descriptor)
            );
            return None;
        };
        let linker = ext.get_class_linker()?;
        let heap = linker.heap();
        let klass = Box::new(Class::new(descriptor, ext.get_language(), vtable_size, imt_size, size));
        let object = match ext.get_class_root(ClassRoot::Class) {
            Some(class_class) => heap.allocate_non_movable_object(
                &class_class,
                size,
                DEFAULT_OBJECT_ALIGNMENT,
                &thread,
                ObjectInit::Zeroed,
            ),
            None => heap.allocate_class_class_object(size, DEFAULT_OBJECT_ALIGNMENT, &thread),
        }?;
        let klass = ClassPtr::from_box(klass);
        ClassObject::from_object(object).set_runtime_class(klass);
        klass.set_managed_object(object);
        self.base.add_created_class(klass);
        trace!("Created class {:?} with object {}", klass, object);
        Some(klass)
    }

    fn free_class(&self, klass: ClassPtr) {
        if let (Some(object), Some(linker)) = (klass.managed_object(), self.as_dyn().get_class_linker()) {
            linker.heap().free_object(object);
        }
        // SAFETY: the class has left every list of the extension.
        drop(unsafe { klass.into_box() });
    }

    fn initialize_class(&self, klass: ClassPtr) -> bool {
        if klass.is_instantiable() && klass.object_size() < OBJECT_HEADER_SIZE {
            error!(
                "Class {} has an object size of {}, smaller than the object header",
                klass.name(),
                klass.object_size()
            );
            return false;
        }
        if let Some(base) = klass.get_base() {
            if klass.object_size() < base.object_size() {
                error!("Class {} is smaller than its base {}", klass.name(), base.name());
                return false;
            }
        }
        true
    }

    fn get_native_entry_point_for(&self, _klass: &Class, _method_name: &str) -> Option<usize> {
        None
    }

    fn can_throw_exception(&self, _klass: &Class, _method_name: &str) -> bool {
        true
    }

    fn get_error_handler(&self) -> &dyn ClassLinkerErrorHandler {
        &self.error_handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::language::{language_context, SourceLanguage};
    use std::sync::Arc;

    fn core_context() -> &'static dyn LanguageContext {
        language_context(SourceLanguage::PandaAssembly).unwrap()
    }

    #[test]
    fn errors_become_core_exceptions() {
        let handler = CoreErrorHandler::new(core_context());
        let thread = Arc::new(ManagedThread::new(7));
        ManagedThread::set_current(Some(thread.clone()));
        handler.on_error(ClassLinkerError::ClassNotFound, "LMissing;");
        ManagedThread::set_current(None);
        let exception = thread.clear_pending_exception().unwrap();
        assert_eq!(exception.descriptor(), b"Lpanda/ClassNotFoundException;");
        assert_eq!(exception.message(), "LMissing;");
    }

    #[test]
    #[should_panic(expected = "Unhandled class linker error")]
    fn unmapped_errors_are_fatal() {
        CoreErrorHandler::new(core_context()).on_error(ClassLinkerError::OverridesFinal, "m");
    }

    #[test]
    fn array_roots_share_the_object_layout() {
        let ext = CoreClassLinkerExtension::new(core_context());
        assert_eq!(ext.get_class_vtable_size(ClassRoot::ArrayI32), 0);
        assert_eq!(
            ext.get_class_size(ClassRoot::ArrayString),
            ext.get_class_size(ClassRoot::Object)
        );
        assert_eq!(ext.get_array_class_size(), Class::compute_class_size(0, 0, 0));
    }

    #[test]
    fn no_classes_without_a_linker() {
        let ext = CoreClassLinkerExtension::new(core_context());
        let thread = Arc::new(ManagedThread::new(8));
        ManagedThread::set_current(Some(thread));
        assert!(ext.create_class(b"LFoo;", 0, 0, Class::compute_class_size(0, 0, 0)).is_none());
        ManagedThread::set_current(None);
        assert!(ext.create_class(b"LFoo;", 0, 0, Class::compute_class_size(0, 0, 0)).is_none());
    }
}
