//! The class linker: loads classes from class files into contexts, builds array classes and
//! runs class initialization.
//!
//! The linker owns one [`ClassLinkerExtension`] per source language. The extensions own the
//! classes; the linker decides which classes to create and how they are laid out.

pub mod context;
pub mod error;
pub mod extension;

use enum_map::EnumMap;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::{Arc, Mutex, RwLock};

use crate::mem::heap_manager::HeapManager;
use crate::mem::object_header::OBJECT_HEADER_SIZE;
use crate::runtime::class::{Class, ClassPtr, ClassState, ContextId};
use crate::runtime::class_helper::ClassHelper;
use crate::runtime::language::SourceLanguage;
use crate::runtime::panda_file::{EntityId, File};
use crate::runtime::thread::ManagedThread;
use crate::util::constants::BYTES_IN_FIELD_SLOT;

use self::context::ClassLinkerContext;
use self::error::{ClassLinkerError, ClassLinkerErrorHandler};
use self::extension::ClassLinkerExtension;

/// Runs the static initializer of a class. Returns false if the initializer failed, in which
/// case it has raised an exception on the thread.
pub type StaticInitializer = fn(&Class, &ManagedThread) -> bool;

thread_local! {
    /// Classes whose loading is in progress on this thread, to detect inheritance cycles.
    static LOADING: RefCell<Vec<(ContextId, Box<[u8]>)>> = const { RefCell::new(vec![]) };
}

struct LoadingGuard;

impl LoadingGuard {
    /// Returns `None` if the class is being loaded on this thread already.
    fn enter(context: ContextId, descriptor: &[u8]) -> Option<LoadingGuard> {
        LOADING.with(|loading| {
            let mut loading = loading.borrow_mut();
            if loading
                .iter()
                .any(|(c, d)| *c == context && &**d == descriptor)
            {
                return None;
            }
            loading.push((context, descriptor.into()));
            Some(LoadingGuard)
        })
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        LOADING.with(|loading| {
            loading.borrow_mut().pop();
        });
    }
}

pub struct ClassLinker {
    heap: Arc<HeapManager>,
    boot_files: Vec<Arc<File>>,
    app_files: Mutex<Vec<Arc<File>>>,
    extensions: EnumMap<SourceLanguage, Option<Box<dyn ClassLinkerExtension>>>,
    static_initializer: RwLock<Option<StaticInitializer>>,
    /// Held while a class is initialized. Initializers may initialize other classes.
    initialization_lock: ReentrantMutex<()>,
}

impl ClassLinker {
    pub fn create(
        heap: Arc<HeapManager>,
        boot_files: Vec<File>,
        extensions: Vec<Box<dyn ClassLinkerExtension>>,
    ) -> Arc<ClassLinker> {
        let mut by_lang: EnumMap<SourceLanguage, Option<Box<dyn ClassLinkerExtension>>> = EnumMap::default();
        for ext in extensions {
            let lang = ext.get_language();
            if by_lang[lang].replace(ext).is_some() {
                warn!("Replacing the class linker extension of {}", lang);
            }
        }
        Arc::new(ClassLinker {
            heap,
            boot_files: boot_files.into_iter().map(Arc::new).collect(),
            app_files: Mutex::new(vec![]),
            extensions: by_lang,
            static_initializer: RwLock::new(None),
            initialization_lock: ReentrantMutex::new(()),
        })
    }

    /// Initialize every extension. Must be called once the linker has its final address.
    pub fn initialize(&self, compressed_strings_enabled: bool) -> bool {
        self.extensions
            .values()
            .flatten()
            .all(|ext| ext.initialize(self, compressed_strings_enabled))
    }

    pub fn heap(&self) -> &HeapManager {
        &self.heap
    }

    pub fn get_extension(&self, lang: SourceLanguage) -> Option<&dyn ClassLinkerExtension> {
        self.extensions[lang].as_deref()
    }

    pub fn extensions(&self) -> impl Iterator<Item = &dyn ClassLinkerExtension> {
        self.extensions.values().flatten().map(|ext| &**ext)
    }

    pub fn boot_panda_files(&self) -> &[Arc<File>] {
        &self.boot_files
    }

    /// Take over a class file of an application context.
    pub fn add_panda_file(&self, file: Arc<File>) {
        debug!("Added class file {}", file.filename());
        self.app_files.lock().unwrap().push(file);
    }

    pub fn num_app_panda_files(&self) -> usize {
        self.app_files.lock().unwrap().len()
    }

    pub fn set_static_initializer(&self, initializer: Option<StaticInitializer>) {
        *self.static_initializer.write().unwrap() = initializer;
    }

    fn extension_for(&self, context: &dyn ClassLinkerContext) -> Option<&dyn ClassLinkerExtension> {
        let ext = self.get_extension(context.source_lang());
        if ext.is_none() {
            error!("No class linker extension for {}", context.source_lang());
        }
        ext
    }

    /// Find or load `descriptor` in `context`.
    pub fn get_class(
        &self,
        descriptor: &[u8],
        context: &dyn ClassLinkerContext,
        error_handler: Option<&dyn ClassLinkerErrorHandler>,
    ) -> Option<ClassPtr> {
        if let Some(klass) = context.find_class(descriptor) {
            return Some(klass);
        }
        let ext = self.extension_for(context)?;
        let error_handler = error_handler.unwrap_or_else(|| ext.get_error_handler());
        if ClassHelper::is_array_descriptor(descriptor) {
            return self.load_array_class(descriptor, context, error_handler);
        }
        if !context.is_boot_context() {
            return context.load_class(descriptor, ext, Some(error_handler));
        }
        for file in self.boot_files.iter() {
            if let Some(class_id) = file.get_class_id(descriptor) {
                if !file.is_external(class_id) {
                    return self.load_class(file, class_id, context, Some(error_handler));
                }
            }
        }
        error_handler.on_error(
            ClassLinkerError::ClassNotFound,
            &format!(
                "Cannot find class {} in boot panda files",
                ClassHelper::get_name(descriptor)
            ),
        );
        None
    }

    /// Load the class `class_id` of `file` into `context`. The base class is resolved in the same
    /// context first.
    pub fn load_class(
        &self,
        file: &File,
        class_id: EntityId,
        context: &dyn ClassLinkerContext,
        error_handler: Option<&dyn ClassLinkerErrorHandler>,
    ) -> Option<ClassPtr> {
        let record = file.record(class_id);
        let descriptor = &*record.descriptor;
        if let Some(klass) = context.find_class(descriptor) {
            return Some(klass);
        }
        let ext = self.extension_for(context)?;
        let error_handler = error_handler.unwrap_or_else(|| ext.get_error_handler());

        let Some(_loading) = LoadingGuard::enter(context.id(), descriptor) else {
            error_handler.on_error(
                ClassLinkerError::ClassCircularity,
                &format!(
                    "Class or interface {} is its own superclass or superinterface",
                    ClassHelper::get_name(descriptor)
                ),
            );
            return None;
        };

        let object_descriptor = ext.get_language_context().get_object_class_descriptor();
        let base = match record.base.as_deref() {
            Some(base_descriptor) => Some(self.get_class(base_descriptor, context, Some(error_handler))?),
            None if descriptor != object_descriptor => {
                ext.get_class(object_descriptor, None, Some(error_handler))
            }
            None => None,
        };
        if let Some(base) = base {
            if base.is_final() || base.is_interface() {
                error_handler.on_error(
                    ClassLinkerError::NoClassDef,
                    &format!(
                        "Class {} cannot inherit from {}",
                        ClassHelper::get_name(descriptor),
                        base.name()
                    ),
                );
                return None;
            }
        }

        let vtable_size = base.map_or(0, |b| b.vtable_size()) + record.vmethods;
        let imt_size = 0;
        let object_size =
            base.map_or(OBJECT_HEADER_SIZE, |b| b.object_size()) + record.instance_fields * BYTES_IN_FIELD_SLOT;
        let class_size = Class::compute_class_size(vtable_size, imt_size, record.static_fields_size);

        let klass = ext.create_class(descriptor, vtable_size, imt_size, class_size)?;
        klass.set_base(base);
        klass.set_access_flags(record.access_flags);
        klass.set_object_size(object_size);
        klass.set_panda_file(file.filename(), class_id);
        klass.set_load_context(context.id());
        if ext.can_initialize_classes() {
            if !ext.initialize_class(klass) {
                ext.base().remove_created_class(klass);
                ext.free_class(klass);
                return None;
            }
            klass.set_state(ClassState::Loaded);
        }
        let klass = ext.add_class(klass);
        trace!("Loaded {:?} into context {:?}", klass, context.id());
        Some(klass)
    }

    /// Build the array class `descriptor`. Array classes live in the context of their component.
    fn load_array_class(
        &self,
        descriptor: &[u8],
        context: &dyn ClassLinkerContext,
        error_handler: &dyn ClassLinkerErrorHandler,
    ) -> Option<ClassPtr> {
        let component_descriptor = ClassHelper::get_component_descriptor(descriptor)?;
        let component = self.get_class(component_descriptor, context, Some(error_handler))?;
        let ext = self.extension_for(context)?;
        let component_context = ext
            .get_context(component.get_load_context())
            .unwrap_or_else(|| ext.get_boot_context().clone() as Arc<dyn ClassLinkerContext>);
        if let Some(klass) = component_context.find_class(descriptor) {
            return Some(klass);
        }
        let klass = ext.create_class(
            descriptor,
            ext.get_array_class_vtable_size(),
            ext.get_array_class_imt_size(),
            ext.get_array_class_size(),
        )?;
        klass.set_load_context(component_context.id());
        ext.initialize_array_class(klass, component);
        if ext.can_initialize_classes() && klass.get_state() < ClassState::Loaded {
            if !ext.initialize_class(klass) {
                ext.base().remove_created_class(klass);
                ext.free_class(klass);
                return None;
            }
            klass.set_state(ClassState::Loaded);
        }
        Some(ext.add_class(klass))
    }

    pub fn find_loaded_class(&self, descriptor: &[u8], context: &dyn ClassLinkerContext) -> Option<ClassPtr> {
        context.find_class(descriptor)
    }

    /// Register a class created outside of a class file, such as a class root.
    pub fn add_class_root(&self, ext: &dyn ClassLinkerExtension, klass: ClassPtr) -> ClassPtr {
        ext.add_class(klass)
    }

    /// Run the static initializer of `klass` and of its base classes. Returns true if the class
    /// is initialized, or is being initialized by `thread` itself.
    pub fn initialize_class(&self, thread: &ManagedThread, klass: ClassPtr) -> bool {
        if klass.is_initialized() {
            return true;
        }
        let _lock = self.initialization_lock.lock();
        match klass.get_state() {
            ClassState::Initialized => return true,
            // Only the thread holding the lock can see this.
            ClassState::Initializing => return true,
            ClassState::Erroneous => {
                if let Some(ext) = self.get_extension(klass.source_lang()) {
                    ext.get_error_handler().on_error(
                        ClassLinkerError::NoClassDef,
                        &format!("Class {} is in an erroneous state", klass.name()),
                    );
                }
                return false;
            }
            _ => {}
        }
        if let Some(base) = klass.get_base() {
            if !self.initialize_class(thread, base) {
                klass.set_state(ClassState::Erroneous);
                return false;
            }
        }
        klass.set_init_thread_id(thread.id());
        klass.set_state(ClassState::Initializing);
        let initializer = *self.static_initializer.read().unwrap();
        let initialized = initializer.map_or(true, |init| init(&klass, thread));
        klass.set_init_thread_id(0);
        if initialized {
            klass.set_state(ClassState::Initialized);
        } else {
            warn!("Static initializer of {} failed", klass.name());
            klass.set_state(ClassState::Erroneous);
        }
        initialized
    }

    /// Free a class of `lang` that is not registered anywhere.
    pub fn free_class(&self, lang: SourceLanguage, klass: ClassPtr) {
        if let Some(ext) = self.get_extension(lang) {
            ext.base().remove_created_class(klass);
            ext.free_class(klass);
        }
    }
}

impl Drop for ClassLinker {
    fn drop(&mut self) {
        for ext in self.extensions.values().flatten() {
            ext.free_obsolete_data();
            ext.free_loaded_classes();
        }
    }
}
