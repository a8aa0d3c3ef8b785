//! Class linker extensions.
//!
//! An extension owns the classes of one source language: the class roots, the boot context, the
//! application contexts and the bookkeeping the GC needs to find every class. The language
//! specific parts (layout of roots and arrays, creating and freeing classes, error mapping) are
//! the methods of [`ClassLinkerExtension`]; everything shared is implemented once, on
//! `dyn ClassLinkerExtension`, on top of the [`ExtensionBase`] each extension embeds.

use bitflags::bitflags;
use downcast_rs::{impl_downcast, Downcast};
use enum_map::EnumMap;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;
use strum::IntoEnumIterator;

use crate::runtime::class::{Class, ClassPtr, ClassRoot, ClassState, ContextId, TypeId};
use crate::runtime::class_helper::ClassHelper;
use crate::runtime::class_linker::context::{AppContext, BootContext, ClassLinkerContext};
use crate::runtime::class_linker::error::{ClassLinkerErrorHandler, SuppressErrorHandler};
use crate::runtime::class_linker::ClassLinker;
use crate::runtime::exceptions::throw_exception;
use crate::runtime::language::{LanguageContext, SourceLanguage};
use crate::runtime::panda_file::{open_panda_file, File};
use crate::runtime::thread::ManagedThread;

bitflags! {
    /// What [`enumerate_classes`](ClassLinkerExtension::enumerate_classes) visits, and how it
    /// changes the recording of new classes afterwards. Exactly one of the `ACCESS_ROOT_*` flags
    /// must be set, and at most one of the recording flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct VisitGCRootFlags: u32 {
        const ACCESS_ROOT_ALL = 1;
        const ACCESS_ROOT_ONLY_NEW = 1 << 1;
        const ACCESS_ROOT_NONE = 1 << 2;
        const START_RECORDING_NEW_ROOT = 1 << 3;
        const END_RECORDING_NEW_ROOT = 1 << 4;
    }
}

impl VisitGCRootFlags {
    const ACCESS_MASK: Self = Self::ACCESS_ROOT_ALL
        .union(Self::ACCESS_ROOT_ONLY_NEW)
        .union(Self::ACCESS_ROOT_NONE);
    const RECORDING_MASK: Self = Self::START_RECORDING_NEW_ROOT.union(Self::END_RECORDING_NEW_ROOT);

    pub fn is_valid(self) -> bool {
        self.intersection(Self::ACCESS_MASK).bits().count_ones() == 1
            && self.intersection(Self::RECORDING_MASK).bits().count_ones() <= 1
    }
}

/// A list guarded by its own recursive lock. The borrow is never held across a callback, so
/// a callback may come back to the same list.
struct ClassList {
    classes: ReentrantMutex<RefCell<Vec<ClassPtr>>>,
}

impl ClassList {
    fn new() -> Self {
        ClassList {
            classes: ReentrantMutex::new(RefCell::new(vec![])),
        }
    }

    fn push(&self, klass: ClassPtr) {
        self.classes.lock().borrow_mut().push(klass);
    }

    fn remove(&self, klass: ClassPtr) -> bool {
        let guard = self.classes.lock();
        let mut classes = guard.borrow_mut();
        let len = classes.len();
        classes.retain(|c| *c != klass);
        classes.len() != len
    }

    fn snapshot(&self) -> Vec<ClassPtr> {
        self.classes.lock().borrow().clone()
    }

    fn take_all(&self) -> Vec<ClassPtr> {
        std::mem::take(&mut *self.classes.lock().borrow_mut())
    }

    fn len(&self) -> usize {
        self.classes.lock().borrow().len()
    }
}

/// State shared by every extension.
pub struct ExtensionBase {
    ctx: &'static dyn LanguageContext,
    class_roots: EnumMap<ClassRoot, AtomicPtr<Class>>,
    boot_context: Arc<BootContext>,
    contexts: ReentrantMutex<RefCell<Vec<Arc<AppContext>>>>,
    /// Classes created but not inserted into a context yet.
    created_classes: ClassList,
    /// Classes inserted while new classes are recorded.
    new_classes: ClassList,
    /// Classes replaced by a reload and kept until [`free_obsolete_data`](ClassLinkerExtension::free_obsolete_data).
    obsolete_classes: ClassList,
    record_new_class: AtomicBool,
    class_linker: AtomicPtr<ClassLinker>,
    compressed_strings_enabled: AtomicBool,
    initialized: AtomicBool,
    next_context_id: AtomicUsize,
}

impl ExtensionBase {
    pub fn new(ctx: &'static dyn LanguageContext) -> Self {
        ExtensionBase {
            ctx,
            class_roots: EnumMap::default(),
            boot_context: Arc::new(BootContext::new(ctx.get_language())),
            contexts: ReentrantMutex::new(RefCell::new(vec![])),
            created_classes: ClassList::new(),
            new_classes: ClassList::new(),
            obsolete_classes: ClassList::new(),
            record_new_class: AtomicBool::new(false),
            class_linker: AtomicPtr::new(null_mut()),
            compressed_strings_enabled: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            next_context_id: AtomicUsize::new(ContextId::BOOT.0 + 1),
        }
    }

    pub fn language_context(&self) -> &'static dyn LanguageContext {
        self.ctx
    }

    pub fn boot_context(&self) -> &Arc<BootContext> {
        &self.boot_context
    }

    /// Remember a class from its creation until it is inserted into a context.
    pub fn add_created_class(&self, klass: ClassPtr) {
        self.created_classes.push(klass);
    }

    pub fn remove_created_class(&self, klass: ClassPtr) -> bool {
        self.created_classes.remove(klass)
    }

    pub fn set_compressed_strings_enabled(&self, enabled: bool) {
        self.compressed_strings_enabled.store(enabled, Ordering::Release);
    }

    fn app_contexts(&self) -> Vec<Arc<AppContext>> {
        self.contexts.lock().borrow().clone()
    }
}

/// The language specific part of an extension.
pub trait ClassLinkerExtension: Downcast + Send + Sync {
    fn base(&self) -> &ExtensionBase;

    /// Create the class roots. Called once, by [`initialize`](Self::initialize).
    fn initialize_impl(&self, compressed_strings_enabled: bool) -> bool;

    fn initialize_array_class(&self, array_class: ClassPtr, component_class: ClassPtr);

    fn initialize_primitive_class(&self, primitive_class: ClassPtr);

    fn get_class_vtable_size(&self, root: ClassRoot) -> usize;

    fn get_class_imt_size(&self, root: ClassRoot) -> usize;

    fn get_class_size(&self, root: ClassRoot) -> usize;

    fn get_array_class_vtable_size(&self) -> usize;

    fn get_array_class_imt_size(&self) -> usize;

    fn get_array_class_size(&self) -> usize;

    /// Create a class together with its managed object. Returns `None` if the object cannot be
    /// allocated. The class belongs to the extension until it is freed.
    fn create_class(
        &self,
        descriptor: &[u8],
        vtable_size: usize,
        imt_size: usize,
        size: usize,
    ) -> Option<ClassPtr>;

    fn free_class(&self, klass: ClassPtr);

    /// Language specific checks and setup of a class that was just loaded.
    fn initialize_class(&self, klass: ClassPtr) -> bool;

    /// Entry point of a native method of `klass`, if the language provides one.
    fn get_native_entry_point_for(&self, klass: &Class, method_name: &str) -> Option<usize>;

    fn can_throw_exception(&self, klass: &Class, method_name: &str) -> bool;

    fn get_error_handler(&self) -> &dyn ClassLinkerErrorHandler;
}

impl_downcast!(ClassLinkerExtension);

impl<'e> dyn ClassLinkerExtension + 'e {
    pub fn get_language(&self) -> SourceLanguage {
        self.base().ctx.get_language()
    }

    pub fn get_language_context(&self) -> &'static dyn LanguageContext {
        self.base().ctx
    }

    /// Bind the extension to `class_linker` and create the class roots. Classes loaded before the
    /// extension could initialize classes are initialized here. Only the first call has any
    /// effect.
    pub fn initialize(&self, class_linker: &ClassLinker, compressed_strings_enabled: bool) -> bool {
        let base = self.base();
        let linker_ptr = class_linker as *const ClassLinker as *mut ClassLinker;
        if base
            .class_linker
            .compare_exchange(null_mut(), linker_ptr, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("{} class linker extension is already initialized", self.get_language());
            return true;
        }
        if !self.initialize_impl(compressed_strings_enabled) {
            error!("Cannot initialize {} class linker extension", self.get_language());
            return false;
        }
        base.initialized.store(true, Ordering::Release);

        // Initializing a class may load more classes into the boot context.
        let pending: Vec<ClassPtr> = base
            .boot_context
            .loaded_classes()
            .snapshot()
            .into_iter()
            .filter(|klass| !klass.is_loaded())
            .collect();
        for klass in pending {
            if !self.initialize_class(klass) {
                error!("Cannot initialize class {}", klass.name());
                return false;
            }
            klass.set_state(ClassState::Loaded);
        }
        info!(
            "{} class linker extension initialized with {} classes",
            self.get_language(),
            self.num_loaded_classes()
        );
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.base().initialized.load(Ordering::Acquire)
    }

    /// Classes loaded before the roots exist are initialized by [`initialize`](Self::initialize).
    pub fn can_initialize_classes(&self) -> bool {
        self.is_initialized()
    }

    pub fn is_compressed_strings_enabled(&self) -> bool {
        self.base().compressed_strings_enabled.load(Ordering::Acquire)
    }

    /// Run the static initializer of every class root.
    ///
    /// # Panics
    ///
    /// A class root that fails to initialize is fatal.
    pub fn initialize_roots(&self, thread: &ManagedThread) -> bool {
        let Some(linker) = self.get_class_linker() else {
            error!("{} class linker extension is not initialized", self.get_language());
            panic!("Class roots initialized before the class linker extension");
        };
        for root in ClassRoot::iter() {
            let Some(klass) = self.get_class_root(root) else {
                continue;
            };
            if !linker.initialize_class(thread, klass) {
                error!("Cannot initialize class root {} ({})", root, klass.name());
                panic!("Cannot initialize class root {}", root);
            }
        }
        true
    }

    pub fn get_class_root(&self, root: ClassRoot) -> Option<ClassPtr> {
        ClassPtr::from_raw(self.base().class_roots[root].load(Ordering::Acquire))
    }

    /// Install `klass` as `root` and register it in its context.
    pub fn set_class_root(&self, root: ClassRoot, klass: ClassPtr) {
        debug_assert!(
            self.get_class_root(root).is_none(),
            "class root {} is already set",
            root
        );
        self.base().class_roots[root].store(klass.as_ptr(), Ordering::Release);
        match self.get_class_linker() {
            Some(linker) => linker.add_class_root(self, klass),
            None => self.add_class(klass),
        };
    }

    pub fn get_class_linker(&self) -> Option<&ClassLinker> {
        let ptr = self.base().class_linker.load(Ordering::Acquire);
        // SAFETY: the class linker owns its extensions, so it outlives them.
        unsafe { ptr.as_ref() }
    }

    pub fn get_boot_context(&self) -> &Arc<BootContext> {
        &self.base().boot_context
    }

    /// The context with the id `id`, if it is the boot context or a registered application
    /// context.
    pub fn get_context(&self, id: ContextId) -> Option<Arc<dyn ClassLinkerContext>> {
        if id.is_boot() {
            return Some(self.base().boot_context.clone());
        }
        let contexts = self.base().contexts.lock();
        let found = contexts
            .borrow()
            .iter()
            .find(|context| context.id() == id)
            .cloned();
        found.map(|context| context as Arc<dyn ClassLinkerContext>)
    }

    /// Find or load `descriptor` in `context`, the boot context by default. Failures are reported
    /// to `error_handler`, or to the handler of the extension by default.
    pub fn get_class(
        &self,
        descriptor: &[u8],
        context: Option<&dyn ClassLinkerContext>,
        error_handler: Option<&dyn ClassLinkerErrorHandler>,
    ) -> Option<ClassPtr> {
        let linker = self.get_class_linker()?;
        let boot: &dyn ClassLinkerContext = &*self.base().boot_context;
        let context = context.unwrap_or(boot);
        let error_handler = error_handler.unwrap_or_else(|| self.get_error_handler());
        linker.get_class(descriptor, context, Some(error_handler))
    }

    /// Insert `klass` into its context. If another class with the same descriptor won a race to
    /// the context, `klass` is freed and the winner is returned. Callers must continue with the
    /// returned class.
    pub fn add_class(&self, klass: ClassPtr) -> ClassPtr {
        let context = self
            .get_context(klass.get_load_context())
            .unwrap_or_else(|| self.base().boot_context.clone() as Arc<dyn ClassLinkerContext>);
        if let Some(existing) = context.insert_class(klass) {
            if existing != klass {
                debug!(
                    "Class {} was loaded concurrently, dropping the duplicate",
                    klass.name()
                );
                self.base().remove_created_class(klass);
                self.free_class(klass);
            }
            return existing;
        }
        self.on_class_prepared(klass);
        klass
    }

    pub fn on_class_prepared(&self, klass: ClassPtr) {
        let base = self.base();
        if base.record_new_class.load(Ordering::SeqCst) {
            base.new_classes.push(klass);
        }
        base.remove_created_class(klass);
    }

    /// Open `paths` and create a context for them. Returns `None` if any file cannot be opened.
    pub fn create_application_class_linker_context(&self, paths: &[String]) -> Option<Arc<AppContext>> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            match open_panda_file(path) {
                Ok(file) => files.push(file),
                Err(e) => {
                    error!("Cannot create application context: {}", e);
                    return None;
                }
            }
        }
        self.create_application_class_linker_context_from_files(files)
    }

    /// Create a context for `files`, which are handed over to the class linker.
    pub fn create_application_class_linker_context_from_files(&self, files: Vec<File>) -> Option<Arc<AppContext>> {
        let linker = self.get_class_linker()?;
        let files: Vec<Arc<File>> = files.into_iter().map(Arc::new).collect();
        for file in files.iter() {
            linker.add_panda_file(file.clone());
        }
        let id = ContextId(self.base().next_context_id.fetch_add(1, Ordering::Relaxed));
        let context = Arc::new(AppContext::new(id, self.get_language(), files));
        let contexts = self.base().contexts.lock();
        contexts.borrow_mut().push(context.clone());
        debug!(
            "Created application context {:?} with {} files",
            id,
            context.panda_files().len()
        );
        Some(context)
    }

    pub fn num_application_contexts(&self) -> usize {
        self.base().contexts.lock().borrow().len()
    }

    /// Visit classes as GC roots, then apply the recording flags. Created classes and obsolete
    /// classes are always visited; `ACCESS_ROOT_ONLY_NEW` adds the recorded classes and
    /// `ACCESS_ROOT_ALL` every loaded class. Returns false if `callback` stopped the enumeration.
    pub fn enumerate_classes(
        &self,
        callback: &mut dyn FnMut(ClassPtr) -> bool,
        flags: VisitGCRootFlags,
    ) -> bool {
        assert!(flags.is_valid(), "invalid class enumeration flags {:?}", flags);
        let base = self.base();
        if !base.created_classes.snapshot().into_iter().all(&mut *callback) {
            return false;
        }
        if flags.contains(VisitGCRootFlags::ACCESS_ROOT_ONLY_NEW)
            && !base.new_classes.snapshot().into_iter().all(&mut *callback)
        {
            return false;
        }
        if flags.contains(VisitGCRootFlags::ACCESS_ROOT_ALL) {
            if !base.boot_context.enumerate_classes(callback) {
                return false;
            }
            for context in base.app_contexts() {
                if !context.enumerate_classes(callback) {
                    return false;
                }
            }
        }
        if !base.obsolete_classes.snapshot().into_iter().all(&mut *callback) {
            return false;
        }
        self.record_new_root(flags);
        true
    }

    /// Start or stop recording the classes inserted from now on.
    pub fn record_new_root(&self, flags: VisitGCRootFlags) {
        let base = self.base();
        if flags.contains(VisitGCRootFlags::START_RECORDING_NEW_ROOT) {
            base.record_new_class.store(true, Ordering::SeqCst);
        } else if flags.contains(VisitGCRootFlags::END_RECORDING_NEW_ROOT) {
            base.record_new_class.store(false, Ordering::SeqCst);
            base.new_classes.take_all();
        }
    }

    pub fn is_recording_new_classes(&self) -> bool {
        self.base().record_new_class.load(Ordering::SeqCst)
    }

    pub fn num_new_classes(&self) -> usize {
        self.base().new_classes.len()
    }

    pub fn num_created_classes(&self) -> usize {
        self.base().created_classes.len()
    }

    pub fn num_loaded_classes(&self) -> usize {
        let base = self.base();
        base.boot_context.num_loaded_classes()
            + base
                .app_contexts()
                .iter()
                .map(|context| context.num_loaded_classes())
                .sum::<usize>()
    }

    pub fn visit_loaded_classes(&self, visitor: &mut dyn FnMut(ClassPtr)) {
        let base = self.base();
        let mut visit = |klass| {
            visitor(klass);
            true
        };
        base.boot_context.enumerate_classes(&mut visit);
        for context in base.app_contexts() {
            context.enumerate_classes(&mut visit);
        }
    }

    /// Free every class of every context, and the classes that were created but never inserted.
    pub fn free_loaded_classes(&self) {
        let base = self.base();
        let mut classes = base.boot_context.loaded_classes().take_all();
        for context in base.app_contexts() {
            classes.extend(context.loaded_classes().take_all());
        }
        classes.extend(base.created_classes.take_all());
        base.new_classes.take_all();
        for root in base.class_roots.values() {
            root.store(null_mut(), Ordering::Release);
        }
        debug!(
            "Freeing {} classes of the {} class linker extension",
            classes.len(),
            self.get_language()
        );
        for klass in classes {
            self.free_class(klass);
        }
    }

    /// Keep `classes` alive after they were replaced, until [`free_obsolete_data`](Self::free_obsolete_data).
    /// The classes leave their contexts.
    pub fn add_obsolete_class(&self, classes: Vec<ClassPtr>) {
        for klass in classes {
            if let Some(context) = self.get_context(klass.get_load_context()) {
                context.loaded_classes().remove(klass);
            }
            self.base().obsolete_classes.push(klass);
        }
    }

    pub fn num_obsolete_classes(&self) -> usize {
        self.base().obsolete_classes.len()
    }

    pub fn free_obsolete_data(&self) {
        for klass in self.base().obsolete_classes.take_all() {
            self.free_class(klass);
        }
    }

    /// Create the primitive class `root` with the type `type_id`.
    pub fn initialize_primitive_class_root(&self, root: ClassRoot, type_id: TypeId) -> bool {
        let Some(descriptor) = ClassHelper::get_primitive_descriptor(type_id) else {
            return false;
        };
        let Some(klass) = self.create_class(
            descriptor,
            self.get_class_vtable_size(root),
            self.get_class_imt_size(root),
            self.get_class_size(root),
        ) else {
            return false;
        };
        klass.set_type(type_id);
        self.initialize_primitive_class(klass);
        self.set_class_root(root, klass);
        true
    }

    /// Create the array class `root` whose components are `component_root`.
    pub fn initialize_array_class_root(&self, root: ClassRoot, component_root: ClassRoot, descriptor: &[u8]) -> bool {
        let Some(component) = self.get_class_root(component_root) else {
            error!("Component {} of {} does not exist", component_root, root);
            return false;
        };
        let Some(klass) = self.create_class(
            descriptor,
            self.get_class_vtable_size(root),
            self.get_class_imt_size(root),
            self.get_class_size(root),
        ) else {
            return false;
        };
        self.initialize_array_class(klass, component);
        self.set_class_root(root, klass);
        true
    }

    /// Find a class already loaded in `context`, the boot context by default.
    pub fn find_loaded_class(&self, descriptor: &[u8], context: Option<&dyn ClassLinkerContext>) -> Option<ClassPtr> {
        match context {
            Some(context) => context.find_class(descriptor),
            None => self.base().boot_context.find_class(descriptor),
        }
    }

    /// After a failed lookup of `descriptor`: if the pending exception of `thread` is a class
    /// not found exception, replace it with a no class def found error.
    pub fn wrap_class_not_found_exception_if_needed(&self, thread: &ManagedThread, descriptor: &[u8]) {
        let Some(cause) = thread.get_pending_exception() else {
            return;
        };
        let ctx = self.get_language_context();
        let cnf_descriptor = ctx.get_class_not_found_exception_descriptor();
        let is_class_not_found = cause.descriptor() == cnf_descriptor || {
            let cnf_class = self.get_class(cnf_descriptor, None, Some(&SuppressErrorHandler));
            let cause_class = self.get_class(cause.descriptor(), None, Some(&SuppressErrorHandler));
            match (cnf_class, cause_class) {
                (Some(cnf_class), Some(cause_class)) => cause_class.is_subclass_of(&cnf_class),
                _ => false,
            }
        };
        if is_class_not_found {
            throw_exception(
                thread,
                ctx.get_no_class_def_found_error_descriptor(),
                ClassHelper::get_name(descriptor),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_validation() {
        assert!(VisitGCRootFlags::ACCESS_ROOT_ALL.is_valid());
        assert!((VisitGCRootFlags::ACCESS_ROOT_ONLY_NEW | VisitGCRootFlags::START_RECORDING_NEW_ROOT).is_valid());
        assert!(!VisitGCRootFlags::empty().is_valid());
        assert!(!(VisitGCRootFlags::ACCESS_ROOT_ALL | VisitGCRootFlags::ACCESS_ROOT_NONE).is_valid());
        assert!(!(VisitGCRootFlags::ACCESS_ROOT_NONE
            | VisitGCRootFlags::START_RECORDING_NEW_ROOT
            | VisitGCRootFlags::END_RECORDING_NEW_ROOT)
            .is_valid());
    }
}
