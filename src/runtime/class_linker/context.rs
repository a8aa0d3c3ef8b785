//! Class linker contexts: the scopes classes are loaded into.
//!
//! Every extension has one [`BootContext`] for the classes of the boot files, and one
//! [`AppContext`] per set of application files it was asked to load.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::runtime::class::{ClassPtr, ContextId};
use crate::runtime::class_linker::error::{ClassLinkerError, ClassLinkerErrorHandler, SuppressErrorHandler};
use crate::runtime::class_linker::extension::ClassLinkerExtension;
use crate::runtime::class_helper::ClassHelper;
use crate::runtime::language::SourceLanguage;
use crate::runtime::panda_file::File;

/// The classes of one context, by descriptor.
#[derive(Default)]
pub struct LoadedClasses {
    classes: RwLock<HashMap<Box<[u8]>, ClassPtr>>,
}

impl LoadedClasses {
    pub fn find(&self, descriptor: &[u8]) -> Option<ClassPtr> {
        self.classes.read().unwrap().get(descriptor).copied()
    }

    /// Insert `klass` unless a class with the same descriptor is there already, in which case
    /// that class is returned.
    pub fn insert(&self, klass: ClassPtr) -> Option<ClassPtr> {
        let mut classes = self.classes.write().unwrap();
        if let Some(existing) = classes.get(klass.descriptor()) {
            return Some(*existing);
        }
        classes.insert(klass.descriptor().into(), klass);
        None
    }

    /// Remove `klass` if it is the class registered under its descriptor.
    pub fn remove(&self, klass: ClassPtr) -> bool {
        let mut classes = self.classes.write().unwrap();
        if classes.get(klass.descriptor()) == Some(&klass) {
            classes.remove(klass.descriptor());
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.classes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The classes at this moment. Callbacks run on a snapshot, so they may load classes.
    pub fn snapshot(&self) -> Vec<ClassPtr> {
        self.classes.read().unwrap().values().copied().collect()
    }

    /// Remove every class and return them.
    pub fn take_all(&self) -> Vec<ClassPtr> {
        self.classes
            .write()
            .unwrap()
            .drain()
            .map(|(_, klass)| klass)
            .collect()
    }
}

pub trait ClassLinkerContext: Send + Sync {
    fn id(&self) -> ContextId;

    fn source_lang(&self) -> SourceLanguage;

    fn loaded_classes(&self) -> &LoadedClasses;

    /// Load `descriptor` into this context, or into a context this one delegates to.
    fn load_class(
        &self,
        descriptor: &[u8],
        ext: &dyn ClassLinkerExtension,
        error_handler: Option<&dyn ClassLinkerErrorHandler>,
    ) -> Option<ClassPtr>;

    fn is_boot_context(&self) -> bool {
        self.id().is_boot()
    }

    fn find_class(&self, descriptor: &[u8]) -> Option<ClassPtr> {
        self.loaded_classes().find(descriptor)
    }

    /// Returns the class already registered under the same descriptor, if there is one.
    fn insert_class(&self, klass: ClassPtr) -> Option<ClassPtr> {
        self.loaded_classes().insert(klass)
    }

    /// Call `callback` on every class until it returns false. Returns false if it was stopped.
    fn enumerate_classes(&self, callback: &mut dyn FnMut(ClassPtr) -> bool) -> bool {
        self.loaded_classes().snapshot().into_iter().all(callback)
    }

    fn num_loaded_classes(&self) -> usize {
        self.loaded_classes().len()
    }

    fn panda_files(&self) -> &[Arc<File>] {
        &[]
    }
}

/// The context of the boot files.
pub struct BootContext {
    lang: SourceLanguage,
    classes: LoadedClasses,
}

impl BootContext {
    pub fn new(lang: SourceLanguage) -> Self {
        BootContext {
            lang,
            classes: LoadedClasses::default(),
        }
    }
}

impl ClassLinkerContext for BootContext {
    fn id(&self) -> ContextId {
        ContextId::BOOT
    }

    fn source_lang(&self) -> SourceLanguage {
        self.lang
    }

    fn loaded_classes(&self) -> &LoadedClasses {
        &self.classes
    }

    fn load_class(
        &self,
        descriptor: &[u8],
        ext: &dyn ClassLinkerExtension,
        error_handler: Option<&dyn ClassLinkerErrorHandler>,
    ) -> Option<ClassPtr> {
        ext.get_class(descriptor, None, error_handler)
    }
}

/// The context of a set of application files. Classes of the boot context are visible from it.
pub struct AppContext {
    id: ContextId,
    lang: SourceLanguage,
    classes: LoadedClasses,
    panda_files: Vec<Arc<File>>,
}

impl AppContext {
    pub fn new(id: ContextId, lang: SourceLanguage, panda_files: Vec<Arc<File>>) -> Self {
        debug_assert!(!id.is_boot());
        AppContext {
            id,
            lang,
            classes: LoadedClasses::default(),
            panda_files,
        }
    }
}

impl ClassLinkerContext for AppContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn source_lang(&self) -> SourceLanguage {
        self.lang
    }

    fn loaded_classes(&self) -> &LoadedClasses {
        &self.classes
    }

    fn load_class(
        &self,
        descriptor: &[u8],
        ext: &dyn ClassLinkerExtension,
        error_handler: Option<&dyn ClassLinkerErrorHandler>,
    ) -> Option<ClassPtr> {
        if let Some(klass) = ext.get_class(descriptor, None, Some(&SuppressErrorHandler)) {
            return Some(klass);
        }
        let linker = ext.get_class_linker()?;
        for file in self.panda_files.iter() {
            let Some(class_id) = file.get_class_id(descriptor) else {
                continue;
            };
            if file.is_external(class_id) {
                continue;
            }
            return linker.load_class(file, class_id, self, error_handler);
        }
        let message = format!(
            "Cannot find class {} in all app panda files",
            ClassHelper::get_name(descriptor)
        );
        error_handler
            .unwrap_or_else(|| ext.get_error_handler())
            .on_error(ClassLinkerError::ClassNotFound, &message);
        None
    }

    fn panda_files(&self) -> &[Arc<File>] {
        &self.panda_files
    }
}
