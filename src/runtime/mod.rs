//! The managed runtime: class linking, core types and the [`Runtime`] that ties them to the
//! memory subsystem.

pub mod class;
pub mod class_helper;
pub mod class_linker;
pub mod core;
pub mod coretypes;
pub mod exceptions;
pub mod language;
pub mod panda_file;
pub mod thread;
pub mod utf;

use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;

use crate::mem::gc::gc_trigger::{GCTrigger, GCTriggerConfig};
use crate::mem::gc::GC;
use crate::mem::gc_settings::GCSettings;
use crate::mem::global_object_storage::GlobalRefType;
use crate::mem::heap_manager::{HeapManager, HeapOptions};
use crate::mem::internal_allocator::{InternalAllocator, InternalBox};
use crate::mem::memory_manager::MemoryManager;
use crate::util::options::{Options, OptionsError};
use crate::util::ObjectReference;
use crate::vm::PandaVm;

use self::class_linker::extension::{ClassLinkerExtension, VisitGCRootFlags};
use self::class_linker::ClassLinker;
use self::coretypes::string::StringContext;
use self::language::{language_context, SourceLanguage};
use self::panda_file::File;
use self::thread::ManagedThread;

const MAIN_THREAD_ID: u32 = 1;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error("{0} is not supported")]
    UnsupportedLanguage(SourceLanguage),
    #[error("cannot create the memory manager")]
    MemoryManager,
    #[error("cannot initialize the class linker")]
    ClassLinker,
}

/// A running VM. The thread that creates the runtime becomes its main thread.
pub struct Runtime {
    options: Options,
    allocator: Arc<InternalAllocator>,
    class_linker: ManuallyDrop<Arc<ClassLinker>>,
    memory_manager: ManuallyDrop<InternalBox<MemoryManager>>,
    threads: Mutex<Vec<Arc<ManagedThread>>>,
    main_thread: Arc<ManagedThread>,
    next_thread_id: AtomicU32,
}

impl Runtime {
    /// Create a runtime that loads its core classes from `boot_files`, attach the calling thread
    /// as the main thread and create the class roots.
    pub fn create(options: Options, boot_files: Vec<File>) -> Result<Arc<Runtime>, RuntimeError> {
        if crate::util::logger::try_init().is_ok() {
            debug!("Runtime installed its logger");
        }
        options.validate()?;
        let lang = SourceLanguage::PandaAssembly;
        let ctx = language_context(lang).ok_or(RuntimeError::UnsupportedLanguage(lang))?;

        let allocator = InternalAllocator::new();
        let memory_manager = MemoryManager::create(
            ctx,
            allocator.clone(),
            options.gc_type,
            GCSettings::new(&options, lang),
            &GCTriggerConfig::new(&options),
            &HeapOptions::new(&options),
        )
        .ok_or(RuntimeError::MemoryManager)?;
        let class_linker = ClassLinker::create(
            memory_manager.heap_manager_arc(),
            boot_files,
            vec![ctx.create_class_linker_extension()],
        );

        let main_thread = Arc::new(ManagedThread::new(MAIN_THREAD_ID));
        ManagedThread::set_current(Some(main_thread.clone()));
        let runtime = Arc::new(Runtime {
            options,
            allocator,
            class_linker: ManuallyDrop::new(class_linker),
            memory_manager: ManuallyDrop::new(memory_manager),
            threads: Mutex::new(vec![main_thread.clone()]),
            main_thread,
            next_thread_id: AtomicU32::new(MAIN_THREAD_ID + 1),
        });

        let vm: Weak<dyn PandaVm> = Arc::downgrade(&runtime) as Weak<dyn PandaVm>;
        runtime.memory_manager.initialize_gc(vm);
        runtime.memory_manager.pre_startup();
        if !runtime
            .class_linker
            .initialize(runtime.options.compressed_strings_enabled)
        {
            return Err(RuntimeError::ClassLinker);
        }
        runtime.core_extension().initialize_roots(&runtime.main_thread);
        runtime.memory_manager.start_gc();
        info!(
            "Runtime created with {} classes, {} heap objects",
            runtime.core_extension().num_loaded_classes(),
            runtime.memory_manager.get_heap_manager().get_objects_count()
        );
        Ok(runtime)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn class_linker(&self) -> &ClassLinker {
        &self.class_linker
    }

    pub fn memory_manager(&self) -> &MemoryManager {
        &self.memory_manager
    }

    pub fn internal_allocator(&self) -> &Arc<InternalAllocator> {
        &self.allocator
    }

    /// The extension of the core language. It is created with the runtime.
    pub fn core_extension(&self) -> &dyn ClassLinkerExtension {
        self.class_linker
            .get_extension(SourceLanguage::PandaAssembly)
            .expect("the runtime is created with the core extension")
    }

    pub fn main_thread(&self) -> &ManagedThread {
        &self.main_thread
    }

    /// Attach a new managed thread to the calling OS thread.
    pub fn attach_current_thread(&self) -> Arc<ManagedThread> {
        let thread = Arc::new(ManagedThread::new(
            self.next_thread_id.fetch_add(1, Ordering::Relaxed),
        ));
        self.threads.lock().unwrap().push(thread.clone());
        ManagedThread::set_current(Some(thread.clone()));
        debug!("Attached thread {}", thread.id());
        thread
    }

    /// Detach the managed thread of the calling OS thread. Its handles stop being roots.
    pub fn detach_current_thread(&self) {
        let Some(current) = ManagedThread::current() else {
            warn!("No managed thread to detach");
            return;
        };
        self.threads
            .lock()
            .unwrap()
            .retain(|thread| !Arc::ptr_eq(thread, &current));
        ManagedThread::set_current(None);
        debug!("Detached thread {}", current.id());
    }

    pub fn num_threads(&self) -> usize {
        self.threads.lock().unwrap().len()
    }

    /// The context for creating strings on behalf of `thread`.
    pub fn string_context<'a>(&'a self, thread: &'a ManagedThread) -> StringContext<'a> {
        let ext = self.core_extension();
        StringContext::new(
            ext,
            self.memory_manager.get_heap_manager(),
            &self.allocator,
            thread,
            ext.is_compressed_strings_enabled(),
        )
    }

    fn threads_snapshot(&self) -> Vec<Arc<ManagedThread>> {
        self.threads.lock().unwrap().clone()
    }
}

impl PandaVm for Runtime {
    fn visit_vm_roots(&self, visitor: &mut dyn FnMut(ObjectReference)) {
        for thread in self.threads_snapshot() {
            thread.handle_storage().visit_roots(visitor);
        }
        for ext in self.class_linker.extensions() {
            ext.enumerate_classes(
                &mut |klass| {
                    if let Some(object) = klass.managed_object() {
                        visitor(object);
                    }
                    true
                },
                VisitGCRootFlags::ACCESS_ROOT_ALL,
            );
        }
        self.memory_manager
            .get_global_object_storage()
            .visit_objects(visitor, GlobalRefType::Global);
    }

    fn update_vm_refs(&self, updater: &mut dyn FnMut(ObjectReference) -> ObjectReference) {
        for thread in self.threads_snapshot() {
            thread.handle_storage().update_roots(updater);
        }
        self.memory_manager
            .get_global_object_storage()
            .update_refs(updater);
    }

    fn heap_manager(&self) -> &HeapManager {
        self.memory_manager.get_heap_manager()
    }

    fn gc(&self) -> &GC {
        self.memory_manager.get_gc()
    }

    fn gc_trigger(&self) -> &GCTrigger {
        self.memory_manager.get_gc_trigger()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.memory_manager.stop_gc();
        self.memory_manager.finalize();
        // SAFETY: neither field is used after this point.
        unsafe {
            ManuallyDrop::drop(&mut self.class_linker);
            MemoryManager::destroy(ManuallyDrop::take(&mut self.memory_manager));
        }
        if ManagedThread::current().is_some_and(|current| Arc::ptr_eq(&current, &self.main_thread)) {
            ManagedThread::set_current(None);
        }
        info!("Runtime destroyed");
    }
}
