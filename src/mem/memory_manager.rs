//! The memory manager owns every component of the memory subsystem of one VM.
//!
//! Components are created in dependency order by [`MemoryManager::create`] and torn down in the
//! reverse order by [`MemoryManager::destroy`]. Nothing outside this module constructs a
//! [`HeapManager`], a [`GC`], a [`GCTrigger`] or a [`GlobalObjectStorage`].

use std::sync::{Arc, Weak};

use crate::mem::gc::gc_stats::GCStats;
use crate::mem::gc::gc_trigger::{GCTrigger, GCTriggerConfig, GCTriggerType};
use crate::mem::gc::{GCListener, GCType, GC};
use crate::mem::gc_settings::GCSettings;
use crate::mem::global_object_storage::GlobalObjectStorage;
use crate::mem::heap_manager::{HeapManager, HeapOptions};
use crate::mem::internal_allocator::{InternalAllocator, InternalArc, InternalBox};
use crate::mem::mem_stats::MemStats;
use crate::runtime::language::LanguageContext;
use crate::vm::PandaVm;

pub struct MemoryManager {
    // Fields are dropped in declaration order, which is the reverse of the creation order.
    gc: InternalBox<GC>,
    gc_trigger: InternalArc<GCTrigger>,
    gc_stats: InternalArc<GCStats>,
    global_object_storage: InternalBox<GlobalObjectStorage>,
    heap_manager: InternalArc<HeapManager>,
    mem_stats: InternalArc<MemStats>,
    allocator: Arc<InternalAllocator>,
}

impl MemoryManager {
    /// Create the memory subsystem. Returns `None` if any component cannot be created, in which
    /// case the components created so far are released.
    ///
    /// # Panics
    ///
    /// The G1 pause-time goal needs the G1 collector and the pause-time-goal trigger. Any other
    /// combination is a fatal configuration error.
    pub fn create(
        ctx: &dyn LanguageContext,
        allocator: Arc<InternalAllocator>,
        gc_type: GCType,
        gc_settings: GCSettings,
        gc_trigger_config: &GCTriggerConfig,
        heap_options: &HeapOptions,
    ) -> Option<InternalBox<MemoryManager>> {
        let mem_stats = allocator.new_shared(MemStats::new())?;
        let heap_manager = allocator.new_shared(HeapManager::new(
            mem_stats.share(),
            heap_options,
            ctx.out_of_memory_error_descriptor(),
        )?)?;
        let gc_stats = allocator.new_shared(GCStats::new())?;
        let pause_time_goal = gc_settings.g1_enable_pause_time_goal();
        let gc = allocator.new_object(GC::new(
            gc_type,
            gc_settings,
            mem_stats.share(),
            gc_stats.share(),
        ))?;
        let gc_trigger = allocator.new_shared(GCTrigger::new(
            mem_stats.share(),
            heap_manager.heap_space().clone(),
            gc_trigger_config,
        ))?;
        if pause_time_goal
            && (gc_type != GCType::G1Gc
                || gc_trigger.get_type() != GCTriggerType::PauseTimeGoalTrigger)
        {
            error!(
                "The G1 pause-time goal needs {} with the {} trigger, but got {} with the {} trigger",
                GCType::G1Gc,
                GCTriggerType::PauseTimeGoalTrigger,
                gc_type,
                gc_trigger.get_type()
            );
            panic!("Incompatible GC configuration for the pause-time goal");
        }
        let global_object_storage = allocator.new_object(GlobalObjectStorage::new(
            heap_options.max_global_ref_size,
            heap_options.is_global_reference_size_check_enabled,
        ))?;

        info!(
            "Memory manager created: {} with {} trigger, heap {} .. {}",
            gc_type,
            gc_trigger.get_type(),
            heap_options.init_heap_size,
            heap_options.max_heap_size
        );
        let manager = MemoryManager {
            gc,
            gc_trigger,
            gc_stats,
            global_object_storage,
            heap_manager,
            mem_stats,
            allocator: allocator.clone(),
        };
        allocator.new_object(manager)
    }

    /// Destroy the memory manager and check that the internal allocator got every byte back.
    pub fn destroy(mm: InternalBox<MemoryManager>) {
        let allocator = mm.allocator.clone();
        debug_assert_eq!(
            mm.heap_manager.strong_count(),
            1,
            "the heap manager is still shared while the memory manager is destroyed"
        );
        drop(mm);
        let footprint = allocator.footprint();
        assert_eq!(
            footprint, 0,
            "{} bytes of internal memory leaked by the memory subsystem",
            footprint
        );
    }

    /// Bind the heap and the GC to `vm` and subscribe the trigger to collections.
    pub fn initialize_gc(&self, vm: Weak<dyn PandaVm>) {
        self.heap_manager.set_panda_vm(vm.clone());
        self.gc.initialize(vm);
        let listener: Weak<dyn GCListener> = self.gc_trigger.downgrade();
        self.gc.add_listener(listener);
    }

    pub fn pre_startup(&self) {
        self.gc.pre_startup();
    }

    pub fn pre_zygote_fork(&self) {
        self.gc.pre_zygote_fork();
        self.heap_manager.pre_zygote_fork();
    }

    pub fn post_zygote_fork(&self) {
        self.gc.post_zygote_fork();
    }

    pub fn start_gc(&self) {
        self.gc.start_gc();
    }

    pub fn stop_gc(&self) {
        self.gc.stop_gc();
    }

    pub fn finalize(&self) {
        self.heap_manager.finalize();
        self.gc.finalize();
    }

    pub fn get_heap_manager(&self) -> &HeapManager {
        &self.heap_manager
    }

    /// A shared reference for a component that is torn down before the memory manager.
    pub fn heap_manager_arc(&self) -> Arc<HeapManager> {
        self.heap_manager.share()
    }

    pub fn get_gc(&self) -> &GC {
        &self.gc
    }

    pub fn get_gc_trigger(&self) -> &GCTrigger {
        &self.gc_trigger
    }

    pub fn get_gc_stats(&self) -> &GCStats {
        &self.gc_stats
    }

    pub fn get_global_object_storage(&self) -> &GlobalObjectStorage {
        &self.global_object_storage
    }

    pub fn get_mem_stats(&self) -> &MemStats {
        &self.mem_stats
    }

    pub fn get_internal_allocator(&self) -> &Arc<InternalAllocator> {
        &self.allocator
    }
}
