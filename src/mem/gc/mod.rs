//! The garbage collector lifecycle.
//!
//! [`GC`] owns the collector state machine shared by every collector type: it is bound to a VM,
//! started and stopped, takes collection requests, runs collections in phases and notifies its
//! listeners. A collection visits and marks the VM roots, verifies the heap when asked to, and
//! leaves object memory untouched; reclamation policies of specific collectors plug in behind
//! [`GCType`].

use atomic::Atomic;
use bytemuck::NoUninit;
use enum_map::Enum;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;
use strum_macros::{Display, EnumString};

use crate::mem::gc_settings::GCSettings;
use crate::mem::mem_stats::MemStats;
use crate::mem::object_header::ObjectHeader;
use crate::util::ObjectReference;
use crate::vm::PandaVm;

pub mod gc_stats;
pub mod gc_trigger;

use self::gc_stats::GCStats;

/// The collector to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, Display, Enum)]
#[strum(serialize_all = "kebab-case")]
pub enum GCType {
    EpsilonGc,
    EpsilonG1Gc,
    StwGc,
    GenGc,
    G1Gc,
}

impl GCType {
    pub fn is_generational(self) -> bool {
        matches!(self, GCType::EpsilonG1Gc | GCType::GenGc | GCType::G1Gc)
    }
}

/// Why a collection was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Enum)]
#[strum(serialize_all = "kebab-case")]
pub enum GCTaskCause {
    YoungGcCause,
    PygoteForkCause,
    StartupCompleteCause,
    NativeAllocCause,
    HeapUsageThresholdCause,
    ExplicitCause,
    OomCause,
}

/// How much of the heap a collection covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum GCCollectionType {
    None,
    Young,
    Mixed,
    Tenured,
    Full,
}

/// A collection request.
#[derive(Clone, Copy, Debug)]
pub struct GCTask {
    pub reason: GCTaskCause,
    pub collection_type: GCCollectionType,
    pub created_at: Instant,
}

impl GCTask {
    pub fn new(reason: GCTaskCause) -> Self {
        GCTask {
            reason,
            collection_type: GCCollectionType::None,
            created_at: Instant::now(),
        }
    }

    pub fn with_collection_type(reason: GCTaskCause, collection_type: GCCollectionType) -> Self {
        GCTask {
            collection_type,
            ..GCTask::new(reason)
        }
    }
}

/// The phase the collector is in.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, NoUninit)]
pub enum GCPhase {
    Idle,
    Initial,
    MarkRoots,
    Mark,
    Sweep,
    Cleanup,
}

/// Moves an object and returns its new location.
#[cfg(test)]
pub(crate) type Relocator = Box<dyn Fn(&dyn PandaVm, ObjectReference) -> ObjectReference + Send + Sync>;

/// Observer of collections.
pub trait GCListener: Send + Sync {
    fn gc_started(&self, _task: &GCTask, _heap_size: usize) {}
    fn gc_finished(&self, _task: &GCTask, _heap_size_before_gc: usize, _heap_size: usize) {}
}

/// The collector.
pub struct GC {
    gc_type: GCType,
    settings: GCSettings,
    phase: Atomic<GCPhase>,
    vm: spin::Once<Weak<dyn PandaVm>>,
    mem_stats: Arc<MemStats>,
    stats: Arc<GCStats>,
    listeners: Mutex<Vec<Weak<dyn GCListener>>>,
    /// Accepting collection requests.
    gc_enabled: AtomicBool,
    /// A collection is running.
    gc_running: AtomicBool,
    /// A collection was requested but not run yet.
    gc_pending: AtomicBool,
    in_zygote_fork: AtomicBool,
    finalized: AtomicBool,
    gc_counter: AtomicU64,
    /// Moves the objects the VM roots refer to at the end of every collection.
    #[cfg(test)]
    relocator: Mutex<Option<Relocator>>,
}

impl GC {
    pub fn new(gc_type: GCType, settings: GCSettings, mem_stats: Arc<MemStats>, stats: Arc<GCStats>) -> Self {
        GC {
            gc_type,
            settings,
            phase: Atomic::new(GCPhase::Idle),
            vm: spin::Once::new(),
            mem_stats,
            stats,
            listeners: Mutex::new(vec![]),
            gc_enabled: AtomicBool::new(false),
            gc_running: AtomicBool::new(false),
            gc_pending: AtomicBool::new(false),
            in_zygote_fork: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            gc_counter: AtomicU64::new(0),
            #[cfg(test)]
            relocator: Mutex::new(None),
        }
    }

    /// Bind the collector to the VM whose roots it visits.
    pub fn initialize(&self, vm: Weak<dyn PandaVm>) {
        self.vm.call_once(|| vm);
        info!("{} initialized", self.gc_type);
    }

    pub fn is_initialized(&self) -> bool {
        self.vm.is_completed()
    }

    pub fn get_type(&self) -> GCType {
        self.gc_type
    }

    pub fn settings(&self) -> &GCSettings {
        &self.settings
    }

    pub fn stats(&self) -> &GCStats {
        &self.stats
    }

    pub fn get_phase(&self) -> GCPhase {
        self.phase.load(Ordering::Acquire)
    }

    fn set_phase(&self, phase: GCPhase) {
        trace!("GC phase {:?}", phase);
        self.phase.store(phase, Ordering::Release);
    }

    pub fn get_gc_counter(&self) -> u64 {
        self.gc_counter.load(Ordering::SeqCst)
    }

    pub fn add_listener(&self, listener: Weak<dyn GCListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn remove_listener(&self, listener: &Weak<dyn GCListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Weak::ptr_eq(l, listener));
    }

    fn live_listeners(&self) -> Vec<Arc<dyn GCListener>> {
        self.listeners
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn pre_startup(&self) {
        debug!("{}: pre-startup", self.gc_type);
    }

    pub fn start_gc(&self) {
        self.gc_enabled.store(true, Ordering::SeqCst);
        debug!("{}: started", self.gc_type);
    }

    pub fn stop_gc(&self) {
        self.gc_enabled.store(false, Ordering::SeqCst);
        debug!("{}: stopped", self.gc_type);
    }

    pub fn is_gc_enabled(&self) -> bool {
        self.gc_enabled.load(Ordering::SeqCst)
            && !self.in_zygote_fork.load(Ordering::SeqCst)
            && !self.finalized.load(Ordering::SeqCst)
    }

    pub fn pre_zygote_fork(&self) {
        self.in_zygote_fork.store(true, Ordering::SeqCst);
    }

    pub fn post_zygote_fork(&self) {
        self.in_zygote_fork.store(false, Ordering::SeqCst);
    }

    pub fn finalize(&self) {
        self.finalized.store(true, Ordering::SeqCst);
        if self.settings.is_gc_enable_tracing() || self.settings.log_detailed_gc_info_enabled() {
            info!("{} statistics:\n{}", self.gc_type, self.stats.get_statistics());
        }
    }

    /// Remember that a collection will be requested soon.
    pub fn pending_gc(&self) {
        self.gc_pending.store(true, Ordering::SeqCst);
    }

    pub fn is_gc_running(&self) -> bool {
        self.gc_running.load(Ordering::SeqCst)
    }

    pub fn is_gc_pending(&self) -> bool {
        self.gc_pending.load(Ordering::SeqCst)
    }

    /// Request a collection. Returns whether a collection ran.
    pub fn trigger(&self, task: GCTask) -> bool {
        self.pending_gc();
        self.run_if_possible(task)
    }

    /// Run a collection and return when it finished. Returns whether a collection ran.
    pub fn wait_for_gc(&self, task: GCTask) -> bool {
        self.run_if_possible(task)
    }

    fn run_if_possible(&self, task: GCTask) -> bool {
        if !self.is_gc_enabled() {
            debug!("{}: ignoring {} request, GC is disabled", self.gc_type, task.reason);
            return false;
        }
        let Some(vm) = self.vm.get().and_then(Weak::upgrade) else {
            return false;
        };
        if self
            .gc_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Allocation during a collection, or another thread is collecting.
            return false;
        }
        self.run_phases(&task, &*vm);
        self.gc_pending.store(false, Ordering::SeqCst);
        self.gc_running.store(false, Ordering::SeqCst);
        true
    }

    fn run_phases(&self, task: &GCTask, vm: &dyn PandaVm) {
        let heap_size_before_gc = self.mem_stats.get_footprint_heap();
        let listeners = self.live_listeners();
        for listener in listeners.iter() {
            listener.gc_started(task, heap_size_before_gc);
        }
        let start = Instant::now();
        info!(
            "[{}] {} started, cause {}, heap {}",
            self.get_gc_counter(),
            self.gc_type,
            task.reason,
            heap_size_before_gc
        );

        self.set_phase(GCPhase::Initial);
        if self.settings.pre_gc_heap_verification() {
            self.verify_heap(vm, "before GC");
        }

        self.set_phase(GCPhase::MarkRoots);
        let mut roots: Vec<ObjectReference> = vec![];
        vm.visit_vm_roots(&mut |object| {
            let header = ObjectHeader::from_object(object);
            if !header.is_marked() {
                header.set_marked(true);
                roots.push(object);
            }
        });

        self.set_phase(GCPhase::Mark);
        if self.settings.into_gc_heap_verification() {
            self.verify_heap(vm, "during GC");
        }

        self.set_phase(GCPhase::Sweep);
        self.set_phase(GCPhase::Cleanup);
        for object in roots.iter() {
            ObjectHeader::from_object(*object).set_marked(false);
        }
        #[cfg(test)]
        self.relocate_roots(vm);
        if self.settings.post_gc_heap_verification() {
            self.verify_heap(vm, "after GC");
        }
        self.set_phase(GCPhase::Idle);

        let heap_size = self.mem_stats.get_footprint_heap();
        self.stats
            .record_collection(task, start.elapsed(), roots.len(), heap_size_before_gc, heap_size);
        self.gc_counter.fetch_add(1, Ordering::SeqCst);
        if self.settings.log_detailed_gc_info_enabled() {
            info!(
                "{} finished in {:?}: {} roots, heap {} -> {}",
                self.gc_type,
                start.elapsed(),
                roots.len(),
                heap_size_before_gc,
                heap_size
            );
        }
        for listener in listeners.iter() {
            listener.gc_finished(task, heap_size_before_gc, heap_size);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_relocator(&self, relocator: Option<Relocator>) {
        *self.relocator.lock().unwrap() = relocator;
    }

    /// Move every object the roots refer to and point the roots at the new locations. The
    /// relocator runs with the collection in progress, so its own allocations never collect.
    #[cfg(test)]
    fn relocate_roots(&self, vm: &dyn PandaVm) {
        let relocator = self.relocator.lock().unwrap();
        if let Some(relocate) = relocator.as_ref() {
            vm.update_vm_refs(&mut |object| relocate(vm, object));
        }
    }

    fn verify_heap(&self, vm: &dyn PandaVm, when: &str) {
        let failures = vm.heap_manager().verify_heap();
        if failures != 0 {
            error!("Heap verification {} found {} broken objects", when, failures);
            if self.settings.fail_on_heap_verification() {
                panic!("Heap verification {} failed", when);
            }
        }
    }
}

impl Drop for GC {
    fn drop(&mut self) {
        debug_assert!(!self.gc_running.load(Ordering::SeqCst));
    }
}
