//! The managed heap: object allocation, heap growth and heap iteration.

use std::alloc::{alloc, alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::mem::gc::{GCTask, GCTaskCause};
use crate::mem::mem_stats::{MemStats, SpaceType};
use crate::mem::object_header::{ObjectHeader, OBJECT_HEADER_SIZE};
use crate::runtime::class::Class;
use crate::runtime::thread::{ManagedThread, PendingException};
use crate::util::constants::HUMONGOUS_OBJECT_THRESHOLD;
use crate::util::conversions::bytes_to_formatted_string;
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};
use crate::vm::PandaVm;

/// What the allocator does with the payload of a new object. The header is always initialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectInit {
    /// The payload is zero-filled.
    Zeroed,
    /// The caller writes every payload byte before the object becomes reachable.
    CallerInitialized,
}

/// Heap configuration handed to the memory manager.
#[derive(Clone, Debug)]
pub struct HeapOptions {
    pub is_object_finalizable: Option<fn(&Class) -> bool>,
    pub register_finalize_reference: Option<fn(ObjectReference)>,
    pub init_heap_size: usize,
    pub max_heap_size: usize,
    pub max_global_ref_size: usize,
    pub is_global_reference_size_check_enabled: bool,
    pub is_start_as_zygote: bool,
}

impl HeapOptions {
    pub fn new(options: &Options) -> Self {
        HeapOptions {
            is_object_finalizable: None,
            register_finalize_reference: None,
            init_heap_size: options.init_heap_size_limit,
            max_heap_size: options.heap_size_limit,
            max_global_ref_size: options.global_reference_size,
            is_global_reference_size_check_enabled: options.global_reference_size_check_enabled,
            is_start_as_zygote: options.start_as_zygote,
        }
    }
}

/// The capacity of the managed heap. It starts at the initial size and grows on demand up to the
/// maximum size.
#[derive(Debug)]
pub struct HeapSpace {
    init_size: usize,
    max_size: usize,
    current_size: AtomicUsize,
}

impl HeapSpace {
    pub fn new(init_size: usize, max_size: usize) -> Self {
        debug_assert!(init_size <= max_size);
        HeapSpace {
            init_size,
            max_size,
            current_size: AtomicUsize::new(init_size),
        }
    }

    pub fn init_size(&self) -> usize {
        self.init_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn current_size(&self) -> usize {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Grow the heap so it can hold at least `required` bytes. Fails if that exceeds the maximum.
    pub fn try_expand(&self, required: usize) -> bool {
        if required > self.max_size {
            return false;
        }
        let result = self
            .current_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                if current >= required {
                    return None;
                }
                Some(required.max(current + current / 2).min(self.max_size))
            });
        if let Ok(old) = result {
            debug!(
                "Heap expanded from {} to {}",
                bytes_to_formatted_string(old),
                bytes_to_formatted_string(self.current_size())
            );
        }
        true
    }
}

struct ObjectRecord {
    layout: Layout,
    space: SpaceType,
}

/// Hands out object memory from the global allocator and remembers every live object.
struct ObjectAllocator {
    objects: Mutex<HashMap<Address, ObjectRecord>>,
    used: AtomicUsize,
    heap_space: Arc<HeapSpace>,
    mem_stats: Arc<MemStats>,
}

impl ObjectAllocator {
    fn new(heap_space: Arc<HeapSpace>, mem_stats: Arc<MemStats>) -> Self {
        ObjectAllocator {
            objects: Mutex::new(HashMap::new()),
            used: AtomicUsize::new(0),
            heap_space,
            mem_stats,
        }
    }

    fn reserve(&self, size: usize) -> bool {
        loop {
            let old = self.used.load(Ordering::Relaxed);
            let Some(new) = old.checked_add(size) else {
                return false;
            };
            if new > self.heap_space.current_size() && !self.heap_space.try_expand(new) {
                return false;
            }
            if self
                .used
                .compare_exchange(old, new, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn allocate(&self, size: usize, align: usize, space: SpaceType, init: ObjectInit) -> Option<Address> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, align).ok()?;
        if !self.reserve(size) {
            return None;
        }
        // SAFETY: the layout has a non-zero size.
        let ptr = unsafe {
            match init {
                ObjectInit::Zeroed => alloc_zeroed(layout),
                ObjectInit::CallerInitialized => alloc(layout),
            }
        };
        if ptr.is_null() {
            self.used.fetch_sub(size, Ordering::Relaxed);
            return None;
        }
        let addr = Address::from_mut_ptr(ptr);
        self.objects
            .lock()
            .unwrap()
            .insert(addr, ObjectRecord { layout, space });
        self.mem_stats.record_allocate_object(size, space);
        Some(addr)
    }

    fn free(&self, addr: Address) -> bool {
        let Some(record) = self.objects.lock().unwrap().remove(&addr) else {
            return false;
        };
        let size = record.layout.size();
        // SAFETY: the record proves the memory came from `allocate` with this layout.
        unsafe { dealloc(addr.to_mut_ptr(), record.layout) };
        self.used.fetch_sub(size, Ordering::Relaxed);
        self.mem_stats.record_free_object(size, record.space);
        true
    }

    fn allocated_size(&self, addr: Address) -> Option<usize> {
        self.objects
            .lock()
            .unwrap()
            .get(&addr)
            .map(|record| record.layout.size())
    }

    fn snapshot(&self) -> Vec<Address> {
        self.objects.lock().unwrap().keys().copied().collect()
    }

    fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

impl Drop for ObjectAllocator {
    fn drop(&mut self) {
        let objects = std::mem::take(self.objects.get_mut().unwrap_or_else(|e| e.into_inner()));
        for (addr, record) in objects {
            // SAFETY: every record was produced by `allocate` and freed at most once.
            unsafe { dealloc(addr.to_mut_ptr(), record.layout) };
        }
    }
}

/// The managed heap.
pub struct HeapManager {
    object_allocator: ObjectAllocator,
    heap_space: Arc<HeapSpace>,
    mem_stats: Arc<MemStats>,
    vm: spin::Once<Weak<dyn PandaVm>>,
    out_of_memory_error_descriptor: &'static [u8],
    is_object_finalizable: Option<fn(&Class) -> bool>,
    register_finalize_reference: Option<fn(ObjectReference)>,
    is_start_as_zygote: bool,
    is_zygote_forked: AtomicBool,
    allocations_since_startup: AtomicUsize,
}

impl HeapManager {
    /// Returns `None` if the heap sizes are inconsistent.
    pub fn new(
        mem_stats: Arc<MemStats>,
        options: &HeapOptions,
        out_of_memory_error_descriptor: &'static [u8],
    ) -> Option<Self> {
        if options.init_heap_size > options.max_heap_size {
            error!(
                "Initial heap size {} exceeds the heap size limit {}",
                bytes_to_formatted_string(options.init_heap_size),
                bytes_to_formatted_string(options.max_heap_size)
            );
            return None;
        }
        let heap_space = Arc::new(HeapSpace::new(options.init_heap_size, options.max_heap_size));
        Some(HeapManager {
            object_allocator: ObjectAllocator::new(heap_space.clone(), mem_stats.clone()),
            heap_space,
            mem_stats,
            vm: spin::Once::new(),
            out_of_memory_error_descriptor,
            is_object_finalizable: options.is_object_finalizable,
            register_finalize_reference: options.register_finalize_reference,
            is_start_as_zygote: options.is_start_as_zygote,
            is_zygote_forked: AtomicBool::new(false),
            allocations_since_startup: AtomicUsize::new(0),
        })
    }

    /// Bind the VM. Until then allocation never polls the GC.
    pub fn set_panda_vm(&self, vm: Weak<dyn PandaVm>) {
        self.vm.call_once(|| vm);
    }

    fn panda_vm(&self) -> Option<Arc<dyn PandaVm>> {
        self.vm.get().and_then(Weak::upgrade)
    }

    /// Allocate a movable object of `klass`.
    pub fn allocate_object(
        &self,
        klass: &Class,
        size: usize,
        align: usize,
        thread: &ManagedThread,
        init: ObjectInit,
    ) -> Option<ObjectReference> {
        let space = if size >= HUMONGOUS_OBJECT_THRESHOLD {
            SpaceType::Humongous
        } else {
            SpaceType::Object
        };
        self.allocate_with_class(Some(klass), size, align, space, thread, init)
    }

    /// Allocate an object of `klass` that the GC never moves.
    pub fn allocate_non_movable_object(
        &self,
        klass: &Class,
        size: usize,
        align: usize,
        thread: &ManagedThread,
        init: ObjectInit,
    ) -> Option<ObjectReference> {
        self.allocate_with_class(
            Some(klass),
            size,
            align,
            SpaceType::NonMovableObject,
            thread,
            init,
        )
    }

    /// Allocate the managed object of the class of classes. Its class word stays null: the class
    /// it points to does not exist yet, and the caller patches the word once it does.
    pub fn allocate_class_class_object(
        &self,
        size: usize,
        align: usize,
        thread: &ManagedThread,
    ) -> Option<ObjectReference> {
        self.allocate_with_class(
            None,
            size,
            align,
            SpaceType::NonMovableObject,
            thread,
            ObjectInit::Zeroed,
        )
    }

    fn allocate_with_class(
        &self,
        klass: Option<&Class>,
        size: usize,
        align: usize,
        space: SpaceType,
        thread: &ManagedThread,
        init: ObjectInit,
    ) -> Option<ObjectReference> {
        debug_assert!(size >= OBJECT_HEADER_SIZE);
        // Objects are polled for before they exist: a collection never sees a payload the caller
        // has not written yet.
        self.poll_gc();
        let Some(addr) = self.allocate_memory(size, align, space, init) else {
            warn!(
                "Thread {}: cannot allocate {} for an object of {}",
                thread.id(),
                bytes_to_formatted_string(size),
                klass.map_or_else(|| "<class of classes>".to_string(), |k| k.name())
            );
            thread.set_pending_exception(PendingException::new(
                self.out_of_memory_error_descriptor,
                format!("Cannot allocate {} bytes", size),
            ));
            return None;
        };
        let class_ptr = klass.map_or(std::ptr::null_mut(), |k| k as *const Class as *mut Class);
        // SAFETY: `addr` is a fresh allocation of at least OBJECT_HEADER_SIZE bytes.
        unsafe {
            addr.store(ObjectHeader::new(class_ptr));
        }
        // SAFETY: the address is not zero.
        let object = unsafe { ObjectReference::from_raw_address_unchecked(addr) };
        trace!("Thread {}: allocated {} bytes at {}", thread.id(), size, object);

        if let (Some(klass), Some(is_finalizable), Some(register)) = (
            klass,
            self.is_object_finalizable,
            self.register_finalize_reference,
        ) {
            if is_finalizable(klass) {
                register(object);
            }
        }
        self.allocations_since_startup.fetch_add(1, Ordering::Relaxed);
        Some(object)
    }

    fn allocate_memory(&self, size: usize, align: usize, space: SpaceType, init: ObjectInit) -> Option<Address> {
        if let Some(addr) = self.object_allocator.allocate(size, align, space, init) {
            return Some(addr);
        }
        let vm = self.panda_vm()?;
        info!(
            "Allocation of {} failed, running a GC before retrying",
            bytes_to_formatted_string(size)
        );
        vm.gc().wait_for_gc(GCTask::new(GCTaskCause::OomCause));
        self.object_allocator.allocate(size, align, space, init)
    }

    fn poll_gc(&self) {
        if let Some(vm) = self.panda_vm() {
            vm.gc_trigger().trigger_gc_if_needed(vm.gc());
            #[cfg(feature = "extreme_assertions")]
            assert_eq!(self.verify_heap(), 0, "heap verification failed after allocation");
        }
    }

    /// Return the memory of an object to the heap. The object must be unreachable.
    pub fn free_object(&self, object: ObjectReference) {
        if !self.object_allocator.free(object.to_raw_address()) {
            warn!("Freeing {}, which is not a live object", object);
        }
    }

    /// Visit every object in the heap. The set of objects is sampled before the first call.
    pub fn iterate_over_objects(&self, visitor: &mut dyn FnMut(ObjectReference)) {
        for addr in self.object_allocator.snapshot() {
            // SAFETY: only non-zero addresses are recorded.
            visitor(unsafe { ObjectReference::from_raw_address_unchecked(addr) });
        }
    }

    /// Check the header of every object and return the number of broken objects.
    pub fn verify_heap(&self) -> usize {
        let mut failures = 0;
        for addr in self.object_allocator.snapshot() {
            // SAFETY: only non-zero addresses are recorded.
            let object = unsafe { ObjectReference::from_raw_address_unchecked(addr) };
            let header = ObjectHeader::from_object(object);
            let Some(allocated) = self.object_allocator.allocated_size(addr) else {
                // freed since the snapshot
                continue;
            };
            if header.class().is_none() {
                error!("Heap verification: object {} has no class", object);
                failures += 1;
            } else if header.object_size() > allocated {
                error!(
                    "Heap verification: object {} claims {} bytes but only {} were allocated",
                    object,
                    header.object_size(),
                    allocated
                );
                failures += 1;
            }
        }
        failures
    }

    pub fn is_live_object(&self, object: ObjectReference) -> bool {
        self.object_allocator
            .allocated_size(object.to_raw_address())
            .is_some()
    }

    pub fn get_objects_count(&self) -> usize {
        self.object_allocator.object_count()
    }

    /// Bytes used by objects.
    pub fn get_used_heap_size(&self) -> usize {
        self.object_allocator.used.load(Ordering::Relaxed)
    }

    pub fn get_allocations_since_startup(&self) -> usize {
        self.allocations_since_startup.load(Ordering::Relaxed)
    }

    pub fn heap_space(&self) -> &Arc<HeapSpace> {
        &self.heap_space
    }

    pub fn mem_stats(&self) -> &MemStats {
        &self.mem_stats
    }

    pub fn is_start_as_zygote(&self) -> bool {
        self.is_start_as_zygote
    }

    pub fn is_zygote_forked(&self) -> bool {
        self.is_zygote_forked.load(Ordering::Relaxed)
    }

    pub fn pre_zygote_fork(&self) {
        debug!(
            "Zygote fork with {} objects in the heap",
            self.get_objects_count()
        );
        self.is_zygote_forked.store(true, Ordering::Relaxed);
    }

    pub fn finalize(&self) {
        info!(
            "Heap: {} objects, {} used, capacity {} of {}\n{}",
            self.get_objects_count(),
            bytes_to_formatted_string(self.get_used_heap_size()),
            bytes_to_formatted_string(self.heap_space.current_size()),
            bytes_to_formatted_string(self.heap_space.max_size()),
            self.mem_stats.get_statistics()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::{BYTES_IN_KBYTE, DEFAULT_OBJECT_ALIGNMENT};

    fn heap(init: usize, max: usize) -> HeapManager {
        let options = HeapOptions {
            is_object_finalizable: None,
            register_finalize_reference: None,
            init_heap_size: init,
            max_heap_size: max,
            max_global_ref_size: 16,
            is_global_reference_size_check_enabled: false,
            is_start_as_zygote: false,
        };
        HeapManager::new(Arc::new(MemStats::new()), &options, b"Lpanda/OutOfMemoryError;").unwrap()
    }

    #[test]
    fn heap_space_grows_up_to_max() {
        let space = HeapSpace::new(100, 1000);
        assert!(space.try_expand(120));
        assert_eq!(space.current_size(), 150);
        assert!(space.try_expand(900));
        assert_eq!(space.current_size(), 900);
        assert!(space.try_expand(950));
        assert_eq!(space.current_size(), 1000);
        assert!(!space.try_expand(1001));
    }

    #[test]
    fn inconsistent_sizes_are_rejected() {
        let options = HeapOptions::new(&Options::builtin_defaults());
        let options = HeapOptions {
            init_heap_size: options.max_heap_size + 1,
            ..options
        };
        assert!(HeapManager::new(Arc::new(MemStats::new()), &options, b"").is_none());
    }

    #[test]
    fn class_class_object_and_free() {
        let heap = heap(BYTES_IN_KBYTE, 4 * BYTES_IN_KBYTE);
        let thread = ManagedThread::new(1);
        let object = heap
            .allocate_class_class_object(64, DEFAULT_OBJECT_ALIGNMENT, &thread)
            .unwrap();
        assert!(ObjectHeader::from_object(object).class().is_none());
        assert_eq!(heap.get_objects_count(), 1);
        assert_eq!(heap.get_used_heap_size(), 64);
        assert_eq!(heap.mem_stats().get_footprint(SpaceType::NonMovableObject), 64);
        // an object without class is broken once bootstrap is over
        assert_eq!(heap.verify_heap(), 1);

        heap.free_object(object);
        assert_eq!(heap.get_objects_count(), 0);
        assert_eq!(heap.get_used_heap_size(), 0);
        assert_eq!(heap.mem_stats().get_footprint_heap(), 0);
    }

    #[test]
    fn allocation_beyond_max_heap_reports_oom() {
        let heap = heap(BYTES_IN_KBYTE, 2 * BYTES_IN_KBYTE);
        let thread = ManagedThread::new(1);
        assert!(heap
            .allocate_class_class_object(3 * BYTES_IN_KBYTE, DEFAULT_OBJECT_ALIGNMENT, &thread)
            .is_none());
        let exception = thread.get_pending_exception().unwrap();
        assert_eq!(exception.descriptor(), b"Lpanda/OutOfMemoryError;");
        assert_eq!(heap.get_objects_count(), 0);
    }
}
