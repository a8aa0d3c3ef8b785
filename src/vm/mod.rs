//! The interface between the memory subsystem and the VM that owns it.
//!
//! The GC and the heap only know the VM through [`PandaVm`]: the heap asks it for the collector
//! when an allocation fails or the trigger fires, and the collector asks it for roots.

use crate::mem::gc::gc_trigger::GCTrigger;
use crate::mem::gc::GC;
use crate::mem::heap_manager::HeapManager;
use crate::util::ObjectReference;

pub trait PandaVm: Send + Sync {
    /// Visit every root the VM holds: handles of attached threads, managed objects of loaded
    /// classes and global references.
    fn visit_vm_roots(&self, visitor: &mut dyn FnMut(ObjectReference));

    /// Rewrite every root the VM holds. The updater returns the new location of an object.
    fn update_vm_refs(&self, updater: &mut dyn FnMut(ObjectReference) -> ObjectReference);

    fn heap_manager(&self) -> &HeapManager;

    fn gc(&self) -> &GC;

    fn gc_trigger(&self) -> &GCTrigger;
}
