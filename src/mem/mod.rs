//! The memory subsystem: heap, collector configuration and lifecycle, GC roots held by native
//! code, and the [`MemoryManager`](memory_manager::MemoryManager) that owns all of it.

pub mod gc;
pub mod gc_settings;
pub mod global_object_storage;
pub mod handle_scope;
pub mod heap_manager;
pub mod internal_allocator;
pub mod mem_stats;
pub mod memory_manager;
pub mod object_header;
