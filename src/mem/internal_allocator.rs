//! The allocator for runtime-internal (non-managed) objects.
//!
//! Every runtime component that is not a managed object is created through the
//! [`InternalAllocator`], which keeps an exact account of the bytes it handed out. The account is
//! checked when the memory manager is destroyed: a non-zero footprint at that point is a leak.

use std::fmt;
use std::mem::size_of_val;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::util::conversions::bytes_to_formatted_string;

/// Accounts memory used by runtime-internal objects and optionally caps it.
#[derive(Default)]
pub struct InternalAllocator {
    footprint: AtomicUsize,
    peak_footprint: AtomicUsize,
    total_allocations: AtomicUsize,
    /// Zero means unlimited.
    limit: usize,
}

impl InternalAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create an allocator that refuses to account more than `limit` bytes at a time.
    pub fn with_limit(limit: usize) -> Arc<Self> {
        Arc::new(InternalAllocator {
            limit,
            ..Default::default()
        })
    }

    /// Move `value` into an accounted box. Returns `None` if the allocator limit is exceeded.
    pub fn new_object<T>(self: &Arc<Self>, value: T) -> Option<InternalBox<T>> {
        self.adopt(Box::new(value))
    }

    /// Account an existing box, which may hold an unsized value such as a slice or a trait object.
    pub fn adopt<T: ?Sized>(self: &Arc<Self>, value: Box<T>) -> Option<InternalBox<T>> {
        let size = size_of_val(&*value);
        if !self.reserve(size) {
            return None;
        }
        Some(InternalBox {
            value,
            size,
            allocator: self.clone(),
        })
    }

    /// Move `value` into an accounted shared allocation.
    pub fn new_shared<T>(self: &Arc<Self>, value: T) -> Option<InternalArc<T>> {
        let size = std::mem::size_of::<T>();
        if !self.reserve(size) {
            return None;
        }
        Some(InternalArc {
            value: Arc::new(value),
            size,
            allocator: self.clone(),
        })
    }

    /// Allocate a zero-initialized scratch buffer.
    pub fn alloc_array<T: Copy + Default>(self: &Arc<Self>, len: usize) -> Option<InternalBox<[T]>> {
        self.adopt(vec![T::default(); len].into_boxed_slice())
    }

    fn reserve(&self, size: usize) -> bool {
        let limit = self.limit;
        let result = self
            .footprint
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |old| {
                let new = old.checked_add(size)?;
                if limit != 0 && new > limit {
                    None
                } else {
                    Some(new)
                }
            });
        match result {
            Ok(old) => {
                self.peak_footprint.fetch_max(old + size, Ordering::Relaxed);
                self.total_allocations.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(old) => {
                warn!(
                    "Internal allocator cannot allocate {} bytes: footprint {}, limit {}",
                    size,
                    bytes_to_formatted_string(old),
                    bytes_to_formatted_string(limit)
                );
                false
            }
        }
    }

    fn release(&self, size: usize) {
        let old = self.footprint.fetch_sub(size, Ordering::SeqCst);
        debug_assert!(old >= size, "Internal allocator released more than it allocated");
    }

    /// Bytes currently allocated.
    pub fn footprint(&self) -> usize {
        self.footprint.load(Ordering::SeqCst)
    }

    pub fn peak_footprint(&self) -> usize {
        self.peak_footprint.load(Ordering::Relaxed)
    }

    pub fn total_allocations(&self) -> usize {
        self.total_allocations.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> Option<usize> {
        (self.limit != 0).then_some(self.limit)
    }
}

impl fmt::Debug for InternalAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalAllocator")
            .field("footprint", &self.footprint())
            .field("peak_footprint", &self.peak_footprint())
            .field("limit", &self.limit())
            .finish()
    }
}

/// An exclusively owned internal object. Its bytes are returned to the allocator account on drop.
pub struct InternalBox<T: ?Sized> {
    value: Box<T>,
    size: usize,
    allocator: Arc<InternalAllocator>,
}

impl<T: ?Sized> InternalBox<T> {
    pub fn allocator(this: &Self) -> &Arc<InternalAllocator> {
        &this.allocator
    }
}

impl<T: ?Sized> Deref for InternalBox<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: ?Sized> DerefMut for InternalBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: ?Sized> Drop for InternalBox<T> {
    fn drop(&mut self) {
        self.allocator.release(self.size);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for InternalBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

/// An internal object shared between runtime components.
///
/// The `InternalArc` is the owning handle: the bytes are returned to the allocator account when
/// it is dropped. Clones obtained with [`InternalArc::share`] must not outlive the owner.
pub struct InternalArc<T> {
    value: Arc<T>,
    size: usize,
    allocator: Arc<InternalAllocator>,
}

impl<T> InternalArc<T> {
    /// A strong reference for a component that is torn down before the owner.
    pub fn share(&self) -> Arc<T> {
        self.value.clone()
    }

    pub fn downgrade(&self) -> Weak<T> {
        Arc::downgrade(&self.value)
    }

    /// Number of strong references, the owner included.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.value)
    }
}

impl<T> Deref for InternalArc<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Drop for InternalArc<T> {
    fn drop(&mut self) {
        self.allocator.release(self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprint_follows_allocations() {
        let allocator = InternalAllocator::new();
        let a = allocator.new_object(0u64).unwrap();
        let b = allocator.alloc_array::<u16>(10).unwrap();
        assert_eq!(allocator.footprint(), 8 + 20);
        drop(a);
        assert_eq!(allocator.footprint(), 20);
        drop(b);
        assert_eq!(allocator.footprint(), 0);
        assert_eq!(allocator.peak_footprint(), 28);
        assert_eq!(allocator.total_allocations(), 2);
    }

    #[test]
    fn adopt_accounts_unsized_values() {
        let allocator = InternalAllocator::new();
        let boxed: Box<dyn fmt::Debug> = Box::new([0u32; 4]);
        let adopted = allocator.adopt(boxed).unwrap();
        assert_eq!(allocator.footprint(), 16);
        drop(adopted);
        assert_eq!(allocator.footprint(), 0);
    }

    #[test]
    fn limit_is_enforced() {
        let allocator = InternalAllocator::with_limit(16);
        let a = allocator.new_object([0u8; 12]).unwrap();
        assert!(allocator.new_object([0u8; 8]).is_none());
        assert_eq!(allocator.footprint(), 12);
        drop(a);
        assert!(allocator.new_object([0u8; 16]).is_some());
        assert_eq!(allocator.footprint(), 0);
    }

    #[test]
    fn shared_objects_are_released_by_the_owner() {
        let allocator = InternalAllocator::new();
        let owner = allocator.new_shared(7u32).unwrap();
        let shared = owner.share();
        assert_eq!(owner.strong_count(), 2);
        assert_eq!(*shared, 7);
        drop(shared);
        assert_eq!(owner.strong_count(), 1);
        assert_eq!(allocator.footprint(), 4);
        drop(owner);
        assert_eq!(allocator.footprint(), 0);
    }
}
