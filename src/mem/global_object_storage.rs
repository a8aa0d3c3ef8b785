//! Global references: handles to managed objects that live outside any thread's stack.
//!
//! Strong (global) references are GC roots. Weak references are updated when objects move and
//! cleared when their referent dies, but never keep it alive.

use std::num::NonZeroUsize;
use std::sync::RwLock;
use strum_macros::Display;

use crate::util::ObjectReference;

/// The kind of a global reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum GlobalRefType {
    Global,
    Weak,
}

const REF_TYPE_BITS: usize = 1;
const REF_TYPE_MASK: usize = (1 << REF_TYPE_BITS) - 1;

/// An opaque global reference. It encodes the slot index and the reference type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GlobalRef(NonZeroUsize);

impl GlobalRef {
    fn new(index: usize, ref_type: GlobalRefType) -> Self {
        let type_bit = match ref_type {
            GlobalRefType::Global => 0,
            GlobalRefType::Weak => 1,
        };
        // Slot 0 is encoded as 1 so that the value is never zero.
        let raw = ((index + 1) << REF_TYPE_BITS) | type_bit;
        GlobalRef(NonZeroUsize::new(raw).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn ref_type(self) -> GlobalRefType {
        if self.0.get() & REF_TYPE_MASK == 0 {
            GlobalRefType::Global
        } else {
            GlobalRefType::Weak
        }
    }

    fn index(self) -> usize {
        (self.0.get() >> REF_TYPE_BITS) - 1
    }

    pub fn as_usize(self) -> usize {
        self.0.get()
    }
}

struct Slots {
    objects: Vec<Option<ObjectReference>>,
    free_list: Vec<usize>,
    len: usize,
}

/// Storage for references of one type.
struct ArrayStorage {
    ref_type: GlobalRefType,
    max_size: usize,
    enable_size_check: bool,
    slots: RwLock<Slots>,
}

impl ArrayStorage {
    fn new(ref_type: GlobalRefType, max_size: usize, enable_size_check: bool) -> Self {
        ArrayStorage {
            ref_type,
            max_size,
            enable_size_check,
            slots: RwLock::new(Slots {
                objects: vec![],
                free_list: vec![],
                len: 0,
            }),
        }
    }

    fn add(&self, object: ObjectReference) -> Option<GlobalRef> {
        let mut slots = self.slots.write().unwrap();
        if self.enable_size_check && slots.len >= self.max_size {
            error!(
                "Global reference storage ({}) is full: {} references",
                self.ref_type, slots.len
            );
            return None;
        }
        let index = match slots.free_list.pop() {
            Some(index) => {
                slots.objects[index] = Some(object);
                index
            }
            None => {
                slots.objects.push(Some(object));
                slots.objects.len() - 1
            }
        };
        slots.len += 1;
        Some(GlobalRef::new(index, self.ref_type))
    }

    fn get(&self, global_ref: GlobalRef) -> Option<ObjectReference> {
        let slots = self.slots.read().unwrap();
        slots.objects.get(global_ref.index()).copied().flatten()
    }

    fn remove(&self, global_ref: GlobalRef) -> bool {
        let mut slots = self.slots.write().unwrap();
        let index = global_ref.index();
        match slots.objects.get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                slots.free_list.push(index);
                slots.len -= 1;
                true
            }
            _ => false,
        }
    }

    fn visit(&self, visitor: &mut dyn FnMut(ObjectReference)) {
        let slots = self.slots.read().unwrap();
        for object in slots.objects.iter().flatten() {
            visitor(*object);
        }
    }

    fn update(&self, updater: &mut dyn FnMut(ObjectReference) -> ObjectReference) {
        let mut slots = self.slots.write().unwrap();
        for object in slots.objects.iter_mut().flatten() {
            *object = updater(*object);
        }
    }

    fn clear_unmarked(&self, is_alive: &dyn Fn(ObjectReference) -> bool) -> usize {
        let mut guard = self.slots.write().unwrap();
        let slots = &mut *guard;
        let mut cleared = 0;
        for (index, slot) in slots.objects.iter_mut().enumerate() {
            if matches!(slot, Some(object) if !is_alive(*object)) {
                *slot = None;
                slots.free_list.push(index);
                cleared += 1;
            }
        }
        slots.len -= cleared;
        cleared
    }

    fn len(&self) -> usize {
        self.slots.read().unwrap().len
    }
}

/// Global and weak references held by native code.
pub struct GlobalObjectStorage {
    global_storage: ArrayStorage,
    weak_storage: ArrayStorage,
}

impl GlobalObjectStorage {
    pub fn new(max_size: usize, enable_size_check: bool) -> Self {
        GlobalObjectStorage {
            global_storage: ArrayStorage::new(GlobalRefType::Global, max_size, enable_size_check),
            weak_storage: ArrayStorage::new(GlobalRefType::Weak, max_size, enable_size_check),
        }
    }

    fn storage(&self, ref_type: GlobalRefType) -> &ArrayStorage {
        match ref_type {
            GlobalRefType::Global => &self.global_storage,
            GlobalRefType::Weak => &self.weak_storage,
        }
    }

    /// Create a reference to `object`. Returns `None` if the storage is full and size checks are on.
    pub fn add(&self, object: ObjectReference, ref_type: GlobalRefType) -> Option<GlobalRef> {
        self.storage(ref_type).add(object)
    }

    /// The referent, or `None` for a removed reference or a cleared weak reference.
    pub fn get(&self, global_ref: GlobalRef) -> Option<ObjectReference> {
        self.storage(global_ref.ref_type()).get(global_ref)
    }

    pub fn remove(&self, global_ref: GlobalRef) {
        if !self.storage(global_ref.ref_type()).remove(global_ref) {
            warn!("Removing unknown global reference {:#x}", global_ref.as_usize());
        }
    }

    /// Visit the referents of references of `ref_type`.
    pub fn visit_objects(&self, visitor: &mut dyn FnMut(ObjectReference), ref_type: GlobalRefType) {
        self.storage(ref_type).visit(visitor);
    }

    /// Rewrite every referent, for example after objects moved.
    pub fn update_refs(&self, updater: &mut dyn FnMut(ObjectReference) -> ObjectReference) {
        self.global_storage.update(updater);
        self.weak_storage.update(updater);
    }

    /// Clear weak references to dead objects. Returns the number of cleared references.
    pub fn clear_weak_refs(&self, is_alive: &dyn Fn(ObjectReference) -> bool) -> usize {
        self.weak_storage.clear_unmarked(is_alive)
    }

    pub fn get_size(&self, ref_type: GlobalRefType) -> usize {
        self.storage(ref_type).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Address;

    fn object(addr: usize) -> ObjectReference {
        ObjectReference::from_raw_address(unsafe { Address::from_usize(addr) }).unwrap()
    }

    #[test]
    fn refs_encode_their_type() {
        let storage = GlobalObjectStorage::new(16, true);
        let strong = storage.add(object(0x1000), GlobalRefType::Global).unwrap();
        let weak = storage.add(object(0x2000), GlobalRefType::Weak).unwrap();
        assert_eq!(strong.ref_type(), GlobalRefType::Global);
        assert_eq!(weak.ref_type(), GlobalRefType::Weak);
        assert_eq!(storage.get(strong), Some(object(0x1000)));
        assert_eq!(storage.get(weak), Some(object(0x2000)));
    }

    #[test]
    fn removed_slots_are_reused() {
        let storage = GlobalObjectStorage::new(16, false);
        let a = storage.add(object(0x1000), GlobalRefType::Global).unwrap();
        let _b = storage.add(object(0x2000), GlobalRefType::Global).unwrap();
        storage.remove(a);
        assert_eq!(storage.get(a), None);
        assert_eq!(storage.get_size(GlobalRefType::Global), 1);
        let c = storage.add(object(0x3000), GlobalRefType::Global).unwrap();
        assert_eq!(c, a);
        assert_eq!(storage.get(c), Some(object(0x3000)));
    }

    #[test]
    fn size_check_limits_storage() {
        let storage = GlobalObjectStorage::new(2, true);
        assert!(storage.add(object(0x1000), GlobalRefType::Global).is_some());
        assert!(storage.add(object(0x2000), GlobalRefType::Global).is_some());
        assert!(storage.add(object(0x3000), GlobalRefType::Global).is_none());
        // each type has its own limit
        assert!(storage.add(object(0x3000), GlobalRefType::Weak).is_some());

        let unchecked = GlobalObjectStorage::new(2, false);
        for i in 1..=4 {
            assert!(unchecked.add(object(i * 0x1000), GlobalRefType::Global).is_some());
        }
        assert_eq!(unchecked.get_size(GlobalRefType::Global), 4);
    }

    #[test]
    fn visit_and_update() {
        let storage = GlobalObjectStorage::new(16, false);
        let strong = storage.add(object(0x1000), GlobalRefType::Global).unwrap();
        let weak = storage.add(object(0x2000), GlobalRefType::Weak).unwrap();

        let mut roots = vec![];
        storage.visit_objects(&mut |o| roots.push(o), GlobalRefType::Global);
        assert_eq!(roots, vec![object(0x1000)]);

        storage.update_refs(&mut |o| object(o.to_raw_address().as_usize() + 0x10));
        assert_eq!(storage.get(strong), Some(object(0x1010)));
        assert_eq!(storage.get(weak), Some(object(0x2010)));
    }

    #[test]
    fn dead_weak_refs_are_cleared() {
        let storage = GlobalObjectStorage::new(16, false);
        let live = storage.add(object(0x1000), GlobalRefType::Weak).unwrap();
        let dead = storage.add(object(0x2000), GlobalRefType::Weak).unwrap();
        let cleared = storage.clear_weak_refs(&|o| o == object(0x1000));
        assert_eq!(cleared, 1);
        assert_eq!(storage.get(live), Some(object(0x1000)));
        assert_eq!(storage.get(dead), None);
        assert_eq!(storage.get_size(GlobalRefType::Weak), 1);
    }
}
