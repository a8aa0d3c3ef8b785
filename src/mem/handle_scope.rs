//! Scoped GC-safe references held by native code.
//!
//! A [`VMHandle`] registers an object as a GC root in its thread's [`HandleStorage`]. The GC may
//! rewrite the slot when the object moves, so native code that allocates while holding a
//! managed object must keep it in a handle and read it back with [`VMHandle::get`] after the
//! allocation.

use std::marker::PhantomData;

use crate::runtime::thread::ManagedThread;
use crate::util::ObjectReference;

/// Handle slots of one thread, used as a stack.
#[derive(Default)]
pub struct HandleStorage {
    slots: spin::Mutex<Vec<ObjectReference>>,
}

impl HandleStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, object: ObjectReference) -> usize {
        let mut slots = self.slots.lock();
        slots.push(object);
        slots.len() - 1
    }

    fn get(&self, index: usize) -> ObjectReference {
        self.slots.lock()[index]
    }

    fn set(&self, index: usize, object: ObjectReference) {
        self.slots.lock()[index] = object;
    }

    fn truncate(&self, len: usize) {
        let mut slots = self.slots.lock();
        debug_assert!(slots.len() >= len, "handle scopes were not released in stack order");
        slots.truncate(len);
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every handle as a GC root.
    pub fn visit_roots(&self, visitor: &mut dyn FnMut(ObjectReference)) {
        for object in self.slots.lock().iter() {
            visitor(*object);
        }
    }

    /// Rewrite every handle, for example after objects moved.
    pub fn update_roots(&self, updater: &mut dyn FnMut(ObjectReference) -> ObjectReference) {
        for object in self.slots.lock().iter_mut() {
            *object = updater(*object);
        }
    }
}

/// A region of handles. Every handle created in the scope is released when the scope is dropped.
/// Scopes of a thread nest.
pub struct HandleScope<'t> {
    storage: &'t HandleStorage,
    base: usize,
}

impl<'t> HandleScope<'t> {
    pub fn new(thread: &'t ManagedThread) -> Self {
        let storage = thread.handle_storage();
        HandleScope {
            base: storage.len(),
            storage,
        }
    }

    /// Register `object` as a root for the lifetime of this scope.
    pub fn handle(&self, object: ObjectReference) -> VMHandle<'_> {
        VMHandle {
            storage: self.storage,
            index: self.storage.push(object),
            _scope: PhantomData,
        }
    }
}

impl Drop for HandleScope<'_> {
    fn drop(&mut self) {
        self.storage.truncate(self.base);
    }
}

/// A GC root owned by a [`HandleScope`].
pub struct VMHandle<'s> {
    storage: &'s HandleStorage,
    index: usize,
    _scope: PhantomData<&'s HandleScope<'s>>,
}

impl VMHandle<'_> {
    /// The current location of the object.
    pub fn get(&self) -> ObjectReference {
        self.storage.get(self.index)
    }

    pub fn set(&self, object: ObjectReference) {
        self.storage.set(self.index, object);
    }
}
