use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::mem::handle_scope::HandleStorage;
use crate::runtime::class_helper::ClassHelper;

/// A managed exception raised on a thread and not handled yet.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingException {
    descriptor: Box<[u8]>,
    message: String,
}

impl PendingException {
    pub fn new(descriptor: &[u8], message: String) -> Self {
        PendingException {
            descriptor: descriptor.into(),
            message,
        }
    }

    /// Descriptor of the exception class.
    pub fn descriptor(&self) -> &[u8] {
        &self.descriptor
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for PendingException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", ClassHelper::get_name(&self.descriptor), self.message)
    }
}

/// A thread that runs managed code.
pub struct ManagedThread {
    id: u32,
    handle_storage: HandleStorage,
    exception: Mutex<Option<PendingException>>,
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<ManagedThread>>> = const { RefCell::new(None) };
}

impl ManagedThread {
    pub fn new(id: u32) -> Self {
        ManagedThread {
            id,
            handle_storage: HandleStorage::new(),
            exception: Mutex::new(None),
        }
    }

    /// The managed thread attached to the current OS thread.
    pub fn current() -> Option<Arc<ManagedThread>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Attach `thread` to the current OS thread, or detach with `None`.
    pub fn set_current(thread: Option<Arc<ManagedThread>>) {
        CURRENT.with(|current| *current.borrow_mut() = thread);
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn handle_storage(&self) -> &HandleStorage {
        &self.handle_storage
    }

    /// Raise `exception`, replacing the pending one if there is any.
    pub fn set_pending_exception(&self, exception: PendingException) {
        debug!("Thread {}: pending exception {:?}", self.id, exception);
        *self.exception.lock().unwrap() = Some(exception);
    }

    pub fn get_pending_exception(&self) -> Option<PendingException> {
        self.exception.lock().unwrap().clone()
    }

    pub fn has_pending_exception(&self) -> bool {
        self.exception.lock().unwrap().is_some()
    }

    /// Remove the pending exception and return it.
    pub fn clear_pending_exception(&self) -> Option<PendingException> {
        self.exception.lock().unwrap().take()
    }
}

impl fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThread")
            .field("id", &self.id)
            .field("handles", &self.handle_storage.len())
            .finish()
    }
}
