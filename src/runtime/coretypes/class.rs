use std::sync::atomic::{AtomicPtr, Ordering};

use crate::mem::object_header::ObjectHeader;
use crate::runtime::class::{Class, ClassPtr};
use crate::util::ObjectReference;

/// The managed object of a class. Its instances are the classes, so its size is the class size
/// of the runtime class it describes: the tables and static fields follow the fixed part.
#[repr(C)]
pub struct ClassObject {
    header: ObjectHeader,
    runtime_class: AtomicPtr<Class>,
}

impl ClassObject {
    /// View `object` as a class object. The object must be an instance of the class of classes.
    pub fn from_object<'a>(object: ObjectReference) -> &'a ClassObject {
        // SAFETY: class objects are allocated with at least the size of `ClassObject`.
        unsafe { object.as_object::<ClassObject>() }
    }

    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    pub fn runtime_class(&self) -> Option<ClassPtr> {
        ClassPtr::from_raw(self.runtime_class.load(Ordering::Acquire))
    }

    pub fn set_runtime_class(&self, klass: ClassPtr) {
        self.runtime_class.store(klass.as_ptr(), Ordering::Release);
    }

    pub fn object_size(&self) -> usize {
        self.runtime_class()
            .map_or(std::mem::size_of::<ClassObject>(), |klass| klass.class_size())
    }
}
