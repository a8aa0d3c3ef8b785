use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::runtime::class::Class;
use crate::runtime::coretypes::array::Array;
use crate::runtime::coretypes::class::ClassObject;
use crate::runtime::coretypes::string::CoreString;
use crate::util::ObjectReference;

/// Bits of the mark word.
pub const MARK_BIT: usize = 0b1;

/// The header every managed object starts with.
///
/// The class word points at the runtime [`Class`] of the object. It is null only for the
/// managed object of the very first class (the class of classes) until the bootstrap patches it
/// to point at itself.
#[repr(C)]
pub struct ObjectHeader {
    class_word: AtomicPtr<Class>,
    mark_word: AtomicUsize,
}

/// Size of the object header in bytes.
pub const OBJECT_HEADER_SIZE: usize = std::mem::size_of::<ObjectHeader>();

static_assertions::const_assert_eq!(OBJECT_HEADER_SIZE, 2 * crate::util::constants::BYTES_IN_WORD);

impl ObjectHeader {
    pub const fn object_header_size() -> usize {
        OBJECT_HEADER_SIZE
    }

    pub(crate) fn new(class_ptr: *mut Class) -> Self {
        ObjectHeader {
            class_word: AtomicPtr::new(class_ptr),
            mark_word: AtomicUsize::new(0),
        }
    }

    pub fn from_object<'a>(object: ObjectReference) -> &'a ObjectHeader {
        // Every object reference points at a header.
        unsafe { object.as_object::<ObjectHeader>() }
    }

    pub fn class(&self) -> Option<&Class> {
        let ptr = self.class_word.load(Ordering::Acquire);
        // Classes outlive their instances.
        unsafe { ptr.as_ref() }
    }

    pub fn set_class(&self, klass: &Class) {
        self.class_word
            .store(klass as *const Class as *mut Class, Ordering::Release);
    }

    pub fn is_marked(&self) -> bool {
        self.mark_word.load(Ordering::Relaxed) & MARK_BIT != 0
    }

    pub fn set_marked(&self, marked: bool) {
        if marked {
            self.mark_word.fetch_or(MARK_BIT, Ordering::Relaxed);
        } else {
            self.mark_word.fetch_and(!MARK_BIT, Ordering::Relaxed);
        }
    }

    /// The size of the whole object, computed from its class and, for variable sized objects,
    /// from its length.
    pub fn object_size(&self) -> usize {
        let Some(klass) = self.class() else {
            return OBJECT_HEADER_SIZE;
        };
        let object = ObjectReference::from_ref(self);
        if klass.is_array_class() {
            // SAFETY: the class says this object is an array.
            let array = unsafe { object.as_object::<Array>() };
            array.object_size(klass.component_size())
        } else if klass.is_string_class() {
            // SAFETY: the class says this object is a string.
            let string = unsafe { object.as_object::<CoreString>() };
            string.object_size()
        } else if klass.is_class_class() {
            // SAFETY: the class says this object is a class object.
            let class_object = unsafe { object.as_object::<ClassObject>() };
            class_object.object_size()
        } else {
            klass.object_size()
        }
    }
}
