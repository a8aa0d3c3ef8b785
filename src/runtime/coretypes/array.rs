use bytemuck::Pod;
use memoffset::offset_of;

use crate::mem::heap_manager::{HeapManager, ObjectInit};
use crate::mem::object_header::ObjectHeader;
use crate::runtime::class::Class;
use crate::runtime::thread::ManagedThread;
use crate::util::constants::DEFAULT_OBJECT_ALIGNMENT;
use crate::util::conversions::align_object_size;
use crate::util::{Address, ObjectReference};

/// A managed array: the header, the length and `length` elements of the component type.
#[repr(C)]
pub struct Array {
    header: ObjectHeader,
    length: u32,
    _padding: u32,
    data: [u64; 0],
}

impl Array {
    /// Offset of the first element from the start of the object.
    pub fn data_offset() -> usize {
        offset_of!(Array, data)
    }

    pub fn compute_size(component_size: usize, length: usize) -> usize {
        align_object_size(Self::data_offset() + component_size * length)
    }

    pub fn object_size(&self, component_size: usize) -> usize {
        Self::compute_size(component_size, self.length())
    }

    /// Allocate a zeroed array of `array_class`. Returns `None` if the heap is exhausted, with an
    /// out of memory error pending on `thread`.
    pub fn create(
        heap: &HeapManager,
        array_class: &Class,
        length: usize,
        thread: &ManagedThread,
    ) -> Option<ObjectReference> {
        debug_assert!(array_class.is_array_class());
        let length_u32 = u32::try_from(length).ok()?;
        let size = Self::compute_size(array_class.component_size(), length);
        let object = heap.allocate_object(
            array_class,
            size,
            DEFAULT_OBJECT_ALIGNMENT,
            thread,
            ObjectInit::Zeroed,
        )?;
        // SAFETY: the object was just allocated as an array of this length.
        unsafe {
            (object.to_raw_address() + offset_of!(Array, length)).store::<u32>(length_u32);
        }
        Some(object)
    }

    pub fn from_object<'a>(object: ObjectReference) -> Option<&'a Array> {
        let klass = ObjectHeader::from_object(object).class()?;
        if !klass.is_array_class() {
            return None;
        }
        // SAFETY: the class says this object is an array.
        Some(unsafe { Self::from_object_unchecked(object) })
    }

    /// # Safety
    ///
    /// `object` must be an array that stays alive for `'a`.
    pub(crate) unsafe fn from_object_unchecked<'a>(object: ObjectReference) -> &'a Array {
        object.as_object::<Array>()
    }

    pub fn as_object(&self) -> ObjectReference {
        ObjectReference::from_ref(self)
    }

    pub fn length(&self) -> usize {
        self.length as usize
    }

    fn data_address(&self) -> Address {
        Address::from_ref(self) + Self::data_offset()
    }

    fn check_element<T>(&self) {
        debug_assert_eq!(
            ObjectHeader::from_object(self.as_object())
                .class()
                .map(|klass| klass.component_size()),
            Some(std::mem::size_of::<T>()),
            "element type does not match the component type"
        );
    }

    /// The elements, viewed as `T`. `T` must have the size of the component type.
    pub fn data<T: Pod>(&self) -> &[T] {
        self.check_element::<T>();
        // SAFETY: the payload holds `length` elements of the component size.
        unsafe { std::slice::from_raw_parts(self.data_address().to_ptr::<T>(), self.length()) }
    }

    /// # Safety
    ///
    /// No other reference to the elements may exist while the slice is alive. This holds while
    /// the array is not published yet.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data_mut<T: Pod>(&self) -> &mut [T] {
        self.check_element::<T>();
        std::slice::from_raw_parts_mut(self.data_address().to_mut_ptr::<T>(), self.length())
    }

    pub fn get<T: Pod>(&self, index: usize) -> T {
        self.data::<T>()[index]
    }

    pub fn set<T: Pod>(&self, index: usize, value: T) {
        self.check_element::<T>();
        assert!(index < self.length(), "index {} out of bounds for length {}", index, self.length());
        // SAFETY: the index is in bounds.
        unsafe { (self.data_address() + index * std::mem::size_of::<T>()).store(value) }
    }
}
