//! Managed strings.
//!
//! A string stores its characters in one of two encodings, chosen when it is created: one byte
//! per character when every UTF-16 code unit is compressible (non-zero ASCII) and compressed
//! strings are enabled, two bytes per character otherwise. The length word packs the number of
//! characters with the encoding bit. Strings never change after creation; every operation that
//! looks like a mutation creates a new string.
//!
//! Strings are created through a [`StringContext`], which knows the string class, the heap, the
//! thread that allocates and whether compressed strings are enabled.

use itertools::Either;
use memoffset::offset_of;
use std::fmt;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::Arc;

use crate::mem::handle_scope::HandleScope;
use crate::mem::heap_manager::{HeapManager, ObjectInit};
use crate::mem::internal_allocator::InternalAllocator;
use crate::mem::object_header::ObjectHeader;
use crate::runtime::class::ClassRoot;
use crate::runtime::class_linker::extension::ClassLinkerExtension;
use crate::runtime::coretypes::array::Array;
use crate::runtime::coretypes::string_helpers::{self, is_compressible_unit};
use crate::runtime::thread::ManagedThread;
use crate::runtime::utf;
use crate::util::constants::{BYTES_IN_UTF16_CHAR, DEFAULT_OBJECT_ALIGNMENT};
use crate::util::conversions::align_object_size;
use crate::util::{Address, ObjectReference};

const STRING_UTF16_BIT: u32 = 1;

/// The longest string the length word can describe.
pub const MAX_STRING_LENGTH: usize = (u32::MAX >> 1) as usize;

/// The characters of a string in their stored encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StringData<'a> {
    Mutf8(&'a [u8]),
    Utf16(&'a [u16]),
}

impl<'a> StringData<'a> {
    pub fn len(&self) -> usize {
        match self {
            StringData::Mutf8(data) => data.len(),
            StringData::Utf16(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn units(&self) -> impl Iterator<Item = u16> + 'a {
        match *self {
            StringData::Mutf8(data) => Either::Left(data.iter().map(|&b| b as u16)),
            StringData::Utf16(data) => Either::Right(data.iter().copied()),
        }
    }

    pub fn slice(&self, start: usize, len: usize) -> StringData<'a> {
        match *self {
            StringData::Mutf8(data) => StringData::Mutf8(&data[start..start + len]),
            StringData::Utf16(data) => StringData::Utf16(&data[start..start + len]),
        }
    }

    pub fn contains(&self, unit: u16) -> bool {
        match self {
            StringData::Mutf8(data) => u8::try_from(unit).is_ok_and(|b| data.contains(&b)),
            StringData::Utf16(data) => data.contains(&unit),
        }
    }

    /// Is every unit compressible or equal to `exempt`?
    pub fn is_compressible_except(&self, exempt: u16) -> bool {
        match self {
            StringData::Mutf8(_) => true,
            StringData::Utf16(data) => string_helpers::is_compressible_utf16_except(data, exempt),
        }
    }

    /// Copy into a compressed payload. Every unit must be compressible.
    fn copy_to_compressed(&self, out: &mut [u8]) {
        match self {
            StringData::Mutf8(data) => out.copy_from_slice(data),
            StringData::Utf16(data) => {
                for (slot, &unit) in out.iter_mut().zip(data.iter()) {
                    debug_assert!(is_compressible_unit(unit));
                    *slot = unit as u8;
                }
            }
        }
    }

    fn copy_to_utf16(&self, out: &mut [u16]) {
        match self {
            StringData::Mutf8(data) => {
                for (slot, &b) in out.iter_mut().zip(data.iter()) {
                    *slot = b as u16;
                }
            }
            StringData::Utf16(data) => out.copy_from_slice(data),
        }
    }
}

/// The layout of a string object. The payload follows the fixed part.
#[repr(C)]
pub struct CoreString {
    header: ObjectHeader,
    length: u32,
    hashcode: AtomicU32,
    data: [u16; 0],
}

impl CoreString {
    pub fn data_offset() -> usize {
        offset_of!(CoreString, data)
    }

    pub fn compute_object_size(length: usize, compressed: bool) -> usize {
        let unit_size = if compressed { 1 } else { BYTES_IN_UTF16_CHAR };
        align_object_size(Self::data_offset() + length * unit_size)
    }

    pub fn object_size(&self) -> usize {
        Self::compute_object_size(self.get_length(), self.is_mutf8())
    }

    /// View `object` as a string. Returns `None` if it is not an instance of a string class.
    pub fn from_object<'a>(object: ObjectReference) -> Option<&'a CoreString> {
        let klass = ObjectHeader::from_object(object).class()?;
        if !klass.is_string_class() {
            return None;
        }
        // SAFETY: the class says this object is a string.
        Some(unsafe { Self::from_object_unchecked(object) })
    }

    /// # Safety
    ///
    /// `object` must be a string that stays alive for `'a`.
    pub(crate) unsafe fn from_object_unchecked<'a>(object: ObjectReference) -> &'a CoreString {
        object.as_object::<CoreString>()
    }

    pub fn as_object(&self) -> ObjectReference {
        ObjectReference::from_ref(self)
    }

    /// Number of characters.
    pub fn get_length(&self) -> usize {
        (self.length >> 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.get_length() == 0
    }

    pub fn is_utf16(&self) -> bool {
        self.length & STRING_UTF16_BIT != 0
    }

    pub fn is_mutf8(&self) -> bool {
        !self.is_utf16()
    }

    fn data_address(&self) -> Address {
        Address::from_ref(self) + Self::data_offset()
    }

    pub fn data(&self) -> StringData<'_> {
        if self.is_utf16() {
            StringData::Utf16(self.get_data_utf16())
        } else {
            StringData::Mutf8(self.get_data_mutf8())
        }
    }

    /// The payload of a compressed string.
    pub fn get_data_mutf8(&self) -> &[u8] {
        debug_assert!(self.is_mutf8());
        // SAFETY: a compressed string holds `length` bytes.
        unsafe { std::slice::from_raw_parts(self.data_address().to_ptr::<u8>(), self.get_length()) }
    }

    /// The payload of a wide string.
    pub fn get_data_utf16(&self) -> &[u16] {
        debug_assert!(self.is_utf16());
        // SAFETY: a wide string holds `length` code units.
        unsafe { std::slice::from_raw_parts(self.data_address().to_ptr::<u16>(), self.get_length()) }
    }

    /// The code unit at `index`.
    pub fn at(&self, index: usize) -> Option<u16> {
        match self.data() {
            StringData::Mutf8(data) => data.get(index).map(|&b| b as u16),
            StringData::Utf16(data) => data.get(index).copied(),
        }
    }

    pub fn to_utf16(&self) -> Vec<u16> {
        self.data().units().collect()
    }

    pub fn get_utf16_length(&self) -> usize {
        self.get_length()
    }

    /// Size of the MUTF-8 encoding, without a terminator.
    pub fn get_mutf8_length(&self) -> usize {
        match self.data() {
            StringData::Mutf8(data) => data.len(),
            StringData::Utf16(data) => utf::utf16_to_mutf8_size(data),
        }
    }

    /// Encode the string as MUTF-8 into `out`. Returns the number of bytes written.
    pub fn copy_data_mutf8(&self, out: &mut [u8]) -> usize {
        self.copy_data_region_mutf8(out, 0, self.get_length())
    }

    /// Encode `len` characters starting at `start` as MUTF-8 into `out`.
    /// Writes nothing and returns 0 if the region is out of bounds.
    pub fn copy_data_region_mutf8(&self, out: &mut [u8], start: usize, len: usize) -> usize {
        if self.region_end(start, len).is_none() {
            return 0;
        }
        match self.data() {
            StringData::Mutf8(data) => {
                let len = len.min(out.len());
                out[..len].copy_from_slice(&data[start..start + len]);
                len
            }
            StringData::Utf16(data) => utf::convert_region_utf16_to_mutf8(data, out, start, len),
        }
    }

    /// Copy the code units into `out`. Returns the number of units written.
    pub fn copy_data_utf16(&self, out: &mut [u16]) -> usize {
        self.copy_data_region_utf16(out, 0, self.get_length())
    }

    /// Copy `len` code units starting at `start` into `out`. Writes nothing and returns 0 if the
    /// region is out of bounds.
    pub fn copy_data_region_utf16(&self, out: &mut [u16], start: usize, len: usize) -> usize {
        if self.region_end(start, len).is_none() {
            return 0;
        }
        let len = len.min(out.len());
        self.data().slice(start, len).copy_to_utf16(&mut out[..len]);
        len
    }

    fn region_end(&self, start: usize, len: usize) -> Option<usize> {
        let end = start.checked_add(len)?;
        if end > self.get_length() {
            warn!("Region {}..{} is out of bounds of a string of {}", start, end, self.get_length());
            return None;
        }
        Some(end)
    }

    /// Lexicographic comparison by code unit, then by length.
    pub fn compare(&self, other: &CoreString) -> i32 {
        if std::ptr::eq(self, other) {
            return 0;
        }
        match (self.data(), other.data()) {
            (StringData::Mutf8(a), StringData::Mutf8(b)) => string_helpers::compare_same(a, b),
            (StringData::Utf16(a), StringData::Utf16(b)) => string_helpers::compare_same(a, b),
            (StringData::Mutf8(a), StringData::Utf16(b)) => string_helpers::compare_mixed(a, b),
            (StringData::Utf16(a), StringData::Mutf8(b)) => string_helpers::compare_mixed(a, b),
        }
    }

    /// First position at or after `pos` where `pattern` occurs, or -1. A negative `pos` counts as
    /// 0; an empty pattern matches at `pos` clamped to the length.
    pub fn index_of(&self, pattern: &CoreString, pos: i32) -> i32 {
        let from = pos.max(0) as usize;
        if pattern.is_empty() {
            return from.min(self.get_length()) as i32;
        }
        let found = match (self.data(), pattern.data()) {
            (StringData::Mutf8(t), StringData::Mutf8(p)) => string_helpers::index_of(t, p, from),
            (StringData::Mutf8(t), StringData::Utf16(p)) => string_helpers::index_of(t, p, from),
            (StringData::Utf16(t), StringData::Mutf8(p)) => string_helpers::index_of(t, p, from),
            (StringData::Utf16(t), StringData::Utf16(p)) => string_helpers::index_of(t, p, from),
        };
        found.map_or(-1, |i| i as i32)
    }

    /// Last position at or before `pos` where `pattern` occurs, or -1. `pos` is clamped to the
    /// valid range.
    pub fn last_index_of(&self, pattern: &CoreString, pos: i32) -> i32 {
        let from = pos.max(0) as usize;
        if pattern.is_empty() {
            return from.min(self.get_length()) as i32;
        }
        let found = match (self.data(), pattern.data()) {
            (StringData::Mutf8(t), StringData::Mutf8(p)) => string_helpers::last_index_of(t, p, from),
            (StringData::Mutf8(t), StringData::Utf16(p)) => string_helpers::last_index_of(t, p, from),
            (StringData::Utf16(t), StringData::Mutf8(p)) => string_helpers::last_index_of(t, p, from),
            (StringData::Utf16(t), StringData::Utf16(p)) => string_helpers::last_index_of(t, p, from),
        };
        found.map_or(-1, |i| i as i32)
    }

    pub fn strings_are_equal(&self, other: &CoreString) -> bool {
        std::ptr::eq(self, other) || (self.get_length() == other.get_length() && self.compare(other) == 0)
    }

    pub fn strings_are_equal_mutf8(&self, mutf8: &[u8]) -> bool {
        match self.data() {
            StringData::Mutf8(data) => data == mutf8,
            StringData::Utf16(data) => utf::Mutf8Decoder::new(mutf8).eq(data.iter().copied()),
        }
    }

    pub fn strings_are_equal_utf16(&self, utf16: &[u16]) -> bool {
        self.get_length() == utf16.len() && self.data().units().eq(utf16.iter().copied())
    }

    pub fn compute_hashcode_mutf8(mutf8: &[u8]) -> u32 {
        string_helpers::compute_hash(utf::Mutf8Decoder::new(mutf8))
    }

    pub fn compute_hashcode_utf16(utf16: &[u16]) -> u32 {
        string_helpers::compute_hash(utf16.iter().copied())
    }

    /// The hash of the characters, computed on first use. Zero means not computed yet, so a
    /// string whose hash is zero computes it every time.
    pub fn get_hashcode(&self) -> u32 {
        let hash = self.hashcode.load(Ordering::Relaxed);
        if hash != 0 {
            return hash;
        }
        let hash = string_helpers::compute_hash(self.data().units());
        self.hashcode.store(hash, Ordering::Relaxed);
        hash
    }
}

impl fmt::Debug for CoreString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}{}",
            String::from_utf16_lossy(&self.to_utf16()),
            if self.is_utf16() { "u16" } else { "" }
        )
    }
}

/// Everything string creation needs. Strings are allocated on behalf of `thread`; whether they
/// may be compressed is fixed when the context is created.
pub struct StringContext<'a> {
    ext: &'a dyn ClassLinkerExtension,
    heap: &'a HeapManager,
    allocator: &'a Arc<InternalAllocator>,
    thread: &'a ManagedThread,
    compressed_strings_enabled: bool,
}

impl<'a> StringContext<'a> {
    pub fn new(
        ext: &'a dyn ClassLinkerExtension,
        heap: &'a HeapManager,
        allocator: &'a Arc<InternalAllocator>,
        thread: &'a ManagedThread,
        compressed_strings_enabled: bool,
    ) -> Self {
        StringContext {
            ext,
            heap,
            allocator,
            thread,
            compressed_strings_enabled,
        }
    }

    pub fn is_compressed_strings_enabled(&self) -> bool {
        self.compressed_strings_enabled
    }

    pub fn thread(&self) -> &'a ManagedThread {
        self.thread
    }

    pub fn can_be_compressed_mutf8(&self, mutf8: &[u8]) -> bool {
        self.compressed_strings_enabled && utf::is_mutf8_only_single_bytes(mutf8)
    }

    pub fn can_be_compressed_utf16(&self, utf16: &[u16]) -> bool {
        self.compressed_strings_enabled && string_helpers::is_compressible_utf16(utf16)
    }

    /// Like [`can_be_compressed_utf16`](Self::can_be_compressed_utf16), but `exempt` does not
    /// prevent compression.
    pub fn can_be_compressed_utf16_except(&self, utf16: &[u16], exempt: u16) -> bool {
        self.compressed_strings_enabled && string_helpers::is_compressible_utf16_except(utf16, exempt)
    }

    /// Allocate a string with the length word set. The payload is left for the caller.
    fn alloc_string_object(&self, length: usize, compressed: bool, movable: bool) -> Option<ObjectReference> {
        if length > MAX_STRING_LENGTH {
            warn!("Cannot create a string of {} characters", length);
            return None;
        }
        let Some(klass) = self.ext.get_class_root(ClassRoot::String) else {
            error!("Strings are created before the string class exists");
            return None;
        };
        let size = CoreString::compute_object_size(length, compressed);
        let init = ObjectInit::CallerInitialized;
        let object = if movable {
            self.heap
                .allocate_object(&klass, size, DEFAULT_OBJECT_ALIGNMENT, self.thread, init)
        } else {
            self.heap
                .allocate_non_movable_object(&klass, size, DEFAULT_OBJECT_ALIGNMENT, self.thread, init)
        }?;
        let length_word = ((length as u32) << 1) | if compressed { 0 } else { STRING_UTF16_BIT };
        // SAFETY: the object was just allocated with the size of a string of this length.
        unsafe {
            (object.to_raw_address() + offset_of!(CoreString, length)).store::<u32>(length_word);
        }
        Some(object)
    }

    /// The payload of a string that is being created.
    ///
    /// # Safety
    ///
    /// `object` must come from [`alloc_string_object`](Self::alloc_string_object) and must not be
    /// published yet.
    unsafe fn payload<'o, T>(object: ObjectReference) -> &'o mut [T] {
        let string = CoreString::from_object_unchecked(object);
        std::slice::from_raw_parts_mut(
            (object.to_raw_address() + CoreString::data_offset()).to_mut_ptr::<T>(),
            string.get_length(),
        )
    }

    /// Reset the hash and make the whole string visible to every thread that can see the
    /// reference.
    fn finish(&self, object: ObjectReference) -> ObjectReference {
        // SAFETY: the object is a string under construction.
        let string = unsafe { CoreString::from_object_unchecked(object) };
        string.hashcode.store(0, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        object
    }

    pub fn create_from_mutf8(&self, mutf8: &[u8], movable: bool) -> Option<ObjectReference> {
        let length = utf::mutf8_to_utf16_size(mutf8);
        let compressed = self.can_be_compressed_mutf8(mutf8);
        let object = self.alloc_string_object(length, compressed, movable)?;
        // SAFETY: the string is under construction.
        unsafe {
            if compressed {
                Self::payload::<u8>(object).copy_from_slice(mutf8);
            } else {
                utf::convert_mutf8_to_utf16(mutf8, Self::payload::<u16>(object));
            }
        }
        Some(self.finish(object))
    }

    /// Create a string from UTF-8. The UTF-16 units are staged in an internal scratch buffer.
    pub fn create_from_utf8(&self, utf8: &[u8], movable: bool) -> Option<ObjectReference> {
        let text = String::from_utf8_lossy(utf8);
        let length = text.encode_utf16().count();
        let mut buffer = self.allocator.alloc_array::<u16>(length)?;
        for (slot, unit) in buffer.iter_mut().zip(text.encode_utf16()) {
            *slot = unit;
        }
        self.create_from_utf16(&buffer, movable)
    }

    pub fn create_from_utf16(&self, utf16: &[u16], movable: bool) -> Option<ObjectReference> {
        let compressed = self.can_be_compressed_utf16(utf16);
        let object = self.alloc_string_object(utf16.len(), compressed, movable)?;
        // SAFETY: the string is under construction.
        unsafe {
            if compressed {
                StringData::Utf16(utf16).copy_to_compressed(Self::payload::<u8>(object));
            } else {
                Self::payload::<u16>(object).copy_from_slice(utf16);
            }
        }
        Some(self.finish(object))
    }

    pub fn create_empty_string(&self, movable: bool) -> Option<ObjectReference> {
        self.create_from_utf16(&[], movable)
    }

    /// Write `data` into the payload of `object`, in the encoding `object` was allocated with.
    fn write_payload(object: ObjectReference, compressed: bool, data: StringData<'_>) {
        // SAFETY: the string is under construction and has room for `data`.
        unsafe {
            if compressed {
                data.copy_to_compressed(Self::payload::<u8>(object));
            } else {
                data.copy_to_utf16(Self::payload::<u16>(object));
            }
        }
    }

    /// A copy of the string `src`, in the same encoding.
    pub fn create_from_string(&self, src: ObjectReference) -> Option<ObjectReference> {
        let source = CoreString::from_object(src)?;
        let (length, compressed) = (source.get_length(), source.is_mutf8());
        let scope = HandleScope::new(self.thread);
        let src_handle = scope.handle(src);
        let object = self.alloc_string_object(length, compressed, true)?;
        // SAFETY: the handle keeps the string alive and tracks its location.
        let source = unsafe { CoreString::from_object_unchecked(src_handle.get()) };
        Self::write_payload(object, compressed, source.data());
        Some(self.finish(object))
    }

    /// A string of `length` characters of the `u16` array `char_array`, starting at `offset`.
    /// Returns `None` if the region is out of bounds.
    pub fn create_new_string_from_chars(
        &self,
        offset: usize,
        length: usize,
        char_array: ObjectReference,
    ) -> Option<ObjectReference> {
        let array = Array::from_object(char_array)?;
        let end = offset.checked_add(length)?;
        if end > array.length() {
            warn!("Region {}..{} is out of bounds of a char array of {}", offset, end, array.length());
            return None;
        }
        let compressed = self.can_be_compressed_utf16(&array.data::<u16>()[offset..end]);
        let scope = HandleScope::new(self.thread);
        let array_handle = scope.handle(char_array);
        let object = self.alloc_string_object(length, compressed, true)?;
        // SAFETY: the handle keeps the array alive and tracks its location.
        let array = unsafe { Array::from_object_unchecked(array_handle.get()) };
        Self::write_payload(object, compressed, StringData::Utf16(&array.data::<u16>()[offset..end]));
        Some(self.finish(object))
    }

    /// A string of `length` characters of the byte array `byte_array`, starting at `offset`. The
    /// high byte of every character is `high_byte`.
    pub fn create_new_string_from_bytes(
        &self,
        offset: usize,
        length: usize,
        high_byte: u32,
        byte_array: ObjectReference,
    ) -> Option<ObjectReference> {
        let array = Array::from_object(byte_array)?;
        let end = offset.checked_add(length)?;
        if end > array.length() {
            warn!("Region {}..{} is out of bounds of a byte array of {}", offset, end, array.length());
            return None;
        }
        let high = ((high_byte & 0xff) as u16) << 8;
        let compressed = high == 0 && self.can_be_compressed_mutf8(&array.data::<u8>()[offset..end]);
        let scope = HandleScope::new(self.thread);
        let array_handle = scope.handle(byte_array);
        let object = self.alloc_string_object(length, compressed, true)?;
        // SAFETY: the handle keeps the array alive and tracks its location.
        let bytes = &unsafe { Array::from_object_unchecked(array_handle.get()) }.data::<u8>()[offset..end];
        // SAFETY: the string is under construction.
        unsafe {
            if compressed {
                Self::payload::<u8>(object).copy_from_slice(bytes);
            } else {
                for (slot, &b) in Self::payload::<u16>(object).iter_mut().zip(bytes) {
                    *slot = high | b as u16;
                }
            }
        }
        Some(self.finish(object))
    }

    /// `first` followed by `second`. The result is compressed if both strings are.
    pub fn concat(&self, first: ObjectReference, second: ObjectReference) -> Option<ObjectReference> {
        let (a, b) = (CoreString::from_object(first)?, CoreString::from_object(second)?);
        let (len_a, len_b) = (a.get_length(), b.get_length());
        let length = len_a.checked_add(len_b)?;
        let compressed = self.compressed_strings_enabled && a.is_mutf8() && b.is_mutf8();
        let scope = HandleScope::new(self.thread);
        let first_handle = scope.handle(first);
        let second_handle = scope.handle(second);
        let object = self.alloc_string_object(length, compressed, true)?;
        // SAFETY: the handles keep both strings alive and track their locations.
        let (a, b) = unsafe {
            (
                CoreString::from_object_unchecked(first_handle.get()),
                CoreString::from_object_unchecked(second_handle.get()),
            )
        };
        // SAFETY: the string is under construction.
        unsafe {
            if compressed {
                let payload = Self::payload::<u8>(object);
                a.data().copy_to_compressed(&mut payload[..len_a]);
                b.data().copy_to_compressed(&mut payload[len_a..]);
            } else {
                let payload = Self::payload::<u16>(object);
                a.data().copy_to_utf16(&mut payload[..len_a]);
                b.data().copy_to_utf16(&mut payload[len_a..]);
            }
        }
        Some(self.finish(object))
    }

    /// `src` with every `old_char` replaced by `new_char`. Returns `src` itself if the characters
    /// are the same.
    pub fn do_replace(&self, src: ObjectReference, old_char: u16, new_char: u16) -> Option<ObjectReference> {
        let source = CoreString::from_object(src)?;
        if old_char == new_char {
            return Some(src);
        }
        let data = source.data();
        let length = data.len();
        let compressed = self.compressed_strings_enabled
            && data.is_compressible_except(old_char)
            && (is_compressible_unit(new_char) || !data.contains(old_char));
        let scope = HandleScope::new(self.thread);
        let src_handle = scope.handle(src);
        let object = self.alloc_string_object(length, compressed, true)?;
        // SAFETY: the handle keeps the string alive and tracks its location.
        let source = unsafe { CoreString::from_object_unchecked(src_handle.get()) };
        let replaced = source
            .data()
            .units()
            .map(|unit| if unit == old_char { new_char } else { unit });
        // SAFETY: the string is under construction.
        unsafe {
            if compressed {
                for (slot, unit) in Self::payload::<u8>(object).iter_mut().zip(replaced) {
                    *slot = unit as u8;
                }
            } else {
                for (slot, unit) in Self::payload::<u16>(object).iter_mut().zip(replaced) {
                    *slot = unit;
                }
            }
        }
        Some(self.finish(object))
    }

    /// The `length` characters of `src` starting at `start`. Returns `None` if the region is out
    /// of bounds.
    pub fn fast_sub_string(&self, src: ObjectReference, start: usize, length: usize) -> Option<ObjectReference> {
        let source = CoreString::from_object(src)?;
        let end = start.checked_add(length)?;
        if end > source.get_length() {
            warn!("Substring {}..{} is out of bounds of a string of {}", start, end, source.get_length());
            return None;
        }
        if length == 0 {
            return self.create_empty_string(true);
        }
        let compressed = match source.data() {
            StringData::Mutf8(_) => true,
            StringData::Utf16(data) => self.can_be_compressed_utf16(&data[start..end]),
        };
        let scope = HandleScope::new(self.thread);
        let src_handle = scope.handle(src);
        let object = self.alloc_string_object(length, compressed, true)?;
        // SAFETY: the handle keeps the string alive and tracks its location.
        let source = unsafe { CoreString::from_object_unchecked(src_handle.get()) };
        Self::write_payload(object, compressed, source.data().slice(start, length));
        Some(self.finish(object))
    }

    /// A new `u16` array with the characters of `src`.
    pub fn to_char_array(&self, src: ObjectReference) -> Option<ObjectReference> {
        let length = CoreString::from_object(src)?.get_length();
        let array_class = self.ext.get_class_root(ClassRoot::ArrayU16)?;
        let scope = HandleScope::new(self.thread);
        let src_handle = scope.handle(src);
        let array = Array::create(self.heap, &array_class, length, self.thread)?;
        // SAFETY: the handle keeps the string alive and tracks its location; the array is not
        // published yet.
        unsafe {
            let source = CoreString::from_object_unchecked(src_handle.get());
            source
                .data()
                .copy_to_utf16(Array::from_object_unchecked(array).data_mut::<u16>());
        }
        fence(Ordering::SeqCst);
        Some(array)
    }
}
