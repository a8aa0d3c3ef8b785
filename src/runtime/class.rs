//! Runtime classes.
//!
//! A [`Class`] is runtime metadata owned by the class linker extension that created it. Every
//! class is backed by a managed [`ClassObject`](crate::runtime::coretypes::class::ClassObject)
//! in the heap, which is how managed code and the GC see it. Classes are shared between threads
//! through [`ClassPtr`]; all of their mutable state is atomic.

use atomic::Atomic;
use bitflags::bitflags;
use bytemuck::NoUninit;
use enum_map::Enum;
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use strum_macros::{Display, EnumIter};

use crate::runtime::class_helper::ClassHelper;
use crate::runtime::coretypes::class::ClassObject;
use crate::runtime::language::SourceLanguage;
use crate::runtime::panda_file::EntityId;
use crate::util::constants::{BYTES_IN_ADDRESS, BYTES_IN_FIELD_SLOT};
use crate::util::conversions::raw_align_up;
use crate::util::ObjectReference;

bitflags! {
    /// Access flags of classes, in the class file encoding.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

impl AccessFlags {
    /// Parse one flag name as written in class files.
    pub fn from_class_file_name(name: &str) -> Option<Self> {
        Some(match name {
            "public" => AccessFlags::PUBLIC,
            "private" => AccessFlags::PRIVATE,
            "protected" => AccessFlags::PROTECTED,
            "static" => AccessFlags::STATIC,
            "final" => AccessFlags::FINAL,
            "super" => AccessFlags::SUPER,
            "interface" => AccessFlags::INTERFACE,
            "abstract" => AccessFlags::ABSTRACT,
            "synthetic" => AccessFlags::SYNTHETIC,
            "annotation" => AccessFlags::ANNOTATION,
            "enum" => AccessFlags::ENUM,
            _ => return None,
        })
    }
}

bitflags! {
    /// Runtime properties of a class that are not access flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ClassFlags: u32 {
        const STRING_CLASS = 0b01;
        const CLASS_CLASS = 0b10;
    }
}

/// Lifecycle of a class. States only move forward.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, NoUninit, Display)]
pub enum ClassState {
    Initial,
    Loaded,
    Verified,
    Initializing,
    Erroneous,
    Initialized,
}

/// The type a class describes, for primitive and reference types.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, NoUninit, Display)]
pub enum TypeId {
    Invalid,
    Void,
    U1,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
    I64,
    U64,
    Reference,
    Tagged,
}

impl TypeId {
    pub fn is_primitive(self) -> bool {
        !matches!(self, TypeId::Invalid | TypeId::Reference)
    }

    /// Size of a value of this type in an array.
    pub fn component_size(self) -> usize {
        match self {
            TypeId::U1 | TypeId::I8 | TypeId::U8 => 1,
            TypeId::I16 | TypeId::U16 => 2,
            TypeId::I32 | TypeId::U32 | TypeId::F32 => 4,
            TypeId::I64 | TypeId::U64 | TypeId::F64 | TypeId::Tagged => 8,
            TypeId::Reference => BYTES_IN_ADDRESS,
            TypeId::Invalid | TypeId::Void => 0,
        }
    }
}

/// The foundational classes every language extension creates at boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Enum, EnumIter, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassRoot {
    U1,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Tagged,
    ArrayU1,
    ArrayI8,
    ArrayU8,
    ArrayI16,
    ArrayU16,
    ArrayI32,
    ArrayU32,
    ArrayI64,
    ArrayU64,
    ArrayF32,
    ArrayF64,
    ArrayTagged,
    Class,
    Object,
    String,
    ArrayClass,
    ArrayString,
}

impl ClassRoot {
    pub fn is_primitive(self) -> bool {
        (self as usize) <= (ClassRoot::Tagged as usize)
    }

    pub fn is_array(self) -> bool {
        matches!(self, ClassRoot::ArrayClass | ClassRoot::ArrayString)
            || ((ClassRoot::ArrayU1 as usize)..=(ClassRoot::ArrayTagged as usize)).contains(&(self as usize))
    }
}

/// Identifies a class linker context within its extension. The boot context is always 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub usize);

impl ContextId {
    pub const BOOT: ContextId = ContextId(0);

    pub fn is_boot(self) -> bool {
        self == Self::BOOT
    }
}

/// A shared pointer to a class. Classes stay alive until their extension frees them, which only
/// happens to classes no code can reach anymore.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassPtr(NonNull<Class>);

// Classes are only mutated through atomics.
unsafe impl Send for ClassPtr {}
unsafe impl Sync for ClassPtr {}

impl ClassPtr {
    pub(crate) fn from_box(klass: Box<Class>) -> Self {
        ClassPtr(NonNull::from(Box::leak(klass)))
    }

    /// # Safety
    ///
    /// The class must not be freed yet and must not be used after this call.
    pub(crate) unsafe fn into_box(self) -> Box<Class> {
        Box::from_raw(self.0.as_ptr())
    }

    pub fn from_ref(klass: &Class) -> Self {
        ClassPtr(NonNull::from(klass))
    }

    pub fn as_ptr(self) -> *mut Class {
        self.0.as_ptr()
    }

    pub(crate) fn from_raw(ptr: *mut Class) -> Option<Self> {
        NonNull::new(ptr).map(ClassPtr)
    }
}

impl Deref for ClassPtr {
    type Target = Class;

    fn deref(&self) -> &Class {
        // SAFETY: a class pointer is only handed out while the class is alive.
        unsafe { self.0.as_ref() }
    }
}

impl fmt::Debug for ClassPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", self.name(), self.0.as_ptr())
    }
}

/// Where the class came from: the class file and the entity id of its record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassSource {
    pub filename: String,
    pub class_id: EntityId,
}

pub struct Class {
    descriptor: Box<[u8]>,
    lang: SourceLanguage,
    vtable_size: usize,
    imt_size: usize,
    class_size: usize,
    object_size: AtomicUsize,
    access_flags: AtomicU32,
    flags: AtomicU32,
    type_id: Atomic<TypeId>,
    state: Atomic<ClassState>,
    base: AtomicPtr<Class>,
    component_type: AtomicPtr<Class>,
    load_context: AtomicUsize,
    /// Address of the managed class object, or zero before it is allocated.
    managed_object: AtomicUsize,
    init_thread_id: AtomicU32,
    source: Mutex<Option<ClassSource>>,
}

impl Class {
    pub fn new(descriptor: &[u8], lang: SourceLanguage, vtable_size: usize, imt_size: usize, class_size: usize) -> Self {
        Class {
            descriptor: descriptor.into(),
            lang,
            vtable_size,
            imt_size,
            class_size,
            object_size: AtomicUsize::new(0),
            access_flags: AtomicU32::new(0),
            flags: AtomicU32::new(0),
            type_id: Atomic::new(TypeId::Reference),
            state: Atomic::new(ClassState::Initial),
            base: AtomicPtr::new(std::ptr::null_mut()),
            component_type: AtomicPtr::new(std::ptr::null_mut()),
            load_context: AtomicUsize::new(ContextId::BOOT.0),
            managed_object: AtomicUsize::new(0),
            init_thread_id: AtomicU32::new(0),
            source: Mutex::new(None),
        }
    }

    /// Size of the managed class object of a class with the given tables and static fields.
    pub fn compute_class_size(vtable_size: usize, imt_size: usize, static_fields_size: usize) -> usize {
        let tables = (vtable_size + imt_size) * BYTES_IN_ADDRESS;
        raw_align_up(
            std::mem::size_of::<ClassObject>() + tables + static_fields_size,
            BYTES_IN_FIELD_SLOT,
        )
    }

    pub fn descriptor(&self) -> &[u8] {
        &self.descriptor
    }

    /// The readable name, such as `panda.Object` or `i32[]`.
    pub fn name(&self) -> String {
        ClassHelper::get_name(&self.descriptor)
    }

    pub fn source_lang(&self) -> SourceLanguage {
        self.lang
    }

    pub fn vtable_size(&self) -> usize {
        self.vtable_size
    }

    pub fn imt_size(&self) -> usize {
        self.imt_size
    }

    /// Size of the managed class object.
    pub fn class_size(&self) -> usize {
        self.class_size
    }

    /// Size of an instance. Zero for classes whose instances have a variable size.
    pub fn object_size(&self) -> usize {
        self.object_size.load(Ordering::Relaxed)
    }

    pub fn set_object_size(&self, size: usize) {
        self.object_size.store(size, Ordering::Relaxed);
    }

    pub fn access_flags(&self) -> AccessFlags {
        AccessFlags::from_bits_retain(self.access_flags.load(Ordering::Relaxed))
    }

    pub fn set_access_flags(&self, flags: AccessFlags) {
        self.access_flags.store(flags.bits(), Ordering::Relaxed);
    }

    pub fn is_public(&self) -> bool {
        self.access_flags().contains(AccessFlags::PUBLIC)
    }

    pub fn is_final(&self) -> bool {
        self.access_flags().contains(AccessFlags::FINAL)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags().contains(AccessFlags::ABSTRACT)
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags().contains(AccessFlags::INTERFACE)
    }

    fn class_flags(&self) -> ClassFlags {
        ClassFlags::from_bits_retain(self.flags.load(Ordering::Relaxed))
    }

    pub fn is_string_class(&self) -> bool {
        self.class_flags().contains(ClassFlags::STRING_CLASS)
    }

    pub fn set_string_class(&self) {
        self.flags
            .fetch_or(ClassFlags::STRING_CLASS.bits(), Ordering::Relaxed);
    }

    pub fn is_class_class(&self) -> bool {
        self.class_flags().contains(ClassFlags::CLASS_CLASS)
    }

    pub fn set_class_class(&self) {
        self.flags
            .fetch_or(ClassFlags::CLASS_CLASS.bits(), Ordering::Relaxed);
    }

    pub fn get_type(&self) -> TypeId {
        self.type_id.load(Ordering::Relaxed)
    }

    pub fn set_type(&self, type_id: TypeId) {
        self.type_id.store(type_id, Ordering::Relaxed);
    }

    pub fn is_primitive(&self) -> bool {
        self.get_type().is_primitive()
    }

    pub fn is_array_class(&self) -> bool {
        !self.component_type.load(Ordering::Acquire).is_null()
    }

    pub fn is_instantiable(&self) -> bool {
        (!self.is_primitive() && !self.is_abstract() && !self.is_interface()) || self.is_array_class()
    }

    pub fn get_base(&self) -> Option<ClassPtr> {
        ClassPtr::from_raw(self.base.load(Ordering::Acquire))
    }

    pub fn set_base(&self, base: Option<ClassPtr>) {
        self.base.store(
            base.map_or(std::ptr::null_mut(), ClassPtr::as_ptr),
            Ordering::Release,
        );
    }

    pub fn get_component_type(&self) -> Option<ClassPtr> {
        ClassPtr::from_raw(self.component_type.load(Ordering::Acquire))
    }

    pub fn set_component_type(&self, component: Option<ClassPtr>) {
        self.component_type.store(
            component.map_or(std::ptr::null_mut(), ClassPtr::as_ptr),
            Ordering::Release,
        );
    }

    /// Size of an element, for array classes.
    pub fn component_size(&self) -> usize {
        self.get_component_type()
            .map_or(0, |component| component.get_type().component_size())
    }

    /// Is this class `other` or one of its subclasses?
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        let mut current = Some(ClassPtr::from_ref(self));
        while let Some(klass) = current {
            if std::ptr::eq(&*klass, other) {
                return true;
            }
            current = klass.get_base();
        }
        false
    }

    pub fn get_state(&self) -> ClassState {
        self.state.load(Ordering::Acquire)
    }

    pub fn set_state(&self, state: ClassState) {
        let old = self.state.swap(state, Ordering::AcqRel);
        debug_assert!(
            old <= state,
            "class {} moved back from {} to {}",
            self.name(),
            old,
            state
        );
    }

    pub fn is_loaded(&self) -> bool {
        self.get_state() >= ClassState::Loaded
    }

    pub fn is_initializing(&self) -> bool {
        self.get_state() == ClassState::Initializing
    }

    pub fn is_initialized(&self) -> bool {
        self.get_state() == ClassState::Initialized
    }

    pub fn is_erroneous(&self) -> bool {
        self.get_state() == ClassState::Erroneous
    }

    pub fn get_load_context(&self) -> ContextId {
        ContextId(self.load_context.load(Ordering::Relaxed))
    }

    pub fn set_load_context(&self, context: ContextId) {
        self.load_context.store(context.0, Ordering::Relaxed);
    }

    pub fn managed_object(&self) -> Option<ObjectReference> {
        // SAFETY: only addresses of allocated class objects are stored.
        ObjectReference::from_raw_address(unsafe {
            crate::util::Address::from_usize(self.managed_object.load(Ordering::Acquire))
        })
    }

    pub fn set_managed_object(&self, object: ObjectReference) {
        self.managed_object
            .store(object.to_raw_address().as_usize(), Ordering::Release);
    }

    /// Id of the thread running the static initializer, while the class is initializing.
    pub fn init_thread_id(&self) -> u32 {
        self.init_thread_id.load(Ordering::Acquire)
    }

    pub fn set_init_thread_id(&self, id: u32) {
        self.init_thread_id.store(id, Ordering::Release);
    }

    pub fn source(&self) -> Option<ClassSource> {
        self.source.lock().unwrap().clone()
    }

    pub fn set_panda_file(&self, filename: &str, class_id: EntityId) {
        *self.source.lock().unwrap() = Some(ClassSource {
            filename: filename.to_string(),
            class_id,
        });
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name())
            .field("state", &self.get_state())
            .field("access_flags", &self.access_flags())
            .field("object_size", &self.object_size())
            .field("class_size", &self.class_size)
            .finish()
    }
}
