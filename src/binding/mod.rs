//! Binding table - the wire contract between host engine and bridge
//!
//! Design: Four `extern "C"` entry points plus an opaque context pointer,
//! laid out `#[repr(C)]` so a C host can store and invoke them directly:
//! 1. `create(data, type_tag, host_object) -> wrapper`
//! 2. `destroy(data, wrapper)`
//! 3. `incref(data, wrapper)`
//! 4. `decref(data, wrapper) -> bool`
//!
//! The table is immutable once built and only valid between registration
//! and unregistration of its [`LanguageIndex`].

mod callbacks;


pub use callbacks::{wrapper_create, wrapper_decref, wrapper_destroy, wrapper_incref};

use core::ffi::c_void;
use core::fmt;
use core::ptr::NonNull;
use std::sync::Arc;

use crate::bridge::Registration;
use crate::runtime::EmbeddedRuntime;

/// Opaque host object pointer. Owned by the host; never freed here.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostObject(*mut c_void);

impl HostObject {
    #[inline]
    pub const fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    #[inline]
    pub fn from_addr(addr: usize) -> Self {
        Self(addr as *mut c_void)
    }

    #[inline]
    pub const fn null() -> Self {
        Self(core::ptr::null_mut())
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    #[inline]
    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({:p})", self.0)
    }
}

// Safety: the bridge treats host objects as addresses and never dereferences them
unsafe impl Send for HostObject {}
unsafe impl Sync for HostObject {}

/// Opaque identifier of the wrapper type to instantiate
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(usize);

impl TypeTag {
    #[inline]
    pub const fn new(tag: usize) -> Self {
        Self(tag)
    }

    /// Tags travel as pointers on the wire
    #[inline]
    pub fn from_ptr(ptr: *const c_void) -> Self {
        Self(ptr as usize)
    }

    #[inline]
    pub fn as_ptr(self) -> *const c_void {
        self.0 as *const c_void
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }
}

/// Non-null handle to an embedded-runtime wrapper object
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WrapperHandle(NonNull<c_void>);

impl WrapperHandle {
    /// `None` for the null "no wrapper" handle
    #[inline]
    pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[inline]
    pub fn from_addr(addr: usize) -> Option<Self> {
        Self::from_ptr(addr as *mut c_void)
    }

    #[inline]
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for WrapperHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WrapperHandle({:p})", self.0)
    }
}

// Safety: handles are only dereferenced by the runtime under its execution lock
unsafe impl Send for WrapperHandle {}
unsafe impl Sync for WrapperHandle {}

/// Handle returned by the host when a binding table is registered
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LanguageIndex(i32);

impl LanguageIndex {
    #[inline]
    pub const fn new(index: i32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for LanguageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type CreateFn =
    unsafe extern "C" fn(data: *mut c_void, type_tag: *const c_void, host_object: *mut c_void) -> *mut c_void;
pub type DestroyFn = unsafe extern "C" fn(data: *mut c_void, wrapper: *mut c_void);
pub type IncrefFn = unsafe extern "C" fn(data: *mut c_void, wrapper: *mut c_void);
pub type DecrefFn = unsafe extern "C" fn(data: *mut c_void, wrapper: *mut c_void) -> bool;

/// The four callbacks a host invokes to manage wrapper lifetime
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BindingTable {
    /// Opaque context passed back as the first argument of every callback
    pub data: *mut c_void,
    pub create: CreateFn,
    pub destroy: DestroyFn,
    pub incref: IncrefFn,
    pub decref: DecrefFn,
}

impl BindingTable {
    /// Table whose callbacks dispatch through `registration`.
    ///
    /// The table borrows the registration through a raw pointer: the caller
    /// keeps the `Arc` alive for as long as the table may be invoked.
    pub fn for_registration<R: EmbeddedRuntime>(registration: &Arc<Registration<R>>) -> Self {
        Self {
            data: Arc::as_ptr(registration) as *mut c_void,
            create: wrapper_create::<R>,
            destroy: wrapper_destroy::<R>,
            incref: wrapper_incref::<R>,
            decref: wrapper_decref::<R>,
        }
    }

    /// Invoke `create` the way a host does
    ///
    /// # Safety
    /// `data` must still point at a live context.
    pub unsafe fn call_create(&self, type_tag: TypeTag, host_object: HostObject) -> *mut c_void {
        (self.create)(self.data, type_tag.as_ptr(), host_object.as_ptr())
    }

    /// # Safety
    /// Same as [`BindingTable::call_create`].
    pub unsafe fn call_destroy(&self, wrapper: *mut c_void) {
        (self.destroy)(self.data, wrapper)
    }

    /// # Safety
    /// Same as [`BindingTable::call_create`].
    pub unsafe fn call_incref(&self, wrapper: *mut c_void) {
        (self.incref)(self.data, wrapper)
    }

    /// # Safety
    /// Same as [`BindingTable::call_create`].
    pub unsafe fn call_decref(&self, wrapper: *mut c_void) -> bool {
        (self.decref)(self.data, wrapper)
    }
}

impl fmt::Debug for BindingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingTable").field("data", &self.data).finish_non_exhaustive()
    }
}

// Safety: the table is immutable; `data` points at a Sync registration
unsafe impl Send for BindingTable {}
unsafe impl Sync for BindingTable {}
