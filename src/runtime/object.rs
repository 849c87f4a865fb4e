//! Wrapper object layout for the managed runtime
//!
//! Design: Header-prefixed objects, C-compatible so a handle can cross the
//! host boundary as a bare pointer:
//! - 8-byte aligned header with an atomic refcount
//! - Host reference kept as an address, never owned

use std::sync::atomic::{AtomicU32, Ordering};

use crate::binding::{HostObject, TypeTag};

/// References a wrapper holds on creation; dropped only by `destroy`
pub const CREATION_REFERENCE: usize = 1;

/// Object header (16 bytes) - first field of every wrapper object
#[repr(C, align(8))]
pub struct ObjectHeader {
    pub refcount: AtomicU32,
    pub flags: u32,
    pub type_tag: usize,
}

impl ObjectHeader {
    #[inline]
    pub const fn new(type_tag: usize) -> Self {
        Self {
            refcount: AtomicU32::new(CREATION_REFERENCE as u32),
            flags: 0,
            type_tag,
        }
    }
}

/// Wrapper instance living in the managed heap
#[repr(C)]
pub struct WrapperObject {
    pub header: ObjectHeader,
    host_object: usize,
    type_name: Box<str>,
}

impl WrapperObject {
    pub fn new(host_object: HostObject, type_tag: TypeTag, type_name: &str) -> Self {
        Self {
            header: ObjectHeader::new(type_tag.get()),
            host_object: host_object.addr(),
            type_name: type_name.into(),
        }
    }

    pub fn host_object(&self) -> HostObject {
        HostObject::from_addr(self.host_object)
    }

    pub fn type_tag(&self) -> TypeTag {
        TypeTag::new(self.header.type_tag)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Increment reference count (hot path)
    #[inline(always)]
    pub fn inc(&self) {
        let old = self.header.refcount.fetch_add(1, Ordering::Relaxed);
        debug_assert!(old < u32::MAX, "refcount overflow");
    }

    /// Decrement reference count, returning the count left
    #[inline(always)]
    pub fn dec(&self) -> u32 {
        let old = self.header.refcount.fetch_sub(1, Ordering::Release);
        debug_assert!(old > 0, "refcount underflow");
        if old == 1 {
            // Synchronize with all previous decrements before the object is freed
            std::sync::atomic::fence(Ordering::Acquire);
        }
        old - 1
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.header.refcount.load(Ordering::Relaxed)
    }
}
