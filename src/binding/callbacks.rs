//! `extern "C"` trampolines installed in the binding table
//!
//! Each one recovers the registration from the opaque context pointer and
//! forwards.
//! A null context is treated like a call outside the registration window.
//! A fatal bridge error aborts the process instead of unwinding into the host.

use core::ffi::c_void;
use core::ptr;
use std::panic::{self, AssertUnwindSafe};
use std::process;

use super::{HostObject, TypeTag};
use crate::bridge::Registration;
use crate::logging::warn;
use crate::runtime::EmbeddedRuntime;

#[inline]
unsafe fn registration<'a, R: EmbeddedRuntime>(
    data: *mut c_void,
    callback: &'static str,
) -> Option<&'a Registration<R>> {
    let registration = (data as *const Registration<R>).as_ref();
    if registration.is_none() {
        warn!(target: "bridge", callback, "callback invoked with null context");
    }
    registration
}

#[inline]
fn abort_on_panic<T>(f: impl FnOnce() -> T) -> T {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| process::abort())
}

/// Allocate a wrapper for `host_object`; null when none is available
pub unsafe extern "C" fn wrapper_create<R: EmbeddedRuntime>(
    data: *mut c_void,
    type_tag: *const c_void,
    host_object: *mut c_void,
) -> *mut c_void {
    abort_on_panic(|| match registration::<R>(data, "create") {
        Some(registration) => registration
            .on_create(TypeTag::from_ptr(type_tag), HostObject::from_ptr(host_object))
            .map_or(ptr::null_mut(), |handle| handle.as_ptr()),
        None => ptr::null_mut(),
    })
}

/// Release the wrapper of a destroyed host object
pub unsafe extern "C" fn wrapper_destroy<R: EmbeddedRuntime>(data: *mut c_void, wrapper: *mut c_void) {
    abort_on_panic(|| {
        if let Some(registration) = registration::<R>(data, "destroy") {
            registration.on_destroy(wrapper);
        }
    })
}

pub unsafe extern "C" fn wrapper_incref<R: EmbeddedRuntime>(data: *mut c_void, wrapper: *mut c_void) {
    abort_on_panic(|| {
        if let Some(registration) = registration::<R>(data, "incref") {
            registration.on_incref(wrapper);
        }
    })
}

/// Returns whether the wrapper is still alive after the release
pub unsafe extern "C" fn wrapper_decref<R: EmbeddedRuntime>(data: *mut c_void, wrapper: *mut c_void) -> bool {
    abort_on_panic(|| match registration::<R>(data, "decref") {
        Some(registration) => registration.on_decref(wrapper),
        None => false,
    })
}
