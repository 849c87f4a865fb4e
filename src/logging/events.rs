//! Event helpers with stable targets (`bridge`, `lifecycle`, `runtime`)

use tracing::{debug, info, trace, warn};

/// Log a binding callback entering the bridge
#[inline]
pub fn log_callback(callback: &'static str, handle: *const core::ffi::c_void) {
    trace!(target: "bridge", callback, handle = ?handle, "binding callback");
}

/// Log a callback that arrived outside the registration window
#[inline]
pub fn log_rejected_callback(callback: &'static str, handle: *const core::ffi::c_void) {
    warn!(
        target: "bridge",
        callback,
        handle = ?handle,
        "callback received while bridge is not registered, ignoring"
    );
}

/// Log a new wrapper
#[inline]
pub fn log_wrapper_created(host_object: usize, type_tag: usize, type_name: &str) {
    debug!(
        target: "bridge",
        host_object,
        type_tag,
        type_name,
        "wrapper created"
    );
}

/// Log a wrapper release on host object destruction
#[inline]
pub fn log_wrapper_destroyed(host_object: usize, outstanding: u64) {
    if outstanding > 0 {
        warn!(
            target: "bridge",
            host_object,
            outstanding,
            "host object destroyed with outstanding retains, releasing anyway"
        );
    } else {
        debug!(
            target: "bridge",
            host_object,
            "wrapper destroyed"
        );
    }
}

/// Log a lifecycle state change
#[inline]
pub fn log_transition(from: impl core::fmt::Display, to: impl core::fmt::Display) {
    info!(target: "lifecycle", %from, %to, "lifecycle transition");
}

/// Log the runtime banner after a successful start
#[inline]
pub fn log_runtime_banner(runtime: &str, version: &str) {
    info!(target: "runtime", "{} {}", runtime, version);
}
