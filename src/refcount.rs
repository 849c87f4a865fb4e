//! Refcount bridge - mirrors host retains onto embedded references
//!
//! Design: Each host `incref` adds one embedded reference and each `decref`
//! drops one, so at every point:
//!
//!   embedded count >= creation reference + host retains
//!
//! The creation reference belongs to the wrapper itself and is only dropped
//! by `destroy`. Host retains can never go negative; a decref below zero is
//! a host bug and aborts the process rather than corrupting the runtime heap.

use std::sync::Arc;

use crate::binding::WrapperHandle;
use crate::error::fatal;
use crate::logging::{trace, warn};
use crate::metrics::BridgeCounters;
use crate::runtime::{EmbeddedRuntime, CREATION_REFERENCE};
use crate::wrapper::WrapperRegistry;

pub struct RefcountBridge<R: EmbeddedRuntime> {
    runtime: Arc<R>,
    registry: Arc<WrapperRegistry>,
    counters: Arc<BridgeCounters>,
}

impl<R: EmbeddedRuntime> RefcountBridge<R> {
    pub fn new(runtime: Arc<R>, registry: Arc<WrapperRegistry>, counters: Arc<BridgeCounters>) -> Self {
        Self { runtime, registry, counters }
    }

    /// Host took another reference to the wrapper
    pub fn incref(&self, handle: WrapperHandle) {
        let Some(retains) = self.registry.update(handle, |record| {
            record.host_retains += 1;
            record.host_retains
        }) else {
            warn!(target: "bridge", handle = ?handle.as_ptr(), "incref for unknown wrapper, ignoring");
            return;
        };

        self.runtime.retain(handle);
        self.counters.incref();
        trace!(target: "bridge", handle = ?handle.as_ptr(), retains, "incref");
    }

    /// Host dropped one of its references.
    ///
    /// Returns true while the wrapper is still referenced inside the runtime.
    /// A wrapper is never freed here: the creation reference keeps it alive
    /// until the host destroys the object.
    pub fn decref(&self, handle: WrapperHandle) -> bool {
        let Some(retains) = self.registry.update(handle, |record| {
            if record.host_retains == 0 {
                return None;
            }
            record.host_retains -= 1;
            Some(record.host_retains)
        }) else {
            warn!(target: "bridge", handle = ?handle.as_ptr(), "decref for unknown wrapper, ignoring");
            return false;
        };

        let Some(retains) = retains else {
            fatal(format!(
                "refcount underflow: decref of {:?} without a matching incref",
                handle
            ));
        };

        let remaining = self.runtime.release(handle);
        self.counters.decref();
        if remaining < CREATION_REFERENCE + retains as usize {
            fatal(format!(
                "embedded count of {:?} fell to {} below {} bridge-held references",
                handle,
                remaining,
                CREATION_REFERENCE + retains as usize
            ));
        }

        trace!(target: "bridge", handle = ?handle.as_ptr(), retains, remaining, "decref");
        remaining > 0
    }

    /// Current host retains of `handle`; `None` if it is not live
    pub fn host_retains(&self, handle: WrapperHandle) -> Option<u64> {
        self.registry.get(handle).map(|record| record.host_retains)
    }
}
