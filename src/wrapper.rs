//! Wrapper factory - one wrapper per host object, released on host destruction
//!
//! Design: The registry is the bridge's own view of every live wrapper:
//! - keyed by handle, so stale or foreign handles are recognised before use
//! - indexed by host object, so double wrapping is caught at `create`
//! - carries the host retain count the refcount bridge keeps in step
//!
//! All factory operations expect the runtime execution lock to be held.

use std::sync::Arc;

use dashmap::DashMap;

use crate::binding::{HostObject, TypeTag, WrapperHandle};
use crate::bootstrap::TypeRegistry;
use crate::error::fatal;
use crate::logging::{debug, log_wrapper_created, log_wrapper_destroyed, warn};
use crate::metrics::BridgeCounters;
use crate::runtime::{EmbeddedRuntime, CREATION_REFERENCE};

/// Bridge-side record of one live wrapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperRecord {
    pub host_object: HostObject,
    pub type_tag: TypeTag,
    pub type_name: String,
    /// Host-side retains: increfs minus decrefs, never negative
    pub host_retains: u64,
}

impl WrapperRecord {
    /// References the bridge owns on the embedded object
    pub fn held_references(&self) -> usize {
        CREATION_REFERENCE + self.host_retains as usize
    }
}

#[derive(Debug, Default)]
pub struct WrapperRegistry {
    by_handle: DashMap<usize, WrapperRecord>,
    by_host: DashMap<usize, usize>,
}

impl WrapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    pub fn get(&self, handle: WrapperHandle) -> Option<WrapperRecord> {
        self.by_handle.get(&handle.addr()).map(|entry| entry.value().clone())
    }

    pub fn wrapper_for(&self, host_object: HostObject) -> Option<WrapperHandle> {
        self.by_host
            .get(&host_object.addr())
            .and_then(|entry| WrapperHandle::from_addr(*entry.value()))
    }

    /// Handles of every live wrapper
    pub fn handles(&self) -> Vec<WrapperHandle> {
        self.by_handle
            .iter()
            .filter_map(|entry| WrapperHandle::from_addr(*entry.key()))
            .collect()
    }

    /// Mutate the record of `handle`; `None` if it is not live
    pub(crate) fn update<T>(&self, handle: WrapperHandle, f: impl FnOnce(&mut WrapperRecord) -> T) -> Option<T> {
        self.by_handle.get_mut(&handle.addr()).map(|mut entry| f(entry.value_mut()))
    }

    fn insert(&self, handle: WrapperHandle, record: WrapperRecord) {
        self.by_host.insert(record.host_object.addr(), handle.addr());
        self.by_handle.insert(handle.addr(), record);
    }

    fn remove(&self, handle: WrapperHandle) -> Option<WrapperRecord> {
        let (_, record) = self.by_handle.remove(&handle.addr())?;
        self.by_host.remove(&record.host_object.addr());
        Some(record)
    }

    /// Forget every record; the runtime reclaimed the objects
    pub(crate) fn clear(&self) -> usize {
        let count = self.by_handle.len();
        self.by_handle.clear();
        self.by_host.clear();
        count
    }
}

pub struct WrapperFactory<R: EmbeddedRuntime> {
    runtime: Arc<R>,
    registry: Arc<WrapperRegistry>,
    types: Arc<TypeRegistry>,
    counters: Arc<BridgeCounters>,
}

impl<R: EmbeddedRuntime> WrapperFactory<R> {
    pub fn new(
        runtime: Arc<R>,
        registry: Arc<WrapperRegistry>,
        types: Arc<TypeRegistry>,
        counters: Arc<BridgeCounters>,
    ) -> Self {
        Self { runtime, registry, types, counters }
    }

    /// Allocate the wrapper of `host_object`.
    ///
    /// `None` means "no wrapper available": null host object, no type for the
    /// tag, or a failed runtime allocation. Nothing is recorded in that case.
    /// Wrapping an already wrapped host object is fatal.
    pub fn create(&self, host_object: HostObject, type_tag: TypeTag) -> Option<WrapperHandle> {
        if host_object.is_null() {
            debug!(target: "bridge", "create called with null host object");
            return None;
        }

        if let Some(existing) = self.registry.wrapper_for(host_object) {
            fatal(format!(
                "{:?} already has live wrapper {:?}; refusing to wrap it twice",
                host_object, existing
            ));
        }

        let Some(type_name) = self.types.resolve(type_tag) else {
            warn!(target: "bridge", type_tag = type_tag.get(), "no wrapper type registered for tag");
            self.counters.allocation_failed();
            return None;
        };

        let handle = match self.runtime.alloc_wrapper(host_object, type_tag, &type_name) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(target: "bridge", %err, "wrapper allocation failed, host object stays unbound");
                self.counters.allocation_failed();
                return None;
            }
        };

        log_wrapper_created(host_object.addr(), type_tag.get(), &type_name);
        self.registry.insert(
            handle,
            WrapperRecord {
                host_object,
                type_tag,
                type_name,
                host_retains: 0,
            },
        );
        self.counters.wrapper_created();
        Some(handle)
    }

    /// Release the wrapper unconditionally, whatever its retain count.
    ///
    /// The handle must not be used again afterwards. Unknown handles are
    /// logged and ignored.
    pub fn destroy(&self, handle: WrapperHandle) {
        let Some(record) = self.registry.remove(handle) else {
            warn!(target: "bridge", handle = ?handle.as_ptr(), "destroy for unknown wrapper, ignoring");
            return;
        };

        log_wrapper_destroyed(record.host_object.addr(), record.host_retains);
        self.runtime.free_wrapper(handle, record.held_references());
        self.counters.wrapper_destroyed();
    }

    pub fn registry(&self) -> &Arc<WrapperRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(addr: usize) -> WrapperRecord {
        WrapperRecord {
            host_object: HostObject::from_addr(addr),
            type_tag: TypeTag::new(1),
            type_name: "_Wrapped".to_string(),
            host_retains: 0,
        }
    }

    #[test]
    fn test_registry_indexes_both_ways() {
        let registry = WrapperRegistry::new();
        let handle = WrapperHandle::from_addr(0x9000).unwrap();
        registry.insert(handle, record(0x1000));

        assert_eq!(registry.wrapper_for(HostObject::from_addr(0x1000)), Some(handle));
        assert_eq!(registry.get(handle).unwrap().host_object.addr(), 0x1000);

        let removed = registry.remove(handle).unwrap();
        assert_eq!(removed.held_references(), CREATION_REFERENCE);
        assert!(registry.wrapper_for(HostObject::from_addr(0x1000)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_unknown_handle() {
        let registry = WrapperRegistry::new();
        let handle = WrapperHandle::from_addr(0x9000).unwrap();
        assert_eq!(registry.update(handle, |r| r.host_retains += 1), None);
    }

    #[test]
    fn test_clear() {
        let registry = WrapperRegistry::new();
        registry.insert(WrapperHandle::from_addr(0x9000).unwrap(), record(0x1000));
        registry.insert(WrapperHandle::from_addr(0x9100).unwrap(), record(0x2000));

        assert_eq!(registry.handles().len(), 2);
        assert_eq!(registry.clear(), 2);
        assert_eq!(registry.len(), 0);
    }
}
