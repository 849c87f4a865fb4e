//! Bridge - callback dispatch between the binding table and the runtime
//!
//! Design: Every binding table carries its own [`Registration`] as the `data`
//! context. Each callback:
//! 1. Takes the runtime execution lock (exactly once)
//! 2. Checks under that lock that its registration is the open one
//! 3. Forwards to the wrapper factory or the refcount bridge
//!
//! The open generation is set by the lifecycle coordinator, also under the
//! lock, so a callback either runs completely inside its window or not at all.
//! Tables from earlier registrations stay rejected after a re-registration.

use core::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::binding::{HostObject, TypeTag, WrapperHandle};
use crate::bootstrap::TypeRegistry;
use crate::error::fatal;
use crate::logging::{info, log_callback, log_rejected_callback};
use crate::metrics::{BridgeCounters, BridgeStats};
use crate::refcount::RefcountBridge;
use crate::runtime::EmbeddedRuntime;
use crate::wrapper::{WrapperFactory, WrapperRegistry};

pub struct Bridge<R: EmbeddedRuntime> {
    runtime: Arc<R>,
    registry: Arc<WrapperRegistry>,
    factory: WrapperFactory<R>,
    refcounts: RefcountBridge<R>,
    /// Generation of the open registration, 0 while closed
    active: AtomicU64,
    generations: AtomicU64,
    strict: bool,
    counters: Arc<BridgeCounters>,
}

impl<R: EmbeddedRuntime> Bridge<R> {
    pub fn new(runtime: Arc<R>, types: Arc<TypeRegistry>, strict: bool) -> Self {
        let registry = Arc::new(WrapperRegistry::new());
        let counters = Arc::new(BridgeCounters::new());

        Self {
            factory: WrapperFactory::new(
                Arc::clone(&runtime),
                Arc::clone(&registry),
                types,
                Arc::clone(&counters),
            ),
            refcounts: RefcountBridge::new(Arc::clone(&runtime), Arc::clone(&registry), Arc::clone(&counters)),
            runtime,
            registry,
            active: AtomicU64::new(0),
            generations: AtomicU64::new(0),
            strict,
            counters,
        }
    }

    /// Run `f` under the runtime lock if the window of `generation` is open.
    /// `None` accepts whichever registration is open.
    fn dispatch<T>(
        &self,
        generation: Option<u64>,
        callback: &'static str,
        handle: *const c_void,
        rejected: T,
        f: impl FnOnce() -> T,
    ) -> T {
        self.runtime.with_lock(|| {
            self.counters.lock_acquired();
            log_callback(callback, handle);

            let active = self.active.load(Ordering::Acquire);
            if active == 0 || generation.map_or(false, |generation| generation != active) {
                self.counters.callback_rejected();
                log_rejected_callback(callback, handle);
                if self.strict {
                    fatal(format!("{} callback outside the registration window", callback));
                }
                return rejected;
            }

            f()
        })
    }

    /// Callbacks on behalf of whichever registration is open
    pub fn on_create(&self, type_tag: TypeTag, host_object: HostObject) -> Option<WrapperHandle> {
        self.create_in(None, type_tag, host_object)
    }

    pub fn on_destroy(&self, wrapper: *mut c_void) {
        self.destroy_in(None, wrapper)
    }

    pub fn on_incref(&self, wrapper: *mut c_void) {
        self.incref_in(None, wrapper)
    }

    pub fn on_decref(&self, wrapper: *mut c_void) -> bool {
        self.decref_in(None, wrapper)
    }

    fn create_in(&self, generation: Option<u64>, type_tag: TypeTag, host_object: HostObject) -> Option<WrapperHandle> {
        self.dispatch(generation, "create", host_object.as_ptr(), None, || {
            self.factory.create(host_object, type_tag)
        })
    }

    fn destroy_in(&self, generation: Option<u64>, wrapper: *mut c_void) {
        self.dispatch(generation, "destroy", wrapper, (), || {
            if let Some(handle) = WrapperHandle::from_ptr(wrapper) {
                self.factory.destroy(handle);
            }
        })
    }

    fn incref_in(&self, generation: Option<u64>, wrapper: *mut c_void) {
        self.dispatch(generation, "incref", wrapper, (), || {
            if let Some(handle) = WrapperHandle::from_ptr(wrapper) {
                self.refcounts.incref(handle);
            }
        })
    }

    fn decref_in(&self, generation: Option<u64>, wrapper: *mut c_void) -> bool {
        self.dispatch(generation, "decref", wrapper, false, || {
            WrapperHandle::from_ptr(wrapper).map_or(false, |handle| self.refcounts.decref(handle))
        })
    }

    /// Context for a new binding table. Its callbacks are rejected until
    /// [`Bridge::open`] is called with it.
    pub fn registration(self: &Arc<Self>) -> Arc<Registration<R>> {
        Arc::new(Registration {
            generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
            bridge: Arc::clone(self),
        })
    }

    /// Open the callback window for `registration`, closing any other
    pub fn open(&self, registration: &Registration<R>) {
        self.runtime
            .with_lock(|| self.active.store(registration.generation, Ordering::Release));
    }

    /// Close the callback window; callbacks already inside finish first
    pub fn close(&self) {
        self.runtime.with_lock(|| self.active.store(0, Ordering::Release));
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) != 0
    }

    /// Generation of the open registration
    pub fn active_generation(&self) -> Option<u64> {
        match self.active.load(Ordering::Acquire) {
            0 => None,
            generation => Some(generation),
        }
    }

    /// Destroy every wrapper left over from a previous registration window.
    /// Returns how many were released.
    pub fn release_all(&self) -> usize {
        self.runtime.with_lock(|| {
            let handles = self.registry.handles();
            for handle in &handles {
                self.factory.destroy(*handle);
            }
            handles.len()
        })
    }

    /// Drop bookkeeping for wrappers the runtime is about to reclaim.
    /// Returns how many were still live.
    pub fn forget_all(&self) -> usize {
        let live = self.runtime.with_lock(|| self.registry.clear());
        if live > 0 {
            info!(target: "bridge", live, "wrappers still live at shutdown, reclaimed with the runtime");
        }
        live
    }

    pub fn live_wrappers(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<WrapperRegistry> {
        &self.registry
    }

    pub fn refcounts(&self) -> &RefcountBridge<R> {
        &self.refcounts
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn stats(&self) -> BridgeStats {
        self.counters.snapshot(self.registry.len() as u64)
    }
}

/// Callback context of one binding-table registration
pub struct Registration<R: EmbeddedRuntime> {
    generation: u64,
    bridge: Arc<Bridge<R>>,
}

impl<R: EmbeddedRuntime> Registration<R> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn bridge(&self) -> &Arc<Bridge<R>> {
        &self.bridge
    }

    pub fn on_create(&self, type_tag: TypeTag, host_object: HostObject) -> Option<WrapperHandle> {
        self.bridge.create_in(Some(self.generation), type_tag, host_object)
    }

    pub fn on_destroy(&self, wrapper: *mut c_void) {
        self.bridge.destroy_in(Some(self.generation), wrapper)
    }

    pub fn on_incref(&self, wrapper: *mut c_void) {
        self.bridge.incref_in(Some(self.generation), wrapper)
    }

    pub fn on_decref(&self, wrapper: *mut c_void) -> bool {
        self.bridge.decref_in(Some(self.generation), wrapper)
    }
}

impl<R: EmbeddedRuntime> std::fmt::Debug for Registration<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("generation", &self.generation).finish_non_exhaustive()
    }
}
