//! Managed runtime - in-process interpreter heap
//!
//! Design: Minimal runtime with the same contract an interpreter gives the bridge:
//! 1. Module table filled before start, imported lazily afterwards
//! 2. Reentrant global execution lock
//! 3. Boxed wrapper objects tracked in a live set, so stale handles are
//!    detected instead of dereferenced

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use dashmap::DashSet;
use parking_lot::{Mutex, ReentrantMutex};

use super::object::WrapperObject;
use super::{EmbeddedRuntime, ModuleInit, ModuleSpec, RuntimeError, RuntimeSettings};
use crate::binding::{HostObject, TypeTag, WrapperHandle};
use crate::logging::{debug, info, warn};

pub struct ManagedRuntime {
    initialized: AtomicBool,
    settings: Mutex<Option<RuntimeSettings>>,
    /// Registered modules; survives finalization like an inittab
    modules: Mutex<HashMap<String, Option<ModuleInit>>>,
    imported: Mutex<HashSet<String>>,
    /// Global execution lock
    gil: ReentrantMutex<()>,
    lock_acquisitions: AtomicU64,
    /// Addresses of live wrapper objects
    objects: DashSet<usize>,
    /// Simulated heap limit; `None` means unbounded
    object_limit: Option<usize>,
    finalizations: AtomicUsize,
}

impl ManagedRuntime {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            settings: Mutex::new(None),
            modules: Mutex::new(HashMap::new()),
            imported: Mutex::new(HashSet::new()),
            gil: ReentrantMutex::new(()),
            lock_acquisitions: AtomicU64::new(0),
            objects: DashSet::with_capacity(128),
            object_limit: None,
            finalizations: AtomicUsize::new(0),
        }
    }

    /// Runtime whose heap refuses allocations past `limit` live objects
    pub fn with_object_limit(limit: usize) -> Self {
        let mut runtime = Self::new();
        runtime.object_limit = Some(limit);
        runtime
    }

    pub fn settings(&self) -> Option<RuntimeSettings> {
        self.settings.lock().clone()
    }

    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn lock_acquisitions(&self) -> u64 {
        self.lock_acquisitions.load(Ordering::Relaxed)
    }

    pub fn is_imported(&self, name: &str) -> bool {
        self.imported.lock().contains(name)
    }

    /// Number of completed finalizations (for teardown checks)
    pub fn finalizations(&self) -> usize {
        self.finalizations.load(Ordering::Relaxed)
    }

    /// Borrow a live object; `None` for handles not in the live set
    fn object(&self, handle: WrapperHandle) -> Option<&WrapperObject> {
        if !self.objects.contains(&handle.addr()) {
            warn!(target: "runtime", handle = ?handle.as_ptr(), "unknown wrapper handle");
            return None;
        }
        // Safety: the address is in the live set, so it came from Box::into_raw
        // in alloc_wrapper and has not been freed yet
        Some(unsafe { &*(handle.as_ptr() as *const WrapperObject) })
    }

    fn reclaim(&self, handle: WrapperHandle) {
        if self.objects.remove(&handle.addr()).is_some() {
            // Safety: removed from the live set exactly once
            drop(unsafe { Box::from_raw(handle.as_ptr() as *mut WrapperObject) });
        }
    }
}

impl Default for ManagedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedRuntime for ManagedRuntime {
    fn name(&self) -> &'static str {
        "managed"
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn register_module(&self, module: ModuleSpec) -> Result<(), RuntimeError> {
        if self.is_initialized() {
            return Err(RuntimeError::AlreadyInitialized);
        }
        debug!(target: "runtime", module = %module.name, "module registered");
        self.modules.lock().insert(module.name, module.init);
        Ok(())
    }

    fn initialize(&self, settings: &RuntimeSettings) -> Result<(), RuntimeError> {
        if self.is_initialized() {
            return Err(RuntimeError::AlreadyInitialized);
        }
        if !settings.home.is_dir() {
            return Err(RuntimeError::InitFailed(format!(
                "runtime home {} is not a directory",
                settings.home.display()
            )));
        }

        *self.settings.lock() = Some(settings.clone());
        self.initialized.store(true, Ordering::Release);

        info!(
            target: "runtime",
            home = %settings.home.display(),
            program = %settings.program_name,
            "managed runtime initialized"
        );
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn import_module(&self, name: &str) -> Result<(), RuntimeError> {
        if !self.is_initialized() {
            return Err(RuntimeError::NotInitialized);
        }
        if self.is_imported(name) {
            return Ok(());
        }

        let init = self
            .modules
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownModule(name.to_string()))?;

        if let Some(init) = init {
            init().map_err(|reason| RuntimeError::ImportFailed {
                module: name.to_string(),
                reason,
            })?;
        }

        self.imported.lock().insert(name.to_string());
        debug!(target: "runtime", module = name, "module imported");
        Ok(())
    }

    fn with_lock<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.gil.lock();
        self.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
        f()
    }

    fn alloc_wrapper(
        &self,
        host_object: HostObject,
        type_tag: TypeTag,
        type_name: &str,
    ) -> Result<WrapperHandle, RuntimeError> {
        if !self.is_initialized() {
            return Err(RuntimeError::NotInitialized);
        }
        if let Some(limit) = self.object_limit {
            if self.objects.len() >= limit {
                return Err(RuntimeError::AllocationFailed(format!(
                    "heap limit of {} objects reached",
                    limit
                )));
            }
        }

        let raw = Box::into_raw(Box::new(WrapperObject::new(host_object, type_tag, type_name)));
        let handle = WrapperHandle::from_ptr(raw.cast())
            .ok_or_else(|| RuntimeError::AllocationFailed("null allocation".to_string()))?;
        self.objects.insert(handle.addr());
        Ok(handle)
    }

    fn retain(&self, handle: WrapperHandle) {
        if let Some(obj) = self.object(handle) {
            obj.inc();
        }
    }

    fn release(&self, handle: WrapperHandle) -> usize {
        let Some(obj) = self.object(handle) else { return 0 };
        let left = obj.dec();
        if left == 0 {
            self.reclaim(handle);
        }
        left as usize
    }

    fn refcount(&self, handle: WrapperHandle) -> usize {
        self.object(handle).map_or(0, |obj| obj.count() as usize)
    }

    fn free_wrapper(&self, handle: WrapperHandle, held: usize) {
        if let Some(obj) = self.object(handle) {
            let count = obj.count() as usize;
            if count > held {
                debug!(
                    target: "runtime",
                    count,
                    held,
                    "freeing wrapper still referenced inside the runtime"
                );
            }
        }
        self.reclaim(handle);
    }

    fn finalize(&self) -> Result<(), RuntimeError> {
        if !self.is_initialized() {
            return Err(RuntimeError::NotInitialized);
        }

        let leftover: Vec<usize> = self.objects.iter().map(|entry| *entry.key()).collect();
        if !leftover.is_empty() {
            info!(target: "runtime", objects = leftover.len(), "reclaiming objects at finalization");
        }
        for addr in leftover {
            if let Some(handle) = WrapperHandle::from_addr(addr) {
                self.reclaim(handle);
            }
        }

        self.imported.lock().clear();
        self.settings.lock().take();
        self.initialized.store(false, Ordering::Release);
        self.finalizations.fetch_add(1, Ordering::Relaxed);

        info!(target: "runtime", "managed runtime finalized");
        Ok(())
    }
}

impl Drop for ManagedRuntime {
    fn drop(&mut self) {
        let leftover: Vec<usize> = self.objects.iter().map(|entry| *entry.key()).collect();
        for addr in leftover {
            if let Some(handle) = WrapperHandle::from_addr(addr) {
                self.reclaim(handle);
            }
        }
    }
}
