//! C ABI entry points for hosts loading the bridge as a shared library
//!
//! Design: The process holds exactly one coordinator, created by
//! `embedbridge_library_init` and torn down by `embedbridge_library_terminate`.
//! Script-level entry points drive its state machine:
//! 1. `embedbridge_library_init` - host API stored, resource path derived
//! 2. `embedbridge_singleton` - runtime started and bootstrapped
//! 3. `embedbridge_script_init` - binding table registered
//! 4. `embedbridge_script_terminate` - binding table unregistered
//! 5. `embedbridge_library_terminate` - runtime finalized

use core::ffi::{c_char, c_void};
use std::ffi::CStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::bootstrap::ModuleBootstrap;
use crate::config::BridgeConfig;
use crate::host::{CHost, HostApi};
use crate::lifecycle::LifecycleCoordinator;
use crate::logging::{debug, error, init_bridge_logging, shutdown_bridge_logging, warn, LogConfig};
use crate::metrics::BridgeStats;

#[cfg(not(feature = "python"))]
pub type DefaultRuntime = crate::runtime::ManagedRuntime;

#[cfg(feature = "python")]
pub type DefaultRuntime = crate::runtime::PythonRuntime;

/// Coordinator type behind the C entry points
pub type Coordinator = LifecycleCoordinator<DefaultRuntime, CHost>;

static COORDINATOR: Lazy<Mutex<Option<Coordinator>>> = Lazy::new(|| Mutex::new(None));

/// Options passed by the host at library load
#[repr(C)]
#[derive(Debug)]
pub struct BridgeInitOptions {
    pub api: *const HostApi,
    /// Path of the loaded bridge library, NUL-terminated UTF-8; may be null
    pub active_library_path: *const c_char,
}

/// Run `f` on the process coordinator, if the library is initialized
pub fn with_coordinator<T>(f: impl FnOnce(&mut Coordinator) -> T) -> Option<T> {
    let mut slot = COORDINATOR.lock();
    match slot.as_mut() {
        Some(coordinator) => Some(f(coordinator)),
        None => {
            warn!(target: "lifecycle", "bridge entry point called before library init");
            None
        }
    }
}

fn load_config(library_path: Option<&Path>) -> BridgeConfig {
    let config = match library_path.and_then(Path::parent) {
        Some(dir) => BridgeConfig::discover(dir).unwrap_or_else(|err| {
            error!(target: "lifecycle", %err, "falling back to default configuration");
            BridgeConfig::default()
        }),
        None => BridgeConfig::default(),
    };
    config.with_env_overrides()
}

/// Set up the process coordinator. Returns false if `options` is unusable.
///
/// # Safety
/// `options` must be null or point at a valid `BridgeInitOptions` whose
/// pointers stay valid for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn embedbridge_library_init(options: *const BridgeInitOptions) -> bool {
    let Some(options) = options.as_ref() else {
        return false;
    };
    let Some(api) = options.api.as_ref().copied() else {
        return false;
    };

    let library_path = if options.active_library_path.is_null() {
        None
    } else {
        match CStr::from_ptr(options.active_library_path).to_str() {
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => None,
        }
    };

    let config = load_config(library_path.as_deref());
    init_bridge_logging(LogConfig::from_settings(&config.logging));

    let mut coordinator = LifecycleCoordinator::new(
        Arc::new(DefaultRuntime::new()),
        CHost::new(api),
        ModuleBootstrap::from_config(&config),
        &config,
    );
    if let Some(path) = &library_path {
        coordinator.set_library_path(path);
    }
    debug!(
        target: "lifecycle",
        resource_path = ?coordinator.resource_path(),
        "bridge library initialized"
    );

    let previous = COORDINATOR.lock().replace(coordinator);
    if let Some(mut previous) = previous {
        warn!(target: "lifecycle", "library initialized twice, shutting down the previous bridge");
        previous.shutdown();
    }
    true
}

/// Make sure the runtime is started and bootstrapped
#[no_mangle]
pub extern "C" fn embedbridge_singleton() {
    with_coordinator(|coordinator| {
        // failures are recorded as diagnostics
        let _ = coordinator.ensure_ready();
    });
}

/// Register the binding table, starting the runtime first if needed
#[no_mangle]
pub extern "C" fn embedbridge_script_init(_handle: *mut c_void) {
    with_coordinator(|coordinator| {
        if coordinator.ensure_ready().is_ok() {
            let _ = coordinator.activate();
        }
    });
}

/// Unregister the binding table
#[no_mangle]
pub extern "C" fn embedbridge_script_terminate(_handle: *mut c_void) {
    with_coordinator(|coordinator| coordinator.deactivate());
}

/// Tear everything down: unregister, finalize the runtime, flush logs
#[no_mangle]
pub extern "C" fn embedbridge_library_terminate() {
    let coordinator = COORDINATOR.lock().take();
    if let Some(mut coordinator) = coordinator {
        coordinator.shutdown();
    }
    shutdown_bridge_logging();
}

/// Copy the bridge counters into `out`. False if there is no bridge.
///
/// # Safety
/// `out` must be null or valid for writes of one `BridgeStats`.
#[no_mangle]
pub unsafe extern "C" fn embedbridge_stats(out: *mut BridgeStats) -> bool {
    if out.is_null() {
        return false;
    }
    match with_coordinator(|coordinator| coordinator.bridge().stats()) {
        Some(stats) => {
            out.write(stats);
            true
        }
        None => false,
    }
}
