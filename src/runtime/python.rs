//! CPython runtime through pyo3
//!
//! Design: The interpreter is embedded, not extended:
//! 1. Started from a `PyConfig` carrying the resource path as home
//! 2. The main thread state is saved right after start, so any host thread
//!    can take the GIL through `Python::with_gil`
//! 3. Wrappers are `_Wrapped` instances (or user classes named
//!    `module.Class`), handed to the host as owned `PyObject` pointers
//!
//! Stub modules are materialized in `sys.modules` on first import.

use std::ffi::CString;
use std::os::raw::c_int;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::PyModule;

use super::{EmbeddedRuntime, ModuleSpec, RuntimeError, RuntimeSettings};
use crate::binding::{HostObject, TypeTag, WrapperHandle};
use crate::logging::{debug, info};

/// Type name of the built-in wrapper class
pub const WRAPPED_TYPE_NAME: &str = "_Wrapped";

/// Built-in wrapper: remembers its host object and tag, nothing else
#[pyclass(name = "_Wrapped", module = "embedbridge", subclass)]
pub struct Wrapped {
    #[pyo3(get)]
    host_object: usize,
    #[pyo3(get)]
    type_tag: usize,
}

#[pymethods]
impl Wrapped {
    #[new]
    fn new(host_object: usize, type_tag: usize) -> Self {
        Self { host_object, type_tag }
    }

    fn __repr__(&self) -> String {
        format!("<_Wrapped host_object=0x{:x} type_tag={}>", self.host_object, self.type_tag)
    }
}

pub struct PythonRuntime {
    initialized: AtomicBool,
    modules: Mutex<Vec<ModuleSpec>>,
    /// Main thread state saved after start, as an address
    main_thread: Mutex<Option<usize>>,
}

#[cfg(test)]
pub(crate) static FAIL_MODULE_INSTALL: AtomicBool = AtomicBool::new(false);

fn install_bridge_module(py: Python<'_>) -> PyResult<()> {
    #[cfg(test)]
    if FAIL_MODULE_INSTALL.load(Ordering::SeqCst) {
        return Err(pyo3::exceptions::PyRuntimeError::new_err("bridge module install disabled"));
    }

    let module = PyModule::new(py, "embedbridge")?;
    module.add_class::<Wrapped>()?;
    py.import("sys")?.getattr("modules")?.set_item("embedbridge", module)
}

fn init_error(err: PyErr) -> RuntimeError {
    RuntimeError::InitFailed(err.to_string())
}

fn c_string(value: &str, what: &str) -> Result<CString, RuntimeError> {
    CString::new(value).map_err(|_| RuntimeError::InitFailed(format!("{} contains a NUL byte", what)))
}

unsafe fn check_status(status: ffi::PyStatus, what: &str) -> Result<(), RuntimeError> {
    if ffi::PyStatus_Exception(status) != 0 {
        return Err(RuntimeError::InitFailed(format!("{} failed", what)));
    }
    Ok(())
}

impl PythonRuntime {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            modules: Mutex::new(Vec::new()),
            main_thread: Mutex::new(None),
        }
    }

    fn stub(&self, name: &str) -> Option<ModuleSpec> {
        self.modules.lock().iter().find(|module| module.name == name).cloned()
    }

    unsafe fn start_interpreter(settings: &RuntimeSettings) -> Result<(), RuntimeError> {
        let home = c_string(&settings.home.to_string_lossy(), "resource path")?;
        let program = c_string(&settings.program_name, "program name")?;

        let mut config = std::mem::MaybeUninit::<ffi::PyConfig>::uninit();
        ffi::PyConfig_InitPythonConfig(config.as_mut_ptr());
        let config = config.as_mut_ptr();

        (*config).user_site_directory = c_int::from(!settings.no_user_site);
        (*config).site_import = c_int::from(!settings.no_site);
        (*config).use_environment = c_int::from(!settings.ignore_environment);
        (*config).install_signal_handlers = 0;

        let result = check_status(
            ffi::PyConfig_SetBytesString(config, ptr::addr_of_mut!((*config).home), home.as_ptr()),
            "setting runtime home",
        )
        .and_then(|_| {
            check_status(
                ffi::PyConfig_SetBytesString(
                    config,
                    ptr::addr_of_mut!((*config).program_name),
                    program.as_ptr(),
                ),
                "setting program name",
            )
        })
        .and_then(|_| check_status(ffi::Py_InitializeFromConfig(config), "interpreter start"));

        ffi::PyConfig_Clear(config);
        result
    }
}

impl Default for PythonRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedRuntime for PythonRuntime {
    fn name(&self) -> &'static str {
        "python"
    }

    fn version(&self) -> String {
        if !self.is_initialized() {
            return "uninitialized".to_string();
        }
        Python::with_gil(|py| py.version().to_string())
    }

    fn register_module(&self, module: ModuleSpec) -> Result<(), RuntimeError> {
        if self.is_initialized() {
            return Err(RuntimeError::AlreadyInitialized);
        }
        let mut modules = self.modules.lock();
        modules.retain(|existing| existing.name != module.name);
        modules.push(module);
        Ok(())
    }

    fn initialize(&self, settings: &RuntimeSettings) -> Result<(), RuntimeError> {
        if self.is_initialized() || unsafe { ffi::Py_IsInitialized() } != 0 {
            return Err(RuntimeError::AlreadyInitialized);
        }

        unsafe { Self::start_interpreter(settings)? };

        if let Err(err) = Python::with_gil(install_bridge_module) {
            // Still holding the GIL from start; stop so a later start can run
            unsafe { ffi::Py_FinalizeEx() };
            return Err(init_error(err));
        }

        // Hand the GIL back so host threads can take it
        let state = unsafe { ffi::PyEval_SaveThread() };
        *self.main_thread.lock() = Some(state as usize);
        self.initialized.store(true, Ordering::Release);

        info!(target: "runtime", home = %settings.home.display(), "python runtime initialized");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire) && unsafe { ffi::Py_IsInitialized() } != 0
    }

    fn import_module(&self, name: &str) -> Result<(), RuntimeError> {
        if !self.is_initialized() {
            return Err(RuntimeError::NotInitialized);
        }
        let import_error = |reason: String| RuntimeError::ImportFailed {
            module: name.to_string(),
            reason,
        };

        Python::with_gil(|py| {
            let Some(ModuleSpec { init: Some(init), .. }) = self.stub(name) else {
                return py.import(name).map(|_| ()).map_err(|err| import_error(err.to_string()));
            };

            let modules = py
                .import("sys")
                .and_then(|sys| sys.getattr("modules"))
                .map_err(|err| import_error(err.to_string()))?;
            if modules.contains(name).unwrap_or(false) {
                return Ok(());
            }

            init().map_err(import_error)?;
            PyModule::new(py, name)
                .and_then(|module| modules.set_item(name, module))
                .map_err(|err| import_error(err.to_string()))?;
            debug!(target: "runtime", module = name, "stub module installed");
            Ok(())
        })
    }

    fn with_lock<T>(&self, f: impl FnOnce() -> T) -> T {
        Python::with_gil(|_py| f())
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
        let alloc_error = |err: PyErr| RuntimeError::AllocationFailed(err.to_string());

        Python::with_gil(|py| {
            let object: PyObject = if type_name == WRAPPED_TYPE_NAME {
                Py::new(py, Wrapped::new(host_object.addr(), type_tag.get()))
                    .map_err(alloc_error)?
                    .into_py(py)
            } else {
                let (module, class) = type_name.rsplit_once('.').ok_or_else(|| {
                    RuntimeError::AllocationFailed(format!("'{}' is not a module.Class path", type_name))
                })?;
                py.import(module)
                    .and_then(|module| module.getattr(class))
                    .and_then(|class| class.call1((host_object.addr(), type_tag.get())))
                    .map_err(alloc_error)?
                    .into_py(py)
            };

            // The owned reference becomes the creation reference
            WrapperHandle::from_ptr(object.into_ptr().cast())
                .ok_or_else(|| RuntimeError::AllocationFailed("null object".to_string()))
        })
    }

    fn retain(&self, handle: WrapperHandle) {
        unsafe { ffi::Py_IncRef(handle.as_ptr().cast()) }
    }

    fn release(&self, handle: WrapperHandle) -> usize {
        let object: *mut ffi::PyObject = handle.as_ptr().cast();
        unsafe {
            let before = ffi::Py_REFCNT(object);
            ffi::Py_DecRef(object);
            before.saturating_sub(1).max(0) as usize
        }
    }

    fn refcount(&self, handle: WrapperHandle) -> usize {
        unsafe { ffi::Py_REFCNT(handle.as_ptr().cast()).max(0) as usize }
    }

    fn free_wrapper(&self, handle: WrapperHandle, held: usize) {
        let object: *mut ffi::PyObject = handle.as_ptr().cast();
        for _ in 0..held {
            unsafe { ffi::Py_DecRef(object) }
        }
    }

    fn finalize(&self) -> Result<(), RuntimeError> {
        if !self.is_initialized() {
            return Err(RuntimeError::NotInitialized);
        }

        if let Some(state) = self.main_thread.lock().take() {
            unsafe { ffi::PyEval_RestoreThread(state as *mut ffi::PyThreadState) };
        }
        let status = unsafe { ffi::Py_FinalizeEx() };
        self.initialized.store(false, Ordering::Release);
        if status < 0 {
            return Err(RuntimeError::FinalizeFailed("Py_FinalizeEx reported an error".to_string()));
        }

        info!(target: "runtime", "python runtime finalized");
        Ok(())
    }
}
