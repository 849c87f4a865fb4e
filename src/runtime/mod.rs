//! Embedded runtime - the interpreter side of the bridge
//!
//! Design: One trait at the seam, implementations per interpreter:
//! 1. `ManagedRuntime` - in-process object heap with header refcounts (default)
//! 2. `PythonRuntime` - CPython through pyo3 (feature `python`)
//!
//! The bridge never looks inside a wrapper; it only moves opaque handles and
//! asks the runtime to retain, release or free them under its execution lock.

mod managed;
mod object;

#[cfg(feature = "python")]
pub mod python;

#[cfg(test)]
mod tests;

pub use managed::ManagedRuntime;
pub use object::{WrapperObject, CREATION_REFERENCE};

#[cfg(feature = "python")]
pub use python::PythonRuntime;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::binding::{HostObject, TypeTag, WrapperHandle};

/// Module initializer run the first time a stub module is imported
pub type ModuleInit = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// A module made importable before the runtime starts
#[derive(Clone)]
pub struct ModuleSpec {
    pub name: String,
    pub init: Option<ModuleInit>,
}

impl ModuleSpec {
    /// Module resolved by the runtime itself (no initializer)
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), init: None }
    }

    /// Built-in stub module with an initializer
    pub fn builtin<F>(name: impl Into<String>, init: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        Self { name: name.into(), init: Some(Arc::new(init)) }
    }
}

impl fmt::Debug for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSpec")
            .field("name", &self.name)
            .field("builtin", &self.init.is_some())
            .finish()
    }
}

/// Settings handed to [`EmbeddedRuntime::initialize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Resource path derived from the hosting library location
    pub home: PathBuf,
    pub program_name: String,
    pub no_user_site: bool,
    pub no_site: bool,
    pub ignore_environment: bool,
}

impl RuntimeSettings {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            program_name: "host".to_string(),
            no_user_site: true,
            no_site: false,
            ignore_environment: false,
        }
    }

    pub fn from_config(home: impl Into<PathBuf>, config: &crate::config::RuntimeConfig) -> Self {
        Self {
            home: home.into(),
            program_name: config.program_name.clone(),
            no_user_site: config.no_user_site,
            no_site: config.no_site || config.export,
            ignore_environment: config.ignore_environment || config.export,
        }
    }
}

/// Embedded runtime errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    NotInitialized,
    AlreadyInitialized,
    InitFailed(String),
    FinalizeFailed(String),
    UnknownModule(String),
    ImportFailed { module: String, reason: String },
    AllocationFailed(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "runtime is not initialized"),
            Self::AlreadyInitialized => write!(f, "runtime is already initialized"),
            Self::InitFailed(msg) => write!(f, "runtime initialization failed: {}", msg),
            Self::FinalizeFailed(msg) => write!(f, "runtime finalization failed: {}", msg),
            Self::UnknownModule(name) => write!(f, "No module named '{}'", name),
            Self::ImportFailed { module, reason } => {
                write!(f, "import of '{}' failed: {}", module, reason)
            }
            Self::AllocationFailed(msg) => write!(f, "wrapper allocation failed: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// The interpreter hosting wrapper objects.
///
/// Object operations (`alloc_wrapper`, `retain`, `release`, `refcount`,
/// `free_wrapper`) must be called inside [`EmbeddedRuntime::with_lock`].
pub trait EmbeddedRuntime: Send + Sync + 'static {
    /// Short name for banners and logs
    fn name(&self) -> &'static str;

    fn version(&self) -> String;

    /// Make a module importable. Only valid before `initialize`.
    fn register_module(&self, module: ModuleSpec) -> Result<(), RuntimeError>;

    fn initialize(&self, settings: &RuntimeSettings) -> Result<(), RuntimeError>;

    /// Liveness check used to guard finalization
    fn is_initialized(&self) -> bool;

    fn import_module(&self, name: &str) -> Result<(), RuntimeError>;

    /// Run `f` holding the runtime's global execution lock
    fn with_lock<T>(&self, f: impl FnOnce() -> T) -> T;

    /// Allocate a wrapper holding one creation reference
    fn alloc_wrapper(
        &self,
        host_object: HostObject,
        type_tag: TypeTag,
        type_name: &str,
    ) -> Result<WrapperHandle, RuntimeError>;

    fn retain(&self, handle: WrapperHandle);

    /// Drop one reference, returning the count left
    fn release(&self, handle: WrapperHandle) -> usize;

    fn refcount(&self, handle: WrapperHandle) -> usize;

    /// Release the object whatever its count. `held` is the number of
    /// references the bridge owns on it.
    fn free_wrapper(&self, handle: WrapperHandle, held: usize);

    fn finalize(&self) -> Result<(), RuntimeError>;
}
