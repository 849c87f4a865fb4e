//! embedbridge - host object ↔ embedded interpreter wrapper bridge
//!
//! Keeps one wrapper per host object alive inside an embedded runtime for
//! exactly as long as the host says so, and sequences runtime bring-up and
//! tear-down around the host's binding table registration.

// Core modules
pub mod binding;
pub mod bootstrap;
pub mod bridge;
pub mod lifecycle;
pub mod refcount;
pub mod runtime;
pub mod wrapper;

// Host side
pub mod ffi;
pub mod host;

// Infrastructure
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

// Re-export commonly used items
pub use binding::{BindingTable, HostObject, LanguageIndex, TypeTag, WrapperHandle};
pub use bootstrap::{ModuleBootstrap, TypeRegistry};
pub use bridge::{Bridge, Registration};
pub use config::BridgeConfig;
pub use error::{BridgeError, Diagnostic, DiagnosticKind, Result};
pub use host::{CHost, HostApi, HostEngine, LocalHost};
pub use lifecycle::{LifecycleCoordinator, LifecycleState};
pub use metrics::BridgeStats;
pub use refcount::RefcountBridge;
pub use runtime::{EmbeddedRuntime, ManagedRuntime, ModuleSpec, RuntimeError, RuntimeSettings};
pub use wrapper::{WrapperFactory, WrapperRecord, WrapperRegistry};

#[cfg(feature = "python")]
pub use runtime::PythonRuntime;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
