//! Error taxonomy for the bridge
//!
//! Design: Recoverable conditions are values, violations are not:
//! 1. Configuration and bootstrap errors stop lifecycle progress and are reported
//! 2. Allocation errors surface as a null wrapper
//! 3. Refcount and ordering violations halt through [`fatal`]

use std::fmt;

use crate::lifecycle::LifecycleState;
use crate::logging::error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// No resource path was supplied before runtime initialization
    MissingResourcePath,
    /// The embedded runtime refused to start
    RuntimeInit(String),
    /// A bootstrap module failed to import; `position` is 1-based, 0 is the
    /// startup module
    ModuleImport { module: String, position: usize, reason: String },
    /// The host rejected the binding table
    Registration(String),
    /// Operation attempted from a state that does not allow it
    InvalidState { operation: &'static str, state: LifecycleState },
    /// Malformed or unreadable configuration
    Config(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingResourcePath => {
                write!(f, "Could not initialize embedded runtime: resource path was not defined")
            }
            Self::RuntimeInit(reason) => {
                write!(f, "Could not initialize embedded runtime: {}", reason)
            }
            Self::ModuleImport { module, position: 0, reason } => {
                write!(f, "Failed to import startup module '{}': {}", module, reason)
            }
            Self::ModuleImport { module, position, reason } => {
                write!(f, "Failed to import bootstrap module #{} '{}': {}", position, module, reason)
            }
            Self::Registration(reason) => {
                write!(f, "Host rejected binding table: {}", reason)
            }
            Self::InvalidState { operation, state } => {
                write!(f, "Cannot {} while lifecycle is {}", operation, state)
            }
            Self::Config(reason) => {
                write!(f, "Invalid bridge configuration: {}", reason)
            }
        }
    }
}

impl std::error::Error for BridgeError {}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Diagnostic category, mirrors the non-fatal part of [`BridgeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Configuration,
    RuntimeInit,
    Import,
    Registration,
    Ordering,
}

/// Human-readable report of a lifecycle step that did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Module that failed, for import diagnostics
    pub module: Option<String>,
}

impl Diagnostic {
    pub fn from_error(err: &BridgeError) -> Self {
        let (kind, module) = match err {
            BridgeError::MissingResourcePath | BridgeError::Config(_) => {
                (DiagnosticKind::Configuration, None)
            }
            BridgeError::RuntimeInit(_) => (DiagnosticKind::RuntimeInit, None),
            BridgeError::ModuleImport { module, .. } => (DiagnosticKind::Import, Some(module.clone())),
            BridgeError::Registration(_) => (DiagnosticKind::Registration, None),
            BridgeError::InvalidState { .. } => (DiagnosticKind::Ordering, None),
        };

        Self { kind, message: err.to_string(), module }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Ordered collection of diagnostics for one coordinator
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the error and echo it to the console log
    pub fn report(&mut self, err: &BridgeError) {
        error!(target: "lifecycle", "{}", err);
        self.entries.push(Diagnostic::from_error(err));
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Halt on a broken invariant.
///
/// The shared state is already inconsistent when this is reached, so there is
/// nothing to unwind to. Inside an `extern "C"` callback the panic aborts.
#[cold]
#[track_caller]
pub fn fatal(violation: impl fmt::Display) -> ! {
    error!(target: "bridge", %violation, "fatal bridge invariant violation");
    panic!("fatal bridge invariant violation: {}", violation)
}
