//! Lifecycle coordinator - bring-up and tear-down ordering
//!
//! Design: An explicit state machine owns every ordering rule between the
//! embedded runtime and the host:
//!
//!   Uninitialized → RuntimeReady → Bootstrapped → BridgeActive → Terminating → Uninitialized
//!
//! 1. `initialize_runtime` - module stubs registered, runtime started
//! 2. `bootstrap` - core modules imported in order
//! 3. `activate` - binding table registered, then its callback window opened
//! 4. `deactivate` - window closed, binding table unregistered
//! 5. `finalize` - runtime finalized, resource path released
//!
//! Recoverable failures leave the state where it was and are collected as
//! diagnostics. Finalizing while the binding table is registered is fatal.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::binding::{BindingTable, LanguageIndex, TypeTag};
use crate::bootstrap::ModuleBootstrap;
use crate::bridge::{Bridge, Registration};
use crate::config::BridgeConfig;
use crate::error::{fatal, BridgeError, Diagnostic, DiagnosticLog, Result};
use crate::host::HostEngine;
use crate::logging::{info, log_runtime_banner, log_transition, warn};
use crate::runtime::{EmbeddedRuntime, RuntimeSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    RuntimeReady,
    Bootstrapped,
    BridgeActive,
    Terminating,
}

impl LifecycleState {
    /// Whether the embedded runtime is running in this state
    pub fn runtime_running(self) -> bool {
        !matches!(self, Self::Uninitialized)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "Uninitialized",
            Self::RuntimeReady => "RuntimeReady",
            Self::Bootstrapped => "Bootstrapped",
            Self::BridgeActive => "BridgeActive",
            Self::Terminating => "Terminating",
        };
        f.write_str(name)
    }
}

pub struct LifecycleCoordinator<R: EmbeddedRuntime, H: HostEngine> {
    state: LifecycleState,
    runtime: Arc<R>,
    host: H,
    bootstrap: ModuleBootstrap,
    bridge: Arc<Bridge<R>>,
    config: BridgeConfig,
    resource_path: Option<PathBuf>,
    language_index: Option<LanguageIndex>,
    /// Every table handed to the host, kept alive for stale callers
    registrations: Vec<Arc<Registration<R>>>,
    diagnostics: DiagnosticLog,
}

impl<R: EmbeddedRuntime, H: HostEngine> LifecycleCoordinator<R, H> {
    pub fn new(runtime: Arc<R>, host: H, bootstrap: ModuleBootstrap, config: &BridgeConfig) -> Self {
        let bridge = Arc::new(Bridge::new(
            Arc::clone(&runtime),
            Arc::clone(bootstrap.types()),
            config.callbacks.strict,
        ));

        Self {
            state: LifecycleState::Uninitialized,
            runtime,
            host,
            bootstrap,
            bridge,
            config: config.clone(),
            resource_path: config.runtime.resource_path.clone(),
            language_index: None,
            registrations: Vec::new(),
            diagnostics: DiagnosticLog::new(),
        }
    }

    pub fn set_resource_path(&mut self, path: impl Into<PathBuf>) {
        self.resource_path = Some(path.into());
    }

    /// Derive the resource path from the location of the hosting library
    pub fn set_library_path(&mut self, library_path: &Path) {
        self.resource_path = self.config.resource_path_for(library_path);
    }

    /// Register module stubs and start the runtime
    pub fn initialize_runtime(&mut self) -> Result<()> {
        if self.state != LifecycleState::Uninitialized {
            return Ok(());
        }

        let Some(home) = self.resource_path.clone() else {
            return Err(self.report(BridgeError::MissingResourcePath));
        };

        for module in self.bootstrap.stubs().to_vec() {
            let name = module.name.clone();
            if let Err(err) = self.runtime.register_module(module) {
                return Err(self.report(BridgeError::RuntimeInit(format!(
                    "could not register module '{}': {}",
                    name, err
                ))));
            }
        }

        let settings = RuntimeSettings::from_config(home, &self.config.runtime);
        if let Err(err) = self.runtime.initialize(&settings) {
            return Err(self.report(BridgeError::RuntimeInit(err.to_string())));
        }
        self.transition(LifecycleState::RuntimeReady);

        match self.config.runtime.startup_module.clone() {
            Some(module) => match self.runtime.import_module(&module) {
                Ok(()) => log_runtime_banner(self.runtime.name(), &self.runtime.version()),
                Err(err) => {
                    self.report(BridgeError::ModuleImport {
                        module,
                        position: 0,
                        reason: err.to_string(),
                    });
                }
            },
            None => log_runtime_banner(self.runtime.name(), &self.runtime.version()),
        }

        Ok(())
    }

    /// Import the core modules in order; the first failure stops the sequence
    pub fn bootstrap(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::RuntimeReady => {}
            LifecycleState::Uninitialized => {
                return Err(self.report(BridgeError::InvalidState {
                    operation: "bootstrap",
                    state: self.state,
                }));
            }
            _ => return Ok(()),
        }

        let modules = self.bootstrap.core_modules().to_vec();
        for (i, module) in modules.into_iter().enumerate() {
            if let Err(err) = self.runtime.import_module(&module) {
                return Err(self.report(BridgeError::ModuleImport {
                    module,
                    position: i + 1,
                    reason: err.to_string(),
                }));
            }
        }

        self.transition(LifecycleState::Bootstrapped);
        Ok(())
    }

    /// Register the binding table and open the callback window
    pub fn activate(&mut self) -> Result<LanguageIndex> {
        match (self.state, self.language_index) {
            (LifecycleState::BridgeActive, Some(index)) => return Ok(index),
            (LifecycleState::Bootstrapped, _) => {}
            (LifecycleState::Terminating, _) => {
                let released = self.bridge.release_all();
                if released > 0 {
                    info!(target: "lifecycle", released, "released wrappers from the previous registration");
                }
            }
            (state, _) => {
                return Err(self.report(BridgeError::InvalidState {
                    operation: "activate",
                    state,
                }));
            }
        }

        let registration = self.bridge.registration();
        self.registrations.push(Arc::clone(&registration));
        let table = BindingTable::for_registration(&registration);
        let index = match self.host.register_binding_table(table) {
            Ok(index) => index,
            Err(err) => return Err(self.report(err)),
        };
        self.bridge.open(&registration);

        info!(target: "lifecycle", %index, generation = registration.generation(), "binding table registered");
        self.language_index = Some(index);
        self.transition(LifecycleState::BridgeActive);
        Ok(index)
    }

    /// Map a tag to a user wrapper type. Only allowed while the bridge is active.
    pub fn register_user_type(&mut self, tag: TypeTag, type_name: impl Into<String>) -> Result<()> {
        if self.state != LifecycleState::BridgeActive {
            return Err(self.report(BridgeError::InvalidState {
                operation: "register user types",
                state: self.state,
            }));
        }

        let type_name = type_name.into();
        if let Some(previous) = self.bootstrap.types().register(tag, type_name.clone()) {
            warn!(target: "lifecycle", tag = tag.get(), %previous, new = %type_name, "wrapper type replaced");
        }
        Ok(())
    }

    /// Close the callback window and unregister the binding table
    pub fn deactivate(&mut self) {
        if self.state != LifecycleState::BridgeActive {
            return;
        }

        self.bridge.close();
        if let Some(index) = self.language_index.take() {
            self.host.unregister_binding_table(index);
            info!(target: "lifecycle", %index, "binding table unregistered");
        }

        let live = self.bridge.live_wrappers();
        if live > 0 {
            info!(target: "lifecycle", live, "wrappers outlive the registration");
        }
        self.transition(LifecycleState::Terminating);
    }

    /// Finalize the runtime and release the resource path
    pub fn finalize(&mut self) {
        match self.state {
            LifecycleState::Uninitialized => return,
            LifecycleState::BridgeActive => fatal(format!(
                "runtime finalization requested while binding table {:?} is registered",
                self.language_index
            )),
            _ => {}
        }

        self.bridge.forget_all();
        if self.runtime.is_initialized() {
            if let Err(err) = self.runtime.finalize() {
                warn!(target: "lifecycle", %err, "runtime finalization reported an error");
            }
        }

        self.resource_path = None;
        self.transition(LifecycleState::Uninitialized);
    }

    /// Runtime up and bootstrapped, without touching the binding table
    pub fn ensure_ready(&mut self) -> Result<()> {
        self.initialize_runtime()?;
        self.bootstrap()
    }

    /// Run bring-up as far as it goes; returns the state reached
    pub fn start(&mut self) -> LifecycleState {
        if self.ensure_ready().is_ok() {
            // failures are already in the diagnostics
            let _ = self.activate();
        }
        self.state
    }

    /// Tear down from any state, unregistering before finalizing
    pub fn shutdown(&mut self) {
        self.deactivate();
        self.finalize();
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn language_index(&self) -> Option<LanguageIndex> {
        self.language_index
    }

    pub fn resource_path(&self) -> Option<&Path> {
        self.resource_path.as_deref()
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn bridge(&self) -> &Arc<Bridge<R>> {
        &self.bridge
    }

    pub fn bootstrap_modules(&self) -> &ModuleBootstrap {
        &self.bootstrap
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diagnostics.entries()
    }

    fn report(&mut self, err: BridgeError) -> BridgeError {
        self.diagnostics.report(&err);
        err
    }

    fn transition(&mut self, to: LifecycleState) {
        log_transition(self.state, to);
        self.state = to;
    }
}

impl<R: EmbeddedRuntime, H: HostEngine> Drop for LifecycleCoordinator<R, H> {
    fn drop(&mut self) {
        // The host must never keep a table pointing at a dropped bridge
        if self.state.runtime_running() {
            self.shutdown();
        }
    }
}
