//! Module bootstrap - what must exist in the runtime before the bridge opens
//!
//! Owns three things the coordinator consults in order:
//! 1. Stub modules registered before the runtime starts
//! 2. Core modules imported, in order, before the binding table is registered
//! 3. The TypeTag → wrapper type table read at `create` time

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::binding::TypeTag;
use crate::config::BridgeConfig;
use crate::runtime::ModuleSpec;

/// TypeTag → wrapper type name
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<TypeTag, String>>,
    default_type: Option<String>,
}

impl TypeRegistry {
    pub fn new(default_type: Option<String>) -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
            default_type,
        }
    }

    /// Register or replace the type for `tag`; returns the previous name
    pub fn register(&self, tag: TypeTag, type_name: impl Into<String>) -> Option<String> {
        self.types.write().insert(tag, type_name.into())
    }

    /// Type to instantiate for `tag`, falling back to the default type
    pub fn resolve(&self, tag: TypeTag) -> Option<String> {
        self.types
            .read()
            .get(&tag)
            .cloned()
            .or_else(|| self.default_type.clone())
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.types.read().contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ModuleBootstrap {
    stubs: Vec<ModuleSpec>,
    core_modules: Vec<String>,
    types: Arc<TypeRegistry>,
}

impl ModuleBootstrap {
    pub fn new() -> Self {
        Self::with_default_type(Some("_Wrapped".to_string()))
    }

    pub fn with_default_type(default_type: Option<String>) -> Self {
        Self {
            stubs: Vec::new(),
            core_modules: Vec::new(),
            types: Arc::new(TypeRegistry::new(default_type)),
        }
    }

    /// Core modules from `[bootstrap]`. They have no stub: the runtime must
    /// resolve them itself.
    pub fn from_config(config: &BridgeConfig) -> Self {
        let mut bootstrap = Self::with_default_type(config.bootstrap.default_wrapper_type.clone());
        bootstrap.core_modules.extend(config.bootstrap.modules.iter().cloned());
        bootstrap
    }

    /// Register a module stub and import it as a core module
    pub fn module(mut self, spec: ModuleSpec) -> Self {
        self.core_modules.push(spec.name.clone());
        self.stubs.push(spec);
        self
    }

    /// Register a module stub without importing it during bootstrap
    pub fn stub(mut self, spec: ModuleSpec) -> Self {
        self.stubs.push(spec);
        self
    }

    pub fn wrapper_type(self, tag: TypeTag, type_name: impl Into<String>) -> Self {
        self.types.register(tag, type_name);
        self
    }

    pub fn stubs(&self) -> &[ModuleSpec] {
        &self.stubs
    }

    /// Core modules in import order
    pub fn core_modules(&self) -> &[String] {
        &self.core_modules
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }
}

impl Default for ModuleBootstrap {
    fn default() -> Self {
        Self::new()
    }
}
