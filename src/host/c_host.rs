//! Host engine behind C function pointers

use super::HostEngine;
use crate::binding::{BindingTable, LanguageIndex};
use crate::error::{BridgeError, Result};
use crate::logging::debug;

/// Registration entry points a C host passes to `embedbridge_library_init`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HostApi {
    /// Returns the language index, or a negative value on refusal
    pub register_binding_functions: unsafe extern "C" fn(table: BindingTable) -> i32,
    pub unregister_binding_functions: unsafe extern "C" fn(index: i32),
}

pub struct CHost {
    api: HostApi,
}

impl CHost {
    pub fn new(api: HostApi) -> Self {
        Self { api }
    }
}

impl HostEngine for CHost {
    fn register_binding_table(&self, table: BindingTable) -> Result<LanguageIndex> {
        // Safety: the host guarantees its API pointers stay valid while the
        // library is loaded
        let index = unsafe { (self.api.register_binding_functions)(table) };
        if index < 0 {
            return Err(BridgeError::Registration(format!(
                "host returned language index {}",
                index
            )));
        }

        debug!(target: "lifecycle", index, "binding table registered with C host");
        Ok(LanguageIndex::new(index))
    }

    fn unregister_binding_table(&self, index: LanguageIndex) {
        // Safety: as above
        unsafe { (self.api.unregister_binding_functions)(index.get()) };
        debug!(target: "lifecycle", index = index.get(), "binding table unregistered from C host");
    }
}
