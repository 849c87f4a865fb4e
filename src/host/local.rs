//! In-process host engine
//!
//! Plays the host's part of the protocol: files binding tables under
//! increasing indices and invokes their callbacks on request. Calls against
//! an index that is no longer registered are refused here, the way a real
//! host stops calling a table once it is withdrawn.

use core::ffi::c_void;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use parking_lot::Mutex;

use super::HostEngine;
use crate::binding::{BindingTable, HostObject, LanguageIndex, TypeTag, WrapperHandle};
use crate::error::{BridgeError, Result};

/// Registration history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Registered(LanguageIndex),
    Unregistered(LanguageIndex),
}

#[derive(Debug, Default)]
pub struct LocalHost {
    tables: Mutex<HashMap<i32, BindingTable>>,
    next_index: AtomicI32,
    events: Mutex<Vec<HostEvent>>,
    refuse_registration: AtomicBool,
}

impl LocalHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next registrations fail (or succeed again)
    pub fn refuse_registration(&self, refuse: bool) {
        self.refuse_registration.store(refuse, Ordering::SeqCst);
    }

    pub fn table(&self, index: LanguageIndex) -> Option<BindingTable> {
        self.tables.lock().get(&index.get()).copied()
    }

    pub fn active_tables(&self) -> usize {
        self.tables.lock().len()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().clone()
    }

    /// Ask the bridge for the wrapper of `host_object`
    pub fn bind(&self, index: LanguageIndex, type_tag: TypeTag, host_object: HostObject) -> Option<WrapperHandle> {
        let table = self.table(index)?;
        // Safety: registered tables point at a registration the coordinator keeps alive
        WrapperHandle::from_ptr(unsafe { table.call_create(type_tag, host_object) })
    }

    pub fn retain(&self, index: LanguageIndex, wrapper: *mut c_void) {
        if let Some(table) = self.table(index) {
            // Safety: as in `bind`
            unsafe { table.call_incref(wrapper) }
        }
    }

    /// `false` also when the index is not registered
    pub fn release(&self, index: LanguageIndex, wrapper: *mut c_void) -> bool {
        match self.table(index) {
            // Safety: as in `bind`
            Some(table) => unsafe { table.call_decref(wrapper) },
            None => false,
        }
    }

    /// Host object is going away; its wrapper goes with it
    pub fn destroy_object(&self, index: LanguageIndex, wrapper: *mut c_void) {
        if let Some(table) = self.table(index) {
            // Safety: as in `bind`
            unsafe { table.call_destroy(wrapper) }
        }
    }
}

impl HostEngine for LocalHost {
    fn register_binding_table(&self, table: BindingTable) -> Result<LanguageIndex> {
        if self.refuse_registration.load(Ordering::SeqCst) {
            return Err(BridgeError::Registration("host refused the binding table".to_string()));
        }

        let index = LanguageIndex::new(self.next_index.fetch_add(1, Ordering::SeqCst));
        self.tables.lock().insert(index.get(), table);
        self.events.lock().push(HostEvent::Registered(index));
        Ok(index)
    }

    fn unregister_binding_table(&self, index: LanguageIndex) {
        if self.tables.lock().remove(&index.get()).is_some() {
            self.events.lock().push(HostEvent::Unregistered(index));
        }
    }
}
