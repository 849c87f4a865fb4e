//! Host engine - the object system the bridge registers with
//!
//! Design: The coordinator only needs two host operations, so the seam is a
//! small trait:
//! 1. `CHost` - function pointers handed over by a C host at library init
//! 2. `LocalHost` - in-process host that drives callbacks itself

mod c_host;
mod local;

#[cfg(test)]
mod tests;

pub use c_host::{CHost, HostApi};
pub use local::{HostEvent, LocalHost};

use crate::binding::{BindingTable, LanguageIndex};
use crate::error::Result;

pub trait HostEngine: Send + Sync {
    /// Hand the binding table to the host; returns the index it filed it under
    fn register_binding_table(&self, table: BindingTable) -> Result<LanguageIndex>;

    /// Withdraw a table. The host must not invoke it afterwards.
    fn unregister_binding_table(&self, index: LanguageIndex);
}

impl<H: HostEngine + ?Sized> HostEngine for std::sync::Arc<H> {
    fn register_binding_table(&self, table: BindingTable) -> Result<LanguageIndex> {
        (**self).register_binding_table(table)
    }

    fn unregister_binding_table(&self, index: LanguageIndex) {
        (**self).unregister_binding_table(index)
    }
}
