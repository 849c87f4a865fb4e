//! Tests for host engine adapters

use super::*;
use crate::binding::{HostObject, TypeTag};
use crate::bootstrap::TypeRegistry;
use crate::bridge::{Bridge, Registration};
use crate::error::BridgeError;
use crate::runtime::{EmbeddedRuntime, ManagedRuntime, RuntimeSettings};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn open_registration() -> (Arc<Registration<ManagedRuntime>>, TempDir) {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(ManagedRuntime::new());
    runtime.initialize(&RuntimeSettings::new(home.path())).unwrap();

    let bridge = Arc::new(Bridge::new(runtime, Arc::new(TypeRegistry::new(Some("_Wrapped".into()))), false));
    let registration = bridge.registration();
    bridge.open(&registration);
    (registration, home)
}

#[cfg(test)]
mod local_host_tests {
    use super::*;

    #[test]
    fn test_indices_increase() {
        let (registration, _home) = open_registration();
        let host = LocalHost::new();

        let first = host.register_binding_table(BindingTable::for_registration(&registration)).unwrap();
        host.unregister_binding_table(first);
        let second = host.register_binding_table(BindingTable::for_registration(&registration)).unwrap();

        assert_ne!(first, second);
        assert_eq!(
            host.events(),
            vec![
                HostEvent::Registered(first),
                HostEvent::Unregistered(first),
                HostEvent::Registered(second),
            ]
        );
        assert_eq!(host.active_tables(), 1);
    }

    #[test]
    fn test_unregistered_table_is_not_called() {
        let (registration, _home) = open_registration();
        let bridge = registration.bridge();
        let host = LocalHost::new();
        let index = host.register_binding_table(BindingTable::for_registration(&registration)).unwrap();
        host.unregister_binding_table(index);

        assert!(host.bind(index, TypeTag::new(1), HostObject::from_addr(0x1000)).is_none());
        assert!(!host.release(index, 0x1000 as *mut _));
        assert_eq!(bridge.stats().lock_acquisitions, 0);
    }

    #[test]
    fn test_drives_callbacks() {
        let (registration, _home) = open_registration();
        let bridge = registration.bridge();
        let host = LocalHost::new();
        let index = host.register_binding_table(BindingTable::for_registration(&registration)).unwrap();

        let wrapper = host.bind(index, TypeTag::new(1), HostObject::from_addr(0x1000)).unwrap();
        host.retain(index, wrapper.as_ptr());
        assert!(host.release(index, wrapper.as_ptr()));
        host.destroy_object(index, wrapper.as_ptr());

        assert_eq!(bridge.live_wrappers(), 0);
        assert_eq!(bridge.stats().lock_acquisitions, 4);
    }

    #[test]
    fn test_refused_registration() {
        let (registration, _home) = open_registration();
        let host = LocalHost::new();
        host.refuse_registration(true);

        let err = host.register_binding_table(BindingTable::for_registration(&registration)).unwrap_err();
        assert!(matches!(err, BridgeError::Registration(_)));
        assert!(host.events().is_empty());
    }
}

#[cfg(test)]
mod c_host_tests {
    use super::*;

    static LAST_UNREGISTERED: AtomicI32 = AtomicI32::new(-1);

    unsafe extern "C" fn register_ok(_table: BindingTable) -> i32 {
        5
    }

    unsafe extern "C" fn register_refused(_table: BindingTable) -> i32 {
        -1
    }

    unsafe extern "C" fn unregister(index: i32) {
        LAST_UNREGISTERED.store(index, Ordering::SeqCst);
    }

    #[test]
    fn test_c_host_round_trip() {
        let (registration, _home) = open_registration();
        let host = CHost::new(HostApi {
            register_binding_functions: register_ok,
            unregister_binding_functions: unregister,
        });

        let index = host.register_binding_table(BindingTable::for_registration(&registration)).unwrap();
        assert_eq!(index, LanguageIndex::new(5));

        host.unregister_binding_table(index);
        assert_eq!(LAST_UNREGISTERED.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_negative_index_is_an_error() {
        let (registration, _home) = open_registration();
        let host = CHost::new(HostApi {
            register_binding_functions: register_refused,
            unregister_binding_functions: unregister,
        });

        let err = host.register_binding_table(BindingTable::for_registration(&registration)).unwrap_err();
        assert!(err.to_string().contains("-1"));
    }
}
