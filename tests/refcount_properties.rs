use embedbridge::{
    Bridge, EmbeddedRuntime, HostObject, ManagedRuntime, RuntimeSettings, TypeRegistry, TypeTag,
    WrapperHandle,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn bridge_with(strict: bool, default_type: Option<&str>) -> (Arc<Bridge<ManagedRuntime>>, TempDir) {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(ManagedRuntime::new());
    runtime.initialize(&RuntimeSettings::new(home.path())).unwrap();

    let types = Arc::new(TypeRegistry::new(default_type.map(str::to_string)));
    (Arc::new(Bridge::new(runtime, types, strict)), home)
}

fn open(bridge: &Arc<Bridge<ManagedRuntime>>) {
    bridge.open(&bridge.registration());
}

fn open_bridge() -> (Arc<Bridge<ManagedRuntime>>, TempDir) {
    let (bridge, home) = bridge_with(false, Some("_Wrapped"));
    open(&bridge);
    (bridge, home)
}

fn create(bridge: &Bridge<ManagedRuntime>, addr: usize) -> WrapperHandle {
    bridge
        .on_create(TypeTag::new(1), HostObject::from_addr(addr))
        .expect("wrapper")
}

proptest! {
    #[test]
    fn prop_counts_track_host_calls(ops in prop::collection::vec(any::<bool>(), 0..64)) {
        let (bridge, _home) = open_bridge();
        let wrapper = create(&bridge, 0x1000);
        let mut expected: u64 = 0;

        for incref in ops {
            if incref {
                bridge.on_incref(wrapper.as_ptr());
                expected += 1;
            } else if expected > 0 {
                prop_assert!(bridge.on_decref(wrapper.as_ptr()));
                expected -= 1;
            } else {
                continue;
            }

            prop_assert_eq!(bridge.refcounts().host_retains(wrapper), Some(expected));
            prop_assert_eq!(bridge.runtime().refcount(wrapper), 1 + expected as usize);
        }

        bridge.on_destroy(wrapper.as_ptr());
        prop_assert_eq!(bridge.live_wrappers(), 0);
        prop_assert_eq!(bridge.runtime().live_objects(), 0);
    }
}

#[test]
fn test_create_null_allocates_nothing() {
    let (bridge, _home) = open_bridge();

    assert!(bridge.on_create(TypeTag::new(1), HostObject::null()).is_none());
    assert_eq!(bridge.runtime().live_objects(), 0);
    assert_eq!(bridge.stats().wrappers_created, 0);
}

#[test]
fn test_null_wrapper_is_a_no_op() {
    let (bridge, _home) = open_bridge();

    bridge.on_incref(std::ptr::null_mut());
    assert!(!bridge.on_decref(std::ptr::null_mut()));
    bridge.on_destroy(std::ptr::null_mut());

    let stats = bridge.stats();
    assert_eq!(stats.increfs, 0);
    assert_eq!(stats.decrefs, 0);
}

#[test]
fn test_unknown_wrapper_is_ignored() {
    let (bridge, _home) = open_bridge();
    let stray = 0xdead_0000 as *mut std::ffi::c_void;

    bridge.on_incref(stray);
    assert!(!bridge.on_decref(stray));
    bridge.on_destroy(stray);
    assert_eq!(bridge.stats().wrappers_destroyed, 0);
}

#[test]
fn test_destroy_with_outstanding_retains() {
    let (bridge, _home) = open_bridge();
    let wrapper = create(&bridge, 0x1000);
    bridge.on_incref(wrapper.as_ptr());
    bridge.on_incref(wrapper.as_ptr());

    bridge.on_destroy(wrapper.as_ptr());
    assert_eq!(bridge.runtime().live_objects(), 0);
    assert!(bridge.registry().get(wrapper).is_none());
}

#[test]
fn test_allocation_failure_returns_null() {
    let home = TempDir::new().unwrap();
    let runtime = Arc::new(ManagedRuntime::with_object_limit(1));
    runtime.initialize(&RuntimeSettings::new(home.path())).unwrap();
    let bridge = Arc::new(Bridge::new(runtime, Arc::new(TypeRegistry::new(Some("_Wrapped".into()))), false));
    open(&bridge);

    assert!(bridge.on_create(TypeTag::new(1), HostObject::from_addr(0x1000)).is_some());
    assert!(bridge.on_create(TypeTag::new(1), HostObject::from_addr(0x2000)).is_none());

    let stats = bridge.stats();
    assert_eq!(stats.allocation_failures, 1);
    assert_eq!(stats.live_wrappers, 1);
}

#[test]
fn test_unknown_tag_without_default_type() {
    let (bridge, _home) = bridge_with(false, None);
    open(&bridge);

    assert!(bridge.on_create(TypeTag::new(3), HostObject::from_addr(0x1000)).is_none());
    assert_eq!(bridge.stats().allocation_failures, 1);
}

#[test]
#[should_panic(expected = "refcount underflow")]
fn test_decref_below_zero_is_fatal() {
    let (bridge, _home) = open_bridge();
    let wrapper = create(&bridge, 0x1000);
    bridge.on_decref(wrapper.as_ptr());
}

#[test]
#[should_panic(expected = "refusing to wrap it twice")]
fn test_double_wrap_is_fatal() {
    let (bridge, _home) = open_bridge();
    create(&bridge, 0x1000);
    create(&bridge, 0x1000);
}

#[test]
fn test_callbacks_outside_window_are_rejected() {
    let (bridge, _home) = bridge_with(false, Some("_Wrapped"));

    assert!(bridge.on_create(TypeTag::new(1), HostObject::from_addr(0x1000)).is_none());
    assert!(!bridge.on_decref(0x1000 as *mut _));
    assert_eq!(bridge.stats().rejected_callbacks, 2);
    assert_eq!(bridge.runtime().live_objects(), 0);
}

#[test]
#[should_panic(expected = "outside the registration window")]
fn test_strict_mode_rejection_is_fatal() {
    let (bridge, _home) = bridge_with(true, Some("_Wrapped"));
    bridge.on_incref(0x1000 as *mut _);
}

#[test]
fn test_each_callback_takes_the_lock_once() {
    let (bridge, _home) = open_bridge();
    let before = bridge.runtime().lock_acquisitions();

    let wrapper = create(&bridge, 0x1000);
    bridge.on_incref(wrapper.as_ptr());
    bridge.on_decref(wrapper.as_ptr());
    bridge.on_destroy(wrapper.as_ptr());

    assert_eq!(bridge.runtime().lock_acquisitions() - before, 4);
    assert_eq!(bridge.stats().lock_acquisitions, 4);
}

#[test]
fn test_concurrent_retain_release_balances() {
    let (bridge, _home) = open_bridge();
    let wrapper = create(&bridge, 0x1000);
    let addr = wrapper.addr();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                for _ in 0..500 {
                    bridge.on_incref(addr as *mut _);
                    assert!(bridge.on_decref(addr as *mut _));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(bridge.refcounts().host_retains(wrapper), Some(0));
    assert_eq!(bridge.runtime().refcount(wrapper), 1);
    assert_eq!(bridge.stats().increfs, 4000);
    assert_eq!(bridge.stats().decrefs, 4000);
}

#[test]
fn test_many_host_objects() {
    let (bridge, _home) = open_bridge();
    let wrappers: Vec<_> = (0..64).map(|i| create(&bridge, 0x1000 + i * 0x40)).collect();
    assert_eq!(bridge.live_wrappers(), 64);

    for wrapper in &wrappers {
        bridge.on_destroy(wrapper.as_ptr());
    }
    assert_eq!(bridge.live_wrappers(), 0);
    assert_eq!(bridge.stats().wrappers_destroyed, 64);
}

#[test]
fn test_only_the_open_registration_is_served() {
    let (bridge, _home) = bridge_with(false, Some("_Wrapped"));
    let first = bridge.registration();
    let second = bridge.registration();
    assert_ne!(first.generation(), second.generation());

    bridge.open(&first);
    let wrapper = first.on_create(TypeTag::new(1), HostObject::from_addr(0x1000)).expect("wrapper");
    assert!(second.on_create(TypeTag::new(1), HostObject::from_addr(0x2000)).is_none());

    bridge.open(&second);
    first.on_destroy(wrapper.as_ptr());
    assert_eq!(bridge.live_wrappers(), 1);
    second.on_destroy(wrapper.as_ptr());
    assert_eq!(bridge.live_wrappers(), 0);
    assert_eq!(bridge.stats().rejected_callbacks, 2);
}
