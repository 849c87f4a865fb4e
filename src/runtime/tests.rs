//! Tests for the managed runtime

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn started() -> (ManagedRuntime, TempDir) {
    let home = TempDir::new().unwrap();
    let runtime = ManagedRuntime::new();
    runtime.initialize(&RuntimeSettings::new(home.path())).unwrap();
    (runtime, home)
}

fn alloc(runtime: &ManagedRuntime, addr: usize) -> WrapperHandle {
    runtime
        .alloc_wrapper(HostObject::from_addr(addr), TypeTag::new(7), "_Wrapped")
        .unwrap()
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_initialize_requires_directory() {
        let runtime = ManagedRuntime::new();
        let err = runtime
            .initialize(&RuntimeSettings::new("/nonexistent/embedbridge/home"))
            .unwrap_err();

        assert!(matches!(err, RuntimeError::InitFailed(_)));
        assert!(!runtime.is_initialized());
    }

    #[test]
    fn test_initialize_twice() {
        let (runtime, home) = started();
        assert_eq!(
            runtime.initialize(&RuntimeSettings::new(home.path())),
            Err(RuntimeError::AlreadyInitialized)
        );
        assert_eq!(runtime.settings().unwrap().home, home.path());
    }

    #[test]
    fn test_register_module_after_start_refused() {
        let (runtime, _home) = started();
        assert_eq!(
            runtime.register_module(ModuleSpec::named("late")),
            Err(RuntimeError::AlreadyInitialized)
        );
    }

    #[test]
    fn test_finalize_reclaims_objects() {
        let (runtime, _home) = started();
        alloc(&runtime, 0x1000);
        alloc(&runtime, 0x2000);
        assert_eq!(runtime.live_objects(), 2);

        runtime.finalize().unwrap();
        assert_eq!(runtime.live_objects(), 0);
        assert_eq!(runtime.finalizations(), 1);
        assert!(runtime.settings().is_none());
        assert_eq!(runtime.finalize(), Err(RuntimeError::NotInitialized));
    }

    #[test]
    fn test_restart_after_finalize() {
        let (runtime, home) = started();
        runtime.finalize().unwrap();
        runtime.initialize(&RuntimeSettings::new(home.path())).unwrap();
        assert!(runtime.is_initialized());
    }
}

#[cfg(test)]
mod module_tests {
    use super::*;

    #[test]
    fn test_builtin_module_initialized_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let home = TempDir::new().unwrap();
        let runtime = ManagedRuntime::new();
        runtime
            .register_module(ModuleSpec::builtin("core_types", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        runtime.initialize(&RuntimeSettings::new(home.path())).unwrap();

        runtime.import_module("core_types").unwrap();
        runtime.import_module("core_types").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(runtime.is_imported("core_types"));
    }

    #[test]
    fn test_unknown_module() {
        let (runtime, _home) = started();
        assert_eq!(
            runtime.import_module("missing"),
            Err(RuntimeError::UnknownModule("missing".to_string()))
        );
    }

    #[test]
    fn test_failing_initializer() {
        let home = TempDir::new().unwrap();
        let runtime = ManagedRuntime::new();
        runtime
            .register_module(ModuleSpec::builtin("broken", || Err("boom".to_string())))
            .unwrap();
        runtime.initialize(&RuntimeSettings::new(home.path())).unwrap();

        let err = runtime.import_module("broken").unwrap_err();
        assert_eq!(
            err,
            RuntimeError::ImportFailed { module: "broken".to_string(), reason: "boom".to_string() }
        );
        assert!(!runtime.is_imported("broken"));
    }

    #[test]
    fn test_import_before_start() {
        let runtime = ManagedRuntime::new();
        assert_eq!(runtime.import_module("anything"), Err(RuntimeError::NotInitialized));
    }
}

#[cfg(test)]
mod object_tests {
    use super::*;

    #[test]
    fn test_alloc_holds_creation_reference() {
        let (runtime, _home) = started();
        let handle = alloc(&runtime, 0x1000);
        assert_eq!(runtime.refcount(handle), CREATION_REFERENCE);
    }

    #[test]
    fn test_retain_release() {
        let (runtime, _home) = started();
        let handle = alloc(&runtime, 0x1000);

        runtime.retain(handle);
        runtime.retain(handle);
        assert_eq!(runtime.refcount(handle), 3);

        assert_eq!(runtime.release(handle), 2);
        assert_eq!(runtime.release(handle), 1);
        assert_eq!(runtime.live_objects(), 1);
    }

    #[test]
    fn test_last_release_reclaims() {
        let (runtime, _home) = started();
        let handle = alloc(&runtime, 0x1000);

        assert_eq!(runtime.release(handle), 0);
        assert_eq!(runtime.live_objects(), 0);
        assert_eq!(runtime.refcount(handle), 0);
    }

    #[test]
    fn test_free_ignores_count() {
        let (runtime, _home) = started();
        let handle = alloc(&runtime, 0x1000);
        runtime.retain(handle);
        runtime.retain(handle);

        runtime.free_wrapper(handle, 3);
        assert_eq!(runtime.live_objects(), 0);
    }

    #[test]
    fn test_unknown_handle_is_not_dereferenced() {
        let (runtime, _home) = started();
        let bogus = WrapperHandle::from_addr(0xdead_0000).unwrap();

        runtime.retain(bogus);
        assert_eq!(runtime.release(bogus), 0);
        assert_eq!(runtime.refcount(bogus), 0);
        runtime.free_wrapper(bogus, 1);
    }

    #[test]
    fn test_object_limit() {
        let home = TempDir::new().unwrap();
        let runtime = ManagedRuntime::with_object_limit(1);
        runtime.initialize(&RuntimeSettings::new(home.path())).unwrap();

        alloc(&runtime, 0x1000);
        let err = runtime
            .alloc_wrapper(HostObject::from_addr(0x2000), TypeTag::new(7), "_Wrapped")
            .unwrap_err();
        assert!(matches!(err, RuntimeError::AllocationFailed(_)));
    }

    #[test]
    fn test_alloc_before_start() {
        let runtime = ManagedRuntime::new();
        let err = runtime
            .alloc_wrapper(HostObject::from_addr(0x1000), TypeTag::new(7), "_Wrapped")
            .unwrap_err();
        assert_eq!(err, RuntimeError::NotInitialized);
    }
}

#[cfg(test)]
mod lock_tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_lock_is_reentrant() {
        let runtime = ManagedRuntime::new();
        let value = runtime.with_lock(|| runtime.with_lock(|| 42));

        assert_eq!(value, 42);
        assert_eq!(runtime.lock_acquisitions(), 2);
    }

    #[test]
    fn test_lock_serializes_threads() {
        let (runtime, _home) = started();
        let runtime = Arc::new(runtime);
        let handle = alloc(&runtime, 0x1000);
        let addr = handle.addr();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let runtime = Arc::clone(&runtime);
                thread::spawn(move || {
                    let handle = WrapperHandle::from_addr(addr).unwrap();
                    for _ in 0..100 {
                        runtime.with_lock(|| {
                            runtime.retain(handle);
                            runtime.release(handle);
                        });
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(runtime.refcount(handle), CREATION_REFERENCE);
        assert_eq!(runtime.lock_acquisitions(), 800);
    }
}
