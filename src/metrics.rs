//! Bridge counters and their snapshot

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated on the callback hot path
#[derive(Debug, Default)]
pub struct BridgeCounters {
    created: AtomicU64,
    destroyed: AtomicU64,
    increfs: AtomicU64,
    decrefs: AtomicU64,
    allocation_failures: AtomicU64,
    rejected_callbacks: AtomicU64,
    lock_acquisitions: AtomicU64,
}

impl BridgeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn wrapper_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn wrapper_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incref(&self) {
        self.increfs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn decref(&self) {
        self.decrefs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn allocation_failed(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn callback_rejected(&self) {
        self.rejected_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn lock_acquired(&self) {
        self.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, live_wrappers: u64) -> BridgeStats {
        BridgeStats {
            wrappers_created: self.created.load(Ordering::Relaxed),
            wrappers_destroyed: self.destroyed.load(Ordering::Relaxed),
            live_wrappers,
            increfs: self.increfs.load(Ordering::Relaxed),
            decrefs: self.decrefs.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            rejected_callbacks: self.rejected_callbacks.load(Ordering::Relaxed),
            lock_acquisitions: self.lock_acquisitions.load(Ordering::Relaxed),
        }
    }
}

/// Bridge statistics for monitoring; C-compatible for `embedbridge_stats`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub wrappers_created: u64,
    pub wrappers_destroyed: u64,
    pub live_wrappers: u64,
    pub increfs: u64,
    pub decrefs: u64,
    pub allocation_failures: u64,
    pub rejected_callbacks: u64,
    pub lock_acquisitions: u64,
}
