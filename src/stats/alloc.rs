//! Allocation accounting for the host process.
//!
//! Install [`TrackingAllocator`] as the global allocator to get heap
//! statistics for snapshots and memory deltas for profiled calls:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: vigil_engine::TrackingAllocator = vigil_engine::TrackingAllocator;
//! ```
//!
//! Without it every counter reads zero and [`RuntimeMemStats::active`] is
//! false.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static LIVE_BYTES: AtomicU64 = AtomicU64::new(0);
static PEAK_BYTES: AtomicU64 = AtomicU64::new(0);
static TOTAL_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static DEALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Global allocator wrapper over [`System`] that keeps allocation counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackingAllocator;

#[inline]
fn record_alloc(size: u64) {
    let live = LIVE_BYTES.fetch_add(size, Ordering::Relaxed) + size;
    PEAK_BYTES.fetch_max(live, Ordering::Relaxed);
    TOTAL_ALLOCATED.fetch_add(size, Ordering::Relaxed);
    ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    if !ACTIVE.load(Ordering::Relaxed) {
        ACTIVE.store(true, Ordering::Relaxed);
    }
}

#[inline]
fn record_free(size: u64) {
    LIVE_BYTES.fetch_sub(size, Ordering::Relaxed);
    DEALLOCATIONS.fetch_add(1, Ordering::Relaxed);
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            record_alloc(layout.size() as u64);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            record_alloc(layout.size() as u64);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        record_free(layout.size() as u64);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            let old_size = layout.size() as u64;
            let new_size = new_size as u64;
            if new_size >= old_size {
                let grown = new_size - old_size;
                let live = LIVE_BYTES.fetch_add(grown, Ordering::Relaxed) + grown;
                PEAK_BYTES.fetch_max(live, Ordering::Relaxed);
                TOTAL_ALLOCATED.fetch_add(grown, Ordering::Relaxed);
            } else {
                LIVE_BYTES.fetch_sub(old_size - new_size, Ordering::Relaxed);
            }
        }
        new_ptr
    }
}

/// Point-in-time copy of the allocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeMemStats {
    /// Bytes currently allocated
    pub live_bytes: u64,
    /// Highest `live_bytes` observed
    pub peak_bytes: u64,
    /// Bytes allocated over the process lifetime
    pub total_allocated: u64,
    pub allocations: u64,
    pub deallocations: u64,
    /// True once the tracking allocator has served an allocation
    pub active: bool,
}

impl RuntimeMemStats {
    /// Allocations not yet freed
    pub fn live_objects(&self) -> u64 {
        self.allocations.saturating_sub(self.deallocations)
    }
}

/// Read the allocation counters.
pub fn runtime_stats() -> RuntimeMemStats {
    RuntimeMemStats {
        live_bytes: LIVE_BYTES.load(Ordering::Relaxed),
        peak_bytes: PEAK_BYTES.load(Ordering::Relaxed),
        total_allocated: TOTAL_ALLOCATED.load(Ordering::Relaxed),
        allocations: ALLOCATIONS.load(Ordering::Relaxed),
        deallocations: DEALLOCATIONS.load(Ordering::Relaxed),
        active: ACTIVE.load(Ordering::Relaxed),
    }
}
