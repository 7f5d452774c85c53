//! Global allocator
//!
//! The core crate keeps its queue, reminders and JSON documents in `alloc`
//! collections. They live in a fixed region of main SRAM managed by a
//! linked-list first-fit allocator.

#![allow(unsafe_code)] // Required for the static heap region

use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

use defmt::info;
use embedded_alloc::LlffHeap as Heap;

/// Heap size: 48 KB of the 128 KB main SRAM. TLS buffers (34 KB) and the
/// socket buffers in the network task's future take most of the rest.
pub const HEAP_SIZE: usize = 48 * 1024;

#[global_allocator]
static HEAP: Heap = Heap::empty();

/// Lowest free-heap reading seen by [`stats`]
static LOW_WATER: AtomicUsize = AtomicUsize::new(HEAP_SIZE);

/// Hand the heap region to the allocator
///
/// Must be called exactly once from `init`, before anything allocates.
pub fn init() {
    static mut HEAP_MEM: [MaybeUninit<u8>; HEAP_SIZE] = [MaybeUninit::uninit(); HEAP_SIZE];
    // SAFETY: called once before the first allocation; HEAP_MEM is not
    // referenced anywhere else.
    unsafe { HEAP.init(core::ptr::addr_of_mut!(HEAP_MEM) as usize, HEAP_SIZE) }
    info!("Heap initialized: {} bytes", HEAP_SIZE);
}

/// Free-heap snapshot
#[derive(Debug, Clone, Copy, defmt::Format)]
pub struct HeapStats {
    pub free: usize,
    pub min_free: usize,
    pub size: usize,
}

pub fn stats() -> HeapStats {
    let free = HEAP.free();
    let min_free = LOW_WATER.fetch_min(free, Ordering::Relaxed).min(free);
    HeapStats {
        free,
        min_free,
        size: HEAP_SIZE,
    }
}
