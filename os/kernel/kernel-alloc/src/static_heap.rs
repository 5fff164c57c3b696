//! # Static Heap
//!
//! The bootstrap heap lives in `.bss`, so it is usable before the frame
//! allocator exists.

use crate::growth::BumpBreak;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_info::memory::BOOTSTRAP_HEAP_SIZE;

/// Backing storage for the bootstrap heap, placed in a dedicated `.bss` section.
#[cfg_attr(target_os = "none", unsafe(link_section = ".bss.heap"))]
static mut HEAP: HeapMem = HeapMem([0; BOOTSTRAP_HEAP_SIZE]);

/// Set once the region has been handed out.
static TAKEN: AtomicBool = AtomicBool::new(false);

/// Heap storage aligned for the free-list headers.
#[repr(align(16))]
struct HeapMem([u8; BOOTSTRAP_HEAP_SIZE]);

/// Hand out the static region as a [`BumpBreak`]. Only the first call gets it.
pub fn take_bootstrap_region() -> Option<BumpBreak> {
    if TAKEN.swap(true, Ordering::AcqRel) {
        return None;
    }
    let base = NonNull::new((&raw mut HEAP).cast::<u8>())?;
    // SAFETY: The swap above guarantees exclusive ownership of `HEAP`, which
    // is 16-byte aligned and lives forever.
    Some(unsafe { BumpBreak::new(base, BOOTSTRAP_HEAP_SIZE) })
}
