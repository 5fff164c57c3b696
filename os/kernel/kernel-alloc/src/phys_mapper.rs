//! # Access to Physical Memory
//!
//! The frame allocator keeps its bitmaps in physical memory it carves out of
//! the memory map. Code can only dereference virtual addresses, so it needs a
//! way to "see" that memory. [`PhysMapper`] abstracts over how:
//!
//! - **Kernel**: the boot code maps the first
//!   [`BOOT_MAPPED_BYTES`](kernel_info::memory::BOOT_MAPPED_BYTES) of
//!   physical memory at [`KERNEL_VIRTUAL_OFFSET`]; [`HigherHalfPhysMapper`]
//!   adds that offset.
//! - **Tests**: a mapper backed by host memory.

use kernel_info::memory::{BOOT_MAPPED_BYTES, KERNEL_VIRTUAL_OFFSET};
use kernel_memory_addresses::PhysicalAddress;

/// Converts physical addresses to usable pointers in the current address
/// space.
pub trait PhysMapper {
    /// Highest physical address (exclusive) this mapper can reach.
    fn reach(&self) -> u64;

    /// View `words` `u32`s of physical memory starting at `pa`.
    ///
    /// # Safety
    /// - `[pa, pa + 4 * words)` must lie below [`reach`](Self::reach) and be
    ///   RAM nobody else uses for `'a`.
    /// - `pa` must be 4-byte aligned.
    unsafe fn phys_to_mut_slice<'a>(&self, pa: PhysicalAddress, words: usize) -> &'a mut [u32];
}

/// [`PhysMapper`] for the boot-time higher-half alias of low physical memory.
#[derive(Debug, Default, Copy, Clone)]
pub struct HigherHalfPhysMapper;

impl PhysMapper for HigherHalfPhysMapper {
    #[inline]
    fn reach(&self) -> u64 {
        BOOT_MAPPED_BYTES
    }

    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_mut_slice<'a>(&self, pa: PhysicalAddress, words: usize) -> &'a mut [u32] {
        debug_assert!(pa.as_u64() + (words as u64) * 4 <= self.reach());
        let va = (pa.as_u64() as usize + KERNEL_VIRTUAL_OFFSET as usize) as *mut u32;
        // SAFETY: Caller ensures the range is mapped through the boot alias and unused.
        unsafe { core::slice::from_raw_parts_mut(va, words) }
    }
}
