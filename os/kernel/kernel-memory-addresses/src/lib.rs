//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the raw addresses used by the 32-bit paging and
//! frame allocation code.
//!
//! ## Overview
//!
//! | Type | Width | Description |
//! |------|-------|-------------|
//! | [`PhysicalAddress`] | `u64` | Physical memory (RAM, firmware tables, MMIO). |
//! | [`VirtualAddress`] | `u32` | Addresses translated by the two-level page tables. |
//! | [`PhysicalPage<S>`] / [`Frame`] | – | Page-aligned physical base; frames are identified by index. |
//! | [`VirtualPage<S>`] / [`Page`] | – | Page-aligned virtual base. |
//!
//! Physical addresses stay 64 bits wide so that memory reported above the
//! 4 GiB boundary can still be described (and then discarded) without
//! truncation. Virtual addresses are exactly as wide as the CPU's.
//!
//! ## Page Sizes
//!
//! - [`Size4K`]: the mapping granularity and frame size.
//! - [`Size4M`]: the span of one page directory entry.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0009_FC00);
//! assert_eq!(pa.align_up::<Size4K>().as_u64(), 0x000A_0000);
//!
//! let va = VirtualAddress::new(0xFFC0_3000);
//! assert_eq!(va.directory_index(), 1023);
//! assert_eq!(va.table_index(), 3);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use page_size::{PageSize, Size4K, Size4M};
pub use physical_address::PhysicalAddress;
pub use physical_page::{Frame, PhysicalPage};
pub use virtual_address::{ENTRIES_PER_TABLE, VirtualAddress};
pub use virtual_page::{Page, VirtualPage};

/// Size of a frame / page in bytes.
pub const PAGE_SIZE: u64 = Size4K::SIZE;

/// Align `x` down to the nearest multiple of `align` (power of two).
///
/// ```
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0x1fff, 0x1000), 0x1000);
/// assert_eq!(align_down(0x2000, 0x1000), 0x2000);
/// ```
#[inline]
#[must_use]
pub const fn align_down(x: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    x & !(align - 1)
}

/// Align `x` up to the nearest multiple of `align` (power of two).
///
/// Saturates at the highest aligned value instead of overflowing.
///
/// ```
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0x1001, 0x1000), 0x2000);
/// assert_eq!(align_up(0x1000, 0x1000), 0x1000);
/// assert_eq!(align_up(u64::MAX, 0x1000), u64::MAX & !0xfff);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    match x.checked_add(align - 1) {
        Some(v) => v & !(align - 1),
        None => x & !(align - 1),
    }
}

/// Number of whole `S` pages inside `[start, end)` after rounding `start` up
/// and `end` down.
///
/// ```
/// # use kernel_memory_addresses::*;
/// let n = whole_pages::<Size4K>(PhysicalAddress::new(0x500), PhysicalAddress::new(0x7C00));
/// assert_eq!(n, 6);
/// ```
#[inline]
#[must_use]
pub const fn whole_pages<S: PageSize>(start: PhysicalAddress, end: PhysicalAddress) -> u64 {
    let first = align_up(start.as_u64(), S::SIZE);
    let last = align_down(end.as_u64(), S::SIZE);
    if last > first {
        (last - first) >> S::SHIFT
    } else {
        0
    }
}
