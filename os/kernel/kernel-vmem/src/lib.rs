//! # Virtual Memory Support
//!
//! 32-bit two-level paging for the higher-half kernel.
//!
//! ## What you get
//! - Protection [`PageFlags`] and the raw [`PageEntry`] bitfield.
//! - A 4 KiB-aligned [`PageTable`] (the page directory has the same shape).
//! - The recursive window: [`table_for`], [`TableHandle`] and the
//!   [`TableWindow`] seam with its hardware implementation [`RecursiveWindow`].
//! - An [`AddressSpace`] that creates tables lazily, installs and removes
//!   single 4 KiB mappings and translates addresses.
//! - The page-fault policy in [`fault`].
//!
//! ## Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//!
//!  CR3 ─► Page Directory ──PDE──► Page Table ──PTE──► 4 KiB page
//! ```
//!
//! ## Recursive Mapping
//!
//! Directory slot [`RECURSIVE_SLOT`](kernel_info::memory::RECURSIVE_SLOT)
//! points at the directory itself. A walk through that slot stops one level
//! early, so the page tables show up as ordinary pages:
//!
//! | Virtual address | What is there |
//! |:----------------|:--------------|
//! | `0xFFC0_0000 + i * 4096` | page table `i` (if PDE `i` is present) |
//! | `0xFFFF_F000` | the page directory |
//!
//! No physical-to-virtual mapping is needed to edit the tables; the window
//! page of a freshly installed table must be invalidated before it is
//! touched, because the TLB may still hold the previous translation.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

extern crate alloc;

mod address_space;
mod entry;
pub mod fault;
mod flags;
#[cfg(any(test, feature = "soft-mmu"))]
pub mod soft_mmu;
mod table;
mod window;

pub use crate::address_space::{AddressSpace, MapError, MapMode};
pub use crate::entry::PageEntry;
pub use crate::flags::PageFlags;
pub use crate::table::{PageDirectory, PageTable, TableHandle, table_for};
pub use crate::window::{RecursiveWindow, TableWindow};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::Frame;

/// Source of physical 4 KiB frames for page tables and mappings.
///
/// The mapper allocates a frame whenever a 4 MiB window gets its first
/// mapping and returns it when the window's last page is unmapped.
pub trait FrameAlloc {
    /// Allocate one frame, or `None` if physical memory is exhausted.
    fn allocate_frame(&mut self) -> Option<Frame>;

    /// Return a frame obtained from [`allocate_frame`](Self::allocate_frame).
    fn free_frame(&mut self, frame: Frame);
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &mut A {
    #[inline]
    fn allocate_frame(&mut self) -> Option<Frame> {
        (**self).allocate_frame()
    }

    #[inline]
    fn free_frame(&mut self, frame: Frame) {
        (**self).free_frame(frame);
    }
}
