//! # Kernel Memory Allocation
//!
//! Physical frames, kernel heaps and the glue between them and the page
//! tables.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  KernelAllocator (GlobalAlloc)                       │
//! │    bootstrap heap ─► FreeListAllocator<BumpBreak>    │
//! │    kernel heap    ─► FreeListAllocator<PagedGrowth>  │
//! └───────────────────────────┬──────────────────────────┘
//!                             │ back_page / release_page
//! ┌───────────────────────────▼──────────────────────────┐
//! │  Vmm: AddressSpace (kernel-vmem) + frame allocator   │
//! └───────────────────────────┬──────────────────────────┘
//!                             │ allocate_frame / free_frame
//! ┌───────────────────────────▼──────────────────────────┐
//! │  FrameAllocator: one bitmap per RAM region           │
//! │    bitmaps live in RAM reached through a PhysMapper  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! - [`frame_alloc`]: the bitmap frame allocator, built from a normalized
//!   [`MemoryMap`](kernel_mmap::MemoryMap).
//! - [`phys_mapper`]: how the frame allocator reaches its bitmap storage.
//! - [`free_list`]: the next-fit free-list allocator shared by both heaps.
//! - [`growth`]: the two ways an arena grows, a fixed region or mapped pages.
//! - [`vmm`]: [`Vmm`](vmm::Vmm), [`KernelMemory`](vmm::KernelMemory) and
//!   the [`PageBacking`](vmm::PageBacking) seam.
//! - [`kernel_allocator`]: the `GlobalAlloc` front.
//!
//! ## Ordering
//!
//! The frame allocator must exist before anything is mapped, and mapping must
//! work before the kernel heap can grow. The types enforce this: a [`Vmm`](vmm::Vmm)
//! borrows a frame allocator, and a [`PagedGrowth`](growth::PagedGrowth)
//! owns its page backing. Until then the bootstrap heap serves allocations.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod bitmap;
pub mod frame_alloc;
pub mod free_list;
pub mod growth;
pub mod kernel_allocator;
pub mod phys_mapper;
pub mod static_heap;
pub mod vmm;

pub use crate::bitmap::Bitmap;
