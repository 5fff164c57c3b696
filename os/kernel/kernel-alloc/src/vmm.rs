//! Minimal Virtual Memory Manager (VMM) for the kernel.
//!
//! A [`Vmm`] pairs the active [`AddressSpace`] with a frame allocator so
//! callers can map pages without threading both through every call. It is
//! also the [`PageBacking`] the kernel heap grows through.
//!
//! # Example
//! ```ignore
//! use kernel_alloc::vmm::KernelMemory;
//! let mut memory = KernelMemory::new(frames, unsafe { AddressSpace::new(RecursiveWindow) });
//! let frame = memory.vmm().map_fresh_page(virt, PageFlags::KERNEL)?;
//! ```

use crate::frame_alloc::FrameAllocator;
use kernel_memory_addresses::{Frame, PhysicalAddress, VirtualAddress};
use kernel_sync::IrqSpinLock;
use kernel_vmem::{AddressSpace, FrameAlloc, MapError, MapMode, PageFlags, TableWindow};
use log::warn;

/// Something that can put RAM behind a single kernel page.
pub trait PageBacking {
    /// Map a fresh frame at `virt`, kernel read-write.
    ///
    /// # Errors
    /// Whatever prevented the mapping; nothing is left mapped.
    fn back_page(&mut self, virt: VirtualAddress) -> Result<(), MapError>;

    /// Undo [`back_page`](Self::back_page), returning the frame.
    fn release_page(&mut self, virt: VirtualAddress);
}

/// Minimal kernel virtual memory manager.
pub struct Vmm<'f, W: TableWindow, A: FrameAlloc + ?Sized> {
    space: &'f mut AddressSpace<W>,
    frames: &'f mut A,
}

impl<'f, W: TableWindow, A: FrameAlloc + ?Sized> Vmm<'f, W, A> {
    pub const fn new(space: &'f mut AddressSpace<W>, frames: &'f mut A) -> Self {
        Self { space, frames }
    }

    /// Map `virt` to `phys`; page tables come from the frame allocator.
    ///
    /// # Errors
    /// See [`AddressSpace::map`].
    pub fn map(
        &mut self,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        flags: PageFlags,
        mode: MapMode,
    ) -> Result<(), MapError> {
        self.space.map(self.frames, phys, virt, flags, mode)
    }

    /// Unmap `virt` and free its frame.
    ///
    /// # Errors
    /// See [`AddressSpace::unmap`].
    pub fn unmap(&mut self, virt: VirtualAddress) -> Result<Frame, MapError> {
        self.space.unmap(self.frames, virt)
    }

    /// Allocate a frame and map it at `virt`. If mapping fails the frame
    /// goes back to the allocator.
    ///
    /// # Errors
    /// - [`MapError::OutOfFrames`] if no frame is left for the page or its table.
    /// - See [`AddressSpace::map`] for the rest.
    pub fn map_fresh_page(
        &mut self,
        virt: VirtualAddress,
        flags: PageFlags,
    ) -> Result<Frame, MapError> {
        let frame = self.frames.allocate_frame().ok_or(MapError::OutOfFrames)?;
        match self
            .space
            .map(self.frames, frame.base(), virt, flags, MapMode::Fresh)
        {
            Ok(()) => Ok(frame),
            Err(err) => {
                self.frames.free_frame(frame);
                Err(err)
            }
        }
    }

    #[must_use]
    pub fn translate(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        self.space.translate(virt)
    }

    #[must_use]
    pub fn is_mapped(&self, virt: VirtualAddress) -> bool {
        self.space.is_mapped(virt)
    }

    pub const fn frames(&mut self) -> &mut A {
        self.frames
    }
}

impl<W: TableWindow, A: FrameAlloc + ?Sized> PageBacking for Vmm<'_, W, A> {
    fn back_page(&mut self, virt: VirtualAddress) -> Result<(), MapError> {
        self.map_fresh_page(virt, PageFlags::KERNEL).map(drop)
    }

    fn release_page(&mut self, virt: VirtualAddress) {
        if let Err(err) = self.unmap(virt) {
            warn!("releasing heap page {virt}: {err}");
        }
    }
}

/// The frame allocator and the address space it feeds, owned together.
pub struct KernelMemory<W: TableWindow> {
    pub frames: FrameAllocator,
    pub space: AddressSpace<W>,
}

impl<W: TableWindow> KernelMemory<W> {
    pub const fn new(frames: FrameAllocator, space: AddressSpace<W>) -> Self {
        Self { frames, space }
    }

    pub const fn vmm(&mut self) -> Vmm<'_, W, FrameAllocator> {
        Vmm::new(&mut self.space, &mut self.frames)
    }
}

impl<W: TableWindow> PageBacking for KernelMemory<W> {
    fn back_page(&mut self, virt: VirtualAddress) -> Result<(), MapError> {
        self.vmm().back_page(virt)
    }

    fn release_page(&mut self, virt: VirtualAddress) {
        self.vmm().release_page(virt);
    }
}

impl<T: PageBacking + ?Sized> PageBacking for &mut T {
    fn back_page(&mut self, virt: VirtualAddress) -> Result<(), MapError> {
        (**self).back_page(virt)
    }

    fn release_page(&mut self, virt: VirtualAddress) {
        (**self).release_page(virt);
    }
}

/// Shared kernel memory. The lock is held for one page at a time, so code
/// holding it must not allocate from a heap that grows through it.
impl<T: PageBacking> PageBacking for &IrqSpinLock<T> {
    fn back_page(&mut self, virt: VirtualAddress) -> Result<(), MapError> {
        self.with_lock(|inner| inner.back_page(virt))
    }

    fn release_page(&mut self, virt: VirtualAddress) {
        self.with_lock(|inner| inner.release_page(virt));
    }
}
