//! # Address Space
//!
//! Installs and removes single 4 KiB mappings in the active address space.
//!
//! ## Design
//!
//! - Page tables are created on the first mapping inside their 4 MiB window
//!   and released when the window's last mapping goes away.
//! - All table edits go through a [`TableWindow`]; the address space never
//!   needs to know where a table lives physically.
//! - Only the page that changed is invalidated. The window page of a table is
//!   invalidated whenever the directory entry behind it changes.
//!
//! ## Safety
//!
//! The mapper trusts the window: every present directory entry must point
//! at a frame holding a valid page table.

use crate::{FrameAlloc, PageEntry, PageFlags, TableWindow, table_for};
use kernel_info::memory::MAX_PHYSICAL_ADDRESS;
use kernel_memory_addresses::{Frame, PhysicalAddress, Size4K, VirtualAddress};
use log::{debug, trace};

/// How [`AddressSpace::map`] treats a page that is already mapped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MapMode {
    /// The page must be unmapped; anything else is an error.
    Fresh,
    /// Overwrite an existing mapping. Used while taking over the boot tables.
    Bootstrap,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("no physical frame available for a page table")]
    OutOfFrames,
    #[error("virtual page is already mapped")]
    AlreadyMapped,
    #[error("virtual page is not mapped")]
    NotMapped,
    #[error("address lies inside the recursive page table window")]
    RecursiveWindow,
    #[error("address is not page aligned")]
    Unaligned,
    #[error("physical address is not reachable by 32-bit paging")]
    Unaddressable,
}

/// Handle to the active address space.
pub struct AddressSpace<W: TableWindow> {
    window: W,
}

impl<W: TableWindow> AddressSpace<W> {
    /// Take over the address space visible through `window`.
    ///
    /// # Safety
    /// - The recursive slot must be installed in the active directory.
    /// - Only one `AddressSpace` may edit the active tables at a time.
    #[inline]
    pub const unsafe fn new(window: W) -> Self {
        Self { window }
    }

    #[inline]
    pub const fn window(&self) -> &W {
        &self.window
    }

    /// Map the page at `virt` to the frame at `phys`.
    ///
    /// A missing page table is allocated from `frames` and zeroed. An
    /// existing directory entry is widened to allow user or write access
    /// if `flags` ask for it, since the directory entry restricts every page
    /// below it.
    ///
    /// # Errors
    /// - [`MapError::Unaligned`] if either address is not 4 KiB aligned.
    /// - [`MapError::Unaddressable`] if `phys` lies above 4 GiB.
    /// - [`MapError::RecursiveWindow`] if `virt` lies inside the recursive window.
    /// - [`MapError::OutOfFrames`] if a page table is needed and none can be allocated.
    /// - [`MapError::AlreadyMapped`] for a mapped page in [`MapMode::Fresh`].
    pub fn map<A: FrameAlloc + ?Sized>(
        &mut self,
        frames: &mut A,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        flags: PageFlags,
        mode: MapMode,
    ) -> Result<(), MapError> {
        if !phys.is_aligned::<Size4K>() || !virt.is_aligned::<Size4K>() {
            return Err(MapError::Unaligned);
        }
        if phys.as_u64() > MAX_PHYSICAL_ADDRESS {
            return Err(MapError::Unaddressable);
        }
        let handle = table_for(virt);
        if handle.is_recursive() {
            return Err(MapError::RecursiveWindow);
        }

        let directory = unsafe { self.window.directory() };
        let pde = &mut directory[handle.directory_index()];
        if pde.present() {
            if flags.contains(PageFlags::USER) && !pde.user() {
                pde.set_user(true);
            }
            if flags.contains(PageFlags::READ_WRITE) && !pde.writable() {
                pde.set_writable(true);
            }
        } else {
            let table_frame = frames.allocate_frame().ok_or(MapError::OutOfFrames)?;
            *pde = PageEntry::mapping(table_frame, flags | PageFlags::PRESENT);
            self.window.invalidate(handle.window());
            unsafe { self.window.table(handle) }.zero();
            debug!(
                "page table for {} at {table_frame}",
                VirtualAddress::from_indices(handle.directory_index(), 0)
            );
        }

        let table = unsafe { self.window.table(handle) };
        let pte = &mut table[virt.table_index()];
        if pte.present() {
            match mode {
                MapMode::Fresh => return Err(MapError::AlreadyMapped),
                MapMode::Bootstrap => trace!("remapping {virt} (was {})", pte.address()),
            }
        }
        *pte = PageEntry::mapping(phys.page(), flags | PageFlags::PRESENT);
        self.window.invalidate(virt);
        trace!("mapped {virt} -> {phys} {flags:?}");
        Ok(())
    }

    /// Remove the mapping of `virt` and return its frame to `frames`.
    ///
    /// The page table is released as well once it maps nothing.
    ///
    /// # Errors
    /// - [`MapError::Unaligned`] if `virt` is not 4 KiB aligned.
    /// - [`MapError::RecursiveWindow`] if `virt` lies inside the recursive window.
    /// - [`MapError::NotMapped`] if nothing is mapped at `virt`.
    pub fn unmap<A: FrameAlloc + ?Sized>(
        &mut self,
        frames: &mut A,
        virt: VirtualAddress,
    ) -> Result<Frame, MapError> {
        if !virt.is_aligned::<Size4K>() {
            return Err(MapError::Unaligned);
        }
        let handle = table_for(virt);
        if handle.is_recursive() {
            return Err(MapError::RecursiveWindow);
        }

        let directory = unsafe { self.window.directory() };
        let pde = directory[handle.directory_index()];
        if !pde.present() {
            return Err(MapError::NotMapped);
        }

        let table = unsafe { self.window.table(handle) };
        let pte = table[virt.table_index()];
        if !pte.present() {
            return Err(MapError::NotMapped);
        }
        table[virt.table_index()] = PageEntry::EMPTY;
        self.window.invalidate(virt);
        frames.free_frame(pte.frame());
        trace!("unmapped {virt} (was {})", pte.address());

        if table.is_empty() {
            directory[handle.directory_index()] = PageEntry::EMPTY;
            self.window.invalidate(handle.window());
            frames.free_frame(pde.frame());
            debug!(
                "released page table for {}",
                VirtualAddress::from_indices(handle.directory_index(), 0)
            );
        }
        Ok(pte.frame())
    }

    /// The page table entry for `virt`, if its page table exists.
    #[must_use]
    pub fn entry(&self, virt: VirtualAddress) -> Option<PageEntry> {
        let handle = table_for(virt);
        let directory = unsafe { self.window.directory() };
        if !directory[handle.directory_index()].present() {
            return None;
        }
        let table = unsafe { self.window.table(handle) };
        Some(table[virt.table_index()])
    }

    /// Physical address `virt` translates to.
    #[must_use]
    pub fn translate(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        self.entry(virt)
            .filter(PageEntry::present)
            .map(|e| e.address() + u64::from(virt.page_offset()))
    }

    #[inline]
    #[must_use]
    pub fn is_mapped(&self, virt: VirtualAddress) -> bool {
        self.entry(virt).is_some_and(|e| e.present())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft_mmu::SoftMmu;
    use crate::test_frames::BumpFrames;
    use kernel_info::memory::RECURSIVE_WINDOW_BASE;

    const FIRST: u64 = 0x100;

    fn setup() -> (AddressSpace<SoftMmu>, BumpFrames) {
        let mut frames = BumpFrames::new(FIRST, FIRST + 16);
        let directory = frames.allocate_frame().unwrap();
        let space = unsafe { AddressSpace::new(SoftMmu::new(directory)) };
        (space, frames)
    }

    #[test]
    fn first_mapping_creates_a_zeroed_table() {
        let (mut space, mut frames) = setup();
        let virt = VirtualAddress::new(0xD000_0000);
        let phys = PhysicalAddress::new(0x0030_0000);

        space
            .map(&mut frames, phys, virt, PageFlags::KERNEL, MapMode::Fresh)
            .unwrap();

        assert_eq!(frames.outstanding(FIRST), 2);
        assert_eq!(space.translate(virt + 0x123), Some(phys + 0x123));
        assert_eq!(space.window().walk(virt), Some(phys));

        // Only the new mapping is present in the fresh table.
        let entry = space.entry(virt).unwrap();
        assert_eq!(entry.flags(), PageFlags::KERNEL);
        assert!(space.entry(virt + 0x1000).is_some_and(|e| e.is_empty()));
        assert!(!space.is_mapped(virt + 0x1000));

        // Window page before the table was touched, then the page itself.
        let handle = table_for(virt);
        assert_eq!(space.window().invalidations(), [handle.window(), virt]);
    }

    #[test]
    fn fresh_refuses_to_overwrite_but_bootstrap_does() {
        let (mut space, mut frames) = setup();
        let virt = VirtualAddress::new(0xC000_0000);
        let a = PhysicalAddress::new(0x1000);
        let b = PhysicalAddress::new(0x2000);

        space.map(&mut frames, a, virt, PageFlags::KERNEL, MapMode::Fresh).unwrap();
        assert_eq!(
            space.map(&mut frames, b, virt, PageFlags::KERNEL, MapMode::Fresh),
            Err(MapError::AlreadyMapped)
        );
        assert_eq!(space.translate(virt), Some(a));

        space
            .map(&mut frames, b, virt, PageFlags::KERNEL, MapMode::Bootstrap)
            .unwrap();
        assert_eq!(space.translate(virt), Some(b));
    }

    #[test]
    fn rejects_bad_addresses() {
        let (mut space, mut frames) = setup();
        let ok = PhysicalAddress::new(0x1000);
        let cases = [
            (ok, VirtualAddress::new(0x1234), MapError::Unaligned),
            (PhysicalAddress::new(0x1001), VirtualAddress::new(0x1000), MapError::Unaligned),
            (
                PhysicalAddress::new(0x1_0000_0000),
                VirtualAddress::new(0x1000),
                MapError::Unaddressable,
            ),
            (ok, VirtualAddress::new(RECURSIVE_WINDOW_BASE), MapError::RecursiveWindow),
            (ok, VirtualAddress::new(0xFFFF_F000), MapError::RecursiveWindow),
        ];
        for (phys, virt, expected) in cases {
            assert_eq!(
                space.map(&mut frames, phys, virt, PageFlags::KERNEL, MapMode::Fresh),
                Err(expected)
            );
        }
        assert_eq!(frames.outstanding(FIRST), 1);
    }

    #[test]
    fn out_of_frames_leaves_the_directory_untouched() {
        let mut frames = BumpFrames::new(FIRST, FIRST + 1);
        let directory = frames.allocate_frame().unwrap();
        let mut space = unsafe { AddressSpace::new(SoftMmu::new(directory)) };
        let virt = VirtualAddress::new(0x0040_0000);

        assert_eq!(
            space.map(
                &mut frames,
                PhysicalAddress::new(0x5000),
                virt,
                PageFlags::KERNEL,
                MapMode::Fresh
            ),
            Err(MapError::OutOfFrames)
        );
        assert!(space.entry(virt).is_none());
    }

    #[test]
    fn last_unmap_releases_the_table() {
        let (mut space, mut frames) = setup();
        let first = VirtualAddress::new(0xD000_0000);
        let second = VirtualAddress::new(0xD000_1000);
        let data_a = frames.allocate_frame().unwrap();
        let data_b = frames.allocate_frame().unwrap();

        space
            .map(&mut frames, data_a.base(), first, PageFlags::KERNEL, MapMode::Fresh)
            .unwrap();
        space
            .map(&mut frames, data_b.base(), second, PageFlags::KERNEL, MapMode::Fresh)
            .unwrap();
        assert_eq!(frames.outstanding(FIRST), 4);

        assert_eq!(space.unmap(&mut frames, first), Ok(data_a));
        assert!(space.entry(first).is_some());
        assert_eq!(frames.outstanding(FIRST), 3);

        assert_eq!(space.unmap(&mut frames, second), Ok(data_b));
        assert!(space.entry(second).is_none());
        assert_eq!(frames.outstanding(FIRST), 1);
        assert_eq!(space.unmap(&mut frames, second), Err(MapError::NotMapped));
    }

    #[test]
    fn user_mapping_widens_a_kernel_table() {
        let (mut space, mut frames) = setup();
        let kernel = VirtualAddress::new(0x0800_0000);
        let user = VirtualAddress::new(0x0800_1000);

        let (a, b) = (PhysicalAddress::new(0x1000), PhysicalAddress::new(0x2000));

        space.map(&mut frames, a, kernel, PageFlags::KERNEL, MapMode::Fresh).unwrap();
        space.map(&mut frames, b, user, PageFlags::USER_RW, MapMode::Fresh).unwrap();

        let directory = unsafe { space.window().directory() };
        assert!(directory[table_for(user).directory_index()].user());
        assert!(!space.entry(kernel).unwrap().user());
        assert!(space.entry(user).unwrap().user());
    }
}
