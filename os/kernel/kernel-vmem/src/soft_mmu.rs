//! A software MMU for hosted tests.
//!
//! [`SoftMmu`] owns simulated RAM (one [`PageTable`]-shaped buffer per
//! touched frame) and resolves window addresses exactly like the CPU does:
//! directory frame, then the entry selected by bits 31..22, then the entry
//! selected by bits 21..12. The recursive slot is an ordinary directory
//! entry here too, so a mapper that forgets to install or honour it fails
//! the same way it would on hardware.
//!
//! Frames that have never been written are filled with junk that looks
//! like present entries, so skipping the zeroing of a new table is caught.

use crate::fault::do_page_fault;
use crate::{PageDirectory, PageEntry, PageFlags, PageTable, TableHandle, TableWindow};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cell::RefCell;
use kernel_info::memory::{DIRECTORY_WINDOW, RECURSIVE_SLOT};
use kernel_memory_addresses::{Frame, PhysicalAddress, VirtualAddress};

/// Contents of RAM nobody has written yet.
const JUNK: PageEntry = PageEntry::from_bits(0xBAD0_0007);

struct Ram {
    frames: BTreeMap<u64, Box<PageTable>>,
    invalidations: Vec<VirtualAddress>,
}

impl Ram {
    fn frame_ptr(&mut self, frame: Frame) -> *mut PageTable {
        let table = self.frames.entry(frame.index()).or_insert_with(|| {
            let mut t = Box::new(PageTable::zeroed());
            t.fill(JUNK);
            t
        });
        &raw mut **table
    }

    fn read(&mut self, frame: Frame, index: usize) -> PageEntry {
        unsafe { (&(*self.frame_ptr(frame)))[index] }
    }
}

/// Simulated paging hardware with the recursive directory installed.
pub struct SoftMmu {
    cr3: Frame,
    ram: RefCell<Ram>,
}

impl SoftMmu {
    /// Power on with an empty directory in `directory` whose last slot
    /// points back at itself.
    #[must_use]
    pub fn new(directory: Frame) -> Self {
        let mut ram = Ram {
            frames: BTreeMap::new(),
            invalidations: Vec::new(),
        };
        let mut table = Box::new(PageTable::zeroed());
        table[RECURSIVE_SLOT] = PageEntry::mapping(directory, PageFlags::KERNEL);
        ram.frames.insert(directory.index(), table);
        Self {
            cr3: directory,
            ram: RefCell::new(ram),
        }
    }

    /// Frame holding the page directory.
    #[must_use]
    pub const fn directory_frame(&self) -> Frame {
        self.cr3
    }

    /// Resolve `virt` to the frame it maps, as a two-level walk from CR3.
    #[must_use]
    pub fn walk(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let mut ram = self.ram.borrow_mut();
        let pde = ram.read(self.cr3, virt.directory_index());
        if !pde.present() {
            return None;
        }
        let pte = ram.read(pde.frame(), virt.table_index());
        pte.present()
            .then(|| pte.address() + u64::from(virt.page_offset()))
    }

    /// Every page invalidated so far, oldest first.
    #[must_use]
    pub fn invalidations(&self) -> Vec<VirtualAddress> {
        self.ram.borrow().invalidations.clone()
    }

    pub fn clear_invalidations(&self) {
        self.ram.borrow_mut().invalidations.clear();
    }

    /// Number of frames that hold data, i.e. have been touched at least once.
    #[must_use]
    pub fn touched_frames(&self) -> usize {
        self.ram.borrow().frames.len()
    }

    /// The 4 KiB page `virt` resolves to, reached like a load by the CPU.
    fn page_at<'a>(&self, virt: VirtualAddress) -> &'a mut PageTable {
        let Some(target) = self.walk(virt) else {
            do_page_fault(virt);
        };
        let ptr = self.ram.borrow_mut().frame_ptr(target.page());
        // Frames are boxed and never removed, so the pointer stays valid for
        // the lifetime of the simulator.
        unsafe { &mut *ptr }
    }
}

impl TableWindow for SoftMmu {
    unsafe fn directory<'a>(&self) -> &'a mut PageDirectory {
        self.page_at(VirtualAddress::new(DIRECTORY_WINDOW))
    }

    unsafe fn table<'a>(&self, handle: TableHandle) -> &'a mut PageTable {
        self.page_at(handle.window())
    }

    fn invalidate(&self, virt: VirtualAddress) {
        self.ram.borrow_mut().invalidations.push(virt);
    }
}
