use crate::{PageDirectory, PageTable, TableHandle};
use kernel_info::memory::DIRECTORY_WINDOW;
use kernel_memory_addresses::VirtualAddress;

/// Access to the paging structures of the active address space.
///
/// # Safety
/// - The returned references alias memory the MMU reads concurrently; the
///   caller must not hold two references to the same table.
/// - Lifetime `'a` is purely borrow-checked; the window must stay mapped
///   for `'a`.
pub trait TableWindow {
    /// The page directory.
    ///
    /// # Safety
    /// The recursive slot must be installed.
    unsafe fn directory<'a>(&self) -> &'a mut PageDirectory;

    /// The page table named by `handle`.
    ///
    /// # Safety
    /// The directory entry for `handle` must be present and its window page
    /// must have been invalidated since it was installed.
    unsafe fn table<'a>(&self, handle: TableHandle) -> &'a mut PageTable;

    /// Drop any cached translation of the page containing `virt`.
    fn invalidate(&self, virt: VirtualAddress);
}

/// The hardware window: raw pointers into the recursive mapping and `invlpg`.
#[derive(Debug, Default, Copy, Clone)]
pub struct RecursiveWindow;

impl TableWindow for RecursiveWindow {
    #[inline]
    unsafe fn directory<'a>(&self) -> &'a mut PageDirectory {
        unsafe { &mut *(DIRECTORY_WINDOW as usize as *mut PageDirectory) }
    }

    #[inline]
    unsafe fn table<'a>(&self, handle: TableHandle) -> &'a mut PageTable {
        unsafe { &mut *(handle.window().as_usize() as *mut PageTable) }
    }

    #[inline]
    fn invalidate(&self, virt: VirtualAddress) {
        invlpg(virt);
    }
}

#[cfg(all(target_os = "none", target_arch = "x86"))]
#[inline]
fn invlpg(virt: VirtualAddress) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) virt.as_usize(), options(nostack, preserves_flags));
    }
}

#[cfg(not(all(target_os = "none", target_arch = "x86")))]
#[inline]
const fn invlpg(_virt: VirtualAddress) {}
