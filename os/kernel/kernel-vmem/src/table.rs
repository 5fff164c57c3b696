use crate::PageEntry;
use core::ops::{Index, IndexMut};
use kernel_info::memory::{RECURSIVE_SLOT, RECURSIVE_WINDOW_BASE};
use kernel_memory_addresses::{ENTRIES_PER_TABLE, PageSize, Size4K, VirtualAddress};

/// One 4 KiB page table: 1024 entries of 32 bits.
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct PageTable {
    entries: [PageEntry; ENTRIES_PER_TABLE],
}

/// The page directory has the same shape as a page table. Through the
/// recursive slot the CPU even treats it as one.
pub type PageDirectory = PageTable;

const _: () = assert!(size_of::<PageTable>() == Size4K::SIZE as usize);

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntry::EMPTY; ENTRIES_PER_TABLE],
        }
    }

    /// Clear every entry.
    #[inline]
    pub fn zero(&mut self) {
        self.fill(PageEntry::EMPTY);
    }

    #[inline]
    pub fn fill(&mut self, entry: PageEntry) {
        self.entries.fill(entry);
    }

    /// Whether no entry is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| !e.present())
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &PageEntry> {
        self.entries.iter()
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Index<usize> for PageTable {
    type Output = PageEntry;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl IndexMut<usize> for PageTable {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.entries[index]
    }
}

/// Names the page table responsible for a 4 MiB window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TableHandle {
    directory_index: usize,
}

impl TableHandle {
    #[inline]
    #[must_use]
    pub const fn new(directory_index: usize) -> Self {
        debug_assert!(directory_index < ENTRIES_PER_TABLE);
        Self { directory_index }
    }

    /// Slot in the page directory.
    #[inline]
    #[must_use]
    pub const fn directory_index(self) -> usize {
        self.directory_index
    }

    /// Where the table is visible through the recursive mapping.
    #[inline]
    #[must_use]
    pub const fn window(self) -> VirtualAddress {
        VirtualAddress::from_indices(RECURSIVE_SLOT, self.directory_index)
    }

    /// Whether this handle names the directory's own slot.
    #[inline]
    #[must_use]
    pub const fn is_recursive(self) -> bool {
        self.directory_index == RECURSIVE_SLOT
    }
}

/// The table covering `virt` and its recursive-window address.
///
/// ```rust
/// # use kernel_vmem::table_for;
/// # use kernel_memory_addresses::VirtualAddress;
/// let handle = table_for(VirtualAddress::new(0xD000_1234));
/// assert_eq!(handle.directory_index(), 0x340);
/// assert_eq!(handle.window().as_u32(), 0xFFF4_0000);
/// ```
#[inline]
#[must_use]
pub const fn table_for(virt: VirtualAddress) -> TableHandle {
    TableHandle::new(virt.directory_index())
}

const _: () = assert!(TableHandle::new(0).window().as_u32() == RECURSIVE_WINDOW_BASE);
