use crate::{PageSize, Size4K, Size4M, VirtualPage, align_down};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Number of entries in a page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// 32-bit virtual memory address.
///
/// Two-level paging splits an address into a 10-bit directory index, a
/// 10-bit table index, and a 12-bit page offset:
///
/// ```text
///  31            22 21            12 11             0
/// ┌────────────────┬────────────────┬────────────────┐
/// │ directory idx  │   table idx    │     offset     │
/// └────────────────┴────────────────┴────────────────┘
/// ```
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0xC010_2ABC);
/// assert_eq!(va.directory_index(), 0x300);
/// assert_eq!(va.table_index(), 0x102);
/// assert_eq!(va.page_offset(), 0xABC);
/// assert_eq!(VirtualAddress::from_indices(0x300, 0x102).as_u32(), 0xC010_2000);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Compose the page-aligned address selected by a directory and table index.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_indices(directory: usize, table: usize) -> Self {
        debug_assert!(directory < ENTRIES_PER_TABLE && table < ENTRIES_PER_TABLE);
        Self(((directory as u32) << Size4M::SHIFT) | ((table as u32) << Size4K::SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Bits 31..22: the page directory slot.
    #[inline]
    #[must_use]
    pub const fn directory_index(self) -> usize {
        (self.0 >> Size4M::SHIFT) as usize
    }

    /// Bits 21..12: the entry inside the page table.
    #[inline]
    #[must_use]
    pub const fn table_index(self) -> usize {
        ((self.0 >> Size4K::SHIFT) as usize) & (ENTRIES_PER_TABLE - 1)
    }

    /// Bits 11..0.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u32 {
        self.0 & (Size4K::SIZE as u32 - 1)
    }

    #[inline]
    #[must_use]
    pub const fn page<S: PageSize>(self) -> VirtualPage<S> {
        VirtualPage::containing_address(self)
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn align_down<S: PageSize>(self) -> Self {
        Self(align_down(self.0 as u64, S::SIZE) as u32)
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        (self.0 as u64) & (S::SIZE - 1) == 0
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl Add<u32> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}

impl Sub for VirtualAddress {
    type Output = u32;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self(v)
    }
}
