use crate::PageFlags;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{Frame, PhysicalAddress};

/// A single 32-bit page directory or page table entry in its raw form.
///
/// Directory entries (PDE) point at a page table; table entries (PTE) map a
/// 4 KiB page. Both share this layout:
///
/// | Bits   | Name / Mnemonic | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `P`             | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (PTE only) |
/// | 7      | `PS`            | 4 MiB page (PDE only, never set here) |
/// | 8      | `G`             | Global (PTE only) |
/// | 9–11   | OS available    | Ignored by the CPU |
/// | 12–31  | frame           | Physical frame number |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::{PageEntry, PageFlags};
/// # use kernel_memory_addresses::Frame;
/// let e = PageEntry::mapping(Frame::from_index(0x108), PageFlags::KERNEL);
/// assert!(e.present() && e.writable() && !e.user());
/// assert_eq!(e.into_bits(), 0x0010_8003);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntry {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user: bool,

    /// Page-level write-through (PWT, bit 3).
    pub write_through: bool,

    /// Page-level cache disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on the first write through a PTE.
    pub dirty: bool,

    /// Page size (PS, bit 7).
    pub page_size: bool,

    /// Global (G, bit 8).
    pub global: bool,

    /// Bits 9–11, free for the OS.
    #[bits(3)]
    pub os_available: u8,

    /// Bits 12–31: the physical frame number.
    #[bits(20)]
    pub frame_number: u32,
}

impl PageEntry {
    /// The not-present entry.
    pub const EMPTY: Self = Self::new();

    /// Entry pointing at `frame` with `flags`.
    ///
    /// The frame must lie below 4 GiB.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn mapping(frame: Frame, flags: PageFlags) -> Self {
        debug_assert!(frame.index() < (1 << 20));
        Self::from_bits(((frame.index() as u32) << 12) | flags.bits())
    }

    /// The frame this entry points at.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> Frame {
        Frame::from_index(self.frame_number() as u64)
    }

    #[inline]
    #[must_use]
    pub const fn address(&self) -> PhysicalAddress {
        self.frame().base()
    }

    /// The protection and caching bits, without the CPU-maintained ones.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.into_bits())
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.into_bits() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_hardware() {
        let e = PageEntry::new()
            .with_present(true)
            .with_user(true)
            .with_global(true)
            .with_frame_number(0xFFFFF);
        assert_eq!(e.into_bits(), 0xFFFF_F105);
        assert_eq!(e.flags(), PageFlags::PRESENT | PageFlags::USER | PageFlags::GLOBAL);
        assert_eq!(e.address().as_u64(), 0xFFFF_F000);
    }

    #[test]
    fn cpu_bits_are_not_flags() {
        let e = PageEntry::mapping(Frame::from_index(1), PageFlags::KERNEL)
            .with_accessed(true)
            .with_dirty(true);
        assert_eq!(e.flags(), PageFlags::KERNEL);
        assert_eq!(e.frame(), Frame::from_index(1));
        assert!(!e.is_empty());
        assert!(PageEntry::EMPTY.is_empty());
    }
}
