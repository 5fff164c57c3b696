bitflags::bitflags! {
    /// Protection and caching flags of a page directory or page table entry.
    ///
    /// The values are the hardware bit positions, so a set of flags can be
    /// OR-ed straight into an entry.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        /// Page is present in physical memory.
        ///
        /// Accessing a page without it raises a page fault.
        const PRESENT = 0x001;

        /// Page is writable. If cleared, the page is read-only.
        const READ_WRITE = 0x002;

        /// Page is accessible from user mode (CPL=3).
        const USER = 0x004;

        /// Write-through caching; typically used for memory-mapped I/O.
        const WRITE_THROUGH = 0x008;

        /// Caching disabled for this page.
        const CACHE_DISABLE = 0x010;

        /// Global page. Survives CR3 reloads when CR4.PGE is set.
        const GLOBAL = 0x100;
    }
}

impl PageFlags {
    /// Kernel read-write data.
    pub const KERNEL: Self = Self::PRESENT.union(Self::READ_WRITE);

    /// User read-write data.
    pub const USER_RW: Self = Self::KERNEL.union(Self::USER);
}
