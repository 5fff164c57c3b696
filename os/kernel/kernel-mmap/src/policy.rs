use crate::{MemoryKind, MemoryRegion};
use kernel_info::memory::MAX_PHYSICAL_ADDRESS;

/// Platform knowledge about low physical memory that overrides the firmware.
///
/// Everything below [`threshold`](Self::threshold) is discarded from the
/// firmware map and replaced by [`table`](Self::table), which must cover
/// `[0, threshold)` exactly. Each range in [`forced_reserved`](Self::forced_reserved)
/// is then marked reserved wherever the map covers it.
#[derive(Debug)]
pub struct LowMemoryPolicy {
    pub threshold: u64,
    pub table: &'static [MemoryRegion],
    pub forced_reserved: &'static [MemoryRegion],
}

impl LowMemoryPolicy {
    /// Whether the table tiles `[0, threshold)` without gaps or overlaps.
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        let mut expected = 0;
        let mut i = 0;
        while i < self.table.len() {
            if self.table[i].base != expected || self.table[i].length == 0 {
                return false;
            }
            expected = self.table[i].end();
            i += 1;
        }
        expected == self.threshold
    }
}

/// Known layout of the first megabyte on a PC compatible machine.
pub const PC_LOW_MEMORY: LowMemoryPolicy = LowMemoryPolicy {
    threshold: 0x10_0000,
    table: &[
        // Real-mode interrupt vector table.
        MemoryRegion::new(0x0, 0x400, MemoryKind::Reserved),
        // BIOS data area.
        MemoryRegion::new(0x400, 0x100, MemoryKind::Reserved),
        MemoryRegion::new(0x500, 0x7700, MemoryKind::Available),
        // Boot sector reload area.
        MemoryRegion::new(0x7C00, 0x200, MemoryKind::Reserved),
        MemoryRegion::new(0x7E00, 0x7_8200, MemoryKind::Available),
        // Extended BIOS data area.
        MemoryRegion::new(0x8_0000, 0x2_0000, MemoryKind::Reserved),
        // Video memory, option ROMs and the system BIOS.
        MemoryRegion::new(0xA_0000, 0x6_0000, MemoryKind::Reserved),
    ],
    forced_reserved: &[
        // ISA memory hole.
        MemoryRegion::new(0xF0_0000, 0x10_0000, MemoryKind::Reserved),
    ],
};

const _: () = assert!(PC_LOW_MEMORY.is_well_formed());

/// How raw firmware maps are turned into a [`MemoryMap`](crate::MemoryMap).
#[derive(Debug, Copy, Clone)]
pub struct NormalizerConfig {
    /// Highest physical address the kernel can track (inclusive).
    pub max_physical_address: u64,
    /// Low-memory override, if the platform has one.
    pub low_memory: Option<&'static LowMemoryPolicy>,
}

impl NormalizerConfig {
    /// No address cap and no platform table; the firmware map is taken as is.
    pub const GENERIC: Self = Self {
        max_physical_address: u64::MAX,
        low_memory: None,
    };

    /// 32-bit PC without PAE.
    pub const PC_I386: Self = Self {
        max_physical_address: MAX_PHYSICAL_ADDRESS,
        low_memory: Some(&PC_LOW_MEMORY),
    };

    /// Exclusive end of the trackable physical range.
    #[must_use]
    pub const fn address_limit(&self) -> u64 {
        self.max_physical_address.saturating_add(1)
    }
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self::PC_I386
    }
}
