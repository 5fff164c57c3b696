use core::fmt;
use kernel_info::boot::RawMemoryDescriptor;

/// What a stretch of physical memory may be used for.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemoryKind {
    /// Free RAM.
    Available,
    /// Firmware, device or otherwise untouchable memory.
    Reserved,
    /// Holds ACPI tables; becomes RAM once the tables are consumed.
    AcpiReclaimable,
    /// Not described by the firmware at all (a hole in its map).
    Unspecified,
}

impl MemoryKind {
    /// Classifies a firmware type code. Anything not known to be RAM is
    /// treated as reserved.
    #[must_use]
    pub const fn from_firmware(kind: u32) -> Self {
        match kind {
            RawMemoryDescriptor::KIND_AVAILABLE => Self::Available,
            RawMemoryDescriptor::KIND_ACPI_RECLAIMABLE => Self::AcpiReclaimable,
            _ => Self::Reserved,
        }
    }

    /// Whether the firmware counts this memory as installed RAM.
    #[must_use]
    pub const fn is_ram(self) -> bool {
        matches!(self, Self::Available | Self::AcpiReclaimable)
    }

    /// Which kind wins when two firmware entries claim the same bytes.
    pub(crate) const fn precedence(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::Available => 1,
            Self::AcpiReclaimable => 2,
            Self::Reserved => 3,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::AcpiReclaimable => "acpi reclaimable",
            Self::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous physical range `[base, base + length)` of a single kind.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: MemoryKind) -> Self {
        Self { base, length, kind }
    }

    /// Region covering `[base, end)`.
    #[must_use]
    pub const fn from_bounds(base: u64, end: u64, kind: MemoryKind) -> Self {
        debug_assert!(base <= end);
        Self::new(base, end - base, kind)
    }

    /// Exclusive end address.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base + self.length
    }

    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        self.base <= addr && addr < self.end()
    }

    #[must_use]
    pub const fn overlaps(&self, base: u64, end: u64) -> bool {
        base < self.end() && self.base < end
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:#010x} - {:#010x}) {:>8} KiB  {}",
            self.base,
            self.end(),
            self.length / 1024,
            self.kind
        )
    }
}
