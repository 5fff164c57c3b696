use crate::{MemoryKind, MemoryRegion};
use alloc::vec::Vec;
use log::info;

/// The authoritative physical memory map.
///
/// ### Invariants
/// - Regions are sorted ascending by base.
/// - No two regions overlap.
/// - Consecutive regions touch: the map covers its span without gaps.
/// - Neighbouring regions never share a kind (they would have been merged).
///
/// Only [`normalize`](crate::normalize) builds a `MemoryMap`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MemoryMap {
    regions: Vec<MemoryRegion>,
    observed_bytes: u64,
}

impl MemoryMap {
    pub(crate) fn new(regions: Vec<MemoryRegion>, observed_bytes: u64) -> Self {
        debug_assert!(regions.windows(2).all(|w| w[0].end() == w[1].base));
        Self {
            regions,
            observed_bytes,
        }
    }

    #[must_use]
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryRegion> + '_ {
        self.regions.iter()
    }

    /// Regions of the given kind, in address order.
    pub fn of_kind(&self, kind: MemoryKind) -> impl Iterator<Item = &MemoryRegion> + '_ {
        self.regions.iter().filter(move |r| r.kind == kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Lowest base and highest end covered by the map.
    #[must_use]
    pub fn span(&self) -> (u64, u64) {
        match (self.regions.first(), self.regions.last()) {
            (Some(first), Some(last)) => (first.base, last.end()),
            _ => (0, 0),
        }
    }

    /// Total size of all regions of the given kind.
    #[must_use]
    pub fn bytes_of_kind(&self, kind: MemoryKind) -> u64 {
        self.of_kind(kind).map(|r| r.length).sum()
    }

    /// RAM the firmware reported in total, including memory that was
    /// dropped because it lies beyond the addressable range.
    #[must_use]
    pub const fn observed_bytes(&self) -> u64 {
        self.observed_bytes
    }

    /// The region containing `addr`, if the map covers it.
    #[must_use]
    pub fn region_containing(&self, addr: u64) -> Option<&MemoryRegion> {
        let idx = self.regions.partition_point(|r| r.end() <= addr);
        self.regions.get(idx).filter(|r| r.contains(addr))
    }

    /// Dumps the map to the kernel log.
    pub fn log_regions(&self) {
        info!("Physical memory map ({} regions):", self.regions.len());
        for region in &self.regions {
            info!("  {region}");
        }
        info!(
            "Available: {} KiB, observed RAM: {} KiB",
            self.bytes_of_kind(MemoryKind::Available) / 1024,
            self.observed_bytes / 1024
        );
    }
}

impl<'a> IntoIterator for &'a MemoryMap {
    type Item = &'a MemoryRegion;
    type IntoIter = core::slice::Iter<'a, MemoryRegion>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}
