use crate::{LowMemoryPolicy, MemoryKind, MemoryMap, MemoryRegion, NormalizerConfig};
use alloc::vec::Vec;
use kernel_info::boot::RawMemoryDescriptor;
use log::{debug, trace, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("the firmware memory map is empty")]
    Empty,
    #[error("the firmware memory map contains no usable memory")]
    NoUsableMemory,
}

/// Turns a raw firmware memory map into an authoritative [`MemoryMap`].
///
/// 1. Zero-length entries are dropped; every other entry is classified.
/// 2. Entries starting beyond the addressable limit are excluded, and
///    entries straddling it are clipped. Their RAM still counts toward
///    [`MemoryMap::observed_bytes`].
/// 3. Entries are ordered by base. Where two entries overlap, the more
///    restrictive kind wins. Holes between entries become
///    [`MemoryKind::Unspecified`]; there is never a trailing hole.
/// 4. If the platform has a [`LowMemoryPolicy`], it replaces everything
///    below its threshold.
///
/// # Errors
/// [`NormalizeError::Empty`] if nothing trackable remains and
/// [`NormalizeError::NoUsableMemory`] if nothing of what remains is RAM.
/// Both are fatal during boot.
///
/// ```
/// use kernel_info::boot::RawMemoryDescriptor as Raw;
/// use kernel_mmap::{MemoryKind, NormalizerConfig, normalize};
///
/// let raw = [
///     Raw::new(0x0, 0x9_FC00, Raw::KIND_AVAILABLE),
///     Raw::new(0x10_0000, 0x7F0_0000, Raw::KIND_AVAILABLE),
/// ];
/// let map = normalize(&raw, &NormalizerConfig::GENERIC).unwrap();
/// assert_eq!(map.len(), 3);
/// assert_eq!(map.regions()[1].kind, MemoryKind::Unspecified);
/// ```
pub fn normalize(
    raw: &[RawMemoryDescriptor],
    config: &NormalizerConfig,
) -> Result<MemoryMap, NormalizeError> {
    let limit = config.address_limit();
    let mut observed = 0u64;
    let mut entries = Vec::with_capacity(raw.len());

    for descriptor in raw {
        if descriptor.length == 0 {
            trace!("Dropping empty memory descriptor at {:#x}", descriptor.base);
            continue;
        }

        let kind = MemoryKind::from_firmware(descriptor.kind);
        if kind.is_ram() {
            observed = observed.saturating_add(descriptor.length);
        }

        if descriptor.base >= limit {
            debug!(
                "Ignoring {kind} memory at {:#x} beyond the addressable limit",
                descriptor.base
            );
            continue;
        }

        let end = descriptor.end().min(limit);
        if end < descriptor.end() {
            warn!(
                "Clipping {kind} memory at {:#x} to the addressable limit {limit:#x}",
                descriptor.base
            );
        }
        entries.push(MemoryRegion::from_bounds(descriptor.base, end, kind));
    }

    if entries.is_empty() {
        return Err(NormalizeError::Empty);
    }

    entries.sort_unstable_by_key(|r| r.base);
    if entries.windows(2).any(|pair| pair[0].end() > pair[1].base) {
        warn!("Firmware reported overlapping memory ranges, keeping the more restrictive type");
    }
    let mut regions = fill_and_resolve(&entries);

    if let Some(policy) = config.low_memory {
        regions = apply_low_memory(&regions, policy);
    }

    if !regions.iter().any(|r| r.kind == MemoryKind::Available) {
        return Err(NormalizeError::NoUsableMemory);
    }

    Ok(MemoryMap::new(regions, observed))
}

/// Appends `region`, merging it into the previous one if they touch and
/// share a kind.
fn push_coalesced(out: &mut Vec<MemoryRegion>, region: MemoryRegion) {
    if region.length == 0 {
        return;
    }
    if let Some(last) = out.last_mut()
        && last.kind == region.kind
        && last.end() == region.base
    {
        last.length += region.length;
        return;
    }
    out.push(region);
}

/// Splits the sorted entries at every reported boundary and assigns each
/// elementary piece the most restrictive kind covering it, or
/// [`MemoryKind::Unspecified`] if nothing does.
fn fill_and_resolve(sorted: &[MemoryRegion]) -> Vec<MemoryRegion> {
    let mut bounds: Vec<u64> = sorted.iter().flat_map(|r| [r.base, r.end()]).collect();
    bounds.sort_unstable();
    bounds.dedup();

    let mut out = Vec::with_capacity(sorted.len() * 2);
    for window in bounds.windows(2) {
        let (lo, hi) = (window[0], window[1]);
        let kind = sorted
            .iter()
            .take_while(|r| r.base <= lo)
            .filter(|r| r.end() >= hi)
            .map(|r| r.kind)
            .max_by_key(|k| k.precedence())
            .unwrap_or(MemoryKind::Unspecified);

        if kind == MemoryKind::Unspecified {
            trace!("Filling hole [{lo:#x} - {hi:#x})");
        }
        push_coalesced(&mut out, MemoryRegion::from_bounds(lo, hi, kind));
    }
    out
}

fn apply_low_memory(regions: &[MemoryRegion], policy: &LowMemoryPolicy) -> Vec<MemoryRegion> {
    let threshold = policy.threshold;
    let mut out = Vec::with_capacity(regions.len() + policy.table.len() + 2);

    for known in policy.table {
        push_coalesced(&mut out, *known);
    }

    let mut above = regions.iter().filter(|r| r.end() > threshold).peekable();
    if let Some(first) = above.peek()
        && first.base > threshold
    {
        push_coalesced(
            &mut out,
            MemoryRegion::from_bounds(threshold, first.base, MemoryKind::Unspecified),
        );
    }
    for region in above {
        let base = region.base.max(threshold);
        push_coalesced(
            &mut out,
            MemoryRegion::from_bounds(base, region.end(), region.kind),
        );
    }

    for hole in policy.forced_reserved {
        out = force_reserved(&out, hole.base, hole.end());
    }
    out
}

/// Marks `[start, end)` reserved where the map covers it.
fn force_reserved(regions: &[MemoryRegion], start: u64, end: u64) -> Vec<MemoryRegion> {
    let mut out = Vec::with_capacity(regions.len() + 2);
    for region in regions {
        if !region.overlaps(start, end) {
            push_coalesced(&mut out, *region);
            continue;
        }
        let cut_lo = region.base.max(start);
        let cut_hi = region.end().min(end);
        push_coalesced(
            &mut out,
            MemoryRegion::from_bounds(region.base, cut_lo, region.kind),
        );
        push_coalesced(
            &mut out,
            MemoryRegion::from_bounds(cut_lo, cut_hi, MemoryKind::Reserved),
        );
        push_coalesced(
            &mut out,
            MemoryRegion::from_bounds(cut_hi, region.end(), region.kind),
        );
    }
    out
}
