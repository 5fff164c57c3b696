//! # Physical Frame Allocator
//!
//! Tracks every 4 KiB frame of usable RAM with one bit. Each
//! [`Available`](MemoryKind::Available) or
//! [`AcpiReclaimable`](MemoryKind::AcpiReclaimable) region of the memory map
//! gets its own [`BitmapRegion`]; the regions form a circular list in address
//! order.
//!
//! ## Bitmap storage
//!
//! The bitmaps live in RAM taken from the map itself: the first page-aligned
//! stretch of available memory above
//! [`storage_floor`](FrameAllocatorConfig::storage_floor) that is big enough
//! and does not overlap the kernel image. See [`StoragePlacement`].
//!
//! ## Allocation
//!
//! A cursor remembers the first region that may still have free frames;
//! every region before it is full. Scanning from the cursor and taking the
//! lowest clear bit therefore always yields the lowest free frame.

use crate::bitmap::Bitmap;
use crate::phys_mapper::PhysMapper;
use alloc::vec::Vec;
use core::fmt;
use kernel_info::boot::KernelImage;
use kernel_info::memory::{LOW_MEMORY_LIMIT, MAX_PHYSICAL_ADDRESS};
use kernel_memory_addresses::{
    Frame, PAGE_SIZE, PhysicalAddress, Size4K, align_down, align_up, whole_pages,
};
use kernel_mmap::{MemoryKind, MemoryMap};
use kernel_vmem::FrameAlloc;
use log::{debug, info, warn};

/// What happens to ACPI reclaimable memory at initialization.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum ReclaimPolicy {
    /// Track it, but keep it reserved (the ACPI tables may still be needed).
    #[default]
    KeepReserved,
    /// Hand it out like available memory.
    Release,
}

#[derive(Debug, Copy, Clone)]
pub struct FrameAllocatorConfig {
    /// Bitmap storage is never placed below this address.
    pub storage_floor: u64,
    pub reclaim: ReclaimPolicy,
}

impl FrameAllocatorConfig {
    pub const DEFAULT: Self = Self {
        storage_floor: LOW_MEMORY_LIMIT,
        reclaim: ReclaimPolicy::KeepReserved,
    };
}

impl Default for FrameAllocatorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("the memory map contains no trackable frame")]
    NoTrackableMemory,
    #[error("no available region can hold the frame bitmap")]
    NoBitmapStorage,
}

/// Where the bitmap storage ended up relative to the kernel image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoragePlacement {
    /// In the region holding the kernel, below the kernel start.
    BeforeKernel,
    /// In the region holding the kernel, right after the kernel end.
    AfterKernel,
    /// At the base of a region the kernel does not touch.
    DisjointFromKernel,
}

/// Physical location of the frame bitmaps.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BitmapStorage {
    pub start: PhysicalAddress,
    /// Size in `u32` words.
    pub words: usize,
    pub placement: StoragePlacement,
}

impl BitmapStorage {
    /// End of the storage rounded up to a whole frame.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(align_up(
            self.start.as_u64() + self.words as u64 * 4,
            PAGE_SIZE,
        ))
    }
}

/// Bitmap and counters for one contiguous stretch of RAM.
pub struct BitmapRegion {
    bitmap: Bitmap<'static>,
    kind: MemoryKind,
    first_addr: PhysicalAddress,
    end: PhysicalAddress,
    reserved_blocks: usize,
    used_blocks: usize,
    next: usize,
}

impl BitmapRegion {
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> MemoryKind {
        self.kind
    }

    /// Base of the first frame.
    #[inline]
    #[must_use]
    pub const fn first_addr(&self) -> PhysicalAddress {
        self.first_addr
    }

    /// Last byte of the last frame.
    #[inline]
    #[must_use]
    pub const fn last_addr(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.end.as_u64() - 1)
    }

    #[inline]
    #[must_use]
    pub const fn total_blocks(&self) -> usize {
        self.bitmap.len()
    }

    #[inline]
    #[must_use]
    pub const fn used_blocks(&self) -> usize {
        self.used_blocks
    }

    /// Frames reserved so far, at initialization or through
    /// [`FrameAllocator::reserve_range`]. Freeing a reserved frame later
    /// does not lower this count.
    #[inline]
    #[must_use]
    pub const fn reserved_blocks(&self) -> usize {
        self.reserved_blocks
    }

    /// Size of this region's bitmap in `u32` words.
    #[inline]
    #[must_use]
    pub const fn bitmap_size(&self) -> usize {
        Bitmap::words_for(self.bitmap.len())
    }

    /// Index of the following region; the last region points at the first.
    #[inline]
    #[must_use]
    pub const fn next(&self) -> usize {
        self.next
    }

    #[inline]
    #[must_use]
    pub fn bitmap(&self) -> &Bitmap<'static> {
        &self.bitmap
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, frame: Frame) -> bool {
        self.first_addr <= frame.base() && frame.base() < self.end
    }

    #[allow(clippy::cast_possible_truncation)]
    fn bit_of(&self, frame: Frame) -> usize {
        (frame.index() - self.first_addr.page::<Size4K>().index()) as usize
    }

    fn frame_at(&self, bit: usize) -> Frame {
        Frame::from_index(self.first_addr.page::<Size4K>().index() + bit as u64)
    }

    fn allocate(&mut self) -> Option<Frame> {
        if self.used_blocks == self.total_blocks() {
            return None;
        }
        let bit = self.bitmap.first_unset()?;
        self.bitmap.set(bit);
        self.used_blocks += 1;
        Some(self.frame_at(bit))
    }

    /// Reserve every frame of `[start, end)` inside this region. Returns how
    /// many frames were newly reserved.
    fn reserve(&mut self, start: u64, end: u64) -> usize {
        let lo = start.max(self.first_addr.as_u64());
        let hi = end.min(self.end.as_u64());
        if lo >= hi {
            return 0;
        }
        let first = self.bit_of(PhysicalAddress::new(lo).page());
        let last = self.bit_of(PhysicalAddress::new(hi - 1).page());
        let mut newly = 0;
        for bit in first..=last {
            if !self.bitmap.test(bit) {
                self.bitmap.set(bit);
                newly += 1;
            }
        }
        self.used_blocks += newly;
        self.reserved_blocks += newly;
        newly
    }
}

impl fmt::Debug for BitmapRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitmapRegion")
            .field("kind", &self.kind)
            .field("first_addr", &self.first_addr)
            .field("last_addr", &self.last_addr())
            .field("total_blocks", &self.total_blocks())
            .field("reserved_blocks", &self.reserved_blocks)
            .field("used_blocks", &self.used_blocks)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

/// Bitmap-based allocator of 4 KiB physical frames.
pub struct FrameAllocator {
    regions: Vec<BitmapRegion>,
    /// First region that may have free frames.
    cursor: usize,
    total_frames: usize,
    used_frames: usize,
    reserved_frames: usize,
    storage: BitmapStorage,
    kernel: KernelImage,
    map: MemoryMap,
}

/// A region the allocator will track, before its bitmap exists.
struct Tracked {
    kind: MemoryKind,
    start: u64,
    frames: usize,
}

impl Tracked {
    const fn end(&self) -> u64 {
        self.start + self.frames as u64 * PAGE_SIZE
    }
}

impl FrameAllocator {
    /// Build the allocator for `map`, keeping `kernel` and the allocator's own
    /// bitmap storage reserved.
    ///
    /// # Errors
    /// - [`FrameAllocError::NoTrackableMemory`] if no RAM region holds a whole frame.
    /// - [`FrameAllocError::NoBitmapStorage`] if the bitmaps fit nowhere.
    pub fn new(
        map: MemoryMap,
        kernel: KernelImage,
        phys: &impl PhysMapper,
        config: FrameAllocatorConfig,
    ) -> Result<Self, FrameAllocError> {
        let tracked = Self::tracked_regions(&map);
        let total_frames: usize = tracked.iter().map(|t| t.frames).sum();
        if total_frames == 0 {
            return Err(FrameAllocError::NoTrackableMemory);
        }
        let words: usize = tracked.iter().map(|t| Bitmap::words_for(t.frames)).sum();

        let storage = Self::place_storage(&map, kernel, words, config.storage_floor, phys.reach())
            .ok_or(FrameAllocError::NoBitmapStorage)?;
        debug!(
            "frame bitmap: {words} words at {} ({:?})",
            storage.start, storage.placement
        );

        // SAFETY: The storage lies in available RAM below the mapper's reach
        // and outside the kernel image; nothing else owns it yet.
        let mut rest: &'static mut [u32] =
            unsafe { phys.phys_to_mut_slice(storage.start, storage.words) };

        let count = tracked.len();
        let mut regions = Vec::with_capacity(count);
        for (i, t) in tracked.iter().enumerate() {
            let frames = t.frames;
            let (mine, tail) = core::mem::take(&mut rest).split_at_mut(Bitmap::words_for(frames));
            rest = tail;

            let mut bitmap = Bitmap::new(mine, frames);
            let release = t.kind == MemoryKind::Available || config.reclaim == ReclaimPolicy::Release;
            let used = if release {
                0
            } else {
                bitmap.set_all();
                frames
            };
            regions.push(BitmapRegion {
                bitmap,
                kind: t.kind,
                first_addr: PhysicalAddress::new(t.start),
                end: PhysicalAddress::new(t.end()),
                reserved_blocks: used,
                used_blocks: used,
                next: (i + 1) % count,
            });
        }

        let used: usize = regions.iter().map(BitmapRegion::used_blocks).sum();
        let mut this = Self {
            regions,
            cursor: 0,
            total_frames,
            used_frames: used,
            reserved_frames: used,
            storage,
            kernel,
            map,
        };
        this.reserve_range(kernel.start, kernel.end);
        this.reserve_range(storage.start, storage.end());
        Ok(this)
    }

    /// RAM regions holding at least one whole, addressable frame.
    #[allow(clippy::cast_possible_truncation)]
    fn tracked_regions(map: &MemoryMap) -> Vec<Tracked> {
        let limit = MAX_PHYSICAL_ADDRESS + 1;
        map.iter()
            .filter(|r| r.kind.is_ram())
            .filter_map(|r| {
                if r.end() > limit {
                    warn!("ignoring memory above {limit:#x} in region {r}");
                }
                let frames = whole_pages::<Size4K>(
                    PhysicalAddress::new(r.base),
                    PhysicalAddress::new(r.end().min(limit)),
                );
                (frames > 0).then(|| Tracked {
                    kind: r.kind,
                    start: align_up(r.base, PAGE_SIZE),
                    frames: frames as usize,
                })
            })
            .collect()
    }

    /// Find a page-aligned home for `words` bitmap words.
    fn place_storage(
        map: &MemoryMap,
        kernel: KernelImage,
        words: usize,
        floor: u64,
        reach: u64,
    ) -> Option<BitmapStorage> {
        let span = align_up(words as u64 * 4, PAGE_SIZE);
        let at = |start: u64, placement| BitmapStorage {
            start: PhysicalAddress::new(start),
            words,
            placement,
        };

        for region in map.of_kind(MemoryKind::Available) {
            let lo = align_up(region.base.max(floor), PAGE_SIZE);
            let hi = align_down(region.end().min(reach), PAGE_SIZE);
            let fits = |start: u64| start >= lo && start + span <= hi;

            if kernel.overlaps(region.base, region.end()) {
                if fits(lo) && lo + span <= kernel.start.as_u64() {
                    return Some(at(lo, StoragePlacement::BeforeKernel));
                }
                let after = kernel.page_end().as_u64().max(lo);
                if fits(after) {
                    return Some(at(after, StoragePlacement::AfterKernel));
                }
            } else if fits(lo) {
                return Some(at(lo, StoragePlacement::DisjointFromKernel));
            }
        }
        None
    }

    fn region_of(&self, frame: Frame) -> Option<usize> {
        let idx = self.regions.partition_point(|r| r.end <= frame.base());
        self.regions
            .get(idx)
            .filter(|r| r.contains(frame))
            .map(|_| idx)
    }

    /// Allocate the lowest free frame.
    pub fn allocate_frame(&mut self) -> Option<Frame> {
        if self.used_frames == self.total_frames {
            return None;
        }
        let mut idx = self.cursor;
        for _ in 0..self.regions.len() {
            let region = &mut self.regions[idx];
            if let Some(frame) = region.allocate() {
                self.cursor = idx;
                self.used_frames += 1;
                return Some(frame);
            }
            idx = region.next;
        }
        None
    }

    /// Return `frame` to the pool.
    ///
    /// Frames outside every tracked region (device memory, say) do not belong
    /// to the allocator and are ignored.
    pub fn free_frame(&mut self, frame: Frame) {
        let Some(idx) = self.region_of(frame) else {
            debug!("ignoring free of untracked frame {frame}");
            return;
        };
        let region = &mut self.regions[idx];
        let bit = region.bit_of(frame);
        debug_assert!(region.bitmap.test(bit), "double free of frame {frame}");
        if !region.bitmap.test(bit) {
            return;
        }
        region.bitmap.clear(bit);
        region.used_blocks -= 1;
        self.used_frames -= 1;
        if idx < self.cursor {
            self.cursor = idx;
        }
    }

    /// Reserve every frame `[start, end)` touches. Returns the number of
    /// frames that were not reserved or in use before.
    pub fn reserve_range(&mut self, start: PhysicalAddress, end: PhysicalAddress) -> usize {
        let (start, end) = (start.as_u64(), end.as_u64());
        let newly: usize = self
            .regions
            .iter_mut()
            .filter(|r| r.first_addr.as_u64() < end && start < r.end.as_u64())
            .map(|r| r.reserve(start, end))
            .sum();
        self.used_frames += newly;
        self.reserved_frames += newly;
        newly
    }

    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.total_frames
    }

    #[must_use]
    pub const fn used_frames(&self) -> usize {
        self.used_frames
    }

    /// Sum of [`BitmapRegion::reserved_blocks`]; it can exceed
    /// [`used_frames`](Self::used_frames) once reserved frames are freed.
    #[must_use]
    pub const fn reserved_frames(&self) -> usize {
        self.reserved_frames
    }

    /// Number of successful [`allocate_frame`](Self::allocate_frame) calls left.
    #[must_use]
    pub const fn free_frames(&self) -> usize {
        self.total_frames - self.used_frames
    }

    #[must_use]
    pub fn regions(&self) -> &[BitmapRegion] {
        &self.regions
    }

    #[must_use]
    pub const fn bitmap_range(&self) -> BitmapStorage {
        self.storage
    }

    #[must_use]
    pub const fn kernel_image(&self) -> KernelImage {
        self.kernel
    }

    /// The memory map the allocator was built from.
    #[must_use]
    pub const fn memory_map(&self) -> &MemoryMap {
        &self.map
    }

    /// Whether `frame` is unavailable: in use, reserved, or not tracked at all.
    #[must_use]
    pub fn is_frame_used(&self, frame: Frame) -> bool {
        self.region_of(frame).is_none_or(|idx| {
            let region = &self.regions[idx];
            region.bitmap.test(region.bit_of(frame))
        })
    }

    pub fn log_statistics(&self) {
        info!("Physical memory manager initialized");
        info!("  block size: {PAGE_SIZE} bytes");
        info!(
            "  frames: {} total, {} used, {} ever reserved, {} free",
            self.total_frames,
            self.used_frames,
            self.reserved_frames,
            self.free_frames()
        );
        info!(
            "  usable memory: {} MiB",
            (self.free_frames() as u64 * PAGE_SIZE) >> 20
        );
        info!("  observed memory: {} MiB", self.map.observed_bytes() >> 20);
        info!(
            "  bitmap: {}..{} ({} regions, {:?})",
            self.storage.start,
            self.storage.end(),
            self.regions.len(),
            self.storage.placement
        );
    }
}

impl FrameAlloc for FrameAllocator {
    #[inline]
    fn allocate_frame(&mut self) -> Option<Frame> {
        Self::allocate_frame(self)
    }

    #[inline]
    fn free_frame(&mut self, frame: Frame) {
        Self::free_frame(self, frame);
    }
}

impl fmt::Debug for FrameAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameAllocator")
            .field("regions", &self.regions.len())
            .field("total_frames", &self.total_frames)
            .field("used_frames", &self.used_frames)
            .field("reserved_frames", &self.reserved_frames)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}
