//! Ways to grow a [`FreeListAllocator`](crate::free_list::FreeListAllocator) arena.

use crate::free_list::{DEFAULT_MIN_CHUNK_UNITS, UNIT};
use crate::vmm::PageBacking;
use core::ptr::NonNull;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_vmem::MapError;
use log::{debug, warn};

#[allow(clippy::cast_possible_truncation)]
const PAGE: usize = PAGE_SIZE as usize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrowError {
    #[error("the heap window is exhausted")]
    Exhausted,
    #[error("failed to back a heap page: {0}")]
    Backing(#[from] MapError),
}

/// Supplies memory directly after the end of an arena.
pub trait ArenaGrowth {
    /// Start of the arena. Must be aligned to [`UNIT`] and never move.
    fn base(&self) -> NonNull<u8>;

    /// Make at least `units` more units usable after the current end.
    ///
    /// Returns the number of units actually added, which may be more than
    /// requested.
    ///
    /// # Errors
    /// If not even `units` more can be provided; the arena is unchanged.
    fn extend(&mut self, units: usize) -> Result<usize, GrowError>;

    /// Smallest growth step worth asking for.
    fn min_chunk_units(&self) -> usize;
}

/// A break pointer moving through a fixed, already-usable region.
#[derive(Debug)]
pub struct BumpBreak {
    base: NonNull<u8>,
    len: usize,
    brk: usize,
}

// SAFETY: BumpBreak hands out memory it exclusively owns; the pointer is never shared.
unsafe impl Send for BumpBreak {}

impl BumpBreak {
    /// # Safety
    /// `[base, base + len)` must be writable, unused by anything else for
    /// the program's lifetime, and `base` must be aligned to [`UNIT`].
    #[must_use]
    pub const unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self {
            base,
            len: len / UNIT * UNIT,
            brk: 0,
        }
    }

    /// Bytes handed out so far.
    #[must_use]
    pub const fn used_bytes(&self) -> usize {
        self.brk
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.len
    }
}

impl ArenaGrowth for BumpBreak {
    fn base(&self) -> NonNull<u8> {
        self.base
    }

    fn extend(&mut self, units: usize) -> Result<usize, GrowError> {
        let end = units
            .checked_mul(UNIT)
            .and_then(|bytes| self.brk.checked_add(bytes))
            .filter(|&end| end <= self.len)
            .ok_or(GrowError::Exhausted)?;
        self.brk = end;
        Ok(units)
    }

    fn min_chunk_units(&self) -> usize {
        DEFAULT_MIN_CHUNK_UNITS
    }
}

/// Grows a heap through a window of kernel virtual memory, backing whole
/// pages on demand.
///
/// `window` is where the code sees the first byte of the heap; `virt_start`
/// is the address the pages are mapped at. In the kernel the two coincide.
pub struct PagedGrowth<B: PageBacking> {
    backing: B,
    window: NonNull<u8>,
    virt_start: VirtualAddress,
    max_bytes: usize,
    /// Bytes given to the arena.
    brk: usize,
    /// Bytes backed by pages, always page aligned and `>= brk`.
    mapped: usize,
}

// SAFETY: The window is exclusively owned by this growth strategy.
unsafe impl<B: PageBacking + Send> Send for PagedGrowth<B> {}

impl<B: PageBacking> PagedGrowth<B> {
    /// # Safety
    /// - `virt_start` must be page aligned and `[virt_start, virt_start + max_bytes)`
    ///   must be unused kernel address space.
    /// - Once a page is backed, `window + offset` must access the page at
    ///   `virt_start + offset`.
    #[must_use]
    pub const unsafe fn new(
        backing: B,
        window: NonNull<u8>,
        virt_start: VirtualAddress,
        max_bytes: usize,
    ) -> Self {
        Self {
            backing,
            window,
            virt_start,
            max_bytes: max_bytes / PAGE * PAGE,
            brk: 0,
            mapped: 0,
        }
    }

    /// Back the first `bytes` of the window now.
    ///
    /// # Errors
    /// - [`GrowError::Exhausted`] if `bytes` exceeds the window.
    /// - [`GrowError::Backing`] if a page cannot be backed; pages backed by
    ///   this call are released again.
    pub fn prefill(&mut self, bytes: usize) -> Result<(), GrowError> {
        if bytes > self.max_bytes {
            return Err(GrowError::Exhausted);
        }
        self.back_until(bytes)
    }

    #[must_use]
    pub const fn mapped_bytes(&self) -> usize {
        self.mapped
    }

    #[must_use]
    pub const fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    #[must_use]
    pub const fn virt_start(&self) -> VirtualAddress {
        self.virt_start
    }

    #[must_use]
    pub const fn backing(&self) -> &B {
        &self.backing
    }

    #[allow(clippy::cast_possible_truncation)]
    fn page_at(&self, offset: usize) -> VirtualAddress {
        VirtualAddress::new(self.virt_start.as_u32() + offset as u32)
    }

    /// Back pages until at least `bytes` of the window are usable. On
    /// failure every page backed by this call is released.
    fn back_until(&mut self, bytes: usize) -> Result<(), GrowError> {
        let start = self.mapped;
        let end = bytes.next_multiple_of(PAGE);
        let mut offset = start;
        while offset < end {
            if let Err(err) = self.backing.back_page(self.page_at(offset)) {
                warn!(
                    "heap: backing {} failed ({err}), releasing {} pages",
                    self.page_at(offset),
                    (offset - start) / PAGE
                );
                for undo in (start..offset).step_by(PAGE) {
                    self.backing.release_page(self.page_at(undo));
                }
                return Err(err.into());
            }
            offset += PAGE;
        }
        if end > start {
            debug!("heap: backed {} .. {}", self.page_at(start), self.page_at(end));
            self.mapped = end;
        }
        Ok(())
    }
}

impl<B: PageBacking> ArenaGrowth for PagedGrowth<B> {
    fn base(&self) -> NonNull<u8> {
        self.window
    }

    fn extend(&mut self, units: usize) -> Result<usize, GrowError> {
        let target = units
            .checked_mul(UNIT)
            .and_then(|bytes| self.brk.checked_add(bytes))
            .filter(|&end| end <= self.max_bytes)
            .ok_or(GrowError::Exhausted)?;
        self.back_until(target)?;
        let added = (self.mapped - self.brk) / UNIT;
        self.brk = self.mapped;
        Ok(added)
    }

    fn min_chunk_units(&self) -> usize {
        PAGE / UNIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    /// Backs pages by recording them; fails once `budget` pages are live.
    struct Recorder {
        live: Vec<VirtualAddress>,
        budget: usize,
    }

    impl PageBacking for Recorder {
        fn back_page(&mut self, virt: VirtualAddress) -> Result<(), MapError> {
            if self.live.len() == self.budget {
                return Err(MapError::OutOfFrames);
            }
            self.live.push(virt);
            Ok(())
        }

        fn release_page(&mut self, virt: VirtualAddress) {
            self.live.retain(|v| *v != virt);
        }
    }

    fn paged(budget: usize) -> PagedGrowth<Recorder> {
        let recorder = Recorder {
            live: Vec::new(),
            budget,
        };
        unsafe {
            PagedGrowth::new(
                recorder,
                NonNull::dangling(),
                VirtualAddress::new(0xD000_0000),
                16 * PAGE,
            )
        }
    }

    #[test]
    fn bump_break_stops_at_the_end() {
        let mut bytes = [0u8; 4 * UNIT + 3];
        let mut bump = unsafe { BumpBreak::new(NonNull::from(&mut bytes).cast(), bytes.len()) };
        assert_eq!(bump.capacity(), 4 * UNIT);
        assert_eq!(bump.extend(3), Ok(3));
        assert_eq!(bump.extend(2), Err(GrowError::Exhausted));
        assert_eq!(bump.extend(1), Ok(1));
        assert_eq!(bump.used_bytes(), 4 * UNIT);
    }

    #[test]
    fn paged_growth_hands_out_whole_pages() {
        let mut growth = paged(16);
        assert_eq!(growth.extend(1), Ok(PAGE / UNIT));
        assert_eq!(growth.backing().live, [VirtualAddress::new(0xD000_0000)]);
        assert_eq!(growth.extend(PAGE / UNIT + 1), Ok(2 * PAGE / UNIT));
        assert_eq!(growth.mapped_bytes(), 3 * PAGE);
    }

    #[test]
    fn prefilled_pages_are_handed_out_without_backing() {
        let mut growth = paged(16);
        growth.prefill(2 * PAGE).unwrap();
        assert_eq!(growth.backing().live.len(), 2);
        assert_eq!(growth.extend(1), Ok(2 * PAGE / UNIT));
        assert_eq!(growth.backing().live.len(), 2);
    }

    #[test]
    fn failed_step_is_rolled_back() {
        let mut growth = paged(3);
        growth.prefill(PAGE).unwrap();
        assert_eq!(
            growth.extend(4 * PAGE / UNIT),
            Err(GrowError::Backing(MapError::OutOfFrames))
        );
        assert_eq!(growth.backing().live, [VirtualAddress::new(0xD000_0000)]);
        assert_eq!(growth.mapped_bytes(), PAGE);
        assert_eq!(growth.prefill(17 * PAGE), Err(GrowError::Exhausted));
    }
}
