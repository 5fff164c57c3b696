//! # Free-List Allocator
//!
//! A next-fit allocator over an arena of header-sized [`Unit`]s.
//!
//! Every block, free or allocated, starts with a one-unit header holding its
//! size in units. Free blocks additionally link to the next free block by
//! *unit index*, in ascending address order. The list is circular and always
//! contains a zero-size sentinel that lives in the allocator itself, outside
//! the arena; its index ([`SENTINEL`]) compares above every arena index, so
//! the list wraps exactly once, at the sentinel.
//!
//! ```text
//!  arena (units)                               sentinel (in struct)
//! +----+------------+----+-------+----+----+   +------+
//! | h  |  payload   | h  |  ...  | h  |    |   | size |
//! +----+------------+----+-------+----+----+   | = 0  |
//!   ^ free ─────────────────────────^ free ──> +------+ ──> first free
//! ```
//!
//! The arena starts empty. When a full lap of the list finds nothing large
//! enough, the [`ArenaGrowth`] strategy appends units at the end of the
//! arena and the new chunk is freed into the list.

use crate::growth::ArenaGrowth;
use core::alloc::Layout;
use core::ptr::NonNull;
use log::{debug, error, trace};

/// Block header; also the allocation granule.
#[repr(C, align(16))]
#[derive(Debug, Copy, Clone)]
pub struct Unit {
    /// Index of the next free block. Meaningless for allocated blocks.
    next: usize,
    /// Block size in units, header included.
    size: usize,
}

/// Allocation granule in bytes.
pub const UNIT: usize = size_of::<Unit>();

/// Index of the sentinel block.
pub const SENTINEL: usize = usize::MAX;

/// Smallest chunk worth growing the arena by, in units.
pub const DEFAULT_MIN_CHUNK_UNITS: usize = 128;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("the heap arena cannot grow any further")]
    ArenaExhausted,
    #[error("alignment above the heap granule is not supported")]
    UnsupportedAlignment,
    #[error("zero-sized allocation")]
    ZeroSized,
}

pub struct FreeListAllocator<G: ArenaGrowth> {
    sentinel: Unit,
    /// Free block the next search starts after.
    cursor: usize,
    arena_units: usize,
    free_units: usize,
    growth: G,
}

impl<G: ArenaGrowth> FreeListAllocator<G> {
    /// An allocator with an empty arena; memory is requested from `growth`
    /// on first use.
    pub const fn new(growth: G) -> Self {
        Self {
            sentinel: Unit {
                next: SENTINEL,
                size: 0,
            },
            cursor: SENTINEL,
            arena_units: 0,
            free_units: 0,
            growth,
        }
    }

    /// Allocate `n_bytes`, aligned to [`UNIT`].
    ///
    /// # Errors
    /// - [`HeapError::ZeroSized`] for a zero-byte request.
    /// - [`HeapError::ArenaExhausted`] if the arena cannot grow enough.
    pub fn allocate(&mut self, n_bytes: usize) -> Result<NonNull<u8>, HeapError> {
        if n_bytes == 0 {
            return Err(HeapError::ZeroSized);
        }
        let n_units = n_bytes
            .div_ceil(UNIT)
            .checked_add(1)
            .ok_or(HeapError::ArenaExhausted)?;

        if let Some(block) = self.take(n_units) {
            return Ok(self.payload(block));
        }
        self.grow(n_units)?;
        self.take(n_units)
            .map(|block| self.payload(block))
            .ok_or(HeapError::ArenaExhausted)
    }

    /// Like [`allocate`](Self::allocate), with the payload zeroed.
    ///
    /// # Errors
    /// See [`allocate`](Self::allocate).
    pub fn allocate_zeroed(&mut self, n_bytes: usize) -> Result<NonNull<u8>, HeapError> {
        let ptr = self.allocate(n_bytes)?;
        // SAFETY: The block was just carved from the arena and holds at least `n_bytes`.
        unsafe { ptr.as_ptr().write_bytes(0, n_bytes) };
        Ok(ptr)
    }

    /// Allocate for `layout`.
    ///
    /// # Errors
    /// - [`HeapError::UnsupportedAlignment`] if `layout` needs more than [`UNIT`] alignment.
    /// - See [`allocate`](Self::allocate) for the rest.
    pub fn allocate_layout(&mut self, layout: Layout) -> Result<NonNull<u8>, HeapError> {
        if layout.align() > UNIT {
            return Err(HeapError::UnsupportedAlignment);
        }
        self.allocate(layout.size())
    }

    /// Return a block obtained from [`allocate`](Self::allocate).
    ///
    /// Pointers this allocator does not own are ignored (and trip a debug
    /// assertion).
    pub fn free(&mut self, ptr: NonNull<u8>) {
        let block = self.block_of(ptr);
        debug_assert!(block.is_some(), "freeing {ptr:p} not owned by this heap");
        if let Some(block) = block {
            self.release(block);
        }
    }

    /// Whether `ptr` is a payload address inside this arena.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.block_of(ptr).is_some()
    }

    /// Number of blocks on the free list, sentinel excluded.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        let mut count = 0;
        let mut p = self.node(SENTINEL).next;
        while p != SENTINEL {
            count += 1;
            p = self.node(p).next;
        }
        count
    }

    #[must_use]
    pub const fn free_units(&self) -> usize {
        self.free_units
    }

    #[must_use]
    pub const fn arena_units(&self) -> usize {
        self.arena_units
    }

    #[must_use]
    pub const fn growth(&self) -> &G {
        &self.growth
    }

    /// Next-fit search from the cursor. Returns the header index of a block
    /// of exactly `n_units`, removed from the free list.
    fn take(&mut self, n_units: usize) -> Option<usize> {
        let mut prev = self.cursor;
        let mut p = self.node(prev).next;
        loop {
            let block = self.node(p);
            if block.size >= n_units {
                let taken = if block.size == n_units {
                    self.set_next(prev, block.next);
                    p
                } else {
                    // Carve from the tail so the free block stays linked.
                    let remainder = block.size - n_units;
                    self.set_size(p, remainder);
                    let tail = p + remainder;
                    self.write(tail, Unit { next: 0, size: n_units });
                    tail
                };
                self.cursor = prev;
                self.free_units -= n_units;
                trace!("heap: took {n_units} units at index {taken}");
                return Some(taken);
            }
            if p == self.cursor {
                return None;
            }
            prev = p;
            p = block.next;
        }
    }

    /// Put the block with header `bp` back on the free list, merging it with
    /// adjacent free neighbours. A block that is already free is left alone.
    fn release(&mut self, bp: usize) {
        let Some(p) = self.insertion_point(bp) else {
            error!("heap: double free of block {bp} ignored");
            return;
        };
        let size = self.node(bp).size;

        let next = self.node(p).next;
        let mut merged = Unit { next, size };
        if next != SENTINEL && bp + size == next {
            let upper = self.node(next);
            merged = Unit {
                next: upper.next,
                size: size + upper.size,
            };
        }
        self.write(bp, merged);

        let lower = self.node(p);
        if p != SENTINEL && p + lower.size == bp {
            self.write(
                p,
                Unit {
                    next: merged.next,
                    size: lower.size + merged.size,
                },
            );
        } else {
            self.set_next(p, bp);
        }

        self.cursor = p;
        self.free_units += size;
    }

    /// The free block after which `bp` belongs, or `None` if `bp` lies in a
    /// free block.
    ///
    /// Free blocks are at least one unit long, so one lap of the list takes
    /// at most `arena_units + 1` steps.
    fn insertion_point(&self, bp: usize) -> Option<usize> {
        let mut p = self.cursor;
        for _ in 0..=self.arena_units {
            let here = self.node(p);
            if p != SENTINEL && (p..p + here.size).contains(&bp) {
                return None;
            }
            if p < bp && bp < here.next {
                return Some(p);
            }
            // At the wrap point: `bp` goes after the highest or before the lowest block.
            if p >= here.next && (bp > p || bp < here.next) {
                return Some(p);
            }
            p = here.next;
        }
        None
    }

    /// Append at least `n_units` to the arena and free them into the list.
    fn grow(&mut self, n_units: usize) -> Result<(), HeapError> {
        let wanted = n_units.max(self.growth.min_chunk_units());
        let added = match self.growth.extend(wanted) {
            Ok(added) => added,
            Err(err) if wanted > n_units => {
                debug!("heap: growing by {wanted} units failed ({err}), retrying with {n_units}");
                self.growth.extend(n_units).map_err(|err| {
                    debug!("heap: growth failed: {err}");
                    HeapError::ArenaExhausted
                })?
            }
            Err(err) => {
                debug!("heap: growth failed: {err}");
                return Err(HeapError::ArenaExhausted);
            }
        };
        if added == 0 {
            return Err(HeapError::ArenaExhausted);
        }

        let chunk = self.arena_units;
        self.arena_units += added;
        self.write(chunk, Unit { next: 0, size: added });
        debug!("heap: arena grew by {added} units to {}", self.arena_units);
        self.release(chunk);
        Ok(())
    }

    fn payload(&self, block: usize) -> NonNull<u8> {
        // SAFETY: `block` is a header inside the arena, so the unit after it is too.
        unsafe { self.growth.base().add((block + 1) * UNIT) }
    }

    /// Header index of the allocated block whose payload starts at `ptr`.
    fn block_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = (ptr.as_ptr() as usize).checked_sub(self.growth.base().as_ptr() as usize)?;
        if offset < UNIT || !offset.is_multiple_of(UNIT) {
            return None;
        }
        let block = offset / UNIT - 1;
        (block < self.arena_units).then_some(block)
    }

    fn unit_ptr(&self, idx: usize) -> *mut Unit {
        assert!(
            idx < self.arena_units,
            "heap index {idx} outside the arena of {} units",
            self.arena_units
        );
        // SAFETY: Bounds checked above; the arena base is unit aligned.
        unsafe { self.growth.base().cast::<Unit>().as_ptr().add(idx) }
    }

    fn node(&self, idx: usize) -> Unit {
        if idx == SENTINEL {
            return self.sentinel;
        }
        // SAFETY: The arena is mapped and exclusively ours up to `arena_units`.
        unsafe { self.unit_ptr(idx).read() }
    }

    fn write(&mut self, idx: usize, unit: Unit) {
        if idx == SENTINEL {
            self.sentinel = unit;
            return;
        }
        // SAFETY: See `node`.
        unsafe { self.unit_ptr(idx).write(unit) };
    }

    fn set_next(&mut self, idx: usize, next: usize) {
        let unit = self.node(idx);
        self.write(idx, Unit { next, ..unit });
    }

    fn set_size(&mut self, idx: usize, size: usize) {
        let unit = self.node(idx);
        self.write(idx, Unit { size, ..unit });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::growth::BumpBreak;
    use alloc::vec::Vec;

    #[repr(C, align(16))]
    struct Arena([u8; 64 * 1024]);

    fn heap(arena: &mut Arena) -> FreeListAllocator<BumpBreak> {
        let base = NonNull::from(&mut arena.0).cast::<u8>();
        FreeListAllocator::new(unsafe { BumpBreak::new(base, arena.0.len()) })
    }

    #[test]
    fn first_allocation_grows_by_the_minimum_chunk() {
        let mut arena = Arena([0; 64 * 1024]);
        let mut heap = heap(&mut arena);
        assert_eq!(heap.arena_units(), 0);

        let p = heap.allocate(40).unwrap();
        assert_eq!(heap.arena_units(), DEFAULT_MIN_CHUNK_UNITS);
        // 40 bytes need 3 payload units plus the header.
        assert_eq!(heap.free_units(), DEFAULT_MIN_CHUNK_UNITS - 4);
        assert_eq!(heap.free_blocks(), 1);
        assert!(heap.owns(p));
        assert!(p.as_ptr().addr().is_multiple_of(UNIT));
    }

    #[test]
    fn blocks_are_carved_from_the_tail() {
        let mut arena = Arena([0; 64 * 1024]);
        let mut heap = heap(&mut arena);
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        assert_eq!(a.as_ptr() as usize - b.as_ptr() as usize, 2 * UNIT);
    }

    #[test]
    fn freeing_everything_leaves_one_block() {
        let mut arena = Arena([0; 64 * 1024]);
        let mut heap = heap(&mut arena);
        let ptrs: Vec<_> = (1..20).map(|i| heap.allocate(i * 24).unwrap()).collect();
        for p in ptrs.iter().step_by(2) {
            heap.free(*p);
        }
        assert!(heap.free_blocks() > 1);
        for p in ptrs.iter().skip(1).step_by(2) {
            heap.free(*p);
        }
        assert_eq!(heap.free_blocks(), 1);
        assert_eq!(heap.free_units(), heap.arena_units());
    }

    #[test]
    fn exact_fit_unlinks_the_block() {
        let mut arena = Arena([0; 64 * 1024]);
        let mut heap = heap(&mut arena);
        let a = heap.allocate(100).unwrap();
        let _guard = heap.allocate(16).unwrap();
        heap.free(a);
        assert_eq!(heap.free_blocks(), 2);
        let again = heap.allocate(100).unwrap();
        assert_eq!(again, a);
        assert_eq!(heap.free_blocks(), 1);
    }

    #[test]
    fn double_free_is_ignored() {
        let mut arena = Arena([0; 64 * 1024]);
        let mut heap = heap(&mut arena);
        let a = heap.allocate(100).unwrap();
        let _guard = heap.allocate(16).unwrap();
        heap.free(a);
        let (blocks, units) = (heap.free_blocks(), heap.free_units());

        heap.free(a);
        assert_eq!(heap.free_blocks(), blocks);
        assert_eq!(heap.free_units(), units);
        assert_eq!(heap.allocate(100).unwrap(), a);
    }

    /// Small deterministic generator so failures are reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        #[allow(clippy::cast_possible_truncation)]
        fn below(&mut self, n: usize) -> usize {
            (self.next() % n as u64) as usize
        }
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn random_trace_collapses_to_one_block() {
        let mut arena = Arena([0; 64 * 1024]);
        let start = arena.0.as_ptr() as usize;
        let mut heap = heap(&mut arena);
        let mut rng = XorShift(0x2545_F491_4F6C_DD1D);
        // (address, length, fill byte)
        let mut live: Vec<(usize, usize, u8)> = Vec::new();

        for step in 0..4_000_u32 {
            let free_one = !live.is_empty() && rng.below(3) == 0;
            if !free_one {
                let len = 1 + rng.below(700);
                match heap.allocate(len) {
                    Ok(p) => {
                        let tag = step as u8;
                        unsafe { p.as_ptr().write_bytes(tag, len) };
                        live.push((p.as_ptr() as usize, len, tag));
                    }
                    Err(err) => {
                        assert_eq!(err, HeapError::ArenaExhausted);
                        assert!(!live.is_empty(), "empty heap cannot serve {len} bytes");
                    }
                }
            }
            if free_one || live.len() > 60 {
                let (addr, len, tag) = live.swap_remove(rng.below(live.len()));
                let bytes = unsafe { core::slice::from_raw_parts(addr as *const u8, len) };
                assert!(bytes.iter().all(|&b| b == tag), "block at {addr:#x} was overwritten");
                heap.free(NonNull::new(addr as *mut u8).unwrap());
            }

            let end = start + heap.arena_units() * UNIT;
            let mut spans: Vec<_> = live.iter().map(|&(a, l, _)| (a, a + l)).collect();
            spans.sort_unstable();
            assert!(spans.iter().all(|&(lo, hi)| start < lo && hi <= end));
            assert!(spans.windows(2).all(|w| w[0].1 <= w[1].0), "overlap at step {step}");
        }

        assert!(heap.arena_units() > DEFAULT_MIN_CHUNK_UNITS);
        while !live.is_empty() {
            let (addr, _, _) = live.swap_remove(rng.below(live.len()));
            heap.free(NonNull::new(addr as *mut u8).unwrap());
        }
        assert_eq!(heap.free_blocks(), 1);
        assert_eq!(heap.free_units(), heap.arena_units());
    }

    #[test]
    fn rejects_what_it_cannot_serve() {
        let mut arena = Arena([0; 64 * 1024]);
        let mut heap = heap(&mut arena);
        assert_eq!(heap.allocate(0), Err(HeapError::ZeroSized));
        assert_eq!(
            heap.allocate_layout(Layout::from_size_align(64, 64).unwrap()),
            Err(HeapError::UnsupportedAlignment)
        );
        assert_eq!(heap.allocate(128 * 1024), Err(HeapError::ArenaExhausted));
        assert!(heap.allocate_layout(Layout::new::<u64>()).is_ok());
    }

    #[test]
    fn zeroed_allocation_clears_reused_memory() {
        let mut arena = Arena([0; 64 * 1024]);
        let mut heap = heap(&mut arena);
        let p = heap.allocate(64).unwrap();
        unsafe { p.as_ptr().write_bytes(0xAA, 64) };
        heap.free(p);
        let q = heap.allocate_zeroed(64).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(q.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
