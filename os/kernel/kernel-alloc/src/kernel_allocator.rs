//! # Kernel Global Allocator
//!
//! [`KernelAllocator`] serves allocations from two [`FreeListAllocator`]s:
//!
//! - the **bootstrap heap**, a fixed region in `.bss` that is available from
//!   the first instruction;
//! - the **kernel heap**, a window of kernel virtual memory that grows page
//!   by page once the frame allocator and the address space exist.
//!
//! Until [`install_kernel_heap`](KernelAllocator::install_kernel_heap) is
//! called everything comes from the bootstrap heap; afterwards everything new
//! comes from the kernel heap. Blocks are returned to whichever heap owns
//! them, so early allocations can still be freed later.

use crate::free_list::FreeListAllocator;
use crate::growth::{BumpBreak, PagedGrowth};
use crate::static_heap::take_bootstrap_region;
use crate::vmm::PageBacking;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{NonNull, null_mut};
use kernel_sync::SpinLock;
use log::debug;

pub type BootstrapHeap = FreeListAllocator<BumpBreak>;
pub type KernelHeap<B> = FreeListAllocator<PagedGrowth<B>>;

pub struct KernelAllocator<B: PageBacking> {
    bootstrap: SpinLock<Option<BootstrapHeap>>,
    heap: SpinLock<Option<KernelHeap<B>>>,
}

impl<B: PageBacking> KernelAllocator<B> {
    pub const fn new() -> Self {
        Self {
            bootstrap: SpinLock::new(None),
            heap: SpinLock::new(None),
        }
    }

    /// Use `heap` as the bootstrap heap instead of the static region.
    ///
    /// # Errors
    /// Gives `heap` back if a bootstrap heap is already in place.
    pub fn install_bootstrap(&self, heap: BootstrapHeap) -> Result<(), BootstrapHeap> {
        self.bootstrap.with_lock(|slot| match slot {
            Some(_) => Err(heap),
            None => {
                *slot = Some(heap);
                Ok(())
            }
        })
    }

    /// Serve all further allocations from `heap`.
    ///
    /// # Errors
    /// Gives `heap` back if a kernel heap is already installed.
    pub fn install_kernel_heap(&self, heap: KernelHeap<B>) -> Result<(), KernelHeap<B>> {
        self.heap.with_lock(|slot| match slot {
            Some(_) => Err(heap),
            None => {
                debug!(
                    "kernel heap installed at {} ({} bytes mapped)",
                    heap.growth().virt_start(),
                    heap.growth().mapped_bytes()
                );
                *slot = Some(heap);
                Ok(())
            }
        })
    }

    #[must_use]
    pub fn has_kernel_heap(&self) -> bool {
        self.heap.with_lock(|slot| slot.is_some())
    }

    /// Run `f` on the kernel heap, if installed.
    pub fn with_kernel_heap<R>(&self, f: impl FnOnce(&mut KernelHeap<B>) -> R) -> Option<R> {
        self.heap.with_lock(|slot| slot.as_mut().map(f))
    }

    /// Run `f` on the bootstrap heap, claiming the static region on first use.
    pub fn with_bootstrap<R>(&self, f: impl FnOnce(&mut BootstrapHeap) -> R) -> Option<R> {
        self.bootstrap.with_lock(|slot| {
            if slot.is_none() {
                *slot = take_bootstrap_region().map(FreeListAllocator::new);
            }
            slot.as_mut().map(f)
        })
    }
}

impl<B: PageBacking> Default for KernelAllocator<B> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<B: PageBacking + Send> GlobalAlloc for KernelAllocator<B> {
    /// Allocate from the kernel heap if installed, the bootstrap heap otherwise.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies. Caller must handle a null return (OOM).
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let served = self
            .with_kernel_heap(|heap| heap.allocate_layout(layout))
            .or_else(|| self.with_bootstrap(|heap| heap.allocate_layout(layout)));
        match served {
            Some(Ok(ptr)) => ptr.as_ptr(),
            _ => null_mut(),
        }
    }

    /// Return `ptr` to the heap that owns it.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies. `ptr` must come from a prior allocation.
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        let freed = self.with_kernel_heap(|heap| {
            let owned = heap.owns(ptr);
            if owned {
                heap.free(ptr);
            }
            owned
        });
        if freed != Some(true) {
            let freed = self.bootstrap.with_lock(|slot| {
                slot.as_mut()
                    .filter(|heap| heap.owns(ptr))
                    .map(|heap| heap.free(ptr))
            });
            debug_assert!(freed.is_some(), "dealloc of {ptr:p} owned by no heap");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::free_list::UNIT;
    use alloc::boxed::Box;
    use kernel_memory_addresses::VirtualAddress;
    use kernel_vmem::MapError;

    /// Pretends every page is backed; the window is host memory.
    struct HostPages;

    impl PageBacking for HostPages {
        fn back_page(&mut self, _virt: VirtualAddress) -> Result<(), MapError> {
            Ok(())
        }

        fn release_page(&mut self, _virt: VirtualAddress) {}
    }

    #[repr(C, align(4096))]
    struct Window([u8; 64 * 1024]);

    fn leaked_window() -> NonNull<u8> {
        NonNull::from(Box::leak(Box::new(Window([0; 64 * 1024])))).cast()
    }

    fn allocator() -> KernelAllocator<HostPages> {
        let allocator = KernelAllocator::new();
        let bump = unsafe { BumpBreak::new(leaked_window(), 64 * 1024) };
        assert!(allocator.install_bootstrap(FreeListAllocator::new(bump)).is_ok());
        allocator
    }

    fn kernel_heap() -> KernelHeap<HostPages> {
        let growth = unsafe {
            PagedGrowth::new(
                HostPages,
                leaked_window(),
                VirtualAddress::new(0xD000_0000),
                64 * 1024,
            )
        };
        FreeListAllocator::new(growth)
    }

    #[test]
    fn switches_to_the_kernel_heap_and_routes_frees() {
        let allocator = allocator();
        let layout = Layout::from_size_align(48, 8).unwrap();

        let early = unsafe { allocator.alloc(layout) };
        assert!(!early.is_null());
        assert!(allocator.install_kernel_heap(kernel_heap()).is_ok());
        assert!(allocator.has_kernel_heap());
        assert!(allocator.install_kernel_heap(kernel_heap()).is_err());

        let late = unsafe { allocator.alloc(layout) };
        assert!(!late.is_null());
        let late_ptr = NonNull::new(late).unwrap();
        assert_eq!(allocator.with_kernel_heap(|h| h.owns(late_ptr)), Some(true));

        unsafe {
            allocator.dealloc(early, layout);
            allocator.dealloc(late, layout);
        }
        assert_eq!(
            allocator.with_kernel_heap(|h| (h.free_blocks(), h.free_units() == h.arena_units())),
            Some((1, true))
        );
        assert_eq!(
            allocator.with_bootstrap(|h| h.free_units() == h.arena_units()),
            Some(true)
        );
    }

    #[test]
    fn over_aligned_requests_get_null() {
        let allocator = allocator();
        let layout = Layout::from_size_align(64, UNIT * 2).unwrap();
        assert!(unsafe { allocator.alloc(layout) }.is_null());
        let zeroed = unsafe { allocator.alloc_zeroed(Layout::new::<[u64; 4]>()) };
        assert!(!zeroed.is_null());
    }
}
