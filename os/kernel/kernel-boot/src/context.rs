use crate::{BootConfig, BootError, HeapConfig};
use alloc::boxed::Box;
use core::ptr::NonNull;
use kernel_alloc::frame_alloc::FrameAllocator;
use kernel_alloc::free_list::FreeListAllocator;
use kernel_alloc::growth::PagedGrowth;
use kernel_alloc::kernel_allocator::{KernelAllocator, KernelHeap};
use kernel_alloc::phys_mapper::PhysMapper;
use kernel_alloc::vmm::KernelMemory;
use kernel_info::boot::{BootInfo, KernelImage};
use kernel_mmap::normalize;
use kernel_sync::IrqSpinLock;
use kernel_vmem::{AddressSpace, TableWindow};
use log::{error, info};

/// Shared handle to the kernel's frames and page tables.
pub type SharedMemory<W> = IrqSpinLock<KernelMemory<W>>;

/// The memory subsystem after boot: frame allocator and address space behind
/// one lock, plus the heap layout they were configured with.
pub struct MemoryContext<W: TableWindow> {
    memory: SharedMemory<W>,
    heap: HeapConfig,
}

impl<W: TableWindow> MemoryContext<W> {
    /// Normalize the firmware map, start the frame allocator and take over
    /// `space`.
    ///
    /// Fills in [`BootInfo::observed_memory`].
    ///
    /// # Errors
    /// [`BootError::MemoryMap`] or [`BootError::Frames`].
    pub fn new(
        boot_info: &mut BootInfo<'_>,
        kernel: KernelImage,
        phys: &impl PhysMapper,
        space: AddressSpace<W>,
        config: &BootConfig,
    ) -> Result<Self, BootError> {
        info!(
            "Normalizing {} firmware memory descriptors",
            boot_info.memory_map.len()
        );
        let map = normalize(boot_info.memory_map, &config.normalizer)?;
        map.log_regions();
        boot_info.observed_memory = map.observed_bytes();

        let frames = FrameAllocator::new(map, kernel, phys, config.frames)?;
        frames.log_statistics();

        Ok(Self {
            memory: IrqSpinLock::new(KernelMemory::new(frames, space)),
            heap: config.heap.with_args(&boot_info.args),
        })
    }

    pub const fn memory(&self) -> &SharedMemory<W> {
        &self.memory
    }

    pub const fn heap_config(&self) -> HeapConfig {
        self.heap
    }

    /// Map the initial kernel heap and return an allocator over it.
    ///
    /// # Safety
    /// Once a page of the heap window is mapped, `window + offset` must
    /// access `heap_config().base + offset`. At most one heap may be built
    /// per context.
    ///
    /// # Errors
    /// [`BootError::Heap`] if the initial size cannot be mapped; whatever was
    /// mapped is released again.
    pub unsafe fn init_kernel_heap(
        &self,
        window: NonNull<u8>,
    ) -> Result<KernelHeap<&SharedMemory<W>>, BootError> {
        let heap = self.heap;
        // SAFETY: Upheld by the caller.
        let mut growth =
            unsafe { PagedGrowth::new(&self.memory, window, heap.base, heap.max_bytes) };
        growth.prefill(heap.initial_bytes)?;
        info!(
            "Kernel heap at {}: {} KiB mapped, up to {} KiB",
            heap.base,
            growth.mapped_bytes() >> 10,
            heap.max_bytes >> 10
        );
        Ok(FreeListAllocator::new(growth))
    }
}

/// Bring up the whole memory subsystem and switch `allocator` to the kernel
/// heap.
///
/// The context itself is allocated from the bootstrap heap and lives
/// forever.
///
/// # Safety
/// - `space` must describe the active address space (see [`AddressSpace::new`]).
/// - `window` must alias the heap window as for
///   [`MemoryContext::init_kernel_heap`].
///
/// # Errors
/// Any [`BootError`]; all of them are fatal.
pub unsafe fn init_memory<W: TableWindow + 'static>(
    allocator: &'static KernelAllocator<&'static SharedMemory<W>>,
    boot_info: &mut BootInfo<'_>,
    kernel: KernelImage,
    phys: &impl PhysMapper,
    space: AddressSpace<W>,
    window: NonNull<u8>,
    config: &BootConfig,
) -> Result<&'static MemoryContext<W>, BootError> {
    let context: &'static MemoryContext<W> = Box::leak(Box::new(MemoryContext::new(
        boot_info, kernel, phys, space, config,
    )?));
    // SAFETY: Upheld by the caller; this is the only heap built on `context`.
    let heap = unsafe { context.init_kernel_heap(window)? };
    allocator
        .install_kernel_heap(heap)
        .map_err(|_| BootError::HeapAlreadyInstalled)?;
    info!("Memory subsystem online");
    Ok(context)
}

/// [`init_memory`], escalating failure to a panic.
///
/// # Safety
/// See [`init_memory`].
///
/// # Panics
/// If memory initialization fails.
pub unsafe fn init_memory_or_panic<W: TableWindow + 'static>(
    allocator: &'static KernelAllocator<&'static SharedMemory<W>>,
    boot_info: &mut BootInfo<'_>,
    kernel: KernelImage,
    phys: &impl PhysMapper,
    space: AddressSpace<W>,
    window: NonNull<u8>,
    config: &BootConfig,
) -> &'static MemoryContext<W> {
    // SAFETY: Forwarded to the caller.
    match unsafe { init_memory(allocator, boot_info, kernel, phys, space, window, config) } {
        Ok(context) => context,
        Err(err) => {
            error!("Memory initialization failed: {err}");
            panic!("memory initialization failed: {err}");
        }
    }
}
