//! # Memory Bring-Up
//!
//! Wires the memory subsystem together in the only order that works:
//!
//! 1. normalize the firmware memory map ([`kernel_mmap`]);
//! 2. start the frame allocator, reserving the kernel image and the
//!    allocator's own bitmaps ([`kernel_alloc::frame_alloc`]);
//! 3. take over the active page tables through the recursive window
//!    ([`kernel_vmem`]);
//! 4. map the initial kernel heap and switch the global allocator to it.
//!
//! Until step 4 the global allocator serves from the static bootstrap heap.
//! The result is a [`MemoryContext`] that owns the frame allocator and the
//! address space; there are no other globals besides the allocator itself.
//!
//! ```ignore
//! let args = KernelArgs::from_words(cmdline)?;
//! let mut info = BootInfo::new(args, &firmware_map);
//! let memory = kernel_boot::init_kernel_memory(&mut info, kernel_image);
//! let frame = memory.memory().lock().vmm().map_fresh_page(virt, PageFlags::KERNEL)?;
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod config;
mod context;
mod error;

pub use crate::config::{BootConfig, HEAP_SIZE_ARG, HeapConfig};
pub use crate::context::{MemoryContext, SharedMemory, init_memory, init_memory_or_panic};
pub use crate::error::BootError;

#[cfg(all(target_os = "none", target_arch = "x86"))]
pub use self::kernel::{GLOBAL_ALLOCATOR, init_kernel_memory};

#[cfg(all(target_os = "none", target_arch = "x86"))]
mod kernel {
    use crate::{BootConfig, MemoryContext, SharedMemory, init_memory_or_panic};
    use kernel_alloc::kernel_allocator::KernelAllocator;
    use kernel_alloc::phys_mapper::HigherHalfPhysMapper;
    use kernel_info::boot::{BootInfo, KernelImage};
    use kernel_vmem::{AddressSpace, RecursiveWindow};

    /// The installed global allocator instance.
    #[global_allocator]
    pub static GLOBAL_ALLOCATOR: KernelAllocator<&'static SharedMemory<RecursiveWindow>> =
        KernelAllocator::new();

    /// Bring up memory with the i386 defaults; panics on failure.
    pub fn init_kernel_memory(
        boot_info: &mut BootInfo<'_>,
        kernel: KernelImage,
    ) -> &'static MemoryContext<RecursiveWindow> {
        let config = BootConfig::PC_I386;
        let Some(window) = config.heap.window() else {
            panic!("kernel heap window at {} is not addressable", config.heap.base);
        };
        // SAFETY: The boot code installed the recursive slot, and the heap
        // window is kernel virtual memory seen at its own address.
        unsafe {
            init_memory_or_panic(
                &GLOBAL_ALLOCATOR,
                boot_info,
                kernel,
                &HigherHalfPhysMapper,
                AddressSpace::new(RecursiveWindow),
                window,
                &config,
            )
        }
    }
}
