use kernel_alloc::frame_alloc::FrameAllocError;
use kernel_alloc::growth::GrowError;
use kernel_info::boot::BootInfoError;
use kernel_mmap::NormalizeError;

/// Why memory initialization failed. Every variant is fatal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootError {
    #[error("invalid boot information: {0}")]
    BootInfo(#[from] BootInfoError),
    #[error("unusable memory map: {0}")]
    MemoryMap(#[from] NormalizeError),
    #[error("frame allocator: {0}")]
    Frames(#[from] FrameAllocError),
    #[error("kernel heap: {0}")]
    Heap(#[from] GrowError),
    #[error("a kernel heap is already installed")]
    HeapAlreadyInstalled,
}
