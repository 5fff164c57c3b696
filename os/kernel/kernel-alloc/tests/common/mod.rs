#![allow(dead_code)]

use kernel_alloc::frame_alloc::{FrameAllocator, FrameAllocatorConfig};
use kernel_alloc::phys_mapper::PhysMapper;
use kernel_info::boot::{KernelImage, RawMemoryDescriptor as Raw};
use kernel_memory_addresses::PhysicalAddress;
use kernel_mmap::{NormalizerConfig, normalize};
use std::cell::Cell;

/// Hands out leaked host memory in place of physical memory and remembers
/// where the allocator asked for it.
pub struct TestPhys {
    pub reach: u64,
    pub requested: Cell<Option<(PhysicalAddress, usize)>>,
}

impl TestPhys {
    pub fn new(reach: u64) -> Self {
        Self {
            reach,
            requested: Cell::new(None),
        }
    }
}

impl PhysMapper for TestPhys {
    fn reach(&self) -> u64 {
        self.reach
    }

    unsafe fn phys_to_mut_slice<'a>(&self, pa: PhysicalAddress, words: usize) -> &'a mut [u32] {
        self.requested.set(Some((pa, words)));
        // Junk, so missing initialization shows.
        vec![0xDEAD_BEEF; words].leak()
    }
}

pub const fn kernel(start: u64, end: u64) -> KernelImage {
    KernelImage::new(PhysicalAddress::new(start), PhysicalAddress::new(end))
}

/// Two RAM regions around the legacy hole, kernel at 1 MiB.
pub const SCENARIO: [Raw; 2] = [
    Raw::new(0x0, 0x9FC00, Raw::KIND_AVAILABLE),
    Raw::new(0x10_0000, 0x7F0_0000, Raw::KIND_AVAILABLE),
];

pub const SCENARIO_KERNEL: KernelImage = kernel(0x10_0000, 0x10_8000);

pub fn build(raw: &[Raw], kernel: KernelImage) -> FrameAllocator {
    let map = normalize(raw, &NormalizerConfig::GENERIC).unwrap();
    FrameAllocator::new(map, kernel, &TestPhys::new(4 << 20), FrameAllocatorConfig::default())
        .unwrap()
}
