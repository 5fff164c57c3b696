mod common;

use common::{SCENARIO, SCENARIO_KERNEL, build, kernel};
use kernel_alloc::free_list::{FreeListAllocator, HeapError};
use kernel_alloc::growth::{GrowError, PagedGrowth};
use kernel_alloc::vmm::{KernelMemory, PageBacking};
use kernel_info::boot::RawMemoryDescriptor as Raw;
use kernel_info::memory::KERNEL_HEAP_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sync::IrqSpinLock;
use kernel_vmem::soft_mmu::SoftMmu;
use kernel_vmem::{AddressSpace, MapError, MapMode, PageFlags};
use std::ptr::NonNull;

fn memory(raw: &[Raw], image: kernel_info::boot::KernelImage) -> KernelMemory<SoftMmu> {
    let mut frames = build(raw, image);
    let directory = frames.allocate_frame().unwrap();
    let space = unsafe { AddressSpace::new(SoftMmu::new(directory)) };
    KernelMemory::new(frames, space)
}

#[repr(C, align(4096))]
struct Window([u8; 256 * 1024]);

fn host_window() -> NonNull<u8> {
    NonNull::from(Box::leak(Box::new(Window([0; 256 * 1024])))).cast()
}

#[test]
fn unmapping_returns_the_page_and_its_table() {
    let mut memory = memory(&SCENARIO, SCENARIO_KERNEL);
    let mut vmm = memory.vmm();
    let virt = VirtualAddress::new(0xE000_0000);

    let before = vmm.frames().free_frames();
    let p = vmm.frames().allocate_frame().unwrap();
    vmm.map(p.base(), virt, PageFlags::KERNEL, MapMode::Fresh).unwrap();
    assert_eq!(vmm.translate(virt + 0x123), Some(p.base() + 0x123));
    assert_eq!(vmm.frames().free_frames(), before - 2);

    assert_eq!(vmm.unmap(virt), Ok(p));
    assert_eq!(vmm.frames().free_frames(), before);
    assert!(!vmm.is_mapped(virt));

    let q = vmm.map_fresh_page(virt, PageFlags::KERNEL).unwrap();
    assert_eq!(vmm.translate(virt), Some(q.base()));
}

#[test]
fn fresh_page_goes_back_when_mapping_fails() {
    let mut memory = memory(&SCENARIO, SCENARIO_KERNEL);
    let mut vmm = memory.vmm();
    let virt = VirtualAddress::new(0xE000_0000);
    vmm.map_fresh_page(virt, PageFlags::KERNEL).unwrap();

    let before = vmm.frames().free_frames();
    assert_eq!(
        vmm.map_fresh_page(virt, PageFlags::KERNEL),
        Err(MapError::AlreadyMapped)
    );
    assert_eq!(vmm.frames().free_frames(), before);
    let window = VirtualAddress::new(0xFFC0_0000);
    assert_eq!(
        vmm.map(PhysicalAddress::new(0x1000), window, PageFlags::KERNEL, MapMode::Bootstrap),
        Err(MapError::RecursiveWindow)
    );
}

#[test]
fn kernel_heap_grows_through_mapped_pages() {
    let memory = IrqSpinLock::new(memory(&SCENARIO, SCENARIO_KERNEL));
    let base = VirtualAddress::new(KERNEL_HEAP_BASE);
    let growth = unsafe { PagedGrowth::new(&memory, host_window(), base, 256 * 1024) };
    let mut heap = FreeListAllocator::new(growth);

    let small = heap.allocate(100).unwrap();
    assert!(memory.lock().space.is_mapped(base));
    assert!(!memory.lock().space.is_mapped(base + 0x1000));

    let big = heap.allocate(20 * 1024).unwrap();
    // 1281 units past the first page end inside the seventh page.
    assert_eq!(heap.growth().mapped_bytes(), 7 * 0x1000);
    assert!(memory.lock().space.is_mapped(base + 0x6000));

    assert_eq!(heap.allocate(300 * 1024), Err(HeapError::ArenaExhausted));
    heap.free(big);
    heap.free(small);
    assert_eq!(heap.free_blocks(), 1);
}

#[test]
fn failed_prefill_releases_every_frame() {
    let raw = [Raw::new(0x10_0000, 0x2_0000, Raw::KIND_AVAILABLE)];
    let memory = IrqSpinLock::new(memory(&raw, kernel(0x10_0000, 0x10_1000)));
    let before = memory.lock().frames.free_frames();
    assert!(before < 64);

    let mut backing = &memory;
    let base = VirtualAddress::new(KERNEL_HEAP_BASE);
    let mut growth = unsafe { PagedGrowth::new(&memory, host_window(), base, 256 * 1024) };
    assert_eq!(
        growth.prefill(256 * 1024),
        Err(GrowError::Backing(MapError::OutOfFrames))
    );
    assert_eq!(growth.mapped_bytes(), 0);
    assert_eq!(memory.lock().frames.free_frames(), before);
    assert!(!memory.lock().space.is_mapped(base));

    backing.back_page(base).unwrap();
    assert!(memory.lock().space.is_mapped(base));
    backing.release_page(base);
    assert_eq!(memory.lock().frames.free_frames(), before);
}
