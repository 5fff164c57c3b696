mod common;

use common::{SCENARIO, SCENARIO_KERNEL, TestPhys, build, kernel};
use kernel_alloc::frame_alloc::{
    FrameAllocError, FrameAllocator, FrameAllocatorConfig, ReclaimPolicy, StoragePlacement,
};
use kernel_info::boot::RawMemoryDescriptor as Raw;
use kernel_memory_addresses::{Frame, PhysicalAddress};
use kernel_mmap::{MemoryKind, NormalizerConfig, normalize};
use std::collections::HashSet;

#[test]
fn legacy_pc_scenario() {
    let map = normalize(&SCENARIO, &NormalizerConfig::GENERIC).unwrap();
    assert_eq!(map.len(), 3);
    assert_eq!(map.regions()[1].kind, MemoryKind::Unspecified);

    let phys = TestPhys::new(4 << 20);
    let mut frames =
        FrameAllocator::new(map, SCENARIO_KERNEL, &phys, FrameAllocatorConfig::default()).unwrap();

    let storage = frames.bitmap_range();
    assert_eq!(storage.placement, StoragePlacement::AfterKernel);
    assert_eq!(storage.start, PhysicalAddress::new(0x10_8000));
    assert_eq!(storage.words, 5 + 1016);
    assert_eq!(phys.requested.get(), Some((storage.start, storage.words)));

    assert_eq!(frames.regions().len(), 2);
    assert_eq!(frames.total_frames(), 159 + 32512);
    // Eight kernel frames and one bitmap frame.
    assert_eq!(frames.reserved_frames(), 9);
    assert_eq!(frames.free_frames(), frames.total_frames() - 9);

    assert_eq!(frames.allocate_frame(), Some(Frame::from_index(0)));
    assert!(frames.is_frame_used(Frame::from_index(0x108)));
    assert!(!frames.is_frame_used(Frame::from_index(0x109)));
}

#[test]
fn regions_form_a_ring() {
    let frames = build(&SCENARIO, SCENARIO_KERNEL);
    let regions = frames.regions();
    assert_eq!(regions[0].next(), 1);
    assert_eq!(regions[1].next(), 0);
    assert_eq!(regions[0].first_addr(), PhysicalAddress::new(0));
    assert_eq!(regions[0].last_addr(), PhysicalAddress::new(0x9_EFFF));
    assert_eq!(regions[1].bitmap_size(), 1016);
    assert_eq!(regions[1].used_blocks(), 9);
}

#[test]
fn never_hands_out_reserved_kernel_or_bitmap_frames() {
    let raw = [
        Raw::new(0x0, 0x9_F000, Raw::KIND_AVAILABLE),
        Raw::new(0x10_0000, 0x10_0000, Raw::KIND_AVAILABLE),
        Raw::new(0x18_0000, 0x1_0000, Raw::KIND_RESERVED),
        Raw::new(0x20_0000, 0x8_0000, Raw::KIND_AVAILABLE),
    ];
    let kernel = kernel(0x10_0000, 0x11_2345);
    let mut frames = build(&raw, kernel);
    let storage = frames.bitmap_range();

    let expected = frames.free_frames();
    let mut seen = HashSet::new();
    while let Some(frame) = frames.allocate_frame() {
        let at = frame.base().as_u64();
        assert!(!(0x18_0000..0x19_0000).contains(&at), "reserved {frame}");
        assert!(!kernel.overlaps(at, at + 1), "kernel {frame}");
        assert!(
            !(storage.start.as_u64()..storage.end().as_u64()).contains(&at),
            "bitmap {frame}"
        );
        assert!(seen.insert(frame), "handed out twice: {frame}");
    }
    assert_eq!(seen.len(), expected);
    assert_eq!(frames.free_frames(), 0);
    assert_eq!(frames.allocate_frame(), None);
}

#[test]
fn free_restores_the_count_and_the_lowest_frame_is_reused() {
    let mut frames = build(&SCENARIO, SCENARIO_KERNEL);
    let before = frames.free_frames();

    let a = frames.allocate_frame().unwrap();
    let b = frames.allocate_frame().unwrap();
    assert_eq!(b, a.next());
    frames.free_frame(a);
    assert_eq!(frames.free_frames(), before - 1);
    assert_eq!(frames.allocate_frame(), Some(a));

    frames.free_frame(a);
    frames.free_frame(b);
    assert_eq!(frames.free_frames(), before);
}

#[test]
fn cursor_moves_back_when_a_lower_region_frees() {
    let mut frames = build(&SCENARIO, SCENARIO_KERNEL);
    let low: Vec<_> = (0..159).map(|_| frames.allocate_frame().unwrap()).collect();
    let high = frames.allocate_frame().unwrap();
    assert_eq!(high.base(), PhysicalAddress::new(0x10_9000));

    frames.free_frame(low[42]);
    assert_eq!(frames.allocate_frame(), Some(low[42]));
}

#[test]
fn untracked_frames_are_ignored() {
    let mut frames = build(&SCENARIO, SCENARIO_KERNEL);
    let before = frames.free_frames();
    let hole = Frame::from_index(0xB8);
    assert!(frames.is_frame_used(hole));
    frames.free_frame(hole);
    assert_eq!(frames.free_frames(), before);
}

#[test]
fn reserving_counts_only_new_frames() {
    let mut frames = build(&SCENARIO, SCENARIO_KERNEL);
    let reserved = frames.reserved_frames();
    let newly = frames.reserve_range(PhysicalAddress::new(0x10_7000), PhysicalAddress::new(0x10_A001));
    // 0x107000 (kernel) and 0x108000 (bitmap) were already reserved.
    assert_eq!(newly, 2);
    assert_eq!(frames.reserved_frames(), reserved + 2);
}

fn assert_counts_match_bitmaps(frames: &FrameAllocator) {
    for region in frames.regions() {
        assert_eq!(
            region.used_blocks(),
            region.bitmap().count_ones(),
            "region at {}",
            region.first_addr()
        );
    }
    let used: usize = frames.regions().iter().map(|r| r.used_blocks()).sum();
    assert_eq!(used, frames.used_frames());
}

#[test]
fn used_counts_track_the_bitmaps() {
    let mut frames = build(&SCENARIO, SCENARIO_KERNEL);
    assert_counts_match_bitmaps(&frames);

    let taken: Vec<_> = (0..500).map(|_| frames.allocate_frame().unwrap()).collect();
    assert_counts_match_bitmaps(&frames);

    for frame in taken.iter().step_by(3) {
        frames.free_frame(*frame);
    }
    frames.free_frame(Frame::from_index(0xB8));
    frames.allocate_frame().unwrap();
    frames.free_frame(taken[1]);
    assert_counts_match_bitmaps(&frames);

    let (start, end) = (0x25_0000, 0x27_0001);
    let unused = (start / 0x1000..=(end - 1) / 0x1000)
        .filter(|&i| !frames.is_frame_used(Frame::from_index(i)))
        .count();
    assert!(unused > 0 && unused < 0x21);
    let newly = frames.reserve_range(PhysicalAddress::new(start), PhysicalAddress::new(end));
    assert_eq!(newly, unused);
    assert_counts_match_bitmaps(&frames);
}

#[test]
fn freeing_a_reserved_frame_keeps_the_reservation_count() {
    let mut frames = build(&SCENARIO, SCENARIO_KERNEL);
    let (reserved, free) = (frames.reserved_frames(), frames.free_frames());
    let kernel_frame = Frame::from_index(0x107);

    frames.free_frame(kernel_frame);
    assert!(!frames.is_frame_used(kernel_frame));
    assert_eq!(frames.free_frames(), free + 1);
    assert_eq!(frames.reserved_frames(), reserved);
    assert_eq!(frames.regions()[1].reserved_blocks(), 9);
    assert_eq!(frames.regions()[1].used_blocks(), 8);
    assert_counts_match_bitmaps(&frames);
}

#[test]
fn acpi_reclaimable_memory_follows_the_policy() {
    let raw = [
        Raw::new(0x10_0000, 0x40_0000, Raw::KIND_AVAILABLE),
        Raw::new(0x50_0000, 0x1_0000, Raw::KIND_ACPI_RECLAIMABLE),
    ];
    let kernel = kernel(0x10_0000, 0x10_1000);
    let map = normalize(&raw, &NormalizerConfig::GENERIC).unwrap();
    let phys = TestPhys::new(u64::MAX);

    let kept = FrameAllocator::new(map.clone(), kernel, &phys, FrameAllocatorConfig::default())
        .unwrap();
    let acpi = Frame::from_index(0x500);
    assert!(kept.is_frame_used(acpi));
    assert_eq!(kept.regions()[1].reserved_blocks(), 16);

    let config = FrameAllocatorConfig {
        reclaim: ReclaimPolicy::Release,
        ..FrameAllocatorConfig::default()
    };
    let released = FrameAllocator::new(map, kernel, &phys, config).unwrap();
    assert!(!released.is_frame_used(acpi));
    assert_eq!(released.free_frames(), kept.free_frames() + 16);
}

#[test]
fn storage_goes_before_the_kernel_when_it_fits() {
    let raw = [Raw::new(0x10_0000, 0x70_0000, Raw::KIND_AVAILABLE)];
    let frames = build(&raw, kernel(0x20_0000, 0x20_8000));
    let storage = frames.bitmap_range();
    assert_eq!(storage.placement, StoragePlacement::BeforeKernel);
    assert_eq!(storage.start, PhysicalAddress::new(0x10_0000));
}

#[test]
fn storage_skips_a_region_the_kernel_fills() {
    let raw = [
        Raw::new(0x10_0000, 0x1_0000, Raw::KIND_AVAILABLE),
        Raw::new(0x20_0000, 0x10_0000, Raw::KIND_AVAILABLE),
    ];
    let frames = build(&raw, kernel(0x10_0000, 0x11_0000));
    let storage = frames.bitmap_range();
    assert_eq!(storage.placement, StoragePlacement::DisjointFromKernel);
    assert_eq!(storage.start, PhysicalAddress::new(0x20_0000));
}

#[test]
fn fatal_layouts_are_reported() {
    let phys = TestPhys::new(4 << 20);

    let low_only = normalize(&[Raw::new(0x0, 0x9_F000, Raw::KIND_AVAILABLE)], &NormalizerConfig::GENERIC)
        .unwrap();
    assert_eq!(
        FrameAllocator::new(low_only, kernel(0, 0), &phys, FrameAllocatorConfig::default())
            .unwrap_err(),
        FrameAllocError::NoBitmapStorage
    );

    let sliver = normalize(&[Raw::new(0x100, 0x800, Raw::KIND_AVAILABLE)], &NormalizerConfig::GENERIC)
        .unwrap();
    assert_eq!(
        FrameAllocator::new(sliver, kernel(0, 0), &phys, FrameAllocatorConfig::default())
            .unwrap_err(),
        FrameAllocError::NoTrackableMemory
    );
}
