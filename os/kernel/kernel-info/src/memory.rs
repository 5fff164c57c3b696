//! # Memory Layout
//!
//! Compile-time layout of the 32-bit higher-half kernel.
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │          User Space             │
//! 0xC000_0000 ├─────────────────────────────────┤ KERNEL_VIRTUAL_OFFSET
//!             │  Kernel image + low phys alias  │
//! 0xD000_0000 ├─────────────────────────────────┤ KERNEL_HEAP_BASE
//!             │          Kernel Heap            │
//!             ├─────────────────────────────────┤ KERNEL_HEAP_BASE + KERNEL_HEAP_MAX_SIZE
//!             │             ...                 │
//! 0xFFC0_0000 ├─────────────────────────────────┤ RECURSIVE_WINDOW_BASE
//!             │   Page tables (recursive map)   │
//! 0xFFFF_F000 ├─────────────────────────────────┤ DIRECTORY_WINDOW
//!             │        Page directory           │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```

/// Where the kernel image is loaded in physical memory.
pub const KERNEL_PHYSICAL_BASE: u64 = 0x0010_0000; // 1 MiB

/// Where the kernel image executes.
pub const KERNEL_VIRTUAL_BASE: u32 = 0xC010_0000;

/// Offset between the kernel's virtual alias of low physical memory and the
/// physical addresses themselves.
#[allow(clippy::cast_possible_truncation)]
pub const KERNEL_VIRTUAL_OFFSET: u32 = KERNEL_VIRTUAL_BASE - KERNEL_PHYSICAL_BASE as u32;

/// Amount of low physical memory the boot code maps at
/// [`KERNEL_VIRTUAL_OFFSET`] before the mapper takes over.
pub const BOOT_MAPPED_BYTES: u64 = 0x0040_0000; // 4 MiB

/// Highest physical address reachable without PAE.
pub const MAX_PHYSICAL_ADDRESS: u64 = 0xFFFF_FFFF;

/// Page directory slot that maps the directory onto itself.
pub const RECURSIVE_SLOT: usize = 1023;

/// Start of the 4 MiB window through which every page table is visible.
#[allow(clippy::cast_possible_truncation)]
pub const RECURSIVE_WINDOW_BASE: u32 = (RECURSIVE_SLOT as u32) << 22;

/// The page directory as seen through its own recursive entry.
#[allow(clippy::cast_possible_truncation)]
pub const DIRECTORY_WINDOW: u32 = RECURSIVE_WINDOW_BASE | ((RECURSIVE_SLOT as u32) << 12);

/// Virtual base of the kernel heap.
pub const KERNEL_HEAP_BASE: u32 = 0xD000_0000;

/// Upper bound for the kernel heap window.
pub const KERNEL_HEAP_MAX_SIZE: u32 = 0x0400_0000; // 64 MiB

/// Bytes of kernel heap mapped eagerly during boot.
pub const KERNEL_HEAP_INITIAL_SIZE: u32 = 0x0010_0000; // 1 MiB

/// Size of the statically reserved bootstrap heap.
pub const BOOTSTRAP_HEAP_SIZE: usize = 64 * 1024;

/// Frames below this address are never used to host allocator metadata.
pub const LOW_MEMORY_LIMIT: u64 = 0x0010_0000;

const _: () = {
    assert!(RECURSIVE_WINDOW_BASE == 0xFFC0_0000);
    assert!(DIRECTORY_WINDOW == 0xFFFF_F000);
    assert!(KERNEL_VIRTUAL_OFFSET == 0xC000_0000);
    assert!(KERNEL_HEAP_BASE > KERNEL_VIRTUAL_BASE);
    assert!(KERNEL_HEAP_BASE as u64 + KERNEL_HEAP_MAX_SIZE as u64 <= RECURSIVE_WINDOW_BASE as u64);
    assert!(KERNEL_HEAP_INITIAL_SIZE <= KERNEL_HEAP_MAX_SIZE);
    assert!(KERNEL_HEAP_INITIAL_SIZE.is_multiple_of(4096));
    assert!(BOOTSTRAP_HEAP_SIZE.is_multiple_of(16));
};
