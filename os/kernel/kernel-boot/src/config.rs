use core::ptr::NonNull;
use kernel_alloc::frame_alloc::FrameAllocatorConfig;
use kernel_info::boot::KernelArgs;
use kernel_info::memory::{KERNEL_HEAP_BASE, KERNEL_HEAP_INITIAL_SIZE, KERNEL_HEAP_MAX_SIZE};
use kernel_memory_addresses::VirtualAddress;
use kernel_mmap::NormalizerConfig;
use log::warn;

/// Boot argument overriding [`HeapConfig::initial_bytes`].
pub const HEAP_SIZE_ARG: &str = "heap_size";

/// Where the kernel heap lives and how much of it is mapped up front.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    pub base: VirtualAddress,
    pub initial_bytes: usize,
    pub max_bytes: usize,
}

impl HeapConfig {
    pub const KERNEL: Self = Self {
        base: VirtualAddress::new(KERNEL_HEAP_BASE),
        initial_bytes: KERNEL_HEAP_INITIAL_SIZE as usize,
        max_bytes: KERNEL_HEAP_MAX_SIZE as usize,
    };

    /// Apply `heap_size=<bytes>` from the command line, if given.
    ///
    /// Sizes are decimal or `0x` hexadecimal, optionally followed by `K` or
    /// `M`. Unparsable values are ignored, oversized ones are clamped to
    /// [`max_bytes`](Self::max_bytes).
    #[must_use]
    pub fn with_args(self, args: &KernelArgs<'_>) -> Self {
        let Some(value) = args.get(HEAP_SIZE_ARG) else {
            return self;
        };
        let Some(bytes) = parse_size(value) else {
            warn!("ignoring {HEAP_SIZE_ARG}={value}: not a size");
            return self;
        };
        if bytes > self.max_bytes {
            warn!(
                "{HEAP_SIZE_ARG}={value} exceeds the heap window, using {} bytes",
                self.max_bytes
            );
        }
        Self {
            initial_bytes: bytes.min(self.max_bytes),
            ..self
        }
    }

    /// The heap window as seen by the kernel, which runs in the address
    /// space it maps into.
    #[must_use]
    pub fn window(&self) -> Option<NonNull<u8>> {
        NonNull::new(core::ptr::with_exposed_provenance_mut(self.base.as_usize()))
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::KERNEL
    }
}

#[derive(Debug, Copy, Clone)]
pub struct BootConfig {
    pub normalizer: NormalizerConfig,
    pub frames: FrameAllocatorConfig,
    pub heap: HeapConfig,
}

impl BootConfig {
    pub const PC_I386: Self = Self {
        normalizer: NormalizerConfig::PC_I386,
        frames: FrameAllocatorConfig::DEFAULT,
        heap: HeapConfig::KERNEL,
    };
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::PC_I386
    }
}

fn parse_size(value: &str) -> Option<usize> {
    let (digits, scale) = match value.as_bytes().last()? {
        b'K' | b'k' => (&value[..value.len() - 1], 1 << 10),
        b'M' | b'm' => (&value[..value.len() - 1], 1 << 20),
        _ => (value, 1),
    };
    let n = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    n.checked_mul(scale)
}
