//! # Kernel Configuration and Boot Interface
//!
//! Shared definitions between the platform bootstrap code and the memory
//! subsystem.
//!
//! ## Boot Information ([`boot`])
//! * **Raw memory map**: firmware descriptors, untrusted and unordered
//! * **Kernel arguments**: `key=value` pairs with unique keys
//! * **Kernel image**: physical bounds of the loaded image
//!
//! ## Memory Layout ([`memory`])
//! * **Higher half**: the kernel runs at `0xC010_0000`, loaded at 1 MiB
//! * **Recursive window**: directory slot 1023 exposes all page tables
//! * **Heap window**: fixed virtual range for the kernel heap
//!
//! ## Usage
//! ```rust
//! use kernel_info::boot::{BootInfo, KernelArgs, RawMemoryDescriptor};
//!
//! let map = [
//!     RawMemoryDescriptor::new(0x0, 0x9_FC00, RawMemoryDescriptor::KIND_AVAILABLE),
//!     RawMemoryDescriptor::new(0x10_0000, 0x7F0_0000, RawMemoryDescriptor::KIND_AVAILABLE),
//! ];
//! let info = BootInfo::new(KernelArgs::new(), &map);
//! assert_eq!(info.memory_map.len(), 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
