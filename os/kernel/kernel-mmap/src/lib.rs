//! # Physical Memory Map Normalization
//!
//! Firmware memory maps are untrusted: entries come in any order, may overlap,
//! leave holes, describe memory the CPU cannot address, and routinely get the
//! legacy areas of the first megabyte wrong. This crate turns such a list into
//! a [`MemoryMap`] the frame allocator can rely on.
//!
//! ```text
//!  firmware descriptors ──► classify ──► cap ──► sort / resolve / fill ──► low-memory fixup ──► MemoryMap
//! ```
//!
//! The result is sorted, free of overlaps, and covers its span without gaps;
//! holes in the firmware's description show up as [`MemoryKind::Unspecified`].
//!
//! Platform policy is passed in through [`NormalizerConfig`]. The PC policy
//! ([`NormalizerConfig::PC_I386`]) caps the map at 4 GiB and replaces the first
//! megabyte with [`PC_LOW_MEMORY`].

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod map;
mod normalize;
mod policy;
mod region;

pub use map::MemoryMap;
pub use normalize::{NormalizeError, normalize};
pub use policy::{LowMemoryPolicy, NormalizerConfig, PC_LOW_MEMORY};
pub use region::{MemoryKind, MemoryRegion};
