//! # Kernel Boot Information
//!
//! The record the platform bootstrap code hands to the memory subsystem:
//! parsed command-line arguments, the raw firmware memory descriptors, and the
//! amount of memory the firmware reported in total.

use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, align_up};

/// Maximum number of `key=value` arguments retained from the command line.
pub const MAX_KERNEL_ARGS: usize = 16;

/// One memory descriptor exactly as the firmware reported it.
///
/// The `kind` uses the multiboot numbering; see the `KIND_*` constants.
/// Nothing about ordering, overlap or coverage is guaranteed.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RawMemoryDescriptor {
    /// Physical start address.
    pub base: u64,
    /// Length in bytes. May be zero.
    pub length: u64,
    /// Firmware type code.
    pub kind: u32,
}

impl RawMemoryDescriptor {
    /// Usable RAM.
    pub const KIND_AVAILABLE: u32 = 1;
    /// Reserved by the platform.
    pub const KIND_RESERVED: u32 = 2;
    /// ACPI tables; usable once the tables have been consumed.
    pub const KIND_ACPI_RECLAIMABLE: u32 = 3;
    /// ACPI non-volatile storage.
    pub const KIND_ACPI_NVS: u32 = 4;
    /// Defective RAM.
    pub const KIND_BAD: u32 = 5;

    #[must_use]
    pub const fn new(base: u64, length: u64, kind: u32) -> Self {
        Self { base, length, kind }
    }

    /// Exclusive end address, saturating at the top of the 64-bit space.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }
}

/// A single `key=value` pair from the kernel command line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelArg<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

/// Kernel command-line arguments.
///
/// Parsing the command line is the console's business; this table only
/// stores the result. Every key may appear at most once.
#[derive(Debug, Clone)]
pub struct KernelArgs<'a> {
    args: [Option<KernelArg<'a>>; MAX_KERNEL_ARGS],
    len: usize,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootInfoError {
    #[error("duplicate kernel argument")]
    DuplicateArgument,
    #[error("too many kernel arguments")]
    ArgumentTableFull,
    #[error("malformed kernel argument, expected key=value")]
    MalformedArgument,
}

impl Default for KernelArgs<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> KernelArgs<'a> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            args: [None; MAX_KERNEL_ARGS],
            len: 0,
        }
    }

    /// Builds the table from whitespace separated `key=value` words.
    ///
    /// ```
    /// # use kernel_info::boot::KernelArgs;
    /// let args = KernelArgs::from_words("console=serial heap_size=2097152").unwrap();
    /// assert_eq!(args.get("console"), Some("serial"));
    /// assert!(KernelArgs::from_words("a=1 a=2").is_err());
    /// ```
    ///
    /// # Errors
    /// Fails on a word without `=`, on a repeated key, or when more than
    /// [`MAX_KERNEL_ARGS`] pairs are given.
    pub fn from_words(line: &'a str) -> Result<Self, BootInfoError> {
        let mut args = Self::new();
        for word in line.split_whitespace() {
            let (key, value) = word
                .split_once('=')
                .ok_or(BootInfoError::MalformedArgument)?;
            args.insert(key, value)?;
        }
        Ok(args)
    }

    /// Adds a pair.
    ///
    /// # Errors
    /// [`BootInfoError::DuplicateArgument`] if `key` is already present,
    /// [`BootInfoError::ArgumentTableFull`] if the table is full.
    pub fn insert(&mut self, key: &'a str, value: &'a str) -> Result<(), BootInfoError> {
        if key.is_empty() {
            return Err(BootInfoError::MalformedArgument);
        }
        if self.get(key).is_some() {
            return Err(BootInfoError::DuplicateArgument);
        }
        let slot = self
            .args
            .get_mut(self.len)
            .ok_or(BootInfoError::ArgumentTableFull)?;
        *slot = Some(KernelArg { key, value });
        self.len += 1;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.iter().find(|a| a.key == key).map(|a| a.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = KernelArg<'a>> + '_ {
        self.args[..self.len].iter().flatten().copied()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Everything the platform bootstrap code hands over to the memory subsystem.
#[derive(Debug, Clone)]
pub struct BootInfo<'a> {
    pub args: KernelArgs<'a>,
    /// Raw firmware memory map; the only input to normalization.
    pub memory_map: &'a [RawMemoryDescriptor],
    /// Total usable memory the firmware reported, including memory that
    /// cannot be addressed. Filled in once the map has been normalized.
    pub observed_memory: u64,
}

impl<'a> BootInfo<'a> {
    #[must_use]
    pub const fn new(args: KernelArgs<'a>, memory_map: &'a [RawMemoryDescriptor]) -> Self {
        Self {
            args,
            memory_map,
            observed_memory: 0,
        }
    }
}

/// Physical bounds `[start, end)` of the loaded kernel image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelImage {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
}

impl KernelImage {
    #[must_use]
    pub const fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        debug_assert!(start.as_u64() <= end.as_u64());
        Self { start, end }
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// End rounded up to the next frame boundary.
    #[must_use]
    pub const fn page_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(align_up(self.end.as_u64(), PAGE_SIZE))
    }

    /// Whether `[start, end)` shares at least one byte with the image.
    #[must_use]
    pub const fn overlaps(&self, start: u64, end: u64) -> bool {
        start < self.end.as_u64() && self.start.as_u64() < end
    }
}
