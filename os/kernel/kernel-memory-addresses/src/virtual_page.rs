use crate::{PageSize, Size4K, VirtualAddress};
use core::fmt;
use core::marker::PhantomData;

/// Virtual memory page base for size `S`.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0xD000_1234);
/// let page = va.page::<Size4K>();
/// assert_eq!(page.base().as_u32(), 0xD000_1000);
/// assert_eq!(page.next().base().as_u32(), 0xD000_2000);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage<S: PageSize> {
    base: u32,
    _phantom: PhantomData<S>,
}

/// A 4 KiB virtual page.
pub type Page = VirtualPage<Size4K>;

impl<S: PageSize> VirtualPage<S> {
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn containing_address(addr: VirtualAddress) -> Self {
        Self {
            base: addr.as_u32() & !((S::SIZE - 1) as u32),
            _phantom: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.base)
    }

    /// The page directly after this one. Wraps at the top of the address space.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn next(self) -> Self {
        Self {
            base: self.base.wrapping_add(S::SIZE as u32),
            _phantom: PhantomData,
        }
    }
}

impl<S: PageSize> fmt::Display for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}/{}", self.base, S::as_str())
    }
}

impl<S: PageSize> fmt::Debug for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage<{}>(0x{:08X})", S::as_str(), self.base)
    }
}
