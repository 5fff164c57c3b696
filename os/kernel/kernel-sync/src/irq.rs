//! Interrupt masking and the interrupt-safe spin lock.
//!
//! On bare-metal x86 builds the helpers below execute `cli`/`sti` and read
//! the `IF` bit from `EFLAGS`/`RFLAGS`. Hosted builds (unit tests, tools)
//! have no business touching the interrupt flag, so there the helpers do
//! nothing and report interrupts as disabled.

use crate::{SpinLock, SpinLockGuard};
use core::fmt;
use core::ops::{Deref, DerefMut};

/// `IF` (interrupt enable) bit in `EFLAGS`/`RFLAGS`.
const FLAGS_IF: usize = 1 << 9;

#[cfg(all(target_os = "none", any(target_arch = "x86", target_arch = "x86_64")))]
mod arch {
    /// Disables hardware interrupts (`cli`).
    #[inline]
    pub fn cli() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    /// Enables hardware interrupts (`sti`).
    #[inline]
    pub fn sti() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }

    #[cfg(target_arch = "x86")]
    #[inline]
    pub fn flags() -> usize {
        let r: usize;
        unsafe { core::arch::asm!("pushfd; pop {}", out(reg) r, options(preserves_flags)) }
        r
    }

    #[cfg(target_arch = "x86_64")]
    #[inline]
    pub fn flags() -> usize {
        let r: usize;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(preserves_flags)) }
        r
    }
}

#[cfg(not(all(target_os = "none", any(target_arch = "x86", target_arch = "x86_64"))))]
mod arch {
    #[inline]
    pub const fn cli() {}

    #[inline]
    pub const fn sti() {}

    #[inline]
    pub const fn flags() -> usize {
        0
    }
}

/// Disables hardware interrupts.
///
/// # Privilege
/// Must only be called in ring 0.
#[inline]
pub fn disable_interrupts() {
    arch::cli();
}

/// Enables hardware interrupts.
///
/// # Privilege
/// Must only be called in ring 0.
#[inline]
pub fn enable_interrupts() {
    arch::sti();
}

/// Whether the `IF` flag is currently set.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    arch::flags() & FLAGS_IF != 0
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// Only re-enables interrupts if they were enabled when the guard was created,
/// so guards nest.
pub struct IrqGuard {
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            disable_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            enable_interrupts();
        }
    }
}

/// A [`SpinLock`] that keeps interrupts disabled for as long as it is held.
///
/// On a uniprocessor the interrupt mask alone provides exclusion and the
/// spin never contends; once further cores run, the spin lock takes over.
///
/// ```
/// use kernel_sync::IrqSpinLock;
///
/// static FREE_FRAMES: IrqSpinLock<u32> = IrqSpinLock::new(32);
///
/// {
///     let mut frames = FREE_FRAMES.lock();
///     *frames -= 1;
/// }
/// assert_eq!(*FREE_FRAMES.lock(), 31);
/// ```
pub struct IrqSpinLock<T> {
    inner: SpinLock<T>,
}

impl<T> IrqSpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: SpinLock::new(value),
        }
    }

    /// Disables interrupts, then spins until the lock is acquired.
    #[inline]
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let irq = IrqGuard::new();
        IrqSpinLockGuard {
            guard: self.inner.lock(),
            _irq: irq,
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        let irq = IrqGuard::new();
        self.inner.try_lock().map(|guard| IrqSpinLockGuard { guard, _irq: irq })
    }

    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T> fmt::Debug for IrqSpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqSpinLock")
            .field("locked", &self.inner.is_locked())
            .finish_non_exhaustive()
    }
}

/// Guard of an [`IrqSpinLock`]. Releases the lock before restoring interrupts.
pub struct IrqSpinLockGuard<'a, T> {
    // Field order is drop order.
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
