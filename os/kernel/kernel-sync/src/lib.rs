//! # Kernel synchronization primitives
//!
//! Two locks guard the memory subsystem's shared state once more than one
//! execution context can touch it:
//!
//! * [`SpinLock`]: compare/exchange spin lock for state shared between cores.
//! * [`IrqSpinLock`]: a [`SpinLock`] taken with interrupts disabled, so an
//!   interrupt handler on the same core can never spin on a lock its own
//!   core already holds.
//!
//! Neither lock ever sleeps; waiting is always busy-waiting.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{IrqGuard, IrqSpinLock, IrqSpinLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
