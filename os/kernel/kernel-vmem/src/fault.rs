//! Page-fault policy.
//!
//! Paging is eager: every page the kernel touches is mapped before use. A
//! page fault therefore always means a bug and is fatal.

use kernel_memory_addresses::VirtualAddress;
use log::error;

/// Handle a page fault at `addr`. Never returns.
///
/// The fault dispatcher calls this with the contents of CR2, see
/// [`read_fault_address`].
#[cold]
#[track_caller]
pub fn do_page_fault(addr: VirtualAddress) -> ! {
    error!("page fault at address {addr}");
    panic!("page fault at address {addr}");
}

/// Read the faulting address from CR2.
#[cfg(all(target_os = "none", target_arch = "x86"))]
#[inline]
#[must_use]
pub fn read_fault_address() -> VirtualAddress {
    let cr2: u32;
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
    }
    VirtualAddress::new(cr2)
}
