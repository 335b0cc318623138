//! # RISC-V Control and Status Registers
//!
//! Typed access to the CSRs and fence instructions this core needs:
//! [`Satp`] (translation mode + root table), `sfence.vma` variants, and the
//! publication fence ordering PTE stores before a flush.
//!
//! ## Host builds
//!
//! On anything other than `riscv64` the register accessors become inert
//! (reads return zero, writes and fences are no-ops) so the rest of the
//! workspace unit-tests on the build host. The engine keeps all
//! architectural behavior behind these entry points for exactly that
//! reason.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

mod satp;

pub use crate::satp::{Satp, TranslationMode};

use hv_addresses::VirtualAddress;

/// Order all prior page-table stores before any subsequent translation-
/// cache maintenance, matching the engine's write-then-flush contract.
#[inline]
pub fn publication_fence() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Invalidate all cached translations on this CPU.
///
/// # Safety
/// Must run in a privilege mode allowed to execute `sfence.vma`.
#[inline]
pub unsafe fn sfence_vma_all() {
    #[cfg(target_arch = "riscv64")]
    unsafe {
        core::arch::asm!("sfence.vma", options(nostack, preserves_flags));
    }
}

/// Invalidate cached translations for one virtual page on this CPU.
///
/// Exposed for completeness; the update engine deliberately uses only the
/// full-address-space flush.
///
/// # Safety
/// Must run in a privilege mode allowed to execute `sfence.vma`.
#[inline]
pub unsafe fn sfence_vma_page(va: VirtualAddress) {
    #[cfg(target_arch = "riscv64")]
    unsafe {
        core::arch::asm!(
            "sfence.vma {}, zero",
            in(reg) va.as_u64(),
            options(nostack, preserves_flags),
        );
    }
    #[cfg(not(target_arch = "riscv64"))]
    let _ = va;
}
