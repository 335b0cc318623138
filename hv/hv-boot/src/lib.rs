//! # Boot-Time Memory Construction
//!
//! Everything that runs between "the hypervisor image sits at its load
//! address with the MMU off" and "the permanent address space is live":
//!
//! - [`pool`]: the statically reserved root table and intermediate-table
//!   pool, consumed through an explicit [`BootTableAllocator`].
//! - [`bootstrap`]: the bootstrap mapper — paging-mode probe, image and
//!   trampoline mapping, MMU switch-on, trampoline removal.
//! - [`pmap`]: the fixmap-backed temporary table window used by the
//!   mapping adapter between MMU-on and direct-map construction.
//! - [`directmap`] / [`frametable`]: the one-shot builders for the
//!   physical-offset map of all RAM and the per-frame metadata array.
//! - [`console`]: the allocator-free fatal path for this phase.
//!
//! The update engine itself lives in `hv-vmem`; this crate is its first
//! and most demanding customer.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod bank;
pub mod bootstrap;
pub mod console;
pub mod directmap;
pub mod frametable;
pub mod pmap;
pub mod pool;
#[cfg(test)]
mod test_support;

pub use crate::bank::RamBank;
pub use crate::pool::{BootTableAllocator, BootTables};

use crate::directmap::DirectMap;
use crate::frametable::{FrameDescriptor, FrameTable};
use core::ptr::NonNull;
use hv_addresses::{FrameNumber, VirtualAddress};

/// Boot-time allocator for physically contiguous frame runs, provided by
/// the platform layer over the firmware memory map.
pub trait BootPages {
    /// Allocate `frames` physically contiguous 4 KiB frames, optionally
    /// constrained to lie below `1 << below_bits` in physical address
    /// space. Returns the first frame of the run.
    fn alloc_frames(&mut self, frames: u64, below_bits: Option<u32>) -> Option<FrameNumber>;
}

/// The hypervisor-wide direct map. Frozen by the first RAM bank passed to
/// [`directmap::DirectMap::setup_mappings`].
pub static DIRECT_MAP: DirectMap = DirectMap::new();

/// The hypervisor-wide frame table. Built exactly once by
/// [`frametable::FrameTable::setup_mappings`].
pub static FRAME_TABLE: FrameTable = FrameTable::new();

/// O(1) translation of a frame number into the virtual address the direct
/// map gave it, once the map covers it.
#[inline]
#[must_use]
pub fn direct_map_address(frame: FrameNumber) -> Option<VirtualAddress> {
    DIRECT_MAP.address_of(frame)
}

/// O(1) translation of a frame number into its metadata descriptor.
#[inline]
#[must_use]
pub fn frame_to_descriptor(frame: FrameNumber) -> Option<NonNull<FrameDescriptor>> {
    FRAME_TABLE.descriptor_of(frame)
}

/// Inverse of [`frame_to_descriptor`].
#[inline]
#[must_use]
pub fn descriptor_to_frame(descriptor: NonNull<FrameDescriptor>) -> Option<FrameNumber> {
    FRAME_TABLE.frame_of(descriptor)
}
