//! # Virtual Memory Layout
//!
//! The hypervisor owns the upper half of the Sv39 address space
//! (`0xFFFF_FFC0_0000_0000` and up, 256 GiB total). The windows below are
//! carved out of it; the linker script must agree with
//! [`HYP_VIRT_START`].
//!
//! ```text
//! 0xFFFF_FFC0_0000_0000 ┌──────────────────────────────────┐
//!                       │  Direct map (all usable RAM)     │ 128 GiB
//! 0xFFFF_FFE0_0000_0000 ├──────────────────────────────────┤
//!                       │  Frame table                     │ 1 GiB
//! 0xFFFF_FFE0_4000_0000 ├──────────────────────────────────┤
//!                       │  Vmap / ioremap windows          │ 1 GiB
//! 0xFFFF_FFE0_8000_0000 ├──────────────────────────────────┤
//!                       │  (unused)                        │
//! 0xFFFF_FFFF_8000_0000 ├──────────────────────────────────┤
//!                       │  Fixmap slots                    │ 2 MiB
//! 0xFFFF_FFFF_C000_0000 ├──────────────────────────────────┤
//!                       │  Hypervisor image (link base)    │ top 1 GiB
//! 0xFFFF_FFFF_FFFF_FFFF └──────────────────────────────────┘
//! ```

use crate::paging::{PAGE_SIZE, PT_LEVELS, level_size};

/// Base of the direct (physical-offset) map.
pub const DIRECTMAP_VIRT_START: u64 = 0xFFFF_FFC0_0000_0000;

/// Size of the direct-map window.
pub const DIRECTMAP_SIZE: u64 = 128 << 30;

/// Base of the frame-table window.
pub const FRAMETABLE_VIRT_START: u64 = 0xFFFF_FFE0_0000_0000;

/// Size of the frame-table window.
pub const FRAMETABLE_SIZE: u64 = 1 << 30;

/// Base of the vmap region used for ioremap windows.
pub const VMAP_VIRT_START: u64 = 0xFFFF_FFE0_4000_0000;

/// Size of the vmap region.
pub const VMAP_SIZE: u64 = 1 << 30;

/// Base of the fixmap window: a handful of well-known single-page slots.
pub const FIXMAP_VIRT_START: u64 = 0xFFFF_FFFF_8000_0000;

/// Where the hypervisor image is linked to run.
pub const HYP_VIRT_START: u64 = 0xFFFF_FFFF_C000_0000;

/// Upper bound on the mapped hypervisor image, used to size the boot table
/// pool. The bootstrap mapper refuses images larger than this.
pub const HYP_IMAGE_MAX: u64 = 16 * 1024 * 1024;

/// Fixmap slot for the early console window.
pub const FIXMAP_CONSOLE: u32 = 0;

/// Fixmap slot for miscellaneous short-lived driver use.
pub const FIXMAP_MISC: u32 = 1;

/// First of [`NR_PMAP_SLOTS`] slots backing the boot-phase table-mapping
/// window.
pub const FIXMAP_PMAP_BEGIN: u32 = 2;

/// Number of concurrently mappable boot-phase table windows. The walk
/// holds a parent and a child table at once, plus one for zeroing a fresh
/// table; four leaves headroom.
pub const NR_PMAP_SLOTS: u32 = 4;

/// Total number of fixmap slots.
pub const NR_FIXMAP_SLOTS: u32 = FIXMAP_PMAP_BEGIN + NR_PMAP_SLOTS;

/// Virtual address of a fixmap slot.
#[inline]
#[must_use]
pub const fn fixmap_virt(slot: u32) -> u64 {
    assert!(slot < NR_FIXMAP_SLOTS);
    FIXMAP_VIRT_START + slot as u64 * PAGE_SIZE
}

/// Intermediate tables statically reserved for early boot, before any
/// allocator exists: one chain below the root for the image, a level-0
/// table per possible 2 MiB image slice, a chain for the fixmap window,
/// and a chain for the identity trampoline.
pub const BOOT_TABLE_POOL_LEN: usize = (PT_LEVELS as usize - 1)
    + (HYP_IMAGE_MAX / level_size(1)) as usize
    + (PT_LEVELS as usize - 1)
    + (PT_LEVELS as usize - 1);

const _: () = {
    // Windows must be disjoint and ordered as drawn above.
    assert!(DIRECTMAP_VIRT_START + DIRECTMAP_SIZE <= FRAMETABLE_VIRT_START);
    assert!(FRAMETABLE_VIRT_START + FRAMETABLE_SIZE <= VMAP_VIRT_START);
    assert!(VMAP_VIRT_START + VMAP_SIZE <= FIXMAP_VIRT_START);
    assert!(FIXMAP_VIRT_START + NR_FIXMAP_SLOTS as u64 * PAGE_SIZE <= HYP_VIRT_START);
    // Superpage-aligned windows: the builders rely on it.
    assert!(DIRECTMAP_VIRT_START % level_size(2) == 0);
    assert!(FRAMETABLE_VIRT_START % level_size(2) == 0);
    assert!(VMAP_VIRT_START % level_size(1) == 0);
    // All fixmap slots share one level-0 table.
    assert!(NR_FIXMAP_SLOTS as u64 * PAGE_SIZE <= level_size(1));
    assert!(HYP_IMAGE_MAX % level_size(1) == 0);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixmap_slots_are_page_strided() {
        assert_eq!(fixmap_virt(0), FIXMAP_VIRT_START);
        assert_eq!(fixmap_virt(1) - fixmap_virt(0), PAGE_SIZE);
    }

    #[test]
    fn boot_pool_covers_the_early_chains() {
        // 2 image levels short of the root + 8 image slices + fixmap +
        // trampoline chains.
        assert_eq!(BOOT_TABLE_POOL_LEN, 2 + 8 + 2 + 2);
    }
}
