//! # Sv39 Table Geometry
//!
//! The numbers below describe a 3-level radix table with 512 entries per
//! level; everything that walks or sizes tables derives from them, so a
//! port to Sv48 is one constant away.

/// Number of translation-table levels. Level `PT_LEVELS - 1` is the root,
/// level 0 maps 4 KiB granules.
pub const PT_LEVELS: u32 = 3;

/// log2 of the number of entries per table.
pub const PAGETABLE_ORDER: u32 = 9;

/// Entries per table.
pub const PAGETABLE_ENTRIES: usize = 1 << PAGETABLE_ORDER;

/// log2 of the 4 KiB granule.
pub const PAGE_SHIFT: u32 = 12;

/// The 4 KiB granule in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// log2 of the number of 4 KiB pages mapped by one leaf at `level`.
#[inline]
#[must_use]
pub const fn level_order(level: u32) -> u32 {
    PAGETABLE_ORDER * level
}

/// Bytes mapped by one leaf at `level` (4 KiB, 2 MiB, 1 GiB for Sv39).
#[inline]
#[must_use]
pub const fn level_size(level: u32) -> u64 {
    PAGE_SIZE << level_order(level)
}

/// Number of 4 KiB pages mapped by one leaf at `level`.
#[inline]
#[must_use]
pub const fn level_pages(level: u32) -> u64 {
    1 << level_order(level)
}

const _: () = {
    assert!(PT_LEVELS >= 2);
    // The root level must still fit in the Sv39 VA split.
    assert!(PAGE_SHIFT + PT_LEVELS * PAGETABLE_ORDER <= 39);
    assert!(level_size(1) == 2 * 1024 * 1024);
    assert!(level_size(2) == 1024 * 1024 * 1024);
};
