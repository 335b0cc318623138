//! # Boot Page-Table Fixture
//!
//! Statically reserved storage for the root table plus a bounded pool of
//! intermediate tables, sized at compile time from the layout constants.
//! Consumed monotonically during early boot through an explicit
//! [`BootTableAllocator`]; never reset, never freed.

use hv_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use hv_info::layout::BOOT_TABLE_POOL_LEN;
use hv_vmem::{FrameAlloc, PageTable};

/// The statically reserved tables: one root plus the intermediate pool.
///
/// The platform layer places one of these in the image (`static mut` or a
/// link-section equivalent) and tells the allocator where it landed
/// physically; nothing here ever takes its virtual address for granted.
#[repr(C, align(4096))]
pub struct BootTables {
    root: PageTable,
    pool: [PageTable; BOOT_TABLE_POOL_LEN],
}

impl BootTables {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root: PageTable::zeroed(),
            pool: [const { PageTable::zeroed() }; BOOT_TABLE_POOL_LEN],
        }
    }

    /// The root table frame, given the fixture's physical placement.
    #[must_use]
    pub fn root_page(phys_base: PhysicalAddress) -> PhysicalPage<Size4K> {
        PhysicalPage::from_aligned(phys_base)
    }

    /// An allocator over the pool region of a fixture placed at
    /// `phys_base`.
    #[must_use]
    pub fn allocator(phys_base: PhysicalAddress) -> BootTableAllocator {
        BootTableAllocator::new(phys_base + 4096, BOOT_TABLE_POOL_LEN)
    }
}

impl Default for BootTables {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic allocator over the boot table pool.
///
/// Exhaustion returns `None` like any other allocator — the engine turns
/// that into `ResourceExhausted`, and only the bootstrap mapper's caller
/// decides it is fatal (nothing can recover this early).
pub struct BootTableAllocator {
    next: PhysicalAddress,
    end: PhysicalAddress,
}

impl BootTableAllocator {
    /// An allocator handing out `tables` consecutive table frames
    /// starting at `pool_phys` (which must be page-aligned).
    #[must_use]
    pub fn new(pool_phys: PhysicalAddress, tables: usize) -> Self {
        debug_assert!(pool_phys.is_aligned_to(4096));
        Self {
            next: pool_phys,
            end: pool_phys + (tables as u64) * 4096,
        }
    }

    /// Table frames not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        (self.end - self.next) / 4096
    }
}

impl FrameAlloc for BootTableAllocator {
    fn alloc_table_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        if self.next == self.end {
            return None;
        }
        let page = PhysicalPage::from_aligned(self.next);
        self.next += 4096;
        Some(page)
    }
}

const _: () = {
    assert!(core::mem::size_of::<BootTables>() == (BOOT_TABLE_POOL_LEN + 1) * 4096);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_hands_out_each_frame_once_then_runs_dry() {
        let base = PhysicalAddress::new(0x8030_0000);
        let mut alloc = BootTableAllocator::new(base, 3);
        assert_eq!(alloc.remaining(), 3);

        let a = alloc.alloc_table_frame().unwrap();
        let b = alloc.alloc_table_frame().unwrap();
        let c = alloc.alloc_table_frame().unwrap();
        assert_eq!(a.base(), base);
        assert_eq!(b.base() - a.base(), 4096);
        assert_eq!(c.base() - b.base(), 4096);

        assert!(alloc.alloc_table_frame().is_none());
        assert_eq!(alloc.remaining(), 0);
    }

    #[test]
    fn fixture_layout_puts_the_pool_after_the_root() {
        let base = PhysicalAddress::new(0x8020_0000);
        assert_eq!(BootTables::root_page(base).base(), base);
        let mut alloc = BootTables::allocator(base);
        assert_eq!(alloc.remaining() as usize, BOOT_TABLE_POOL_LEN);
        assert_eq!(alloc.alloc_table_frame().unwrap().base(), base + 4096);
    }
}
