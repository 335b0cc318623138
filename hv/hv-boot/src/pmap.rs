//! # Boot-Phase Table Window
//!
//! Between MMU-on and direct-map construction, page-table frames have no
//! standing virtual address. This window maps them on demand into a small
//! set of reserved fixmap slots by writing the fixmap's level-0 table
//! directly — that table is part of the boot fixture and permanently
//! mapped, so no recursion through the engine is needed.
//!
//! Valid only while a single CPU runs; concurrent users are serialized by
//! the update engine's lock, and the slot set exists only to let one walk
//! hold a parent and a child table at the same time.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};
use hv_addresses::{PhysicalPage, Size4K, VirtualAddress};
use hv_csr::{publication_fence, sfence_vma_page};
use hv_info::layout::{FIXMAP_PMAP_BEGIN, NR_PMAP_SLOTS, fixmap_virt};
use hv_sync::OnceInit;
use hv_vmem::{FrameMapper, MapFlags, PageTable, Pte, TableIndex};

/// Claim/release accounting for a small set of window slots.
struct SlotSet {
    used: AtomicU32,
}

impl SlotSet {
    const fn new() -> Self {
        Self {
            used: AtomicU32::new(0),
        }
    }

    /// Claim a free slot index below `limit`.
    fn claim(&self, limit: u32) -> Option<u32> {
        let mut used = self.used.load(Ordering::Relaxed);
        loop {
            let free = (!used).trailing_zeros();
            if free >= limit {
                return None;
            }
            match self.used.compare_exchange_weak(
                used,
                used | (1 << free),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(free),
                Err(cur) => used = cur,
            }
        }
    }

    fn release(&self, slot: u32) {
        self.used.fetch_and(!(1 << slot), Ordering::Release);
    }
}

/// The boot-phase backing of the table-mapping adapter.
pub struct PmapWindow {
    /// Virtual address of the fixmap level-0 table (wired into the
    /// permanent chain by the bootstrap mapper).
    fixmap_l0: OnceInit<VirtualAddress>,
    slots: SlotSet,
}

impl PmapWindow {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fixmap_l0: OnceInit::new(),
            slots: SlotSet::new(),
        }
    }

    /// Wire the window to the fixmap level-0 table.
    ///
    /// # Safety
    /// `l0` must be the virtual address of the level-0 table serving the
    /// fixmap region, permanently mapped and writable.
    pub unsafe fn install(&self, l0: VirtualAddress) {
        let _ = self.fixmap_l0.set(l0);
    }

    fn l0(&self) -> &mut PageTable {
        let va = self
            .fixmap_l0
            .get()
            .copied()
            .unwrap_or_else(|| panic!("pmap window used before install"));
        // Safety: install() vouched for this address; single-CPU phase
        // means no aliasing &mut.
        unsafe { &mut *(va.as_u64() as usize as *mut PageTable) }
    }

    fn slot_index(slot: u32) -> TableIndex {
        // All fixmap slots live in one level-0 table; the slot's table
        // index is its position within the fixmap window.
        TableIndex::new((FIXMAP_PMAP_BEGIN + slot) as u16)
    }
}

impl Default for PmapWindow {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: the window maps each claimed slot to exactly one frame at a
// time; exclusivity per frame is provided by the claim/release protocol
// and the single-CPU early-boot phase.
unsafe impl FrameMapper for PmapWindow {
    unsafe fn map_frame(&self, page: PhysicalPage<Size4K>) -> NonNull<u8> {
        let Some(slot) = self.slots.claim(NR_PMAP_SLOTS) else {
            panic!("pmap window slots exhausted");
        };
        let va = fixmap_virt(FIXMAP_PMAP_BEGIN + slot);
        self.l0()
            .set(Self::slot_index(slot), Pte::leaf_entry(page.frame(), MapFlags::RW));
        publication_fence();
        // The slot may hold a stale translation from its previous tenant.
        unsafe { sfence_vma_page(VirtualAddress::new(va)) };
        // Safety: fixmap addresses are never null.
        unsafe { NonNull::new_unchecked(va as usize as *mut u8) }
    }

    unsafe fn unmap_frame(&self, ptr: NonNull<u8>) {
        let va = ptr.as_ptr() as u64;
        let slot = ((va - fixmap_virt(FIXMAP_PMAP_BEGIN)) >> 12) as u32;
        debug_assert!(slot < NR_PMAP_SLOTS);
        self.l0().set(Self::slot_index(slot), Pte::new());
        publication_fence();
        unsafe { sfence_vma_page(VirtualAddress::new(va)) };
        self.slots.release(slot);
    }
}
