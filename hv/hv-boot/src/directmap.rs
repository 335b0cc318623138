//! # Direct Map Builder
//!
//! Builds the physical-offset ("direct") map: a virtual window whose
//! addresses are an affine function of physical addresses, covering every
//! registered RAM bank. The offset is fixed by the **first** bank
//! processed — rounded down to the root-level granule so that banks not
//! aligned to it can still be mapped with superpages — and is immutable
//! for the hypervisor's lifetime afterwards.

use crate::bank::RamBank;
use core::ptr::NonNull;
use hv_addresses::{FrameNumber, PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use hv_info::layout::{DIRECTMAP_SIZE, DIRECTMAP_VIRT_START};
use hv_info::paging::level_size;
use hv_sync::OnceInit;
use hv_vmem::{AddressSpace, FrameAlloc, FrameMapper, MapError, MapFlags};

/// Why extending the direct map over a bank failed. These are boot-time
/// configuration errors; the orchestrator routes them into the fatal
/// path.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BankError {
    /// The bank's endpoints are not page-aligned.
    #[error("RAM bank is not page-aligned")]
    Misaligned,

    /// A later bank lies below the first bank, which fixed the offset.
    #[error("RAM bank precedes the direct-map base")]
    BelowBase,

    /// The bank ends beyond the reserved virtual window.
    #[error("RAM bank does not fit the direct-map window")]
    WindowOverflow,

    /// The update engine failed underneath us.
    #[error(transparent)]
    Map(#[from] MapError),
}

/// The frozen affine transform, set by the first bank.
#[derive(Copy, Clone, Debug)]
struct DirectMapBase {
    /// Start of the first registered bank; later banks must not precede
    /// it.
    first_bank_start: PhysicalAddress,
    /// Physical address mapped at [`DIRECTMAP_VIRT_START`]: the first
    /// bank's start rounded down to the root-level granule, so bank and
    /// window stay congruent modulo every superpage size.
    phys_base: PhysicalAddress,
}

/// The direct map: one-shot offset state plus the mapping routine.
pub struct DirectMap {
    base: OnceInit<DirectMapBase>,
}

impl DirectMap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base: OnceInit::new(),
        }
    }

    /// Map `bank` into the direct-map window, fixing the global offset if
    /// this is the first bank.
    ///
    /// Banks arrive in arbitrary order from firmware; the engine picks
    /// superpages automatically wherever bank alignment allows.
    ///
    /// # Errors
    /// See [`BankError`].
    pub fn setup_mappings<M: FrameMapper + ?Sized, A: FrameAlloc + ?Sized>(
        &self,
        space: &AddressSpace<'_, M>,
        alloc: &mut A,
        bank: &RamBank,
    ) -> Result<(), BankError> {
        if !bank.is_page_aligned() {
            return Err(BankError::Misaligned);
        }

        let base = self.base.get_or_init(|| DirectMapBase {
            first_bank_start: bank.start,
            phys_base: bank.start.align_down(level_size(2)),
        });

        if bank.start < base.first_bank_start {
            return Err(BankError::BelowBase);
        }

        let window_offset = bank.start - base.phys_base;
        if window_offset + bank.size > DIRECTMAP_SIZE {
            return Err(BankError::WindowOverflow);
        }

        let va = VirtualAddress::new(DIRECTMAP_VIRT_START + window_offset);
        space.map(
            alloc,
            va,
            bank.first_frame(),
            bank.frames(),
            MapFlags::RW | MapFlags::GLOBAL,
        )?;

        log::info!(
            "directmap: bank {}..{} at {va}",
            bank.start,
            bank.end(),
        );
        Ok(())
    }

    /// The direct-map virtual address of `frame`, once the offset is
    /// frozen and the frame lies inside the window.
    #[must_use]
    pub fn address_of(&self, frame: FrameNumber) -> Option<VirtualAddress> {
        let base = self.base.get()?;
        let pa = frame.address();
        if pa < base.phys_base {
            return None;
        }
        let window_offset = pa - base.phys_base;
        if window_offset >= DIRECTMAP_SIZE {
            return None;
        }
        Some(VirtualAddress::new(DIRECTMAP_VIRT_START + window_offset))
    }

    /// A [`FrameMapper`] backed by this direct map, for the post-boot
    /// phase of the table-mapping adapter. `None` until the first bank
    /// froze the offset.
    #[must_use]
    pub fn mapper(&self) -> Option<DirectmapMapper> {
        self.base.get().map(|base| DirectmapMapper {
            phys_base: base.phys_base,
        })
    }
}

impl Default for DirectMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Post-boot backing of the table-mapping adapter: every RAM frame is
/// permanently visible at its direct-map address, so "mapping" a table
/// page is pure arithmetic and "unmapping" is a no-op.
#[derive(Copy, Clone)]
pub struct DirectmapMapper {
    phys_base: PhysicalAddress,
}

// Safety: the direct map covers all usable RAM read-write for the
// hypervisor's lifetime; distinct frames have distinct window addresses.
unsafe impl FrameMapper for DirectmapMapper {
    unsafe fn map_frame(&self, page: PhysicalPage<Size4K>) -> NonNull<u8> {
        let va = DIRECTMAP_VIRT_START + (page.base() - self.phys_base);
        // Safety: the window base is far from zero by layout.
        unsafe { NonNull::new_unchecked(va as usize as *mut u8) }
    }

    unsafe fn unmap_frame(&self, _ptr: NonNull<u8>) {}
}
