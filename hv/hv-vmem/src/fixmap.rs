//! # Fixmap Slots
//!
//! A handful of well-known, individually named single-page virtual slots
//! used by low-level drivers before (or instead of) the general mapping
//! facilities. Slot indices and the window itself live in
//! [`hv_info::layout`]; these helpers are thin wrappers over the engine.

use crate::flags::MapFlags;
use crate::handle::FrameMapper;
use crate::space::{AddressSpace, MapError};
use crate::FrameAlloc;
use hv_addresses::{FrameNumber, VirtualAddress};
use hv_info::layout::fixmap_virt;

/// Virtual address of fixmap slot `slot`.
#[inline]
#[must_use]
pub fn slot_virt(slot: u32) -> VirtualAddress {
    VirtualAddress::new(fixmap_virt(slot))
}

/// Map `frame` into fixmap slot `slot`.
///
/// The bootstrap mapper pre-populates the fixmap chain, so this cannot
/// allocate in practice; an allocator is still threaded through for the
/// general contract.
///
/// # Errors
/// Propagates [`MapError`] from the engine; `IllegalTransition` if the
/// slot is already occupied.
pub fn set_fixed_slot<M: FrameMapper + ?Sized, A: FrameAlloc + ?Sized>(
    space: &AddressSpace<'_, M>,
    alloc: &mut A,
    slot: u32,
    frame: FrameNumber,
    flags: MapFlags,
) -> Result<(), MapError> {
    space.map(alloc, slot_virt(slot), frame, 1, flags)?;
    Ok(())
}

/// Remove the mapping in fixmap slot `slot`.
///
/// # Errors
/// `IllegalTransition` if the slot is empty.
pub fn clear_fixed_slot<M: FrameMapper + ?Sized>(
    space: &AddressSpace<'_, M>,
    slot: u32,
) -> Result<(), MapError> {
    space.unmap(slot_virt(slot), 1)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TableHandle;
    use crate::pte::EntryKind;
    use crate::space::AddressSpace;
    use crate::test_support::{BumpAlloc, TestPhys};
    use hv_info::layout::{FIXMAP_CONSOLE, FIXMAP_MISC, FIXMAP_VIRT_START};

    #[test]
    fn slots_are_page_spaced() {
        assert_eq!(slot_virt(FIXMAP_CONSOLE).as_u64(), FIXMAP_VIRT_START);
        assert_eq!(slot_virt(FIXMAP_MISC) - slot_virt(FIXMAP_CONSOLE), 4096);
    }

    #[test]
    fn set_and_clear_a_slot() {
        let phys = TestPhys::with_frames(16);
        let mut alloc = BumpAlloc::new(&phys, 1, phys.len() as u64);
        TableHandle::map(&phys, phys.page(0)).zero();
        let space = AddressSpace::new(&phys, phys.page(0));

        let frame = FrameNumber::new(0x10000);
        set_fixed_slot(&space, &mut alloc, FIXMAP_MISC, frame, MapFlags::RW).unwrap();

        let (pte, _) = space.walk(slot_virt(FIXMAP_MISC));
        assert!(pte.is_leaf());
        assert_eq!(pte.frame(), frame);
        // Occupied slots refuse a different frame.
        assert!(
            set_fixed_slot(
                &space,
                &mut alloc,
                FIXMAP_MISC,
                FrameNumber::new(0x10001),
                MapFlags::RW
            )
            .is_err()
        );

        clear_fixed_slot(&space, FIXMAP_MISC).unwrap();
        let (pte, _) = space.walk(slot_virt(FIXMAP_MISC));
        assert!(matches!(pte.kind(), EntryKind::Invalid));
    }
}
