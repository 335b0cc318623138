//! # Frame Table Builder
//!
//! One metadata descriptor per physical page of usable RAM, living in a
//! dedicated virtual window so that `descriptor_for(frame)` is a single
//! array index. Built exactly once, early in boot, after the boot
//! allocator is available; the base offset freezes at construction.

use crate::BootPages;
use core::mem::size_of;
use core::ptr::NonNull;
use hv_addresses::{FrameNumber, PhysicalAddress, PhysicalPage, align_up};
use hv_info::layout::{FRAMETABLE_SIZE, FRAMETABLE_VIRT_START};
use hv_info::paging::level_size;
use hv_sync::OnceInit;
use hv_vmem::{AddressSpace, FrameAlloc, FrameHandle, FrameMapper, MapError, MapFlags};

/// Per-physical-page metadata.
///
/// Kept deliberately small and fixed-size: the table covers every frame
/// of RAM, so each byte here costs one byte per 4 KiB of memory.
#[repr(C)]
#[derive(Debug)]
pub struct FrameDescriptor {
    /// Reference and type accounting word.
    pub count_info: u64,
    /// Owner and lifecycle state.
    pub state: u32,
    /// Allocation order when this frame heads a free run.
    pub order: u32,
}

const _: () = {
    assert!(size_of::<FrameDescriptor>() == 16);
};

/// Why frame-table construction failed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameTableError {
    /// The table was already built; re-invocation is a caller bug.
    #[error("frame table already constructed")]
    AlreadyInitialized,

    /// The RAM range endpoints are not page-aligned.
    #[error("RAM range endpoints are not page-aligned")]
    Misaligned,

    /// Descriptors for this much RAM exceed the reserved window.
    #[error("descriptors for {0} frames exceed the frame-table window")]
    WindowOverflow(u64),

    /// The boot allocator could not provide the backing store.
    #[error("boot allocator could not back the frame table")]
    OutOfMemory,

    /// The update engine failed underneath us.
    #[error(transparent)]
    Map(#[from] MapError),
}

/// The frozen indexing state.
#[derive(Copy, Clone, Debug)]
struct FrameTableBase {
    /// Frame number of descriptor index 0.
    base_frame: FrameNumber,
    /// Descriptors in the live (zeroed) portion.
    nr_frames: u64,
}

/// The frame table: one-shot indexing state plus the builder.
pub struct FrameTable {
    base: OnceInit<FrameTableBase>,
}

impl FrameTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base: OnceInit::new(),
        }
    }

    /// Build the frame table covering `[ram_start, ram_end)`.
    ///
    /// Sizes the descriptor array, rounds the backing allocation up to a
    /// level-1 superpage multiple, maps it at the fixed window, zeroes
    /// the live portion, poisons the rounding slack with all-ones, and
    /// freezes the base offset. Designed to run exactly once.
    ///
    /// # Errors
    /// See [`FrameTableError`].
    pub fn setup_mappings<M, A, P>(
        &self,
        space: &AddressSpace<'_, M>,
        table_alloc: &mut A,
        pages: &mut P,
        ram_start: PhysicalAddress,
        ram_end: PhysicalAddress,
    ) -> Result<(), FrameTableError>
    where
        M: FrameMapper + ?Sized,
        A: FrameAlloc + ?Sized,
        P: BootPages + ?Sized,
    {
        if self.base.get().is_some() {
            return Err(FrameTableError::AlreadyInitialized);
        }
        if !ram_start.is_aligned_to(4096) || !ram_end.is_aligned_to(4096) {
            return Err(FrameTableError::Misaligned);
        }

        let nr_frames = (ram_end - ram_start) >> 12;
        let live_bytes = nr_frames * size_of::<FrameDescriptor>() as u64;
        // Superpage-multiple backing keeps the window mappable with
        // level-1 leaves regardless of RAM size.
        let mapped_bytes = align_up(live_bytes, level_size(1));
        if mapped_bytes > FRAMETABLE_SIZE {
            return Err(FrameTableError::WindowOverflow(nr_frames));
        }

        let mapped_frames = mapped_bytes >> 12;
        let backing = pages
            .alloc_frames(mapped_frames, None)
            .ok_or(FrameTableError::OutOfMemory)?;

        space.map(
            table_alloc,
            hv_addresses::VirtualAddress::new(FRAMETABLE_VIRT_START),
            backing,
            mapped_frames,
            MapFlags::RW | MapFlags::GLOBAL,
        )?;

        // Initialize through the adapter — the same physical bytes the
        // window shows. Live descriptors read as zero; the rounding slack
        // is poisoned so a stray index faults loudly in debug dumps.
        for i in 0..mapped_frames {
            let mut frame = FrameHandle::map(space.mapper(), PhysicalPage::from_frame(backing + i));
            let start = i * 4096;
            if start + 4096 <= live_bytes {
                frame.fill(0);
            } else if start >= live_bytes {
                frame.fill(0xFF);
            } else {
                let split = (live_bytes - start) as usize;
                frame[..split].fill(0);
                frame[split..].fill(0xFF);
            }
        }

        log::info!(
            "frametable: {nr_frames} descriptors for {ram_start}..{ram_end}, {mapped_frames} frames of backing"
        );

        self.base
            .set(FrameTableBase {
                base_frame: ram_start.frame(),
                nr_frames,
            })
            .map_err(|_| FrameTableError::AlreadyInitialized)
    }

    /// The descriptor for `frame`: a single array index off the frozen
    /// base. `None` before construction or outside the covered range.
    #[must_use]
    pub fn descriptor_of(&self, frame: FrameNumber) -> Option<NonNull<FrameDescriptor>> {
        let base = self.base.get()?;
        if frame < base.base_frame {
            return None;
        }
        let idx = frame - base.base_frame;
        if idx >= base.nr_frames {
            return None;
        }
        let addr = FRAMETABLE_VIRT_START + idx * size_of::<FrameDescriptor>() as u64;
        NonNull::new(addr as usize as *mut FrameDescriptor)
    }

    /// Inverse of [`descriptor_of`](Self::descriptor_of).
    #[must_use]
    pub fn frame_of(&self, descriptor: NonNull<FrameDescriptor>) -> Option<FrameNumber> {
        let base = self.base.get()?;
        let addr = descriptor.as_ptr() as u64;
        if addr < FRAMETABLE_VIRT_START {
            return None;
        }
        let idx = (addr - FRAMETABLE_VIRT_START) / size_of::<FrameDescriptor>() as u64;
        if idx >= base.nr_frames {
            return None;
        }
        Some(base.base_frame + idx)
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ContigAlloc, TestPhys, space_with};
    use hv_vmem::Level;

    const RAM_START: u64 = 0x8000_0000;

    #[test]
    fn builds_maps_zeroes_and_poisons() {
        // 1000 RAM frames → 16000 descriptor bytes → 2 MiB of backing
        // (512 frames), of which frames 0..3 are live and 4.. are slack.
        let phys = TestPhys::with_frames(540);
        let (space, mut alloc) = space_with(&phys);
        let table = FrameTable::new();
        // Backing comes from TestPhys frames 16..528.
        let mut pages = ContigAlloc::new(&phys, 16);

        table
            .setup_mappings(
                &space,
                &mut alloc,
                &mut pages,
                PhysicalAddress::new(RAM_START),
                PhysicalAddress::new(RAM_START + 1000 * 4096),
            )
            .unwrap();

        // The window is mapped read-write at its fixed base.
        let (pte, level) = space.walk(hv_addresses::VirtualAddress::new(FRAMETABLE_VIRT_START));
        assert!(pte.is_leaf());
        assert!(pte.writable());
        assert_eq!(pte.frame(), phys.base + 16);
        // 2 MiB backing with a 4 KiB-aligned base: 4 KiB leaves.
        assert_eq!(level, Level::PAGE);

        // Live bytes are zero; the slack is poisoned; the boundary frame
        // splits at byte 16000 - 3*4096 = 3712.
        assert!(phys.bytes(16).iter().all(|&b| b == 0));
        assert!(phys.bytes(17).iter().all(|&b| b == 0));
        let boundary = phys.bytes(19);
        assert!(boundary[..3712].iter().all(|&b| b == 0));
        assert!(boundary[3712..].iter().all(|&b| b == 0xFF));
        assert!(phys.bytes(20).iter().all(|&b| b == 0xFF));
        assert!(phys.bytes(527).iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn descriptor_indexing_is_a_bijection() {
        let phys = TestPhys::with_frames(540);
        let (space, mut alloc) = space_with(&phys);
        let table = FrameTable::new();
        let mut pages = ContigAlloc::new(&phys, 16);

        let start = PhysicalAddress::new(RAM_START);
        let end = PhysicalAddress::new(RAM_START + 1000 * 4096);
        table
            .setup_mappings(&space, &mut alloc, &mut pages, start, end)
            .unwrap();

        for i in [0u64, 1, 499, 998, 999] {
            let frame = start.frame() + i;
            let desc = table.descriptor_of(frame).unwrap();
            assert_eq!(table.frame_of(desc), Some(frame));
        }
        // Descriptors are 16 bytes apart.
        let d0 = table.descriptor_of(start.frame()).unwrap();
        let d1 = table.descriptor_of(start.frame() + 1).unwrap();
        assert_eq!(d1.as_ptr() as u64 - d0.as_ptr() as u64, 16);

        // Out-of-range frames translate to nothing.
        assert!(table.descriptor_of(FrameNumber::new(0x100)).is_none());
        assert!(table.descriptor_of(start.frame() + 1000).is_none());
    }

    #[test]
    fn runs_exactly_once() {
        let phys = TestPhys::with_frames(540);
        let (space, mut alloc) = space_with(&phys);
        let table = FrameTable::new();
        let mut pages = ContigAlloc::new(&phys, 16);

        let start = PhysicalAddress::new(RAM_START);
        let end = PhysicalAddress::new(RAM_START + 4096);
        table
            .setup_mappings(&space, &mut alloc, &mut pages, start, end)
            .unwrap();
        assert_eq!(
            table.setup_mappings(&space, &mut alloc, &mut pages, start, end),
            Err(FrameTableError::AlreadyInitialized)
        );
    }

    #[test]
    fn oversized_ram_is_rejected_up_front() {
        let phys = TestPhys::with_frames(32);
        let (space, mut alloc) = space_with(&phys);
        let table = FrameTable::new();
        let mut pages = ContigAlloc::new(&phys, 16);

        // More frames than the window has descriptor slots for.
        let frames = (FRAMETABLE_SIZE / 16) + 1;
        let err = table
            .setup_mappings(
                &space,
                &mut alloc,
                &mut pages,
                PhysicalAddress::new(RAM_START),
                PhysicalAddress::new(RAM_START + frames * 4096),
            )
            .unwrap_err();
        assert_eq!(err, FrameTableError::WindowOverflow(frames));
        assert!(table.descriptor_of(PhysicalAddress::new(RAM_START).frame()).is_none());
    }

    #[test]
    fn unbuilt_table_translates_nothing() {
        let table = FrameTable::new();
        assert!(table.descriptor_of(FrameNumber::new(0x80000)).is_none());
        let dangling = NonNull::<FrameDescriptor>::dangling();
        assert!(table.frame_of(dangling).is_none());
    }
}
