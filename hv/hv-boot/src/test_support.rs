//! Shared in-memory physical-frame store for this crate's unit tests:
//! simulated RAM behind a [`FrameMapper`], a bump allocator for table
//! frames, and a contiguous-run allocator standing in for the boot
//! allocator.

use crate::BootPages;
use core::cell::UnsafeCell;
use core::ptr::NonNull;
use hv_addresses::{FrameNumber, PhysicalPage, Size4K};
use hv_vmem::{AddressSpace, FrameAlloc, FrameMapper, TableHandle};
use std::vec::Vec;

/// A 4 KiB-aligned frame of simulated physical memory.
#[repr(align(4096))]
struct Frame(UnsafeCell<[u8; 4096]>);

/// Simulated physical memory addressed from a fixed base frame number.
pub(crate) struct TestPhys {
    frames: Vec<Frame>,
    pub(crate) base: FrameNumber,
}

impl TestPhys {
    /// Frame number of the store's first frame (physical 2 GiB).
    const BASE: u64 = 0x80000;

    pub(crate) fn with_frames(n: usize) -> Self {
        let mut frames = Vec::with_capacity(n);
        for _ in 0..n {
            frames.push(Frame(UnsafeCell::new([0u8; 4096])));
        }
        Self {
            frames,
            base: FrameNumber::new(Self::BASE),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn page(&self, idx: u64) -> PhysicalPage<Size4K> {
        PhysicalPage::from_frame(self.base + idx)
    }

    /// Read back raw bytes of frame `idx`, for asserting on fill patterns.
    pub(crate) fn bytes(&self, idx: u64) -> [u8; 4096] {
        // Safety: tests never hold a live window while reading back.
        unsafe { *self.frames[idx as usize].0.get() }
    }
}

// Safety: every frame is an owned, aligned 4 KiB buffer; pointers stay
// valid for the lifetime of TestPhys and tests do not alias windows.
unsafe impl FrameMapper for TestPhys {
    unsafe fn map_frame(&self, page: PhysicalPage<Size4K>) -> NonNull<u8> {
        let idx = (page.frame() - self.base) as usize;
        NonNull::new(self.frames[idx].0.get().cast::<u8>()).unwrap()
    }

    unsafe fn unmap_frame(&self, _ptr: NonNull<u8>) {}
}

/// Bump allocator over a range of [`TestPhys`] frame indices, for
/// intermediate tables.
pub(crate) struct BumpAlloc {
    next: u64,
    end: u64,
    base: FrameNumber,
}

impl BumpAlloc {
    pub(crate) fn new(phys: &TestPhys, first: u64, end: u64) -> Self {
        Self {
            next: first,
            end,
            base: phys.base,
        }
    }
}

impl FrameAlloc for BumpAlloc {
    fn alloc_table_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        if self.next >= self.end {
            return None;
        }
        let idx = self.next;
        self.next += 1;
        Some(PhysicalPage::from_frame(self.base + idx))
    }
}

/// Contiguous-run allocator over [`TestPhys`] frames, standing in for the
/// platform's boot allocator.
pub(crate) struct ContigAlloc {
    next: u64,
    capacity: u64,
    base: FrameNumber,
}

impl ContigAlloc {
    pub(crate) fn new(phys: &TestPhys, first: u64) -> Self {
        Self {
            next: first,
            capacity: phys.len() as u64,
            base: phys.base,
        }
    }
}

impl BootPages for ContigAlloc {
    fn alloc_frames(&mut self, frames: u64, below_bits: Option<u32>) -> Option<FrameNumber> {
        if self.next + frames > self.capacity {
            return None;
        }
        let run = self.base + self.next;
        if let Some(bits) = below_bits {
            if (run + frames).address().as_u64() > 1 << bits {
                return None;
            }
        }
        self.next += frames;
        Some(run)
    }
}

/// A fresh address space over `phys`, its root in frame 0 and table
/// allocations bumping from frame 1.
pub(crate) fn space_with(phys: &TestPhys) -> (AddressSpace<'_, TestPhys>, BumpAlloc) {
    let alloc = BumpAlloc::new(phys, 1, 16);
    TableHandle::map(phys, phys.page(0)).zero();
    (AddressSpace::new(phys, phys.page(0)), alloc)
}
