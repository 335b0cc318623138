//! # I/O Remap Windows
//!
//! Combines allocation of a virtual window from the vmap region with a
//! `map` call at caller-selected caching attributes — the `ioremap`
//! family. Windows are handed out by a bump cursor; this core never
//! recycles them (device mappings live for the hypervisor's lifetime).

use crate::flags::MapFlags;
use crate::handle::FrameMapper;
use crate::space::{AddressSpace, MapError};
use crate::FrameAlloc;
use hv_addresses::{PageSize, PhysicalAddress, Size4K, VirtualAddress, align_up};
use hv_sync::SpinLock;

/// Bump arena over a virtual window reserved for I/O remaps.
pub struct VmapArena {
    cursor: SpinLock<u64>,
    end: u64,
}

/// Why an I/O remap failed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmapError {
    /// The vmap virtual window is used up.
    #[error("vmap window exhausted")]
    Exhausted,

    /// The underlying mapping failed.
    #[error(transparent)]
    Map(#[from] MapError),
}

impl VmapArena {
    /// An arena handing out page-aligned windows from `[start, start+size)`.
    #[must_use]
    pub const fn new(start: VirtualAddress, size: u64) -> Self {
        Self {
            cursor: SpinLock::new(start.as_u64()),
            end: start.as_u64() + size,
        }
    }

    /// Reserve a window of `bytes`, rounded up to whole pages.
    fn alloc_window(&self, bytes: u64) -> Option<VirtualAddress> {
        let len = align_up(bytes, Size4K::SIZE);
        let mut cursor = self.cursor.lock();
        if self.end - *cursor < len {
            return None;
        }
        let va = VirtualAddress::new(*cursor);
        *cursor += len;
        Some(va)
    }

    /// Map `[pa, pa+size)` into a fresh window with `extra` access bits on
    /// top of a valid read-write mapping; returns the virtual address
    /// corresponding to `pa` (including its in-page offset).
    ///
    /// # Errors
    /// [`VmapError::Exhausted`] when the window is used up, otherwise the
    /// underlying [`MapError`].
    pub fn ioremap_with<M: FrameMapper + ?Sized, A: FrameAlloc + ?Sized>(
        &self,
        space: &AddressSpace<'_, M>,
        alloc: &mut A,
        pa: PhysicalAddress,
        size: u64,
        extra: MapFlags,
    ) -> Result<VirtualAddress, VmapError> {
        let first = pa.page::<Size4K>();
        let span = align_up(pa.offset::<Size4K>().as_u64() + size, Size4K::SIZE);
        let va = self.alloc_window(span).ok_or(VmapError::Exhausted)?;
        space.map(
            alloc,
            va,
            first.frame(),
            span >> Size4K::SHIFT,
            MapFlags::RW | extra,
        )?;
        Ok(va + pa.offset::<Size4K>().as_u64())
    }

    /// Map device registers: strongly-ordered, non-cacheable (Svpbmt IO).
    ///
    /// # Errors
    /// See [`ioremap_with`](Self::ioremap_with).
    pub fn ioremap_nocache<M: FrameMapper + ?Sized, A: FrameAlloc + ?Sized>(
        &self,
        space: &AddressSpace<'_, M>,
        alloc: &mut A,
        pa: PhysicalAddress,
        size: u64,
    ) -> Result<VirtualAddress, VmapError> {
        self.ioremap_with(space, alloc, pa, size, MapFlags::DEVICE)
    }

    /// Map write-combining-style memory (Svpbmt NC).
    ///
    /// # Errors
    /// See [`ioremap_with`](Self::ioremap_with).
    pub fn ioremap_wc<M: FrameMapper + ?Sized, A: FrameAlloc + ?Sized>(
        &self,
        space: &AddressSpace<'_, M>,
        alloc: &mut A,
        pa: PhysicalAddress,
        size: u64,
    ) -> Result<VirtualAddress, VmapError> {
        self.ioremap_with(space, alloc, pa, size, MapFlags::NOCACHE)
    }

    /// Map ordinary cacheable memory through a vmap window.
    ///
    /// # Errors
    /// See [`ioremap_with`](Self::ioremap_with).
    pub fn ioremap_cache<M: FrameMapper + ?Sized, A: FrameAlloc + ?Sized>(
        &self,
        space: &AddressSpace<'_, M>,
        alloc: &mut A,
        pa: PhysicalAddress,
        size: u64,
    ) -> Result<VirtualAddress, VmapError> {
        self.ioremap_with(space, alloc, pa, size, MapFlags::empty())
    }
}
