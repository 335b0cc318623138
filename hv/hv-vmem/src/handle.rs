use crate::table::PageTable;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;
use hv_addresses::{PhysicalPage, Size4K};

/// Makes an arbitrary physical 4 KiB frame temporarily addressable.
///
/// Two backings exist over the hypervisor's lifetime:
///
/// - **Early boot**: a small reserved fixmap window, reused by every
///   caller. Valid only while a single CPU runs; callers are serialized by
///   the update engine's lock.
/// - **After boot**: the general per-CPU demand-mapping facility provided
///   by the surrounding hypervisor.
///
/// Use the [`TableHandle`]/[`FrameHandle`] guards rather than calling the
/// raw methods; the guards release the window on every exit path.
///
/// # Safety
///
/// Implementations must guarantee that `map_frame` returns a pointer to
/// the 4096 bytes of `page`, valid and exclusive (no other live window
/// onto the same frame from this mapper) and writable until the matching
/// `unmap_frame`.
pub unsafe trait FrameMapper {
    /// Map `page` and return a pointer to its first byte.
    ///
    /// # Safety
    /// The caller must pair this with exactly one `unmap_frame` and not
    /// use the pointer afterwards.
    unsafe fn map_frame(&self, page: PhysicalPage<Size4K>) -> NonNull<u8>;

    /// Release a window previously returned by `map_frame`.
    ///
    /// # Safety
    /// `ptr` must come from `map_frame` on `self` and must not be reused.
    unsafe fn unmap_frame(&self, ptr: NonNull<u8>);
}

/// RAII view of one physical frame as a [`PageTable`].
///
/// Every bit pattern is a valid [`Pte`](crate::Pte), so viewing any
/// 4 KiB frame as a table is sound; whether its *contents* are meaningful
/// is up to the walk logic that chose the frame.
pub struct TableHandle<'m, M: FrameMapper + ?Sized> {
    ptr: NonNull<PageTable>,
    mapper: &'m M,
}

impl<'m, M: FrameMapper + ?Sized> TableHandle<'m, M> {
    /// Map the table page at `page`.
    pub fn map(mapper: &'m M, page: PhysicalPage<Size4K>) -> Self {
        // Safety: released in Drop; the mapper contract guarantees a
        // valid, exclusive, 4 KiB window, which any PageTable fits.
        let ptr = unsafe { mapper.map_frame(page) }.cast::<PageTable>();
        Self { ptr, mapper }
    }
}

impl<M: FrameMapper + ?Sized> Deref for TableHandle<'_, M> {
    type Target = PageTable;

    fn deref(&self) -> &PageTable {
        // Safety: valid and exclusive per the mapper contract.
        unsafe { self.ptr.as_ref() }
    }
}

impl<M: FrameMapper + ?Sized> DerefMut for TableHandle<'_, M> {
    fn deref_mut(&mut self) -> &mut PageTable {
        // Safety: valid and exclusive per the mapper contract.
        unsafe { self.ptr.as_mut() }
    }
}

impl<M: FrameMapper + ?Sized> Drop for TableHandle<'_, M> {
    fn drop(&mut self) {
        // Safety: ptr came from map_frame and is dropped exactly once.
        unsafe { self.mapper.unmap_frame(self.ptr.cast()) };
    }
}

/// RAII view of one physical frame as raw bytes.
///
/// Used where the engine initializes non-table memory through the adapter
/// (e.g. zeroing and poisoning the frame-table backing store).
pub struct FrameHandle<'m, M: FrameMapper + ?Sized> {
    ptr: NonNull<[u8; 4096]>,
    mapper: &'m M,
}

impl<'m, M: FrameMapper + ?Sized> FrameHandle<'m, M> {
    /// Map the frame at `page`.
    pub fn map(mapper: &'m M, page: PhysicalPage<Size4K>) -> Self {
        // Safety: released in Drop; see the mapper contract.
        let ptr = unsafe { mapper.map_frame(page) }.cast::<[u8; 4096]>();
        Self { ptr, mapper }
    }

    /// Fill the frame with `byte`.
    pub fn fill(&mut self, byte: u8) {
        self.deref_mut().fill(byte);
    }
}

impl<M: FrameMapper + ?Sized> Deref for FrameHandle<'_, M> {
    type Target = [u8; 4096];

    fn deref(&self) -> &[u8; 4096] {
        // Safety: valid and exclusive per the mapper contract.
        unsafe { self.ptr.as_ref() }
    }
}

impl<M: FrameMapper + ?Sized> DerefMut for FrameHandle<'_, M> {
    fn deref_mut(&mut self) -> &mut [u8; 4096] {
        // Safety: valid and exclusive per the mapper contract.
        unsafe { self.ptr.as_mut() }
    }
}

impl<M: FrameMapper + ?Sized> Drop for FrameHandle<'_, M> {
    fn drop(&mut self) {
        // Safety: ptr came from map_frame and is dropped exactly once.
        unsafe { self.mapper.unmap_frame(self.ptr.cast()) };
    }
}
