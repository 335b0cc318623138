use crate::PageSize;
use core::fmt;
use core::marker::PhantomData;

/// The within-page remainder of an address, for page size `S`.
///
/// Always `< S::SIZE`. Combine with a page base via
/// [`PhysicalPage::join`](crate::PhysicalPage::join) or
/// [`VirtualPage::join`](crate::VirtualPage::join).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageOffset<S: PageSize>(u64, PhantomData<S>);

impl<S: PageSize> PageOffset<S> {
    /// Construct from a raw remainder. Debug-asserts `v < S::SIZE`.
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        debug_assert!(v < S::SIZE);
        Self(v, PhantomData)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl<S: PageSize> fmt::Debug for PageOffset<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageOffset<{}>(0x{:x})", S::as_str(), self.0)
    }
}
