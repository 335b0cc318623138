use crate::{FrameNumber, PageOffset, PageSize, PhysicalPage, align_down, align_up};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// A physical memory address (machine bus address).
///
/// Newtype over `u64` to prevent mixing with virtual addresses. Carries no
/// alignment guarantee by itself; use [`PhysicalPage`] when a page-aligned
/// base is required.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The 4 KiB frame containing this address.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> FrameNumber {
        FrameNumber::new(self.0 >> 12)
    }

    /// The page of size `S` containing this address.
    #[inline]
    #[must_use]
    pub const fn page<S: PageSize>(self) -> PhysicalPage<S> {
        PhysicalPage::containing(self)
    }

    /// The within-page remainder for page size `S`.
    #[inline]
    #[must_use]
    pub const fn offset<S: PageSize>(self) -> PageOffset<S> {
        PageOffset::new(self.0 & S::MASK)
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned_to(self, a: u64) -> bool {
        self.0 & (a - 1) == 0
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self, a: u64) -> Self {
        Self(align_down(self.0, a))
    }

    #[inline]
    #[must_use]
    pub const fn align_up(self, a: u64) -> Self {
        Self(align_up(self.0, a))
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.checked_add(rhs).expect("PhysicalAddress add"))
    }
}

impl AddAssign<u64> for PhysicalAddress {
    fn add_assign(&mut self, rhs: u64) {
        *self = *self + rhs;
    }
}

impl Sub<Self> for PhysicalAddress {
    type Output = u64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0.checked_sub(rhs.0).expect("PhysicalAddress sub")
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalAddress(0x{:016x})", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}
