use crate::{PageOffset, PageSize, VirtualPage, align_down, align_up};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// A virtual address in the hypervisor's own address space.
///
/// Newtype over `u64` to prevent mixing with physical addresses.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as u64)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The virtual page number: the 4 KiB granule index of this address.
    #[inline]
    #[must_use]
    pub const fn vpn(self) -> u64 {
        self.0 >> 12
    }

    /// Whether this address is in canonical Sv39 form (bits `63:39`
    /// replicate bit 38).
    #[inline]
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        let sign = (self.0 >> 38) & 1;
        let high = self.0 >> 39;
        (sign == 0 && high == 0) || (sign == 1 && high == (1 << 25) - 1)
    }

    /// The page of size `S` containing this address.
    #[inline]
    #[must_use]
    pub const fn page<S: PageSize>(self) -> VirtualPage<S> {
        VirtualPage::containing(self)
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

impl Add<u64> for VirtualAddress {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.checked_add(rhs).expect("VirtualAddress add"))
    }
}

impl AddAssign<u64> for VirtualAddress {
    fn add_assign(&mut self, rhs: u64) {
        *self = *self + rhs;
    }
}

impl Sub<Self> for VirtualAddress {
    type Output = u64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0.checked_sub(rhs.0).expect("VirtualAddress sub")
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress(0x{:016x})", self.0)
    }
}

impl From<u64> for VirtualAddress {
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}
