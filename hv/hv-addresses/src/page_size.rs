use core::fmt;
use core::hash::Hash;

/// Sealed trait pattern so [`PageSize`] is only implemented by our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the supported Sv39 leaf granularities.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Display + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u64;
    /// log2(SIZE), i.e. the number of low bits used for the offset.
    const SHIFT: u32;
    /// `SIZE - 1`, the within-page offset mask.
    const MASK: u64 = Self::SIZE - 1;

    fn as_str() -> &'static str;
}

/// 4 KiB page, mapped by a level-0 leaf.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;
impl sealed::Sealed for Size4K {}
impl PageSize for Size4K {
    const SIZE: u64 = 4096;
    const SHIFT: u32 = 12;

    fn as_str() -> &'static str {
        "4K"
    }
}

/// 2 MiB superpage, mapped by a level-1 leaf.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size2M;
impl sealed::Sealed for Size2M {}
impl PageSize for Size2M {
    const SIZE: u64 = 2 * 1024 * 1024;
    const SHIFT: u32 = 21;

    fn as_str() -> &'static str {
        "2M"
    }
}

/// 1 GiB superpage, mapped by a level-2 (root-level) leaf.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size1G;
impl sealed::Sealed for Size1G {}
impl PageSize for Size1G {
    const SIZE: u64 = 1024 * 1024 * 1024;
    const SHIFT: u32 = 30;

    fn as_str() -> &'static str {
        "1G"
    }
}

impl fmt::Display for Size4K {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::as_str())
    }
}

impl fmt::Display for Size2M {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::as_str())
    }
}

impl fmt::Display for Size1G {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::as_str())
    }
}

impl fmt::Debug for Size4K {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

impl fmt::Debug for Size2M {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

impl fmt::Debug for Size1G {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}
