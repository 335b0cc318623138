use bitflags::bitflags;

bitflags! {
    /// Caller-facing description of a mapping-range request.
    ///
    /// The low bits express intent and permissions; the high bits select
    /// behavior of the update engine itself. Permission bits translate to
    /// Sv39 PTE access bits, the memory-type bits to Svpbmt classes.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct MapFlags: u32 {
        /// The entry is (or stays) valid. Absent on a removal request.
        const VALID = 1 << 0;

        /// Loads are permitted.
        const READABLE = 1 << 1;

        /// Stores are permitted. Mutually exclusive with `EXECUTABLE`;
        /// the engine rejects W+X outright.
        const WRITABLE = 1 << 2;

        /// Instruction fetches are permitted.
        const EXECUTABLE = 1 << 3;

        /// Translation survives an address-space switch.
        const GLOBAL = 1 << 4;

        /// Svpbmt NC: non-cacheable, idempotent memory.
        const NOCACHE = 1 << 5;

        /// Svpbmt IO: non-cacheable, strongly-ordered I/O memory.
        const DEVICE = 1 << 6;

        /// Never coalesce into superpages; map 4 KiB granules only.
        const SMALL = 1 << 7;

        /// Create intermediate tables over the range but write no leaf.
        const POPULATE = 1 << 8;

        /// Ordinary read-write hypervisor data.
        const RW = Self::VALID.bits() | Self::READABLE.bits() | Self::WRITABLE.bits();

        /// Read-only data.
        const RO = Self::VALID.bits() | Self::READABLE.bits();

        /// Executable text.
        const RX = Self::VALID.bits() | Self::READABLE.bits() | Self::EXECUTABLE.bits();
    }
}

impl MapFlags {
    /// Whether the request carries the forbidden writable+executable
    /// combination.
    #[inline]
    #[must_use]
    pub const fn is_wx(self) -> bool {
        self.contains(Self::WRITABLE) && self.contains(Self::EXECUTABLE)
    }

    /// The Svpbmt class requested by the memory-type bits.
    #[inline]
    #[must_use]
    pub const fn memory_type(self) -> MemoryType {
        if self.contains(Self::DEVICE) {
            MemoryType::Io
        } else if self.contains(Self::NOCACHE) {
            MemoryType::NonCacheable
        } else {
            MemoryType::Normal
        }
    }
}

/// Svpbmt memory-type class of a leaf mapping.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum MemoryType {
    /// PMA: whatever the platform's physical memory attributes say.
    Normal = 0,
    /// NC: non-cacheable, idempotent.
    NonCacheable = 1,
    /// IO: non-cacheable, non-idempotent, strongly ordered.
    Io = 2,
}

impl MemoryType {
    #[inline]
    #[must_use]
    pub const fn from_bits(v: u8) -> Self {
        match v {
            1 => Self::NonCacheable,
            2 => Self::Io,
            _ => Self::Normal,
        }
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }
}
