use crate::flags::{MapFlags, MemoryType};
use bitfield_struct::bitfield;
use hv_addresses::{FrameNumber, PhysicalPage, Size4K};

/// A single 64-bit Sv39 page-table entry in its raw bitfield form.
///
/// One entry either points to a **next-level table** (valid, R=W=X all
/// clear) or directly maps a **physical page** (valid, any of R/W/X set).
/// The same layout is used at every level; only the alignment rules of the
/// encoded frame differ.
///
/// ### Bit layout
///
/// | Bits  | Name   | Meaning |
/// |-------|--------|----------|
/// | 0     | `V`    | Valid entry if set |
/// | 1     | `R`    | Readable (leaf only; R=W=X=0 marks a table pointer) |
/// | 2     | `W`    | Writable; reserved without `R` |
/// | 3     | `X`    | Executable |
/// | 4     | `U`    | User-mode accessible (unused by the hypervisor) |
/// | 5     | `G`    | Global translation |
/// | 6     | `A`    | Accessed |
/// | 7     | `D`    | Dirty (leaf only) |
/// | 8–9   | `RSW`  | Reserved for software |
/// | 10–53 | `PPN`  | Physical frame number |
/// | 54–60 | —      | Reserved, must be zero |
/// | 61–62 | `PBMT` | Svpbmt memory-type class |
/// | 63    | `N`    | Svnapot contiguity hint (unused here) |
///
/// ### Notes
/// - `W` without `R` is a reserved encoding; the engine never produces it.
/// - A leaf's PPN must be aligned to the leaf's level (512² frames for a
///   1 GiB leaf); the update engine's granularity choice guarantees this.
#[bitfield(u64)]
pub struct Pte {
    /// Valid (V, bit 0).
    pub valid: bool,

    /// Readable (R, bit 1). With W and X clear, distinguishes a leaf from
    /// a table pointer.
    pub readable: bool,

    /// Writable (W, bit 2). Only meaningful together with R.
    pub writable: bool,

    /// Executable (X, bit 3).
    pub executable: bool,

    /// User-accessible (U, bit 4). The hypervisor maps nothing for
    /// user mode; always clear in entries this crate writes.
    pub user: bool,

    /// Global (G, bit 5).
    pub global: bool,

    /// Accessed (A, bit 6). Set by hardware (or pre-set by software to
    /// avoid update traps on first access).
    pub accessed: bool,

    /// Dirty (D, bit 7). Leaf only; pre-set on writable leaves.
    pub dirty: bool,

    /// Reserved for software (bits 8–9). Hardware ignores these.
    #[bits(2)]
    pub software: u8,

    /// Physical frame number (bits 10–53).
    #[bits(44)]
    ppn: u64,

    /// Reserved (bits 54–60); must be zero.
    #[bits(7)]
    reserved: u8,

    /// Svpbmt memory-type class (bits 61–62).
    #[bits(2)]
    pbmt: u8,

    /// Svnapot contiguity hint (bit 63); unused by this engine.
    pub napot: bool,
}

/// The three mutually exclusive meanings of a PTE.
///
/// Every entry is exactly one of these; the update engine's transition
/// checks are a match over this enum, never raw bit tests.
#[derive(Copy, Clone, Debug)]
pub enum EntryKind {
    /// Not valid; carries no address information.
    Invalid,
    /// Points at the next-level table.
    Table(PhysicalPage<Size4K>),
    /// Terminates the walk, mapping physical memory at this level's
    /// granularity.
    Leaf {
        /// First frame of the mapped range.
        frame: FrameNumber,
        /// The raw entry, for attribute inspection.
        pte: Pte,
    },
}

impl Pte {
    /// The frame number encoded in this entry.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> FrameNumber {
        FrameNumber::new(self.ppn())
    }

    /// Classify this entry into its semantic variant.
    #[inline]
    #[must_use]
    pub fn kind(self) -> EntryKind {
        if !self.valid() {
            EntryKind::Invalid
        } else if !self.readable() && !self.writable() && !self.executable() {
            EntryKind::Table(PhysicalPage::from_frame(self.frame()))
        } else {
            EntryKind::Leaf {
                frame: self.frame(),
                pte: self,
            }
        }
    }

    /// Whether this entry is a valid leaf mapping.
    #[inline]
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        self.valid() && (self.readable() || self.writable() || self.executable())
    }

    /// Whether this entry is a valid next-level table pointer.
    #[inline]
    #[must_use]
    pub const fn is_table(self) -> bool {
        self.valid() && !self.readable() && !self.writable() && !self.executable()
    }

    /// The Svpbmt class of this entry.
    #[inline]
    #[must_use]
    pub const fn memory_type(self) -> MemoryType {
        MemoryType::from_bits(self.pbmt())
    }

    /// Build a next-level table pointer: valid, R=W=X clear, no
    /// permission or memory-type bits.
    #[inline]
    #[must_use]
    pub fn table_entry(table: PhysicalPage<Size4K>) -> Self {
        Self::new().with_valid(true).with_ppn(table.frame().as_u64())
    }

    /// Build a leaf mapping `frame` with the access and memory-type bits
    /// from `flags`.
    ///
    /// A and D are pre-set so hardware never traps to update them; the
    /// engine has no use for access tracking on its own mappings.
    #[inline]
    #[must_use]
    pub fn leaf_entry(frame: FrameNumber, flags: MapFlags) -> Self {
        debug_assert!(flags.intersects(MapFlags::READABLE | MapFlags::EXECUTABLE));
        Self::new()
            .with_valid(true)
            .with_ppn(frame.as_u64())
            .with_readable(flags.contains(MapFlags::READABLE))
            .with_writable(flags.contains(MapFlags::WRITABLE))
            .with_executable(flags.contains(MapFlags::EXECUTABLE))
            .with_global(flags.contains(MapFlags::GLOBAL))
            .with_accessed(true)
            .with_dirty(true)
            .with_pbmt(flags.memory_type().into_bits())
    }

    /// Rewrite only the access and memory-type bits, preserving the frame
    /// and everything else. Used for attribute-only updates.
    #[inline]
    #[must_use]
    pub fn with_access(self, flags: MapFlags) -> Self {
        self.with_readable(flags.contains(MapFlags::READABLE))
            .with_writable(flags.contains(MapFlags::WRITABLE))
            .with_executable(flags.contains(MapFlags::EXECUTABLE))
            .with_global(flags.contains(MapFlags::GLOBAL))
            .with_pbmt(flags.memory_type().into_bits())
    }
}
