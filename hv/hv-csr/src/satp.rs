use bitfield_struct::bitfield;
use hv_addresses::{PhysicalPage, Size4K};

/// Paging modes encodable in `satp.MODE`.
///
/// Only `Bare`, `Sv39`, and `Sv48` are named here; the hardware may
/// support more. The bootstrap mapper probes whether the configured mode
/// actually sticks (§ mode check), since a write of an unsupported mode is
/// silently ignored by the CPU.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum TranslationMode {
    /// No translation.
    Bare = 0,
    /// 3-level, 39-bit virtual addressing.
    Sv39 = 8,
    /// 4-level, 48-bit virtual addressing.
    Sv48 = 9,
}

impl TranslationMode {
    #[must_use]
    pub const fn from_bits(v: u8) -> Self {
        match v {
            8 => Self::Sv39,
            9 => Self::Sv48,
            _ => Self::Bare,
        }
    }

    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }
}

/// `satp` — Supervisor Address Translation and Protection.
///
/// Holds the physical page number of the root translation table, an
/// address-space identifier, and the paging mode.
///
/// | Bits  | Field  | Meaning |
/// |-------|--------|---------|
/// | 0–43  | `PPN`  | Root table physical frame number |
/// | 44–59 | `ASID` | Address-space identifier |
/// | 60–63 | `MODE` | Paging mode (0 = bare, 8 = Sv39, 9 = Sv48) |
#[bitfield(u64)]
pub struct Satp {
    /// Physical frame number of the root table.
    #[bits(44)]
    pub ppn: u64,

    /// Address-space identifier. This core always uses ASID 0.
    #[bits(16)]
    pub asid: u16,

    /// Paging mode select.
    #[bits(4)]
    pub mode: u8,
}

impl Satp {
    /// Build a `satp` value selecting `mode` with `root` as the root table.
    #[must_use]
    pub fn for_root(root: PhysicalPage<Size4K>, mode: TranslationMode) -> Self {
        Self::new()
            .with_ppn(root.frame().as_u64())
            .with_mode(mode.into_bits())
    }

    /// The paging mode currently encoded in this value.
    #[must_use]
    pub const fn translation_mode(self) -> TranslationMode {
        TranslationMode::from_bits(self.mode())
    }

    /// Read the live register.
    ///
    /// # Safety
    /// Must run in supervisor (or higher) mode. Inert on non-RISC-V hosts.
    #[must_use]
    pub unsafe fn read() -> Self {
        #[cfg(target_arch = "riscv64")]
        {
            let bits: u64;
            unsafe {
                core::arch::asm!("csrr {}, satp", out(reg) bits, options(nomem, nostack));
            }
            Self::from_bits(bits)
        }
        #[cfg(not(target_arch = "riscv64"))]
        Self::new()
    }

    /// Write the live register. The caller is responsible for any required
    /// `sfence.vma` before and after.
    ///
    /// # Safety
    /// Changing translation state invalidates every raw pointer derived
    /// from the old mapping; the caller must guarantee the new tables map
    /// the currently executing code. Inert on non-RISC-V hosts.
    pub unsafe fn write(self) {
        #[cfg(target_arch = "riscv64")]
        unsafe {
            core::arch::asm!("csrw satp, {}", in(reg) self.into_bits(), options(nomem, nostack));
        }
    }
}
