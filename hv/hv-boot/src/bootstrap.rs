//! # Bootstrap Mapper
//!
//! Builds the very first address space, in order:
//!
//! 1. **Mode check** — verify the CPU really implements the configured
//!    paging mode by writing a trial root entry, switching translation on,
//!    reading the mode back, and switching it off again.
//! 2. **Image mapping** — map the hypervisor's link-time image per
//!    section (text RX, rodata RO, data RW), all from the boot table pool.
//! 3. **Trampoline** — when the load (physical) and link (virtual)
//!    addresses differ, additionally identity-map one page at the load
//!    address: the first instructions after translation switches on still
//!    execute from there.
//! 4. **MMU enable**, then — once execution reaches link-time addresses —
//!    **trampoline removal**, clearing exactly the root slot the identity
//!    mapping used.
//!
//! All failures here are fatal ([`fatal`]): no allocator, panic machinery,
//! or scheduler exists yet, so there is no safe continuation.

use crate::console::{EarlyConsole, fatal};
use core::ptr::NonNull;
use hv_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use hv_csr::{Satp, TranslationMode, publication_fence, sfence_vma_all};
use hv_info::layout::HYP_IMAGE_MAX;
use hv_vmem::{
    AddressSpace, FrameAlloc, FrameMapper, Level, MapError, MapFlags, Pte, TableHandle,
};

/// Pre-MMU backing of the table-mapping adapter: with translation off,
/// a physical address *is* the address.
pub struct IdentityMapper;

// Safety: with the MMU off every frame is addressable at its physical
// address, exclusively (single CPU, no other windows exist yet).
unsafe impl FrameMapper for IdentityMapper {
    unsafe fn map_frame(&self, page: PhysicalPage<Size4K>) -> NonNull<u8> {
        // Safety: physical frame addresses are never null.
        unsafe { NonNull::new_unchecked(page.base().as_u64() as usize as *mut u8) }
    }

    unsafe fn unmap_frame(&self, _ptr: NonNull<u8>) {}
}

/// Where the linker put the hypervisor, and where firmware loaded it.
///
/// Sections are consecutive from `link_base` in the order text, rodata,
/// data (data includes bss); each must be a whole number of pages, which
/// the linker script guarantees with section alignment.
#[derive(Copy, Clone, Debug)]
pub struct ImageLayout {
    /// Link-time virtual base (start of text).
    pub link_base: VirtualAddress,
    /// Physical address the image was loaded at.
    pub load_base: PhysicalAddress,
    /// Bytes of executable text.
    pub text_bytes: u64,
    /// Bytes of read-only data.
    pub rodata_bytes: u64,
    /// Bytes of writable data and bss.
    pub data_bytes: u64,
}

impl ImageLayout {
    /// Total mapped image size.
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.text_bytes + self.rodata_bytes + self.data_bytes
    }

    fn validate(&self) -> Result<(), BootstrapError> {
        let aligned = |v: u64| v & 0xfff == 0;
        if !aligned(self.link_base.as_u64())
            || !aligned(self.load_base.as_u64())
            || !aligned(self.text_bytes)
            || !aligned(self.rodata_bytes)
            || !aligned(self.data_bytes)
        {
            return Err(BootstrapError::MisalignedImage);
        }
        if self.total_bytes() > HYP_IMAGE_MAX {
            return Err(BootstrapError::ImageTooLarge);
        }
        Ok(())
    }
}

/// Whether a trampoline mapping was created for the MMU switch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trampoline {
    /// Load and link addresses coincide; nothing extra was mapped.
    NotNeeded,
    /// One identity page at the load address, to be removed after the
    /// jump to link-time addresses.
    Mapped(VirtualAddress),
}

/// Why a bootstrap step failed. All of these end in [`fatal`] when they
/// reach the orchestrator; the typed form exists for the testable layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootstrapError {
    /// A section endpoint or size is not page-aligned.
    #[error("image section not page-aligned")]
    MisalignedImage,

    /// The image exceeds the size the boot table pool was provisioned for.
    #[error("image larger than the boot table pool provides for")]
    ImageTooLarge,

    /// The image does not fit inside one root-level alignment window of
    /// its load address, which the transient mode probe requires.
    #[error("image crosses its root-level alignment window")]
    ImageCrossesRootSlot,

    /// Load and link addresses differ but share a root slot; removing the
    /// trampoline would also remove the image.
    #[error("load and link ranges overlap at the root level")]
    LoadLinkOverlap,

    /// The update engine failed underneath us.
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Probe whether the configured paging mode is implemented.
///
/// Writes a trial root-level leaf covering the (aligned) load address,
/// turns translation on, reads the mode register back, turns translation
/// off, and erases the trial entry. Inert-but-false on non-RISC-V hosts.
///
/// # Errors
/// [`BootstrapError::ImageCrossesRootSlot`] if the running image would
/// not survive the transient identity window.
pub fn check_mode_support<M: FrameMapper + ?Sized>(
    mapper: &M,
    root: PhysicalPage<Size4K>,
    layout: &ImageLayout,
) -> Result<bool, BootstrapError> {
    let window = Level::ROOT.size();
    let aligned = layout.load_base.align_down(window);
    if layout.load_base.as_u64() + layout.total_bytes() > aligned.as_u64() + window {
        return Err(BootstrapError::ImageCrossesRootSlot);
    }

    let idx = Level::ROOT.index_of(VirtualAddress::new(aligned.as_u64()));
    let mut table = TableHandle::map(mapper, root);
    table.set(idx, Pte::leaf_entry(aligned.frame(), MapFlags::RX));
    publication_fence();

    // Safety: the trial entry identity-maps the code currently executing;
    // translation is switched back off before it is erased.
    let supported = unsafe {
        sfence_vma_all();
        Satp::for_root(root, TranslationMode::Sv39).write();
        let live = Satp::read().translation_mode() == TranslationMode::Sv39;
        Satp::new().write();
        sfence_vma_all();
        live
    };

    table.set(idx, Pte::new());
    Ok(supported)
}

/// Map the hypervisor image per section, plus the trampoline page when
/// load and link addresses differ.
///
/// # Errors
/// Layout validation errors, or whatever the engine reports — with the
/// boot pool as the allocator, `ResourceExhausted` means the pool was
/// undersized for this image.
pub fn map_image<M: FrameMapper + ?Sized, A: FrameAlloc + ?Sized>(
    space: &AddressSpace<'_, M>,
    alloc: &mut A,
    layout: &ImageLayout,
) -> Result<Trampoline, BootstrapError> {
    layout.validate()?;

    let sections = [
        (layout.text_bytes, MapFlags::RX | MapFlags::GLOBAL),
        (layout.rodata_bytes, MapFlags::RO | MapFlags::GLOBAL),
        (layout.data_bytes, MapFlags::RW | MapFlags::GLOBAL),
    ];

    let mut va = layout.link_base;
    let mut frame = layout.load_base.frame();
    for (bytes, flags) in sections {
        let pages = bytes >> 12;
        // Keep the image on 4 KiB granules: section boundaries rarely suit
        // superpages, and the pool is sized for level-0 chains.
        space.map(alloc, va, frame, pages, flags | MapFlags::SMALL)?;
        va += bytes;
        frame += pages;
    }

    if layout.load_base.as_u64() == layout.link_base.as_u64() {
        return Ok(Trampoline::NotNeeded);
    }

    // Identity-map one page of text at the load address. Not global: it
    // dies as soon as execution reaches link-time addresses.
    let tramp = VirtualAddress::new(layout.load_base.as_u64());
    space.map(alloc, tramp, layout.load_base.frame(), 1, MapFlags::RX)?;
    Ok(Trampoline::Mapped(tramp))
}

/// Switch translation on with `root` as the root table.
///
/// # Safety
/// The tables must map the currently executing code (trampoline or
/// link-time), the stack, and everything reachable before the caller
/// re-establishes its pointers.
pub unsafe fn enable_mmu(root: PhysicalPage<Size4K>) {
    publication_fence();
    unsafe {
        sfence_vma_all();
        Satp::for_root(root, TranslationMode::Sv39).write();
        sfence_vma_all();
    }
}

/// Remove the trampoline: clear exactly the root slot the identity
/// mapping used — never the one also serving the permanent image.
///
/// # Errors
/// [`BootstrapError::LoadLinkOverlap`] when load and link differ but
/// collide in the same root slot; no safe removal exists then.
pub fn remove_identity_mapping<M: FrameMapper + ?Sized>(
    space: &AddressSpace<'_, M>,
    layout: &ImageLayout,
) -> Result<(), BootstrapError> {
    if layout.load_base.as_u64() == layout.link_base.as_u64() {
        return Ok(());
    }

    let tramp_idx = Level::ROOT.index_of(VirtualAddress::new(layout.load_base.as_u64()));
    let image_idx = Level::ROOT.index_of(layout.link_base);
    if tramp_idx == image_idx {
        return Err(BootstrapError::LoadLinkOverlap);
    }

    // Root-slot surgery rather than unmap(): the whole identity subtree
    // goes at once, matching how it will never be rebuilt. The pool
    // frames it used stay consumed.
    TableHandle::map(space.mapper(), space.root_page()).set(tramp_idx, Pte::new());
    publication_fence();
    // Safety: invalidating translations is always legal.
    unsafe { sfence_vma_all() };
    Ok(())
}

/// The fatal-policy orchestrator for the pre-MMU phase: mode check, then
/// image (and trampoline) mapping. Any failure prints through the early
/// console and halts — this early there is nothing to unwind to.
pub fn setup_initial_pagetables<M: FrameMapper + ?Sized, A: FrameAlloc + ?Sized>(
    space: &AddressSpace<'_, M>,
    alloc: &mut A,
    layout: &ImageLayout,
    console: &dyn EarlyConsole,
) -> Trampoline {
    match check_mode_support(space.mapper(), space.root_page(), layout) {
        Ok(true) => {}
        Ok(false) => fatal(console, "configured paging mode is not supported by this CPU"),
        Err(_) => fatal(console, "image placement defeats the paging-mode probe"),
    }

    match map_image(space, alloc, layout) {
        Ok(trampoline) => trampoline,
        Err(BootstrapError::Map(MapError::ResourceExhausted)) => {
            fatal(console, "boot table pool exhausted while mapping the image")
        }
        Err(_) => fatal(console, "cannot map the hypervisor image"),
    }
}
