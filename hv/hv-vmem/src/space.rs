use crate::flags::MapFlags;
use crate::handle::{FrameMapper, TableHandle};
use crate::pte::{EntryKind, Pte};
use crate::table::Level;
use crate::FrameAlloc;
use hv_addresses::{FrameNumber, PhysicalPage, Size4K, VirtualAddress};
use hv_csr::{publication_fence, sfence_vma_all};
use hv_info::paging::{PT_LEVELS, level_pages};
use hv_sync::SpinLock;

/// Outcome classification for a failed mapping-range request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    /// No frame was available for an intermediate table. Recoverable by
    /// the caller; the engine never treats it as fatal.
    #[error("no frame available for an intermediate table")]
    ResourceExhausted,

    /// The request asked for a transition the entry state machine forbids
    /// (shattering a superpage, replacing a live mapping, removing or
    /// re-attributing something that is not a live leaf).
    #[error("transition not supported on the existing entry")]
    IllegalTransition,

    /// Misaligned address or a forbidden attribute combination. Detected
    /// before any mutation; the tables are untouched.
    #[error("misaligned address or forbidden attribute combination")]
    InvalidArgument,
}

/// What a mapping-range request asks the engine to do, derived once from
/// the (frame, flags) pair and then matched against each entry's
/// [`EntryKind`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Request {
    /// Write new leaves mapping the given frames.
    Insert,
    /// Rewrite access/memory-type bits of live leaves; frames unchanged.
    UpdateAttrs,
    /// Clear live leaves.
    Remove,
    /// Create intermediate tables only; touch no leaf.
    Populate,
}

/// The hypervisor's own address space: a tree of [`PageTable`]s rooted at
/// a statically reserved frame, mutated exclusively through this engine.
///
/// All mutation is serialized by one engine-wide spinlock and finished
/// with a full translation-cache flush — deliberately coarse, always
/// correct. Lookups ([`walk`](Self::walk)) take no lock; see the method's
/// precondition.
///
/// [`PageTable`]: crate::PageTable
pub struct AddressSpace<'m, M: FrameMapper + ?Sized> {
    root: PhysicalPage<Size4K>,
    mapper: &'m M,
    lock: SpinLock<()>,
}

impl<'m, M: FrameMapper + ?Sized> AddressSpace<'m, M> {
    /// An address space rooted at `root`, whose tables become addressable
    /// through `mapper`.
    ///
    /// `root` must already contain a valid (possibly empty) table.
    #[must_use]
    pub const fn new(mapper: &'m M, root: PhysicalPage<Size4K>) -> Self {
        Self {
            root,
            mapper,
            lock: SpinLock::new(()),
        }
    }

    /// The root table frame (what `satp` should point at).
    #[inline]
    #[must_use]
    pub const fn root_page(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    /// The table-mapping adapter this space was built over.
    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// Descend from the root following table pointers until reaching an
    /// entry that is either a leaf or invalid; return that entry and the
    /// level it was found at.
    ///
    /// Never allocates and takes no lock. The caller must ensure no
    /// concurrent mutator is working on the same region; the engine does
    /// not enforce this.
    #[must_use]
    pub fn walk(&self, va: VirtualAddress) -> (Pte, Level) {
        let mut level = Level::ROOT;
        let mut table = TableHandle::map(self.mapper, self.root);
        loop {
            let pte = table.get(level.index_of(va));
            match pte.kind() {
                EntryKind::Table(next) if level != Level::PAGE => {
                    level = level.next_lower();
                    table = TableHandle::map(self.mapper, next);
                }
                _ => return (pte, level),
            }
        }
    }

    /// Insert leaves mapping `nr_pages` 4 KiB pages starting at `va → frame`.
    ///
    /// Granularity is chosen automatically (largest level dividing both
    /// the remaining length and the `va | frame` alignment) unless
    /// [`MapFlags::SMALL`] forces 4 KiB. `flags` must include
    /// [`MapFlags::VALID`] and at least one of readable/executable.
    ///
    /// Returns the coarsest granularity written.
    ///
    /// # Errors
    /// See [`MapError`].
    pub fn map<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        frame: FrameNumber,
        nr_pages: u64,
        flags: MapFlags,
    ) -> Result<Level, MapError> {
        debug_assert!(flags.contains(MapFlags::VALID));
        debug_assert!(!flags.contains(MapFlags::POPULATE));
        self.update(alloc, va, Some(frame), nr_pages, flags)
    }

    /// Remove the mappings covering `nr_pages` 4 KiB pages at `va`.
    ///
    /// The live mappings' granularity is authoritative: the range must
    /// cover each mapped leaf exactly (no partial unmap of a superpage).
    ///
    /// # Errors
    /// See [`MapError`].
    pub fn unmap(&self, va: VirtualAddress, nr_pages: u64) -> Result<Level, MapError> {
        self.update(&mut NoAlloc, va, None, nr_pages, MapFlags::empty())
    }

    /// Pre-create intermediate tables down to the 4 KiB level over the
    /// range, writing no leaf. Later single-page `map` calls inside the
    /// range cannot fail with [`MapError::ResourceExhausted`].
    ///
    /// # Errors
    /// See [`MapError`].
    pub fn populate<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        nr_pages: u64,
    ) -> Result<Level, MapError> {
        self.update(alloc, va, None, nr_pages, MapFlags::POPULATE)
    }

    /// The workhorse behind `map`/`unmap`/`populate` and attribute-only
    /// updates (`frame == None` with [`MapFlags::VALID`] set).
    ///
    /// Processes the range step by step under the engine lock, then issues
    /// one full translation-cache flush — on success and on partial
    /// failure alike, since earlier steps may already have written
    /// entries.
    ///
    /// # Errors
    /// See [`MapError`]; `InvalidArgument` is detected before any
    /// mutation.
    pub fn update<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        frame: Option<FrameNumber>,
        nr_pages: u64,
        flags: MapFlags,
    ) -> Result<Level, MapError> {
        let request = classify(frame, flags)?;
        if !va.is_aligned_to(<Size4K as hv_addresses::PageSize>::SIZE) {
            return Err(MapError::InvalidArgument);
        }
        if nr_pages == 0 {
            return Ok(Level::PAGE);
        }

        let _guard = self.lock.lock();
        let result = self.update_locked(alloc, va, frame, nr_pages, flags, request);

        // All PTE stores become visible before the flush, and the flush
        // covers the whole address space. Coarse, simple, always correct.
        publication_fence();
        // Safety: flushing the local translation cache is always legal.
        unsafe { sfence_vma_all() };

        result
    }

    fn update_locked<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        mut va: VirtualAddress,
        mut frame: Option<FrameNumber>,
        nr_pages: u64,
        flags: MapFlags,
        request: Request,
    ) -> Result<Level, MapError> {
        let mut left = nr_pages;
        let mut coarsest = Level::PAGE;

        while left > 0 {
            let step = match request {
                Request::Insert => {
                    // classify() only yields Insert when a frame is given.
                    let Some(cur) = frame else {
                        return Err(MapError::InvalidArgument);
                    };
                    let level = self.step_insert(alloc, va, cur, left, flags)?;
                    coarsest = coarsest.max(level);
                    level.pages()
                }
                Request::UpdateAttrs => {
                    let level = self.step_modify(va, left, |pte| pte.with_access(flags))?;
                    coarsest = coarsest.max(level);
                    level.pages()
                }
                Request::Remove => {
                    let level = self.step_modify(va, left, |_| Pte::new())?;
                    coarsest = coarsest.max(level);
                    level.pages()
                }
                Request::Populate => self.step_populate(alloc, va, left)?,
            };

            va += step << 12;
            if let Some(f) = frame.as_mut() {
                *f += step;
            }
            left -= step;
        }

        Ok(coarsest)
    }

    /// Descend from the root to `target`, materializing missing
    /// intermediate tables, and return a handle on the table holding the
    /// `target`-level entry for `va`.
    fn descend_for_write<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        target: Level,
    ) -> Result<TableHandle<'m, M>, MapError> {
        let mut level = Level::ROOT;
        let mut table = TableHandle::map(self.mapper, self.root);
        while level != target {
            let idx = level.index_of(va);
            let next = match table.get(idx).kind() {
                EntryKind::Table(next) => next,
                EntryKind::Invalid => self.create_table(alloc, &mut table, idx)?,
                EntryKind::Leaf { .. } => {
                    // A superpage already covers this range at a coarser
                    // granularity than requested; shattering it is
                    // unsupported.
                    log::debug!(
                        "refusing to shatter level-{} superpage covering {va}",
                        level.as_u32()
                    );
                    return Err(MapError::IllegalTransition);
                }
            };
            level = level.next_lower();
            table = TableHandle::map(self.mapper, next);
        }
        Ok(table)
    }

    /// Allocate, zero, and publish one intermediate table into
    /// `parent[idx]`. The zero-fill is ordered before the table pointer
    /// becomes visible, so a speculative hardware walk can never see
    /// stale entries.
    fn create_table<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        parent: &mut TableHandle<'m, M>,
        idx: crate::table::TableIndex,
    ) -> Result<PhysicalPage<Size4K>, MapError> {
        let page = alloc.alloc_table_frame().ok_or(MapError::ResourceExhausted)?;
        TableHandle::map(self.mapper, page).zero();
        publication_fence();
        parent.set(idx, Pte::table_entry(page));
        Ok(page)
    }

    /// One insert step: choose the target granularity, extend the chain,
    /// and write the leaf if the transition is legal.
    fn step_insert<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        frame: FrameNumber,
        left: u64,
        flags: MapFlags,
    ) -> Result<Level, MapError> {
        let target = mapping_level(va.vpn(), Some(frame), left, flags);
        let mut table = self.descend_for_write(alloc, va, target)?;
        let idx = target.index_of(va);

        match table.get(idx).kind() {
            EntryKind::Invalid => {
                table.set(idx, Pte::leaf_entry(frame, flags));
                Ok(target)
            }
            // Re-inserting the identical frame is an attribute rewrite.
            EntryKind::Leaf { frame: live, .. } if live == frame => {
                table.set(idx, Pte::leaf_entry(frame, flags));
                Ok(target)
            }
            EntryKind::Leaf { frame: live, .. } => {
                log::debug!("refusing to replace live mapping {live} at {va} with {frame}");
                Err(MapError::IllegalTransition)
            }
            EntryKind::Table(_) => {
                // Finer mappings exist below this slot; a superpage here
                // would swallow them silently.
                log::debug!("refusing to overwrite a table entry at {va} with a superpage");
                Err(MapError::IllegalTransition)
            }
        }
    }

    /// One removal or attribute-update step. The walk descends to the
    /// live leaf — its granularity is authoritative, the caller does not
    /// get to guess — and the requested range must cover it exactly.
    fn step_modify(
        &self,
        va: VirtualAddress,
        left: u64,
        rewrite: impl FnOnce(Pte) -> Pte,
    ) -> Result<Level, MapError> {
        let mut level = Level::ROOT;
        let mut table = TableHandle::map(self.mapper, self.root);
        let (idx, pte) = loop {
            let idx = level.index_of(va);
            let pte = table.get(idx);
            match pte.kind() {
                EntryKind::Table(next) if level != Level::PAGE => {
                    level = level.next_lower();
                    table = TableHandle::map(self.mapper, next);
                }
                _ => break (idx, pte),
            }
        };

        match pte.kind() {
            EntryKind::Leaf { .. } => {
                if !va.is_aligned_to(level.size()) || left < level.pages() {
                    log::debug!(
                        "request covers only part of the level-{} leaf at {va}",
                        level.as_u32()
                    );
                    return Err(MapError::IllegalTransition);
                }
                table.set(idx, rewrite(pte));
                Ok(level)
            }
            // Nothing is mapped here; there is nothing to remove or to
            // re-attribute.
            EntryKind::Invalid => Err(MapError::IllegalTransition),
            // A table-looking entry at level 0 is a malformed encoding;
            // never touch it through this path.
            EntryKind::Table(_) => Err(MapError::IllegalTransition),
        }
    }

    /// One populate step: drive the chain down to the level-0 table for
    /// `va`, then skip to the next level-1 boundary (each level-0 table
    /// spans one level-1 slot). Returns the pages consumed.
    fn step_populate<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        left: u64,
    ) -> Result<u64, MapError> {
        let _ = self.descend_for_write(alloc, va, Level::PAGE)?;
        let span = level_pages(1);
        let into = va.vpn() & (span - 1);
        Ok((span - into).min(left))
    }
}

/// Derive the request from the (frame, flags) pair, rejecting the
/// combinations the engine forbids before anything is touched.
fn classify(frame: Option<FrameNumber>, flags: MapFlags) -> Result<Request, MapError> {
    // W^X is forbidden outright, whatever the request.
    if flags.is_wx() {
        return Err(MapError::InvalidArgument);
    }

    if flags.contains(MapFlags::POPULATE) {
        if frame.is_some() || flags.contains(MapFlags::VALID) {
            return Err(MapError::InvalidArgument);
        }
        return Ok(Request::Populate);
    }

    if frame.is_some() {
        if !flags.contains(MapFlags::VALID) {
            return Err(MapError::InvalidArgument);
        }
        // A leaf with neither R nor X would alias the table encoding.
        if !flags.intersects(MapFlags::READABLE | MapFlags::EXECUTABLE) {
            return Err(MapError::InvalidArgument);
        }
        return Ok(Request::Insert);
    }

    if flags.contains(MapFlags::VALID) {
        if !flags.intersects(MapFlags::READABLE | MapFlags::EXECUTABLE) {
            return Err(MapError::InvalidArgument);
        }
        Ok(Request::UpdateAttrs)
    } else {
        Ok(Request::Remove)
    }
}

/// The largest level whose page count divides both the remaining range
/// length and the alignment of `va | frame` — the automatic superpage
/// choice, unless the caller forces 4 KiB.
fn mapping_level(vfn: u64, frame: Option<FrameNumber>, left: u64, flags: MapFlags) -> Level {
    if flags.contains(MapFlags::SMALL) {
        return Level::PAGE;
    }

    let mut mask = vfn;
    if let Some(f) = frame {
        mask |= f.as_u64();
    }

    let mut level = Level::PAGE;
    for lvl in 1..PT_LEVELS {
        let pages = level_pages(lvl);
        if mask & (pages - 1) == 0 && left >= pages {
            level = Level::new(lvl as u8);
        } else {
            break;
        }
    }
    level
}

/// Allocator for paths that must never allocate (removal, attribute
/// updates).
struct NoAlloc;

impl FrameAlloc for NoAlloc {
    fn alloc_table_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BumpAlloc, TestPhys};

    fn space_with(phys: &TestPhys) -> (AddressSpace<'_, TestPhys>, BumpAlloc) {
        let alloc = BumpAlloc::new(phys, 1, phys.len() as u64);
        TableHandle::map(phys, phys.page(0)).zero();
        (AddressSpace::new(phys, phys.page(0)), alloc)
    }

    /// An arbitrary canonical upper-half virtual address, 1 GiB-aligned.
    const VA_BASE: u64 = 0xFFFF_FFC0_4000_0000;

    /// A frame number outside the table arena, 1 GiB-aligned.
    const MAP_FRAME: u64 = 0x40000;

    #[test]
    fn single_page_round_trip() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);
        let frame = FrameNumber::new(MAP_FRAME);

        let level = space.map(&mut alloc, va, frame, 1, MapFlags::RW).unwrap();
        assert_eq!(level, Level::PAGE);

        let (pte, found) = space.walk(va);
        assert_eq!(found, Level::PAGE);
        assert!(pte.is_leaf());
        assert_eq!(pte.frame(), frame);
        assert!(pte.readable());
        assert!(pte.writable());
        assert!(!pte.executable());

        space.unmap(va, 1).unwrap();
        let (pte, _) = space.walk(va);
        assert!(matches!(pte.kind(), EntryKind::Invalid));
    }

    #[test]
    fn no_aliasing_across_a_range() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);
        let frame = FrameNumber::new(MAP_FRAME);

        space
            .map(&mut alloc, va, frame, 8, MapFlags::RW | MapFlags::SMALL)
            .unwrap();
        for i in 0..8 {
            let (pte, level) = space.walk(va + i * 4096);
            assert_eq!(level, Level::PAGE);
            assert_eq!(pte.frame(), frame + i, "page {i} maps the wrong frame");
        }
    }

    #[test]
    fn superpage_chosen_when_aligned() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);
        let frame = FrameNumber::new(MAP_FRAME);
        let first = alloc.next;

        // 512 pages, both endpoints 2 MiB-aligned: exactly one level-1
        // leaf, reachable after creating a single intermediate table.
        let level = space.map(&mut alloc, va, frame, 512, MapFlags::RW).unwrap();
        assert_eq!(level, Level::new(1));
        assert_eq!(alloc.used(first), 1);

        let (pte, found) = space.walk(va);
        assert_eq!(found, Level::new(1));
        assert_eq!(pte.frame(), frame);
        // Every 4 KiB offset within resolves through the same leaf.
        let (pte, found) = space.walk(va + 37 * 4096);
        assert_eq!(found, Level::new(1));
        assert_eq!(pte.frame(), frame);
    }

    #[test]
    fn gigapage_chosen_at_root_alignment() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);
        let frame = FrameNumber::new(MAP_FRAME);
        let first = alloc.next;

        let pages = 512 * 512;
        let level = space.map(&mut alloc, va, frame, pages, MapFlags::RW).unwrap();
        assert_eq!(level, Level::new(2));
        // A root-level leaf needs no intermediate tables at all.
        assert_eq!(alloc.used(first), 0);
    }

    #[test]
    fn force_small_suppresses_coalescing() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);
        let frame = FrameNumber::new(MAP_FRAME);

        let level = space
            .map(&mut alloc, va, frame, 512, MapFlags::RW | MapFlags::SMALL)
            .unwrap();
        assert_eq!(level, Level::PAGE);
        let (_, found) = space.walk(va);
        assert_eq!(found, Level::PAGE);
    }

    #[test]
    fn unaligned_tail_mixes_granularities() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);
        let frame = FrameNumber::new(MAP_FRAME);

        // 513 pages: one 2 MiB leaf, then one 4 KiB leaf.
        let level = space.map(&mut alloc, va, frame, 513, MapFlags::RW).unwrap();
        assert_eq!(level, Level::new(1));
        let (_, found) = space.walk(va);
        assert_eq!(found, Level::new(1));
        let (pte, found) = space.walk(va + 512 * 4096);
        assert_eq!(found, Level::PAGE);
        assert_eq!(pte.frame(), frame + 512);
    }

    #[test]
    fn wx_is_rejected_without_mutation() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);
        let frame = FrameNumber::new(MAP_FRAME);
        let first = alloc.next;

        let err = space
            .map(
                &mut alloc,
                va,
                frame,
                1,
                MapFlags::RW | MapFlags::EXECUTABLE,
            )
            .unwrap_err();
        assert_eq!(err, MapError::InvalidArgument);
        assert_eq!(alloc.used(first), 0, "tables must be untouched");
        let (pte, _) = space.walk(va);
        assert!(matches!(pte.kind(), EntryKind::Invalid));
    }

    #[test]
    fn misaligned_va_is_rejected() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let err = space
            .map(
                &mut alloc,
                VirtualAddress::new(VA_BASE + 0x10),
                FrameNumber::new(MAP_FRAME),
                1,
                MapFlags::RW,
            )
            .unwrap_err();
        assert_eq!(err, MapError::InvalidArgument);
    }

    #[test]
    fn shatter_attempt_fails_and_preserves_the_superpage() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);
        let frame = FrameNumber::new(MAP_FRAME);

        space.map(&mut alloc, va, frame, 512, MapFlags::RW).unwrap();

        // A 4 KiB insert strictly inside the superpage with a different
        // frame must fail without breaking the mapping up.
        let inner = va + 16 * 4096;
        let err = space
            .map(&mut alloc, inner, FrameNumber::new(0x70000), 1, MapFlags::RW)
            .unwrap_err();
        assert_eq!(err, MapError::IllegalTransition);

        let (pte, level) = space.walk(inner);
        assert_eq!(level, Level::new(1));
        assert_eq!(pte.frame(), frame, "superpage must be unchanged");
    }

    #[test]
    fn partial_superpage_unmap_is_rejected() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);
        let frame = FrameNumber::new(MAP_FRAME);

        space.map(&mut alloc, va, frame, 512, MapFlags::RW).unwrap();
        assert_eq!(space.unmap(va, 16), Err(MapError::IllegalTransition));
        // The full range removes the one leaf.
        assert_eq!(space.unmap(va, 512), Ok(Level::new(1)));
        let (pte, _) = space.walk(va);
        assert!(matches!(pte.kind(), EntryKind::Invalid));
    }

    #[test]
    fn replacing_a_live_mapping_is_rejected() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);

        space
            .map(&mut alloc, va, FrameNumber::new(MAP_FRAME), 1, MapFlags::RW)
            .unwrap();
        let err = space
            .map(&mut alloc, va, FrameNumber::new(0x70000), 1, MapFlags::RW)
            .unwrap_err();
        assert_eq!(err, MapError::IllegalTransition);

        let (pte, _) = space.walk(va);
        assert_eq!(pte.frame(), FrameNumber::new(MAP_FRAME));
    }

    #[test]
    fn attribute_update_is_idempotent_and_preserves_the_frame() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);
        let frame = FrameNumber::new(MAP_FRAME);

        space.map(&mut alloc, va, frame, 1, MapFlags::RW).unwrap();
        space
            .update(&mut NoAlloc, va, None, 1, MapFlags::RO)
            .unwrap();
        let (once, _) = space.walk(va);
        assert!(!once.writable());
        assert_eq!(once.frame(), frame);

        space
            .update(&mut NoAlloc, va, None, 1, MapFlags::RO)
            .unwrap();
        let (twice, _) = space.walk(va);
        assert_eq!(once.into_bits(), twice.into_bits());
    }

    #[test]
    fn modifying_nothing_is_rejected() {
        let phys = TestPhys::with_frames(16);
        let (space, _alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);

        assert_eq!(space.unmap(va, 1), Err(MapError::IllegalTransition));
        assert_eq!(
            space.update(&mut NoAlloc, va, None, 1, MapFlags::RO),
            Err(MapError::IllegalTransition)
        );
    }

    #[test]
    fn populate_reserves_tables_for_later_maps() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);
        let frame = FrameNumber::new(MAP_FRAME);

        space.populate(&mut alloc, va, 512).unwrap();

        // Starve the allocator: every later map in the range must still
        // succeed because the chain already exists.
        let mut empty = BumpAlloc::new(&phys, 0, 0);
        for i in 0..512 {
            space
                .map(
                    &mut empty,
                    va + i * 4096,
                    frame + i,
                    1,
                    MapFlags::RW | MapFlags::SMALL,
                )
                .unwrap_or_else(|e| panic!("map {i} failed after populate: {e}"));
        }
    }

    #[test]
    fn populate_touches_no_leaf() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);

        space.populate(&mut alloc, va, 512).unwrap();
        let (pte, level) = space.walk(va);
        assert!(matches!(pte.kind(), EntryKind::Invalid));
        assert_eq!(level, Level::PAGE, "chain must reach the 4 KiB level");
    }

    #[test]
    fn table_exhaustion_reports_resource_exhausted() {
        let phys = TestPhys::with_frames(4);
        let (space, _) = space_with(&phys);
        // One frame total, already spent on the root: the level-1 table
        // cannot be allocated.
        let mut alloc = BumpAlloc::new(&phys, 4, 4);
        let err = space
            .map(
                &mut alloc,
                VirtualAddress::new(VA_BASE),
                FrameNumber::new(MAP_FRAME),
                1,
                MapFlags::RW,
            )
            .unwrap_err();
        assert_eq!(err, MapError::ResourceExhausted);
    }

    #[test]
    fn walk_reports_the_level_where_the_chain_stops() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let va = VirtualAddress::new(VA_BASE);

        let (_, level) = space.walk(va);
        assert_eq!(level, Level::ROOT, "empty tree stops at the root");

        space.populate(&mut alloc, va, 1).unwrap();
        let (pte, level) = space.walk(va);
        assert!(matches!(pte.kind(), EntryKind::Invalid));
        assert_eq!(level, Level::PAGE);
    }

    #[test]
    fn zero_pages_is_a_no_op() {
        let phys = TestPhys::with_frames(16);
        let (space, mut alloc) = space_with(&phys);
        let first = alloc.next;
        assert_eq!(
            space.map(
                &mut alloc,
                VirtualAddress::new(VA_BASE),
                FrameNumber::new(MAP_FRAME),
                0,
                MapFlags::RW
            ),
            Ok(Level::PAGE)
        );
        assert_eq!(alloc.used(first), 0);
    }

    #[test]
    fn classify_rejects_contradictory_requests() {
        let f = FrameNumber::new(1);
        // Insert without VALID.
        assert!(classify(Some(f), MapFlags::READABLE).is_err());
        // Insert with no access at all would alias the table encoding.
        assert!(classify(Some(f), MapFlags::VALID).is_err());
        // Populate with a frame, or marked valid.
        assert!(classify(Some(f), MapFlags::POPULATE).is_err());
        assert!(classify(None, MapFlags::POPULATE | MapFlags::VALID).is_err());
        // The happy paths.
        assert_eq!(classify(Some(f), MapFlags::RW), Ok(Request::Insert));
        assert_eq!(classify(None, MapFlags::RO), Ok(Request::UpdateAttrs));
        assert_eq!(classify(None, MapFlags::empty()), Ok(Request::Remove));
        assert_eq!(classify(None, MapFlags::POPULATE), Ok(Request::Populate));
    }

    #[test]
    fn mapping_level_follows_joint_alignment() {
        let f2m = Some(FrameNumber::new(0x200)); // 2 MiB-aligned frame
        let f4k = Some(FrameNumber::new(0x201)); // odd frame
        let none = MapFlags::empty();

        // Aligned VA + aligned frame + enough pages → level 1.
        assert_eq!(mapping_level(0x200, f2m, 512, none), Level::new(1));
        // Short range forces level 0.
        assert_eq!(mapping_level(0x200, f2m, 511, none), Level::PAGE);
        // Misaligned frame forces level 0 despite an aligned VA.
        assert_eq!(mapping_level(0x200, f4k, 512, none), Level::PAGE);
        // Root-level choice needs 512² pages and joint 1 GiB alignment.
        assert_eq!(
            mapping_level(0x40000, Some(FrameNumber::new(0x80000)), 512 * 512, none),
            Level::new(2)
        );
        // SMALL pins everything to 4 KiB.
        assert_eq!(
            mapping_level(0x200, f2m, 512, MapFlags::SMALL),
            Level::PAGE
        );
    }
}
