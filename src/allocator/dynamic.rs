//! First-fit page allocator over a [`PageInfoTable`].
//!
//! The allocator hands out runs of whole pages from an active range
//! `[start, end)` that sits somewhere inside the span covered by its table.
//! Every slot outside the active range stays [`PageSlot::Reserved`], which
//! fences the first-fit scan and in-place growth without extra bounds checks.
//!
//! Each fallible operation comes in two forms. The `try_` form returns
//! `Err(HeapViolation)` on a contract violation and `Ok(None)` when memory is
//! exhausted. The plain form panics on the violation, since it means the
//! caller has already corrupted the heap.
use core::ptr;

use x86_64::VirtAddr;

use super::error::{fatal, HeapViolation};
use super::page_info::{PageIndex, PageInfoTable, PageSlot};
use super::translate::{AddressTranslator, TranslateError};
use crate::memory::{pages_for, DYN_ALLOC_MAX_BLOCK_SIZE, PAGE_SIZE};

/// Configured active range, in addresses and in table indices.
#[derive(Debug, Clone, Copy)]
struct ActiveRange {
    start: VirtAddr,
    end: VirtAddr,
    first: usize,
    last: usize,
}

impl ActiveRange {
    fn contains(&self, va: VirtAddr) -> bool {
        va >= self.start && va < self.end
    }

    fn pages(&self) -> usize {
        self.last - self.first
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub total_pages: usize,
    pub free_pages: usize,
    pub used_pages: usize,
    pub live_blocks: usize,
    pub largest_free_run: usize,
}

pub struct DynamicAllocator<const N: usize> {
    table: PageInfoTable<N>,
    translator: AddressTranslator,
    max_block_size: usize,
    active: Option<ActiveRange>,
}

impl<const N: usize> DynamicAllocator<N> {
    /// Creates an allocator whose table describes `N` pages starting at `base`.
    pub const fn new(base: VirtAddr) -> Self {
        DynamicAllocator {
            table: PageInfoTable::new(),
            translator: AddressTranslator::new(base, N),
            max_block_size: DYN_ALLOC_MAX_BLOCK_SIZE,
            active: None,
        }
    }

    pub const fn with_max_block_size(self, max_block_size: usize) -> Self {
        DynamicAllocator {
            max_block_size,
            ..self
        }
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_range(&self) -> Option<(VirtAddr, VirtAddr)> {
        self.active.map(|range| (range.start, range.end))
    }

    /// Activates `[start, end)` for allocation. Every other page of the table
    /// becomes a permanent wall.
    ///
    /// Panics if called twice or if the range does not fit the table.
    ///
    /// # Safety
    ///
    /// `[start, end)` must be mapped, writable and owned by this allocator for
    /// as long as it lives: reallocation copies block contents through these
    /// addresses.
    pub unsafe fn init(&mut self, start: VirtAddr, end: VirtAddr) {
        if let Err(violation) = unsafe { self.try_init(start, end) } {
            fatal("init", violation);
        }
    }

    /// # Safety
    ///
    /// Same contract as [`DynamicAllocator::init`].
    pub unsafe fn try_init(&mut self, start: VirtAddr, end: VirtAddr) -> Result<(), HeapViolation> {
        if self.active.is_some() {
            return Err(HeapViolation::AlreadyInitialized);
        }

        let (s, e) = (start.as_u64(), end.as_u64());
        let base = self.translator.base().as_u64();
        let max_size = N as u64 * PAGE_SIZE;
        if s % PAGE_SIZE != 0
            || e % PAGE_SIZE != 0
            || s > e
            || e - s > max_size
            || s < base
            || e > self.translator.limit()
        {
            return Err(HeapViolation::InvalidRange { start, end });
        }

        // Both ends of the table must be canonical before any slot is written.
        if let Some(last) = N.checked_sub(1).and_then(|i| self.table.index(i)) {
            self.translator.to_page_va(last)?;
            let last_byte = self.translator.limit() - 1;
            VirtAddr::try_new(last_byte)
                .map_err(|_| TranslateError::NonCanonical { addr: last_byte })?;
        }

        for i in 0..N {
            let Some(index) = self.table.index(i) else {
                break;
            };
            let va = self.translator.to_page_va(index)?;
            let slot = if va >= start && va < end {
                PageSlot::Free
            } else {
                PageSlot::Reserved
            };
            self.table.set(index, slot);
        }

        let range = ActiveRange {
            start,
            end,
            first: ((s - base) / PAGE_SIZE) as usize,
            last: ((e - base) / PAGE_SIZE) as usize,
        };
        self.active = Some(range);
        log::info!(
            "dynamic allocator: {:#x}..{:#x} ({} of {} pages active)",
            s,
            e,
            range.pages(),
            N
        );
        Ok(())
    }

    fn active(&self) -> Result<ActiveRange, HeapViolation> {
        self.active.ok_or(HeapViolation::NotInitialized)
    }

    /// Size in bytes of the block owning `va`'s page, or 0 if no live block
    /// owns it.
    pub fn block_size(&self, va: VirtAddr) -> usize {
        let Ok(index) = self.translator.to_page_index(va) else {
            return 0;
        };
        let pages = match self.table.get(index) {
            PageSlot::BlockStart { pages } => pages,
            PageSlot::BlockContinuation { head } => match self.table.get(head) {
                PageSlot::BlockStart { pages }
                    if head < index && index.as_usize() < head.as_usize() + pages =>
                {
                    pages
                }
                _ => return 0,
            },
            PageSlot::Free | PageSlot::Reserved => return 0,
        };
        pages * PAGE_SIZE as usize
    }

    /// Allocates a block of at least `size` bytes from the lowest-addressed
    /// free run that fits. Returns `None` for `size == 0` or when no run fits.
    pub fn alloc_block(&mut self, size: usize) -> Option<VirtAddr> {
        self.try_alloc_block(size)
            .unwrap_or_else(|violation| fatal("alloc_block", violation))
    }

    pub fn try_alloc_block(&mut self, size: usize) -> Result<Option<VirtAddr>, HeapViolation> {
        let range = self.active()?;
        if size > self.max_block_size {
            return Err(HeapViolation::SizeTooLarge {
                size,
                max: self.max_block_size,
            });
        }
        if size == 0 {
            return Ok(None);
        }

        let pages = pages_for(size);
        let Some(head) = self.find_free_run(range, pages) else {
            log::debug!("alloc_block: no run of {} free pages for {} bytes", pages, size);
            return Ok(None);
        };

        self.table.mark_block(head, pages);
        let va = self.translator.to_page_va(head)?;
        log::trace!("alloc_block: {} pages at {:#x}", pages, va.as_u64());
        Ok(Some(va))
    }

    fn find_free_run(&self, range: ActiveRange, pages: usize) -> Option<PageIndex> {
        let mut run_start = None;
        let mut run_len = 0;

        for (index, slot) in self.table.iter().skip(range.first).take(range.pages()) {
            if !slot.is_free() {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = Some(index);
            }
            run_len += 1;
            if run_len == pages {
                return run_start;
            }
        }
        None
    }

    /// Releases the block starting at `va`.
    ///
    /// Panics if `va` is outside the heap, unaligned, already free, not a
    /// block start, or if the block's pages disagree with its start record.
    pub fn free_block(&mut self, va: VirtAddr) {
        if let Err(violation) = self.try_free_block(va) {
            fatal("free_block", violation);
        }
    }

    pub fn try_free_block(&mut self, va: VirtAddr) -> Result<(), HeapViolation> {
        let range = self.active()?;
        if !range.contains(va) {
            return Err(HeapViolation::OutsideActiveRange { addr: va });
        }
        if va.as_u64() % PAGE_SIZE != 0 {
            return Err(HeapViolation::Unaligned { addr: va });
        }

        let head = self.translator.to_page_index(va)?;
        let pages = match self.table.get(head) {
            PageSlot::Free => return Err(HeapViolation::DoubleFree { addr: va }),
            PageSlot::BlockStart { pages } => pages,
            PageSlot::BlockContinuation { .. } | PageSlot::Reserved => {
                return Err(HeapViolation::NotBlockStart { addr: va })
            }
        };

        // Validate the whole span first so a corrupt block is left untouched.
        for k in 1..pages {
            let index = self
                .table
                .offset(head, k)
                .ok_or(HeapViolation::Corrupted { addr: va })?;
            if self.table.get(index) != (PageSlot::BlockContinuation { head }) {
                let addr = self.translator.to_page_va(index)?;
                return Err(HeapViolation::Corrupted { addr });
            }
        }

        self.table.release(head, pages);
        log::trace!("free_block: {} pages at {:#x}", pages, va.as_u64());
        Ok(())
    }

    /// Resizes the block at `va` to hold `new_size` bytes.
    ///
    /// `None` allocates, a zero size frees. Otherwise the block shrinks in
    /// place, grows in place when the pages after it are free, or moves to a
    /// new block with its contents copied. Returns `None` if it has to move
    /// and nothing fits, in which case the original block is untouched.
    pub fn realloc_block(&mut self, va: Option<VirtAddr>, new_size: usize) -> Option<VirtAddr> {
        self.try_realloc_block(va, new_size)
            .unwrap_or_else(|violation| fatal("realloc_block", violation))
    }

    pub fn try_realloc_block(
        &mut self,
        va: Option<VirtAddr>,
        new_size: usize,
    ) -> Result<Option<VirtAddr>, HeapViolation> {
        let Some(va) = va else {
            return self.try_alloc_block(new_size);
        };
        if new_size == 0 {
            self.try_free_block(va)?;
            return Ok(None);
        }

        // The block cap only applies when the block has to move, through
        // `try_alloc_block`.
        let range = self.active()?;
        if !range.contains(va) {
            return Err(HeapViolation::OutsideActiveRange { addr: va });
        }
        if va.as_u64() % PAGE_SIZE != 0 {
            return Err(HeapViolation::Unaligned { addr: va });
        }
        let head = self.translator.to_page_index(va)?;
        let PageSlot::BlockStart { pages: old_pages } = self.table.get(head) else {
            return Err(HeapViolation::NotBlockStart { addr: va });
        };
        let new_pages = pages_for(new_size);

        if new_pages <= old_pages {
            if let Some(tail) = self.table.offset(head, new_pages) {
                self.table.release(tail, old_pages - new_pages);
            }
            self.table.set(head, PageSlot::BlockStart { pages: new_pages });
            log::trace!(
                "realloc_block: shrank {:#x} from {} to {} pages",
                va.as_u64(),
                old_pages,
                new_pages
            );
            return Ok(Some(va));
        }

        let can_extend = (old_pages..new_pages).all(|k| {
            self.table
                .offset(head, k)
                .is_some_and(|index| self.table.get(index).is_free())
        });
        if can_extend {
            self.table.mark_block(head, new_pages);
            log::trace!(
                "realloc_block: grew {:#x} in place from {} to {} pages",
                va.as_u64(),
                old_pages,
                new_pages
            );
            return Ok(Some(va));
        }

        let Some(new_va) = self.try_alloc_block(new_size)? else {
            log::debug!(
                "realloc_block: cannot move {:#x} to a block of {} pages",
                va.as_u64(),
                new_pages
            );
            return Ok(None);
        };

        // SAFETY: both blocks lie in the active range, which `init`'s caller
        // guarantees is mapped and writable, and live blocks never overlap.
        unsafe {
            ptr::copy_nonoverlapping(
                va.as_ptr::<u8>(),
                new_va.as_mut_ptr::<u8>(),
                old_pages * PAGE_SIZE as usize,
            );
        }
        self.table.release(head, old_pages);
        log::debug!(
            "realloc_block: moved {:#x} to {:#x} ({} -> {} pages)",
            va.as_u64(),
            new_va.as_u64(),
            old_pages,
            new_pages
        );
        Ok(Some(new_va))
    }

    /// Page accounting over the active range. All zero before `init`.
    pub fn stats(&self) -> HeapStats {
        let Some(range) = self.active else {
            return HeapStats::default();
        };

        let mut stats = HeapStats {
            total_pages: range.pages(),
            ..HeapStats::default()
        };
        let mut run = 0;
        for (_, slot) in self.table.iter().skip(range.first).take(range.pages()) {
            match slot {
                PageSlot::Free => {
                    stats.free_pages += 1;
                    run += 1;
                    stats.largest_free_run = stats.largest_free_run.max(run);
                    continue;
                }
                PageSlot::BlockStart { .. } => stats.live_blocks += 1,
                PageSlot::BlockContinuation { .. } | PageSlot::Reserved => {}
            }
            stats.used_pages += 1;
            run = 0;
        }
        stats
    }

    /// Walks the whole table and checks that walls, block starts and
    /// continuations agree with each other.
    pub fn check_consistency(&self) -> Result<(), HeapViolation> {
        let Some(range) = self.active else {
            return Ok(());
        };

        for (index, slot) in self.table.iter() {
            let i = index.as_usize();
            let inside = i >= range.first && i < range.last;
            let ok = match slot {
                PageSlot::Reserved => !inside,
                PageSlot::Free => inside,
                PageSlot::BlockStart { pages } => {
                    inside
                        && pages > 0
                        && i + pages <= range.last
                        && (1..pages).all(|k| {
                            self.table.offset(index, k).is_some_and(|next| {
                                self.table.get(next)
                                    == (PageSlot::BlockContinuation { head: index })
                            })
                        })
                }
                PageSlot::BlockContinuation { head } => {
                    inside
                        && head < index
                        && matches!(
                            self.table.get(head),
                            PageSlot::BlockStart { pages } if i < head.as_usize() + pages
                        )
                }
            };
            if !ok {
                let addr = self.translator.to_page_va(index)?;
                return Err(HeapViolation::Corrupted { addr });
            }
        }
        Ok(())
    }
}
