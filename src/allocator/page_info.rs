//! Side table holding one record per page of the managed range.

/// Index of a slot in a [`PageInfoTable`].
///
/// Only the translator and the table hand these out, so every value is
/// below the capacity of the table it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageIndex(usize);

impl PageIndex {
    pub(crate) const fn new_unchecked(index: usize) -> Self {
        PageIndex(index)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// Allocation state of a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSlot {
    Free,
    /// First page of a block spanning `pages` pages.
    BlockStart { pages: usize },
    /// Any later page of a block. `head` is the block's start slot.
    BlockContinuation { head: PageIndex },
    /// Wall page outside the active range.
    Reserved,
}

impl PageSlot {
    pub fn is_free(&self) -> bool {
        matches!(self, PageSlot::Free)
    }
}

pub struct PageInfoTable<const N: usize> {
    slots: [PageSlot; N],
}

impl<const N: usize> PageInfoTable<N> {
    /// A table with every slot reserved. Nothing can be allocated until the
    /// owner carves out an active range.
    pub const fn new() -> Self {
        PageInfoTable {
            slots: [PageSlot::Reserved; N],
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn index(&self, index: usize) -> Option<PageIndex> {
        (index < N).then_some(PageIndex(index))
    }

    /// `index + offset`, if still inside the table.
    pub fn offset(&self, index: PageIndex, offset: usize) -> Option<PageIndex> {
        index.0.checked_add(offset).and_then(|i| self.index(i))
    }

    pub(crate) fn get(&self, index: PageIndex) -> PageSlot {
        self.slots[index.0]
    }

    pub(crate) fn set(&mut self, index: PageIndex, slot: PageSlot) {
        self.slots[index.0] = slot;
    }

    /// Writes a live block of `pages` pages starting at `head`.
    ///
    /// The caller has already checked that every slot of the run exists.
    pub(crate) fn mark_block(&mut self, head: PageIndex, pages: usize) {
        self.slots[head.0] = PageSlot::BlockStart { pages };
        for slot in &mut self.slots[head.0 + 1..head.0 + pages] {
            *slot = PageSlot::BlockContinuation { head };
        }
    }

    /// Marks `count` slots starting at `from` free.
    pub(crate) fn release(&mut self, from: PageIndex, count: usize) {
        for slot in &mut self.slots[from.0..from.0 + count] {
            *slot = PageSlot::Free;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PageIndex, PageSlot)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (PageIndex(i), *slot))
    }
}

impl<const N: usize> Default for PageInfoTable<N> {
    fn default() -> Self {
        Self::new()
    }
}
