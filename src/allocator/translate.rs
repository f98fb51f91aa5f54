//! Index arithmetic between page slots and the virtual addresses they describe.
use core::fmt;

use x86_64::{
    structures::paging::{Page, Size4KiB},
    VirtAddr,
};

use super::page_info::PageIndex;
use crate::memory::PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateError {
    IndexOutOfRange { index: usize },
    AddressOutOfRange { addr: VirtAddr },
    /// The computed address is not canonical.
    NonCanonical { addr: u64 },
}

impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexOutOfRange { index } => {
                write!(f, "page index {} is outside the page info table", index)
            }
            Self::AddressOutOfRange { addr } => write!(
                f,
                "address {:#x} is outside the page info table",
                addr.as_u64()
            ),
            Self::NonCanonical { addr } => write!(f, "address {:#x} is not canonical", addr),
        }
    }
}

/// Maps slot `i` of a table with `capacity` slots to `base + i * PAGE_SIZE`.
#[derive(Debug, Clone, Copy)]
pub struct AddressTranslator {
    base: VirtAddr,
    capacity: usize,
}

impl AddressTranslator {
    pub const fn new(base: VirtAddr, capacity: usize) -> Self {
        AddressTranslator { base, capacity }
    }

    pub const fn base(&self) -> VirtAddr {
        self.base
    }

    /// One past the last byte the table can describe.
    pub fn limit(&self) -> u64 {
        self.base
            .as_u64()
            .saturating_add(self.capacity as u64 * PAGE_SIZE)
    }

    pub fn to_page_va(&self, index: PageIndex) -> Result<VirtAddr, TranslateError> {
        let i = index.as_usize();
        if i >= self.capacity {
            return Err(TranslateError::IndexOutOfRange { index: i });
        }
        let addr = self
            .base
            .as_u64()
            .checked_add(i as u64 * PAGE_SIZE)
            .ok_or(TranslateError::IndexOutOfRange { index: i })?;
        VirtAddr::try_new(addr).map_err(|_| TranslateError::NonCanonical { addr })
    }

    /// Slot of the page containing `va`.
    pub fn to_page_index(&self, va: VirtAddr) -> Result<PageIndex, TranslateError> {
        let page_start = Page::<Size4KiB>::containing_address(va)
            .start_address()
            .as_u64();
        let offset = page_start
            .checked_sub(self.base.as_u64())
            .ok_or(TranslateError::AddressOutOfRange { addr: va })?;
        let index = (offset / PAGE_SIZE) as usize;
        if index >= self.capacity {
            return Err(TranslateError::AddressOutOfRange { addr: va });
        }
        Ok(PageIndex::new_unchecked(index))
    }
}
