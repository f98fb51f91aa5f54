use core::alloc::{GlobalAlloc, Layout};
use core::ptr::null_mut;

use dynamic::DynamicAllocator;
use error::fatal;
use x86_64::VirtAddr;

use crate::memory::{HEAP_PAGES, KERNEL_HEAP_START, PAGE_SIZE};

pub mod dynamic;
pub mod error;
pub mod page_info;
pub mod translate;

pub use dynamic::HeapStats;
pub use error::HeapViolation;

/// The kernel heap. Its table spans `DYN_ALLOC_MAX_SIZE` bytes from
/// `KERNEL_HEAP_START`; [`init_heap`] picks the active part of that span.
///
/// A kernel that wants `alloc` served by a dynamic allocator marks its own
/// `Locked<DynamicAllocator<N>>` static with `#[global_allocator]`.
pub static KERNEL_HEAP: Locked<DynamicAllocator<HEAP_PAGES>> = Locked::new(DynamicAllocator::new(
    VirtAddr::new_truncate(KERNEL_HEAP_START),
));

/// # Safety
///
/// `[heap_start, heap_end)` must already be mapped and writable, and must not
/// be used for anything else while the heap is live.
pub unsafe fn init_heap(heap_start: VirtAddr, heap_end: VirtAddr) {
    unsafe {
        KERNEL_HEAP.lock().init(heap_start, heap_end);
    }
}

// Wraps spin::Mutex to allow for trait implementations
pub struct Locked<A> {
    inner: spin::Mutex<A>,
}

impl<A> Locked<A> {
    pub const fn new(inner: A) -> Self {
        Locked {
            inner: spin::Mutex::new(inner),
        }
    }

    pub fn lock(&self) -> spin::MutexGuard<'_, A> {
        self.inner.lock()
    }
}

/// Every allocation is rounded up to whole pages and page aligned, so any
/// layout with `align <= PAGE_SIZE` is served directly. Larger alignments
/// and sizes above the block cap get a null pointer instead of a panic.
unsafe impl<const N: usize> GlobalAlloc for Locked<DynamicAllocator<N>> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.lock();
        if layout.align() > PAGE_SIZE as usize || layout.size() > heap.max_block_size() {
            return null_mut();
        }
        match heap.alloc_block(layout.size()) {
            Some(va) => va.as_mut_ptr(),
            None => null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.lock().free_block(VirtAddr::from_ptr(ptr));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > PAGE_SIZE as usize {
            return null_mut();
        }
        // Growth in place is uncapped; a move past the cap is refused before
        // anything changes, so it becomes a null pointer here.
        match self
            .lock()
            .try_realloc_block(Some(VirtAddr::from_ptr(ptr)), new_size)
        {
            Ok(Some(va)) => va.as_mut_ptr(),
            Ok(None) | Err(HeapViolation::SizeTooLarge { .. }) => null_mut(),
            Err(violation) => fatal("realloc", violation),
        }
    }
}
