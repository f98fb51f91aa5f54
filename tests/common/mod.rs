use std::alloc::{alloc_zeroed, dealloc, Layout};

use dyn_page_heap::{memory::PAGE_SIZE, DynamicAllocator};
use x86_64::VirtAddr;

pub const PAGE: usize = PAGE_SIZE as usize;

/// Page-aligned host memory standing in for a mapped heap range.
pub struct TestRegion {
    ptr: *mut u8,
    layout: Layout,
}

impl TestRegion {
    pub fn new(pages: usize) -> Self {
        let layout = Layout::from_size_align(pages * PAGE, PAGE).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null(), "host allocation failed");
        TestRegion { ptr, layout }
    }

    pub fn page(&self, index: usize) -> VirtAddr {
        VirtAddr::from_ptr(self.ptr) + (index * PAGE) as u64
    }
}

impl Drop for TestRegion {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

/// A heap whose table covers the whole region and whose active range is
/// pages `first..last` of it.
#[allow(dead_code)]
pub fn heap<const N: usize>(region: &TestRegion, first: usize, last: usize) -> DynamicAllocator<N> {
    let mut heap = DynamicAllocator::<N>::new(region.page(0));
    unsafe { heap.init(region.page(first), region.page(last)) };
    heap
}
