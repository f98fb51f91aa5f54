mod common;

use common::{heap, TestRegion, PAGE};
use dyn_page_heap::HeapViolation;

#[test]
fn free_releases_every_page_of_the_block() {
    let region = TestRegion::new(8);
    let mut heap = heap::<8>(&region, 0, 8);
    let block = heap.alloc_block(3 * PAGE).unwrap();
    let after = heap.alloc_block(PAGE).unwrap();

    heap.free_block(block);
    for i in 0..3 {
        assert_eq!(heap.block_size(region.page(i)), 0);
    }
    assert_eq!(heap.block_size(after), PAGE);
    assert_eq!(heap.stats().free_pages, 7);
    assert_eq!(heap.check_consistency(), Ok(()));
}

#[test]
fn freed_pages_can_be_allocated_again() {
    let region = TestRegion::new(4);
    let mut heap = heap::<4>(&region, 0, 4);
    let whole = heap.alloc_block(4 * PAGE).unwrap();
    assert_eq!(heap.alloc_block(PAGE), None);

    heap.free_block(whole);
    assert_eq!(heap.alloc_block(4 * PAGE), Some(whole));
}

#[test]
fn try_free_reports_misuse_without_touching_the_heap() {
    let region = TestRegion::new(8);
    let mut heap = heap::<8>(&region, 1, 7);
    let block = heap.alloc_block(2 * PAGE).unwrap();
    let before = heap.stats();

    let inner = region.page(2);
    assert_eq!(
        heap.try_free_block(inner),
        Err(HeapViolation::NotBlockStart { addr: inner })
    );
    let wall = region.page(0);
    assert_eq!(
        heap.try_free_block(wall),
        Err(HeapViolation::OutsideActiveRange { addr: wall })
    );
    let unaligned = block + 1u64;
    assert_eq!(
        heap.try_free_block(unaligned),
        Err(HeapViolation::Unaligned { addr: unaligned })
    );
    assert_eq!(heap.stats(), before);
}

#[test]
#[should_panic(expected = "is not the start of an allocated block")]
fn freeing_inside_a_block_panics() {
    let region = TestRegion::new(8);
    let mut heap = heap::<8>(&region, 0, 8);
    heap.alloc_block(2 * PAGE).unwrap();
    heap.free_block(region.page(1));
}

#[test]
#[should_panic(expected = "is not page-aligned")]
fn freeing_unaligned_address_panics() {
    let region = TestRegion::new(8);
    let mut heap = heap::<8>(&region, 0, 8);
    let block = heap.alloc_block(PAGE).unwrap();
    heap.free_block(block + 16u64);
}

#[test]
#[should_panic(expected = "is already free")]
fn double_free_panics() {
    let region = TestRegion::new(8);
    let mut heap = heap::<8>(&region, 0, 8);
    let block = heap.alloc_block(PAGE).unwrap();
    heap.free_block(block);
    heap.free_block(block);
}
