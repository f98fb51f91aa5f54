#![cfg_attr(not(test), no_std)]

//! Page-granularity dynamic allocator for a kernel heap.
//!
//! Blocks are runs of whole pages carved out of one contiguous virtual
//! range. Allocation state lives in a side table with one slot per page, so
//! the managed memory itself carries no headers.

pub mod allocator;
pub mod memory;

pub use allocator::dynamic::DynamicAllocator;
pub use allocator::{init_heap, HeapStats, HeapViolation, Locked, KERNEL_HEAP};
