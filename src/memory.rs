use x86_64::structures::paging::{PageSize, Size4KiB};

pub const PAGE_SIZE: u64 = Size4KiB::SIZE;

pub const KERNEL_HEAP_START: u64 = 0xFFFF_FF00_0000_0000;

/// Largest range the kernel heap can ever be asked to manage. The metadata
/// table is sized for this up front, whatever range `init` activates.
pub const DYN_ALLOC_MAX_SIZE: u64 = 32 * 1024 * 1024; // 32MB

pub const DYN_ALLOC_MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024; // 4MB

pub const HEAP_PAGES: usize = (DYN_ALLOC_MAX_SIZE / PAGE_SIZE) as usize;

/// Number of whole pages needed to hold `size` bytes.
pub const fn pages_for(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE as usize)
}
