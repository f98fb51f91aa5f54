//! Contract violations reported by the dynamic allocator.
//!
//! None of these are recoverable: each one means the caller corrupted the
//! heap or misused it. Running out of memory is not an error here, it is a
//! `None` from the allocation paths.
use core::fmt;

use x86_64::VirtAddr;

use super::translate::TranslateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapViolation {
    /// `init` was called on a heap that is already live.
    AlreadyInitialized,
    /// An operation ran before `init`.
    NotInitialized,
    /// The requested active range is unaligned, inverted or larger than the table.
    InvalidRange { start: VirtAddr, end: VirtAddr },
    /// Address or index translation failed.
    OutOfTable(TranslateError),
    /// The address is outside the configured active range.
    OutsideActiveRange { addr: VirtAddr },
    /// The address is not page aligned.
    Unaligned { addr: VirtAddr },
    /// The block at this address is already free.
    DoubleFree { addr: VirtAddr },
    /// The address is inside a block, or on a reserved page, but is not a block start.
    NotBlockStart { addr: VirtAddr },
    /// The table disagrees with itself.
    Corrupted { addr: VirtAddr },
    /// The request exceeds the maximum block size.
    SizeTooLarge { size: usize, max: usize },
}

impl fmt::Display for HeapViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "dynamic allocator already initialized"),
            Self::NotInitialized => write!(f, "dynamic allocator not initialized"),
            Self::InvalidRange { start, end } => write!(
                f,
                "invalid heap range {:#x}..{:#x}",
                start.as_u64(),
                end.as_u64()
            ),
            Self::OutOfTable(err) => write!(f, "{}", err),
            Self::OutsideActiveRange { addr } => {
                write!(f, "address {:#x} is outside the heap", addr.as_u64())
            }
            Self::Unaligned { addr } => {
                write!(f, "address {:#x} is not page-aligned", addr.as_u64())
            }
            Self::DoubleFree { addr } => {
                write!(f, "block at {:#x} is already free", addr.as_u64())
            }
            Self::NotBlockStart { addr } => write!(
                f,
                "address {:#x} is not the start of an allocated block",
                addr.as_u64()
            ),
            Self::Corrupted { addr } => {
                write!(f, "block metadata corruption detected at {:#x}", addr.as_u64())
            }
            Self::SizeTooLarge { size, max } => {
                write!(f, "requested size {} exceeds max block size {}", size, max)
            }
        }
    }
}

impl From<TranslateError> for HeapViolation {
    fn from(err: TranslateError) -> Self {
        HeapViolation::OutOfTable(err)
    }
}

/// Halts the current operation on a contract violation.
#[track_caller]
pub(crate) fn fatal(op: &str, violation: HeapViolation) -> ! {
    log::error!("{}: {}", op, violation);
    panic!("{}: {}", op, violation)
}
