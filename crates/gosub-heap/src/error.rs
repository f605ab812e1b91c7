//! Heap error types.

use crate::heap::Address;
use crate::tag::Tag;

/// Errors raised by the allocator and the object heap.
///
/// Apart from `OutOfMemory` these are protocol violations by heap clients and
/// are treated as fatal by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("out of memory: cannot allocate {requested} words ({free} words free)")]
    OutOfMemory { requested: usize, free: usize },

    #[error("unsupported heap size of {0} words")]
    PoolSize(usize),

    #[error("record too large: {fields} fields, {children} children")]
    RecordTooLarge { fields: usize, children: usize },

    #[error("invalid block address {0}")]
    InvalidBlock(usize),

    #[error("access to released object {0}")]
    Released(Address),

    #[error("corrupt tag {raw} at {address}")]
    CorruptTag { address: Address, raw: u16 },

    #[error("object {address} is {found:?}, expected {expected:?}")]
    WrongTag {
        address: Address,
        expected: Tag,
        found: Tag,
    },

    #[error("field index {index} out of range for {tag:?} at {address} ({len} fields)")]
    FieldOutOfRange {
        address: Address,
        tag: Tag,
        index: usize,
        len: usize,
    },

    #[error("child index {index} out of range for {tag:?} at {address} ({len} children)")]
    ChildOutOfRange {
        address: Address,
        tag: Tag,
        index: usize,
        len: usize,
    },

    #[error("object {0} freed more often than referenced")]
    DoubleFree(Address),

    #[error("object {0} unpinned more often than pinned")]
    UnbalancedUnpin(Address),

    #[error("object {0} pinned too often")]
    PinOverflow(Address),
}
