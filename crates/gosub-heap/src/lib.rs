//! Memory layer of the gosub evaluator: a buddy allocator, the tag catalogue
//! and a reference-counted record heap with a tracing backstop for cycles.

pub mod alloc;
mod error;
pub mod heap;
pub mod tag;

pub use error::HeapError;
pub use heap::{Address, Heap, PinGuard, HEADER_WORDS};
pub use tag::{Tag, TagCategory, TAG_TABLE_SIZE};

pub type HeapResult<T> = Result<T, HeapError>;
