//! Runtime layer of the gosub evaluator.
//!
//! Every runtime value and every piece of interpreter state lives in the
//! record heap of `gosub-heap`. This crate gives those records their shapes:
//! values (`objects`), name resolution (`env`), threads and the scheduler
//! (`context`), and the blocking protocols built on them (`objects::sync`,
//! `objects::channel`, `select`).

pub mod context;
pub mod control;
pub mod env;
mod error;
pub mod objects;
pub mod select;

pub use error::{RuntimeError, RuntimeResult};
pub use gosub_heap::{Address, Heap, Tag};
pub use objects::{auto_cast, display, Object};
