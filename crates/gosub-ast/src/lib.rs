//! Checked program tree for the gosub evaluator.
//!
//! The tree is produced by an external front end and translated into heap
//! control nodes by `gosub-vm`'s loader. With the `serde` feature the tree can
//! be exchanged as JSON or any other serde format.

pub mod ast;
pub mod build;

pub use ast::*;
