//! Reduction rules, one microcode per control tag.
//!
//! A microcode receives the popped node (borrowed; the loop releases it
//! afterwards) and a [`Cx`] over the running thread. Sequential entries leave
//! scheduling to the loop, which re-enqueues the thread after them. Scheduling
//! entries decide for themselves: re-enqueue, hand the thread to another
//! queue, or park it.

use fastrand::Rng;
use gosub_heap::{Address, Heap, Tag, TAG_TABLE_SIZE};
use gosub_runtime::context::{control as control_stack, env, scheduler, stash as stash_stack, thread};
use gosub_runtime::control;

use crate::builtins::BuiltinRegistry;
use crate::error::VmResult;
use crate::output::OutputSink;

mod concurrent;
mod data;
mod expression;
mod flow;
mod function;

pub(crate) use data::deref;

pub type Microcode = fn(&mut Cx<'_>, Address) -> VmResult<()>;

#[derive(Clone, Copy)]
pub enum Entry {
    Sequential(Microcode),
    Scheduling(Microcode),
}

// =============================================================================
// Step context
// =============================================================================

/// Everything a reduction may touch. Built fresh for every step.
pub struct Cx<'a> {
    pub heap: &'a mut Heap,
    pub scheduler: Address,
    pub thread: Address,
    pub output: &'a mut dyn OutputSink,
    pub builtins: &'a BuiltinRegistry,
    pub rng: &'a mut Rng,
}

impl Cx<'_> {
    #[inline]
    pub fn control(&self) -> VmResult<Address> {
        Ok(thread::control(self.heap, self.thread)?)
    }

    #[inline]
    pub fn stash(&self) -> VmResult<Address> {
        Ok(thread::stash(self.heap, self.thread)?)
    }

    #[inline]
    pub fn env(&self) -> VmResult<Address> {
        Ok(thread::env(self.heap, self.thread)?)
    }

    /// Innermost frame of the running thread.
    #[inline]
    pub fn frame(&self) -> VmResult<Address> {
        Ok(thread::frame(self.heap, self.thread)?)
    }

    /// Frame holding struct declarations and methods.
    #[inline]
    pub fn structs(&self) -> VmResult<Address> {
        Ok(thread::structs(self.heap, self.thread)?)
    }

    pub fn thread_id(&self) -> VmResult<u32> {
        Ok(thread::id(self.heap, self.thread)?)
    }

    pub fn field(&self, node: Address, tag: Tag, index: usize) -> VmResult<u64> {
        Ok(self.heap.field(node, tag, index)?)
    }

    pub fn child(&self, node: Address, tag: Tag, index: usize) -> VmResult<Address> {
        Ok(self.heap.child(node, tag, index)?)
    }

    /// Schedules `node` next; the control stack takes its own reference.
    pub fn push(&mut self, node: Address) -> VmResult<()> {
        let control = self.control()?;
        Ok(control_stack::push(self.heap, control, node)?)
    }

    pub fn push_owned(&mut self, node: Address) -> VmResult<()> {
        let control = self.control()?;
        Ok(control_stack::push_owned(self.heap, control, node)?)
    }

    /// Pushes `nodes` so that the first one runs first. Nil entries are
    /// skipped.
    pub fn push_in_order(&mut self, nodes: &[Address]) -> VmResult<()> {
        for &node in nodes.iter().rev() {
            if !node.is_nil() {
                self.push(node)?;
            }
        }
        Ok(())
    }

    /// Builds a continuation node from owned children and schedules it.
    pub fn push_new(&mut self, tag: Tag, fields: &[u64], children: Vec<Address>) -> VmResult<()> {
        let node = control::build(self.heap, tag, fields, children)?;
        self.push_owned(node)
    }

    /// Like `push_new`, with borrowed children.
    pub fn push_shared(&mut self, tag: Tag, fields: &[u64], children: &[Address]) -> VmResult<()> {
        let node = control::build_shared(self.heap, tag, fields, children)?;
        self.push_owned(node)
    }

    pub fn push_value(&mut self, value: Address) -> VmResult<()> {
        let stash = self.stash()?;
        Ok(stash_stack::push(self.heap, stash, value)?)
    }

    pub fn push_value_owned(&mut self, value: Address) -> VmResult<()> {
        let stash = self.stash()?;
        Ok(stash_stack::push_owned(self.heap, stash, value)?)
    }

    /// Top of the stash, owned by the caller.
    pub fn pop_value(&mut self) -> VmResult<Address> {
        let stash = self.stash()?;
        Ok(stash_stack::pop(self.heap, stash)?)
    }

    /// The top `n` values in evaluation order, owned by the caller.
    pub fn pop_values(&mut self, n: usize) -> VmResult<Vec<Address>> {
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(self.pop_value()?);
        }
        values.reverse();
        Ok(values)
    }

    /// Drops the caller's references to `values`.
    pub fn release(&mut self, values: impl IntoIterator<Item = Address>) -> VmResult<()> {
        for value in values {
            self.heap.free(value)?;
        }
        Ok(())
    }

    /// Puts the running thread back on the run queue.
    pub fn enqueue_current(&mut self) -> VmResult<()> {
        Ok(scheduler::enqueue(self.heap, self.scheduler, self.thread)?)
    }

    pub fn push_frame(&mut self) -> VmResult<Address> {
        let env = self.env()?;
        Ok(env::push_frame(self.heap, env)?)
    }

    pub fn pop_frame(&mut self) -> VmResult<()> {
        let env = self.env()?;
        Ok(env::pop_frame(self.heap, env)?)
    }

    pub fn set_frame(&mut self, frame: Address) -> VmResult<()> {
        let env = self.env()?;
        Ok(env::set_frame(self.heap, env, frame)?)
    }
}

// =============================================================================
// Dispatch table
// =============================================================================

/// Microcode indexed by tag discriminant.
pub struct MicrocodeTable {
    entries: Vec<Option<Entry>>,
}

impl MicrocodeTable {
    pub fn new() -> Self {
        let mut table = MicrocodeTable {
            entries: vec![None; TAG_TABLE_SIZE],
        };
        expression::register(&mut table);
        flow::register(&mut table);
        function::register(&mut table);
        data::register(&mut table);
        concurrent::register(&mut table);
        table
    }

    pub fn sequential(&mut self, tag: Tag, microcode: Microcode) {
        self.entries[tag as usize] = Some(Entry::Sequential(microcode));
    }

    pub fn scheduling(&mut self, tag: Tag, microcode: Microcode) {
        self.entries[tag as usize] = Some(Entry::Scheduling(microcode));
    }

    #[inline]
    pub fn lookup(&self, tag: Tag) -> Option<Entry> {
        self.entries.get(tag as usize).copied().flatten()
    }
}

impl Default for MicrocodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_reducible_control_tag_is_registered() {
        let table = MicrocodeTable::new();
        let missing: Vec<Tag> = (0..TAG_TABLE_SIZE as u16)
            .filter_map(Tag::from_raw)
            .filter(|tag| tag.is_control())
            .filter(|tag| !matches!(tag, Tag::CaseSend | Tag::CaseReceive | Tag::CaseDefault))
            .filter(|&tag| table.lookup(tag).is_none())
            .collect();
        assert!(missing.is_empty(), "no microcode for {:?}", missing);
        assert!(table.lookup(Tag::Int32).is_none());
    }

    #[test]
    fn test_scheduling_entries() {
        let table = MicrocodeTable::new();
        for tag in [Tag::CallI, Tag::GoCallI, Tag::ChanSendI, Tag::ChanReceiveI, Tag::SelectI] {
            assert!(matches!(table.lookup(tag), Some(Entry::Scheduling(_))), "{:?}", tag);
        }
        assert!(matches!(table.lookup(Tag::Literal), Some(Entry::Sequential(_))));
    }
}
