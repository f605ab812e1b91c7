//! Linked lists, and the stacks and FIFO queues built from them.
//!
//! Conventions shared by every container in this module: `push`/`enqueue`
//! take a new reference to the value, the `_owned` variants move the caller's
//! reference in, and `pop`/`dequeue` hand an owned reference back.

use gosub_heap::{Address, Heap, Tag};

use crate::error::RuntimeResult;

// =============================================================================
// Linked list node
// =============================================================================

/// Layout: child 0 = value, child 1 = next node.
pub mod node {
    use super::*;

    pub const VALUE: usize = 0;
    pub const NEXT: usize = 1;

    /// Takes ownership of `value`; references `next`.
    pub fn create_owned(heap: &mut Heap, value: Address, next: Address) -> RuntimeResult<Address> {
        let node = match heap.allocate_object(Tag::LinkedList, 0, 2) {
            Ok(node) => node,
            Err(err) => {
                heap.free(value)?;
                return Err(err.into());
            }
        };
        heap.set_child_owned(node, Tag::LinkedList, VALUE, value)?;
        heap.set_child(node, Tag::LinkedList, NEXT, next)?;
        Ok(node)
    }

    #[inline]
    pub fn value(heap: &Heap, node: Address) -> RuntimeResult<Address> {
        Ok(heap.child(node, Tag::LinkedList, VALUE)?)
    }

    #[inline]
    pub fn next(heap: &Heap, node: Address) -> RuntimeResult<Address> {
        Ok(heap.child(node, Tag::LinkedList, NEXT)?)
    }

    /// Values from `node` to the end of its chain, borrowed.
    pub fn collect(heap: &Heap, mut node: Address) -> RuntimeResult<Vec<Address>> {
        let mut values = Vec::new();
        while !node.is_nil() {
            values.push(value(heap, node)?);
            node = next(heap, node)?;
        }
        Ok(values)
    }
}

// =============================================================================
// Stack
// =============================================================================

/// LIFO stack shared by the control and stash records.
///
/// Layout: field 0 = size, child 0 = top node. Popping an empty stack yields
/// nil.
pub mod stack {
    use super::*;

    pub const SIZE: usize = 0;
    pub const TOP: usize = 0;

    pub fn create(heap: &mut Heap, tag: Tag) -> RuntimeResult<Address> {
        Ok(heap.allocate_object(tag, 1, 1)?)
    }

    pub fn len(heap: &Heap, stack: Address) -> RuntimeResult<usize> {
        let tag = heap.tag(stack)?;
        Ok(heap.field(stack, tag, SIZE)? as usize)
    }

    #[inline]
    pub fn is_empty(heap: &Heap, stack: Address) -> RuntimeResult<bool> {
        Ok(len(heap, stack)? == 0)
    }

    pub fn push(heap: &mut Heap, stack: Address, value: Address) -> RuntimeResult<()> {
        heap.reference(value)?;
        push_owned(heap, stack, value)
    }

    pub fn push_owned(heap: &mut Heap, stack: Address, value: Address) -> RuntimeResult<()> {
        let tag = heap.tag(stack)?;
        let top = heap.child(stack, tag, TOP)?;
        let node = node::create_owned(heap, value, top)?;
        heap.set_child_owned(stack, tag, TOP, node)?;
        let size = heap.field(stack, tag, SIZE)?;
        heap.set_field(stack, tag, SIZE, size + 1)?;
        Ok(())
    }

    pub fn pop(heap: &mut Heap, stack: Address) -> RuntimeResult<Address> {
        let tag = heap.tag(stack)?;
        let top = heap.take_child(stack, tag, TOP)?;
        if top.is_nil() {
            return Ok(Address::NIL);
        }
        let value = heap.take_child(top, Tag::LinkedList, node::VALUE)?;
        let next = heap.take_child(top, Tag::LinkedList, node::NEXT)?;
        heap.set_child_owned(stack, tag, TOP, next)?;
        heap.free(top)?;
        let size = heap.field(stack, tag, SIZE)?;
        heap.set_field(stack, tag, SIZE, size.saturating_sub(1))?;
        Ok(value)
    }

    /// Borrowed view of the top value.
    pub fn peek(heap: &Heap, stack: Address) -> RuntimeResult<Address> {
        let tag = heap.tag(stack)?;
        let top = heap.child(stack, tag, TOP)?;
        if top.is_nil() {
            return Ok(Address::NIL);
        }
        node::value(heap, top)
    }

    /// Values from top to bottom, borrowed.
    pub fn values(heap: &Heap, stack: Address) -> RuntimeResult<Vec<Address>> {
        let tag = heap.tag(stack)?;
        node::collect(heap, heap.child(stack, tag, TOP)?)
    }
}

// =============================================================================
// Queue
// =============================================================================

/// FIFO queue.
///
/// Layout: field 0 = length, child 0 = front node, child 1 = back node.
pub mod queue {
    use super::*;

    pub const LEN: usize = 0;
    pub const FRONT: usize = 0;
    pub const BACK: usize = 1;

    pub fn create(heap: &mut Heap) -> RuntimeResult<Address> {
        Ok(heap.allocate_object(Tag::Queue, 1, 2)?)
    }

    pub fn len(heap: &Heap, queue: Address) -> RuntimeResult<usize> {
        Ok(heap.field(queue, Tag::Queue, LEN)? as usize)
    }

    #[inline]
    pub fn is_empty(heap: &Heap, queue: Address) -> RuntimeResult<bool> {
        Ok(len(heap, queue)? == 0)
    }

    pub fn enqueue(heap: &mut Heap, queue: Address, value: Address) -> RuntimeResult<()> {
        heap.reference(value)?;
        enqueue_owned(heap, queue, value)
    }

    pub fn enqueue_owned(heap: &mut Heap, queue: Address, value: Address) -> RuntimeResult<()> {
        let node = node::create_owned(heap, value, Address::NIL)?;
        let back = heap.child(queue, Tag::Queue, BACK)?;
        if back.is_nil() {
            heap.set_child(queue, Tag::Queue, FRONT, node)?;
        } else {
            heap.set_child(back, Tag::LinkedList, node::NEXT, node)?;
        }
        heap.set_child_owned(queue, Tag::Queue, BACK, node)?;
        let len = heap.field(queue, Tag::Queue, LEN)?;
        heap.set_field(queue, Tag::Queue, LEN, len + 1)?;
        Ok(())
    }

    /// Owned front value, or nil when empty.
    pub fn dequeue(heap: &mut Heap, queue: Address) -> RuntimeResult<Address> {
        let front = heap.take_child(queue, Tag::Queue, FRONT)?;
        if front.is_nil() {
            return Ok(Address::NIL);
        }
        let value = heap.take_child(front, Tag::LinkedList, node::VALUE)?;
        let next = heap.take_child(front, Tag::LinkedList, node::NEXT)?;
        if next.is_nil() {
            heap.set_child(queue, Tag::Queue, BACK, Address::NIL)?;
        }
        heap.set_child_owned(queue, Tag::Queue, FRONT, next)?;
        heap.free(front)?;
        let len = heap.field(queue, Tag::Queue, LEN)?;
        heap.set_field(queue, Tag::Queue, LEN, len.saturating_sub(1))?;
        Ok(value)
    }

    /// Borrowed front value.
    pub fn peek(heap: &Heap, queue: Address) -> RuntimeResult<Address> {
        let front = heap.child(queue, Tag::Queue, FRONT)?;
        if front.is_nil() {
            return Ok(Address::NIL);
        }
        node::value(heap, front)
    }

    /// Values from front to back, borrowed.
    pub fn values(heap: &Heap, queue: Address) -> RuntimeResult<Vec<Address>> {
        node::collect(heap, heap.child(queue, Tag::Queue, FRONT)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::primitive;
    use pretty_assertions::assert_eq;

    fn ints(heap: &Heap, values: Vec<Address>) -> Vec<i32> {
        values
            .into_iter()
            .map(|v| primitive::to_int32(heap, v).unwrap())
            .collect()
    }

    #[test]
    fn test_stack_is_lifo_and_pops_nil_when_empty() {
        let mut heap = Heap::new(1024).unwrap();
        let stash = stack::create(&mut heap, Tag::Stash).unwrap();
        for i in 0..3 {
            let v = primitive::new_int32(&mut heap, i).unwrap();
            stack::push_owned(&mut heap, stash, v).unwrap();
        }
        assert_eq!(stack::len(&heap, stash).unwrap(), 3);
        let top = stack::values(&heap, stash).unwrap();
        assert_eq!(ints(&heap, top), vec![2, 1, 0]);

        let v = stack::pop(&mut heap, stash).unwrap();
        assert_eq!(primitive::to_int32(&heap, v).unwrap(), 2);
        heap.free(v).unwrap();
        for _ in 0..2 {
            let v = stack::pop(&mut heap, stash).unwrap();
            heap.free(v).unwrap();
        }
        assert_eq!(stack::pop(&mut heap, stash).unwrap(), Address::NIL);
        assert!(stack::is_empty(&heap, stash).unwrap());
        heap.free(stash).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut heap = Heap::new(1024).unwrap();
        let q = queue::create(&mut heap).unwrap();
        for i in 0..4 {
            let v = primitive::new_int32(&mut heap, i).unwrap();
            queue::enqueue_owned(&mut heap, q, v).unwrap();
        }
        let first = queue::dequeue(&mut heap, q).unwrap();
        assert_eq!(primitive::to_int32(&heap, first).unwrap(), 0);
        heap.free(first).unwrap();

        let v = primitive::new_int32(&mut heap, 9).unwrap();
        queue::enqueue(&mut heap, q, v).unwrap();
        heap.free(v).unwrap();
        let values = queue::values(&heap, q).unwrap();
        assert_eq!(ints(&heap, values), vec![1, 2, 3, 9]);
        assert_eq!(queue::len(&heap, q).unwrap(), 4);

        while !queue::is_empty(&heap, q).unwrap() {
            let v = queue::dequeue(&mut heap, q).unwrap();
            heap.free(v).unwrap();
        }
        assert_eq!(queue::peek(&heap, q).unwrap(), Address::NIL);
        heap.free(q).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_freeing_a_full_queue_releases_values() {
        let mut heap = Heap::new(1024).unwrap();
        let q = queue::create(&mut heap).unwrap();
        for i in 0..5 {
            let v = primitive::new_int32(&mut heap, i).unwrap();
            queue::enqueue_owned(&mut heap, q, v).unwrap();
        }
        heap.free(q).unwrap();
        assert!(heap.check_all_released());
    }
}
