//! Tagged, reference-counted records on top of the buddy allocator.
//!
//! Record layout, in words, starting at the address handed out:
//!
//! ```text
//! [0] header: tag (16) | fields (16) | children (16) | pins (16)
//! [1] reference count
//! [2 .. 2+F]       fields, raw payload
//! [2+F .. 2+F+C]   children, addresses of other records
//! ```
//!
//! Address 0 is nil. It is never allocated and behaves as a permanently pinned
//! record with no slots.

use std::fmt;
use std::ops::{Deref, DerefMut};

use hashbrown::HashSet;

use crate::alloc::BuddyAllocator;
use crate::error::HeapError;
use crate::tag::Tag;

pub const HEADER_WORDS: usize = 2;

const SLOT_LIMIT: usize = u16::MAX as usize;
const FIELDS_SHIFT: u32 = 16;
const CHILDREN_SHIFT: u32 = 32;
const PINS_SHIFT: u32 = 48;
const PINS_MASK: u64 = 0xffff << PINS_SHIFT;
const MAX_PINS: u64 = 0xffff;

/// Offset of a record in the managed pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(u32);

impl Address {
    pub const NIL: Address = Address(0);

    #[inline]
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn from_word(word: u64) -> Self {
        Address(word as u32)
    }

    #[inline]
    pub fn to_word(self) -> u64 {
        self.0 as u64
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Debug)]
pub struct Heap {
    alloc: BuddyAllocator,
    live: HashSet<Address>,
}

impl Heap {
    pub fn new(words: usize) -> Result<Self, HeapError> {
        Ok(Self {
            alloc: BuddyAllocator::new(words)?,
            live: HashSet::new(),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.alloc.capacity()
    }

    #[inline]
    pub fn free_words(&self) -> usize {
        self.alloc.free_words()
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    #[inline]
    pub fn is_live(&self, address: Address) -> bool {
        self.live.contains(&address)
    }

    /// Allocates a zero-initialised record owned by the caller (count 1).
    pub fn allocate_object(
        &mut self,
        tag: Tag,
        num_fields: usize,
        num_children: usize,
    ) -> Result<Address, HeapError> {
        if num_fields > SLOT_LIMIT || num_children > SLOT_LIMIT {
            return Err(HeapError::RecordTooLarge {
                fields: num_fields,
                children: num_children,
            });
        }
        let words = HEADER_WORDS + num_fields + num_children;
        let index = self.alloc.allocate(words).ok_or(HeapError::OutOfMemory {
            requested: words,
            free: self.alloc.free_words(),
        })?;

        let header = tag as u64
            | (num_fields as u64) << FIELDS_SHIFT
            | (num_children as u64) << CHILDREN_SHIFT;
        self.alloc.set_word(index, header);
        self.alloc.set_word(index + 1, 1);
        for slot in index + HEADER_WORDS..index + words {
            self.alloc.set_word(slot, 0);
        }

        let address = Address(index as u32);
        self.live.insert(address);
        Ok(address)
    }

    fn header(&self, address: Address) -> Result<u64, HeapError> {
        if !self.live.contains(&address) {
            return Err(HeapError::Released(address));
        }
        Ok(self.alloc.word(address.index()))
    }

    pub fn tag(&self, address: Address) -> Result<Tag, HeapError> {
        if address.is_nil() {
            return Ok(Tag::Nil);
        }
        let raw = self.header(address)? as u16;
        Tag::from_raw(raw).ok_or(HeapError::CorruptTag { address, raw })
    }

    pub fn num_fields(&self, address: Address) -> Result<usize, HeapError> {
        if address.is_nil() {
            return Ok(0);
        }
        Ok((self.header(address)? >> FIELDS_SHIFT) as u16 as usize)
    }

    pub fn num_children(&self, address: Address) -> Result<usize, HeapError> {
        if address.is_nil() {
            return Ok(0);
        }
        Ok((self.header(address)? >> CHILDREN_SHIFT) as u16 as usize)
    }

    /// Fails unless the record at `address` carries `tag`.
    pub fn expect(&self, address: Address, tag: Tag) -> Result<(), HeapError> {
        let found = self.tag(address)?;
        if found != tag {
            return Err(HeapError::WrongTag {
                address,
                expected: tag,
                found,
            });
        }
        Ok(())
    }

    fn field_slot(&self, address: Address, tag: Tag, index: usize) -> Result<usize, HeapError> {
        self.expect(address, tag)?;
        let len = self.num_fields(address)?;
        if index >= len {
            return Err(HeapError::FieldOutOfRange {
                address,
                tag,
                index,
                len,
            });
        }
        Ok(address.index() + HEADER_WORDS + index)
    }

    fn child_slot(&self, address: Address, tag: Tag, index: usize) -> Result<usize, HeapError> {
        self.expect(address, tag)?;
        let len = self.num_children(address)?;
        if index >= len {
            return Err(HeapError::ChildOutOfRange {
                address,
                tag,
                index,
                len,
            });
        }
        Ok(address.index() + HEADER_WORDS + self.num_fields(address)? + index)
    }

    pub fn field(&self, address: Address, tag: Tag, index: usize) -> Result<u64, HeapError> {
        let slot = self.field_slot(address, tag, index)?;
        Ok(self.alloc.word(slot))
    }

    pub fn set_field(
        &mut self,
        address: Address,
        tag: Tag,
        index: usize,
        value: u64,
    ) -> Result<(), HeapError> {
        let slot = self.field_slot(address, tag, index)?;
        self.alloc.set_word(slot, value);
        Ok(())
    }

    /// Borrowed view of a child. Call `reference` to keep it past the parent.
    pub fn child(&self, address: Address, tag: Tag, index: usize) -> Result<Address, HeapError> {
        let slot = self.child_slot(address, tag, index)?;
        Ok(Address::from_word(self.alloc.word(slot)))
    }

    /// Stores `child` with a new reference and releases the previous occupant.
    pub fn set_child(
        &mut self,
        address: Address,
        tag: Tag,
        index: usize,
        child: Address,
    ) -> Result<(), HeapError> {
        self.reference(child)?;
        self.set_child_owned(address, tag, index, child)
    }

    /// Moves the caller's reference to `child` into the slot and releases the
    /// previous occupant.
    pub fn set_child_owned(
        &mut self,
        address: Address,
        tag: Tag,
        index: usize,
        child: Address,
    ) -> Result<(), HeapError> {
        let slot = self.child_slot(address, tag, index)?;
        let old = Address::from_word(self.alloc.word(slot));
        self.alloc.set_word(slot, child.to_word());
        self.free(old)
    }

    /// Moves the child out, leaving nil behind. The caller owns the result.
    pub fn take_child(
        &mut self,
        address: Address,
        tag: Tag,
        index: usize,
    ) -> Result<Address, HeapError> {
        let slot = self.child_slot(address, tag, index)?;
        let old = Address::from_word(self.alloc.word(slot));
        self.alloc.set_word(slot, 0);
        Ok(old)
    }

    /// Child access without a tag check, for tracing and diagnostics.
    pub fn child_at(&self, address: Address, index: usize) -> Result<Address, HeapError> {
        let tag = self.tag(address)?;
        self.child(address, tag, index)
    }

    pub fn children(&self, address: Address) -> Result<Vec<Address>, HeapError> {
        (0..self.num_children(address)?)
            .map(|i| self.child_at(address, i))
            .collect()
    }

    pub fn ref_count(&self, address: Address) -> Result<u64, HeapError> {
        if address.is_nil() {
            return Ok(1);
        }
        self.header(address)?;
        Ok(self.alloc.word(address.index() + 1))
    }

    fn set_ref_count(&mut self, address: Address, count: u64) {
        self.alloc.set_word(address.index() + 1, count);
    }

    fn pins(&self, address: Address) -> Result<u64, HeapError> {
        Ok((self.header(address)? & PINS_MASK) >> PINS_SHIFT)
    }

    fn set_pins(&mut self, address: Address, pins: u64) -> Result<(), HeapError> {
        let header = self.header(address)? & !PINS_MASK;
        self.alloc
            .set_word(address.index(), header | (pins << PINS_SHIFT) & PINS_MASK);
        Ok(())
    }

    /// Adds a reference and hands the same address back.
    pub fn reference(&mut self, address: Address) -> Result<Address, HeapError> {
        if address.is_nil() {
            return Ok(address);
        }
        let count = self.ref_count(address)?;
        self.set_ref_count(address, count + 1);
        Ok(address)
    }

    /// Drops one reference. At zero, and unless pinned, the record's children
    /// are released and its block goes back to the allocator.
    pub fn free(&mut self, address: Address) -> Result<(), HeapError> {
        self.drain(vec![address])
    }

    fn drain(&mut self, mut pending: Vec<Address>) -> Result<(), HeapError> {
        while let Some(current) = pending.pop() {
            if current.is_nil() {
                continue;
            }
            let count = self.ref_count(current)?;
            if count == 0 {
                return Err(HeapError::DoubleFree(current));
            }
            self.set_ref_count(current, count - 1);
            if count == 1 && self.pins(current)? == 0 {
                self.release(current, &mut pending)?;
            }
        }
        Ok(())
    }

    fn release(&mut self, address: Address, pending: &mut Vec<Address>) -> Result<(), HeapError> {
        for index in 0..self.num_children(address)? {
            pending.push(self.child_at(address, index)?);
        }
        log::trace!("heap release {} ({:?})", address, self.tag(address)?);
        self.live.remove(&address);
        self.alloc.deallocate(address.index())
    }

    /// Shallow copy; every child gains a reference.
    pub fn copy_object(&mut self, address: Address) -> Result<Address, HeapError> {
        let tag = self.tag(address)?;
        let num_fields = self.num_fields(address)?;
        let children = self.children(address)?;
        let copy = self.allocate_object(tag, num_fields, children.len())?;
        for index in 0..num_fields {
            let value = self.field(address, tag, index)?;
            self.set_field(copy, tag, index, value)?;
        }
        for (index, child) in children.into_iter().enumerate() {
            self.set_child(copy, tag, index, child)?;
        }
        Ok(copy)
    }

    pub fn is_pinned(&self, address: Address) -> Result<bool, HeapError> {
        if address.is_nil() {
            return Ok(true);
        }
        Ok(self.pins(address)? > 0)
    }

    /// Pins nest. Removing the last pin of a record nobody references any more
    /// releases it.
    pub fn set_pinned(&mut self, address: Address, pinned: bool) -> Result<(), HeapError> {
        if address.is_nil() {
            return Ok(());
        }
        let pins = self.pins(address)?;
        if pinned {
            if pins == MAX_PINS {
                return Err(HeapError::PinOverflow(address));
            }
            return self.set_pins(address, pins + 1);
        }
        if pins == 0 {
            return Err(HeapError::UnbalancedUnpin(address));
        }
        self.set_pins(address, pins - 1)?;
        if pins == 1 && self.ref_count(address)? == 0 {
            let mut pending = Vec::new();
            self.release(address, &mut pending)?;
            self.drain(pending)?;
        }
        Ok(())
    }

    /// Pins `address` until the returned guard goes out of scope.
    pub fn pin(&mut self, address: Address) -> Result<PinGuard<'_>, HeapError> {
        self.set_pinned(address, true)?;
        Ok(PinGuard {
            heap: self,
            address,
        })
    }

    /// Traces from `roots` and every pinned record, then force-releases
    /// everything unreached. Returns the number of released records.
    pub fn mark_and_sweep(&mut self, roots: &[Address]) -> Result<usize, HeapError> {
        let mut stack: Vec<Address> = roots.to_vec();
        for &address in &self.live {
            if self.pins(address)? > 0 {
                stack.push(address);
            }
        }

        let mut marked: HashSet<Address> = HashSet::with_capacity(self.live.len());
        while let Some(address) = stack.pop() {
            if address.is_nil() || !self.live.contains(&address) || !marked.insert(address) {
                continue;
            }
            for index in 0..self.num_children(address)? {
                stack.push(self.child_at(address, index)?);
            }
        }

        let garbage: HashSet<Address> = self
            .live
            .iter()
            .filter(|address| !marked.contains(*address))
            .copied()
            .collect();

        // References from garbage into surviving records are dropped normally.
        let mut pending = Vec::new();
        for &address in &garbage {
            for child in self.children(address)? {
                if !garbage.contains(&child) {
                    pending.push(child);
                }
            }
        }
        for &address in &garbage {
            log::trace!("sweep {} ({:?})", address, self.tag(address)?);
            self.live.remove(&address);
            self.alloc.deallocate(address.index())?;
        }
        self.drain(pending)?;

        log::debug!(
            "mark and sweep: {} reachable, {} released, {} words free",
            marked.len(),
            garbage.len(),
            self.free_words()
        );
        Ok(garbage.len())
    }

    /// True when no record is allocated any more.
    pub fn check_all_released(&self) -> bool {
        self.live.is_empty()
    }

    pub fn live_objects(&self) -> Vec<Address> {
        let mut objects: Vec<Address> = self.live.iter().copied().collect();
        objects.sort();
        objects
    }
}

/// Keeps a record pinned while alive; derefs to the heap so construction can
/// continue through it.
pub struct PinGuard<'a> {
    heap: &'a mut Heap,
    address: Address,
}

impl PinGuard<'_> {
    #[inline]
    pub fn address(&self) -> Address {
        self.address
    }
}

impl Deref for PinGuard<'_> {
    type Target = Heap;

    fn deref(&self) -> &Heap {
        &*self.heap
    }
}

impl DerefMut for PinGuard<'_> {
    fn deref_mut(&mut self) -> &mut Heap {
        &mut *self.heap
    }
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.heap.set_pinned(self.address, false) {
            log::warn!("unpin of {} failed: {}", self.address, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn heap() -> Heap {
        Heap::new(1 << 12).unwrap()
    }

    fn pair(heap: &mut Heap, a: Address, b: Address) -> Address {
        let node = heap.allocate_object(Tag::LinkedList, 0, 2).unwrap();
        heap.set_child(node, Tag::LinkedList, 0, a).unwrap();
        heap.set_child(node, Tag::LinkedList, 1, b).unwrap();
        node
    }

    #[test]
    fn test_allocate_object_layout() {
        let mut heap = heap();
        let obj = heap.allocate_object(Tag::Slice, 3, 1).unwrap();
        assert!(!obj.is_nil());
        assert_eq!(heap.tag(obj).unwrap(), Tag::Slice);
        assert_eq!(heap.num_fields(obj).unwrap(), 3);
        assert_eq!(heap.num_children(obj).unwrap(), 1);
        assert_eq!(heap.ref_count(obj).unwrap(), 1);
        assert_eq!(heap.field(obj, Tag::Slice, 2).unwrap(), 0);
        assert_eq!(heap.child(obj, Tag::Slice, 0).unwrap(), Address::NIL);

        heap.set_field(obj, Tag::Slice, 1, 42).unwrap();
        assert_eq!(heap.field(obj, Tag::Slice, 1).unwrap(), 42);
        heap.free(obj).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_accessors_are_checked() {
        let mut heap = heap();
        let obj = heap.allocate_object(Tag::Int32, 1, 0).unwrap();
        assert!(matches!(
            heap.field(obj, Tag::Int32, 1),
            Err(HeapError::FieldOutOfRange { index: 1, len: 1, .. })
        ));
        assert!(matches!(
            heap.child(obj, Tag::Int32, 0),
            Err(HeapError::ChildOutOfRange { .. })
        ));
        assert!(matches!(
            heap.field(obj, Tag::Bool, 0),
            Err(HeapError::WrongTag { expected: Tag::Bool, found: Tag::Int32, .. })
        ));
        heap.free(obj).unwrap();
        assert_eq!(heap.field(obj, Tag::Int32, 0), Err(HeapError::Released(obj)));
        assert_eq!(heap.free(obj), Err(HeapError::Released(obj)));
    }

    #[test]
    fn test_nil_is_inert() {
        let mut heap = heap();
        assert_eq!(heap.tag(Address::NIL).unwrap(), Tag::Nil);
        assert_eq!(heap.reference(Address::NIL).unwrap(), Address::NIL);
        heap.free(Address::NIL).unwrap();
        heap.set_pinned(Address::NIL, false).unwrap();
        assert!(heap.is_pinned(Address::NIL).unwrap());
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_free_releases_children_once_unshared() {
        let mut heap = heap();
        let leaf = heap.allocate_object(Tag::Int32, 1, 0).unwrap();
        let a = pair(&mut heap, leaf, Address::NIL);
        let b = pair(&mut heap, leaf, Address::NIL);
        heap.free(leaf).unwrap();
        assert_eq!(heap.ref_count(leaf).unwrap(), 2);

        heap.free(a).unwrap();
        assert!(heap.is_live(leaf));
        heap.free(b).unwrap();
        assert!(!heap.is_live(leaf));
        assert!(heap.check_all_released());
        assert_eq!(heap.free_words(), heap.capacity());
    }

    #[test]
    fn test_set_child_replaces_and_releases() {
        let mut heap = heap();
        let first = heap.allocate_object(Tag::Int32, 1, 0).unwrap();
        let second = heap.allocate_object(Tag::Int32, 1, 0).unwrap();
        let holder = heap.allocate_object(Tag::Variable, 0, 2).unwrap();
        heap.set_child_owned(holder, Tag::Variable, 1, first).unwrap();
        heap.set_child(holder, Tag::Variable, 1, second).unwrap();
        assert!(!heap.is_live(first));
        assert_eq!(heap.ref_count(second).unwrap(), 2);

        let taken = heap.take_child(holder, Tag::Variable, 1).unwrap();
        assert_eq!(taken, second);
        heap.free(taken).unwrap();
        heap.free(second).unwrap();
        heap.free(holder).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_double_free_is_reported() {
        let mut heap = heap();
        let obj = heap.allocate_object(Tag::Bool, 1, 0).unwrap();
        heap.set_pinned(obj, true).unwrap();
        heap.free(obj).unwrap();
        assert_eq!(heap.free(obj), Err(HeapError::DoubleFree(obj)));
        heap.set_pinned(obj, false).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_pinned_object_survives_zero_count() {
        let mut heap = heap();
        let leaf = heap.allocate_object(Tag::Int32, 1, 0).unwrap();
        let node = pair(&mut heap, leaf, Address::NIL);
        heap.free(leaf).unwrap();
        {
            let mut pinned = heap.pin(node).unwrap();
            pinned.free(node).unwrap();
            assert!(pinned.is_live(node));
            assert!(pinned.is_live(leaf));
        }
        assert!(!heap.is_live(node));
        assert!(heap.check_all_released());
        assert_eq!(
            heap.set_pinned(leaf, false),
            Err(HeapError::Released(leaf))
        );
    }

    #[test]
    fn test_unbalanced_unpin() {
        let mut heap = heap();
        let obj = heap.allocate_object(Tag::Bool, 1, 0).unwrap();
        assert_eq!(
            heap.set_pinned(obj, false),
            Err(HeapError::UnbalancedUnpin(obj))
        );
        heap.free(obj).unwrap();
    }

    #[test]
    fn test_pin_count_does_not_wrap() {
        let mut heap = heap();
        let obj = heap.allocate_object(Tag::Bool, 1, 0).unwrap();
        for _ in 0..MAX_PINS {
            heap.set_pinned(obj, true).unwrap();
        }
        assert_eq!(heap.set_pinned(obj, true), Err(HeapError::PinOverflow(obj)));
        assert!(heap.is_pinned(obj).unwrap());

        heap.free(obj).unwrap();
        for _ in 0..MAX_PINS {
            heap.set_pinned(obj, false).unwrap();
        }
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_copy_object_references_children() {
        let mut heap = heap();
        let leaf = heap.allocate_object(Tag::Int32, 1, 0).unwrap();
        let node = pair(&mut heap, leaf, leaf);
        heap.free(leaf).unwrap();
        let copy = heap.copy_object(node).unwrap();
        assert_eq!(heap.ref_count(leaf).unwrap(), 4);
        assert_eq!(heap.child(copy, Tag::LinkedList, 1).unwrap(), leaf);
        heap.free(node).unwrap();
        heap.free(copy).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_long_chain_release_is_iterative() {
        let mut heap = Heap::new(1 << 20).unwrap();
        let mut head = Address::NIL;
        for _ in 0..50_000 {
            let node = heap.allocate_object(Tag::LinkedList, 0, 2).unwrap();
            heap.set_child_owned(node, Tag::LinkedList, 1, head).unwrap();
            head = node;
        }
        heap.free(head).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_mark_and_sweep_releases_cycles_only() {
        let mut heap = heap();
        let shared = heap.allocate_object(Tag::Int32, 1, 0).unwrap();

        // a <-> b cycle that also points at a live record
        let a = pair(&mut heap, shared, Address::NIL);
        let b = pair(&mut heap, a, Address::NIL);
        heap.set_child(a, Tag::LinkedList, 1, b).unwrap();
        heap.free(a).unwrap();
        heap.free(b).unwrap();
        assert!(heap.is_live(a) && heap.is_live(b));

        let root = pair(&mut heap, shared, Address::NIL);
        let pinned = heap.allocate_object(Tag::Bool, 1, 0).unwrap();
        heap.set_pinned(pinned, true).unwrap();
        heap.free(pinned).unwrap();

        let released = heap.mark_and_sweep(&[root]).unwrap();
        assert_eq!(released, 2);
        assert!(!heap.is_live(a) && !heap.is_live(b));
        assert!(heap.is_live(root) && heap.is_live(pinned));
        assert_eq!(heap.ref_count(shared).unwrap(), 2);

        heap.set_pinned(pinned, false).unwrap();
        heap.free(root).unwrap();
        heap.free(shared).unwrap();
        assert!(heap.check_all_released());
        assert_eq!(heap.mark_and_sweep(&[]).unwrap(), 0);
    }
}
