//! Lexical environments.
//!
//! A frame is one scope: a parent link plus a singly linked list of entries.
//! Inserting prepends, so a later binding shadows an earlier one with the same
//! key. Lookup walks the entry list, then the parent chain.

use gosub_heap::{Address, Heap, Tag};

use crate::error::RuntimeResult;
use crate::objects::string;

/// Layout: child 0 = key (string), child 1 = value, child 2 = next entry.
pub mod entry {
    use super::*;

    pub const KEY: usize = 0;
    pub const VALUE: usize = 1;
    pub const NEXT: usize = 2;

    pub fn create(heap: &mut Heap, key: Address, value: Address, next: Address) -> RuntimeResult<Address> {
        let entry = heap.allocate_object(Tag::Entry, 0, 3)?;
        heap.set_child(entry, Tag::Entry, KEY, key)?;
        heap.set_child(entry, Tag::Entry, VALUE, value)?;
        heap.set_child(entry, Tag::Entry, NEXT, next)?;
        Ok(entry)
    }

    #[inline]
    pub fn key(heap: &Heap, entry: Address) -> RuntimeResult<Address> {
        Ok(heap.child(entry, Tag::Entry, KEY)?)
    }

    #[inline]
    pub fn value(heap: &Heap, entry: Address) -> RuntimeResult<Address> {
        Ok(heap.child(entry, Tag::Entry, VALUE)?)
    }

    #[inline]
    pub fn next(heap: &Heap, entry: Address) -> RuntimeResult<Address> {
        Ok(heap.child(entry, Tag::Entry, NEXT)?)
    }

    /// `(key, value)` pairs of a chain in chain order, borrowed.
    pub fn pairs(heap: &Heap, mut entry: Address) -> RuntimeResult<Vec<(Address, Address)>> {
        let mut out = Vec::new();
        while !entry.is_nil() {
            out.push((key(heap, entry)?, value(heap, entry)?));
            entry = next(heap, entry)?;
        }
        Ok(out)
    }
}

/// Layout: child 0 = parent frame, child 1 = first entry.
pub mod frame {
    use super::*;

    pub const PARENT: usize = 0;
    pub const ENTRIES: usize = 1;

    pub fn create(heap: &mut Heap, parent: Address) -> RuntimeResult<Address> {
        let frame = heap.allocate_object(Tag::Frame, 0, 2)?;
        heap.set_child(frame, Tag::Frame, PARENT, parent)?;
        Ok(frame)
    }

    #[inline]
    pub fn parent(heap: &Heap, frame: Address) -> RuntimeResult<Address> {
        Ok(heap.child(frame, Tag::Frame, PARENT)?)
    }

    /// Binds `key` to `value` in this frame, referencing both.
    pub fn insert(heap: &mut Heap, frame: Address, key: Address, value: Address) -> RuntimeResult<()> {
        let first = heap.child(frame, Tag::Frame, ENTRIES)?;
        let entry = entry::create(heap, key, value, first)?;
        heap.set_child_owned(frame, Tag::Frame, ENTRIES, entry)?;
        Ok(())
    }

    /// Like `insert`, with a key built from `name`; `value` is borrowed.
    pub fn insert_str(heap: &mut Heap, frame: Address, name: &str, value: Address) -> RuntimeResult<()> {
        let key = string::create(heap, name)?;
        let result = insert(heap, frame, key, value);
        heap.free(key)?;
        result
    }

    fn find_local(
        heap: &Heap,
        frame: Address,
        matches: &dyn Fn(&Heap, Address) -> RuntimeResult<bool>,
    ) -> RuntimeResult<Option<Address>> {
        let mut entry = heap.child(frame, Tag::Frame, ENTRIES)?;
        while !entry.is_nil() {
            if matches(heap, entry::key(heap, entry)?)? {
                return Ok(Some(entry::value(heap, entry)?));
            }
            entry = entry::next(heap, entry)?;
        }
        Ok(None)
    }

    fn find(
        heap: &Heap,
        mut frame: Address,
        matches: &dyn Fn(&Heap, Address) -> RuntimeResult<bool>,
    ) -> RuntimeResult<Option<Address>> {
        while !frame.is_nil() {
            if let Some(value) = find_local(heap, frame, matches)? {
                return Ok(Some(value));
            }
            frame = parent(heap, frame)?;
        }
        Ok(None)
    }

    /// Innermost binding of the string `name` along the chain, borrowed.
    pub fn lookup(heap: &Heap, frame: Address, name: Address) -> RuntimeResult<Option<Address>> {
        find(heap, frame, &|heap, key| string::equals(heap, key, name))
    }

    pub fn lookup_str(heap: &Heap, frame: Address, name: &str) -> RuntimeResult<Option<Address>> {
        find(heap, frame, &|heap, key| string::eq_str(heap, key, name))
    }

    /// Binding of `name` in this frame only.
    pub fn lookup_local_str(heap: &Heap, frame: Address, name: &str) -> RuntimeResult<Option<Address>> {
        find_local(heap, frame, &|heap, key| string::eq_str(heap, key, name))
    }

    /// Bindings of this frame in insertion order, borrowed.
    pub fn entries(heap: &Heap, frame: Address) -> RuntimeResult<Vec<(Address, Address)>> {
        let mut pairs = entry::pairs(heap, heap.child(frame, Tag::Frame, ENTRIES)?)?;
        pairs.reverse();
        Ok(pairs)
    }

    /// Frames from `frame` outwards.
    pub fn chain(heap: &Heap, mut frame: Address) -> RuntimeResult<Vec<Address>> {
        let mut frames = Vec::new();
        while !frame.is_nil() {
            frames.push(frame);
            frame = parent(heap, frame)?;
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::primitive;

    #[test]
    fn test_lookup_walks_parents_and_shadows() {
        let mut heap = Heap::new(1 << 12).unwrap();
        let global = frame::create(&mut heap, Address::NIL).unwrap();
        let one = primitive::new_int32(&mut heap, 1).unwrap();
        let two = primitive::new_int32(&mut heap, 2).unwrap();
        frame::insert_str(&mut heap, global, "x", one).unwrap();
        frame::insert_str(&mut heap, global, "y", one).unwrap();

        let inner = frame::create(&mut heap, global).unwrap();
        frame::insert_str(&mut heap, inner, "x", two).unwrap();
        assert_eq!(frame::lookup_str(&heap, inner, "x").unwrap(), Some(two));
        assert_eq!(frame::lookup_str(&heap, inner, "y").unwrap(), Some(one));
        assert_eq!(frame::lookup_str(&heap, global, "x").unwrap(), Some(one));
        assert_eq!(frame::lookup_local_str(&heap, inner, "y").unwrap(), None);
        assert_eq!(frame::lookup_str(&heap, inner, "z").unwrap(), None);

        let key = string::create(&mut heap, "x").unwrap();
        assert_eq!(frame::lookup(&heap, inner, key).unwrap(), Some(two));
        heap.free(key).unwrap();

        let names: Vec<String> = frame::entries(&heap, global)
            .unwrap()
            .into_iter()
            .map(|(k, _)| string::to_string(&heap, k).unwrap())
            .collect();
        assert_eq!(names, vec!["x", "y"]);
        assert_eq!(frame::chain(&heap, inner).unwrap(), vec![inner, global]);

        heap.free(one).unwrap();
        heap.free(two).unwrap();
        heap.free(global).unwrap();
        assert!(heap.is_live(global));
        heap.free(inner).unwrap();
        assert!(heap.check_all_released());
    }
}
