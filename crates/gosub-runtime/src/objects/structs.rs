//! Struct values: a parentless frame of member variables plus the declaration
//! they were built from.
//!
//! Layout: child 0 = member frame, child 1 = declaration.

use gosub_heap::{Address, Heap, Tag};

use crate::env::frame;
use crate::error::{mismatch, RuntimeError, RuntimeResult};
use crate::objects::{string, types};

pub const MEMBERS: usize = 0;
pub const DECL: usize = 1;

pub fn check(heap: &Heap, s: Address) -> RuntimeResult<()> {
    match heap.tag(s)? {
        Tag::Struct => Ok(()),
        other => mismatch("struct", other),
    }
}

/// Every member set to the zero value of its declared type.
pub fn create_zeroed(heap: &mut Heap, structs: Address, decl: Address) -> RuntimeResult<Address> {
    let s = heap.allocate_object(Tag::Struct, 0, 2)?;
    let result = (|| -> RuntimeResult<()> {
        heap.set_child(s, Tag::Struct, DECL, decl)?;
        let members = frame::create(heap, Address::NIL)?;
        heap.set_child_owned(s, Tag::Struct, MEMBERS, members)?;
        for (name, ty) in types::decl_members(heap, decl)? {
            let var = types::zero_variable(heap, structs, ty)?;
            let inserted = frame::insert(heap, members, name, var);
            heap.free(var)?;
            inserted?;
        }
        Ok(())
    })();
    match result {
        Ok(()) => Ok(s),
        Err(err) => {
            heap.free(s)?;
            Err(err)
        }
    }
}

#[inline]
pub fn decl(heap: &Heap, s: Address) -> RuntimeResult<Address> {
    check(heap, s)?;
    Ok(heap.child(s, Tag::Struct, DECL)?)
}

pub fn type_name(heap: &Heap, s: Address) -> RuntimeResult<String> {
    types::struct_name(heap, decl(heap, s)?)
}

/// Member variable called `name`, borrowed.
pub fn member(heap: &Heap, s: Address, name: &str) -> RuntimeResult<Address> {
    check(heap, s)?;
    let members = heap.child(s, Tag::Struct, MEMBERS)?;
    frame::lookup_local_str(heap, members, name)?.ok_or_else(|| RuntimeError::NoMember {
        owner: type_name(heap, s).unwrap_or_else(|_| "struct".to_string()),
        name: name.to_string(),
    })
}

/// Like `member`, with the name given as a string record.
pub fn member_by_key(heap: &Heap, s: Address, key: Address) -> RuntimeResult<Address> {
    let name = string::to_string(heap, key)?;
    member(heap, s, &name)
}

/// `(name, variable)` pairs in declaration order, borrowed.
pub fn members(heap: &Heap, s: Address) -> RuntimeResult<Vec<(Address, Address)>> {
    check(heap, s)?;
    frame::entries(heap, heap.child(s, Tag::Struct, MEMBERS)?)
}
