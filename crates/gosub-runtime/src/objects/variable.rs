//! Typed variables: the mutable cells frames, arrays and structs bind to.
//!
//! Layout: child 0 = type descriptor, child 1 = current value.

use gosub_heap::{Address, Heap, Tag};

use crate::error::{mismatch, RuntimeResult};

pub const TYPE: usize = 0;
pub const VALUE: usize = 1;

/// References both `ty` and `value`.
pub fn create(heap: &mut Heap, ty: Address, value: Address) -> RuntimeResult<Address> {
    let var = heap.allocate_object(Tag::Variable, 0, 2)?;
    heap.set_child(var, Tag::Variable, TYPE, ty)?;
    heap.set_child(var, Tag::Variable, VALUE, value)?;
    Ok(var)
}

/// Moves the caller's reference to `value` into the new variable.
pub fn create_owned(heap: &mut Heap, ty: Address, value: Address) -> RuntimeResult<Address> {
    let var = create(heap, ty, value);
    heap.free(value)?;
    var
}

pub fn check(heap: &Heap, var: Address) -> RuntimeResult<()> {
    match heap.tag(var)? {
        Tag::Variable => Ok(()),
        other => mismatch("variable", other),
    }
}

#[inline]
pub fn ty(heap: &Heap, var: Address) -> RuntimeResult<Address> {
    check(heap, var)?;
    Ok(heap.child(var, Tag::Variable, TYPE)?)
}

#[inline]
pub fn value(heap: &Heap, var: Address) -> RuntimeResult<Address> {
    check(heap, var)?;
    Ok(heap.child(var, Tag::Variable, VALUE)?)
}

pub fn set_value(heap: &mut Heap, var: Address, value: Address) -> RuntimeResult<()> {
    check(heap, var)?;
    Ok(heap.set_child(var, Tag::Variable, VALUE, value)?)
}

pub fn set_value_owned(heap: &mut Heap, var: Address, value: Address) -> RuntimeResult<()> {
    if let Err(err) = check(heap, var) {
        heap.free(value)?;
        return Err(err);
    }
    Ok(heap.set_child_owned(var, Tag::Variable, VALUE, value)?)
}
