//! Scalar values. One field each, no children.
//!
//! - bool:    field 0 = 0 / 1
//! - int32:   field 0 = sign-extended value
//! - float32: field 0 = IEEE bit pattern
//! - rune:    field 0 = code point

use gosub_heap::{Address, Heap, Tag};

use crate::error::{mismatch, RuntimeResult};

pub const VALUE: usize = 0;

#[inline]
pub fn nil() -> Address {
    Address::NIL
}

fn create(heap: &mut Heap, tag: Tag, raw: u64) -> RuntimeResult<Address> {
    let addr = heap.allocate_object(tag, 1, 0)?;
    heap.set_field(addr, tag, VALUE, raw)?;
    Ok(addr)
}

pub fn new_bool(heap: &mut Heap, value: bool) -> RuntimeResult<Address> {
    create(heap, Tag::Bool, value as u64)
}

pub fn new_int32(heap: &mut Heap, value: i32) -> RuntimeResult<Address> {
    create(heap, Tag::Int32, value as i64 as u64)
}

pub fn new_float32(heap: &mut Heap, value: f32) -> RuntimeResult<Address> {
    create(heap, Tag::Float32, value.to_bits() as u64)
}

pub fn new_rune(heap: &mut Heap, value: char) -> RuntimeResult<Address> {
    create(heap, Tag::Rune, value as u64)
}

pub fn to_bool(heap: &Heap, addr: Address) -> RuntimeResult<bool> {
    match heap.tag(addr)? {
        Tag::Bool => Ok(heap.field(addr, Tag::Bool, VALUE)? != 0),
        other => mismatch("bool", other),
    }
}

pub fn to_int32(heap: &Heap, addr: Address) -> RuntimeResult<i32> {
    match heap.tag(addr)? {
        Tag::Int32 => Ok(heap.field(addr, Tag::Int32, VALUE)? as i64 as i32),
        Tag::Rune => Ok(heap.field(addr, Tag::Rune, VALUE)? as i32),
        other => mismatch("int32", other),
    }
}

pub fn to_float32(heap: &Heap, addr: Address) -> RuntimeResult<f32> {
    match heap.tag(addr)? {
        Tag::Float32 => Ok(f32::from_bits(heap.field(addr, Tag::Float32, VALUE)? as u32)),
        other => mismatch("float32", other),
    }
}

pub fn to_rune(heap: &Heap, addr: Address) -> RuntimeResult<char> {
    match heap.tag(addr)? {
        Tag::Rune => {
            let raw = heap.field(addr, Tag::Rune, VALUE)? as u32;
            Ok(char::from_u32(raw).unwrap_or(char::REPLACEMENT_CHARACTER))
        }
        other => mismatch("rune", other),
    }
}
