//! Fixed-length arrays. Children are the element variables, so an element
//! can be addressed and assigned in place.

use gosub_heap::{Address, Heap, Tag};

use crate::error::{mismatch, RuntimeError, RuntimeResult};
use crate::objects::{types, variable};

pub fn check(heap: &Heap, arr: Address) -> RuntimeResult<()> {
    match heap.tag(arr)? {
        Tag::Array => Ok(()),
        other => mismatch("array", other),
    }
}

/// `len` variables of type `elem`, each holding the zero value.
pub fn create_zeroed(heap: &mut Heap, structs: Address, elem: Address, len: usize) -> RuntimeResult<Address> {
    let arr = heap.allocate_object(Tag::Array, 0, len)?;
    for i in 0..len {
        match types::zero_variable(heap, structs, elem) {
            Ok(var) => heap.set_child_owned(arr, Tag::Array, i, var)?,
            Err(err) => {
                heap.free(arr)?;
                return Err(err);
            }
        }
    }
    Ok(arr)
}

/// One fresh variable per (borrowed) value.
pub fn from_values(heap: &mut Heap, elem: Address, values: &[Address]) -> RuntimeResult<Address> {
    let arr = heap.allocate_object(Tag::Array, 0, values.len())?;
    for (i, &value) in values.iter().enumerate() {
        match variable::create(heap, elem, value) {
            Ok(var) => heap.set_child_owned(arr, Tag::Array, i, var)?,
            Err(err) => {
                heap.free(arr)?;
                return Err(err);
            }
        }
    }
    Ok(arr)
}

pub fn len(heap: &Heap, arr: Address) -> RuntimeResult<usize> {
    check(heap, arr)?;
    Ok(heap.num_children(arr)?)
}

/// Element variable at `index`, borrowed.
pub fn element(heap: &Heap, arr: Address, index: i64) -> RuntimeResult<Address> {
    let len = len(heap, arr)?;
    if index < 0 || index as usize >= len {
        return Err(RuntimeError::IndexOutOfRange { index, len });
    }
    Ok(heap.child(arr, Tag::Array, index as usize)?)
}

/// Current element values, borrowed.
pub fn values(heap: &Heap, arr: Address) -> RuntimeResult<Vec<Address>> {
    check(heap, arr)?;
    heap.children(arr)?
        .into_iter()
        .map(|var| variable::value(heap, var))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::primitive;

    #[test]
    fn test_elements_are_bounds_checked_variables() {
        let mut heap = Heap::new(1 << 12).unwrap();
        let int = types::simple(&mut heap, Tag::TypeInt32).unwrap();
        let arr = create_zeroed(&mut heap, Address::NIL, int, 3).unwrap();
        assert_eq!(len(&heap, arr).unwrap(), 3);

        let seven = primitive::new_int32(&mut heap, 7).unwrap();
        let slot = element(&heap, arr, 2).unwrap();
        variable::set_value_owned(&mut heap, slot, seven).unwrap();
        let ints: Vec<i32> = values(&heap, arr)
            .unwrap()
            .into_iter()
            .map(|v| primitive::to_int32(&heap, v).unwrap())
            .collect();
        assert_eq!(ints, vec![0, 0, 7]);

        assert_eq!(
            element(&heap, arr, 3),
            Err(RuntimeError::IndexOutOfRange { index: 3, len: 3 })
        );
        assert!(element(&heap, arr, -1).is_err());
        heap.free(arr).unwrap();
        heap.free(int).unwrap();
        assert!(heap.check_all_released());
    }
}
