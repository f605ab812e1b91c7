//! Slices: a window onto a backing array.
//!
//! Layout: fields = len, cap, offset; children = backing array, element type.
//! The zero slice has a nil backing array and compares equal to nil.

use gosub_heap::{Address, Heap, Tag};

use crate::error::{mismatch, RuntimeError, RuntimeResult};
use crate::objects::{array, variable};

pub const FIELD_LEN: usize = 0;
pub const FIELD_CAP: usize = 1;
pub const FIELD_OFFSET: usize = 2;

pub const ARRAY: usize = 0;
pub const ELEM_TYPE: usize = 1;

/// Smallest backing array `append` allocates.
pub const MIN_GROW: usize = 4;

pub fn check(heap: &Heap, s: Address) -> RuntimeResult<()> {
    match heap.tag(s)? {
        Tag::Slice => Ok(()),
        other => mismatch("slice", other),
    }
}

/// References `array` and `elem`.
pub fn create(
    heap: &mut Heap,
    array: Address,
    elem: Address,
    offset: usize,
    len: usize,
    cap: usize,
) -> RuntimeResult<Address> {
    let s = heap.allocate_object(Tag::Slice, 3, 2)?;
    heap.set_field(s, Tag::Slice, FIELD_LEN, len as u64)?;
    heap.set_field(s, Tag::Slice, FIELD_CAP, cap as u64)?;
    heap.set_field(s, Tag::Slice, FIELD_OFFSET, offset as u64)?;
    heap.set_child(s, Tag::Slice, ARRAY, array)?;
    heap.set_child(s, Tag::Slice, ELEM_TYPE, elem)?;
    Ok(s)
}

/// `make([]T, len, cap)`.
pub fn make(heap: &mut Heap, structs: Address, elem: Address, len: i64, cap: i64) -> RuntimeResult<Address> {
    if len < 0 {
        return Err(RuntimeError::MakeSliceLen);
    }
    if cap < len {
        return Err(RuntimeError::MakeSliceCap);
    }
    let backing = array::create_zeroed(heap, structs, elem, cap as usize)?;
    let s = create(heap, backing, elem, 0, len as usize, cap as usize);
    heap.free(backing)?;
    s
}

#[inline]
pub fn len(heap: &Heap, s: Address) -> RuntimeResult<usize> {
    check(heap, s)?;
    Ok(heap.field(s, Tag::Slice, FIELD_LEN)? as usize)
}

#[inline]
pub fn cap(heap: &Heap, s: Address) -> RuntimeResult<usize> {
    check(heap, s)?;
    Ok(heap.field(s, Tag::Slice, FIELD_CAP)? as usize)
}

#[inline]
pub fn offset(heap: &Heap, s: Address) -> RuntimeResult<usize> {
    check(heap, s)?;
    Ok(heap.field(s, Tag::Slice, FIELD_OFFSET)? as usize)
}

#[inline]
pub fn backing(heap: &Heap, s: Address) -> RuntimeResult<Address> {
    check(heap, s)?;
    Ok(heap.child(s, Tag::Slice, ARRAY)?)
}

#[inline]
pub fn elem_type(heap: &Heap, s: Address) -> RuntimeResult<Address> {
    check(heap, s)?;
    Ok(heap.child(s, Tag::Slice, ELEM_TYPE)?)
}

pub fn is_nil_slice(heap: &Heap, s: Address) -> RuntimeResult<bool> {
    Ok(backing(heap, s)?.is_nil())
}

/// Element variable at `index`, borrowed.
pub fn element(heap: &Heap, s: Address, index: i64) -> RuntimeResult<Address> {
    let len = len(heap, s)?;
    if index < 0 || index as usize >= len {
        return Err(RuntimeError::IndexOutOfRange { index, len });
    }
    array::element(heap, backing(heap, s)?, (offset(heap, s)? + index as usize) as i64)
}

/// Values in the window, borrowed.
pub fn values(heap: &Heap, s: Address) -> RuntimeResult<Vec<Address>> {
    (0..len(heap, s)? as i64)
        .map(|i| variable::value(heap, element(heap, s, i)?))
        .collect()
}

fn check_bounds(low: i64, high: i64, cap: usize) -> RuntimeResult<()> {
    if high < 0 || high as usize > cap {
        return Err(RuntimeError::SliceBounds { high, cap });
    }
    if low < 0 || low > high {
        return Err(RuntimeError::InvalidSliceIndices { low, high });
    }
    Ok(())
}

/// `s[low:high]`; the result shares the backing array.
pub fn reslice(heap: &mut Heap, s: Address, low: i64, high: i64) -> RuntimeResult<Address> {
    let cap = cap(heap, s)?;
    check_bounds(low, high, cap)?;
    let (low, high) = (low as usize, high as usize);
    let backing = backing(heap, s)?;
    let elem = elem_type(heap, s)?;
    let offset = offset(heap, s)?;
    create(heap, backing, elem, offset + low, high - low, cap - low)
}

/// `arr[low:high]`.
pub fn of_array(heap: &mut Heap, arr: Address, low: i64, high: i64) -> RuntimeResult<Address> {
    let len = array::len(heap, arr)?;
    check_bounds(low, high, len)?;
    let elem = match len {
        0 => Address::NIL,
        _ => variable::ty(heap, heap.child(arr, Tag::Array, 0)?)?,
    };
    create(heap, arr, elem, low as usize, (high - low) as usize, len - low as usize)
}

/// Appends borrowed `values`. Writes through to the backing array while
/// capacity allows, so earlier slices over it observe the new elements;
/// otherwise copies into a fresh array of `max(2 * cap, len + n, 4)`.
pub fn append(heap: &mut Heap, structs: Address, s: Address, values: &[Address]) -> RuntimeResult<Address> {
    if s.is_nil() {
        let empty = create(heap, Address::NIL, Address::NIL, 0, 0, 0)?;
        let appended = append(heap, structs, empty, values);
        heap.free(empty)?;
        return appended;
    }
    let len = len(heap, s)?;
    let cap = cap(heap, s)?;
    let elem = elem_type(heap, s)?;
    let needed = len + values.len();

    if needed <= cap {
        for (i, &value) in values.iter().enumerate() {
            let slot = element_unchecked(heap, s, len + i)?;
            variable::set_value(heap, slot, value)?;
        }
        let backing = backing(heap, s)?;
        let offset = offset(heap, s)?;
        return create(heap, backing, elem, offset, needed, cap);
    }

    let new_cap = (2 * cap).max(needed).max(MIN_GROW);
    log::trace!("append grows slice {} from cap {} to {}", s, cap, new_cap);
    let grown = array::create_zeroed(heap, structs, elem, new_cap)?;
    let result = (|| -> RuntimeResult<Address> {
        let old = self::values(heap, s)?;
        for (i, &value) in old.iter().chain(values).enumerate() {
            let slot = array::element(heap, grown, i as i64)?;
            variable::set_value(heap, slot, value)?;
        }
        create(heap, grown, elem, 0, needed, new_cap)
    })();
    heap.free(grown)?;
    result
}

/// Element within capacity but possibly beyond length.
fn element_unchecked(heap: &Heap, s: Address, index: usize) -> RuntimeResult<Address> {
    array::element(heap, backing(heap, s)?, (offset(heap, s)? + index) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{primitive, types};
    use pretty_assertions::assert_eq;

    fn ints(heap: &Heap, s: Address) -> Vec<i32> {
        values(heap, s)
            .unwrap()
            .into_iter()
            .map(|v| primitive::to_int32(heap, v).unwrap())
            .collect()
    }

    #[test]
    fn test_append_within_capacity_aliases() {
        let mut heap = Heap::new(1 << 14).unwrap();
        let int = types::simple(&mut heap, Tag::TypeInt32).unwrap();
        let s = make(&mut heap, Address::NIL, int, 3, 5).unwrap();
        let nine = primitive::new_int32(&mut heap, 9).unwrap();

        let t = append(&mut heap, Address::NIL, s, &[nine]).unwrap();
        assert_eq!((len(&heap, t).unwrap(), cap(&heap, t).unwrap()), (4, 5));
        assert_eq!((len(&heap, s).unwrap(), cap(&heap, s).unwrap()), (3, 5));
        assert_eq!(backing(&heap, s).unwrap(), backing(&heap, t).unwrap());
        assert_eq!(ints(&heap, s), vec![0, 0, 0]);
        assert_eq!(ints(&heap, t), vec![0, 0, 0, 9]);

        // the original can see the write once resliced up to its capacity
        let wide = reslice(&mut heap, s, 0, 4).unwrap();
        assert_eq!(ints(&heap, wide), vec![0, 0, 0, 9]);

        for obj in [s, t, wide, nine, int] {
            heap.free(obj).unwrap();
        }
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_append_beyond_capacity_copies() {
        let mut heap = Heap::new(1 << 14).unwrap();
        let int = types::simple(&mut heap, Tag::TypeInt32).unwrap();
        let s = make(&mut heap, Address::NIL, int, 2, 2).unwrap();
        let one = primitive::new_int32(&mut heap, 1).unwrap();

        let t = append(&mut heap, Address::NIL, s, &[one]).unwrap();
        assert_eq!((len(&heap, t).unwrap(), cap(&heap, t).unwrap()), (3, 4));
        assert_ne!(backing(&heap, s).unwrap(), backing(&heap, t).unwrap());

        let first = element(&heap, t, 0).unwrap();
        variable::set_value(&mut heap, first, one).unwrap();
        assert_eq!(ints(&heap, s), vec![0, 0]);
        assert_eq!(ints(&heap, t), vec![1, 0, 1]);

        for obj in [s, t, one, int] {
            heap.free(obj).unwrap();
        }
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_append_to_nil_slice_and_bounds() {
        let mut heap = Heap::new(1 << 14).unwrap();
        let int = types::simple(&mut heap, Tag::TypeInt32).unwrap();
        let empty = create(&mut heap, Address::NIL, int, 0, 0, 0).unwrap();
        let one = primitive::new_int32(&mut heap, 1).unwrap();
        let t = append(&mut heap, Address::NIL, empty, &[one, one]).unwrap();
        assert_eq!((len(&heap, t).unwrap(), cap(&heap, t).unwrap()), (2, 4));

        assert_eq!(
            reslice(&mut heap, t, 0, 5),
            Err(RuntimeError::SliceBounds { high: 5, cap: 4 })
        );
        assert_eq!(
            reslice(&mut heap, t, 3, 2),
            Err(RuntimeError::InvalidSliceIndices { low: 3, high: 2 })
        );
        assert!(element(&heap, t, 2).is_err());
        assert_eq!(make(&mut heap, Address::NIL, int, 3, 2), Err(RuntimeError::MakeSliceCap));

        for obj in [empty, t, one, int] {
            heap.free(obj).unwrap();
        }
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_append_to_untyped_nil() {
        let mut heap = Heap::new(1 << 14).unwrap();
        let seven = primitive::new_int32(&mut heap, 7).unwrap();
        let t = append(&mut heap, Address::NIL, Address::NIL, &[seven]).unwrap();
        assert_eq!((len(&heap, t).unwrap(), cap(&heap, t).unwrap()), (1, 4));
        assert_eq!(ints(&heap, t), vec![7]);

        let none = append(&mut heap, Address::NIL, Address::NIL, &[]).unwrap();
        assert_eq!((len(&heap, none).unwrap(), cap(&heap, none).unwrap()), (0, 0));

        for obj in [t, none, seven] {
            heap.free(obj).unwrap();
        }
        assert!(heap.check_all_released());
    }
}
