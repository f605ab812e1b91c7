//! Immutable strings.
//!
//! Layout: field 0 = FNV-1a hash of the code points, children = one rune
//! record per code point. Substrings and concatenations share rune records.

use gosub_heap::{Address, Heap, Tag};

use crate::error::{mismatch, RuntimeError, RuntimeResult};
use crate::objects::primitive;

pub const HASH: usize = 0;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

fn hash_chars(chars: impl IntoIterator<Item = char>) -> u64 {
    chars.into_iter().fold(FNV_OFFSET, |hash, c| {
        (hash ^ c as u64).wrapping_mul(FNV_PRIME)
    })
}

fn check(heap: &Heap, s: Address) -> RuntimeResult<()> {
    match heap.tag(s)? {
        Tag::String => Ok(()),
        other => mismatch("string", other),
    }
}

pub fn create(heap: &mut Heap, text: &str) -> RuntimeResult<Address> {
    let len = text.chars().count();
    let s = heap.allocate_object(Tag::String, 1, len)?;
    heap.set_field(s, Tag::String, HASH, hash_chars(text.chars()))?;
    for (i, c) in text.chars().enumerate() {
        let rune = match primitive::new_rune(heap, c) {
            Ok(rune) => rune,
            Err(err) => {
                heap.free(s)?;
                return Err(err);
            }
        };
        heap.set_child_owned(s, Tag::String, i, rune)?;
    }
    Ok(s)
}

/// Builds a string from existing rune records, referencing each.
fn from_runes(heap: &mut Heap, runes: &[Address]) -> RuntimeResult<Address> {
    let mut chars = Vec::with_capacity(runes.len());
    for &rune in runes {
        chars.push(primitive::to_rune(heap, rune)?);
    }
    let s = heap.allocate_object(Tag::String, 1, runes.len())?;
    heap.set_field(s, Tag::String, HASH, hash_chars(chars))?;
    for (i, &rune) in runes.iter().enumerate() {
        heap.set_child(s, Tag::String, i, rune)?;
    }
    Ok(s)
}

pub fn len(heap: &Heap, s: Address) -> RuntimeResult<usize> {
    check(heap, s)?;
    Ok(heap.num_children(s)?)
}

pub fn hash(heap: &Heap, s: Address) -> RuntimeResult<u64> {
    check(heap, s)?;
    Ok(heap.field(s, Tag::String, HASH)?)
}

/// Borrowed rune record at `index`.
pub fn rune_at(heap: &Heap, s: Address, index: i64) -> RuntimeResult<Address> {
    let len = len(heap, s)?;
    if index < 0 || index as usize >= len {
        return Err(RuntimeError::IndexOutOfRange { index, len });
    }
    Ok(heap.child(s, Tag::String, index as usize)?)
}

pub fn to_string(heap: &Heap, s: Address) -> RuntimeResult<String> {
    check(heap, s)?;
    let mut out = String::with_capacity(heap.num_children(s)?);
    for rune in heap.children(s)? {
        out.push(primitive::to_rune(heap, rune)?);
    }
    Ok(out)
}

/// Hash first, then code point by code point.
pub fn equals(heap: &Heap, a: Address, b: Address) -> RuntimeResult<bool> {
    if a == b {
        return Ok(true);
    }
    if hash(heap, a)? != hash(heap, b)? || len(heap, a)? != len(heap, b)? {
        return Ok(false);
    }
    for (ra, rb) in heap.children(a)?.into_iter().zip(heap.children(b)?) {
        if primitive::to_rune(heap, ra)? != primitive::to_rune(heap, rb)? {
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn eq_str(heap: &Heap, s: Address, text: &str) -> RuntimeResult<bool> {
    if hash(heap, s)? != hash_chars(text.chars()) || len(heap, s)? != text.chars().count() {
        return Ok(false);
    }
    for (rune, c) in heap.children(s)?.into_iter().zip(text.chars()) {
        if primitive::to_rune(heap, rune)? != c {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Lexicographic comparison by code point.
pub fn compare(heap: &Heap, a: Address, b: Address) -> RuntimeResult<std::cmp::Ordering> {
    Ok(to_string(heap, a)?.cmp(&to_string(heap, b)?))
}

pub fn concat(heap: &mut Heap, a: Address, b: Address) -> RuntimeResult<Address> {
    check(heap, a)?;
    check(heap, b)?;
    let mut runes = heap.children(a)?;
    runes.extend(heap.children(b)?);
    from_runes(heap, &runes)
}

pub fn substring(heap: &mut Heap, s: Address, low: i64, high: i64) -> RuntimeResult<Address> {
    let len = len(heap, s)?;
    if high < 0 || high as usize > len {
        return Err(RuntimeError::SliceBounds { high, cap: len });
    }
    if low < 0 || low > high {
        return Err(RuntimeError::InvalidSliceIndices { low, high });
    }
    let runes = heap.children(s)?;
    from_runes(heap, &runes[low as usize..high as usize])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_and_read_back() {
        let mut heap = Heap::new(1024).unwrap();
        let s = create(&mut heap, "héllo").unwrap();
        assert_eq!(len(&heap, s).unwrap(), 5);
        assert_eq!(to_string(&heap, s).unwrap(), "héllo");
        let e = rune_at(&heap, s, 1).unwrap();
        assert_eq!(primitive::to_rune(&heap, e).unwrap(), 'é');
        assert!(rune_at(&heap, s, 5).is_err());
        heap.free(s).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_equality_and_hash() {
        let mut heap = Heap::new(1024).unwrap();
        let a = create(&mut heap, "go").unwrap();
        let b = create(&mut heap, "go").unwrap();
        let c = create(&mut heap, "og").unwrap();
        assert_eq!(hash(&heap, a).unwrap(), hash(&heap, b).unwrap());
        assert!(equals(&heap, a, b).unwrap());
        assert!(!equals(&heap, a, c).unwrap());
        assert!(eq_str(&heap, c, "og").unwrap());
        assert!(!eq_str(&heap, c, "o").unwrap());
        for s in [a, b, c] {
            heap.free(s).unwrap();
        }
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_concat_and_substring_share_runes() {
        let mut heap = Heap::new(1024).unwrap();
        let a = create(&mut heap, "ab").unwrap();
        let b = create(&mut heap, "cd").unwrap();
        let ab = concat(&mut heap, a, b).unwrap();
        assert!(eq_str(&heap, ab, "abcd").unwrap());
        heap.free(a).unwrap();
        heap.free(b).unwrap();

        let mid = substring(&mut heap, ab, 1, 3).unwrap();
        assert_eq!(to_string(&heap, mid).unwrap(), "bc");
        assert!(substring(&mut heap, ab, 3, 1).is_err());
        assert!(substring(&mut heap, ab, 0, 5).is_err());
        heap.free(ab).unwrap();
        heap.free(mid).unwrap();
        assert!(heap.check_all_released());
    }
}
