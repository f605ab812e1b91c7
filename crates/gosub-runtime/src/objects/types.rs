//! Type descriptors and zero values.
//!
//! | tag            | fields  | children                       |
//! |----------------|---------|--------------------------------|
//! | scalar types   | -       | -                              |
//! | TypeArray      | len     | elem                           |
//! | TypeSlice      | -       | elem                           |
//! | TypeChannel    | -       | elem                           |
//! | TypePointer    | -       | elem                           |
//! | TypeStruct     | -       | name                           |
//! | TypeStructDecl | -       | name, first member entry       |
//!
//! Named struct types are resolved by looking up `STRUCT.<name>` in the
//! struct frame, where the loader keeps every declaration.

use gosub_heap::{Address, Heap, Tag};

use crate::env::{entry, frame};
use crate::error::{mismatch, RuntimeError, RuntimeResult};
use crate::objects::{array, primitive, slice, string, structs, sync, variable};

pub const ELEM: usize = 0;
pub const ARRAY_LEN: usize = 0;
pub const NAME: usize = 0;
pub const MEMBERS: usize = 1;

pub const STRUCT_PREFIX: &str = "STRUCT.";

/// Descriptor without payload: nil, bool, int32, float32, rune, string,
/// function, mutex, wait group, builtin.
pub fn simple(heap: &mut Heap, tag: Tag) -> RuntimeResult<Address> {
    if !tag.is_type() {
        return mismatch("type descriptor", tag);
    }
    Ok(heap.allocate_object(tag, 0, 0)?)
}

fn with_elem(heap: &mut Heap, tag: Tag, fields: usize, elem: Address) -> RuntimeResult<Address> {
    let ty = heap.allocate_object(tag, fields, 1)?;
    heap.set_child(ty, tag, ELEM, elem)?;
    Ok(ty)
}

pub fn array(heap: &mut Heap, elem: Address, len: usize) -> RuntimeResult<Address> {
    let ty = with_elem(heap, Tag::TypeArray, 1, elem)?;
    heap.set_field(ty, Tag::TypeArray, ARRAY_LEN, len as u64)?;
    Ok(ty)
}

pub fn slice(heap: &mut Heap, elem: Address) -> RuntimeResult<Address> {
    with_elem(heap, Tag::TypeSlice, 0, elem)
}

pub fn channel(heap: &mut Heap, elem: Address) -> RuntimeResult<Address> {
    with_elem(heap, Tag::TypeChannel, 0, elem)
}

pub fn pointer(heap: &mut Heap, elem: Address) -> RuntimeResult<Address> {
    with_elem(heap, Tag::TypePointer, 0, elem)
}

pub fn named_struct(heap: &mut Heap, name: &str) -> RuntimeResult<Address> {
    let key = string::create(heap, name)?;
    let ty = heap.allocate_object(Tag::TypeStruct, 0, 1);
    match ty {
        Ok(ty) => {
            heap.set_child_owned(ty, Tag::TypeStruct, NAME, key)?;
            Ok(ty)
        }
        Err(err) => {
            heap.free(key)?;
            Err(err.into())
        }
    }
}

/// `members` pairs a member name with its (borrowed) type, in declaration order.
pub fn struct_decl(heap: &mut Heap, name: &str, members: &[(&str, Address)]) -> RuntimeResult<Address> {
    let decl = heap.allocate_object(Tag::TypeStructDecl, 0, 2)?;
    let result = (|| -> RuntimeResult<()> {
        let key = string::create(heap, name)?;
        heap.set_child_owned(decl, Tag::TypeStructDecl, NAME, key)?;
        for (member, ty) in members.iter().rev() {
            let key = string::create(heap, member)?;
            let first = heap.child(decl, Tag::TypeStructDecl, MEMBERS)?;
            let link = entry::create(heap, key, *ty, first);
            heap.free(key)?;
            heap.set_child_owned(decl, Tag::TypeStructDecl, MEMBERS, link?)?;
        }
        Ok(())
    })();
    match result {
        Ok(()) => Ok(decl),
        Err(err) => {
            heap.free(decl)?;
            Err(err)
        }
    }
}

pub fn elem(heap: &Heap, ty: Address) -> RuntimeResult<Address> {
    match heap.tag(ty)? {
        tag @ (Tag::TypeArray | Tag::TypeSlice | Tag::TypeChannel | Tag::TypePointer) => {
            Ok(heap.child(ty, tag, ELEM)?)
        }
        other => mismatch("composite type", other),
    }
}

pub fn array_len(heap: &Heap, ty: Address) -> RuntimeResult<usize> {
    Ok(heap.field(ty, Tag::TypeArray, ARRAY_LEN)? as usize)
}

/// Name of a struct type or declaration.
pub fn struct_name(heap: &Heap, ty: Address) -> RuntimeResult<String> {
    match heap.tag(ty)? {
        tag @ (Tag::TypeStruct | Tag::TypeStructDecl) => {
            string::to_string(heap, heap.child(ty, tag, NAME)?)
        }
        other => mismatch("struct type", other),
    }
}

/// `(name, type)` pairs of a declaration in declaration order, borrowed.
pub fn decl_members(heap: &Heap, decl: Address) -> RuntimeResult<Vec<(Address, Address)>> {
    entry::pairs(heap, heap.child(decl, Tag::TypeStructDecl, MEMBERS)?)
}

/// Declaration registered for the struct type `ty`, borrowed.
pub fn resolve_struct(heap: &Heap, structs: Address, ty: Address) -> RuntimeResult<Address> {
    let name = struct_name(heap, ty)?;
    frame::lookup_str(heap, structs, &format!("{STRUCT_PREFIX}{name}"))?
        .ok_or(RuntimeError::Undefined(name))
}

/// Builds the zero value of `ty`. The result is owned by the caller.
pub fn zero_value(heap: &mut Heap, structs: Address, ty: Address) -> RuntimeResult<Address> {
    match heap.tag(ty)? {
        Tag::TypeBool => primitive::new_bool(heap, false),
        Tag::TypeInt32 => primitive::new_int32(heap, 0),
        Tag::TypeFloat32 => primitive::new_float32(heap, 0.0),
        Tag::TypeRune => primitive::new_rune(heap, '\0'),
        Tag::TypeString => string::create(heap, ""),
        Tag::TypeArray => {
            let elem = elem(heap, ty)?;
            let len = array_len(heap, ty)?;
            array::create_zeroed(heap, structs, elem, len)
        }
        Tag::TypeSlice => {
            let elem = elem(heap, ty)?;
            slice::create(heap, Address::NIL, elem, 0, 0, 0)
        }
        Tag::TypeStruct | Tag::TypeStructDecl => {
            let decl = match heap.tag(ty)? {
                Tag::TypeStructDecl => ty,
                _ => resolve_struct(heap, structs, ty)?,
            };
            structs::create_zeroed(heap, structs, decl)
        }
        Tag::TypeMutex => sync::mutex::create(heap),
        Tag::TypeWaitGroup => sync::wait_group::create(heap),
        Tag::Nil
        | Tag::TypeNil
        | Tag::TypeChannel
        | Tag::TypeFunction
        | Tag::TypePointer
        | Tag::TypeBuiltin => Ok(Address::NIL),
        other => mismatch("type descriptor", other),
    }
}

/// Fresh variable of type `ty` holding its zero value.
pub fn zero_variable(heap: &mut Heap, structs: Address, ty: Address) -> RuntimeResult<Address> {
    let zero = zero_value(heap, structs, ty)?;
    variable::create_owned(heap, ty, zero)
}

/// Go-style rendering, for diagnostics and snapshots.
pub fn describe(heap: &Heap, ty: Address) -> RuntimeResult<String> {
    Ok(match heap.tag(ty)? {
        Tag::Nil | Tag::TypeNil => "nil".to_string(),
        Tag::TypeBool => "bool".to_string(),
        Tag::TypeInt32 => "int32".to_string(),
        Tag::TypeFloat32 => "float32".to_string(),
        Tag::TypeRune => "rune".to_string(),
        Tag::TypeString => "string".to_string(),
        Tag::TypeFunction => "func".to_string(),
        Tag::TypeMutex => "mutex".to_string(),
        Tag::TypeWaitGroup => "waitgroup".to_string(),
        Tag::TypeBuiltin => "builtin".to_string(),
        Tag::TypeArray => format!("[{}]{}", array_len(heap, ty)?, describe(heap, elem(heap, ty)?)?),
        Tag::TypeSlice => format!("[]{}", describe(heap, elem(heap, ty)?)?),
        Tag::TypeChannel => format!("chan {}", describe(heap, elem(heap, ty)?)?),
        Tag::TypePointer => format!("*{}", describe(heap, elem(heap, ty)?)?),
        Tag::TypeStruct | Tag::TypeStructDecl => struct_name(heap, ty)?,
        other => return mismatch("type descriptor", other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{slice as slice_obj, structs as struct_obj};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_describe_nested_types() {
        let mut heap = Heap::new(1 << 12).unwrap();
        let int = simple(&mut heap, Tag::TypeInt32).unwrap();
        let arr = array(&mut heap, int, 3).unwrap();
        let sl = slice(&mut heap, arr).unwrap();
        let ch = channel(&mut heap, sl).unwrap();
        assert_eq!(describe(&heap, ch).unwrap(), "chan [][3]int32");
        assert!(simple(&mut heap, Tag::Int32).is_err());
        for ty in [int, arr, sl, ch] {
            heap.free(ty).unwrap();
        }
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_zero_values() {
        let mut heap = Heap::new(1 << 14).unwrap();
        let structs = frame::create(&mut heap, Address::NIL).unwrap();
        let int = simple(&mut heap, Tag::TypeInt32).unwrap();
        let string_ty = simple(&mut heap, Tag::TypeString).unwrap();
        let decl = struct_decl(&mut heap, "Point", &[("x", int), ("label", string_ty)]).unwrap();
        frame::insert_str(&mut heap, structs, "STRUCT.Point", decl).unwrap();
        heap.free(decl).unwrap();

        let point = named_struct(&mut heap, "Point").unwrap();
        let zero = zero_value(&mut heap, structs, point).unwrap();
        let x = struct_obj::member(&heap, zero, "x").unwrap();
        assert_eq!(primitive::to_int32(&heap, variable::value(&heap, x).unwrap()).unwrap(), 0);
        let label = struct_obj::member(&heap, zero, "label").unwrap();
        assert_eq!(string::to_string(&heap, variable::value(&heap, label).unwrap()).unwrap(), "");

        let ints = slice(&mut heap, int).unwrap();
        let empty = zero_value(&mut heap, structs, ints).unwrap();
        assert_eq!(slice_obj::len(&heap, empty).unwrap(), 0);
        assert!(slice_obj::is_nil_slice(&heap, empty).unwrap());

        let missing = named_struct(&mut heap, "Missing").unwrap();
        assert_eq!(
            zero_value(&mut heap, structs, missing),
            Err(RuntimeError::Undefined("Missing".to_string()))
        );

        for obj in [zero, empty, point, ints, missing, int, string_ty, structs] {
            heap.free(obj).unwrap();
        }
        assert!(heap.check_all_released());
    }
}
