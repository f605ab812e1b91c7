//! Composite data: members, methods, indexing, slicing, construction and
//! pointers.
//!
//! Arrays, slices and structs are records shared by reference, so an element
//! or member variable reached through any alias is the same cell.

use gosub_heap::{Address, Heap, Tag};
use gosub_runtime::env::frame;
use gosub_runtime::objects::function::{bound_method, builtin, pointer};
use gosub_runtime::objects::types::{self, STRUCT_PREFIX};
use gosub_runtime::objects::{array, channel, primitive, slice, string, structs, variable};
use gosub_runtime::{auto_cast, Object, RuntimeError};

use super::{Cx, MicrocodeTable};
use crate::error::VmResult;
use crate::loader::METHOD_PREFIX;

pub(super) fn register(table: &mut MicrocodeTable) {
    table.sequential(Tag::Member, member);
    table.sequential(Tag::MemberI, member_i);
    table.sequential(Tag::MemberAddress, member_address);
    table.sequential(Tag::MemberAddressI, member_address_i);
    table.sequential(Tag::MethodMember, method_member);
    table.sequential(Tag::MethodMemberI, method_member_i);
    table.sequential(Tag::Index, index);
    table.sequential(Tag::IndexI, index_i);
    table.sequential(Tag::IndexAddress, index_address);
    table.sequential(Tag::IndexAddressI, index_address_i);
    table.sequential(Tag::SliceExpr, slice_expr);
    table.sequential(Tag::SliceExprI, slice_expr_i);
    table.sequential(Tag::Make, make);
    table.sequential(Tag::MakeI, make_i);
    table.sequential(Tag::Zero, zero);
    table.sequential(Tag::Constructor, constructor);
    table.sequential(Tag::ConstructorI, constructor_i);
    table.sequential(Tag::StructLiteral, struct_literal);
    table.sequential(Tag::StructLiteralI, struct_literal_i);
    table.sequential(Tag::AddressOf, address_of);
    table.sequential(Tag::AddressOfI, address_of_i);
    table.sequential(Tag::Deref, deref_expr);
    table.sequential(Tag::DerefI, deref_i);
    table.sequential(Tag::DerefAddress, deref_address);
    table.sequential(Tag::DerefAddressI, deref_address_i);
}

/// Follows pointers and variables down to the value they hold, borrowed.
pub(crate) fn deref(heap: &Heap, value: Address) -> VmResult<Address> {
    let mut current = value;
    loop {
        current = match heap.tag(current)? {
            Tag::Pointer => pointer::target(heap, current)?,
            Tag::Variable => variable::value(heap, current)?,
            _ => return Ok(current),
        };
    }
}

/// Re-pushes an operand-taking node as its continuation carrying `carried`,
/// then schedules the operands.
fn reduce(cx: &mut Cx<'_>, cont: Tag, fields: &[u64], carried: &[Address], operands: &[Address]) -> VmResult<()> {
    cx.push_shared(cont, fields, carried)?;
    cx.push_in_order(operands)
}

// =============================================================================
// Members and methods
// =============================================================================

fn member(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let object = cx.child(node, Tag::Member, 0)?;
    let name = cx.child(node, Tag::Member, 1)?;
    reduce(cx, Tag::MemberI, &[], &[name], &[object])
}

fn member_address(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let object = cx.child(node, Tag::MemberAddress, 0)?;
    let name = cx.child(node, Tag::MemberAddress, 1)?;
    reduce(cx, Tag::MemberAddressI, &[], &[name], &[object])
}

/// Member variable of the struct behind `object`, borrowed.
fn member_variable(heap: &Heap, node: Address, tag: Tag, object: Address) -> VmResult<Address> {
    let s = deref(heap, object)?;
    if s.is_nil() {
        return Err(RuntimeError::NilDereference.into());
    }
    let key = heap.child(node, tag, 0)?;
    Ok(structs::member_by_key(heap, s, key)?)
}

fn member_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let object = cx.pop_value()?;
    let found = member_variable(cx.heap, node, Tag::MemberI, object)
        .and_then(|var| Ok(variable::value(cx.heap, var)?));
    let pushed = found.and_then(|value| cx.push_value(value));
    cx.heap.free(object)?;
    pushed
}

fn member_address_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let object = cx.pop_value()?;
    let found = member_variable(cx.heap, node, Tag::MemberAddressI, object);
    let pushed = found.and_then(|var| cx.push_value(var));
    cx.heap.free(object)?;
    pushed
}

fn method_member(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let object = cx.child(node, Tag::MethodMember, 0)?;
    let name = cx.child(node, Tag::MethodMember, 1)?;
    reduce(cx, Tag::MethodMemberI, &[], &[name], &[object])
}

fn method_member_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let receiver = cx.pop_value()?;
    let bound = bind_method(cx, node, receiver);
    cx.heap.free(receiver)?;
    cx.push_value_owned(bound?)
}

/// Pairs the receiver with its method: a declared method of a struct type, or
/// the native method of a `sync` primitive.
fn bind_method(cx: &mut Cx<'_>, node: Address, receiver: Address) -> VmResult<Address> {
    let name = string::to_string(cx.heap, cx.child(node, Tag::MethodMemberI, 0)?)?;
    let base = deref(cx.heap, receiver)?;
    let callee = match auto_cast(cx.heap, base)? {
        Object::Struct(s) => {
            let owner = structs::type_name(cx.heap, s)?;
            let structs = cx.structs()?;
            let key = format!("{METHOD_PREFIX}{owner}.{name}");
            match frame::lookup_str(cx.heap, structs, &key)? {
                Some(method) => cx.heap.reference(method)?,
                None => return Err(RuntimeError::NoMember { owner, name }.into()),
            }
        }
        Object::Mutex(_) => native_method(cx, "sync.Mutex", name)?,
        Object::WaitGroup(_) => native_method(cx, "sync.WaitGroup", name)?,
        Object::Nil => return Err(RuntimeError::NilDereference.into()),
        other => {
            return Err(RuntimeError::NoMember {
                owner: other.kind().to_string(),
                name,
            }
            .into())
        }
    };
    let bound = bound_method::create(cx.heap, callee, receiver);
    cx.heap.free(callee)?;
    Ok(bound?)
}

fn native_method(cx: &mut Cx<'_>, owner: &str, name: String) -> VmResult<Address> {
    let qualified = format!("{owner}.{name}");
    if !cx.builtins.contains(&qualified) {
        return Err(RuntimeError::NoMember {
            owner: owner.to_string(),
            name,
        }
        .into());
    }
    Ok(builtin::create(cx.heap, &qualified)?)
}

// =============================================================================
// Indexing and slicing
// =============================================================================

fn index(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let object = cx.child(node, Tag::Index, 0)?;
    let at = cx.child(node, Tag::Index, 1)?;
    reduce(cx, Tag::IndexI, &[], &[], &[object, at])
}

fn index_address(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let object = cx.child(node, Tag::IndexAddress, 0)?;
    let at = cx.child(node, Tag::IndexAddress, 1)?;
    reduce(cx, Tag::IndexAddressI, &[], &[], &[object, at])
}

/// Element variable (or, for strings, the rune) at `index`, borrowed.
fn element(heap: &Heap, object: Address, index: Address, addressable: bool) -> VmResult<Address> {
    let i = primitive::to_int32(heap, index)? as i64;
    let base = deref(heap, object)?;
    let var = match auto_cast(heap, base)? {
        Object::Array(a) => array::element(heap, a, i)?,
        Object::Slice(s) => slice::element(heap, s, i)?,
        Object::String(s) if !addressable => return Ok(string::rune_at(heap, s, i)?),
        Object::Nil => return Err(RuntimeError::IndexOutOfRange { index: i, len: 0 }.into()),
        _ => {
            return Err(RuntimeError::TypeMismatch {
                expected: "array, slice or string",
                found: heap.tag(base)?,
            }
            .into())
        }
    };
    if addressable {
        Ok(var)
    } else {
        Ok(variable::value(heap, var)?)
    }
}

fn index_i(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    index_with(cx, false)
}

fn index_address_i(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    index_with(cx, true)
}

fn index_with(cx: &mut Cx<'_>, addressable: bool) -> VmResult<()> {
    let at = cx.pop_value()?;
    let object = cx.pop_value()?;
    let pushed = element(cx.heap, object, at, addressable).and_then(|found| cx.push_value(found));
    cx.release([at, object])?;
    pushed
}

fn slice_expr(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let has_low = cx.field(node, Tag::SliceExpr, 0)?;
    let has_high = cx.field(node, Tag::SliceExpr, 1)?;
    let operands = cx.heap.children(node)?;
    reduce(cx, Tag::SliceExprI, &[has_low, has_high], &[], &operands)
}

fn slice_expr_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let high = match cx.field(node, Tag::SliceExprI, 1)? {
        0 => Address::NIL,
        _ => cx.pop_value()?,
    };
    let low = match cx.field(node, Tag::SliceExprI, 0)? {
        0 => Address::NIL,
        _ => cx.pop_value()?,
    };
    let object = cx.pop_value()?;
    let sliced = slice_of(cx.heap, object, low, high);
    cx.release([high, low, object])?;
    cx.push_value_owned(sliced?)
}

/// `object[low:high]`; nil bounds default to 0 and the length.
fn slice_of(heap: &mut Heap, object: Address, low: Address, high: Address) -> VmResult<Address> {
    let low = bound(heap, low, 0)?;
    let base = deref(heap, object)?;
    let sliced = match auto_cast(heap, base)? {
        Object::Slice(s) => {
            let high = bound(heap, high, slice::len(heap, s)?)?;
            slice::reslice(heap, s, low, high)?
        }
        Object::Array(a) => {
            let high = bound(heap, high, array::len(heap, a)?)?;
            slice::of_array(heap, a, low, high)?
        }
        Object::String(s) => {
            let high = bound(heap, high, string::len(heap, s)?)?;
            string::substring(heap, s, low, high)?
        }
        _ => {
            return Err(RuntimeError::TypeMismatch {
                expected: "array, slice or string",
                found: heap.tag(base)?,
            }
            .into())
        }
    };
    Ok(sliced)
}

fn bound(heap: &Heap, value: Address, default: usize) -> VmResult<i64> {
    match value.is_nil() {
        true => Ok(default as i64),
        false => Ok(primitive::to_int32(heap, value)? as i64),
    }
}

// =============================================================================
// Construction
// =============================================================================

fn make(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let argc = cx.field(node, Tag::Make, 0)?;
    let children = cx.heap.children(node)?;
    let (ty, args) = children.split_at(1);
    reduce(cx, Tag::MakeI, &[argc], ty, args)
}

fn make_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let argc = cx.field(node, Tag::MakeI, 0)? as usize;
    let ty = cx.child(node, Tag::MakeI, 0)?;
    let args = cx.pop_values(argc)?;
    let made = make_value(cx, ty, &args);
    cx.release(args)?;
    cx.push_value_owned(made?)
}

/// `make([]T, len[, cap])` and `make(chan T[, cap])`.
fn make_value(cx: &mut Cx<'_>, ty: Address, args: &[Address]) -> VmResult<Address> {
    let sizes = args
        .iter()
        .map(|&arg| primitive::to_int32(cx.heap, arg).map(i64::from))
        .collect::<Result<Vec<i64>, _>>()?;
    let structs = cx.structs()?;
    let heap = &mut *cx.heap;
    match heap.tag(ty)? {
        Tag::TypeSlice => {
            let elem = types::elem(heap, ty)?;
            let len = sizes.first().copied().unwrap_or(0);
            let cap = sizes.get(1).copied().unwrap_or(len);
            Ok(slice::make(heap, structs, elem, len, cap)?)
        }
        Tag::TypeChannel => {
            let elem = types::elem(heap, ty)?;
            let cap = sizes.first().copied().unwrap_or(0);
            Ok(channel::create(heap, elem, cap)?)
        }
        found => Err(RuntimeError::TypeMismatch {
            expected: "slice or channel type",
            found,
        }
        .into()),
    }
}

fn zero(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let ty = cx.child(node, Tag::Zero, 0)?;
    let structs = cx.structs()?;
    let value = types::zero_value(cx.heap, structs, ty)?;
    cx.push_value_owned(value)
}

fn constructor(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let children = cx.heap.children(node)?;
    let (ty, elems) = children.split_at(1);
    reduce(cx, Tag::ConstructorI, &[elems.len() as u64], ty, elems)
}

fn constructor_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let count = cx.field(node, Tag::ConstructorI, 0)? as usize;
    let ty = cx.child(node, Tag::ConstructorI, 0)?;
    let values = cx.pop_values(count)?;
    let built = composite(cx, ty, &values);
    cx.release(values)?;
    cx.push_value_owned(built?)
}

/// Array literals fill the leading elements and zero the rest; slice
/// literals get a backing array of exactly their length.
fn composite(cx: &mut Cx<'_>, ty: Address, values: &[Address]) -> VmResult<Address> {
    let structs = cx.structs()?;
    let heap = &mut *cx.heap;
    match heap.tag(ty)? {
        Tag::TypeArray => {
            let elem = types::elem(heap, ty)?;
            let len = types::array_len(heap, ty)?;
            if values.len() > len {
                return Err(RuntimeError::IndexOutOfRange {
                    index: len as i64,
                    len,
                }
                .into());
            }
            let arr = array::create_zeroed(heap, structs, elem, len)?;
            for (i, &value) in values.iter().enumerate() {
                let slot = array::element(heap, arr, i as i64)?;
                variable::set_value(heap, slot, value)?;
            }
            Ok(arr)
        }
        Tag::TypeSlice => {
            let elem = types::elem(heap, ty)?;
            let arr = array::from_values(heap, elem, values)?;
            let s = slice::create(heap, arr, elem, 0, values.len(), values.len());
            heap.free(arr)?;
            Ok(s?)
        }
        found => Err(RuntimeError::TypeMismatch {
            expected: "array or slice type",
            found,
        }
        .into()),
    }
}

fn struct_literal(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let count = cx.field(node, Tag::StructLiteral, 0)?;
    let children = cx.heap.children(node)?;
    let (head, exprs) = children.split_at(1 + count as usize);
    reduce(cx, Tag::StructLiteralI, &[count], head, exprs)
}

fn struct_literal_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let count = cx.field(node, Tag::StructLiteralI, 0)? as usize;
    let values = cx.pop_values(count)?;
    let built = build_struct(cx, node, &values);
    cx.release(values)?;
    cx.push_value_owned(built?)
}

fn build_struct(cx: &mut Cx<'_>, node: Address, values: &[Address]) -> VmResult<Address> {
    let name = string::to_string(cx.heap, cx.child(node, Tag::StructLiteralI, 0)?)?;
    let structs = cx.structs()?;
    let decl = frame::lookup_str(cx.heap, structs, &format!("{STRUCT_PREFIX}{name}"))?
        .ok_or(RuntimeError::Undefined(name))?;
    let s = structs::create_zeroed(cx.heap, structs, decl)?;
    for (i, &value) in values.iter().enumerate() {
        let key = cx.child(node, Tag::StructLiteralI, 1 + i)?;
        let var = structs::member_by_key(cx.heap, s, key)?;
        variable::set_value(cx.heap, var, value)?;
    }
    Ok(s)
}

// =============================================================================
// Pointers
// =============================================================================

fn address_of(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let operand = cx.child(node, Tag::AddressOf, 0)?;
    cx.push_new(Tag::AddressOfI, &[], vec![])?;
    cx.push(operand)
}

/// A variable operand is pointed at directly; any other value (a composite
/// literal) first gets a fresh variable of its own.
fn address_of_i(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    let operand = cx.pop_value()?;
    let target = match cx.heap.tag(operand)? {
        Tag::Variable => operand,
        _ => variable::create_owned(cx.heap, Address::NIL, operand)?,
    };
    let p = pointer::create(cx.heap, target);
    cx.heap.free(target)?;
    cx.push_value_owned(p?)
}

fn deref_expr(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let operand = cx.child(node, Tag::Deref, 0)?;
    cx.push_new(Tag::DerefI, &[], vec![])?;
    cx.push(operand)
}

fn deref_i(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    let p = cx.pop_value()?;
    let pushed = pointee(cx.heap, p).and_then(|value| cx.push_value(value));
    cx.heap.free(p)?;
    pushed
}

/// Value a pointer leads to, borrowed.
fn pointee(heap: &Heap, p: Address) -> VmResult<Address> {
    let target = pointer::target(heap, p)?;
    match heap.tag(target)? {
        Tag::Variable => Ok(variable::value(heap, target)?),
        _ => Ok(target),
    }
}

fn deref_address(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let operand = cx.child(node, Tag::DerefAddress, 0)?;
    cx.push_new(Tag::DerefAddressI, &[], vec![])?;
    cx.push(operand)
}

fn deref_address_i(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    let p = cx.pop_value()?;
    let pushed = pointed_variable(cx.heap, p).and_then(|var| cx.push_value(var));
    cx.heap.free(p)?;
    pushed
}

fn pointed_variable(heap: &Heap, p: Address) -> VmResult<Address> {
    let target = pointer::target(heap, p)?;
    variable::check(heap, target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deref_follows_pointer_and_variable() {
        let mut heap = Heap::new(1 << 10).unwrap();
        let n = primitive::new_int32(&mut heap, 5).unwrap();
        let var = variable::create_owned(&mut heap, Address::NIL, n).unwrap();
        let p = pointer::create(&mut heap, var).unwrap();
        assert_eq!(deref(&heap, p).unwrap(), n);
        assert_eq!(deref(&heap, var).unwrap(), n);
        assert_eq!(deref(&heap, n).unwrap(), n);
        heap.free(var).unwrap();
        heap.free(p).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_slice_of_string_counts_runes() {
        let mut heap = Heap::new(1 << 10).unwrap();
        let s = string::create(&mut heap, "héllo").unwrap();
        let one = primitive::new_int32(&mut heap, 1).unwrap();
        let sub = slice_of(&mut heap, s, one, Address::NIL).unwrap();
        assert_eq!(string::to_string(&heap, sub).unwrap(), "éllo");
        for v in [s, one, sub] {
            heap.free(v).unwrap();
        }
        assert!(heap.check_all_released());
    }
}
