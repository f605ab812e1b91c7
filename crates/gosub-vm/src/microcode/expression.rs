//! Names, variables, assignment and operators.

use std::cmp::Ordering;

use gosub_heap::{Address, Heap, Tag};
use gosub_runtime::control::{self, BinaryOp, PostfixOp, UnaryOp};
use gosub_runtime::env::frame;
use gosub_runtime::objects::function::pointer;
use gosub_runtime::objects::{primitive, slice, string, variable};
use gosub_runtime::{auto_cast, Object, RuntimeError};

use super::{Cx, MicrocodeTable};
use crate::error::{VmError, VmResult};

pub(super) fn register(table: &mut MicrocodeTable) {
    table.sequential(Tag::Literal, literal);
    table.sequential(Tag::Name, name);
    table.sequential(Tag::NameAddress, name_address);
    table.sequential(Tag::Var, var);
    table.sequential(Tag::VarI, var_i);
    table.sequential(Tag::Assign, assign);
    table.sequential(Tag::AssignI, assign_i);
    table.sequential(Tag::Unary, unary);
    table.sequential(Tag::UnaryI, unary_i);
    table.sequential(Tag::Binary, binary);
    table.sequential(Tag::BinaryI, binary_i);
    table.sequential(Tag::LogicalI, logical_i);
    table.sequential(Tag::Postfix, postfix);
    table.sequential(Tag::PostfixI, postfix_i);
}

// =============================================================================
// Names and variables
// =============================================================================

fn literal(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let value = cx.child(node, Tag::Literal, 0)?;
    cx.push_value(value)
}

/// Binding of the name held by `node`, borrowed.
fn resolve(cx: &Cx<'_>, node: Address, tag: Tag) -> VmResult<Address> {
    let key = cx.child(node, tag, 0)?;
    let frame = cx.frame()?;
    match frame::lookup(cx.heap, frame, key)? {
        Some(bound) => Ok(bound),
        None => Err(RuntimeError::Undefined(string::to_string(cx.heap, key)?).into()),
    }
}

fn name(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let bound = resolve(cx, node, Tag::Name)?;
    let value = match cx.heap.tag(bound)? {
        Tag::Variable => variable::value(cx.heap, bound)?,
        _ => bound,
    };
    cx.push_value(value)
}

fn name_address(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let bound = resolve(cx, node, Tag::NameAddress)?;
    variable::check(cx.heap, bound)?;
    cx.push_value(bound)
}

fn var(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let name = cx.child(node, Tag::Var, 0)?;
    let ty = cx.child(node, Tag::Var, 1)?;
    let init = cx.child(node, Tag::Var, 2)?;
    cx.push_shared(Tag::VarI, &[], &[name, ty])?;
    cx.push(init)
}

/// Declares the name in the innermost frame, shadowing outer bindings.
fn var_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let name = cx.child(node, Tag::VarI, 0)?;
    let ty = cx.child(node, Tag::VarI, 1)?;
    let value = cx.pop_value()?;
    let var = variable::create_owned(cx.heap, ty, value)?;
    let frame = cx.frame()?;
    let inserted = frame::insert(cx.heap, frame, name, var);
    cx.heap.free(var)?;
    Ok(inserted?)
}

/// The value is evaluated before the target's address.
fn assign(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let target = cx.child(node, Tag::Assign, 0)?;
    let value = cx.child(node, Tag::Assign, 1)?;
    let cont = control::unit(cx.heap, Tag::AssignI)?;
    cx.push_owned(cont)?;
    cx.push_in_order(&[value, target])
}

fn assign_i(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    let var = cx.pop_value()?;
    let value = cx.pop_value()?;
    let stored = variable::set_value_owned(cx.heap, var, value);
    cx.heap.free(var)?;
    Ok(stored?)
}

// =============================================================================
// Operators
// =============================================================================

fn unary(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let op = cx.field(node, Tag::Unary, 0)?;
    let operand = cx.child(node, Tag::Unary, 0)?;
    cx.push_new(Tag::UnaryI, &[op], vec![])?;
    cx.push(operand)
}

fn unary_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let op = control::unary_op(cx.heap, node, Tag::UnaryI)?;
    let operand = cx.pop_value()?;
    let result = apply_unary(cx.heap, op, operand);
    cx.heap.free(operand)?;
    cx.push_value_owned(result?)
}

fn apply_unary(heap: &mut Heap, op: UnaryOp, operand: Address) -> VmResult<Address> {
    let value = auto_cast(heap, operand)?;
    let result = match (op, value) {
        (UnaryOp::Plus, Object::Int32(_) | Object::Float32(_) | Object::Rune(_)) => heap.reference(operand)?,
        (UnaryOp::Neg, Object::Int32(n)) => primitive::new_int32(heap, n.wrapping_neg())?,
        (UnaryOp::Neg, Object::Rune(c)) => primitive::new_int32(heap, (c as i32).wrapping_neg())?,
        (UnaryOp::Neg, Object::Float32(x)) => primitive::new_float32(heap, -x)?,
        (UnaryOp::Not, Object::Bool(b)) => primitive::new_bool(heap, !b)?,
        (op, other) => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
                UnaryOp::Plus => "+",
            };
            return Err(VmError::InvalidOperation {
                op: symbol,
                left: other.kind(),
                right: other.kind(),
            });
        }
    };
    Ok(result)
}

/// `&&` and `||` evaluate the left operand only and decide later whether the
/// right one runs.
fn binary(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let op = control::binary_op(cx.heap, node, Tag::Binary)?;
    let left = cx.child(node, Tag::Binary, 0)?;
    let right = cx.child(node, Tag::Binary, 1)?;
    match op {
        BinaryOp::And | BinaryOp::Or => {
            cx.push_shared(Tag::LogicalI, &[op as u64], &[right])?;
            cx.push(left)
        }
        _ => {
            cx.push_new(Tag::BinaryI, &[op as u64], vec![])?;
            cx.push_in_order(&[left, right])
        }
    }
}

fn binary_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let op = control::binary_op(cx.heap, node, Tag::BinaryI)?;
    let right = cx.pop_value()?;
    let left = cx.pop_value()?;
    let result = apply_binary(cx.heap, op, left, right);
    cx.release([left, right])?;
    cx.push_value_owned(result?)
}

fn logical_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let op = control::binary_op(cx.heap, node, Tag::LogicalI)?;
    let left = cx.pop_value()?;
    let decided = primitive::to_bool(cx.heap, left);
    cx.heap.free(left)?;
    match (op, decided?) {
        (BinaryOp::And, false) => {
            let result = primitive::new_bool(cx.heap, false)?;
            cx.push_value_owned(result)
        }
        (BinaryOp::Or, true) => {
            let result = primitive::new_bool(cx.heap, true)?;
            cx.push_value_owned(result)
        }
        _ => {
            let right = cx.child(node, Tag::LogicalI, 0)?;
            cx.push(right)
        }
    }
}

/// Applies a non-short-circuit binary operator. Integer arithmetic wraps;
/// runes take part as int32.
fn apply_binary(heap: &mut Heap, op: BinaryOp, left: Address, right: Address) -> VmResult<Address> {
    let (l, r) = (auto_cast(heap, left)?, auto_cast(heap, right)?);
    match (l, r) {
        (Object::Int32(a), Object::Int32(b)) => int_op(heap, op, a, b),
        (Object::Int32(a), Object::Rune(b)) => int_op(heap, op, a, b as i32),
        (Object::Rune(a), Object::Int32(b)) => int_op(heap, op, a as i32, b),
        (Object::Rune(a), Object::Rune(b)) => int_op(heap, op, a as i32, b as i32),
        (Object::Float32(a), Object::Float32(b)) => float_op(heap, op, a, b),
        (Object::String(a), Object::String(b)) => string_op(heap, op, a, b),
        (Object::Bool(a), Object::Bool(b)) => match op {
            BinaryOp::Eq => Ok(primitive::new_bool(heap, a == b)?),
            BinaryOp::Ne => Ok(primitive::new_bool(heap, a != b)?),
            BinaryOp::And => Ok(primitive::new_bool(heap, a && b)?),
            BinaryOp::Or => Ok(primitive::new_bool(heap, a || b)?),
            _ => invalid(op, l, r),
        },
        _ if matches!(op, BinaryOp::Eq | BinaryOp::Ne) => {
            let same = identical(heap, left, right)?;
            Ok(primitive::new_bool(heap, same == (op == BinaryOp::Eq))?)
        }
        _ => invalid(op, l, r),
    }
}

fn invalid(op: BinaryOp, l: Object, r: Object) -> VmResult<Address> {
    Err(VmError::InvalidOperation {
        op: op.symbol(),
        left: l.kind(),
        right: r.kind(),
    })
}

fn compare<T: PartialOrd>(heap: &mut Heap, op: BinaryOp, a: T, b: T) -> VmResult<Option<Address>> {
    let holds = match op {
        BinaryOp::Eq => a == b,
        BinaryOp::Ne => a != b,
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Ge => a >= b,
        _ => return Ok(None),
    };
    Ok(Some(primitive::new_bool(heap, holds)?))
}

fn int_op(heap: &mut Heap, op: BinaryOp, a: i32, b: i32) -> VmResult<Address> {
    if let Some(result) = compare(heap, op, a, b)? {
        return Ok(result);
    }
    let n = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err(VmError::DivisionByZero),
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Rem => a.wrapping_rem(b),
        _ => return invalid(op, Object::Int32(a), Object::Int32(b)),
    };
    Ok(primitive::new_int32(heap, n)?)
}

fn float_op(heap: &mut Heap, op: BinaryOp, a: f32, b: f32) -> VmResult<Address> {
    if let Some(result) = compare(heap, op, a, b)? {
        return Ok(result);
    }
    let x = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return Err(VmError::FloatDivisionByZero),
        BinaryOp::Div => a / b,
        _ => return invalid(op, Object::Float32(a), Object::Float32(b)),
    };
    Ok(primitive::new_float32(heap, x)?)
}

fn string_op(heap: &mut Heap, op: BinaryOp, a: Address, b: Address) -> VmResult<Address> {
    let holds = match op {
        BinaryOp::Add => return Ok(string::concat(heap, a, b)?),
        BinaryOp::Eq => string::equals(heap, a, b)?,
        BinaryOp::Ne => !string::equals(heap, a, b)?,
        BinaryOp::Lt => string::compare(heap, a, b)? == Ordering::Less,
        BinaryOp::Le => string::compare(heap, a, b)? != Ordering::Greater,
        BinaryOp::Gt => string::compare(heap, a, b)? == Ordering::Greater,
        BinaryOp::Ge => string::compare(heap, a, b)? != Ordering::Less,
        _ => return invalid(op, Object::String(a), Object::String(b)),
    };
    Ok(primitive::new_bool(heap, holds)?)
}

/// Equality for reference kinds: the same record, pointers to the same
/// variable, or a nil slice against nil.
fn identical(heap: &Heap, left: Address, right: Address) -> VmResult<bool> {
    if left == right {
        return Ok(true);
    }
    Ok(match (heap.tag(left)?, heap.tag(right)?) {
        (Tag::Pointer, Tag::Pointer) => pointer::target(heap, left)? == pointer::target(heap, right)?,
        (Tag::Slice, Tag::Nil) => slice::is_nil_slice(heap, left)?,
        (Tag::Nil, Tag::Slice) => slice::is_nil_slice(heap, right)?,
        _ => false,
    })
}

fn postfix(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let op = cx.field(node, Tag::Postfix, 0)?;
    let target = cx.child(node, Tag::Postfix, 0)?;
    cx.push_new(Tag::PostfixI, &[op], vec![])?;
    cx.push(target)
}

fn postfix_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let op = control::postfix_op(cx.heap, node, Tag::PostfixI)?;
    let var = cx.pop_value()?;
    let result = step_variable(cx.heap, var, op);
    cx.heap.free(var)?;
    result
}

fn step_variable(heap: &mut Heap, var: Address, op: PostfixOp) -> VmResult<()> {
    let delta = match op {
        PostfixOp::Inc => 1,
        PostfixOp::Dec => -1,
    };
    let next = match auto_cast(heap, variable::value(heap, var)?)? {
        Object::Int32(n) => primitive::new_int32(heap, n.wrapping_add(delta))?,
        Object::Float32(x) => primitive::new_float32(heap, x + delta as f32)?,
        other => {
            return Err(VmError::InvalidOperation {
                op: if delta > 0 { "++" } else { "--" },
                left: other.kind(),
                right: other.kind(),
            })
        }
    };
    Ok(variable::set_value_owned(heap, var, next)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn int(heap: &mut Heap, n: i32) -> Address {
        primitive::new_int32(heap, n).unwrap()
    }

    #[test]
    fn test_int32_arithmetic_wraps() {
        let mut heap = Heap::new(1 << 10).unwrap();
        let max = int(&mut heap, i32::MAX);
        let one = int(&mut heap, 1);
        let sum = apply_binary(&mut heap, BinaryOp::Add, max, one).unwrap();
        assert_eq!(primitive::to_int32(&heap, sum).unwrap(), i32::MIN);
        let zero = int(&mut heap, 0);
        assert_eq!(apply_binary(&mut heap, BinaryOp::Rem, one, zero), Err(VmError::DivisionByZero));
        for v in [max, one, sum, zero] {
            heap.free(v).unwrap();
        }
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_strings_concatenate_and_compare() {
        let mut heap = Heap::new(1 << 10).unwrap();
        let a = string::create(&mut heap, "ab").unwrap();
        let b = string::create(&mut heap, "b").unwrap();
        let joined = apply_binary(&mut heap, BinaryOp::Add, a, b).unwrap();
        assert_eq!(string::to_string(&heap, joined).unwrap(), "abb");
        let less = apply_binary(&mut heap, BinaryOp::Lt, a, b).unwrap();
        assert!(primitive::to_bool(&heap, less).unwrap());
        for v in [a, b, joined, less] {
            heap.free(v).unwrap();
        }
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_mixed_kinds_are_rejected() {
        let mut heap = Heap::new(1 << 10).unwrap();
        let n = int(&mut heap, 1);
        let s = string::create(&mut heap, "1").unwrap();
        assert_eq!(
            apply_binary(&mut heap, BinaryOp::Add, n, s),
            Err(VmError::InvalidOperation {
                op: "+",
                left: "int32",
                right: "string",
            })
        );
        let ne = apply_binary(&mut heap, BinaryOp::Ne, n, Address::NIL).unwrap();
        assert!(primitive::to_bool(&heap, ne).unwrap());
        for v in [n, s, ne] {
            heap.free(v).unwrap();
        }
    }
}
