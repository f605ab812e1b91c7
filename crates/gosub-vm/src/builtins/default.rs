//! Universe-block builtins: `len`, `cap`, `append` and `close`.

use gosub_heap::{Address, Tag};
use gosub_runtime::objects::{array, channel, primitive, slice, string};
use gosub_runtime::{auto_cast, Object, RuntimeError};

use super::{check_arity, BuiltinRegistry, Flow};
use crate::error::{VmError, VmResult};
use crate::microcode::Cx;

pub fn register(registry: &mut BuiltinRegistry) {
    registry.register("len", native_len);
    registry.register("cap", native_cap);
    registry.register("append", native_append);
    registry.register("close", native_close);
}

fn int_result(cx: &mut Cx<'_>, n: usize) -> VmResult<Flow> {
    Ok(Flow::Return(primitive::new_int32(cx.heap, n as i32)?))
}

/// Strings count runes.
fn native_len(cx: &mut Cx<'_>, args: &[Address]) -> VmResult<Flow> {
    check_arity(args, 1)?;
    let n = match auto_cast(cx.heap, args[0])? {
        Object::String(s) => string::len(cx.heap, s)?,
        Object::Array(a) => array::len(cx.heap, a)?,
        Object::Slice(s) => slice::len(cx.heap, s)?,
        Object::Channel(ch) => channel::len(cx.heap, ch)?,
        Object::Nil => 0,
        _ => return Err(unsupported("len", cx.heap.tag(args[0])?)),
    };
    int_result(cx, n)
}

fn native_cap(cx: &mut Cx<'_>, args: &[Address]) -> VmResult<Flow> {
    check_arity(args, 1)?;
    let n = match auto_cast(cx.heap, args[0])? {
        Object::Array(a) => array::len(cx.heap, a)?,
        Object::Slice(s) => slice::cap(cx.heap, s)?,
        Object::Channel(ch) => channel::cap(cx.heap, ch)?,
        Object::Nil => 0,
        _ => return Err(unsupported("cap", cx.heap.tag(args[0])?)),
    };
    int_result(cx, n)
}

fn native_append(cx: &mut Cx<'_>, args: &[Address]) -> VmResult<Flow> {
    let Some((&target, values)) = args.split_first() else {
        return Err(VmError::ArityMismatch {
            expected: 1,
            got: 0,
        });
    };
    let structs = cx.structs()?;
    let appended = slice::append(cx.heap, structs, target, values)?;
    Ok(Flow::Return(appended))
}

fn native_close(cx: &mut Cx<'_>, args: &[Address]) -> VmResult<Flow> {
    check_arity(args, 1)?;
    let structs = cx.structs()?;
    channel::close(cx.heap, args[0], structs, cx.scheduler)?;
    Ok(Flow::Return(Address::NIL))
}

fn unsupported(builtin: &'static str, found: Tag) -> VmError {
    RuntimeError::TypeMismatch {
        expected: match builtin {
            "len" => "string, array, slice or channel",
            _ => "array, slice or channel",
        },
        found,
    }
    .into()
}
