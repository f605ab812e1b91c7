//! The `fmt` package.

use gosub_heap::{Address, Tag};
use gosub_runtime::display;
use gosub_runtime::objects::string;

use super::{BuiltinRegistry, Flow};
use crate::error::VmResult;
use crate::microcode::Cx;

pub fn register(registry: &mut BuiltinRegistry) {
    registry.register("fmt.Println", native_println);
    registry.register("fmt.Print", native_print);
    registry.register("fmt.Sprint", native_sprint);
}

fn native_println(cx: &mut Cx<'_>, args: &[Address]) -> VmResult<Flow> {
    let mut text = args
        .iter()
        .map(|&arg| display(cx.heap, arg))
        .collect::<Result<Vec<_>, _>>()?
        .join(" ");
    text.push('\n');
    emit(cx, &text)
}

fn native_print(cx: &mut Cx<'_>, args: &[Address]) -> VmResult<Flow> {
    let text = sprint(cx, args)?;
    emit(cx, &text)
}

fn native_sprint(cx: &mut Cx<'_>, args: &[Address]) -> VmResult<Flow> {
    let text = sprint(cx, args)?;
    Ok(Flow::Return(string::create(cx.heap, &text)?))
}

fn emit(cx: &mut Cx<'_>, text: &str) -> VmResult<Flow> {
    let id = cx.thread_id()?;
    cx.output.write(id, text);
    Ok(Flow::Return(Address::NIL))
}

/// `Print` spacing: a blank goes between operands when neither is a string.
fn sprint(cx: &Cx<'_>, args: &[Address]) -> VmResult<String> {
    let mut out = String::new();
    let mut previous_is_string = true;
    for (i, &arg) in args.iter().enumerate() {
        let is_string = cx.heap.tag(arg)? == Tag::String;
        if i > 0 && !is_string && !previous_is_string {
            out.push(' ');
        }
        out.push_str(&display(cx.heap, arg)?);
        previous_is_string = is_string;
    }
    Ok(out)
}
