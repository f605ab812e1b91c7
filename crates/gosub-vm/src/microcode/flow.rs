//! Statements that shape control: sequencing, scopes, branches and loops.

use gosub_heap::{Address, Tag};
use gosub_runtime::context::control as control_stack;
use gosub_runtime::control;
use gosub_runtime::env::frame;
use gosub_runtime::objects::{primitive, variable};
use gosub_runtime::RuntimeError;

use super::{Cx, MicrocodeTable};
use crate::error::{VmError, VmResult};

pub(super) fn register(table: &mut MicrocodeTable) {
    table.sequential(Tag::Sequence, sequence);
    table.sequential(Tag::Block, block);
    table.sequential(Tag::ExitScopeI, exit_scope_i);
    table.sequential(Tag::If, if_);
    table.sequential(Tag::IfI, if_i);
    table.sequential(Tag::For, for_);
    table.sequential(Tag::ForI, for_i);
    table.sequential(Tag::MarkerI, marker_i);
    table.sequential(Tag::Break, break_);
    table.sequential(Tag::Continue, continue_);
    table.sequential(Tag::ExprStmt, expr_stmt);
    table.sequential(Tag::PopI, pop_i);
}

// for_i children
const COND: usize = 0;
const UPDATE: usize = 1;
const BODY: usize = 2;
const MARKER: usize = 3;
const LOOP_VAR: usize = 4;
const COPY_READ: usize = 5;
const COPY_EXIT: usize = 6;
const COPY_TARGET: usize = 7;
const COPY_ASSIGN: usize = 8;

fn sequence(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let statements = cx.heap.children(node)?;
    cx.push_in_order(&statements)
}

fn block(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let body = cx.child(node, Tag::Block, 0)?;
    cx.push_frame()?;
    cx.push_new(Tag::ExitScopeI, &[], vec![])?;
    cx.push(body)
}

fn exit_scope_i(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    cx.pop_frame()
}

fn if_(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let cond = cx.child(node, Tag::If, 0)?;
    let then = cx.child(node, Tag::If, 1)?;
    let otherwise = cx.child(node, Tag::If, 2)?;
    cx.push_shared(Tag::IfI, &[], &[then, otherwise])?;
    cx.push(cond)
}

fn if_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let cond = cx.pop_value()?;
    let taken = primitive::to_bool(cx.heap, cond);
    cx.heap.free(cond)?;
    let branch = cx.child(node, Tag::IfI, if taken? { 0 } else { 1 })?;
    if !branch.is_nil() {
        cx.push(branch)?;
    }
    Ok(())
}

/// Opens the loop scope and builds the `for_i` continuation once; it is
/// re-pushed on every iteration.
fn for_(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let init = cx.child(node, Tag::For, 0)?;
    let cond = cx.child(node, Tag::For, 1)?;
    let update = cx.child(node, Tag::For, 2)?;
    let body = cx.child(node, Tag::For, 3)?;
    let loop_var = cx.child(node, Tag::For, 4)?;

    cx.push_frame()?;
    cx.push_new(Tag::ExitScopeI, &[], vec![])?;

    let heap = &mut *cx.heap;
    let mut children = vec![
        heap.reference(cond)?,
        heap.reference(update)?,
        heap.reference(body)?,
        control::unit(heap, Tag::MarkerI)?,
        heap.reference(loop_var)?,
    ];
    if loop_var.is_nil() {
        children.extend([Address::NIL; 4]);
    } else {
        children.push(control::build_shared(heap, Tag::Name, &[], &[loop_var])?);
        children.push(control::unit(heap, Tag::ExitScopeI)?);
        children.push(control::build_shared(heap, Tag::NameAddress, &[], &[loop_var])?);
        children.push(control::unit(heap, Tag::AssignI)?);
    }
    cx.push_new(Tag::ForI, &[], children)?;
    cx.push_in_order(&[init, cond])
}

/// With a loop variable, each iteration runs in its own frame holding a fresh
/// copy; the copy is written back to the loop-scope variable before `update`.
fn for_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let cond = cx.pop_value()?;
    let more = primitive::to_bool(cx.heap, cond);
    cx.heap.free(cond)?;
    if !more? {
        return Ok(());
    }

    let cond = cx.child(node, Tag::ForI, COND)?;
    let update = cx.child(node, Tag::ForI, UPDATE)?;
    cx.push(node)?;
    cx.push(cond)?;
    if !update.is_nil() {
        cx.push(update)?;
    }

    let loop_var = cx.child(node, Tag::ForI, LOOP_VAR)?;
    if !loop_var.is_nil() {
        for slot in [COPY_ASSIGN, COPY_TARGET, COPY_EXIT, COPY_READ] {
            let copy_back = cx.child(node, Tag::ForI, slot)?;
            cx.push(copy_back)?;
        }
        let inner = cx.push_frame()?;
        let outer_scope = frame::parent(cx.heap, inner)?;
        let outer = frame::lookup(cx.heap, outer_scope, loop_var)?
            .ok_or_else(|| RuntimeError::Undefined("loop variable".to_string()))?;
        let ty = variable::ty(cx.heap, outer)?;
        let value = variable::value(cx.heap, outer)?;
        let copy = variable::create(cx.heap, ty, value)?;
        let inserted = frame::insert(cx.heap, inner, loop_var, copy);
        cx.heap.free(copy)?;
        inserted?;
    }

    let marker = cx.child(node, Tag::ForI, MARKER)?;
    let body = cx.child(node, Tag::ForI, BODY)?;
    cx.push(marker)?;
    cx.push(body)
}

fn marker_i(_cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    Ok(())
}

fn break_(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    unwind_to(cx, Tag::ForI, "break")
}

fn continue_(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    unwind_to(cx, Tag::MarkerI, "continue")
}

/// Discards control nodes up to and including the first `target`, closing
/// the scopes it passes. Function boundaries stop the search.
fn unwind_to(cx: &mut Cx<'_>, target: Tag, keyword: &'static str) -> VmResult<()> {
    let control = cx.control()?;
    loop {
        let node = control_stack::pop(cx.heap, control)?;
        if node.is_nil() {
            return Err(VmError::OutsideLoop(keyword));
        }
        let tag = cx.heap.tag(node);
        cx.heap.free(node)?;
        match tag? {
            tag if tag == target => return Ok(()),
            Tag::ExitScopeI => cx.pop_frame()?,
            Tag::RestoreEnvI => return Err(VmError::OutsideLoop(keyword)),
            _ => {}
        }
    }
}

fn expr_stmt(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let expr = cx.child(node, Tag::ExprStmt, 0)?;
    cx.push_new(Tag::PopI, &[], vec![])?;
    cx.push(expr)
}

fn pop_i(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    let value = cx.pop_value()?;
    Ok(cx.heap.free(value)?)
}
