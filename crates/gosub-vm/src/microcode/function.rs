//! Closures, calls, returns and goroutine creation.

use gosub_heap::{Address, Tag};
use gosub_runtime::context::{control as control_stack, scheduler, stash as stash_stack, thread};
use gosub_runtime::control;
use gosub_runtime::env::frame;
use gosub_runtime::objects::function::{bound_method, builtin, closure};
use gosub_runtime::objects::variable;
use gosub_runtime::{auto_cast, Object, RuntimeError};

use super::{Cx, MicrocodeTable};
use crate::builtins::Flow;
use crate::error::{VmError, VmResult};

pub(super) fn register(table: &mut MicrocodeTable) {
    table.sequential(Tag::FunctionLit, function_lit);
    table.sequential(Tag::Call, call);
    table.scheduling(Tag::CallI, call_i);
    table.sequential(Tag::Return, return_);
    table.sequential(Tag::ReturnI, return_i);
    table.sequential(Tag::RestoreEnvI, restore_env_i);
    table.sequential(Tag::GoCall, go_call);
    table.scheduling(Tag::GoCallI, go_call_i);
}

// function literal layout
const PARAM_COUNT: usize = 0;
const HAS_RECEIVER: usize = 1;
const BODY: usize = 0;
const RECEIVER: usize = 1;
const FIRST_PARAM: usize = 3;

/// What applying a callee did to the calling thread.
enum Applied {
    /// A closure body was pushed; its `return` will leave the result.
    Entered,
    Builtin(Flow),
}

/// Evaluating a function literal captures the current frame.
fn function_lit(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let frame = cx.frame()?;
    let f = closure::create(cx.heap, node, frame)?;
    cx.push_value_owned(f)
}

fn call(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let argc = cx.field(node, Tag::Call, 0)?;
    let operands = cx.heap.children(node)?;
    cx.push_new(Tag::CallI, &[argc], vec![])?;
    cx.push_in_order(&operands)
}

fn call_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let argc = cx.field(node, Tag::CallI, 0)? as usize;
    let args = cx.pop_values(argc)?;
    let callee = cx.pop_value()?;
    let applied = apply(cx, callee, &args);
    cx.release(args)?;
    cx.heap.free(callee)?;
    match applied? {
        Applied::Entered => cx.enqueue_current(),
        Applied::Builtin(Flow::Return(result)) => {
            cx.push_value_owned(result)?;
            cx.enqueue_current()
        }
        Applied::Builtin(Flow::Yield) => Ok(()),
    }
}

fn apply(cx: &mut Cx<'_>, callee: Address, args: &[Address]) -> VmResult<Applied> {
    match auto_cast(cx.heap, callee)? {
        Object::Function(f) => enter(cx, f, None, args).map(|()| Applied::Entered),
        Object::BoundMethod(m) => {
            let target = bound_method::callee(cx.heap, m)?;
            let receiver = bound_method::receiver(cx.heap, m)?;
            match auto_cast(cx.heap, target)? {
                Object::Function(f) => enter(cx, f, Some(receiver), args).map(|()| Applied::Entered),
                Object::Builtin(b) => {
                    let mut with_receiver = Vec::with_capacity(args.len() + 1);
                    with_receiver.push(receiver);
                    with_receiver.extend_from_slice(args);
                    call_builtin(cx, b, &with_receiver).map(Applied::Builtin)
                }
                other => Err(VmError::NotCallable(other.kind())),
            }
        }
        Object::Builtin(b) => call_builtin(cx, b, args).map(Applied::Builtin),
        Object::Nil => Err(RuntimeError::NilDereference.into()),
        other => Err(VmError::NotCallable(other.kind())),
    }
}

fn call_builtin(cx: &mut Cx<'_>, b: Address, args: &[Address]) -> VmResult<Flow> {
    let name = builtin::name(cx.heap, b)?;
    let registry = cx.builtins;
    match registry.get(&name) {
        Some(native) => native(cx, args),
        None => Err(VmError::UnknownBuiltin(name)),
    }
}

/// Switches the thread into `f`: the caller's frame is restored by the
/// `restore_env_i` left below the body, and a body that falls off its end
/// returns nil.
fn enter(cx: &mut Cx<'_>, f: Address, receiver: Option<Address>, args: &[Address]) -> VmResult<()> {
    let literal = closure::literal(cx.heap, f)?;
    let captured = closure::frame(cx.heap, f)?;
    let expected = cx.field(literal, Tag::FunctionLit, PARAM_COUNT)? as usize;
    if expected != args.len() {
        return Err(VmError::ArityMismatch {
            expected,
            got: args.len(),
        });
    }

    let caller = cx.frame()?;
    cx.push_shared(Tag::RestoreEnvI, &[], &[caller])?;
    cx.push_new(Tag::Return, &[], vec![Address::NIL])?;

    let scope = frame::create(cx.heap, captured)?;
    let installed = cx.set_frame(scope);
    cx.heap.free(scope)?;
    installed?;

    if cx.field(literal, Tag::FunctionLit, HAS_RECEIVER)? != 0 {
        if let Some(receiver) = receiver {
            bind(cx, scope, literal, RECEIVER, receiver)?;
        }
    }
    for (i, &arg) in args.iter().enumerate() {
        bind(cx, scope, literal, FIRST_PARAM + 2 * i, arg)?;
    }

    let body = cx.child(literal, Tag::FunctionLit, BODY)?;
    cx.push(body)
}

/// Binds the (name, type) pair at `slot` of the literal to a fresh variable
/// holding `value`.
fn bind(cx: &mut Cx<'_>, scope: Address, literal: Address, slot: usize, value: Address) -> VmResult<()> {
    let name = cx.child(literal, Tag::FunctionLit, slot)?;
    let ty = cx.child(literal, Tag::FunctionLit, slot + 1)?;
    let var = variable::create(cx.heap, ty, value)?;
    let inserted = frame::insert(cx.heap, scope, name, var);
    cx.heap.free(var)?;
    Ok(inserted?)
}

fn return_(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let value = cx.child(node, Tag::Return, 0)?;
    cx.push_new(Tag::ReturnI, &[], vec![])?;
    if value.is_nil() {
        cx.push_value(Address::NIL)
    } else {
        cx.push(value)
    }
}

/// Drops the rest of the function body. The returned value stays on the
/// stash.
fn return_i(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    let control = cx.control()?;
    loop {
        let top = control_stack::peek(cx.heap, control)?;
        if top.is_nil() {
            return Err(VmError::ReturnOutsideFunction);
        }
        if cx.heap.tag(top)? == Tag::RestoreEnvI {
            return Ok(());
        }
        let dropped = control_stack::pop(cx.heap, control)?;
        cx.heap.free(dropped)?;
    }
}

fn restore_env_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let caller = cx.child(node, Tag::RestoreEnvI, 0)?;
    cx.set_frame(caller)
}

/// Callee and arguments are evaluated by the spawning thread.
fn go_call(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let argc = cx.field(node, Tag::GoCall, 0)?;
    let operands = cx.heap.children(node)?;
    cx.push_new(Tag::GoCallI, &[argc], vec![])?;
    cx.push_in_order(&operands)
}

fn go_call_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let argc = cx.field(node, Tag::GoCallI, 0)?;
    let args = cx.pop_values(argc as usize)?;
    let callee = cx.pop_value()?;

    let heap = &mut *cx.heap;
    let id = scheduler::next_id(heap, cx.scheduler)?;
    let fork = thread::fork(heap, cx.thread, id)?;
    let stash = thread::stash(heap, fork)?;
    stash_stack::push_owned(heap, stash, callee)?;
    for arg in args {
        stash_stack::push_owned(heap, stash, arg)?;
    }
    let control = thread::control(heap, fork)?;
    let discard = control::unit(heap, Tag::PopI)?;
    control_stack::push_owned(heap, control, discard)?;
    let invoke = control::build(heap, Tag::CallI, &[argc], vec![])?;
    control_stack::push_owned(heap, control, invoke)?;
    scheduler::enqueue(heap, cx.scheduler, fork)?;
    heap.free(fork)?;

    log::debug!("thread {} spawned thread {}", cx.thread_id()?, id);
    cx.enqueue_current()
}
