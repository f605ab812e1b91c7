//! Methods of `sync.Mutex` and `sync.WaitGroup`.
//!
//! The receiver arrives first, either the primitive itself or a pointer to
//! the variable holding it. `Lock` and `Wait` may park the caller, so they
//! push their (nil) result and schedule the thread themselves.

use gosub_heap::{Address, Tag};
use gosub_runtime::objects::primitive;
use gosub_runtime::objects::sync::{mutex, wait_group};
use gosub_runtime::RuntimeError;

use super::{check_arity, BuiltinRegistry, Flow};
use crate::error::VmResult;
use crate::microcode::{deref, Cx};

pub fn register(registry: &mut BuiltinRegistry) {
    registry.register("sync.Mutex.Lock", native_lock);
    registry.register("sync.Mutex.Unlock", native_unlock);
    registry.register("sync.WaitGroup.Add", native_add);
    registry.register("sync.WaitGroup.Done", native_done);
    registry.register("sync.WaitGroup.Wait", native_wait);
}

fn receiver(cx: &Cx<'_>, args: &[Address], tag: Tag, expected: &'static str) -> VmResult<Address> {
    let Some(&first) = args.first() else {
        return Err(RuntimeError::NilDereference.into());
    };
    let target = deref(cx.heap, first)?;
    match cx.heap.tag(target)? {
        found if found == tag => Ok(target),
        Tag::Nil => Err(RuntimeError::NilDereference.into()),
        found => Err(RuntimeError::TypeMismatch { expected, found }.into()),
    }
}

fn native_lock(cx: &mut Cx<'_>, args: &[Address]) -> VmResult<Flow> {
    check_arity(args, 1)?;
    let m = receiver(cx, args, Tag::Mutex, "sync.Mutex")?;
    cx.push_value(Address::NIL)?;
    if !mutex::lock(cx.heap, m, cx.thread, cx.scheduler)? {
        log::trace!("thread {} waits for mutex {}", cx.thread_id()?, m);
    }
    Ok(Flow::Yield)
}

fn native_unlock(cx: &mut Cx<'_>, args: &[Address]) -> VmResult<Flow> {
    check_arity(args, 1)?;
    let m = receiver(cx, args, Tag::Mutex, "sync.Mutex")?;
    mutex::unlock(cx.heap, m, cx.scheduler)?;
    Ok(Flow::Return(Address::NIL))
}

fn native_add(cx: &mut Cx<'_>, args: &[Address]) -> VmResult<Flow> {
    check_arity(args, 2)?;
    let wg = receiver(cx, args, Tag::WaitGroup, "sync.WaitGroup")?;
    let delta = primitive::to_int32(cx.heap, args[1])?;
    wait_group::add(cx.heap, wg, delta.into(), cx.scheduler)?;
    Ok(Flow::Return(Address::NIL))
}

fn native_done(cx: &mut Cx<'_>, args: &[Address]) -> VmResult<Flow> {
    check_arity(args, 1)?;
    let wg = receiver(cx, args, Tag::WaitGroup, "sync.WaitGroup")?;
    wait_group::add(cx.heap, wg, -1, cx.scheduler)?;
    Ok(Flow::Return(Address::NIL))
}

fn native_wait(cx: &mut Cx<'_>, args: &[Address]) -> VmResult<Flow> {
    check_arity(args, 1)?;
    let wg = receiver(cx, args, Tag::WaitGroup, "sync.WaitGroup")?;
    cx.push_value(Address::NIL)?;
    wait_group::wait(cx.heap, wg, cx.thread, cx.scheduler)?;
    Ok(Flow::Yield)
}
