//! Evaluation context records: per-thread control, stash and environment, the
//! scheduler's run queue, and the wakers that park and resume threads.

use gosub_heap::{Address, Heap, Tag};

use crate::env::frame;
use crate::error::RuntimeResult;
use crate::objects::list::{queue, stack};

// =============================================================================
// Control and stash
// =============================================================================

/// Stack of pending control nodes.
pub mod control {
    use super::*;

    pub fn create(heap: &mut Heap) -> RuntimeResult<Address> {
        stack::create(heap, Tag::Control)
    }

    pub use crate::objects::list::stack::{is_empty, len, peek, pop, push, push_owned, values};
}

/// Operand stack of computed values. Popping an empty stash yields nil.
pub mod stash {
    use super::*;

    pub fn create(heap: &mut Heap) -> RuntimeResult<Address> {
        stack::create(heap, Tag::Stash)
    }

    pub use crate::objects::list::stack::{is_empty, len, peek, pop, push, push_owned, values};
}

// =============================================================================
// Environment holder
// =============================================================================

/// Layout: child 0 = current frame, child 1 = struct frame.
pub mod env {
    use super::*;

    pub const FRAME: usize = 0;
    pub const STRUCTS: usize = 1;

    pub fn create(heap: &mut Heap, current: Address, structs: Address) -> RuntimeResult<Address> {
        let env = heap.allocate_object(Tag::Env, 0, 2)?;
        heap.set_child(env, Tag::Env, FRAME, current)?;
        heap.set_child(env, Tag::Env, STRUCTS, structs)?;
        Ok(env)
    }

    #[inline]
    pub fn frame(heap: &Heap, env: Address) -> RuntimeResult<Address> {
        Ok(heap.child(env, Tag::Env, FRAME)?)
    }

    #[inline]
    pub fn structs(heap: &Heap, env: Address) -> RuntimeResult<Address> {
        Ok(heap.child(env, Tag::Env, STRUCTS)?)
    }

    pub fn set_frame(heap: &mut Heap, env: Address, current: Address) -> RuntimeResult<()> {
        Ok(heap.set_child(env, Tag::Env, FRAME, current)?)
    }

    /// Opens a scope nested in the current one and returns it, borrowed.
    pub fn push_frame(heap: &mut Heap, env: Address) -> RuntimeResult<Address> {
        let parent = frame(heap, env)?;
        let inner = frame::create(heap, parent)?;
        heap.set_child_owned(env, Tag::Env, FRAME, inner)?;
        Ok(inner)
    }

    pub fn pop_frame(heap: &mut Heap, env: Address) -> RuntimeResult<()> {
        let parent = frame::parent(heap, frame(heap, env)?)?;
        set_frame(heap, env, parent)
    }
}

// =============================================================================
// Thread
// =============================================================================

/// Layout: field 0 = id; children = control, stash, env.
pub mod thread {
    use super::*;

    pub const ID: usize = 0;
    pub const CONTROL: usize = 0;
    pub const STASH: usize = 1;
    pub const ENV: usize = 2;

    /// Empty control and stash over a fresh env holder for `current`.
    pub fn create(heap: &mut Heap, id: u32, current: Address, structs: Address) -> RuntimeResult<Address> {
        let t = heap.allocate_object(Tag::Thread, 1, 3)?;
        let result = (|| -> RuntimeResult<()> {
            heap.set_field(t, Tag::Thread, ID, id as u64)?;
            let control = control::create(heap)?;
            heap.set_child_owned(t, Tag::Thread, CONTROL, control)?;
            let stash = stash::create(heap)?;
            heap.set_child_owned(t, Tag::Thread, STASH, stash)?;
            let env = env::create(heap, current, structs)?;
            heap.set_child_owned(t, Tag::Thread, ENV, env)?;
            Ok(())
        })();
        match result {
            Ok(()) => Ok(t),
            Err(err) => {
                heap.free(t)?;
                Err(err)
            }
        }
    }

    /// New thread positioned in the same scope as `t`. Only the scope is
    /// shared; control and stash start empty.
    pub fn fork(heap: &mut Heap, t: Address, id: u32) -> RuntimeResult<Address> {
        let env = env(heap, t)?;
        let current = env::frame(heap, env)?;
        let structs = env::structs(heap, env)?;
        create(heap, id, current, structs)
    }

    #[inline]
    pub fn id(heap: &Heap, t: Address) -> RuntimeResult<u32> {
        Ok(heap.field(t, Tag::Thread, ID)? as u32)
    }

    #[inline]
    pub fn control(heap: &Heap, t: Address) -> RuntimeResult<Address> {
        Ok(heap.child(t, Tag::Thread, CONTROL)?)
    }

    #[inline]
    pub fn stash(heap: &Heap, t: Address) -> RuntimeResult<Address> {
        Ok(heap.child(t, Tag::Thread, STASH)?)
    }

    #[inline]
    pub fn env(heap: &Heap, t: Address) -> RuntimeResult<Address> {
        Ok(heap.child(t, Tag::Thread, ENV)?)
    }

    pub fn frame(heap: &Heap, t: Address) -> RuntimeResult<Address> {
        env::frame(heap, env(heap, t)?)
    }

    pub fn structs(heap: &Heap, t: Address) -> RuntimeResult<Address> {
        env::structs(heap, env(heap, t)?)
    }

    pub fn is_finished(heap: &Heap, t: Address) -> RuntimeResult<bool> {
        control::is_empty(heap, control(heap, t)?)
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Layout: field 0 = next thread id; child 0 = run queue.
pub mod scheduler {
    use super::*;

    pub const NEXT_ID: usize = 0;
    pub const RUN_QUEUE: usize = 0;

    pub fn create(heap: &mut Heap) -> RuntimeResult<Address> {
        let s = heap.allocate_object(Tag::Scheduler, 1, 1)?;
        match queue::create(heap) {
            Ok(q) => heap.set_child_owned(s, Tag::Scheduler, RUN_QUEUE, q)?,
            Err(err) => {
                heap.free(s)?;
                return Err(err);
            }
        }
        Ok(s)
    }

    #[inline]
    fn run_queue(heap: &Heap, s: Address) -> RuntimeResult<Address> {
        Ok(heap.child(s, Tag::Scheduler, RUN_QUEUE)?)
    }

    /// Hands out increasing thread ids, starting at 0.
    pub fn next_id(heap: &mut Heap, s: Address) -> RuntimeResult<u32> {
        let id = heap.field(s, Tag::Scheduler, NEXT_ID)?;
        heap.set_field(s, Tag::Scheduler, NEXT_ID, id + 1)?;
        Ok(id as u32)
    }

    pub fn enqueue(heap: &mut Heap, s: Address, t: Address) -> RuntimeResult<()> {
        let q = run_queue(heap, s)?;
        queue::enqueue(heap, q, t)
    }

    /// Owned thread at the front, nil when nothing is runnable.
    pub fn dequeue(heap: &mut Heap, s: Address) -> RuntimeResult<Address> {
        let q = run_queue(heap, s)?;
        queue::dequeue(heap, q)
    }

    pub fn len(heap: &Heap, s: Address) -> RuntimeResult<usize> {
        queue::len(heap, run_queue(heap, s)?)
    }

    pub fn is_empty(heap: &Heap, s: Address) -> RuntimeResult<bool> {
        Ok(len(heap, s)? == 0)
    }

    /// Runnable threads in dequeue order, borrowed.
    pub fn threads(heap: &Heap, s: Address) -> RuntimeResult<Vec<Address>> {
        queue::values(heap, run_queue(heap, s)?)
    }
}

// =============================================================================
// Waker
// =============================================================================

/// Single-use handle on a parked thread.
///
/// Layout: child 0 = thread, nil once woken.
pub mod waker {
    use super::*;

    pub const THREAD: usize = 0;

    pub fn create(heap: &mut Heap, t: Address) -> RuntimeResult<Address> {
        let w = heap.allocate_object(Tag::Waker, 0, 1)?;
        heap.set_child(w, Tag::Waker, THREAD, t)?;
        Ok(w)
    }

    #[inline]
    pub fn thread(heap: &Heap, w: Address) -> RuntimeResult<Address> {
        Ok(heap.child(w, Tag::Waker, THREAD)?)
    }

    #[inline]
    pub fn is_spent(heap: &Heap, w: Address) -> RuntimeResult<bool> {
        Ok(thread(heap, w)?.is_nil())
    }

    /// Re-enqueues the parked thread. Returns false if it was already woken.
    pub fn wake(heap: &mut Heap, w: Address, s: Address) -> RuntimeResult<bool> {
        let t = heap.take_child(w, Tag::Waker, THREAD)?;
        if t.is_nil() {
            return Ok(false);
        }
        let result = scheduler::enqueue(heap, s, t);
        heap.free(t)?;
        result.map(|()| true)
    }

    /// Parks `t` on `wait_queue`: the thread is reachable only through the new
    /// waker until someone wakes it.
    pub fn park(heap: &mut Heap, t: Address, wait_queue: Address) -> RuntimeResult<()> {
        let w = create(heap, t)?;
        queue::enqueue_owned(heap, wait_queue, w)
    }

    /// Wakes the first waker in `wait_queue` that still holds a thread.
    pub fn wake_one(heap: &mut Heap, wait_queue: Address, s: Address) -> RuntimeResult<bool> {
        loop {
            let w = queue::dequeue(heap, wait_queue)?;
            if w.is_nil() {
                return Ok(false);
            }
            let woken = wake(heap, w, s);
            heap.free(w)?;
            if woken? {
                return Ok(true);
            }
        }
    }

    /// Wakes every waker in `wait_queue`; returns how many threads resumed.
    pub fn wake_all(heap: &mut Heap, wait_queue: Address, s: Address) -> RuntimeResult<usize> {
        let mut count = 0;
        while wake_one(heap, wait_queue, s)? {
            count += 1;
        }
        Ok(count)
    }
}

// =============================================================================
// Waiting instance
// =============================================================================

/// A thread's registration on a channel wait queue.
///
/// Layout: children = waker, value (the pending send, or nil), body (control
/// node pushed onto the thread when the operation completes, or nil). Select
/// registers one instance per case, all sharing one waker; once that waker is
/// spent the remaining instances are stale and get discarded.
pub mod waiting {
    use super::*;
    use crate::context::{control as control_stack, stash as stash_stack};

    pub const WAKER: usize = 0;
    pub const VALUE: usize = 1;
    pub const BODY: usize = 2;

    pub fn create(heap: &mut Heap, w: Address, value: Address, body: Address) -> RuntimeResult<Address> {
        let inst = heap.allocate_object(Tag::WaitingInstance, 0, 3)?;
        heap.set_child(inst, Tag::WaitingInstance, WAKER, w)?;
        heap.set_child(inst, Tag::WaitingInstance, VALUE, value)?;
        heap.set_child(inst, Tag::WaitingInstance, BODY, body)?;
        Ok(inst)
    }

    #[inline]
    pub fn waker(heap: &Heap, inst: Address) -> RuntimeResult<Address> {
        Ok(heap.child(inst, Tag::WaitingInstance, WAKER)?)
    }

    #[inline]
    pub fn body(heap: &Heap, inst: Address) -> RuntimeResult<Address> {
        Ok(heap.child(inst, Tag::WaitingInstance, BODY)?)
    }

    /// Moves the pending value out; the caller owns it.
    pub fn take_value(heap: &mut Heap, inst: Address) -> RuntimeResult<Address> {
        Ok(heap.take_child(inst, Tag::WaitingInstance, VALUE)?)
    }

    pub fn is_stale(heap: &Heap, inst: Address) -> RuntimeResult<bool> {
        waker::is_spent(heap, waker(heap, inst)?)
    }

    /// Dequeues until a live instance turns up (owned) or the queue runs dry
    /// (nil). Stale instances are released on the way.
    pub fn first_live(heap: &mut Heap, wait_queue: Address) -> RuntimeResult<Address> {
        loop {
            let inst = queue::dequeue(heap, wait_queue)?;
            if inst.is_nil() || !is_stale(heap, inst)? {
                return Ok(inst);
            }
            log::trace!("discarding stale waiting instance {}", inst);
            heap.free(inst)?;
        }
    }

    /// Completes a live instance: `value` (owned, may be nil for senders) goes
    /// onto the waiting thread's stash, the body onto its control, and the
    /// thread is woken.
    pub fn deliver(heap: &mut Heap, inst: Address, value: Option<Address>, s: Address) -> RuntimeResult<()> {
        let w = waker(heap, inst)?;
        let t = waker::thread(heap, w)?;
        if let Some(value) = value {
            let stash = thread::stash(heap, t)?;
            stash_stack::push_owned(heap, stash, value)?;
        }
        let body = body(heap, inst)?;
        if !body.is_nil() {
            let control = thread::control(heap, t)?;
            control_stack::push(heap, control, body)?;
        }
        waker::wake(heap, w, s)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::primitive;

    fn setup() -> (Heap, Address, Address) {
        let mut heap = Heap::new(1 << 14).unwrap();
        let global = frame::create(&mut heap, Address::NIL).unwrap();
        let s = scheduler::create(&mut heap).unwrap();
        (heap, global, s)
    }

    #[test]
    fn test_scheduler_is_fifo_and_ids_increase() {
        let (mut heap, global, s) = setup();
        let mut threads = Vec::new();
        for _ in 0..3 {
            let id = scheduler::next_id(&mut heap, s).unwrap();
            let t = thread::create(&mut heap, id, global, global).unwrap();
            scheduler::enqueue(&mut heap, s, t).unwrap();
            threads.push(t);
        }
        assert_eq!(scheduler::threads(&heap, s).unwrap(), threads);
        let first = scheduler::dequeue(&mut heap, s).unwrap();
        assert_eq!(thread::id(&heap, first).unwrap(), 0);
        assert_eq!(scheduler::len(&heap, s).unwrap(), 2);

        heap.free(first).unwrap();
        for t in threads {
            heap.free(t).unwrap();
        }
        heap.free(s).unwrap();
        heap.free(global).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_waker_is_single_use() {
        let (mut heap, global, s) = setup();
        let t = thread::create(&mut heap, 0, global, global).unwrap();
        let w = waker::create(&mut heap, t).unwrap();
        heap.free(t).unwrap();

        assert!(waker::wake(&mut heap, w, s).unwrap());
        assert!(!waker::wake(&mut heap, w, s).unwrap());
        assert!(waker::is_spent(&heap, w).unwrap());
        assert_eq!(scheduler::len(&heap, s).unwrap(), 1);

        heap.free(w).unwrap();
        heap.free(s).unwrap();
        heap.free(global).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_fork_shares_scope_only() {
        let (mut heap, global, s) = setup();
        let t = thread::create(&mut heap, 0, global, global).unwrap();
        let env = thread::env(&heap, t).unwrap();
        let inner = env::push_frame(&mut heap, env).unwrap();
        let one = primitive::new_int32(&mut heap, 1).unwrap();
        let parent_stash = thread::stash(&heap, t).unwrap();
        stash::push_owned(&mut heap, parent_stash, one).unwrap();

        let child = thread::fork(&mut heap, t, 1).unwrap();
        assert_eq!(thread::frame(&heap, child).unwrap(), inner);
        assert!(stash::is_empty(&heap, thread::stash(&heap, child).unwrap()).unwrap());
        assert!(thread::is_finished(&heap, child).unwrap());

        env::pop_frame(&mut heap, env).unwrap();
        assert_eq!(thread::frame(&heap, t).unwrap(), global);
        assert!(heap.is_live(inner));

        for obj in [t, child, s, global] {
            heap.free(obj).unwrap();
        }
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_stale_instances_are_skipped() {
        let (mut heap, global, s) = setup();
        let t = thread::create(&mut heap, 0, global, global).unwrap();
        let shared = waker::create(&mut heap, t).unwrap();
        let wait_queue = queue::create(&mut heap).unwrap();
        for _ in 0..2 {
            let inst = waiting::create(&mut heap, shared, Address::NIL, Address::NIL).unwrap();
            queue::enqueue_owned(&mut heap, wait_queue, inst).unwrap();
        }

        let live = waiting::first_live(&mut heap, wait_queue).unwrap();
        let seven = primitive::new_int32(&mut heap, 7).unwrap();
        waiting::deliver(&mut heap, live, Some(seven), s).unwrap();
        heap.free(live).unwrap();
        let top = stash::peek(&heap, thread::stash(&heap, t).unwrap()).unwrap();
        assert_eq!(primitive::to_int32(&heap, top).unwrap(), 7);

        assert_eq!(waiting::first_live(&mut heap, wait_queue).unwrap(), Address::NIL);
        assert!(queue::is_empty(&heap, wait_queue).unwrap());

        for obj in [t, shared, wait_queue, s, global] {
            heap.free(obj).unwrap();
        }
        assert!(heap.check_all_released());
    }
}
