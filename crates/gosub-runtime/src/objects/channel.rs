//! Channels.
//!
//! Layout: fields = capacity, closed flag; children = buffer queue, waiting
//! senders, waiting receivers, element type.
//!
//! Both wait queues hold waiting instances. A parked sender's instance carries
//! the value it wants to send; a parked receiver gets the value pushed onto
//! its stash before it is woken. With capacity 0 a value only ever passes
//! through the buffer inside a single operation, which gives the synchronous
//! hand-off of an unbuffered channel.

use gosub_heap::{Address, Heap, Tag};

use crate::context::{scheduler, stash, thread, waiting, waker};
use crate::error::{mismatch, RuntimeError, RuntimeResult};
use crate::objects::list::queue;
use crate::objects::types;

pub const FIELD_CAP: usize = 0;
pub const FIELD_CLOSED: usize = 1;

pub const BUFFER: usize = 0;
pub const SENDERS: usize = 1;
pub const RECEIVERS: usize = 2;
pub const ELEM_TYPE: usize = 3;

/// Outcome of a non-blocking channel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Done,
    /// Not ready; carries the wait queue to register on (borrowed).
    Wait(Address),
}

pub fn check(heap: &Heap, ch: Address) -> RuntimeResult<()> {
    match heap.tag(ch)? {
        Tag::Channel => Ok(()),
        other => mismatch("channel", other),
    }
}

pub fn create(heap: &mut Heap, elem: Address, cap: i64) -> RuntimeResult<Address> {
    if cap < 0 {
        return Err(RuntimeError::MakeChanSize);
    }
    let ch = heap.allocate_object(Tag::Channel, 2, 4)?;
    let result = (|| -> RuntimeResult<()> {
        heap.set_field(ch, Tag::Channel, FIELD_CAP, cap as u64)?;
        for slot in [BUFFER, SENDERS, RECEIVERS] {
            let q = queue::create(heap)?;
            heap.set_child_owned(ch, Tag::Channel, slot, q)?;
        }
        heap.set_child(ch, Tag::Channel, ELEM_TYPE, elem)?;
        Ok(())
    })();
    match result {
        Ok(()) => Ok(ch),
        Err(err) => {
            heap.free(ch)?;
            Err(err)
        }
    }
}

pub fn cap(heap: &Heap, ch: Address) -> RuntimeResult<usize> {
    check(heap, ch)?;
    Ok(heap.field(ch, Tag::Channel, FIELD_CAP)? as usize)
}

/// Number of buffered values.
pub fn len(heap: &Heap, ch: Address) -> RuntimeResult<usize> {
    queue::len(heap, slot(heap, ch, BUFFER)?)
}

pub fn is_closed(heap: &Heap, ch: Address) -> RuntimeResult<bool> {
    check(heap, ch)?;
    Ok(heap.field(ch, Tag::Channel, FIELD_CLOSED)? != 0)
}

pub fn elem_type(heap: &Heap, ch: Address) -> RuntimeResult<Address> {
    slot(heap, ch, ELEM_TYPE)
}

fn slot(heap: &Heap, ch: Address, index: usize) -> RuntimeResult<Address> {
    check(heap, ch)?;
    Ok(heap.child(ch, Tag::Channel, index)?)
}

pub fn senders(heap: &Heap, ch: Address) -> RuntimeResult<Address> {
    slot(heap, ch, SENDERS)
}

pub fn receivers(heap: &Heap, ch: Address) -> RuntimeResult<Address> {
    slot(heap, ch, RECEIVERS)
}

/// Sends the borrowed `value` if a receiver is waiting or the buffer has
/// room. A waiting receiver is handed the value and woken.
pub fn try_send(heap: &mut Heap, ch: Address, value: Address, s: Address) -> RuntimeResult<Attempt> {
    if is_closed(heap, ch)? {
        return Err(RuntimeError::SendOnClosed);
    }
    let buffer = slot(heap, ch, BUFFER)?;
    let receivers = receivers(heap, ch)?;
    let receiver = waiting::first_live(heap, receivers)?;
    if receiver.is_nil() && queue::len(heap, buffer)? >= cap(heap, ch)? {
        return Ok(Attempt::Wait(senders(heap, ch)?));
    }

    queue::enqueue(heap, buffer, value)?;
    if !receiver.is_nil() {
        let received = queue::dequeue(heap, buffer)?;
        let delivered = waiting::deliver(heap, receiver, Some(received), s);
        heap.free(receiver)?;
        delivered?;
    }
    Ok(Attempt::Done)
}

/// Receives onto `thread`'s stash. A waiting sender's value moves into the
/// buffer first and the sender is woken; a closed, drained channel yields the
/// element type's zero value.
pub fn try_recv(
    heap: &mut Heap,
    ch: Address,
    thread: Address,
    structs: Address,
    s: Address,
) -> RuntimeResult<Attempt> {
    let buffer = slot(heap, ch, BUFFER)?;
    let senders = senders(heap, ch)?;
    let sender = waiting::first_live(heap, senders)?;
    if !sender.is_nil() {
        let pending = waiting::take_value(heap, sender)?;
        let moved = queue::enqueue_owned(heap, buffer, pending)
            .and_then(|()| waiting::deliver(heap, sender, None, s));
        heap.free(sender)?;
        moved?;
    }

    let stash = thread::stash(heap, thread)?;
    if !queue::is_empty(heap, buffer)? {
        let value = queue::dequeue(heap, buffer)?;
        stash::push_owned(heap, stash, value)?;
        return Ok(Attempt::Done);
    }
    if is_closed(heap, ch)? {
        let elem = elem_type(heap, ch)?;
        let zero = types::zero_value(heap, structs, elem)?;
        stash::push_owned(heap, stash, zero)?;
        return Ok(Attempt::Done);
    }
    Ok(Attempt::Wait(receivers(heap, ch)?))
}

/// `ch <- value` for `thread`: re-enqueues it on success, otherwise parks it
/// with the value. Sends on a nil channel park forever.
pub fn send(heap: &mut Heap, ch: Address, value: Address, thread: Address, s: Address) -> RuntimeResult<bool> {
    if ch.is_nil() {
        return Ok(false);
    }
    match try_send(heap, ch, value, s)? {
        Attempt::Done => {
            scheduler::enqueue(heap, s, thread)?;
            Ok(true)
        }
        Attempt::Wait(wait_queue) => {
            register(heap, wait_queue, thread, value)?;
            Ok(false)
        }
    }
}

/// `<-ch` for `thread`; the received value ends up on its stash.
pub fn recv(heap: &mut Heap, ch: Address, thread: Address, structs: Address, s: Address) -> RuntimeResult<bool> {
    if ch.is_nil() {
        return Ok(false);
    }
    match try_recv(heap, ch, thread, structs, s)? {
        Attempt::Done => {
            scheduler::enqueue(heap, s, thread)?;
            Ok(true)
        }
        Attempt::Wait(wait_queue) => {
            register(heap, wait_queue, thread, Address::NIL)?;
            Ok(false)
        }
    }
}

fn register(heap: &mut Heap, wait_queue: Address, thread: Address, value: Address) -> RuntimeResult<()> {
    let w = waker::create(heap, thread)?;
    let inst = waiting::create(heap, w, value, Address::NIL);
    heap.free(w)?;
    queue::enqueue_owned(heap, wait_queue, inst?)
}

/// Marks the channel closed and releases every parked receiver with the zero
/// value. A sender still parked on the channel would panic in Go; here it is
/// reported as a send on a closed channel.
pub fn close(heap: &mut Heap, ch: Address, structs: Address, s: Address) -> RuntimeResult<()> {
    if ch.is_nil() {
        return Err(RuntimeError::CloseOfNil);
    }
    if is_closed(heap, ch)? {
        return Err(RuntimeError::CloseOfClosed);
    }
    heap.set_field(ch, Tag::Channel, FIELD_CLOSED, 1)?;

    let receivers = receivers(heap, ch)?;
    let elem = elem_type(heap, ch)?;
    loop {
        let receiver = waiting::first_live(heap, receivers)?;
        if receiver.is_nil() {
            break;
        }
        let delivered = types::zero_value(heap, structs, elem)
            .and_then(|zero| waiting::deliver(heap, receiver, Some(zero), s));
        heap.free(receiver)?;
        delivered?;
    }

    let senders = senders(heap, ch)?;
    let sender = waiting::first_live(heap, senders)?;
    if !sender.is_nil() {
        heap.free(sender)?;
        return Err(RuntimeError::SendOnClosed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::stash;
    use crate::env::frame;
    use crate::objects::primitive;
    use pretty_assertions::assert_eq;

    struct Fixture {
        heap: Heap,
        global: Address,
        sched: Address,
        int: Address,
        threads: Vec<Address>,
    }

    impl Fixture {
        fn new(count: u32) -> Self {
            let mut heap = Heap::new(1 << 15).unwrap();
            let global = frame::create(&mut heap, Address::NIL).unwrap();
            let sched = scheduler::create(&mut heap).unwrap();
            let int = types::simple(&mut heap, Tag::TypeInt32).unwrap();
            let threads = (0..count)
                .map(|id| thread::create(&mut heap, id, global, global).unwrap())
                .collect();
            Fixture {
                heap,
                global,
                sched,
                int,
                threads,
            }
        }

        fn int(&mut self, v: i32) -> Address {
            primitive::new_int32(&mut self.heap, v).unwrap()
        }

        fn send(&mut self, ch: Address, t: usize, v: i32) -> bool {
            let value = self.int(v);
            let sent = send(&mut self.heap, ch, value, self.threads[t], self.sched).unwrap();
            self.heap.free(value).unwrap();
            sent
        }

        fn recv(&mut self, ch: Address, t: usize) -> bool {
            recv(&mut self.heap, ch, self.threads[t], self.global, self.sched).unwrap()
        }

        fn pop_int(&mut self, t: usize) -> i32 {
            let st = thread::stash(&self.heap, self.threads[t]).unwrap();
            let v = stash::pop(&mut self.heap, st).unwrap();
            let n = primitive::to_int32(&self.heap, v).unwrap();
            self.heap.free(v).unwrap();
            n
        }

        fn runnable(&self) -> Vec<u32> {
            scheduler::threads(&self.heap, self.sched)
                .unwrap()
                .into_iter()
                .map(|t| thread::id(&self.heap, t).unwrap())
                .collect()
        }

        fn finish(mut self, objects: &[Address]) {
            loop {
                let t = scheduler::dequeue(&mut self.heap, self.sched).unwrap();
                if t.is_nil() {
                    break;
                }
                self.heap.free(t).unwrap();
            }
            for &obj in objects.iter().chain(&self.threads) {
                self.heap.free(obj).unwrap();
            }
            for obj in [self.int, self.sched, self.global] {
                self.heap.free(obj).unwrap();
            }
            assert!(self.heap.check_all_released());
        }
    }

    #[test]
    fn test_unbuffered_send_blocks_until_received() {
        let mut f = Fixture::new(2);
        let ch = create(&mut f.heap, f.int, 0).unwrap();

        assert!(!f.send(ch, 0, 42));
        assert!(f.runnable().is_empty());
        assert_eq!(len(&f.heap, ch).unwrap(), 0);

        assert!(f.recv(ch, 1));
        assert_eq!(f.runnable(), vec![0, 1]);
        assert_eq!(f.pop_int(1), 42);
        f.finish(&[ch]);
    }

    #[test]
    fn test_receiver_parks_and_gets_value_handed_over() {
        let mut f = Fixture::new(2);
        let ch = create(&mut f.heap, f.int, 0).unwrap();
        assert!(!f.recv(ch, 0));
        assert!(f.send(ch, 1, 7));
        assert_eq!(f.runnable(), vec![0, 1]);
        assert_eq!(f.pop_int(0), 7);
        f.finish(&[ch]);
    }

    #[test]
    fn test_buffered_capacity_one() {
        let mut f = Fixture::new(2);
        let ch = create(&mut f.heap, f.int, 1).unwrap();
        assert!(f.send(ch, 0, 1));
        assert_eq!(len(&f.heap, ch).unwrap(), 1);
        assert!(!f.send(ch, 0, 2));
        assert_eq!(f.runnable(), vec![0]);

        assert!(f.recv(ch, 1));
        assert_eq!(f.pop_int(1), 1);
        assert_eq!(f.runnable(), vec![0, 0, 1]);
        assert!(f.recv(ch, 1));
        assert_eq!(f.pop_int(1), 2);
        f.finish(&[ch]);
    }

    #[test]
    fn test_fifo_order() {
        let mut f = Fixture::new(1);
        let ch = create(&mut f.heap, f.int, 8).unwrap();
        for v in 0..5 {
            assert!(f.send(ch, 0, v));
        }
        let got: Vec<i32> = (0..5)
            .map(|_| {
                assert!(f.recv(ch, 0));
                f.pop_int(0)
            })
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        f.finish(&[ch]);
    }

    #[test]
    fn test_close_releases_receivers_with_zero() {
        let mut f = Fixture::new(2);
        let ch = create(&mut f.heap, f.int, 0).unwrap();
        assert!(!f.recv(ch, 0));
        close(&mut f.heap, ch, f.global, f.sched).unwrap();
        assert_eq!(f.pop_int(0), 0);

        assert!(f.recv(ch, 1));
        assert_eq!(f.pop_int(1), 0);
        let one = f.int(1);
        assert_eq!(
            try_send(&mut f.heap, ch, one, f.sched),
            Err(RuntimeError::SendOnClosed)
        );
        assert_eq!(
            close(&mut f.heap, ch, f.global, f.sched),
            Err(RuntimeError::CloseOfClosed)
        );
        f.finish(&[ch, one]);
    }
}
