//! `select` over channel cases.
//!
//! Cases are tried in a fresh uniformly random order so that simultaneously
//! ready cases are chosen with equal probability. When nothing is ready and
//! there is no default, the thread parks on every involved channel behind one
//! shared waker; the first channel operation to complete spends the waker and
//! the other registrations go stale.

use fastrand::Rng;
use gosub_heap::{Address, Heap};

use crate::context::{waiting, waker};
use crate::error::RuntimeResult;
use crate::objects::channel::{self, Attempt};
use crate::objects::list::queue;

/// One communication clause with its already evaluated operands (borrowed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Case {
    Send {
        channel: Address,
        value: Address,
        body: Address,
    },
    Receive {
        channel: Address,
        body: Address,
    },
}

impl Case {
    pub fn channel(&self) -> Address {
        match *self {
            Case::Send { channel, .. } | Case::Receive { channel, .. } => channel,
        }
    }

    pub fn body(&self) -> Address {
        match *self {
            Case::Send { body, .. } | Case::Receive { body, .. } => body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Case `i` completed. A received value is already on the thread's stash.
    Ready(usize),
    /// Nothing was ready; run the default clause.
    Default,
    /// The thread is parked on every case's channel.
    Blocked,
}

/// Fisher–Yates shuffle of `0..n`.
pub fn permutation(rng: &mut Rng, n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = rng.usize(..=i);
        order.swap(i, j);
    }
    order
}

/// Runs one `select` for `thread`. Cases on nil channels are never ready.
/// Neither re-enqueues the thread nor pushes bodies for ready cases; both are
/// left to the caller.
pub fn select(
    heap: &mut Heap,
    cases: &[Case],
    has_default: bool,
    thread: Address,
    structs: Address,
    s: Address,
    rng: &mut Rng,
) -> RuntimeResult<Outcome> {
    for index in permutation(rng, cases.len()) {
        let attempt = match cases[index] {
            Case::Send { channel: ch, .. } | Case::Receive { channel: ch, .. } if ch.is_nil() => {
                continue
            }
            Case::Send { channel: ch, value, .. } => channel::try_send(heap, ch, value, s)?,
            Case::Receive { channel: ch, .. } => channel::try_recv(heap, ch, thread, structs, s)?,
        };
        if attempt == Attempt::Done {
            log::trace!("select: case {} of {} ready", index, cases.len());
            return Ok(Outcome::Ready(index));
        }
    }

    if has_default {
        return Ok(Outcome::Default);
    }

    let shared = waker::create(heap, thread)?;
    let registered = register_all(heap, cases, shared);
    heap.free(shared)?;
    registered?;
    log::trace!("select: thread {} parked on {} cases", thread, cases.len());
    Ok(Outcome::Blocked)
}

fn register_all(heap: &mut Heap, cases: &[Case], shared: Address) -> RuntimeResult<()> {
    for case in cases {
        let (wait_queue, value) = match *case {
            Case::Send { channel: ch, .. } | Case::Receive { channel: ch, .. } if ch.is_nil() => {
                continue
            }
            Case::Send { channel: ch, value, .. } => (channel::senders(heap, ch)?, value),
            Case::Receive { channel: ch, .. } => (channel::receivers(heap, ch)?, Address::NIL),
        };
        let inst = waiting::create(heap, shared, value, case.body())?;
        queue::enqueue_owned(heap, wait_queue, inst)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{scheduler, stash, thread};
    use crate::env::frame;
    use crate::objects::{primitive, types};
    use gosub_heap::Tag;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_permutation_is_a_shuffle() {
        let mut rng = Rng::with_seed(7);
        let mut first = [0usize; 4];
        for _ in 0..4000 {
            let order = permutation(&mut rng, 4);
            let mut sorted = order.clone();
            sorted.sort();
            assert_eq!(sorted, vec![0, 1, 2, 3]);
            first[order[0]] += 1;
        }
        for count in first {
            assert!((800..1200).contains(&count), "skewed first pick: {:?}", first);
        }
        assert!(permutation(&mut rng, 0).is_empty());
    }

    struct Fixture {
        heap: Heap,
        global: Address,
        sched: Address,
        int: Address,
    }

    impl Fixture {
        fn new() -> Self {
            let mut heap = Heap::new(1 << 15).unwrap();
            let global = frame::create(&mut heap, Address::NIL).unwrap();
            let sched = scheduler::create(&mut heap).unwrap();
            let int = types::simple(&mut heap, Tag::TypeInt32).unwrap();
            Fixture {
                heap,
                global,
                sched,
                int,
            }
        }

        fn thread(&mut self, id: u32) -> Address {
            thread::create(&mut self.heap, id, self.global, self.global).unwrap()
        }

        fn channel(&mut self, cap: i64) -> Address {
            channel::create(&mut self.heap, self.int, cap).unwrap()
        }

        fn fill(&mut self, ch: Address, v: i32) {
            let value = primitive::new_int32(&mut self.heap, v).unwrap();
            assert_eq!(
                channel::try_send(&mut self.heap, ch, value, self.sched).unwrap(),
                Attempt::Done
            );
            self.heap.free(value).unwrap();
        }

        fn pop_int(&mut self, t: Address) -> i32 {
            let st = thread::stash(&self.heap, t).unwrap();
            let v = stash::pop(&mut self.heap, st).unwrap();
            let n = primitive::to_int32(&self.heap, v).unwrap();
            self.heap.free(v).unwrap();
            n
        }

        fn finish(mut self, objects: &[Address]) {
            loop {
                let t = scheduler::dequeue(&mut self.heap, self.sched).unwrap();
                if t.is_nil() {
                    break;
                }
                self.heap.free(t).unwrap();
            }
            for &obj in objects {
                self.heap.free(obj).unwrap();
            }
            for obj in [self.int, self.sched, self.global] {
                self.heap.free(obj).unwrap();
            }
            assert!(self.heap.check_all_released());
        }
    }

    #[test]
    fn test_ready_cases_are_chosen_fairly() {
        let mut f = Fixture::new();
        let t = f.thread(0);
        let a = f.channel(1);
        let b = f.channel(1);
        let cases = [
            Case::Receive { channel: a, body: Address::NIL },
            Case::Receive { channel: b, body: Address::NIL },
        ];
        let mut rng = Rng::with_seed(42);
        let mut picks = [0usize; 2];
        f.fill(a, 1);
        f.fill(b, 2);
        for _ in 0..1000 {
            let outcome = select(&mut f.heap, &cases, false, t, f.global, f.sched, &mut rng).unwrap();
            let Outcome::Ready(i) = outcome else {
                panic!("expected a ready case, got {:?}", outcome);
            };
            picks[i] += 1;
            let got = f.pop_int(t);
            assert_eq!(got, i as i32 + 1);
            f.fill(cases[i].channel(), got);
        }
        assert!(picks.iter().all(|&n| (400..600).contains(&n)), "unfair: {:?}", picks);
        f.finish(&[t, a, b]);
    }

    #[test]
    fn test_default_runs_when_nothing_ready() {
        let mut f = Fixture::new();
        let t = f.thread(0);
        let a = f.channel(0);
        let cases = [
            Case::Receive { channel: a, body: Address::NIL },
            Case::Receive { channel: Address::NIL, body: Address::NIL },
        ];
        let mut rng = Rng::with_seed(1);
        let outcome = select(&mut f.heap, &cases, true, t, f.global, f.sched, &mut rng).unwrap();
        assert_eq!(outcome, Outcome::Default);
        assert!(queue::is_empty(&f.heap, channel::receivers(&f.heap, a).unwrap()).unwrap());
        f.finish(&[t, a]);
    }

    #[test]
    fn test_blocked_select_is_woken_once() {
        let mut f = Fixture::new();
        let t = f.thread(0);
        let sender = f.thread(1);
        let a = f.channel(0);
        let b = f.channel(0);
        let body = primitive::new_bool(&mut f.heap, true).unwrap();
        let nine = primitive::new_int32(&mut f.heap, 9).unwrap();
        let cases = [
            Case::Receive { channel: a, body },
            Case::Send { channel: b, value: nine, body: Address::NIL },
        ];
        let mut rng = Rng::with_seed(3);
        let outcome = select(&mut f.heap, &cases, false, t, f.global, f.sched, &mut rng).unwrap();
        assert_eq!(outcome, Outcome::Blocked);
        assert!(scheduler::is_empty(&f.heap, f.sched).unwrap());

        // a sender on `a` completes the receive case
        let five = primitive::new_int32(&mut f.heap, 5).unwrap();
        assert!(channel::send(&mut f.heap, a, five, sender, f.sched).unwrap());
        assert_eq!(scheduler::threads(&f.heap, f.sched).unwrap(), vec![t, sender]);
        assert_eq!(f.pop_int(t), 5);
        let control = thread::control(&f.heap, t).unwrap();
        assert_eq!(crate::context::control::peek(&f.heap, control).unwrap(), body);

        // the send registration on `b` is now stale
        let receiver = f.thread(2);
        let attempt = channel::try_recv(&mut f.heap, b, receiver, f.global, f.sched).unwrap();
        assert!(matches!(attempt, Attempt::Wait(_)));

        f.finish(&[t, sender, receiver, a, b, body, nine, five]);
    }
}
