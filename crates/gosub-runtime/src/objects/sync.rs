//! Blocking primitives. Each keeps a FIFO queue of wakers.
//!
//! Operations that take a `thread` either re-enqueue it on the scheduler
//! (the operation went through) or park it on the primitive's queue, and
//! report which one happened.

use gosub_heap::{Address, Heap, Tag};

use crate::context::{scheduler, waker};
use crate::error::{mismatch, RuntimeError, RuntimeResult};
use crate::objects::list::queue;

pub const WAITERS: usize = 0;

fn create(heap: &mut Heap, tag: Tag, initial: i64) -> RuntimeResult<Address> {
    let obj = heap.allocate_object(tag, 1, 1)?;
    heap.set_field(obj, tag, 0, initial as u64)?;
    match queue::create(heap) {
        Ok(q) => heap.set_child_owned(obj, tag, WAITERS, q)?,
        Err(err) => {
            heap.free(obj)?;
            return Err(err);
        }
    }
    Ok(obj)
}

fn check(heap: &Heap, obj: Address, tag: Tag, expected: &'static str) -> RuntimeResult<()> {
    match heap.tag(obj)? {
        found if found == tag => Ok(()),
        found => mismatch(expected, found),
    }
}

fn counter(heap: &Heap, obj: Address, tag: Tag) -> RuntimeResult<i64> {
    Ok(heap.field(obj, tag, 0)? as i64)
}

fn set_counter(heap: &mut Heap, obj: Address, tag: Tag, value: i64) -> RuntimeResult<()> {
    Ok(heap.set_field(obj, tag, 0, value as u64)?)
}

fn waiters(heap: &Heap, obj: Address, tag: Tag) -> RuntimeResult<Address> {
    Ok(heap.child(obj, tag, WAITERS)?)
}

// =============================================================================
// Mutex
// =============================================================================

/// Layout: field 0 = locked flag; child 0 = waiter queue.
pub mod mutex {
    use super::*;

    pub fn create(heap: &mut Heap) -> RuntimeResult<Address> {
        super::create(heap, Tag::Mutex, 0)
    }

    pub fn is_locked(heap: &Heap, m: Address) -> RuntimeResult<bool> {
        check(heap, m, Tag::Mutex, "mutex")?;
        Ok(counter(heap, m, Tag::Mutex)? != 0)
    }

    /// Grants the lock and re-enqueues `thread`, or parks it.
    pub fn lock(heap: &mut Heap, m: Address, thread: Address, s: Address) -> RuntimeResult<bool> {
        if !is_locked(heap, m)? {
            set_counter(heap, m, Tag::Mutex, 1)?;
            scheduler::enqueue(heap, s, thread)?;
            return Ok(true);
        }
        let q = waiters(heap, m, Tag::Mutex)?;
        waker::park(heap, thread, q)?;
        Ok(false)
    }

    /// Hands the lock straight to the first waiter if there is one; the lock
    /// stays held across the handover.
    pub fn unlock(heap: &mut Heap, m: Address, s: Address) -> RuntimeResult<()> {
        if !is_locked(heap, m)? {
            return Err(RuntimeError::UnlockOfUnlocked);
        }
        let q = waiters(heap, m, Tag::Mutex)?;
        if !waker::wake_one(heap, q, s)? {
            set_counter(heap, m, Tag::Mutex, 0)?;
        }
        Ok(())
    }
}

// =============================================================================
// Semaphore
// =============================================================================

/// Layout: field 0 = permits (may go negative: one per parked waiter);
/// child 0 = waiter queue.
pub mod semaphore {
    use super::*;

    pub fn create(heap: &mut Heap, permits: i64) -> RuntimeResult<Address> {
        super::create(heap, Tag::Semaphore, permits)
    }

    pub fn permits(heap: &Heap, sem: Address) -> RuntimeResult<i64> {
        check(heap, sem, Tag::Semaphore, "semaphore")?;
        counter(heap, sem, Tag::Semaphore)
    }

    /// Takes a permit and re-enqueues `thread`, or parks it.
    pub fn acquire(heap: &mut Heap, sem: Address, thread: Address, s: Address) -> RuntimeResult<bool> {
        let permits = permits(heap, sem)? - 1;
        set_counter(heap, sem, Tag::Semaphore, permits)?;
        if permits >= 0 {
            scheduler::enqueue(heap, s, thread)?;
            return Ok(true);
        }
        let q = waiters(heap, sem, Tag::Semaphore)?;
        waker::park(heap, thread, q)?;
        Ok(false)
    }

    pub fn release(heap: &mut Heap, sem: Address, s: Address) -> RuntimeResult<()> {
        let permits = permits(heap, sem)? + 1;
        set_counter(heap, sem, Tag::Semaphore, permits)?;
        if permits <= 0 {
            let q = waiters(heap, sem, Tag::Semaphore)?;
            if !waker::wake_one(heap, q, s)? {
                return Err(RuntimeError::SemaphoreAccounting);
            }
        }
        Ok(())
    }
}

// =============================================================================
// WaitGroup
// =============================================================================

/// Layout: field 0 = counter; child 0 = waiter queue.
pub mod wait_group {
    use super::*;

    pub fn create(heap: &mut Heap) -> RuntimeResult<Address> {
        super::create(heap, Tag::WaitGroup, 0)
    }

    pub fn count(heap: &Heap, wg: Address) -> RuntimeResult<i64> {
        check(heap, wg, Tag::WaitGroup, "wait group")?;
        counter(heap, wg, Tag::WaitGroup)
    }

    /// Reaching zero wakes every waiter.
    pub fn add(heap: &mut Heap, wg: Address, delta: i64, s: Address) -> RuntimeResult<()> {
        let next = count(heap, wg)? + delta;
        if next < 0 {
            return Err(RuntimeError::NegativeWaitGroup);
        }
        set_counter(heap, wg, Tag::WaitGroup, next)?;
        if next == 0 {
            let q = waiters(heap, wg, Tag::WaitGroup)?;
            let woken = waker::wake_all(heap, q, s)?;
            if woken > 0 {
                log::trace!("wait group {} released {} waiters", wg, woken);
            }
        }
        Ok(())
    }

    /// Re-enqueues `thread` if the counter is zero, otherwise parks it.
    pub fn wait(heap: &mut Heap, wg: Address, thread: Address, s: Address) -> RuntimeResult<bool> {
        if count(heap, wg)? == 0 {
            scheduler::enqueue(heap, s, thread)?;
            return Ok(true);
        }
        let q = waiters(heap, wg, Tag::WaitGroup)?;
        waker::park(heap, thread, q)?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::thread;
    use crate::env::frame;
    use pretty_assertions::assert_eq;

    struct Fixture {
        heap: Heap,
        global: Address,
        sched: Address,
        threads: Vec<Address>,
    }

    impl Fixture {
        fn new(count: u32) -> Self {
            let mut heap = Heap::new(1 << 14).unwrap();
            let global = frame::create(&mut heap, Address::NIL).unwrap();
            let sched = scheduler::create(&mut heap).unwrap();
            let threads = (0..count)
                .map(|id| thread::create(&mut heap, id, global, global).unwrap())
                .collect();
            Fixture {
                heap,
                global,
                sched,
                threads,
            }
        }

        fn runnable(&self) -> Vec<u32> {
            scheduler::threads(&self.heap, self.sched)
                .unwrap()
                .into_iter()
                .map(|t| thread::id(&self.heap, t).unwrap())
                .collect()
        }

        fn drain(&mut self) {
            loop {
                let t = scheduler::dequeue(&mut self.heap, self.sched).unwrap();
                if t.is_nil() {
                    break;
                }
                self.heap.free(t).unwrap();
            }
        }

        fn finish(mut self, objects: &[Address]) {
            self.drain();
            for &obj in objects.iter().chain(&self.threads) {
                self.heap.free(obj).unwrap();
            }
            self.heap.free(self.sched).unwrap();
            self.heap.free(self.global).unwrap();
            assert!(self.heap.check_all_released());
        }
    }

    #[test]
    fn test_mutex_hands_over_in_fifo_order() {
        let mut f = Fixture::new(3);
        let m = mutex::create(&mut f.heap).unwrap();
        let [a, b, c] = [f.threads[0], f.threads[1], f.threads[2]];

        assert!(mutex::lock(&mut f.heap, m, a, f.sched).unwrap());
        assert!(!mutex::lock(&mut f.heap, m, b, f.sched).unwrap());
        assert!(!mutex::lock(&mut f.heap, m, c, f.sched).unwrap());
        assert_eq!(f.runnable(), vec![0]);

        mutex::unlock(&mut f.heap, m, f.sched).unwrap();
        assert!(mutex::is_locked(&f.heap, m).unwrap());
        assert_eq!(f.runnable(), vec![0, 1]);
        mutex::unlock(&mut f.heap, m, f.sched).unwrap();
        assert_eq!(f.runnable(), vec![0, 1, 2]);
        mutex::unlock(&mut f.heap, m, f.sched).unwrap();
        assert!(!mutex::is_locked(&f.heap, m).unwrap());
        assert_eq!(
            mutex::unlock(&mut f.heap, m, f.sched),
            Err(RuntimeError::UnlockOfUnlocked)
        );
        f.finish(&[m]);
    }

    #[test]
    fn test_semaphore_counts_permits() {
        let mut f = Fixture::new(3);
        let sem = semaphore::create(&mut f.heap, 1).unwrap();
        let [a, b, c] = [f.threads[0], f.threads[1], f.threads[2]];

        assert!(semaphore::acquire(&mut f.heap, sem, a, f.sched).unwrap());
        assert!(!semaphore::acquire(&mut f.heap, sem, b, f.sched).unwrap());
        assert!(!semaphore::acquire(&mut f.heap, sem, c, f.sched).unwrap());
        assert_eq!(semaphore::permits(&f.heap, sem).unwrap(), -2);

        semaphore::release(&mut f.heap, sem, f.sched).unwrap();
        semaphore::release(&mut f.heap, sem, f.sched).unwrap();
        assert_eq!(f.runnable(), vec![0, 1, 2]);
        semaphore::release(&mut f.heap, sem, f.sched).unwrap();
        assert_eq!(semaphore::permits(&f.heap, sem).unwrap(), 1);
        f.finish(&[sem]);
    }

    #[test]
    fn test_semaphore_accounting_violation() {
        let mut f = Fixture::new(0);
        let sem = semaphore::create(&mut f.heap, -1).unwrap();
        assert_eq!(
            semaphore::release(&mut f.heap, sem, f.sched),
            Err(RuntimeError::SemaphoreAccounting)
        );
        f.finish(&[sem]);
    }

    #[test]
    fn test_wait_group_wakes_all_at_zero() {
        let mut f = Fixture::new(2);
        let wg = wait_group::create(&mut f.heap).unwrap();
        let [a, b] = [f.threads[0], f.threads[1]];

        assert!(wait_group::wait(&mut f.heap, wg, a, f.sched).unwrap());
        f.drain();
        wait_group::add(&mut f.heap, wg, 2, f.sched).unwrap();
        assert!(!wait_group::wait(&mut f.heap, wg, a, f.sched).unwrap());
        assert!(!wait_group::wait(&mut f.heap, wg, b, f.sched).unwrap());

        wait_group::add(&mut f.heap, wg, -1, f.sched).unwrap();
        assert!(f.runnable().is_empty());
        wait_group::add(&mut f.heap, wg, -1, f.sched).unwrap();
        assert_eq!(f.runnable(), vec![0, 1]);
        assert_eq!(
            wait_group::add(&mut f.heap, wg, -1, f.sched),
            Err(RuntimeError::NegativeWaitGroup)
        );
        assert_eq!(wait_group::count(&f.heap, wg).unwrap(), 0);
        f.finish(&[wg]);
    }
}
