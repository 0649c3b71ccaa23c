//! Execution gate: in-flight call accounting and the drain barrier used by
//! environment transitions.
//!
//! Ordinary calls only touch an atomic counter. A transition (`close`) flips
//! the gate shut, which makes new outermost admissions wait, and then waits
//! until every admission held by other threads has been released. Admissions
//! on a thread that already holds one are never blocked, and a thread that
//! closes the gate does not wait for its own admissions, so retries issued
//! from inside a running call cannot deadlock.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Admissions held by the current thread, keyed by gate id.
    static HELD: RefCell<HashMap<u64, usize>> = RefCell::new(HashMap::new());
}

#[derive(Default)]
struct Barrier {
    closed: bool,
    /// Admissions held by threads parked in `close` behind another closer.
    parked: usize,
}

pub struct ExecutionGate {
    id: u64,
    executing: AtomicUsize,
    closed: AtomicBool,
    barrier: Mutex<Barrier>,
    changed: Condvar,
}

impl Default for ExecutionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionGate {
    pub fn new() -> Self {
        Self {
            id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
            executing: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            barrier: Mutex::new(Barrier::default()),
            changed: Condvar::new(),
        }
    }

    /// Number of admitted calls that have not exited yet.
    pub fn executing_count(&self) -> usize {
        self.executing.load(Ordering::SeqCst)
    }

    /// Run `task` while holding an admission. The admission is released even
    /// if `task` unwinds.
    pub fn execute<T>(&self, task: impl FnOnce() -> T) -> T {
        let _ticket = self.admit();
        task()
    }

    pub fn admit(&self) -> Ticket<'_> {
        if self.held() == 0 {
            loop {
                self.executing.fetch_add(1, Ordering::SeqCst);
                if !self.closed.load(Ordering::SeqCst) {
                    break;
                }
                self.release();
                let barrier = self.lock();
                drop(
                    self.changed
                        .wait_while(barrier, |b| b.closed)
                        .unwrap_or_else(PoisonError::into_inner),
                );
            }
        } else {
            self.executing.fetch_add(1, Ordering::SeqCst);
        }
        self.adjust_held(true);
        Ticket {
            gate: self,
            _thread_bound: PhantomData,
        }
    }

    /// Shut the gate and wait until admissions held by other threads drain.
    ///
    /// Only one closer proceeds at a time; a second closer parks until the
    /// first reopens the gate, and its own admissions are not waited for in
    /// the meantime.
    pub fn close(&self) -> Closed<'_> {
        let own = self.held();
        let mut barrier = self.lock();
        if barrier.closed {
            barrier.parked += own;
            self.changed.notify_all();
            barrier = self
                .changed
                .wait_while(barrier, |b| b.closed)
                .unwrap_or_else(PoisonError::into_inner);
            barrier.parked -= own;
        }
        barrier.closed = true;
        self.closed.store(true, Ordering::SeqCst);
        drop(
            self.changed
                .wait_while(barrier, |b| {
                    self.executing.load(Ordering::SeqCst) > b.parked + own
                })
                .unwrap_or_else(PoisonError::into_inner),
        );
        Closed {
            gate: self,
            _thread_bound: PhantomData,
        }
    }

    fn open(&self) {
        let mut barrier = self.lock();
        barrier.closed = false;
        self.closed.store(false, Ordering::SeqCst);
        self.changed.notify_all();
    }

    fn release(&self) {
        self.executing.fetch_sub(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            let _barrier = self.lock();
            self.changed.notify_all();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Barrier> {
        self.barrier.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn held(&self) -> usize {
        HELD.with(|held| held.borrow().get(&self.id).copied().unwrap_or(0))
    }

    fn adjust_held(&self, admitted: bool) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            let count = held.entry(self.id).or_insert(0);
            if admitted {
                *count += 1;
            } else {
                *count -= 1;
                if *count == 0 {
                    held.remove(&self.id);
                }
            }
        });
    }
}

/// One admission through the gate; released on drop.
pub struct Ticket<'a> {
    gate: &'a ExecutionGate,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        self.gate.adjust_held(false);
        self.gate.release();
    }
}

/// Proof that the gate is shut and drained; reopens it on drop.
pub struct Closed<'a> {
    gate: &'a ExecutionGate,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for Closed<'_> {
    fn drop(&mut self) {
        self.gate.open();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier as ThreadBarrier};
    use std::thread;
    use std::time::Duration;

    fn wait_for(gate: &ExecutionGate, count: usize) {
        for _ in 0..500 {
            if gate.executing_count() == count {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!(
            "executing count stuck at {}, wanted {count}",
            gate.executing_count()
        );
    }

    #[test]
    fn counts_overlapping_calls() {
        let gate = Arc::new(ExecutionGate::new());
        let mut releases = Vec::new();
        let mut handles = Vec::new();

        for i in 0..4 {
            let (tx, rx) = mpsc::channel::<()>();
            releases.push(tx);
            let g = Arc::clone(&gate);
            handles.push(thread::spawn(move || {
                g.execute(|| rx.recv().unwrap());
            }));
            wait_for(&gate, i + 1);
        }

        for (i, tx) in releases.into_iter().enumerate() {
            tx.send(()).unwrap();
            wait_for(&gate, 3 - i);
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(gate.executing_count(), 0);
    }

    #[test]
    fn release_survives_panics() {
        let gate = ExecutionGate::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            gate.execute(|| panic!("task failure"));
        }));
        assert!(result.is_err());
        assert_eq!(gate.executing_count(), 0);
    }

    #[test]
    fn nested_calls_are_counted() {
        let gate = ExecutionGate::new();
        let inner = gate.execute(|| gate.execute(|| gate.executing_count()));
        assert_eq!(inner, 2);
        assert_eq!(gate.executing_count(), 0);
    }

    #[test]
    fn close_waits_for_other_threads() {
        let gate = Arc::new(ExecutionGate::new());
        let (tx, rx) = mpsc::channel::<()>();
        let worker = {
            let g = Arc::clone(&gate);
            thread::spawn(move || g.execute(|| rx.recv().unwrap()))
        };
        wait_for(&gate, 1);

        let drained = Arc::new(AtomicBool::new(false));
        let closer = {
            let g = Arc::clone(&gate);
            let d = Arc::clone(&drained);
            thread::spawn(move || {
                let _closed = g.close();
                d.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!drained.load(Ordering::SeqCst), "close returned early");

        tx.send(()).unwrap();
        worker.join().unwrap();
        closer.join().unwrap();
        assert!(drained.load(Ordering::SeqCst));
        assert_eq!(gate.executing_count(), 0);
    }

    #[test]
    fn close_from_inside_a_call_does_not_deadlock() {
        let gate = ExecutionGate::new();
        gate.execute(|| {
            let _closed = gate.close();
            // re-entrant admission while closed
            assert_eq!(gate.execute(|| gate.executing_count()), 2);
        });
        assert_eq!(gate.executing_count(), 0);
    }

    #[test]
    fn new_calls_wait_while_closed() {
        let gate = Arc::new(ExecutionGate::new());
        let closed = gate.close();

        let entered = Arc::new(AtomicBool::new(false));
        let caller = {
            let g = Arc::clone(&gate);
            let e = Arc::clone(&entered);
            thread::spawn(move || g.execute(|| e.store(true, Ordering::SeqCst)))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));

        drop(closed);
        caller.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn competing_closers_inside_calls_both_finish() {
        let gate = Arc::new(ExecutionGate::new());
        let start = Arc::new(ThreadBarrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let g = Arc::clone(&gate);
                let s = Arc::clone(&start);
                thread::spawn(move || {
                    g.execute(|| {
                        s.wait();
                        let _closed = g.close();
                        thread::sleep(Duration::from_millis(10));
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(gate.executing_count(), 0);
    }
}
