//!
//! Parked Operations
//!
//! A `Waiter` represents one blocked thread: a single blocking send or
//! receive, or a whole select over several channels. Counterparts claim it
//! with a compare-and-swap on `selected`, so a select registered on many
//! channels is completed by exactly one of them.
//!
//! Protocol:
//! - the claimer CASes `selected` from `WAITING` to the case index,
//!   transfers the value through the entry's slot, then calls `complete`
//! - the owner can withdraw by CASing to `ABORTED`; if that fails it was
//!   claimed and must wait for completion
//!

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

pub(crate) const WAITING: usize = usize::MAX;
pub(crate) const ABORTED: usize = usize::MAX - 1;

/// Lock an internal mutex. Internal critical sections never run user code,
/// so a poisoned lock still holds consistent state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Waiter {
    selected: AtomicUsize,
    completed: Mutex<bool>,
    condvar: Condvar,
}

impl Waiter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            selected: AtomicUsize::new(WAITING),
            completed: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    pub(crate) fn is_waiting(&self) -> bool {
        self.selected.load(Ordering::SeqCst) == WAITING
    }

    pub(crate) fn try_claim(&self, case: usize) -> bool {
        self.selected
            .compare_exchange(WAITING, case, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Withdraw the waiter. Returns false when a counterpart claimed it first.
    pub(crate) fn abort(&self) -> bool {
        if self.try_claim(ABORTED) {
            self.complete();
            true
        } else {
            false
        }
    }

    pub(crate) fn complete(&self) {
        let mut completed = lock(&self.completed);
        *completed = true;
        self.condvar.notify_one();
    }

    /// Block until claimed and completed (or aborted). Returns the selected case.
    pub(crate) fn wait(&self) -> usize {
        let mut completed = lock(&self.completed);
        while !*completed {
            completed = self
                .condvar
                .wait(completed)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.selected.load(Ordering::SeqCst)
    }

    /// Like `wait`, but gives up at `deadline` and returns `None`. The caller
    /// must then `abort`, falling back to `wait` if the abort loses the race.
    pub(crate) fn wait_until(&self, deadline: Instant) -> Option<usize> {
        let mut completed = lock(&self.completed);
        while !*completed {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            completed = self
                .condvar
                .wait_timeout(completed, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Some(self.selected.load(Ordering::SeqCst))
    }
}

/// Hand-off cell between a parked operation and its counterpart.
pub(crate) struct Slot<T>(Mutex<Option<T>>);

impl<T> Slot<T> {
    pub(crate) fn new(value: Option<T>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(value)))
    }

    pub(crate) fn put(&self, value: T) {
        *lock(&self.0) = Some(value);
    }

    pub(crate) fn take(&self) -> Option<T> {
        lock(&self.0).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_claim_is_exclusive() {
        let waiter = Waiter::new();
        assert!(waiter.is_waiting());
        assert!(waiter.try_claim(3));
        assert!(!waiter.try_claim(1));
        assert!(!waiter.abort());
        waiter.complete();
        assert_eq!(waiter.wait(), 3);
    }

    #[test]
    fn test_abort_releases_wait() {
        let waiter = Waiter::new();
        assert!(waiter.abort());
        assert_eq!(waiter.wait(), ABORTED);
    }

    #[test]
    fn test_wait_until_times_out() {
        let waiter = Waiter::new();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(waiter.wait_until(deadline), None);
        assert!(waiter.is_waiting());
    }

    #[test]
    fn test_completion_from_other_thread() {
        let waiter = Waiter::new();
        let slot = Slot::new(None);

        let remote = Arc::clone(&waiter);
        let remote_slot = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            assert!(remote.try_claim(0));
            remote_slot.put(7);
            remote.complete();
        });

        assert_eq!(waiter.wait(), 0);
        assert_eq!(slot.take(), Some(7));
        handle.join().unwrap();
    }
}
