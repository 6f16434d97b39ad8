//!
//! Wait Groups
//!
//! A counting barrier: one task waits until a dynamically sized set of other
//! tasks has signalled completion.
//!
//! ```ignore
//! let wg = WaitGroup::new();
//! for id in 0..10 {
//!     wg.add(1);
//!     let wg = wg.clone();
//!     spawn(move || {
//!         let _done = wg.done_guard();
//!         println!("doing task {}", id);
//!     });
//! }
//! wg.wait();
//! ```
//!
//! Call `add` before starting the task that will call `done`, otherwise
//! `wait` may observe a zero counter too early.
//!
//! ## Reuse
//!
//! A group may be reused once every `wait` from the previous round has
//! returned. Raising the counter from zero while released waiters are still
//! on their way out is a fatal misuse, as is driving the counter negative.
//!

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use strand_core::{Misuse, misuse};

use crate::waiter::lock;

struct GroupState {
    count: i64,
    generation: u64,
    waiting: usize,
    draining: usize,
}

struct Inner {
    state: Mutex<GroupState>,
    condvar: Condvar,
}

#[derive(Clone)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(GroupState {
                    count: 0,
                    generation: 0,
                    waiting: 0,
                    draining: 0,
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Add `delta` (which may be negative) to the counter. Reaching zero
    /// releases every waiter.
    ///
    /// # Panics
    /// If the counter would go negative, or the group is reused before the
    /// previous round's waiters returned.
    #[track_caller]
    pub fn add(&self, delta: i64) {
        let mut state = lock(&self.inner.state);
        let count = state.count + delta;
        if count < 0 {
            drop(state);
            misuse(Misuse::NegativeCounter { count });
        }
        if state.count == 0 && count > 0 && state.draining > 0 {
            drop(state);
            misuse(Misuse::WaitGroupReused);
        }

        state.count = count;
        if count == 0 && state.waiting > 0 {
            state.generation += 1;
            state.draining += state.waiting;
            state.waiting = 0;
            self.inner.condvar.notify_all();
        }
    }

    #[track_caller]
    pub fn done(&self) {
        self.add(-1);
    }

    /// A guard that calls `done` when dropped, so the decrement runs however
    /// the task exits.
    pub fn done_guard(&self) -> DoneGuard {
        DoneGuard {
            group: self.clone(),
        }
    }

    pub fn count(&self) -> i64 {
        lock(&self.inner.state).count
    }

    /// Block until the counter is zero.
    pub fn wait(&self) {
        let mut state = lock(&self.inner.state);
        if state.count == 0 {
            return;
        }
        let generation = state.generation;
        state.waiting += 1;
        while state.generation == generation {
            state = self
                .inner
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.draining -= 1;
    }

    /// Block until the counter is zero or `timeout` elapses. Returns true
    /// when the counter reached zero. A timeout too large to represent as a
    /// deadline waits without one.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut state = lock(&self.inner.state);
        if state.count == 0 {
            return true;
        }
        let generation = state.generation;
        state.waiting += 1;
        while state.generation == generation {
            let now = Instant::now();
            if now >= deadline {
                state.waiting -= 1;
                return false;
            }
            state = self
                .inner
                .condvar
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state.draining -= 1;
        true
    }

    /// `add(1)`, then run `f` as a task that calls `done` when it finishes,
    /// including when it panics.
    #[track_caller]
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.add(1);
        let done = self.done_guard();
        crate::scheduler::spawn(move || {
            let _done = done;
            f();
        });
    }
}

impl std::fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitGroup").field("count", &self.count()).finish()
    }
}

/// Calls `WaitGroup::done` on drop.
#[must_use = "dropping the guard immediately calls done"]
pub struct DoneGuard {
    group: WaitGroup,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.group.done();
    }
}
