//!
//! Mutex Implementation for strand
//!
//! Provides a mutual exclusion primitive for protecting shared data.
//!
//! `RawMutex` is the lock protocol itself, with explicit `lock`, `unlock`
//! and `try_lock`. `Mutex<T>` owns the protected value and hands out a
//! `MutexGuard`; dropping the guard unlocks on every exit path, including
//! early returns and panics.
//!
//! ```ignore
//! let views = Mutex::new(0);
//! {
//!     let mut count = views.lock();
//!     *count += 1;
//! } // unlocked here
//! ```
//!
//! ## Fairness
//!
//! Strict FIFO: each `lock` takes a ticket and the lock is granted in ticket
//! order, so a waiter cannot be starved by later arrivals. `try_lock` only
//! succeeds when the lock is free and nobody is queued.
//!
//! ## Ownership
//!
//! The owner is the thread that acquired the lock. Unlocking from another
//! thread, unlocking while not held, and locking again from the owning
//! thread are fatal misuses. The last one is reported instead of hanging.
//! A task that returns while still holding a `RawMutex` leaves it owned by
//! its worker thread; always pair `lock` with `unlock` or use `Mutex<T>`.
//!
//! Unlike `std::sync::Mutex` there is no poisoning: a panic while holding a
//! guard releases the lock and leaves the data as it was.
//!

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex as StdMutex, PoisonError};
use std::thread::{self, ThreadId};

use strand_core::{Misuse, misuse};

use crate::waiter::lock;

struct LockState {
    next_ticket: u64,
    serving: u64,
    owner: Option<ThreadId>,
}

pub struct RawMutex {
    state: StdMutex<LockState>,
    condvar: Condvar,
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl RawMutex {
    pub const fn new() -> Self {
        Self {
            state: StdMutex::new(LockState {
                next_ticket: 0,
                serving: 0,
                owner: None,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Acquire the lock, parking until every earlier ticket has been served.
    ///
    /// # Panics
    /// If the calling thread already holds the lock.
    #[track_caller]
    pub fn lock(&self) {
        let me = thread::current().id();
        let mut state = lock(&self.state);
        if state.owner == Some(me) {
            drop(state);
            misuse(Misuse::Relock);
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.serving != ticket {
            state = self
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.owner = Some(me);
    }

    /// Acquire only if the lock is free and nobody is queued.
    pub fn try_lock(&self) -> bool {
        let mut state = lock(&self.state);
        if state.owner.is_some() || state.serving != state.next_ticket {
            return false;
        }
        state.next_ticket += 1;
        state.owner = Some(thread::current().id());
        true
    }

    /// Release the lock and hand it to the next ticket.
    ///
    /// # Panics
    /// If the lock is not held, or is held by another thread.
    #[track_caller]
    pub fn unlock(&self) {
        let mut state = lock(&self.state);
        match state.owner {
            None => {
                drop(state);
                misuse(Misuse::UnlockNotHeld);
            }
            Some(owner) if owner != thread::current().id() => {
                drop(state);
                misuse(Misuse::UnlockByNonOwner);
            }
            Some(_) => {}
        }
        state.owner = None;
        state.serving += 1;
        self.condvar.notify_all();
    }

    pub fn is_locked(&self) -> bool {
        lock(&self.state).owner.is_some()
    }

    pub fn is_owned_by_current_thread(&self) -> bool {
        lock(&self.state).owner == Some(thread::current().id())
    }
}

impl fmt::Debug for RawMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("RawMutex")
            .field("locked", &state.owner.is_some())
            .field("queued", &(state.next_ticket - state.serving).saturating_sub(1))
            .finish()
    }
}

pub struct Mutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Block until the lock is acquired. The lock is released when the
    /// returned guard is dropped.
    #[track_caller]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(MutexGuard {
                mutex: self,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }

    /// Run `f` as a critical section.
    #[track_caller]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Mutex").field("data", &&*guard).finish(),
            None => f.debug_struct("Mutex").field("data", &"<locked>").finish(),
        }
    }
}

/// Scoped access to a `Mutex`. Bound to the acquiring thread.
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<T: ?Sized> MutexGuard<'_, T> {
    /// Release early. Same as dropping the guard.
    pub fn unlock(self) {
        drop(self);
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
