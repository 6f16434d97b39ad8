//!
//! Select over Multiple Channels
//!
//! `Select` waits until exactly one of several channel operations can
//! complete, completes it, and runs that case's handler. Cases that are not
//! chosen have no effect on their channels; a send case that loses simply
//! drops its value with the `Select`.
//!
//! ```ignore
//! let picked = Select::new()
//!     .recv(&numbers, |n| format!("number {:?}", n))
//!     .recv(&words, |w| format!("word {:?}", w))
//!     .wait();
//! ```
//!
//! ## Readiness
//!
//! - a receive case is ready when its channel has a buffered value, a parked
//!   sender, or is closed (the handler then gets `None`)
//! - a send case is ready when its channel has buffer room, a parked
//!   receiver, or is closed (completing it panics, as a direct send would)
//!
//! ## Fairness
//!
//! Every pass probes the cases in a freshly shuffled order, so when several
//! cases are ready each is equally likely to win and no case can starve
//! another. Registration order is shuffled the same way.
//!
//! ## Algorithm
//!
//! 1. Probe every case without parking. The first ready case wins.
//! 2. With a `default` case, run it instead of parking.
//! 3. Otherwise park one waiter on every channel. A counterpart that arrives
//!    later claims the waiter for its case and completes the transfer. If a
//!    case turns out to be ready while registering, withdraw and go back to 1.
//! 4. Unregister from every channel and run the winning handler.
//!

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use strand_core::{Misuse, misuse};

use crate::channel::{Core, Entry, Receiver, Sender};
use crate::waiter::{ABORTED, Slot, Waiter};

/// One registered operation, type-erased over the channel's element type.
trait Case<R> {
    /// Complete the operation if it can finish without parking.
    fn try_fire(&mut self) -> bool;

    /// Park `waiter` on the channel. Returns true instead when the case is
    /// already ready, in which case nothing is parked.
    fn register(&mut self, waiter: &Arc<Waiter>, index: usize) -> bool;

    fn unregister(&mut self, waiter: &Arc<Waiter>);

    /// Collect the outcome after a counterpart (or close) claimed this case.
    fn accept(&mut self);

    fn finish(self: Box<Self>) -> R;
}

struct RecvCase<'a, T, F> {
    core: &'a Core<T>,
    handler: F,
    slot: Option<Arc<Slot<T>>>,
    outcome: Option<T>,
}

impl<T, R, F> Case<R> for RecvCase<'_, T, F>
where
    F: FnOnce(Option<T>) -> R,
{
    fn try_fire(&mut self) -> bool {
        let mut state = self.core.state();
        if let Some(value) = state.try_recv() {
            self.outcome = Some(value);
            return true;
        }
        state.is_closed()
    }

    fn register(&mut self, waiter: &Arc<Waiter>, index: usize) -> bool {
        let mut state = self.core.state();
        if state.recv_ready(waiter) {
            return true;
        }
        let slot = Slot::new(None);
        state.park_receiver(Entry {
            waiter: Arc::clone(waiter),
            case: index,
            slot: Arc::clone(&slot),
        });
        self.slot = Some(slot);
        false
    }

    fn unregister(&mut self, waiter: &Arc<Waiter>) {
        if self.slot.is_some() {
            self.core.state().remove(waiter);
        }
    }

    fn accept(&mut self) {
        self.outcome = self.slot.take().and_then(|slot| slot.take());
    }

    fn finish(self: Box<Self>) -> R {
        (self.handler)(self.outcome)
    }
}

struct SendCase<'a, T, F> {
    core: &'a Core<T>,
    value: Option<T>,
    handler: F,
    slot: Option<Arc<Slot<T>>>,
}

impl<T, R, F> Case<R> for SendCase<'_, T, F>
where
    F: FnOnce() -> R,
{
    fn try_fire(&mut self) -> bool {
        let mut state = self.core.state();
        if state.is_closed() {
            drop(state);
            misuse(Misuse::SendOnClosed);
        }
        let Some(value) = self.value.take() else {
            return false;
        };
        match state.try_send(self.core.capacity(), value) {
            Ok(()) => true,
            Err(value) => {
                self.value = Some(value);
                false
            }
        }
    }

    fn register(&mut self, waiter: &Arc<Waiter>, index: usize) -> bool {
        let mut state = self.core.state();
        if state.send_ready(self.core.capacity(), waiter) {
            return true;
        }
        let slot = Slot::new(self.value.take());
        state.park_sender(Entry {
            waiter: Arc::clone(waiter),
            case: index,
            slot: Arc::clone(&slot),
        });
        self.slot = Some(slot);
        false
    }

    fn unregister(&mut self, waiter: &Arc<Waiter>) {
        if let Some(slot) = self.slot.take() {
            self.core.state().remove(waiter);
            // Not taken by a receiver: keep it for the next pass.
            if let Some(value) = slot.take() {
                self.value = Some(value);
            }
        }
    }

    fn accept(&mut self) {
        // A receiver takes the value; close leaves it behind.
        if self.value.is_some() {
            misuse(Misuse::SendOnClosed);
        }
    }

    fn finish(self: Box<Self>) -> R {
        (self.handler)()
    }
}

/// Builder for a one-shot select. Consumed by `wait` and friends.
pub struct Select<'a, R> {
    cases: Vec<Box<dyn Case<R> + 'a>>,
    default: Option<Box<dyn FnOnce() -> R + 'a>>,
}

impl<R> Default for Select<'_, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, R> Select<'a, R> {
    pub fn new() -> Self {
        Self {
            cases: Vec::new(),
            default: None,
        }
    }

    /// Add a receive case. The handler gets `None` when the channel is
    /// closed and drained.
    pub fn recv<T, C, F>(mut self, channel: &'a C, handler: F) -> Self
    where
        T: 'a,
        C: AsRef<Receiver<T>> + ?Sized,
        F: FnOnce(Option<T>) -> R + 'a,
    {
        self.cases.push(Box::new(RecvCase {
            core: channel.as_ref().core(),
            handler,
            slot: None,
            outcome: None,
        }));
        self
    }

    /// Add a send case. The value is only delivered if this case wins.
    pub fn send<T, C, F>(mut self, channel: &'a C, value: T, handler: F) -> Self
    where
        T: 'a,
        C: AsRef<Sender<T>> + ?Sized,
        F: FnOnce() -> R + 'a,
    {
        self.cases.push(Box::new(SendCase {
            core: channel.as_ref().core(),
            value: Some(value),
            handler,
            slot: None,
        }));
        self
    }

    /// Run `handler` immediately when no case is ready on the first check.
    pub fn default<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() -> R + 'a,
    {
        self.default = Some(Box::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Block until one case completes and return its handler's result.
    ///
    /// # Panics
    /// If the winning case is a send on a closed channel.
    pub fn wait(self) -> R {
        self.wait_indexed().1
    }

    /// Like `wait`, also returning the index of the winning case in the
    /// order cases were added. `None` means the default case ran.
    pub fn wait_indexed(self) -> (Option<usize>, R) {
        match self.run(None) {
            Some(resolved) => resolved,
            None => unreachable!("select without deadline cannot time out"),
        }
    }

    /// Like `wait`, giving up after `timeout`. A timeout too large to
    /// represent as a deadline waits without one.
    pub fn wait_timeout(self, timeout: Duration) -> Option<R> {
        self.run(Instant::now().checked_add(timeout))
            .map(|(_, output)| output)
    }

    fn run(mut self, deadline: Option<Instant>) -> Option<(Option<usize>, R)> {
        let mut order: Vec<usize> = (0..self.cases.len()).collect();
        let mut rng = rand::thread_rng();

        loop {
            order.shuffle(&mut rng);
            for &index in &order {
                if self.cases[index].try_fire() {
                    return Some(self.resolve(index));
                }
            }

            if let Some(default) = self.default.take() {
                return Some((None, default()));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return None;
            }
            if self.cases.is_empty() {
                block_forever(deadline);
                return None;
            }

            let waiter = Waiter::new();
            let mut registered = Vec::with_capacity(order.len());
            for &index in &order {
                if self.cases[index].register(&waiter, index) {
                    waiter.abort();
                    break;
                }
                registered.push(index);
            }

            let selected = match deadline {
                None => waiter.wait(),
                Some(deadline) => match waiter.wait_until(deadline) {
                    Some(selected) => selected,
                    None if waiter.abort() => ABORTED,
                    None => waiter.wait(),
                },
            };

            for &index in &registered {
                self.cases[index].unregister(&waiter);
            }

            if selected != ABORTED {
                self.cases[selected].accept();
                return Some(self.resolve(selected));
            }
        }
    }

    fn resolve(mut self, index: usize) -> (Option<usize>, R) {
        tracing::trace!(case = index, cases = self.cases.len(), "select resolved");
        let case = self.cases.swap_remove(index);
        (Some(index), case.finish())
    }
}

/// A select with no cases never completes, unless it has a deadline.
fn block_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
        None => loop {
            std::thread::park();
        },
    }
}
