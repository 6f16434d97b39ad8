//!
//! Channels for strand
//!
//! Typed conduits that move values between tasks. A channel has a fixed
//! capacity chosen at creation:
//!
//! - `0` is a rendezvous channel: `send` parks until a receiver takes the
//!   value directly, so the hand-off doubles as a synchronization point
//! - `n > 0` buffers up to `n` values; `send` only parks when the buffer is
//!   full, and parked senders are released in the order they parked
//!
//! Receivers observe values in the order they were accepted by the channel.
//! Closing is one-way: buffered values can still be drained, after which
//! every receive returns `None` without blocking. Sending on a closed channel
//! and closing twice are fatal misuses.
//!
//! `Channel<T>` is the bidirectional handle. `Sender<T>` and `Receiver<T>`
//! are directional views of the same channel for APIs that should only send
//! or only receive. All handles are cheap to clone.
//!

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use strand_core::{Misuse, RecvTimeoutError, TryRecvError, TrySendError, misuse};

use crate::waiter::{Slot, Waiter, lock};

/// A parked send or receive: which waiter, which of its cases, and where
/// the value travels.
pub(crate) struct Entry<T> {
    pub(crate) waiter: Arc<Waiter>,
    pub(crate) case: usize,
    pub(crate) slot: Arc<Slot<T>>,
}

pub(crate) struct State<T> {
    buffer: VecDeque<T>,
    closed: bool,
    senders: VecDeque<Entry<T>>,
    receivers: VecDeque<Entry<T>>,
}

impl<T> State<T> {
    /// Pop entries until one can be claimed. Entries whose waiter was already
    /// claimed elsewhere (or aborted) are stale and dropped.
    fn claim(queue: &mut VecDeque<Entry<T>>) -> Option<Entry<T>> {
        while let Some(entry) = queue.pop_front() {
            if entry.waiter.try_claim(entry.case) {
                return Some(entry);
            }
        }
        None
    }

    fn has_peer(queue: &VecDeque<Entry<T>>, me: &Arc<Waiter>) -> bool {
        queue
            .iter()
            .any(|entry| !Arc::ptr_eq(&entry.waiter, me) && entry.waiter.is_waiting())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Deliver without parking. The caller has already checked `closed`.
    pub(crate) fn try_send(&mut self, capacity: usize, value: T) -> Result<(), T> {
        if let Some(receiver) = Self::claim(&mut self.receivers) {
            receiver.slot.put(value);
            receiver.waiter.complete();
            return Ok(());
        }
        if self.buffer.len() < capacity {
            self.buffer.push_back(value);
            return Ok(());
        }
        Err(value)
    }

    /// Take a value without parking. A buffered value is preferred; the
    /// oldest parked sender then moves its value to the back of the buffer.
    pub(crate) fn try_recv(&mut self) -> Option<T> {
        if let Some(value) = self.buffer.pop_front() {
            if let Some(sender) = Self::claim(&mut self.senders) {
                if let Some(pending) = sender.slot.take() {
                    self.buffer.push_back(pending);
                }
                sender.waiter.complete();
            }
            return Some(value);
        }
        while let Some(sender) = Self::claim(&mut self.senders) {
            let value = sender.slot.take();
            sender.waiter.complete();
            if value.is_some() {
                return value;
            }
        }
        None
    }

    pub(crate) fn send_ready(&self, capacity: usize, me: &Arc<Waiter>) -> bool {
        self.closed || self.buffer.len() < capacity || Self::has_peer(&self.receivers, me)
    }

    pub(crate) fn recv_ready(&self, me: &Arc<Waiter>) -> bool {
        self.closed || !self.buffer.is_empty() || Self::has_peer(&self.senders, me)
    }

    pub(crate) fn park_sender(&mut self, entry: Entry<T>) {
        self.senders.push_back(entry);
    }

    pub(crate) fn park_receiver(&mut self, entry: Entry<T>) {
        self.receivers.push_back(entry);
    }

    pub(crate) fn remove(&mut self, me: &Arc<Waiter>) {
        self.senders.retain(|entry| !Arc::ptr_eq(&entry.waiter, me));
        self.receivers.retain(|entry| !Arc::ptr_eq(&entry.waiter, me));
    }

    /// Mark closed and release every parked operation. Parked receivers find
    /// an empty slot; parked senders find their value still in place.
    fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        for entry in self.receivers.drain(..).chain(self.senders.drain(..)) {
            if entry.waiter.try_claim(entry.case) {
                entry.waiter.complete();
            }
        }
        true
    }
}

pub(crate) struct Core<T> {
    capacity: usize,
    state: Mutex<State<T>>,
}

impl<T> Core<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                buffer: VecDeque::with_capacity(capacity),
                closed: false,
                senders: VecDeque::new(),
                receivers: VecDeque::new(),
            }),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, State<T>> {
        lock(&self.state)
    }

    #[track_caller]
    fn send(&self, value: T) {
        let mut state = self.state();
        if state.closed {
            drop(state);
            misuse(Misuse::SendOnClosed);
        }
        let value = match state.try_send(self.capacity, value) {
            Ok(()) => return,
            Err(value) => value,
        };

        let waiter = Waiter::new();
        let slot = Slot::new(Some(value));
        state.park_sender(Entry {
            waiter: Arc::clone(&waiter),
            case: 0,
            slot: Arc::clone(&slot),
        });
        drop(state);

        waiter.wait();
        // Still holding the value means close released us, not a receiver.
        if slot.take().is_some() {
            misuse(Misuse::SendOnClosed);
        }
    }

    #[track_caller]
    fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.state();
        if state.closed {
            drop(state);
            misuse(Misuse::SendOnClosed);
        }
        state.try_send(self.capacity, value).map_err(TrySendError)
    }

    fn recv_until(&self, deadline: Option<Instant>) -> Result<T, RecvTimeoutError> {
        let mut state = self.state();
        if let Some(value) = state.try_recv() {
            return Ok(value);
        }
        if state.closed {
            return Err(RecvTimeoutError::Closed);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(RecvTimeoutError::Timeout);
        }

        let waiter = Waiter::new();
        let slot = Slot::new(None);
        state.park_receiver(Entry {
            waiter: Arc::clone(&waiter),
            case: 0,
            slot: Arc::clone(&slot),
        });
        drop(state);

        match deadline {
            None => {
                waiter.wait();
            }
            Some(deadline) => {
                if waiter.wait_until(deadline).is_none() {
                    if waiter.abort() {
                        self.state().remove(&waiter);
                        return Err(RecvTimeoutError::Timeout);
                    }
                    waiter.wait();
                }
            }
        }
        slot.take().ok_or(RecvTimeoutError::Closed)
    }

    fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.state();
        match state.try_recv() {
            Some(value) => Ok(value),
            None if state.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    #[track_caller]
    fn close(&self) {
        let mut state = self.state();
        if !state.close() {
            drop(state);
            misuse(Misuse::CloseOfClosed);
        }
        tracing::trace!(
            capacity = self.capacity,
            buffered = state.buffer.len(),
            "channel closed"
        );
    }

    fn len(&self) -> usize {
        self.state().buffer.len()
    }
}

/// Sending half of a channel. Can also close it.
pub struct Sender<T> {
    core: Arc<Core<T>>,
}

/// Receiving half of a channel.
pub struct Receiver<T> {
    core: Arc<Core<T>>,
}

/// Bidirectional channel handle.
pub struct Channel<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> Sender<T> {
    pub(crate) fn core(&self) -> &Core<T> {
        &self.core
    }

    /// Send a value, parking while the channel cannot accept it.
    ///
    /// # Panics
    /// If the channel is closed, or gets closed while this send is parked.
    #[track_caller]
    pub fn send(&self, value: T) {
        self.core.send(value);
    }

    /// Send only if it can complete immediately; hands the value back otherwise.
    ///
    /// # Panics
    /// If the channel is closed.
    #[track_caller]
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.core.try_send(value)
    }

    /// # Panics
    /// If the channel is already closed.
    #[track_caller]
    pub fn close(&self) {
        self.core.close();
    }

    pub fn is_closed(&self) -> bool {
        self.core.state().closed
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Receiver<T> {
    pub(crate) fn core(&self) -> &Core<T> {
        &self.core
    }

    /// Receive the next value, parking while the channel is empty.
    /// Returns `None` once the channel is closed and drained.
    pub fn recv(&self) -> Option<T> {
        self.core.recv_until(None).ok()
    }

    /// `recv` in `(value, ok)` form: `(T::default(), false)` when closed.
    pub fn recv_ok(&self) -> (T, bool)
    where
        T: Default,
    {
        match self.recv() {
            Some(value) => (value, true),
            None => (T::default(), false),
        }
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.core.try_recv()
    }

    /// A timeout too large to represent as a deadline waits without one.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.core.recv_until(Instant::now().checked_add(timeout))
    }

    pub fn recv_deadline(&self, deadline: Instant) -> Result<T, RecvTimeoutError> {
        self.core.recv_until(Some(deadline))
    }

    /// Iterate over received values until the channel is closed and drained.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { receiver: self }
    }

    pub fn is_closed(&self) -> bool {
        self.core.state().closed
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Channel<T> {
    /// Create a channel buffering up to `capacity` values; `0` makes a
    /// rendezvous channel.
    pub fn new(capacity: usize) -> Self {
        let core = Arc::new(Core::new(capacity));
        Self {
            sender: Sender {
                core: Arc::clone(&core),
            },
            receiver: Receiver { core },
        }
    }

    pub fn unbuffered() -> Self {
        Self::new(0)
    }

    pub fn sender(&self) -> Sender<T> {
        self.sender.clone()
    }

    pub fn receiver(&self) -> Receiver<T> {
        self.receiver.clone()
    }

    pub fn split(self) -> (Sender<T>, Receiver<T>) {
        (self.sender, self.receiver)
    }

    #[track_caller]
    pub fn send(&self, value: T) {
        self.sender.send(value);
    }

    #[track_caller]
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.sender.try_send(value)
    }

    pub fn recv(&self) -> Option<T> {
        self.receiver.recv()
    }

    pub fn recv_ok(&self) -> (T, bool)
    where
        T: Default,
    {
        self.receiver.recv_ok()
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    #[track_caller]
    pub fn close(&self) {
        self.sender.close();
    }

    pub fn iter(&self) -> Iter<'_, T> {
        self.receiver.iter()
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.receiver.capacity()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<T> AsRef<Sender<T>> for Sender<T> {
    fn as_ref(&self) -> &Sender<T> {
        self
    }
}

impl<T> AsRef<Receiver<T>> for Receiver<T> {
    fn as_ref(&self) -> &Receiver<T> {
        self
    }
}

impl<T> AsRef<Sender<T>> for Channel<T> {
    fn as_ref(&self) -> &Sender<T> {
        &self.sender
    }
}

impl<T> AsRef<Receiver<T>> for Channel<T> {
    fn as_ref(&self) -> &Receiver<T> {
        &self.receiver
    }
}

impl<T> From<Channel<T>> for Sender<T> {
    fn from(channel: Channel<T>) -> Self {
        channel.sender
    }
}

impl<T> From<Channel<T>> for Receiver<T> {
    fn from(channel: Channel<T>) -> Self {
        channel.receiver
    }
}

pub struct Iter<'a, T> {
    receiver: &'a Receiver<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.receiver.recv()
    }
}

pub struct IntoIter<T> {
    receiver: Receiver<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.receiver.recv()
    }
}

impl<'a, T> IntoIterator for &'a Receiver<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<T> IntoIterator for Receiver<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter { receiver: self }
    }
}

impl<'a, T> IntoIterator for &'a Channel<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

fn debug_core<T>(name: &str, core: &Core<T>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = core.state();
    f.debug_struct(name)
        .field("capacity", &core.capacity)
        .field("len", &state.buffer.len())
        .field("closed", &state.closed)
        .finish()
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_core("Channel", &self.receiver.core, f)
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_core("Sender", &self.core, f)
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_core("Receiver", &self.core, f)
    }
}
