///
/// strand-timers - Channel-based timers
///
/// Provides `after`, `timer` and `tick`. Every timer reports through a strand
/// channel, so it composes with `Select` like any other channel operation.
///
/// ## Timer Thread Design
///
/// A lazily started background thread keeps the pending timers sorted by
/// deadline. It sleeps until the earliest one is due (via
/// `Condvar::wait_timeout`) and fires everything that has expired:
/// - one-shot timers close their `Receiver<()>`, which makes every current
///   and future receive on it complete at once
/// - tickers offer the firing instant to a capacity-1 channel and are
///   re-queued one period later; a tick nobody picked up yet is not doubled
///
/// ## Stopping
///
/// `Timer::stop` and `Ticker::stop` remove the entry under the manager lock,
/// so a stopped timer never fires afterwards. A stopped one-shot timer never
/// closes its channel; a stopped ticker closes its channel so loops over it
/// end.
///
/// ```ignore
/// let timeout = strand_timers::after(Duration::from_secs(1));
/// Select::new()
///     .recv(&results, |r| println!("got {:?}", r))
///     .recv(&timeout, |_| println!("timed out"))
///     .wait();
/// ```
///

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use strand_threads::{Channel, Receiver, Sender};

const TIMER_THREAD_NAME: &str = "strand-timer";

/// Shortest ticker period. Shorter periods are rounded up.
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

enum Action {
    Close(Sender<()>),
    Tick {
        sender: Sender<Instant>,
        period: Duration,
    },
}

struct TimerEntry {
    id: u64,
    action: Action,
}

struct TimerState {
    /// Entries ordered by deadline; equal deadlines keep insertion order.
    queue: Vec<(Instant, TimerEntry)>,
    /// Entries whose deadline lies beyond what `Instant` can represent.
    /// They never fire but can still be stopped.
    dormant: Vec<TimerEntry>,
}

impl TimerState {
    fn schedule(&mut self, fire_at: Option<Instant>, entry: TimerEntry) {
        match fire_at {
            Some(fire_at) => {
                let pos = self.queue.partition_point(|(at, _)| *at <= fire_at);
                self.queue.insert(pos, (fire_at, entry));
            }
            None => self.dormant.push(entry),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.queue.first().map(|(at, _)| *at)
    }

    fn take(&mut self, id: u64) -> Option<TimerEntry> {
        if let Some(pos) = self.queue.iter().position(|(_, e)| e.id == id) {
            return Some(self.queue.remove(pos).1);
        }
        let pos = self.dormant.iter().position(|e| e.id == id)?;
        Some(self.dormant.swap_remove(pos))
    }

    fn fire_due(&mut self, now: Instant) {
        let due = self.queue.partition_point(|(at, _)| *at <= now);
        let fired: Vec<(Instant, TimerEntry)> = self.queue.drain(..due).collect();

        for (_, entry) in fired {
            match entry.action {
                Action::Close(sender) => sender.close(),
                Action::Tick { sender, period } => {
                    // A full channel means the last tick is still unread.
                    let _ = sender.try_send(now);
                    let next = TimerEntry {
                        id: entry.id,
                        action: Action::Tick { sender, period },
                    };
                    self.schedule(now.checked_add(period), next);
                }
            }
        }
    }
}

struct TimerManager {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

impl TimerManager {
    fn new() -> Self {
        let spawned = thread::Builder::new()
            .name(TIMER_THREAD_NAME.to_string())
            .spawn(timer_thread_loop);
        if let Err(err) = spawned {
            tracing::error!(error = %err, "failed to start timer thread, timers will not fire");
        }

        Self {
            state: Mutex::new(TimerState {
                queue: Vec::new(),
                dormant: Vec::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, delay: Duration, action: Action) -> u64 {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let fire_at = Instant::now().checked_add(delay);

        let mut state = self.lock();
        state.schedule(fire_at, TimerEntry { id, action });
        self.condvar.notify_one();
        id
    }

    /// Remove a pending timer. A removed ticker has its channel closed while
    /// the lock is still held, so it cannot race with a tick.
    fn cancel(&self, id: u64) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.take(id) else {
            return false;
        };
        if let Action::Tick { sender, .. } = entry.action {
            sender.close();
        }
        self.condvar.notify_one();
        true
    }
}

static TIMER_MANAGER: OnceLock<TimerManager> = OnceLock::new();

fn get_timer_manager() -> &'static TimerManager {
    TIMER_MANAGER.get_or_init(TimerManager::new)
}

fn timer_thread_loop() {
    let manager = get_timer_manager();
    tracing::debug!("timer thread started");

    let mut state = manager.lock();
    loop {
        let now = Instant::now();
        match state.next_deadline() {
            None => {
                state = manager
                    .condvar
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(fire_at) if fire_at > now => {
                state = manager
                    .condvar
                    .wait_timeout(state, fire_at - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            Some(_) => state.fire_due(now),
        }
    }
}

/// A one-shot timer. Its channel is closed when the delay has elapsed.
pub struct Timer {
    id: u64,
    receiver: Receiver<()>,
}

impl Timer {
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }

    /// Block until the timer fires. Returns immediately once it has.
    pub fn wait(&self) {
        self.receiver.recv();
    }

    /// Prevent the timer from firing. Returns false if it already fired or
    /// was stopped before; in that case nothing changes.
    pub fn stop(&self) -> bool {
        get_timer_manager().cancel(self.id)
    }

    pub fn into_receiver(self) -> Receiver<()> {
        self.receiver
    }
}

impl AsRef<Receiver<()>> for Timer {
    fn as_ref(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("fired", &self.receiver.is_closed())
            .finish()
    }
}

/// Start a one-shot timer that fires after `delay`. A delay too large to
/// represent as a deadline never fires.
pub fn timer(delay: Duration) -> Timer {
    let (sender, receiver) = Channel::unbuffered().split();
    let id = get_timer_manager().add(delay, Action::Close(sender));
    Timer { id, receiver }
}

/// A channel that is closed once `delay` has elapsed. Receiving from it
/// blocks until then and yields `None` afterwards.
pub fn after(delay: Duration) -> Receiver<()> {
    timer(delay).into_receiver()
}

/// A repeating timer delivering the instant of each tick. Dropping the ticker
/// stops it.
pub struct Ticker {
    id: u64,
    receiver: Receiver<Instant>,
}

impl Ticker {
    pub fn receiver(&self) -> &Receiver<Instant> {
        &self.receiver
    }

    /// Block until the next tick. `None` once the ticker is stopped.
    pub fn recv(&self) -> Option<Instant> {
        self.receiver.recv()
    }

    /// Stop ticking and close the channel. Returns false if already stopped.
    pub fn stop(&self) -> bool {
        get_timer_manager().cancel(self.id)
    }
}

impl AsRef<Receiver<Instant>> for Ticker {
    fn as_ref(&self) -> &Receiver<Instant> {
        &self.receiver
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticker")
            .field("id", &self.id)
            .field("stopped", &self.receiver.is_closed())
            .finish()
    }
}

/// Start a ticker firing every `period`, first one `period` from now.
pub fn tick(period: Duration) -> Ticker {
    let period = period.max(MIN_TICK_PERIOD);
    let (sender, receiver) = Channel::new(1).split();
    let id = get_timer_manager().add(period, Action::Tick { sender, period });
    Ticker { id, receiver }
}
