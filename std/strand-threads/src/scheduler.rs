//!
//! Task Scheduler for strand
//!
//! Runs spawned closures on a pool of worker threads. Features:
//!
//! - Core workers (defaults to CPU cores) kept alive while idle
//! - Pool grows on demand when every worker is busy, up to `max_workers`
//! - Workers above the core count exit after `keep_alive_ms` of idleness
//! - Panicking tasks are isolated: the worker logs the panic and keeps going
//!
//! Channel, wait group and mutex operations park the worker thread they run
//! on. Growing the pool whenever a task is queued and no worker is idle
//! guarantees that a queued task starts even while other tasks are parked,
//! which is what makes rendezvous channels between spawned tasks work.
//!
//! Spawning is fire-and-forget. A task reports results or completion through
//! a `Channel` or a `WaitGroup`. A panic, including a fatal misuse, ends only
//! the task that raised it as long as the binary unwinds on panic; with
//! `panic = "abort"` it ends the process.
//!

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::Duration;

use strand_core::SchedulerConfig;

use crate::waiter::lock;

/// A task is any closure that can be sent to a worker thread
type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    tasks: VecDeque<Task>,
    workers: usize,
    idle: usize,
    active: usize,
    next_worker_id: usize,
    shutdown: bool,
}

struct Shared {
    pool: Mutex<PoolState>,
    work_ready: Condvar,
    all_idle: Condvar,
    workers_exited: Condvar,
    config: SchedulerConfig,
}

impl Shared {
    /// Start one more worker. Called with the pool lock held.
    fn start_worker(self: &Arc<Self>, pool: &mut PoolState) {
        let id = pool.next_worker_id;
        let mut builder = thread::Builder::new().name(format!("{}-{}", self.config.thread_name, id));
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let shared = Arc::clone(self);
        match builder.spawn(move || worker_loop(shared, id)) {
            Ok(_) => {
                pool.next_worker_id += 1;
                pool.workers += 1;
            }
            Err(err) => {
                tracing::error!(worker = id, error = %err, workers = pool.workers, "failed to start worker");
            }
        }
    }

    fn next_task(&self, id: usize) -> Option<Task> {
        let mut pool = lock(&self.pool);
        loop {
            if let Some(task) = pool.tasks.pop_front() {
                return Some(task);
            }
            if pool.shutdown {
                break;
            }

            pool.idle += 1;
            let (guard, timeout) = self
                .work_ready
                .wait_timeout(pool, self.config.keep_alive())
                .unwrap_or_else(PoisonError::into_inner);
            pool = guard;
            pool.idle -= 1;

            if timeout.timed_out() && pool.tasks.is_empty() && pool.workers > self.config.core_workers {
                tracing::debug!(worker = id, "idle worker retiring");
                break;
            }
        }

        pool.workers -= 1;
        if pool.workers == 0 {
            self.workers_exited.notify_all();
        }
        None
    }

    fn finish_task(&self) {
        let mut pool = lock(&self.pool);
        pool.active -= 1;
        if pool.active == 0 {
            self.all_idle.notify_all();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, id: usize) {
    tracing::debug!(worker = id, "worker started");

    while let Some(task) = shared.next_task(id) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            tracing::error!(worker = id, message = panic_message(&*payload), "task panicked");
        }
        shared.finish_task();
    }

    tracing::debug!(worker = id, "worker exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

/// A pool of worker threads running spawned tasks.
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let shared = Arc::new(Shared {
            pool: Mutex::new(PoolState {
                tasks: VecDeque::new(),
                workers: 0,
                idle: 0,
                active: 0,
                next_worker_id: 0,
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            all_idle: Condvar::new(),
            workers_exited: Condvar::new(),
            config,
        });

        {
            let mut pool = lock(&shared.pool);
            for _ in 0..shared.config.core_workers {
                shared.start_worker(&mut pool);
            }
        }

        Self { shared }
    }

    /// Queue `f` to run concurrently with the caller. Returns immediately.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pool = lock(&self.shared.pool);
        pool.active += 1;
        pool.tasks.push_back(Box::new(f));

        if pool.idle >= pool.tasks.len() {
            self.shared.work_ready.notify_one();
        } else if pool.workers < self.shared.config.max_workers {
            self.shared.start_worker(&mut pool);
        } else {
            tracing::trace!(queued = pool.tasks.len(), "worker limit reached, task queued");
        }
    }

    /// Tasks queued or running.
    pub fn active_count(&self) -> usize {
        lock(&self.shared.pool).active
    }

    /// Live worker threads.
    pub fn worker_count(&self) -> usize {
        lock(&self.shared.pool).workers
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Block until no spawned task is queued or running.
    pub fn wait_idle(&self) {
        let mut pool = lock(&self.shared.pool);
        while pool.active > 0 {
            pool = self
                .shared
                .all_idle
                .wait(pool)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Drop for Scheduler {
    /// Queued tasks still run; drop returns once every worker has exited.
    fn drop(&mut self) {
        let mut pool = lock(&self.shared.pool);
        pool.shutdown = true;
        self.shared.work_ready.notify_all();
        while pool.workers > 0 {
            pool = self
                .shared
                .workers_exited
                .wait(pool)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

static SCHEDULER: OnceLock<Scheduler> = OnceLock::new();

fn global() -> &'static Scheduler {
    SCHEDULER.get_or_init(|| {
        let config = SchedulerConfig::from_env().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "invalid scheduler config, using defaults");
            SchedulerConfig::default()
        });
        tracing::debug!(
            core_workers = config.core_workers,
            max_workers = config.max_workers,
            "starting global scheduler"
        );
        Scheduler::new(config)
    })
}

/// Configure the global scheduler before first use. Returns false if it was
/// already running, in which case `config` is ignored.
pub fn init_global(config: SchedulerConfig) -> bool {
    let mut installed = false;
    SCHEDULER.get_or_init(|| {
        installed = true;
        Scheduler::new(config)
    });
    installed
}

/// Spawn a task on the global scheduler
pub fn spawn<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    global().spawn(f);
}

/// Wait for all tasks spawned on the global scheduler to complete
pub fn wait_idle() {
    global().wait_idle();
}

/// Get the number of active tasks on the global scheduler
pub fn active_tasks() -> usize {
    global().active_count()
}

/// Get the number of live worker threads in the global pool
pub fn worker_count() -> usize {
    global().worker_count()
}

/// Park the calling task for `ms` milliseconds
pub fn sleep(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}

/// Number of CPU cores, the default core worker count
pub fn available_workers() -> usize {
    strand_core::available_parallelism()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::time::Instant;

    fn small_pool(core: usize, max: usize) -> Scheduler {
        Scheduler::new(SchedulerConfig {
            core_workers: core,
            max_workers: max,
            keep_alive_ms: 50,
            stack_size: None,
            thread_name: "strand-test".to_string(),
        })
    }

    #[test]
    fn test_spawn_basic() {
        let scheduler = small_pool(2, 8);
        let counter = Arc::new(AtomicI64::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            scheduler.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        scheduler.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_spawn_with_captured_values() {
        let scheduler = small_pool(2, 8);
        let counter = Arc::new(AtomicI64::new(0));

        for i in 1..=5 {
            let counter = Arc::clone(&counter);
            scheduler.spawn(move || {
                counter.fetch_add(i, Ordering::SeqCst);
            });
        }

        scheduler.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_pool_grows_past_parked_tasks() {
        let scheduler = small_pool(1, 64);
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let started = Arc::new(AtomicUsize::new(0));

        // Every task parks until all of them have started.
        for _ in 0..16 {
            let gate = Arc::clone(&gate);
            let started = Arc::clone(&started);
            scheduler.spawn(move || {
                let (open, condvar) = &*gate;
                let mut open = lock(open);
                if started.fetch_add(1, Ordering::SeqCst) + 1 == 16 {
                    *open = true;
                    condvar.notify_all();
                }
                while !*open {
                    open = condvar.wait(open).unwrap();
                }
            });
        }

        scheduler.wait_idle();
        assert_eq!(started.load(Ordering::SeqCst), 16);
        assert!(scheduler.worker_count() >= 1);
    }

    #[test]
    fn test_panicking_task_is_isolated() {
        let scheduler = small_pool(1, 1);
        let counter = Arc::new(AtomicI64::new(0));

        scheduler.spawn(|| panic!("task failure"));
        let after = Arc::clone(&counter);
        scheduler.spawn(move || {
            after.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.worker_count(), 1);
    }

    #[test]
    fn test_idle_workers_retire() {
        let scheduler = small_pool(0, 8);
        for _ in 0..4 {
            scheduler.spawn(|| thread::sleep(Duration::from_millis(20)));
        }
        scheduler.wait_idle();

        let deadline = Instant::now() + Duration::from_secs(2);
        while scheduler.worker_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(scheduler.worker_count(), 0);

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        scheduler.spawn(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.wait_idle();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_pool_parallelism() {
        let scheduler = small_pool(8, 8);
        let max_seen = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        for _ in 0..8 {
            let max_seen = Arc::clone(&max_seen);
            let current = Arc::clone(&current);
            scheduler.spawn(move || {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                current.fetch_sub(1, Ordering::SeqCst);
            });
        }

        scheduler.wait_idle();

        // Sequential execution would take 400ms; allow for slow CI machines.
        assert!(max_seen.load(Ordering::SeqCst) >= 2);
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn test_drop_runs_queued_tasks() {
        let counter = Arc::new(AtomicI64::new(0));
        {
            let scheduler = small_pool(1, 1);
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                scheduler.spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*payload), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(&*payload), "<non-string panic payload>");
    }

    #[test]
    fn test_sleep_and_available_workers() {
        let start = Instant::now();
        sleep(20);
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(available_workers() >= 1);
    }
}
