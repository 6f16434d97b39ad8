///
/// # Integration Tests for strand-threads
///
/// End-to-end scenarios that combine spawned tasks with channels, select,
/// wait groups and mutexes: ordering laws, capacity bounds, close
/// semantics, race freedom, select fairness and cooperative cancellation.
///

use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use strand_threads::{Channel, Mutex, RawMutex, Select, WaitGroup, spawn};

fn panic_text(result: thread::Result<()>) -> String {
    match result {
        Ok(()) => "no panic".to_string(),
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default(),
    }
}

#[test]
fn test_fifo_single_sender_buffered() {
    let ch = Channel::new(3);
    let tx = ch.sender();
    spawn(move || {
        for i in 0..500 {
            tx.send(i);
        }
        tx.close();
    });

    let received: Vec<i32> = ch.iter().collect();
    assert_eq!(received, (0..500).collect::<Vec<_>>());
}

#[test]
fn test_fifo_single_sender_rendezvous() {
    let ch = Channel::unbuffered();
    let tx = ch.sender();
    spawn(move || {
        for i in 0..200 {
            tx.send(i);
        }
        tx.close();
    });

    let received: Vec<i32> = ch.receiver().into_iter().collect();
    assert_eq!(received, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_capacity_never_exceeded() {
    let ch = Channel::new(4);
    let sent = Arc::new(AtomicUsize::new(0));

    let tx = ch.sender();
    let counter = Arc::clone(&sent);
    spawn(move || {
        for i in 0..5 {
            tx.send(i);
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    thread::sleep(Duration::from_millis(60));
    assert_eq!(sent.load(Ordering::SeqCst), 4);
    assert_eq!(ch.len(), 4);

    assert_eq!(ch.recv(), Some(0));
    let deadline = Instant::now() + Duration::from_secs(2);
    while sent.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(sent.load(Ordering::SeqCst), 5);
    assert_eq!(ch.len(), 4);
}

#[test]
fn test_third_send_blocks_until_receive() {
    let ch = Channel::new(2);
    ch.send(1);
    ch.send(2);

    let wg = WaitGroup::new();
    let completed = Arc::new(AtomicBool::new(false));
    let tx = ch.sender();
    let flag = Arc::clone(&completed);
    wg.spawn(move || {
        tx.send(3);
        flag.store(true, Ordering::SeqCst);
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!completed.load(Ordering::SeqCst));

    assert_eq!(ch.recv(), Some(1));
    wg.wait();
    assert!(completed.load(Ordering::SeqCst));
    assert_eq!(ch.len(), 2);
    assert_eq!(ch.recv(), Some(2));
    assert_eq!(ch.recv(), Some(3));
}

#[test]
fn test_receives_after_close_never_block() {
    let ch: Channel<u32> = Channel::new(1);
    ch.send(1);
    ch.close();

    assert_eq!(ch.recv(), Some(1));
    let start = Instant::now();
    for _ in 0..1000 {
        assert_eq!(ch.recv(), None);
    }
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_send_after_close_is_fatal() {
    let ch = Channel::new(1);
    ch.close();
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| ch.send(1)));
    insta::assert_snapshot!(panic_text(result), @"send on closed channel");
}

#[test]
fn test_double_close_is_fatal() {
    let ch: Channel<()> = Channel::unbuffered();
    ch.close();
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| ch.close()));
    insta::assert_snapshot!(panic_text(result), @"close of closed channel");
}

#[test]
fn test_unbuffered_hand_off() {
    let ch = Channel::unbuffered();
    let returned = Arc::new(AtomicBool::new(false));

    let tx = ch.sender();
    let flag = Arc::clone(&returned);
    spawn(move || {
        tx.send(42);
        flag.store(true, Ordering::SeqCst);
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!returned.load(Ordering::SeqCst));
    assert_eq!(ch.recv(), Some(42));
}

#[test]
fn test_wait_group_never_returns_early() {
    for _ in 0..20 {
        let wg = WaitGroup::new();
        let finished = Arc::new(AtomicUsize::new(0));
        wg.add(100);

        for _ in 0..100 {
            let wg = wg.clone();
            let finished = Arc::clone(&finished);
            spawn(move || {
                finished.fetch_add(1, Ordering::SeqCst);
                wg.done();
            });
        }

        wg.wait();
        assert_eq!(finished.load(Ordering::SeqCst), 100);
    }
}

#[test]
fn test_mutex_counter_is_race_free() {
    struct Post {
        views: Mutex<u32>,
    }

    let post = Arc::new(Post {
        views: Mutex::new(0),
    });
    let wg = WaitGroup::new();

    for _ in 0..100 {
        let post = Arc::clone(&post);
        wg.spawn(move || {
            *post.views.lock() += 1;
        });
    }

    wg.wait();
    assert_eq!(*post.views.lock(), 100);
}

#[test]
fn test_raw_mutex_protocol_across_tasks() {
    let raw = Arc::new(RawMutex::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicBool::new(false));
    let wg = WaitGroup::new();

    for _ in 0..50 {
        let raw = Arc::clone(&raw);
        let inside = Arc::clone(&inside);
        let overlap = Arc::clone(&overlap);
        wg.spawn(move || {
            raw.lock();
            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                overlap.store(true, Ordering::SeqCst);
            }
            thread::yield_now();
            inside.fetch_sub(1, Ordering::SeqCst);
            raw.unlock();
        });
    }

    wg.wait();
    assert!(!overlap.load(Ordering::SeqCst));
    assert!(!raw.is_locked());
}

#[test]
fn test_select_does_not_starve() {
    let a = Channel::new(1);
    let b = Channel::new(1);
    let mut hits = [0usize; 2];

    for _ in 0..10_000 {
        let _ = a.try_send(());
        let _ = b.try_send(());
        let (index, _) = Select::new()
            .recv(&a, |_| ())
            .recv(&b, |_| ())
            .wait_indexed();
        if let Some(index) = index {
            hits[index] += 1;
        }
    }

    assert!(hits[0] > 0, "first case starved: {:?}", hits);
    assert!(hits[1] > 0, "second case starved: {:?}", hits);
    assert_eq!(hits[0] + hits[1], 10_000);
}

#[test]
fn test_select_over_two_producers() {
    let numbers = Channel::unbuffered();
    let words = Channel::unbuffered();

    let tx = numbers.sender();
    spawn(move || tx.send(1));
    let tx = words.sender();
    spawn(move || tx.send("pong"));

    let mut seen = Vec::new();
    for _ in 0..2 {
        let line = Select::new()
            .recv(&numbers, |n| format!("chan1 {:?}", n))
            .recv(&words, |w| format!("chan2 {:?}", w))
            .wait();
        seen.push(line);
    }

    seen.sort();
    assert_eq!(seen, vec!["chan1 Some(1)", "chan2 Some(\"pong\")"]);
}

#[test]
fn test_many_selectors_and_senders() {
    let ch: Channel<u64> = Channel::unbuffered();
    let other: Channel<u64> = Channel::unbuffered();
    let total = Arc::new(AtomicUsize::new(0));
    let wg = WaitGroup::new();

    for _ in 0..8 {
        let ch = ch.clone();
        let other = other.clone();
        let total = Arc::clone(&total);
        wg.spawn(move || {
            for _ in 0..50 {
                Select::new()
                    .recv(&ch, |v: Option<u64>| {
                        total.fetch_add(v.unwrap_or(0) as usize, Ordering::SeqCst);
                    })
                    .recv(&other, |_| ())
                    .wait();
            }
        });
    }

    for _ in 0..400 {
        ch.send(1);
    }
    wg.wait();
    assert_eq!(total.load(Ordering::SeqCst), 400);
}

#[test]
fn test_cooperative_cancellation() {
    let stop: Channel<()> = Channel::unbuffered();
    let work = Channel::new(16);
    let wg = WaitGroup::new();
    let processed = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        let stop = stop.receiver();
        let work = work.receiver();
        let processed = Arc::clone(&processed);
        wg.spawn(move || {
            loop {
                let keep_going = Select::new()
                    .recv(&stop, |_| false)
                    .recv(&work, |job: Option<u32>| {
                        if job.is_some() {
                            processed.fetch_add(1, Ordering::SeqCst);
                        }
                        job.is_some()
                    })
                    .wait();
                if !keep_going {
                    break;
                }
            }
        });
    }

    for job in 0..10 {
        work.send(job);
    }
    while !work.is_empty() {
        thread::sleep(Duration::from_millis(5));
    }
    stop.close();

    assert!(wg.wait_timeout(Duration::from_secs(5)));
    assert_eq!(processed.load(Ordering::SeqCst), 10);
}

#[test]
fn test_channel_as_completion_signal() {
    let done = Channel::unbuffered();
    let tx = done.sender();
    spawn(move || {
        let result = 2 + 3;
        tx.send(result);
    });
    assert_eq!(done.recv(), Some(5));
}

#[test]
fn test_thousands_of_tasks() {
    let results = Channel::new(64);
    let wg = WaitGroup::new();

    for i in 0..1000u64 {
        let tx = results.sender();
        wg.spawn(move || tx.send(i));
    }

    let closer = results.sender();
    let group = wg.clone();
    spawn(move || {
        group.wait();
        closer.close();
    });

    let sum: u64 = results.iter().sum();
    assert_eq!(sum, (0..1000).sum::<u64>());
}
