///
/// The demo programs
///
/// Each function is self-contained and returns once all of its tasks have
/// finished, so `all` can run them back to back.
///

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strand_threads::{Channel, Mutex, Receiver, Select, Sender, WaitGroup, spawn};

fn task(id: usize) {
    println!("doing task {}", id);
}

/// Fire-and-forget tasks. Output order varies from run to run.
pub fn tasks(count: usize) {
    for id in 0..count {
        spawn(move || task(id));
    }
    strand_threads::wait_idle();
}

pub fn wait_group(count: usize) {
    let wg = WaitGroup::new();
    for id in 0..count {
        wg.add(1);
        let wg = wg.clone();
        spawn(move || {
            let _done = wg.done_guard();
            task(id);
        });
    }
    wg.wait();
    println!("all {} tasks done", count);
}

fn sum(result: Sender<i64>, a: i64, b: i64) {
    result.send(a + b);
}

pub fn channels() {
    // One value handed to a receiving task.
    let numbers = Channel::unbuffered();
    let wg = WaitGroup::new();
    let rx = numbers.receiver();
    wg.spawn(move || {
        if let Some(n) = rx.recv() {
            println!("processing number {}", n);
        }
    });
    numbers.send(5);
    wg.wait();

    // A receiving task that ranges until the channel is closed.
    let stream = Channel::unbuffered();
    let rx = stream.receiver();
    wg.spawn(move || {
        for n in rx {
            println!("processing number {}", n);
        }
    });
    for n in [7, 11, 13] {
        stream.send(n);
    }
    stream.close();
    wg.wait();

    // A result sent back from a task.
    let result = Channel::unbuffered();
    let tx = result.sender();
    spawn(move || sum(tx, 2, 3));
    println!("sum {}", result.recv().unwrap_or_default());

    // A channel used as a completion signal.
    let done = Channel::unbuffered();
    let tx = done.sender();
    spawn(move || {
        let _signal = Signal(tx);
        println!("processing...");
    });
    done.recv();
    println!("processing finished");
}

/// Sends `true` when dropped, however the task exits.
struct Signal(Sender<bool>);

impl Drop for Signal {
    fn drop(&mut self) {
        self.0.send(true);
    }
}

fn email_sender(emails: Receiver<String>, done: Sender<bool>) {
    let _signal = Signal(done);
    for email in emails {
        println!("sending email to: {}", email);
        thread::sleep(Duration::from_millis(20));
    }
}

pub fn buffered(emails: usize, capacity: usize) {
    let queue = Channel::new(2);
    queue.send("1@example.com".to_string());
    queue.send("2@example.com".to_string());
    // Both sends completed with nobody receiving.
    while let Ok(email) = queue.try_recv() {
        println!("{}", email);
    }

    let bulk = Channel::new(capacity);
    let done = Channel::unbuffered();
    let (rx, done_tx) = (bulk.receiver(), done.sender());
    spawn(move || email_sender(rx, done_tx));

    for i in 0..emails {
        bulk.send(format!("{}@gmail.com", i));
    }
    println!("done sending!");

    bulk.close();
    done.recv();
}

struct Post {
    views: Mutex<u64>,
}

impl Post {
    fn inc(&self) {
        *self.views.lock() += 1;
    }
}

pub fn mutex(tasks: usize) {
    let post = Arc::new(Post {
        views: Mutex::new(0),
    });
    let wg = WaitGroup::new();

    for _ in 0..tasks {
        let post = Arc::clone(&post);
        wg.spawn(move || post.inc());
    }
    wg.wait();

    println!("{}", *post.views.lock());
}

pub fn select() {
    let chan1: Channel<i32> = Channel::unbuffered();
    let chan2: Channel<&str> = Channel::unbuffered();

    let tx = chan1.sender();
    spawn(move || tx.send(1));
    let tx = chan2.sender();
    spawn(move || tx.send("pong"));

    for _ in 0..2 {
        Select::new()
            .recv(&chan1, |v| println!("received data from chan1 {}", v.unwrap_or_default()))
            .recv(&chan2, |v| println!("received data from chan2 {}", v.unwrap_or_default()))
            .wait();
    }

    let silent: Channel<i32> = Channel::unbuffered();
    let timeout = strand_timers::after(Duration::from_millis(100));
    Select::new()
        .recv(&silent, |v| println!("received {:?}", v))
        .recv(&timeout, |_| println!("timed out waiting for a value"))
        .wait();

    Select::new()
        .recv(&silent, |v| println!("received {:?}", v))
        .default(|| println!("nothing ready, moving on"))
        .wait();
}

pub fn cancel(workers: usize, run_ms: u64) {
    let stop: Channel<()> = Channel::unbuffered();
    let wg = WaitGroup::new();

    for id in 0..workers {
        let stop = stop.receiver();
        wg.spawn(move || {
            let ticker = strand_timers::tick(Duration::from_millis(50));
            let mut ticks = 0;
            loop {
                let running = Select::new()
                    .recv(&stop, |_| false)
                    .recv(&ticker, |_| true)
                    .wait();
                if !running {
                    break;
                }
                ticks += 1;
            }
            println!("worker {} stopped after {} ticks", id, ticks);
        });
    }

    thread::sleep(Duration::from_millis(run_ms));
    stop.close();
    wg.wait();
    println!("all workers stopped");
}

pub fn all() {
    let demos: [(&str, fn()); 7] = [
        ("tasks", || tasks(11)),
        ("wait-group", || wait_group(11)),
        ("channels", channels),
        ("buffered", || buffered(10, 100)),
        ("mutex", || mutex(100)),
        ("select", select),
        ("cancel", || cancel(3, 250)),
    ];

    for (name, demo) in demos {
        println!("== {} ==", name);
        demo();
    }
}
