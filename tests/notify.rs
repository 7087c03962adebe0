use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use evio::{EventLoop, RunMode};

mod util;
use util::{cell, init};

#[test]
fn wake_from_another_thread() {
    init();

    let start = Instant::now();
    let mut lp = EventLoop::new().unwrap();
    let (_async, sender) = lp
        .async_init(|lp, h| {
            lp.close(h).unwrap();
        })
        .unwrap();

    let poker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        sender.send();
    });

    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
    assert!(start.elapsed().as_millis() >= 100);
    poker.join().unwrap();
}

#[test]
fn sends_before_dispatch_coalesce() {
    init();

    let fired = cell(0u32);
    let observed = fired.clone();

    let mut lp = EventLoop::new().unwrap();
    let (async_h, sender) = lp
        .async_init(move |_, _| *observed.borrow_mut() += 1)
        .unwrap();

    // All of these land before the loop ever dispatches.
    for _ in 0..100 {
        sender.send();
    }

    // Give the sweep one tick to happen, then shut down.
    let timer = lp.timer_init().unwrap();
    lp.timer_start(
        timer,
        move |lp, t| {
            lp.timer_stop(t).unwrap();
            lp.close(async_h).unwrap();
        },
        50,
        0,
    )
    .unwrap();

    lp.run(RunMode::Default).unwrap();
    assert_eq!(*fired.borrow(), 1);
}

#[test]
fn each_dispatched_send_fires_at_most_once() {
    init();

    let invocations = Arc::new(AtomicU32::new(0));
    let sends = 50u32;

    let mut lp = EventLoop::new().unwrap();
    let counter = invocations.clone();
    let (async_h, sender) = lp
        .async_init(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let poker = thread::spawn(move || {
        for _ in 0..sends {
            sender.send();
            thread::sleep(Duration::from_millis(1));
        }
    });

    let timer = lp.timer_init().unwrap();
    lp.timer_start(
        timer,
        move |lp, t| {
            lp.timer_stop(t).unwrap();
            lp.close(async_h).unwrap();
        },
        200,
        0,
    )
    .unwrap();

    lp.run(RunMode::Default).unwrap();
    poker.join().unwrap();

    let fired = invocations.load(Ordering::SeqCst);
    assert!(fired >= 1);
    assert!(fired <= sends);
}

#[test]
fn sends_after_close_are_ignored() {
    init();

    let mut lp = EventLoop::new().unwrap();
    let (async_h, sender) = lp
        .async_init(|_, _| unreachable!("closed async handle fired"))
        .unwrap();

    lp.close(async_h).unwrap();
    sender.send();
    sender.send();

    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
}

#[test]
fn senders_are_send_and_clone() {
    init();

    fn assert_send_sync<T: Send + Sync + Clone>() {}
    assert_send_sync::<evio::AsyncSender>();
}
