use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use evio::{Error, EventLoop, RunMode, WorkKind};

mod util;
use util::init;

// Pin the pool to one worker so queue-order tests are deterministic. The
// pool is a process singleton; this must run before the first submission.
fn init_pool() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| std::env::set_var("EVIO_THREADPOOL_SIZE", "1"));
    init();
}

#[test]
fn work_round_trip() {
    init_pool();

    let flag = Arc::new(AtomicBool::new(false));
    let done_calls = Arc::new(AtomicU32::new(0));

    let mut lp = EventLoop::new().unwrap();
    let work_flag = flag.clone();
    let done_counter = done_calls.clone();
    lp.queue_work(
        move || {
            thread::sleep(Duration::from_millis(50));
            work_flag.store(true, Ordering::SeqCst);
        },
        move |_, status| {
            assert!(status.is_ok());
            done_counter.fetch_add(1, Ordering::SeqCst);
        },
    )
    .unwrap();

    assert!(lp.alive());
    assert_eq!(lp.run(RunMode::Default).unwrap(), false);

    assert!(flag.load(Ordering::SeqCst));
    assert_eq!(done_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn canceled_work_reports_canceled_exactly_once() {
    init_pool();

    let statuses = Arc::new(AtomicU32::new(0));
    let canceled = Arc::new(AtomicU32::new(0));

    let mut lp = EventLoop::new().unwrap();

    // Occupy the single worker long enough for the victim to stay queued.
    lp.queue_work(
        || thread::sleep(Duration::from_millis(150)),
        |_, status| assert!(status.is_ok()),
    )
    .unwrap();

    let seen = statuses.clone();
    let seen_canceled = canceled.clone();
    let victim = lp
        .queue_work(
            || unreachable!("canceled work ran"),
            move |_, status| {
                seen.fetch_add(1, Ordering::SeqCst);
                if matches!(status, Err(Error::Canceled)) {
                    seen_canceled.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .unwrap();

    victim.cancel().unwrap();
    // A second cancel finds nothing left to remove.
    assert!(matches!(victim.cancel(), Err(Error::Busy)));

    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
    assert_eq!(statuses.load(Ordering::SeqCst), 1);
    assert_eq!(canceled.load(Ordering::SeqCst), 1);
}

#[test]
fn cancel_after_completion_is_rejected() {
    init_pool();

    let mut lp = EventLoop::new().unwrap();
    let work = lp.queue_work(|| {}, |_, status| assert!(status.is_ok())).unwrap();
    lp.run(RunMode::Default).unwrap();

    assert!(matches!(work.cancel(), Err(Error::Busy)));
}

#[test]
fn completions_arrive_in_deposit_order() {
    init_pool();

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut lp = EventLoop::new().unwrap();
    for id in 0..4u32 {
        let sink = order.clone();
        lp.queue_work(
            move || thread::sleep(Duration::from_millis(5)),
            move |_, _| sink.lock().unwrap().push(id),
        )
        .unwrap();
    }

    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
    // One worker: items run and complete strictly in submission order.
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn slow_work_shares_the_pool() {
    init_pool();

    let mut lp = EventLoop::new().unwrap();
    let done = Arc::new(AtomicU32::new(0));

    for kind in [WorkKind::Slow, WorkKind::Fast] {
        let counter = done.clone();
        lp.queue_work_with(
            kind,
            || thread::sleep(Duration::from_millis(10)),
            move |_, status| {
                assert!(status.is_ok());
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
    }

    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
    assert_eq!(done.load(Ordering::SeqCst), 2);
}
