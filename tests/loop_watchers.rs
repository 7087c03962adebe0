use std::time::Instant;

use evio::{EventLoop, RunMode};

mod util;
use util::{cell, init};

#[test]
fn idle_watcher_keeps_the_poll_from_blocking() {
    init();

    let mut lp = EventLoop::new().unwrap();

    // A distant timer that must never get the chance to fire.
    let guard = lp.timer_init().unwrap();
    lp.timer_start(guard, |_, _| unreachable!("guard timer fired"), 10_000, 0)
        .unwrap();

    let idle = lp.idle_init().unwrap();
    let mut countdown = 3;
    lp.idle_start(idle, move |lp, i| {
        countdown -= 1;
        if countdown == 0 {
            lp.close(i).unwrap();
            lp.close(guard).unwrap();
        }
    })
    .unwrap();

    let start = Instant::now();
    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
    assert!(start.elapsed().as_millis() < 2_000);
}

#[test]
fn prepare_and_check_bracket_the_poll() {
    init();

    let order = cell(Vec::new());

    let mut lp = EventLoop::new().unwrap();

    let prepare = lp.prepare_init().unwrap();
    let sink = order.clone();
    lp.prepare_start(prepare, move |_, _| sink.borrow_mut().push("prepare"))
        .unwrap();

    let check = lp.check_init().unwrap();
    let sink = order.clone();
    lp.check_start(check, move |_, _| sink.borrow_mut().push("check"))
        .unwrap();

    let idle = lp.idle_init().unwrap();
    let sink = order.clone();
    let mut ticks = 0;
    lp.idle_start(idle, move |lp, _| {
        sink.borrow_mut().push("idle");
        ticks += 1;
        if ticks == 2 {
            lp.stop();
        }
    })
    .unwrap();

    lp.run(RunMode::Default).unwrap();

    assert_eq!(
        *order.borrow(),
        vec!["idle", "prepare", "check", "idle", "prepare", "check"]
    );
}

#[test]
fn watchers_run_in_start_order() {
    init();

    let order = cell(Vec::new());

    let mut lp = EventLoop::new().unwrap();
    for id in 0..3 {
        let sink = order.clone();
        let check = lp.check_init().unwrap();
        lp.check_start(check, move |lp, c| {
            sink.borrow_mut().push(id);
            lp.check_stop(c).unwrap();
        })
        .unwrap();
    }

    // Check watchers only run after the poll returns; a short timer bounds
    // the first wait.
    let timer = lp.timer_init().unwrap();
    lp.timer_start(timer, |_, _| {}, 5, 0).unwrap();

    lp.run(RunMode::Default).unwrap();
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

#[test]
fn start_is_idempotent_while_active() {
    init();

    let fired = cell(0u32);

    let mut lp = EventLoop::new().unwrap();
    let idle = lp.idle_init().unwrap();

    let sink = fired.clone();
    lp.idle_start(idle, move |lp, i| {
        *sink.borrow_mut() += 1;
        lp.idle_stop(i).unwrap();
    })
    .unwrap();
    // Second start is a no-op: the original callback stays installed.
    lp.idle_start(idle, |_, _| unreachable!("replacement callback ran"))
        .unwrap();

    lp.run(RunMode::Default).unwrap();
    assert_eq!(*fired.borrow(), 1);
}

#[test]
fn stop_inside_a_sibling_callback_suppresses_it() {
    init();

    let fired = cell(Vec::new());

    let mut lp = EventLoop::new().unwrap();

    let first = lp.idle_init().unwrap();
    let second = lp.idle_init().unwrap();

    let sink = fired.clone();
    lp.idle_start(first, move |lp, i| {
        sink.borrow_mut().push("first");
        // Disarms the sibling before the walk reaches it.
        lp.idle_stop(second).unwrap();
        lp.idle_stop(i).unwrap();
    })
    .unwrap();
    let sink = fired.clone();
    lp.idle_start(second, move |_, _| sink.borrow_mut().push("second"))
        .unwrap();

    lp.run(RunMode::Default).unwrap();
    assert_eq!(*fired.borrow(), vec!["first"]);
}
