use std::time::Instant;

use evio::{Error, EventLoop, RunMode};

mod util;
use util::{cell, init};

#[test]
fn timer_fires_once_after_timeout() {
    init();

    let fired = cell(0u32);
    let observed = fired.clone();

    // Baseline before the loop exists; its clock epoch is `new`.
    let start = Instant::now();
    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();
    lp.timer_start(timer, move |_, _| *observed.borrow_mut() += 1, 50, 0)
        .unwrap();

    assert_eq!(lp.run(RunMode::Default).unwrap(), false);

    assert!(start.elapsed().as_millis() >= 50);
    assert_eq!(*fired.borrow(), 1);
    assert!(!lp.is_active(timer));
}

#[test]
fn repeating_timer_fires_five_times_then_stops() {
    init();

    let fired = cell(0u32);
    let observed = fired.clone();

    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();
    lp.timer_start(
        timer,
        move |lp, t| {
            let mut count = observed.borrow_mut();
            *count += 1;
            if *count == 5 {
                lp.timer_stop(t).unwrap();
            }
        },
        10,
        10,
    )
    .unwrap();

    lp.run(RunMode::Default).unwrap();
    assert_eq!(*fired.borrow(), 5);
}

#[test]
fn repeat_interval_lower_bounds_firing_times() {
    init();

    let stamps = cell(Vec::<Instant>::new());
    let sink = stamps.clone();

    let start = Instant::now();
    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();
    lp.timer_start(
        timer,
        move |lp, t| {
            let mut stamps = sink.borrow_mut();
            stamps.push(Instant::now());
            if stamps.len() == 3 {
                lp.timer_stop(t).unwrap();
            }
        },
        40,
        20,
    )
    .unwrap();

    lp.run(RunMode::Default).unwrap();

    let stamps = stamps.borrow();
    assert!(stamps[0].duration_since(start).as_millis() >= 40);
    for pair in stamps.windows(2) {
        // +1 absorbs the loop clock's millisecond truncation.
        assert!(pair[1].duration_since(pair[0]).as_millis() + 1 >= 20);
    }
}

#[test]
fn timers_fire_in_deadline_order_ties_by_start_order() {
    init();

    let order = cell(Vec::new());

    let mut lp = EventLoop::new().unwrap();
    // Deliberately permuted deadlines; 20 and the second 5 tie with earlier
    // starts.
    for (timeout, id) in [(20u64, 'a'), (5, 'b'), (20, 'c'), (5, 'd'), (1, 'e')] {
        let sink = order.clone();
        let timer = lp.timer_init().unwrap();
        lp.timer_start(timer, move |_, _| sink.borrow_mut().push(id), timeout, 0)
            .unwrap();
    }

    lp.run(RunMode::Default).unwrap();
    assert_eq!(*order.borrow(), vec!['e', 'b', 'd', 'a', 'c']);
}

#[test]
fn zero_timeout_fires_on_the_first_tick() {
    init();

    let fired = cell(false);
    let observed = fired.clone();

    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();
    lp.timer_start(timer, move |_, _| *observed.borrow_mut() = true, 0, 0)
        .unwrap();

    let start = Instant::now();
    lp.run(RunMode::Default).unwrap();
    assert!(*fired.borrow());
    assert!(start.elapsed().as_millis() < 1_000);
}

#[test]
fn restarting_inside_the_callback_reschedules() {
    init();

    let fired = cell(0u32);
    let observed = fired.clone();

    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();
    lp.timer_start(
        timer,
        move |lp, t| {
            *observed.borrow_mut() += 1;
            if *observed.borrow() == 1 {
                // Replace the callback and fire once more.
                let sink = observed.clone();
                lp.timer_start(t, move |_, _| *sink.borrow_mut() += 10, 5, 0)
                    .unwrap();
            }
        },
        5,
        0,
    )
    .unwrap();

    lp.run(RunMode::Default).unwrap();
    assert_eq!(*fired.borrow(), 11);
}

#[test]
fn again_restarts_with_the_repeat_interval() {
    init();

    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();

    // Never started: no callback to rearm with.
    assert!(matches!(lp.timer_again(timer), Err(Error::Inval)));

    let fired = cell(0u32);
    let observed = fired.clone();
    lp.timer_start(
        timer,
        move |lp, t| {
            *observed.borrow_mut() += 1;
            lp.timer_stop(t).unwrap();
        },
        60_000,
        10,
    )
    .unwrap();

    // Drop the distant initial deadline in favor of the 10ms repeat.
    lp.timer_again(timer).unwrap();

    let start = Instant::now();
    lp.run(RunMode::Default).unwrap();
    assert_eq!(*fired.borrow(), 1);
    assert!(start.elapsed().as_millis() < 10_000);
}

#[test]
fn repeat_value_round_trips() {
    init();

    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();
    assert_eq!(lp.timer_get_repeat(timer).unwrap(), 0);

    lp.timer_set_repeat(timer, 250).unwrap();
    assert_eq!(lp.timer_get_repeat(timer).unwrap(), 250);
}

#[test]
fn start_stop_leaves_the_handle_inactive() {
    init();

    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();
    assert!(!lp.is_active(timer));

    lp.timer_start(timer, |_, _| {}, 1_000, 0).unwrap();
    assert!(lp.is_active(timer));

    lp.timer_stop(timer).unwrap();
    lp.timer_stop(timer).unwrap();
    assert!(!lp.is_active(timer));
    assert!(!lp.alive());
}
