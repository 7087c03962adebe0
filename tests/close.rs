use evio::{Error, EventLoop, RunMode};

mod util;
use util::{cell, init};

#[test]
fn close_suppresses_primary_callbacks() {
    init();

    let observed = cell(Vec::new());

    let mut lp = EventLoop::new().unwrap();
    let prepare = lp.prepare_init().unwrap();

    let sink = observed.clone();
    lp.prepare_start(prepare, move |_, _| sink.borrow_mut().push("prepare"))
        .unwrap();

    // Closed before the loop ever runs: the prepare callback must not fire,
    // the close callback must, exactly once.
    let sink = observed.clone();
    lp.close_with(prepare, move |_, _| sink.borrow_mut().push("close"))
        .unwrap();

    assert!(lp.is_closing(prepare));
    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
    assert_eq!(*observed.borrow(), vec!["close"]);
}

#[test]
fn close_is_idempotent_and_keeps_the_first_callback() {
    init();

    let closes = cell(0u32);

    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();

    let sink = closes.clone();
    lp.close_with(timer, move |_, _| *sink.borrow_mut() += 1)
        .unwrap();
    // Second close: no-op, and its callback is dropped, not queued.
    lp.close_with(timer, |_, _| unreachable!("second close callback ran"))
        .unwrap();

    lp.run(RunMode::Default).unwrap();
    assert_eq!(*closes.borrow(), 1);
}

#[test]
fn closing_an_armed_timer_cancels_its_deadline() {
    init();

    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();
    lp.timer_start(timer, |_, _| unreachable!("closed timer fired"), 10, 0)
        .unwrap();
    lp.close(timer).unwrap();

    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
}

#[test]
fn operations_on_a_closing_handle_are_rejected() {
    init();

    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();
    lp.close(timer).unwrap();

    assert!(matches!(
        lp.timer_start(timer, |_, _| {}, 10, 0),
        Err(Error::Inval)
    ));
}

#[test]
fn handle_ids_die_with_their_handle() {
    init();

    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();
    lp.close(timer).unwrap();
    lp.run(RunMode::Default).unwrap();

    // The arena slot is gone; the stale id matches nothing.
    assert!(matches!(
        lp.timer_start(timer, |_, _| {}, 10, 0),
        Err(Error::NotFound)
    ));
    assert!(lp.handle_type(timer).is_none());
    assert!(!lp.is_active(timer));
}

#[test]
fn close_from_inside_the_primary_callback() {
    init();

    let closed = cell(false);

    let mut lp = EventLoop::new().unwrap();
    let timer = lp.timer_init().unwrap();
    let sink = closed.clone();
    lp.timer_start(
        timer,
        move |lp, t| {
            let sink = sink.clone();
            lp.close_with(t, move |_, _| *sink.borrow_mut() = true)
                .unwrap();
        },
        10,
        10,
    )
    .unwrap();

    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
    assert!(*closed.borrow());
}

#[test]
fn close_callback_may_close_other_handles() {
    init();

    let order = cell(Vec::new());

    let mut lp = EventLoop::new().unwrap();
    let first = lp.timer_init().unwrap();
    let second = lp.timer_init().unwrap();

    let sink = order.clone();
    lp.close_with(first, move |lp, _| {
        sink.borrow_mut().push("first");
        let sink = sink.clone();
        lp.close_with(second, move |_, _| sink.borrow_mut().push("second"))
            .unwrap();
    })
    .unwrap();

    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
    assert_eq!(*order.borrow(), vec!["first", "second"]);
}
