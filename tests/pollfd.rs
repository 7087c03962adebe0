#![cfg(unix)]

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::thread;
use std::time::Duration;

use evio::{EventLoop, Interest, RunMode};

mod util;
use util::{cell, init};

#[test]
fn readable_event_on_a_listener() {
    init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let mut lp = EventLoop::new().unwrap();
    let watcher = lp.poll_init(listener.as_raw_fd()).unwrap();
    let got = cell(false);
    let sink = got.clone();
    lp.poll_start(watcher, Interest::READABLE, move |lp, w, ready| {
        assert!(ready.unwrap().is_readable());
        *sink.borrow_mut() = true;
        lp.close(w).unwrap();
    })
    .unwrap();

    let client = thread::spawn(move || {
        let stream = TcpStream::connect(addr).unwrap();
        // Hold the connection open until the loop has seen it.
        thread::sleep(Duration::from_millis(200));
        drop(stream);
    });

    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
    assert!(*got.borrow());

    let _ = listener.accept();
    client.join().unwrap();
}

#[test]
fn writable_event_on_a_connected_stream() {
    init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let stream = TcpStream::connect(addr).unwrap();
    let (peer, _) = listener.accept().unwrap();

    let mut lp = EventLoop::new().unwrap();
    let watcher = lp.poll_init(stream.as_raw_fd()).unwrap();
    let got = cell(false);
    let sink = got.clone();
    lp.poll_start(
        watcher,
        Interest::READABLE | Interest::WRITABLE,
        move |lp, w, ready| {
            assert!(ready.unwrap().is_writable());
            *sink.borrow_mut() = true;
            lp.close(w).unwrap();
        },
    )
    .unwrap();

    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
    assert!(*got.borrow());
    drop(peer);
}

#[test]
fn stop_silences_a_level_triggered_watcher() {
    init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let stream = TcpStream::connect(addr).unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    // Make the stream readable and keep it that way.
    peer.write_all(b"ping").unwrap();

    let mut lp = EventLoop::new().unwrap();
    let watcher = lp.poll_init(stream.as_raw_fd()).unwrap();
    let fired = cell(0u32);
    let sink = fired.clone();
    lp.poll_start(watcher, Interest::READABLE, move |lp, w, ready| {
        assert!(ready.unwrap().is_readable());
        *sink.borrow_mut() += 1;
        // Without this stop, level triggering would fire again every tick.
        lp.poll_stop(w).unwrap();
    })
    .unwrap();

    let timer = lp.timer_init().unwrap();
    lp.timer_start(
        timer,
        move |lp, t| {
            lp.timer_stop(t).unwrap();
            lp.close(watcher).unwrap();
        },
        100,
        0,
    )
    .unwrap();

    lp.run(RunMode::Default).unwrap();
    assert_eq!(*fired.borrow(), 1);
    drop(peer);
}

#[test]
fn rearming_changes_the_interest() {
    init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let stream = TcpStream::connect(addr).unwrap();
    let (peer, _) = listener.accept().unwrap();

    let mut lp = EventLoop::new().unwrap();
    let watcher = lp.poll_init(stream.as_raw_fd()).unwrap();

    // First armed only for the (absent) readable class, then re-armed for
    // writable from inside a prepare callback.
    lp.poll_start(watcher, Interest::READABLE, move |_, _, _| {
        unreachable!("nothing to read");
    })
    .unwrap();

    let rearmed = cell(false);
    let sink = rearmed.clone();
    let prepare = lp.prepare_init().unwrap();
    lp.prepare_start(prepare, move |lp, p| {
        let sink = sink.clone();
        lp.poll_start(watcher, Interest::WRITABLE, move |lp, w, ready| {
            assert!(ready.unwrap().is_writable());
            *sink.borrow_mut() = true;
            lp.close(w).unwrap();
        })
        .unwrap();
        lp.prepare_stop(p).unwrap();
        lp.close(p).unwrap();
    })
    .unwrap();

    assert_eq!(lp.run(RunMode::Default).unwrap(), false);
    assert!(*rearmed.borrow());
    drop(peer);
}
