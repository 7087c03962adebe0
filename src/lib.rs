//! Callback-driven event loop for building single-threaded I/O programs.
//!
//! One [`EventLoop`] multiplexes fd readiness, wheel timers, idle / prepare /
//! check watchers, cross-thread async notifications and a blocking-work pool
//! onto the thread that calls [`EventLoop::run`]. Handles are created with
//! the `*_init` methods, armed with `*_start`, and released through the
//! two-phase [`close`](EventLoop::close): resources are detached
//! immediately, the close callback runs from a later loop phase, and no
//! other callback of that handle fires in between.
//!
//! The readiness backend is level-triggered epoll on Unix; on Windows an
//! I/O completion port plays the same role with identical observable
//! semantics. Either way callbacks only ever run on the loop thread; the
//! sole cross-thread entry points are [`AsyncSender::send`] and
//! [`Work::cancel`].
//!
//! # Examples
//!
//! A timer, a repeating timer that stops itself, and a cross-thread wakeup:
//!
//! ```
//! use evio::{EventLoop, RunMode};
//! use std::thread;
//!
//! # fn main() -> evio::Result<()> {
//! let mut lp = EventLoop::new()?;
//!
//! let once = lp.timer_init()?;
//! lp.timer_start(once, |_, _| println!("50ms passed"), 50, 0)?;
//!
//! let mut ticks = 0;
//! let ticker = lp.timer_init()?;
//! lp.timer_start(ticker, move |lp, t| {
//!     ticks += 1;
//!     if ticks == 3 {
//!         lp.timer_stop(t).unwrap();
//!     }
//! }, 10, 10)?;
//!
//! let (async_h, sender) = lp.async_init(|lp, h| {
//!     lp.close(h).unwrap();
//! })?;
//! thread::spawn(move || sender.send());
//!
//! lp.run(RunMode::Default)?;
//! # let _ = async_h;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod error;
mod event_loop;
mod handle;
mod interest;
mod loop_watcher;
mod notify;
mod pollfd;
mod poller;
mod ready;
mod sys;
mod threadpool;
mod time;
mod timer;
mod token;
mod wheel;

pub use error::{Error, Result, Status};
pub use event_loop::{EventLoop, LoopOption, Metrics, RunMode};
pub use handle::{
    AsyncCb, AsyncHandle, CheckCb, CheckHandle, CloseCb, Handle, HandleType, IdleCb, IdleHandle,
    OsSource, PollCb, PollHandle, PrepareCb, PrepareHandle, TimerCb, TimerHandle,
};
pub use interest::Interest;
pub use notify::AsyncSender;
pub use ready::Ready;
pub use threadpool::{Work, WorkKind};
pub use time::hrtime;
