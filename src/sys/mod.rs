//! Platform-specific backends.
//!
//! Each backend exposes the same surface to the portable poller layer:
//!
//! * `Selector`: arm/disarm watchers and block for events, via
//!   `register`, `reregister`, `deregister` and `select`.
//! * `Event`: the `{ token, ready }` pair reported by `select`.
//! * `Waker`: the cross-thread wake primitive, `wake` and `drain`.
//!
//! The Unix selector is a readiness model (level-triggered epoll); the
//! Windows selector is a completion model (IOCP + AFD poll) that converts
//! completion packets into the same readiness events inside `select`, so the
//! loop observes identical semantics on both families.

#[cfg(unix)]
pub(crate) use self::unix::{Event, Selector, Waker, NEVENTS};

#[cfg(unix)]
#[macro_use]
pub(crate) mod unix;

#[cfg(windows)]
pub(crate) use self::windows::{Event, Selector, Waker, NEVENTS};

#[cfg(windows)]
pub(crate) mod windows;
