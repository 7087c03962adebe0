use std::sync::Arc;

use crate::notify::AsyncShared;
use crate::wheel::TimerRef;
use crate::{EventLoop, Interest, Ready, Result};

/// Raw file descriptor (Unix) or socket (Windows) accepted by fd watchers.
#[cfg(unix)]
pub type OsSource = std::os::fd::RawFd;
#[cfg(windows)]
pub type OsSource = std::os::windows::io::RawSocket;

/// Identifies a handle owned by an [`EventLoop`].
///
/// Handles are arena indices, cheap to copy and safe to hold after the
/// handle dies: a stale id simply stops matching anything. Every typed
/// handle (timer, idle, …) converts into this for the generic operations
/// ([`close`], [`ref_handle`], …).
///
/// [`close`]: EventLoop::close
/// [`ref_handle`]: EventLoop::ref_handle
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    pub(crate) idx: u32,
    pub(crate) seq: u32,
}

/// The kind of a live handle, as reported by [`EventLoop::handle_type`] and
/// [`EventLoop::walk`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum HandleType {
    Timer,
    Prepare,
    Check,
    Idle,
    Async,
    Poll,
}

macro_rules! typed_handle {
    ($(#[$meta: meta])* $name: ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) Handle);

        impl From<$name> for Handle {
            fn from(h: $name) -> Handle {
                h.0
            }
        }
    };
}

typed_handle!(
    /// A timer handle; fires its callback after a timeout, optionally
    /// repeating.
    TimerHandle
);
typed_handle!(
    /// A prepare handle; runs its callback right before each poll.
    PrepareHandle
);
typed_handle!(
    /// A check handle; runs its callback right after each poll.
    CheckHandle
);
typed_handle!(
    /// An idle handle; runs its callback every tick and keeps the poll from
    /// blocking while active.
    IdleHandle
);
typed_handle!(
    /// An async handle; its callback runs on the loop thread after a
    /// cross-thread [`AsyncSender::send`](crate::AsyncSender::send).
    AsyncHandle
);
typed_handle!(
    /// An fd watcher handle; its callback reports readiness on a caller
    /// supplied fd or socket.
    PollHandle
);

// Handle flag word. CLOSING is a one-way latch; CLOSED is only ever set by
// the endgame right before the close callback runs.
pub(crate) const HANDLE_REF: u8 = 0b0000_0001;
pub(crate) const HANDLE_ACTIVE: u8 = 0b0000_0010;
pub(crate) const HANDLE_CLOSING: u8 = 0b0000_0100;
pub(crate) const HANDLE_CLOSED: u8 = 0b0000_1000;

/// Boxed timer callback.
pub type TimerCb = Box<dyn FnMut(&mut EventLoop, TimerHandle)>;
/// Boxed prepare callback.
pub type PrepareCb = Box<dyn FnMut(&mut EventLoop, PrepareHandle)>;
/// Boxed check callback.
pub type CheckCb = Box<dyn FnMut(&mut EventLoop, CheckHandle)>;
/// Boxed idle callback.
pub type IdleCb = Box<dyn FnMut(&mut EventLoop, IdleHandle)>;
/// Boxed async callback.
pub type AsyncCb = Box<dyn FnMut(&mut EventLoop, AsyncHandle)>;
/// Boxed fd watcher callback; receives the observed readiness.
pub type PollCb = Box<dyn FnMut(&mut EventLoop, PollHandle, Result<Ready>)>;
/// Boxed close callback, invoked exactly once from the closing phase.
pub type CloseCb = Box<dyn FnOnce(&mut EventLoop, Handle)>;

pub(crate) struct TimerState {
    pub(crate) cb: Option<TimerCb>,
    /// True once a callback has ever been installed. Stays true while the
    /// callback is temporarily detached for invocation, so `timer_again`
    /// works from inside it.
    pub(crate) cb_set: bool,
    /// Absolute deadline in loop time, valid while armed.
    pub(crate) timeout: u64,
    pub(crate) repeat: u64,
    pub(crate) wheel_ref: Option<TimerRef>,
}

pub(crate) struct PrepareState {
    pub(crate) cb: Option<PrepareCb>,
}

pub(crate) struct CheckState {
    pub(crate) cb: Option<CheckCb>,
}

pub(crate) struct IdleState {
    pub(crate) cb: Option<IdleCb>,
}

pub(crate) struct AsyncState {
    pub(crate) cb: Option<AsyncCb>,
    pub(crate) shared: Arc<AsyncShared>,
}

pub(crate) struct PollState {
    pub(crate) source: OsSource,
    pub(crate) cb: Option<PollCb>,
    /// Interest currently armed with the backend; `None` while stopped.
    pub(crate) interest: Option<Interest>,
}

pub(crate) enum HandleKind {
    Timer(TimerState),
    Prepare(PrepareState),
    Check(CheckState),
    Idle(IdleState),
    Async(AsyncState),
    Poll(PollState),
}

impl HandleKind {
    pub(crate) fn handle_type(&self) -> HandleType {
        match self {
            HandleKind::Timer(_) => HandleType::Timer,
            HandleKind::Prepare(_) => HandleType::Prepare,
            HandleKind::Check(_) => HandleType::Check,
            HandleKind::Idle(_) => HandleType::Idle,
            HandleKind::Async(_) => HandleType::Async,
            HandleKind::Poll(_) => HandleType::Poll,
        }
    }
}

pub(crate) struct HandleEntry {
    pub(crate) seq: u32,
    pub(crate) flags: u8,
    pub(crate) close_cb: Option<CloseCb>,
    pub(crate) kind: HandleKind,
}

impl HandleEntry {
    pub(crate) fn new(seq: u32, kind: HandleKind) -> HandleEntry {
        HandleEntry {
            seq,
            flags: HANDLE_REF,
            close_cb: None,
            kind,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.flags & HANDLE_ACTIVE != 0
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.flags & (HANDLE_CLOSING | HANDLE_CLOSED) != 0
    }

    pub(crate) fn has_ref(&self) -> bool {
        self.flags & HANDLE_REF != 0
    }
}
