use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::token::Token;
use crate::{Interest, Ready};

/// Maximum number of events fetched from the kernel per `select` call. The
/// caller re-polls with a zero timeout when a batch comes back full.
pub(crate) const NEVENTS: usize = 1024;

#[derive(Debug)]
pub(crate) struct Event {
    pub(crate) token: Token,
    pub(crate) ready: Ready,
}

/// Readiness backend: a level-triggered epoll instance.
///
/// Unlike edge-triggered designs, a watcher keeps reporting until the
/// condition is consumed; the portable layer above filters stale reports
/// against each watcher's still-wanted interest instead.
#[derive(Debug)]
pub(crate) struct Selector {
    ep: OwnedFd,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        // SAFETY: `epoll_create1(2)` ensures the fd is valid.
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Selector { ep })
    }

    pub(crate) fn register(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interests_to_epoll(interests),
            u64: usize::from(token) as u64,
        };

        let ep = self.ep.as_raw_fd();
        match syscall!(epoll_ctl(ep, libc::EPOLL_CTL_ADD, fd, &mut event)) {
            Ok(_) => Ok(()),
            // A file descriptor watched before may still be known to the
            // kernel, e.g. after a dup. Fall back to modifying it in place.
            Err(ref err) if err.raw_os_error() == Some(libc::EEXIST) => {
                syscall!(epoll_ctl(ep, libc::EPOLL_CTL_MOD, fd, &mut event)).map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interests_to_epoll(interests),
            u64: usize::from(token) as u64,
        };

        let ep = self.ep.as_raw_fd();
        syscall!(epoll_ctl(ep, libc::EPOLL_CTL_MOD, fd, &mut event)).map(|_| ())
    }

    pub(crate) fn deregister(&self, fd: RawFd, _token: Token) -> io::Result<()> {
        let ep = self.ep.as_raw_fd();
        syscall!(epoll_ctl(ep, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())).map(|_| ())
    }

    /// Block up to `timeout` ms (-1 = forever) and append reported events.
    ///
    /// Returns the raw kernel event count so the caller can detect a full
    /// batch. `EINTR` comes back as an error; the caller owns the retry
    /// policy because only it knows the remaining deadline.
    pub(crate) fn select(
        &self,
        events: &mut Vec<Event>,
        timeout: i32,
        sigmask: Option<&libc::sigset_t>,
    ) -> io::Result<usize> {
        let mut raw: [libc::epoll_event; NEVENTS] = unsafe { std::mem::zeroed() };

        let n = match sigmask {
            Some(mask) => syscall!(epoll_pwait(
                self.ep.as_raw_fd(),
                raw.as_mut_ptr(),
                NEVENTS as i32,
                timeout,
                mask,
            ))?,
            None => syscall!(epoll_wait(
                self.ep.as_raw_fd(),
                raw.as_mut_ptr(),
                NEVENTS as i32,
                timeout,
            ))?,
        } as usize;

        for ev in raw.iter().take(n) {
            events.push(Event {
                token: Token(ev.u64 as usize),
                ready: epoll_to_ready(ev.events),
            });
        }

        Ok(n)
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.ep.as_raw_fd()
    }
}

fn interests_to_epoll(interests: Interest) -> u32 {
    // Level-triggered on purpose: watchers are disarmed by dropping their
    // interest bits, not by consuming edges.
    let mut kind = 0;

    if interests.is_readable() {
        kind |= libc::EPOLLIN;
    }

    if interests.is_writable() {
        kind |= libc::EPOLLOUT;
    }

    if interests.is_priority() {
        kind |= libc::EPOLLPRI;
    }

    if interests.is_disconnect() {
        kind |= libc::EPOLLRDHUP;
    }

    kind as u32
}

fn epoll_to_ready(events: u32) -> Ready {
    let events = events as libc::c_int;
    let mut ready = Ready::EMPTY;

    if events & libc::EPOLLIN != 0 {
        ready |= Ready::READABLE;
    }
    if events & libc::EPOLLOUT != 0 {
        ready |= Ready::WRITABLE;
    }
    if events & libc::EPOLLPRI != 0 {
        ready |= Ready::PRIORITY;
    }
    if events & libc::EPOLLRDHUP != 0 {
        ready |= Ready::DISCONNECT;
    }
    if events & libc::EPOLLERR != 0 {
        ready |= Ready::ERROR;
    }
    if events & libc::EPOLLHUP != 0 {
        ready |= Ready::HUP;
    }

    ready
}
