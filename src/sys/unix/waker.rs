use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd};

use super::Selector;
use crate::token::Token;
use crate::Interest;

/// Wake primitive backed by `eventfd(2)`.
///
/// An eventfd is a 64 bit counter: writes add to it, a read returns the
/// count and resets it to zero. One armed read watcher on the loop plus one
/// 8-byte write from any thread is all a wakeup takes.
#[cfg(any(target_os = "linux", target_os = "android"))]
#[derive(Debug)]
pub(crate) struct Waker {
    fd: File,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Waker {
    pub(crate) fn new(selector: &Selector, token: Token) -> io::Result<Waker> {
        let fd = syscall!(eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK))?;
        let file = unsafe { File::from_raw_fd(fd) };
        selector.register(file.as_raw_fd(), token, Interest::READABLE)?;
        Ok(Waker { fd: file })
    }

    #[allow(clippy::unused_io_amount)] // Partial writes cannot happen on an eventfd.
    pub(crate) fn wake(&self) -> io::Result<()> {
        let buf: [u8; 8] = 1u64.to_ne_bytes();
        match (&self.fd).write(&buf) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                // The counter is about to overflow; empty it and signal again.
                self.drain();
                self.wake()
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => self.wake(),
            Err(err) => Err(err),
        }
    }

    /// Reset the counter after the loop observed the wakeup.
    pub(crate) fn drain(&self) {
        let mut buf: [u8; 8] = 0u64.to_ne_bytes();
        // A `WouldBlock` error means the waker was already drained.
        let _ = (&self.fd).read(&mut buf);
    }
}

/// Wake primitive backed by a non-blocking pipe, for Unix flavors without
/// `eventfd(2)`. A wakeup writes one byte; the loop reads the pipe dry.
#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
#[derive(Debug)]
pub(crate) struct Waker {
    sender: File,
    receiver: File,
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
impl Waker {
    pub(crate) fn new(selector: &Selector, token: Token) -> io::Result<Waker> {
        let mut fds = [-1; 2];
        syscall!(pipe(fds.as_mut_ptr()))?;
        // SAFETY: `pipe(2)` just initialized these fds.
        let receiver = unsafe { File::from_raw_fd(fds[0]) };
        let sender = unsafe { File::from_raw_fd(fds[1]) };
        for fd in fds {
            syscall!(fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK))?;
            syscall!(fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
        }
        selector.register(receiver.as_raw_fd(), token, Interest::READABLE)?;
        Ok(Waker { sender, receiver })
    }

    pub(crate) fn wake(&self) -> io::Result<()> {
        match (&self.sender).write(&[1]) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                // The pipe is full; the loop is already guaranteed to wake.
                Ok(())
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => self.wake(),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 1024];
        loop {
            match (&self.receiver).read(&mut buf) {
                Ok(n) if n == buf.len() => continue,
                _ => return,
            }
        }
    }
}
