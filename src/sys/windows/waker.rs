use std::io;
use std::ptr::null_mut;

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::IO::PostQueuedCompletionStatus;

use super::Selector;
use crate::token::Token;

/// Wake primitive for the completion backend: a zero-byte completion packet
/// posted straight to the selector's port, carrying the wake token as its
/// completion key. Nothing to drain; consuming the packet is the reset.
#[derive(Debug)]
pub(crate) struct Waker {
    port: HANDLE,
    token: Token,
}

// The port handle is only ever used with PostQueuedCompletionStatus, which
// is documented thread-safe.
unsafe impl Send for Waker {}
unsafe impl Sync for Waker {}

impl Waker {
    pub(crate) fn new(selector: &Selector, token: Token) -> io::Result<Waker> {
        Ok(Waker {
            port: selector.port(),
            token,
        })
    }

    pub(crate) fn wake(&self) -> io::Result<()> {
        let ret =
            unsafe { PostQueuedCompletionStatus(self.port, 0, self.token.0, null_mut()) };
        if ret == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn drain(&self) {}
}
