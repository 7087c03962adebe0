//! Fd watchers: readiness callbacks for caller-owned fds and sockets.

use log::trace;

use crate::handle::{HandleKind, OsSource, PollState};
use crate::token::Token;
use crate::{Error, EventLoop, Interest, PollHandle, Ready, Result};

impl EventLoop {
    /// Create a watcher for `source`, which stays owned by the caller but
    /// must not be closed before this handle's close callback has run.
    pub fn poll_init(&mut self, source: OsSource) -> Result<PollHandle> {
        Ok(PollHandle(self.alloc_handle(HandleKind::Poll(PollState {
            source,
            cb: None,
            interest: None,
        }))))
    }

    /// Arm the watcher for `interest`. The callback receives the readiness
    /// classes observed, which can include [`Ready::ERROR`]/[`Ready::HUP`]
    /// on top of what was asked for. Starting an active watcher re-arms it
    /// with the new interest and callback.
    pub fn poll_start(
        &mut self,
        handle: PollHandle,
        interest: Interest,
        cb: impl FnMut(&mut EventLoop, PollHandle, Result<Ready>) + 'static,
    ) -> Result<()> {
        let raw = handle.0;
        let idx = raw.idx as usize;

        let entry = self.live_entry_mut(raw)?;
        let source = match &mut entry.kind {
            HandleKind::Poll(state) => {
                state.cb = Some(Box::new(cb));
                state.interest = Some(interest);
                state.source
            }
            _ => return Err(Error::Inval),
        };

        trace!("starting fd watcher; interest={:?}", interest);
        self.poller.watcher_start(Token(idx), source, interest);
        self.handle_start_raw(idx);
        Ok(())
    }

    /// Disarm the watcher. Synchronous: no callback fires for events not
    /// already delivered in the current tick. A no-op when inactive.
    pub fn poll_stop(&mut self, handle: PollHandle) -> Result<()> {
        let raw = handle.0;
        let idx = raw.idx as usize;

        let entry = self.checked_entry_mut(raw)?;
        if !entry.is_active() {
            return Ok(());
        }
        match &mut entry.kind {
            HandleKind::Poll(state) => state.interest = None,
            _ => return Err(Error::Inval),
        }

        self.poller.watcher_stop(Token(idx));
        self.handle_stop_raw(idx);
        Ok(())
    }
}
