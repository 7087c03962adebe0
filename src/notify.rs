//! Async handles: the cross-thread notification primitive.
//!
//! The loop-side half is an ordinary handle; the thread-side half is an
//! [`AsyncSender`], which flips a per-handle pending flag and pokes the
//! loop's waker on the first flip. Repeated sends before the loop gets
//! around to dispatching collapse into one callback invocation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::event_loop::LoopShared;
use crate::handle::{AsyncState, HandleKind};
use crate::{AsyncHandle, EventLoop, Result};

pub(crate) struct AsyncShared {
    pending: AtomicBool,
    dead: AtomicBool,
    loop_shared: Arc<LoopShared>,
}

impl AsyncShared {
    fn send(&self) {
        if self.dead.load(Ordering::Acquire) {
            return;
        }
        // Cheap read first; the common case of a hot sender is an already
        // pending flag and no syscall at all.
        if self.pending.load(Ordering::Relaxed) {
            return;
        }
        if self
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.loop_shared.wake();
        }
    }

    /// CAS 1→0; true when this call claimed a pending send.
    pub(crate) fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn close(&self) {
        self.dead.store(true, Ordering::Release);
    }
}

/// Sends wakeups to an [`AsyncHandle`]'s loop from any thread.
///
/// The only part of the API that may be used off the loop thread. `send` is
/// also async-signal-safe on Unix (it bottoms out in a single `write(2)`).
/// Senders outliving their handle are harmless; sends after close are
/// ignored.
#[derive(Clone)]
pub struct AsyncSender {
    shared: Arc<AsyncShared>,
}

impl AsyncSender {
    /// Schedule the handle's callback on its loop, waking the loop if it is
    /// blocked. At least one callback invocation follows any number of
    /// sends; bursts coalesce.
    pub fn send(&self) {
        self.shared.send();
    }
}

impl std::fmt::Debug for AsyncSender {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("AsyncSender")
            .field("pending", &self.shared.pending.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventLoop {
    /// Create an async handle and its thread-safe sender. The handle starts
    /// active immediately and keeps the loop alive until closed.
    pub fn async_init(
        &mut self,
        cb: impl FnMut(&mut EventLoop, AsyncHandle) + 'static,
    ) -> Result<(AsyncHandle, AsyncSender)> {
        let shared = Arc::new(AsyncShared {
            pending: AtomicBool::new(false),
            dead: AtomicBool::new(false),
            loop_shared: self.shared.clone(),
        });
        let handle = self.alloc_handle(HandleKind::Async(AsyncState {
            cb: Some(Box::new(cb)),
            shared: shared.clone(),
        }));
        self.async_q.push(handle);
        self.handle_start_raw(handle.idx as usize);
        Ok((AsyncHandle(handle), AsyncSender { shared }))
    }

    // Pending-phase half of a wakeup: claim each handle's pending flag and
    // run its callback. Walks a snapshot so callbacks may init or close
    // async handles freely.
    pub(crate) fn sweep_async_handles(&mut self) {
        let snapshot = self.async_q.clone();
        for raw in snapshot {
            let idx = raw.idx as usize;
            let cb = match self.handles.get_mut(idx) {
                Some(entry) if entry.seq == raw.seq && !entry.is_closing() => {
                    match &mut entry.kind {
                        HandleKind::Async(state) => {
                            if !state.shared.take_pending() {
                                continue;
                            }
                            state.cb.take()
                        }
                        _ => continue,
                    }
                }
                _ => continue,
            };

            let Some(mut cb) = cb else { continue };
            cb(self, AsyncHandle(raw));

            if let Some(entry) = self.handles.get_mut(idx) {
                if entry.seq == raw.seq && !entry.is_closing() {
                    if let HandleKind::Async(state) = &mut entry.kind {
                        if state.cb.is_none() {
                            state.cb = Some(cb);
                        }
                    }
                }
            }
        }
    }
}
