//! Prepare, check and idle watchers.
//!
//! The three types are identical plumbing with different dispatch points:
//! idle runs every tick and forces a non-blocking poll, prepare runs right
//! before the poll, check right after. One macro stamps out all three.

use crate::handle::{Handle, HandleKind};
use crate::{CheckHandle, Error, EventLoop, IdleHandle, PrepareHandle, Result};

macro_rules! loop_watcher {
    (
        $handle_ty: ident, $kind: ident, $state: ident, $queue: ident,
        $init: ident, $start: ident, $stop: ident, $run: ident
    ) => {
        impl EventLoop {
            #[doc = concat!("Create a ", stringify!($kind), " handle. It does nothing until started.")]
            pub fn $init(&mut self) -> Result<$handle_ty> {
                Ok($handle_ty(self.alloc_handle(HandleKind::$kind(
                    crate::handle::$state { cb: None },
                ))))
            }

            #[doc = concat!(
                "Start the ",
                stringify!($kind),
                " watcher. Starting an active watcher is a no-op."
            )]
            pub fn $start(
                &mut self,
                handle: $handle_ty,
                cb: impl FnMut(&mut EventLoop, $handle_ty) + 'static,
            ) -> Result<()> {
                let raw: Handle = handle.into();
                let entry = self.live_entry_mut(raw)?;
                match &mut entry.kind {
                    HandleKind::$kind(state) => {
                        if entry.flags & crate::handle::HANDLE_ACTIVE != 0 {
                            return Ok(());
                        }
                        state.cb = Some(Box::new(cb));
                    }
                    _ => return Err(Error::Inval),
                }
                self.$queue.push(raw);
                self.handle_start_raw(raw.idx as usize);
                Ok(())
            }

            #[doc = concat!(
                "Stop the ",
                stringify!($kind),
                " watcher. Stopping an inactive watcher is a no-op."
            )]
            pub fn $stop(&mut self, handle: $handle_ty) -> Result<()> {
                let raw: Handle = handle.into();
                let entry = self.checked_entry_mut(raw)?;
                if !entry.is_active() {
                    return Ok(());
                }
                if !matches!(entry.kind, HandleKind::$kind(_)) {
                    return Err(Error::Inval);
                }
                self.$queue.retain(|h| *h != raw);
                self.handle_stop_raw(raw.idx as usize);
                Ok(())
            }

            // Invoke every active watcher of this type, in start order. The
            // snapshot keeps reentrant start/stop/close from upsetting the
            // walk; each entry is revalidated before its callback runs.
            pub(crate) fn $run(&mut self) {
                let snapshot = self.$queue.clone();
                for raw in snapshot {
                    let idx = raw.idx as usize;
                    let cb = match self.handles.get_mut(idx) {
                        Some(entry)
                            if entry.seq == raw.seq
                                && entry.is_active()
                                && !entry.is_closing() =>
                        {
                            match &mut entry.kind {
                                HandleKind::$kind(state) => state.cb.take(),
                                _ => continue,
                            }
                        }
                        _ => continue,
                    };

                    let Some(mut cb) = cb else { continue };
                    cb(self, $handle_ty(raw));

                    if let Some(entry) = self.handles.get_mut(idx) {
                        if entry.seq == raw.seq && !entry.is_closing() {
                            if let HandleKind::$kind(state) = &mut entry.kind {
                                if state.cb.is_none() {
                                    state.cb = Some(cb);
                                }
                            }
                        }
                    }
                }
            }
        }
    };
}

loop_watcher!(
    PrepareHandle,
    Prepare,
    PrepareState,
    prepare_q,
    prepare_init,
    prepare_start,
    prepare_stop,
    run_prepare_watchers
);

loop_watcher!(
    CheckHandle,
    Check,
    CheckState,
    check_q,
    check_init,
    check_start,
    check_stop,
    run_check_watchers
);

loop_watcher!(
    IdleHandle,
    Idle,
    IdleState,
    idle_q,
    idle_init,
    idle_start,
    idle_stop,
    run_idle_watchers
);
