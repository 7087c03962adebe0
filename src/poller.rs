use std::collections::HashMap;
use std::io;

use log::trace;

use crate::handle::OsSource;
use crate::sys;
use crate::token::Token;
use crate::{Interest, Ready};

/// Sentinel written over batch entries dropped by [`Poller::invalidate`].
const INVALID_TOKEN: Token = Token(usize::MAX - 1);

struct Watcher {
    source: OsSource,
    /// Interest the owner wants; `None` while the watcher is stopped.
    wanted: Option<Interest>,
    /// Interest the kernel currently has applied.
    applied: Option<Interest>,
}

/// Portable watcher layer over the platform selector.
///
/// Owns the interest bookkeeping the backends share: arming changes are
/// collected in a dirty list and applied right before blocking; reported
/// events are filtered against each watcher's still-wanted interest, so a
/// watcher stopped by an earlier callback in the same batch never fires.
pub(crate) struct Poller {
    selector: sys::Selector,
    watchers: HashMap<usize, Watcher>,
    dirty: Vec<usize>,
    batch: Vec<sys::Event>,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Poller> {
        Ok(Poller {
            selector: sys::Selector::new()?,
            watchers: HashMap::new(),
            dirty: Vec::new(),
            batch: Vec::new(),
        })
    }

    pub(crate) fn selector(&self) -> &sys::Selector {
        &self.selector
    }

    /// Arm (or re-arm) the watcher identified by `token`.
    pub(crate) fn watcher_start(&mut self, token: Token, source: OsSource, interest: Interest) {
        trace!("arming watcher; token={:?}, interest={:?}", token, interest);
        let watcher = self.watchers.entry(token.0).or_insert(Watcher {
            source,
            wanted: None,
            applied: None,
        });
        watcher.source = source;
        watcher.wanted = Some(interest);
        self.mark_dirty(token);
    }

    /// Disarm without forgetting the watcher; it may be started again.
    ///
    /// Takes effect immediately for dispatch purposes: events already sitting
    /// in the current batch are filtered out by the cleared interest.
    pub(crate) fn watcher_stop(&mut self, token: Token) {
        if let Some(watcher) = self.watchers.get_mut(&token.0) {
            watcher.wanted = None;
            self.mark_dirty(token);
        }
    }

    /// Forget the watcher entirely and detach its source from the kernel.
    ///
    /// Used on close, when the owner is about to give the fd back to the
    /// caller; the kernel registration cannot outlive that.
    pub(crate) fn watcher_remove(&mut self, token: Token) {
        if let Some(watcher) = self.watchers.remove(&token.0) {
            if watcher.applied.is_some() {
                // The fd may already be closed under us; nothing to do then.
                let _ = self.selector.deregister(watcher.source, token);
            }
        }
        self.dirty.retain(|t| *t != token.0);
        self.invalidate(token);
    }

    /// Drop any event for `token` still pending in the current batch.
    pub(crate) fn invalidate(&mut self, token: Token) {
        for ev in self.batch.iter_mut() {
            if ev.token == token {
                ev.token = INVALID_TOKEN;
            }
        }
    }

    /// Flush pending interest changes to the kernel.
    pub(crate) fn apply_changes(&mut self) -> io::Result<()> {
        while let Some(raw) = self.dirty.pop() {
            let token = Token(raw);
            let Some(watcher) = self.watchers.get_mut(&raw) else {
                continue;
            };
            match (watcher.wanted, watcher.applied) {
                (Some(interest), None) => {
                    self.selector.register(watcher.source, token, interest)?;
                    watcher.applied = Some(interest);
                }
                (Some(interest), Some(applied)) if interest != applied => {
                    self.selector.reregister(watcher.source, token, interest)?;
                    watcher.applied = Some(interest);
                }
                (None, Some(_)) => {
                    // The owner may have closed the fd after stopping; the
                    // kernel then already dropped the registration.
                    let _ = self.selector.deregister(watcher.source, token);
                    watcher.applied = None;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Block up to `timeout` ms and fill the batch. Returns the raw event
    /// count; a full batch means more events may be waiting.
    pub(crate) fn select(
        &mut self,
        timeout: i32,
        #[cfg(unix)] sigmask: Option<&libc::sigset_t>,
    ) -> io::Result<usize> {
        self.batch.clear();
        #[cfg(unix)]
        return self.selector.select(&mut self.batch, timeout, sigmask);
        #[cfg(windows)]
        return self.selector.select(&mut self.batch, timeout);
    }

    pub(crate) fn batch_len(&self) -> usize {
        self.batch.len()
    }

    /// The `i`th batch event, filtered against current interest.
    ///
    /// Error and hang-up are merged with the wanted read/write bits when they
    /// arrive alone, so the owner's read path always runs and discovers the
    /// condition.
    pub(crate) fn batch_get(&self, i: usize) -> Option<(Token, Ready)> {
        let ev = self.batch.get(i)?;
        if ev.token == INVALID_TOKEN {
            return None;
        }
        if ev.token == crate::token::WAKE_TOKEN {
            return Some((ev.token, Ready::READABLE));
        }

        let watcher = self.watchers.get(&ev.token.0)?;
        let wanted = watcher.wanted?;

        let mut ready = ev.ready.intersect_interest(wanted);
        if ready == Ready::ERROR || ready == Ready::HUP {
            ready |= Ready::from(wanted);
        }

        if ready.is_empty() {
            None
        } else {
            Some((ev.token, ready))
        }
    }

    fn mark_dirty(&mut self, token: Token) {
        if !self.dirty.contains(&token.0) {
            self.dirty.push(token.0);
        }
    }
}
