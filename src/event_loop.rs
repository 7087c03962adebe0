use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::{fmt, io, mem};

use log::trace;
use slab::Slab;

use crate::handle::{
    CloseCb, Handle, HandleEntry, HandleKind, HandleType, HANDLE_ACTIVE, HANDLE_CLOSED,
    HANDLE_CLOSING, HANDLE_REF,
};
use crate::poller::Poller;
use crate::sys;
use crate::threadpool::WorkItem;
use crate::time::Clock;
use crate::token::{Token, WAKE_TOKEN};
use crate::wheel::TimerWheel;
use crate::{Error, PollHandle, Ready, Result};

/// How [`EventLoop::run`] decides when to return.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Iterate until no referenced handle or request keeps the loop alive,
    /// or [`EventLoop::stop`] is called.
    Default,
    /// A single iteration; blocks in the poll phase when there is nothing
    /// due sooner.
    Once,
    /// A single iteration that never blocks.
    NoWait,
}

/// Behavior knobs applied with [`EventLoop::configure`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoopOption {
    /// Block SIGPROF delivery around the poll syscall. Useful under sampling
    /// profilers that would otherwise interrupt every wait. Unix only.
    BlockSigprof,
}

/// Counters accumulated across the loop's lifetime.
#[derive(Copy, Clone, Debug, Default)]
pub struct Metrics {
    /// Completed loop iterations.
    pub loop_count: u64,
    /// Events dispatched to watchers.
    pub events: u64,
    /// Events the kernel had ready when the poll phase looked.
    pub events_waiting: u64,
}

/// Work deferred to the pending phase of a later tick.
pub(crate) enum Pending {
    /// The wake primitive fired: sweep async handles and the thread-pool
    /// done-queue.
    WakeSweep,
}

/// State shared with other threads: worker threads deposit finished items
/// here and [`AsyncSender`](crate::AsyncSender)s poke the waker through it.
pub(crate) struct LoopShared {
    pub(crate) waker: sys::Waker,
    pub(crate) wq: Mutex<VecDeque<Arc<WorkItem>>>,
}

impl LoopShared {
    pub(crate) fn wake(&self) {
        // A failed wakeup only matters if the loop is still there to miss
        // it; at teardown the fd is gone and the error is meaningless.
        let _ = self.waker.wake();
    }
}

/// A single-threaded callback-driven event loop.
///
/// The loop multiplexes fd readiness, timers, idle/prepare/check watchers,
/// cross-thread async notifications and thread-pool completions onto the
/// thread that calls [`run`]. Handles are created through the `*_init`
/// methods, driven by their `*_start`/`*_stop` methods and released with
/// [`close`]/[`close_with`]; each lives in the loop's arena until its close
/// callback has run.
///
/// All methods must be called from the loop's thread. The only cross-thread
/// entry points are [`AsyncSender::send`](crate::AsyncSender::send) and
/// [`Work::cancel`](crate::Work::cancel).
///
/// # Examples
///
/// ```
/// use evio::{EventLoop, RunMode};
///
/// # fn main() -> evio::Result<()> {
/// let mut lp = EventLoop::new()?;
/// let timer = lp.timer_init()?;
/// lp.timer_start(timer, |lp, t| {
///     lp.timer_stop(t).unwrap();
/// }, 10, 0)?;
/// lp.run(RunMode::Default)?;
/// # Ok(())
/// # }
/// ```
///
/// [`run`]: EventLoop::run
/// [`close`]: EventLoop::close
/// [`close_with`]: EventLoop::close_with
pub struct EventLoop {
    clock: Clock,
    pub(crate) time: u64,
    pub(crate) handles: Slab<HandleEntry>,
    seq: u32,
    pub(crate) active_handles: u32,
    pub(crate) active_reqs: u32,
    pub(crate) wheel: TimerWheel<Handle>,
    pub(crate) idle_q: Vec<Handle>,
    pub(crate) prepare_q: Vec<Handle>,
    pub(crate) check_q: Vec<Handle>,
    pub(crate) async_q: Vec<Handle>,
    closing_q: Vec<Handle>,
    pending: VecDeque<Pending>,
    wake_sweep_queued: bool,
    pub(crate) poller: Poller,
    pub(crate) shared: Arc<LoopShared>,
    stop_flag: bool,
    #[cfg(unix)]
    block_sigprof: bool,
    metrics: Metrics,
}

impl EventLoop {
    /// Create a loop with its backend and wake primitive set up.
    pub fn new() -> Result<EventLoop> {
        let poller = Poller::new()?;
        let waker = sys::Waker::new(poller.selector(), WAKE_TOKEN)?;
        let clock = Clock::new();
        let time = clock.now_ms();

        Ok(EventLoop {
            clock,
            time,
            handles: Slab::new(),
            seq: 0,
            active_handles: 0,
            active_reqs: 0,
            wheel: TimerWheel::new(time),
            idle_q: Vec::new(),
            prepare_q: Vec::new(),
            check_q: Vec::new(),
            async_q: Vec::new(),
            closing_q: Vec::new(),
            pending: VecDeque::new(),
            wake_sweep_queued: false,
            poller,
            shared: Arc::new(LoopShared {
                waker,
                wq: Mutex::new(VecDeque::new()),
            }),
            stop_flag: false,
            #[cfg(unix)]
            block_sigprof: false,
            metrics: Metrics::default(),
        })
    }

    /// The loop's notion of "now" in milliseconds: sampled once per tick so
    /// every callback within a tick sees the same timestamp. Monotone
    /// non-decreasing.
    pub fn now(&self) -> u64 {
        self.time
    }

    /// Re-sample the clock. Rarely needed by callers; the loop does this at
    /// every iteration boundary.
    pub fn update_time(&mut self) {
        self.time = self.clock.now_ms();
    }

    /// True while anything keeps the loop from returning out of
    /// [`RunMode::Default`]: referenced active handles, in-flight requests,
    /// handles awaiting their close callback, or deferred pending work.
    pub fn alive(&self) -> bool {
        self.active_handles > 0
            || self.active_reqs > 0
            || !self.closing_q.is_empty()
            || !self.pending.is_empty()
    }

    /// End the current [`run`](EventLoop::run) at the next iteration
    /// boundary. In-flight callbacks finish normally.
    pub fn stop(&mut self) {
        self.stop_flag = true;
    }

    /// Verify the loop is ready to be dropped: fails with [`Error::Busy`]
    /// while any handle is alive or a request is in flight.
    pub fn close_loop(&mut self) -> Result<()> {
        if !self.handles.is_empty() || self.active_reqs > 0 {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Apply a [`LoopOption`].
    pub fn configure(&mut self, option: LoopOption) -> Result<()> {
        match option {
            #[cfg(unix)]
            LoopOption::BlockSigprof => {
                self.block_sigprof = true;
                Ok(())
            }
            #[cfg(not(unix))]
            LoopOption::BlockSigprof => Err(Error::NoSys),
        }
    }

    /// Lifetime counters for this loop.
    pub fn metrics(&self) -> Metrics {
        self.metrics
    }

    /// Visit every live handle.
    pub fn walk(&self, mut visitor: impl FnMut(Handle, HandleType)) {
        for (idx, entry) in self.handles.iter() {
            if entry.flags & HANDLE_CLOSED != 0 {
                continue;
            }
            visitor(
                Handle {
                    idx: idx as u32,
                    seq: entry.seq,
                },
                entry.kind.handle_type(),
            );
        }
    }

    /// Drive the loop. Returns `Ok(true)` if work remains (meaningful for
    /// [`RunMode::Once`]/[`RunMode::NoWait`]), `Ok(false)` once nothing
    /// keeps the loop alive.
    ///
    /// Phase order within one iteration: update time, due timers, pending
    /// callbacks, idle, prepare, poll, check, close callbacks. Prepare and
    /// check bracket the poll so callers can measure time spent waiting;
    /// idle or pending work forces the poll to not block.
    ///
    /// Re-entering `run` from inside a callback is not supported.
    pub fn run(&mut self, mode: RunMode) -> Result<bool> {
        let mut alive = self.alive();
        if !alive {
            self.update_time();
        }

        while alive && !self.stop_flag {
            self.update_time();
            self.metrics.loop_count += 1;

            self.run_timers();
            let ran_pending = self.run_pending();
            self.run_idle_watchers();
            self.run_prepare_watchers();

            let timeout = match mode {
                RunMode::Default => self.backend_timeout(),
                RunMode::Once if !ran_pending => self.backend_timeout(),
                _ => 0,
            };
            self.io_poll(timeout)?;

            self.run_check_watchers();
            self.run_closing();

            if mode == RunMode::Once {
                // ONCE implies forward progress: a timer that came due while
                // the poll was blocked still runs before returning, and the
                // fresh timestamp keeps later timeout math from skewing.
                self.update_time();
                self.run_timers();
            }

            alive = self.alive();
            if mode != RunMode::Default {
                break;
            }
        }

        if self.stop_flag {
            self.stop_flag = false;
        }

        Ok(alive)
    }

    /// The timeout the poll phase would block for right now: `0` when the
    /// next iteration must not wait, `-1` for "forever", otherwise
    /// milliseconds until the nearest timer.
    pub fn backend_timeout(&self) -> i32 {
        if self.stop_flag {
            return 0;
        }
        if self.active_handles == 0 && self.active_reqs == 0 {
            return 0;
        }
        if !self.pending.is_empty() || !self.idle_q.is_empty() || !self.closing_q.is_empty() {
            return 0;
        }
        match self.wheel.next_timeout(self.time) {
            None => -1,
            Some(ms) => ms.min(i32::MAX as u64) as i32,
        }
    }

    // Phase 3: deferred callbacks from the previous tick's poll phase.
    fn run_pending(&mut self) -> bool {
        let mut ran = false;
        while let Some(item) = self.pending.pop_front() {
            ran = true;
            match item {
                Pending::WakeSweep => {
                    self.wake_sweep_queued = false;
                    self.sweep_async_handles();
                    self.drain_done_queue();
                }
            }
        }
        ran
    }

    // Phase 7. Applies watcher changes, blocks up to `timeout` ms and
    // dispatches whatever the kernel reports. EINTR retries against the
    // original deadline; timeouts past the platform-safe cap are chopped up
    // and retried (ancient kernels turn large epoll timeouts into infinity).
    fn io_poll(&mut self, mut timeout: i32) -> Result<()> {
        const MAX_SAFE_TIMEOUT: i32 = 1_789_569;

        trace!("polling; timeout={}", timeout);

        let deadline = if timeout > 0 {
            self.time + timeout as u64
        } else {
            0
        };
        let mut spins = 48; // bounded re-polls when batches come back full

        #[cfg(unix)]
        let sigmask = self.block_sigprof.then(sigprof_set);

        loop {
            // Flushed every pass: a callback in the previous pass may have
            // disarmed a watcher whose level-triggered event would otherwise
            // keep the kernel reporting forever.
            self.poller.apply_changes().map_err(Error::from)?;

            let capped = timeout.min(MAX_SAFE_TIMEOUT);

            #[cfg(unix)]
            let res = self.poller.select(capped, sigmask.as_ref());
            #[cfg(windows)]
            let res = self.poller.select(capped);

            // Unconditionally: the OS may well have rescheduled us while we
            // were in the syscall.
            self.update_time();

            let nfds = match res {
                Ok(n) => n,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                    if timeout == 0 {
                        return Ok(());
                    }
                    if timeout == -1 {
                        continue;
                    }
                    timeout = self.remaining(deadline);
                    if timeout == 0 {
                        return Ok(());
                    }
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            self.metrics.events_waiting += nfds as u64;

            let dispatched = self.dispatch_batch();
            self.metrics.events += dispatched as u64;

            if dispatched > 0 {
                if nfds == sys::NEVENTS && spins > 0 {
                    // The batch came back full; more events may be ready.
                    // Grab them now instead of paying another full tick.
                    spins -= 1;
                    timeout = 0;
                    continue;
                }
                return Ok(());
            }

            // Nothing dispatched: a timeout, or events filtered out by
            // watchers stopped earlier in this tick.
            if timeout == 0 {
                return Ok(());
            }
            if timeout == -1 {
                continue;
            }
            timeout = self.remaining(deadline);
            if timeout == 0 {
                return Ok(());
            }
        }
    }

    // Recompute a positive timeout against its absolute deadline.
    fn remaining(&self, deadline: u64) -> i32 {
        deadline.saturating_sub(self.time).min(i32::MAX as u64) as i32
    }

    // Walk the poller's batch, routing the wake token to the pending queue
    // and everything else to its fd watcher. Returns how many events were
    // delivered.
    fn dispatch_batch(&mut self) -> usize {
        let mut dispatched = 0;

        for i in 0..self.poller.batch_len() {
            let Some((token, ready)) = self.poller.batch_get(i) else {
                continue;
            };
            dispatched += 1;

            if token == WAKE_TOKEN {
                self.shared.waker.drain();
                self.queue_wake_sweep();
                continue;
            }

            self.dispatch_poll_event(token, ready);
        }

        dispatched
    }

    fn dispatch_poll_event(&mut self, token: Token, ready: Ready) {
        let idx = token.0;
        let (cb, seq) = match self.handles.get_mut(idx) {
            Some(entry) if !entry.is_closing() && entry.is_active() => match &mut entry.kind {
                HandleKind::Poll(state) => (state.cb.take(), entry.seq),
                _ => return,
            },
            _ => return,
        };

        let Some(mut cb) = cb else { return };
        let handle = PollHandle(Handle {
            idx: idx as u32,
            seq,
        });
        cb(self, handle, Ok(ready));
        self.restore_poll_cb(idx, seq, cb);
    }

    fn restore_poll_cb(&mut self, idx: usize, seq: u32, cb: crate::PollCb) {
        if let Some(entry) = self.handles.get_mut(idx) {
            if entry.seq == seq && !entry.is_closing() {
                if let HandleKind::Poll(state) = &mut entry.kind {
                    if state.cb.is_none() {
                        state.cb = Some(cb);
                    }
                }
            }
        }
    }

    // Phase 9, the endgame: handles closed during this tick get their close
    // callback, their arena slot is reclaimed first so the id is already
    // dead when user code runs. Handles closed *by* a close callback land in
    // the fresh queue and wait for the next tick.
    fn run_closing(&mut self) {
        let closing = mem::take(&mut self.closing_q);
        for handle in closing {
            let idx = handle.idx as usize;
            match self.handles.get_mut(idx) {
                Some(entry) if entry.seq == handle.seq => {
                    debug_assert!(entry.flags & HANDLE_CLOSING != 0);
                    entry.flags |= HANDLE_CLOSED;
                    entry.flags &= !HANDLE_ACTIVE;
                }
                _ => continue,
            }
            let entry = self.handles.remove(idx);
            if let Some(cb) = entry.close_cb {
                cb(self, handle);
            }
        }
    }

    /// Release a handle. The close callback, if any, runs from a later loop
    /// phase, never from inside this call; after it returns the handle id is
    /// dead. No other callback of this handle fires once `close` returned.
    ///
    /// Closing an already-closing handle is a no-op (the first close's
    /// callback still fires).
    pub fn close_with(
        &mut self,
        handle: impl Into<Handle>,
        cb: impl FnOnce(&mut EventLoop, Handle) + 'static,
    ) -> Result<()> {
        self.close_inner(handle.into(), Some(Box::new(cb)))
    }

    /// [`close_with`](EventLoop::close_with) without a callback.
    pub fn close(&mut self, handle: impl Into<Handle>) -> Result<()> {
        self.close_inner(handle.into(), None)
    }

    fn close_inner(&mut self, handle: Handle, cb: Option<CloseCb>) -> Result<()> {
        let idx = handle.idx as usize;
        let entry = match self.handles.get_mut(idx) {
            Some(entry) if entry.seq == handle.seq => entry,
            _ => return Err(Error::NotFound),
        };
        if entry.is_closing() {
            return Ok(());
        }

        trace!("closing handle; type={:?}", entry.kind.handle_type());
        entry.flags |= HANDLE_CLOSING;
        entry.close_cb = cb;

        match entry.kind.handle_type() {
            HandleType::Timer => {
                let timer_ref = match &mut self.handles[idx].kind {
                    HandleKind::Timer(state) => state.wheel_ref.take(),
                    _ => unreachable!(),
                };
                if let Some(timer_ref) = timer_ref {
                    self.wheel.remove(&timer_ref);
                }
            }
            HandleType::Prepare => self.prepare_q.retain(|h| *h != handle),
            HandleType::Check => self.check_q.retain(|h| *h != handle),
            HandleType::Idle => self.idle_q.retain(|h| *h != handle),
            HandleType::Async => {
                if let HandleKind::Async(state) = &self.handles[idx].kind {
                    state.shared.close();
                }
                self.async_q.retain(|h| *h != handle);
            }
            HandleType::Poll => self.poller.watcher_remove(Token(idx)),
        }

        self.handle_stop_raw(idx);
        self.closing_q.push(handle);
        Ok(())
    }

    /// Re-reference a handle for keep-alive accounting. Idempotent.
    pub fn ref_handle(&mut self, handle: impl Into<Handle>) -> Result<()> {
        let handle = handle.into();
        let idx = handle.idx as usize;
        let entry = self.checked_entry_mut(handle)?;
        if entry.flags & HANDLE_REF != 0 {
            return Ok(());
        }
        entry.flags |= HANDLE_REF;
        if self.handles[idx].flags & HANDLE_ACTIVE != 0 {
            self.active_handles += 1;
        }
        Ok(())
    }

    /// Drop a handle's keep-alive reference: the loop no longer stays alive
    /// for its sake, but its callbacks keep firing while it is active.
    /// Idempotent.
    pub fn unref_handle(&mut self, handle: impl Into<Handle>) -> Result<()> {
        let handle = handle.into();
        let idx = handle.idx as usize;
        let entry = self.checked_entry_mut(handle)?;
        if entry.flags & HANDLE_REF == 0 {
            return Ok(());
        }
        entry.flags &= !HANDLE_REF;
        if self.handles[idx].flags & HANDLE_ACTIVE != 0 {
            self.active_handles -= 1;
        }
        Ok(())
    }

    /// Whether the handle currently counts toward keep-alive.
    pub fn has_ref(&self, handle: impl Into<Handle>) -> bool {
        self.checked_entry(handle.into())
            .is_some_and(HandleEntry::has_ref)
    }

    /// Whether the handle has been started and not stopped.
    pub fn is_active(&self, handle: impl Into<Handle>) -> bool {
        self.checked_entry(handle.into())
            .is_some_and(HandleEntry::is_active)
    }

    /// Whether [`close`](EventLoop::close) has been called on the handle.
    pub fn is_closing(&self, handle: impl Into<Handle>) -> bool {
        self.checked_entry(handle.into())
            .is_some_and(HandleEntry::is_closing)
    }

    /// The handle's type, or `None` for a dead id.
    pub fn handle_type(&self, handle: impl Into<Handle>) -> Option<HandleType> {
        self.checked_entry(handle.into())
            .map(|entry| entry.kind.handle_type())
    }

    // ---- crate-internal helpers ----

    pub(crate) fn alloc_handle(&mut self, kind: HandleKind) -> Handle {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        let idx = self.handles.insert(HandleEntry::new(seq, kind)) as u32;
        Handle { idx, seq }
    }

    pub(crate) fn checked_entry(&self, handle: Handle) -> Option<&HandleEntry> {
        self.handles
            .get(handle.idx as usize)
            .filter(|entry| entry.seq == handle.seq)
    }

    pub(crate) fn checked_entry_mut(&mut self, handle: Handle) -> Result<&mut HandleEntry> {
        self.handles
            .get_mut(handle.idx as usize)
            .filter(|entry| entry.seq == handle.seq)
            .ok_or(Error::NotFound)
    }

    /// Like [`checked_entry_mut`](Self::checked_entry_mut) but also rejects
    /// closing handles: no further operations are legal on those.
    pub(crate) fn live_entry_mut(&mut self, handle: Handle) -> Result<&mut HandleEntry> {
        let entry = self.checked_entry_mut(handle)?;
        if entry.is_closing() {
            return Err(Error::Inval);
        }
        Ok(entry)
    }

    pub(crate) fn handle_start_raw(&mut self, idx: usize) {
        let entry = &mut self.handles[idx];
        if entry.flags & HANDLE_ACTIVE != 0 {
            return;
        }
        entry.flags |= HANDLE_ACTIVE;
        if entry.flags & HANDLE_REF != 0 {
            self.active_handles += 1;
        }
    }

    pub(crate) fn handle_stop_raw(&mut self, idx: usize) {
        let entry = &mut self.handles[idx];
        if entry.flags & HANDLE_ACTIVE == 0 {
            return;
        }
        entry.flags &= !HANDLE_ACTIVE;
        if entry.flags & HANDLE_REF != 0 {
            self.active_handles -= 1;
        }
    }

    /// Queue a wake sweep; used by the waker event and nothing else today.
    pub(crate) fn queue_wake_sweep(&mut self) {
        if !self.wake_sweep_queued {
            self.wake_sweep_queued = true;
            self.pending.push_back(Pending::WakeSweep);
        }
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("EventLoop")
            .field("time", &self.time)
            .field("handles", &self.handles.len())
            .field("active_handles", &self.active_handles)
            .field("active_reqs", &self.active_reqs)
            .field("closing", &self.closing_q.len())
            .finish()
    }
}

#[cfg(unix)]
fn sigprof_set() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGPROF);
        set
    }
}
