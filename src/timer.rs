use log::trace;

use crate::handle::{HandleKind, TimerState};
use crate::{Error, EventLoop, Result, TimerHandle};

impl EventLoop {
    /// Create a timer handle. It does nothing until started.
    pub fn timer_init(&mut self) -> Result<TimerHandle> {
        Ok(TimerHandle(self.alloc_handle(HandleKind::Timer(TimerState {
            cb: None,
            cb_set: false,
            timeout: 0,
            repeat: 0,
            wheel_ref: None,
        }))))
    }

    /// Arm `timer` to call `cb` after `timeout` ms. With `repeat > 0` it
    /// then keeps firing every `repeat` ms until stopped.
    ///
    /// Starting an already-active timer restarts it with the new values.
    /// Repeat intervals are measured from each firing, so a loop stalled
    /// past several periods fires once and resumes, it does not burst.
    pub fn timer_start(
        &mut self,
        timer: TimerHandle,
        cb: impl FnMut(&mut EventLoop, TimerHandle) + 'static,
        timeout: u64,
        repeat: u64,
    ) -> Result<()> {
        let handle = timer.0;
        let idx = handle.idx as usize;

        let entry = self.live_entry_mut(handle)?;
        if !matches!(entry.kind, HandleKind::Timer(_)) {
            return Err(Error::Inval);
        }
        if entry.is_active() {
            self.timer_stop(timer)?;
        }

        let deadline = self.time.saturating_add(timeout);
        trace!("starting timer; deadline={}, repeat={}", deadline, repeat);
        let wheel_ref = self.wheel.insert(deadline, handle);

        match &mut self.handles[idx].kind {
            HandleKind::Timer(state) => {
                state.cb = Some(Box::new(cb));
                state.cb_set = true;
                state.timeout = deadline;
                state.repeat = repeat;
                state.wheel_ref = Some(wheel_ref);
            }
            _ => unreachable!(),
        }
        self.handle_start_raw(idx);
        Ok(())
    }

    /// Disarm `timer`. Stopping an inactive timer is a no-op.
    pub fn timer_stop(&mut self, timer: TimerHandle) -> Result<()> {
        let handle = timer.0;
        let idx = handle.idx as usize;

        let entry = self.checked_entry_mut(handle)?;
        if !entry.is_active() {
            return Ok(());
        }
        let wheel_ref = match &mut entry.kind {
            HandleKind::Timer(state) => state.wheel_ref.take(),
            _ => return Err(Error::Inval),
        };
        if let Some(wheel_ref) = wheel_ref {
            self.wheel.remove(&wheel_ref);
        }
        self.handle_stop_raw(idx);
        Ok(())
    }

    /// Restart `timer` using its repeat value as the timeout. Fails with
    /// [`Error::Inval`] if the timer has never been started; does nothing
    /// when the repeat value is zero.
    pub fn timer_again(&mut self, timer: TimerHandle) -> Result<()> {
        let handle = timer.0;
        let idx = handle.idx as usize;

        let entry = self.live_entry_mut(handle)?;
        let repeat = match &entry.kind {
            HandleKind::Timer(state) => {
                if !state.cb_set {
                    return Err(Error::Inval);
                }
                state.repeat
            }
            _ => return Err(Error::Inval),
        };
        if repeat == 0 {
            return Ok(());
        }

        self.timer_stop(timer)?;

        let deadline = self.time.saturating_add(repeat);
        let wheel_ref = self.wheel.insert(deadline, handle);
        match &mut self.handles[idx].kind {
            HandleKind::Timer(state) => {
                state.timeout = deadline;
                state.wheel_ref = Some(wheel_ref);
            }
            _ => unreachable!(),
        }
        self.handle_start_raw(idx);
        Ok(())
    }

    /// Update the repeat interval. Takes effect after the next firing, or
    /// at the next [`timer_again`](EventLoop::timer_again).
    pub fn timer_set_repeat(&mut self, timer: TimerHandle, repeat: u64) -> Result<()> {
        match &mut self.checked_entry_mut(timer.0)?.kind {
            HandleKind::Timer(state) => {
                state.repeat = repeat;
                Ok(())
            }
            _ => Err(Error::Inval),
        }
    }

    /// The timer's current repeat interval in ms.
    pub fn timer_get_repeat(&self, timer: TimerHandle) -> Result<u64> {
        match self.checked_entry(timer.0) {
            Some(entry) => match &entry.kind {
                HandleKind::Timer(state) => Ok(state.repeat),
                _ => Err(Error::Inval),
            },
            None => Err(Error::NotFound),
        }
    }

    // Phase 2: fire everything due at the tick's timestamp. A repeating
    // timer is re-armed before its callback runs, so the callback can stop
    // or restart it; equal deadlines fire in start order.
    pub(crate) fn run_timers(&mut self) {
        while let Some((_, handle)) = self.wheel.poll_due(self.time) {
            let idx = handle.idx as usize;

            let (repeat, cb) = match self.handles.get_mut(idx) {
                Some(entry) if entry.seq == handle.seq => match &mut entry.kind {
                    HandleKind::Timer(state) => {
                        state.wheel_ref = None;
                        (state.repeat, state.cb.take())
                    }
                    _ => continue,
                },
                _ => continue,
            };
            self.handle_stop_raw(idx);

            if repeat > 0 {
                let deadline = self.time.saturating_add(repeat);
                let wheel_ref = self.wheel.insert(deadline, handle);
                match &mut self.handles[idx].kind {
                    HandleKind::Timer(state) => {
                        state.timeout = deadline;
                        state.wheel_ref = Some(wheel_ref);
                    }
                    _ => unreachable!(),
                }
                self.handle_start_raw(idx);
            }

            let Some(mut cb) = cb else { continue };
            cb(self, TimerHandle(handle));

            // Put the callback back unless the handle died or the callback
            // installed a replacement by restarting the timer.
            if let Some(entry) = self.handles.get_mut(idx) {
                if entry.seq == handle.seq && !entry.is_closing() {
                    if let HandleKind::Timer(state) = &mut entry.kind {
                        if state.cb.is_none() {
                            state.cb = Some(cb);
                        }
                    }
                }
            }
        }
    }
}
