//! Process-wide worker pool for blocking work.
//!
//! One submission FIFO under one mutex feeds a fixed set of worker threads,
//! sized by `EVIO_THREADPOOL_SIZE` (default 4). Workers run the blocking
//! half of an item, deposit it on the owning loop's done-queue and wake that
//! loop; the loop invokes the completion half from its pending phase. The
//! pool lives for the rest of the process once the first item is submitted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex, OnceLock};
use std::thread;

use log::trace;

use crate::event_loop::LoopShared;
use crate::{Error, EventLoop, Result, Status};

/// Work classes sharing the pool.
///
/// Slow items (long lookups, unbounded waits) are capped to roughly half the
/// workers so a burst of them cannot starve fast filesystem-style items.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum WorkKind {
    Fast,
    Slow,
}

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELED: u8 = 3;

pub(crate) struct WorkItem {
    work: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    done: Mutex<Option<Box<dyn FnOnce(&mut EventLoop, Status) + Send>>>,
    state: AtomicU8,
    kind: WorkKind,
    dest: Arc<LoopShared>,
}

/// A submitted work item.
///
/// Exactly one done callback is delivered per item, with `Ok(())` after the
/// work ran or `Err(Canceled)` after a successful [`cancel`](Work::cancel).
pub struct Work {
    item: Arc<WorkItem>,
}

impl Work {
    /// Cancel the item if it is still waiting in the submission queue: it is
    /// unlinked and its done callback fires with [`Error::Canceled`] on the
    /// loop's next wake sweep. Once a worker has picked the item up this
    /// fails with [`Error::Busy`].
    ///
    /// May be called from any thread.
    pub fn cancel(&self) -> Result<()> {
        let pool = POOL.get().ok_or(Error::Busy)?;
        let item = {
            let mut state = pool.state.lock().unwrap();
            let pos = state
                .queue
                .iter()
                .position(|queued| Arc::ptr_eq(queued, &self.item))
                .ok_or(Error::Busy)?;
            state.queue.remove(pos).unwrap()
        };

        item.state.store(CANCELED, Ordering::Release);
        // The blocking half never runs; drop it now.
        item.work.lock().unwrap().take();

        let dest = item.dest.clone();
        dest.wq.lock().unwrap().push_back(item);
        self.item.dest.wake();
        Ok(())
    }
}

impl std::fmt::Debug for Work {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Work")
            .field("state", &self.item.state.load(Ordering::Relaxed))
            .finish()
    }
}

struct Pool {
    state: Mutex<PoolState>,
    cond: Condvar,
    nthreads: usize,
    slow_cap: usize,
}

struct PoolState {
    queue: VecDeque<Arc<WorkItem>>,
    idle: usize,
    spawned: usize,
    slow_running: usize,
}

static POOL: OnceLock<Pool> = OnceLock::new();

fn pool() -> &'static Pool {
    POOL.get_or_init(|| {
        let nthreads = std::env::var("EVIO_THREADPOOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n >= 1)
            .unwrap_or(4)
            .min(128);
        trace!("thread pool sized at {} workers", nthreads);
        Pool {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                idle: 0,
                spawned: 0,
                slow_running: 0,
            }),
            cond: Condvar::new(),
            nthreads,
            slow_cap: (nthreads + 1) / 2,
        }
    })
}

fn submit(item: Arc<WorkItem>) {
    let pool = pool();
    let spawn = {
        let mut state = pool.state.lock().unwrap();
        state.queue.push_back(item);
        if state.idle > 0 {
            pool.cond.notify_one();
            None
        } else if state.spawned < pool.nthreads {
            // No idle worker and room to grow: spawn one more.
            state.spawned += 1;
            Some(state.spawned == 1)
        } else {
            None
        }
    };

    match spawn {
        Some(true) => {
            // First worker: hand off through a barrier so the pool is known
            // to be consuming before the submission returns.
            let barrier = Arc::new(Barrier::new(2));
            let up = barrier.clone();
            thread::Builder::new()
                .name("evio-pool".into())
                .spawn(move || {
                    up.wait();
                    worker();
                })
                .expect("failed to spawn pool worker");
            barrier.wait();
        }
        Some(false) => {
            thread::Builder::new()
                .name("evio-pool".into())
                .spawn(worker)
                .expect("failed to spawn pool worker");
        }
        None => {}
    }
}

fn worker() {
    let pool = POOL.get().expect("worker spawned before pool init");
    let mut state = pool.state.lock().unwrap();

    loop {
        // First runnable item: head of the queue unless that would push the
        // slow class over its cap, in which case fast items behind it may
        // overtake.
        let mut picked = None;
        for i in 0..state.queue.len() {
            let blocked = state.queue[i].kind == WorkKind::Slow
                && state.slow_running >= pool.slow_cap;
            if !blocked {
                picked = state.queue.remove(i);
                break;
            }
        }

        let Some(item) = picked else {
            state.idle += 1;
            state = pool.cond.wait(state).unwrap();
            state.idle -= 1;
            continue;
        };

        let slow = item.kind == WorkKind::Slow;
        if slow {
            state.slow_running += 1;
        }
        drop(state);

        item.state.store(RUNNING, Ordering::Release);
        let work = item.work.lock().unwrap().take();
        if let Some(work) = work {
            work();
        }
        item.state.store(DONE, Ordering::Release);

        // Deposit on the owning loop and poke it awake. No pool lock held
        // while touching the loop's queue.
        let dest = item.dest.clone();
        dest.wq.lock().unwrap().push_back(item);
        dest.wake();

        state = pool.state.lock().unwrap();
        if slow {
            state.slow_running -= 1;
        }
    }
}

impl EventLoop {
    /// Submit [`WorkKind::Fast`] work: `work` runs on a pool thread, `done`
    /// runs later on this loop's thread.
    pub fn queue_work(
        &mut self,
        work: impl FnOnce() + Send + 'static,
        done: impl FnOnce(&mut EventLoop, Status) + Send + 'static,
    ) -> Result<Work> {
        self.queue_work_with(WorkKind::Fast, work, done)
    }

    /// [`queue_work`](EventLoop::queue_work) with an explicit work class.
    ///
    /// The item counts as an active request: the loop stays alive until its
    /// done callback has been delivered.
    pub fn queue_work_with(
        &mut self,
        kind: WorkKind,
        work: impl FnOnce() + Send + 'static,
        done: impl FnOnce(&mut EventLoop, Status) + Send + 'static,
    ) -> Result<Work> {
        let item = Arc::new(WorkItem {
            work: Mutex::new(Some(Box::new(work))),
            done: Mutex::new(Some(Box::new(done))),
            state: AtomicU8::new(QUEUED),
            kind,
            dest: self.shared.clone(),
        });
        self.active_reqs += 1;
        submit(item.clone());
        Ok(Work { item })
    }

    // Pending-phase half: deliver completions in deposit order. The wq lock
    // is never held across a callback.
    pub(crate) fn drain_done_queue(&mut self) {
        loop {
            let item = self.shared.wq.lock().unwrap().pop_front();
            let Some(item) = item else { break };

            self.active_reqs -= 1;
            let status = if item.state.load(Ordering::Acquire) == CANCELED {
                Err(Error::Canceled)
            } else {
                Ok(())
            };
            let done = item.done.lock().unwrap().take();
            if let Some(done) = done {
                done(self, status);
            }
        }
    }
}
