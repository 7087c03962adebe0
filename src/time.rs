use std::sync::OnceLock;
use std::time::Instant;

/// Monotonic clock with a millisecond tick, anchored at loop creation.
///
/// The loop samples it once per iteration; everything inside a tick sees the
/// same timestamp.
#[derive(Debug)]
pub(crate) struct Clock {
    start: Instant,
}

impl Clock {
    pub(crate) fn new() -> Clock {
        Clock {
            start: Instant::now(),
        }
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Nanosecond-resolution monotonic timestamp.
///
/// Only differences are meaningful; the epoch is the first call in the
/// process.
pub fn hrtime() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}
