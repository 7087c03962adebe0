mod afd;
mod selector;
mod waker;

pub(crate) use self::selector::{Event, Selector};
pub(crate) use self::waker::Waker;

/// Matches the Unix batch size; a full batch triggers an immediate re-poll.
pub(crate) use self::selector::NEVENTS;
