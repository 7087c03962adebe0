/// Associates readiness events with their watcher.
///
/// `Token` is a wrapper around `usize`. It is carried into the kernel when a
/// watcher is armed and comes back attached to every event the backend
/// reports, letting the dispatch loop find the handle the event belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Token(pub usize);

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}

/// Reserved token for the loop's wake primitive. Never collides with handle
/// tokens, which are arena indices.
pub(crate) const WAKE_TOKEN: Token = Token(usize::MAX);
