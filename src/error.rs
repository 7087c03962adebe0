use std::io;

use thiserror::Error;

/// Normalized error taxonomy.
///
/// Every fallible operation in this crate returns one of these variants, and
/// callbacks report failures through the same set. Platform error codes are
/// folded into the taxonomy on the way out of the `sys` layer; anything
/// without a dedicated variant is carried verbatim in [`Error::Os`].
#[derive(Debug, Error)]
pub enum Error {
    /// No such file, handle or entry.
    #[error("not found")]
    NotFound,
    /// Permission denied.
    #[error("permission denied")]
    Access,
    /// Resource busy; the operation cannot proceed in the current state.
    #[error("resource busy")]
    Busy,
    /// Resource already exists.
    #[error("already exists")]
    Exists,
    /// Invalid argument or handle state.
    #[error("invalid argument")]
    Inval,
    /// Operation would block; try again.
    #[error("resource temporarily unavailable")]
    Again,
    /// Out of memory.
    #[error("out of memory")]
    NoMem,
    /// The operation was canceled before it ran.
    #[error("operation canceled")]
    Canceled,
    /// Connection refused by peer.
    #[error("connection refused")]
    ConnRefused,
    /// The operation timed out.
    #[error("timed out")]
    TimedOut,
    /// Not supported on this platform.
    #[error("function not implemented")]
    NoSys,
    /// Broken pipe.
    #[error("broken pipe")]
    Pipe,
    /// Any other operating system error.
    #[error("os error: {0}")]
    Os(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Status delivered to completion-style callbacks: `Ok(())` or the taxonomy
/// error that ended the operation.
pub type Status = Result<()>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        use io::ErrorKind::*;

        #[cfg(unix)]
        if let Some(code) = err.raw_os_error() {
            return match code {
                libc::ENOENT => Error::NotFound,
                libc::EACCES | libc::EPERM => Error::Access,
                libc::EBUSY => Error::Busy,
                libc::EEXIST => Error::Exists,
                libc::EINVAL => Error::Inval,
                libc::EAGAIN => Error::Again,
                libc::ENOMEM => Error::NoMem,
                libc::ECANCELED => Error::Canceled,
                libc::ECONNREFUSED => Error::ConnRefused,
                libc::ETIMEDOUT => Error::TimedOut,
                libc::ENOSYS => Error::NoSys,
                libc::EPIPE => Error::Pipe,
                _ => Error::Os(err),
            };
        }

        match err.kind() {
            NotFound => Error::NotFound,
            PermissionDenied => Error::Access,
            AlreadyExists => Error::Exists,
            InvalidInput => Error::Inval,
            WouldBlock => Error::Again,
            OutOfMemory => Error::NoMem,
            ConnectionRefused => Error::ConnRefused,
            TimedOut => Error::TimedOut,
            Unsupported => Error::NoSys,
            BrokenPipe => Error::Pipe,
            _ => Error::Os(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn io_error_normalization() {
        let err: Error = io::Error::from_raw_os_error(libc::EPIPE).into();
        assert!(matches!(err, Error::Pipe));

        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(err, Error::TimedOut));
    }
}
