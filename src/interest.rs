use std::num::NonZeroU8;
use std::{fmt, ops};

/// Interest used in arming an fd watcher.
///
/// Tells the I/O backend which readiness classes to monitor for. For example
/// a watcher armed with only [readable] interest produces no callback when
/// its fd becomes writable.
///
/// The size of `Option<Interest>` is identical to `Interest` itself.
///
/// [readable]: Interest::READABLE
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Interest(NonZeroU8);

// These must be unique.
const READABLE: u8 = 0b0001;
const WRITABLE: u8 = 0b0010;
const PRIORITY: u8 = 0b0100;
const DISCONNECT: u8 = 0b1000;

impl Interest {
    /// Readable interest.
    pub const READABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(READABLE) });

    /// Writable interest.
    pub const WRITABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(WRITABLE) });

    /// Priority (out-of-band) interest.
    pub const PRIORITY: Interest = Interest(unsafe { NonZeroU8::new_unchecked(PRIORITY) });

    /// Peer-disconnect interest.
    pub const DISCONNECT: Interest = Interest(unsafe { NonZeroU8::new_unchecked(DISCONNECT) });

    /// Add together two `Interest`s.
    ///
    /// This does the same thing as the `BitOr` implementation, but is a
    /// constant function.
    #[allow(clippy::should_implement_trait)]
    pub const fn add(self, other: Interest) -> Interest {
        Interest(unsafe { NonZeroU8::new_unchecked(self.0.get() | other.0.get()) })
    }

    /// Returns true if the value includes readable interest.
    pub const fn is_readable(self) -> bool {
        (self.0.get() & READABLE) != 0
    }

    /// Returns true if the value includes writable interest.
    pub const fn is_writable(self) -> bool {
        (self.0.get() & WRITABLE) != 0
    }

    /// Returns true if the value includes priority interest.
    pub const fn is_priority(self) -> bool {
        (self.0.get() & PRIORITY) != 0
    }

    /// Returns true if the value includes peer-disconnect interest.
    pub const fn is_disconnect(self) -> bool {
        (self.0.get() & DISCONNECT) != 0
    }

    pub(crate) const fn bits(self) -> u8 {
        self.0.get()
    }
}

impl ops::BitOr for Interest {
    type Output = Self;

    #[inline]
    fn bitor(self, other: Self) -> Self {
        self.add(other)
    }
}

impl ops::BitOrAssign for Interest {
    #[inline]
    fn bitor_assign(&mut self, other: Self) {
        self.0 = (*self | other).0;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut one = false;
        if self.is_readable() {
            write!(fmt, "READABLE")?;
            one = true;
        }
        if self.is_writable() {
            if one {
                write!(fmt, " | ")?;
            }
            write!(fmt, "WRITABLE")?;
            one = true;
        }
        if self.is_priority() {
            if one {
                write!(fmt, " | ")?;
            }
            write!(fmt, "PRIORITY")?;
            one = true;
        }
        if self.is_disconnect() {
            if one {
                write!(fmt, " | ")?;
            }
            write!(fmt, "DISCONNECT")?;
        }
        Ok(())
    }
}
