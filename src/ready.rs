use std::{fmt, ops};

use crate::Interest;

/// A set of readiness classes delivered to an fd watcher's callback.
///
/// `Ready` mirrors [`Interest`] but can additionally carry the error and
/// hang-up classes, which cannot be asked for but are always reported.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Ready(u8);

const READABLE: u8 = 0b0000_0001;
const WRITABLE: u8 = 0b0000_0010;
const PRIORITY: u8 = 0b0000_0100;
const DISCONNECT: u8 = 0b0000_1000;
const ERROR: u8 = 0b0001_0000;
const HUP: u8 = 0b0010_0000;

#[allow(missing_docs)]
impl Ready {
    pub const EMPTY: Ready = Ready(0);
    pub const READABLE: Ready = Ready(READABLE);
    pub const WRITABLE: Ready = Ready(WRITABLE);
    pub const PRIORITY: Ready = Ready(PRIORITY);
    pub const DISCONNECT: Ready = Ready(DISCONNECT);
    pub const ERROR: Ready = Ready(ERROR);
    pub const HUP: Ready = Ready(HUP);

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_readable(self) -> bool {
        (self.0 & READABLE) != 0
    }

    pub const fn is_writable(self) -> bool {
        (self.0 & WRITABLE) != 0
    }

    pub const fn is_priority(self) -> bool {
        (self.0 & PRIORITY) != 0
    }

    pub const fn is_disconnect(self) -> bool {
        (self.0 & DISCONNECT) != 0
    }

    pub const fn is_error(self) -> bool {
        (self.0 & ERROR) != 0
    }

    pub const fn is_hup(self) -> bool {
        (self.0 & HUP) != 0
    }

    /// The bits of `self` also present in `interest`, keeping error/hup.
    pub(crate) fn intersect_interest(self, interest: Interest) -> Ready {
        Ready(self.0 & (interest.bits() | ERROR | HUP))
    }
}

impl From<Interest> for Ready {
    fn from(interest: Interest) -> Ready {
        Ready(interest.bits())
    }
}

impl ops::BitOr for Ready {
    type Output = Ready;

    #[inline]
    fn bitor(self, other: Ready) -> Ready {
        Ready(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Ready {
    #[inline]
    fn bitor_assign(&mut self, other: Ready) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for Ready {
    type Output = Ready;

    #[inline]
    fn bitand(self, other: Ready) -> Ready {
        Ready(self.0 & other.0)
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut one = false;
        for (flag, name) in [
            (READABLE, "READABLE"),
            (WRITABLE, "WRITABLE"),
            (PRIORITY, "PRIORITY"),
            (DISCONNECT, "DISCONNECT"),
            (ERROR, "ERROR"),
            (HUP, "HUP"),
        ] {
            if self.0 & flag != 0 {
                if one {
                    write!(fmt, " | ")?;
                }
                write!(fmt, "{}", name)?;
                one = true;
            }
        }
        if !one {
            write!(fmt, "(empty)")?;
        }
        Ok(())
    }
}
