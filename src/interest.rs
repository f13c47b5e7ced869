//! Event mask bits for the multiplexer (spec section 4.3).

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A set of readiness bits a [`Channel`](crate::channel::Channel) is
/// registered for, or that fired on a given poll iteration.
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct Interest(u8);

const READ: u8 = 0b001;
const WRITE: u8 = 0b010;
const ERROR: u8 = 0b100;

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READ: Interest = Interest(READ);
    pub const WRITE: Interest = Interest(WRITE);
    pub const ERROR: Interest = Interest(ERROR);

    pub fn is_readable(self) -> bool {
        self.0 & READ != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & WRITE != 0
    }

    pub fn is_error(self) -> bool {
        self.0 & ERROR != 0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn bits(self) -> u8 {
        self.0
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        Interest(bits & (READ | WRITE | ERROR))
    }
}

impl BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        write!(f, "Interest(")?;
        for (bit, name) in [(READ, "READ"), (WRITE, "WRITE"), (ERROR, "ERROR")] {
            if self.0 & bit != 0 {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        write!(f, ")")
    }
}
