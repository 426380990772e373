//! Priority levels that drive scheduling order and preemption.

use std::cmp::Ordering;
use std::fmt;

/// Urgency tier of a unit of pending work.
///
/// Numerically smaller levels are more urgent, except [`Priority::NoWork`],
/// which is a sentinel meaning "nothing pending" and never wins a
/// comparison against real work.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    #[default]
    NoWork = 0,
    Synchronous = 1,
    Animation = 2,
    High = 3,
    Low = 4,
    Offscreen = 5,
}

impl Priority {
    /// Returns `true` when this level carries no pending work.
    #[inline]
    pub fn is_no_work(self) -> bool {
        self == Priority::NoWork
    }

    /// Returns `true` if `self` must be processed before `other`.
    ///
    /// Any real level is more urgent than [`Priority::NoWork`].
    #[inline]
    pub fn is_more_urgent_than(self, other: Priority) -> bool {
        match (self, other) {
            (Priority::NoWork, _) => false,
            (_, Priority::NoWork) => true,
            (a, b) => (a as u8) < (b as u8),
        }
    }

    /// Returns `true` if work at `self` is included in a pass rendering at
    /// `level`, i.e. `self` is at least as urgent as `level`.
    #[inline]
    pub fn is_within(self, level: Priority) -> bool {
        !self.is_no_work() && !level.is_no_work() && (self as u8) <= (level as u8)
    }

    /// The more urgent of the two levels, treating `NoWork` as absent.
    #[inline]
    pub fn most_urgent(self, other: Priority) -> Priority {
        if other.is_more_urgent_than(self) {
            other
        } else {
            self
        }
    }

    /// Ordering where more urgent work sorts first and `NoWork` sorts last.
    pub fn urgency_cmp(self, other: Priority) -> Ordering {
        match (self.is_no_work(), other.is_no_work()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => (self as u8).cmp(&(other as u8)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::NoWork => "no-work",
            Priority::Synchronous => "synchronous",
            Priority::Animation => "animation",
            Priority::High => "high",
            Priority::Low => "low",
            Priority::Offscreen => "offscreen",
        };
        f.write_str(name)
    }
}
