//! Virtual time used by the scheduler and the deferred-operation runtime.
//!
//! The scheduler never reads a wall clock. Every operation receives *now* from the host runtime
//! (see [`crate::runtime::Runtime`]), which lets the same code run under a discrete-event
//! simulation or a dataplane worker that samples a hardware clock once per batch.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

/// A monotonic instant with nanosecond resolution.
///
/// Stored as nanoseconds since an arbitrary epoch chosen by the host runtime. Arithmetic
/// saturates rather than wrapping so a mis-programmed shaping delay cannot produce an instant
/// in the past.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(u64);

impl Time {
    pub const ZERO: Time = Time(0);

    pub const fn from_nanos(nanos: u64) -> Time {
        Time(nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Nanoseconds elapsed since `earlier`, or zero if `earlier` is in the future.
    pub fn saturating_since(self, earlier: Time) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Time {
        Time(self.0.saturating_add(rhs.as_nanos() as u64))
    }
}

impl AddAssign<Duration> for Time {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub<Time> for Time {
    type Output = Duration;

    fn sub(self, rhs: Time) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_duration_advances_nanos() {
        let t = Time::from_nanos(10) + Duration::from_nanos(5);
        assert_eq!(t.as_nanos(), 15);
    }

    #[test]
    fn subtraction_saturates() {
        let early = Time::from_nanos(3);
        let late = Time::from_nanos(9);
        assert_eq!(late - early, Duration::from_nanos(6));
        assert_eq!(early - late, Duration::ZERO);
        assert_eq!(early.saturating_since(late), 0);
    }
}
