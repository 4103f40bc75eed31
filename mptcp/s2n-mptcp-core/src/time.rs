// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Time related datatypes and functions.
//!
//! All deadline logic in this workspace is driven by explicit [`Timestamp`]s
//! handed in by the caller; nothing reads the system clock behind the API.

use core::{
    fmt, ops,
    task::Poll,
    time::Duration,
};

/// An absolute point in time.
///
/// The absolute value of `Timestamp`s should be treated as opaque. It is not
/// necessarily related to any calendar time. `Timestamp`s should only be
/// compared if they are sourced from the same [`Clock`].
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// Creates a `Timestamp` at the given offset from the clock's epoch
    #[inline]
    pub const fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    /// Returns the offset from the clock's epoch
    #[inline]
    pub const fn as_duration(self) -> Duration {
        self.0
    }

    /// Whole seconds since the clock's epoch
    #[inline]
    pub const fn as_secs(self) -> u64 {
        self.0.as_secs()
    }

    /// Returns true if `self` is at or before `current_time`
    #[inline]
    pub fn has_elapsed(self, current_time: Timestamp) -> bool {
        self <= current_time
    }

    /// Returns the `Duration` which elapsed since an earlier `Timestamp`.
    /// If `earlier` is more recent, a `Duration` of 0 is returned.
    #[inline]
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    #[inline]
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        self.0.checked_add(duration).map(Self)
    }
}

impl ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        Timestamp(self.0 + rhs)
    }
}

impl ops::AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs;
    }
}

impl ops::Sub<Timestamp> for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Timestamp) -> Self::Output {
        self.saturating_duration_since(rhs)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Timestamp({:?})", self.0)
    }
}

/// A `Clock` is a source of [`Timestamp`]s.
pub trait Clock {
    /// Returns the current [`Timestamp`]
    fn get_time(&self) -> Timestamp;
}

/// A clock which always returns a Timestamp of value 1us
#[derive(Clone, Copy, Debug)]
pub struct NoopClock;

impl Clock for NoopClock {
    fn get_time(&self) -> Timestamp {
        Timestamp::from_duration(Duration::from_micros(1))
    }
}

#[cfg(feature = "std")]
mod std_clock {
    use super::*;
    use std::time::Instant;

    /// A monotonic clock anchored at its construction time
    #[derive(Clone, Copy, Debug)]
    pub struct StdClock {
        epoch: Instant,
    }

    impl Default for StdClock {
        fn default() -> Self {
            Self {
                epoch: Instant::now(),
            }
        }
    }

    impl Clock for StdClock {
        fn get_time(&self) -> Timestamp {
            Timestamp::from_duration(self.epoch.elapsed())
        }
    }
}

#[cfg(feature = "std")]
pub use std_clock::*;

/// A timer that is polled explicitly with the current time.
///
/// Note: The timer doesn't implement Copy to ensure it isn't accidentally
///       moved and have the expiration discarded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    expiration: Option<Timestamp>,
}

impl Timer {
    /// Sets the timer to expire at the given timestamp
    #[inline]
    pub fn set(&mut self, time: Timestamp) {
        self.expiration = Some(time);
    }

    /// Cancels the timer.
    /// After cancellation, a timer will no longer report as expired.
    #[inline]
    pub fn cancel(&mut self) {
        self.expiration = None;
    }

    /// Returns true if the timer has expired
    #[inline]
    pub fn is_expired(&self, current_time: Timestamp) -> bool {
        match self.expiration {
            Some(timeout) => timeout.has_elapsed(current_time),
            None => false,
        }
    }

    /// Returns true if the timer is armed
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.expiration.is_some()
    }

    /// Returns the expiration, if armed
    #[inline]
    pub fn expiration(&self) -> Option<Timestamp> {
        self.expiration
    }

    /// Notifies the timer of the current time. An expired timer is
    /// cancelled and reports `Ready`.
    #[inline]
    pub fn poll_expiration(&mut self, current_time: Timestamp) -> Poll<()> {
        if self.is_expired(current_time) {
            self.cancel();
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::{Duration, Timestamp};

    /// A clock that can be manually advanced
    #[derive(Clone, Copy, Debug)]
    pub struct Clock {
        current_timestamp: Timestamp,
    }

    impl Default for Clock {
        fn default() -> Self {
            Self {
                current_timestamp: Timestamp::from_duration(Duration::from_micros(1)),
            }
        }
    }

    impl Clock {
        pub fn inc_by(&mut self, duration: Duration) {
            self.current_timestamp += duration;
        }
    }

    impl super::Clock for Clock {
        fn get_time(&self) -> Timestamp {
            self.current_timestamp
        }
    }
}
