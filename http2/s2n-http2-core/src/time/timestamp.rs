// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, num::NonZeroU64, ops, time::Duration};

/// An absolute point in time.
///
/// The absolute value of `Timestamp`s should be treated as opaque. It is not
/// necessarily related to any calendar time. `Timestamp`s should only be
/// compared if they are sourced from the same clock.
///
/// `Timestamp`s are similar to the `Instant` data-type in the Rust standard
/// library, but have a consistent size across platforms and can be produced
/// by simulated clocks in tests.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub struct Timestamp(NonZeroU64);

/// A prechecked 1us value
const ONE_MICROSECOND: NonZeroU64 = match NonZeroU64::new(1) {
    Some(value) => value,
    None => unreachable!(),
};

impl Timestamp {
    /// Creates a `Timestamp` from a `Duration` since the time source's epoch.
    ///
    /// This should only be used by time sources.
    #[inline]
    pub fn from_duration(duration: Duration) -> Self {
        // 2^64 microseconds is ~580,000 years so casting from a u128 is ok
        debug_assert!(duration.as_micros() <= u64::MAX.into());
        let micros = duration.as_micros() as u64;
        // if the value is 0 then round up to 1us after the epoch
        let micros = NonZeroU64::new(micros).unwrap_or(ONE_MICROSECOND);
        Self(micros)
    }

    /// Converts the `Timestamp` into the `Duration` since the time source's
    /// epoch.
    #[inline]
    pub fn as_duration(self) -> Duration {
        Duration::from_micros(self.0.get())
    }

    /// Tries to calculate a `Timestamp` based on the current `Timestamp` and
    /// adding the provided `Duration`. Returns `None` if the result is not
    /// representable.
    #[inline]
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        self.as_duration()
            .checked_add(duration)
            .map(Self::from_duration)
    }

    /// Tries to calculate a `Timestamp` based on the current `Timestamp` and
    /// subtracting the provided `Duration`. Returns `None` if the result is
    /// not representable.
    #[inline]
    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        self.as_duration()
            .checked_sub(duration)
            .map(Self::from_duration)
    }

    /// Returns the `Duration` which elapsed since an earlier `Timestamp`.
    /// If `earlier` is more recent, the method returns a `Duration` of 0.
    #[inline]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.as_duration().saturating_sub(earlier.as_duration())
    }
}

impl ops::Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, duration: Duration) -> Self::Output {
        Self::from_duration(self.as_duration() + duration)
    }
}

impl ops::AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, duration: Duration) {
        *self = *self + duration;
    }
}

impl ops::Sub<Timestamp> for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, earlier: Timestamp) -> Self::Output {
        debug_assert!(earlier <= self, "subtraction is not commutative");
        self.saturating_duration_since(earlier)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Timestamp({self})")
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let duration = self.as_duration();
        let micros = duration.subsec_micros();
        let secs = duration.as_secs() % 60;
        let mins = duration.as_secs() / 60 % 60;
        let hours = duration.as_secs() / 60 / 60;
        if micros != 0 {
            write!(f, "{hours}:{mins:02}:{secs:02}.{micros:06}")
        } else {
            write!(f, "{hours}:{mins:02}:{secs:02}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rounds_up_to_the_epoch() {
        let ts = Timestamp::from_duration(Duration::ZERO);
        assert_eq!(ts.as_duration(), Duration::from_micros(1));
    }

    #[test]
    fn arithmetic() {
        let base = Timestamp::from_duration(Duration::from_secs(10));
        let later = base + Duration::from_secs(5);
        assert_eq!(later - base, Duration::from_secs(5));
        assert_eq!(base.saturating_duration_since(later), Duration::ZERO);
        assert_eq!(
            base.checked_sub(Duration::from_secs(3)).unwrap().as_duration(),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn fmt_test() {
        let ts = Timestamp::from_duration(Duration::from_secs(1) + Duration::from_micros(1));
        assert_eq!(format!("{ts:?}"), "Timestamp(0:00:01.000001)");
        let ts = Timestamp::from_duration(Duration::from_secs(61));
        assert_eq!(format!("{ts}"), "0:01:01");
    }
}
