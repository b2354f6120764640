//! Seconds-resolution time for token bookkeeping
//!
//! Expiry comparisons only ever happen at whole-second granularity, so time
//! is carried as bare second counts rather than `std::time` types.

use std::{ops, time::SystemTime};

use serde::{Deserialize, Serialize};

/// A point in time, counted in whole seconds since the Unix epoch
///
/// This is the unit of the credential file's `expires_at` field and of JWT
/// `exp`/`iat` claims.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct UnixTime(pub u64);

/// A span of whole seconds, as in a token response's `expires_in`
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct DurationSecs(pub u64);

impl ops::Add<DurationSecs> for UnixTime {
    type Output = UnixTime;

    #[inline]
    fn add(self, rhs: DurationSecs) -> Self::Output {
        UnixTime(self.0.saturating_add(rhs.0))
    }
}

impl ops::Sub<DurationSecs> for UnixTime {
    type Output = UnixTime;

    #[inline]
    fn sub(self, rhs: DurationSecs) -> Self::Output {
        UnixTime(self.0.saturating_sub(rhs.0))
    }
}

impl ops::Sub<UnixTime> for UnixTime {
    type Output = DurationSecs;

    #[inline]
    fn sub(self, rhs: UnixTime) -> Self::Output {
        DurationSecs(self.0.saturating_sub(rhs.0))
    }
}

/// A source of the current time
///
/// The resolver, the flows, and the gate all take a `Clock` instead of
/// consulting the system time directly, so tests can pin "now" wherever a
/// scenario needs it.
pub trait Clock {
    /// The current time according to this source
    fn now(&self) -> UnixTime;
}

/// The real time, read from [`SystemTime`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> UnixTime {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        UnixTime(secs)
    }
}

/// A clock frozen at a fixed instant, for tests
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TestClock {
    now: UnixTime,
}

impl TestClock {
    /// A clock that reports `now` forever
    #[inline]
    pub const fn new(now: UnixTime) -> Self {
        Self { now }
    }
}

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> UnixTime {
        self.now
    }
}
