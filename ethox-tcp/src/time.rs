/*! Time structures.

The `time` module contains structures used to represent both
absolute and relative time.

 - [Instant] is used to represent absolute time.
 - [Duration] is used to represet relative time.
 - [Expiration] is an optional deadline.

The absolute time is a reading of a free running millisecond counter, like the system tick of
small embedded targets. It wraps around after roughly 49 days so two instants may only be compared
when they are less than half that range apart. All comparisons use the signed difference of the
counters and stay correct across the wrap.

[Instant]: struct.Instant.html
[Duration]: struct.Duration.html
[Expiration]: enum.Expiration.html
*/
use core::{fmt, ops};
pub use core::time::Duration;

/// A representation of an absolute time value.
///
/// The `Instant` type is a wrapper around a `u32` value that represents a number of milliseconds,
/// monotonically increasing (modulo 2<sup>32</sup>) since an arbitrary moment in time, such as
/// system startup.
///
/// * A value of `0` is inherently arbitrary.
/// * There is intentionally no `Ord` implementation. Use [`is_before`] and [`is_at_or_after`]
///   which respect the wrap around of the counter.
///
/// [`is_before`]: #method.is_before
/// [`is_at_or_after`]: #method.is_at_or_after
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Instant {
    /// The raw counter value in milliseconds.
    pub millis: u32,
}

/// An expiration time, inversion of `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expiration {
    /// Expires at the given instant.
    When(Instant),
    /// Never expires.
    Never,
}

use Expiration::{When, Never};

impl Instant {
    /// Create a new `Instant` from a number of milliseconds.
    pub const fn from_millis(millis: u32) -> Instant {
        Instant { millis }
    }

    /// Create a new `Instant` from a number of seconds.
    pub fn from_secs(secs: u32) -> Instant {
        Instant { millis: secs.wrapping_mul(1000) }
    }

    /// Read the current time from the system clock.
    ///
    /// See [std::time::SystemTime::now]. The millisecond count since the unix epoch is truncated
    /// to the width of the counter, which is exactly how a wrapping tick counter behaves.
    ///
    /// [std::time::SystemTime::now]: https://doc.rust-lang.org/std/time/struct.SystemTime.html#method.now
    #[cfg(feature = "std")]
    pub fn now() -> Instant {
        Self::from(::std::time::SystemTime::now())
    }

    /// The fractional number of milliseconds of the counter.
    pub fn millis(&self) -> u32 {
        self.millis % 1000
    }

    /// The number of whole seconds of the counter.
    pub fn secs(&self) -> u32 {
        self.millis / 1000
    }

    /// The raw number of milliseconds of the counter.
    pub fn total_millis(&self) -> u32 {
        self.millis
    }

    /// Signed distance from `other` to `self` in milliseconds.
    fn signed_diff(self, other: Instant) -> i32 {
        self.millis.wrapping_sub(other.millis) as i32
    }

    /// Check if `self` lies strictly before `other`.
    pub fn is_before(self, other: Instant) -> bool {
        self.signed_diff(other) < 0
    }

    /// Check if `self` is the same as or lies after `other`.
    pub fn is_at_or_after(self, other: Instant) -> bool {
        self.signed_diff(other) >= 0
    }

    /// The time passed since `earlier`, or zero if `earlier` is in fact later.
    pub fn duration_since(self, earlier: Instant) -> Duration {
        let diff = self.signed_diff(earlier);
        Duration::from_millis(diff.max(0) as u64)
    }
}

fn duration_millis(duration: Duration) -> u32 {
    // Longer durations are not representable on the counter anyways.
    let millis = duration.as_millis();
    if millis > u128::from(i32::max_value() as u32) {
        i32::max_value() as u32
    } else {
        millis as u32
    }
}

#[cfg(feature = "std")]
impl From<::std::time::SystemTime> for Instant {
    fn from(other: ::std::time::SystemTime) -> Instant {
        let n = other.duration_since(::std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_millis(n.as_millis() as u32)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}s", self.secs(), self.millis())
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis.wrapping_add(duration_millis(rhs)))
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis.wrapping_sub(duration_millis(rhs)))
    }
}

impl ops::SubAssign<Duration> for Instant {
    fn sub_assign(&mut self, rhs: Duration) {
        *self = *self - rhs;
    }
}

impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        self.duration_since(rhs)
    }
}

impl Expiration {
    /// Choose the deadline that comes first, relative to `now`.
    ///
    /// Instants can not be ordered absolutely since the clock wraps, so the comparison is done on
    /// the remaining time instead.
    pub fn earliest(self, other: Expiration, now: Instant) -> Expiration {
        match (self, other) {
            (Never, other) => other,
            (this, Never) => this,
            (When(a), When(b)) => {
                if a.signed_diff(now) <= b.signed_diff(now) {
                    When(a)
                } else {
                    When(b)
                }
            },
        }
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Expiration::Never
    }
}

impl From<Option<Instant>> for Expiration {
    fn from(opt: Option<Instant>) -> Self {
        match opt {
            Some(instant) => When(instant),
            None => Never,
        }
    }
}

impl From<Expiration> for Option<Instant> {
    fn from(opt: Expiration) -> Self {
        match opt {
            When(instant) => Some(instant),
            Never => None,
        }
    }
}
