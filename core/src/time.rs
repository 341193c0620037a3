//! # Time Scalars
//!
//! Nanosecond-precision time values used throughout the timer core.
//!
//! - [`TimePoint`]: an absolute instant on some clock's timeline
//! - [`TimeSpan`]: a signed duration between two instants
//!
//! Both are thin wrappers over `i64` nanoseconds (~292 years of range,
//! signed). Arithmetic on the dispatch path saturates instead of wrapping so
//! a corrupt date can never flip a queue ordering silently.

use core::fmt;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};

// =============================================================================
// TimePoint
// =============================================================================

/// An absolute instant in nanoseconds since the owning clock's epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint(i64);

impl TimePoint {
    /// The clock epoch.
    pub const ZERO: TimePoint = TimePoint(0);

    /// The infinite horizon, used for "no shot scheduled".
    pub const MAX: TimePoint = TimePoint(i64::MAX);

    /// Construct from raw nanoseconds.
    #[inline(always)]
    pub const fn from_ns(ns: i64) -> Self {
        TimePoint(ns)
    }

    /// Raw nanosecond value.
    #[inline(always)]
    pub const fn as_ns(self) -> i64 {
        self.0
    }

    /// Saturating add of a span.
    #[inline]
    pub const fn saturating_add(self, span: TimeSpan) -> Self {
        TimePoint(self.0.saturating_add(span.0))
    }

    /// Saturating subtraction of a span.
    #[inline]
    pub const fn saturating_sub(self, span: TimeSpan) -> Self {
        TimePoint(self.0.saturating_sub(span.0))
    }
}

impl Add<TimeSpan> for TimePoint {
    type Output = TimePoint;

    #[inline]
    fn add(self, rhs: TimeSpan) -> TimePoint {
        self.saturating_add(rhs)
    }
}

impl AddAssign<TimeSpan> for TimePoint {
    #[inline]
    fn add_assign(&mut self, rhs: TimeSpan) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub<TimeSpan> for TimePoint {
    type Output = TimePoint;

    #[inline]
    fn sub(self, rhs: TimeSpan) -> TimePoint {
        self.saturating_sub(rhs)
    }
}

impl SubAssign<TimeSpan> for TimePoint {
    #[inline]
    fn sub_assign(&mut self, rhs: TimeSpan) {
        *self = self.saturating_sub(rhs);
    }
}

impl Sub<TimePoint> for TimePoint {
    type Output = TimeSpan;

    /// Distance between two instants.
    #[inline]
    fn sub(self, rhs: TimePoint) -> TimeSpan {
        TimeSpan(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

// =============================================================================
// TimeSpan
// =============================================================================

/// A signed duration in nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSpan(i64);

impl TimeSpan {
    /// The empty duration.
    pub const ZERO: TimeSpan = TimeSpan(0);

    /// Construct from raw nanoseconds.
    #[inline(always)]
    pub const fn from_ns(ns: i64) -> Self {
        TimeSpan(ns)
    }

    /// Construct from microseconds.
    #[inline(always)]
    pub const fn from_micros(us: i64) -> Self {
        TimeSpan(us * 1_000)
    }

    /// Construct from milliseconds.
    #[inline(always)]
    pub const fn from_millis(ms: i64) -> Self {
        TimeSpan(ms * 1_000_000)
    }

    /// Construct from seconds.
    #[inline(always)]
    pub const fn from_secs(s: i64) -> Self {
        TimeSpan(s * 1_000_000_000)
    }

    /// Raw nanosecond value.
    #[inline(always)]
    pub const fn as_ns(self) -> i64 {
        self.0
    }

    /// `true` for the zero span.
    #[inline(always)]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// `true` for a strictly positive span.
    #[inline(always)]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// `true` for a strictly negative span.
    #[inline(always)]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Saturating scalar multiplication.
    #[inline]
    pub const fn saturating_mul(self, k: i64) -> Self {
        TimeSpan(self.0.saturating_mul(k))
    }

    /// Clamp negative spans to zero.
    #[inline]
    pub const fn max_zero(self) -> Self {
        if self.0 < 0 {
            TimeSpan::ZERO
        } else {
            self
        }
    }
}

impl Add for TimeSpan {
    type Output = TimeSpan;

    #[inline]
    fn add(self, rhs: TimeSpan) -> TimeSpan {
        TimeSpan(self.0.saturating_add(rhs.0))
    }
}

impl Sub for TimeSpan {
    type Output = TimeSpan;

    #[inline]
    fn sub(self, rhs: TimeSpan) -> TimeSpan {
        TimeSpan(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for TimeSpan {
    type Output = TimeSpan;

    #[inline]
    fn neg(self) -> TimeSpan {
        TimeSpan(self.0.saturating_neg())
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}
