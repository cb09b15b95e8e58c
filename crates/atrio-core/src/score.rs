//! Bounded placement score arithmetic.
//!
//! Every placement decision in the scheduler reduces to comparing scores.
//! Scores are integers clamped to the range `[-INFINITY, +INFINITY]` where
//! infinity is a finite sentinel (1,000,000) with absorbing arithmetic:
//!
//! - Adding anything to `-INFINITY` yields `-INFINITY`
//! - Otherwise, adding anything to `+INFINITY` yields `+INFINITY`
//! - Finite sums are clamped into range
//!
//! Negative infinity wins over positive infinity so that a single ban is
//! never overridden by accumulated preference.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The magnitude treated as infinite in score arithmetic.
const BOUND: i64 = 1_000_000;

/// A placement score.
///
/// Ordered, bounded, and cheap to copy. Construct from integers via
/// [`Score::from`] (clamping) or parse from configuration text via
/// [`FromStr`], which accepts `INFINITY`, `+INFINITY`, `-INFINITY` and
/// plain integers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Score(i64);

impl Score {
    /// The highest possible score: mandatory placement.
    pub const INFINITY: Self = Self(BOUND);

    /// The lowest possible score: a ban.
    pub const NEG_INFINITY: Self = Self(-BOUND);

    /// The neutral score.
    pub const ZERO: Self = Self(0);

    /// Returns the raw clamped value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Returns true if this score is `+INFINITY` or `-INFINITY`.
    #[must_use]
    pub const fn is_infinite(self) -> bool {
        self.0 == BOUND || self.0 == -BOUND
    }

    /// Returns true if this score bans placement.
    #[must_use]
    pub const fn is_ban(self) -> bool {
        self.0 == -BOUND
    }

    /// Returns true if this score mandates placement.
    #[must_use]
    pub const fn is_mandatory(self) -> bool {
        self.0 == BOUND
    }
}

impl From<i64> for Score {
    fn from(value: i64) -> Self {
        Self(value.clamp(-BOUND, BOUND))
    }
}

impl From<i32> for Score {
    fn from(value: i32) -> Self {
        Self::from(i64::from(value))
    }
}

impl Add for Score {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        // A ban absorbs everything, including +INFINITY.
        if self.0 == -BOUND || rhs.0 == -BOUND {
            return Self::NEG_INFINITY;
        }
        if self.0 == BOUND || rhs.0 == BOUND {
            return Self::INFINITY;
        }
        Self::from(self.0 + rhs.0)
    }
}

impl AddAssign for Score {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Neg for Score {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for Score {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            BOUND => write!(f, "INFINITY"),
            v if v == -BOUND => write!(f, "-INFINITY"),
            v => write!(f, "{v}"),
        }
    }
}

impl FromStr for Score {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let trimmed = s.trim();
        match trimmed {
            "INFINITY" | "+INFINITY" | "inf" | "+inf" => Ok(Self::INFINITY),
            "-INFINITY" | "-inf" => Ok(Self::NEG_INFINITY),
            _ => trimmed
                .parse::<i64>()
                .map(Self::from)
                .map_err(|_| Error::InvalidScore {
                    value: s.to_string(),
                }),
        }
    }
}
