use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Fixed-point scalar with 6 decimal places of precision.
///
/// All simulation quantities that feed registry ordering, spatial cells, or
/// history captures are fixed-point so replays never depend on float rounding.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scalar(pub i64);

impl Scalar {
    pub const SCALE: i64 = 1_000_000;

    pub fn from_f32(value: f32) -> Self {
        Self((value as f64 * Self::SCALE as f64).round() as i64)
    }

    pub fn from_i64(value: i64) -> Self {
        Self(value * Self::SCALE)
    }

    pub fn from_u32(value: u32) -> Self {
        Self((value as i64) * Self::SCALE)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn one() -> Self {
        Self(Self::SCALE)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    pub fn clamp(self, min: Self, max: Self) -> Self {
        match self.cmp(&min) {
            Ordering::Less => min,
            Ordering::Equal | Ordering::Greater => {
                if self > max {
                    max
                } else {
                    self
                }
            }
        }
    }

    pub fn round(self) -> Self {
        let half = if self.0 >= 0 {
            Self::SCALE / 2
        } else {
            -(Self::SCALE / 2)
        };
        Self(((self.0 + half) / Self::SCALE) * Self::SCALE)
    }

    pub fn to_u32(self) -> u32 {
        self.round().0.div_euclid(Self::SCALE).max(0) as u32
    }

    /// Floor of `self / divisor` as a whole number.
    pub fn floor_div(self, divisor: Self) -> i64 {
        self.0.div_euclid(divisor.0)
    }
}

impl Add for Scalar {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Scalar {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Scalar {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Scalar {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Mul for Scalar {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self(((self.0 as i128 * rhs.0 as i128) / Self::SCALE as i128) as i64)
    }
}

impl Div for Scalar {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Self(((self.0 as i128 * Self::SCALE as i128) / rhs.0 as i128) as i64)
    }
}

impl Neg for Scalar {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0 as f64 / Self::SCALE as f64)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0 as f64 / Self::SCALE as f64)
    }
}

pub fn scalar_from_f32(value: f32) -> Scalar {
    Scalar::from_f32(value)
}
