//! Numeric precision abstraction.
//!
//! Every price, quantity and balance in the engine is generic over a
//! [`Precision`] type. Two implementations ship: `f64` for fast exploratory
//! batches and [`rust_decimal::Decimal`] for exact, auditable accounting.

use std::fmt::{Debug, Display};
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Arithmetic surface the engine needs from a numeric type.
pub trait Precision:
    Copy
    + Debug
    + Display
    + Default
    + PartialEq
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Short name used in logs and config (`"f64"`, `"decimal"`).
    const NAME: &'static str;

    fn zero() -> Self;
    fn one() -> Self;
    fn from_f64(value: f64) -> Option<Self>;
    fn from_i64(value: i64) -> Self;
    fn to_f64(self) -> f64;
    fn parse(text: &str) -> Option<Self>;

    fn is_zero(self) -> bool {
        self == Self::zero()
    }

    fn is_negative(self) -> bool {
        self < Self::zero()
    }

    fn is_positive(self) -> bool {
        self > Self::zero()
    }

    fn abs(self) -> Self {
        if self.is_negative() {
            -self
        } else {
            self
        }
    }

    /// `self` with the sign of `sign` (zero counts as positive).
    fn with_sign_of(self, sign: Self) -> Self {
        if sign.is_negative() {
            -self.abs()
        } else {
            self.abs()
        }
    }

    fn min_of(self, other: Self) -> Self {
        if other < self {
            other
        } else {
            self
        }
    }

    fn max_of(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

impl Precision for f64 {
    const NAME: &'static str = "f64";

    fn zero() -> Self {
        0.0
    }

    fn one() -> Self {
        1.0
    }

    fn from_f64(value: f64) -> Option<Self> {
        value.is_finite().then_some(value)
    }

    fn from_i64(value: i64) -> Self {
        value as f64
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn parse(text: &str) -> Option<Self> {
        text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

impl Precision for Decimal {
    const NAME: &'static str = "decimal";

    fn zero() -> Self {
        Decimal::ZERO
    }

    fn one() -> Self {
        Decimal::ONE
    }

    fn from_f64(value: f64) -> Option<Self> {
        <Decimal as FromPrimitive>::from_f64(value)
    }

    fn from_i64(value: i64) -> Self {
        Decimal::from(value)
    }

    fn to_f64(self) -> f64 {
        ToPrimitive::to_f64(&self).unwrap_or(f64::NAN)
    }

    fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        Decimal::from_str(text)
            .or_else(|_| Decimal::from_scientific(text))
            .ok()
    }

    fn is_zero(self) -> bool {
        Decimal::is_zero(&self)
    }

    fn abs(self) -> Self {
        Decimal::abs(&self)
    }
}
