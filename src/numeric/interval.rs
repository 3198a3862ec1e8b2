// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Closed interval type with outward-rounded arithmetic
//!
//! Every operation returns an interval guaranteed to contain the exact result
//! for every point of its inputs. Rust exposes no rounding-mode control, so
//! bounds are pushed outward by whole ulps after each floating-point step:
//! one ulp for the basic operations (which are correctly rounded) and a few
//! more for library transcendental functions.

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

/// Extra ulps applied to results of libm transcendental functions
const TRANSCENDENTAL_ULPS: u32 = 2;

#[inline]
fn round_down(value: f64) -> f64 {
    if value.is_finite() {
        value.next_down()
    } else {
        value
    }
}

#[inline]
fn round_up(value: f64) -> f64 {
    if value.is_finite() {
        value.next_up()
    } else {
        value
    }
}

fn round_down_by(mut value: f64, ulps: u32) -> f64 {
    for _ in 0..ulps {
        value = round_down(value);
    }
    value
}

fn round_up_by(mut value: f64, ulps: u32) -> f64 {
    for _ in 0..ulps {
        value = round_up(value);
    }
    value
}

/// Product of two bounds where a zero factor absorbs an infinite one
#[inline]
fn bound_product(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        a * b
    }
}

/// Closed interval `[lower, upper]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    lower: f64,
    upper: f64,
}

impl Interval {
    /// Create an interval from two bounds, in either order
    pub fn new(a: f64, b: f64) -> Self {
        if a <= b {
            Self { lower: a, upper: b }
        } else {
            Self { lower: b, upper: a }
        }
    }

    pub fn singleton(value: f64) -> Self {
        Self {
            lower: value,
            upper: value,
        }
    }

    /// The whole real line
    pub fn whole() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    /// The closed unit interval `[0, 1]`
    pub fn unit() -> Self {
        Self::new(0.0, 1.0)
    }

    /// Interval from raw floating-point bounds, widened by one ulp each way.
    /// A NaN bound (from `inf - inf` and the like) becomes unbounded.
    fn rounded(lower: f64, upper: f64) -> Self {
        Self {
            lower: if lower.is_nan() {
                f64::NEG_INFINITY
            } else {
                round_down(lower)
            },
            upper: if upper.is_nan() {
                f64::INFINITY
            } else {
                round_up(upper)
            },
        }
    }

    /// Smallest interval containing every given value
    pub fn hull_of(values: &[f64]) -> Option<Self> {
        let (first, rest) = values.split_first()?;
        Some(
            rest.iter()
                .fold(Self::singleton(*first), |hull, value| hull.hull_with(*value)),
        )
    }

    #[inline]
    pub fn lower(&self) -> f64 {
        self.lower
    }

    #[inline]
    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn midpoint(&self) -> f64 {
        if self.lower.is_finite() && self.upper.is_finite() {
            self.lower + 0.5 * (self.upper - self.lower)
        } else if self.lower.is_finite() {
            f64::INFINITY
        } else if self.upper.is_finite() {
            f64::NEG_INFINITY
        } else {
            0.0
        }
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn is_singleton(&self) -> bool {
        self.lower == self.upper
    }

    pub fn is_finite(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite()
    }

    /// Bounds are ordered and neither is NaN
    pub fn is_valid(&self) -> bool {
        self.lower <= self.upper
    }

    /// Largest absolute value in the interval
    pub fn magnitude(&self) -> f64 {
        self.lower.abs().max(self.upper.abs())
    }

    /// Smallest absolute value in the interval
    pub fn mignitude(&self) -> f64 {
        if self.contains(0.0) {
            0.0
        } else {
            self.lower.abs().min(self.upper.abs())
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn contains_interval(&self, other: &Interval) -> bool {
        self.lower <= other.lower && other.upper <= self.upper
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.lower <= other.upper && other.lower <= self.upper
    }

    /// True if every value of the interval lies within `tolerance` of zero
    pub fn is_within(&self, tolerance: f64) -> bool {
        self.magnitude() <= tolerance
    }

    pub fn hull(&self, other: &Interval) -> Interval {
        Interval {
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
        }
    }

    pub fn hull_with(&self, value: f64) -> Interval {
        Interval {
            lower: self.lower.min(value),
            upper: self.upper.max(value),
        }
    }

    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        let lower = self.lower.max(other.lower);
        let upper = self.upper.min(other.upper);
        (lower <= upper).then_some(Interval { lower, upper })
    }

    /// Clamp a value into the interval
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }

    pub fn abs(&self) -> Interval {
        if self.lower >= 0.0 {
            *self
        } else if self.upper <= 0.0 {
            -*self
        } else {
            Interval::new(0.0, self.magnitude())
        }
    }

    pub fn squared(&self) -> Interval {
        let lower_squared = self.lower * self.lower;
        let upper_squared = self.upper * self.upper;
        if self.lower >= 0.0 {
            Interval::new(round_down(lower_squared).max(0.0), round_up(upper_squared))
        } else if self.upper <= 0.0 {
            Interval::new(round_down(upper_squared).max(0.0), round_up(lower_squared))
        } else {
            Interval::new(0.0, round_up(lower_squared.max(upper_squared)))
        }
    }

    /// Square root over the non-negative part; `None` if the interval is
    /// entirely negative
    pub fn sqrt(&self) -> Option<Interval> {
        let domain = self.intersection(&Interval::new(0.0, f64::INFINITY))?;
        Some(Interval::new(
            round_down(domain.lower.sqrt()).max(0.0),
            round_up(domain.upper.sqrt()),
        ))
    }

    pub fn sin(&self) -> Interval {
        if !self.is_finite() || self.width() >= TAU {
            return Interval::new(-1.0, 1.0);
        }
        let a = self.lower.sin();
        let b = self.upper.sin();
        let mut lower = round_down_by(a.min(b), TRANSCENDENTAL_ULPS);
        let mut upper = round_up_by(a.max(b), TRANSCENDENTAL_ULPS);
        if self.contains_angle(FRAC_PI_2, TAU) {
            upper = 1.0;
        }
        if self.contains_angle(-FRAC_PI_2, TAU) {
            lower = -1.0;
        }
        Interval::new(lower.max(-1.0), upper.min(1.0))
    }

    pub fn cos(&self) -> Interval {
        if !self.is_finite() || self.width() >= TAU {
            return Interval::new(-1.0, 1.0);
        }
        let a = self.lower.cos();
        let b = self.upper.cos();
        let mut lower = round_down_by(a.min(b), TRANSCENDENTAL_ULPS);
        let mut upper = round_up_by(a.max(b), TRANSCENDENTAL_ULPS);
        if self.contains_angle(0.0, TAU) {
            upper = 1.0;
        }
        if self.contains_angle(PI, TAU) {
            lower = -1.0;
        }
        Interval::new(lower.max(-1.0), upper.min(1.0))
    }

    /// Tangent; the whole real line if the interval reaches a pole
    pub fn tan(&self) -> Interval {
        if !self.is_finite() || self.width() >= PI || self.contains_angle(FRAC_PI_2, PI) {
            return Interval::whole();
        }
        Interval::new(
            round_down_by(self.lower.tan(), TRANSCENDENTAL_ULPS),
            round_up_by(self.upper.tan(), TRANSCENDENTAL_ULPS),
        )
    }

    /// Arcsine over the part of the interval inside `[-1, 1]`
    pub fn asin(&self) -> Option<Interval> {
        let domain = self.intersection(&Interval::new(-1.0, 1.0))?;
        Some(Interval::new(
            round_down_by(domain.lower.asin(), TRANSCENDENTAL_ULPS),
            round_up_by(domain.upper.asin(), TRANSCENDENTAL_ULPS),
        ))
    }

    /// Arccosine over the part of the interval inside `[-1, 1]`
    pub fn acos(&self) -> Option<Interval> {
        let domain = self.intersection(&Interval::new(-1.0, 1.0))?;
        Some(Interval::new(
            round_down_by(domain.upper.acos(), TRANSCENDENTAL_ULPS).max(0.0),
            round_up_by(domain.lower.acos(), TRANSCENDENTAL_ULPS),
        ))
    }

    pub fn exp(&self) -> Interval {
        Interval::new(
            round_down_by(self.lower.exp(), TRANSCENDENTAL_ULPS).max(0.0),
            round_up_by(self.upper.exp(), TRANSCENDENTAL_ULPS),
        )
    }

    /// Natural logarithm over the positive part; `None` if the interval has
    /// no positive values
    pub fn ln(&self) -> Option<Interval> {
        if self.upper <= 0.0 {
            return None;
        }
        let lower = if self.lower <= 0.0 {
            f64::NEG_INFINITY
        } else {
            round_down_by(self.lower.ln(), TRANSCENDENTAL_ULPS)
        };
        Some(Interval::new(
            lower,
            round_up_by(self.upper.ln(), TRANSCENDENTAL_ULPS),
        ))
    }

    pub fn powi(&self, exponent: i32) -> Interval {
        if exponent == 0 {
            return Interval::singleton(1.0);
        }
        if exponent < 0 {
            return Interval::singleton(1.0) / self.powi(-exponent);
        }
        let ulps = TRANSCENDENTAL_ULPS + (exponent as u32).min(64);
        let lower_power = self.lower.powi(exponent);
        let upper_power = self.upper.powi(exponent);
        if exponent % 2 == 1 {
            Interval::new(
                round_down_by(lower_power, ulps),
                round_up_by(upper_power, ulps),
            )
        } else if self.lower >= 0.0 {
            Interval::new(
                round_down_by(lower_power, ulps).max(0.0),
                round_up_by(upper_power, ulps),
            )
        } else if self.upper <= 0.0 {
            Interval::new(
                round_down_by(upper_power, ulps).max(0.0),
                round_up_by(lower_power, ulps),
            )
        } else {
            Interval::new(0.0, round_up_by(lower_power.max(upper_power), ulps))
        }
    }

    /// General power. Integer singleton exponents use exact sign handling;
    /// otherwise the base is restricted to its non-negative part.
    pub fn pow(&self, exponent: &Interval) -> Option<Interval> {
        if exponent.is_singleton()
            && exponent.lower.fract() == 0.0
            && exponent.lower.abs() <= i32::MAX as f64
        {
            return Some(self.powi(exponent.lower as i32));
        }
        let base = self.intersection(&Interval::new(0.0, f64::INFINITY))?;
        Some((*exponent * base.ln()?).exp())
    }

    /// Check whether `offset + period * k` lies in the interval for some
    /// integer `k`. A small slack errs towards reporting containment.
    fn contains_angle(&self, offset: f64, period: f64) -> bool {
        let slack = 1e-9 * (1.0 + self.magnitude());
        let k = ((self.lower - slack - offset) / period).ceil();
        offset + k * period <= self.upper + slack
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval::singleton(0.0)
    }
}

impl From<f64> for Interval {
    fn from(value: f64) -> Self {
        Interval::singleton(value)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_singleton() {
            write!(f, "[{}]", self.lower)
        } else {
            write!(f, "[{}, {}]", self.lower, self.upper)
        }
    }
}

impl Neg for Interval {
    type Output = Interval;

    fn neg(self) -> Interval {
        Interval {
            lower: -self.upper,
            upper: -self.lower,
        }
    }
}

impl Add for Interval {
    type Output = Interval;

    fn add(self, rhs: Interval) -> Interval {
        Interval::rounded(self.lower + rhs.lower, self.upper + rhs.upper)
    }
}

impl Sub for Interval {
    type Output = Interval;

    fn sub(self, rhs: Interval) -> Interval {
        Interval::rounded(self.lower - rhs.upper, self.upper - rhs.lower)
    }
}

impl Mul for Interval {
    type Output = Interval;

    fn mul(self, rhs: Interval) -> Interval {
        let products = [
            bound_product(self.lower, rhs.lower),
            bound_product(self.lower, rhs.upper),
            bound_product(self.upper, rhs.lower),
            bound_product(self.upper, rhs.upper),
        ];
        let lower = products.iter().copied().fold(f64::INFINITY, f64::min);
        let upper = products.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Interval::rounded(lower, upper)
    }
}

impl Div for Interval {
    type Output = Interval;

    /// Division by an interval containing zero yields the whole real line
    fn div(self, rhs: Interval) -> Interval {
        if rhs.contains(0.0) {
            return Interval::whole();
        }
        let quotients = [
            self.lower / rhs.lower,
            self.lower / rhs.upper,
            self.upper / rhs.lower,
            self.upper / rhs.upper,
        ];
        if quotients.iter().any(|q| q.is_nan()) {
            return Interval::whole();
        }
        let lower = quotients.iter().copied().fold(f64::INFINITY, f64::min);
        let upper = quotients.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Interval::rounded(lower, upper)
    }
}

impl Add<f64> for Interval {
    type Output = Interval;

    fn add(self, rhs: f64) -> Interval {
        self + Interval::singleton(rhs)
    }
}

impl Sub<f64> for Interval {
    type Output = Interval;

    fn sub(self, rhs: f64) -> Interval {
        self - Interval::singleton(rhs)
    }
}

impl Mul<f64> for Interval {
    type Output = Interval;

    fn mul(self, rhs: f64) -> Interval {
        self * Interval::singleton(rhs)
    }
}

impl Div<f64> for Interval {
    type Output = Interval;

    fn div(self, rhs: f64) -> Interval {
        self / Interval::singleton(rhs)
    }
}

impl Add<Interval> for f64 {
    type Output = Interval;

    fn add(self, rhs: Interval) -> Interval {
        Interval::singleton(self) + rhs
    }
}

impl Sub<Interval> for f64 {
    type Output = Interval;

    fn sub(self, rhs: Interval) -> Interval {
        Interval::singleton(self) - rhs
    }
}

impl Mul<Interval> for f64 {
    type Output = Interval;

    fn mul(self, rhs: Interval) -> Interval {
        Interval::singleton(self) * rhs
    }
}

impl Div<Interval> for f64 {
    type Output = Interval;

    fn div(self, rhs: Interval) -> Interval {
        Interval::singleton(self) / rhs
    }
}

impl AddAssign for Interval {
    fn add_assign(&mut self, rhs: Interval) {
        *self = *self + rhs;
    }
}

impl SubAssign for Interval {
    fn sub_assign(&mut self, rhs: Interval) {
        *self = *self - rhs;
    }
}

impl MulAssign for Interval {
    fn mul_assign(&mut self, rhs: Interval) {
        *self = *self * rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_encloses() {
        let a = Interval::new(1.0, 2.0);
        let b = Interval::new(-3.0, 0.5);

        let sum = a + b;
        assert!(sum.contains(-2.0) && sum.contains(2.5));

        let product = a * b;
        assert!(product.contains(-6.0) && product.contains(1.0));

        let difference = a - b;
        assert!(difference.contains(0.5) && difference.contains(5.0));
    }

    #[test]
    fn test_outward_rounding() {
        let third = Interval::singleton(1.0) / Interval::singleton(3.0);
        assert!(third.lower() < third.upper());
        assert!(third.contains(1.0 / 3.0));
    }

    #[test]
    fn test_division_by_zero_straddling_interval() {
        let result = Interval::singleton(1.0) / Interval::new(-1.0, 1.0);
        assert_eq!(result, Interval::whole());
    }

    #[test]
    fn test_sin_extrema() {
        let bounds = Interval::new(0.0, PI).sin();
        assert_eq!(bounds.upper(), 1.0);
        assert!(bounds.lower() <= 0.0);

        let bounds = Interval::new(PI, 2.0 * PI).sin();
        assert_eq!(bounds.lower(), -1.0);
    }

    #[test]
    fn test_cos_extrema() {
        let bounds = Interval::new(-0.5, 0.5).cos();
        assert_eq!(bounds.upper(), 1.0);
        assert!(bounds.contains(0.5f64.cos()));
    }

    #[test]
    fn test_tan_pole() {
        assert_eq!(Interval::new(1.0, 2.0).tan(), Interval::whole());
        let bounds = Interval::new(-0.5, 0.5).tan();
        assert!(bounds.contains(0.5f64.tan()));
        assert!(bounds.is_finite());
    }

    #[test]
    fn test_asin_clamps_domain() {
        let bounds = Interval::new(0.5, 3.0).asin().unwrap();
        assert!(bounds.contains(FRAC_PI_2));
        assert!(bounds.contains(0.5f64.asin()));
        assert!(Interval::new(2.0, 3.0).asin().is_none());
    }

    #[test]
    fn test_ln_domain() {
        assert!(Interval::new(-2.0, -1.0).ln().is_none());
        let bounds = Interval::new(-1.0, 1.0).ln().unwrap();
        assert_eq!(bounds.lower(), f64::NEG_INFINITY);
        assert!(bounds.contains(0.0));
    }

    #[test]
    fn test_squared_straddling_zero() {
        let bounds = Interval::new(-2.0, 1.0).squared();
        assert_eq!(bounds.lower(), 0.0);
        assert!(bounds.contains(4.0));
    }

    #[test]
    fn test_pow() {
        let cubed = Interval::new(-2.0, 1.0)
            .pow(&Interval::singleton(3.0))
            .unwrap();
        assert!(cubed.contains(-8.0) && cubed.contains(1.0));

        let root = Interval::new(4.0, 9.0).pow(&Interval::singleton(0.5)).unwrap();
        assert!(root.contains(2.0) && root.contains(3.0));
    }

    #[test]
    fn test_hull_and_intersection() {
        let a = Interval::new(0.0, 1.0);
        let b = Interval::new(2.0, 3.0);
        assert_eq!(a.hull(&b), Interval::new(0.0, 3.0));
        assert!(a.intersection(&b).is_none());
        assert_eq!(Interval::hull_of(&[3.0, -1.0, 2.0]), Some(Interval::new(-1.0, 3.0)));
    }
}
