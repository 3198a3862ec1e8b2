// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Scalar abstraction shared by double and interval evaluation

use super::Interval;
use crate::expression::ConstantValue;
use nalgebra::Scalar;
use std::ops::{Add, Mul, Neg, Sub};

/// Number type an expression can be evaluated in.
///
/// The `checked_*` operations return `None` when the input lies outside the
/// mathematical domain of the function. For `f64` this is a hard failure;
/// for `Interval` the input is first intersected with (or clamped to) the
/// domain, and `None` only means no part of the interval is valid.
pub trait Numeric:
    Scalar
    + Copy
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
{
    fn from_f64(value: f64) -> Self;

    fn zero() -> Self {
        Self::from_f64(0.0)
    }

    fn one() -> Self {
        Self::from_f64(1.0)
    }

    fn squared(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn exp(self) -> Self;

    /// Division failing when the divisor is approximately zero
    fn checked_div(self, divisor: Self, tolerance: f64) -> Option<Self>;
    fn checked_sqrt(self, tolerance: f64) -> Option<Self>;
    fn checked_tan(self, tolerance: f64) -> Option<Self>;
    fn checked_asin(self, tolerance: f64) -> Option<Self>;
    fn checked_acos(self, tolerance: f64) -> Option<Self>;
    fn checked_ln(self, tolerance: f64) -> Option<Self>;
    fn checked_pow(self, exponent: Self, tolerance: f64) -> Option<Self>;

    /// `exponent * self^(exponent - 1)`, the slope of `pow` in its base
    fn checked_pow_slope(self, exponent: Self, tolerance: f64) -> Option<Self>;

    /// False for interval results with NaN or inverted bounds
    fn is_valid(self) -> bool;

    /// Stored column of a constant node in this number type
    fn constant_slice(value: &ConstantValue) -> &[Self];
}

impl Numeric for f64 {
    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn squared(self) -> Self {
        self * self
    }

    #[inline]
    fn sin(self) -> Self {
        f64::sin(self)
    }

    #[inline]
    fn cos(self) -> Self {
        f64::cos(self)
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn checked_div(self, divisor: Self, tolerance: f64) -> Option<Self> {
        (divisor.abs() > tolerance).then(|| self / divisor)
    }

    fn checked_sqrt(self, tolerance: f64) -> Option<Self> {
        (self >= -tolerance).then(|| self.max(0.0).sqrt())
    }

    fn checked_tan(self, tolerance: f64) -> Option<Self> {
        (f64::cos(self).abs() > tolerance).then(|| self.tan())
    }

    fn checked_asin(self, tolerance: f64) -> Option<Self> {
        (self.abs() - 1.0 <= tolerance).then(|| self.clamp(-1.0, 1.0).asin())
    }

    fn checked_acos(self, tolerance: f64) -> Option<Self> {
        (self.abs() - 1.0 <= tolerance).then(|| self.clamp(-1.0, 1.0).acos())
    }

    fn checked_ln(self, tolerance: f64) -> Option<Self> {
        (self > tolerance).then(|| self.ln())
    }

    fn checked_pow(self, exponent: Self, tolerance: f64) -> Option<Self> {
        if exponent.fract() == 0.0 && exponent.abs() <= i32::MAX as f64 {
            if exponent < 0.0 && self.abs() <= tolerance {
                return None;
            }
            return Some(self.powi(exponent as i32));
        }
        if self < -tolerance {
            return None;
        }
        let base = self.max(0.0);
        if base == 0.0 && exponent < 0.0 {
            return None;
        }
        Some(base.powf(exponent))
    }

    fn checked_pow_slope(self, exponent: Self, tolerance: f64) -> Option<Self> {
        Some(exponent * self.checked_pow(exponent - 1.0, tolerance)?)
    }

    #[inline]
    fn is_valid(self) -> bool {
        true
    }

    fn constant_slice(value: &ConstantValue) -> &[Self] {
        value.values().as_slice()
    }
}

impl Numeric for Interval {
    #[inline]
    fn from_f64(value: f64) -> Self {
        Interval::singleton(value)
    }

    #[inline]
    fn squared(self) -> Self {
        Interval::squared(&self)
    }

    #[inline]
    fn sin(self) -> Self {
        Interval::sin(&self)
    }

    #[inline]
    fn cos(self) -> Self {
        Interval::cos(&self)
    }

    #[inline]
    fn exp(self) -> Self {
        Interval::exp(&self)
    }

    /// A divisor straddling zero gives the whole real line; a divisor lying
    /// entirely inside the tolerance band fails.
    fn checked_div(self, divisor: Self, tolerance: f64) -> Option<Self> {
        (!divisor.is_within(tolerance)).then(|| self / divisor)
    }

    fn checked_sqrt(self, tolerance: f64) -> Option<Self> {
        if self.upper() < -tolerance {
            return None;
        }
        Interval::new(self.lower().max(0.0), self.upper().max(0.0)).sqrt()
    }

    fn checked_tan(self, _tolerance: f64) -> Option<Self> {
        Some(self.tan())
    }

    fn checked_asin(self, tolerance: f64) -> Option<Self> {
        if self.mignitude() - 1.0 > tolerance {
            return None;
        }
        Interval::new(self.lower().clamp(-1.0, 1.0), self.upper().clamp(-1.0, 1.0)).asin()
    }

    fn checked_acos(self, tolerance: f64) -> Option<Self> {
        if self.mignitude() - 1.0 > tolerance {
            return None;
        }
        Interval::new(self.lower().clamp(-1.0, 1.0), self.upper().clamp(-1.0, 1.0)).acos()
    }

    fn checked_ln(self, tolerance: f64) -> Option<Self> {
        if self.upper() <= tolerance {
            return None;
        }
        self.ln()
    }

    /// Hull of both branches of the double rule: integer exponents accept
    /// any base, every other exponent sees only the non-negative base.
    fn checked_pow(self, exponent: Self, tolerance: f64) -> Option<Self> {
        if exponent.is_singleton() && exponent.lower().fract() == 0.0 {
            if exponent.lower() < 0.0 && self.is_within(tolerance) {
                return None;
            }
            return self.pow(&exponent);
        }
        let mut result = integer_powers(self, exponent, tolerance);
        if self.upper() >= -tolerance {
            let base = Interval::new(self.lower().max(0.0), self.upper().max(0.0));
            let part = if base.upper() == 0.0 {
                (exponent.upper() > 0.0).then(|| Interval::singleton(0.0))
            } else {
                base.pow(&exponent)
            };
            if let Some(part) = part {
                result = Some(result.map_or(part, |r| r.hull(&part)));
            }
        }
        result
    }

    fn checked_pow_slope(self, exponent: Self, tolerance: f64) -> Option<Self> {
        // An integer exponent lowers exactly; anything else is rounded outward
        let exact = exponent.is_singleton()
            && exponent.lower().fract() == 0.0
            && exponent.lower().abs() < 2f64.powi(52);
        let lowered = if exact {
            Interval::singleton(exponent.lower() - 1.0)
        } else {
            exponent - Interval::singleton(1.0)
        };
        Some(exponent * self.checked_pow(lowered, tolerance)?)
    }

    #[inline]
    fn is_valid(self) -> bool {
        Interval::is_valid(&self)
    }

    fn constant_slice(value: &ConstantValue) -> &[Self] {
        value.bounds()
    }
}

/// Widest run of integer exponents expanded one by one before giving up
/// and returning the whole line
const MAX_INTEGER_EXPONENTS: f64 = 64.0;

/// Hull of `base.powi(k)` over the integers `k` inside `exponent`
fn integer_powers(base: Interval, exponent: Interval, tolerance: f64) -> Option<Interval> {
    let (first, last) = (exponent.lower().ceil(), exponent.upper().floor());
    if first > last {
        return None;
    }
    if !first.is_finite()
        || !last.is_finite()
        || last - first > MAX_INTEGER_EXPONENTS
        || first < i32::MIN as f64
        || last > i32::MAX as f64
    {
        return Some(Interval::whole());
    }
    let mut hull: Option<Interval> = None;
    for k in first as i32..=last as i32 {
        if k < 0 && base.is_within(tolerance) {
            continue;
        }
        let power = base.powi(k);
        hull = Some(hull.map_or(power, |h| h.hull(&power)));
    }
    hull
}
