// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Tolerance predicates used in place of exact floating-point equality

/// Default "approximately zero" threshold
pub const DEFAULT_TOLERANCE: f64 = 1e-12;

/// Check if a value is zero within the default tolerance
#[inline]
pub fn is_zero(value: f64) -> bool {
    is_zero_within(value, DEFAULT_TOLERANCE)
}

/// Check if a value is zero within the given tolerance
#[inline]
pub fn is_zero_within(value: f64, tolerance: f64) -> bool {
    value.abs() <= tolerance
}

/// Check if two values are equal within the default tolerance
#[inline]
pub fn approx_eq(a: f64, b: f64) -> bool {
    is_zero(a - b)
}

/// Check if every component of a vector is approximately zero
pub fn is_zero_vector(values: &[f64]) -> bool {
    values.iter().all(|value| is_zero(*value))
}
