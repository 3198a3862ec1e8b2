// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Numeric domain types
//!
//! Exact doubles, outward-rounded intervals, and the tolerance predicates
//! used for every domain-boundary and singularity check.

mod interval;
mod scalar;
mod tolerance;

pub use interval::Interval;
pub use scalar::Numeric;
pub use tolerance::{approx_eq, is_zero, is_zero_vector, is_zero_within, DEFAULT_TOLERANCE};
