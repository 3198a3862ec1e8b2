// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Batched evaluation of expressions over parameter columns
//!
//! Every column of the input matrix is one parameter sample. The same plan
//! evaluates in `f64` or in [`Interval`](crate::numeric::Interval)
//! arithmetic; interval results enclose every value the expression takes
//! for parameters inside the input intervals.

mod buffer;
mod kernels;
mod parallel;
mod schedule;

pub use parallel::ParallelEvaluator;
pub use schedule::EvaluationPlan;

use crate::error::Result;
use crate::expression::Expression;
use crate::numeric::{Interval, Numeric, DEFAULT_TOLERANCE};
use nalgebra::{DMatrix, DVector};

impl Expression {
    /// Values at every parameter column, `num_dimensions x columns`
    pub fn evaluate<T: Numeric>(&self, parameters: &DMatrix<T>) -> Result<DMatrix<T>> {
        self.evaluate_with_tolerance(parameters, DEFAULT_TOLERANCE)
    }

    pub fn evaluate_with_tolerance<T: Numeric>(
        &self,
        parameters: &DMatrix<T>,
        tolerance: f64,
    ) -> Result<DMatrix<T>> {
        EvaluationPlan::compile(self).evaluate(parameters, tolerance)
    }

    /// Jacobian (`num_dimensions x num_parameters`) at every parameter column
    pub fn evaluate_jacobian<T: Numeric>(&self, parameters: &DMatrix<T>) -> Result<Vec<DMatrix<T>>> {
        EvaluationPlan::compile(self).evaluate_jacobian(parameters, DEFAULT_TOLERANCE)
    }

    /// Value at a single parameter point
    pub fn value_at(&self, parameters: &[f64]) -> Result<DVector<f64>> {
        let values = self.evaluate(&DMatrix::from_column_slice(parameters.len(), 1, parameters))?;
        Ok(values.column(0).into_owned())
    }

    /// Enclosure of the values over a box of parameters
    pub fn bounds_over(&self, parameters: &[Interval]) -> Result<DVector<Interval>> {
        let values = self.evaluate(&DMatrix::from_column_slice(parameters.len(), 1, parameters))?;
        Ok(values.column(0).into_owned())
    }

    /// Jacobian at a single parameter point
    pub fn jacobian_at(&self, parameters: &[f64]) -> Result<DMatrix<f64>> {
        let jacobian =
            self.evaluate_jacobian(&DMatrix::from_column_slice(parameters.len(), 1, parameters))?;
        Ok(jacobian.into_iter().next().unwrap_or_else(|| {
            DMatrix::zeros(self.num_dimensions(), self.num_parameters())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExpressionError;
    use crate::expression::OperationKind;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_parameter_batch() {
        let t = Expression::parameter(0, 1).unwrap();
        let values = t.evaluate(&dmatrix![0.0, 1.0, 2.0]).unwrap();
        assert_eq!(values, dmatrix![0.0, 1.0, 2.0]);
        let slope = t.derivative(0).unwrap().evaluate(&dmatrix![0.0, 1.0, 2.0]).unwrap();
        assert_eq!(slope, dmatrix![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_sin_at_half_pi() {
        let s = Expression::parameter(0, 1).unwrap().sin().unwrap();
        assert_relative_eq!(s.value_at(&[FRAC_PI_2]).unwrap()[0], 1.0, epsilon = 1e-12);
        let ds = s.derivative(0).unwrap();
        assert_relative_eq!(ds.value_at(&[FRAC_PI_2]).unwrap()[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_domain_error_reports_column() {
        let t = Expression::parameter(0, 1).unwrap();
        let log = t.ln().unwrap();
        let err = log.evaluate(&dmatrix![1.0, 2.0, -1.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            ExpressionError::Domain {
                kind: OperationKind::Log,
                column: 2
            }
        );
    }

    #[test]
    fn test_interval_division_through_zero_is_unbounded() {
        let one = Expression::scalar(1.0, 1);
        let t = Expression::parameter(0, 1).unwrap();
        let q = one.checked_div(&t).unwrap();
        let bounds = q.bounds_over(&[Interval::new(-1.0, 1.0)]).unwrap();
        assert!(!bounds[0].is_finite());
        assert!(bounds[0].contains(1e6) && bounds[0].contains(-1e6));
    }

    #[test]
    fn test_forward_jacobian_matches_derivatives() {
        let u = Expression::parameter(0, 2).unwrap();
        let v = Expression::parameter(1, 2).unwrap();
        let curve = Expression::from_components(&[
            u.checked_mul(&v).unwrap(),
            u.sin().unwrap().checked_add(&v.exp().unwrap()).unwrap(),
        ])
        .unwrap();
        let point = [0.3, -0.7];
        let jacobian = curve.jacobian_at(&point).unwrap();
        for parameter in 0..2 {
            let column = curve.derivative(parameter).unwrap().value_at(&point).unwrap();
            assert_relative_eq!(jacobian.column(parameter).into_owned(), column, epsilon = 1e-12);
        }
        assert_relative_eq!(jacobian, dmatrix![-0.7, 0.3; 0.3f64.cos(), (-0.7f64).exp()], epsilon = 1e-12);
    }

    #[test]
    fn test_interval_encloses_samples() {
        let t = Expression::parameter(0, 1).unwrap();
        let e = t.sin().unwrap().checked_mul(&t.exp().unwrap()).unwrap();
        let bounds = e.bounds_over(&[Interval::new(0.2, 0.9)]).unwrap();
        for k in 0..=20 {
            let x = 0.2 + 0.7 * f64::from(k) / 20.0;
            assert!(bounds[0].contains(e.value_at(&[x]).unwrap()[0]));
        }
        assert_eq!(e.value_at(&[0.5]).unwrap(), dvector![0.5f64.sin() * 0.5f64.exp()]);
    }
}
