// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Symbolic differentiation
//!
//! Each node kind contributes one chain-rule entry. Results are built with
//! the simplifying constructors, so derivatives of constants vanish
//! immediately and products with zero collapse.

use super::{Expression, Function, Kind};
use crate::dedup::{DeduplicationCache, ExpressionCache};
use crate::error::{ExpressionError, Result};
use ahash::AHashMap;
use nalgebra::{dvector, DVector};

impl Expression {
    /// Partial derivative with respect to parameter `index`, deduplicated
    /// through a fresh tree-scoped cache
    pub fn derivative(&self, index: usize) -> Result<Expression> {
        self.derivative_with(index, &DeduplicationCache::new())
    }

    /// Partial derivative with respect to parameter `index`, canonicalized
    /// through the given cache
    pub fn derivative_with<C: ExpressionCache + ?Sized>(
        &self,
        index: usize,
        cache: &C,
    ) -> Result<Expression> {
        if index >= self.num_parameters() {
            return Err(ExpressionError::ParameterIndex {
                index,
                num_parameters: self.num_parameters(),
            });
        }
        let derivative = self.differentiate(index, &mut AHashMap::new())?;
        Ok(derivative.deduplicated(cache))
    }

    fn differentiate(
        &self,
        index: usize,
        memo: &mut AHashMap<usize, Expression>,
    ) -> Result<Expression> {
        if let Some(done) = memo.get(&self.id()) {
            return Ok(done.clone());
        }
        let num_parameters = self.num_parameters();
        let result = match self.kind() {
            Kind::Constant { .. } => self.zero_like(),
            Kind::Parameter { index: own, .. } => {
                Self::scalar(if *own == index { 1.0 } else { 0.0 }, num_parameters)
            }
            Kind::Identity { .. } => {
                let mut unit = DVector::zeros(num_parameters);
                unit[index] = 1.0;
                Self::constant_unchecked(unit, num_parameters)
            }
            Kind::Negated(a) => a.differentiate(index, memo)?.negated(),
            Kind::Sum(a, b) => {
                let (da, db) = (a.differentiate(index, memo)?, b.differentiate(index, memo)?);
                da.checked_add(&db)?
            }
            Kind::Difference(a, b) => {
                let (da, db) = (a.differentiate(index, memo)?, b.differentiate(index, memo)?);
                da.checked_sub(&db)?
            }
            Kind::Product(multiplier, multiplicand) => {
                let dm = multiplier.differentiate(index, memo)?;
                let dx = multiplicand.differentiate(index, memo)?;
                dm.checked_mul(multiplicand)?
                    .checked_add(&multiplier.checked_mul(&dx)?)?
            }
            Kind::Quotient(dividend, divisor) => {
                let da = dividend.differentiate(index, memo)?;
                let db = divisor.differentiate(index, memo)?;
                da.checked_mul(divisor)?
                    .checked_sub(&dividend.checked_mul(&db)?)?
                    .checked_div(&divisor.squared_norm())?
            }
            Kind::DotProduct(a, b) => {
                let (da, db) = (a.differentiate(index, memo)?, b.differentiate(index, memo)?);
                da.dot(b)?.checked_add(&a.dot(&db)?)?
            }
            Kind::CrossProduct(a, b) => {
                let (da, db) = (a.differentiate(index, memo)?, b.differentiate(index, memo)?);
                da.cross(b)?.checked_add(&a.cross(&db)?)?
            }
            Kind::Norm(a) => a.differentiate(index, memo)?.dot(&a.normalized())?,
            Kind::SquaredNorm(a) => a.differentiate(index, memo)?.dot(a)?.scaled_by(2.0),
            Kind::Normalized(a) => {
                let da = a.differentiate(index, memo)?;
                let along = da.dot(self)?.checked_mul(self)?;
                da.checked_sub(&along)?.checked_div(&a.norm())?
            }
            Kind::Function(function, a) => {
                let da = a.differentiate(index, memo)?;
                self.function_derivative(*function, a, &da)?
            }
            Kind::Power(base, exponent) => {
                let db = base.differentiate(index, memo)?;
                match exponent.constant_values() {
                    Some(value) => {
                        let lowered = Self::scalar(value[0] - 1.0, num_parameters);
                        base.pow(&lowered)?.scaled_by(value[0]).checked_mul(&db)?
                    }
                    None => {
                        let de = exponent.differentiate(index, memo)?;
                        de.checked_mul(&base.ln()?)?
                            .checked_add(&exponent.checked_mul(&db)?.checked_div(base)?)?
                            .checked_mul(self)?
                    }
                }
            }
            Kind::Components {
                operand,
                start,
                count,
            } => operand
                .differentiate(index, memo)?
                .components(*start, *count)?,
            Kind::Concatenation(a, b) => {
                let (da, db) = (a.differentiate(index, memo)?, b.differentiate(index, memo)?);
                da.concatenate(&db)?
            }
            Kind::Scaling { scale, operand } => operand.differentiate(index, memo)?.scaled_by(*scale),
            Kind::Translation { operand, .. } => operand.differentiate(index, memo)?,
            Kind::Transformation { matrix, operand } => {
                operand.differentiate(index, memo)?.transform(matrix.clone())
            }
            Kind::Composition { outer, inner } => {
                let d_inner = inner.differentiate(index, memo)?;
                let mut total = self.zero_like();
                for k in 0..inner.num_dimensions() {
                    let rate = d_inner.component(k)?;
                    if rate.is_zero() {
                        continue;
                    }
                    let d_outer = outer
                        .differentiate(k, &mut AHashMap::new())?
                        .composed_with(inner)?;
                    total = total.checked_add(&d_outer.checked_mul(&rate)?)?;
                }
                total
            }
            Kind::Linear { basis, .. } => {
                Self::constant_unchecked(basis.column(index).into_owned(), num_parameters)
            }
            Kind::Elliptical {
                origin,
                basis,
                convention,
            } => {
                // Local coordinates k >= index carry a factor in the angle;
                // the rest are constant with respect to it.
                let mut d_basis = basis.clone();
                for column in 0..index {
                    d_basis.column_mut(column).fill(0.0);
                }
                if convention[index] {
                    d_basis.column_mut(index).neg_mut();
                } else {
                    for column in index + 1..d_basis.ncols() {
                        d_basis.column_mut(column).neg_mut();
                    }
                }
                let mut d_convention = convention.clone();
                d_convention[index] = !d_convention[index];
                Self::elliptical(DVector::zeros(origin.len()), d_basis, d_convention)?
            }
        };
        memo.insert(self.id(), result.clone());
        Ok(result)
    }

    fn function_derivative(
        &self,
        function: Function,
        operand: &Expression,
        d_operand: &Expression,
    ) -> Result<Expression> {
        let one_minus_squared = || {
            operand
                .squared_norm()
                .negated()
                .translate(dvector![1.0])
                .sqrt()
        };
        match function {
            Function::Sqrt => d_operand.scaled_by(0.5).checked_div(self),
            Function::Sin => operand.cos()?.checked_mul(d_operand),
            Function::Cos => operand.sin()?.negated().checked_mul(d_operand),
            Function::Tan => self
                .squared_norm()
                .translate(dvector![1.0])
                .checked_mul(d_operand),
            Function::Arcsin => d_operand.checked_div(&one_minus_squared()?),
            Function::Arccos => d_operand.checked_div(&one_minus_squared()?).map(|d| d.negated()),
            Function::Exp => self.checked_mul(d_operand),
            Function::Log => d_operand.checked_div(operand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::OperationKind;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector, DMatrix};

    #[test]
    fn test_parameter_derivative() {
        let t = Expression::parameter(0, 2).unwrap();
        assert_eq!(t.derivative(0).unwrap().constant_values(), Some(&dvector![1.0]));
        assert_eq!(t.derivative(1).unwrap().constant_values(), Some(&dvector![0.0]));
        assert!(t.derivative(2).unwrap_err().is_dimension_error());
    }

    #[test]
    fn test_sin_derivative_is_cos() {
        let t = Expression::parameter(0, 1).unwrap();
        let d = t.sin().unwrap().derivative(0).unwrap();
        assert!(d.is_duplicate_of(&t.cos().unwrap()));
    }

    #[test]
    fn test_linear_derivative_is_basis_column() {
        let plane = Expression::linear(
            dvector![1.0, 1.0, 1.0],
            dmatrix![1.0, 0.0; 0.0, 2.0; 0.0, 0.0],
        )
        .unwrap();
        let dv = plane.derivative(1).unwrap();
        assert_eq!(dv.constant_values(), Some(&dvector![0.0, 2.0, 0.0]));
    }

    #[test]
    fn test_elliptical_derivative_values() {
        // Sphere-like parameterization with two angles
        let surface = Expression::elliptical(
            dvector![0.0, 0.0, 0.0],
            DMatrix::identity(3, 3),
            vec![true, false],
        )
        .unwrap();
        let (u, v) = (0.4, 1.1);
        let p = surface.value_at(&[u, v]).unwrap();
        assert_relative_eq!(p, dvector![u.cos(), u.sin() * v.sin(), u.sin() * v.cos()], epsilon = 1e-12);

        let du = surface.derivative(0).unwrap().value_at(&[u, v]).unwrap();
        assert_relative_eq!(du, dvector![-u.sin(), u.cos() * v.sin(), u.cos() * v.cos()], epsilon = 1e-12);

        let dv = surface.derivative(1).unwrap();
        assert_eq!(dv.operation_kind(), OperationKind::Elliptical);
        let dv = dv.value_at(&[u, v]).unwrap();
        assert_relative_eq!(dv, dvector![0.0, u.sin() * v.cos(), -u.sin() * v.sin()], epsilon = 1e-12);
    }

    #[test]
    fn test_derivative_shares_subtrees() {
        let t = Expression::parameter(0, 1).unwrap();
        let s = t.sin().unwrap();
        let e = s.checked_mul(&s).unwrap();
        let d = e.derivative(0).unwrap();
        // cos(t) * sin(t) + sin(t) * cos(t), with both products canonicalized
        match d.kind() {
            Kind::Sum(a, b) => assert!(a.ptr_eq(b)),
            _ => panic!("expected a sum"),
        }
    }
}
