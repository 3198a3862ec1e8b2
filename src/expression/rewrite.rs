// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Rewrites under scaling, translation, linear transformation, component
//! extraction, and composition

use super::{Expression, Kind, OperationKind};
use crate::error::{ExpressionError, Result};
use crate::numeric::DEFAULT_TOLERANCE;
use ahash::AHashMap;
use nalgebra::{DMatrix, DVector};

impl Expression {
    /// `scale * self`, absorbed into the payload where the node allows it
    pub fn scaled_by(&self, scale: f64) -> Expression {
        if scale == 0.0 {
            return self.zero_like();
        }
        if scale == 1.0 {
            return self.clone();
        }
        let (num_dimensions, num_parameters) = (self.num_dimensions(), self.num_parameters());
        match self.kind() {
            Kind::Constant { value, .. } => {
                Self::constant_unchecked(value.values() * scale, num_parameters)
            }
            Kind::Scaling {
                scale: inner,
                operand,
            } => operand.scaled_by(inner * scale),
            Kind::Negated(operand) => operand.scaled_by(-scale),
            Kind::Translation { vector, operand } => {
                operand.scaled_by(scale).translate(vector * scale)
            }
            Kind::Transformation { matrix, operand } => operand.transform(matrix * scale),
            Kind::Linear { origin, basis } => Self::trusted(
                Kind::Linear {
                    origin: origin * scale,
                    basis: basis * scale,
                },
                num_dimensions,
                num_parameters,
            ),
            Kind::Elliptical {
                origin,
                basis,
                convention,
            } => Self::trusted(
                Kind::Elliptical {
                    origin: origin * scale,
                    basis: basis * scale,
                    convention: convention.clone(),
                },
                num_dimensions,
                num_parameters,
            ),
            _ if scale == -1.0 => self.negated(),
            _ => Self::trusted(
                Kind::Scaling {
                    scale,
                    operand: self.clone(),
                },
                num_dimensions,
                num_parameters,
            ),
        }
    }

    /// `self + vector`
    pub fn translated_by(&self, vector: &DVector<f64>) -> Result<Expression> {
        if vector.len() != self.num_dimensions() {
            return Err(ExpressionError::dimension(
                OperationKind::Translation,
                format!(
                    "vector of length {} cannot translate a {}-dimensional expression",
                    vector.len(),
                    self.num_dimensions()
                ),
            ));
        }
        Ok(self.translate(vector.clone()))
    }

    /// `matrix * self`
    pub fn transformed_by(&self, matrix: &DMatrix<f64>) -> Result<Expression> {
        if matrix.ncols() != self.num_dimensions() || matrix.nrows() == 0 {
            return Err(ExpressionError::dimension(
                OperationKind::Transformation,
                format!(
                    "{}x{} matrix cannot transform a {}-dimensional expression",
                    matrix.nrows(),
                    matrix.ncols(),
                    self.num_dimensions()
                ),
            ));
        }
        Ok(self.transform(matrix.clone()))
    }

    /// Translation by a vector already known to match `num_dimensions`
    pub(crate) fn translate(&self, vector: DVector<f64>) -> Expression {
        if vector.iter().all(|value| *value == 0.0) {
            return self.clone();
        }
        let (num_dimensions, num_parameters) = (self.num_dimensions(), self.num_parameters());
        match self.kind() {
            Kind::Constant { value, .. } => {
                Self::constant_unchecked(value.values() + vector, num_parameters)
            }
            Kind::Translation {
                vector: inner,
                operand,
            } => operand.translate(inner + vector),
            Kind::Linear { origin, basis } => Self::trusted(
                Kind::Linear {
                    origin: origin + vector,
                    basis: basis.clone(),
                },
                num_dimensions,
                num_parameters,
            ),
            Kind::Elliptical {
                origin,
                basis,
                convention,
            } => Self::trusted(
                Kind::Elliptical {
                    origin: origin + vector,
                    basis: basis.clone(),
                    convention: convention.clone(),
                },
                num_dimensions,
                num_parameters,
            ),
            _ => Self::trusted(
                Kind::Translation {
                    vector,
                    operand: self.clone(),
                },
                num_dimensions,
                num_parameters,
            ),
        }
    }

    /// Transformation by a non-empty matrix already known to have
    /// `num_dimensions` columns
    pub(crate) fn transform(&self, matrix: DMatrix<f64>) -> Expression {
        let num_parameters = self.num_parameters();
        let num_rows = matrix.nrows();
        if num_rows == 1 && matrix.ncols() == 1 {
            return self.scaled_by(matrix[(0, 0)]);
        }
        if matrix.iter().all(|value| *value == 0.0) {
            return Self::constant_unchecked(DVector::zeros(num_rows), num_parameters);
        }
        if matrix.is_square() {
            let identity = DMatrix::<f64>::identity(num_rows, num_rows);
            if matrix == identity {
                return self.clone();
            }
            if matrix == -identity {
                return self.negated();
            }
        }
        match self.kind() {
            Kind::Constant { value, .. } => {
                Self::constant_unchecked(&matrix * value.values(), num_parameters)
            }
            Kind::Scaling { scale, operand } => operand.transform(matrix * *scale),
            Kind::Negated(operand) => operand.transform(-matrix),
            Kind::Transformation {
                matrix: inner,
                operand,
            } => operand.transform(matrix * inner),
            Kind::Translation { vector, operand } => {
                let offset = &matrix * vector;
                operand.transform(matrix).translate(offset)
            }
            Kind::Linear { origin, basis } => Self::trusted(
                Kind::Linear {
                    origin: &matrix * origin,
                    basis: &matrix * basis,
                },
                num_rows,
                num_parameters,
            ),
            Kind::Elliptical {
                origin,
                basis,
                convention,
            } => Self::trusted(
                Kind::Elliptical {
                    origin: &matrix * origin,
                    basis: &matrix * basis,
                    convention: convention.clone(),
                },
                num_rows,
                num_parameters,
            ),
            _ => Self::trusted(
                Kind::Transformation {
                    matrix,
                    operand: self.clone(),
                },
                num_rows,
                num_parameters,
            ),
        }
    }

    /// Component range of a validated, proper sub-range, pushed through
    /// nodes that act componentwise
    pub(crate) fn extract(&self, start: usize, count: usize) -> Result<Expression> {
        let num_parameters = self.num_parameters();
        match self.kind() {
            Kind::Constant { value, .. } => Ok(Self::constant_unchecked(
                value.values().rows(start, count).into_owned(),
                num_parameters,
            )),
            Kind::Identity { .. } if count == 1 => Self::parameter(start, num_parameters),
            Kind::Sum(a, b) => a.components(start, count)?.checked_add(&b.components(start, count)?),
            Kind::Difference(a, b) => {
                a.components(start, count)?.checked_sub(&b.components(start, count)?)
            }
            Kind::Negated(operand) => Ok(operand.components(start, count)?.negated()),
            Kind::Scaling { scale, operand } => {
                Ok(operand.components(start, count)?.scaled_by(*scale))
            }
            Kind::Translation { vector, operand } => Ok(operand
                .components(start, count)?
                .translate(vector.rows(start, count).into_owned())),
            Kind::Transformation { matrix, operand } => {
                Ok(operand.transform(matrix.rows(start, count).into_owned()))
            }
            Kind::Product(multiplier, multiplicand) => {
                multiplier.checked_mul(&multiplicand.components(start, count)?)
            }
            Kind::Quotient(dividend, divisor) => {
                dividend.components(start, count)?.checked_div(divisor)
            }
            Kind::Linear { origin, basis } => Self::linear(
                origin.rows(start, count).into_owned(),
                basis.rows(start, count).into_owned(),
            ),
            Kind::Elliptical {
                origin,
                basis,
                convention,
            } => Self::elliptical(
                origin.rows(start, count).into_owned(),
                basis.rows(start, count).into_owned(),
                convention.clone(),
            ),
            Kind::Concatenation(a, _) if start + count <= a.num_dimensions() => {
                a.components(start, count)
            }
            Kind::Concatenation(a, b) if start >= a.num_dimensions() => {
                b.components(start - a.num_dimensions(), count)
            }
            Kind::Components {
                operand,
                start: offset,
                ..
            } => operand.components(offset + start, count),
            _ => Self::from_kind(Kind::Components {
                operand: self.clone(),
                start,
                count,
            }),
        }
    }

    /// Substitute `inner` for the parameter vector: the result evaluates to
    /// `self(inner(p))` and takes `inner`'s parameters.
    pub fn composed_with(&self, inner: &Expression) -> Result<Expression> {
        if self.num_parameters() != inner.num_dimensions() {
            return Err(ExpressionError::arity(
                OperationKind::Composition,
                self.num_parameters(),
                inner.num_dimensions(),
            ));
        }
        if let Some(values) = inner.constant_values() {
            let parameters = DMatrix::from_column_slice(values.len(), 1, values.as_slice());
            if let Ok(result) = self.evaluate_with_tolerance(&parameters, DEFAULT_TOLERANCE) {
                return Ok(Self::constant_unchecked(
                    result.column(0).into_owned(),
                    inner.num_parameters(),
                ));
            }
        }
        let mut memo = AHashMap::new();
        self.compose_in(inner, &mut memo)
    }

    fn compose_in(
        &self,
        inner: &Expression,
        memo: &mut AHashMap<usize, Expression>,
    ) -> Result<Expression> {
        if let Some(done) = memo.get(&self.id()) {
            return Ok(done.clone());
        }
        let result = match self.kind() {
            Kind::Constant { value, .. } => {
                Self::constant_unchecked(value.values().clone(), inner.num_parameters())
            }
            Kind::Parameter { index, .. } => inner.component(*index)?,
            Kind::Identity { .. } => inner.clone(),
            Kind::Linear { origin, basis } => inner.transform(basis.clone()).translate(origin.clone()),
            Kind::Elliptical { .. } => Self::from_kind(Kind::Composition {
                outer: self.clone(),
                inner: inner.clone(),
            })?,
            Kind::Composition {
                outer,
                inner: nested,
            } => outer.composed_with(&nested.compose_in(inner, memo)?)?,
            _ => {
                let operands = self
                    .operands()
                    .into_iter()
                    .map(|operand| operand.compose_in(inner, memo))
                    .collect::<Result<Vec<_>>>()?;
                self.rebuild(&operands)?
            }
        };
        memo.insert(self.id(), result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};

    #[test]
    fn test_nested_scaling_composes() {
        let t = Expression::parameter(0, 1).unwrap();
        let e = t.sin().unwrap().scaled_by(2.0).scaled_by(3.0);
        match e.kind() {
            Kind::Scaling { scale, .. } => assert_relative_eq!(*scale, 6.0),
            other => panic!("expected scaling, got {:?}", other.operation_kind()),
        }
        assert!(t.scaled_by(1.0).ptr_eq(&t));
        assert!(t.scaled_by(0.0).is_zero());
    }

    #[test]
    fn test_transformation_collapses() {
        let t = Expression::parameter(0, 1).unwrap();
        let v = Expression::from_components(&[t.sin().unwrap(), t.cos().unwrap()]).unwrap();
        assert!(v.transformed_by(&DMatrix::identity(2, 2)).unwrap().ptr_eq(&v));
        assert!(v.transformed_by(&DMatrix::zeros(3, 2)).unwrap().is_zero());
        assert_eq!(
            v.transformed_by(&-DMatrix::<f64>::identity(2, 2))
                .unwrap()
                .operation_kind(),
            OperationKind::Negated
        );
        assert!(v.transformed_by(&DMatrix::identity(3, 3)).is_err());
    }

    #[test]
    fn test_linear_absorbs_transforms() {
        let line = Expression::linear(dvector![1.0, 2.0], dmatrix![1.0; 0.0]).unwrap();
        let moved = line
            .scaled_by(2.0)
            .translated_by(&dvector![1.0, 1.0])
            .unwrap()
            .transformed_by(&dmatrix![0.0, -1.0; 1.0, 0.0])
            .unwrap();
        assert_eq!(moved.operation_kind(), OperationKind::Linear);
        let value = moved.value_at(&[0.5]).unwrap();
        // scaled: (3, 4); translated: (4, 5); rotated: (-5, 4)
        assert_relative_eq!(value, dvector![-5.0, 4.0], epsilon = 1e-12);
    }

    #[test]
    fn test_components_push_down() {
        let t = Expression::parameter(0, 1).unwrap();
        let v = Expression::from_components(&[t.sin().unwrap(), t.cos().unwrap(), t.clone()])
            .unwrap();
        let shifted = v.translated_by(&dvector![1.0, 2.0, 3.0]).unwrap();
        let y = shifted.y().unwrap();
        assert_eq!(y.operation_kind(), OperationKind::Translation);
        assert!(v.z().unwrap().ptr_eq(&t));
    }

    #[test]
    fn test_composition_of_parameter_and_linear() {
        let u = Expression::parameter(0, 2).unwrap();
        let v = Expression::parameter(1, 2).unwrap();
        let f = u.checked_mul(&v).unwrap();

        let s = Expression::parameter(0, 1).unwrap();
        let g = Expression::from_components(&[s.clone(), s.sin().unwrap()]).unwrap();
        let composed = f.composed_with(&g).unwrap();
        assert_eq!(composed.num_parameters(), 1);
        let value = composed.value_at(&[0.7]).unwrap();
        assert_relative_eq!(value[0], 0.7 * 0.7f64.sin(), epsilon = 1e-12);

        let line = Expression::linear(dvector![0.0, 1.0], dmatrix![2.0; 3.0]).unwrap();
        let lifted = Expression::identity(2).unwrap().composed_with(&line).unwrap();
        assert!(lifted.ptr_eq(&line));
    }

    #[test]
    fn test_composition_with_constant_folds() {
        let u = Expression::parameter(0, 1).unwrap();
        let f = u.sin().unwrap();
        let c = Expression::scalar(std::f64::consts::FRAC_PI_2, 2);
        let folded = f.composed_with(&c).unwrap();
        assert!(folded.is_constant());
        assert_eq!(folded.num_parameters(), 2);
        assert_relative_eq!(folded.constant_values().unwrap()[0], 1.0);
    }

    #[test]
    fn test_composition_arity_mismatch() {
        let f = Expression::parameter(0, 2).unwrap();
        let g = Expression::parameter(0, 1).unwrap();
        assert!(f.composed_with(&g).unwrap_err().is_arity_error());
    }
}
