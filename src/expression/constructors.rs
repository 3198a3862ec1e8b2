// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Simplifying constructors
//!
//! Every constructor validates shapes first, then applies only rewrites that
//! are safe for all inputs. Constant operands fold when evaluating them
//! succeeds; an operation that would fail (such as division by zero) is kept
//! as a node so the failure surfaces at evaluation time.

use super::{Expression, Function, Kind, OperationKind};
use crate::error::{ExpressionError, Result};
use crate::numeric::{is_zero, DEFAULT_TOLERANCE};
use nalgebra::{DMatrix, DVector};

impl Expression {
    /// Constant vector independent of the parameters
    pub fn constant(values: &[f64], num_parameters: usize) -> Result<Expression> {
        Self::from_vector(DVector::from_column_slice(values), num_parameters)
    }

    pub fn from_vector(values: DVector<f64>, num_parameters: usize) -> Result<Expression> {
        if values.is_empty() {
            return Err(ExpressionError::dimension(
                OperationKind::Constant,
                "a constant needs at least one component",
            ));
        }
        Ok(Self::constant_unchecked(values, num_parameters))
    }

    pub fn scalar(value: f64, num_parameters: usize) -> Expression {
        Self::constant_unchecked(DVector::from_element(1, value), num_parameters)
    }

    pub fn zero(num_dimensions: usize, num_parameters: usize) -> Result<Expression> {
        Self::from_vector(DVector::zeros(num_dimensions), num_parameters)
    }

    /// The parameter at `index`, as a scalar expression
    pub fn parameter(index: usize, num_parameters: usize) -> Result<Expression> {
        Self::from_kind(Kind::Parameter {
            index,
            num_parameters,
        })
    }

    /// The whole parameter vector
    pub fn identity(num_parameters: usize) -> Result<Expression> {
        if num_parameters == 1 {
            return Self::parameter(0, 1);
        }
        Self::from_kind(Kind::Identity { num_parameters })
    }

    /// Stack expressions into one vector, in order
    pub fn from_components(components: &[Expression]) -> Result<Expression> {
        let (first, rest) = components.split_first().ok_or_else(|| {
            ExpressionError::dimension(OperationKind::Concatenation, "no components given")
        })?;
        rest.iter()
            .try_fold(first.clone(), |stacked, component| stacked.concatenate(component))
    }

    /// `origin + basis * parameters`
    pub fn linear(origin: DVector<f64>, basis: DMatrix<f64>) -> Result<Expression> {
        Self::from_kind(Kind::Linear { origin, basis })
    }

    /// `origin + basis * local`, where the local coordinates are built from
    /// products of sines and cosines of the parameters. `convention[i]`
    /// selects whether angle `i` contributes its cosine to its own row.
    pub fn elliptical(
        origin: DVector<f64>,
        basis: DMatrix<f64>,
        convention: Vec<bool>,
    ) -> Result<Expression> {
        Self::from_kind(Kind::Elliptical {
            origin,
            basis,
            convention,
        })
    }

    pub fn negated(&self) -> Expression {
        match self.kind() {
            Kind::Constant { value, .. } => {
                Self::constant_unchecked(-value.values(), self.num_parameters())
            }
            Kind::Negated(operand) => operand.clone(),
            Kind::Scaling { scale, operand } => operand.scaled_by(-scale),
            _ => Self::trusted(
                Kind::Negated(self.clone()),
                self.num_dimensions(),
                self.num_parameters(),
            ),
        }
    }

    pub fn checked_add(&self, other: &Expression) -> Result<Expression> {
        let kind = Kind::Sum(self.clone(), other.clone());
        kind.shape()?;
        if self.is_zero() {
            return Ok(other.clone());
        }
        if other.is_zero() {
            return Ok(self.clone());
        }
        match (self.constant_values(), other.constant_values()) {
            (Some(a), Some(b)) => Ok(Self::constant_unchecked(a + b, self.num_parameters())),
            (Some(a), None) => Ok(other.translate(a.clone())),
            (None, Some(b)) => Ok(self.translate(b.clone())),
            (None, None) => Self::from_kind(kind),
        }
    }

    pub fn checked_sub(&self, other: &Expression) -> Result<Expression> {
        let kind = Kind::Difference(self.clone(), other.clone());
        kind.shape()?;
        if self.is_duplicate_of(other) {
            return Ok(self.zero_like());
        }
        if other.is_zero() {
            return Ok(self.clone());
        }
        if self.is_zero() {
            return Ok(other.negated());
        }
        match (self.constant_values(), other.constant_values()) {
            (Some(a), Some(b)) => Ok(Self::constant_unchecked(a - b, self.num_parameters())),
            (Some(a), None) => Ok(other.negated().translate(a.clone())),
            (None, Some(b)) => Ok(self.translate(-b)),
            (None, None) => Self::from_kind(kind),
        }
    }

    /// Product of a scalar with a vector (or of two scalars); whichever
    /// operand is 1-dimensional becomes the multiplier
    pub fn checked_mul(&self, other: &Expression) -> Result<Expression> {
        let (multiplier, multiplicand) = if self.num_dimensions() == 1 {
            (self, other)
        } else if other.num_dimensions() == 1 {
            (other, self)
        } else {
            return Err(ExpressionError::dimension(
                OperationKind::Product,
                format!(
                    "one operand must be 1-dimensional, found {} and {}",
                    self.num_dimensions(),
                    other.num_dimensions()
                ),
            ));
        };
        let kind = Kind::Product(multiplier.clone(), multiplicand.clone());
        kind.shape()?;
        if let Some(scale) = multiplier.constant_values() {
            return Ok(multiplicand.scaled_by(scale[0]));
        }
        if multiplicand.num_dimensions() == 1 {
            if let Some(scale) = multiplicand.constant_values() {
                return Ok(multiplier.scaled_by(scale[0]));
            }
        }
        if multiplicand.is_zero() {
            return Ok(multiplicand.clone());
        }
        Self::from_kind(kind)
    }

    /// Division by a scalar expression. A constant divisor becomes a scaling
    /// unless it is within [`DEFAULT_TOLERANCE`] of zero; such a quotient is
    /// left for evaluation, which applies the caller's tolerance.
    pub fn checked_div(&self, divisor: &Expression) -> Result<Expression> {
        let kind = Kind::Quotient(self.clone(), divisor.clone());
        kind.shape()?;
        if let Some(value) = divisor.constant_values() {
            if !is_zero(value[0]) {
                return Ok(self.scaled_by(1.0 / value[0]));
            }
        }
        Self::from_kind(kind)
    }

    pub fn dot(&self, other: &Expression) -> Result<Expression> {
        let kind = Kind::DotProduct(self.clone(), other.clone());
        kind.shape()?;
        if self.num_dimensions() == 1 {
            return self.checked_mul(other);
        }
        if self.is_zero() || other.is_zero() {
            return Ok(Self::scalar(0.0, self.num_parameters()));
        }
        Self::from_kind(kind).map(Expression::fold)
    }

    pub fn cross(&self, other: &Expression) -> Result<Expression> {
        let kind = Kind::CrossProduct(self.clone(), other.clone());
        kind.shape()?;
        if self.is_zero() || other.is_zero() || self.is_duplicate_of(other) {
            return Ok(self.zero_like());
        }
        Self::from_kind(kind).map(Expression::fold)
    }

    pub fn norm(&self) -> Expression {
        if let Kind::Normalized(_) = self.kind() {
            return Self::scalar(1.0, self.num_parameters());
        }
        Self::trusted(Kind::Norm(self.clone()), 1, self.num_parameters()).fold()
    }

    pub fn squared_norm(&self) -> Expression {
        Self::trusted(Kind::SquaredNorm(self.clone()), 1, self.num_parameters()).fold()
    }

    pub fn normalized(&self) -> Expression {
        if let Kind::Normalized(_) = self.kind() {
            return self.clone();
        }
        Self::trusted(
            Kind::Normalized(self.clone()),
            self.num_dimensions(),
            self.num_parameters(),
        )
        .fold()
    }

    pub fn sqrt(&self) -> Result<Expression> {
        self.apply(Function::Sqrt)
    }

    pub fn sin(&self) -> Result<Expression> {
        self.apply(Function::Sin)
    }

    pub fn cos(&self) -> Result<Expression> {
        self.apply(Function::Cos)
    }

    pub fn tan(&self) -> Result<Expression> {
        self.apply(Function::Tan)
    }

    pub fn asin(&self) -> Result<Expression> {
        self.apply(Function::Arcsin)
    }

    pub fn acos(&self) -> Result<Expression> {
        self.apply(Function::Arccos)
    }

    pub fn exp(&self) -> Result<Expression> {
        self.apply(Function::Exp)
    }

    pub fn ln(&self) -> Result<Expression> {
        self.apply(Function::Log)
    }

    pub(crate) fn apply(&self, function: Function) -> Result<Expression> {
        Self::from_kind(Kind::Function(function, self.clone())).map(Expression::fold)
    }

    /// `self` raised to a scalar exponent expression
    pub fn pow(&self, exponent: &Expression) -> Result<Expression> {
        let kind = Kind::Power(self.clone(), exponent.clone());
        kind.shape()?;
        if let Some(value) = exponent.constant_values() {
            if value[0] == 1.0 {
                return Ok(self.clone());
            }
            if value[0] == 0.0 {
                return Ok(Self::scalar(1.0, self.num_parameters()));
            }
        }
        Self::from_kind(kind).map(Expression::fold)
    }

    /// `self` followed by the components of `other`
    pub fn concatenate(&self, other: &Expression) -> Result<Expression> {
        Self::from_kind(Kind::Concatenation(self.clone(), other.clone())).map(Expression::fold)
    }

    /// Contiguous range of components
    pub fn components(&self, start: usize, count: usize) -> Result<Expression> {
        Kind::Components {
            operand: self.clone(),
            start,
            count,
        }
        .shape()?;
        if start == 0 && count == self.num_dimensions() {
            return Ok(self.clone());
        }
        self.extract(start, count)
    }

    pub fn component(&self, index: usize) -> Result<Expression> {
        self.components(index, 1)
    }

    pub fn x(&self) -> Result<Expression> {
        self.component(0)
    }

    pub fn y(&self) -> Result<Expression> {
        self.component(1)
    }

    pub fn z(&self) -> Result<Expression> {
        self.component(2)
    }

    /// Replace a constant-operand node with its value when evaluating it
    /// succeeds
    pub(crate) fn fold(self) -> Expression {
        let foldable = {
            let operands = self.operands();
            !operands.is_empty() && operands.iter().all(|operand| operand.is_constant())
        };
        if !foldable {
            return self;
        }
        let parameters = DMatrix::<f64>::zeros(self.num_parameters(), 1);
        match self.evaluate_with_tolerance(&parameters, DEFAULT_TOLERANCE) {
            Ok(values) => {
                Self::constant_unchecked(values.column(0).into_owned(), self.num_parameters())
            }
            Err(_) => self,
        }
    }

    /// Rebuild a node of the same kind over new operands, given in the order
    /// of `operands()`, re-applying construction rewrites
    pub(crate) fn rebuild(&self, operands: &[Expression]) -> Result<Expression> {
        match self.kind() {
            Kind::Constant { .. }
            | Kind::Parameter { .. }
            | Kind::Identity { .. }
            | Kind::Linear { .. }
            | Kind::Elliptical { .. } => Ok(self.clone()),
            Kind::Negated(_) => Ok(operands[0].negated()),
            Kind::Sum(..) => operands[0].checked_add(&operands[1]),
            Kind::Difference(..) => operands[0].checked_sub(&operands[1]),
            Kind::Product(..) => operands[0].checked_mul(&operands[1]),
            Kind::Quotient(..) => operands[0].checked_div(&operands[1]),
            Kind::DotProduct(..) => operands[0].dot(&operands[1]),
            Kind::CrossProduct(..) => operands[0].cross(&operands[1]),
            Kind::Norm(_) => Ok(operands[0].norm()),
            Kind::SquaredNorm(_) => Ok(operands[0].squared_norm()),
            Kind::Normalized(_) => Ok(operands[0].normalized()),
            Kind::Function(function, _) => operands[0].apply(*function),
            Kind::Power(..) => operands[0].pow(&operands[1]),
            Kind::Components { start, count, .. } => operands[0].components(*start, *count),
            Kind::Concatenation(..) => operands[0].concatenate(&operands[1]),
            Kind::Scaling { scale, .. } => Ok(operands[0].scaled_by(*scale)),
            Kind::Translation { vector, .. } => operands[0].translated_by(vector),
            Kind::Transformation { matrix, .. } => operands[0].transformed_by(matrix),
            Kind::Composition { .. } => operands[1].composed_with(&operands[0]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn test_sum_with_constant_becomes_translation() {
        let t = Expression::parameter(0, 1).unwrap();
        let e = t.checked_add(&Expression::scalar(2.0, 1)).unwrap();
        assert_eq!(e.operation_kind(), OperationKind::Translation);

        let zero = Expression::scalar(0.0, 1);
        assert!(t.checked_add(&zero).unwrap().ptr_eq(&t));
    }

    #[test]
    fn test_product_rewrites() {
        let t = Expression::parameter(0, 1).unwrap();
        let v = Expression::constant(&[1.0, 2.0], 1).unwrap();
        let e = v.checked_mul(&t).unwrap();
        assert_eq!(e.operation_kind(), OperationKind::Product);
        assert_eq!(e.num_dimensions(), 2);

        let scaled = Expression::scalar(3.0, 1).checked_mul(&t).unwrap();
        assert_eq!(scaled.operation_kind(), OperationKind::Scaling);

        let zero = Expression::scalar(0.0, 1).checked_mul(&t).unwrap();
        assert!(zero.is_zero());

        let w = Expression::constant(&[1.0, 2.0], 1).unwrap();
        assert!(v.checked_mul(&w).unwrap_err().is_dimension_error());
    }

    #[test]
    fn test_division_by_zero_constant_not_folded() {
        let one = Expression::scalar(1.0, 1);
        let zero = Expression::scalar(0.0, 1);
        let q = one.checked_div(&zero).unwrap();
        assert_eq!(q.operation_kind(), OperationKind::Quotient);
        assert!(q.evaluate(&DMatrix::from_element(1, 1, 0.5)).is_err());
    }

    #[test]
    fn test_self_difference_and_cross() {
        let t = Expression::parameter(0, 1).unwrap();
        let v = Expression::from_components(&[t.clone(), t.sin().unwrap(), t.cos().unwrap()])
            .unwrap();
        assert!(v.checked_sub(&v).unwrap().is_zero());
        assert!(v.cross(&v).unwrap().is_zero());
        assert!(t.negated().negated().ptr_eq(&t));
    }

    #[test]
    fn test_constant_folding() {
        let a = Expression::constant(&[1.0, 0.0, 0.0], 0).unwrap();
        let b = Expression::constant(&[0.0, 1.0, 0.0], 0).unwrap();
        let c = a.cross(&b).unwrap();
        assert_eq!(c.constant_values(), Some(&dvector![0.0, 0.0, 1.0]));

        let n = Expression::constant(&[3.0, 4.0], 0).unwrap().norm();
        assert_eq!(n.constant_values(), Some(&dvector![5.0]));

        let bad = Expression::scalar(-1.0, 0).ln().unwrap();
        assert_eq!(bad.operation_kind(), OperationKind::Log);
    }

    #[test]
    fn test_norm_of_normalized() {
        let t = Expression::parameter(0, 1).unwrap();
        let v = Expression::from_components(&[t.clone(), Expression::scalar(1.0, 1)]).unwrap();
        let n = v.normalized();
        assert!(n.normalized().ptr_eq(&n));
        assert_eq!(n.norm().constant_values(), Some(&dvector![1.0]));
    }

    #[test]
    fn test_shape_errors() {
        let a = Expression::parameter(0, 1).unwrap();
        let b = Expression::parameter(0, 2).unwrap();
        assert!(a.checked_add(&b).unwrap_err().is_arity_error());

        let v = Expression::constant(&[1.0, 2.0], 1).unwrap();
        assert!(v.sin().unwrap_err().is_dimension_error());
        assert!(v.components(1, 2).unwrap_err().is_dimension_error());
        assert!(a.checked_div(&v).unwrap_err().is_dimension_error());
        assert!(Expression::from_components(&[]).is_err());
    }
}
