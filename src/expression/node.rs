// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Expression node definitions

use super::Expression;
use crate::error::{ExpressionError, Result};
use crate::numeric::Interval;
use ahash::RandomState;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

/// Operation tag of an expression node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Constant,
    Parameter,
    Identity,
    Negated,
    Sum,
    Difference,
    Product,
    Quotient,
    DotProduct,
    CrossProduct,
    Norm,
    SquaredNorm,
    Normalized,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Exp,
    Log,
    Power,
    Components,
    Concatenation,
    Scaling,
    Translation,
    Transformation,
    Composition,
    Linear,
    Elliptical,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Elementwise scalar functions of a single 1-D operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Function {
    Sqrt,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Exp,
    Log,
}

impl Function {
    pub(crate) fn operation_kind(self) -> OperationKind {
        match self {
            Function::Sqrt => OperationKind::Sqrt,
            Function::Sin => OperationKind::Sin,
            Function::Cos => OperationKind::Cos,
            Function::Tan => OperationKind::Tan,
            Function::Arcsin => OperationKind::Arcsin,
            Function::Arccos => OperationKind::Arccos,
            Function::Exp => OperationKind::Exp,
            Function::Log => OperationKind::Log,
        }
    }

    pub(crate) fn from_operation_kind(kind: OperationKind) -> Option<Self> {
        match kind {
            OperationKind::Sqrt => Some(Function::Sqrt),
            OperationKind::Sin => Some(Function::Sin),
            OperationKind::Cos => Some(Function::Cos),
            OperationKind::Tan => Some(Function::Tan),
            OperationKind::Arcsin => Some(Function::Arcsin),
            OperationKind::Arccos => Some(Function::Arccos),
            OperationKind::Exp => Some(Function::Exp),
            OperationKind::Log => Some(Function::Log),
            _ => None,
        }
    }
}

/// Stored value of a constant node, kept in both number types so evaluation
/// can hand out a borrowed column in either mode
#[derive(Debug, Clone)]
pub struct ConstantValue {
    values: DVector<f64>,
    bounds: Vec<Interval>,
}

impl ConstantValue {
    pub fn new(values: DVector<f64>) -> Self {
        let bounds = values.iter().copied().map(Interval::singleton).collect();
        Self { values, bounds }
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn bounds(&self) -> &[Interval] {
        &self.bounds
    }
}

/// Variant payload and operands of a node
#[derive(Debug, Clone)]
pub(crate) enum Kind {
    Constant {
        value: ConstantValue,
        num_parameters: usize,
    },
    Parameter {
        index: usize,
        num_parameters: usize,
    },
    Identity {
        num_parameters: usize,
    },
    Negated(Expression),
    Sum(Expression, Expression),
    Difference(Expression, Expression),
    /// Scalar multiplier first
    Product(Expression, Expression),
    /// Scalar divisor second
    Quotient(Expression, Expression),
    DotProduct(Expression, Expression),
    CrossProduct(Expression, Expression),
    Norm(Expression),
    SquaredNorm(Expression),
    Normalized(Expression),
    Function(Function, Expression),
    Power(Expression, Expression),
    Components {
        operand: Expression,
        start: usize,
        count: usize,
    },
    Concatenation(Expression, Expression),
    Scaling {
        scale: f64,
        operand: Expression,
    },
    Translation {
        vector: DVector<f64>,
        operand: Expression,
    },
    Transformation {
        matrix: DMatrix<f64>,
        operand: Expression,
    },
    Composition {
        outer: Expression,
        inner: Expression,
    },
    Linear {
        origin: DVector<f64>,
        basis: DMatrix<f64>,
    },
    /// `basis` has one more column than there are parameters; a `true`
    /// convention flag puts the cosine on that axis' own row.
    Elliptical {
        origin: DVector<f64>,
        basis: DMatrix<f64>,
        convention: Vec<bool>,
    },
}

impl Kind {
    pub(crate) fn operation_kind(&self) -> OperationKind {
        match self {
            Kind::Constant { .. } => OperationKind::Constant,
            Kind::Parameter { .. } => OperationKind::Parameter,
            Kind::Identity { .. } => OperationKind::Identity,
            Kind::Negated(_) => OperationKind::Negated,
            Kind::Sum(..) => OperationKind::Sum,
            Kind::Difference(..) => OperationKind::Difference,
            Kind::Product(..) => OperationKind::Product,
            Kind::Quotient(..) => OperationKind::Quotient,
            Kind::DotProduct(..) => OperationKind::DotProduct,
            Kind::CrossProduct(..) => OperationKind::CrossProduct,
            Kind::Norm(_) => OperationKind::Norm,
            Kind::SquaredNorm(_) => OperationKind::SquaredNorm,
            Kind::Normalized(_) => OperationKind::Normalized,
            Kind::Function(function, _) => function.operation_kind(),
            Kind::Power(..) => OperationKind::Power,
            Kind::Components { .. } => OperationKind::Components,
            Kind::Concatenation(..) => OperationKind::Concatenation,
            Kind::Scaling { .. } => OperationKind::Scaling,
            Kind::Translation { .. } => OperationKind::Translation,
            Kind::Transformation { .. } => OperationKind::Transformation,
            Kind::Composition { .. } => OperationKind::Composition,
            Kind::Linear { .. } => OperationKind::Linear,
            Kind::Elliptical { .. } => OperationKind::Elliptical,
        }
    }

    /// Child nodes in evaluation order
    pub(crate) fn operands(&self) -> Vec<&Expression> {
        match self {
            Kind::Constant { .. }
            | Kind::Parameter { .. }
            | Kind::Identity { .. }
            | Kind::Linear { .. }
            | Kind::Elliptical { .. } => Vec::new(),
            Kind::Negated(a)
            | Kind::Norm(a)
            | Kind::SquaredNorm(a)
            | Kind::Normalized(a)
            | Kind::Function(_, a)
            | Kind::Components { operand: a, .. }
            | Kind::Scaling { operand: a, .. }
            | Kind::Translation { operand: a, .. }
            | Kind::Transformation { operand: a, .. } => vec![a],
            Kind::Sum(a, b)
            | Kind::Difference(a, b)
            | Kind::Product(a, b)
            | Kind::Quotient(a, b)
            | Kind::DotProduct(a, b)
            | Kind::CrossProduct(a, b)
            | Kind::Power(a, b)
            | Kind::Concatenation(a, b) => vec![a, b],
            Kind::Composition { outer, inner } => vec![inner, outer],
        }
    }

    /// Same payload with replaced operands, given in the order of `operands()`
    pub(crate) fn with_operands(&self, operands: &[Expression]) -> Kind {
        let first = || operands[0].clone();
        let second = || operands[1].clone();
        match self {
            Kind::Constant { .. }
            | Kind::Parameter { .. }
            | Kind::Identity { .. }
            | Kind::Linear { .. }
            | Kind::Elliptical { .. } => self.clone(),
            Kind::Negated(_) => Kind::Negated(first()),
            Kind::Sum(..) => Kind::Sum(first(), second()),
            Kind::Difference(..) => Kind::Difference(first(), second()),
            Kind::Product(..) => Kind::Product(first(), second()),
            Kind::Quotient(..) => Kind::Quotient(first(), second()),
            Kind::DotProduct(..) => Kind::DotProduct(first(), second()),
            Kind::CrossProduct(..) => Kind::CrossProduct(first(), second()),
            Kind::Norm(_) => Kind::Norm(first()),
            Kind::SquaredNorm(_) => Kind::SquaredNorm(first()),
            Kind::Normalized(_) => Kind::Normalized(first()),
            Kind::Function(function, _) => Kind::Function(*function, first()),
            Kind::Power(..) => Kind::Power(first(), second()),
            Kind::Components { start, count, .. } => Kind::Components {
                operand: first(),
                start: *start,
                count: *count,
            },
            Kind::Concatenation(..) => Kind::Concatenation(first(), second()),
            Kind::Scaling { scale, .. } => Kind::Scaling {
                scale: *scale,
                operand: first(),
            },
            Kind::Translation { vector, .. } => Kind::Translation {
                vector: vector.clone(),
                operand: first(),
            },
            Kind::Transformation { matrix, .. } => Kind::Transformation {
                matrix: matrix.clone(),
                operand: first(),
            },
            Kind::Composition { .. } => Kind::Composition {
                inner: first(),
                outer: second(),
            },
        }
    }

    /// Operand order does not matter for duplicate detection.
    ///
    /// Sum and DotProduct always commute; Product only when both operands are
    /// scalars, since otherwise the operand roles are fixed by shape.
    pub(crate) fn is_commutative(&self) -> bool {
        match self {
            Kind::Sum(..) | Kind::DotProduct(..) => true,
            Kind::Product(a, b) => a.num_dimensions() == 1 && b.num_dimensions() == 1,
            _ => false,
        }
    }

    /// Bit patterns of every scalar in the payload, with `-0.0` folded into
    /// `0.0`. Two payloads are equal exactly when these sequences are.
    pub(crate) fn payload_bits(&self) -> Vec<u64> {
        let mut bits = Vec::new();
        match self {
            Kind::Constant { value, .. } => push_values(&mut bits, value.values().as_slice()),
            Kind::Parameter { index, .. } => bits.push(*index as u64),
            Kind::Function(function, _) => bits.push(function.operation_kind() as u64),
            Kind::Components { start, count, .. } => {
                bits.push(*start as u64);
                bits.push(*count as u64);
            }
            Kind::Scaling { scale, .. } => push_values(&mut bits, &[*scale]),
            Kind::Translation { vector, .. } => push_values(&mut bits, vector.as_slice()),
            Kind::Transformation { matrix, .. } => {
                bits.push(matrix.nrows() as u64);
                push_values(&mut bits, matrix.as_slice());
            }
            Kind::Linear { origin, basis } => {
                push_values(&mut bits, origin.as_slice());
                push_values(&mut bits, basis.as_slice());
            }
            Kind::Elliptical {
                origin,
                basis,
                convention,
            } => {
                push_values(&mut bits, origin.as_slice());
                push_values(&mut bits, basis.as_slice());
                bits.extend(convention.iter().map(|flag| *flag as u64));
            }
            _ => {}
        }
        bits
    }

    /// Validate operand shapes, returning `(num_dimensions, num_parameters)`
    pub(crate) fn shape(&self) -> Result<(usize, usize)> {
        let operation = self.operation_kind();
        match self {
            Kind::Constant {
                value,
                num_parameters,
            } => {
                if value.values().is_empty() {
                    return Err(ExpressionError::dimension(
                        operation,
                        "a constant needs at least one component",
                    ));
                }
                Ok((value.values().len(), *num_parameters))
            }
            Kind::Parameter {
                index,
                num_parameters,
            } => {
                if index >= num_parameters {
                    return Err(ExpressionError::ParameterIndex {
                        index: *index,
                        num_parameters: *num_parameters,
                    });
                }
                Ok((1, *num_parameters))
            }
            Kind::Identity { num_parameters } => {
                if *num_parameters == 0 {
                    return Err(ExpressionError::dimension(
                        operation,
                        "identity needs at least one parameter",
                    ));
                }
                Ok((*num_parameters, *num_parameters))
            }
            Kind::Negated(a) | Kind::Normalized(a) => Ok((a.num_dimensions(), a.num_parameters())),
            Kind::Norm(a) | Kind::SquaredNorm(a) => Ok((1, a.num_parameters())),
            Kind::Function(_, a) => {
                require_scalar(operation, a, "operand")?;
                Ok((1, a.num_parameters()))
            }
            Kind::Sum(a, b) | Kind::Difference(a, b) => {
                let num_parameters = same_arity(operation, a, b)?;
                if a.num_dimensions() != b.num_dimensions() {
                    return Err(ExpressionError::dimension(
                        operation,
                        format!(
                            "operand dimensions {} and {} differ",
                            a.num_dimensions(),
                            b.num_dimensions()
                        ),
                    ));
                }
                Ok((a.num_dimensions(), num_parameters))
            }
            Kind::Product(multiplier, multiplicand) => {
                let num_parameters = same_arity(operation, multiplier, multiplicand)?;
                require_scalar(operation, multiplier, "multiplier")?;
                Ok((multiplicand.num_dimensions(), num_parameters))
            }
            Kind::Quotient(dividend, divisor) => {
                let num_parameters = same_arity(operation, dividend, divisor)?;
                require_scalar(operation, divisor, "divisor")?;
                Ok((dividend.num_dimensions(), num_parameters))
            }
            Kind::DotProduct(a, b) => {
                let num_parameters = same_arity(operation, a, b)?;
                if a.num_dimensions() != b.num_dimensions() {
                    return Err(ExpressionError::dimension(
                        operation,
                        format!(
                            "operand dimensions {} and {} differ",
                            a.num_dimensions(),
                            b.num_dimensions()
                        ),
                    ));
                }
                Ok((1, num_parameters))
            }
            Kind::CrossProduct(a, b) => {
                let num_parameters = same_arity(operation, a, b)?;
                if a.num_dimensions() != 3 || b.num_dimensions() != 3 {
                    return Err(ExpressionError::dimension(
                        operation,
                        format!(
                            "operands must be 3-dimensional, found {} and {}",
                            a.num_dimensions(),
                            b.num_dimensions()
                        ),
                    ));
                }
                Ok((3, num_parameters))
            }
            Kind::Power(base, exponent) => {
                let num_parameters = same_arity(operation, base, exponent)?;
                require_scalar(operation, base, "base")?;
                require_scalar(operation, exponent, "exponent")?;
                Ok((1, num_parameters))
            }
            Kind::Components {
                operand,
                start,
                count,
            } => {
                if *count == 0 || start + count > operand.num_dimensions() {
                    return Err(ExpressionError::dimension(
                        operation,
                        format!(
                            "components {}..{} out of range for {} dimensions",
                            start,
                            start + count,
                            operand.num_dimensions()
                        ),
                    ));
                }
                Ok((*count, operand.num_parameters()))
            }
            Kind::Concatenation(a, b) => {
                let num_parameters = same_arity(operation, a, b)?;
                Ok((a.num_dimensions() + b.num_dimensions(), num_parameters))
            }
            Kind::Scaling { operand, .. } => {
                Ok((operand.num_dimensions(), operand.num_parameters()))
            }
            Kind::Translation { vector, operand } => {
                if vector.len() != operand.num_dimensions() {
                    return Err(ExpressionError::dimension(
                        operation,
                        format!(
                            "vector of length {} cannot translate a {}-dimensional operand",
                            vector.len(),
                            operand.num_dimensions()
                        ),
                    ));
                }
                Ok((operand.num_dimensions(), operand.num_parameters()))
            }
            Kind::Transformation { matrix, operand } => {
                if matrix.ncols() != operand.num_dimensions() || matrix.nrows() == 0 {
                    return Err(ExpressionError::dimension(
                        operation,
                        format!(
                            "{}x{} matrix cannot transform a {}-dimensional operand",
                            matrix.nrows(),
                            matrix.ncols(),
                            operand.num_dimensions()
                        ),
                    ));
                }
                Ok((matrix.nrows(), operand.num_parameters()))
            }
            Kind::Composition { outer, inner } => {
                if outer.num_parameters() != inner.num_dimensions() {
                    return Err(ExpressionError::arity(
                        operation,
                        outer.num_parameters(),
                        inner.num_dimensions(),
                    ));
                }
                Ok((outer.num_dimensions(), inner.num_parameters()))
            }
            Kind::Linear { origin, basis } => {
                if origin.is_empty() || basis.nrows() != origin.len() || basis.ncols() == 0 {
                    return Err(ExpressionError::dimension(
                        operation,
                        format!(
                            "{}x{} basis does not match an origin of length {}",
                            basis.nrows(),
                            basis.ncols(),
                            origin.len()
                        ),
                    ));
                }
                Ok((origin.len(), basis.ncols()))
            }
            Kind::Elliptical {
                origin,
                basis,
                convention,
            } => {
                if origin.is_empty()
                    || convention.is_empty()
                    || basis.nrows() != origin.len()
                    || basis.ncols() != convention.len() + 1
                {
                    return Err(ExpressionError::dimension(
                        operation,
                        format!(
                            "{}x{} basis does not match an origin of length {} and {} angles",
                            basis.nrows(),
                            basis.ncols(),
                            origin.len(),
                            convention.len()
                        ),
                    ));
                }
                Ok((origin.len(), convention.len()))
            }
        }
    }
}

fn push_values(bits: &mut Vec<u64>, values: &[f64]) {
    bits.extend(values.iter().map(|value| {
        if *value == 0.0 {
            0u64
        } else {
            value.to_bits()
        }
    }));
}

fn same_arity(operation: OperationKind, a: &Expression, b: &Expression) -> Result<usize> {
    if a.num_parameters() != b.num_parameters() {
        return Err(ExpressionError::arity(
            operation,
            a.num_parameters(),
            b.num_parameters(),
        ));
    }
    Ok(a.num_parameters())
}

fn require_scalar(operation: OperationKind, operand: &Expression, role: &str) -> Result<()> {
    if operand.num_dimensions() != 1 {
        return Err(ExpressionError::dimension(
            operation,
            format!(
                "{} must be 1-dimensional, found {} dimensions",
                role,
                operand.num_dimensions()
            ),
        ));
    }
    Ok(())
}

/// Immutable node behind an [`Expression`] handle
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) kind: Kind,
    pub(crate) num_dimensions: usize,
    pub(crate) num_parameters: usize,
    /// Structural hash, consistent with `Expression::is_duplicate_of`
    pub(crate) hash: u64,
}

const HASH_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

impl Node {
    pub(crate) fn new(kind: Kind) -> Result<Self> {
        let (num_dimensions, num_parameters) = kind.shape()?;
        let hash = structural_hash(&kind, num_dimensions, num_parameters);
        Ok(Self {
            kind,
            num_dimensions,
            num_parameters,
            hash,
        })
    }

    /// Node whose shape the caller has already established
    pub(crate) fn trusted(kind: Kind, num_dimensions: usize, num_parameters: usize) -> Self {
        debug_assert_eq!(kind.shape().ok(), Some((num_dimensions, num_parameters)));
        let hash = structural_hash(&kind, num_dimensions, num_parameters);
        Self {
            kind,
            num_dimensions,
            num_parameters,
            hash,
        }
    }
}

fn structural_hash(kind: &Kind, num_dimensions: usize, num_parameters: usize) -> u64 {
    let state = RandomState::with_seeds(HASH_SEEDS[0], HASH_SEEDS[1], HASH_SEEDS[2], HASH_SEEDS[3]);
    let mut hasher = state.build_hasher();
    kind.operation_kind().hash(&mut hasher);
    num_dimensions.hash(&mut hasher);
    num_parameters.hash(&mut hasher);
    kind.payload_bits().hash(&mut hasher);

    let mut operand_hashes: Vec<u64> = kind.operands().iter().map(|e| e.structural_hash()).collect();
    if kind.is_commutative() {
        operand_hashes.sort_unstable();
    }
    operand_hashes.hash(&mut hasher);
    hasher.finish()
}
