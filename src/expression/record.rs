// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Serialized form of an expression tree

use super::{ConstantValue, Expression, Function, Kind, OperationKind};
use crate::error::{ExpressionError, Result};
use ahash::AHashMap;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Flat, self-describing record of one node and its operands.
///
/// Shared subtrees are written once per reference, so a DAG with heavy
/// sharing (repeated squaring, say) expands exponentially when written.
/// [`Expression::record_count`] gives the number of records up front.
/// Reading a record back validates every node's shape but applies no
/// simplification, so the result is a duplicate of the tree that was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionRecord {
    pub kind: OperationKind,
    pub num_parameters: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<DMatrix<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convention: Option<Vec<bool>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operands: Vec<ExpressionRecord>,
}

impl ExpressionRecord {
    fn bare(kind: OperationKind, num_parameters: usize) -> Self {
        Self {
            kind,
            num_parameters,
            values: None,
            matrix: None,
            scale: None,
            index: None,
            count: None,
            convention: None,
            operands: Vec::new(),
        }
    }

    fn missing(&self, field: &str) -> ExpressionError {
        ExpressionError::dimension(self.kind, format!("record has no `{field}`"))
    }

    fn vector(&self) -> Result<DVector<f64>> {
        self.values
            .as_ref()
            .map(|values| DVector::from_column_slice(values))
            .ok_or_else(|| self.missing("values"))
    }

    fn matrix(&self) -> Result<DMatrix<f64>> {
        self.matrix.clone().ok_or_else(|| self.missing("matrix"))
    }

    fn index(&self) -> Result<usize> {
        self.index.ok_or_else(|| self.missing("index"))
    }
}

impl Expression {
    /// Number of records serializing this expression writes. Saturates at
    /// `usize::MAX`.
    pub fn record_count(&self) -> usize {
        fn count(expression: &Expression, memo: &mut AHashMap<usize, usize>) -> usize {
            if let Some(&done) = memo.get(&expression.id()) {
                return done;
            }
            let total = expression
                .operands()
                .into_iter()
                .fold(1usize, |total, operand| total.saturating_add(count(operand, memo)));
            memo.insert(expression.id(), total);
            total
        }
        count(self, &mut AHashMap::new())
    }
}

impl From<Expression> for ExpressionRecord {
    fn from(expression: Expression) -> Self {
        ExpressionRecord::from(&expression)
    }
}

impl From<&Expression> for ExpressionRecord {
    fn from(expression: &Expression) -> Self {
        let mut record = ExpressionRecord::bare(expression.operation_kind(), expression.num_parameters());
        match expression.kind() {
            Kind::Constant { value, .. } => {
                record.values = Some(value.values().as_slice().to_vec());
            }
            Kind::Parameter { index, .. } => record.index = Some(*index),
            Kind::Components { start, count, .. } => {
                record.index = Some(*start);
                record.count = Some(*count);
            }
            Kind::Scaling { scale, .. } => record.scale = Some(*scale),
            Kind::Translation { vector, .. } => {
                record.values = Some(vector.as_slice().to_vec());
            }
            Kind::Transformation { matrix, .. } => record.matrix = Some(matrix.clone()),
            Kind::Linear { origin, basis } => {
                record.values = Some(origin.as_slice().to_vec());
                record.matrix = Some(basis.clone());
            }
            Kind::Elliptical {
                origin,
                basis,
                convention,
            } => {
                record.values = Some(origin.as_slice().to_vec());
                record.matrix = Some(basis.clone());
                record.convention = Some(convention.clone());
            }
            _ => {}
        }
        record.operands = expression
            .operands()
            .into_iter()
            .map(ExpressionRecord::from)
            .collect();
        record
    }
}

impl TryFrom<ExpressionRecord> for Expression {
    type Error = ExpressionError;

    fn try_from(record: ExpressionRecord) -> Result<Self> {
        let expected = match record.kind {
            OperationKind::Constant
            | OperationKind::Parameter
            | OperationKind::Identity
            | OperationKind::Linear
            | OperationKind::Elliptical => 0,
            OperationKind::Sum
            | OperationKind::Difference
            | OperationKind::Product
            | OperationKind::Quotient
            | OperationKind::DotProduct
            | OperationKind::CrossProduct
            | OperationKind::Power
            | OperationKind::Concatenation
            | OperationKind::Composition => 2,
            _ => 1,
        };
        if record.operands.len() != expected {
            return Err(ExpressionError::dimension(
                record.kind,
                format!("expected {} operands, found {}", expected, record.operands.len()),
            ));
        }
        let operands = record
            .operands
            .iter()
            .cloned()
            .map(Expression::try_from)
            .collect::<Result<Vec<_>>>()?;
        let first = || operands[0].clone();
        let second = || operands[1].clone();

        let kind = match record.kind {
            OperationKind::Constant => Kind::Constant {
                value: ConstantValue::new(record.vector()?),
                num_parameters: record.num_parameters,
            },
            OperationKind::Parameter => Kind::Parameter {
                index: record.index()?,
                num_parameters: record.num_parameters,
            },
            OperationKind::Identity => Kind::Identity {
                num_parameters: record.num_parameters,
            },
            OperationKind::Negated => Kind::Negated(first()),
            OperationKind::Sum => Kind::Sum(first(), second()),
            OperationKind::Difference => Kind::Difference(first(), second()),
            OperationKind::Product => Kind::Product(first(), second()),
            OperationKind::Quotient => Kind::Quotient(first(), second()),
            OperationKind::DotProduct => Kind::DotProduct(first(), second()),
            OperationKind::CrossProduct => Kind::CrossProduct(first(), second()),
            OperationKind::Norm => Kind::Norm(first()),
            OperationKind::SquaredNorm => Kind::SquaredNorm(first()),
            OperationKind::Normalized => Kind::Normalized(first()),
            OperationKind::Power => Kind::Power(first(), second()),
            OperationKind::Components => Kind::Components {
                operand: first(),
                start: record.index()?,
                count: record.count.ok_or_else(|| record.missing("count"))?,
            },
            OperationKind::Concatenation => Kind::Concatenation(first(), second()),
            OperationKind::Scaling => Kind::Scaling {
                scale: record.scale.ok_or_else(|| record.missing("scale"))?,
                operand: first(),
            },
            OperationKind::Translation => Kind::Translation {
                vector: record.vector()?,
                operand: first(),
            },
            OperationKind::Transformation => Kind::Transformation {
                matrix: record.matrix()?,
                operand: first(),
            },
            OperationKind::Composition => Kind::Composition {
                inner: first(),
                outer: second(),
            },
            OperationKind::Linear => Kind::Linear {
                origin: record.vector()?,
                basis: record.matrix()?,
            },
            OperationKind::Elliptical => Kind::Elliptical {
                origin: record.vector()?,
                basis: record.matrix()?,
                convention: record
                    .convention
                    .clone()
                    .ok_or_else(|| record.missing("convention"))?,
            },
            function => match Function::from_operation_kind(function) {
                Some(function) => Kind::Function(function, first()),
                None => {
                    return Err(ExpressionError::dimension(function, "unsupported record kind"))
                }
            },
        };

        let expression = Expression::from_kind(kind)?;
        if expression.num_parameters() != record.num_parameters {
            return Err(ExpressionError::arity(
                record.kind,
                record.num_parameters,
                expression.num_parameters(),
            ));
        }
        Ok(expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn test_record_count_expands_sharing() {
        let t = Expression::parameter(0, 1).unwrap();
        let mut e = t.sin().unwrap();
        for _ in 0..10 {
            e = e.checked_mul(&e).unwrap();
        }
        assert_eq!(e.node_count(), 12);
        assert_eq!(e.record_count(), 3 * 1024 - 1);

        fn records(record: &ExpressionRecord) -> usize {
            1 + record.operands.iter().map(records).sum::<usize>()
        }
        let small = t.sin().unwrap().checked_mul(&t.sin().unwrap()).unwrap();
        assert_eq!(records(&ExpressionRecord::from(&small)), small.record_count());
    }

    #[test]
    fn test_record_keeps_payload() {
        let t = Expression::parameter(1, 2).unwrap();
        let moved = t.checked_add(&Expression::scalar(2.5, 2)).unwrap();
        let record = ExpressionRecord::from(&moved);
        assert_eq!(record.kind, OperationKind::Translation);
        assert_eq!(record.values, Some(vec![2.5]));
        assert_eq!(record.operands[0].index, Some(1));
    }

    #[test]
    fn test_record_roundtrip_is_duplicate() {
        let u = Expression::parameter(0, 2).unwrap();
        let v = Expression::parameter(1, 2).unwrap();
        let e = u.sin().unwrap().checked_mul(&v.exp().unwrap()).unwrap();
        let back = Expression::try_from(ExpressionRecord::from(&e)).unwrap();
        assert!(back.is_duplicate_of(&e));
        assert_eq!(back.value_at(&[0.3, 0.2]).unwrap(), e.value_at(&[0.3, 0.2]).unwrap());
    }

    #[test]
    fn test_malformed_record_is_rejected() {
        let mut record = ExpressionRecord::from(&Expression::constant(&[1.0, 2.0], 1).unwrap());
        record.kind = OperationKind::Sin;
        assert!(Expression::try_from(record).unwrap_err().is_dimension_error());

        let mut record = ExpressionRecord::from(&Expression::parameter(0, 1).unwrap());
        record.index = Some(4);
        assert!(Expression::try_from(record).unwrap_err().is_dimension_error());

        // Sin of a 2-vector fails shape validation
        let pair = ExpressionRecord::from(&Expression::from_vector(dvector![1.0, 2.0], 1).unwrap());
        let record = ExpressionRecord {
            operands: vec![pair],
            ..ExpressionRecord::bare(OperationKind::Sin, 1)
        };
        assert!(Expression::try_from(record).unwrap_err().is_dimension_error());
    }
}
