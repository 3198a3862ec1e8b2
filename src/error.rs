// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Error taxonomy for expression construction and evaluation

use crate::expression::OperationKind;
use thiserror::Error;

/// Errors raised while building or evaluating parametric expressions.
///
/// Shape errors (`Arity`, `ParameterIndex`, `Dimension`) are detected eagerly
/// when a node is constructed. `Domain` aborts the whole batch; interval
/// evaluation raises it only when no part of an input interval lies inside
/// the domain.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// Parameter-count mismatch between a node and an operand or input batch
    #[error("{operation}: expected {expected} parameters, found {found}")]
    Arity {
        operation: OperationKind,
        expected: usize,
        found: usize,
    },

    /// Parameter index outside `[0, num_parameters)`
    #[error("parameter index {index} out of range for {num_parameters} parameters")]
    ParameterIndex { index: usize, num_parameters: usize },

    /// Operand shapes are incompatible with the requested operation
    #[error("{operation}: {reason}")]
    Dimension {
        operation: OperationKind,
        reason: String,
    },

    /// Input value outside the mathematical domain of an operation
    #[error("{kind}: value outside domain at column {column}")]
    Domain { kind: OperationKind, column: usize },

    /// An interval result failed to enclose the true value. Always a bug.
    #[error("{kind}: interval enclosure lost at column {column}")]
    Soundness { kind: OperationKind, column: usize },
}

impl ExpressionError {
    pub(crate) fn dimension(operation: OperationKind, reason: impl Into<String>) -> Self {
        ExpressionError::Dimension {
            operation,
            reason: reason.into(),
        }
    }

    pub(crate) fn arity(operation: OperationKind, expected: usize, found: usize) -> Self {
        ExpressionError::Arity {
            operation,
            expected,
            found,
        }
    }

    /// True for failures caused by incompatible shapes, including
    /// out-of-range parameter indices.
    pub fn is_dimension_error(&self) -> bool {
        matches!(
            self,
            ExpressionError::Dimension { .. } | ExpressionError::ParameterIndex { .. }
        )
    }

    pub fn is_arity_error(&self) -> bool {
        matches!(self, ExpressionError::Arity { .. })
    }

    pub fn is_domain_error(&self) -> bool {
        matches!(self, ExpressionError::Domain { .. })
    }

    /// Batch column a `Domain` or `Soundness` failure refers to
    pub fn column(&self) -> Option<usize> {
        match self {
            ExpressionError::Domain { column, .. } | ExpressionError::Soundness { column, .. } => {
                Some(*column)
            }
            _ => None,
        }
    }

    /// Shift the reported column of a batch failure, used when a batch was
    /// split into column ranges.
    pub(crate) fn offset_column(self, offset: usize) -> Self {
        match self {
            ExpressionError::Domain { kind, column } => ExpressionError::Domain {
                kind,
                column: column + offset,
            },
            ExpressionError::Soundness { kind, column } => ExpressionError::Soundness {
                kind,
                column: column + offset,
            },
            other => other,
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ExpressionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = ExpressionError::ParameterIndex {
            index: 3,
            num_parameters: 2,
        };
        assert!(err.is_dimension_error());
        assert!(!err.is_domain_error());

        let err = ExpressionError::Domain {
            kind: OperationKind::Log,
            column: 4,
        };
        assert_eq!(
            err.clone().offset_column(10),
            ExpressionError::Domain {
                kind: OperationKind::Log,
                column: 14
            }
        );
        assert_eq!(err.to_string(), "Log: value outside domain at column 4");
        assert_eq!(err.column(), Some(4));
    }
}
