// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Parametric expression DAG
//!
//! An [`Expression`] is a cheap handle to an immutable, shared node. Nodes are
//! built through simplifying constructors and never change afterwards, so a
//! subtree can be referenced by any number of parents and threads.

mod constructors;
mod derivative;
mod node;
mod ops;
mod record;
mod rewrite;

pub use node::{ConstantValue, OperationKind};
pub use record::ExpressionRecord;

pub(crate) use node::{Function, Kind, Node};

use crate::error::Result;
use crate::numeric::Interval;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Shared handle to a parametric expression node
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "ExpressionRecord", into = "ExpressionRecord")]
pub struct Expression(Arc<Node>);

impl Expression {
    /// Wrap a kind in a node after validating operand shapes, with no
    /// simplification
    pub(crate) fn from_kind(kind: Kind) -> Result<Self> {
        Ok(Self(Arc::new(Node::new(kind)?)))
    }

    pub(crate) fn trusted(kind: Kind, num_dimensions: usize, num_parameters: usize) -> Self {
        Self(Arc::new(Node::trusted(kind, num_dimensions, num_parameters)))
    }

    /// Constant node from a non-empty vector
    pub(crate) fn constant_unchecked(values: DVector<f64>, num_parameters: usize) -> Self {
        let num_dimensions = values.len();
        Self::trusted(
            Kind::Constant {
                value: ConstantValue::new(values),
                num_parameters,
            },
            num_dimensions,
            num_parameters,
        )
    }

    /// Constant zero vector with the shape of this expression
    pub(crate) fn zero_like(&self) -> Self {
        Self::constant_unchecked(
            DVector::zeros(self.num_dimensions()),
            self.num_parameters(),
        )
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.0.kind
    }

    pub(crate) fn structural_hash(&self) -> u64 {
        self.0.hash
    }

    /// Length of the result vector
    pub fn num_dimensions(&self) -> usize {
        self.0.num_dimensions
    }

    /// Length of the parameter vector the expression expects
    pub fn num_parameters(&self) -> usize {
        self.0.num_parameters
    }

    pub fn operation_kind(&self) -> OperationKind {
        self.0.kind.operation_kind()
    }

    /// Direct child expressions
    pub fn operands(&self) -> Vec<&Expression> {
        self.0.kind.operands()
    }

    /// Address of the shared node, stable for the lifetime of any handle
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// True if both handles point to the same node
    pub fn ptr_eq(&self, other: &Expression) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.0.kind, Kind::Constant { .. })
    }

    /// Values of a constant expression
    pub fn constant_values(&self) -> Option<&DVector<f64>> {
        match &self.0.kind {
            Kind::Constant { value, .. } => Some(value.values()),
            _ => None,
        }
    }

    /// Constant whose every component is exactly zero. Construction rewrites
    /// rely on this, so no tolerance applies.
    pub fn is_zero(&self) -> bool {
        self.constant_values()
            .is_some_and(|values| values.iter().all(|value| *value == 0.0))
    }

    /// Count of distinct nodes reachable from this one
    pub fn node_count(&self) -> usize {
        let mut seen = ahash::AHashSet::new();
        let mut stack = vec![self];
        while let Some(expression) = stack.pop() {
            if seen.insert(expression.id()) {
                stack.extend(expression.operands());
            }
        }
        seen.len()
    }

    /// Structural equality: same kind, same payload, duplicate operands.
    ///
    /// Sum, DotProduct, and scalar-by-scalar Product also match with their
    /// operands swapped. Payload scalars compare exactly, with `-0.0 == 0.0`.
    pub fn is_duplicate_of(&self, other: &Expression) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.structural_hash() != other.structural_hash()
            || self.num_dimensions() != other.num_dimensions()
            || self.num_parameters() != other.num_parameters()
        {
            return false;
        }
        let (kind, other_kind) = (self.kind(), other.kind());
        if kind.operation_kind() != other_kind.operation_kind()
            || kind.payload_bits() != other_kind.payload_bits()
        {
            return false;
        }
        let operands = kind.operands();
        let other_operands = other_kind.operands();
        if operands.len() != other_operands.len() {
            return false;
        }
        let in_order = operands
            .iter()
            .zip(&other_operands)
            .all(|(a, b)| a.is_duplicate_of(b));
        if in_order {
            return true;
        }
        kind.is_commutative()
            && other_kind.is_commutative()
            && operands[0].is_duplicate_of(other_operands[1])
            && operands[1].is_duplicate_of(other_operands[0])
    }

    /// Values of a constant expression as a column of intervals
    pub fn constant_bounds(&self) -> Option<&[Interval]> {
        match &self.0.kind {
            Kind::Constant { value, .. } => Some(value.bounds()),
            _ => None,
        }
    }

    /// Payload matrix of a Transformation or basis of a Linear/Elliptical node
    pub fn matrix_payload(&self) -> Option<&DMatrix<f64>> {
        match &self.0.kind {
            Kind::Transformation { matrix, .. } => Some(matrix),
            Kind::Linear { basis, .. } | Kind::Elliptical { basis, .. } => Some(basis),
            _ => None,
        }
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        write!(
            f,
            "{:width$}R{} -> R{} | {}",
            "",
            self.num_parameters(),
            self.num_dimensions(),
            self.operation_kind(),
            width = indent * 2
        )?;
        match self.kind() {
            Kind::Constant { value, .. } => write!(f, " {:?}", value.values().as_slice())?,
            Kind::Parameter { index, .. } => write!(f, " {}", index)?,
            Kind::Components { start, count, .. } => write!(f, " {}..{}", start, start + count)?,
            Kind::Scaling { scale, .. } => write!(f, " {}", scale)?,
            Kind::Translation { vector, .. } => write!(f, " {:?}", vector.as_slice())?,
            Kind::Elliptical { convention, .. } => write!(f, " {:?}", convention)?,
            _ => {}
        }
        writeln!(f)?;
        for operand in self.operands() {
            operand.fmt_tree(f, indent + 1)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("kind", &self.operation_kind())
            .field("num_dimensions", &self.num_dimensions())
            .field("num_parameters", &self.num_parameters())
            .finish()
    }
}

/// Indented tree dump, one node per line
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExpressionError;

    #[test]
    fn test_parameter_shape() {
        let t = Expression::parameter(1, 2).unwrap();
        assert_eq!(t.num_dimensions(), 1);
        assert_eq!(t.num_parameters(), 2);
        assert_eq!(t.operation_kind(), OperationKind::Parameter);

        let err = Expression::parameter(2, 2).unwrap_err();
        assert!(matches!(err, ExpressionError::ParameterIndex { index: 2, .. }));
        assert!(err.is_dimension_error());
    }

    #[test]
    fn test_duplicates_commutative_sum() {
        let u = Expression::parameter(0, 2).unwrap();
        let v = Expression::parameter(1, 2).unwrap();
        let a = u.sin().unwrap().checked_add(&v).unwrap();
        let b = v.checked_add(&u.sin().unwrap()).unwrap();
        assert!(a.is_duplicate_of(&b));
        assert!(b.is_duplicate_of(&a));
        assert!(!a.ptr_eq(&b));
    }

    #[test]
    fn test_difference_is_order_sensitive() {
        let u = Expression::parameter(0, 2).unwrap();
        let v = Expression::parameter(1, 2).unwrap();
        let a = u.checked_sub(&v).unwrap();
        let b = v.checked_sub(&u).unwrap();
        assert!(!a.is_duplicate_of(&b));
    }

    #[test]
    fn test_negative_zero_payload() {
        let a = Expression::scalar(0.0, 1);
        let b = Expression::scalar(-0.0, 1);
        assert!(a.is_duplicate_of(&b));
    }

    #[test]
    fn test_display_tree() {
        let t = Expression::parameter(0, 1).unwrap();
        let e = t.sin().unwrap();
        let text = e.to_string();
        assert!(text.starts_with("R1 -> R1 | Sin"));
        assert!(text.contains("\n  R1 -> R1 | Parameter 0"));
    }

    #[test]
    fn test_node_count_shares_subtrees() {
        let t = Expression::parameter(0, 1).unwrap();
        let s = t.sin().unwrap();
        let e = s.checked_mul(&s).unwrap();
        assert_eq!(e.node_count(), 3);
    }
}
