// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Construction-time simplification and affine rewrites

use anyhow::Result;
use approx::assert_relative_eq;
use nalgebra::{dmatrix, dvector, DMatrix};
use paramkernel::{Expression, Interval, OperationKind};

#[test]
fn test_shape_errors_are_eager() -> Result<()> {
    let t = Expression::parameter(0, 1)?;
    let pair = Expression::constant(&[1.0, 2.0], 1)?;
    assert!(t.checked_add(&pair).unwrap_err().is_dimension_error());
    assert!(pair.sin().unwrap_err().is_dimension_error());
    assert!(pair.cross(&pair).unwrap_err().is_dimension_error());
    assert!(pair.component(2).unwrap_err().is_dimension_error());
    assert!(Expression::parameter(3, 2).unwrap_err().is_dimension_error());

    let other = Expression::parameter(0, 2)?;
    assert!(t.checked_add(&other).unwrap_err().is_arity_error());
    assert!(t.composed_with(&pair).unwrap_err().is_arity_error());
    Ok(())
}

#[test]
fn test_identity_elements() -> Result<()> {
    let t = Expression::parameter(0, 1)?;
    let zero = Expression::scalar(0.0, 1);
    let one = Expression::scalar(1.0, 1);
    assert!(t.checked_add(&zero)?.ptr_eq(&t));
    assert!(zero.checked_add(&t)?.ptr_eq(&t));
    assert!(t.checked_sub(&zero)?.ptr_eq(&t));
    assert!(t.checked_mul(&one)?.ptr_eq(&t));
    assert!(t.checked_div(&one)?.ptr_eq(&t));
    assert!(t.checked_mul(&zero)?.is_zero());
    assert!(t.pow(&one)?.ptr_eq(&t));
    assert_eq!(t.pow(&zero)?.constant_values(), Some(&dvector![1.0]));
    Ok(())
}

#[test]
fn test_cancellation() -> Result<()> {
    let t = Expression::parameter(0, 1)?;
    let v = Expression::from_components(&[t.sin()?, t.cos()?, t.clone()])?;
    assert!(v.checked_sub(&v)?.is_zero());
    assert!(v.cross(&v)?.is_zero());
    assert!(v.negated().negated().ptr_eq(&v));
    assert!(v.normalized().normalized().ptr_eq(&v.normalized()));
    assert_eq!(v.normalized().norm().constant_values(), Some(&dvector![1.0]));

    // Built independently but structurally identical
    let w = Expression::from_components(&[t.sin()?, t.cos()?, t.clone()])?;
    assert!(v.checked_sub(&w)?.is_zero());
    Ok(())
}

#[test]
fn test_tiny_constants_are_not_dropped() -> Result<()> {
    let t = Expression::parameter(0, 1)?;
    let pair = Expression::from_components(&[t.clone(), t.clone()])?;
    let tiny = Expression::constant(&[1e-13, 1e-13], 1)?;
    let x = 1e15;

    let dot = pair.dot(&tiny)?;
    assert_eq!(dot.operation_kind(), OperationKind::DotProduct);
    assert_relative_eq!(dot.value_at(&[x])?[0], 200.0, max_relative = 1e-12);

    let shrunk = pair.transformed_by(&(DMatrix::identity(2, 2) * 1e-13))?;
    assert!(!shrunk.is_constant());
    assert_relative_eq!(shrunk.value_at(&[x])?, dvector![100.0, 100.0], max_relative = 1e-12);

    let nearly_identity = DMatrix::identity(2, 2) + DMatrix::from_element(2, 2, 1e-13);
    assert!(!pair.transformed_by(&nearly_identity)?.ptr_eq(&pair));

    let triple = Expression::from_components(&[t.clone(), t.clone(), t.clone()])?;
    let crossed = triple.cross(&Expression::constant(&[1e-13, 0.0, 0.0], 1)?)?;
    assert!(!crossed.is_zero());
    assert_relative_eq!(
        crossed.value_at(&[x])?,
        dvector![0.0, 100.0, -100.0],
        max_relative = 1e-12
    );

    let shifted = t.checked_add(&Expression::scalar(1e-13, 1))?;
    assert_eq!(shifted.operation_kind(), OperationKind::Translation);
    let bounds = shifted.bounds_over(&[Interval::singleton(1.0)])?;
    assert!(bounds[0].contains(1.0 + 1e-13));
    assert!(!bounds[0].contains(1.0));
    Ok(())
}

#[test]
fn test_constant_folding() -> Result<()> {
    let a = Expression::constant(&[1.0, 2.0, 2.0], 1)?;
    assert_eq!(a.norm().constant_values(), Some(&dvector![3.0]));
    assert_eq!(a.squared_norm().constant_values(), Some(&dvector![9.0]));
    assert_eq!(Expression::scalar(0.0, 1).exp()?.constant_values(), Some(&dvector![1.0]));

    let b = Expression::constant(&[0.0, 1.0, 0.0], 1)?;
    assert_eq!(a.dot(&b)?.constant_values(), Some(&dvector![2.0]));
    assert_eq!(a.concatenate(&b)?.num_dimensions(), 6);
    assert!(a.concatenate(&b)?.is_constant());

    // Outside the domain: kept as nodes so evaluation reports the failure
    let log = Expression::scalar(-1.0, 1).ln()?;
    assert_eq!(log.operation_kind(), OperationKind::Log);
    assert!(log.value_at(&[0.0]).unwrap_err().is_domain_error());

    let zero = Expression::scalar(0.0, 1);
    let q = Expression::scalar(2.0, 1).checked_div(&zero)?;
    assert_eq!(q.operation_kind(), OperationKind::Quotient);
    assert!(q.value_at(&[0.0]).unwrap_err().is_domain_error());
    Ok(())
}

#[test]
fn test_affine_payloads_compose() -> Result<()> {
    let t = Expression::parameter(0, 1)?;
    let v = Expression::from_components(&[t.sin()?, t.cos()?])?;

    let scaled = v.scaled_by(2.0).scaled_by(3.0);
    assert_eq!(scaled.operation_kind(), OperationKind::Scaling);
    assert!(scaled.operands()[0].ptr_eq(&v));

    let moved = v.translated_by(&dvector![1.0, 0.0])?.translated_by(&dvector![0.0, 2.0])?;
    assert_eq!(moved.operation_kind(), OperationKind::Translation);
    assert!(moved.operands()[0].ptr_eq(&v));

    let rotation = dmatrix![0.0, -1.0; 1.0, 0.0];
    let twice = v.transformed_by(&rotation)?.transformed_by(&rotation)?;
    assert_eq!(twice.operation_kind(), OperationKind::Negated);

    let identity = v.transformed_by(&DMatrix::identity(2, 2))?;
    assert!(identity.ptr_eq(&v));

    let x = 0.8f64;
    let value = v.translated_by(&dvector![1.0, -1.0])?.transformed_by(&rotation)?.value_at(&[x])?;
    assert_relative_eq!(value, dvector![-(x.cos() - 1.0), x.sin() + 1.0], epsilon = 1e-14);
    Ok(())
}

#[test]
fn test_linear_absorbs_affine_maps() -> Result<()> {
    let plane = Expression::linear(dvector![0.0, 0.0, 1.0], dmatrix![1.0, 0.0; 0.0, 1.0; 0.0, 0.0])?;
    let moved = plane.translated_by(&dvector![1.0, 1.0, 1.0])?.scaled_by(2.0);
    assert_eq!(moved.operation_kind(), OperationKind::Linear);
    assert_relative_eq!(moved.value_at(&[0.5, 0.25])?, dvector![3.0, 2.5, 4.0], epsilon = 1e-14);

    let projected = plane.transformed_by(&dmatrix![1.0, 1.0, 1.0])?;
    assert_eq!(projected.operation_kind(), OperationKind::Linear);
    assert_relative_eq!(projected.value_at(&[0.5, 0.25])?[0], 1.75, epsilon = 1e-14);
    Ok(())
}

#[test]
fn test_component_extraction_pushes_down() -> Result<()> {
    let t = Expression::parameter(0, 1)?;
    let s = t.sin()?;
    let v = Expression::from_components(&[s.clone(), t.cos()?, t.exp()?])?;
    assert!(v.component(0)?.ptr_eq(&s));
    assert!(v.x()?.ptr_eq(&s));
    assert_eq!(v.z()?.operation_kind(), OperationKind::Exp);
    assert_eq!(v.scaled_by(2.0).y()?.operation_kind(), OperationKind::Scaling);
    assert!(v.components(0, 3)?.ptr_eq(&v));
    Ok(())
}

#[test]
fn test_composition_rewrites() -> Result<()> {
    let u = Expression::parameter(0, 2)?;
    let v = Expression::parameter(1, 2)?;
    let t = Expression::parameter(0, 1)?;
    let inner = Expression::from_components(&[t.sin()?, t.cos()?])?;

    assert!(v.composed_with(&inner)?.is_duplicate_of(&t.cos()?));
    let identity = Expression::identity(2)?;
    assert!(identity.composed_with(&inner)?.ptr_eq(&inner));

    // A constant inner vector folds the whole expression
    let point = Expression::constant(&[0.5, 2.0], 1)?;
    let folded = u.checked_mul(&v)?.composed_with(&point)?;
    assert_eq!(folded.constant_values(), Some(&dvector![1.0]));

    let plane = Expression::linear(dvector![1.0, 2.0], dmatrix![1.0, 0.0; 0.0, 3.0])?;
    let on_curve = plane.composed_with(&inner)?;
    assert_ne!(on_curve.operation_kind(), OperationKind::Composition);
    let x = 1.2f64;
    assert_relative_eq!(
        on_curve.value_at(&[x])?,
        dvector![1.0 + x.sin(), 2.0 + 3.0 * x.cos()],
        epsilon = 1e-14
    );
    Ok(())
}

#[test]
fn test_display_tree() -> Result<()> {
    let t = Expression::parameter(0, 1)?;
    let rendered = t.sin()?.to_string();
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines[0], "R1 -> R1 | Sin");
    assert!(lines[1].starts_with("  R1 -> R1 | Parameter"));
    Ok(())
}
