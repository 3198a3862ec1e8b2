// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! JSON persistence of expressions, intervals, and configuration

use anyhow::Result;
use nalgebra::{dmatrix, dvector, DMatrix};
use paramkernel::{
    DeduplicationStats, Expression, ExpressionRecord, Interval, KernelConfig, OperationKind,
};

fn curve() -> Result<Expression> {
    let t = Expression::parameter(0, 1)?;
    let circle = Expression::from_components(&[t.cos()?, t.sin()?, t.scaled_by(0.25)])?;
    Ok(circle
        .transformed_by(&dmatrix![2.0, 0.0, 0.0; 0.0, 1.0, 0.0; 0.0, 0.0, 1.0])?
        .translated_by(&dvector![1.0, -1.0, 0.5])?)
}

#[test]
fn test_expression_json_roundtrip() -> Result<()> {
    let original = curve()?;
    let json = serde_json::to_string(&original)?;
    let restored: Expression = serde_json::from_str(&json)?;
    assert!(restored.is_duplicate_of(&original));

    let parameters = DMatrix::from_row_slice(1, 4, &[0.0, 0.5, 1.0, 3.0]);
    assert_eq!(restored.evaluate(&parameters)?, original.evaluate(&parameters)?);
    Ok(())
}

#[test]
fn test_surface_json_roundtrip() -> Result<()> {
    let sphere = Expression::elliptical(
        dvector![0.0, 0.0, 0.0],
        DMatrix::identity(3, 3) * 2.0,
        vec![true, false],
    )?;
    let derivative = sphere.derivative(1)?;
    let json = serde_json::to_string_pretty(&derivative)?;
    let restored: Expression = serde_json::from_str(&json)?;
    assert_eq!(restored.operation_kind(), OperationKind::Elliptical);
    assert!(restored.is_duplicate_of(&derivative));
    Ok(())
}

#[test]
fn test_invalid_json_is_rejected() -> Result<()> {
    let record = ExpressionRecord::from(&curve()?);
    let mut value = serde_json::to_value(&record)?;
    value["num_parameters"] = serde_json::json!(3);
    assert!(serde_json::from_value::<Expression>(value).is_err());

    let unknown = r#"{"kind":"Teleport","num_parameters":1}"#;
    assert!(serde_json::from_str::<Expression>(unknown).is_err());
    Ok(())
}

#[test]
fn test_interval_and_stats_roundtrip() -> Result<()> {
    let interval = Interval::new(-0.5, 2.0);
    let restored: Interval = serde_json::from_str(&serde_json::to_string(&interval)?)?;
    assert_eq!(restored, interval);

    let stats = DeduplicationStats {
        canonical_nodes: 12,
        hits: 30,
        misses: 12,
    };
    let restored: DeduplicationStats = serde_json::from_str(&serde_json::to_string(&stats)?)?;
    assert_eq!(restored, stats);

    let config = KernelConfig::default();
    let restored: KernelConfig = toml::from_str(&toml::to_string(&config)?)?;
    assert_eq!(restored, config);
    Ok(())
}
