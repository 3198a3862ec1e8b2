// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Structural duplicates and deduplication caches

use anyhow::Result;
use nalgebra::{dmatrix, dvector};
use paramkernel::{
    DeduplicationCache, EvaluationPlan, Expression, ExpressionCache, SharedDeduplicationCache,
};
use rayon::prelude::*;

fn surface_term(u: &Expression, v: &Expression) -> Result<Expression> {
    let a = u.sin()?.checked_mul(&v.cos()?)?;
    let b = u.cos()?.checked_mul(&v.cos()?)?;
    Ok(Expression::from_components(&[a, b, v.sin()?])?)
}

#[test]
fn test_duplicates_are_an_equivalence() -> Result<()> {
    let u = Expression::parameter(0, 2)?;
    let v = Expression::parameter(1, 2)?;
    let a = surface_term(&u, &v)?;
    let b = surface_term(&u, &v)?;
    let c = surface_term(&Expression::parameter(0, 2)?, &Expression::parameter(1, 2)?)?;
    assert!(a.is_duplicate_of(&a));
    assert!(a.is_duplicate_of(&b) && b.is_duplicate_of(&a));
    assert!(b.is_duplicate_of(&c) && a.is_duplicate_of(&c));

    let d = surface_term(&v, &u)?;
    assert!(!a.is_duplicate_of(&d));
    Ok(())
}

#[test]
fn test_commutative_kinds() -> Result<()> {
    let u = Expression::parameter(0, 2)?;
    let v = Expression::parameter(1, 2)?;
    let (s, c) = (u.sin()?, v.cos()?);
    assert!(s.checked_add(&c)?.is_duplicate_of(&c.checked_add(&s)?));
    assert!(s.checked_mul(&c)?.is_duplicate_of(&c.checked_mul(&s)?));
    assert!(!s.checked_sub(&c)?.is_duplicate_of(&c.checked_sub(&s)?));
    assert!(!s.checked_div(&c)?.is_duplicate_of(&c.checked_div(&s)?));

    let a = Expression::from_components(&[u.clone(), v.clone(), s.clone()])?;
    let b = Expression::from_components(&[v.clone(), c.clone(), u.clone()])?;
    assert!(a.dot(&b)?.is_duplicate_of(&b.dot(&a)?));
    assert!(!a.cross(&b)?.is_duplicate_of(&b.cross(&a)?));
    Ok(())
}

#[test]
fn test_payload_comparison() -> Result<()> {
    let t = Expression::parameter(0, 1)?;
    let v = Expression::from_components(&[t.sin()?, t.cos()?])?;
    let a = v.translated_by(&dvector![0.0, 1.0])?;
    let b = v.translated_by(&dvector![-0.0, 1.0])?;
    let c = v.translated_by(&dvector![0.0, 1.0 + 1e-9])?;
    assert!(a.is_duplicate_of(&b));
    assert!(!a.is_duplicate_of(&c));

    let m = v.transformed_by(&dmatrix![1.0, 2.0; 3.0, 4.0])?;
    let n = v.transformed_by(&dmatrix![1.0, 2.0; 3.0, 4.0])?;
    assert!(m.is_duplicate_of(&n));
    Ok(())
}

#[test]
fn test_deduplication_shrinks_the_plan() -> Result<()> {
    let u = Expression::parameter(0, 2)?;
    let v = Expression::parameter(1, 2)?;
    // v.cos() built twice, so the raw tree holds two separate nodes
    let raw = surface_term(&u, &v)?;
    let cache = DeduplicationCache::new();
    let canonical = raw.deduplicated(&cache);
    assert!(canonical.is_duplicate_of(&raw));
    assert!(canonical.node_count() < raw.node_count());
    assert!(
        EvaluationPlan::compile(&canonical).num_steps() < EvaluationPlan::compile(&raw).num_steps()
    );

    let parameters = dmatrix![0.1, 0.2; 0.3, 0.4];
    assert_eq!(canonical.evaluate(&parameters)?, raw.evaluate(&parameters)?);
    Ok(())
}

#[test]
fn test_shared_cache_under_rayon() -> Result<()> {
    let cache = SharedDeduplicationCache::new();
    let results: Vec<Expression> = (0..32)
        .into_par_iter()
        .map(|_| {
            let u = Expression::parameter(0, 2).unwrap();
            let v = Expression::parameter(1, 2).unwrap();
            surface_term(&u, &v).unwrap().deduplicated(&cache)
        })
        .collect();
    assert!(results.iter().all(|e| e.ptr_eq(&results[0])));

    let stats = cache.stats();
    assert_eq!(stats.canonical_nodes, results[0].node_count());
    assert!(stats.hits > stats.misses);

    cache.clear();
    assert_eq!(cache.stats().canonical_nodes, 0);
    Ok(())
}
