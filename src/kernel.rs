// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Kernel API: canonical expression construction and batch evaluation

use crate::config::KernelConfig;
use crate::dedup::{DeduplicationStats, ExpressionCache, SharedDeduplicationCache};
use crate::error::Result;
use crate::evaluation::{EvaluationPlan, ParallelEvaluator};
use crate::expression::Expression;
use crate::numeric::{Interval, Numeric};
use nalgebra::DMatrix;

/// Process-wide entry point owning the shared deduplication cache
pub struct Kernel {
    cache: SharedDeduplicationCache,
    config: KernelConfig,
    parallel: ParallelEvaluator,
}

impl Kernel {
    /// Create a kernel with default configuration
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        let parallel =
            ParallelEvaluator::new(config.parallel_chunk_columns).with_tolerance(config.tolerance);
        Self {
            cache: SharedDeduplicationCache::new(),
            config,
            parallel,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Shared node for `expression`, reusing nodes already seen by this kernel
    pub fn canonicalize(&self, expression: &Expression) -> Expression {
        expression.deduplicated(&self.cache)
    }

    /// Canonical partial derivative with respect to parameter `index`
    pub fn derivative(&self, expression: &Expression, index: usize) -> Result<Expression> {
        expression.derivative_with(index, &self.cache)
    }

    /// Evaluate at every parameter column, in parallel for wide batches
    pub fn evaluate<T: Numeric>(
        &self,
        expression: &Expression,
        parameters: &DMatrix<T>,
    ) -> Result<DMatrix<T>> {
        let plan = EvaluationPlan::compile(expression);
        if self.is_wide(parameters.ncols()) {
            tracing::debug!(
                columns = parameters.ncols(),
                chunk = self.parallel.chunk_columns(),
                "parallel evaluation"
            );
            self.parallel.evaluate(&plan, parameters)
        } else {
            plan.evaluate(parameters, self.config.tolerance)
        }
    }

    /// Double-precision values at every column
    pub fn values(&self, expression: &Expression, parameters: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.evaluate(expression, parameters)
    }

    /// Interval enclosures at every column
    pub fn bounds(
        &self,
        expression: &Expression,
        parameters: &DMatrix<Interval>,
    ) -> Result<DMatrix<Interval>> {
        self.evaluate(expression, parameters)
    }

    /// Jacobians at every parameter column
    pub fn evaluate_jacobian<T: Numeric>(
        &self,
        expression: &Expression,
        parameters: &DMatrix<T>,
    ) -> Result<Vec<DMatrix<T>>> {
        let plan = EvaluationPlan::compile(expression);
        if self.is_wide(parameters.ncols()) {
            tracing::debug!(
                columns = parameters.ncols(),
                chunk = self.parallel.chunk_columns(),
                "parallel jacobian evaluation"
            );
            self.parallel.evaluate_jacobian(&plan, parameters)
        } else {
            plan.evaluate_jacobian(parameters, self.config.tolerance)
        }
    }

    fn is_wide(&self, columns: usize) -> bool {
        columns >= self.config.parallel_threshold && columns > self.config.parallel_chunk_columns
    }

    /// Get deduplication statistics
    pub fn stats(&self) -> DeduplicationStats {
        self.cache.stats()
    }

    /// Drop every cached node
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
