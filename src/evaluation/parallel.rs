// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Parallel batch evaluation using rayon

use super::schedule::StepFailure;
use super::EvaluationPlan;
use crate::error::Result;
use crate::numeric::{Numeric, DEFAULT_TOLERANCE};
use nalgebra::DMatrix;
use rayon::prelude::*;

/// Splits the columns of one batch into ranges evaluated on the rayon pool.
///
/// Each range runs its own scratch buffers against a shared compiled plan.
/// Results are identical to serial evaluation. On failure every range still
/// runs, and the error reported is the one serial evaluation would raise:
/// the earliest failing step, at its lowest global column.
#[derive(Debug, Clone)]
pub struct ParallelEvaluator {
    chunk_columns: usize,
    tolerance: f64,
}

impl ParallelEvaluator {
    pub fn new(chunk_columns: usize) -> Self {
        Self {
            chunk_columns: chunk_columns.max(1),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn chunk_columns(&self) -> usize {
        self.chunk_columns
    }

    /// Values at every column, split across threads
    pub fn evaluate<T: Numeric>(
        &self,
        plan: &EvaluationPlan,
        parameters: &DMatrix<T>,
    ) -> Result<DMatrix<T>> {
        let rows = parameters.nrows();
        if rows == 0 || parameters.ncols() <= self.chunk_columns {
            return plan.evaluate(parameters, self.tolerance);
        }
        plan.check_input(rows)?;

        let chunks: Vec<std::result::Result<DMatrix<T>, StepFailure>> = parameters
            .as_slice()
            .par_chunks(self.chunk_columns * rows)
            .enumerate()
            .map(|(index, chunk)| {
                plan.evaluate_columns(chunk, chunk.len() / rows, self.tolerance)
                    .map_err(|err| err.offset_column(index * self.chunk_columns))
            })
            .collect();

        let chunks = first_failure(chunks)?;
        let dimensions = plan.expression().num_dimensions();
        let mut data = Vec::with_capacity(dimensions * parameters.ncols());
        for chunk in &chunks {
            data.extend_from_slice(chunk.as_slice());
        }
        Ok(DMatrix::from_vec(dimensions, parameters.ncols(), data))
    }

    /// Jacobians at every column, split across threads
    pub fn evaluate_jacobian<T: Numeric>(
        &self,
        plan: &EvaluationPlan,
        parameters: &DMatrix<T>,
    ) -> Result<Vec<DMatrix<T>>> {
        let rows = parameters.nrows();
        if rows == 0 || parameters.ncols() <= self.chunk_columns {
            return plan.evaluate_jacobian(parameters, self.tolerance);
        }
        plan.check_input(rows)?;

        let chunks: Vec<std::result::Result<Vec<DMatrix<T>>, StepFailure>> = parameters
            .as_slice()
            .par_chunks(self.chunk_columns * rows)
            .enumerate()
            .map(|(index, chunk)| {
                plan.jacobian_columns(chunk, chunk.len() / rows, self.tolerance)
                    .map_err(|err| err.offset_column(index * self.chunk_columns))
            })
            .collect();

        Ok(first_failure(chunks)?.into_iter().flatten().collect())
    }
}

/// Unwrap every chunk, or pick the failure serial evaluation would raise
fn first_failure<R>(chunks: Vec<std::result::Result<R, StepFailure>>) -> Result<Vec<R>> {
    let mut results = Vec::with_capacity(chunks.len());
    let mut failure: Option<StepFailure> = None;
    for chunk in chunks {
        match chunk {
            Ok(result) => results.push(result),
            Err(err) => {
                if failure.as_ref().map_or(true, |f| err.order() < f.order()) {
                    failure = Some(err);
                }
            }
        }
    }
    match failure {
        Some(failure) => Err(failure.into()),
        None => Ok(results),
    }
}

impl Default for ParallelEvaluator {
    fn default() -> Self {
        Self::new(1024)
    }
}
