// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Polyframe Parametric Kernel
//!
//! Expression engine underlying curves, surfaces, and transformations:
//! immutable expression DAGs built through simplifying constructors,
//! batched evaluation in double and interval arithmetic, analytic
//! derivatives and Jacobians, and structural deduplication.

pub mod config;
pub mod dedup;
pub mod error;
pub mod evaluation;
pub mod expression;
pub mod kernel;
pub mod numeric;

pub use config::KernelConfig;
pub use dedup::{DeduplicationCache, DeduplicationStats, ExpressionCache, SharedDeduplicationCache};
pub use error::{ExpressionError, Result};
pub use evaluation::{EvaluationPlan, ParallelEvaluator};
pub use expression::{Expression, ExpressionRecord, OperationKind};
pub use kernel::Kernel;
pub use numeric::{Interval, Numeric, DEFAULT_TOLERANCE};
