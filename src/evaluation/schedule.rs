// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Evaluation plan: dependency-ordered steps over reusable buffers
//!
//! Compiling walks the DAG once, memoized on `(node, input slot)`, so each
//! distinct node is scheduled once per input it is evaluated against.
//! Parameters, constants, component ranges, and compositions resolve to
//! zero-copy slots; every other node becomes a step writing one buffer.
//! Buffers are released after their last reader and reused by later steps.

use super::buffer::{Operand, Target, TangentView, View, Workspace};
use super::kernels::{self, Batch};
use crate::error::{ExpressionError, Result};
use crate::expression::{ConstantValue, Expression, Kind};
use crate::numeric::Numeric;
use ahash::AHashMap;
use nalgebra::DMatrix;

/// Where a slot's data lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Source {
    /// The caller's parameter matrix
    Input,
    /// A stored constant column, broadcast across the batch
    Constant(usize),
    /// A scratch buffer written by a step
    Buffer(usize),
}

/// Logical buffer handle: a row range of some storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Slot {
    pub source: Source,
    pub offset: usize,
    pub rows: usize,
    pub stride: usize,
}

/// A batch failure tagged with the position of the step that raised it
#[derive(Debug)]
pub(crate) struct StepFailure {
    pub step: usize,
    pub error: ExpressionError,
}

impl StepFailure {
    /// Shift the failing column when the batch was one range of a larger one
    pub(crate) fn offset_column(self, offset: usize) -> Self {
        Self {
            step: self.step,
            error: self.error.offset_column(offset),
        }
    }

    /// Order in which serial evaluation would raise the failure
    pub(crate) fn order(&self) -> (usize, usize) {
        (self.step, self.error.column().unwrap_or(0))
    }
}

impl From<StepFailure> for ExpressionError {
    fn from(failure: StepFailure) -> Self {
        failure.error
    }
}

impl Slot {
    fn rows_of(self, offset: usize, rows: usize) -> Slot {
        Slot {
            offset: self.offset + offset,
            rows,
            ..self
        }
    }

    fn buffer(&self) -> Option<usize> {
        match self.source {
            Source::Buffer(index) => Some(index),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Step {
    pub expression: Expression,
    /// Parameter slot the node is evaluated against
    pub input: Slot,
    pub operands: Vec<Slot>,
    pub output: usize,
    pub rows: usize,
}

impl Step {
    fn reads(&self) -> impl Iterator<Item = &Slot> {
        self.operands.iter().chain(std::iter::once(&self.input))
    }

    fn reads_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.operands.iter_mut().chain(std::iter::once(&mut self.input))
    }
}

/// Compiled schedule for one expression, reusable across batches
#[derive(Debug)]
pub struct EvaluationPlan {
    root: Expression,
    constants: Vec<ConstantValue>,
    steps: Vec<Step>,
    output: Slot,
    num_buffers: usize,
}

struct Compiler {
    num_parameters: usize,
    memo: AHashMap<(usize, Slot), Slot>,
    constant_index: AHashMap<usize, usize>,
    constants: Vec<ConstantValue>,
    steps: Vec<Step>,
}

impl Compiler {
    fn visit(&mut self, expression: &Expression, input: Slot) -> Slot {
        let key = (expression.id(), input);
        if let Some(slot) = self.memo.get(&key) {
            return *slot;
        }
        let slot = match expression.kind() {
            Kind::Constant { value, .. } => {
                let next = self.constants.len();
                let index = *self.constant_index.entry(expression.id()).or_insert(next);
                if index == next {
                    self.constants.push(value.clone());
                }
                Slot {
                    source: Source::Constant(index),
                    offset: 0,
                    rows: expression.num_dimensions(),
                    stride: 0,
                }
            }
            Kind::Parameter { index, .. } => input.rows_of(*index, 1),
            Kind::Identity { .. } => input,
            Kind::Components {
                operand,
                start,
                count,
            } => self.visit(operand, input).rows_of(*start, *count),
            Kind::Composition { outer, inner } => {
                let inner_slot = self.visit(inner, input);
                self.visit(outer, inner_slot)
            }
            _ => {
                let operands = expression
                    .operands()
                    .into_iter()
                    .map(|operand| self.visit(operand, input))
                    .collect();
                let output = self.steps.len();
                let rows = expression.num_dimensions();
                self.steps.push(Step {
                    expression: expression.clone(),
                    input,
                    operands,
                    output,
                    rows,
                });
                Slot {
                    source: Source::Buffer(output),
                    offset: 0,
                    rows,
                    stride: rows,
                }
            }
        };
        self.memo.insert(key, slot);
        slot
    }
}

impl EvaluationPlan {
    pub fn compile(expression: &Expression) -> Self {
        let num_parameters = expression.num_parameters();
        let mut compiler = Compiler {
            num_parameters,
            memo: AHashMap::new(),
            constant_index: AHashMap::new(),
            constants: Vec::new(),
            steps: Vec::new(),
        };
        let root_input = Slot {
            source: Source::Input,
            offset: 0,
            rows: compiler.num_parameters,
            stride: num_parameters,
        };
        let output = compiler.visit(expression, root_input);
        let mut steps = compiler.steps;
        let (output, num_buffers) = assign_buffers(&mut steps, output);

        tracing::debug!(
            nodes = expression.node_count(),
            steps = steps.len(),
            buffers = num_buffers,
            constants = compiler.constants.len(),
            "compiled evaluation plan"
        );

        Self {
            root: expression.clone(),
            constants: compiler.constants,
            steps,
            output,
            num_buffers,
        }
    }

    pub fn expression(&self) -> &Expression {
        &self.root
    }

    /// Number of computing steps (nodes that are not zero-copy views)
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Number of scratch buffers after reuse
    pub fn num_buffers(&self) -> usize {
        self.num_buffers
    }

    pub(crate) fn check_input(&self, rows: usize) -> Result<()> {
        if rows != self.root.num_parameters() {
            return Err(ExpressionError::arity(
                self.root.operation_kind(),
                self.root.num_parameters(),
                rows,
            ));
        }
        Ok(())
    }

    /// Values at every column of `parameters`
    pub fn evaluate<T: Numeric>(
        &self,
        parameters: &DMatrix<T>,
        tolerance: f64,
    ) -> Result<DMatrix<T>> {
        self.check_input(parameters.nrows())?;
        Ok(self.evaluate_columns(parameters.as_slice(), parameters.ncols(), tolerance)?)
    }

    /// Jacobian (`num_dimensions x num_parameters`) at every column
    pub fn evaluate_jacobian<T: Numeric>(
        &self,
        parameters: &DMatrix<T>,
        tolerance: f64,
    ) -> Result<Vec<DMatrix<T>>> {
        self.check_input(parameters.nrows())?;
        Ok(self.jacobian_columns(parameters.as_slice(), parameters.ncols(), tolerance)?)
    }

    /// Values for `columns` samples stored column-major in `input`
    pub(crate) fn evaluate_columns<T: Numeric>(
        &self,
        input: &[T],
        columns: usize,
        tolerance: f64,
    ) -> std::result::Result<DMatrix<T>, StepFailure> {
        let mut workspace = Workspace::new(self.num_buffers, false);
        self.run(input, columns, tolerance, &mut workspace)?;
        let value = self.operand(&self.output, input, &workspace).value;
        Ok(DMatrix::from_fn(self.root.num_dimensions(), columns, |row, column| {
            value.get(row, column)
        }))
    }

    pub(crate) fn jacobian_columns<T: Numeric>(
        &self,
        input: &[T],
        columns: usize,
        tolerance: f64,
    ) -> std::result::Result<Vec<DMatrix<T>>, StepFailure> {
        let mut workspace = Workspace::new(self.num_buffers, true);
        self.run(input, columns, tolerance, &mut workspace)?;
        let tangent = self.operand(&self.output, input, &workspace).tangent;
        let (rows, num_parameters) = (self.root.num_dimensions(), self.root.num_parameters());
        Ok((0..columns)
            .map(|column| {
                DMatrix::from_fn(rows, num_parameters, |row, parameter| {
                    tangent.get(row, parameter, column, num_parameters)
                })
            })
            .collect())
    }

    fn operand<'a, T: Numeric>(
        &'a self,
        slot: &Slot,
        input: &'a [T],
        workspace: &'a Workspace<T>,
    ) -> Operand<'a, T> {
        match slot.source {
            Source::Input => Operand {
                value: View {
                    data: input,
                    offset: slot.offset,
                    stride: slot.stride,
                    rows: slot.rows,
                },
                tangent: TangentView::Seed {
                    offset: slot.offset,
                },
            },
            Source::Constant(index) => Operand {
                value: View {
                    data: T::constant_slice(&self.constants[index]),
                    offset: slot.offset,
                    stride: 0,
                    rows: slot.rows,
                },
                tangent: TangentView::Zero,
            },
            Source::Buffer(index) => Operand {
                value: View {
                    data: &workspace.values[index],
                    offset: slot.offset,
                    stride: slot.stride,
                    rows: slot.rows,
                },
                tangent: match workspace.tangents.get(index) {
                    Some(tangents) => TangentView::Dense {
                        data: tangents,
                        offset: slot.offset,
                        ld: slot.stride,
                    },
                    None => TangentView::Zero,
                },
            },
        }
    }

    fn run<T: Numeric>(
        &self,
        input: &[T],
        columns: usize,
        tolerance: f64,
        workspace: &mut Workspace<T>,
    ) -> std::result::Result<(), StepFailure> {
        let num_parameters = self.root.num_parameters();
        let with_tangents = !workspace.tangents.is_empty();
        for (position, step) in self.steps.iter().enumerate() {
            let fail = |error: ExpressionError| StepFailure {
                step: position,
                error,
            };
            let mut values = std::mem::take(&mut workspace.values[step.output]);
            values.clear();
            values.resize(step.rows * columns, T::zero());
            let mut tangents = if with_tangents {
                let mut tangents = std::mem::take(&mut workspace.tangents[step.output]);
                tangents.clear();
                tangents.resize(step.rows * num_parameters * columns, T::zero());
                Some(tangents)
            } else {
                None
            };

            {
                let operands: Vec<Operand<'_, T>> = step
                    .operands
                    .iter()
                    .map(|slot| self.operand(slot, input, workspace))
                    .collect();
                let parameters = self.operand(&step.input, input, workspace);
                let mut target = Target {
                    values: &mut values,
                    tangents: tangents.as_deref_mut(),
                    rows: step.rows,
                    num_parameters,
                };
                let kind = step.expression.operation_kind();
                let batch = Batch {
                    kind,
                    columns,
                    num_parameters,
                    tolerance,
                };
                kernels::execute(step.expression.kind(), &batch, &operands, &parameters, &mut target)
                    .map_err(fail)?;
                if let Some(column) = target.first_invalid_column() {
                    return Err(fail(ExpressionError::Soundness { kind, column }));
                }
            }

            workspace.values[step.output] = values;
            if let Some(tangents) = tangents {
                workspace.tangents[step.output] = tangents;
            }
        }
        Ok(())
    }
}

/// Map step outputs onto physical buffers, reusing a buffer once every
/// reader of its current value has run. Returns the remapped output slot
/// and the number of physical buffers.
fn assign_buffers(steps: &mut [Step], output: Slot) -> (Slot, usize) {
    let mut last_use: Vec<usize> = (0..steps.len()).collect();
    for (position, step) in steps.iter().enumerate() {
        for buffer in step.reads().filter_map(Slot::buffer) {
            last_use[buffer] = position;
        }
    }
    if let Some(buffer) = output.buffer() {
        last_use[buffer] = usize::MAX;
    }

    let mut physical = vec![0; steps.len()];
    let mut free: Vec<usize> = Vec::new();
    let mut num_buffers = 0;
    for position in 0..steps.len() {
        let step = &mut steps[position];
        let mut released: Vec<usize> = Vec::new();
        for slot in step.reads_mut() {
            if let Source::Buffer(logical) = slot.source {
                slot.source = Source::Buffer(physical[logical]);
                if last_use[logical] == position && !released.contains(&physical[logical]) {
                    released.push(physical[logical]);
                }
            }
        }
        let assigned = free.pop().unwrap_or_else(|| {
            num_buffers += 1;
            num_buffers - 1
        });
        physical[step.output] = assigned;
        if last_use[step.output] == position {
            released.push(assigned);
        }
        step.output = assigned;
        free.extend(released);
    }

    let output = match output.source {
        Source::Buffer(logical) => Slot {
            source: Source::Buffer(physical[logical]),
            ..output
        },
        _ => output,
    };
    (output, num_buffers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::DEFAULT_TOLERANCE;

    #[test]
    fn test_views_need_no_steps() {
        let u = Expression::parameter(1, 2).unwrap();
        let plan = EvaluationPlan::compile(&u);
        assert_eq!(plan.num_steps(), 0);
        let parameters = DMatrix::from_row_slice(2, 3, &[0.0, 0.0, 0.0, 4.0, 5.0, 6.0]);
        let values = plan.evaluate(&parameters, DEFAULT_TOLERANCE).unwrap();
        assert_eq!(values, DMatrix::from_row_slice(1, 3, &[4.0, 5.0, 6.0]));
    }

    #[test]
    fn test_shared_node_evaluated_once() {
        let t = Expression::parameter(0, 1).unwrap();
        let s = t.sin().unwrap();
        let e = s.checked_mul(&s).unwrap().checked_add(&s).unwrap();
        let plan = EvaluationPlan::compile(&e);
        // sin, product, sum
        assert_eq!(plan.num_steps(), 3);
    }

    #[test]
    fn test_buffers_are_reused() {
        let t = Expression::parameter(0, 1).unwrap();
        let mut e = t.clone();
        for _ in 0..10 {
            e = e.sin().unwrap().exp().unwrap();
        }
        let plan = EvaluationPlan::compile(&e);
        assert_eq!(plan.num_steps(), 20);
        assert!(plan.num_buffers() <= 2);
    }

    #[test]
    fn test_input_row_mismatch() {
        let t = Expression::parameter(0, 2).unwrap().sin().unwrap();
        let plan = EvaluationPlan::compile(&t);
        let err = plan
            .evaluate(&DMatrix::<f64>::zeros(3, 1), DEFAULT_TOLERANCE)
            .unwrap_err();
        assert!(err.is_arity_error());
    }
}
