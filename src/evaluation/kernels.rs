// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Per-kind batch kernels
//!
//! Each kernel fills a step's values and, when requested, its tangents by
//! forward-mode chain rule from operand tangents. Kernels are generic over
//! the number type, so double and interval evaluation share one table.

use super::buffer::{Operand, Target};
use crate::error::{ExpressionError, Result};
use crate::expression::{Function, Kind, OperationKind};
use crate::numeric::Numeric;
use nalgebra::{DMatrix, DVector};

/// Shape and settings shared by every kernel of one batch
pub(crate) struct Batch {
    pub kind: OperationKind,
    pub columns: usize,
    pub num_parameters: usize,
    pub tolerance: f64,
}

impl Batch {
    fn domain(&self, column: usize) -> ExpressionError {
        ExpressionError::Domain {
            kind: self.kind,
            column,
        }
    }

    #[inline]
    fn check<T>(&self, value: Option<T>, column: usize) -> Result<T> {
        value.ok_or_else(|| self.domain(column))
    }
}

pub(crate) fn execute<T: Numeric>(
    kind: &Kind,
    batch: &Batch,
    operands: &[Operand<'_, T>],
    parameters: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) -> Result<()> {
    match kind {
        Kind::Negated(_) => {
            elementwise(batch, &operands[0], target, |x| Some(-x), |_, _| Some(-T::one()))
        }
        Kind::Sum(..) => {
            combine(batch, &operands[0], &operands[1], target, |a, b| a + b);
            Ok(())
        }
        Kind::Difference(..) => {
            combine(batch, &operands[0], &operands[1], target, |a, b| a - b);
            Ok(())
        }
        Kind::Product(..) => {
            product(batch, &operands[0], &operands[1], target);
            Ok(())
        }
        Kind::Quotient(..) => quotient(batch, &operands[0], &operands[1], target),
        Kind::DotProduct(..) => {
            dot_product(batch, &operands[0], &operands[1], target);
            Ok(())
        }
        Kind::CrossProduct(..) => {
            cross_product(batch, &operands[0], &operands[1], target);
            Ok(())
        }
        Kind::Norm(_) => norm(batch, &operands[0], target),
        Kind::SquaredNorm(_) => {
            squared_norm(batch, &operands[0], target);
            Ok(())
        }
        Kind::Normalized(_) => normalized(batch, &operands[0], target),
        Kind::Function(function, _) => apply_function(*function, batch, &operands[0], target),
        Kind::Power(..) => power(batch, &operands[0], &operands[1], target),
        Kind::Concatenation(..) => {
            concatenation(batch, &operands[0], &operands[1], target);
            Ok(())
        }
        Kind::Scaling { scale, .. } => {
            let scale = T::from_f64(*scale);
            elementwise(batch, &operands[0], target, |x| Some(scale * x), |_, _| Some(scale))
        }
        Kind::Translation { vector, .. } => {
            translation(batch, vector, &operands[0], target);
            Ok(())
        }
        Kind::Transformation { matrix, .. } => {
            transformation(batch, matrix, &operands[0], target);
            Ok(())
        }
        Kind::Linear { origin, basis } => {
            linear(batch, origin, basis, parameters, target);
            Ok(())
        }
        Kind::Elliptical {
            origin,
            basis,
            convention,
        } => {
            elliptical(batch, origin, basis, convention, parameters, target);
            Ok(())
        }
        // Views, resolved when the plan is compiled
        Kind::Constant { .. }
        | Kind::Parameter { .. }
        | Kind::Identity { .. }
        | Kind::Components { .. }
        | Kind::Composition { .. } => Err(ExpressionError::dimension(
            batch.kind,
            "node has no batch kernel",
        )),
    }
}

/// `y = f(x)` per component with `dy = f'(x, y) * dx`
fn elementwise<T: Numeric>(
    batch: &Batch,
    a: &Operand<'_, T>,
    target: &mut Target<'_, T>,
    value: impl Fn(T) -> Option<T>,
    slope: impl Fn(T, T) -> Option<T>,
) -> Result<()> {
    let rows = target.rows;
    for column in 0..batch.columns {
        for row in 0..rows {
            let x = a.get(row, column);
            let y = batch.check(value(x), column)?;
            target.set(row, column, y);
            if target.wants_tangents() {
                let factor = batch.check(slope(x, y), column)?;
                for parameter in 0..batch.num_parameters {
                    let dx = a.tangent(row, parameter, column, batch.num_parameters);
                    target.set_tangent(row, parameter, column, factor * dx);
                }
            }
        }
    }
    Ok(())
}

fn combine<T: Numeric>(
    batch: &Batch,
    a: &Operand<'_, T>,
    b: &Operand<'_, T>,
    target: &mut Target<'_, T>,
    op: impl Fn(T, T) -> T,
) {
    let (rows, np) = (target.rows, batch.num_parameters);
    for column in 0..batch.columns {
        for row in 0..rows {
            target.set(row, column, op(a.get(row, column), b.get(row, column)));
        }
    }
    if target.wants_tangents() {
        for column in 0..batch.columns {
            for parameter in 0..np {
                for row in 0..rows {
                    let da = a.tangent(row, parameter, column, np);
                    let db = b.tangent(row, parameter, column, np);
                    target.set_tangent(row, parameter, column, op(da, db));
                }
            }
        }
    }
}

fn product<T: Numeric>(
    batch: &Batch,
    multiplier: &Operand<'_, T>,
    multiplicand: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) {
    let (rows, np) = (target.rows, batch.num_parameters);
    for column in 0..batch.columns {
        let m = multiplier.get(0, column);
        for row in 0..rows {
            let x = multiplicand.get(row, column);
            target.set(row, column, m * x);
            if target.wants_tangents() {
                for parameter in 0..np {
                    let dm = multiplier.tangent(0, parameter, column, np);
                    let dx = multiplicand.tangent(row, parameter, column, np);
                    target.set_tangent(row, parameter, column, dm * x + m * dx);
                }
            }
        }
    }
}

fn quotient<T: Numeric>(
    batch: &Batch,
    dividend: &Operand<'_, T>,
    divisor: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) -> Result<()> {
    let (rows, np, tolerance) = (target.rows, batch.num_parameters, batch.tolerance);
    for column in 0..batch.columns {
        let d = divisor.get(0, column);
        for row in 0..rows {
            let q = batch.check(dividend.get(row, column).checked_div(d, tolerance), column)?;
            target.set(row, column, q);
            if target.wants_tangents() {
                for parameter in 0..np {
                    let da = dividend.tangent(row, parameter, column, np);
                    let dd = divisor.tangent(0, parameter, column, np);
                    let dq = batch.check((da - q * dd).checked_div(d, tolerance), column)?;
                    target.set_tangent(row, parameter, column, dq);
                }
            }
        }
    }
    Ok(())
}

fn dot_product<T: Numeric>(
    batch: &Batch,
    a: &Operand<'_, T>,
    b: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) {
    let (size, np) = (a.value.rows, batch.num_parameters);
    for column in 0..batch.columns {
        let mut sum = T::zero();
        for k in 0..size {
            sum = sum + a.get(k, column) * b.get(k, column);
        }
        target.set(0, column, sum);
        if target.wants_tangents() {
            for parameter in 0..np {
                let mut d = T::zero();
                for k in 0..size {
                    d = d
                        + a.tangent(k, parameter, column, np) * b.get(k, column)
                        + a.get(k, column) * b.tangent(k, parameter, column, np);
                }
                target.set_tangent(0, parameter, column, d);
            }
        }
    }
}

fn cross<T: Numeric>(a: [T; 3], b: [T; 3]) -> [T; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn cross_product<T: Numeric>(
    batch: &Batch,
    a: &Operand<'_, T>,
    b: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) {
    let np = batch.num_parameters;
    for column in 0..batch.columns {
        let va = [a.get(0, column), a.get(1, column), a.get(2, column)];
        let vb = [b.get(0, column), b.get(1, column), b.get(2, column)];
        for (row, value) in cross(va, vb).into_iter().enumerate() {
            target.set(row, column, value);
        }
        if target.wants_tangents() {
            for parameter in 0..np {
                let da: [T; 3] = std::array::from_fn(|k| a.tangent(k, parameter, column, np));
                let db: [T; 3] = std::array::from_fn(|k| b.tangent(k, parameter, column, np));
                let left = cross(da, vb);
                let right = cross(va, db);
                for row in 0..3 {
                    target.set_tangent(row, parameter, column, left[row] + right[row]);
                }
            }
        }
    }
}

fn sum_of_squares<T: Numeric>(a: &Operand<'_, T>, column: usize) -> T {
    (0..a.value.rows).fold(T::zero(), |sum, k| sum + a.get(k, column).squared())
}

fn norm<T: Numeric>(batch: &Batch, a: &Operand<'_, T>, target: &mut Target<'_, T>) -> Result<()> {
    let np = batch.num_parameters;
    for column in 0..batch.columns {
        let length = batch.check(sum_of_squares(a, column).checked_sqrt(batch.tolerance), column)?;
        target.set(0, column, length);
        if target.wants_tangents() {
            for parameter in 0..np {
                let mut along = T::zero();
                for k in 0..a.value.rows {
                    along = along + a.get(k, column) * a.tangent(k, parameter, column, np);
                }
                let d = batch.check(along.checked_div(length, batch.tolerance), column)?;
                target.set_tangent(0, parameter, column, d);
            }
        }
    }
    Ok(())
}

fn squared_norm<T: Numeric>(batch: &Batch, a: &Operand<'_, T>, target: &mut Target<'_, T>) {
    let np = batch.num_parameters;
    let two = T::from_f64(2.0);
    for column in 0..batch.columns {
        target.set(0, column, sum_of_squares(a, column));
        if target.wants_tangents() {
            for parameter in 0..np {
                let mut along = T::zero();
                for k in 0..a.value.rows {
                    along = along + a.get(k, column) * a.tangent(k, parameter, column, np);
                }
                target.set_tangent(0, parameter, column, two * along);
            }
        }
    }
}

fn normalized<T: Numeric>(
    batch: &Batch,
    a: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) -> Result<()> {
    let (rows, np, tolerance) = (target.rows, batch.num_parameters, batch.tolerance);
    for column in 0..batch.columns {
        let length = batch.check(sum_of_squares(a, column).checked_sqrt(tolerance), column)?;
        for row in 0..rows {
            let unit = batch.check(a.get(row, column).checked_div(length, tolerance), column)?;
            target.set(row, column, unit);
        }
        if target.wants_tangents() {
            for parameter in 0..np {
                let mut along = T::zero();
                for k in 0..rows {
                    along = along + target.get(k, column) * a.tangent(k, parameter, column, np);
                }
                for row in 0..rows {
                    let da = a.tangent(row, parameter, column, np);
                    let d = batch.check(
                        (da - target.get(row, column) * along).checked_div(length, tolerance),
                        column,
                    )?;
                    target.set_tangent(row, parameter, column, d);
                }
            }
        }
    }
    Ok(())
}

fn apply_function<T: Numeric>(
    function: Function,
    batch: &Batch,
    a: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) -> Result<()> {
    let tolerance = batch.tolerance;
    let one = T::one();
    let inverse_root_of_complement = move |x: T| {
        let root = (one - x.squared()).checked_sqrt(tolerance)?;
        one.checked_div(root, tolerance)
    };
    match function {
        Function::Sqrt => elementwise(
            batch,
            a,
            target,
            |x| x.checked_sqrt(tolerance),
            |_, y| one.checked_div(T::from_f64(2.0) * y, tolerance),
        ),
        Function::Sin => elementwise(batch, a, target, |x| Some(x.sin()), |x, _| Some(x.cos())),
        Function::Cos => elementwise(batch, a, target, |x| Some(x.cos()), |x, _| Some(-x.sin())),
        Function::Tan => elementwise(
            batch,
            a,
            target,
            |x| x.checked_tan(tolerance),
            |_, y| Some(one + y.squared()),
        ),
        Function::Arcsin => elementwise(
            batch,
            a,
            target,
            |x| x.checked_asin(tolerance),
            |x, _| inverse_root_of_complement(x),
        ),
        Function::Arccos => elementwise(
            batch,
            a,
            target,
            |x| x.checked_acos(tolerance),
            |x, _| inverse_root_of_complement(x).map(|d| -d),
        ),
        Function::Exp => elementwise(batch, a, target, |x| Some(x.exp()), |_, y| Some(y)),
        Function::Log => elementwise(
            batch,
            a,
            target,
            |x| x.checked_ln(tolerance),
            |x, _| one.checked_div(x, tolerance),
        ),
    }
}

fn power<T: Numeric>(
    batch: &Batch,
    base: &Operand<'_, T>,
    exponent: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) -> Result<()> {
    let (np, tolerance) = (batch.num_parameters, batch.tolerance);
    for column in 0..batch.columns {
        let b = base.get(0, column);
        let e = exponent.get(0, column);
        let value = batch.check(b.checked_pow(e, tolerance), column)?;
        target.set(0, column, value);
        if !target.wants_tangents() {
            continue;
        }
        if exponent.tangent.is_zero() {
            let slope = batch.check(b.checked_pow_slope(e, tolerance), column)?;
            for parameter in 0..np {
                let db = base.tangent(0, parameter, column, np);
                target.set_tangent(0, parameter, column, slope * db);
            }
        } else {
            let log_base = batch.check(b.checked_ln(tolerance), column)?;
            for parameter in 0..np {
                let db = base.tangent(0, parameter, column, np);
                let de = exponent.tangent(0, parameter, column, np);
                let relative = batch.check(db.checked_div(b, tolerance), column)?;
                target.set_tangent(0, parameter, column, value * (de * log_base + e * relative));
            }
        }
    }
    Ok(())
}

fn concatenation<T: Numeric>(
    batch: &Batch,
    a: &Operand<'_, T>,
    b: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) {
    let np = batch.num_parameters;
    let split = a.value.rows;
    for column in 0..batch.columns {
        for row in 0..target.rows {
            let (source, source_row) = if row < split { (a, row) } else { (b, row - split) };
            target.set(row, column, source.get(source_row, column));
            if target.wants_tangents() {
                for parameter in 0..np {
                    let d = source.tangent(source_row, parameter, column, np);
                    target.set_tangent(row, parameter, column, d);
                }
            }
        }
    }
}

fn translation<T: Numeric>(
    batch: &Batch,
    vector: &DVector<f64>,
    a: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) {
    let np = batch.num_parameters;
    for column in 0..batch.columns {
        for row in 0..target.rows {
            target.set(row, column, a.get(row, column) + T::from_f64(vector[row]));
            if target.wants_tangents() {
                for parameter in 0..np {
                    let d = a.tangent(row, parameter, column, np);
                    target.set_tangent(row, parameter, column, d);
                }
            }
        }
    }
}

fn transformation<T: Numeric>(
    batch: &Batch,
    matrix: &DMatrix<f64>,
    a: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) {
    let np = batch.num_parameters;
    for column in 0..batch.columns {
        for row in 0..target.rows {
            let mut sum = T::zero();
            for k in 0..matrix.ncols() {
                sum = sum + T::from_f64(matrix[(row, k)]) * a.get(k, column);
            }
            target.set(row, column, sum);
            if target.wants_tangents() {
                for parameter in 0..np {
                    let mut d = T::zero();
                    for k in 0..matrix.ncols() {
                        d = d + T::from_f64(matrix[(row, k)]) * a.tangent(k, parameter, column, np);
                    }
                    target.set_tangent(row, parameter, column, d);
                }
            }
        }
    }
}

fn linear<T: Numeric>(
    batch: &Batch,
    origin: &DVector<f64>,
    basis: &DMatrix<f64>,
    parameters: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) {
    let np = batch.num_parameters;
    for column in 0..batch.columns {
        for row in 0..target.rows {
            let mut sum = T::zero();
            for k in 0..basis.ncols() {
                sum = sum + T::from_f64(basis[(row, k)]) * parameters.get(k, column);
            }
            target.set(row, column, sum + T::from_f64(origin[row]));
            if target.wants_tangents() {
                for parameter in 0..np {
                    let mut d = T::zero();
                    for k in 0..basis.ncols() {
                        d = d + T::from_f64(basis[(row, k)])
                            * parameters.tangent(k, parameter, column, np);
                    }
                    target.set_tangent(row, parameter, column, d);
                }
            }
        }
    }
}

/// Local coordinate `k` is the product of one factor per angle `i <= k`:
/// angle `k` itself contributes `cos` if its convention flag is set and `sin`
/// otherwise, and every earlier angle contributes the other function.
fn elliptical<T: Numeric>(
    batch: &Batch,
    origin: &DVector<f64>,
    basis: &DMatrix<f64>,
    convention: &[bool],
    parameters: &Operand<'_, T>,
    target: &mut Target<'_, T>,
) {
    let np = batch.num_parameters;
    let angles = convention.len();
    let local_size = angles + 1;
    let mut sines = vec![T::zero(); angles];
    let mut cosines = vec![T::zero(); angles];
    let mut local = vec![T::zero(); local_size];
    // d local[k] / d angle[i], row-major by k
    let mut local_slopes = vec![T::zero(); local_size * angles];

    // (value, slope) of the factor angle `i` contributes to local coordinate `k`
    let factor = |i: usize, k: usize, sines: &[T], cosines: &[T]| -> (T, T) {
        let own = i == k;
        let uses_cos = convention[i] == own;
        if uses_cos {
            (cosines[i], -sines[i])
        } else {
            (sines[i], cosines[i])
        }
    };

    for column in 0..batch.columns {
        for i in 0..angles {
            let angle = parameters.get(i, column);
            sines[i] = angle.sin();
            cosines[i] = angle.cos();
        }
        for k in 0..local_size {
            let span = if k < angles { k + 1 } else { angles };
            let mut value = T::one();
            for i in 0..span {
                value = value * factor(i, k, &sines, &cosines).0;
            }
            local[k] = value;
            if target.wants_tangents() {
                for i in 0..angles {
                    let slope = if i < span {
                        (0..span).fold(T::one(), |product, m| {
                            let (value, slope) = factor(m, k, &sines, &cosines);
                            product * if m == i { slope } else { value }
                        })
                    } else {
                        T::zero()
                    };
                    local_slopes[k * angles + i] = slope;
                }
            }
        }
        for row in 0..target.rows {
            let mut sum = T::from_f64(origin[row]);
            for k in 0..local_size {
                sum = sum + T::from_f64(basis[(row, k)]) * local[k];
            }
            target.set(row, column, sum);
        }
        if target.wants_tangents() {
            for parameter in 0..np {
                for row in 0..target.rows {
                    let mut d = T::zero();
                    for k in 0..local_size {
                        let mut local_d = T::zero();
                        for i in 0..angles {
                            local_d = local_d
                                + local_slopes[k * angles + i]
                                    * parameters.tangent(i, parameter, column, np);
                        }
                        d = d + T::from_f64(basis[(row, k)]) * local_d;
                    }
                    target.set_tangent(row, parameter, column, d);
                }
            }
        }
    }
}
