// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Typed views into evaluation storage
//!
//! Values are column-major with one column per parameter sample. A view with
//! a zero column stride broadcasts one stored column across the whole batch.
//! Tangents hold, for every column, a `rows x num_parameters` block.

use crate::numeric::Numeric;

/// Read-only window of `rows` rows starting at `offset` in column-major data
#[derive(Debug, Clone, Copy)]
pub(crate) struct View<'a, T> {
    pub data: &'a [T],
    pub offset: usize,
    pub stride: usize,
    pub rows: usize,
}

impl<'a, T: Numeric> View<'a, T> {
    #[inline]
    pub fn get(&self, row: usize, column: usize) -> T {
        self.data[column * self.stride + self.offset + row]
    }
}

/// Derivative of a view with respect to the root parameters
#[derive(Debug, Clone, Copy)]
pub(crate) enum TangentView<'a, T> {
    /// Rows of the root parameter matrix: the tangent is a unit vector
    Seed { offset: usize },
    /// Independent of the parameters
    Zero,
    /// Stored tangent blocks of a computed value with `ld` rows
    Dense {
        data: &'a [T],
        offset: usize,
        ld: usize,
    },
}

impl<'a, T: Numeric> TangentView<'a, T> {
    #[inline]
    pub fn get(&self, row: usize, parameter: usize, column: usize, num_parameters: usize) -> T {
        match *self {
            TangentView::Seed { offset } => {
                if offset + row == parameter {
                    T::one()
                } else {
                    T::zero()
                }
            }
            TangentView::Zero => T::zero(),
            TangentView::Dense { data, offset, ld } => {
                data[(column * num_parameters + parameter) * ld + offset + row]
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, TangentView::Zero)
    }
}

/// A step operand: value view plus tangent view
#[derive(Debug, Clone, Copy)]
pub(crate) struct Operand<'a, T> {
    pub value: View<'a, T>,
    pub tangent: TangentView<'a, T>,
}

impl<'a, T: Numeric> Operand<'a, T> {
    #[inline]
    pub fn get(&self, row: usize, column: usize) -> T {
        self.value.get(row, column)
    }

    #[inline]
    pub fn tangent(&self, row: usize, parameter: usize, column: usize, num_parameters: usize) -> T {
        self.tangent.get(row, parameter, column, num_parameters)
    }
}

/// Output storage of one step
pub(crate) struct Target<'a, T> {
    pub values: &'a mut [T],
    pub tangents: Option<&'a mut [T]>,
    pub rows: usize,
    pub num_parameters: usize,
}

impl<'a, T: Numeric> Target<'a, T> {
    #[inline]
    pub fn set(&mut self, row: usize, column: usize, value: T) {
        self.values[column * self.rows + row] = value;
    }

    #[inline]
    pub fn get(&self, row: usize, column: usize) -> T {
        self.values[column * self.rows + row]
    }

    #[inline]
    pub fn wants_tangents(&self) -> bool {
        self.tangents.is_some()
    }

    #[inline]
    pub fn set_tangent(&mut self, row: usize, parameter: usize, column: usize, value: T) {
        let index = (column * self.num_parameters + parameter) * self.rows + row;
        if let Some(tangents) = self.tangents.as_deref_mut() {
            tangents[index] = value;
        }
    }

    /// First column whose values or tangents hold an invalid interval
    pub fn first_invalid_column(&self) -> Option<usize> {
        let rows = self.rows.max(1);
        let by_value = self.values.iter().position(|value| !value.is_valid()).map(|i| i / rows);
        let block = (self.rows * self.num_parameters).max(1);
        let by_tangent = self
            .tangents
            .as_deref()
            .and_then(|tangents| tangents.iter().position(|value| !value.is_valid()))
            .map(|i| i / block);
        match (by_value, by_tangent) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Scratch storage owned by one evaluation pass
pub(crate) struct Workspace<T> {
    pub values: Vec<Vec<T>>,
    pub tangents: Vec<Vec<T>>,
}

impl<T> Workspace<T> {
    pub fn new(num_buffers: usize, with_tangents: bool) -> Self {
        let mut values = Vec::with_capacity(num_buffers);
        values.resize_with(num_buffers, Vec::new);
        let mut tangents = Vec::new();
        if with_tangents {
            tangents.resize_with(num_buffers, Vec::new);
        }
        Self { values, tangents }
    }
}
