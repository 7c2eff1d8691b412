//! Dense row-major matrices and borrowed stride-aware views.
//!
//! `Matrix` is the unit of storage for weights, activations, and gradients:
//! a flat `Vec<f32>` with declared row/column extents. Logical transposition
//! never copies data: `Matrix::t` returns a [`MatrixView`] with swapped
//! extents and strides, and the one low-level GEMM routine in [`crate::ops`]
//! is the only place that consumes strides.

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// A zero-filled matrix with the given extents.
    #[inline]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// A matrix with every element set to `value`.
    #[inline]
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Wrap an existing flat row-major buffer.
    ///
    /// Returns `ShapeMismatch` unless `data.len() == rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::ShapeMismatch(format!(
                "buffer of length {} cannot hold a {rows}x{cols} matrix",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total element count (`rows * cols`).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[inline]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Borrow this matrix in its stored orientation.
    #[inline]
    pub fn view(&self) -> MatrixView<'_> {
        MatrixView {
            rows: self.rows,
            cols: self.cols,
            row_stride: self.cols,
            col_stride: 1,
            data: &self.data,
        }
    }

    /// Borrow the logical transpose without copying.
    #[inline]
    pub fn t(&self) -> MatrixView<'_> {
        self.view().t()
    }
}

/// A borrowed matrix with explicit strides.
///
/// Element `(i, j)` lives at `data[i * row_stride + j * col_stride]`. The
/// transpose of a view swaps extents and strides; vector views reinterpret a
/// flat slice as a single row or column.
#[derive(Debug, Clone, Copy)]
pub struct MatrixView<'a> {
    rows: usize,
    cols: usize,
    row_stride: usize,
    col_stride: usize,
    data: &'a [f32],
}

impl<'a> MatrixView<'a> {
    /// View a flat slice as a `1 x n` row vector.
    #[inline]
    pub fn row_vector(data: &'a [f32]) -> Self {
        Self {
            rows: 1,
            cols: data.len(),
            row_stride: data.len(),
            col_stride: 1,
            data,
        }
    }

    /// View a flat slice as an `n x 1` column vector.
    #[inline]
    pub fn col_vector(data: &'a [f32]) -> Self {
        Self {
            rows: data.len(),
            cols: 1,
            row_stride: 1,
            col_stride: 1,
            data,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The logical transpose: swapped extents, swapped strides, same data.
    #[inline]
    pub fn t(self) -> Self {
        Self {
            rows: self.cols,
            cols: self.rows,
            row_stride: self.col_stride,
            col_stride: self.row_stride,
            data: self.data,
        }
    }

    #[inline]
    pub(crate) fn strides(&self) -> (usize, usize) {
        (self.row_stride, self.col_stride)
    }

    #[inline]
    pub(crate) fn data(&self) -> &'a [f32] {
        self.data
    }

    /// Element access honoring strides. Intended for tests and small
    /// reductions, not hot loops.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row * self.row_stride + col * self.col_stride]
    }
}

/// Reinterpret a one-unit-dimension view as its transpose.
///
/// This is an O(1) reshape of a `1 x n` row into an `n x 1` column (or back);
/// a view with both extents above one is rejected with `ShapeMismatch`.
pub fn transpose_vector(view: MatrixView<'_>) -> Result<MatrixView<'_>> {
    if view.rows > 1 && view.cols > 1 {
        return Err(Error::ShapeMismatch(format!(
            "cannot reshape a {}x{} matrix as a vector",
            view.rows, view.cols
        )));
    }
    Ok(view.t())
}
