//! Contiguous row-major matrices exchanged with a backend.
//!
//! Every input or output layer is fed one `Matrix` of shape `(rows, features)`.
//! ModelSession builds them by projecting bound table columns in bound order.

use crate::{Error, Result};

/// A `(rows, cols)` block of `f32` stored row-major:
/// - `data.len() == rows * cols`
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl Matrix {
    /// Zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Build a matrix from a flat buffer with shape `(len / cols, cols)`.
    pub fn from_flat(data: Vec<f32>, cols: usize) -> Result<Self> {
        if cols == 0 {
            return Err(Error::Model("matrix must have at least one column".to_owned()));
        }
        if data.len() % cols != 0 {
            return Err(Error::Model(format!(
                "buffer length {} is not divisible by column count {}",
                data.len(),
                cols
            )));
        }

        let rows = data.len() / cols;
        Ok(Self { data, rows, cols })
    }

    /// Build a matrix from per-sample rows.
    ///
    /// This is a convenience constructor (it copies into contiguous storage).
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if cols == 0 {
            return Err(Error::Model("matrix must have at least one column".to_owned()));
        }

        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::Model(format!(
                    "row {i} has len {}, expected {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }

        Ok(Self {
            data,
            rows: rows.len(),
            cols,
        })
    }

    #[inline]
    /// Returns the number of samples.
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    /// Returns the per-sample width.
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[inline]
    /// Returns the `idx`-th row (shape: `(cols,)`).
    ///
    /// Panics if `idx >= rows`.
    pub fn row(&self, idx: usize) -> &[f32] {
        let start = idx * self.cols;
        &self.data[start..start + self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, idx: usize) -> &mut [f32] {
        let start = idx * self.cols;
        &mut self.data[start..start + self.cols]
    }

    /// Copy the given rows, in order, into a new matrix.
    ///
    /// Panics if any index is out of range.
    pub fn gather(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            data,
            rows: indices.len(),
            cols: self.cols,
        }
    }

    /// Copy the contiguous row range `start..end`.
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.rows);
        let start = start.min(end);
        Self {
            data: self.data[start * self.cols..end * self.cols].to_vec(),
            rows: end - start,
            cols: self.cols,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}
