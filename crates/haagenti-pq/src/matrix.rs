//! Dense weight matrices

use crate::{PqError, Result};
use serde::{Deserialize, Serialize};

/// Row-major R × C matrix of f32 weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl WeightMatrix {
    /// Wrap row-major data.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        let expected = rows * cols;
        if data.len() != expected {
            return Err(PqError::DimensionMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// All-zero matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Flatten a convolution kernel stored as `(O, I, KH, KW)`.
    ///
    /// The tensor is reordered to `(O, KH, KW, I)` and viewed as an
    /// `(O*KH*KW) × I` matrix so that column slices run across input
    /// channels.
    pub fn from_conv_weights(
        data: &[f32],
        out_channels: usize,
        in_channels: usize,
        kernel_h: usize,
        kernel_w: usize,
    ) -> Result<Self> {
        let kernel_dim = kernel_h * kernel_w;
        let expected = out_channels * in_channels * kernel_dim;
        if data.len() != expected {
            return Err(PqError::DimensionMismatch {
                expected,
                actual: data.len(),
            });
        }

        let mut out = vec![0.0f32; expected];
        for o in 0..out_channels {
            for i in 0..in_channels {
                for k in 0..kernel_dim {
                    let src = (o * in_channels + i) * kernel_dim + k;
                    let dst = (o * kernel_dim + k) * in_channels + i;
                    out[dst] = data[src];
                }
            }
        }

        Self::new(out_channels * kernel_dim, in_channels, out)
    }

    /// Number of rows (R).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (C).
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Row-major backing data.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Consume into row-major data.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// One row.
    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// One row, mutable.
    pub fn row_mut(&mut self, r: usize) -> &mut [f32] {
        &mut self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Element at `(r, c)`.
    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.data[r * self.cols + c]
    }

    /// Columns `[start, start + width)` of every row, packed as an R × width
    /// point set.
    pub fn column_slice(&self, start: usize, width: usize) -> Vec<f32> {
        let mut points = Vec::with_capacity(self.rows * width);
        for r in 0..self.rows {
            let row = self.row(r);
            points.extend_from_slice(&row[start..start + width]);
        }
        points
    }

    /// Transposed copy (C × R).
    pub fn transpose(&self) -> Self {
        let mut out = vec![0.0f32; self.data.len()];
        for r in 0..self.rows {
            for c in 0..self.cols {
                out[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        Self {
            rows: self.cols,
            cols: self.rows,
            data: out,
        }
    }

    /// Dense product `self · x`.
    pub fn matvec(&self, x: &[f32]) -> Result<Vec<f32>> {
        if x.len() != self.cols {
            return Err(PqError::DimensionMismatch {
                expected: self.cols,
                actual: x.len(),
            });
        }
        Ok((0..self.rows)
            .map(|r| self.row(r).iter().zip(x).map(|(w, v)| w * v).sum())
            .collect())
    }

    /// Mean squared difference against another matrix of the same shape.
    pub fn mse(&self, other: &WeightMatrix) -> Result<f32> {
        if self.shape() != other.shape() {
            return Err(PqError::DimensionMismatch {
                expected: self.data.len(),
                actual: other.data.len(),
            });
        }
        if self.data.is_empty() {
            return Ok(0.0);
        }
        let sum: f64 = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| ((a - b) as f64).powi(2))
            .sum();
        Ok((sum / self.data.len() as f64) as f32)
    }

    /// Size in bytes when stored as FP32.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}
