//! Integration tests for the product quantization pipeline.
//!
//! These tests drive the public API end to end: raw matrix, slice
//! quantization, packing, persistence and reconstruction.

mod format_compatibility;
mod layer_pipeline;

use haagenti_pq::WeightMatrix;

/// Matrix whose column slices have clearly different value ranges.
pub fn banded_matrix(rows: usize, cols: usize) -> WeightMatrix {
    let data = (0..rows * cols)
        .map(|i| {
            let (r, c) = (i / cols, i % cols);
            (c as f32) * 2.0 + ((r * 7 + c * 3) % 11) as f32 * 0.1
        })
        .collect();
    WeightMatrix::new(rows, cols, data).unwrap()
}
