//! Slice quantizer
//!
//! Splits an R × C matrix into C/M column slices of width M, clusters each
//! slice's R row-vectors into K centers, and emits the stacked codebook plus
//! the assignment sequence ordered slice-major: all R labels of slice 0,
//! then all R labels of slice 1, and so on.

use crate::clustering::{count_distinct, Clusterer, KMeans};
use crate::config::QuantizerConfig;
use crate::{Codebook, PqError, Result, WeightMatrix};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Per-slice clustering diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceStats {
    /// Slice index
    pub slice: usize,
    /// Sum of squared distances to assigned centers
    pub inertia: f32,
    /// Lloyd iterations run
    pub iterations: usize,
    /// Met tolerance before the iteration cap
    pub converged: bool,
    /// Distinct row-vectors in the slice
    pub distinct_points: usize,
}

/// Codebook and assignments for one matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedSlices {
    /// Stacked codebook
    pub codebook: Codebook,
    /// `R * (C/M)` labels, slice-major
    pub assignments: Vec<u32>,
    /// Rows of the source matrix
    pub rows: usize,
    /// Columns of the source matrix
    pub cols: usize,
    /// Diagnostics per slice
    pub slice_stats: Vec<SliceStats>,
}

impl QuantizedSlices {
    /// Labels of one slice (R entries).
    pub fn slice_assignments(&self, slice: usize) -> &[u32] {
        &self.assignments[slice * self.rows..(slice + 1) * self.rows]
    }

    /// Total inertia over all slices.
    pub fn total_inertia(&self) -> f32 {
        self.slice_stats.iter().map(|s| s.inertia).sum()
    }

    /// Rebuild the approximate matrix.
    pub fn reconstruct(&self) -> Result<WeightMatrix> {
        reconstruct(&self.codebook, &self.assignments, self.rows, self.cols)
    }
}

/// Rebuild an R × C matrix from a codebook and slice-major labels.
pub fn reconstruct(
    codebook: &Codebook,
    assignments: &[u32],
    rows: usize,
    cols: usize,
) -> Result<WeightMatrix> {
    let m = codebook.slice_width();
    let num_slices = codebook.num_slices();
    if num_slices * m != cols {
        return Err(PqError::DimensionMismatch {
            expected: cols,
            actual: num_slices * m,
        });
    }
    if assignments.len() != rows * num_slices {
        return Err(PqError::DimensionMismatch {
            expected: rows * num_slices,
            actual: assignments.len(),
        });
    }

    let mut matrix = WeightMatrix::zeros(rows, cols);
    for slice in 0..num_slices {
        for r in 0..rows {
            let label = assignments[slice * rows + r] as usize;
            if label >= codebook.clusters() {
                return Err(PqError::IndexOutOfRange {
                    position: slice * rows + r,
                    value: label as u32,
                    clusters: codebook.clusters(),
                });
            }
            let row = matrix.row_mut(r);
            for d in 0..m {
                row[slice * m + d] = codebook.value(slice, label, d);
            }
        }
    }
    Ok(matrix)
}

/// Product quantizer over fixed-width column slices
pub struct SliceQuantizer {
    config: QuantizerConfig,
    clusterer: Box<dyn Clusterer>,
}

impl std::fmt::Debug for SliceQuantizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceQuantizer")
            .field("config", &self.config)
            .field("clusterer", &self.clusterer.name())
            .finish()
    }
}

impl SliceQuantizer {
    /// Create a quantizer using k-means from the config.
    pub fn new(config: QuantizerConfig) -> Self {
        let clusterer = Box::new(KMeans::new(config.clustering.clone()));
        Self { config, clusterer }
    }

    /// Create a quantizer with a custom clustering algorithm.
    pub fn with_clusterer(config: QuantizerConfig, clusterer: Box<dyn Clusterer>) -> Self {
        Self { config, clusterer }
    }

    /// Get configuration
    pub fn config(&self) -> &QuantizerConfig {
        &self.config
    }

    /// Quantize a matrix.
    ///
    /// (K, M) are validated against the matrix before any clustering runs.
    pub fn quantize(&self, matrix: &WeightMatrix) -> Result<QuantizedSlices> {
        let spec = self.config.spec;
        spec.validate_for(matrix.cols())?;
        if matrix.rows() == 0 {
            return Err(PqError::EmptyMatrix);
        }

        let num_slices = spec.num_slices(matrix.cols());
        let base_seed = self.config.seed.unwrap_or_else(rand::random);

        let results = self.cluster_slices(matrix, num_slices, base_seed)?;

        let mut groups = Vec::with_capacity(num_slices);
        let mut assignments = Vec::with_capacity(matrix.rows() * num_slices);
        let mut slice_stats = Vec::with_capacity(num_slices);
        for (clustering, stats) in results {
            groups.push(clustering.centers);
            assignments.extend_from_slice(&clustering.assignments);
            slice_stats.push(stats);
        }

        let codebook =
            Codebook::from_centers(spec.clusters, spec.slice_width, self.config.layout, &groups)?;

        let quantized = QuantizedSlices {
            codebook,
            assignments,
            rows: matrix.rows(),
            cols: matrix.cols(),
            slice_stats,
        };

        info!(
            "Quantized {}x{} matrix: K={}, M={}, {} slices, inertia {:.6}",
            matrix.rows(),
            matrix.cols(),
            spec.clusters,
            spec.slice_width,
            num_slices,
            quantized.total_inertia()
        );

        Ok(quantized)
    }

    #[cfg(feature = "parallel")]
    fn cluster_slices(
        &self,
        matrix: &WeightMatrix,
        num_slices: usize,
        base_seed: u64,
    ) -> Result<Vec<(crate::Clustering, SliceStats)>> {
        let run = || {
            (0..num_slices)
                .into_par_iter()
                .map(|slice| self.cluster_slice(matrix, slice, base_seed))
                .collect::<Result<Vec<_>>>()
        };

        if self.config.num_workers == 0 {
            return run();
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_workers)
            .build()
            .map_err(|e| PqError::config(format!("failed to create thread pool: {}", e)))?;
        pool.install(run)
    }

    #[cfg(not(feature = "parallel"))]
    fn cluster_slices(
        &self,
        matrix: &WeightMatrix,
        num_slices: usize,
        base_seed: u64,
    ) -> Result<Vec<(crate::Clustering, SliceStats)>> {
        (0..num_slices)
            .map(|slice| self.cluster_slice(matrix, slice, base_seed))
            .collect()
    }

    /// Cluster one slice with a seed derived from the slice index.
    fn cluster_slice(
        &self,
        matrix: &WeightMatrix,
        slice: usize,
        base_seed: u64,
    ) -> Result<(crate::Clustering, SliceStats)> {
        let spec = self.config.spec;
        let width = spec.slice_width;
        let points = matrix.column_slice(slice * width, width);
        let distinct_points = count_distinct(&points, width);

        if distinct_points < spec.clusters {
            warn!(
                "Slice {} has {} distinct rows for {} clusters; centers will collapse",
                slice, distinct_points, spec.clusters
            );
        }

        let seed = slice_seed(base_seed, slice);
        let clustering = self
            .clusterer
            .cluster(&points, width, spec.clusters, seed)?;
        check_clustering(&clustering, slice, matrix.rows(), spec.clusters, width)?;

        if !clustering.converged {
            warn!(
                "Slice {} stopped after {} iterations without converging",
                slice, clustering.iterations
            );
        }
        debug!(
            "Slice {}: {} inertia {:.6} after {} iterations",
            slice,
            self.clusterer.name(),
            clustering.inertia,
            clustering.iterations
        );

        let stats = SliceStats {
            slice,
            inertia: clustering.inertia,
            iterations: clustering.iterations,
            converged: clustering.converged,
            distinct_points,
        };
        Ok((clustering, stats))
    }
}

/// Labels and centers must fit the slice before they join the sequence.
fn check_clustering(
    clustering: &crate::Clustering,
    slice: usize,
    rows: usize,
    clusters: usize,
    width: usize,
) -> Result<()> {
    if clustering.assignments.len() != rows {
        return Err(PqError::InvariantViolation(format!(
            "slice {}: {} labels for {} rows",
            slice,
            clustering.assignments.len(),
            rows
        )));
    }
    if clustering.centers.len() != clusters * width {
        return Err(PqError::InvariantViolation(format!(
            "slice {}: {} center values, expected {}",
            slice,
            clustering.centers.len(),
            clusters * width
        )));
    }
    if let Some(position) = clustering
        .assignments
        .iter()
        .position(|&label| label as usize >= clusters)
    {
        return Err(PqError::InvariantViolation(format!(
            "slice {}: label {} at row {} is not below {}",
            slice, clustering.assignments[position], position, clusters
        )));
    }
    Ok(())
}

/// Independent per-slice seed (SplitMix64 finalizer over base + slice).
fn slice_seed(base: u64, slice: usize) -> u64 {
    let mut z = base.wrapping_add((slice as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
