//! K-means clustering behind a swappable interface
//!
//! The quantizer only relies on the [`Clusterer`] contract: given a point set,
//! a cluster count and a seed, return K centers and one label per point.
//! [`KMeans`] is the default implementation (Lloyd iterations with k-means++
//! or random seeding and multiple restarts).

use crate::config::{ClusteringConfig, InitMethod};
use crate::{PqError, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Output of one clustering run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clustering {
    /// Centers, K × dim row-major
    pub centers: Vec<f32>,
    /// Label per input point, each in `[0, K)`
    pub assignments: Vec<u32>,
    /// Sum of squared distances to the assigned centers
    pub inertia: f32,
    /// Lloyd iterations performed by the kept run
    pub iterations: usize,
    /// Whether the kept run met the tolerance before `max_iterations`
    pub converged: bool,
}

impl Clustering {
    /// Number of points per cluster.
    pub fn cluster_sizes(&self, clusters: usize) -> Vec<usize> {
        let mut counts = vec![0usize; clusters];
        for &label in &self.assignments {
            counts[label as usize] += 1;
        }
        counts
    }
}

/// Clustering algorithm used per slice.
///
/// Implementations must be deterministic for a fixed `seed` and must break
/// ties between equidistant centers the same way on every call.
pub trait Clusterer: Send + Sync {
    /// Cluster `points` (N × `dim`, row-major) into `clusters` groups.
    fn cluster(&self, points: &[f32], dim: usize, clusters: usize, seed: u64)
        -> Result<Clustering>;

    /// Algorithm name for logging.
    fn name(&self) -> &'static str;
}

/// Lloyd's algorithm k-means
#[derive(Debug, Clone, Default)]
pub struct KMeans {
    config: ClusteringConfig,
}

impl KMeans {
    /// Create a new k-means clusterer
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Single seeded run
    fn run_single(&self, points: &[f32], dim: usize, k: usize, seed: u64) -> Clustering {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut centers = match self.config.init {
            InitMethod::KMeansPlusPlus => kmeans_pp_init(k, points, dim, &mut rng),
            InitMethod::Random => random_init(k, points, dim, &mut rng),
        };

        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..self.config.max_iterations {
            iterations = iter + 1;

            let (labels, _) = assign_clusters(&centers, points, dim);
            let updated = update_centers(&labels, points, &centers, dim);
            let shift = squared_distance(&centers, &updated);
            centers = updated;

            if shift <= self.config.tolerance {
                converged = true;
                break;
            }
        }

        let (assignments, inertia) = assign_clusters(&centers, points, dim);

        Clustering {
            centers,
            assignments,
            inertia,
            iterations,
            converged,
        }
    }
}

impl Clusterer for KMeans {
    fn cluster(
        &self,
        points: &[f32],
        dim: usize,
        clusters: usize,
        seed: u64,
    ) -> Result<Clustering> {
        if dim == 0 || clusters == 0 {
            return Err(PqError::config(format!(
                "cannot cluster into {} clusters of dimension {}",
                clusters, dim
            )));
        }
        if points.is_empty() {
            return Err(PqError::EmptyMatrix);
        }
        if !points.len().is_multiple_of(dim) {
            return Err(PqError::DimensionMismatch {
                expected: (points.len() / dim + 1) * dim,
                actual: points.len(),
            });
        }

        let mut best: Option<Clustering> = None;
        for restart in 0..self.config.num_init.max(1) {
            let run = self.run_single(points, dim, clusters, seed.wrapping_add(restart as u64));
            let better = best.as_ref().is_none_or(|b| run.inertia < b.inertia);
            if better {
                best = Some(run);
            }
        }

        best.ok_or_else(|| PqError::InvariantViolation("no clustering run completed".into()))
    }

    fn name(&self) -> &'static str {
        "kmeans"
    }
}

/// K-means++ seeding. Falls back to uniform picks once every point
/// coincides with an existing center.
fn kmeans_pp_init(k: usize, points: &[f32], dim: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = points.len() / dim;
    let mut centers = Vec::with_capacity(k * dim);
    let mut distances = vec![f32::INFINITY; n];

    let first = rng.gen_range(0..n);
    centers.extend_from_slice(&points[first * dim..(first + 1) * dim]);

    for _ in 1..k {
        let last = centers.len() - dim;
        for (i, d) in distances.iter_mut().enumerate() {
            let dist = squared_distance(&points[i * dim..(i + 1) * dim], &centers[last..]);
            *d = d.min(dist);
        }

        let total: f64 = distances.iter().map(|&d| d as f64).sum();
        let chosen = if total > 0.0 {
            let threshold = rng.gen::<f64>() * total;
            let mut cumsum = 0.0f64;
            let mut chosen = None;
            let mut last_positive = 0;
            for (i, &d) in distances.iter().enumerate() {
                if d <= 0.0 {
                    continue;
                }
                last_positive = i;
                cumsum += d as f64;
                if cumsum >= threshold {
                    chosen = Some(i);
                    break;
                }
            }
            chosen.unwrap_or(last_positive)
        } else {
            rng.gen_range(0..n)
        };

        centers.extend_from_slice(&points[chosen * dim..(chosen + 1) * dim]);
    }

    centers
}

/// Random seeding from distinct point indices, repeating points when N < K.
fn random_init(k: usize, points: &[f32], dim: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = points.len() / dim;
    let mut indices: Vec<usize> = (0..n).choose_multiple(rng, k);
    while indices.len() < k {
        indices.push(rng.gen_range(0..n));
    }

    let mut centers = Vec::with_capacity(k * dim);
    for idx in indices {
        centers.extend_from_slice(&points[idx * dim..(idx + 1) * dim]);
    }
    centers
}

/// Nearest center per point (lowest index wins ties) and total inertia.
fn assign_clusters(centers: &[f32], points: &[f32], dim: usize) -> (Vec<u32>, f32) {
    let n = points.len() / dim;
    let k = centers.len() / dim;
    let mut inertia = 0.0f64;

    let labels = (0..n)
        .map(|i| {
            let point = &points[i * dim..(i + 1) * dim];
            let mut best_idx = 0;
            let mut best_dist = f32::INFINITY;

            for j in 0..k {
                let dist = squared_distance(point, &centers[j * dim..(j + 1) * dim]);
                if dist < best_dist {
                    best_dist = dist;
                    best_idx = j;
                }
            }

            inertia += best_dist as f64;
            best_idx as u32
        })
        .collect();

    (labels, inertia as f32)
}

/// Mean of each cluster's members; empty clusters keep their previous center.
fn update_centers(labels: &[u32], points: &[f32], previous: &[f32], dim: usize) -> Vec<f32> {
    let k = previous.len() / dim;
    let mut sums = vec![0.0f64; k * dim];
    let mut counts = vec![0usize; k];

    for (i, &label) in labels.iter().enumerate() {
        let c = label as usize;
        counts[c] += 1;
        for d in 0..dim {
            sums[c * dim + d] += points[i * dim + d] as f64;
        }
    }

    let mut centers = previous.to_vec();
    for j in 0..k {
        if counts[j] > 0 {
            for d in 0..dim {
                centers[j * dim + d] = (sums[j * dim + d] / counts[j] as f64) as f32;
            }
        }
    }
    centers
}

/// Squared L2 distance
fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Number of distinct points (bitwise) in an N × `dim` point set.
pub fn count_distinct(points: &[f32], dim: usize) -> usize {
    if dim == 0 {
        return 0;
    }
    points
        .chunks_exact(dim)
        .map(|p| p.iter().map(|v| v.to_bits()).collect::<Vec<u32>>())
        .collect::<HashSet<_>>()
        .len()
}
