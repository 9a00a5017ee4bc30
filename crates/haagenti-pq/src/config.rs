//! Quantizer configuration
//!
//! All knobs are plain serde structs passed into the entry points; nothing
//! here is read from the environment.

use crate::{PqError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cluster count and slice width for one quantization run.
///
/// `clusters` (K) must be a power of two no smaller than 2 so that every
/// index fits in exactly `log2(K)` bits. `slice_width` (M) must divide the
/// column count of the matrix being quantized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceSpec {
    /// Number of clusters per slice (K)
    #[serde(default = "default_clusters")]
    pub clusters: usize,
    /// Slice width in columns (M)
    #[serde(default = "default_slice_width")]
    pub slice_width: usize,
}

impl Default for SliceSpec {
    fn default() -> Self {
        Self {
            clusters: default_clusters(),
            slice_width: default_slice_width(),
        }
    }
}

impl SliceSpec {
    /// Create a new slice spec.
    pub fn new(clusters: usize, slice_width: usize) -> Self {
        Self {
            clusters,
            slice_width,
        }
    }

    /// Check K and M independently of any matrix.
    pub fn validate(&self) -> Result<()> {
        if self.clusters < 2 {
            return Err(PqError::config(format!(
                "cluster count must be at least 2, got {}",
                self.clusters
            )));
        }
        if !self.clusters.is_power_of_two() {
            return Err(PqError::config(format!(
                "cluster count must be a power of two, got {}",
                self.clusters
            )));
        }
        if self.clusters.trailing_zeros() > crate::packing::WORD_BITS {
            return Err(PqError::config(format!(
                "cluster count {} needs more than {} bits per index",
                self.clusters,
                crate::packing::WORD_BITS
            )));
        }
        if self.slice_width == 0 {
            return Err(PqError::config("slice width must be positive"));
        }
        Ok(())
    }

    /// Check K and M against a matrix with `cols` columns.
    pub fn validate_for(&self, cols: usize) -> Result<()> {
        self.validate()?;
        if cols == 0 || !cols.is_multiple_of(self.slice_width) {
            return Err(PqError::config(format!(
                "column count {} is not a positive multiple of slice width {}",
                cols, self.slice_width
            )));
        }
        Ok(())
    }

    /// Bits per stored index (`log2(K)`).
    pub fn index_bits(&self) -> u32 {
        self.clusters.trailing_zeros()
    }

    /// Number of slices a matrix with `cols` columns splits into.
    pub fn num_slices(&self, cols: usize) -> usize {
        cols / self.slice_width
    }
}

/// How each slice's K centers are laid out inside the stacked codebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageLayout {
    /// Group block is K × M: one center per row
    #[default]
    RowMajorClusters,
    /// Group block is M × K: one dimension per row
    ColumnMajorClusters,
}

/// Center seeding for Lloyd iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InitMethod {
    /// D² sampling
    #[default]
    KMeansPlusPlus,
    /// K distinct points drawn uniformly
    Random,
}

/// Configuration for the clustering step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Stop after this many Lloyd iterations even if not converged
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Number of seedings; the one with lowest inertia is kept
    #[serde(default = "default_num_init")]
    pub num_init: usize,
    /// Converged once the summed squared center shift drops to this
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    /// Seeding method
    #[serde(default)]
    pub init: InitMethod,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            num_init: default_num_init(),
            tolerance: default_tolerance(),
            init: InitMethod::default(),
        }
    }
}

/// Full configuration for a quantization run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizerConfig {
    /// K and M
    #[serde(default)]
    pub spec: SliceSpec,
    /// Codebook group layout
    #[serde(default)]
    pub layout: StorageLayout,
    /// Clustering parameters
    #[serde(default)]
    pub clustering: ClusteringConfig,
    /// Seed for reproducibility; `None` draws one per call
    #[serde(default)]
    pub seed: Option<u64>,
    /// Worker threads for slice clustering (0 = global rayon pool)
    #[serde(default)]
    pub num_workers: usize,
    /// Unpack after packing and compare with the assignments
    #[serde(default = "default_verify_roundtrip")]
    pub verify_roundtrip: bool,
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self {
            spec: SliceSpec::default(),
            layout: StorageLayout::default(),
            clustering: ClusteringConfig::default(),
            seed: None,
            num_workers: 0,
            verify_roundtrip: default_verify_roundtrip(),
        }
    }
}

impl QuantizerConfig {
    /// Config with the given K and M and defaults elsewhere.
    pub fn with_spec(clusters: usize, slice_width: usize) -> Self {
        Self {
            spec: SliceSpec::new(clusters, slice_width),
            ..Default::default()
        }
    }

    /// Set the seed.
    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the storage layout.
    pub fn layout(mut self, layout: StorageLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| PqError::config(e.to_string()))?;
        config.spec.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PqError::Serialization(e.to_string()))
    }
}

fn default_clusters() -> usize {
    32
}

fn default_slice_width() -> usize {
    4
}

fn default_max_iterations() -> usize {
    300
}

fn default_num_init() -> usize {
    3
}

fn default_tolerance() -> f32 {
    1e-4
}

fn default_verify_roundtrip() -> bool {
    true
}
