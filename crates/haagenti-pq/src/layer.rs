//! Layer-level compression: quantize, pack, verify

use crate::config::{QuantizerConfig, StorageLayout};
use crate::packing::{self, PackedBuffer};
use crate::quantizer::{self, SliceQuantizer, SliceStats};
use crate::{Codebook, PqError, Result, WeightMatrix};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

/// Layer category of the model being compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    /// Convolution, weights flattened to `(O*KH*KW) × I`
    Convolution,
    /// Fully-connected (inner product)
    FullyConnected,
}

impl LayerKind {
    /// Codebook layout the layer's reconstruction expects.
    pub fn storage_layout(&self) -> StorageLayout {
        match self {
            LayerKind::Convolution => StorageLayout::RowMajorClusters,
            LayerKind::FullyConnected => StorageLayout::ColumnMajorClusters,
        }
    }
}

impl FromStr for LayerKind {
    type Err = PqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "conv" | "convolution" => Ok(LayerKind::Convolution),
            "fc" | "innerproduct" | "inner_product" | "fully_connected" | "linear" => {
                Ok(LayerKind::FullyConnected)
            }
            other => Err(PqError::UnsupportedLayer(other.to_string())),
        }
    }
}

/// Metadata the caller supplies alongside a weight matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Layer name
    pub name: String,
    /// Layer category
    pub kind: LayerKind,
    /// Matrix rows
    pub rows: usize,
    /// Matrix columns
    pub cols: usize,
}

impl LayerDescriptor {
    /// Create a descriptor
    pub fn new(name: impl Into<String>, kind: LayerKind, rows: usize, cols: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            rows,
            cols,
        }
    }
}

/// Statistics from compressing one layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    /// Mean squared reconstruction error
    pub mse: f32,
    /// Peak signal-to-noise ratio against the largest absolute weight
    pub psnr: f32,
    /// FP32 matrix size in bytes
    pub original_bytes: usize,
    /// Codebook plus packed indices in bytes
    pub compressed_bytes: usize,
    /// original / compressed
    pub compression_ratio: f32,
}

/// Compressed layer: codebook, packed indices and the parameters needed to
/// reverse the encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedLayer {
    /// Layer name
    pub name: String,
    /// Layer category
    pub kind: LayerKind,
    /// Matrix rows
    pub rows: usize,
    /// Matrix columns
    pub cols: usize,
    /// Clusters per slice (K)
    pub clusters: usize,
    /// Slice width (M)
    pub slice_width: usize,
    /// Stacked codebook
    pub codebook: Codebook,
    /// Packed assignment sequence
    pub packed: PackedBuffer,
    /// Compression statistics
    pub stats: CompressionStats,
    /// Per-slice clustering diagnostics
    pub slice_stats: Vec<SliceStats>,
}

impl QuantizedLayer {
    /// Check that the codebook, packed indices and layer shape agree.
    ///
    /// Every label decodes below K once `packed.bits() == log2(K)`, so a
    /// layer that passes can be reconstructed or multiplied without
    /// further bounds checks.
    pub fn validate(&self) -> Result<()> {
        let codebook = &self.codebook;
        if codebook.clusters() != self.clusters || codebook.slice_width() != self.slice_width {
            return Err(PqError::InvariantViolation(format!(
                "codebook is K={} M={}, layer is K={} M={}",
                codebook.clusters(),
                codebook.slice_width(),
                self.clusters,
                self.slice_width
            )));
        }
        if self.slice_width == 0 {
            return Err(PqError::config("slice width must be positive"));
        }

        let bits = packing::index_bits(self.clusters)?;
        if self.packed.bits() != bits {
            return Err(PqError::InvariantViolation(format!(
                "indices packed at {} bits, K={} needs {}",
                self.packed.bits(),
                self.clusters,
                bits
            )));
        }

        let num_slices = codebook.num_slices();
        let covered = num_slices.checked_mul(self.slice_width);
        if covered != Some(self.cols) {
            return Err(PqError::DimensionMismatch {
                expected: self.cols,
                actual: covered.unwrap_or(usize::MAX),
            });
        }

        let labels = self.rows.checked_mul(num_slices);
        if labels != Some(self.packed.count()) {
            return Err(PqError::DimensionMismatch {
                expected: labels.unwrap_or(usize::MAX),
                actual: self.packed.count(),
            });
        }

        Ok(())
    }

    /// Unpack the slice-major assignment sequence.
    pub fn assignments(&self) -> Result<Vec<u32>> {
        self.packed.unpack()
    }

    /// Rebuild the approximate R × C matrix.
    pub fn reconstruct(&self) -> Result<WeightMatrix> {
        self.validate()?;
        let assignments = self.assignments()?;
        quantizer::reconstruct(&self.codebook, &assignments, self.rows, self.cols)
    }

    /// Approximate `W · x` from per-slice lookup tables, without
    /// materializing W.
    pub fn matvec(&self, x: &[f32]) -> Result<Vec<f32>> {
        if x.len() != self.cols {
            return Err(PqError::DimensionMismatch {
                expected: self.cols,
                actual: x.len(),
            });
        }
        self.validate()?;

        let assignments = self.assignments()?;
        let m = self.slice_width;
        let mut y = vec![0.0f32; self.rows];

        for slice in 0..self.codebook.num_slices() {
            let table = self
                .codebook
                .lookup_table(slice, &x[slice * m..(slice + 1) * m])?;
            let labels = &assignments[slice * self.rows..(slice + 1) * self.rows];
            for (out, &label) in y.iter_mut().zip(labels) {
                *out += table[label as usize];
            }
        }

        Ok(y)
    }

    /// Codebook plus packed index bytes.
    pub fn compressed_size(&self) -> usize {
        self.codebook.memory_size() + self.packed.size_bytes()
    }
}

/// Runs quantize → pack → verify for whole layers
#[derive(Debug)]
pub struct LayerCompressor {
    config: QuantizerConfig,
}

impl LayerCompressor {
    /// Create a compressor. The config's layout is overridden per layer
    /// by [`LayerKind::storage_layout`].
    pub fn new(config: QuantizerConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    pub fn config(&self) -> &QuantizerConfig {
        &self.config
    }

    /// Compress one layer's weight matrix.
    pub fn compress(
        &self,
        descriptor: &LayerDescriptor,
        matrix: &WeightMatrix,
    ) -> Result<QuantizedLayer> {
        if matrix.shape() != (descriptor.rows, descriptor.cols) {
            return Err(PqError::DimensionMismatch {
                expected: descriptor.rows * descriptor.cols,
                actual: matrix.rows() * matrix.cols(),
            });
        }

        let config = self
            .config
            .clone()
            .layout(descriptor.kind.storage_layout());
        let spec = config.spec;
        let verify = config.verify_roundtrip;

        let quantized = SliceQuantizer::new(config).quantize(matrix)?;
        let packed = packing::pack(&quantized.assignments, spec.clusters)?;

        if verify {
            verify_roundtrip(&quantized.assignments, &packed)?;
        }

        let reconstructed = quantized.reconstruct()?;
        let mse = matrix.mse(&reconstructed)?;
        let peak = matrix
            .as_slice()
            .iter()
            .map(|v| v.abs())
            .fold(0.0f32, f32::max);

        let original_bytes = matrix.size_bytes();
        let compressed_bytes = quantized.codebook.memory_size() + packed.size_bytes();
        let stats = CompressionStats {
            mse,
            psnr: compute_psnr(mse, peak),
            original_bytes,
            compressed_bytes,
            compression_ratio: original_bytes as f32 / compressed_bytes.max(1) as f32,
        };

        info!(
            "Compressed layer {} ({:?}, {}x{}): {:.1}x, MSE {:.6e}",
            descriptor.name,
            descriptor.kind,
            descriptor.rows,
            descriptor.cols,
            stats.compression_ratio,
            stats.mse
        );

        Ok(QuantizedLayer {
            name: descriptor.name.clone(),
            kind: descriptor.kind,
            rows: descriptor.rows,
            cols: descriptor.cols,
            clusters: spec.clusters,
            slice_width: spec.slice_width,
            codebook: quantized.codebook,
            packed,
            stats,
            slice_stats: quantized.slice_stats,
        })
    }
}

/// Unpack and compare against the source sequence.
fn verify_roundtrip(assignments: &[u32], packed: &PackedBuffer) -> Result<()> {
    let unpacked = packed.unpack()?;
    if let Some(position) = assignments
        .iter()
        .zip(&unpacked)
        .position(|(a, b)| a != b)
    {
        return Err(PqError::InvariantViolation(format!(
            "unpacked index {} differs: {} != {}",
            position, unpacked[position], assignments[position]
        )));
    }
    if unpacked.len() != assignments.len() {
        return Err(PqError::InvariantViolation(format!(
            "unpacked {} indices, packed {}",
            unpacked.len(),
            assignments.len()
        )));
    }
    Ok(())
}

/// PSNR from MSE with the given peak value
fn compute_psnr(mse: f32, peak: f32) -> f32 {
    if mse < 1e-12 || peak <= 0.0 {
        return 100.0; // Perfect reconstruction
    }
    10.0 * (peak * peak / mse).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fc_matrix() -> WeightMatrix {
        let data = (0..16 * 8)
            .map(|i| ((i as f32 * 0.21).cos() * 0.5))
            .collect();
        WeightMatrix::new(16, 8, data).unwrap()
    }

    #[test]
    fn test_layer_kind_parsing() {
        assert_eq!("conv".parse::<LayerKind>().unwrap(), LayerKind::Convolution);
        assert_eq!(
            "InnerProduct".parse::<LayerKind>().unwrap(),
            LayerKind::FullyConnected
        );
        let err = "pooling".parse::<LayerKind>().unwrap_err();
        assert!(matches!(err, PqError::UnsupportedLayer(_)));
    }

    #[test]
    fn test_layout_mapping() {
        assert_eq!(
            LayerKind::FullyConnected.storage_layout(),
            StorageLayout::ColumnMajorClusters
        );
        assert_eq!(
            LayerKind::Convolution.storage_layout(),
            StorageLayout::RowMajorClusters
        );
    }

    #[test]
    fn test_compress_fc_layer() {
        let matrix = fc_matrix();
        let descriptor = LayerDescriptor::new("fc1", LayerKind::FullyConnected, 16, 8);
        let compressor = LayerCompressor::new(QuantizerConfig::with_spec(4, 2).seeded(3));
        let layer = compressor.compress(&descriptor, &matrix).unwrap();

        assert_eq!(layer.codebook.layout(), StorageLayout::ColumnMajorClusters);
        assert_eq!(layer.codebook.shape(), (2 * 4, 4));
        // 16 rows * 4 slices * 2 bits = 128 bits
        assert_eq!(layer.packed.len(), 4);
        assert_eq!(layer.assignments().unwrap().len(), 64);
        assert!(layer.stats.compression_ratio > 0.0);
        assert_eq!(layer.stats.original_bytes, 16 * 8 * 4);
        assert_eq!(layer.compressed_size(), layer.stats.compressed_bytes);
    }

    #[test]
    fn test_matvec_matches_reconstruction() {
        let matrix = fc_matrix();
        let compressor = LayerCompressor::new(QuantizerConfig::with_spec(4, 4).seeded(11));
        for kind in [LayerKind::FullyConnected, LayerKind::Convolution] {
            let descriptor = LayerDescriptor::new("w", kind, 16, 8);
            let layer = compressor.compress(&descriptor, &matrix).unwrap();

            let x: Vec<f32> = (0..8).map(|i| i as f32 * 0.25 - 1.0).collect();
            let fast = layer.matvec(&x).unwrap();
            let dense = layer.reconstruct().unwrap().matvec(&x).unwrap();
            for (a, b) in fast.iter().zip(&dense) {
                assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_stats_consistent_with_reconstruction() {
        let matrix = fc_matrix();
        let descriptor = LayerDescriptor::new("fc", LayerKind::FullyConnected, 16, 8);
        let layer = LayerCompressor::new(QuantizerConfig::with_spec(8, 2).seeded(4))
            .compress(&descriptor, &matrix)
            .unwrap();
        let mse = matrix.mse(&layer.reconstruct().unwrap()).unwrap();
        assert!((mse - layer.stats.mse).abs() < 1e-7);
    }

    #[test]
    fn test_shape_mismatch() {
        let descriptor = LayerDescriptor::new("fc", LayerKind::FullyConnected, 8, 16);
        let err = LayerCompressor::new(QuantizerConfig::with_spec(4, 2))
            .compress(&descriptor, &fc_matrix())
            .unwrap_err();
        assert!(matches!(err, PqError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_matvec_rejects_wrong_length() {
        let descriptor = LayerDescriptor::new("fc", LayerKind::FullyConnected, 16, 8);
        let layer = LayerCompressor::new(QuantizerConfig::with_spec(2, 2).seeded(0))
            .compress(&descriptor, &fc_matrix())
            .unwrap();
        assert!(layer.matvec(&[0.0; 3]).is_err());
    }

    fn fc_layer() -> QuantizedLayer {
        let descriptor = LayerDescriptor::new("fc", LayerKind::FullyConnected, 16, 8);
        LayerCompressor::new(QuantizerConfig::with_spec(4, 2).seeded(6))
            .compress(&descriptor, &fc_matrix())
            .unwrap()
    }

    #[test]
    fn test_validate_accepts_compressed_layer() {
        assert!(fc_layer().validate().is_ok());
    }

    #[test]
    fn test_row_count_mismatch_is_an_error() {
        let mut layer = fc_layer();
        layer.rows = 17;

        let err = layer.matvec(&[0.5; 8]).unwrap_err();
        assert!(matches!(
            err,
            PqError::DimensionMismatch {
                expected: 68,
                actual: 64
            }
        ));
        assert!(layer.reconstruct().is_err());
    }

    #[test]
    fn test_column_and_parameter_mismatch_is_an_error() {
        let mut wide = fc_layer();
        wide.cols = 10;
        assert!(matches!(
            wide.matvec(&[0.0; 10]).unwrap_err(),
            PqError::DimensionMismatch { .. }
        ));

        let mut recoded = fc_layer();
        recoded.clusters = 8;
        assert!(matches!(
            recoded.validate().unwrap_err(),
            PqError::InvariantViolation(_)
        ));

        let mut repacked = fc_layer();
        let labels = repacked.assignments().unwrap();
        repacked.packed = packing::pack(&labels, 16).unwrap();
        assert!(matches!(
            repacked.matvec(&[0.0; 8]).unwrap_err(),
            PqError::InvariantViolation(_)
        ));
    }

    #[test]
    fn test_deserialize_rejects_bad_bit_width() {
        let mut value = serde_json::to_value(fc_layer()).unwrap();
        value["packed"]["bits"] = serde_json::json!(64);
        assert!(serde_json::from_value::<QuantizedLayer>(value).is_err());
    }

    #[test]
    fn test_verify_roundtrip_detects_corruption() {
        let assignments = vec![1, 2, 3];
        let mut words = packing::pack(&assignments, 4).unwrap().into_words();
        words[0] ^= 1 << 31;
        let corrupted = PackedBuffer::from_words(words, 3, 4).unwrap();
        let err = verify_roundtrip(&assignments, &corrupted).unwrap_err();
        assert!(matches!(err, PqError::InvariantViolation(_)));
    }

    #[test]
    fn test_psnr() {
        assert!(compute_psnr(0.0009, 1.0) > 30.0);
        assert!(compute_psnr(0.1, 1.0) < 20.0);
        assert_eq!(compute_psnr(0.0, 1.0), 100.0);
    }
}
