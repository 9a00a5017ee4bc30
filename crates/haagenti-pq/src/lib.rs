//! Product Quantization for Layer Weights
//!
//! Compresses a dense weight matrix into a per-slice codebook and a
//! bit-packed index stream.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Product Quantization Codec                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  W (R × C)                                                       │
//! │   │  split into C/M column slices of width M                     │
//! │   ▼                                                              │
//! │  ┌─────────┐  ┌─────────┐       ┌─────────┐                      │
//! │  │ slice 0 │  │ slice 1 │  ...  │ slice S │   k-means, K centers │
//! │  └────┬────┘  └────┬────┘       └────┬────┘                      │
//! │       ▼            ▼                 ▼                           │
//! │  Codebook (K·S × M)      Assignments (R·S labels, slice-major)   │
//! │                                  │                               │
//! │                                  ▼                               │
//! │                    Packed words (log2 K bits per label,          │
//! │                    MSB first, may straddle word boundaries)      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use haagenti_pq::{LayerCompressor, LayerDescriptor, LayerKind, QuantizerConfig, WeightMatrix};
//!
//! let data: Vec<f32> = (0..64 * 8).map(|i| (i as f32 * 0.3).sin()).collect();
//! let matrix = WeightMatrix::new(64, 8, data)?;
//! let descriptor = LayerDescriptor::new("fc6", LayerKind::FullyConnected, 64, 8);
//!
//! let compressor = LayerCompressor::new(QuantizerConfig::with_spec(16, 4).seeded(42));
//! let layer = compressor.compress(&descriptor, &matrix)?;
//!
//! assert_eq!(layer.assignments()?.len(), 64 * 2);
//! let approx = layer.reconstruct()?;
//! assert_eq!(approx.shape(), (64, 8));
//! # Ok::<(), haagenti_pq::PqError>(())
//! ```

pub mod clustering;
pub mod codebook;
pub mod config;
mod error;
pub mod format;
pub mod layer;
pub mod matrix;
pub mod packing;
pub mod quantizer;

pub use clustering::{Clusterer, Clustering, KMeans};
pub use codebook::Codebook;
pub use config::{ClusteringConfig, InitMethod, QuantizerConfig, SliceSpec, StorageLayout};
pub use error::{PqError, Result};
pub use format::{PqwFile, PqwHeader, PqwMetadata};
pub use layer::{CompressionStats, LayerCompressor, LayerDescriptor, LayerKind, QuantizedLayer};
pub use matrix::WeightMatrix;
pub use packing::{index_bits, pack, packed_len, unpack, PackedBuffer};
pub use quantizer::{QuantizedSlices, SliceQuantizer, SliceStats};

/// File extension for product-quantized weights
pub const PQW_EXTENSION: &str = "pqw";

/// Magic bytes for PQW format
pub const PQW_MAGIC: [u8; 4] = [0x50, 0x51, 0x57, 0x00]; // "PQW\0"

/// Current PQW format version
pub const PQW_VERSION: u16 = 1;

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        LayerCompressor, LayerDescriptor, LayerKind, PackedBuffer, QuantizedLayer,
        QuantizerConfig, Result, SliceQuantizer, WeightMatrix,
    };
}
