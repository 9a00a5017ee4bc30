//! End-to-end quantize → pack → unpack → reconstruct.

use haagenti_pq::prelude::*;
use haagenti_pq::{pack, packed_len, unpack, PqError, StorageLayout};

use super::banded_matrix;

#[test]
fn test_shape_invariants() {
    let matrix = banded_matrix(96, 24);
    for (k, m) in [(2, 1), (4, 2), (8, 3), (16, 6), (32, 24)] {
        let q = SliceQuantizer::new(QuantizerConfig::with_spec(k, m).seeded(1))
            .quantize(&matrix)
            .unwrap();
        let slices = 24 / m;
        assert_eq!(q.codebook.shape(), (k * slices, m), "K={} M={}", k, m);
        assert_eq!(q.assignments.len(), 96 * slices);
        assert!(q.assignments.iter().all(|&a| (a as usize) < k));

        let packed = pack(&q.assignments, k).unwrap();
        let bits = k.trailing_zeros() as usize;
        assert_eq!(packed.len(), (96 * slices * bits).div_ceil(32));
        assert_eq!(packed.len(), packed_len(q.assignments.len(), bits as u32));
        assert_eq!(unpack(packed.words(), q.assignments.len(), k).unwrap(), q.assignments);
    }
}

#[test]
fn test_transposed_groups() {
    let matrix = banded_matrix(40, 12);
    let config = QuantizerConfig::with_spec(8, 4)
        .seeded(2)
        .layout(StorageLayout::ColumnMajorClusters);
    let q = SliceQuantizer::new(config).quantize(&matrix).unwrap();

    // Each group is M rows of K values
    assert_eq!(q.codebook.shape(), (4 * 3, 8));
    for slice in 0..3 {
        for k in 0..8 {
            let center = q.codebook.center(slice, k).unwrap();
            let group = q.codebook.group(slice);
            for (d, value) in center.iter().enumerate() {
                assert_eq!(*value, group[d * 8 + k]);
            }
        }
    }
}

#[test]
fn test_many_slices_have_distinct_centers() {
    let matrix = banded_matrix(64, 32);
    let q = SliceQuantizer::new(QuantizerConfig::with_spec(4, 4).seeded(3))
        .quantize(&matrix)
        .unwrap();

    assert_eq!(q.codebook.num_slices(), 8);
    for a in 0..8 {
        for b in (a + 1)..8 {
            assert_ne!(q.codebook.group(a), q.codebook.group(b));
        }
    }
}

#[test]
fn test_determinism_across_runs() {
    let matrix = banded_matrix(128, 16);
    let config = QuantizerConfig::with_spec(16, 4).seeded(1234);
    let first = SliceQuantizer::new(config.clone()).quantize(&matrix).unwrap();
    let second = SliceQuantizer::new(config).quantize(&matrix).unwrap();

    assert_eq!(first.codebook, second.codebook);
    assert_eq!(first.assignments, second.assignments);
}

#[cfg(feature = "parallel")]
#[test]
fn test_worker_count_does_not_change_result() {
    let matrix = banded_matrix(64, 16);
    let mut config = QuantizerConfig::with_spec(8, 2).seeded(77);
    config.num_workers = 1;
    let single = SliceQuantizer::new(config.clone()).quantize(&matrix).unwrap();
    config.num_workers = 4;
    let multi = SliceQuantizer::new(config).quantize(&matrix).unwrap();

    assert_eq!(single, multi);
}

#[test]
fn test_reconstruction_error_drops_with_more_clusters() {
    let matrix = banded_matrix(128, 8);
    let descriptor = LayerDescriptor::new("fc", LayerKind::FullyConnected, 128, 8);

    let coarse = LayerCompressor::new(QuantizerConfig::with_spec(2, 4).seeded(5))
        .compress(&descriptor, &matrix)
        .unwrap();
    let fine = LayerCompressor::new(QuantizerConfig::with_spec(32, 4).seeded(5))
        .compress(&descriptor, &matrix)
        .unwrap();

    assert!(fine.stats.mse < coarse.stats.mse);
    assert!(coarse.stats.compression_ratio > fine.stats.compression_ratio);
}

#[test]
fn test_conv_layer_pipeline() {
    // (O=4, I=8, KH=3, KW=3)
    let (o, i, kh, kw) = (4, 8, 3, 3);
    let data: Vec<f32> = (0..o * i * kh * kw)
        .map(|n| ((n as f32) * 0.13).sin())
        .collect();
    let matrix = WeightMatrix::from_conv_weights(&data, o, i, kh, kw).unwrap();
    assert_eq!(matrix.shape(), (o * kh * kw, i));

    let descriptor = LayerDescriptor::new("conv2", LayerKind::Convolution, matrix.rows(), i);
    let layer = LayerCompressor::new(QuantizerConfig::with_spec(4, 2).seeded(8))
        .compress(&descriptor, &matrix)
        .unwrap();

    assert_eq!(layer.codebook.layout(), StorageLayout::RowMajorClusters);
    assert_eq!(layer.codebook.shape(), (4 * 4, 2));
    assert_eq!(layer.assignments().unwrap().len(), 36 * 4);

    let x: Vec<f32> = (0..i).map(|v| v as f32 - 3.5).collect();
    let approx = layer.matvec(&x).unwrap();
    let dense = layer.reconstruct().unwrap().matvec(&x).unwrap();
    for (a, b) in approx.iter().zip(&dense) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn test_configuration_rejection() {
    let matrix = banded_matrix(16, 8);
    let descriptor = LayerDescriptor::new("fc", LayerKind::FullyConnected, 16, 8);

    for (k, m) in [(3, 4), (4, 0), (4, 3), (6, 2)] {
        let err = LayerCompressor::new(QuantizerConfig::with_spec(k, m))
            .compress(&descriptor, &matrix)
            .unwrap_err();
        assert!(err.is_configuration(), "K={} M={}: {}", k, m, err);
    }

    assert!(matches!(
        pack(&[0, 1, 2], 3),
        Err(PqError::Configuration(_))
    ));
}

#[test]
fn test_exact_reconstruction_when_clusters_cover_rows() {
    // 4 distinct rows per slice, K=4: every row is its own center
    let rows = [
        [0.0, 1.0, 10.0, 11.0],
        [2.0, 3.0, 12.0, 13.0],
        [4.0, 5.0, 14.0, 15.0],
        [6.0, 7.0, 16.0, 17.0],
    ];
    let data: Vec<f32> = rows.iter().flatten().copied().collect();
    let matrix = WeightMatrix::new(4, 4, data).unwrap();
    let descriptor = LayerDescriptor::new("fc", LayerKind::FullyConnected, 4, 4);

    let layer = LayerCompressor::new(QuantizerConfig::with_spec(4, 2).seeded(0))
        .compress(&descriptor, &matrix)
        .unwrap();
    assert_eq!(layer.reconstruct().unwrap(), matrix);
    assert!(layer.stats.mse < 1e-12);
}
