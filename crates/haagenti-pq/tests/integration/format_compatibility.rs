//! Persistence of codebooks and PQW files.

use haagenti_pq::prelude::*;
use haagenti_pq::{Codebook, PqwFile, PqwMetadata, PQW_MAGIC};

use super::banded_matrix;

fn compressed_layer() -> QuantizedLayer {
    let matrix = banded_matrix(48, 16);
    let descriptor = LayerDescriptor::new("fc7", LayerKind::FullyConnected, 48, 16);
    LayerCompressor::new(QuantizerConfig::with_spec(16, 4).seeded(21))
        .compress(&descriptor, &matrix)
        .unwrap()
}

#[test]
fn test_codebook_save_load() {
    let layer = compressed_layer();
    let bytes = layer.codebook.to_bytes().unwrap();
    let restored = Codebook::from_bytes(&bytes).unwrap();
    assert_eq!(restored, layer.codebook);
}

#[test]
fn test_pqw_file_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fc7.pqw");

    let layer = compressed_layer();
    PqwFile::new(layer.clone(), PqwMetadata::new("alexnet"))
        .save(&path)
        .unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], &PQW_MAGIC);

    let loaded = PqwFile::load(&path).unwrap();
    assert_eq!(loaded.layer, layer);
    assert_eq!(loaded.metadata.model_id, "alexnet");

    // Resuming from disk reproduces the same weights without re-clustering
    assert_eq!(
        loaded.layer.reconstruct().unwrap(),
        layer.reconstruct().unwrap()
    );
}

#[test]
fn test_float_blob_resume() {
    let layer = compressed_layer();
    let blob = layer.packed.to_f32_bits();

    let restored = PackedBuffer::from_f32_bits(&blob, layer.packed.count(), layer.clusters).unwrap();
    assert_eq!(restored.unpack().unwrap(), layer.assignments().unwrap());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = PqwFile::load(&dir.path().join("absent.pqw")).unwrap_err();
    assert_eq!(err.category(), "io_error");
}
