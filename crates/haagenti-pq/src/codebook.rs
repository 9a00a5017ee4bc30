//! Stacked per-slice codebooks

use crate::config::StorageLayout;
use crate::{PqError, Result};
use serde::{Deserialize, Serialize};

/// Cluster centers for every slice of a quantized matrix.
///
/// Group `s` holds slice `s`'s K centers. With
/// [`StorageLayout::RowMajorClusters`] a group is a K × M block (the stacked
/// table is `K*S × M`); with [`StorageLayout::ColumnMajorClusters`] it is an
/// M × K block (the stacked table is `M*S × K`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CodebookParts")]
pub struct Codebook {
    /// Centers per slice (K)
    clusters: usize,
    /// Center dimension (M)
    slice_width: usize,
    /// Number of groups (C / M)
    num_slices: usize,
    /// Group layout
    layout: StorageLayout,
    /// Stacked groups
    data: Vec<f32>,
}

/// Unchecked wire form of [`Codebook`]
#[derive(Deserialize)]
struct CodebookParts {
    clusters: usize,
    slice_width: usize,
    num_slices: usize,
    layout: StorageLayout,
    data: Vec<f32>,
}

impl TryFrom<CodebookParts> for Codebook {
    type Error = PqError;

    fn try_from(parts: CodebookParts) -> Result<Self> {
        Self::from_groups(
            parts.clusters,
            parts.slice_width,
            parts.num_slices,
            parts.layout,
            parts.data,
        )
    }
}

impl Codebook {
    /// Build from already laid-out groups.
    pub fn from_groups(
        clusters: usize,
        slice_width: usize,
        num_slices: usize,
        layout: StorageLayout,
        data: Vec<f32>,
    ) -> Result<Self> {
        let expected = clusters
            .checked_mul(slice_width)
            .and_then(|n| n.checked_mul(num_slices))
            .ok_or_else(|| {
                PqError::InvalidFormat(format!(
                    "codebook shape {} x {} x {} overflows",
                    clusters, slice_width, num_slices
                ))
            })?;
        if data.len() != expected {
            return Err(PqError::DimensionMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            clusters,
            slice_width,
            num_slices,
            layout,
            data,
        })
    }

    /// Build from K × M row-major center blocks, one per slice, re-laying
    /// each block according to `layout`.
    pub fn from_centers(
        clusters: usize,
        slice_width: usize,
        layout: StorageLayout,
        groups: &[Vec<f32>],
    ) -> Result<Self> {
        let group_len = clusters * slice_width;
        let mut data = Vec::with_capacity(group_len * groups.len());

        for centers in groups {
            if centers.len() != group_len {
                return Err(PqError::DimensionMismatch {
                    expected: group_len,
                    actual: centers.len(),
                });
            }
            match layout {
                StorageLayout::RowMajorClusters => data.extend_from_slice(centers),
                StorageLayout::ColumnMajorClusters => {
                    for d in 0..slice_width {
                        data.extend((0..clusters).map(|k| centers[k * slice_width + d]));
                    }
                }
            }
        }

        Self::from_groups(clusters, slice_width, groups.len(), layout, data)
    }

    /// Centers per slice (K).
    pub fn clusters(&self) -> usize {
        self.clusters
    }

    /// Center dimension (M).
    pub fn slice_width(&self) -> usize {
        self.slice_width
    }

    /// Number of slice groups.
    pub fn num_slices(&self) -> usize {
        self.num_slices
    }

    /// Group layout.
    pub fn layout(&self) -> StorageLayout {
        self.layout
    }

    /// `(rows, cols)` of the stacked table.
    pub fn shape(&self) -> (usize, usize) {
        match self.layout {
            StorageLayout::RowMajorClusters => {
                (self.clusters * self.num_slices, self.slice_width)
            }
            StorageLayout::ColumnMajorClusters => {
                (self.slice_width * self.num_slices, self.clusters)
            }
        }
    }

    /// Stacked table, row-major.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// One slice's group block.
    pub fn group(&self, slice: usize) -> &[f32] {
        let len = self.clusters * self.slice_width;
        &self.data[slice * len..(slice + 1) * len]
    }

    /// Component `dim` of center `cluster` in slice `slice`.
    pub fn value(&self, slice: usize, cluster: usize, dim: usize) -> f32 {
        let group = self.group(slice);
        match self.layout {
            StorageLayout::RowMajorClusters => group[cluster * self.slice_width + dim],
            StorageLayout::ColumnMajorClusters => group[dim * self.clusters + cluster],
        }
    }

    /// Center `cluster` of slice `slice` as an M-vector.
    pub fn center(&self, slice: usize, cluster: usize) -> Option<Vec<f32>> {
        if slice >= self.num_slices || cluster >= self.clusters {
            return None;
        }
        Some(
            (0..self.slice_width)
                .map(|d| self.value(slice, cluster, d))
                .collect(),
        )
    }

    /// Dot product of every center in `slice` with `x` (an M-vector).
    pub fn lookup_table(&self, slice: usize, x: &[f32]) -> Result<Vec<f32>> {
        if x.len() != self.slice_width {
            return Err(PqError::DimensionMismatch {
                expected: self.slice_width,
                actual: x.len(),
            });
        }
        if slice >= self.num_slices {
            return Err(PqError::DimensionMismatch {
                expected: self.num_slices,
                actual: slice + 1,
            });
        }

        let group = self.group(slice);
        let table = match self.layout {
            StorageLayout::RowMajorClusters => group
                .chunks_exact(self.slice_width)
                .map(|c| c.iter().zip(x).map(|(a, b)| a * b).sum())
                .collect(),
            StorageLayout::ColumnMajorClusters => {
                let mut table = vec![0.0f32; self.clusters];
                for (d, &xd) in x.iter().enumerate() {
                    let row = &group[d * self.clusters..(d + 1) * self.clusters];
                    for (t, &c) in table.iter_mut().zip(row) {
                        *t += c * xd;
                    }
                }
                table
            }
        };
        Ok(table)
    }

    /// Memory size in bytes (FP32 centers).
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| PqError::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| PqError::InvalidFormat(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_slices() -> Vec<Vec<f32>> {
        // K=2, M=3
        vec![
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            vec![-1.0, -2.0, -3.0, -4.0, -5.0, -6.0],
        ]
    }

    #[test]
    fn test_row_major_layout() {
        let cb = Codebook::from_centers(2, 3, StorageLayout::RowMajorClusters, &two_slices())
            .unwrap();
        assert_eq!(cb.shape(), (4, 3));
        assert_eq!(cb.group(0), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(cb.center(1, 1).unwrap(), vec![-4.0, -5.0, -6.0]);
    }

    #[test]
    fn test_column_major_layout() {
        let cb = Codebook::from_centers(2, 3, StorageLayout::ColumnMajorClusters, &two_slices())
            .unwrap();
        assert_eq!(cb.shape(), (6, 2));
        // dimension-major: [c0d0, c1d0, c0d1, c1d1, c0d2, c1d2]
        assert_eq!(cb.group(0), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(cb.center(0, 1).unwrap(), vec![4.0, 5.0, 6.0]);
        assert_eq!(cb.center(1, 0).unwrap(), vec![-1.0, -2.0, -3.0]);
    }

    #[test]
    fn test_center_out_of_range() {
        let cb = Codebook::from_centers(2, 3, StorageLayout::RowMajorClusters, &two_slices())
            .unwrap();
        assert!(cb.center(2, 0).is_none());
        assert!(cb.center(0, 2).is_none());
    }

    #[test]
    fn test_lookup_table_matches_layouts() {
        let x = [1.0, 0.5, -1.0];
        for layout in [
            StorageLayout::RowMajorClusters,
            StorageLayout::ColumnMajorClusters,
        ] {
            let cb = Codebook::from_centers(2, 3, layout, &two_slices()).unwrap();
            let table = cb.lookup_table(0, &x).unwrap();
            assert_eq!(table, vec![-1.0, 0.5]);
        }
    }

    #[test]
    fn test_rejects_bad_group() {
        let groups = vec![vec![0.0; 5]];
        assert!(Codebook::from_centers(2, 3, StorageLayout::RowMajorClusters, &groups).is_err());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let cb = Codebook::from_centers(2, 3, StorageLayout::ColumnMajorClusters, &two_slices())
            .unwrap();
        let bytes = cb.to_bytes().unwrap();
        assert_eq!(Codebook::from_bytes(&bytes).unwrap(), cb);
        assert!(Codebook::from_bytes(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn test_from_bytes_rejects_wrong_value_count() {
        #[derive(Serialize)]
        struct RawCodebook {
            clusters: usize,
            slice_width: usize,
            num_slices: usize,
            layout: StorageLayout,
            data: Vec<f32>,
        }

        let raw = RawCodebook {
            clusters: 4,
            slice_width: 2,
            num_slices: 3,
            layout: StorageLayout::RowMajorClusters,
            data: vec![0.0; 10],
        };
        let bytes = bincode::serialize(&raw).unwrap();
        let err = Codebook::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, PqError::InvalidFormat(_)));
    }

    #[test]
    fn test_memory_size() {
        let cb = Codebook::from_centers(2, 3, StorageLayout::RowMajorClusters, &two_slices())
            .unwrap();
        assert_eq!(cb.memory_size(), 12 * 4);
    }
}
