//! PQW (Product-Quantized Weights) file format

use crate::{PqError, QuantizedLayer, Result, PQW_MAGIC, PQW_VERSION};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

/// PQW file header.
///
/// # Binary Layout
///
/// ```text
/// Offset  Size   Field
/// ──────  ────   ─────
/// 0       4      magic ("PQW\0")
/// 4       2      version (u16)
/// 6       8      clusters K (u64)
/// 14      8      slice_width M (u64)
/// 22      8      rows (u64)
/// 30      8      cols (u64)
/// 38      8      layer_len (u64)
/// 46      8      metadata_len (u64)
/// ──────────────────────────────────
/// Total: 54 bytes
/// ```
///
/// All integers are little-endian. The layer section (bincode) follows the
/// header, then the metadata section (bincode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PqwHeader {
    /// Magic bytes
    pub magic: [u8; 4],
    /// Format version
    pub version: u16,
    /// Clusters per slice
    pub clusters: u64,
    /// Slice width
    pub slice_width: u64,
    /// Matrix rows
    pub rows: u64,
    /// Matrix columns
    pub cols: u64,
    /// Layer section length
    pub layer_len: u64,
    /// Metadata section length
    pub metadata_len: u64,
}

impl PqwHeader {
    /// Header size in bytes
    pub const SIZE: usize = 54;

    /// Header describing `layer`, section lengths left at zero.
    pub fn for_layer(layer: &QuantizedLayer) -> Self {
        Self {
            magic: PQW_MAGIC,
            version: PQW_VERSION,
            clusters: layer.clusters as u64,
            slice_width: layer.slice_width as u64,
            rows: layer.rows as u64,
            cols: layer.cols as u64,
            layer_len: 0,
            metadata_len: 0,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE);
        bytes.extend_from_slice(&self.magic);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.clusters.to_le_bytes());
        bytes.extend_from_slice(&self.slice_width.to_le_bytes());
        bytes.extend_from_slice(&self.rows.to_le_bytes());
        bytes.extend_from_slice(&self.cols.to_le_bytes());
        bytes.extend_from_slice(&self.layer_len.to_le_bytes());
        bytes.extend_from_slice(&self.metadata_len.to_le_bytes());
        bytes
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(PqError::InvalidFormat("Header too short".into()));
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != PQW_MAGIC {
            return Err(PqError::InvalidFormat("Invalid magic bytes".into()));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != PQW_VERSION {
            return Err(PqError::InvalidFormat(format!(
                "Unsupported version {}",
                version
            )));
        }

        Ok(Self {
            magic,
            version,
            clusters: read_u64(&bytes[6..14]),
            slice_width: read_u64(&bytes[14..22]),
            rows: read_u64(&bytes[22..30]),
            cols: read_u64(&bytes[30..38]),
            layer_len: read_u64(&bytes[38..46]),
            metadata_len: read_u64(&bytes[46..54]),
        })
    }
}

fn read_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Read exactly `len` bytes, growing the buffer only as data arrives.
fn read_section<R: Read>(reader: &mut R, len: u64, section: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.take(len).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != len {
        return Err(PqError::InvalidFormat(format!(
            "{} section truncated: {} of {} bytes",
            section,
            bytes.len(),
            len
        )));
    }
    Ok(bytes)
}

/// PQW file metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PqwMetadata {
    /// Source model identifier
    pub model_id: String,
    /// Seed the quantization ran with, if fixed
    pub seed: Option<u64>,
    /// Creation timestamp
    pub created_at: u64,
    /// Encoder version
    pub encoder_version: String,
}

impl PqwMetadata {
    /// Create new metadata
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            seed: None,
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            encoder_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// PQW file container
#[derive(Debug, Clone, PartialEq)]
pub struct PqwFile {
    /// File header
    pub header: PqwHeader,
    /// Compressed layer
    pub layer: QuantizedLayer,
    /// File metadata
    pub metadata: PqwMetadata,
}

impl PqwFile {
    /// Create a new PQW file
    pub fn new(layer: QuantizedLayer, metadata: PqwMetadata) -> Self {
        Self {
            header: PqwHeader::for_layer(&layer),
            layer,
            metadata,
        }
    }

    /// Write to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let layer_bytes =
            bincode::serialize(&self.layer).map_err(|e| PqError::Serialization(e.to_string()))?;
        let metadata_bytes = bincode::serialize(&self.metadata)
            .map_err(|e| PqError::Serialization(e.to_string()))?;

        let header = PqwHeader {
            layer_len: layer_bytes.len() as u64,
            metadata_len: metadata_bytes.len() as u64,
            ..PqwHeader::for_layer(&self.layer)
        };

        writer.write_all(&header.to_bytes())?;
        writer.write_all(&layer_bytes)?;
        writer.write_all(&metadata_bytes)?;

        Ok(())
    }

    /// Read from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut header_bytes = vec![0u8; PqwHeader::SIZE];
        reader.read_exact(&mut header_bytes)?;
        let header = PqwHeader::from_bytes(&header_bytes)?;

        let layer_bytes = read_section(reader, header.layer_len, "layer")?;
        let layer: QuantizedLayer = bincode::deserialize(&layer_bytes)
            .map_err(|e| PqError::InvalidFormat(e.to_string()))?;
        layer
            .validate()
            .map_err(|e| PqError::InvalidFormat(format!("layer {}: {}", layer.name, e)))?;

        let metadata_bytes = read_section(reader, header.metadata_len, "metadata")?;
        let metadata: PqwMetadata = bincode::deserialize(&metadata_bytes)
            .map_err(|e| PqError::InvalidFormat(e.to_string()))?;

        let expected = PqwHeader {
            layer_len: header.layer_len,
            metadata_len: header.metadata_len,
            ..PqwHeader::for_layer(&layer)
        };
        if expected != header {
            return Err(PqError::InvalidFormat(
                "Header does not match layer parameters".into(),
            ));
        }

        Ok(Self {
            header,
            layer,
            metadata,
        })
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(buffer)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        Self::read_from(&mut cursor)
    }

    /// Write to file path
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        self.write_to(&mut file)?;
        file.flush()?;
        Ok(())
    }

    /// Read from file path
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = std::io::BufReader::new(std::fs::File::open(path)?);
        Self::read_from(&mut file)
    }
}
