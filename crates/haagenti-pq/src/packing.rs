//! Dense bit-packing of cluster indices into 32-bit words
//!
//! Indices are written back to back, `log2(K)` bits each, most significant
//! bit first, with no padding. An index whose bits run past the end of a
//! word spills its low-order bits into the high-order bits of the next one.
//!
//! ```text
//! K = 32 (5 bits), indices [31, 0, 1, 2, 3, 4, 5]
//!
//! word 0: 11111 00000 00001 00010 00011 00100 00
//! word 1: 101 00000...
//!
//! index 6 (00101) straddles: 00 ends word 0, 101 starts word 1
//! ```

use crate::{PqError, Result};
use serde::{Deserialize, Serialize};

/// Width of one storage word in bits.
pub const WORD_BITS: u32 = 32;

/// Bits per index for `clusters` (K) centers.
///
/// K must be a power of two in `[2, 2^32]`.
pub fn index_bits(clusters: usize) -> Result<u32> {
    if clusters < 2 || !clusters.is_power_of_two() {
        return Err(PqError::config(format!(
            "cluster count must be a power of two >= 2, got {}",
            clusters
        )));
    }
    let bits = clusters.trailing_zeros();
    if bits > WORD_BITS {
        return Err(PqError::config(format!(
            "{} bits per index exceed the {}-bit word",
            bits, WORD_BITS
        )));
    }
    Ok(bits)
}

/// Words needed for `count` indices of `bits` bits: `ceil(count * bits / 32)`.
pub fn packed_len(count: usize, bits: u32) -> usize {
    (count * bits as usize).div_ceil(WORD_BITS as usize)
}

/// Packed index stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PackedParts")]
pub struct PackedBuffer {
    /// Packed words
    words: Vec<u32>,
    /// Bits per index
    bits: u32,
    /// Number of packed indices
    count: usize,
}

/// Unchecked wire form of [`PackedBuffer`]
#[derive(Deserialize)]
struct PackedParts {
    words: Vec<u32>,
    bits: u32,
    count: usize,
}

impl TryFrom<PackedParts> for PackedBuffer {
    type Error = PqError;

    fn try_from(parts: PackedParts) -> Result<Self> {
        Self::with_bits(parts.words, parts.count, parts.bits)
    }
}

impl PackedBuffer {
    /// Wrap existing words, checking they can hold `count` indices for K.
    pub fn from_words(words: Vec<u32>, count: usize, clusters: usize) -> Result<Self> {
        let bits = index_bits(clusters)?;
        Self::with_bits(words, count, bits)
    }

    fn with_bits(words: Vec<u32>, count: usize, bits: u32) -> Result<Self> {
        if bits == 0 || bits > WORD_BITS {
            return Err(PqError::config(format!(
                "{} bits per index is outside 1..={}",
                bits, WORD_BITS
            )));
        }
        let required = count
            .checked_mul(bits as usize)
            .map(|total| total.div_ceil(WORD_BITS as usize))
            .ok_or_else(|| PqError::config(format!("{} indices overflow the bit count", count)))?;
        if words.len() < required {
            return Err(PqError::BufferTooSmall {
                required,
                provided: words.len(),
            });
        }
        Ok(Self { words, bits, count })
    }

    /// Packed words.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Consume into the packed words.
    pub fn into_words(self) -> Vec<u32> {
        self.words
    }

    /// Bits per index.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of packed indices.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True if no words are held.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<u32>()
    }

    /// Cluster count these indices were packed for.
    pub fn clusters(&self) -> usize {
        1usize << self.bits
    }

    /// Recover the index sequence.
    pub fn unpack(&self) -> Result<Vec<u32>> {
        unpack(&self.words, self.count, self.clusters())
    }

    /// Reinterpret every word as an f32 with the same bit pattern, for
    /// consumers that only store float blobs.
    pub fn to_f32_bits(&self) -> Vec<f32> {
        self.words.iter().map(|&w| f32::from_bits(w)).collect()
    }

    /// Inverse of [`PackedBuffer::to_f32_bits`].
    pub fn from_f32_bits(floats: &[f32], count: usize, clusters: usize) -> Result<Self> {
        let words = floats.iter().map(|f| f.to_bits()).collect();
        Self::from_words(words, count, clusters)
    }
}

/// Pack indices in `[0, K)` at `log2(K)` bits each.
pub fn pack(indices: &[u32], clusters: usize) -> Result<PackedBuffer> {
    let bits = index_bits(clusters)?;
    let mut words = vec![0u32; packed_len(indices.len(), bits)];
    let rest = (WORD_BITS - bits) as i64;

    let mut bit_offset = 0usize;
    for (position, &value) in indices.iter().enumerate() {
        if value as u64 >= clusters as u64 {
            return Err(PqError::IndexOutOfRange {
                position,
                value,
                clusters,
            });
        }

        let word = bit_offset / WORD_BITS as usize;
        let bit_in_word = (bit_offset % WORD_BITS as usize) as i64;
        let shift = rest - bit_in_word;

        if shift >= 0 {
            words[word] |= value << shift;
        } else {
            words[word] |= value >> -shift;
            words[word + 1] |= value << (shift + WORD_BITS as i64);
        }

        bit_offset += bits as usize;
    }

    Ok(PackedBuffer {
        words,
        bits,
        count: indices.len(),
    })
}

/// Extract `count` indices packed at `log2(K)` bits from `words`.
pub fn unpack(words: &[u32], count: usize, clusters: usize) -> Result<Vec<u32>> {
    let bits = index_bits(clusters)?;
    let required = packed_len(count, bits);
    if words.len() < required {
        return Err(PqError::BufferTooSmall {
            required,
            provided: words.len(),
        });
    }

    let mask = if bits == WORD_BITS {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    };
    let rest = (WORD_BITS - bits) as i64;

    let mut indices = Vec::with_capacity(count);
    let mut bit_offset = 0usize;
    for _ in 0..count {
        let word = bit_offset / WORD_BITS as usize;
        let bit_in_word = (bit_offset % WORD_BITS as usize) as i64;
        let shift = rest - bit_in_word;

        let value = if shift >= 0 {
            words[word] >> shift
        } else {
            (words[word] << -shift) | (words[word + 1] >> (shift + WORD_BITS as i64))
        };
        indices.push(value & mask);

        bit_offset += bits as usize;
    }

    Ok(indices)
}
