use super::{SamplingError, BYTES_PER_FLOAT, FLOATS_PER_PAIR};

/// Contiguous sub-range `[start, start + pairs)` of the sample batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: u64,
    pub start: u64,
    pub pairs: u64,
}

impl Chunk {
    pub fn end(&self) -> u64 {
        self.start + self.pairs
    }
}

/// Partition of `pairs` into chunks of `chunk_pairs`, the last chunk may be smaller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pairs: u64,
    chunk_pairs: u64,
    chunks: u64,
}

/// Number of whole pairs fitting into `bytes`.
///
/// Fractional pairs are truncated, so `total_bytes = 40.0` yields two pairs and the
/// remaining half pair is dropped.
pub fn pairs_for(name: &'static str, bytes: f64) -> Result<u64, SamplingError> {
    if bytes.is_nan() || bytes <= 0.0 {
        return Err(SamplingError::InvalidArgument {
            name,
            value: bytes,
            reason: "must be a positive number of bytes",
        });
    }

    let pairs = (bytes / BYTES_PER_FLOAT / FLOATS_PER_PAIR).floor();

    // u64::MAX as f64 rounds up to 2^64, which is already out of range
    if pairs >= u64::MAX as f64 {
        return Err(SamplingError::ArithmeticOverflow(format!(
            "{name} = {bytes} bytes holds more pairs than fit into u64"
        )));
    }

    if pairs < 1.0 {
        return Err(SamplingError::InvalidArgument {
            name,
            value: bytes,
            reason: "smaller than a single pair of float64 values",
        });
    }

    Ok(pairs as u64)
}

impl ChunkPlan {
    pub fn new(total_bytes: f64, chunk_bytes: f64) -> Result<Self, SamplingError> {
        let pairs = pairs_for("total_bytes", total_bytes)?;
        let chunk_pairs = pairs_for("chunk_bytes", chunk_bytes)?;

        Ok(Self::from_pairs(pairs, chunk_pairs))
    }

    /// build a plan from pair counts directly, both must be non-zero
    pub(crate) fn from_pairs(pairs: u64, chunk_pairs: u64) -> Self {
        debug_assert!(pairs > 0 && chunk_pairs > 0);

        Self {
            pairs,
            chunk_pairs,
            chunks: pairs / chunk_pairs + u64::from(pairs % chunk_pairs != 0),
        }
    }

    /// total number of pairs in the batch
    pub fn pairs(&self) -> u64 {
        self.pairs
    }

    /// pairs per full chunk
    pub fn chunk_pairs(&self) -> u64 {
        self.chunk_pairs
    }

    /// number of chunks, including the remainder chunk
    pub fn len(&self) -> u64 {
        self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks == 0
    }

    /// pairs in the trailing remainder chunk, `None` if the batch divides evenly
    pub fn remainder(&self) -> Option<u64> {
        match self.pairs % self.chunk_pairs {
            0 => None,
            remainder => Some(remainder),
        }
    }

    pub fn chunk(&self, index: u64) -> Option<Chunk> {
        if index >= self.chunks {
            return None;
        }

        let start = index * self.chunk_pairs;

        Some(Chunk {
            index,
            start,
            pairs: self.chunk_pairs.min(self.pairs - start),
        })
    }

    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        (0..self.chunks).filter_map(|index| self.chunk(index))
    }
}
