use super::Chunk;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// 32 bit stream words consumed by one pair (two u64 draws)
const WORDS_PER_PAIR: u128 = 4;

/// Where the seed of an estimation run comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedPolicy {
    /// fresh seed from the thread local generator for every run
    #[default]
    Entropy,
    /// every run uses the same seed, results are reproducible
    Fixed(u64),
}

impl SeedPolicy {
    pub fn next_seed(&self) -> u64 {
        match self {
            Self::Entropy => rand::thread_rng().gen(),
            Self::Fixed(seed) => *seed,
        }
    }
}

impl From<Option<u64>> for SeedPolicy {
    fn from(seed: Option<u64>) -> Self {
        seed.map_or(Self::Entropy, Self::Fixed)
    }
}

/// Draws the pairs of a chunk from a single seeded ChaCha8 stream.
///
/// Pair `i` of the batch always lives at stream word `4 * i`, every chunk seeks to its own
/// offset. Chunks therefore read disjoint parts of the stream and the summed count does not
/// depend on how the batch was partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSampler {
    seed: u64,
}

impl ChunkSampler {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// generator positioned at pair `start` of the batch
    pub fn rng_at(&self, start: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_word_pos(u128::from(start) * WORDS_PER_PAIR);

        rng
    }

    /// count pairs of `chunk` inside the unit quarter circle
    pub fn count(&self, chunk: &Chunk) -> u64 {
        count_inside(&mut self.rng_at(chunk.start), chunk.pairs)
    }
}

/// draw `pairs` pairs from `rng` and count those with x² + y² < 1
pub fn count_inside<R: Rng + ?Sized>(rng: &mut R, pairs: u64) -> u64 {
    (0..pairs).fold(0, |inside, _| {
        let x: f64 = rng.gen();
        let y: f64 = rng.gen();

        inside + u64::from(x * x + y * y < 1.0)
    })
}

/// Membership count of a single chunk, exchanged with job step workers as YAML
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkCount {
    pub start: u64,
    pub pairs: u64,
    pub inside: u64,
}

impl ChunkCount {
    pub fn compute(sampler: &ChunkSampler, chunk: &Chunk) -> Self {
        Self {
            start: chunk.start,
            pairs: chunk.pairs,
            inside: sampler.count(chunk),
        }
    }

    /// whether this count answers `chunk` and is plausible for it
    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.start == chunk.start && self.pairs == chunk.pairs && self.inside <= self.pairs
    }
}
