//! Chunked Monte-Carlo estimation of π.
//!
//! A batch of uniformly distributed pairs in the unit square is split into
//! independent chunks, every chunk counts the pairs inside the quarter circle
//! and the counts are summed before the single final divide-and-scale.

pub mod plan;
pub mod sampler;


pub use plan::{Chunk, ChunkPlan};
pub use sampler::{ChunkCount, ChunkSampler, SeedPolicy};

use thiserror::Error;
use tracing::{debug, instrument};

/// bytes per float64 coordinate
pub const BYTES_PER_FLOAT: f64 = 8.0;
/// coordinates per (x, y) pair
pub const FLOATS_PER_PAIR: f64 = 2.0;
/// default per-chunk memory footprint
pub const DEFAULT_CHUNK_BYTES: f64 = 200e6;

#[derive(Error, Debug)]
pub enum SamplingError {
    #[error("Invalid argument {name} = {value}: {reason}")]
    InvalidArgument {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(String),
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),
}

/// Anything able to evaluate every chunk of a plan and return the summed membership count.
///
/// Implementations may evaluate chunks in any order and on any number of workers, but a
/// failure in a single chunk must fail the whole call.
pub trait ChunkExecutor {
    fn execute(&self, plan: &ChunkPlan, sampler: &ChunkSampler) -> Result<u64, SamplingError>;
}

/// Degenerate executor without any workers, evaluates chunks one after another
#[derive(Debug, Clone, Copy, Default)]
pub struct Serial;

impl ChunkExecutor for Serial {
    fn execute(&self, plan: &ChunkPlan, sampler: &ChunkSampler) -> Result<u64, SamplingError> {
        plan.chunks()
            .try_fold(0, |acc, chunk| reduce_counts(acc, sampler.count(&chunk)))
    }
}

/// sum two partial membership counts without wrapping
pub fn reduce_counts(left: u64, right: u64) -> Result<u64, SamplingError> {
    left.checked_add(right).ok_or_else(|| {
        SamplingError::ArithmeticOverflow(format!(
            "membership count {left} + {right} exceeds u64"
        ))
    })
}

/// Result of a single estimation run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub pi: f64,
    pub inside: u64,
    pub pairs: u64,
    pub chunks: u64,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SamplingEngine {
    seed: SeedPolicy,
}

impl SamplingEngine {
    pub fn new(seed: SeedPolicy) -> Self {
        Self { seed }
    }

    pub fn seed_policy(&self) -> SeedPolicy {
        self.seed
    }

    /// Estimate π from `total_bytes` worth of float64 pairs, dispatched in chunks of
    /// `chunk_bytes` to `executor`
    #[instrument(skip(self, executor), level = "debug")]
    pub fn estimate<E: ChunkExecutor + ?Sized>(
        &self,
        total_bytes: f64,
        chunk_bytes: f64,
        executor: &E,
    ) -> Result<Estimate, SamplingError> {
        let plan = ChunkPlan::new(total_bytes, chunk_bytes)?;
        let sampler = ChunkSampler::new(self.seed.next_seed());

        debug!(
            pairs = plan.pairs(),
            chunks = plan.len(),
            chunk_pairs = plan.chunk_pairs(),
            seed = sampler.seed(),
            "Dispatching chunks"
        );

        let inside = executor.execute(&plan, &sampler)?;

        if inside > plan.pairs() {
            return Err(SamplingError::ResourceUnavailable(format!(
                "executor reported {inside} pairs inside the circle out of {}",
                plan.pairs()
            )));
        }

        Ok(Estimate {
            pi: 4.0 * inside as f64 / plan.pairs() as f64,
            inside,
            pairs: plan.pairs(),
            chunks: plan.len(),
            seed: sampler.seed(),
        })
    }

    /// same as `estimate` but only returns the estimate for π
    pub fn estimate_pi<E: ChunkExecutor + ?Sized>(
        &self,
        total_bytes: f64,
        chunk_bytes: f64,
        executor: &E,
    ) -> Result<f64, SamplingError> {
        self.estimate(total_bytes, chunk_bytes, executor)
            .map(|estimate| estimate.pi)
    }
}
