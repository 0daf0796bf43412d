//! Worker pools the sampling engine runs on, and the narrow interface used to resize them.

pub mod adaptive;
pub mod local;
pub mod slurm;

#[cfg(test)]
mod slurm_test;

pub use adaptive::{AdaptiveController, AdaptiveHandle, AdaptivePolicy, Autoscaler};
pub use local::LocalCluster;
pub use slurm::{SlurmCluster, SlurmEnv};

use crate::{
    config::{ClusterConfig, ConfigErrors},
    sampling::{ChunkExecutor, ChunkPlan, ChunkSampler, SamplingError},
};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("Invalid worker count {0}")]
    InvalidWorkerCount(usize),
    #[error("Invalid autoscale policy: {0}")]
    InvalidPolicy(String),
    #[error("Failed to build worker pool")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),
}

/// External collaborator owning the worker pool.
///
/// Requests are fire-and-forget: `resize` returns before the pool converged and
/// `current_worker_count` only reports what is active right now.
pub trait ClusterManager: ChunkExecutor {
    fn name(&self) -> &'static str;

    fn current_worker_count(&self) -> usize;

    fn resize(&self, target: usize) -> Result<(), ClusterError>;

    fn enable_autoscale(&self, policy: AdaptivePolicy) -> Result<AdaptiveHandle, ClusterError>;

    fn disable_autoscale(&self);

    /// tear down the pool, the cluster can't be used afterwards
    fn close(self) -> Result<(), ClusterError>
    where
        Self: Sized;
}

/// All supported cluster variants, selected by `cluster.name`
#[derive(Debug)]
pub enum Clusters {
    Local(LocalCluster),
    Slurm(SlurmCluster),
}

impl Clusters {
    pub fn load(config: &ClusterConfig) -> Result<Self, ConfigErrors> {
        match config.name.to_lowercase().as_str() {
            "local" => Ok(Self::Local(LocalCluster::load(config)?)),
            "slurm" => Ok(Self::Slurm(SlurmCluster::load(config)?)),
            _ => Err(ConfigErrors::UnsupportedCluster(config.name.clone())),
        }
    }
}

impl ChunkExecutor for Clusters {
    fn execute(&self, plan: &ChunkPlan, sampler: &ChunkSampler) -> Result<u64, SamplingError> {
        match self {
            Self::Local(cluster) => cluster.execute(plan, sampler),
            Self::Slurm(cluster) => cluster.execute(plan, sampler),
        }
    }
}

impl ClusterManager for Clusters {
    fn name(&self) -> &'static str {
        match self {
            Self::Local(cluster) => cluster.name(),
            Self::Slurm(cluster) => cluster.name(),
        }
    }

    fn current_worker_count(&self) -> usize {
        match self {
            Self::Local(cluster) => cluster.current_worker_count(),
            Self::Slurm(cluster) => cluster.current_worker_count(),
        }
    }

    fn resize(&self, target: usize) -> Result<(), ClusterError> {
        match self {
            Self::Local(cluster) => cluster.resize(target),
            Self::Slurm(cluster) => cluster.resize(target),
        }
    }

    fn enable_autoscale(&self, policy: AdaptivePolicy) -> Result<AdaptiveHandle, ClusterError> {
        match self {
            Self::Local(cluster) => cluster.enable_autoscale(policy),
            Self::Slurm(cluster) => cluster.enable_autoscale(policy),
        }
    }

    fn disable_autoscale(&self) {
        match self {
            Self::Local(cluster) => cluster.disable_autoscale(),
            Self::Slurm(cluster) => cluster.disable_autoscale(),
        }
    }

    fn close(self) -> Result<(), ClusterError> {
        match self {
            Self::Local(cluster) => cluster.close(),
            Self::Slurm(cluster) => cluster.close(),
        }
    }
}

/// host name of the current node, used to tag log output
pub fn hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(hostname) => hostname.to_string_lossy().into_owned(),
        Err(error) => {
            warn!(error = ?error, "Failed to retrieve hostname");

            String::from("unknown")
        }
    }
}
