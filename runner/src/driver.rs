//! Runs the sampling engine over a sequence of workload sizes and reports accuracy and timing.

pub mod phase;
pub mod report;

#[cfg(test)]
mod driver_test;

pub use phase::{ChunkPolicy, ClusterAction, Phase, ScaleTarget};
pub use report::{read_reports, write_reports, Report, ReportError};

use crate::{
    cluster::{AdaptiveHandle, ClusterError, ClusterManager},
    sampling::{ChunkExecutor, SamplingEngine, SamplingError},
};
use std::{
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Estimate for {size_bytes} bytes failed")]
    Estimate {
        size_bytes: f64,
        #[source]
        source: SamplingError,
    },
    #[error("Cluster action of experiment {phase} failed")]
    Cluster {
        phase: String,
        #[source]
        source: ClusterError,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Driver {
    engine: SamplingEngine,
    chunking: ChunkPolicy,
}

impl Driver {
    pub fn new(engine: SamplingEngine, chunking: ChunkPolicy) -> Self {
        Self { engine, chunking }
    }

    pub fn chunking(&self) -> &ChunkPolicy {
        &self.chunking
    }

    /// Time a single estimate of `size_bytes` and build its report
    pub fn measure<E, W>(
        &self,
        executor: &E,
        size_bytes: f64,
        chunking: &ChunkPolicy,
        worker_count: W,
    ) -> Result<Report, DriverError>
    where
        E: ChunkExecutor + ?Sized,
        W: Fn() -> usize,
    {
        let chunk_bytes = chunking.chunk_bytes(size_bytes);

        let start = Instant::now();
        let estimate = self
            .engine
            .estimate(size_bytes, chunk_bytes, executor)
            .map_err(|source| DriverError::Estimate { size_bytes, source })?;
        let elapsed = start.elapsed();

        Ok(Report::new(
            size_bytes,
            chunk_bytes,
            &estimate,
            elapsed,
            worker_count(),
        ))
    }

    /// Estimate π once per entry of `sizes`, strictly in order
    #[instrument(skip_all, fields(sizes = sizes.len()))]
    pub fn run_experiment<E, W>(
        &self,
        executor: &E,
        sizes: &[f64],
        worker_count: W,
    ) -> Result<Vec<Report>, DriverError>
    where
        E: ChunkExecutor + ?Sized,
        W: Fn() -> usize,
    {
        sizes
            .iter()
            .map(|size| {
                let report = self.measure(executor, *size, &self.chunking, &worker_count)?;
                info!("{report}");

                Ok(report)
            })
            .collect()
    }

    /// Run all phases against `cluster`, handing every report to `sink` as soon as it exists
    pub fn run_phases<C, S>(
        &self,
        cluster: &C,
        phases: &[Phase],
        mut sink: S,
    ) -> Result<Vec<Report>, DriverError>
    where
        C: ClusterManager,
        S: FnMut(&Phase, &Report),
    {
        let mut adaptive = None;
        let mut reports = Vec::new();

        for phase in phases {
            info!(
                experiment = %phase.name,
                sizes = phase.sizes.len(),
                workers = cluster.current_worker_count(),
                "Starting experiment"
            );

            if let Some(ref action) = phase.action {
                apply(cluster, action, &mut adaptive).map_err(|source| DriverError::Cluster {
                    phase: phase.name.clone(),
                    source,
                })?;
            }

            if phase.settle > 0.0 {
                debug!(seconds = phase.settle, "Waiting for the cluster to settle");
                thread::sleep(Duration::from_secs_f64(phase.settle));
            }

            let chunking = phase.chunking.as_ref().unwrap_or(&self.chunking);

            for size in phase.sizes.iter() {
                let mut report =
                    self.measure(cluster, *size, chunking, || cluster.current_worker_count())?;
                report.phase = Some(phase.name.clone());
                info!(experiment = %phase.name, "{report}");

                sink(phase, &report);
                reports.push(report);
            }
        }

        Ok(reports)
    }
}

/// Forward `action` to the cluster, `adaptive` keeps the currently enabled policy alive
pub fn apply<C: ClusterManager + ?Sized>(
    cluster: &C,
    action: &ClusterAction,
    adaptive: &mut Option<AdaptiveHandle>,
) -> Result<(), ClusterError> {
    match action {
        ClusterAction::Scale(target) => {
            if let Some(handle) = adaptive.take() {
                handle.stop();
            }

            let target = target.resolve(cluster.current_worker_count());
            info!(target, "Requesting cluster resize");

            cluster.resize(target)
        }
        ClusterAction::Adapt(policy) => {
            *adaptive = Some(cluster.enable_autoscale(policy.clone())?);

            Ok(())
        }
        ClusterAction::Fixed => {
            if let Some(handle) = adaptive.take() {
                handle.stop();
            }
            cluster.disable_autoscale();

            Ok(())
        }
    }
}
