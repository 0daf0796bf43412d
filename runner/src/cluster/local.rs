use super::{AdaptiveHandle, AdaptivePolicy, Autoscaler, ClusterError, ClusterManager};
use crate::{
    config::{ClusterConfig, ConfigErrors},
    sampling::{reduce_counts, ChunkExecutor, ChunkPlan, ChunkSampler, SamplingError},
};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, trace};

/// one worker per logical cpu unless configured otherwise
pub static DEFAULT_WORKERS: Lazy<usize> = Lazy::new(num_cpus::get);

/// Cluster backed by an in-process rayon thread pool
#[derive(Debug)]
pub struct LocalCluster {
    pool: RwLock<Arc<ThreadPool>>,
    requested: AtomicUsize,
    autoscaler: Autoscaler,
}

fn build_pool(workers: usize) -> Result<ThreadPool, ClusterError> {
    if workers == 0 {
        return Err(ClusterError::InvalidWorkerCount(workers));
    }

    Ok(ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("montepi-worker-{index}"))
        .build()?)
}

impl LocalCluster {
    pub fn new(workers: usize) -> Result<Self, ClusterError> {
        debug!("Starting thread pool with {workers} threads");

        Ok(Self {
            pool: RwLock::new(Arc::new(build_pool(workers)?)),
            requested: AtomicUsize::new(workers),
            autoscaler: Autoscaler::default(),
        })
    }

    pub fn load(config: &ClusterConfig) -> Result<Self, ConfigErrors> {
        let workers = config
            .usize_parameter("workers")?
            .unwrap_or(*DEFAULT_WORKERS);

        Ok(Self::new(workers)?)
    }

    /// worker count the next computation will run with
    pub fn requested_worker_count(&self) -> usize {
        self.requested.load(Ordering::SeqCst)
    }

    /// current pool, rebuilt first if a resize is pending
    fn pool(&self) -> Result<Arc<ThreadPool>, SamplingError> {
        let requested = self.requested.load(Ordering::SeqCst);

        {
            let pool = self.pool.read();
            if pool.current_num_threads() == requested {
                return Ok(pool.clone());
            }
        }

        let mut pool = self.pool.write();
        if pool.current_num_threads() != requested {
            let rebuilt = build_pool(requested).map_err(|error| {
                SamplingError::ResourceUnavailable(format!(
                    "failed to resize local pool to {requested} workers: {error}"
                ))
            })?;

            info!(
                from = pool.current_num_threads(),
                to = requested,
                "Resized local worker pool"
            );
            *pool = Arc::new(rebuilt);
        }

        Ok(pool.clone())
    }
}

impl ChunkExecutor for LocalCluster {
    #[instrument(skip_all, level = "debug", fields(chunks = plan.len()))]
    fn execute(&self, plan: &ChunkPlan, sampler: &ChunkSampler) -> Result<u64, SamplingError> {
        let pool = self.pool()?;
        let busy = AtomicU64::new(0);

        let inside = pool.install(|| {
            (0..plan.len())
                .into_par_iter()
                .filter_map(|index| plan.chunk(index))
                .map(|chunk| {
                    let start = Instant::now();
                    let inside = sampler.count(&chunk);
                    let elapsed = start.elapsed();

                    busy.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
                    trace!(
                        chunk = chunk.index,
                        inside,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Finished chunk"
                    );

                    Ok::<_, SamplingError>(inside)
                })
                .try_reduce(|| 0, reduce_counts)
        })?;

        let unit = Duration::from_nanos(busy.load(Ordering::Relaxed) / plan.len().max(1));
        if let Some(target) = self
            .autoscaler
            .observe(pool.current_num_threads(), plan.len(), unit)
        {
            info!(
                current = pool.current_num_threads(),
                target,
                unit_ms = unit.as_millis() as u64,
                "Adaptive scaling requested a new pool size"
            );
            self.requested.store(target, Ordering::SeqCst);
        }

        Ok(inside)
    }
}

impl ClusterManager for LocalCluster {
    fn name(&self) -> &'static str {
        "local"
    }

    fn current_worker_count(&self) -> usize {
        self.pool.read().current_num_threads()
    }

    fn resize(&self, target: usize) -> Result<(), ClusterError> {
        if target == 0 {
            return Err(ClusterError::InvalidWorkerCount(target));
        }

        debug!(target, "Requested local pool resize");
        self.requested.store(target, Ordering::SeqCst);

        Ok(())
    }

    fn enable_autoscale(&self, policy: AdaptivePolicy) -> Result<AdaptiveHandle, ClusterError> {
        let handle = self.autoscaler.enable(policy)?;
        info!(policy = ?handle.policy(), "Enabled adaptive scaling");

        Ok(handle)
    }

    fn disable_autoscale(&self) {
        self.autoscaler.disable();
    }

    fn close(self) -> Result<(), ClusterError> {
        self.autoscaler.disable();
        info!(
            workers = self.current_worker_count(),
            "Shutting down local worker pool"
        );

        Ok(())
    }
}
