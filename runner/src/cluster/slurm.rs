use super::{hostname, AdaptiveHandle, AdaptivePolicy, Autoscaler, ClusterError, ClusterManager};
use crate::{
    config::{ClusterConfig, ConfigErrors},
    sampling::{
        reduce_counts, Chunk, ChunkCount, ChunkExecutor, ChunkPlan, ChunkSampler, SamplingError,
    },
};
use rayon::{prelude::*, ThreadPoolBuilder};
use std::{
    env,
    io::{self, Read},
    path::PathBuf,
    process::{Command, Stdio},
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

/// Allocation the runner was started in, as reported by the SLURM environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmEnv {
    pub job_id: String,
    pub ntasks: usize,
    pub node_list: String,
}

impl SlurmEnv {
    pub fn detect() -> Option<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Option<Self> {
        let job_id = lookup("SLURM_JOB_ID")?;
        let ntasks = lookup("SLURM_NTASKS")
            .and_then(|value| value.trim().parse().ok())
            .or_else(|| {
                // e.g. `4(x2),1`, only the first node is taken into account
                lookup("SLURM_TASKS_PER_NODE").and_then(|value| {
                    value
                        .split(|c: char| !c.is_ascii_digit())
                        .next()
                        .and_then(|count| count.parse().ok())
                })
            })
            .unwrap_or(1);
        let node_list = lookup("SLURM_JOB_NODELIST")
            .or_else(|| lookup("SLURM_NODELIST"))
            .unwrap_or_else(|| String::from("localhost"));

        Some(Self {
            job_id,
            ntasks,
            node_list,
        })
    }
}

/// Cluster dispatching every chunk as a single task job step via `srun`.
///
/// Each step runs the `chunk` subcommand of `worker` and prints a `ChunkCount` as YAML.
/// At most `workers` steps are in flight, bounded by the tasks of the allocation.
#[derive(Debug)]
pub struct SlurmCluster {
    allocation: Option<SlurmEnv>,
    srun: PathBuf,
    args: Vec<String>,
    worker: PathBuf,
    timeout: Duration,
    workers: AtomicUsize,
    autoscaler: Autoscaler,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

impl SlurmCluster {
    pub fn new(
        allocation: Option<SlurmEnv>,
        srun: PathBuf,
        args: Vec<String>,
        worker: PathBuf,
        timeout: Duration,
        workers: usize,
    ) -> Result<Self, ClusterError> {
        let cluster = Self {
            allocation,
            srun,
            args,
            worker,
            timeout,
            workers: AtomicUsize::new(0),
            autoscaler: Autoscaler::default(),
        };
        cluster.check_capacity(workers)?;
        cluster.workers.store(workers, Ordering::SeqCst);

        Ok(cluster)
    }

    pub fn load(config: &ClusterConfig) -> Result<Self, ConfigErrors> {
        let allocation = SlurmEnv::detect();

        match allocation {
            Some(ref allocation) => info!(
                job = %allocation.job_id,
                tasks = allocation.ntasks,
                nodes = %allocation.node_list,
                host = %hostname(),
                "Running inside SLURM allocation"
            ),
            None => warn!("SLURM_JOB_ID is not set, job steps will request their own allocation"),
        }

        let srun = PathBuf::from(config.str_parameter("srun")?.unwrap_or("srun"));
        let args = config
            .strings_parameter("args")?
            .unwrap_or_else(|| vec![String::from("--exclusive")]);
        let worker = match config.str_parameter("worker")? {
            Some(worker) => PathBuf::from(worker),
            None => env::current_exe().map_err(|error| {
                error!(error = ?error, "Failed to locate the runner executable");

                ConfigErrors::InvalidParameter {
                    name: String::from("worker"),
                    reason: "unable to determine the current executable, set it explicitly",
                }
            })?,
        };
        let timeout = match config.f64_parameter("timeout")? {
            Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
                Duration::from_secs_f64(seconds)
            }
            Some(_) => {
                return Err(ConfigErrors::InvalidParameter {
                    name: String::from("timeout"),
                    reason: "must be a positive number of seconds",
                })
            }
            None => DEFAULT_TIMEOUT,
        };
        let workers = config
            .usize_parameter("workers")?
            .or_else(|| allocation.as_ref().map(|allocation| allocation.ntasks))
            .unwrap_or(1);

        Ok(Self::new(allocation, srun, args, worker, timeout, workers)?)
    }

    pub fn allocation(&self) -> Option<&SlurmEnv> {
        self.allocation.as_ref()
    }

    fn capacity(&self) -> Option<usize> {
        self.allocation.as_ref().map(|allocation| allocation.ntasks)
    }

    fn check_capacity(&self, workers: usize) -> Result<(), ClusterError> {
        if workers == 0 {
            return Err(ClusterError::InvalidWorkerCount(workers));
        }

        match self.capacity() {
            Some(capacity) if workers > capacity => Err(ClusterError::ResourceUnavailable(format!(
                "allocation provides {capacity} tasks but {workers} workers were requested"
            ))),
            _ => Ok(()),
        }
    }

    /// `srun` invocation computing a single chunk
    pub fn step_command(&self, chunk: &Chunk, sampler: &ChunkSampler) -> Command {
        let mut command = Command::new(&self.srun);

        command
            .args(self.args.iter())
            .arg("--ntasks=1")
            .arg("--nodes=1")
            .arg(format!("--job-name=montepi-chunk-{}", chunk.index))
            .arg(&self.worker)
            .arg("chunk")
            .arg("--seed")
            .arg(sampler.seed().to_string())
            .arg("--start")
            .arg(chunk.start.to_string())
            .arg("--pairs")
            .arg(chunk.pairs.to_string());

        command
    }

    fn run_step(&self, chunk: &Chunk, sampler: &ChunkSampler) -> Result<u64, SamplingError> {
        let unavailable = |reason: String| {
            SamplingError::ResourceUnavailable(format!("job step for chunk {}: {reason}", chunk.index))
        };

        let mut child = self
            .step_command(chunk, sampler)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| unavailable(format!("failed to spawn {:?}: {error}", self.srun)))?;

        // pipes are drained while the step runs, a chatty step would block on a full pipe
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                if let Err(error) = child.kill() {
                    warn!(error = ?error, chunk = chunk.index, "Failed to kill timed out job step");
                }
                if let Err(error) = child.wait() {
                    warn!(error = ?error, chunk = chunk.index, "Failed to reap timed out job step");
                }
                // readers are left behind, grandchildren of the step may still hold the pipes

                return Err(unavailable(format!("timed out after {:?}", self.timeout)));
            }
            Err(error) => return Err(unavailable(format!("failed to wait: {error}"))),
        };

        let stdout = match stdout {
            Some(reader) => collect(reader)
                .map_err(|error| unavailable(format!("failed to read output: {error}")))?,
            None => String::new(),
        };

        if !status.success() {
            let stderr = match stderr.map(collect) {
                Some(Ok(stderr)) => stderr,
                Some(Err(error)) => {
                    warn!(error = ?error, chunk = chunk.index, "Failed to read job step stderr");
                    String::new()
                }
                None => String::new(),
            };
            debug!(stderr = %stderr, chunk = chunk.index, "Job step failed");

            return Err(unavailable(format!("exited with {status}")));
        }

        if let Some(Err(error)) = stderr.map(collect) {
            warn!(error = ?error, chunk = chunk.index, "Failed to read job step stderr");
        }

        let count: ChunkCount = serde_yaml::from_str(&stdout)
            .map_err(|error| unavailable(format!("malformed output: {error}")))?;

        if count.matches(chunk) {
            Ok(count.inside)
        } else {
            Err(unavailable(format!("answered for a different chunk: {count:?}")))
        }
    }
}

/// read a child pipe to its end on a separate thread
fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<io::Result<String>> {
    thread::spawn(move || {
        let mut content = Vec::new();
        pipe.read_to_end(&mut content)?;

        Ok(String::from_utf8_lossy(&content).into_owned())
    })
}

fn collect(reader: JoinHandle<io::Result<String>>) -> io::Result<String> {
    reader
        .join()
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "pipe reader panicked")))
}

impl ChunkExecutor for SlurmCluster {
    #[instrument(skip_all, level = "debug", fields(chunks = plan.len()))]
    fn execute(&self, plan: &ChunkPlan, sampler: &ChunkSampler) -> Result<u64, SamplingError> {
        let workers = self.workers.load(Ordering::SeqCst);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("montepi-srun-{index}"))
            .build()
            .map_err(|error| {
                SamplingError::ResourceUnavailable(format!(
                    "failed to start {workers} job step dispatchers: {error}"
                ))
            })?;
        let busy = AtomicU64::new(0);

        let inside = pool.install(|| {
            (0..plan.len())
                .into_par_iter()
                .filter_map(|index| plan.chunk(index))
                .map(|chunk| {
                    let start = Instant::now();
                    let inside = self.run_step(&chunk, sampler)?;
                    busy.fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);

                    Ok::<_, SamplingError>(inside)
                })
                .try_reduce(|| 0, reduce_counts)
        })?;

        let unit = Duration::from_nanos(busy.load(Ordering::Relaxed) / plan.len().max(1));
        if let Some(target) = self.autoscaler.observe(workers, plan.len(), unit) {
            let target = self.capacity().map_or(target, |capacity| target.min(capacity));

            info!(current = workers, target, "Adaptive scaling requested a new step limit");
            self.workers.store(target, Ordering::SeqCst);
        }

        Ok(inside)
    }
}

impl ClusterManager for SlurmCluster {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn current_worker_count(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    fn resize(&self, target: usize) -> Result<(), ClusterError> {
        self.check_capacity(target)?;

        debug!(target, "Requested job step limit change");
        self.workers.store(target, Ordering::SeqCst);

        Ok(())
    }

    fn enable_autoscale(&self, mut policy: AdaptivePolicy) -> Result<AdaptiveHandle, ClusterError> {
        if let Some(capacity) = self.capacity() {
            if policy.maximum > capacity {
                warn!(
                    maximum = policy.maximum,
                    capacity, "Autoscale maximum exceeds the allocation, limiting it"
                );
                policy.maximum = capacity;
                policy.minimum = policy.minimum.min(capacity);
            }
        }

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
            job = ?self.allocation.as_ref().map(|allocation| allocation.job_id.as_str()),
            "Released SLURM job step dispatcher"
        );

        Ok(())
    }
}
