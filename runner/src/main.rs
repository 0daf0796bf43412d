use clap::{Parser, Subcommand};
use montepi_runner::{
    cluster::{hostname, ClusterError, ClusterManager, Clusters, LocalCluster},
    config::{ClusterConfig, ConfigErrors, RunnerConfig},
    driver::{write_reports, ChunkPolicy, Driver, DriverError, ReportError},
    sampling::{Chunk, ChunkCount, ChunkSampler, SamplingEngine, SeedPolicy, DEFAULT_CHUNK_BYTES},
};
use std::{path::PathBuf, process::ExitCode};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_unwrap::ResultExt;

#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked Monte-Carlo estimation of pi on a worker pool")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every experiment of a config file
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// write all reports as YAML, overrides `output` of the config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Only run the preflight checks of a config file
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Single estimate on a local worker pool
    Estimate {
        #[arg(long)]
        total_bytes: f64,
        #[arg(long, default_value_t = DEFAULT_CHUNK_BYTES)]
        chunk_bytes: f64,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Count a single chunk and print the result as YAML, used by job steps
    #[command(hide = true)]
    Chunk {
        #[arg(long)]
        seed: u64,
        #[arg(long)]
        start: u64,
        #[arg(long)]
        pairs: u64,
    },
}

#[derive(Error, Debug)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("Failed to serialize chunk count")]
    Serialize(#[from] serde_yaml::Error),
}

fn run(config: PathBuf, output: Option<PathBuf>) -> Result<(), RunError> {
    let config = RunnerConfig::load(&config).unwrap_or_log();

    if config.preflight_checks() {
        return Err(ConfigErrors::PreflightFailed.into());
    }

    // explicit lifecycle: create, use, tear down
    let cluster = Clusters::load(&config.cluster)?;
    info!(
        cluster = cluster.name(),
        workers = cluster.current_worker_count(),
        host = %hostname(),
        "Cluster ready"
    );

    let driver = Driver::new(
        SamplingEngine::new(config.sampling.seed_policy()),
        config.sampling.chunking.clone(),
    );
    let result = driver.run_phases(&cluster, &config.experiments, |_, report| {
        println!("{report}")
    });
    cluster.close()?;

    let reports = result?;
    if let Some(path) = output.or(config.output) {
        write_reports(&path, &reports)?;
        info!(path = ?path, reports = reports.len(), "Wrote reports");
    }

    Ok(())
}

fn estimate(
    total_bytes: f64,
    chunk_bytes: f64,
    seed: Option<u64>,
    workers: Option<usize>,
) -> Result<(), RunError> {
    let cluster = match workers {
        Some(workers) => LocalCluster::new(workers)?,
        None => LocalCluster::load(&ClusterConfig {
            name: String::from("local"),
            parameter: None,
        })?,
    };
    let driver = Driver::new(
        SamplingEngine::new(SeedPolicy::from(seed)),
        ChunkPolicy::Fixed { bytes: chunk_bytes },
    );

    let result = driver.run_experiment(&cluster, &[total_bytes], || {
        cluster.current_worker_count()
    });
    cluster.close()?;

    for report in result? {
        println!("{report}");
    }

    Ok(())
}

fn chunk(seed: u64, start: u64, pairs: u64) -> Result<(), RunError> {
    let chunk = Chunk {
        index: 0,
        start,
        pairs,
    };
    let count = ChunkCount::compute(&ChunkSampler::new(seed), &chunk);
    print!("{}", serde_yaml::to_string(&count)?);

    Ok(())
}

fn main() -> ExitCode {
    // stdout is reserved for reports and job step results
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Command::Run { config, output } => run(config, output),
        Command::Check { config } => {
            if RunnerConfig::load(&config).unwrap_or_log().preflight_checks() {
                Err(ConfigErrors::PreflightFailed.into())
            } else {
                info!("Config passed all preflight checks");
                Ok(())
            }
        }
        Command::Estimate {
            total_bytes,
            chunk_bytes,
            seed,
            workers,
        } => estimate(total_bytes, chunk_bytes, seed, workers),
        Command::Chunk { seed, start, pairs } => chunk(seed, start, pairs),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = ?error, "{error}");
            ExitCode::FAILURE
        }
    }
}
