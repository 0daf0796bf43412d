use crate::sampling::Estimate;
use serde::{Deserialize, Serialize};
use std::{
    f64::consts::PI,
    fmt::{self, Display},
    fs,
    path::Path,
    time::Duration,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to access report file")]
    Io(#[from] std::io::Error),
    #[error("Failed to (de)serialize reports")]
    Yaml(#[from] serde_yaml::Error),
}

/// Outcome of one timed estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub size_bytes: f64,
    pub chunk_bytes: f64,
    pub pi_estimate: f64,
    pub absolute_error: f64,
    pub signed_error: f64,
    pub elapsed_seconds: f64,
    pub num_workers: usize,
    pub pairs: u64,
    pub chunks: u64,
}

impl Report {
    pub fn new(
        size_bytes: f64,
        chunk_bytes: f64,
        estimate: &Estimate,
        elapsed: Duration,
        num_workers: usize,
    ) -> Self {
        let signed_error = estimate.pi - PI;

        Self {
            phase: None,
            size_bytes,
            chunk_bytes,
            pi_estimate: estimate.pi,
            absolute_error: signed_error.abs(),
            signed_error,
            elapsed_seconds: elapsed.as_secs_f64(),
            num_workers,
            pairs: estimate.pairs,
            chunks: estimate.chunks,
        }
    }

    pub fn size_gb(&self) -> f64 {
        self.size_bytes / 1e9
    }

    /// sampled pairs per second
    pub fn throughput(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.pairs as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>9.2} GB | pi {:.11} | error {:+.3e} | workers {:>4} | {:.3} s",
            self.size_gb(),
            self.pi_estimate,
            self.signed_error,
            self.num_workers,
            self.elapsed_seconds
        )
    }
}

pub fn write_reports(path: &Path, reports: &[Report]) -> Result<(), ReportError> {
    fs::write(path, serde_yaml::to_string(reports)?)?;

    Ok(())
}

pub fn read_reports(path: &Path) -> Result<Vec<Report>, ReportError> {
    Ok(serde_yaml::from_str(&fs::read_to_string(path)?)?)
}
