//! Aggregation of recorded experiment reports across repeated trials.

use itertools::Itertools;
use montepi_runner::driver::Report;
use std::fmt::{self, Display};

/// Averaged statistics of all reports sharing one workload size
#[derive(Debug, Clone, PartialEq)]
pub struct SizeSummary {
    pub size_bytes: f64,
    pub trials: usize,
    pub mean_error: f64,
    pub min_error: f64,
    pub max_error: f64,
    pub mean_elapsed: f64,
    pub mean_throughput: f64,
    pub mean_workers: f64,
}

impl Display for SizeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>9.2} GB | trials {:>3} | mean error {:.3e} [{:.3e}, {:.3e}] | {:.3} s | {:.3e} pairs/s | workers {:.1}",
            self.size_bytes / 1e9,
            self.trials,
            self.mean_error,
            self.min_error,
            self.max_error,
            self.mean_elapsed,
            self.mean_throughput,
            self.mean_workers
        )
    }
}

fn mean<I: Iterator<Item = f64>>(values: I) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Group `reports` by size, ascending, and average every group
pub fn summarize(reports: &[Report]) -> Vec<SizeSummary> {
    reports
        .iter()
        .sorted_by(|a, b| a.size_bytes.total_cmp(&b.size_bytes))
        .group_by(|report| report.size_bytes.to_bits())
        .into_iter()
        .map(|(_, group)| {
            let group = group.collect_vec();

            SizeSummary {
                size_bytes: group[0].size_bytes,
                trials: group.len(),
                mean_error: mean(group.iter().map(|report| report.absolute_error)),
                min_error: group
                    .iter()
                    .map(|report| report.absolute_error)
                    .fold(f64::INFINITY, f64::min),
                max_error: group
                    .iter()
                    .map(|report| report.absolute_error)
                    .fold(0.0, f64::max),
                mean_elapsed: mean(group.iter().map(|report| report.elapsed_seconds)),
                mean_throughput: mean(group.iter().map(|report| report.throughput())),
                mean_workers: mean(group.iter().map(|report| report.num_workers as f64)),
            }
        })
        .collect()
}

/// whether the averaged error never grows with the workload size
pub fn error_trend_decreasing(summaries: &[SizeSummary]) -> bool {
    summaries
        .iter()
        .tuple_windows()
        .all(|(smaller, larger)| larger.mean_error <= smaller.mean_error)
}
