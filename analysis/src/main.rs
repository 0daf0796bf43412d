use clap::Parser;
use montepi_analysis::{error_trend_decreasing, summarize};
use montepi_runner::driver::read_reports;
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Summarize recorded pi estimation reports")]
struct Args {
    /// report files written by `montepi run`
    #[arg(required = true)]
    reports: Vec<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut reports = Vec::new();

    for path in args.reports.iter() {
        match read_reports(path) {
            Ok(loaded) => {
                info!(path = ?path, reports = loaded.len(), "Loaded reports");
                reports.extend(loaded);
            }
            Err(error) => {
                error!(path = ?path, error = ?error, "Failed to load reports: {error}");
                return ExitCode::FAILURE;
            }
        }
    }

    let summaries = summarize(&reports);
    for summary in summaries.iter() {
        println!("{summary}");
    }

    if !error_trend_decreasing(&summaries) {
        warn!("Mean error does not decrease with workload size, consider more trials");
    }

    ExitCode::SUCCESS
}
