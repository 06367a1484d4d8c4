//! `mr-coordinator <n-reduce> <input-files...>`
//!
//! Starts a coordinator for the given input files and blocks until the job is done.
//! Exit codes: 0 on completion, 1 on argument error or missing input.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use mapreduce_rs::mr::coordinator::Coordinator;
use mapreduce_rs::mr::transport::default_discovery_path;

#[derive(Parser)]
#[command(name = "mr-coordinator")]
#[command(about = "Coordinate a distributed MapReduce job", long_about = None)]
struct Args {
    /// Number of reduce tasks (partitions)
    n_reduce: u32,

    /// Input files, one map task per file
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

/// Print a clap parse error and translate its exit code: help/version text still exits 0,
/// but a malformed invocation exits 1 rather than clap's default 2, matching every other
/// argument-error path in this binary.
fn report_cli_error(e: clap::Error) -> i32 {
    e.print().ok();
    match e.kind() {
        clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => std::process::exit(report_cli_error(e)),
    };

    for file in &args.files {
        if !file.exists() {
            error!("input file not found: {}", file.display());
            std::process::exit(1);
        }
    }

    let files: Vec<String> = args.files.iter().map(|p| p.display().to_string()).collect();

    let coordinator = match Coordinator::new(&files, args.n_reduce, default_discovery_path()) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = coordinator.start().await {
        error!("failed to start coordinator: {e}");
        std::process::exit(1);
    }

    info!(
        "coordinator running, waiting for {} map and {} reduce tasks",
        files.len(),
        args.n_reduce
    );

    while !coordinator.done() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    info!("MapReduce job completed successfully");
    coordinator.stop();
}
