//! `mr-worker <plugin>`
//!
//! Runs a single worker process against whichever coordinator published
//! `coordinator_info.txt` in the current directory. Exit codes: 0 on clean EXIT from the
//! coordinator, 1 on argument error or an unrecoverable transport failure.

use std::sync::Arc;

use clap::Parser;
use tracing::error;

use mapreduce_rs::mr::function::lookup_app;
use mapreduce_rs::mr::transport::default_discovery_path;
use mapreduce_rs::mr::worker::Worker;

#[derive(Parser)]
#[command(name = "mr-worker")]
#[command(about = "Run a single MapReduce worker process", long_about = None)]
struct Args {
    /// Name of the MapReduce application to run (e.g. "wordcount")
    plugin: String,
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

    let Some(app) = lookup_app(&args.plugin) else {
        error!("unknown MapReduce application: {}", args.plugin);
        std::process::exit(1);
    };
    let app: Arc<dyn mapreduce_rs::mr::function::MapReduceApp> = Arc::from(app);

    let worker = match Worker::discover(&default_discovery_path(), app) {
        Ok(worker) => worker,
        Err(e) => {
            error!("failed to discover coordinator: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = worker.run().await {
        error!("worker terminated: {e}");
        std::process::exit(1);
    }
}
