use anyhow::Result;
use clap::Parser;
use common::App;
use distributed::{
    init_logger,
    store::{Store, DEFAULT_PREFIX},
    worker::{
        GrpcCoordinator, RetryPolicy, Worker, WorkerConfig, DEFAULT_COORDINATOR_GONE_AFTER,
    },
    ADDR,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::info;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(short, long)]
    app_name: String,
    #[arg(short, long, default_value_t = format!("http://{ADDR}"))]
    coordinator: String,
    /// Tasks executed at once by this process.
    #[arg(short = 'j', long, default_value_t = 1)]
    concurrency: usize,
    /// Pause between polls when there is nothing to do, and between retries.
    #[arg(long, default_value_t = 1000)]
    backoff_ms: u64,
    #[arg(long, default_value_t = 5000)]
    rpc_timeout_ms: u64,
    /// Exit with an error after this many consecutive failed calls.
    #[arg(long)]
    give_up_after: Option<u32>,
    /// Once the map phase is over, exit cleanly after this many consecutive
    /// failed calls: the coordinator has finished and gone away.
    #[arg(long, default_value_t = DEFAULT_COORDINATOR_GONE_AFTER)]
    coordinator_gone_after: u32,
    #[arg(short, long, default_value = ".")]
    work_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_PREFIX)]
    prefix: String,
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logger("worker", cli.log_dir.as_deref())?;

    let app = App::load(&cli.app_name)?;
    let client = GrpcCoordinator::connect_lazy(
        &cli.coordinator,
        Duration::from_millis(cli.rpc_timeout_ms),
    )?;

    let mut retry = RetryPolicy::fixed(Duration::from_millis(cli.backoff_ms));
    if let Some(n) = cli.give_up_after {
        retry = retry.give_up_after(n);
    }
    let config = WorkerConfig {
        concurrency: cli.concurrency,
        retry,
        coordinator_gone_after: cli.coordinator_gone_after,
        store: Store::new(&cli.work_dir, cli.prefix.as_str()),
    };

    let worker = Worker::new(app, Arc::new(client), config);
    let summary = worker.run().await?;
    info!(
        "done: {} map, {} reduce, {} failed",
        summary.maps, summary.reduces, summary.failed
    );
    Ok(())
}
