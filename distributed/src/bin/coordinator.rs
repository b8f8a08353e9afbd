use anyhow::{Context, Result};
use clap::Parser;
use distributed::{
    coordinator::{self, Coordinator, CoordinatorConfig},
    init_logger,
    ledger::{Ledger, LedgerConfig},
    store::{Store, DEFAULT_PREFIX},
    ADDR,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser, Debug)]
pub struct Cli {
    #[arg(short,long,default_value = ADDR)]
    listen: String,
    #[arg(short, long, default_value_t = 10)]
    n_reduce: u64,
    /// Seconds a task may run before it is handed to another worker.
    #[arg(short, long, default_value_t = 10)]
    task_timeout: u64,
    #[arg(long, default_value_t = 1000)]
    sweep_interval_ms: u64,
    /// How long `JOB_DONE` is still served after the last task finished.
    #[arg(long, default_value_t = 1000)]
    grace_period_ms: u64,
    /// Directory shared with the workers, holding intermediate and output files.
    #[arg(short, long, default_value = ".")]
    work_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_PREFIX)]
    prefix: String,
    /// Leave intermediate files behind once the job is done.
    #[arg(long)]
    keep_intermediate: bool,
    #[arg(long)]
    log_dir: Option<PathBuf>,
    input_files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logger("coordinator", cli.log_dir.as_deref())?;

    let config = CoordinatorConfig {
        ledger: LedgerConfig {
            task_timeout: Duration::from_secs(cli.task_timeout),
        },
        sweep_interval: Duration::from_millis(cli.sweep_interval_ms.max(1)),
        grace_period: Duration::from_millis(cli.grace_period_ms),
        ..Default::default()
    };
    let files = cli
        .input_files
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let ledger = Arc::new(Ledger::new(files, cli.n_reduce, config.ledger.clone()));
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&ledger)));

    let listener = TcpListener::bind(cli.listen.as_str())
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!("coordinator listening on {}", listener.local_addr()?);

    coordinator::run(coordinator, listener, &config).await?;

    if !cli.keep_intermediate {
        let store = Store::new(&cli.work_dir, cli.prefix.as_str());
        if let Err(e) = store.remove_intermediate(ledger.n_map(), ledger.n_reduce()) {
            warn!("cleaning up intermediate files: {:#}", e);
        }
    }
    Ok(())
}
