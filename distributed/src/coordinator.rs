//! gRPC front of the [`Ledger`]: every RPC is one short ledger call, and
//! no ledger lock is ever held while a reply is in flight.

use crate::{
    ledger::{Completion, Ledger, LedgerConfig, LedgerError, TaskInput, WorkerId},
    service::{map_reduce_server::*, *},
};
use anyhow::Result;
use dashmap::DashMap;
use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle, time};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{transport::Server, Request, Response, Status};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub ledger: LedgerConfig,
    /// Period of the background stale-task sweep.
    pub sweep_interval: Duration,
    /// Period of the `is_job_done` poll that ends the process.
    pub poll_interval: Duration,
    /// Time left for polling workers to see `JOB_DONE` before the server
    /// goes away. Workers that miss it treat the closed port as the end of
    /// the job.
    pub grace_period: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            sweep_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    pub assigned: u64,
    pub completed: u64,
    pub failed: u64,
    pub last_seen: Option<Instant>,
}

#[derive(Debug)]
pub struct Coordinator {
    ledger: Arc<Ledger>,
    workers: DashMap<WorkerId, WorkerStats>,
}

impl Coordinator {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            workers: DashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn worker_stats(&self, worker: &str) -> Option<WorkerStats> {
        self.workers.get(worker).map(|s| *s)
    }

    /// Workers may come without an id; they get one and keep using it.
    fn identify(&self, worker_id: String) -> WorkerId {
        let id = if worker_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            worker_id
        };
        self.workers.entry(id.clone()).or_default().last_seen = Some(Instant::now());
        id
    }

    fn record(&self, worker: &str, update: impl FnOnce(&mut WorkerStats)) {
        if let Some(mut stats) = self.workers.get_mut(worker) {
            update(stats.value_mut());
        }
    }

    pub fn log_stats(&self) {
        let stats = self.ledger.snapshot();
        info!(
            "ledger: phase {:?}, map {:?}, reduce {:?}, {} assignments",
            stats.phase, stats.map, stats.reduce, stats.attempts
        );
        for entry in self.workers.iter() {
            let s = entry.value();
            info!(
                "worker {}: assigned {}, completed {}, failed {}",
                entry.key(),
                s.assigned,
                s.completed,
                s.failed
            );
        }
    }
}

#[tonic::async_trait]
impl MapReduce for Coordinator {
    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingReply>, Status> {
        let x = request.into_inner().x;
        Ok(Response::new(PingReply {
            x: x.wrapping_add(1),
        }))
    }

    async fn request_map_task(
        &self,
        request: Request<MapTaskRequest>,
    ) -> Result<Response<MapTaskReply>, Status> {
        let worker_id = self.identify(request.into_inner().worker_id);
        let mut reply = MapTaskReply {
            worker_id: worker_id.clone(),
            n_reduce: self.ledger.n_reduce(),
            ..Default::default()
        };

        match self.ledger.assign_map(&worker_id) {
            Ok(task) => {
                self.record(&worker_id, |s| s.assigned += 1);
                reply.set_signal(Signal::Assigned);
                reply.task_id = task.id;
                reply.attempt = task.attempt;
                if let TaskInput::File(file) = task.input {
                    reply.file_name = file;
                }
            }
            Err(_) if self.ledger.map_phase_done() => reply.set_signal(Signal::MapPhaseDone),
            Err(_) => reply.set_signal(Signal::NoMapTasksAvailable),
        }

        debug!("{} -> {}", worker_id, reply);
        Ok(Response::new(reply))
    }

    async fn request_reduce_task(
        &self,
        request: Request<ReduceTaskRequest>,
    ) -> Result<Response<ReduceTaskReply>, Status> {
        let worker_id = self.identify(request.into_inner().worker_id);
        let mut reply = ReduceTaskReply {
            worker_id: worker_id.clone(),
            n_map: self.ledger.n_map(),
            ..Default::default()
        };

        match self.ledger.assign_reduce(&worker_id) {
            Ok(task) => {
                self.record(&worker_id, |s| s.assigned += 1);
                reply.set_signal(Signal::Assigned);
                reply.task_id = task.id;
                reply.attempt = task.attempt;
                if let TaskInput::Partition(bucket) = task.input {
                    reply.partition_number = bucket;
                }
            }
            Err(LedgerError::MapPhaseIncomplete) => reply.set_signal(Signal::MapPhaseIncomplete),
            Err(_) if self.ledger.is_job_done() => reply.set_signal(Signal::JobDone),
            Err(_) => reply.set_signal(Signal::NoReduceTasksAvailable),
        }

        debug!("{} -> {}", worker_id, reply);
        Ok(Response::new(reply))
    }

    async fn report_task_done(
        &self,
        request: Request<ReportRequest>,
    ) -> Result<Response<ReportReply>, Status> {
        let report = request.into_inner();
        let kind = TaskType::from_i32(report.task_type)
            .ok_or_else(|| Status::invalid_argument("unknown task type"))?
            .into();

        let completion = self.ledger.report_done(kind, report.task_id);
        if completion == Completion::Accepted {
            info!("{} task {} done by {}", kind, report.task_id, report.worker_id);
            self.record(&report.worker_id, |s| s.completed += 1);
        }
        Ok(Response::new(ReportReply {}))
    }

    async fn report_task_failed(
        &self,
        request: Request<ReportRequest>,
    ) -> Result<Response<ReportReply>, Status> {
        let report = request.into_inner();
        let kind = TaskType::from_i32(report.task_type)
            .ok_or_else(|| Status::invalid_argument("unknown task type"))?
            .into();

        self.record(&report.worker_id, |s| s.failed += 1);
        self.ledger
            .report_failed(kind, report.task_id, &report.worker_id, report.attempt);
        Ok(Response::new(ReportReply {}))
    }
}

/// Periodically hands abandoned tasks back out. Assignment scans reclaim
/// lazily too; the sweep keeps the ledger current while nobody asks.
pub fn spawn_sweeper(ledger: Arc<Ledger>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if ledger.is_job_done() {
                break;
            }
            let reclaimed = ledger.reclaim_stale();
            if reclaimed > 0 {
                warn!("sweep reclaimed {} stale tasks", reclaimed);
            }
        }
    })
}

/// Serves the coordinator on `listener` until `signal` resolves.
pub async fn serve(
    coordinator: Arc<Coordinator>,
    listener: TcpListener,
    signal: impl Future<Output = ()>,
) -> Result<()> {
    Server::builder()
        .add_service(MapReduceServer::from_arc(coordinator))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
        .await?;
    Ok(())
}

/// Resolves once the job is done, checking every `interval`.
pub async fn wait_until_done(ledger: &Ledger, interval: Duration) {
    while !ledger.is_job_done() {
        time::sleep(interval).await;
    }
}

/// Runs a whole job: serve, sweep, wait for completion, then shut down
/// after the grace period.
pub async fn run(
    coordinator: Arc<Coordinator>,
    listener: TcpListener,
    config: &CoordinatorConfig,
) -> Result<()> {
    let ledger = Arc::clone(coordinator.ledger());
    let sweeper = spawn_sweeper(Arc::clone(&ledger), config.sweep_interval);

    let (tx, rx) = oneshot::channel::<()>();
    let grace = config.grace_period;
    let server = tokio::spawn(serve(Arc::clone(&coordinator), listener, async move {
        rx.await.ok();
        time::sleep(grace).await;
    }));

    wait_until_done(&ledger, config.poll_interval).await;
    info!("all done");
    let _ = tx.send(());

    server.await??;
    sweeper.abort();
    coordinator.log_stats();
    Ok(())
}
