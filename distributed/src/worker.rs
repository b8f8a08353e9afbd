//! The worker side: poll the coordinator for tasks, run them, report back.
//!
//! A worker never decides a phase is over by itself. It keeps asking until
//! the coordinator says so, waits for its own in-flight tasks, and only
//! then moves on to the next phase.

use crate::{
    coordinator::Coordinator,
    ledger::{TaskDescriptor, TaskId, TaskInput, TaskKind, WorkerId},
    service::{map_reduce_client::MapReduceClient, map_reduce_server::MapReduce, *},
    store::{self, PartitionWriter, Store},
};
use anyhow::{bail, Context, Result};
use common::App;
use std::{fs, future::Future, sync::Arc, time::Duration};
use tokio::{task::JoinSet, time};
use tonic::{
    transport::{Channel, Endpoint},
    Request,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How many times a completion or failure report is attempted before the
/// worker gives up on it and leaves the task to the coordinator's timeout.
const REPORT_ATTEMPTS: u32 = 3;

/// The calls a worker makes. Control signals come back inside `Ok`
/// replies; an `Err` always means the call itself did not go through.
#[tonic::async_trait]
pub trait CoordinatorApi: Send + Sync + 'static {
    async fn request_map_task(&self, worker_id: &str) -> Result<MapTaskReply>;
    async fn request_reduce_task(&self, worker_id: &str) -> Result<ReduceTaskReply>;
    async fn report_task_done(&self, task: &TaskDescriptor) -> Result<()>;
    async fn report_task_failed(&self, task: &TaskDescriptor) -> Result<()>;
}

fn report(task: &TaskDescriptor) -> ReportRequest {
    ReportRequest {
        task_type: TaskType::from(task.kind) as i32,
        task_id: task.id,
        worker_id: task.worker_id.clone(),
        attempt: task.attempt,
    }
}

/// gRPC client. The channel connects lazily and reconnects on demand, and
/// every call is bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct GrpcCoordinator {
    client: MapReduceClient<Channel>,
}

impl GrpcCoordinator {
    pub fn connect_lazy(url: &str, rpc_timeout: Duration) -> Result<Self> {
        let channel = Endpoint::from_shared(url.to_string())
            .with_context(|| format!("invalid coordinator url {url}"))?
            .connect_timeout(rpc_timeout)
            .timeout(rpc_timeout)
            .connect_lazy();
        Ok(Self {
            client: MapReduceClient::new(channel),
        })
    }

    pub async fn ping(&self, x: i64) -> Result<i64> {
        let reply = self.client.clone().ping(PingRequest { x }).await?;
        Ok(reply.into_inner().x)
    }
}

#[tonic::async_trait]
impl CoordinatorApi for GrpcCoordinator {
    async fn request_map_task(&self, worker_id: &str) -> Result<MapTaskReply> {
        let request = MapTaskRequest {
            worker_id: worker_id.to_string(),
        };
        Ok(self.client.clone().request_map_task(request).await?.into_inner())
    }

    async fn request_reduce_task(&self, worker_id: &str) -> Result<ReduceTaskReply> {
        let request = ReduceTaskRequest {
            worker_id: worker_id.to_string(),
        };
        Ok(self
            .client
            .clone()
            .request_reduce_task(request)
            .await?
            .into_inner())
    }

    async fn report_task_done(&self, task: &TaskDescriptor) -> Result<()> {
        self.client.clone().report_task_done(report(task)).await?;
        Ok(())
    }

    async fn report_task_failed(&self, task: &TaskDescriptor) -> Result<()> {
        self.client.clone().report_task_failed(report(task)).await?;
        Ok(())
    }
}

/// Talks to a coordinator living in the same process, skipping the
/// network.
#[tonic::async_trait]
impl CoordinatorApi for Coordinator {
    async fn request_map_task(&self, worker_id: &str) -> Result<MapTaskReply> {
        let request = Request::new(MapTaskRequest {
            worker_id: worker_id.to_string(),
        });
        Ok(MapReduce::request_map_task(self, request).await?.into_inner())
    }

    async fn request_reduce_task(&self, worker_id: &str) -> Result<ReduceTaskReply> {
        let request = Request::new(ReduceTaskRequest {
            worker_id: worker_id.to_string(),
        });
        Ok(MapReduce::request_reduce_task(self, request)
            .await?
            .into_inner())
    }

    async fn report_task_done(&self, task: &TaskDescriptor) -> Result<()> {
        MapReduce::report_task_done(self, Request::new(report(task))).await?;
        Ok(())
    }

    async fn report_task_failed(&self, task: &TaskDescriptor) -> Result<()> {
        MapReduce::report_task_failed(self, Request::new(report(task))).await?;
        Ok(())
    }
}

/// Fixed-interval retry. `None` retries transport failures forever.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_consecutive_failures: Option<u32>,
}

impl RetryPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_consecutive_failures: None,
        }
    }

    pub fn give_up_after(mut self, failures: u32) -> Self {
        self.max_consecutive_failures = Some(failures);
        self
    }

    pub async fn backoff(&self) {
        time::sleep(self.interval).await;
    }

    fn exhausted(&self, failures: u32) -> bool {
        self.max_consecutive_failures
            .map_or(false, |max| failures >= max)
    }

    /// Runs `call` until it succeeds or `attempts` calls have failed.
    async fn retry<T, F, Fut>(&self, attempts: u32, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut failures = 0;
        loop {
            match call().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    failures += 1;
                    if failures >= attempts {
                        return Err(e);
                    }
                    debug!("retrying after error: {:#}", e);
                    self.backoff().await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of tasks executing at once in this process.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Consecutive failed calls in the reduce phase after which the
    /// coordinator is taken to have finished the job and exited.
    pub coordinator_gone_after: u32,
    pub store: Store,
}

pub const DEFAULT_COORDINATOR_GONE_AFTER: u32 = 3;

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            retry: RetryPolicy::default(),
            coordinator_gone_after: DEFAULT_COORDINATOR_GONE_AFTER,
            store: Store::default(),
        }
    }
}

/// What a worker did before exiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub maps: u64,
    pub reduces: u64,
    pub failed: u64,
}

impl WorkerSummary {
    fn tally(&mut self, kind: TaskKind, ok: bool) {
        match (kind, ok) {
            (_, false) => self.failed += 1,
            (TaskKind::Map, true) => self.maps += 1,
            (TaskKind::Reduce, true) => self.reduces += 1,
        }
    }
}

#[derive(Debug)]
enum Poll {
    Task(TaskDescriptor),
    Wait,
    PhaseDone,
}

pub struct Worker<C> {
    id: WorkerId,
    app: App,
    client: Arc<C>,
    config: WorkerConfig,
}

impl<C: CoordinatorApi> Worker<C> {
    pub fn new(app: App, client: Arc<C>, config: WorkerConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            app,
            client,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Drains the map phase, then the reduce phase.
    pub async fn run(&self) -> Result<WorkerSummary> {
        info!(
            "worker {} running `{}` with concurrency {}",
            self.id, self.app.app_name, self.config.concurrency
        );
        let mut summary = WorkerSummary::default();
        self.drain(TaskKind::Map, &mut summary).await?;
        info!("worker {}: map phase done", self.id);
        self.drain(TaskKind::Reduce, &mut summary).await?;
        info!("worker {} exiting: {:?}", self.id, summary);
        Ok(summary)
    }

    async fn drain(&self, kind: TaskKind, summary: &mut WorkerSummary) -> Result<()> {
        let concurrency = self.config.concurrency.max(1);
        let mut in_flight = JoinSet::new();
        let mut failures = 0;

        loop {
            if in_flight.len() >= concurrency {
                if let Some(joined) = in_flight.join_next().await {
                    let (kind, ok) = joined.context("task execution aborted")?;
                    summary.tally(kind, ok);
                }
                continue;
            }

            match self.poll(kind).await {
                Ok(Poll::Task(task)) => {
                    failures = 0;
                    in_flight.spawn(execute(
                        self.app.clone(),
                        self.config.clone(),
                        Arc::clone(&self.client),
                        task,
                    ));
                }
                Ok(Poll::Wait) => {
                    failures = 0;
                    debug!("no {} task for {}, waiting", kind, self.id);
                    self.config.retry.backoff().await;
                }
                Ok(Poll::PhaseDone) => break,
                Err(e) => {
                    failures += 1;
                    // Past the map barrier the coordinator only shuts down
                    // once every reduce task is done, so a worker that
                    // missed JOB_DONE sees a closed port instead.
                    let gone_after = self.config.coordinator_gone_after;
                    if kind == TaskKind::Reduce && failures >= gone_after {
                        info!(
                            "coordinator gone after {} failed calls ({:#}), job assumed done",
                            failures, e
                        );
                        break;
                    }
                    if self.config.retry.exhausted(failures) {
                        return Err(e.context(format!(
                            "giving up after {failures} failed calls to the coordinator"
                        )));
                    }
                    warn!("coordinator unreachable ({:#}), retrying", e);
                    self.config.retry.backoff().await;
                }
            }
        }

        // Output of tasks still running here must be on disk before the
        // next phase starts asking for work.
        while let Some(joined) = in_flight.join_next().await {
            let (kind, ok) = joined.context("task execution aborted")?;
            summary.tally(kind, ok);
        }
        Ok(())
    }

    async fn poll(&self, kind: TaskKind) -> Result<Poll> {
        match kind {
            TaskKind::Map => {
                let reply = self.client.request_map_task(&self.id).await?;
                debug!("{}", reply);
                Ok(match reply.signal() {
                    Signal::Assigned => Poll::Task(TaskDescriptor {
                        id: reply.task_id,
                        kind,
                        input: TaskInput::File(reply.file_name),
                        worker_id: reply.worker_id,
                        n_map: 0,
                        n_reduce: reply.n_reduce,
                        attempt: reply.attempt,
                    }),
                    Signal::MapPhaseDone | Signal::JobDone => Poll::PhaseDone,
                    _ => Poll::Wait,
                })
            }
            TaskKind::Reduce => {
                let reply = self.client.request_reduce_task(&self.id).await?;
                debug!("{}", reply);
                Ok(match reply.signal() {
                    Signal::Assigned => Poll::Task(TaskDescriptor {
                        id: reply.task_id,
                        kind,
                        input: TaskInput::Partition(reply.partition_number),
                        worker_id: reply.worker_id,
                        n_map: reply.n_map,
                        n_reduce: 0,
                        attempt: reply.attempt,
                    }),
                    Signal::JobDone => Poll::PhaseDone,
                    _ => Poll::Wait,
                })
            }
        }
    }
}

/// Runs one task on the blocking pool and reports the outcome. An error or
/// a panic in the task is reported as a failure; the worker itself keeps
/// going.
async fn execute<C: CoordinatorApi>(
    app: App,
    config: WorkerConfig,
    client: Arc<C>,
    task: TaskDescriptor,
) -> (TaskKind, bool) {
    let (kind, id) = (task.kind, task.id);
    info!("{} task {} started (attempt {})", kind, id, task.attempt);

    let store = config.store.clone();
    let descriptor = task.clone();
    let result = tokio::task::spawn_blocking(move || run_task(&app, &store, &task)).await;
    let ok = match result {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("{} task {} failed: {:#}", kind, id, e);
            false
        }
        Err(e) => {
            error!("{} task {} panicked: {}", kind, id, e);
            false
        }
    };

    let (client, task) = (client.as_ref(), &descriptor);
    let reported = config
        .retry
        .retry(REPORT_ATTEMPTS, move || async move {
            if ok {
                client.report_task_done(task).await
            } else {
                client.report_task_failed(task).await
            }
        })
        .await;
    match reported {
        Ok(()) if ok => info!("{} task {} done", kind, id),
        Ok(()) => {}
        Err(e) => warn!(
            "could not report {} task {} ({:#}), leaving it to the timeout",
            kind, id, e
        ),
    }
    (kind, ok)
}

fn run_task(app: &App, store: &Store, task: &TaskDescriptor) -> Result<()> {
    match &task.input {
        TaskInput::File(file) => run_map(app, store, task.id, file, task.n_reduce),
        TaskInput::Partition(bucket) => run_reduce(app, store, *bucket, task.n_map),
    }
}

fn run_map(app: &App, store: &Store, map_id: TaskId, file: &str, n_reduce: u64) -> Result<()> {
    if n_reduce == 0 {
        bail!("map task {map_id} has no reduce buckets");
    }
    let mut writer = PartitionWriter::create(store, map_id, n_reduce)?;
    let contents = fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
    for kv in app.map(file, &contents) {
        writer.emit(&kv)?;
    }
    writer.finish()?;
    Ok(())
}

fn run_reduce(app: &App, store: &Store, bucket: u64, n_map: u64) -> Result<()> {
    let records = store::read_partition(store, bucket, n_map)?;
    let groups = store::reduce_partition(&**app, records);
    store::write_output(store, bucket, &groups)?;
    Ok(())
}
