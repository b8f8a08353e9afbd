//! The coordinator's authoritative record of every task.
//!
//! Two locks guard the state. `tasks` owns the task slices and the map
//! barrier flag; `progress` owns the completion counters and the job done
//! flag, so `is_job_done` polling never queues behind an assignment scan.
//! Whenever both are held, `tasks` is taken first. Neither is held across
//! an `.await`.

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info, warn};

pub type TaskId = u64;
pub type WorkerId = String;

pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Map,
    Reduce,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Map => write!(f, "map"),
            TaskKind::Reduce => write!(f, "reduce"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskInput {
    /// Input split of a map task.
    File(String),
    /// Bucket gathered by a reduce task.
    Partition(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Mapping,
    Reducing,
    Done,
}

#[derive(Debug, Clone)]
struct Task {
    id: TaskId,
    kind: TaskKind,
    input: TaskInput,
    state: TaskState,
    assigned_worker: Option<WorkerId>,
    assigned_at: Option<Instant>,
    attempts: u32,
}

impl Task {
    fn new(id: TaskId, kind: TaskKind, input: TaskInput) -> Self {
        Self {
            id,
            kind,
            input,
            state: TaskState::Idle,
            assigned_worker: None,
            assigned_at: None,
            attempts: 0,
        }
    }
}

/// What a worker gets back from an assignment: a copy, never the live
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub kind: TaskKind,
    pub input: TaskInput,
    pub worker_id: WorkerId,
    pub n_map: u64,
    pub n_reduce: u64,
    pub attempt: u32,
}

/// Expected answers to an assignment request that carry no task.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LedgerError {
    #[error("no map tasks available")]
    NoMapTasksAvailable,
    #[error("map phase incomplete")]
    MapPhaseIncomplete,
    #[error("no reduce tasks available")]
    NoReduceTasksAvailable,
}

/// Outcome of a completion report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// First report for the task; counters moved.
    Accepted,
    /// The task was already completed. Nothing changed.
    Duplicate,
    /// No such task, or it was never handed out. Nothing changed.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// How long a task may stay in progress before it is handed to
    /// someone else.
    pub task_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub idle: usize,
    pub in_progress: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerStats {
    pub phase: Phase,
    pub map: StateCounts,
    pub reduce: StateCounts,
    pub attempts: u64,
}

#[derive(Debug)]
struct Tasks {
    map: Vec<Task>,
    reduce: Vec<Task>,
    map_phase_done: bool,
}

impl Tasks {
    fn slice_mut(&mut self, kind: TaskKind) -> &mut Vec<Task> {
        match kind {
            TaskKind::Map => &mut self.map,
            TaskKind::Reduce => &mut self.reduce,
        }
    }

    fn all_maps_completed(&self) -> bool {
        self.map.iter().all(|t| t.state == TaskState::Completed)
    }
}

#[derive(Debug, Default)]
struct Progress {
    completed_reduce: u64,
    all_done: bool,
}

#[derive(Debug)]
pub struct Ledger {
    config: LedgerConfig,
    n_map: u64,
    n_reduce: u64,
    tasks: Mutex<Tasks>,
    progress: Mutex<Progress>,
}

impl Ledger {
    /// One map task per input file and `n_reduce` reduce tasks. A job with
    /// no input or no buckets has nothing to do and starts out done.
    pub fn new(files: Vec<String>, n_reduce: u64, config: LedgerConfig) -> Self {
        let empty = files.is_empty() || n_reduce == 0;
        let (map, reduce) = if empty {
            (Vec::new(), Vec::new())
        } else {
            let map = files
                .into_iter()
                .enumerate()
                .map(|(i, file)| Task::new(i as TaskId, TaskKind::Map, TaskInput::File(file)))
                .collect::<Vec<_>>();
            let reduce = (0..n_reduce)
                .map(|b| Task::new(b, TaskKind::Reduce, TaskInput::Partition(b)))
                .collect::<Vec<_>>();
            (map, reduce)
        };
        let n_map = map.len() as u64;
        let n_reduce = reduce.len() as u64;
        if empty {
            info!("empty job, nothing to schedule");
        } else {
            info!(n_map, n_reduce, "ledger initialised");
        }

        Self {
            config,
            n_map,
            n_reduce,
            tasks: Mutex::new(Tasks {
                map,
                reduce,
                map_phase_done: empty,
            }),
            progress: Mutex::new(Progress {
                all_done: empty,
                ..Default::default()
            }),
        }
    }

    pub fn n_map(&self) -> u64 {
        self.n_map
    }

    pub fn n_reduce(&self) -> u64 {
        self.n_reduce
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn assign_map(&self, worker: &str) -> Result<TaskDescriptor, LedgerError> {
        self.assign_map_at(worker, Instant::now())
    }

    pub fn assign_reduce(&self, worker: &str) -> Result<TaskDescriptor, LedgerError> {
        self.assign_reduce_at(worker, Instant::now())
    }

    fn assign_map_at(&self, worker: &str, now: Instant) -> Result<TaskDescriptor, LedgerError> {
        let mut tasks = self.lock_tasks();
        self.reclaim_locked(&mut tasks, now);

        if let Some(task) = claim(&mut tasks.map, worker, now) {
            return Ok(self.describe(task));
        }
        if !tasks.map_phase_done && tasks.all_maps_completed() {
            tasks.map_phase_done = true;
            info!("map phase done");
        }
        Err(LedgerError::NoMapTasksAvailable)
    }

    fn assign_reduce_at(&self, worker: &str, now: Instant) -> Result<TaskDescriptor, LedgerError> {
        let mut tasks = self.lock_tasks();
        if !tasks.map_phase_done {
            return Err(LedgerError::MapPhaseIncomplete);
        }
        self.reclaim_locked(&mut tasks, now);

        match claim(&mut tasks.reduce, worker, now) {
            Some(task) => Ok(self.describe(task)),
            None => Err(LedgerError::NoReduceTasksAvailable),
        }
    }

    fn describe(&self, task: &Task) -> TaskDescriptor {
        let descriptor = TaskDescriptor {
            id: task.id,
            kind: task.kind,
            input: task.input.clone(),
            worker_id: task.assigned_worker.clone().unwrap_or_default(),
            n_map: self.n_map,
            n_reduce: self.n_reduce,
            attempt: task.attempts,
        };
        info!(
            "assigned {} task {} to {} (attempt {})",
            descriptor.kind, descriptor.id, descriptor.worker_id, descriptor.attempt
        );
        descriptor
    }

    /// Marks a task completed. Repeated and late reports are harmless: a
    /// task is counted once, on its first completion.
    pub fn report_done(&self, kind: TaskKind, id: TaskId) -> Completion {
        let mut tasks = self.lock_tasks();
        let Some(task) = tasks.slice_mut(kind).get_mut(id as usize) else {
            warn!("completion for unknown {} task {}", kind, id);
            return Completion::Unknown;
        };
        match task.state {
            TaskState::Completed => {
                debug!("duplicate completion for {} task {}", kind, id);
                return Completion::Duplicate;
            }
            _ if task.attempts == 0 => {
                warn!("completion for {} task {} that was never assigned", kind, id);
                return Completion::Unknown;
            }
            TaskState::Idle => {
                info!("late completion for reclaimed {} task {}, accepting", kind, id);
            }
            TaskState::InProgress => {}
        }
        task.state = TaskState::Completed;
        task.assigned_at = None;

        if kind == TaskKind::Map && !tasks.map_phase_done && tasks.all_maps_completed() {
            tasks.map_phase_done = true;
            info!("map phase done");
        }

        if kind == TaskKind::Reduce {
            let mut progress = self.lock_progress();
            progress.completed_reduce += 1;
            if progress.completed_reduce == self.n_reduce {
                progress.all_done = true;
                info!("all reduce tasks done");
            }
        }
        Completion::Accepted
    }

    /// Puts a task back to idle right away when its current holder says it
    /// failed, instead of waiting for the timeout. Only the current
    /// assignment can be failed: reports from anyone else, or about an
    /// earlier attempt, are ignored.
    pub fn report_failed(&self, kind: TaskKind, id: TaskId, worker: &str, attempt: u32) -> bool {
        let mut tasks = self.lock_tasks();
        let Some(task) = tasks.slice_mut(kind).get_mut(id as usize) else {
            return false;
        };
        if task.state != TaskState::InProgress
            || task.assigned_worker.as_deref() != Some(worker)
            || task.attempts != attempt
        {
            debug!(
                "ignoring failure of {} task {} attempt {} from {}",
                kind, id, attempt, worker
            );
            return false;
        }
        warn!("{} task {} failed on {}, back to idle", kind, id, worker);
        reset(task);
        true
    }

    /// Returns every in-progress task older than the timeout to idle.
    pub fn reclaim_stale(&self) -> usize {
        self.reclaim_stale_at(Instant::now())
    }

    fn reclaim_stale_at(&self, now: Instant) -> usize {
        let mut tasks = self.lock_tasks();
        self.reclaim_locked(&mut tasks, now)
    }

    fn reclaim_locked(&self, tasks: &mut Tasks, now: Instant) -> usize {
        let timeout = self.config.task_timeout;
        let mut reclaimed = 0;
        for task in tasks.map.iter_mut().chain(tasks.reduce.iter_mut()) {
            if task.state != TaskState::InProgress {
                continue;
            }
            let Some(at) = task.assigned_at else { continue };
            let elapsed = now.saturating_duration_since(at);
            if elapsed >= timeout {
                warn!(
                    "{} task {} timed out on {} after {:?}, back to idle",
                    task.kind,
                    task.id,
                    task.assigned_worker.as_deref().unwrap_or("?"),
                    elapsed
                );
                reset(task);
                reclaimed += 1;
            }
        }
        reclaimed
    }

    pub fn map_phase_done(&self) -> bool {
        self.lock_tasks().map_phase_done
    }

    pub fn is_job_done(&self) -> bool {
        self.lock_progress().all_done
    }

    pub fn phase(&self) -> Phase {
        let map_phase_done = self.map_phase_done();
        if self.is_job_done() {
            Phase::Done
        } else if map_phase_done {
            Phase::Reducing
        } else {
            Phase::Mapping
        }
    }

    pub fn snapshot(&self) -> LedgerStats {
        let tasks = self.lock_tasks();
        let progress = self.lock_progress();
        let phase = if progress.all_done {
            Phase::Done
        } else if tasks.map_phase_done {
            Phase::Reducing
        } else {
            Phase::Mapping
        };
        LedgerStats {
            phase,
            map: count(&tasks.map),
            reduce: count(&tasks.reduce),
            attempts: tasks
                .map
                .iter()
                .chain(tasks.reduce.iter())
                .map(|t| u64::from(t.attempts))
                .sum(),
        }
    }
}

/// First idle task in index order, flipped to in progress.
fn claim<'a>(tasks: &'a mut [Task], worker: &str, now: Instant) -> Option<&'a Task> {
    let task = tasks.iter_mut().find(|t| t.state == TaskState::Idle)?;
    task.state = TaskState::InProgress;
    task.assigned_worker = Some(worker.to_string());
    task.assigned_at = Some(now);
    task.attempts += 1;
    Some(task)
}

fn reset(task: &mut Task) {
    task.state = TaskState::Idle;
    task.assigned_worker = None;
    task.assigned_at = None;
}

fn count(tasks: &[Task]) -> StateCounts {
    tasks.iter().fold(StateCounts::default(), |mut c, t| {
        match t.state {
            TaskState::Idle => c.idle += 1,
            TaskState::InProgress => c.in_progress += 1,
            TaskState::Completed => c.completed += 1,
        }
        c
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("pg-{i}.txt")).collect()
    }

    fn ledger(m: usize, r: u64) -> Ledger {
        Ledger::new(files(m), r, LedgerConfig::default())
    }

    fn finish_maps(ledger: &Ledger) {
        while let Ok(task) = ledger.assign_map("w") {
            ledger.report_done(TaskKind::Map, task.id);
        }
    }

    #[test]
    fn test_task_counts() {
        let l = ledger(3, 5);
        assert_eq!(l.n_map(), 3);
        assert_eq!(l.n_reduce(), 5);
        let stats = l.snapshot();
        assert_eq!(stats.map.idle, 3);
        assert_eq!(stats.reduce.idle, 5);
        assert_eq!(stats.phase, Phase::Mapping);
    }

    #[test]
    fn test_map_assignment_in_index_order() {
        let l = ledger(3, 1);
        let ids = (0..3).map(|_| l.assign_map("w1").unwrap().id).collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(l.assign_map("w1"), Err(LedgerError::NoMapTasksAvailable));
        // all handed out but none completed
        assert!(!l.map_phase_done());
    }

    #[test]
    fn test_descriptor_is_a_snapshot() {
        let l = ledger(2, 4);
        let t = l.assign_map("w1").unwrap();
        assert_eq!(t.kind, TaskKind::Map);
        assert_eq!(t.input, TaskInput::File("pg-0.txt".into()));
        assert_eq!(t.worker_id, "w1");
        assert_eq!((t.n_map, t.n_reduce, t.attempt), (2, 4, 1));
    }

    #[test]
    fn test_reduce_waits_for_every_map() {
        let l = ledger(2, 2);
        let a = l.assign_map("w1").unwrap();
        let b = l.assign_map("w2").unwrap();
        assert_eq!(l.assign_reduce("w3"), Err(LedgerError::MapPhaseIncomplete));
        l.report_done(TaskKind::Map, a.id);
        assert_eq!(l.assign_reduce("w3"), Err(LedgerError::MapPhaseIncomplete));
        l.report_done(TaskKind::Map, b.id);
        assert!(l.map_phase_done());
        let r = l.assign_reduce("w3").unwrap();
        assert_eq!(r.input, TaskInput::Partition(0));
        assert_eq!(l.phase(), Phase::Reducing);
    }

    #[test]
    fn test_map_phase_flag_set_by_assignment_scan() {
        let l = ledger(1, 1);
        let t = l.assign_map("w").unwrap();
        l.report_done(TaskKind::Map, t.id);
        assert_eq!(l.assign_map("w"), Err(LedgerError::NoMapTasksAvailable));
        assert!(l.map_phase_done());
    }

    #[test]
    fn test_job_done_after_all_tasks() {
        let l = ledger(2, 3);
        finish_maps(&l);
        let mut reduces = Vec::new();
        while let Ok(t) = l.assign_reduce("w") {
            reduces.push(t.id);
        }
        assert_eq!(reduces, vec![0, 1, 2]);
        assert_eq!(l.assign_reduce("w"), Err(LedgerError::NoReduceTasksAvailable));
        for id in reduces {
            assert!(!l.is_job_done());
            assert_eq!(l.report_done(TaskKind::Reduce, id), Completion::Accepted);
        }
        assert!(l.is_job_done());
        assert_eq!(l.phase(), Phase::Done);
        let stats = l.snapshot();
        assert_eq!(stats.map.completed, 2);
        assert_eq!(stats.reduce.completed, 3);
    }

    #[test]
    fn test_report_done_is_idempotent() {
        let l = ledger(1, 1);
        finish_maps(&l);
        let r = l.assign_reduce("w").unwrap();
        assert_eq!(l.report_done(TaskKind::Reduce, r.id), Completion::Accepted);
        let once = l.snapshot();
        assert_eq!(l.report_done(TaskKind::Reduce, r.id), Completion::Duplicate);
        assert_eq!(l.snapshot(), once);
        assert!(l.is_job_done());
    }

    #[test]
    fn test_unknown_and_unassigned_reports_are_ignored() {
        let l = ledger(1, 2);
        let before = l.snapshot();
        assert_eq!(l.report_done(TaskKind::Map, 9), Completion::Unknown);
        assert_eq!(l.report_done(TaskKind::Reduce, 1), Completion::Unknown);
        assert_eq!(l.snapshot(), before);
    }

    #[test]
    fn test_timeout_reassigns_to_other_worker() {
        let l = ledger(1, 1);
        let t0 = Instant::now();
        let first = l.assign_map_at("w1", t0).unwrap();
        assert_eq!(
            l.assign_map_at("w2", t0 + Duration::from_secs(9)),
            Err(LedgerError::NoMapTasksAvailable)
        );
        let second = l.assign_map_at("w2", t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.worker_id, "w2");
        assert_eq!(second.attempt, 2);
    }

    #[test]
    fn test_straggler_is_counted_once() {
        let l = ledger(1, 1);
        let t0 = Instant::now();
        let m = l.assign_map_at("w1", t0).unwrap();
        l.assign_map_at("w2", t0 + Duration::from_secs(11)).unwrap();
        // w1 finishes late, then w2 finishes too
        assert_eq!(l.report_done(TaskKind::Map, m.id), Completion::Accepted);
        assert_eq!(l.report_done(TaskKind::Map, m.id), Completion::Duplicate);

        let r = l.assign_reduce_at("w1", t0).unwrap();
        assert_eq!(
            l.assign_reduce_at("w2", t0 + Duration::from_secs(20)).unwrap().id,
            r.id
        );
        assert_eq!(l.report_done(TaskKind::Reduce, r.id), Completion::Accepted);
        assert_eq!(l.report_done(TaskKind::Reduce, r.id), Completion::Duplicate);
        assert!(l.is_job_done());
        assert_eq!(l.snapshot().reduce.completed, 1);
    }

    #[test]
    fn test_late_completion_of_reclaimed_task() {
        let l = ledger(1, 1);
        let t0 = Instant::now();
        let m = l.assign_map_at("w1", t0).unwrap();
        assert_eq!(l.reclaim_stale_at(t0 + Duration::from_secs(30)), 1);
        assert_eq!(l.snapshot().map.idle, 1);
        assert_eq!(l.report_done(TaskKind::Map, m.id), Completion::Accepted);
        assert!(l.map_phase_done());
    }

    #[test]
    fn test_reclaim_leaves_fresh_tasks() {
        let l = Ledger::new(
            files(2),
            1,
            LedgerConfig {
                task_timeout: Duration::from_millis(500),
            },
        );
        let t0 = Instant::now();
        l.assign_map_at("w1", t0).unwrap();
        l.assign_map_at("w2", t0 + Duration::from_millis(400)).unwrap();
        assert_eq!(l.reclaim_stale_at(t0 + Duration::from_millis(600)), 1);
        let stats = l.snapshot();
        assert_eq!((stats.map.idle, stats.map.in_progress), (1, 1));
    }

    #[test]
    fn test_report_failed_only_from_holder() {
        let l = ledger(1, 1);
        let t = l.assign_map("w1").unwrap();
        assert!(!l.report_failed(TaskKind::Map, t.id, "w2", t.attempt));
        assert!(l.report_failed(TaskKind::Map, t.id, "w1", t.attempt));
        assert!(!l.report_failed(TaskKind::Map, t.id, "w1", t.attempt));
        let again = l.assign_map("w2").unwrap();
        assert_eq!(again.id, t.id);
        assert_eq!(again.attempt, 2);
    }

    #[test]
    fn test_failure_of_earlier_attempt_keeps_current_one() {
        let l = ledger(1, 1);
        let t0 = Instant::now();
        let first = l.assign_map_at("w1", t0).unwrap();
        // the same worker picks its own timed-out task up again
        let second = l.assign_map_at("w1", t0 + Duration::from_secs(10)).unwrap();
        assert_eq!((first.id, second.attempt), (second.id, 2));

        assert!(!l.report_failed(TaskKind::Map, first.id, "w1", first.attempt));
        assert_eq!(l.snapshot().map.in_progress, 1);
        assert_eq!(
            l.assign_map_at("w2", t0 + Duration::from_secs(11)),
            Err(LedgerError::NoMapTasksAvailable)
        );

        assert!(l.report_failed(TaskKind::Map, second.id, "w1", second.attempt));
        assert_eq!(l.snapshot().map.idle, 1);
    }

    #[test]
    fn test_empty_jobs_are_done() {
        for l in [ledger(0, 3), ledger(2, 0)] {
            assert!(l.is_job_done());
            assert!(l.map_phase_done());
            assert_eq!(l.assign_map("w"), Err(LedgerError::NoMapTasksAvailable));
            assert_eq!(l.assign_reduce("w"), Err(LedgerError::NoReduceTasksAvailable));
            assert_eq!(l.n_map() + l.n_reduce(), 0);
        }
    }

    #[test]
    fn test_barrier_under_random_interleavings() {
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let l = Ledger::new(
                files(rng.gen_range(1..6)),
                rng.gen_range(1..4),
                LedgerConfig {
                    task_timeout: Duration::from_secs(5),
                },
            );
            let t0 = Instant::now();
            let mut clock = Duration::ZERO;
            let mut held: Vec<(TaskKind, TaskId, String, u32)> = Vec::new();

            for _ in 0..400 {
                clock += Duration::from_millis(rng.gen_range(0..2000));
                let now = t0 + clock;
                let worker = format!("w{}", rng.gen_range(0..4));
                match rng.gen_range(0..6) {
                    0 => {
                        if let Ok(t) = l.assign_map_at(&worker, now) {
                            held.push((t.kind, t.id, worker, t.attempt));
                        }
                    }
                    1 => {
                        if let Ok(t) = l.assign_reduce_at(&worker, now) {
                            let stats = l.snapshot();
                            assert_eq!(stats.map.completed as u64, l.n_map(), "seed {seed}");
                            held.push((t.kind, t.id, worker, t.attempt));
                        }
                    }
                    2 | 3 if !held.is_empty() => {
                        let (kind, id, _, _) = held.swap_remove(rng.gen_range(0..held.len()));
                        l.report_done(kind, id);
                    }
                    4 if !held.is_empty() => {
                        let (kind, id, w, attempt) = held[rng.gen_range(0..held.len())].clone();
                        l.report_failed(kind, id, &w, attempt);
                    }
                    _ => {
                        l.reclaim_stale_at(now);
                    }
                }

                let stats = l.snapshot();
                if l.is_job_done() {
                    assert_eq!(stats.reduce.completed as u64, l.n_reduce(), "seed {seed}");
                    assert_eq!(stats.map.completed as u64, l.n_map(), "seed {seed}");
                }
                if stats.reduce.in_progress + stats.reduce.completed > 0 {
                    assert!(l.map_phase_done(), "seed {seed}");
                }
            }
        }
    }

    #[test]
    fn test_concurrent_assignment_hands_out_each_task_once() {
        use std::{collections::HashSet, sync::Arc, thread};

        let l = Arc::new(ledger(64, 1));
        let handles = (0..8)
            .map(|w| {
                let l = Arc::clone(&l);
                thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Ok(t) = l.assign_map(&format!("w{w}")) {
                        got.push(t.id);
                    }
                    got
                })
            })
            .collect::<Vec<_>>();
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 64);
    }
}
