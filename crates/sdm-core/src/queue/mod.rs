//! Durable priority queue and scheduler.
//!
//! The queue exclusively owns tasks. A dedicated scheduler task ages
//! priorities, promotes due retries, and dispatches runnable work under the
//! global and per-host concurrency governors; executors run behind
//! `spawn_blocking` and report back through the progress observer and their
//! terminal outcome. Every transition is emitted on the event bus and
//! mirrored to the persistence layer when enabled.

mod handler;
mod history;
mod task;

pub use handler::{DownloadHandler, HandlerRegistry, HttpDownloadHandler};
pub use history::HistoryLedger;
pub use task::{QueueTask, TaskState, MAX_PRIORITY};

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::config::SdmConfig;
use crate::control::TaskControl;
use crate::downloader::{
    Coordinator, DownloadInfo, DownloadMode, ProgressObserver, TaskProgress,
};
use crate::events::{
    validate_snapshot, EventBus, ProgressThrottle, QueueStatusSnapshot, TaskSnapshot, Topic,
};
use crate::limiter::{LimiterChain, TokenBucket};
use crate::persistence;
use crate::retry::{DownloadError, ErrorKind, RetryDecision, RetryPolicy};

/// Scheduler tick. Enqueue, completion, and control operations also wake the
/// loop immediately.
const SCHEDULER_TICK: Duration = Duration::from_millis(100);

/// A task stuck in STARTING this long is considered downloading (the first
/// byte simply has not surfaced through a progress report yet).
const STARTING_TIMEOUT: Duration = Duration::from_secs(1);

/// Minimum spacing between coalesced persistence writes.
const PERSIST_COALESCE: Duration = Duration::from_millis(250);

#[derive(Default)]
struct TaskTable {
    tasks: HashMap<String, QueueTask>,
    next_seq: u64,
}

struct QueueInner {
    cfg: SdmConfig,
    retry_policy: RetryPolicy,
    handlers: HandlerRegistry,
    bus: Arc<EventBus>,
    tasks: Mutex<TaskTable>,
    control: TaskControl,
    history: Mutex<HistoryLedger>,
    throttle: ProgressThrottle,
    dirty: AtomicBool,
    last_save: Mutex<Instant>,
    running: AtomicBool,
    wake: Notify,
}

/// Handle to the download queue. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<QueueInner>,
}

impl QueueManager {
    /// Queue with the default HTTP handler wired to a coordinator built from
    /// `cfg`. Loads persisted state when persistence is enabled.
    pub fn new(cfg: SdmConfig, bus: Arc<EventBus>) -> Result<Self, DownloadError> {
        let global = (cfg.enable_bandwidth_limiting && cfg.global_bandwidth_limit_bps > 0)
            .then(|| Arc::new(TokenBucket::new(cfg.global_bandwidth_limit_bps)));
        let per_task_bps = if cfg.enable_bandwidth_limiting {
            cfg.per_task_bandwidth_limit_bps
        } else {
            0
        };
        let limiters = LimiterChain::with_global(global, per_task_bps);
        let coordinator = Coordinator::new(cfg.coordinator_config(), limiters);
        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(HttpDownloadHandler::new(coordinator)));
        Self::with_handlers(cfg, bus, handlers)
    }

    /// Queue with a caller-supplied handler registry (protocol executors
    /// beyond HTTP plug in here).
    pub fn with_handlers(
        cfg: SdmConfig,
        bus: Arc<EventBus>,
        handlers: HandlerRegistry,
    ) -> Result<Self, DownloadError> {
        cfg.validate()?;

        let mut history = if cfg.persist_queue {
            HistoryLedger::with_path(cfg.history_path.clone())
        } else {
            HistoryLedger::new()
        };
        let mut table = TaskTable::default();
        if cfg.persist_queue && cfg.queue_state_path.exists() {
            let loaded = persistence::load(&cfg.queue_state_path).map_err(|e| {
                DownloadError::new(ErrorKind::Validation, format!("load queue state: {e:#}"))
            })?;
            for t in loaded.terminal {
                history.restore(t.snapshot());
            }
            for t in loaded.active {
                table.next_seq = table.next_seq.max(t.seq + 1);
                table.tasks.insert(t.task_id.clone(), t);
            }
        }

        let throttle = ProgressThrottle::new(cfg.progress_throttle());
        let retry_policy = cfg.retry_policy();
        Ok(Self {
            inner: Arc::new(QueueInner {
                cfg,
                retry_policy,
                handlers,
                bus,
                tasks: Mutex::new(table),
                control: TaskControl::new(),
                history: Mutex::new(history),
                throttle,
                dirty: AtomicBool::new(false),
                last_save: Mutex::new(Instant::now()),
                running: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        })
    }

    pub fn config(&self) -> &SdmConfig {
        &self.inner.cfg
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    /// Add a task. Returns `Ok(false)` for a duplicate id.
    pub fn enqueue(
        &self,
        task_id: &str,
        url: &str,
        destination: &str,
        priority: u8,
        type_options: BTreeMap<String, serde_json::Value>,
    ) -> Result<bool, DownloadError> {
        if !(1..=MAX_PRIORITY).contains(&priority) {
            return Err(DownloadError::new(
                ErrorKind::Validation,
                format!("priority {priority} outside 1-{MAX_PRIORITY}"),
            ));
        }
        let snap = {
            let mut table = self.inner.tasks.lock().unwrap();
            if table.tasks.contains_key(task_id) {
                tracing::warn!("TASK {task_id} | DUPLICATE ENQUEUE REJECTED");
                return Ok(false);
            }
            let seq = table.next_seq;
            table.next_seq += 1;
            let task = QueueTask::new(
                task_id,
                url,
                destination,
                priority,
                self.inner.cfg.retry_max_attempts,
                seq,
                type_options,
            );
            tracing::info!(
                "TASK {task_id} | CREATED | priority={priority} | host={} | queue_size={}",
                task.host.as_deref().unwrap_or("-"),
                table.tasks.len() + 1
            );
            let snap = task.snapshot();
            table.tasks.insert(task_id.to_string(), task);
            snap
        };
        self.emit_task(Topic::TaskAdded, &snap);
        self.persist_now();
        self.inner.wake.notify_one();
        Ok(true)
    }

    /// Pause a task. Running work is cancelled cooperatively; multi-mode
    /// partials and the resume record stay on disk for a later resume.
    pub fn pause(&self, task_id: &str) -> bool {
        let snap = {
            let mut table = self.inner.tasks.lock().unwrap();
            let Some(t) = table.tasks.get_mut(task_id) else {
                return false;
            };
            if !matches!(
                t.state,
                TaskState::Pending
                    | TaskState::Starting
                    | TaskState::Downloading
                    | TaskState::RetryWait
            ) {
                return false;
            }
            if matches!(t.state, TaskState::Starting | TaskState::Downloading) {
                self.inner.control.request_cancel(task_id);
            }
            if !t.transition_to(TaskState::Paused) {
                return false;
            }
            t.next_eligible_at = None;
            t.snapshot()
        };
        self.emit_task(Topic::TaskUpdated, &snap);
        self.persist_now();
        true
    }

    /// Return a paused task to the runnable set.
    pub fn resume(&self, task_id: &str) -> bool {
        let snap = {
            let mut table = self.inner.tasks.lock().unwrap();
            let Some(t) = table.tasks.get_mut(task_id) else {
                return false;
            };
            if t.state != TaskState::Paused || !t.transition_to(TaskState::Pending) {
                return false;
            }
            t.snapshot()
        };
        self.emit_task(Topic::TaskUpdated, &snap);
        self.persist_now();
        self.inner.wake.notify_one();
        true
    }

    /// Cancel a task from any non-terminal state. Immediate: the task is
    /// terminal as soon as this returns; the worker, if any, stops
    /// cooperatively.
    pub fn cancel(&self, task_id: &str) -> bool {
        let snap = {
            let mut table = self.inner.tasks.lock().unwrap();
            let Some(t) = table.tasks.get_mut(task_id) else {
                return false;
            };
            if t.state.is_terminal() {
                return false;
            }
            if matches!(t.state, TaskState::Starting | TaskState::Downloading) {
                self.inner.control.request_cancel(task_id);
            }
            if !t.transition_to(TaskState::Cancelled) {
                return false;
            }
            t.snapshot()
        };
        self.emit_task(Topic::TaskUpdated, &snap);
        self.inner.history.lock().unwrap().record(snap);
        self.emit_queue_status();
        self.persist_now();
        true
    }

    pub fn pause_all(&self) -> usize {
        let ids: Vec<String> = {
            let table = self.inner.tasks.lock().unwrap();
            table
                .tasks
                .values()
                .filter(|t| {
                    matches!(
                        t.state,
                        TaskState::Pending
                            | TaskState::Starting
                            | TaskState::Downloading
                            | TaskState::RetryWait
                    )
                })
                .map(|t| t.task_id.clone())
                .collect()
        };
        ids.iter().filter(|id| self.pause(id)).count()
    }

    pub fn resume_all(&self) -> usize {
        let ids: Vec<String> = {
            let table = self.inner.tasks.lock().unwrap();
            table
                .tasks
                .values()
                .filter(|t| t.state == TaskState::Paused)
                .map(|t| t.task_id.clone())
                .collect()
        };
        ids.iter().filter(|id| self.resume(id)).count()
    }

    pub fn task_state(&self, task_id: &str) -> Option<TaskState> {
        self.inner
            .tasks
            .lock()
            .unwrap()
            .tasks
            .get(task_id)
            .map(|t| t.state)
    }

    pub fn task_snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.inner
            .tasks
            .lock()
            .unwrap()
            .tasks
            .get(task_id)
            .map(QueueTask::snapshot)
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.inner
            .tasks
            .lock()
            .unwrap()
            .tasks
            .values()
            .map(QueueTask::snapshot)
            .collect()
    }

    pub fn history(&self) -> Vec<TaskSnapshot> {
        self.inner.history.lock().unwrap().entries().to_vec()
    }

    pub fn status(&self) -> QueueStatusSnapshot {
        let table = self.inner.tasks.lock().unwrap();
        let mut state_counts: BTreeMap<String, usize> = BTreeMap::new();
        for state in [
            TaskState::Pending,
            TaskState::Starting,
            TaskState::Downloading,
            TaskState::Paused,
            TaskState::RetryWait,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
        ] {
            state_counts.insert(state.as_str().to_string(), 0);
        }
        for t in table.tasks.values() {
            *state_counts.entry(t.state.as_str().to_string()).or_insert(0) += 1;
        }
        let active_count = table
            .tasks
            .values()
            .filter(|t| matches!(t.state, TaskState::Starting | TaskState::Downloading))
            .count();
        QueueStatusSnapshot {
            total_tasks: table.tasks.len(),
            state_counts,
            active_count,
            max_active: self.inner.cfg.max_active_downloads,
            scheduler_running: self.inner.running.load(Ordering::Relaxed),
        }
    }

    /// Start the scheduler loop on the current runtime.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        self.inner.running.store(true, Ordering::Relaxed);
        tracing::info!(
            "SCHEDULER | STARTED | max_active={}",
            self.inner.cfg.max_active_downloads
        );
        let qm = self.clone();
        tokio::spawn(async move { qm.run().await })
    }

    /// Stop the scheduler loop. Running downloads finish (or get paused or
    /// cancelled explicitly); queue state is flushed on the way out.
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::Relaxed);
        self.inner.wake.notify_one();
    }

    async fn run(&self) {
        while self.inner.running.load(Ordering::Relaxed) {
            self.step();
            self.persist_if_due();
            tokio::select! {
                _ = self.inner.wake.notified() => {}
                _ = tokio::time::sleep(SCHEDULER_TICK) => {}
            }
        }
        self.persist_now();
    }

    /// Wait until no task is pending, starting, downloading, or waiting on a
    /// retry timer.
    pub async fn wait_until_idle(&self) {
        loop {
            let busy = {
                let table = self.inner.tasks.lock().unwrap();
                table.tasks.values().any(|t| {
                    matches!(
                        t.state,
                        TaskState::Pending
                            | TaskState::Starting
                            | TaskState::Downloading
                            | TaskState::RetryWait
                    )
                })
            };
            if !busy {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// One scheduling pass: age priorities, promote due retries, advance the
    /// STARTING watchdog, select and dispatch under both governors.
    fn step(&self) {
        let now = Utc::now();
        let mut emits: Vec<TaskSnapshot> = Vec::new();
        let mut dispatches: Vec<QueueTask> = Vec::new();
        {
            let mut table = self.inner.tasks.lock().unwrap();

            if self.inner.cfg.priority_aging_enabled {
                age_priorities(&mut table.tasks, &self.inner.cfg, now);
            }

            for t in table.tasks.values_mut() {
                match t.state {
                    TaskState::RetryWait => {
                        let due = t.next_eligible_at.map_or(true, |at| at <= now);
                        if due && t.transition_to(TaskState::Pending) {
                            t.next_eligible_at = None;
                            emits.push(t.snapshot());
                            self.inner.dirty.store(true, Ordering::Relaxed);
                        }
                    }
                    TaskState::Starting => {
                        let waited = (now - t.updated_at)
                            .to_std()
                            .unwrap_or(Duration::ZERO);
                        if waited >= STARTING_TIMEOUT && t.transition_to(TaskState::Downloading) {
                            emits.push(t.snapshot());
                        }
                    }
                    _ => {}
                }
            }

            let mut active = table
                .tasks
                .values()
                .filter(|t| matches!(t.state, TaskState::Starting | TaskState::Downloading))
                .count();
            if active < self.inner.cfg.max_active_downloads {
                let mut host_counts: HashMap<String, usize> = HashMap::new();
                for t in table.tasks.values() {
                    if matches!(t.state, TaskState::Starting | TaskState::Downloading) {
                        if let Some(h) = &t.host {
                            *host_counts.entry(h.clone()).or_insert(0) += 1;
                        }
                    }
                }
                for id in candidate_order(&table.tasks) {
                    if active >= self.inner.cfg.max_active_downloads {
                        break;
                    }
                    let t = table.tasks.get_mut(&id).expect("candidate exists");
                    if self.inner.cfg.per_host_enabled {
                        if let Some(h) = &t.host {
                            if host_counts.get(h).copied().unwrap_or(0)
                                >= self.inner.cfg.per_host_max_active
                            {
                                continue;
                            }
                        }
                    }
                    if !t.transition_to(TaskState::Starting) {
                        continue;
                    }
                    t.attempt += 1;
                    tracing::info!(
                        "TASK {} | STARTED | attempt={}/{} | active={}",
                        t.task_id,
                        t.attempt,
                        t.max_attempts,
                        active + 1
                    );
                    emits.push(t.snapshot());
                    dispatches.push(t.clone());
                    if let Some(h) = &t.host {
                        *host_counts.entry(h.clone()).or_insert(0) += 1;
                    }
                    active += 1;
                    self.inner.dirty.store(true, Ordering::Relaxed);
                }
            }
        }
        for snap in &emits {
            self.emit_task(Topic::TaskUpdated, snap);
        }
        for task in dispatches {
            self.dispatch(task);
        }
    }

    fn dispatch(&self, task: QueueTask) {
        let token = self.inner.control.register(&task.task_id);
        let handler = self.inner.handlers.find(&task.url);
        let qm = self.clone();
        tokio::spawn(async move {
            let task_id = task.task_id.clone();
            let attempt = task.attempt;
            let info = match handler {
                Some(handler) => {
                    let observer = QueueProgressSink {
                        queue: qm.clone(),
                        task_id: task_id.clone(),
                        attempt,
                    };
                    let worker_token = token.clone();
                    match tokio::task::spawn_blocking(move || {
                        handler.execute(&task, &observer, &worker_token)
                    })
                    .await
                    {
                        Ok(info) => info,
                        Err(_) => executor_failure(
                            ErrorKind::ContractViolation,
                            "download executor panicked",
                        ),
                    }
                }
                None => executor_failure(ErrorKind::Unsupported, "no handler claims this URL"),
            };
            qm.complete(&task_id, attempt, info);
            qm.inner.control.unregister(&task_id);
            qm.inner.throttle.forget(&task_id);
            qm.inner.wake.notify_one();
        });
    }

    /// Fold a terminal executor outcome into the task, choosing RETRY_WAIT or
    /// FAILED for failures. The terminal `TASK_UPDATED` event always precedes
    /// the history ledger entry.
    fn complete(&self, task_id: &str, attempt: u32, info: DownloadInfo) {
        let mut terminal = false;
        let snap = {
            let mut table = self.inner.tasks.lock().unwrap();
            let Some(t) = table.tasks.get_mut(task_id) else {
                return;
            };
            // Pause and cancel were already applied directly, and a resumed
            // task may have been re-dispatched; only the current attempt of a
            // task still in flight can take a worker outcome.
            if t.attempt != attempt
                || !matches!(t.state, TaskState::Starting | TaskState::Downloading)
            {
                return;
            }
            match &info.error {
                None => {
                    if t.state == TaskState::Starting {
                        t.transition_to(TaskState::Downloading);
                    }
                    t.bytes_total = info.total_size;
                    t.bytes_downloaded = info.total_size;
                    t.throughput_bps = 0.0;
                    t.last_error = None;
                    t.resume_state_path = None;
                    t.transition_to(TaskState::Completed);
                    if t.attempt > 1 {
                        tracing::info!("RETRY | RESET | task_id={task_id} | reason=success");
                    }
                    terminal = true;
                }
                Some(e) if e.is_cancelled() => {
                    t.transition_to(TaskState::Cancelled);
                    terminal = true;
                }
                Some(e) => {
                    t.last_error = Some(e.to_string());
                    if t.state == TaskState::Starting {
                        t.transition_to(TaskState::Downloading);
                    }
                    // A multi-mode failure leaves a resume record next to the
                    // destination; remember it so resume tooling can find it.
                    let record = crate::storage::resume_path(std::path::Path::new(&t.destination));
                    t.resume_state_path = record
                        .exists()
                        .then(|| record.to_string_lossy().into_owned());
                    let decision = if self.inner.cfg.retry_enabled {
                        let policy = RetryPolicy {
                            max_attempts: t.max_attempts,
                            ..self.inner.retry_policy
                        };
                        policy.decide(t.attempt, e)
                    } else {
                        RetryDecision::NoRetry
                    };
                    match decision {
                        RetryDecision::RetryAfter(delay) => {
                            let wait = chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::seconds(3600));
                            t.next_eligible_at = Some(Utc::now() + wait);
                            t.transition_to(TaskState::RetryWait);
                            tracing::info!(
                                "RETRY | SCHEDULED | task_id={task_id} | attempt={}/{} | in={:.1}s",
                                t.attempt,
                                t.max_attempts,
                                delay.as_secs_f64()
                            );
                        }
                        RetryDecision::NoRetry => {
                            t.transition_to(TaskState::Failed);
                            if self.inner.cfg.retry_enabled
                                && e.is_retryable()
                                && t.attempt >= t.max_attempts
                            {
                                tracing::info!(
                                    "RETRY | EXHAUSTED | task_id={task_id} | attempts={}",
                                    t.attempt
                                );
                            } else {
                                tracing::info!(
                                    "RETRY | NOT_RETRYABLE | task_id={task_id} | error={e}"
                                );
                            }
                            terminal = true;
                        }
                    }
                }
            }
            t.snapshot()
        };
        self.emit_task(Topic::TaskUpdated, &snap);
        if terminal {
            self.inner.history.lock().unwrap().record(snap);
            self.emit_queue_status();
            self.persist_now();
        } else {
            self.inner.dirty.store(true, Ordering::Relaxed);
        }
    }

    fn emit_task(&self, topic: Topic, snap: &TaskSnapshot) {
        let value = snap.to_value();
        match validate_snapshot(&value) {
            Ok(()) => self.inner.bus.emit(topic, &value),
            Err(e) => tracing::error!("snapshot rejected before emission: {e}"),
        }
    }

    fn emit_queue_status(&self) {
        let value = self.status().to_value();
        self.inner.bus.emit(Topic::QueueStatus, &value);
    }

    fn persist_now(&self) {
        if !self.inner.cfg.persist_queue {
            return;
        }
        let tasks: Vec<QueueTask> = {
            let table = self.inner.tasks.lock().unwrap();
            table.tasks.values().cloned().collect()
        };
        match persistence::save(&self.inner.cfg.queue_state_path, &tasks) {
            Ok(()) => {
                self.inner.dirty.store(false, Ordering::Relaxed);
                *self.inner.last_save.lock().unwrap() = Instant::now();
            }
            Err(e) => tracing::error!("QUEUEPERSIST | SAVE_FAIL | error={e:#}"),
        }
    }

    /// Flush coalesced saves from the scheduler tick.
    fn persist_if_due(&self) {
        if !self.inner.cfg.persist_queue || !self.inner.dirty.load(Ordering::Relaxed) {
            return;
        }
        let due = self.inner.last_save.lock().unwrap().elapsed() >= PERSIST_COALESCE;
        if due {
            self.persist_now();
        }
    }
}

/// Absolute aging: effective priority grows by one step per full interval a
/// task has sat PENDING, capped at the maximum. Idempotent per pass.
fn age_priorities(
    tasks: &mut HashMap<String, QueueTask>,
    cfg: &SdmConfig,
    now: DateTime<Utc>,
) {
    for t in tasks.values_mut() {
        if t.state != TaskState::Pending {
            continue;
        }
        let age_s = (now - t.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        let intervals = (age_s / cfg.priority_aging_interval_s) as u32;
        if intervals == 0 {
            continue;
        }
        let boost = intervals.saturating_mul(u32::from(cfg.priority_aging_step));
        t.effective_priority =
            (u32::from(t.priority) + boost).min(u32::from(MAX_PRIORITY)) as u8;
    }
}

/// Pending tasks ordered by effective priority (descending), then creation
/// time, then enqueue sequence. Deterministic for fixed inputs.
fn candidate_order(tasks: &HashMap<String, QueueTask>) -> Vec<String> {
    let mut pending: Vec<&QueueTask> = tasks
        .values()
        .filter(|t| t.state == TaskState::Pending)
        .collect();
    pending.sort_by_key(|t| (Reverse(t.effective_priority), t.created_at, t.seq));
    pending.iter().map(|t| t.task_id.clone()).collect()
}

fn executor_failure(kind: ErrorKind, message: &str) -> DownloadInfo {
    DownloadInfo {
        mode: DownloadMode::Single,
        connections_used: 0,
        total_size: 0,
        error: Some(DownloadError::new(kind, message)),
        sha256: None,
    }
}

/// Routes coordinator byte counts into the owning task and emits throttled
/// progress events; the first report moves STARTING to DOWNLOADING.
struct QueueProgressSink {
    queue: QueueManager,
    task_id: String,
    attempt: u32,
}

impl ProgressObserver for QueueProgressSink {
    fn on_progress(&self, progress: &TaskProgress) {
        let mut transitioned = false;
        let snap = {
            let mut table = self.queue.inner.tasks.lock().unwrap();
            let Some(t) = table.tasks.get_mut(&self.task_id) else {
                return;
            };
            if t.attempt != self.attempt {
                return;
            }
            match t.state {
                TaskState::Starting => {
                    transitioned = t.transition_to(TaskState::Downloading);
                }
                TaskState::Downloading => {}
                // Paused, cancelled, or already terminal: stale report.
                _ => return,
            }
            t.bytes_downloaded = progress.bytes_downloaded;
            t.bytes_total = progress.bytes_total;
            t.throughput_bps = progress.throughput_bps;
            t.updated_at = Utc::now();
            t.snapshot()
        };
        // Transitions are never coalesced; plain progress is.
        if transitioned || self.queue.inner.throttle.should_emit(&self.task_id) {
            self.queue.emit_task(Topic::TaskUpdated, &snap);
        }
        self.queue.inner.dirty.store(true, Ordering::Relaxed);
    }
}
