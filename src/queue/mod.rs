//! Distributed task queue: priority ordering, dependency gating, visibility
//! timeouts, retry with exponential backoff and a bounded worker pool.

pub mod backend;
pub mod memory;
pub mod redis;

pub use backend::QueueBackend;
pub use memory::MemoryBackend;
pub use redis::RedisBackend;

use crate::utils::now_ms;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SCHEDULER_TICK: Duration = Duration::from_millis(100);

/// Priority levels, highest first. Inside a level, dequeue is FIFO by
/// `queued_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Urgent,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::Urgent,
        TaskPriority::High,
        TaskPriority::Medium,
        TaskPriority::Low,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Urgent => "urgent",
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            TaskPriority::Urgent => 0,
            TaskPriority::High => 1,
            TaskPriority::Medium => 2,
            TaskPriority::Low => 3,
        }
    }

    /// Constant score offset that keeps higher priorities ahead of lower
    /// ones in the KV backend's sorted sets.
    pub fn base_score(self) -> i64 {
        self.index() as i64 * 1_000_000_000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: String,
    pub priority: TaskPriority,
    pub payload: Value,
    pub status: TaskStatus,
    pub attempts: u32,
    #[serde(rename = "queuedAt")]
    pub queued_at: DateTime<Utc>,
    #[serde(rename = "startedAt", skip_serializing_if = "Option::is_none", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "completedAt", skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastError", skip_serializing_if = "Option::is_none", default)]
    pub last_error: Option<String>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none", default)]
    pub retry_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(
        rename = "visibilityDeadline",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub visibility_deadline: Option<DateTime<Utc>>,
}

impl QueuedTask {
    pub fn new(priority: TaskPriority, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            priority,
            payload,
            status: TaskStatus::Pending,
            attempts: 0,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
            retry_after: None,
            dependencies: Vec::new(),
            metadata: HashMap::new(),
            visibility_deadline: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Epoch millis at which the task becomes eligible for dequeue: its
    /// enqueue time, pushed out by any retry delay.
    pub fn eligible_at_ms(&self) -> i64 {
        let queued = self.queued_at.timestamp_millis();
        match self.retry_after {
            Some(after) => queued.max(after.timestamp_millis()),
            None => queued,
        }
    }

    /// Sorted-set score for the KV backend: priority base + eligibility.
    pub fn score(&self) -> i64 {
        self.priority.base_score() + self.eligible_at_ms()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDepths {
    pub per_priority: [usize; 4],
    pub retrying: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueDepths {
    pub fn pending(&self) -> usize {
        self.per_priority.iter().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingSummary {
    pub avg_wait_ms: f64,
    pub avg_processing_ms: f64,
}

/// Point-in-time statistics for operators.
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub per_priority: HashMap<&'static str, usize>,
    pub avg_wait_ms: f64,
    pub avg_processing_ms: f64,
    /// Completed tasks per minute of queue uptime.
    pub throughput_per_min: f64,
}

/// Executes a dequeued task's payload. The composition root wires this to
/// the dispatcher so queued work re-enters the same invocation path as
/// direct tool calls.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &QueuedTask) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrency: usize,
    pub visibility_timeout: Duration,
    /// Additional attempts after the first failure; 0 makes the first
    /// failure terminal.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            visibility_timeout: Duration::from_secs(300),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

pub struct TaskQueue {
    backend: Arc<dyn QueueBackend>,
    config: QueueConfig,
    live_workers: AtomicUsize,
    worker_returned: Notify,
    running: AtomicBool,
    started_at: Instant,
}

impl TaskQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, config: QueueConfig) -> Self {
        Self {
            backend,
            config,
            live_workers: AtomicUsize::new(0),
            worker_returned: Notify::new(),
            running: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Enqueue a task; returns its id.
    pub async fn enqueue(&self, task: QueuedTask) -> Result<String> {
        let id = task.id.clone();
        debug!(
            "queue: enqueue {} priority={} deps={}",
            id,
            task.priority.as_str(),
            task.dependencies.len()
        );
        self.backend.push(task).await?;
        Ok(id)
    }

    /// Take the next runnable task. Dependency gating happens here: a task
    /// popped with unsatisfied dependencies is held aside so lower-priority
    /// candidates can be examined, then re-enqueued at the tail of its
    /// priority level (attempts untouched).
    pub async fn dequeue(&self, priority: Option<TaskPriority>) -> Result<Option<QueuedTask>> {
        let mut blocked: Vec<QueuedTask> = Vec::new();
        let result = self.dequeue_runnable(priority, &mut blocked).await;
        for mut task in blocked {
            task.status = TaskStatus::Pending;
            task.queued_at = Utc::now();
            task.started_at = None;
            task.visibility_deadline = None;
            debug!(
                "queue: {} blocked on dependencies, re-enqueued at tail",
                task.id
            );
            if let Err(e) = self.backend.push(task).await {
                error!("queue: re-enqueue of dependency-blocked task failed: {}", e);
            }
        }
        result
    }

    async fn dequeue_runnable(
        &self,
        priority: Option<TaskPriority>,
        blocked: &mut Vec<QueuedTask>,
    ) -> Result<Option<QueuedTask>> {
        loop {
            let deadline = Utc::now()
                + ChronoDuration::milliseconds(self.config.visibility_timeout.as_millis() as i64);
            let Some(task) = self.backend.pop(priority, deadline).await? else {
                return Ok(None);
            };

            if self.dependencies_satisfied(&task).await? {
                self.backend
                    .record_wait_ms(now_ms() - task.queued_at.timestamp_millis())
                    .await?;
                return Ok(Some(task));
            }

            // Pull it back out of the processing store and park it locally.
            let held = self
                .backend
                .take_processing(&task.id)
                .await?
                .unwrap_or(task);
            blocked.push(held);
        }
    }

    async fn dependencies_satisfied(&self, task: &QueuedTask) -> Result<bool> {
        for dep in &task.dependencies {
            let done = self
                .backend
                .get(dep)
                .await?
                .is_some_and(|t| t.status == TaskStatus::Completed);
            if !done {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// First `n` ready tasks across priorities.
    pub async fn peek(&self, n: usize) -> Result<Vec<QueuedTask>> {
        self.backend.peek(n).await
    }

    /// Acknowledge successful completion.
    pub async fn ack(&self, id: &str) -> Result<()> {
        let Some(mut task) = self.backend.take_processing(id).await? else {
            warn!("queue: ack for unknown in-flight task {}", id);
            return Ok(());
        };
        let now = Utc::now();
        if let Some(started) = task.started_at {
            self.backend
                .record_processing_ms((now - started).num_milliseconds())
                .await?;
        }
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.visibility_deadline = None;
        debug!("queue: {} completed (attempts {})", id, task.attempts);
        self.backend.store_completed(task).await
    }

    /// Record a failure. Retries with exponential backoff until the retry
    /// budget is spent, then parks the task in the failed store.
    pub async fn fail(&self, id: &str, error: &str) -> Result<()> {
        let Some(mut task) = self.backend.take_processing(id).await? else {
            warn!("queue: fail for unknown in-flight task {}", id);
            return Ok(());
        };
        let now = Utc::now();
        if let Some(started) = task.started_at {
            self.backend
                .record_processing_ms((now - started).num_milliseconds())
                .await?;
        }
        task.last_error = Some(error.to_string());
        task.visibility_deadline = None;
        task.started_at = None;

        if task.attempts < self.config.max_retries {
            task.attempts += 1;
            let delay_ms =
                self.config.base_delay.as_millis() as i64 * (1i64 << (task.attempts - 1).min(32));
            task.retry_after = Some(now + ChronoDuration::milliseconds(delay_ms));
            task.status = TaskStatus::Pending;
            info!(
                "queue: {} failed (attempt {}/{}), retrying in {}ms: {}",
                id, task.attempts, self.config.max_retries, delay_ms, error
            );
            self.backend.push(task).await
        } else {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(now);
            warn!(
                "queue: {} failed terminally after {} attempt(s): {}",
                id,
                task.attempts + 1,
                error
            );
            self.backend.store_failed(task).await
        }
    }

    /// Manually reschedule a failed or stuck task after `delay`.
    pub async fn retry(&self, id: &str, delay: Duration) -> Result<bool> {
        let task = match self.backend.take_failed(id).await? {
            Some(task) => Some(task),
            None => self.backend.take_processing(id).await?,
        };
        let Some(mut task) = task else {
            return Ok(false);
        };
        task.status = TaskStatus::Pending;
        task.retry_after = Some(Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64));
        task.visibility_deadline = None;
        task.started_at = None;
        task.completed_at = None;
        self.backend.push(task).await?;
        Ok(true)
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.backend.remove(id).await
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<QueuedTask>> {
        self.backend.get(id).await
    }

    /// Return expired in-flight tasks to the ready store. Called by the
    /// scheduler every tick; safe to call at any time.
    pub async fn recover_expired(&self) -> Result<usize> {
        let recovered = self.backend.recover_expired(Utc::now()).await?;
        for task in &recovered {
            warn!(
                "queue: visibility timeout for {}, returned to ready (attempts {})",
                task.id, task.attempts
            );
        }
        Ok(recovered.len())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let depths = self.backend.depths().await?;
        let timing = self.backend.timing_summary().await?;
        let uptime_mins = self.started_at.elapsed().as_secs_f64() / 60.0;
        let per_priority = TaskPriority::ALL
            .iter()
            .map(|p| (p.as_str(), depths.per_priority[p.index()]))
            .collect();
        Ok(QueueStats {
            pending: depths.pending(),
            processing: depths.processing,
            completed: depths.completed,
            failed: depths.failed,
            retrying: depths.retrying,
            per_priority,
            avg_wait_ms: timing.avg_wait_ms,
            avg_processing_ms: timing.avg_processing_ms,
            throughput_per_min: if uptime_mins > 0.0 {
                depths.completed as f64 / uptime_mins
            } else {
                0.0
            },
        })
    }

    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::Relaxed)
    }

    /// Run the scheduler loop: a recovery sweep plus worker spawning every
    /// 100 ms, re-armed immediately whenever a worker returns.
    pub fn start(self: Arc<Self>, executor: Arc<dyn TaskExecutor>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let queue = self;
        tokio::spawn(async move {
            info!(
                "queue scheduler started (concurrency {})",
                queue.config.max_concurrency
            );
            while queue.running.load(Ordering::SeqCst) {
                if let Err(e) = queue.recover_expired().await {
                    error!("queue: recovery sweep failed: {}", e);
                }

                while queue.live_workers.load(Ordering::SeqCst) < queue.config.max_concurrency {
                    match queue.dequeue(None).await {
                        Ok(Some(task)) => {
                            Self::spawn_worker(queue.clone(), task, executor.clone());
                        }
                        Ok(None) => break,
                        Err(e) => {
                            error!("queue: dequeue failed: {}", e);
                            break;
                        }
                    }
                }

                tokio::select! {
                    () = queue.worker_returned.notified() => {}
                    () = tokio::time::sleep(SCHEDULER_TICK) => {}
                }
            }
            info!("queue scheduler stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.worker_returned.notify_one();
    }

    /// Run one task on a fresh worker. The worker calls `ack` or `fail`
    /// exactly once; panics inside the executor are isolated by the task
    /// boundary and converted to failures.
    fn spawn_worker(queue: Arc<Self>, task: QueuedTask, executor: Arc<dyn TaskExecutor>) {
        queue.live_workers.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let id = task.id.clone();
            let handle = tokio::spawn({
                let task = task.clone();
                async move { executor.execute(&task).await }
            });

            let outcome = match handle.await {
                Ok(Ok(_)) => queue.ack(&id).await,
                Ok(Err(e)) => queue.fail(&id, &e.to_string()).await,
                Err(join_err) if join_err.is_panic() => {
                    error!("queue: worker for {} panicked", id);
                    queue.fail(&id, "task executor panicked").await
                }
                Err(_) => queue.fail(&id, "task executor cancelled").await,
            };
            if let Err(e) = outcome {
                error!("queue: finalising {} failed: {}", id, e);
            }

            queue.live_workers.fetch_sub(1, Ordering::SeqCst);
            queue.worker_returned.notify_one();
        });
    }
}
