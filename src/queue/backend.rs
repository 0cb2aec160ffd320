//! Storage contract for the task queue.
//!
//! A backend owns the four state-partitioned stores (ready, processing,
//! completed, failed) and guarantees that every task lives in exactly one
//! of them at any instant. Policy (retries, dependency gating, worker
//! scheduling) lives in the [`TaskQueue`](super::TaskQueue) facade.

use super::{QueueDepths, QueuedTask, TaskPriority, TimingSummary};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Insert a task into the ready store. The task's priority and
    /// `queued_at`/`retry_after` determine its dequeue order.
    async fn push(&self, task: QueuedTask) -> Result<()>;

    /// Move the next eligible ready task (optionally restricted to one
    /// priority) into the processing store with the given visibility
    /// deadline. Tasks whose `retry_after` lies in the future are skipped.
    async fn pop(
        &self,
        priority: Option<TaskPriority>,
        visibility_deadline: DateTime<Utc>,
    ) -> Result<Option<QueuedTask>>;

    /// First `n` eligible ready tasks across priorities, without moving them.
    async fn peek(&self, n: usize) -> Result<Vec<QueuedTask>>;

    /// Remove and return a task from the processing store.
    async fn take_processing(&self, id: &str) -> Result<Option<QueuedTask>>;

    /// Remove and return a task from the failed store.
    async fn take_failed(&self, id: &str) -> Result<Option<QueuedTask>>;

    async fn store_completed(&self, task: QueuedTask) -> Result<()>;

    async fn store_failed(&self, task: QueuedTask) -> Result<()>;

    /// Remove a task from whichever store currently holds it.
    async fn remove(&self, id: &str) -> Result<bool>;

    /// Look a task up in any store.
    async fn get(&self, id: &str) -> Result<Option<QueuedTask>>;

    async fn depths(&self) -> Result<QueueDepths>;

    /// Return every processing task whose visibility deadline has passed to
    /// the ready store, attempts unchanged. Idempotent; returns the
    /// recovered tasks.
    async fn recover_expired(&self, now: DateTime<Utc>) -> Result<Vec<QueuedTask>>;

    async fn record_wait_ms(&self, ms: i64) -> Result<()>;

    async fn record_processing_ms(&self, ms: i64) -> Result<()>;

    /// Averages over the retained (last 100) timing samples.
    async fn timing_summary(&self) -> Result<TimingSummary>;
}
