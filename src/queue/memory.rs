//! In-process queue backend: four eligibility-ordered lists keyed by
//! priority plus maps for the processing/completed/failed stores.

use super::backend::QueueBackend;
use super::{QueueDepths, QueuedTask, TaskPriority, TaskStatus, TimingSummary};
use crate::utils::now_ms;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const METRIC_SAMPLES: usize = 100;

#[derive(Default)]
struct MemoryState {
    /// Per-priority ready lists, sorted by eligibility time; ties keep
    /// insertion order, which makes same-time entries FIFO.
    ready: [Vec<QueuedTask>; 4],
    processing: HashMap<String, QueuedTask>,
    completed: HashMap<String, QueuedTask>,
    failed: HashMap<String, QueuedTask>,
    wait_ms: VecDeque<i64>,
    processing_ms: VecDeque<i64>,
}

impl MemoryState {
    fn insert_ready(&mut self, task: QueuedTask) {
        let list = &mut self.ready[task.priority.index()];
        let eligible = task.eligible_at_ms();
        let at = list.partition_point(|t| t.eligible_at_ms() <= eligible);
        list.insert(at, task);
    }

    fn pop_eligible(&mut self, priority: TaskPriority, now: i64) -> Option<QueuedTask> {
        let list = &mut self.ready[priority.index()];
        let at = list.iter().position(|t| t.eligible_at_ms() <= now)?;
        Some(list.remove(at))
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn push(&self, task: QueuedTask) -> Result<()> {
        self.lock().insert_ready(task);
        Ok(())
    }

    async fn pop(
        &self,
        priority: Option<TaskPriority>,
        visibility_deadline: DateTime<Utc>,
    ) -> Result<Option<QueuedTask>> {
        let now = now_ms();
        let mut state = self.lock();
        let candidates: &[TaskPriority] = match &priority {
            Some(p) => std::slice::from_ref(p),
            None => &TaskPriority::ALL,
        };
        for p in candidates {
            if let Some(mut task) = state.pop_eligible(*p, now) {
                task.status = TaskStatus::Processing;
                task.started_at = Some(Utc::now());
                task.visibility_deadline = Some(visibility_deadline);
                state.processing.insert(task.id.clone(), task.clone());
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    async fn peek(&self, n: usize) -> Result<Vec<QueuedTask>> {
        let now = now_ms();
        let state = self.lock();
        let mut out = Vec::with_capacity(n);
        for p in TaskPriority::ALL {
            for task in &state.ready[p.index()] {
                if out.len() == n {
                    return Ok(out);
                }
                if task.eligible_at_ms() <= now {
                    out.push(task.clone());
                }
            }
        }
        Ok(out)
    }

    async fn take_processing(&self, id: &str) -> Result<Option<QueuedTask>> {
        Ok(self.lock().processing.remove(id))
    }

    async fn take_failed(&self, id: &str) -> Result<Option<QueuedTask>> {
        Ok(self.lock().failed.remove(id))
    }

    async fn store_completed(&self, task: QueuedTask) -> Result<()> {
        self.lock().completed.insert(task.id.clone(), task);
        Ok(())
    }

    async fn store_failed(&self, task: QueuedTask) -> Result<()> {
        self.lock().failed.insert(task.id.clone(), task);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut state = self.lock();
        for list in &mut state.ready {
            if let Some(at) = list.iter().position(|t| t.id == id) {
                list.remove(at);
                return Ok(true);
            }
        }
        Ok(state.processing.remove(id).is_some()
            || state.completed.remove(id).is_some()
            || state.failed.remove(id).is_some())
    }

    async fn get(&self, id: &str) -> Result<Option<QueuedTask>> {
        let state = self.lock();
        for list in &state.ready {
            if let Some(task) = list.iter().find(|t| t.id == id) {
                return Ok(Some(task.clone()));
            }
        }
        Ok(state
            .processing
            .get(id)
            .or_else(|| state.completed.get(id))
            .or_else(|| state.failed.get(id))
            .cloned())
    }

    async fn depths(&self) -> Result<QueueDepths> {
        let now = now_ms();
        let state = self.lock();
        let mut per_priority = [0usize; 4];
        let mut retrying = 0;
        for p in TaskPriority::ALL {
            let list = &state.ready[p.index()];
            per_priority[p.index()] = list.len();
            retrying += list.iter().filter(|t| t.eligible_at_ms() > now).count();
        }
        Ok(QueueDepths {
            per_priority,
            retrying,
            processing: state.processing.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
        })
    }

    async fn recover_expired(&self, now: DateTime<Utc>) -> Result<Vec<QueuedTask>> {
        let mut state = self.lock();
        let expired: Vec<String> = state
            .processing
            .values()
            .filter(|t| t.visibility_deadline.is_some_and(|d| d <= now))
            .map(|t| t.id.clone())
            .collect();

        let mut recovered = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(mut task) = state.processing.remove(&id) {
                task.status = TaskStatus::Pending;
                task.started_at = None;
                task.visibility_deadline = None;
                state.insert_ready(task.clone());
                recovered.push(task);
            }
        }
        Ok(recovered)
    }

    async fn record_wait_ms(&self, ms: i64) -> Result<()> {
        let mut state = self.lock();
        state.wait_ms.push_front(ms.max(0));
        state.wait_ms.truncate(METRIC_SAMPLES);
        Ok(())
    }

    async fn record_processing_ms(&self, ms: i64) -> Result<()> {
        let mut state = self.lock();
        state.processing_ms.push_front(ms.max(0));
        state.processing_ms.truncate(METRIC_SAMPLES);
        Ok(())
    }

    async fn timing_summary(&self) -> Result<TimingSummary> {
        let state = self.lock();
        Ok(TimingSummary {
            avg_wait_ms: average(&state.wait_ms),
            avg_processing_ms: average(&state.processing_ms),
        })
    }
}

fn average(samples: &VecDeque<i64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<i64>() as f64 / samples.len() as f64
}
