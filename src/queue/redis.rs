//! Remote KV queue backend (Redis).
//!
//! Layout, per queue prefix:
//!
//! ```text
//! <prefix>:queue:urgent    sorted set of task ids, score = 0   + eligibility ms
//! <prefix>:queue:high      sorted set,             score = 1e9 + eligibility ms
//! <prefix>:queue:medium    sorted set,             score = 2e9 + eligibility ms
//! <prefix>:queue:low       sorted set,             score = 3e9 + eligibility ms
//! <prefix>:tasks           hash  id → serialised task (ready)
//! <prefix>:processing      hash  id → serialised task with visibilityDeadline
//! <prefix>:completed       hash  id → serialised task
//! <prefix>:failed          hash  id → serialised task
//! <prefix>:metrics:wait_times        list, trimmed to the last 100 samples
//! <prefix>:metrics:processing_times  list, trimmed to the last 100 samples
//! ```
//!
//! Retry delays ride in the score (eligibility = max(queuedAt, retryAfter)),
//! so an ineligible task is simply out of range for the pop query.

use super::backend::QueueBackend;
use super::{QueueDepths, QueuedTask, TaskPriority, TaskStatus, TimingSummary};
use crate::utils::now_ms;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

const METRIC_SAMPLES: isize = 100;

pub struct RedisBackend {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisBackend {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis URL")?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .context("redis connection failed")?;
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn queue_key(&self, priority: TaskPriority) -> String {
        self.key(&format!("queue:{}", priority.as_str()))
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    async fn hash_take(&self, hash: &str, id: &str) -> Result<Option<QueuedTask>> {
        let key = self.key(hash);
        let mut conn = self.conn();
        let raw: Option<String> = conn.hget(&key, id).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let _: i64 = conn.hdel(&key, id).await?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn hash_get(&self, hash: &str, id: &str) -> Result<Option<QueuedTask>> {
        let raw: Option<String> = self.conn().hget(self.key(hash), id).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn push(&self, task: QueuedTask) -> Result<()> {
        let serialised = serde_json::to_string(&task)?;
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .zadd(self.queue_key(task.priority), &task.id, task.score())
            .hset(self.key("tasks"), &task.id, serialised)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop(
        &self,
        priority: Option<TaskPriority>,
        visibility_deadline: DateTime<Utc>,
    ) -> Result<Option<QueuedTask>> {
        let now = now_ms();
        let candidates: Vec<TaskPriority> = match priority {
            Some(p) => vec![p],
            None => TaskPriority::ALL.to_vec(),
        };

        let mut conn = self.conn();
        for p in candidates {
            let queue_key = self.queue_key(p);
            let max_score = p.base_score() + now;
            // Eligibility is encoded in the score: anything beyond
            // base + now is queued for the future.
            let ids: Vec<String> = conn
                .zrangebyscore_limit(&queue_key, 0, max_score, 0, 1)
                .await?;
            let Some(id) = ids.into_iter().next() else {
                continue;
            };
            let removed: i64 = conn.zrem(&queue_key, &id).await?;
            if removed == 0 {
                // Another consumer won the race; try the next priority.
                continue;
            }

            let raw: Option<String> = conn.hget(self.key("tasks"), &id).await?;
            let Some(raw) = raw else {
                continue;
            };
            let mut task: QueuedTask = serde_json::from_str(&raw)?;
            task.status = TaskStatus::Processing;
            task.started_at = Some(Utc::now());
            task.visibility_deadline = Some(visibility_deadline);

            redis::pipe()
                .atomic()
                .hdel(self.key("tasks"), &id)
                .hset(self.key("processing"), &id, serde_json::to_string(&task)?)
                .query_async::<()>(&mut conn)
                .await?;
            return Ok(Some(task));
        }
        Ok(None)
    }

    async fn peek(&self, n: usize) -> Result<Vec<QueuedTask>> {
        let now = now_ms();
        let mut conn = self.conn();
        let mut out = Vec::with_capacity(n);
        for p in TaskPriority::ALL {
            if out.len() == n {
                break;
            }
            let ids: Vec<String> = conn
                .zrangebyscore_limit(
                    self.queue_key(p),
                    0,
                    p.base_score() + now,
                    0,
                    (n - out.len()) as isize,
                )
                .await?;
            for id in ids {
                if let Some(task) = self.hash_get("tasks", &id).await? {
                    out.push(task);
                }
            }
        }
        Ok(out)
    }

    async fn take_processing(&self, id: &str) -> Result<Option<QueuedTask>> {
        self.hash_take("processing", id).await
    }

    async fn take_failed(&self, id: &str) -> Result<Option<QueuedTask>> {
        self.hash_take("failed", id).await
    }

    async fn store_completed(&self, task: QueuedTask) -> Result<()> {
        let serialised = serde_json::to_string(&task)?;
        let _: i64 = self
            .conn()
            .hset(self.key("completed"), &task.id, serialised)
            .await?;
        Ok(())
    }

    async fn store_failed(&self, task: QueuedTask) -> Result<()> {
        let serialised = serde_json::to_string(&task)?;
        let _: i64 = self
            .conn()
            .hset(self.key("failed"), &task.id, serialised)
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let mut removed = false;
        for p in TaskPriority::ALL {
            let n: i64 = conn.zrem(self.queue_key(p), id).await?;
            removed |= n > 0;
        }
        for hash in ["tasks", "processing", "completed", "failed"] {
            let n: i64 = conn.hdel(self.key(hash), id).await?;
            removed |= n > 0;
        }
        Ok(removed)
    }

    async fn get(&self, id: &str) -> Result<Option<QueuedTask>> {
        for hash in ["tasks", "processing", "completed", "failed"] {
            if let Some(task) = self.hash_get(hash, id).await? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    async fn depths(&self) -> Result<QueueDepths> {
        let now = now_ms();
        let mut conn = self.conn();
        let mut per_priority = [0usize; 4];
        let mut retrying = 0usize;
        for p in TaskPriority::ALL {
            let key = self.queue_key(p);
            per_priority[p.index()] = conn.zcard(&key).await?;
            retrying += conn
                .zcount::<_, _, _, usize>(&key, p.base_score() + now + 1, "+inf")
                .await?;
        }
        Ok(QueueDepths {
            per_priority,
            retrying,
            processing: conn.hlen(self.key("processing")).await?,
            completed: conn.hlen(self.key("completed")).await?,
            failed: conn.hlen(self.key("failed")).await?,
        })
    }

    async fn recover_expired(&self, now: DateTime<Utc>) -> Result<Vec<QueuedTask>> {
        let mut conn = self.conn();
        let all: std::collections::HashMap<String, String> =
            conn.hgetall(self.key("processing")).await?;

        let mut recovered = Vec::new();
        for (id, raw) in all {
            let Ok(mut task) = serde_json::from_str::<QueuedTask>(&raw) else {
                continue;
            };
            if !task.visibility_deadline.is_some_and(|d| d <= now) {
                continue;
            }
            task.status = TaskStatus::Pending;
            task.started_at = None;
            task.visibility_deadline = None;

            redis::pipe()
                .atomic()
                .hdel(self.key("processing"), &id)
                .zadd(self.queue_key(task.priority), &id, task.score())
                .hset(self.key("tasks"), &id, serde_json::to_string(&task)?)
                .query_async::<()>(&mut conn)
                .await?;
            recovered.push(task);
        }
        Ok(recovered)
    }

    async fn record_wait_ms(&self, ms: i64) -> Result<()> {
        let mut conn = self.conn();
        let key = self.key("metrics:wait_times");
        let _: i64 = conn.lpush(&key, ms.max(0)).await?;
        let _: () = conn.ltrim(&key, 0, METRIC_SAMPLES - 1).await?;
        Ok(())
    }

    async fn record_processing_ms(&self, ms: i64) -> Result<()> {
        let mut conn = self.conn();
        let key = self.key("metrics:processing_times");
        let _: i64 = conn.lpush(&key, ms.max(0)).await?;
        let _: () = conn.ltrim(&key, 0, METRIC_SAMPLES - 1).await?;
        Ok(())
    }

    async fn timing_summary(&self) -> Result<TimingSummary> {
        let mut conn = self.conn();
        let waits: Vec<i64> = conn
            .lrange(self.key("metrics:wait_times"), 0, METRIC_SAMPLES - 1)
            .await?;
        let processing: Vec<i64> = conn
            .lrange(self.key("metrics:processing_times"), 0, METRIC_SAMPLES - 1)
            .await?;
        Ok(TimingSummary {
            avg_wait_ms: average(&waits),
            avg_processing_ms: average(&processing),
        })
    }
}

fn average(samples: &[i64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<i64>() as f64 / samples.len() as f64
}
