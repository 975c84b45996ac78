//! 基于 SQLite 的持久化任务队列
//!
//! 每条消息是一行记录。拉取时为最早的可见消息设置租约，确认时删除；
//! 租约到期仍未确认的消息会重新可见，从而实现至少一次投递。

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::queue::task::Task;
use crate::queue::{Delivery, TaskQueue};
use crate::store::sqlite::{configure_connection, open_connection};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

const QUEUE_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS task_queue (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  queue TEXT NOT NULL,
  delivery_tag TEXT NOT NULL UNIQUE,
  payload TEXT NOT NULL,
  published_at TEXT NOT NULL,
  delivery_count INTEGER NOT NULL DEFAULT 0,
  leased_until INTEGER
);
CREATE INDEX IF NOT EXISTS idx_task_queue_visible ON task_queue(queue, leased_until, seq);
";

/// SQLite 任务队列
#[derive(Debug)]
pub struct SqliteQueue {
    conn: Mutex<Connection>,
    name: String,
    lease: Duration,
}

impl SqliteQueue {
    /// 打开队列所在的数据库并声明队列
    pub fn open(path: &Path, config: &QueueConfig) -> Result<Self, QueueError> {
        let conn = open_connection(path).map_err(|e| QueueError::Connection {
            queue: config.name.clone(),
            reason: e.to_string(),
        })?;
        Self::with_connection(conn, &config.name, config.lease())
    }

    /// 创建内存队列
    pub fn open_in_memory(name: &str, lease: Duration) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()
            .and_then(|conn| configure_connection(&conn).map(|_| conn))
            .map_err(|e| QueueError::Connection {
                queue: name.to_string(),
                reason: e.to_string(),
            })?;
        Self::with_connection(conn, name, lease)
    }

    fn with_connection(conn: Connection, name: &str, lease: Duration) -> Result<Self, QueueError> {
        let queue = Self {
            conn: Mutex::new(conn),
            name: name.to_string(),
            lease,
        };
        queue.declare()?;
        Ok(queue)
    }

    /// 声明队列，重复调用无副作用
    pub fn declare(&self) -> Result<(), QueueError> {
        let conn = self.lock()?;
        conn.execute_batch(QUEUE_SCHEMA_SQL)
            .map_err(|e| QueueError::Connection {
                queue: self.name.clone(),
                reason: e.to_string(),
            })
    }

    /// 队列名称
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, QueueError> {
        self.conn.lock().map_err(|_| QueueError::Connection {
            queue: self.name.clone(),
            reason: "连接锁已损坏".to_string(),
        })
    }

    fn fetch_next(&self, conn: &mut Connection) -> rusqlite::Result<Option<Delivery>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now_ms = Utc::now().timestamp_millis();
        let next = tx
            .query_row(
                "SELECT seq, delivery_tag, payload, delivery_count FROM task_queue
                 WHERE queue = ?1 AND (leased_until IS NULL OR leased_until <= ?2)
                 ORDER BY seq LIMIT 1",
                params![self.name, now_ms],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((seq, tag, body, delivered)) = next else {
            return Ok(None);
        };

        let lease_ms = i64::try_from(self.lease.as_millis()).unwrap_or(i64::MAX);
        tx.execute(
            "UPDATE task_queue SET leased_until = ?1, delivery_count = delivery_count + 1
             WHERE seq = ?2",
            params![now_ms.saturating_add(lease_ms), seq],
        )?;
        tx.commit()?;

        Ok(Some(Delivery {
            tag,
            body,
            delivery_count: delivered + 1,
        }))
    }
}

#[async_trait]
impl TaskQueue for SqliteQueue {
    async fn publish(&self, task: &Task) -> Result<String, QueueError> {
        let payload = task.encode()?;
        let tag = Uuid::new_v4().to_string();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO task_queue (queue, delivery_tag, payload, published_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![self.name, tag, payload, Utc::now()],
        )
        .map_err(|e| QueueError::Publish(e.to_string()))?;

        tracing::debug!("已发布任务 {} 到队列 {}: {}", tag, self.name, payload);
        Ok(tag)
    }

    async fn fetch(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.lock()?;
        self.fetch_next(&mut conn)
            .map_err(|e| QueueError::Consume(e.to_string()))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM task_queue WHERE delivery_tag = ?1",
                params![delivery.tag],
            )
            .map_err(|e| QueueError::Consume(e.to_string()))?;

        if removed == 0 {
            tracing::warn!("确认的消息已不存在（可能已被重复投递并确认）: {}", delivery.tag);
        }
        Ok(())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM task_queue WHERE queue = ?1",
                params![self.name],
                |row| row.get(0),
            )
            .map_err(|e| QueueError::Consume(e.to_string()))?;
        Ok(count.max(0) as usize)
    }
}
