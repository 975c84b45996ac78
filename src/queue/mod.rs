//! 任务队列模块
//!
//! 生产者与消费者之间唯一的耦合点：持久化、先进先出、至少一次投递

pub mod sqlite;
pub mod task;

pub use sqlite::SqliteQueue;
pub use task::{CheckKind, Task};

use crate::error::QueueError;
use async_trait::async_trait;

/// 一次投递
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// 投递标签，仅用于确认
    pub tag: String,
    /// 原始消息体
    pub body: String,
    /// 第几次投递（从 1 开始）
    pub delivery_count: u32,
}

impl Delivery {
    /// 解码消息体
    ///
    /// 解码失败的消息仍然可以被确认丢弃
    pub fn task(&self) -> Result<Task, QueueError> {
        Task::decode(&self.body)
    }
}

/// 任务队列trait
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 发布一条持久化任务，返回投递标签
    async fn publish(&self, task: &Task) -> Result<String, QueueError>;

    /// 拉取下一条可见消息，同一时刻每个消费者最多持有一条
    async fn fetch(&self) -> Result<Option<Delivery>, QueueError>;

    /// 确认消息已处理完成
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// 队列中的消息数量（含未确认的）
    async fn depth(&self) -> Result<usize, QueueError>;
}
