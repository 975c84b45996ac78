//! 通知发送器模块
//!
//! 定义状态变化事件、发送器trait和订阅者列表

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// 监控状态变化事件
///
/// 序列化为 `{"event": "check_finished", "monitor_id": 1, ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// 存活检测完成
    CheckFinished { monitor_id: i64, is_up: bool },
    /// 审计完成
    AuditFinished {
        monitor_id: i64,
        perf_score: Option<f64>,
    },
    /// 审计失败
    AuditFailed { monitor_id: i64, error: String },
}

impl MonitorEvent {
    /// 事件关联的监控项
    pub fn monitor_id(&self) -> i64 {
        match self {
            MonitorEvent::CheckFinished { monitor_id, .. }
            | MonitorEvent::AuditFinished { monitor_id, .. }
            | MonitorEvent::AuditFailed { monitor_id, .. } => *monitor_id,
        }
    }

    /// 事件名称
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::CheckFinished { .. } => "check_finished",
            MonitorEvent::AuditFinished { .. } => "audit_finished",
            MonitorEvent::AuditFailed { .. } => "audit_failed",
        }
    }

    /// 是否为审计相关事件
    pub fn is_audit(&self) -> bool {
        !matches!(self, MonitorEvent::CheckFinished { .. })
    }
}

/// 通知发送器trait
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 发送一个事件
    ///
    /// # 参数
    /// * `event` - 监控事件
    ///
    /// # 返回
    /// * `Result<()>` - 发送结果
    async fn send_event(&self, event: &MonitorEvent) -> Result<()>;

    /// 发送器名称，用于日志
    fn name(&self) -> &str;
}

/// 进程内订阅通道
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: broadcast::Sender<MonitorEvent>,
}

impl ChannelSender {
    /// 创建指定缓冲容量的通道
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSender for ChannelSender {
    async fn send_event(&self, event: &MonitorEvent) -> Result<()> {
        // 没有订阅者时直接丢弃
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// 在后台把进程内通道中的事件写入日志
///
/// 通道关闭后任务结束，返回记录的事件数
pub fn spawn_event_log(mut rx: broadcast::Receiver<MonitorEvent>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut logged = 0u64;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    logged += 1;
                    match &event {
                        MonitorEvent::CheckFinished { monitor_id, is_up } => {
                            let status = if *is_up { "UP" } else { "DOWN" };
                            tracing::info!("监控项 {} 检测完成: {}", monitor_id, status);
                        }
                        MonitorEvent::AuditFinished {
                            monitor_id,
                            perf_score,
                        } => {
                            tracing::info!(
                                "监控项 {} 审计完成, 性能评分 {:?}",
                                monitor_id,
                                perf_score
                            );
                        }
                        MonitorEvent::AuditFailed { monitor_id, error } => {
                            tracing::warn!("监控项 {} 审计失败: {}", monitor_id, error);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("事件日志落后, 跳过 {} 个事件", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        logged
    })
}

/// 订阅者列表，逐个投递事件并吞掉失败
#[derive(Clone, Default)]
pub struct NotificationHub {
    senders: Vec<Arc<dyn NotificationSender>>,
}

impl NotificationHub {
    /// 创建空列表
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加订阅者
    pub fn with_sender(mut self, sender: Arc<dyn NotificationSender>) -> Self {
        self.senders.push(sender);
        self
    }

    /// 订阅者数量
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// 是否没有订阅者
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// 投递事件，任何发送失败都只记录日志
    pub async fn publish(&self, event: &MonitorEvent) {
        for sender in &self.senders {
            if let Err(e) = sender.send_event(event).await {
                tracing::warn!(
                    "通知 {} 发送失败 (监控项 {}, 事件 {}): {}",
                    sender.name(),
                    event.monitor_id(),
                    event.name(),
                    e
                );
            }
        }
    }
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.senders.iter().map(|s| s.name()).collect();
        f.debug_struct("NotificationHub")
            .field("senders", &names)
            .finish()
    }
}
