//! 任务消费者（Worker）
//!
//! 一次只持有一条消息。按任务类型分派处理，处理完成后无论成败都确认消息；
//! 处理过程中的错误和 panic 都在这里被捕获，不会终止进程。

use crate::audit::{AuditExecutor, AuditReport};
use crate::error::{describe_panic, QueueError, Result};
use crate::health::{BreakerRegistry, ProbeExecutor, ProbeOutcome};
use crate::notification::{MonitorEvent, NotificationHub};
use crate::queue::{CheckKind, Delivery, Task, TaskQueue};
use crate::store::{CheckResult, MonitorStore};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// 单条任务的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// 完成存活检测并写入记录
    Checked(CheckResult),
    /// 完成审计并覆盖快照
    Audited(AuditReport),
    /// 审计失败
    AuditFailed(String),
    /// 熔断器打开，本轮跳过
    BreakerOpen,
    /// 监控项不存在
    MonitorMissing,
    /// 消息无效，直接丢弃
    Discarded(String),
    /// 处理过程出错或 panic
    Failed(String),
}

type Handler = for<'a> fn(&'a Worker, &'a Task) -> BoxFuture<'a, Result<TaskOutcome>>;

fn handle_check<'a>(worker: &'a Worker, task: &'a Task) -> BoxFuture<'a, Result<TaskOutcome>> {
    Box::pin(worker.process_check(task))
}

fn handle_audit<'a>(worker: &'a Worker, task: &'a Task) -> BoxFuture<'a, Result<TaskOutcome>> {
    Box::pin(worker.process_audit(task))
}

/// 任务类型到处理函数的映射
fn handler_for(kind: CheckKind) -> Handler {
    match kind {
        CheckKind::Liveness => handle_check as Handler,
        CheckKind::Audit => handle_audit as Handler,
    }
}

/// 任务消费者
pub struct Worker {
    store: Arc<dyn MonitorStore>,
    queue: Arc<dyn TaskQueue>,
    prober: Arc<dyn ProbeExecutor>,
    auditor: Arc<dyn AuditExecutor>,
    breakers: BreakerRegistry,
    hub: NotificationHub,
    poll_interval: Duration,
    max_fetch_failures: u32,
    fetch_retry_delay: Duration,
}

impl Worker {
    /// 创建消费者
    pub fn new(
        store: Arc<dyn MonitorStore>,
        queue: Arc<dyn TaskQueue>,
        prober: Arc<dyn ProbeExecutor>,
        auditor: Arc<dyn AuditExecutor>,
    ) -> Self {
        Self {
            store,
            queue,
            prober,
            auditor,
            breakers: BreakerRegistry::default(),
            hub: NotificationHub::new(),
            poll_interval: Duration::from_secs(1),
            max_fetch_failures: 5,
            fetch_retry_delay: Duration::from_secs(5),
        }
    }

    /// 设置熔断器注册表
    pub fn with_breakers(mut self, breakers: BreakerRegistry) -> Self {
        self.breakers = breakers;
        self
    }

    /// 设置通知订阅者
    pub fn with_hub(mut self, hub: NotificationHub) -> Self {
        self.hub = hub;
        self
    }

    /// 设置空队列轮询间隔
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// 设置队列连续不可用时的重试策略
    pub fn with_fetch_retry(mut self, max_failures: u32, delay: Duration) -> Self {
        self.max_fetch_failures = max_failures.max(1);
        self.fetch_retry_delay = delay;
        self
    }

    /// 熔断器注册表
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// 拉取并处理一条消息
    ///
    /// # 返回
    /// * `Ok(None)` - 队列为空
    /// * `Ok(Some(outcome))` - 消息已处理并确认
    /// * `Err(_)` - 队列本身不可用
    pub async fn run_next(&self) -> std::result::Result<Option<TaskOutcome>, QueueError> {
        let Some(delivery) = self.queue.fetch().await? else {
            return Ok(None);
        };

        let outcome = self.handle_delivery(&delivery).await;
        self.queue.ack(&delivery).await?;
        Ok(Some(outcome))
    }

    async fn handle_delivery(&self, delivery: &Delivery) -> TaskOutcome {
        info!(
            "收到任务 {} (第 {} 次投递): {}",
            delivery.tag, delivery.delivery_count, delivery.body
        );

        let task = match delivery.task() {
            Ok(task) => task,
            Err(e) => {
                warn!("丢弃无效消息 {}: {}", delivery.tag, e);
                return TaskOutcome::Discarded(e.to_string());
            }
        };

        if task.monitor_id <= 0 {
            warn!("丢弃缺少监控项ID的消息 {}", delivery.tag);
            return TaskOutcome::Discarded(format!("无效的监控项ID: {}", task.monitor_id));
        }

        self.process(&task).await
    }

    /// 处理一个已解码的任务，错误和 panic 都会被转换为 [`TaskOutcome::Failed`]
    pub async fn process(&self, task: &Task) -> TaskOutcome {
        let handler = handler_for(task.task_type);
        match AssertUnwindSafe(handler(self, task)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!("处理监控项 {} 的 {} 任务失败: {}", task.monitor_id, task.task_type, e);
                TaskOutcome::Failed(e.to_string())
            }
            Err(payload) => {
                let reason = describe_panic(payload.as_ref());
                error!(
                    "处理监控项 {} 的 {} 任务时发生panic: {}",
                    task.monitor_id, task.task_type, reason
                );
                TaskOutcome::Failed(reason)
            }
        }
    }

    async fn process_check(&self, task: &Task) -> Result<TaskOutcome> {
        let Some(monitor) = self.store.get_monitor(task.monitor_id).await? else {
            warn!("监控项 {} 不存在，跳过检测", task.monitor_id);
            return Ok(TaskOutcome::MonitorMissing);
        };

        let target = monitor.probe_target();
        debug!("检测 {} (监控项 {})", target.url, monitor.id);

        let probed = self
            .breakers
            .call(
                monitor.id,
                || self.prober.probe(&target.url, target.timeout, target.max_retries),
                |outcome: &ProbeOutcome| !outcome.is_up,
            )
            .await;

        let outcome = match probed {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{}，跳过本轮检测 ({})", e, monitor.url);
                return Ok(TaskOutcome::BreakerOpen);
            }
        };

        let result = self.store.record_check(monitor.id, &outcome).await?;
        info!(
            "{} 检测结果: {} ({}ms)",
            monitor.url,
            outcome.status_label(),
            outcome.response_ms
        );

        self.hub
            .publish(&MonitorEvent::CheckFinished {
                monitor_id: monitor.id,
                is_up: result.is_up,
            })
            .await;

        Ok(TaskOutcome::Checked(result))
    }

    async fn process_audit(&self, task: &Task) -> Result<TaskOutcome> {
        let Some(monitor) = self.store.get_monitor(task.monitor_id).await? else {
            warn!("监控项 {} 不存在，跳过审计", task.monitor_id);
            return Ok(TaskOutcome::MonitorMissing);
        };

        info!("开始性能审计 ({}): {}", task.strategy, monitor.url);

        let report = match self.auditor.audit(&monitor.url, &task.strategy).await {
            Ok(report) => report,
            Err(e) => return Ok(self.audit_failed(monitor.id, e.to_string()).await),
        };

        if let Err(e) = self.store.update_audit_snapshot(monitor.id, &report).await {
            return Ok(self.audit_failed(monitor.id, e.to_string()).await);
        }

        info!("审计完成 {}: 评分 {:?}", monitor.url, report.perf_score);
        self.hub
            .publish(&MonitorEvent::AuditFinished {
                monitor_id: monitor.id,
                perf_score: report.perf_score,
            })
            .await;
        Ok(TaskOutcome::Audited(report))
    }

    async fn audit_failed(&self, monitor_id: i64, message: String) -> TaskOutcome {
        error!("监控项 {} 审计失败: {}", monitor_id, message);
        self.hub
            .publish(&MonitorEvent::AuditFailed {
                monitor_id,
                error: message.clone(),
            })
            .await;
        TaskOutcome::AuditFailed(message)
    }

    /// 持续消费直到收到关闭信号
    ///
    /// 队列连续不可用超过上限时返回错误
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("Worker 已就绪，等待任务");
        let mut failures = 0u32;

        loop {
            let wait = match self.run_next().await {
                Ok(Some(_)) => {
                    failures = 0;
                    Duration::ZERO
                }
                Ok(None) => {
                    failures = 0;
                    self.poll_interval
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.max_fetch_failures {
                        error!("队列连续 {} 次不可用，Worker 退出", failures);
                        return Err(e.into());
                    }
                    warn!(
                        "队列不可用: {}，{:?} 后重试（剩余 {} 次）",
                        e,
                        self.fetch_retry_delay,
                        self.max_fetch_failures - failures
                    );
                    self.fetch_retry_delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => {
                    info!("Worker 收到关闭信号");
                    return Ok(());
                }
            }
        }
    }
}

/// 以固定间隔重试建立连接
///
/// # 参数
/// * `attempts` - 最大尝试次数
/// * `delay` - 两次尝试之间的等待
/// * `connect` - 建立连接的函数
///
/// # 返回
/// * 第一次成功的结果，或最后一次失败的错误
pub async fn connect_with_retry<T, E, F>(
    attempts: u32,
    delay: Duration,
    mut connect: F,
) -> std::result::Result<T, E>
where
    E: Display,
    F: FnMut() -> std::result::Result<T, E>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match connect() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                error!("连接队列失败: {}", e);
                info!("{:?} 后重试连接（剩余 {} 次）", delay, attempts - attempt);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!("连接队列失败: {}，已达到最大重试次数", e);
                return Err(e);
            }
        }
    }
}
