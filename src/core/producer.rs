//! 任务生产者（调度器）
//!
//! 周期性枚举启用中的监控项并为每个监控项投递一条任务。
//! 单条任务投递失败只记录日志，不影响其他监控项。

use crate::config::ProducerConfig;
use crate::error::{Result, StorageError};
use crate::queue::{CheckKind, Task, TaskQueue};
use crate::store::{Monitor, MonitorStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// 任务生产者
pub struct Producer {
    store: Arc<dyn MonitorStore>,
    queue: Arc<dyn TaskQueue>,
    check_interval: Duration,
    audit_interval: Duration,
}

impl Producer {
    /// 创建生产者
    pub fn new(
        store: Arc<dyn MonitorStore>,
        queue: Arc<dyn TaskQueue>,
        config: &ProducerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            check_interval: Duration::from_secs(config.check_interval_seconds.max(1)),
            audit_interval: Duration::from_secs(config.audit_interval_seconds.max(1)),
        }
    }

    fn task_for(monitor: &Monitor, kind: CheckKind) -> Task {
        Task::new(monitor.id, kind, monitor.strategy.clone())
    }

    /// 为所有启用中的监控项投递一种任务
    ///
    /// # 返回
    /// * `Result<usize>` - 成功投递的任务数；只有读取监控项失败时返回错误
    pub async fn enqueue_active(&self, kind: CheckKind) -> Result<usize> {
        let monitors = self.store.list_active_monitors().await?;
        let mut published = 0;

        for monitor in &monitors {
            match self.queue.publish(&Self::task_for(monitor, kind)).await {
                Ok(_) => published += 1,
                Err(e) => error!("投递 {} 任务失败 (监控项 {}): {}", kind, monitor.id, e),
            }
        }

        info!(
            "已投递 {} 个 {} 任务（启用中的监控项 {} 个）",
            published,
            kind,
            monitors.len()
        );
        Ok(published)
    }

    /// 立即为所有启用中的监控项投递检测和审计任务
    ///
    /// # 返回
    /// * `Result<usize>` - 涉及的监控项数量
    pub async fn run_once(&self) -> Result<usize> {
        let monitors = self.store.list_active_monitors().await?;
        for monitor in &monitors {
            self.enqueue_monitor(monitor).await;
        }
        Ok(monitors.len())
    }

    /// 为单个监控项投递检测和审计任务，失败只记录日志
    pub async fn enqueue_monitor(&self, monitor: &Monitor) {
        for kind in [CheckKind::Liveness, CheckKind::Audit] {
            if let Err(e) = self.queue.publish(&Self::task_for(monitor, kind)).await {
                error!("投递 {} 任务失败 (监控项 {}): {}", kind, monitor.id, e);
            }
        }
    }

    /// 手动触发单个监控项，未启用的监控项同样允许
    ///
    /// # 参数
    /// * `monitor_id` - 监控项ID
    /// * `kind` - 任务类型
    /// * `strategy` - 审计策略，为空时使用监控项自身的配置
    pub async fn trigger(
        &self,
        monitor_id: i64,
        kind: CheckKind,
        strategy: Option<String>,
    ) -> Result<Task> {
        let monitor = self
            .store
            .get_monitor(monitor_id)
            .await?
            .ok_or(StorageError::MonitorNotFound(monitor_id))?;

        let strategy = strategy.unwrap_or_else(|| monitor.strategy.clone());
        let task = Task::new(monitor.id, kind, strategy);
        self.queue.publish(&task).await?;

        info!("已手动触发监控项 {} 的 {} 任务", monitor_id, kind);
        Ok(task)
    }

    /// 运行调度循环直到收到关闭信号
    ///
    /// 检测与审计各自按周期触发，第一次触发在一个周期之后
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let start = Instant::now();
        let mut check_timer = interval_at(start + self.check_interval, self.check_interval);
        let mut audit_timer = interval_at(start + self.audit_interval, self.audit_interval);
        check_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        audit_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "生产者已启动：检测周期 {:?}，审计周期 {:?}",
            self.check_interval, self.audit_interval
        );

        loop {
            tokio::select! {
                _ = check_timer.tick() => {
                    if let Err(e) = self.enqueue_active(CheckKind::Liveness).await {
                        warn!("本轮检测任务投递失败: {}", e);
                    }
                }
                _ = audit_timer.tick() => {
                    if let Err(e) = self.enqueue_active(CheckKind::Audit).await {
                        warn!("本轮审计任务投递失败: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("生产者收到关闭信号");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use crate::queue::{Delivery, SqliteQueue};
    use crate::store::{NewMonitor, SqliteStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 对指定监控项发布失败的队列
    #[derive(Default)]
    struct FlakyQueue {
        reject_monitor: i64,
        published: Mutex<Vec<Task>>,
    }

    #[async_trait]
    impl TaskQueue for FlakyQueue {
        async fn publish(&self, task: &Task) -> std::result::Result<String, QueueError> {
            if task.monitor_id == self.reject_monitor {
                return Err(QueueError::Publish("broker unavailable".to_string()));
            }
            self.published.lock().unwrap().push(task.clone());
            Ok(format!("tag-{}", task.monitor_id))
        }

        async fn fetch(&self) -> std::result::Result<Option<Delivery>, QueueError> {
            Ok(None)
        }

        async fn ack(&self, _delivery: &Delivery) -> std::result::Result<(), QueueError> {
            Ok(())
        }

        async fn depth(&self) -> std::result::Result<usize, QueueError> {
            Ok(self.published.lock().unwrap().len())
        }
    }

    async fn seeded_store() -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .create_monitor(NewMonitor::new("A", "https://a.example"))
            .await
            .unwrap();
        store
            .create_monitor(NewMonitor::new("B", "https://b.example").with_strategy("desktop"))
            .await
            .unwrap();
        store
            .create_monitor(NewMonitor::new("Off", "https://off.example").with_active(false))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_enqueue_active_skips_inactive() {
        let store = seeded_store().await;
        let queue = Arc::new(SqliteQueue::open_in_memory("health_checks", Duration::from_secs(60)).unwrap());
        let producer = Producer::new(store, queue.clone(), &ProducerConfig::default());

        let published = producer.enqueue_active(CheckKind::Liveness).await.unwrap();
        assert_eq!(published, 2);
        assert_eq!(queue.depth().await.unwrap(), 2);

        let first = queue.fetch().await.unwrap().unwrap().task().unwrap();
        assert_eq!(first, Task::check(1));
    }

    #[tokio::test]
    async fn test_publish_failures_are_skipped() {
        let store = seeded_store().await;
        let queue = Arc::new(FlakyQueue {
            reject_monitor: 1,
            ..FlakyQueue::default()
        });
        let producer = Producer::new(store, queue.clone(), &ProducerConfig::default());

        let published = producer.enqueue_active(CheckKind::Audit).await.unwrap();
        assert_eq!(published, 1);

        let tasks = queue.published.lock().unwrap().clone();
        assert_eq!(tasks, vec![Task::audit(2, "desktop")]);
    }

    #[tokio::test]
    async fn test_run_once_publishes_check_and_audit() {
        let store = seeded_store().await;
        let queue = Arc::new(SqliteQueue::open_in_memory("health_checks", Duration::from_secs(60)).unwrap());
        let producer = Producer::new(store, queue.clone(), &ProducerConfig::default());

        assert_eq!(producer.run_once().await.unwrap(), 2);
        assert_eq!(queue.depth().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_trigger_allows_inactive_and_overrides_strategy() {
        let store = seeded_store().await;
        let queue = Arc::new(SqliteQueue::open_in_memory("health_checks", Duration::from_secs(60)).unwrap());
        let producer = Producer::new(store, queue.clone(), &ProducerConfig::default());

        let task = producer
            .trigger(3, CheckKind::Audit, Some("desktop".to_string()))
            .await
            .unwrap();
        assert_eq!(task, Task::audit(3, "desktop"));

        let delivered = queue.fetch().await.unwrap().unwrap().task().unwrap();
        assert_eq!(delivered, task);

        assert!(producer.trigger(99, CheckKind::Liveness, None).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_and_stops_on_shutdown() {
        let store = seeded_store().await;
        let queue = Arc::new(FlakyQueue {
            reject_monitor: -1,
            ..FlakyQueue::default()
        });
        let config = ProducerConfig {
            check_interval_seconds: 60,
            audit_interval_seconds: 3600,
        };
        let producer = Arc::new(Producer::new(store, queue.clone(), &config));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn({
            let producer = producer.clone();
            async move { producer.run(rx).await }
        });

        // 两个检测周期，尚未到审计周期
        tokio::time::sleep(Duration::from_secs(125)).await;
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let tasks = queue.published.lock().unwrap().clone();
        assert_eq!(tasks.len(), 4);
        assert!(tasks.iter().all(|t| t.task_type == CheckKind::Liveness));
    }
}
