//! 直接检测
//!
//! 不经过任务队列，直接探测监控项并写入结果。用于命令行的手动检测。

use crate::error::{Result, StorageError};
use crate::health::{probe_batch, ProbeExecutor, ProbeTarget};
use crate::store::{CheckResult, MonitorStore};
use tracing::{error, info};

/// 并发检测所有启用中的监控项
///
/// # 参数
/// * `store` - 监控项存储
/// * `prober` - 探测执行器
/// * `max_concurrent` - 最大并发探测数
///
/// # 返回
/// * `Result<Vec<CheckResult>>` - 成功写入的检测记录
pub async fn run_checks(
    store: &dyn MonitorStore,
    prober: &dyn ProbeExecutor,
    max_concurrent: usize,
) -> Result<Vec<CheckResult>> {
    let monitors = store.list_active_monitors().await?;
    if monitors.is_empty() {
        info!("没有启用中的监控项");
        return Ok(Vec::new());
    }

    let targets: Vec<ProbeTarget> = monitors.iter().map(|m| m.probe_target()).collect();
    info!("开始批量检测 {} 个监控项（并发上限 {}）", targets.len(), max_concurrent);

    let outcomes = probe_batch(prober, &targets, max_concurrent).await;

    let mut results = Vec::with_capacity(outcomes.len());
    for (target, outcome) in targets.iter().zip(outcomes) {
        match store.record_check(target.monitor_id, &outcome).await {
            Ok(result) => results.push(result),
            Err(e) => error!("保存监控项 {} 的检测结果失败: {}", target.monitor_id, e),
        }
    }

    info!("批量检测完成，写入 {} 条记录", results.len());
    Ok(results)
}

/// 检测单个监控项，未启用的监控项同样会被检测
pub async fn run_single_check(
    store: &dyn MonitorStore,
    prober: &dyn ProbeExecutor,
    monitor_id: i64,
) -> Result<CheckResult> {
    let monitor = store
        .get_monitor(monitor_id)
        .await?
        .ok_or(StorageError::MonitorNotFound(monitor_id))?;

    let target = monitor.probe_target();
    let outcome = prober
        .probe(&target.url, target.timeout, target.max_retries)
        .await;
    store.record_check(monitor.id, &outcome).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ProbeOutcome;
    use crate::store::{NewMonitor, SqliteStore};
    use async_trait::async_trait;
    use std::time::Duration;

    /// 按URL决定结果的探测器
    struct UrlProber;

    #[async_trait]
    impl ProbeExecutor for UrlProber {
        async fn probe(&self, url: &str, _timeout: Duration, _max_retries: u32) -> ProbeOutcome {
            if url.contains("panic") {
                panic!("boom");
            }
            if url.contains("down") {
                ProbeOutcome::from_status(500, 30)
            } else {
                ProbeOutcome::from_status(200, 20)
            }
        }
    }

    #[tokio::test]
    async fn test_run_checks_records_every_active_monitor() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (name, url, active) in [
            ("up", "https://up.example", true),
            ("down", "https://down.example", true),
            ("panic", "https://panic.example", true),
            ("off", "https://off.example", false),
        ] {
            store
                .create_monitor(NewMonitor::new(name, url).with_active(active))
                .await
                .unwrap();
        }

        let results = run_checks(&store, &UrlProber, 2).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_up);
        assert_eq!(results[1].status_code, Some(500));
        // 异常退出的探测写入降级记录
        assert!(!results[2].is_up);
        assert_eq!(results[2].status_code, None);
        assert!(results[2].error.as_deref().unwrap().starts_with("Unexpected error"));

        assert!(store.recent_checks(4, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_single_check() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create_monitor(NewMonitor::new("off", "https://down.example").with_active(false))
            .await
            .unwrap();

        let result = run_single_check(&store, &UrlProber, 1).await.unwrap();
        assert!(!result.is_up);
        let monitor = store.get_monitor(1).await.unwrap().unwrap();
        assert_eq!(monitor.stats.uptime_percentage, 0.0);

        assert!(run_single_check(&store, &UrlProber, 9).await.is_err());
    }

    #[tokio::test]
    async fn test_run_checks_on_spawned_task() {
        let store = std::sync::Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .create_monitor(NewMonitor::new("up", "https://up.example"))
            .await
            .unwrap();

        let spawned = store.clone();
        let results = tokio::spawn(async move { run_checks(spawned.as_ref(), &UrlProber, 4).await })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].is_up);
        assert_eq!(store.get_monitor(1).await.unwrap().unwrap().stats.total_checks, 1);
    }
}
