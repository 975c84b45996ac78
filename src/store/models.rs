//! 存储层数据模型

use crate::audit::AuditReport;
use crate::health::{probe_budget, ProbeTarget};
use crate::store::stats::MonitorStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认审计策略
pub const DEFAULT_STRATEGY: &str = "mobile";

/// 被监控的站点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    /// 监控项ID
    pub id: i64,
    /// 名称
    pub name: String,
    /// 目标URL
    pub url: String,
    /// 是否参与周期调度
    pub is_active: bool,
    /// 期望的检测周期（秒）
    pub interval_seconds: i64,
    /// 单次请求超时（秒）
    pub timeout_seconds: i64,
    /// 探测失败时的重试次数
    pub retry_count: i64,
    /// 审计策略
    pub strategy: String,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 滚动统计
    #[serde(flatten)]
    pub stats: MonitorStats,
    /// 最近一次成功审计的快照
    pub audit: Option<AuditReport>,
    /// 最近一次成功审计的时间
    pub audited_at: Option<DateTime<Utc>>,
}

impl Monitor {
    /// 构建探测目标
    pub fn probe_target(&self) -> ProbeTarget {
        ProbeTarget {
            monitor_id: self.id,
            url: self.url.clone(),
            timeout: Duration::from_secs(self.timeout_seconds.max(1) as u64),
            max_retries: self.retry_count.clamp(0, u32::MAX as i64) as u32,
        }
    }
}

/// 新建监控项的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMonitor {
    pub name: String,
    pub url: String,
    pub is_active: bool,
    pub interval_seconds: i64,
    pub timeout_seconds: i64,
    pub retry_count: i64,
    pub strategy: String,
}

impl NewMonitor {
    /// 使用默认参数创建
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            is_active: true,
            interval_seconds: 60,
            timeout_seconds: 10,
            retry_count: 2,
            strategy: DEFAULT_STRATEGY.to_string(),
        }
    }

    /// 设置是否启用
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// 设置超时时间
    pub fn with_timeout_seconds(mut self, timeout_seconds: i64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// 设置重试次数
    pub fn with_retry_count(mut self, retry_count: i64) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// 设置审计策略
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    /// 校验探测参数
    ///
    /// 最坏情况下的探测耗时必须短于消息租约，否则消息会在
    /// 处理期间对其他 Worker 重新可见
    ///
    /// # 参数
    /// * `lease` - 队列消息租约
    /// * `retry_backoff` - 探测重试的退避基数
    pub fn validate(&self, lease: Duration, retry_backoff: Duration) -> Result<(), String> {
        if self.timeout_seconds < 1 {
            return Err(format!("超时时间必须至少为1秒: {}", self.timeout_seconds));
        }
        if self.retry_count < 0 {
            return Err(format!("重试次数不能为负数: {}", self.retry_count));
        }

        let retries = u32::try_from(self.retry_count)
            .map_err(|_| format!("重试次数过大: {}", self.retry_count))?;
        let budget = probe_budget(
            Duration::from_secs(self.timeout_seconds as u64),
            retries,
            retry_backoff,
        );
        if budget >= lease {
            return Err(format!(
                "最长探测耗时 {:.1}s (超时 {}s × {} 次尝试加退避) 不小于消息租约 {}s",
                budget.as_secs_f64(),
                self.timeout_seconds,
                retries as u64 + 1,
                lease.as_secs()
            ));
        }
        Ok(())
    }
}

/// 一条检测记录，只追加不修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: i64,
    pub monitor_id: i64,
    /// 持久化时分配的检测时间
    pub checked_at: DateTime<Utc>,
    pub is_up: bool,
    pub status_code: Option<u16>,
    pub response_ms: i64,
    pub error: Option<String>,
    pub retry_attempts: i64,
    pub ssl_valid: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_monitor_defaults() {
        let monitor = NewMonitor::new("Example", "https://example.com");
        assert!(monitor.is_active);
        assert_eq!(monitor.interval_seconds, 60);
        assert_eq!(monitor.timeout_seconds, 10);
        assert_eq!(monitor.retry_count, 2);
        assert_eq!(monitor.strategy, "mobile");
    }

    #[test]
    fn test_new_monitor_validation() {
        let lease = Duration::from_secs(300);
        let backoff = Duration::from_millis(500);
        assert!(NewMonitor::new("a", "https://a.example")
            .validate(lease, backoff)
            .is_ok());

        // 120s × 3 次重试远超租约
        let err = NewMonitor::new("slow", "https://slow.example")
            .with_timeout_seconds(120)
            .with_retry_count(3)
            .validate(lease, backoff)
            .unwrap_err();
        assert!(err.contains("消息租约"), "{}", err);

        assert!(NewMonitor::new("a", "https://a.example")
            .with_timeout_seconds(0)
            .validate(lease, backoff)
            .is_err());
        assert!(NewMonitor::new("a", "https://a.example")
            .with_retry_count(-1)
            .validate(lease, backoff)
            .is_err());
    }

    #[test]
    fn test_probe_target_from_monitor() {
        let monitor = Monitor {
            id: 4,
            name: "Example".to_string(),
            url: "https://example.com".to_string(),
            is_active: true,
            interval_seconds: 60,
            timeout_seconds: 7,
            retry_count: 3,
            strategy: "desktop".to_string(),
            created_at: Utc::now(),
            stats: MonitorStats::default(),
            audit: None,
            audited_at: None,
        };

        let target = monitor.probe_target();
        assert_eq!(target.monitor_id, 4);
        assert_eq!(target.timeout, Duration::from_secs(7));
        assert_eq!(target.max_retries, 3);
    }
}
