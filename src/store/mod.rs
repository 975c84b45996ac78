//! 存储模块
//!
//! 监控项、检测记录和滚动统计的持久化

pub mod models;
pub mod sqlite;
pub mod stats;

pub use models::{CheckResult, Monitor, NewMonitor, DEFAULT_STRATEGY};
pub use sqlite::SqliteStore;
pub use stats::MonitorStats;

use crate::audit::AuditReport;
use crate::error::Result;
use crate::health::ProbeOutcome;
use async_trait::async_trait;

/// 监控项存储trait
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// 新建监控项
    async fn create_monitor(&self, monitor: NewMonitor) -> Result<Monitor>;

    /// 按ID读取监控项
    async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>>;

    /// 列出全部监控项
    async fn list_monitors(&self) -> Result<Vec<Monitor>>;

    /// 列出启用中的监控项
    async fn list_active_monitors(&self) -> Result<Vec<Monitor>>;

    /// 追加一条检测记录并更新滚动统计
    ///
    /// 两者在同一事务中完成，检测时间在此处分配
    ///
    /// # 参数
    /// * `monitor_id` - 监控项ID
    /// * `outcome` - 探测结果
    ///
    /// # 返回
    /// * `Result<CheckResult>` - 写入的检测记录
    async fn record_check(&self, monitor_id: i64, outcome: &ProbeOutcome) -> Result<CheckResult>;

    /// 覆盖监控项的审计快照
    async fn update_audit_snapshot(&self, monitor_id: i64, report: &AuditReport) -> Result<()>;

    /// 最近的检测记录，按时间倒序
    async fn recent_checks(&self, monitor_id: i64, limit: u32) -> Result<Vec<CheckResult>>;
}
