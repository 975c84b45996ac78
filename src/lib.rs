//! Site Vitals - 队列驱动的网站存活与性能监控
//!
//! 生产者周期性地把检测任务写入持久化队列，消费者逐条处理：
//! - HTTP 存活探测（带重试、TLS 判定和按监控项隔离的熔断器）
//! - 外部性能审计（429 指数退避）
//! - 滚动统计（可用率与响应时间的指数移动平均）
//! - 实时事件广播
//! - 结构化日志记录

pub mod audit;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod logging;
pub mod notification;
pub mod queue;
pub mod store;

// 重新导出主要类型
pub use config::Config;
pub use error::{Result, SiteVitalsError};
pub use health::{ProbeExecutor, ProbeOutcome};
pub use queue::{CheckKind, Task, TaskQueue};
pub use store::{CheckResult, Monitor, MonitorStore};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
