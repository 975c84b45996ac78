//! 配置数据结构定义
//!
//! 定义应用程序的配置结构体和验证逻辑

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 主配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// 全局配置项
    #[serde(default)]
    pub global: GlobalConfig,
    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 任务队列配置
    #[serde(default)]
    pub queue: QueueConfig,
    /// 生产者（调度器）配置
    #[serde(default)]
    pub producer: ProducerConfig,
    /// 消费者（Worker）配置
    #[serde(default)]
    pub worker: WorkerConfig,
    /// 性能审计配置
    #[serde(default)]
    pub audit: AuditConfig,
    /// 通知配置
    #[serde(default)]
    pub notification: NotificationConfig,
}

/// 全局配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 是否输出JSON格式日志
    #[serde(default)]
    pub log_json: bool,
    /// 日志文件路径（为空时输出到控制台）
    pub log_file: Option<PathBuf>,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// SQLite 数据库文件路径
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

/// 任务队列配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// 队列名称
    #[serde(default = "default_queue_name")]
    pub name: String,
    /// 消息租约时长（秒），超时未确认的消息会被重新投递
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: u64,
    /// 队列为空时的轮询间隔（毫秒）
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 建立连接的最大尝试次数
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// 连接重试间隔（秒）
    #[serde(default = "default_connect_retry_delay")]
    pub connect_retry_delay_seconds: u64,
}

/// 生产者配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProducerConfig {
    /// 存活检测任务的投递周期（秒）
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    /// 性能审计任务的投递周期（秒）
    #[serde(default = "default_audit_interval")]
    pub audit_interval_seconds: u64,
}

/// 消费者配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// 熔断器连续失败阈值
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// 熔断器恢复等待时间（秒）
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_seconds: u64,
    /// 是否校验TLS证书
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    /// 批量检测时的最大并发数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_checks: usize,
    /// 探测重试的线性退避基数（毫秒）
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// 性能审计配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditConfig {
    /// 审计API地址
    #[serde(default = "default_audit_api_url")]
    pub api_url: String,
    /// API密钥（可选）
    pub api_key: Option<String>,
    /// 单次请求超时（秒）
    #[serde(default = "default_audit_timeout")]
    pub timeout_seconds: u64,
    /// 最大尝试次数（包含首次请求）
    #[serde(default = "default_audit_attempts")]
    pub max_attempts: u32,
    /// 首次退避时长（秒），之后每次翻倍
    #[serde(default = "default_audit_backoff")]
    pub initial_backoff_seconds: u64,
}

/// 通知配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationConfig {
    /// 是否启用外部广播
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 实时通道服务地址
    #[serde(default = "default_notification_api_url")]
    pub api_url: String,
    /// 检测完成事件的超时（毫秒）
    #[serde(default = "default_check_notify_timeout")]
    pub check_timeout_ms: u64,
    /// 审计事件的超时（毫秒）
    #[serde(default = "default_audit_notify_timeout")]
    pub audit_timeout_ms: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            log_file: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            lease_seconds: default_lease_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
            connect_attempts: default_connect_attempts(),
            connect_retry_delay_seconds: default_connect_retry_delay(),
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval(),
            audit_interval_seconds: default_audit_interval(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout(),
            verify_ssl: true,
            max_concurrent_checks: default_max_concurrent(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            api_url: default_audit_api_url(),
            api_key: None,
            timeout_seconds: default_audit_timeout(),
            max_attempts: default_audit_attempts(),
            initial_backoff_seconds: default_audit_backoff(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: default_notification_api_url(),
            check_timeout_ms: default_check_notify_timeout(),
            audit_timeout_ms: default_audit_notify_timeout(),
        }
    }
}

impl QueueConfig {
    /// 消息租约时长
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    /// 空队列轮询间隔
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// 默认值函数
fn default_log_level() -> String {
    "info".to_string()
}
fn default_database_path() -> PathBuf {
    PathBuf::from("monitor.db")
}
fn default_queue_name() -> String {
    "health_checks".to_string()
}
fn default_lease_seconds() -> u64 {
    300
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_connect_attempts() -> u32 {
    5
}
fn default_connect_retry_delay() -> u64 {
    5
}
fn default_check_interval() -> u64 {
    60
}
fn default_audit_interval() -> u64 {
    3600
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_max_concurrent() -> usize {
    50
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_audit_api_url() -> String {
    "https://www.googleapis.com/pagespeedonline/v5/runPagespeed".to_string()
}
fn default_audit_timeout() -> u64 {
    60
}
fn default_audit_attempts() -> u32 {
    3
}
fn default_audit_backoff() -> u64 {
    5
}
fn default_notification_api_url() -> String {
    "http://api:8000".to_string()
}
fn default_check_notify_timeout() -> u64 {
    2000
}
fn default_audit_notify_timeout() -> u64 {
    5000
}

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &Config) -> Result<(), String> {
    // 验证日志级别
    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&config.global.log_level.as_str()) {
        return Err(format!(
            "无效的日志级别: {}，支持的级别: {:?}",
            config.global.log_level, valid_log_levels
        ));
    }

    if config.database.path.as_os_str().is_empty() {
        return Err("数据库路径不能为空".to_string());
    }

    if config.queue.name.trim().is_empty() {
        return Err("队列名称不能为空".to_string());
    }
    if config.queue.lease_seconds == 0 {
        return Err("消息租约时长不能为0".to_string());
    }
    if config.queue.connect_attempts == 0 {
        return Err("队列连接尝试次数不能为0".to_string());
    }

    if config.producer.check_interval_seconds == 0 {
        return Err("检测任务投递周期不能为0".to_string());
    }
    if config.producer.audit_interval_seconds == 0 {
        return Err("审计任务投递周期不能为0".to_string());
    }

    if config.worker.failure_threshold == 0 {
        return Err("熔断器失败阈值不能为0".to_string());
    }
    if config.worker.max_concurrent_checks == 0 {
        return Err("最大并发检测数不能为0".to_string());
    }

    if !config.audit.api_url.starts_with("http://") && !config.audit.api_url.starts_with("https://")
    {
        return Err(format!("审计API地址格式无效: {}", config.audit.api_url));
    }
    if config.audit.max_attempts == 0 {
        return Err("审计最大尝试次数不能为0".to_string());
    }
    if config.audit.timeout_seconds == 0 {
        return Err("审计请求超时时间不能为0".to_string());
    }
    let audit_budget = crate::audit::audit_budget(&config.audit);
    if audit_budget >= config.queue.lease() {
        return Err(format!(
            "审计最长耗时 {}s 不小于消息租约 {}s，任务会在处理期间被重复投递",
            audit_budget.as_secs(),
            config.queue.lease_seconds
        ));
    }

    if config.notification.enabled
        && !config.notification.api_url.starts_with("http://")
        && !config.notification.api_url.starts_with("https://")
    {
        return Err(format!(
            "通知服务地址格式无效: {}",
            config.notification.api_url
        ));
    }

    Ok(())
}
