//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use thiserror::Error;

/// Site Vitals 应用程序的主要错误类型
#[derive(Error, Debug)]
pub enum SiteVitalsError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 存储相关错误
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    /// 任务队列相关错误
    #[error("队列错误: {0}")]
    Queue(#[from] QueueError),

    /// 性能审计相关错误
    #[error("审计错误: {0}")]
    Audit(#[from] AuditError),

    /// 熔断器拒绝
    #[error("熔断器: {0}")]
    Breaker(#[from] BreakerError),

    /// 通知相关错误
    #[error("通知错误: {0}")]
    Notification(String),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 存储错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite 错误
    #[error("数据库操作失败: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// 连接锁中毒
    #[error("数据库连接锁已损坏")]
    Poisoned,

    /// 监控项不存在
    #[error("监控项不存在: {0}")]
    MonitorNotFound(i64),

    /// 字段编码错误
    #[error("字段编码失败: {0}")]
    Encoding(String),
}

/// 任务队列错误类型
#[derive(Error, Debug)]
pub enum QueueError {
    /// 无法连接到队列后端
    #[error("无法连接到队列 {queue}: {reason}")]
    Connection { queue: String, reason: String },

    /// 发布失败
    #[error("发布任务失败: {0}")]
    Publish(String),

    /// 拉取或确认失败
    #[error("消费任务失败: {0}")]
    Consume(String),

    /// 消息格式无效
    #[error("无效的任务消息: {0}")]
    Malformed(String),
}

/// 性能审计错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuditError {
    /// 多次 429 后仍被限流
    #[error("Rate Limit Reached (429) after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// 非 200 且非 429 的响应
    #[error("PSI API error: HTTP {status}")]
    Http { status: u16 },

    /// 网络层错误（重试耗尽）
    #[error("PSI request failed after {attempts} attempts: {message}")]
    Network { attempts: u32, message: String },

    /// 响应体无法解析
    #[error("PSI response could not be parsed: {0}")]
    InvalidResponse(String),
}

/// 熔断器错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BreakerError {
    /// 熔断器处于打开状态，调用被直接拒绝
    #[error("熔断器已打开，监控项 {monitor_id} 的调用被拒绝")]
    Open { monitor_id: i64 },
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, SiteVitalsError>;

/// 从 panic 负载中提取可读的描述
pub fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
