//! 存活探测结果数据结构
//!
//! 定义单次探测的输入目标和输出结果

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 判断HTTP状态码是否代表站点可用（2xx 与 3xx）
pub fn is_up_status(status_code: u16) -> bool {
    (200..400).contains(&status_code)
}

/// 探测目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// 监控项ID
    pub monitor_id: i64,
    /// 目标URL
    pub url: String,
    /// 单次尝试超时
    pub timeout: Duration,
    /// 首次尝试之外的最大重试次数
    pub max_retries: u32,
}

/// 单次探测（含重试）的结果
///
/// 探测器从不返回错误，所有失败都折叠进这个结构
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// 站点是否可用
    pub is_up: bool,
    /// 最后一次收到的HTTP状态码
    pub status_code: Option<u16>,
    /// 最后一次尝试的耗时（毫秒）
    pub response_ms: u64,
    /// 错误描述
    pub error: Option<String>,
    /// 实际发生的重试次数
    pub retry_attempts: u32,
    /// TLS证书是否有效，`None` 表示未知
    pub ssl_valid: Option<bool>,
}

impl ProbeOutcome {
    /// 根据收到的HTTP响应创建结果
    ///
    /// # 参数
    /// * `status_code` - HTTP状态码
    /// * `response_ms` - 本次尝试耗时
    pub fn from_status(status_code: u16, response_ms: u64) -> Self {
        Self {
            is_up: is_up_status(status_code),
            status_code: Some(status_code),
            response_ms,
            error: None,
            retry_attempts: 0,
            ssl_valid: None,
        }
    }

    /// 创建一个不可用的结果
    pub fn down(error: impl Into<String>, response_ms: u64) -> Self {
        Self {
            is_up: false,
            status_code: None,
            response_ms,
            error: Some(error.into()),
            retry_attempts: 0,
            ssl_valid: None,
        }
    }

    /// 批量探测中单个任务异常退出时使用的降级结果
    pub fn degraded(reason: impl std::fmt::Display) -> Self {
        Self::down(format!("Unexpected error: {}", reason), 0)
    }

    /// 设置重试次数
    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    /// 设置TLS证书状态
    pub fn with_ssl_valid(mut self, ssl_valid: Option<bool>) -> Self {
        self.ssl_valid = ssl_valid;
        self
    }

    /// 用于日志的简短状态描述
    pub fn status_label(&self) -> &'static str {
        if self.is_up {
            "UP"
        } else {
            "DOWN"
        }
    }
}
