//! 任务消息定义
//!
//! 线上格式：`{"monitor_id": 1, "task_type": "check" | "audit", "strategy": "mobile"}`

use crate::error::QueueError;
use crate::store::DEFAULT_STRATEGY;
use serde::{Deserialize, Serialize};

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CheckKind {
    /// 存活检测
    #[default]
    #[serde(rename = "check")]
    Liveness,
    /// 性能审计
    #[serde(rename = "audit")]
    Audit,
}

impl CheckKind {
    /// 线上名称
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Liveness => "check",
            CheckKind::Audit => "audit",
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "check" => Ok(CheckKind::Liveness),
            "audit" => Ok(CheckKind::Audit),
            other => Err(format!("未知的任务类型: {}", other)),
        }
    }
}

fn default_strategy() -> String {
    DEFAULT_STRATEGY.to_string()
}

/// 一条待处理的任务
///
/// 只携带监控项ID，结果在消费时根据监控项当前配置重新计算
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// 监控项ID
    pub monitor_id: i64,
    /// 任务类型，缺省为存活检测
    #[serde(default)]
    pub task_type: CheckKind,
    /// 审计策略，缺省为 mobile
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

impl Task {
    /// 创建存活检测任务
    pub fn check(monitor_id: i64) -> Self {
        Self {
            monitor_id,
            task_type: CheckKind::Liveness,
            strategy: default_strategy(),
        }
    }

    /// 创建审计任务
    pub fn audit(monitor_id: i64, strategy: impl Into<String>) -> Self {
        Self {
            monitor_id,
            task_type: CheckKind::Audit,
            strategy: strategy.into(),
        }
    }

    /// 按类型创建任务
    pub fn new(monitor_id: i64, task_type: CheckKind, strategy: impl Into<String>) -> Self {
        Self {
            monitor_id,
            task_type,
            strategy: strategy.into(),
        }
    }

    /// 编码为线上格式
    pub fn encode(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Publish(e.to_string()))
    }

    /// 从线上格式解码
    pub fn decode(body: &str) -> Result<Self, QueueError> {
        serde_json::from_str(body).map_err(|e| QueueError::Malformed(format!("{}: {}", e, body)))
    }
}
