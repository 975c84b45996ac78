//! 监控项滚动统计
//!
//! 每条持久化的检测结果恰好折叠进统计一次，与结果写入处于同一事务中

use crate::audit::report::round_to;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 新样本在指数移动平均中的权重
pub const EMA_SAMPLE_WEIGHT: f64 = 0.2;

/// 监控项的滚动统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorStats {
    /// 总检测次数
    pub total_checks: i64,
    /// 成功次数
    pub successful_checks: i64,
    /// 可用率（百分比，两位小数）
    pub uptime_percentage: f64,
    /// 响应时间的指数移动平均（毫秒），只由成功样本更新
    pub avg_response_ms: Option<i64>,
    /// 最近一次检测是否可用
    pub last_status: Option<bool>,
    /// 最近一次检测时间
    pub last_check_at: Option<DateTime<Utc>>,
}

/// 计算可用率
pub fn uptime_percentage(successful: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    round_to(successful as f64 / total as f64 * 100.0, 2)
}

/// 把一个响应时间样本折叠进移动平均
pub fn next_average(previous: Option<i64>, sample_ms: u64) -> i64 {
    match previous {
        None => sample_ms as i64,
        Some(old) => {
            (old as f64 * (1.0 - EMA_SAMPLE_WEIGHT) + sample_ms as f64 * EMA_SAMPLE_WEIGHT).round()
                as i64
        }
    }
}

impl MonitorStats {
    /// 应用一次检测结果
    ///
    /// # 参数
    /// * `is_up` - 站点是否可用
    /// * `response_ms` - 响应时间，只有可用时才参与平均
    /// * `now` - 检测时间
    pub fn apply(&mut self, is_up: bool, response_ms: Option<u64>, now: DateTime<Utc>) {
        self.total_checks += 1;
        if is_up {
            self.successful_checks += 1;
        }
        self.uptime_percentage = uptime_percentage(self.successful_checks, self.total_checks);

        if is_up {
            if let Some(sample) = response_ms {
                self.avg_response_ms = Some(next_average(self.avg_response_ms, sample));
            }
        }

        self.last_status = Some(is_up);
        self.last_check_at = Some(now);
    }
}
