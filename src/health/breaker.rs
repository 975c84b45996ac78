//! 按监控项隔离的熔断器
//!
//! # 状态
//! - Closed: 正常放行
//! - Open: 连续失败达到阈值，直接拒绝调用
//! - HalfOpen: 恢复等待结束，只放行一次试探调用
//!
//! # 状态转换
//! ```text
//! Closed → Open: 连续失败次数 >= failure_threshold
//! Open → HalfOpen: 打开后经过 recovery_timeout
//! HalfOpen → Closed: 试探调用成功
//! HalfOpen → Open: 试探调用失败，重新计时
//! ```
//!
//! 每个监控项拥有独立的熔断器，一个站点宕机不会拖累其他站点。

use crate::config::WorkerConfig;
use crate::error::BreakerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// 关闭，正常放行
    Closed,
    /// 打开，拒绝调用
    Open,
    /// 半开，等待试探结果
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "关闭"),
            CircuitState::Open => write!(f, "打开"),
            CircuitState::HalfOpen => write!(f, "半开"),
        }
    }
}

/// 熔断策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// 连续失败阈值
    pub failure_threshold: u32,
    /// 打开后到允许试探的等待时间
    pub recovery_timeout: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&WorkerConfig> for BreakerPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(config.recovery_timeout_seconds),
        }
    }
}

/// 单个监控项的熔断器
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// 半开状态下在途试探的开始时间
    trial_started_at: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_started_at: None,
        }
    }
}

impl CircuitBreaker {
    /// 当前状态
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// 连续失败次数
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// 申请一次调用许可
    ///
    /// # 返回
    /// * `bool` - 是否允许调用
    pub fn try_acquire(&mut self, policy: &BreakerPolicy, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|opened| now.saturating_duration_since(opened))
                    .unwrap_or(policy.recovery_timeout);
                if elapsed >= policy.recovery_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.trial_started_at = Some(now);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => match self.trial_started_at {
                // 试探调用没有回报结果（例如异常退出）时，超过恢复时间后允许新的试探
                Some(started)
                    if now.saturating_duration_since(started) < policy.recovery_timeout =>
                {
                    false
                }
                _ => {
                    self.trial_started_at = Some(now);
                    true
                }
            },
        }
    }

    /// 记录一次成功调用
    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_started_at = None;
    }

    /// 记录一次失败调用
    pub fn record_failure(&mut self, policy: &BreakerPolicy, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            CircuitState::HalfOpen => self.open(now),
            CircuitState::Closed if self.consecutive_failures >= policy.failure_threshold => {
                self.open(now)
            }
            CircuitState::Closed => {}
            // 打开前已放行的调用返回失败时重新计时
            CircuitState::Open => self.opened_at = Some(now),
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_started_at = None;
    }
}

/// 熔断器注册表，按监控项ID维护独立熔断器
#[derive(Debug)]
pub struct BreakerRegistry {
    policy: BreakerPolicy,
    breakers: Mutex<HashMap<i64, CircuitBreaker>>,
}

impl BreakerRegistry {
    /// 创建新的注册表
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// 熔断策略
    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    fn with_breaker<R>(&self, monitor_id: i64, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        // 锁只在同步代码中持有，中毒时继续使用内部数据
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(breakers.entry(monitor_id).or_default())
    }

    /// 在指定时刻申请调用许可
    pub fn try_acquire_at(&self, monitor_id: i64, now: Instant) -> Result<(), BreakerError> {
        let policy = self.policy;
        let allowed = self.with_breaker(monitor_id, |breaker| breaker.try_acquire(&policy, now));
        if allowed {
            Ok(())
        } else {
            Err(BreakerError::Open { monitor_id })
        }
    }

    /// 申请调用许可
    pub fn try_acquire(&self, monitor_id: i64) -> Result<(), BreakerError> {
        self.try_acquire_at(monitor_id, Instant::now())
    }

    /// 记录成功
    pub fn record_success(&self, monitor_id: i64) {
        let before = self.with_breaker(monitor_id, |breaker| {
            let before = breaker.state();
            breaker.record_success();
            before
        });
        if before != CircuitState::Closed {
            tracing::info!("监控项 {} 的熔断器已恢复关闭", monitor_id);
        }
    }

    /// 在指定时刻记录失败
    pub fn record_failure_at(&self, monitor_id: i64, now: Instant) {
        let policy = self.policy;
        let (before, after) = self.with_breaker(monitor_id, |breaker| {
            let before = breaker.state();
            breaker.record_failure(&policy, now);
            (before, breaker.state())
        });
        if before != CircuitState::Open && after == CircuitState::Open {
            tracing::warn!(
                "监控项 {} 的熔断器已打开，{} 秒内拒绝检测",
                monitor_id,
                policy.recovery_timeout.as_secs()
            );
        }
    }

    /// 记录失败
    pub fn record_failure(&self, monitor_id: i64) {
        self.record_failure_at(monitor_id, Instant::now())
    }

    /// 查询监控项的熔断状态，未出现过的监控项视为关闭
    pub fn state_of(&self, monitor_id: i64) -> CircuitState {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .get(&monitor_id)
            .map(CircuitBreaker::state)
            .unwrap_or(CircuitState::Closed)
    }

    /// 通过熔断器执行调用
    ///
    /// 熔断器打开时不会执行 `operation`，直接返回 [`BreakerError::Open`]。
    ///
    /// # 参数
    /// * `monitor_id` - 监控项ID
    /// * `operation` - 被保护的调用
    /// * `is_failure` - 判断调用结果是否算作失败
    pub async fn call<T, F, Fut>(
        &self,
        monitor_id: i64,
        operation: F,
        is_failure: impl Fn(&T) -> bool,
    ) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.try_acquire(monitor_id)?;

        let value = operation().await;
        if is_failure(&value) {
            self.record_failure(monitor_id);
        } else {
            self.record_success(monitor_id);
        }
        Ok(value)
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerPolicy::default())
    }
}
