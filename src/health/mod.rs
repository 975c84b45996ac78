//! 存活检测模块
//!
//! 提供HTTP存活探测、并发批量探测和按监控项隔离的熔断器

pub mod breaker;
pub mod checker;
pub mod result;

// 重新导出主要类型
pub use breaker::{BreakerPolicy, BreakerRegistry, CircuitBreaker, CircuitState};
pub use checker::{probe_batch, probe_budget, HttpProbeExecutor, ProbeExecutor};
pub use result::{is_up_status, ProbeOutcome, ProbeTarget};
