//! 性能审计模块
//!
//! 调用外部性能审计API并把响应归一化为评分记录

pub mod client;
pub mod report;

pub use client::{audit_budget, backoff_schedule, normalize_url, AuditExecutor, PageSpeedClient};
pub use report::{parse_report, AuditFinding, AuditReport, FilmstripFrame};
