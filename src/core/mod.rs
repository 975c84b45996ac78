//! 核心模块
//!
//! 任务生产者、消费者、直接检测以及组件组装

pub mod app;
pub mod batch;
pub mod producer;
pub mod service;
pub mod worker;

// 重新导出主要类型
pub use app::execute_command;
pub use batch::{run_checks, run_single_check};
pub use producer::Producer;
pub use service::{ServiceComponents, ServiceLauncher};
pub use worker::{connect_with_retry, TaskOutcome, Worker};
