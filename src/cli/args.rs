//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use crate::queue::CheckKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// 单次查询允许的检测记录条数范围
pub const HISTORY_LIMIT_RANGE: (u32, u32) = (1, 500);

/// Site Vitals - 队列驱动的网站存活与性能监控
#[derive(Parser, Debug, Clone)]
#[command(
    name = "site-vitals",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径",
        env = "SITE_VITALS_CONFIG"
    )]
    pub config: Option<PathBuf>,

    /// 日志级别，未指定时使用配置文件中的级别
    #[arg(
        short,
        long,
        value_enum,
        help = "日志级别",
        env = "SITE_VITALS_LOG_LEVEL"
    )]
    pub log_level: Option<LogLevel>,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    /// 跟踪级别
    Trace,
    /// 调试级别
    Debug,
    /// 信息级别
    Info,
    /// 警告级别
    Warn,
    /// 错误级别
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// 命令行中的任务类型
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum TaskTypeArg {
    /// 存活检测
    Check,
    /// 性能审计
    Audit,
}

impl From<TaskTypeArg> for CheckKind {
    fn from(value: TaskTypeArg) -> Self {
        match value {
            TaskTypeArg::Check => CheckKind::Liveness,
            TaskTypeArg::Audit => CheckKind::Audit,
        }
    }
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 运行生产者，周期性投递检测和审计任务
    Producer,

    /// 运行消费者，处理队列中的任务
    Worker,

    /// 立即为所有启用中的监控项投递检测和审计任务
    RunOnce,

    /// 手动为单个监控项投递任务
    Trigger {
        /// 监控项ID
        #[arg(value_name = "ID", help = "监控项ID")]
        monitor_id: i64,

        /// 任务类型
        #[arg(short, long, value_enum, default_value = "audit", help = "任务类型")]
        task_type: TaskTypeArg,

        /// 审计策略
        #[arg(short, long, help = "审计策略（mobile 或 desktop）")]
        strategy: Option<String>,
    },

    /// 直接执行存活检测并保存结果
    Check {
        /// 监控项ID（可选，不指定则检测所有启用中的监控项）
        #[arg(value_name = "ID", help = "监控项ID")]
        monitor_id: Option<i64>,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },

    /// 新增监控项
    Add {
        /// 名称
        #[arg(value_name = "NAME", help = "监控项名称")]
        name: String,

        /// 地址
        #[arg(value_name = "URL", help = "监控地址")]
        url: String,

        /// 单次探测超时（秒）
        #[arg(
            long,
            default_value = "10",
            value_parser = clap::value_parser!(i64).range(1..),
            help = "单次探测超时（秒）"
        )]
        timeout: i64,

        /// 首次之外的重试次数
        #[arg(
            long,
            default_value = "2",
            value_parser = clap::value_parser!(i64).range(0..),
            help = "重试次数"
        )]
        retries: i64,

        /// 审计策略
        #[arg(long, default_value = crate::store::DEFAULT_STRATEGY, help = "审计策略")]
        strategy: String,

        /// 不立即投递首次检测
        #[arg(long, help = "不立即投递首次检测和审计")]
        no_enqueue: bool,
    },

    /// 列出监控项
    List {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "table", help = "输出格式")]
        format: OutputFormat,
    },

    /// 查看检测历史
    History {
        /// 监控项ID
        #[arg(value_name = "ID", help = "监控项ID")]
        monitor_id: i64,

        /// 条数（1-500）
        #[arg(short = 'n', long, default_value = "50", help = "返回条数（1-500）")]
        limit: i64,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "table", help = "输出格式")]
        format: OutputFormat,
    },

    /// 初始化配置文件
    Init {
        /// 配置文件路径
        #[arg(
            value_name = "FILE",
            help = "配置文件路径",
            default_value = "config.toml"
        )]
        config_path: PathBuf,

        /// 是否覆盖现有文件
        #[arg(short, long, help = "覆盖现有文件")]
        force: bool,
    },

    /// 验证配置文件
    Validate {
        /// 配置文件路径
        #[arg(value_name = "FILE", help = "配置文件路径")]
        config_path: Option<PathBuf>,

        /// 是否显示详细信息
        #[arg(short, long, help = "显示详细信息")]
        verbose: bool,
    },

    /// 显示版本信息
    Version {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },
}

/// 输出格式枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum OutputFormat {
    /// 文本格式
    Text,
    /// JSON格式
    Json,
    /// 表格格式
    Table,
}

impl Args {
    /// 获取配置文件路径
    pub fn get_config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::get_default_config_path)
    }
}

/// 把历史记录条数限制在允许范围内
pub fn clamp_history_limit(limit: i64) -> u32 {
    let (min, max) = HISTORY_LIMIT_RANGE;
    limit.clamp(i64::from(min), i64::from(max)) as u32
}
