//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑

use crate::cli::args::{clamp_history_limit, Args, Commands, OutputFormat};
use crate::config::{Config, ConfigLoader, TomlConfigLoader};
use crate::core::batch::{run_checks, run_single_check};
use crate::core::service::ServiceLauncher;
use crate::store::{CheckResult, Monitor, MonitorStore, NewMonitor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

/// 配置文件模板
pub const CONFIG_TEMPLATE: &str = include_str!("../../templates/config.toml");

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 根据子命令选择处理器
pub fn command_for(command: &Commands) -> Box<dyn Command> {
    match command {
        Commands::Producer => Box::new(ProducerCommand),
        Commands::Worker => Box::new(WorkerCommand),
        Commands::RunOnce => Box::new(RunOnceCommand),
        Commands::Trigger { .. } => Box::new(TriggerCommand),
        Commands::Check { .. } => Box::new(CheckCommand),
        Commands::Add { .. } => Box::new(AddCommand),
        Commands::List { .. } => Box::new(ListCommand),
        Commands::History { .. } => Box::new(HistoryCommand),
        Commands::Init { .. } => Box::new(InitCommand),
        Commands::Validate { .. } => Box::new(ValidateCommand),
        Commands::Version { .. } => Box::new(VersionCommand),
    }
}

/// 生产者命令
pub struct ProducerCommand;

#[async_trait]
impl Command for ProducerCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let config = ServiceLauncher::load_and_validate_config(args).await?;
        let components = ServiceLauncher::initialize_components(config)?;
        let producer = ServiceLauncher::build_producer(&components).await?;

        let (_shutdown_tx, shutdown_rx) = ServiceLauncher::shutdown_channel();
        producer.run(shutdown_rx).await?;
        info!("生产者已停止");
        Ok(())
    }
}

/// 消费者命令
pub struct WorkerCommand;

#[async_trait]
impl Command for WorkerCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let config = ServiceLauncher::load_and_validate_config(args).await?;
        let components = ServiceLauncher::initialize_components(config)?;
        let worker = ServiceLauncher::build_worker(&components).await?;

        let (_shutdown_tx, shutdown_rx) = ServiceLauncher::shutdown_channel();
        worker.run(shutdown_rx).await.context("Worker 异常退出")?;
        info!("Worker 已停止");
        Ok(())
    }
}

/// 立即投递命令
pub struct RunOnceCommand;

#[async_trait]
impl Command for RunOnceCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let config = ServiceLauncher::load_and_validate_config(args).await?;
        let components = ServiceLauncher::initialize_components(config)?;
        let producer = ServiceLauncher::build_producer(&components).await?;

        let count = producer.run_once().await?;
        println!("已为 {} 个监控项投递检测和审计任务", count);
        Ok(())
    }
}

/// 手动触发命令
pub struct TriggerCommand;

#[async_trait]
impl Command for TriggerCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Trigger {
            monitor_id,
            task_type,
            strategy,
        } = &args.command
        {
            let config = ServiceLauncher::load_and_validate_config(args).await?;
            let components = ServiceLauncher::initialize_components(config)?;
            let producer = ServiceLauncher::build_producer(&components).await?;

            let task = producer
                .trigger(*monitor_id, (*task_type).into(), strategy.clone())
                .await?;
            println!(
                "已投递 {} 任务：监控项 {}，策略 {}",
                task.task_type, task.monitor_id, task.strategy
            );
        }
        Ok(())
    }
}

/// 直接检测命令
pub struct CheckCommand;

#[async_trait]
impl Command for CheckCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Check { monitor_id, format } = &args.command {
            let config = ServiceLauncher::load_and_validate_config(args).await?;
            let components = ServiceLauncher::initialize_components(config)?;
            let prober = ServiceLauncher::build_prober(&components.config);
            let store = components.store.as_ref();

            let results = match monitor_id {
                Some(id) => vec![run_single_check(store, &prober, *id).await?],
                None => {
                    run_checks(
                        store,
                        &prober,
                        components.config.worker.max_concurrent_checks,
                    )
                    .await?
                }
            };

            if results.is_empty() {
                eprintln!("没有需要检测的监控项");
                return Ok(());
            }
            print!("{}", render_checks(&results, *format)?);
        }
        Ok(())
    }
}

/// 新增监控项命令
pub struct AddCommand;

#[async_trait]
impl Command for AddCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Add {
            name,
            url,
            timeout,
            retries,
            strategy,
            no_enqueue,
        } = &args.command
        {
            let config = ServiceLauncher::load_and_validate_config(args).await?;
            let new_monitor = validated_monitor(
                NewMonitor::new(name.as_str(), url.as_str())
                    .with_timeout_seconds(*timeout)
                    .with_retry_count(*retries)
                    .with_strategy(strategy.as_str()),
                &config,
            )?;
            let components = ServiceLauncher::initialize_components(config)?;

            let monitor = components.store.create_monitor(new_monitor).await?;
            println!("已创建监控项 {}: {} ({})", monitor.id, monitor.name, monitor.url);

            if !no_enqueue {
                // 首次检测投递失败不影响创建结果
                match ServiceLauncher::build_producer(&components).await {
                    Ok(producer) => producer.enqueue_monitor(&monitor).await,
                    Err(e) => error!("投递监控项 {} 的首次检测失败: {:#}", monitor.id, e),
                }
            }
        }
        Ok(())
    }
}

/// 按队列租约和探测退避校验新监控项
fn validated_monitor(monitor: NewMonitor, config: &Config) -> Result<NewMonitor> {
    monitor
        .validate(
            config.queue.lease(),
            Duration::from_millis(config.worker.retry_backoff_ms),
        )
        .map_err(|e| anyhow::anyhow!("监控项参数无效: {}", e))?;
    Ok(monitor)
}

/// 列出监控项命令
pub struct ListCommand;

#[async_trait]
impl Command for ListCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::List { format } = &args.command {
            let config = ServiceLauncher::load_and_validate_config(args).await?;
            let components = ServiceLauncher::initialize_components(config)?;

            let monitors = components.store.list_monitors().await?;
            if monitors.is_empty() && *format != OutputFormat::Json {
                println!("尚未添加任何监控项");
                return Ok(());
            }
            print!("{}", render_monitors(&monitors, *format)?);
        }
        Ok(())
    }
}

/// 检测历史命令
pub struct HistoryCommand;

#[async_trait]
impl Command for HistoryCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::History {
            monitor_id,
            limit,
            format,
        } = &args.command
        {
            let config = ServiceLauncher::load_and_validate_config(args).await?;
            let components = ServiceLauncher::initialize_components(config)?;

            let checks = components
                .store
                .recent_checks(*monitor_id, clamp_history_limit(*limit))
                .await?;
            print!("{}", render_checks(&checks, *format)?);
        }
        Ok(())
    }
}

/// 初始化命令
pub struct InitCommand;

#[async_trait]
impl Command for InitCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Init { config_path, force } = &args.command {
            self.create_config_file(config_path, *force).await
        } else {
            Ok(())
        }
    }
}

impl InitCommand {
    /// 创建配置文件
    async fn create_config_file(&self, config_path: &Path, force: bool) -> Result<()> {
        // 检查文件是否已存在
        if config_path.exists() && !force {
            eprintln!("配置文件已存在: {}", config_path.display());
            eprintln!("使用 --force 参数覆盖现有文件");
            return Ok(());
        }

        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::write(config_path, CONFIG_TEMPLATE).await?;

        println!("配置文件已创建: {}", config_path.display());
        Ok(())
    }
}

/// 验证命令
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Validate {
            config_path,
            verbose,
        } = &args.command
        {
            let config_file = config_path
                .clone()
                .unwrap_or_else(|| args.get_config_path());

            self.validate_config_file(&config_file, *verbose).await
        } else {
            Ok(())
        }
    }
}

impl ValidateCommand {
    /// 验证配置文件
    async fn validate_config_file(&self, config_path: &Path, verbose: bool) -> Result<()> {
        println!("验证配置文件: {}", config_path.display());

        let loader = TomlConfigLoader::new(true);
        let config = loader.load_from_file(config_path).await?;

        println!("✓ 配置文件验证通过");
        if verbose {
            println!("数据库: {}", config.database.path.display());
            println!("队列: {}", config.queue.name);
            println!(
                "投递周期: 检测 {}秒 / 审计 {}秒",
                config.producer.check_interval_seconds, config.producer.audit_interval_seconds
            );
            println!(
                "熔断器: 连续 {} 次失败后打开，{}秒后试探",
                config.worker.failure_threshold, config.worker.recovery_timeout_seconds
            );
            println!(
                "审计: {} (密钥{})",
                config.audit.api_url,
                if config.audit.api_key.is_some() { "已配置" } else { "未配置" }
            );
            println!(
                "通知: {}",
                if config.notification.enabled {
                    config.notification.api_url.as_str()
                } else {
                    "已禁用"
                }
            );
        }

        Ok(())
    }
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Version { format } = &args.command {
            match format {
                OutputFormat::Json => {
                    let version_info = serde_json::json!({
                        "name": crate::APP_NAME,
                        "version": crate::VERSION,
                        "description": crate::APP_DESCRIPTION
                    });
                    println!("{}", serde_json::to_string_pretty(&version_info)?);
                }
                _ => {
                    println!("{} v{}", crate::APP_NAME, crate::VERSION);
                    println!("{}", crate::APP_DESCRIPTION);
                }
            }
        }
        Ok(())
    }
}

fn format_status(status: Option<bool>) -> &'static str {
    match status {
        Some(true) => "UP",
        Some(false) => "DOWN",
        None => "-",
    }
}

fn format_optional<T: std::fmt::Display>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// 渲染监控项列表
pub fn render_monitors(monitors: &[Monitor], format: OutputFormat) -> Result<String> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(monitors)?)?;
        }
        OutputFormat::Table => {
            writeln!(
                out,
                "{:<6} {:<20} {:<40} {:<6} {:<8} {:<10} {:<8}",
                "ID", "名称", "地址", "状态", "可用率", "平均响应", "性能分"
            )?;
            writeln!(out, "{}", "-".repeat(104))?;
            for m in monitors {
                writeln!(
                    out,
                    "{:<6} {:<20} {:<40} {:<6} {:<8} {:<10} {:<8}",
                    m.id,
                    m.name,
                    m.url,
                    if m.is_active { format_status(m.stats.last_status) } else { "OFF" },
                    format!("{:.2}%", m.stats.uptime_percentage),
                    format_optional(m.stats.avg_response_ms.map(|ms| format!("{}ms", ms))),
                    format_optional(m.audit.as_ref().and_then(|a| a.perf_score)),
                )?;
            }
        }
        OutputFormat::Text => {
            for m in monitors {
                let icon = match m.stats.last_status {
                    Some(true) => "✓",
                    Some(false) => "✗",
                    None => "·",
                };
                writeln!(
                    out,
                    "{} [{}] {} ({}) - {} - 可用率 {:.2}% ({} 次检测)",
                    icon,
                    m.id,
                    m.name,
                    m.url,
                    format_status(m.stats.last_status),
                    m.stats.uptime_percentage,
                    m.stats.total_checks
                )?;
                if !m.is_active {
                    writeln!(out, "  已停用")?;
                }
            }
        }
    }
    Ok(out)
}

/// 渲染检测记录
pub fn render_checks(checks: &[CheckResult], format: OutputFormat) -> Result<String> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(checks)?)?;
        }
        OutputFormat::Table => {
            writeln!(
                out,
                "{:<26} {:<8} {:<6} {:<6} {:<10} {:<30}",
                "检测时间", "监控项", "状态", "状态码", "响应时间", "错误信息"
            )?;
            writeln!(out, "{}", "-".repeat(90))?;
            for c in checks {
                writeln!(
                    out,
                    "{:<26} {:<8} {:<6} {:<6} {:<10} {:<30}",
                    c.checked_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                    c.monitor_id,
                    format_status(Some(c.is_up)),
                    format_optional(c.status_code),
                    format!("{}ms", c.response_ms),
                    c.error.as_deref().unwrap_or("")
                )?;
            }
        }
        OutputFormat::Text => {
            for c in checks {
                writeln!(
                    out,
                    "{} 监控项 {} - {} ({}) - {}ms",
                    if c.is_up { "✓" } else { "✗" },
                    c.monitor_id,
                    format_status(Some(c.is_up)),
                    format_optional(c.status_code),
                    c.response_ms
                )?;
                if c.retry_attempts > 0 {
                    writeln!(out, "  重试: {} 次", c.retry_attempts)?;
                }
                if let Some(error) = &c.error {
                    writeln!(out, "  错误: {}", error)?;
                }
            }
        }
    }
    Ok(out)
}
