//! 应用程序核心逻辑
//!
//! 包含主函数、日志初始化和命令执行

use crate::cli::args::{Args, Commands};
use crate::cli::commands::command_for;
use crate::core::service::ServiceLauncher;
use crate::logging::{LogConfig, LoggingSystem};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

/// 应用程序主函数
pub async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    let _logging_system =
        LoggingSystem::setup_logging(log_config_for(&args).await).context("初始化日志系统失败")?;

    info!("Site Vitals v{} 启动", crate::VERSION);

    // 执行命令
    if let Err(e) = execute_command(&args).await {
        error!("命令执行失败: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// 根据命令行和配置文件确定日志配置
///
/// 命令行级别优先；不需要配置文件的命令不读取配置
async fn log_config_for(args: &Args) -> LogConfig {
    let mut log_config = match &args.command {
        Commands::Init { .. } | Commands::Version { .. } | Commands::Validate { .. } => {
            LogConfig::default()
        }
        _ => ServiceLauncher::load_and_validate_config(args)
            .await
            .map(|config| LogConfig::from_global(&config.global))
            .unwrap_or_default(),
    };

    if let Some(level) = args.log_level {
        log_config.level = level.into();
    }
    log_config
}

/// 执行CLI命令
pub async fn execute_command(args: &Args) -> Result<()> {
    command_for(&args.command).execute(args).await
}
