//! 日志系统模块
//!
//! 提供结构化日志配置和初始化功能。`log` 记录通过 `LogTracer` 桥接到 `tracing`。

use crate::config::GlobalConfig;
use log::LevelFilter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter, Layer};

/// 全局日志初始化状态
#[derive(Debug, Default)]
struct GlobalLoggingState {
    /// 是否已初始化
    initialized: bool,
    /// 当前配置
    current_config: Option<LogConfig>,
}

/// 全局日志状态管理器
static GLOBAL_LOGGING_STATE: OnceLock<Mutex<GlobalLoggingState>> = OnceLock::new();

/// 日志配置结构
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: LevelFilter,
    /// 日志文件路径（可选）
    pub file_path: Option<PathBuf>,
    /// 是否输出到控制台
    pub console: bool,
    /// 是否使用JSON格式
    pub json_format: bool,
    /// 模块级别日志控制
    pub module_levels: HashMap<String, LevelFilter>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file_path: None,
            console: true,
            json_format: false,
            module_levels: HashMap::new(),
        }
    }
}

impl LogConfig {
    /// 根据配置文件中的全局配置构建日志配置
    pub fn from_global(global: &GlobalConfig) -> Self {
        let level = LevelFilter::from_str(&global.log_level).unwrap_or(LevelFilter::Info);
        let mut module_levels = HashMap::new();
        // reqwest/hyper 的调试日志过于冗长
        module_levels.insert("hyper".to_string(), LevelFilter::Warn);
        module_levels.insert("reqwest".to_string(), LevelFilter::Warn);

        Self {
            level,
            file_path: global.log_file.clone(),
            console: global.log_file.is_none(),
            json_format: global.log_json,
            module_levels,
        }
    }
}

/// 日志系统管理器
pub struct LoggingSystem {
    /// 配置
    config: LogConfig,
}

impl LoggingSystem {
    /// 初始化日志系统
    ///
    /// 重复调用是安全的：第二次及之后的调用不会重新安装订阅器
    pub fn setup_logging(config: LogConfig) -> anyhow::Result<Self> {
        let state_mutex =
            GLOBAL_LOGGING_STATE.get_or_init(|| Mutex::new(GlobalLoggingState::default()));

        {
            let state = state_mutex
                .lock()
                .map_err(|_| anyhow::anyhow!("日志状态锁已损坏"))?;
            if state.initialized {
                return Ok(Self { config });
            }
        }

        Self::perform_initialization(&config)?;

        {
            let mut state = state_mutex
                .lock()
                .map_err(|_| anyhow::anyhow!("日志状态锁已损坏"))?;
            state.initialized = true;
            state.current_config = Some(config.clone());
        }

        Ok(Self { config })
    }

    /// 当前实例使用的配置
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// 执行实际的日志系统初始化
    fn perform_initialization(config: &LogConfig) -> anyhow::Result<()> {
        Self::init_log_tracer()?;
        Self::init_tracing_subscriber(config)?;
        Ok(())
    }

    /// 初始化 LogTracer
    fn init_log_tracer() -> anyhow::Result<()> {
        use tracing_log::LogTracer;

        static LOG_TRACER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

        let result = LOG_TRACER_INIT.get_or_init(|| LogTracer::init().map_err(|e| e.to_string()));

        result
            .as_ref()
            .map_err(|e| anyhow::anyhow!("LogTracer初始化失败: {}", e))?;
        Ok(())
    }

    /// 初始化 tracing subscriber
    fn init_tracing_subscriber(config: &LogConfig) -> anyhow::Result<()> {
        let mut env_filter = EnvFilter::from_default_env()
            .add_directive(Self::convert_level_to_directive(config.level));

        for (module, level) in &config.module_levels {
            match format!("{}={}", module, Self::level_to_string(*level)).parse() {
                Ok(directive) => env_filter = env_filter.add_directive(directive),
                Err(e) => eprintln!("忽略无效的模块日志级别 {module}: {e}"),
            }
        }

        let fmt_layer = if config.json_format {
            fmt::layer()
                .json()
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_file(true)
                .with_line_number(true)
                .boxed()
        } else {
            fmt::layer()
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_ansi(true)
                .with_target(true)
                .with_thread_ids(true)
                .boxed()
        };

        let result = match (&config.file_path, config.console) {
            (Some(file_path), false) => {
                if let Some(parent) = file_path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| anyhow::anyhow!("创建日志目录失败: {}", e))?;
                    }
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(file_path)
                    .map_err(|e| anyhow::anyhow!("创建日志文件失败: {}", e))?;
                let file_layer = fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_line_number(true);

                registry().with(env_filter).with(file_layer).try_init()
            }
            _ => registry().with(env_filter).with(fmt_layer).try_init(),
        };

        match result {
            Ok(()) => {
                tracing::debug!("日志系统初始化完成: {:?}", config);
                Ok(())
            }
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("already been set")
                    || error_msg.contains("already initialized")
                {
                    // 测试或嵌入场景下可能已有全局订阅器
                    tracing::debug!("日志系统已经初始化过了");
                    Ok(())
                } else {
                    Err(anyhow::anyhow!(
                        "tracing subscriber初始化失败: {}",
                        error_msg
                    ))
                }
            }
        }
    }

    /// 将 log::LevelFilter 转换为 tracing 的指令
    fn convert_level_to_directive(level: LevelFilter) -> tracing_subscriber::filter::Directive {
        use tracing_subscriber::filter::{Directive, LevelFilter as TracingLevel};
        match level {
            LevelFilter::Off => Directive::from(TracingLevel::OFF),
            LevelFilter::Error => Directive::from(tracing::Level::ERROR),
            LevelFilter::Warn => Directive::from(tracing::Level::WARN),
            LevelFilter::Info => Directive::from(tracing::Level::INFO),
            LevelFilter::Debug => Directive::from(tracing::Level::DEBUG),
            LevelFilter::Trace => Directive::from(tracing::Level::TRACE),
        }
    }

    /// 将 log::LevelFilter 转换为字符串
    fn level_to_string(level: LevelFilter) -> &'static str {
        match level {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        }
    }

    /// 检查日志系统是否已初始化
    pub fn is_initialized() -> bool {
        GLOBAL_LOGGING_STATE
            .get()
            .and_then(|state| state.lock().ok().map(|s| s.initialized))
            .unwrap_or(false)
    }

    /// 获取当前日志配置（如果已初始化）
    pub fn current_config() -> Option<LogConfig> {
        GLOBAL_LOGGING_STATE
            .get()
            .and_then(|state| state.lock().ok().and_then(|s| s.current_config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_from_global() {
        let global = GlobalConfig {
            log_level: "debug".to_string(),
            log_json: true,
            log_file: Some(PathBuf::from("/tmp/site-vitals.log")),
        };

        let config = LogConfig::from_global(&global);
        assert_eq!(config.level, LevelFilter::Debug);
        assert!(config.json_format);
        assert!(!config.console);
        assert_eq!(
            config.module_levels.get("reqwest"),
            Some(&LevelFilter::Warn)
        );
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let global = GlobalConfig {
            log_level: "chatty".to_string(),
            ..GlobalConfig::default()
        };
        assert_eq!(LogConfig::from_global(&global).level, LevelFilter::Info);
    }

    #[test]
    fn test_setup_logging_is_idempotent() {
        let first = LoggingSystem::setup_logging(LogConfig::default());
        assert!(first.is_ok());
        assert!(LoggingSystem::is_initialized());

        let mut json = LogConfig::default();
        json.json_format = true;
        let second = LoggingSystem::setup_logging(json);
        assert!(second.is_ok());
        assert!(second.unwrap().config().json_format);
        assert!(LoggingSystem::current_config().is_some());
    }

    #[test]
    fn test_level_to_string() {
        assert_eq!(LoggingSystem::level_to_string(LevelFilter::Warn), "warn");
        assert_eq!(LoggingSystem::level_to_string(LevelFilter::Off), "off");
    }
}
