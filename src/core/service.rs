//! 服务组装模块
//!
//! 负责加载配置、打开存储和队列，并把各组件组装成生产者或消费者

use crate::audit::PageSpeedClient;
use crate::cli::args::Args;
use crate::config::{Config, ConfigLoader, TomlConfigLoader};
use crate::core::producer::Producer;
use crate::core::worker::{connect_with_retry, Worker};
use crate::error::{ConfigError, SiteVitalsError};
use crate::health::{BreakerPolicy, BreakerRegistry, HttpProbeExecutor};
use crate::notification::{self, ChannelSender};
use crate::queue::SqliteQueue;
use crate::store::SqliteStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 服务组件
pub struct ServiceComponents {
    /// 已验证的配置
    pub config: Config,
    /// 监控项存储
    pub store: Arc<SqliteStore>,
}

/// 服务启动器
pub struct ServiceLauncher;

impl ServiceLauncher {
    /// 加载和验证配置
    ///
    /// 未通过 `--config` 指定且默认位置没有配置文件时使用内置默认值
    pub async fn load_and_validate_config(args: &Args) -> Result<Config> {
        let config_path = args.get_config_path();
        let loader = TomlConfigLoader::new(true);

        match loader.load_from_file(&config_path).await {
            Ok(config) => Ok(config),
            Err(SiteVitalsError::Config(ConfigError::FileNotFound { path })) if args.config.is_none() => {
                warn!("配置文件 {} 不存在，使用默认配置", path);
                loader
                    .load_from_string("")
                    .await
                    .context("加载默认配置失败")
            }
            Err(e) => Err(e).with_context(|| format!("加载配置文件失败: {}", config_path.display())),
        }
    }

    /// 打开存储
    pub fn initialize_components(config: Config) -> Result<ServiceComponents> {
        info!("打开数据库: {}", config.database.path.display());
        let store = SqliteStore::open(&config.database.path).context("打开数据库失败")?;
        Ok(ServiceComponents {
            config,
            store: Arc::new(store),
        })
    }

    /// 连接任务队列，失败时按固定间隔重试
    pub async fn connect_queue(config: &Config) -> Result<Arc<SqliteQueue>> {
        info!("连接任务队列 {}...", config.queue.name);
        let queue = connect_with_retry(
            config.queue.connect_attempts,
            Duration::from_secs(config.queue.connect_retry_delay_seconds),
            || SqliteQueue::open(&config.database.path, &config.queue),
        )
        .await
        .context("无法连接到任务队列")?;
        Ok(Arc::new(queue))
    }

    /// 组装生产者
    pub async fn build_producer(components: &ServiceComponents) -> Result<Producer> {
        let queue = Self::connect_queue(&components.config).await?;
        Ok(Producer::new(
            components.store.clone(),
            queue,
            &components.config.producer,
        ))
    }

    /// 探测执行器
    pub fn build_prober(config: &Config) -> HttpProbeExecutor {
        HttpProbeExecutor::new(config.worker.verify_ssl)
            .with_retry_backoff(Duration::from_millis(config.worker.retry_backoff_ms))
    }

    /// 组装消费者
    pub async fn build_worker(components: &ServiceComponents) -> Result<Worker> {
        let config = &components.config;
        let queue = Self::connect_queue(config).await?;
        let auditor = PageSpeedClient::new(&config.audit).context("创建审计客户端失败")?;
        let events = ChannelSender::new(notification::EVENT_CHANNEL_CAPACITY);
        notification::spawn_event_log(events.subscribe());
        let hub =
            notification::hub_from_config(&config.notification)?.with_sender(Arc::new(events));

        Ok(Worker::new(
            components.store.clone(),
            queue,
            Arc::new(Self::build_prober(config)),
            Arc::new(auditor),
        )
        .with_breakers(BreakerRegistry::new(BreakerPolicy::from(&config.worker)))
        .with_hub(hub)
        .with_poll_interval(config.queue.poll_interval())
        .with_fetch_retry(
            config.queue.connect_attempts,
            Duration::from_secs(config.queue.connect_retry_delay_seconds),
        ))
    }

    /// 创建关闭信号通道，Ctrl+C 时广播关闭
    pub fn shutdown_channel() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("收到中断信号，正在停止服务...");
                    let _ = tx.send(());
                }
                Err(err) => {
                    error!("监听中断信号失败: {}", err);
                }
            }
        });

        (shutdown_tx, shutdown_rx)
    }
}
