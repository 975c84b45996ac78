//! 通知模块
//!
//! 把检测和审计事件推送到外部实时通道与进程内订阅者

pub mod broadcast;
pub mod sender;

// 重新导出主要类型
pub use broadcast::{HttpBroadcastSender, BROADCAST_PATH};
pub use sender::{
    spawn_event_log, ChannelSender, MonitorEvent, NotificationHub, NotificationSender,
};

use crate::config::NotificationConfig;
use std::sync::Arc;

/// 进程内事件通道的缓冲容量
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 根据配置构建外部订阅者列表
///
/// 外部广播被禁用时返回空列表
pub fn hub_from_config(config: &NotificationConfig) -> anyhow::Result<NotificationHub> {
    let mut hub = NotificationHub::new();
    if config.enabled {
        hub = hub.with_sender(Arc::new(HttpBroadcastSender::new(config)?));
    }
    Ok(hub)
}
