//! 实时广播通知
//!
//! 把事件 POST 到外部服务的 `/api/v1/internal/broadcast` 接口

use crate::config::NotificationConfig;
use crate::notification::sender::{MonitorEvent, NotificationSender};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// 广播接口路径
pub const BROADCAST_PATH: &str = "/api/v1/internal/broadcast";

/// HTTP 广播发送器
pub struct HttpBroadcastSender {
    /// HTTP客户端
    client: Client,
    /// 完整的广播地址
    endpoint: String,
    /// 检测事件超时
    check_timeout: Duration,
    /// 审计事件超时
    audit_timeout: Duration,
}

impl HttpBroadcastSender {
    /// 根据配置创建发送器
    ///
    /// # 参数
    /// * `config` - 通知配置
    ///
    /// # 返回
    /// * `Result<Self>` - 发送器实例
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()
            .context("创建HTTP客户端失败")?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", config.api_url.trim_end_matches('/'), BROADCAST_PATH),
            check_timeout: Duration::from_millis(config.check_timeout_ms),
            audit_timeout: Duration::from_millis(config.audit_timeout_ms),
        })
    }

    /// 广播地址
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn timeout_for(&self, event: &MonitorEvent) -> Duration {
        if event.is_audit() {
            self.audit_timeout
        } else {
            self.check_timeout
        }
    }
}

#[async_trait]
impl NotificationSender for HttpBroadcastSender {
    async fn send_event(&self, event: &MonitorEvent) -> Result<()> {
        debug!("广播事件 {} (监控项 {})", event.name(), event.monitor_id());

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout_for(event))
            .json(event)
            .send()
            .await
            .context("发送广播请求失败")?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("广播接口返回错误: {}", response.status()))
        }
    }

    fn name(&self) -> &str {
        "http-broadcast"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn config(api_url: String) -> NotificationConfig {
        NotificationConfig {
            enabled: true,
            api_url,
            check_timeout_ms: 2000,
            audit_timeout_ms: 5000,
        }
    }

    #[test]
    fn test_endpoint_and_timeouts() {
        let sender = HttpBroadcastSender::new(&config("http://api:8000/".to_string())).unwrap();
        assert_eq!(sender.endpoint(), "http://api:8000/api/v1/internal/broadcast");

        let check = MonitorEvent::CheckFinished {
            monitor_id: 1,
            is_up: true,
        };
        let audit = MonitorEvent::AuditFailed {
            monitor_id: 1,
            error: "boom".to_string(),
        };
        assert_eq!(sender.timeout_for(&check), Duration::from_secs(2));
        assert_eq!(sender.timeout_for(&audit), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_posts_event_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", BROADCAST_PATH)
            .match_body(Matcher::Json(json!({
                "event": "check_finished",
                "monitor_id": 3,
                "is_up": false
            })))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let sender = HttpBroadcastSender::new(&config(server.url())).unwrap();
        sender
            .send_event(&MonitorEvent::CheckFinished {
                monitor_id: 3,
                is_up: false,
            })
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", BROADCAST_PATH)
            .with_status(503)
            .create_async()
            .await;

        let sender = HttpBroadcastSender::new(&config(server.url())).unwrap();
        let result = sender
            .send_event(&MonitorEvent::AuditFinished {
                monitor_id: 1,
                perf_score: None,
            })
            .await;
        assert!(result.is_err());
    }
}
