//! 性能审计API客户端
//!
//! 调用 PageSpeed Insights 兼容的接口。429 和网络错误按指数退避重试，
//! 其他非200响应直接失败。

use crate::audit::report::{parse_report, AuditReport};
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// 每次审计请求的类别
pub const AUDIT_CATEGORIES: [&str; 4] = ["performance", "seo", "accessibility", "best-practices"];

/// 审计执行器trait
#[async_trait]
pub trait AuditExecutor: Send + Sync {
    /// 对目标URL执行一次审计
    ///
    /// # 参数
    /// * `url` - 目标URL，缺少协议时补全为 https
    /// * `strategy` - "mobile" 或 "desktop"
    ///
    /// # 返回
    /// * `Result<AuditReport, AuditError>` - 审计结果
    async fn audit(&self, url: &str, strategy: &str) -> std::result::Result<AuditReport, AuditError>;
}

/// 补全URL协议
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// 计算重试等待序列：首次等待 `initial`，之后每次翻倍
///
/// `max_attempts` 次尝试之间共有 `max_attempts - 1` 次等待
pub fn backoff_schedule(initial: Duration, max_attempts: u32) -> Vec<Duration> {
    (1..max_attempts)
        .map(|attempt| initial.saturating_mul(2u32.saturating_pow(attempt - 1)))
        .collect()
}

/// 一次审计的最长耗时：每次请求的超时加上全部退避等待
pub fn audit_budget(config: &AuditConfig) -> Duration {
    let attempts = config.max_attempts.max(1);
    backoff_schedule(Duration::from_secs(config.initial_backoff_seconds), attempts)
        .into_iter()
        .fold(
            Duration::from_secs(config.timeout_seconds).saturating_mul(attempts),
            Duration::saturating_add,
        )
}

/// 单次请求的失败分类
enum AttemptError {
    /// 可重试：429
    RateLimited,
    /// 可重试：网络错误
    Network(String),
    /// 不可重试
    Terminal(AuditError),
}

/// PageSpeed Insights 客户端
#[derive(Debug, Clone)]
pub struct PageSpeedClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl PageSpeedClient {
    /// 根据配置创建客户端
    pub fn new(config: &AuditConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()
            .map_err(|e| anyhow::anyhow!("创建审计HTTP客户端失败: {}", e))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_secs(config.initial_backoff_seconds),
        })
    }

    /// 覆盖首次退避时长
    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    fn query(&self, url: &str, strategy: &str) -> Vec<(&'static str, String)> {
        let mut query = vec![("url", normalize_url(url))];
        for category in AUDIT_CATEGORIES {
            query.push(("category", category.to_string()));
        }
        query.push(("strategy", strategy.to_string()));
        if let Some(key) = &self.api_key {
            query.push(("key", key.clone()));
        }
        query
    }

    async fn attempt(
        &self,
        query: &[(&'static str, String)],
    ) -> std::result::Result<AuditReport, AttemptError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(query)
            .send()
            .await
            .map_err(|e| AttemptError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::RateLimited);
        }
        if status != StatusCode::OK {
            return Err(AttemptError::Terminal(AuditError::Http {
                status: status.as_u16(),
            }));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AttemptError::Terminal(AuditError::InvalidResponse(e.to_string())))?;

        parse_report(&payload).map_err(AttemptError::Terminal)
    }
}

#[async_trait]
impl AuditExecutor for PageSpeedClient {
    async fn audit(&self, url: &str, strategy: &str) -> std::result::Result<AuditReport, AuditError> {
        let query = self.query(url, strategy);
        let waits = backoff_schedule(self.initial_backoff, self.max_attempts);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let retryable = match self.attempt(&query).await {
                Ok(report) => return Ok(report),
                Err(AttemptError::Terminal(err)) => return Err(err),
                Err(AttemptError::RateLimited) => AuditError::RateLimited { attempts: attempt },
                Err(AttemptError::Network(message)) => AuditError::Network {
                    attempts: attempt,
                    message,
                },
            };

            match waits.get(attempt as usize - 1) {
                Some(wait) => {
                    tracing::warn!(
                        "审计请求失败 ({}), {:?} 后进行第 {} 次尝试: {}",
                        retryable,
                        wait,
                        attempt + 1,
                        url
                    );
                    tokio::time::sleep(*wait).await;
                }
                None => return Err(retryable),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn test_config(api_url: String) -> AuditConfig {
        AuditConfig {
            api_url,
            api_key: Some("secret".to_string()),
            timeout_seconds: 5,
            max_attempts: 3,
            initial_backoff_seconds: 5,
        }
    }

    fn client_for(server: &mockito::Server) -> PageSpeedClient {
        PageSpeedClient::new(&test_config(format!("{}/runPagespeed", server.url())))
            .unwrap()
            .with_initial_backoff(Duration::from_millis(1))
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url(" https://a.b/c "), "https://a.b/c");
    }

    #[test]
    fn test_backoff_schedule_doubles() {
        assert_eq!(
            backoff_schedule(Duration::from_secs(5), 3),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
        assert!(backoff_schedule(Duration::from_secs(5), 1).is_empty());
    }

    #[test]
    fn test_audit_budget_covers_every_attempt() {
        // 3 × 60s 加上 5s + 10s 的退避
        assert_eq!(
            audit_budget(&AuditConfig::default()),
            Duration::from_secs(195)
        );
        assert_eq!(
            audit_budget(&test_config("http://localhost".into())),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_query_contains_categories_and_key() {
        let client = PageSpeedClient::new(&test_config("http://localhost/psi".into())).unwrap();
        let query = client.query("example.com", "desktop");

        assert_eq!(query[0], ("url", "https://example.com".to_string()));
        let categories: Vec<&str> = query
            .iter()
            .filter(|(k, _)| *k == "category")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(categories, AUDIT_CATEGORIES.to_vec());
        assert!(query.contains(&("strategy", "desktop".to_string())));
        assert!(query.contains(&("key", "secret".to_string())));
    }

    #[tokio::test]
    async fn test_successful_audit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/runPagespeed")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("url".into(), "https://example.com".into()),
                Matcher::UrlEncoded("strategy".into(), "mobile".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"lighthouseResult":{"categories":{"performance":{"score":0.95}},
                    "audits":{"first-contentful-paint":{"numericValue":1200}}}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let report = client_for(&server)
            .audit("example.com", "mobile")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(report.perf_score, Some(95.0));
        assert_eq!(report.perf_fcp, Some(1.2));
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_attempts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/runPagespeed")
            .match_query(Matcher::Any)
            .with_status(429)
            .expect(3)
            .create_async()
            .await;

        let err = client_for(&server)
            .audit("https://busy.example", "mobile")
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert_eq!(err, AuditError::RateLimited { attempts: 3 });
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_network_error_is_retried_then_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let api_url = format!("http://{}/runPagespeed", listener.local_addr().unwrap());
        drop(listener);

        let client = PageSpeedClient::new(&test_config(api_url))
            .unwrap()
            .with_initial_backoff(Duration::from_millis(20));
        let started = std::time::Instant::now();
        let err = client
            .audit("https://example.com", "mobile")
            .await
            .unwrap_err();

        assert!(
            matches!(err, AuditError::Network { attempts: 3, .. }),
            "{:?}",
            err
        );
        // 20ms + 40ms 的退避
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_server_error_is_terminal() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/runPagespeed")
            .match_query(Matcher::Any)
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let err = client_for(&server)
            .audit("https://example.com", "mobile")
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert_eq!(err, AuditError::Http { status: 500 });
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/runPagespeed")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = client_for(&server)
            .audit("https://example.com", "mobile")
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::InvalidResponse(_)));
    }
}
