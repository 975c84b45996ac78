//! HTTP存活探测器实现
//!
//! 每次尝试使用全新的客户端，先发 HEAD，被拒绝时在同一次尝试内回退到 GET。
//! 超时、连接失败和TLS错误都会重试，任何错误都不会逃出探测器。

use crate::error::describe_panic;
use crate::health::result::{ProbeOutcome, ProbeTarget};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use reqwest::{redirect, Client, StatusCode};
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

/// 默认的线性退避基数：第 n 次失败后等待 n × 500ms
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// 探测执行器trait，定义存活探测接口
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    /// 执行一次带重试的存活探测
    ///
    /// # 参数
    /// * `url` - 目标URL
    /// * `timeout` - 单次尝试超时
    /// * `max_retries` - 首次尝试之外的最大重试次数
    ///
    /// # 返回
    /// * `ProbeOutcome` - 探测结果，失败也以结果形式返回
    async fn probe(&self, url: &str, timeout: Duration, max_retries: u32) -> ProbeOutcome;
}

/// 单次尝试的失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptFailure {
    /// TLS 握手或证书校验失败
    Tls(String),
    /// 超时
    Timeout,
    /// 无法建立连接
    Connect(String),
    /// 其他请求错误
    Other(String),
}

impl AttemptFailure {
    fn describe(&self, timeout: Duration) -> String {
        match self {
            AttemptFailure::Tls(msg) => format!("SSL Error: {}", msg),
            AttemptFailure::Timeout => format!("Timeout after {}s", timeout.as_secs_f64()),
            AttemptFailure::Connect(msg) => format!("Connection Error: {}", msg),
            AttemptFailure::Other(msg) => msg.clone(),
        }
    }
}

/// 基于 reqwest 的HTTP探测器
#[derive(Debug, Clone)]
pub struct HttpProbeExecutor {
    /// 是否校验证书
    verify_ssl: bool,
    /// 重试退避基数
    retry_backoff: Duration,
}

impl HttpProbeExecutor {
    /// 创建新的HTTP探测器
    pub fn new(verify_ssl: bool) -> Self {
        Self {
            verify_ssl,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// 设置重试退避基数
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    fn build_client(&self, timeout: Duration) -> reqwest::Result<Client> {
        Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(10))
            .danger_accept_invalid_certs(!self.verify_ssl)
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()
    }

    /// 执行单次尝试，返回最终状态码
    async fn attempt(&self, url: &str, timeout: Duration) -> Result<u16, AttemptFailure> {
        let client = self
            .build_client(timeout)
            .map_err(|e| AttemptFailure::Other(error_chain(&e)))?;

        let is_https = url.starts_with("https://");
        let response = client
            .head(url)
            .send()
            .await
            .map_err(|e| classify_error(e, is_https))?;
        let status = response.status();

        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
            tracing::debug!("服务器拒绝 HEAD 请求 ({}), 改用 GET: {}", status, url);
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| classify_error(e, is_https))?;
            return Ok(response.status().as_u16());
        }

        Ok(status.as_u16())
    }
}

impl Default for HttpProbeExecutor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ProbeExecutor for HttpProbeExecutor {
    async fn probe(&self, url: &str, timeout: Duration, max_retries: u32) -> ProbeOutcome {
        let mut attempts: u32 = 0;
        let mut ssl_valid: Option<bool> = None;
        let mut last_error = String::from("no attempt was made");
        let mut last_elapsed = Duration::ZERO;

        while attempts <= max_retries {
            attempts += 1;
            let start = Instant::now();

            match self.attempt(url, timeout).await {
                Ok(status_code) => {
                    let response_ms = start.elapsed().as_millis() as u64;
                    if url.starts_with("https://") {
                        ssl_valid = Some(true);
                    }
                    return ProbeOutcome::from_status(status_code, response_ms)
                        .with_retry_attempts(attempts - 1)
                        .with_ssl_valid(ssl_valid);
                }
                Err(failure) => {
                    last_elapsed = start.elapsed();
                    if matches!(failure, AttemptFailure::Tls(_)) {
                        ssl_valid = Some(false);
                    }
                    last_error = failure.describe(timeout);
                    tracing::debug!(
                        "探测失败 {} (第 {} 次尝试): {}",
                        url,
                        attempts,
                        last_error
                    );
                }
            }

            if attempts <= max_retries {
                tokio::time::sleep(self.retry_backoff * attempts).await;
            }
        }

        ProbeOutcome::down(last_error, last_elapsed.as_millis() as u64)
            .with_retry_attempts(attempts.saturating_sub(1))
            .with_ssl_valid(ssl_valid)
    }
}

/// 并发探测多个目标
///
/// 同时在途的探测数不超过 `max_concurrent`，结果顺序与输入一致。
/// 某个探测异常退出时，对应位置填入降级结果，不影响其他目标。
pub async fn probe_batch(
    executor: &dyn ProbeExecutor,
    targets: &[ProbeTarget],
    max_concurrent: usize,
) -> Vec<ProbeOutcome> {
    let probes: Vec<_> = targets
        .iter()
        .map(|target| probe_one(executor, target))
        .collect();

    stream::iter(probes)
        .buffered(max_concurrent.max(1))
        .collect()
        .await
}

/// 探测单个目标，异常退出时返回降级结果
async fn probe_one(executor: &dyn ProbeExecutor, target: &ProbeTarget) -> ProbeOutcome {
    let probe = executor.probe(&target.url, target.timeout, target.max_retries);
    match AssertUnwindSafe(probe).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let reason = describe_panic(payload.as_ref());
            tracing::error!("监控项 {} 的探测异常退出: {}", target.monitor_id, reason);
            ProbeOutcome::degraded(reason)
        }
    }
}

/// 一次探测的最长耗时：每次尝试的超时加上线性退避
///
/// 消息租约必须长于该值，否则任务会在处理期间被重新投递
pub fn probe_budget(timeout: Duration, max_retries: u32, retry_backoff: Duration) -> Duration {
    let waits: u32 = (1..=max_retries).sum();
    timeout
        .saturating_mul(max_retries.saturating_add(1))
        .saturating_add(retry_backoff.saturating_mul(waits))
}

/// 将 reqwest 错误归类
///
/// 只有 https 目标才可能归为TLS错误。错误描述不含请求URL，
/// 避免地址中的字样影响判断。
fn classify_error(error: reqwest::Error, is_https: bool) -> AttemptFailure {
    let error = error.without_url();
    if error.is_timeout() {
        return AttemptFailure::Timeout;
    }

    let chain = error_chain(&error);
    if is_https && is_tls_error(&error) {
        AttemptFailure::Tls(chain)
    } else if error.is_connect() {
        AttemptFailure::Connect(chain)
    } else {
        AttemptFailure::Other(chain)
    }
}

/// 展开错误链，reqwest 顶层错误信息通常不包含根因
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !parts.contains(&text) {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}

/// 判断错误是否来自TLS层
///
/// rustls 的握手和证书错误以 `InvalidData` 的IO错误向上传递
fn is_tls_error(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::InvalidData {
                return true;
            }
        }
        if is_tls_message(&cause.to_string()) {
            return true;
        }
        source = cause.source();
    }
    false
}

/// 判断错误描述是否来自TLS层
pub fn is_tls_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_executor() -> HttpProbeExecutor {
        HttpProbeExecutor::new(true).with_retry_backoff(Duration::from_millis(1))
    }

    /// 获取一个当前无人监听的本地端口
    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}/", port)
    }

    #[tokio::test]
    async fn test_head_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("HEAD", "/")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let outcome = fast_executor()
            .probe(&server.url(), Duration::from_secs(5), 2)
            .await;

        mock.assert_async().await;
        assert!(outcome.is_up);
        assert_eq!(outcome.status_code, Some(204));
        assert_eq!(outcome.retry_attempts, 0);
        assert!(outcome.error.is_none());
        // http 目标不涉及证书
        assert_eq!(outcome.ssl_valid, None);
    }

    #[tokio::test]
    async fn test_head_rejected_falls_back_to_get() {
        let mut server = mockito::Server::new_async().await;
        let head = server
            .mock("HEAD", "/health")
            .with_status(405)
            .expect(1)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body("ok")
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/health", server.url());
        let outcome = fast_executor().probe(&url, Duration::from_secs(5), 0).await;

        head.assert_async().await;
        get.assert_async().await;
        assert!(outcome.is_up);
        assert_eq!(outcome.status_code, Some(200));
    }

    #[tokio::test]
    async fn test_server_error_is_down_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("HEAD", "/")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let outcome = fast_executor()
            .probe(&server.url(), Duration::from_secs(5), 3)
            .await;

        // 收到任何HTTP响应即结束本次探测
        mock.assert_async().await;
        assert!(!outcome.is_up);
        assert_eq!(outcome.status_code, Some(500));
        assert_eq!(outcome.retry_attempts, 0);
    }

    #[tokio::test]
    async fn test_connection_failure_retries_and_reports() {
        let url = closed_port_url();
        let outcome = fast_executor().probe(&url, Duration::from_secs(2), 2).await;

        assert!(!outcome.is_up);
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.retry_attempts, 2);
        assert_eq!(outcome.ssl_valid, None);
        assert!(outcome
            .error
            .as_deref()
            .unwrap_or_default()
            .starts_with("Connection Error"));
    }

    #[tokio::test]
    async fn test_url_words_do_not_imply_tls() {
        let base = closed_port_url();
        for path in ["ssl-status", "tls", "certificate"] {
            let url = format!("{}{}", base, path);
            let outcome = fast_executor().probe(&url, Duration::from_secs(2), 0).await;

            assert_eq!(outcome.ssl_valid, None, "{}", url);
            let error = outcome.error.unwrap_or_default();
            assert!(error.starts_with("Connection Error"), "{}", error);
            assert!(!error.contains(path), "{}", error);
        }
    }

    #[tokio::test]
    async fn test_timeout_retries_and_reports() {
        // 只监听不接受连接：TCP握手由内核完成，请求永远得不到响应
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/tls", listener.local_addr().unwrap());

        let outcome = fast_executor()
            .probe(&url, Duration::from_millis(200), 1)
            .await;

        assert!(!outcome.is_up);
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.retry_attempts, 1);
        assert_eq!(outcome.ssl_valid, None);
        assert_eq!(outcome.error.as_deref(), Some("Timeout after 0.2s"));
        drop(listener);
    }

    #[tokio::test]
    async fn test_tls_handshake_failure_marks_ssl_invalid() {
        // 明文HTTP服务无法完成TLS握手
        let server = mockito::Server::new_async().await;
        let url = format!("https://{}/", server.host_with_port());

        let outcome = fast_executor().probe(&url, Duration::from_secs(2), 2).await;

        assert!(!outcome.is_up);
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.ssl_valid, Some(false));
        assert_eq!(outcome.retry_attempts, 2);
        assert!(outcome
            .error
            .as_deref()
            .unwrap_or_default()
            .starts_with("SSL Error"));
    }

    #[test]
    fn test_probe_budget() {
        assert_eq!(
            probe_budget(Duration::from_secs(10), 2, Duration::from_millis(500)),
            Duration::from_millis(31_500)
        );
        assert_eq!(
            probe_budget(Duration::from_secs(5), 0, Duration::from_secs(1)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_attempt_failure_descriptions() {
        let timeout = Duration::from_secs(10);
        assert_eq!(
            AttemptFailure::Timeout.describe(timeout),
            "Timeout after 10s"
        );
        assert_eq!(
            AttemptFailure::Tls("bad cert".into()).describe(timeout),
            "SSL Error: bad cert"
        );
        assert_eq!(
            AttemptFailure::Connect("refused".into()).describe(timeout),
            "Connection Error: refused"
        );
    }

    #[test]
    fn test_is_tls_message() {
        assert!(is_tls_message("invalid peer certificate: UnknownIssuer"));
        assert!(is_tls_message("received fatal alert from TLS peer"));
        assert!(!is_tls_message("tcp connect error: Connection refused"));
    }

    /// 按URL决定行为的测试探测器
    struct ScriptedExecutor {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ProbeExecutor for ScriptedExecutor {
        async fn probe(&self, url: &str, _timeout: Duration, _max_retries: u32) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if url.contains("boom") {
                panic!("probe exploded");
            }
            ProbeOutcome::from_status(200, 5)
        }
    }

    fn target(id: i64, url: &str) -> ProbeTarget {
        ProbeTarget {
            monitor_id: id,
            url: url.to_string(),
            timeout: Duration::from_secs(1),
            max_retries: 0,
        }
    }

    #[tokio::test]
    async fn test_probe_batch_isolates_panics_and_bounds_concurrency() {
        let executor = Arc::new(ScriptedExecutor {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let targets = vec![
            target(1, "http://a.test"),
            target(2, "http://boom.test"),
            target(3, "http://c.test"),
            target(4, "http://d.test"),
            target(5, "http://e.test"),
        ];

        let outcomes = probe_batch(executor.as_ref(), &targets, 2).await;

        assert_eq!(outcomes.len(), 5);
        assert!(outcomes[0].is_up);
        assert!(!outcomes[1].is_up);
        assert_eq!(
            outcomes[1].error.as_deref(),
            Some("Unexpected error: probe exploded")
        );
        assert_eq!(outcomes[1].response_ms, 0);
        assert!(outcomes[2..].iter().all(|o| o.is_up));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 5);
        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_probe_batch_runs_on_spawned_task() {
        let executor = Arc::new(ScriptedExecutor {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let targets = vec![target(1, "http://a.test"), target(2, "http://b.test")];

        let spawned = executor.clone();
        let outcomes = tokio::spawn(async move {
            probe_batch(spawned.as_ref(), &targets, 4).await
        })
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.is_up));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }
}
