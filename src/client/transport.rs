//! Resilient request execution.
//!
//! Invariants:
//! - Every attempt takes a rate limiter slot first
//! - 429, 5xx, timeouts and connection failures are retried up to `max_retries` times
//! - 401 is returned immediately and never retried
//! - Other 4xx are permanent and returned immediately
//! - Cancellation stops new attempts; an attempt already sent runs to completion

use crate::client::{BackoffPolicy, RateLimiter, parse_retry_after};
use crate::models::{ItemId, TransportError};
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Longest response body kept in error details.
const MAX_ERROR_BODY: usize = 500;

/// One catalog API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
    /// Item the call is made for (audit logging)
    pub item: ItemId,
    /// Short operation name (audit logging)
    pub operation: &'static str,
}

impl ApiRequest {
    pub fn get(item: &ItemId, operation: &'static str, url: String) -> Self {
        Self {
            method: Method::GET,
            url,
            body: None,
            item: item.clone(),
            operation,
        }
    }

    pub fn put(
        item: &ItemId,
        operation: &'static str,
        url: String,
        body: serde_json::Value,
    ) -> Self {
        Self {
            method: Method::PUT,
            url,
            body: Some(body),
            item: item.clone(),
            operation,
        }
    }
}

/// Response as received, before status classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a single HTTP request. Implementations only report transport-level
/// failures (`Network`, `Timeout`); status codes are classified by the caller.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError>;
}

/// Map a non-success response onto the error taxonomy.
fn classify(response: RawResponse) -> Result<RawResponse, TransportError> {
    if response.is_success() {
        return Ok(response);
    }

    let body: String = response.body.chars().take(MAX_ERROR_BODY).collect();
    Err(match response.status {
        401 => TransportError::Unauthorized,
        429 => TransportError::RateLimited {
            retry_after: response
                .headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after),
        },
        status @ 500..=599 => TransportError::ServerError { status, body },
        status => TransportError::ClientError { status, body },
    })
}

/// HTTP executor with global rate limiting, bounded retries and run-wide cancellation.
pub struct ResilientTransport {
    backend: Arc<dyn HttpBackend>,
    limiter: Arc<RateLimiter>,
    policy: BackoffPolicy,
    cancel: CancellationToken,
    total_attempts: AtomicU64,
    total_retries: AtomicU64,
}

impl ResilientTransport {
    pub fn new(
        backend: Arc<dyn HttpBackend>,
        limiter: Arc<RateLimiter>,
        policy: BackoffPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            limiter,
            policy,
            cancel,
            total_attempts: AtomicU64::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Execute a request, retrying transient failures.
    pub async fn execute(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let mut attempt = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = self.limiter.acquire() => {}
            }

            self.total_attempts.fetch_add(1, Ordering::Relaxed);
            let result = self.backend.send(request).await.and_then(classify);

            let err = match result {
                Ok(response) => {
                    debug!(
                        sku = %request.item,
                        op = request.operation,
                        method = %request.method,
                        status = response.status,
                        attempt = attempt + 1,
                        "Request succeeded"
                    );
                    return Ok(response);
                }
                Err(err) => err,
            };

            if err.is_fatal() {
                error!(
                    sku = %request.item,
                    op = request.operation,
                    method = %request.method,
                    attempt = attempt + 1,
                    "Credential rejected (401)"
                );
                return Err(err);
            }

            if !err.is_retryable() {
                warn!(
                    sku = %request.item,
                    op = request.operation,
                    method = %request.method,
                    status = err.status(),
                    attempt = attempt + 1,
                    error = %err,
                    "Request failed permanently"
                );
                return Err(err);
            }

            if !self.policy.should_retry(attempt) {
                warn!(
                    sku = %request.item,
                    op = request.operation,
                    method = %request.method,
                    status = err.status(),
                    attempt = attempt + 1,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(err);
            }

            let hint = err.retry_after();
            let delay = self.policy.next_delay(attempt, hint);
            if hint.is_some() {
                self.limiter.pause_for(delay);
            }

            warn!(
                sku = %request.item,
                op = request.operation,
                method = %request.method,
                status = err.status(),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
            self.total_retries.fetch_add(1, Ordering::Relaxed);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// (attempts, retries) issued so far.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.total_attempts.load(Ordering::Relaxed),
            self.total_retries.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureKind;
    use crate::testing::{Scripted, ScriptedBackend};
    use std::time::Duration;

    const URL: &str = "http://catalog.test/stockkeepingunit/1";

    fn transport(backend: Arc<ScriptedBackend>, cancel: CancellationToken) -> ResilientTransport {
        ResilientTransport::new(
            backend,
            Arc::new(RateLimiter::new(Duration::from_millis(300))),
            BackoffPolicy {
                max_retries: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(60),
                max_retry_after: Duration::from_secs(120),
            },
            cancel,
        )
    }

    fn request() -> ApiRequest {
        ApiRequest::get(&ItemId::from(1), "get_sku", URL.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(Method::GET, URL, vec![Scripted::json(200, serde_json::json!({"Id": 1}))]);
        let t = transport(Arc::clone(&backend), CancellationToken::new());

        let response = t.execute(&request()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(backend.count(&Method::GET, URL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_503_max_retries_times_then_success() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(
            Method::GET,
            URL,
            vec![
                Scripted::status(503),
                Scripted::status(503),
                Scripted::status(503),
                Scripted::json(200, serde_json::json!({})),
            ],
        );
        let t = transport(Arc::clone(&backend), CancellationToken::new());

        assert!(t.execute(&request()).await.is_ok());
        assert_eq!(backend.count(&Method::GET, URL), 4);
        assert_eq!(t.stats(), (4, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_503_beyond_budget_returns_server_error() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(Method::GET, URL, vec![Scripted::status(503)]);
        let t = transport(Arc::clone(&backend), CancellationToken::new());

        let err = t.execute(&request()).await.unwrap_err();
        assert!(matches!(err, TransportError::ServerError { status: 503, .. }));
        assert_eq!(backend.count(&Method::GET, URL), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_attempts() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(
            Method::GET,
            URL,
            vec![
                Scripted::status(500),
                Scripted::status(502),
                Scripted::json(200, serde_json::json!({})),
            ],
        );
        let t = transport(Arc::clone(&backend), CancellationToken::new());
        t.execute(&request()).await.unwrap();

        let at: Vec<_> = backend.calls().iter().map(|c| c.at).collect();
        assert_eq!(at[1] - at[0], Duration::from_secs(1));
        assert_eq!(at[2] - at[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_401_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(Method::GET, URL, vec![Scripted::status(401)]);
        let t = transport(Arc::clone(&backend), CancellationToken::new());

        let err = t.execute(&request()).await.unwrap_err();
        assert!(matches!(err, TransportError::Unauthorized));
        assert_eq!(backend.count(&Method::GET, URL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_4xx_is_permanent() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(Method::GET, URL, vec![Scripted::text(400, "bad sku")]);
        let t = transport(Arc::clone(&backend), CancellationToken::new());

        let err = t.execute(&request()).await.unwrap_err();
        match err {
            TransportError::ClientError { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad sku");
            }
            other => panic!("expected ClientError, got {other:?}"),
        }
        assert_eq!(backend.count(&Method::GET, URL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_overrides_backoff_and_pauses_limiter() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(
            Method::GET,
            URL,
            vec![
                Scripted::rate_limited(7),
                Scripted::json(200, serde_json::json!({})),
            ],
        );
        let t = transport(Arc::clone(&backend), CancellationToken::new());
        t.execute(&request()).await.unwrap();

        let calls = backend.calls();
        assert_eq!(calls[1].at - calls[0].at, Duration::from_secs(7));
        assert_eq!(t.limiter().stats().total_pauses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(
            Method::GET,
            URL,
            vec![Scripted::Timeout, Scripted::json(200, serde_json::json!({}))],
        );
        let t = transport(Arc::clone(&backend), CancellationToken::new());
        assert!(t.execute(&request()).await.is_ok());
        assert_eq!(backend.count(&Method::GET, URL), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_retry_after_waits_the_cap() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(
            Method::GET,
            URL,
            vec![
                Scripted::rate_limited("99999999999999999999"),
                Scripted::json(200, serde_json::json!({})),
            ],
        );
        let t = transport(Arc::clone(&backend), CancellationToken::new());
        t.execute(&request()).await.unwrap();

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].at - calls[0].at, Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_are_retried() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(
            Method::GET,
            URL,
            vec![Scripted::Network, Scripted::json(200, serde_json::json!({}))],
        );
        let t = transport(Arc::clone(&backend), CancellationToken::new());
        assert!(t.execute(&request()).await.is_ok());
        assert_eq!(backend.count(&Method::GET, URL), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_network_error_exhausts_budget() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(Method::GET, URL, vec![Scripted::Network]);
        let t = transport(Arc::clone(&backend), CancellationToken::new());

        let err = t.execute(&request()).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
        assert_eq!(err.kind(), FailureKind::Network);
        assert_eq!(backend.count(&Method::GET, URL), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_transport_sends_nothing() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(Method::GET, URL, vec![Scripted::json(200, serde_json::json!({}))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let t = transport(Arc::clone(&backend), cancel);

        let err = t.execute(&request()).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert!(backend.calls().is_empty());
        assert_eq!(t.limiter().stats().total_grants, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retrying() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.on(Method::GET, URL, vec![Scripted::status(503)]);
        let cancel = CancellationToken::new();
        let t = Arc::new(transport(Arc::clone(&backend), cancel.clone()));

        let task = {
            let t = Arc::clone(&t);
            tokio::spawn(async move { t.execute(&request()).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert_eq!(backend.count(&Method::GET, URL), 1);
    }
}
