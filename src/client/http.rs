//! reqwest-backed `HttpBackend`.

use crate::client::{ApiRequest, HttpBackend, RawResponse};
use crate::models::{AltSyncError, CatalogConfig, ConfigError, Result, TransportError};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// Sends requests with the credential attached to every call.
pub struct ReqwestBackend {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestBackend {
    /// Build a client that attaches `credential` to every request.
    pub fn new(config: &CatalogConfig, credential: &str) -> Result<Self> {
        let headers = Self::headers(config, credential)?;
        let timeout = config.timeout();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .pool_max_idle_per_host(20)
            .build()
            .map_err(|e| AltSyncError::Internal(format!("Building HTTP client: {e}")))?;

        Ok(Self { client, timeout })
    }

    fn headers(config: &CatalogConfig, credential: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let name = HeaderName::try_from(config.auth_header.as_str()).map_err(|e| {
            ConfigError::Invalid(format!("catalog.auth_header {:?}: {e}", config.auth_header))
        })?;
        let value = format!(
            "{}{}",
            config.auth_prefix.as_deref().unwrap_or_default(),
            credential.trim()
        );
        let mut value = HeaderValue::from_str(&value).map_err(|_| {
            ConfigError::Invalid("catalog credential contains invalid header characters".into())
        })?;
        value.set_sensitive(true);
        headers.insert(name, value);

        Ok(headers)
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn send(&self, request: &ApiRequest) -> std::result::Result<RawResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| self.map_error(e))?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

impl ReqwestBackend {
    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Network(e.to_string())
        }
    }
}
