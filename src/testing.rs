//! In-memory catalog API for tests.
//!
//! Responses are queued per (method, url). The last queued response repeats
//! once the queue is down to one entry. Unrouted requests get a 404.

use crate::client::{
    ApiRequest, BackoffPolicy, CatalogClient, HttpBackend, RateLimiter, RawResponse,
    ResilientTransport,
};
use crate::models::TransportError;
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderValue};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const BASE_URL: &str = "http://catalog.test/api/catalog/pvt";

#[derive(Debug, Clone)]
pub enum Scripted {
    Response {
        status: u16,
        body: String,
        headers: Vec<(&'static str, String)>,
    },
    Timeout,
    Network,
}

impl Scripted {
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self::Response {
            status,
            body: value.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self::Response {
            status,
            body: body.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::text(status, "")
    }

    pub fn rate_limited(retry_after: impl ToString) -> Self {
        Self::Response {
            status: 429,
            body: String::new(),
            headers: vec![("retry-after", retry_after.to_string())],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
    pub at: Instant,
}

#[derive(Default)]
pub struct ScriptedBackend {
    routes: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
    calls: Mutex<Vec<RecordedCall>>,
    /// Simulated network latency per call
    latency: Mutex<Duration>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: Method, url: &str, responses: Vec<Scripted>) {
        self.routes
            .lock()
            .unwrap()
            .insert((method, url.to_string()), responses.into());
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &Method, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| &c.method == method && c.url == url)
            .count()
    }

    /// Number of write (PUT) calls issued.
    pub fn writes(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == Method::PUT)
            .count()
    }

    fn next_response(&self, method: &Method, url: &str) -> Scripted {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(&(method.clone(), url.to_string())) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => Scripted::status(404),
        }
    }
}

#[async_trait]
impl HttpBackend for ScriptedBackend {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: request.method.clone(),
            url: request.url.clone(),
            body: request.body.clone(),
            at: Instant::now(),
        });

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match self.next_response(&request.method, &request.url) {
            Scripted::Response {
                status,
                body,
                headers,
            } => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    map.insert(name, HeaderValue::from_str(&value).unwrap());
                }
                Ok(RawResponse {
                    status,
                    headers: map,
                    body,
                })
            }
            Scripted::Timeout => Err(TransportError::Timeout(Duration::from_secs(30))),
            Scripted::Network => Err(TransportError::Network("connection reset".into())),
        }
    }
}

/// Route a SKU with a name and the given images (JSON values).
pub fn route_item(backend: &ScriptedBackend, id: u64, name: &str, images: serde_json::Value) {
    backend.on(
        Method::GET,
        &format!("{BASE_URL}/stockkeepingunit/{id}"),
        vec![Scripted::json(200, serde_json::json!({ "Name": name, "RefId": format!("R-{id}") }))],
    );
    backend.on(
        Method::GET,
        &format!("{BASE_URL}/stockkeepingunit/{id}/file"),
        vec![Scripted::json(200, images)],
    );
}

/// Accept writes for the given image of a SKU.
pub fn route_update(backend: &ScriptedBackend, id: u64, file_id: u64, responses: Vec<Scripted>) {
    backend.on(
        Method::PUT,
        &format!("{BASE_URL}/stockkeepingunit/{id}/file/{file_id}"),
        responses,
    );
}

/// Catalog client over `backend` with the default retry policy.
pub fn catalog(
    backend: Arc<ScriptedBackend>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
) -> Arc<CatalogClient> {
    let transport = ResilientTransport::new(backend, limiter, BackoffPolicy::default(), cancel);
    Arc::new(CatalogClient::new(Arc::new(transport), BASE_URL))
}
