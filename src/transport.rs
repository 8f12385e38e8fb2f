//! HTTP transport to the tracking backend.
//!
//! The transport is blocking: synchronous callers use it inline,
//! asynchronous callers go through [`crate::dispatch::offload`].
//! A transport only reports whether a response came back at all; status
//! classification is left to [`crate::backend::Backend`], which knows per
//! endpoint whether a failure is fatal or just worth a warning.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::trace;

use crate::error::{Result, TrackError};

/// Default backend location.
pub const DEFAULT_BASE_URL: &str = "https://api.promptlayer.com";

/// HTTP method of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One call against the backend, relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    /// Caller-supplied path segments appended after `path`, percent-encoded
    /// by the transport
    pub segments: Vec<String>,
    /// Sent as `X-API-KEY` when present
    pub api_key_header: Option<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            segments: Vec::new(),
            api_key_header: None,
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            segments: Vec::new(),
            api_key_header: None,
            query: Vec::new(),
            body: None,
        }
    }

    /// Append one path segment. `/`, `?` and the like inside it are encoded,
    /// never interpreted.
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn api_key_header(mut self, api_key: &str) -> Self {
        self.api_key_header = Some(api_key.to_string());
        self
    }

    /// Add a query parameter; `None` values are left out.
    pub fn query(mut self, key: &str, value: Option<String>) -> Self {
        if let Some(value) = value {
            self.query.push((key.to_string(), value));
        }
        self
    }

    /// Path and segments, unencoded, for log and error messages.
    pub fn route(&self) -> String {
        let mut route = self.path.clone();
        for segment in &self.segments {
            route.push('/');
            route.push_str(segment);
        }
        route
    }
}

/// What the backend answered.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Raw response body
    pub text: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// The body decoded as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.text).ok()
    }

    /// Human-readable error message: the body's `message` field when the
    /// body is JSON, the raw body otherwise.
    pub fn message(&self) -> String {
        match self.json() {
            Some(body) => match body.get("message") {
                Some(Value::String(message)) => message.clone(),
                Some(Value::Null) | None => "null".to_string(),
                Some(other) => other.to_string(),
            },
            None => format!("<status {}> {}", self.status, self.text),
        }
    }
}

/// Anything that can carry an [`ApiRequest`] to the backend.
///
/// Returns `Err` only when no response was received (connection refused,
/// timeout, ...). Non-200 statuses come back as `Ok`.
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

type Job = (ApiRequest, mpsc::Sender<Result<ApiResponse>>);

/// [`Transport`] over `reqwest`'s blocking client.
///
/// The client lives on a dedicated worker thread: it is built, used and
/// dropped there, never on a thread that runs an async runtime. So the
/// transport itself may be created and dropped anywhere, including inside
/// a tokio task. Requests are sent one at a time, in submission order.
/// [`Transport::send`] still blocks until the answer is back; from async
/// code, call it through [`crate::dispatch::offload`].
pub struct HttpTransport {
    base_url: String,
    jobs: mpsc::Sender<Job>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let (jobs, queue) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker_base = base_url.clone();
        thread::Builder::new()
            .name("llmtap-http".to_string())
            .spawn(move || {
                let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
                    Ok(client) => {
                        let _ = ready_tx.send(Ok(()));
                        client
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                for (request, reply) in queue {
                    let _ = reply.send(execute(&client, &worker_base, request));
                }
                trace!("http worker stopped");
            })
            .map_err(|e| TrackError::Config {
                reason: format!("failed to start the http worker: {}", e),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { base_url, jobs }),
            Ok(Err(reason)) => Err(TrackError::Config {
                reason: format!("failed to build http client: {}", reason),
            }),
            Err(_) => Err(TrackError::Config {
                reason: "the http worker exited during startup".to_string(),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let route = request.route();
        let worker_gone = || TrackError::Network {
            path: route.clone(),
            reason: "the http worker has stopped".to_string(),
        };
        let (reply, answer) = mpsc::channel();
        self.jobs.send((request, reply)).map_err(|_| worker_gone())?;
        answer.recv().map_err(|_| worker_gone())?
    }
}

fn execute(
    client: &reqwest::blocking::Client,
    base_url: &str,
    request: ApiRequest,
) -> Result<ApiResponse> {
    let route = request.route();
    let network = |reason: String| TrackError::Network {
        path: route.clone(),
        reason,
    };

    let mut url = reqwest::Url::parse(&format!("{}{}", base_url, request.path))
        .map_err(|e| network(format!("invalid url: {}", e)))?;
    if !request.segments.is_empty() {
        url.path_segments_mut()
            .map_err(|_| network("the base url cannot take path segments".to_string()))?
            .pop_if_empty()
            .extend(&request.segments);
    }

    let mut builder = match request.method {
        Method::Get => client.get(url),
        Method::Post => client.post(url),
    };
    if let Some(api_key) = &request.api_key_header {
        builder = builder.header("X-API-KEY", api_key);
    }
    if !request.query.is_empty() {
        builder = builder.query(&request.query);
    }
    if let Some(body) = &request.body {
        builder = builder.json(body);
    }

    let response = builder.send().map_err(|e| network(e.to_string()))?;
    let status = response.status().as_u16();
    let text = response
        .text()
        .map_err(|e| network(format!("failed to read response body: {}", e)))?;

    trace!(path = %route, status, "backend responded");
    Ok(ApiResponse { status, text })
}
