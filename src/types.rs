//! Core data types used throughout llmtap.
//!
//! This module defines the provider discriminant, the metadata snapshot
//! taken when a provider call starts, and the immutable record that is
//! finally sent to the tracking backend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TrackError;

// --- Provider ---

/// Which LLM provider produced a response.
///
/// The wire form (`"openai"` / `"anthropic"`) is what the backend
/// expects in the `provider_type` field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProviderType {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "openai",
            ProviderType::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderType::OpenAi),
            "anthropic" => Ok(ProviderType::Anthropic),
            other => Err(TrackError::InvalidArgument(format!(
                "unknown provider '{}'. Supported: 'openai', 'anthropic'",
                other
            ))),
        }
    }
}

// --- Correlation id ---

/// Identifier the backend assigns to a logged request.
///
/// The backend may send it as a JSON number or a string; both are kept
/// in their textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Extract an id from a JSON value (string or number).
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// --- Call metadata ---

/// Frozen snapshot of a provider call, taken when the call starts.
///
/// For streams this is what the proxy holds for the whole session; only
/// the end time is filled in later, when the terminal chunk shows up.
#[derive(Debug, Clone)]
pub struct CallMetadata {
    /// Name of the SDK function that was called (e.g. "openai.chat.completions.create")
    pub function_name: String,
    pub provider_type: ProviderType,
    /// Positional arguments of the call
    pub args: Vec<Value>,
    /// Keyword arguments of the call (model, messages, stream, ...)
    pub kwargs: Map<String, Value>,
    pub tags: Vec<String>,
    /// Unix timestamp in seconds
    pub request_start_time: f64,
    /// Whether the caller wants the backend's request id surfaced
    pub return_request_id: bool,
    /// Id of the tracing span the call belongs to, if any
    pub span_id: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl CallMetadata {
    /// Start a snapshot for `function_name`, stamping the start time now.
    pub fn new(function_name: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            function_name: function_name.into(),
            provider_type,
            args: Vec::new(),
            kwargs: Map::new(),
            tags: Vec::new(),
            request_start_time: now_timestamp(),
            return_request_id: false,
            span_id: None,
            metadata: None,
        }
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn started_at(mut self, timestamp: f64) -> Self {
        self.request_start_time = timestamp;
        self
    }

    pub fn return_request_id(mut self, yes: bool) -> Self {
        self.return_request_id = yes;
        self
    }

    pub fn span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// --- Request record ---

/// One logged request, ready to be posted to `/track-request`.
///
/// Built once from a [`CallMetadata`] snapshot and the response payload;
/// there is no way to change it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRecord {
    function_name: String,
    provider_type: ProviderType,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    tags: Vec<String>,
    #[serde(rename = "request_response")]
    response_payload: Value,
    request_start_time: f64,
    request_end_time: f64,
    metadata: Option<Map<String, Value>>,
    span_id: Option<String>,
}

impl RequestRecord {
    pub fn new(call: &CallMetadata, request_end_time: f64, response_payload: Value) -> Self {
        Self {
            function_name: call.function_name.clone(),
            provider_type: call.provider_type,
            args: call.args.clone(),
            kwargs: call.kwargs.clone(),
            tags: call.tags.clone(),
            response_payload,
            request_start_time: call.request_start_time,
            request_end_time,
            metadata: call.metadata.clone(),
            span_id: call.span_id.clone(),
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn response_payload(&self) -> &Value {
        &self.response_payload
    }

    pub fn request_start_time(&self) -> f64 {
        self.request_start_time
    }

    pub fn request_end_time(&self) -> f64 {
        self.request_end_time
    }

    /// JSON body for `/track-request`, with the credential merged in.
    pub fn to_body(&self, api_key: &str) -> Value {
        let mut body = serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()));
        if let Value::Object(map) = &mut body {
            map.insert("api_key".to_string(), Value::String(api_key.to_string()));
        }
        body
    }
}

/// Current time as fractional Unix seconds.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
