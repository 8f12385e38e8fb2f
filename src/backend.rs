//! Endpoints of the tracking backend.
//!
//! Two failure policies live side by side here:
//!
//! - **fire-and-forget** (`track_*`): any failure is logged with `warn!`
//!   and turned into `None` / `false`. Telemetry must never break the
//!   caller's LLM call.
//! - **explicit result** (prompt templates, groups): failures come back
//!   as [`TrackError`] carrying the backend's message.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::dispatch::offload;
use crate::error::{Result, TrackError};
use crate::transport::{ApiRequest, ApiResponse, Transport};
use crate::types::{RequestId, RequestRecord};

/// Group ids share the representation of request ids.
pub type GroupId = RequestId;

/// Client for the tracking backend: a transport plus the credential.
#[derive(Clone)]
pub struct Backend {
    transport: Arc<dyn Transport>,
    api_key: Arc<str>,
}

impl Backend {
    pub fn new(transport: Arc<dyn Transport>, api_key: impl Into<String>) -> Self {
        let api_key: String = api_key.into();
        Self {
            transport,
            api_key: Arc::from(api_key),
        }
    }

    // --- Request tracking (fire-and-forget) ---

    /// Post one record to `/track-request`.
    ///
    /// Returns the backend's request id when `want_id` is set and the call
    /// succeeded; `None` otherwise. Never fails.
    pub fn track_request(&self, record: &RequestRecord, want_id: bool) -> Option<RequestId> {
        let response = self.post_track_request(record.to_body(&self.api_key))?;
        if !response.is_success() {
            return None;
        }

        debug!(function = record.function_name(), "request tracked");
        if !want_id {
            return None;
        }
        response
            .json()
            .and_then(|body| body.get("request_id").and_then(RequestId::from_json))
    }

    /// Post an arbitrary body to `/track-request` and hand back whatever
    /// JSON the backend answered (`request_id`, `prompt_blueprint`, ...).
    ///
    /// `api_key` is added when the body lacks one. A non-200 answer is
    /// logged and its body still returned; no answer at all, or one that is
    /// not a JSON object, yields an empty object. Never fails.
    pub fn track_request_body(&self, mut body: Map<String, Value>) -> Map<String, Value> {
        body.entry("api_key")
            .or_insert_with(|| Value::String(self.api_key.to_string()));
        answer_object(self.post_track_request(Value::Object(body)))
    }

    /// Post one record and return the backend's full answer, with the
    /// policy of [`Backend::track_request_body`].
    pub fn track_record(&self, record: &RequestRecord) -> Map<String, Value> {
        answer_object(self.post_track_request(record.to_body(&self.api_key)))
    }

    /// [`Backend::track_record`] through [`offload`].
    pub async fn track_record_async(&self, record: RequestRecord) -> Map<String, Value> {
        let backend = self.clone();
        match offload(move || backend.track_record(&record)).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "While logging your request the backend had the following error");
                Map::new()
            }
        }
    }

    /// The `/track-request` POST shared by both tracking calls: failures are
    /// warned about here, and `None` means no response came back.
    fn post_track_request(&self, body: Value) -> Option<ApiResponse> {
        let response = match self.transport.send(ApiRequest::post("/track-request", body)) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "While logging your request the backend had the following error");
                return None;
            }
        };
        if !response.is_success() {
            warn!(
                status = response.status,
                message = %response.message(),
                "While logging your request the backend had the following error"
            );
        }
        Some(response)
    }

    /// [`Backend::track_request`] for async callers: the blocking post runs
    /// on a worker via [`offload`].
    pub async fn track_request_async(
        &self,
        record: RequestRecord,
        want_id: bool,
    ) -> Option<RequestId> {
        let backend = self.clone();
        match offload(move || backend.track_request(&record, want_id)).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "While logging your request the backend had the following error");
                None
            }
        }
    }

    /// Attach a prompt template (and its input variables) to a tracked request.
    pub fn track_prompt(
        &self,
        request_id: &RequestId,
        prompt_name: &str,
        input_variables: &Map<String, Value>,
        version: Option<u32>,
        label: Option<&str>,
    ) -> bool {
        let body = json!({
            "request_id": request_id,
            "prompt_name": prompt_name,
            "prompt_input_variables": input_variables,
            "api_key": &*self.api_key,
            "version": version,
            "label": label,
        });
        self.post_flag("/library-track-prompt", body, "tracking your prompt")
    }

    pub fn track_metadata(&self, request_id: &RequestId, metadata: &Map<String, Value>) -> bool {
        let body = json!({
            "request_id": request_id,
            "metadata": metadata,
            "api_key": &*self.api_key,
        });
        self.post_flag("/library-track-metadata", body, "tracking your metadata")
    }

    /// Score a tracked request. The score must be within `0..=100`.
    pub fn track_score(
        &self,
        request_id: &RequestId,
        score: i64,
        name: Option<&str>,
    ) -> Result<bool> {
        if !(0..=100).contains(&score) {
            return Err(TrackError::InvalidArgument(format!(
                "score must be between 0 and 100, got {}",
                score
            )));
        }
        let mut body = json!({
            "request_id": request_id,
            "score": score,
            "api_key": &*self.api_key,
        });
        if let Some(name) = name {
            body["name"] = json!(name);
        }
        Ok(self.post_flag("/library-track-score", body, "tracking your score"))
    }

    // --- Groups ---

    /// Create a request group. A non-200 answer is logged and yields `None`;
    /// an unreachable backend is an error.
    pub fn create_group(&self) -> Result<Option<GroupId>> {
        let body = json!({ "api_key": &*self.api_key });
        let response = self.transport.send(ApiRequest::post("/create-group", body))?;
        if !response.is_success() {
            warn!(
                status = response.status,
                message = %response.message(),
                "While creating your group the backend had the following error"
            );
            return Ok(None);
        }
        Ok(response
            .json()
            .and_then(|body| body.get("id").and_then(RequestId::from_json)))
    }

    pub fn track_group(&self, request_id: &RequestId, group_id: &GroupId) -> Result<bool> {
        let body = json!({
            "api_key": &*self.api_key,
            "request_id": request_id,
            "group_id": group_id,
        });
        let response = self.transport.send(ApiRequest::post("/track-group", body))?;
        if !response.is_success() {
            warn!(
                status = response.status,
                message = %response.message(),
                "While tracking your group the backend had the following error"
            );
            return Ok(false);
        }
        Ok(true)
    }

    // --- Prompt templates (explicit result) ---

    /// Fetch a prompt from the registry. `label` takes precedence over
    /// `version` on the backend side.
    pub fn get_prompt(
        &self,
        prompt_name: &str,
        version: Option<u32>,
        label: Option<&str>,
    ) -> Result<Value> {
        let request = ApiRequest::get("/library-get-prompt-template")
            .api_key_header(&self.api_key)
            .query("prompt_name", Some(prompt_name.to_string()))
            .query("version", version.map(|v| v.to_string()))
            .query("label", label.map(str::to_string));
        let response = self.transport.send(request)?;
        let response = ensure_success(response, "getting your prompt")?;
        Ok(serde_json::from_str(&response.text)?)
    }

    pub fn publish_prompt(
        &self,
        prompt_name: &str,
        prompt_template: &Value,
        commit_message: Option<&str>,
        tags: &[String],
        metadata: Option<&Map<String, Value>>,
    ) -> Result<()> {
        let body = json!({
            "prompt_name": prompt_name,
            "prompt_template": prompt_template,
            "commit_message": commit_message,
            "tags": tags,
            "api_key": &*self.api_key,
            "metadata": metadata,
        });
        let response = self
            .transport
            .send(ApiRequest::post("/library-publish-prompt-template", body))?;
        ensure_success(response, "publishing your prompt")?;
        Ok(())
    }

    /// Fetch a prompt template by name; `params` (version, label,
    /// provider, input variables, ...) are merged into the request body.
    pub fn get_prompt_template(
        &self,
        prompt_name: &str,
        params: Option<&Map<String, Value>>,
    ) -> Result<Value> {
        let mut body = Map::new();
        body.insert("api_key".to_string(), json!(&*self.api_key));
        if let Some(params) = params {
            body.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let request = ApiRequest::post("/prompt-templates", Value::Object(body))
            .segment(prompt_name)
            .api_key_header(&self.api_key);
        let response = self.transport.send(request)?;
        if !response.is_success() {
            return Err(backend_error(
                &response,
                "getting your prompt template",
                response.text.clone(),
            ));
        }
        Ok(serde_json::from_str(&response.text)?)
    }

    /// Publish a new prompt template version. The same body feeds both the
    /// template and the version record.
    pub fn publish_prompt_template(&self, body: &Map<String, Value>) -> Result<Value> {
        let payload = json!({
            "prompt_template": body,
            "prompt_version": body,
            "release_labels": body.get("release_labels"),
        });
        let request =
            ApiRequest::post("/rest/prompt-templates", payload).api_key_header(&self.api_key);
        let response = self.transport.send(request)?;
        if response.status == 400 {
            return Err(backend_error(
                &response,
                "publishing your prompt template",
                response.text.clone(),
            ));
        }
        Ok(serde_json::from_str(&response.text)?)
    }

    pub fn all_prompt_templates(&self, page: u32, per_page: u32) -> Result<Vec<Value>> {
        let request = ApiRequest::get("/prompt-templates")
            .api_key_header(&self.api_key)
            .query("page", Some(page.to_string()))
            .query("per_page", Some(per_page.to_string()));
        let response = self.transport.send(request)?;
        if !response.is_success() {
            return Err(backend_error(
                &response,
                "getting all your prompt templates",
                response.text.clone(),
            ));
        }
        let body: Value = serde_json::from_str(&response.text)?;
        Ok(match body.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        })
    }

    /// POST that reports success as a bool and only ever warns.
    fn post_flag(&self, path: &str, body: Value, action: &str) -> bool {
        match self.transport.send(ApiRequest::post(path, body)) {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                warn!(
                    status = response.status,
                    message = %response.message(),
                    "While {} the backend had the following error", action
                );
                false
            }
            Err(e) => {
                warn!(error = %e, "While {} the backend had the following error", action);
                false
            }
        }
    }
}

fn answer_object(response: Option<ApiResponse>) -> Map<String, Value> {
    match response.and_then(|response| response.json()) {
        Some(Value::Object(answer)) => answer,
        _ => Map::new(),
    }
}

fn backend_error(response: &ApiResponse, action: &str, message: String) -> TrackError {
    TrackError::Backend {
        context: format!("the backend had the following error while {}", action),
        status: response.status,
        message,
    }
}

fn ensure_success(response: ApiResponse, action: &str) -> Result<ApiResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        let message = response.message();
        Err(backend_error(&response, action, message))
    }
}
