//! reqwest-backed collaborator client.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{
    AnalyzeRequest, CHART, ChartRequest, Collaborators, DATA_FETCH, Endpoints, INFERENCE,
    ReadRequest,
};
use crate::error::{Error, Result};
use crate::resilience::CallError;

/// HTTP client for the data-fetch, inference, and chart services.
#[derive(Debug, Clone)]
pub struct HttpCollaborators {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpCollaborators {
    pub fn new(endpoints: Endpoints) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pipeline-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoints })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        service: &str,
        url: String,
        body: &B,
    ) -> std::result::Result<Value, CallError> {
        debug!(service, %url, "sending collaborator request");

        let mut request = self.client.post(&url).json(body);
        if let Some(ref token) = self.endpoints.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CallError::Transient(format!("{service} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(service, status, &text));
        }

        let body: Value = response.json().await.map_err(|e| {
            CallError::Transient(format!("{service} returned an undecodable body: {e}"))
        })?;

        match body.get("error") {
            Some(err) if !err.is_null() => Err(CallError::Client(format!(
                "{service} reported an error: {}",
                error_text(err)
            ))),
            _ => Ok(body),
        }
    }
}

#[async_trait]
impl Collaborators for HttpCollaborators {
    async fn read_report(&self, request: &ReadRequest) -> std::result::Result<Value, CallError> {
        let url = format!("{}{}", self.endpoints.data_fetch_url, request.path());
        self.post(DATA_FETCH, url, request).await
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> std::result::Result<Value, CallError> {
        let url = format!("{}/analyze", self.endpoints.inference_url);
        self.post(INFERENCE, url, request).await
    }

    async fn create_chart(&self, request: &ChartRequest) -> std::result::Result<Value, CallError> {
        let url = format!("{}/create", self.endpoints.chart_url);
        self.post(CHART, url, request).await
    }
}

/// Map a non-success HTTP status to the resilience taxonomy.
pub fn classify_status(service: &str, status: StatusCode, body: &str) -> CallError {
    let detail = detail_from_body(body);
    let message = if detail.is_empty() {
        format!("{service} returned {status}")
    } else {
        format!("{service} returned {status}: {detail}")
    };

    match status {
        StatusCode::NOT_FOUND => CallError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => CallError::RateLimited(message),
        StatusCode::REQUEST_TIMEOUT => CallError::Transient(message),
        s if s.is_client_error() => CallError::Client(message),
        _ => CallError::Transient(message),
    }
}

/// Pull `detail` / `error` out of a JSON error body, falling back to raw text.
fn detail_from_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => json
            .get("detail")
            .or_else(|| json.get("error"))
            .map(error_text)
            .unwrap_or_else(|| body.trim().to_string()),
        Err(_) => body.trim().chars().take(200).collect(),
    }
}

fn error_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
