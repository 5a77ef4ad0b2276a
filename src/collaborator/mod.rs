//! Outbound contracts for the collaborator services the engine drives.
//!
//! Each method performs exactly one network request. Timeout and retry are
//! applied by the caller through [`crate::resilience::Resilience`].

pub mod http;

pub use http::HttpCollaborators;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;
use serde_json::Value;

use crate::resilience::CallError;

pub const DATA_FETCH: &str = "data-fetch";
pub const INFERENCE: &str = "inference";
pub const CHART: &str = "chart";

/// Base URLs (and optional bearer token) of the collaborator services.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub data_fetch_url: String,
    pub inference_url: String,
    pub chart_url: String,
    pub token: Option<SecretString>,
}

/// Per-call deadlines, one per collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub data_fetch: Duration,
    pub inference: Duration,
    pub chart: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            data_fetch: Duration::from_secs(60),
            inference: Duration::from_secs(30),
            chart: Duration::from_secs(60),
        }
    }
}

/// Where the data-fetch service should read the report from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadRequest {
    /// A file in object storage (`POST /read/storage`).
    Storage {
        file_path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        bucket: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sheet_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        header_row: Option<i64>,
    },
    /// A spreadsheet document (`POST /read/sheets`).
    Sheets {
        spreadsheet_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        range: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sheet_name: Option<String>,
    },
}

impl ReadRequest {
    pub fn path(&self) -> &'static str {
        match self {
            ReadRequest::Storage { .. } => "/read/storage",
            ReadRequest::Sheets { .. } => "/read/sheets",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzeRequest {
    pub query: String,
    pub report_id: Option<String>,
    pub context: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartRequest {
    pub chart_type: String,
    pub data: Value,
    pub title: String,
    pub save_to_storage: bool,
}

/// The three collaborator services, as seen by workflow steps.
#[async_trait]
pub trait Collaborators: Send + Sync {
    /// Data-fetch: returns `{data: {rows, columns, data: [...]}, ...}`.
    async fn read_report(&self, request: &ReadRequest) -> Result<Value, CallError>;

    /// Inference: returns `{insights, ...}`.
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<Value, CallError>;

    /// Chart rendering: returns `{chart_id, public_url, ...}`.
    async fn create_chart(&self, request: &ChartRequest) -> Result<Value, CallError>;
}
