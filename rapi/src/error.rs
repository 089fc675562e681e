use crate::client::request::{Method, RequestConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
pub const REQUEST_SETUP_ERROR: &str = "REQUEST_SETUP_ERROR";
pub const DECODE_ERROR: &str = "DECODE_ERROR";
pub const HTTP_ERROR: &str = "HTTP_ERROR";

/// Where a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The server answered with a non-2xx status.
    Server,
    /// The request went out but no response came back.
    Network { timed_out: bool },
    /// The request could not be built or dispatched at all.
    RequestSetup,
    /// A successful response did not have the expected shape.
    Decode,
}

/// Normalized failure of a single API call.
///
/// Cloneable so deduplicated callers can all receive the same outcome. The
/// config of the failed attempt travels along so the retry stage can re-issue
/// it.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{method} {url} failed ({code}): {message}")]
pub struct NetworkError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub status_code: Option<u16>,
    pub details: Option<Value>,
    pub url: String,
    pub method: Method,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub config: Option<Box<RequestConfig>>,
}

impl NetworkError {
    fn new(
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
        config: &RequestConfig,
        url: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            status_code: None,
            details: None,
            url: url.into(),
            method: config.method,
            timestamp: Utc::now(),
            retry_count: config.retry_count,
            config: Some(Box::new(config.clone())),
        }
    }

    /// Builds the error for a non-2xx response from its parsed body. Both
    /// `{"error": {"code", "message", "details"}}` and flat `message` /
    /// `detail` bodies are understood.
    pub fn server(status: u16, body: &Value, config: &RequestConfig, url: impl Into<String>) -> Self {
        let error = body.get("error");
        let code = error
            .and_then(|e| e.get("code"))
            .and_then(value_as_string)
            .unwrap_or_else(|| HTTP_ERROR.to_string());
        let message = error
            .and_then(|e| e.get("message"))
            .or_else(|| error.filter(|e| e.is_string()))
            .or_else(|| body.get("message"))
            .or_else(|| body.get("detail"))
            .and_then(value_as_string)
            .unwrap_or_else(|| format!("Request failed with status code {status}"));

        let mut err = Self::new(ErrorKind::Server, code, message, config, url);
        err.status_code = Some(status);
        err.details = error.and_then(|e| e.get("details")).cloned();
        err
    }

    pub fn network(
        message: impl Into<String>,
        timed_out: bool,
        config: &RequestConfig,
        url: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorKind::Network { timed_out },
            NETWORK_ERROR,
            message,
            config,
            url,
        )
    }

    pub fn setup(message: impl Into<String>, config: &RequestConfig, url: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::RequestSetup,
            REQUEST_SETUP_ERROR,
            message,
            config,
            url,
        )
    }

    pub fn decode(message: impl Into<String>, config: &RequestConfig) -> Self {
        Self::new(
            ErrorKind::Decode,
            DECODE_ERROR,
            message,
            config,
            config.endpoint.clone(),
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Network { timed_out: true })
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code.is_some_and(|s| (400..500).contains(&s))
    }

    pub fn request_config(&self) -> Option<&RequestConfig> {
        self.config.as_deref()
    }
}

/// Terminal failure of a task monitor, delivered through `on_error`.
#[derive(thiserror::Error, Debug, Clone)]
pub enum MonitorError {
    #[error("Task {task_id} failed: {reason}")]
    TaskFailed { task_id: String, reason: String },
    #[error("Unknown task status: {0}")]
    UnknownStatus(String),
    #[error("Failed to fetch task status: {0}")]
    Fetch(#[from] NetworkError),
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
