//! Wire level request dispatch.
//!
//! The [`Transport`] trait is the seam between the client logic and the HTTP
//! stack; [`ReqwestTransport`] is the production implementation. [`Dispatcher`]
//! turns a [`RequestConfig`] into one transport call and maps the outcome to
//! either the response body or a [`NetworkError`].
use crate::{
    client::request::{Method, RequestBody, RequestConfig},
    error::NetworkError,
};
use async_trait::async_trait;
use rapi_config::{
    ClientConfig, ConfigError,
    http::{HttpClientParams, build_http_client},
};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::trace;

/// Fully resolved request, ready to go on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
}

impl PreparedRequest {
    pub fn from_config(base_url: &str, config: &RequestConfig) -> Self {
        let mut headers = config.headers.clone();
        if config.body.as_ref().is_some_and(RequestBody::is_multipart) {
            // the transport sets its own boundary
            headers.remove("content-type");
        }

        Self {
            method: config.method,
            url: build_url(base_url, &config.endpoint),
            headers,
            query: config
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: config.body.clone(),
            timeout: config.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` when empty, a string when not JSON.
    pub body: Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("no response received: {0}")]
    Network(String),
    #[error("request could not be built: {0}")]
    Setup(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_builder() {
            TransportError::Setup(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: PreparedRequest) -> Result<TransportResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let client = build_http_client(HttpClientParams::from_client_config(config))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: PreparedRequest) -> Result<TransportResponse, TransportError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| TransportError::Setup(format!("invalid url {}: {e}", request.url)))?;

        let mut builder = self
            .client
            .request(request.method.to_reqwest(), url)
            .timeout(request.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Multipart(payload)) => builder.multipart(
                payload
                    .into_form()
                    .map_err(|e| TransportError::Setup(e.to_string()))?,
            ),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        trace!("{} responded {} ({} bytes)", request.url, status, bytes.len());

        Ok(TransportResponse::new(status, parse_body(&bytes)))
    }
}

pub fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Absolute endpoints pass through untouched, relative ones are joined to
/// `base_url` with exactly one slash between them.
pub fn build_url(base_url: &str, endpoint: &str) -> String {
    if has_scheme(endpoint) {
        return endpoint.to_string();
    }
    match (base_url.ends_with('/'), endpoint.starts_with('/')) {
        (true, true) => format!("{}{}", base_url, &endpoint[1..]),
        (false, false) if !endpoint.is_empty() => format!("{base_url}/{endpoint}"),
        _ => format!("{base_url}{endpoint}"),
    }
}

/// `scheme://` prefix, where the scheme is a letter followed by letters,
/// digits, `+`, `-` or `.`.
fn has_scheme(endpoint: &str) -> bool {
    let Some((scheme, _)) = endpoint.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Sends one attempt of a request and classifies the outcome. Used for the
/// first attempt and, directly, by retries.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn dispatch(&self, config: &RequestConfig) -> Result<Value, NetworkError> {
        let request = PreparedRequest::from_config(&self.base_url, config);
        let url = request.url.clone();

        match self.transport.send(request).await {
            Ok(response) if response.is_success() => Ok(response.body),
            Ok(response) => Err(NetworkError::server(
                response.status,
                &response.body,
                config,
                url,
            )),
            Err(TransportError::Timeout(message)) => {
                Err(NetworkError::network(message, true, config, url))
            }
            Err(TransportError::Network(message)) => {
                Err(NetworkError::network(message, false, config, url))
            }
            Err(TransportError::Setup(message)) => Err(NetworkError::setup(message, config, url)),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("base_url", &self.base_url)
            .finish()
    }
}
