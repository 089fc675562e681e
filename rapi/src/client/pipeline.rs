//! Ordered request, response and error stages.
//!
//! A [`Pipeline`] is assembled once, by value, and handed to the client; it is
//! never mutated afterwards. Each stage is named and can be exercised on its
//! own:
//! - request stages transform the merged [`RequestConfig`] before dispatch,
//! - response stages transform a successful body before it is cached,
//! - error stages get a chance to recover from a failed attempt, returning
//!   either a replacement body or the (possibly updated) error to escalate.
use crate::{
    client::{
        request::RequestConfig,
        retry::RetryPolicy,
        transport::Dispatcher,
    },
    error::NetworkError,
};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tracing::{debug, trace};

pub const ACCESS_TOKEN_KEY: &str = "access_token";

pub trait RequestStage: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, config: RequestConfig) -> Result<RequestConfig, NetworkError>;
}

pub trait ResponseStage: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, body: Value, config: &RequestConfig) -> Result<Value, NetworkError>;
}

#[async_trait]
pub trait ErrorStage: Send + Sync {
    fn name(&self) -> &str;
    async fn recover(
        &self,
        error: NetworkError,
        dispatcher: &Dispatcher,
    ) -> Result<Value, NetworkError>;
}

#[derive(Clone, Default)]
pub struct Pipeline {
    request: Vec<Arc<dyn RequestStage>>,
    response: Vec<Arc<dyn ResponseStage>>,
    error: Vec<Arc<dyn ErrorStage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bearer token injection (when a store is given), envelope unwrapping and
    /// the default retry policy.
    pub fn standard(tokens: Option<Arc<dyn TokenStore>>) -> Self {
        let pipeline = match tokens {
            Some(store) => Self::new().with_request_stage(BearerAuth::new(store)),
            None => Self::new(),
        };
        pipeline
            .with_response_stage(EnvelopeUnwrap)
            .with_error_stage(RetryPolicy::default())
    }

    pub fn with_request_stage(mut self, stage: impl RequestStage + 'static) -> Self {
        self.request.push(Arc::new(stage));
        self
    }

    pub fn with_response_stage(mut self, stage: impl ResponseStage + 'static) -> Self {
        self.response.push(Arc::new(stage));
        self
    }

    pub fn with_error_stage(mut self, stage: impl ErrorStage + 'static) -> Self {
        self.error.push(Arc::new(stage));
        self
    }

    /// Stage names in execution order, grouped request / response / error.
    pub fn stage_names(&self) -> (Vec<String>, Vec<String>, Vec<String>) {
        (
            self.request.iter().map(|s| s.name().to_string()).collect(),
            self.response.iter().map(|s| s.name().to_string()).collect(),
            self.error.iter().map(|s| s.name().to_string()).collect(),
        )
    }

    pub fn transform_request(&self, config: RequestConfig) -> Result<RequestConfig, NetworkError> {
        self.request.iter().try_fold(config, |config, stage| {
            trace!("request stage {}", stage.name());
            stage.apply(config)
        })
    }

    pub fn transform_response(&self, body: Value, config: &RequestConfig) -> Result<Value, NetworkError> {
        self.response.iter().try_fold(body, |body, stage| {
            trace!("response stage {}", stage.name());
            stage.apply(body, config)
        })
    }

    /// Offers `error` to each error stage in order. The first stage to produce
    /// a body wins; otherwise the error as left by the last stage escalates.
    pub async fn recover(
        &self,
        mut error: NetworkError,
        dispatcher: &Dispatcher,
    ) -> Result<Value, NetworkError> {
        for stage in &self.error {
            match stage.recover(error, dispatcher).await {
                Ok(body) => {
                    debug!("error stage {} recovered the request", stage.name());
                    return Ok(body);
                }
                Err(escalated) => error = escalated,
            }
        }
        Err(error)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (request, response, error) = self.stage_names();
        f.debug_struct("Pipeline")
            .field("request", &request)
            .field("response", &response)
            .field("error", &error)
            .finish()
    }
}

/// Opaque key/value store holding authentication tokens.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(key: &str, value: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(key, value.into());
        store
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Adds `Authorization: Bearer <token>` when the store holds a token. The
/// token is read on every request so refreshed tokens are picked up.
pub struct BearerAuth {
    store: Arc<dyn TokenStore>,
    key: String,
}

impl BearerAuth {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self::with_key(store, ACCESS_TOKEN_KEY)
    }

    pub fn with_key(store: Arc<dyn TokenStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

impl RequestStage for BearerAuth {
    fn name(&self) -> &str {
        "bearer_auth"
    }

    fn apply(&self, mut config: RequestConfig) -> Result<RequestConfig, NetworkError> {
        if let Some(token) = self.store.get(&self.key).filter(|t| !t.is_empty()) {
            config
                .headers
                .insert("authorization".to_string(), format!("Bearer {token}"));
        }
        Ok(config)
    }
}

/// Unwraps `{status|message, data}` envelopes down to `data`. Any other body
/// is the payload as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeUnwrap;

impl ResponseStage for EnvelopeUnwrap {
    fn name(&self) -> &str {
        "envelope_unwrap"
    }

    fn apply(&self, body: Value, _config: &RequestConfig) -> Result<Value, NetworkError> {
        match body {
            Value::Object(mut root)
                if root.contains_key("data")
                    && (root.contains_key("status") || root.contains_key("message")) =>
            {
                Ok(root.remove("data").unwrap_or(Value::Null))
            }
            other => Ok(other),
        }
    }
}
