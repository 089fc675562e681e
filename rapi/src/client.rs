//! The request executor.
//!
//! [`ApiClient`] owns one transport, one stage pipeline, one response cache and
//! one deduplicator, all injected at construction through [`ApiClientBuilder`].
//! A call goes through: merge options, request stages, signature, cache lookup
//! (cacheable GETs only), deduplication, dispatch, error stages on failure,
//! response stages and finally the cache write.
pub mod dedup;
pub mod pipeline;
pub mod request;
pub mod retry;
pub mod transport;

use crate::error::NetworkError;
use dedup::RequestDeduplicator;
use pipeline::{Pipeline, TokenStore};
use rapi_cache::{CacheInvalidator, CacheOptions, CleanupHandle, ResponseCache};
use rapi_config::{ClientConfig, ConfigError};
use request::{Method, RequestConfig, RequestOptions};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};
use transport::{Dispatcher, ReqwestTransport, Transport};

struct ClientInner {
    config: ClientConfig,
    dispatcher: Dispatcher,
    pipeline: Pipeline,
    cache: Arc<ResponseCache<Value>>,
    deduplicator: RequestDeduplicator,
}

impl ClientInner {
    /// One deduplicated unit of work: first dispatch, recovery, response
    /// stages and the cache write.
    async fn execute(&self, config: RequestConfig, signature: String) -> Result<Value, NetworkError> {
        let body = match self.dispatcher.dispatch(&config).await {
            Ok(body) => body,
            Err(error) => {
                debug!("{} {} failed: {}", config.method, config.endpoint, error.message);
                self.pipeline.recover(error, &self.dispatcher).await?
            }
        };

        let body = self.pipeline.transform_response(body, &config)?;
        if config.is_cacheable() {
            self.cache.set(
                signature,
                body.clone(),
                config.cache_ttl,
                &config.invalidation_tags,
            );
        }
        Ok(body)
    }
}

/// Cheap to clone; clones share transport, cache and in-flight requests.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    /// Client over the reqwest transport with the standard pipeline.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub fn cache(&self) -> &Arc<ResponseCache<Value>> {
        &self.inner.cache
    }

    pub fn invalidator(&self) -> CacheInvalidator<Value> {
        CacheInvalidator::new(Arc::clone(&self.inner.cache))
    }

    /// Number of distinct requests currently on the wire.
    pub fn in_flight(&self) -> usize {
        self.inner.deduplicator.in_flight()
    }

    /// Starts the periodic expired-entry sweep at the configured interval.
    /// The sweep runs until the handle is stopped or dropped.
    pub fn start_cache_cleanup(&self) -> CleanupHandle {
        self.inner
            .cache
            .start_cleanup(self.inner.config.cache_cleanup_interval)
    }

    #[instrument(skip(self, options), fields(method = %options.method.unwrap_or_default()))]
    pub async fn request(&self, endpoint: &str, options: RequestOptions) -> Result<Value, NetworkError> {
        let inner = &self.inner;
        let merged = RequestConfig::merge(endpoint, &inner.config, options);
        let config = match inner.pipeline.transform_request(merged) {
            Ok(config) => config,
            Err(error) => return inner.pipeline.recover(error, &inner.dispatcher).await,
        };

        let signature = config.signature();
        if config.is_cacheable() {
            if let Some(hit) = inner.cache.get(&signature) {
                debug!("cache hit for {}", signature);
                return Ok(hit);
            }
        }

        let work = {
            let inner = Arc::clone(inner);
            let config = config.clone();
            let signature = signature.clone();
            async move { inner.execute(config, signature).await }
        };
        inner.deduplicator.run(&signature, &config, work).await
    }

    pub async fn get(&self, endpoint: &str, options: RequestOptions) -> Result<Value, NetworkError> {
        self.request(endpoint, options.method(Method::Get)).await
    }

    pub async fn post(&self, endpoint: &str, options: RequestOptions) -> Result<Value, NetworkError> {
        self.request(endpoint, options.method(Method::Post)).await
    }

    pub async fn put(&self, endpoint: &str, options: RequestOptions) -> Result<Value, NetworkError> {
        self.request(endpoint, options.method(Method::Put)).await
    }

    pub async fn patch(&self, endpoint: &str, options: RequestOptions) -> Result<Value, NetworkError> {
        self.request(endpoint, options.method(Method::Patch)).await
    }

    pub async fn delete(&self, endpoint: &str, options: RequestOptions) -> Result<Value, NetworkError> {
        self.request(endpoint, options.method(Method::Delete)).await
    }

    /// GET deserialized into `T`.
    pub async fn get_json<T>(&self, endpoint: &str, options: RequestOptions) -> Result<T, NetworkError>
    where
        T: DeserializeOwned,
    {
        let options = options.method(Method::Get);
        let body = self.request(endpoint, options.clone()).await?;
        self.decode(endpoint, options, body)
    }

    /// POST of `payload` as JSON, response deserialized into `T`.
    pub async fn post_json<B, T>(
        &self,
        endpoint: &str,
        payload: &B,
        options: RequestOptions,
    ) -> Result<T, NetworkError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let options = options.method(Method::Post);
        let body = match serde_json::to_value(payload) {
            Ok(body) => body,
            Err(e) => {
                let config = RequestConfig::merge(endpoint, &self.inner.config, options);
                return Err(NetworkError::setup(
                    format!("payload is not serializable: {e}"),
                    &config,
                    endpoint,
                ));
            }
        };
        let options = options.json(body);
        let response = self.request(endpoint, options.clone()).await?;
        self.decode(endpoint, options, response)
    }

    fn decode<T>(&self, endpoint: &str, options: RequestOptions, body: Value) -> Result<T, NetworkError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(body).map_err(|e| {
            let config = RequestConfig::merge(endpoint, &self.inner.config, options);
            NetworkError::decode(format!("unexpected response shape: {e}"), &config)
        })
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url)
            .field("pipeline", &self.inner.pipeline)
            .field("cache", &self.inner.cache)
            .finish()
    }
}

/// Wires an [`ApiClient`]. Everything not provided falls back to the reqwest
/// transport, [`Pipeline::standard`] and a cache sized from the config.
pub struct ApiClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    pipeline: Option<Pipeline>,
    cache: Option<Arc<ResponseCache<Value>>>,
    tokens: Option<Arc<dyn TokenStore>>,
}

impl ApiClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            pipeline: None,
            cache: None,
            tokens: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Shares an existing cache, e.g. between several clients.
    pub fn cache(mut self, cache: Arc<ResponseCache<Value>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Token store for the standard pipeline's bearer stage. Ignored when a
    /// custom pipeline is set.
    pub fn tokens(mut self, tokens: Arc<dyn TokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn build(self) -> Result<ApiClient, ConfigError> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::from_config(&self.config)?),
        };
        let pipeline = self
            .pipeline
            .unwrap_or_else(|| Pipeline::standard(self.tokens));
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(ResponseCache::new(CacheOptions {
                capacity: self.config.cache_capacity,
                default_ttl: self.config.cache_ttl,
            }))
        });

        debug!("api client for {} with {:?}", self.config.base_url, pipeline);
        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                dispatcher: Dispatcher::new(transport, self.config.base_url.clone()),
                config: self.config,
                pipeline,
                cache,
                deduplicator: RequestDeduplicator::new(),
            }),
        })
    }
}
