//! # RAPI - resilient API access layer
//!
//! `rapi` sits between an application and a JSON REST backend and makes the
//! backend cheaper and safer to talk to.
//!
//! ## Features
//!
//! - **Response Cache**: GET responses are kept in a bounded TTL cache keyed by
//!   request signature and can be invalidated by key pattern or tag.
//! - **Domain Invalidation**: `CacheInvalidator` maps writes on users,
//!   databases, reports, tables, queries and access grants to the cached reads
//!   they make stale.
//! - **Request Deduplication**: identical requests issued while one is in
//!   flight share a single round trip and its outcome.
//! - **Stage Pipeline**: named request, response and error stages (bearer
//!   token injection, envelope unwrapping, retry) composed explicitly.
//! - **Retry with Backoff**: exponential backoff with jitter, bounded by a
//!   per-request budget.
//! - **Task Monitoring**: polling of long-running server-side tasks with
//!   progress, completion and failure callbacks.
//!
//! ## Getting Started
//!
//! ```toml
//! [dependencies]
//! rapi = "0.1"
//! ```
//!
//! Check demos!
//!
//! ## Modules
//!
//! - `client`: the request executor and its building blocks.
//! - `monitor`: background task polling.
//! - `cache`: response cache and invalidation (`rapi-cache`).
//! - `config`: client configuration (`rapi-config`).
//! - `telemetry`: tracing setup for binaries.
pub mod client;
pub mod error;
pub mod monitor;
pub mod telemetry;

pub use client::{
    ApiClient, ApiClientBuilder,
    dedup::RequestDeduplicator,
    pipeline::{
        BearerAuth, EnvelopeUnwrap, ErrorStage, MemoryTokenStore, Pipeline, RequestStage,
        ResponseStage, TokenStore,
    },
    request::{Method, MultipartPayload, RequestConfig, RequestOptions},
    retry::{ExponentialJitter, RetryClassifier, RetryPolicy},
    transport::{Dispatcher, ReqwestTransport, Transport},
};
pub use error::{ErrorKind, MonitorError, NetworkError};
pub use monitor::{MonitorOptions, TaskMonitor, TaskSnapshot, TaskState, TaskStatusDocument};
pub use rapi_cache as cache;
pub use rapi_config as config;
pub use rapi_config::http;
// re-export
pub use async_trait;
pub use backoff;
pub use reqwest;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;
pub use tracing_subscriber;
