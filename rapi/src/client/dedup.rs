//! Coalescing of identical in-flight requests.
//!
//! The first caller for a signature becomes the leader: its work is spawned
//! onto the runtime and every concurrent caller with the same signature awaits
//! the same shared outcome. The entry is removed as soon as the work settles,
//! so later callers start a fresh request. Because the work runs in its own
//! task, dropping the leader's future does not cancel the request for the
//! followers.
use crate::{client::request::RequestConfig, error::NetworkError};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use serde_json::Value;
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::debug;

type SharedResponse = Shared<BoxFuture<'static, Result<Value, NetworkError>>>;

#[derive(Clone, Default)]
pub struct RequestDeduplicator {
    pending: Arc<Mutex<HashMap<String, SharedResponse>>>,
}

impl RequestDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SharedResponse>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `work` unless a request with the same `signature` is already in
    /// flight, in which case its outcome is shared instead.
    pub async fn run<F>(
        &self,
        signature: &str,
        config: &RequestConfig,
        work: F,
    ) -> Result<Value, NetworkError>
    where
        F: Future<Output = Result<Value, NetworkError>> + Send + 'static,
    {
        let shared = {
            let mut pending = self.lock();
            match pending.get(signature) {
                Some(existing) => {
                    debug!("joining in-flight request {}", signature);
                    existing.clone()
                }
                None => {
                    let shared = self.lead(signature, config, work);
                    pending.insert(signature.to_string(), shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    // Must be called with the map locked, so the leader cannot remove its
    // entry before it was inserted.
    fn lead<F>(&self, signature: &str, config: &RequestConfig, work: F) -> SharedResponse
    where
        F: Future<Output = Result<Value, NetworkError>> + Send + 'static,
    {
        let pending = Arc::clone(&self.pending);
        let key = signature.to_string();
        let handle = tokio::spawn(async move {
            let result = work.await;
            pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&key);
            result
        });

        let config = config.clone();
        async move {
            handle.await.unwrap_or_else(|e| {
                Err(NetworkError::network(
                    format!("request task failed: {e}"),
                    false,
                    &config,
                    config.endpoint.clone(),
                ))
            })
        }
        .boxed()
        .shared()
    }

    /// Number of distinct requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    pub fn is_pending(&self, signature: &str) -> bool {
        self.lock().contains_key(signature)
    }
}

impl std::fmt::Debug for RequestDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
