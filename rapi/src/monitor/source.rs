use crate::{
    client::{ApiClient, request::{RequestConfig, RequestOptions}},
    error::NetworkError,
    monitor::status::TaskStatusDocument,
};
use async_trait::async_trait;
use std::future::Future;

pub const DEFAULT_STATUS_PATH: &str = "/tasks/{task_id}";

/// Where a monitor gets task status documents from.
#[async_trait]
pub trait TaskStatusSource: Send + Sync {
    async fn fetch_status(&self, task_id: &str) -> Result<TaskStatusDocument, NetworkError>;
}

#[async_trait]
impl<F, Fut> TaskStatusSource for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskStatusDocument, NetworkError>> + Send + 'static,
{
    async fn fetch_status(&self, task_id: &str) -> Result<TaskStatusDocument, NetworkError> {
        (self)(task_id.to_string()).await
    }
}

/// Fetches status documents through an [`ApiClient`], never from the cache.
#[derive(Debug, Clone)]
pub struct ClientStatusSource {
    client: ApiClient,
    path_template: String,
}

impl ClientStatusSource {
    pub fn new(client: ApiClient) -> Self {
        Self::with_path(client, DEFAULT_STATUS_PATH)
    }

    /// `template` must contain `{task_id}`.
    pub fn with_path(client: ApiClient, template: impl Into<String>) -> Self {
        Self {
            client,
            path_template: template.into(),
        }
    }

    pub fn endpoint(&self, task_id: &str) -> String {
        self.path_template.replace("{task_id}", task_id)
    }
}

#[async_trait]
impl TaskStatusSource for ClientStatusSource {
    async fn fetch_status(&self, task_id: &str) -> Result<TaskStatusDocument, NetworkError> {
        let endpoint = self.endpoint(task_id);
        let options = RequestOptions::new().skip_cache();
        let body = self.client.get(&endpoint, options.clone()).await?;

        serde_json::from_value(body).map_err(|e| {
            let config = RequestConfig::merge(&endpoint, self.client.config(), options);
            NetworkError::decode(format!("invalid task status document: {e}"), &config)
        })
    }
}
