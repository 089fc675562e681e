//! Automatic retry of failed requests.
//!
//! [`RetryClassifier`] decides *whether* an error is worth another attempt,
//! [`ExponentialJitter`] decides *when*, and the per-request budget on
//! [`RequestConfig`] decides *how often*. [`RetryPolicy`] ties the three
//! together as an error stage.
use crate::{
    client::{pipeline::ErrorStage, request::RequestConfig, transport::Dispatcher},
    error::{ErrorKind, NetworkError},
};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use rand::Rng;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryClassifier {
    /// Every server or network failure, 4xx included.
    #[default]
    Always,
    /// Network failures, timeouts, 408, 429 and 5xx only.
    Transient,
}

impl RetryClassifier {
    pub fn is_retryable(&self, error: &NetworkError) -> bool {
        match (self, error.kind) {
            (_, ErrorKind::RequestSetup | ErrorKind::Decode) => false,
            (_, ErrorKind::Network { .. }) => true,
            (RetryClassifier::Always, ErrorKind::Server) => true,
            (RetryClassifier::Transient, ErrorKind::Server) => error
                .status_code
                .is_some_and(|s| s == 408 || s == 429 || (500..600).contains(&s)),
        }
    }
}

/// `2^n * base + U[0, max_jitter)` for the n-th retry, ending once the budget
/// is spent.
#[derive(Debug, Clone)]
pub struct ExponentialJitter {
    base: Duration,
    max_jitter: Duration,
    attempt: u32,
    budget: u32,
    start: u32,
}

impl ExponentialJitter {
    /// Schedule for a request that has already been retried `attempt` times.
    pub fn new(base: Duration, max_jitter: Duration, attempt: u32, budget: u32) -> Self {
        Self {
            base,
            max_jitter,
            attempt,
            budget,
            start: attempt,
        }
    }

    /// The delay without jitter for retry number `attempt`.
    pub fn deterministic_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max))
    }
}

impl Backoff for ExponentialJitter {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.budget {
            return None;
        }
        self.attempt += 1;
        Some(self.deterministic_delay(self.attempt) + self.jitter())
    }

    fn reset(&mut self) {
        self.attempt = self.start;
    }
}

/// Error stage re-issuing a failed request straight through the dispatcher,
/// bypassing cache and deduplication. Only requests with a retry budget are
/// retried; once the budget is spent the last error is returned unchanged.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    classifier: RetryClassifier,
    base_delay: Duration,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            classifier: RetryClassifier::default(),
            base_delay: DEFAULT_BASE_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    pub fn schedule(&self, config: &RequestConfig) -> ExponentialJitter {
        ExponentialJitter::new(
            self.base_delay,
            self.max_jitter,
            config.retry_count,
            config.retries.unwrap_or(0),
        )
    }
}

#[async_trait]
impl ErrorStage for RetryPolicy {
    fn name(&self) -> &str {
        "retry"
    }

    async fn recover(
        &self,
        mut error: NetworkError,
        dispatcher: &Dispatcher,
    ) -> Result<Value, NetworkError> {
        let Some(mut config) = error.request_config().cloned() else {
            return Err(error);
        };
        let mut schedule = self.schedule(&config);

        loop {
            if !self.classifier.is_retryable(&error) {
                debug!("{} is not retryable", error.code);
                return Err(error);
            }
            let Some(delay) = schedule.next_backoff() else {
                return Err(error);
            };

            config.retry_count = schedule.attempt();
            warn!(
                "Retrying {} {} (attempt {}, {} left) in {:?} after: {}",
                config.method,
                config.endpoint,
                config.retry_count,
                config.retries_left(),
                delay,
                error.message
            );
            tokio::time::sleep(delay).await;

            match dispatcher.dispatch(&config).await {
                Ok(body) => return Ok(body),
                Err(next) => error = next,
            }
        }
    }
}
