//! Construction of the `reqwest` client the API layer sends requests with.
//!
//! # Example
//! ```no_run
//! use rapi_config::{ClientConfig, http::{HttpClientParams, build_http_client}};
//!
//! let config = ClientConfig::from_env().unwrap();
//! let client = build_http_client(HttpClientParams::from_client_config(&config)).unwrap();
//! ```
use crate::ClientConfig;
use std::time::Duration;

/// Parameters for configuring an HTTP client.
///
/// Per-request timeouts are applied on top of `timeout` by the transport, so
/// this value is only the fallback for requests that do not set one.
#[derive(Debug, Clone)]
pub struct HttpClientParams<'a> {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: &'a str,
}

impl<'a> HttpClientParams<'a> {
    pub fn from_client_config(config: &'a ClientConfig) -> Self {
        Self {
            timeout: config.timeout,
            connect_timeout: config.connect_timeout,
            user_agent: &config.user_agent,
        }
    }
}

/// Builds an HTTP client with the specified parameters.
///
/// Creates a reqwest::Client configured with:
/// - rustls TLS
/// - Timeout configurations
/// - User agent
/// - gzip decoding
pub fn build_http_client(
    params: HttpClientParams,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .gzip(true)
        .timeout(params.timeout)
        .connect_timeout(params.connect_timeout)
        .user_agent(params.user_agent)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientConfigBuilder;

    #[test]
    fn test_build_client() {
        let client = build_http_client(HttpClientParams {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            user_agent: "hello",
        });

        assert!(client.is_ok());
    }

    #[test]
    fn test_params_from_client_config() {
        let config = ClientConfigBuilder::default()
            .timeout(Duration::from_secs(12))
            .connect_timeout(Duration::from_secs(3))
            .user_agent("dashboard/2.0")
            .build()
            .unwrap();
        let params = HttpClientParams::from_client_config(&config);

        assert_eq!(params.timeout, Duration::from_secs(12));
        assert_eq!(params.connect_timeout, Duration::from_secs(3));
        assert_eq!(params.user_agent, "dashboard/2.0");
        assert!(build_http_client(params).is_ok());
    }
}
