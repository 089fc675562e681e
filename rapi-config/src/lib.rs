pub mod client;
pub mod config;
#[cfg(feature = "http")]
pub mod http;

pub use client::{ClientConfig, ClientConfigBuilder, ClientConfigBuilderError};
pub use config::{ConfigError, Configurable};
