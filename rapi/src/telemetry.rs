//! Log output for binaries and demos built on the client.
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the filter directives, e.g. `rapi=debug`.
pub const LOG_ENV: &str = "RAPI_LOG";

pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Installs a compact `fmt` subscriber filtered by `RAPI_LOG`, falling back to
/// `default_directives` when the variable is unset or invalid. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(default_directives: &str) -> Result<(), InitError> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let _ = init_tracing("rapi=debug");
        assert!(init_tracing("not a [valid directive").is_err());
    }
}
