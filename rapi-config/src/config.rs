use std::{fs, path};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
    #[error("Missing config section: {0}")]
    MissingSection(String),
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("Invalid base url `{0}`: expected an http:// or https:// url")]
    InvalidBaseUrl(String),
    #[cfg(feature = "http")]
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Access to a YAML document holding application settings.
///
/// Implementors only expose the parsed document, lookups come for free.
pub trait Configurable {
    fn config(&self) -> &serde_yaml::Value;

    // read configuration from yaml config
    fn load_config(
        config_file_path: impl AsRef<path::Path>,
    ) -> Result<serde_yaml::Value, ConfigError> {
        let content: String = fs::read_to_string(config_file_path)?;
        let config: serde_yaml::Value = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Extract Value from config using dot notation i.e. "api.cache.ttl"
    fn get_config_value(&self, key: &str) -> Option<&serde_yaml::Value> {
        if key.is_empty() {
            return None;
        }
        key.split('.').try_fold(self.config(), |node, segment| match node {
            serde_yaml::Value::Mapping(map) => {
                map.get(serde_yaml::Value::String(segment.to_string()))
            }
            _ => None,
        })
    }

    /// Same as [`Configurable::get_config_value`] but a missing key is an error.
    fn config_section(&self, key: &str) -> Result<&serde_yaml::Value, ConfigError> {
        self.get_config_value(key)
            .ok_or_else(|| ConfigError::MissingSection(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    struct TestApp {
        config: serde_yaml::Value,
    }

    impl Configurable for TestApp {
        fn config(&self) -> &serde_yaml::Value {
            &self.config
        }
    }

    fn app_from_str(yaml: &str) -> TestApp {
        TestApp {
            config: serde_yaml::from_str(yaml).unwrap(),
        }
    }

    #[test]
    fn test_load_config_valid_yaml() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yml");
        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "api:\n  base_url: http://api.local\n  retries: 3").unwrap();

        let config = TestApp::load_config(&config_path).unwrap();
        assert_eq!(config["api"]["base_url"].as_str(), Some("http://api.local"));
        assert_eq!(config["api"]["retries"].as_u64(), Some(3));
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yml");
        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "invalid: : yaml: content").unwrap();

        let config = TestApp::load_config(&config_path);
        assert!(matches!(config, Err(ConfigError::YamlParse(_))));
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempdir().unwrap();
        let config = TestApp::load_config(dir.path().join("nope.yml"));
        assert!(matches!(config, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_get_config_value_nested() {
        let app = app_from_str(
            r#"
            api:
              cache:
                ttl: 120
            "#,
        );

        assert_eq!(
            app.get_config_value("api.cache.ttl").and_then(|v| v.as_u64()),
            Some(120)
        );
        assert_eq!(app.get_config_value("api.missing.ttl"), None);
        assert_eq!(app.get_config_value("api.cache.ttl.deeper"), None);
        assert_eq!(app.get_config_value(""), None);
    }

    #[test]
    fn test_config_section_missing() {
        let app = app_from_str("other: 1");
        let err = app.config_section("api").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(ref s) if s == "api"));
    }
}
