//! Per-call request description.
//!
//! [`RequestOptions`] is what a call site passes in, [`RequestConfig`] is the
//! result of merging those options over the client defaults. A config is built
//! fresh for every call and owned by that call (and its retries) only.
use rapi_config::ClientConfig;
use serde::Serialize;
use serde_json::Value;
use std::{collections::BTreeMap, fmt, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One part of a multipart upload.
#[derive(Debug, Clone, PartialEq)]
pub enum MultipartPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

impl MultipartPart {
    pub fn name(&self) -> &str {
        match self {
            MultipartPart::Text { name, .. } | MultipartPart::File { name, .. } => name,
        }
    }

    /// Text parts by value, file parts by name, type, size and md5 digest.
    fn signature(&self) -> String {
        match self {
            MultipartPart::Text { name, value } => {
                format!("{name}={}", Value::String(value.clone()))
            }
            MultipartPart::File {
                name,
                file_name,
                content_type,
                bytes,
            } => format!(
                "{name}=file({file_name};{};{};{:x})",
                content_type.as_deref().unwrap_or(""),
                bytes.len(),
                md5::compute(bytes)
            ),
        }
    }
}

/// File-bearing payload. Kept as plain data so a retry can send it again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartPayload {
    pub parts: Vec<MultipartPart>,
}

impl MultipartPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(MultipartPart::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: Option<&str>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        self.parts.push(MultipartPart::File {
            name: name.into(),
            file_name: file_name.into(),
            content_type: content_type.map(str::to_string),
            bytes: bytes.into(),
        });
        self
    }

    pub(crate) fn into_form(self) -> Result<reqwest::multipart::Form, reqwest::Error> {
        let mut form = reqwest::multipart::Form::new();
        for part in self.parts {
            form = match part {
                MultipartPart::Text { name, value } => form.text(name, value),
                MultipartPart::File {
                    name,
                    file_name,
                    content_type,
                    bytes,
                } => {
                    let mut file = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
                    if let Some(content_type) = content_type {
                        file = file.mime_str(&content_type)?;
                    }
                    form.part(name, file)
                }
            };
        }
        Ok(form)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Multipart(MultipartPayload),
}

impl RequestBody {
    pub fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart(_))
    }

    fn signature(&self) -> String {
        match self {
            RequestBody::Json(value) => value.to_string(),
            RequestBody::Multipart(payload) => {
                let parts: Vec<String> = payload.parts.iter().map(MultipartPart::signature).collect();
                format!("multipart[{}]", parts.join(","))
            }
        }
    }
}

/// Call-site overrides. Everything left unset falls back to the client
/// defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub method: Option<Method>,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub cache_ttl: Option<Duration>,
    pub invalidation_tags: Vec<String>,
    pub skip_cache: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn multipart(mut self, payload: MultipartPayload) -> Self {
        self.body = Some(RequestBody::Multipart(payload));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.invalidation_tags.push(tag.into());
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub endpoint: String,
    pub method: Method,
    /// Lowercase header names.
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
    /// Retry budget, `None` disables the retry stage for this request.
    pub retries: Option<u32>,
    pub retry_count: u32,
    pub cache_ttl: Option<Duration>,
    pub invalidation_tags: Vec<String>,
    pub skip_cache: bool,
}

impl RequestConfig {
    /// Merges call-site `options` over the client `defaults`. Headers are
    /// merged key by key, everything else is taken from the options when set.
    pub fn merge(endpoint: &str, defaults: &ClientConfig, options: RequestOptions) -> Self {
        let mut headers = defaults.default_headers.clone();
        headers.extend(
            options
                .headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value)),
        );

        let retries = match options.retries.unwrap_or(defaults.retries) {
            0 => None,
            budget => Some(budget),
        };

        Self {
            endpoint: endpoint.to_string(),
            method: options.method.unwrap_or_default(),
            headers,
            params: options.params,
            body: options.body,
            timeout: options.timeout.unwrap_or(defaults.timeout),
            retries,
            retry_count: 0,
            cache_ttl: options.cache_ttl,
            invalidation_tags: options.invalidation_tags,
            skip_cache: options.skip_cache,
        }
    }

    /// Canonical `method:endpoint:params:body` key used for caching and
    /// deduplication. Params are serialized in key order.
    pub fn signature(&self) -> String {
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        let body = self
            .body
            .as_ref()
            .map(RequestBody::signature)
            .unwrap_or_default();
        format!("{}:{}:{}:{}", self.method, self.endpoint, params, body)
    }

    pub fn is_cacheable(&self) -> bool {
        self.method == Method::Get && !self.skip_cache
    }

    pub fn retries_left(&self) -> u32 {
        self.retries
            .map_or(0, |budget| budget.saturating_sub(self.retry_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_defaults() {
        let defaults = ClientConfig::default();
        let config = RequestConfig::merge("/users", &defaults, RequestOptions::new());

        assert_eq!(config.method, Method::Get);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retries, Some(2));
        assert_eq!(config.retry_count, 0);
        assert_eq!(config.retries_left(), 2);
        let retried = RequestConfig {
            retry_count: 1,
            ..config.clone()
        };
        assert_eq!(retried.retries_left(), 1);
        assert_eq!(
            config.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
        assert!(config.is_cacheable());
    }

    #[test]
    fn test_merge_overrides() {
        let defaults = ClientConfig::default();
        let options = RequestOptions::new()
            .method(Method::Post)
            .header("Content-Type", "text/plain")
            .header("X-Trace", "abc")
            .timeout(Duration::from_secs(5))
            .retries(0)
            .json(json!({"name": "Sales"}));
        let config = RequestConfig::merge("/mssql-config", &defaults, options);

        assert_eq!(config.method, Method::Post);
        assert_eq!(config.headers.get("content-type").unwrap(), "text/plain");
        assert_eq!(config.headers.get("accept").unwrap(), "application/json");
        assert_eq!(config.headers.get("x-trace").unwrap(), "abc");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.retries, None);
        assert_eq!(config.retries_left(), 0);
        assert!(!config.is_cacheable());
    }

    #[test]
    fn test_signature() {
        let defaults = ClientConfig::default();
        let a = RequestConfig::merge(
            "/reports",
            &defaults,
            RequestOptions::new().param("page", 2).param("limit", 10),
        );
        let b = RequestConfig::merge(
            "/reports",
            &defaults,
            RequestOptions::new().param("limit", 10).param("page", 2),
        );

        assert_eq!(a.signature(), b.signature());
        assert_eq!(a.signature(), r#"GET:/reports:{"limit":"10","page":"2"}:"#);

        let post = RequestConfig::merge(
            "/reports",
            &defaults,
            RequestOptions::new().method(Method::Post).json(json!({"id": 1})),
        );
        assert_eq!(post.signature(), r#"POST:/reports:{}:{"id":1}"#);
    }

    #[test]
    fn test_multipart_signature() {
        let defaults = ClientConfig::default();
        let payload = MultipartPayload::new()
            .text("db_id", "1")
            .file("file", "data.csv", Some("text/csv"), b"a,b\n1,2".to_vec());
        let config = RequestConfig::merge(
            "/files/upload",
            &defaults,
            RequestOptions::new().method(Method::Post).multipart(payload),
        );
        assert_eq!(
            config.signature(),
            format!(
                "POST:/files/upload:{{}}:multipart[db_id=\"1\",file=file(data.csv;text/csv;7;{:x})]",
                md5::compute(b"a,b\n1,2")
            )
        );
        assert!(config.body.as_ref().unwrap().is_multipart());
    }

    #[test]
    fn test_multipart_signature_tracks_contents() {
        let upload = |file_name: &str, bytes: &[u8]| {
            RequestConfig::merge(
                "/files/upload",
                &ClientConfig::default(),
                RequestOptions::new().method(Method::Post).multipart(
                    MultipartPayload::new().file("file", file_name, Some("text/csv"), bytes.to_vec()),
                ),
            )
            .signature()
        };

        assert_eq!(upload("a.csv", b"x,y"), upload("a.csv", b"x,y"));
        assert_ne!(upload("a.csv", b"x,y"), upload("b.csv", b"x,y"));
        assert_ne!(upload("a.csv", b"x,y"), upload("a.csv", b"x,z"));

        let text = |value: &str| {
            RequestConfig::merge(
                "/files/upload",
                &ClientConfig::default(),
                RequestOptions::new()
                    .method(Method::Post)
                    .multipart(MultipartPayload::new().text("db_id", value)),
            )
            .signature()
        };
        assert_ne!(text("1"), text("2"));
    }

    #[test]
    fn test_skip_cache() {
        let config = RequestConfig::merge(
            "/tasks/1",
            &ClientConfig::default(),
            RequestOptions::new().skip_cache(),
        );
        assert!(!config.is_cacheable());
    }
}
