//! Single-shot HTTP execution.
//!
//! [`HttpClient`] is the raw network seam (reqwest in production, scripted
//! fakes in tests). [`Transport`] wraps it and turns every HTTP answer into an
//! [`ApiResult`]; only network-level failures surface as [`TransportError`].

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::xml;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_USER_AGENT: &str = "pazarsync/0.1.0";

/// HTTP methods used by marketplace adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Only reads are eligible for response caching.
    pub const fn is_cacheable(self) -> bool {
        matches!(self, Self::Get)
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication strategy applied to outgoing HTTP requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    BearerToken(String),
    /// Pre-encoded `base64(user:secret)` credential.
    Basic(String),
    Header { name: String, value: String },
}

impl HttpAuth {
    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            Self::None => {}
            Self::BearerToken(token) => {
                headers.insert(String::from("authorization"), format!("Bearer {token}"));
            }
            Self::Basic(encoded) => {
                headers.insert(String::from("authorization"), format!("Basic {encoded}"));
            }
            Self::Header { name, value } => {
                headers.insert(name.to_ascii_lowercase(), value.clone());
            }
        }
    }
}

/// HTTP request envelope handed to an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_auth(mut self, auth: &HttpAuth) -> Self {
        auth.apply(&mut self.headers);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Raw HTTP response returned by an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Category of a network-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Body,
    Other,
}

/// Network-level failure: DNS, TLS, connect, timeout or body read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    message: String,
    kind: TransportErrorKind,
    retryable: bool,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            retryable: true,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TransportErrorKind::Other,
            retryable: false,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// Network seam used by the transport layer.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;
}

/// Production HTTP client backed by reqwest.
///
/// Timeouts are per request, so the underlying client keeps reqwest's
/// defaults and the user agent travels as a header.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
    user_agent: String,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Self {
        Self {
            client: Arc::new(reqwest::Client::new()),
            user_agent: user_agent.to_owned(),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Patch => reqwest::Method::PATCH,
                HttpMethod::Delete => reqwest::Method::DELETE,
            };
            let mut builder = self
                .client
                .request(method, &request.url)
                .timeout(Duration::from_millis(request.timeout_ms));

            if request.header("user-agent").is_none() {
                builder = builder.header(reqwest::header::USER_AGENT, self.user_agent.as_str());
            }
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::timeout(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    TransportError::connect(format!("connection failed: {e}"))
                } else if e.is_builder() {
                    TransportError::non_retryable(format!("invalid request: {e}"))
                } else {
                    TransportError::new(TransportErrorKind::Other, format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let body = response.text().await.map_err(|e| {
                TransportError::new(
                    TransportErrorKind::Body,
                    format!("failed to read response body: {e}"),
                )
            })?;

            Ok(HttpResponse { status, body })
        })
    }
}

/// Parsed response body. JSON is tried first, then XML, then raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Empty,
    Json(Value),
    Xml(Value),
    Text(String),
}

impl Payload {
    pub fn parse(body: &str) -> Self {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Self::Json(value);
        }
        if trimmed.starts_with('<') {
            if let Ok(value) = xml::to_json(trimmed) {
                return Self::Xml(value);
            }
        }
        Self::Text(trimmed.to_owned())
    }

    /// Structured view of JSON and XML payloads.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Json(value) | Self::Xml(value) => Some(value),
            Self::Empty | Self::Text(_) => None,
        }
    }

    pub fn pointer(&self, path: &str) -> Option<&Value> {
        self.as_value().and_then(|value| value.pointer(path))
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Json(value) | Self::Xml(value) => value,
            Self::Text(text) => Value::String(text),
            Self::Empty => Value::Null,
        }
    }
}

/// Structured outcome of one HTTP exchange.
///
/// HTTP error codes are not errors at this layer: they produce
/// `success == false` with the status preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResult {
    pub success: bool,
    pub http_status: u16,
    pub data: Payload,
    pub raw_body: String,
    pub error: Option<String>,
}

impl ApiResult {
    pub fn from_response(response: HttpResponse) -> Self {
        let success = response.is_success();
        let data = Payload::parse(&response.body);
        Self {
            success,
            http_status: response.status,
            error: (!success).then(|| format!("HTTP {}", response.status)),
            data,
            raw_body: response.body,
        }
    }
}

/// Executes exactly one request per call.
#[derive(Clone)]
pub struct Transport {
    client: Arc<dyn HttpClient>,
}

impl Transport {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    pub async fn execute(&self, request: HttpRequest) -> Result<ApiResult, TransportError> {
        let response = self.client.execute(request).await?;
        Ok(ApiResult::from_response(response))
    }
}
