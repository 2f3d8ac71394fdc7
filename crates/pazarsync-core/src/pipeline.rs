//! The shared request path every adapter call goes through.
//!
//! ```text
//! RequestSpec ─▶ cache lookup (GET) ─▶ token ─▶ admit ─▶ retry/transport
//!                                                         │
//!            result ◀─ cache write (GET, 2xx) ◀─ 401? invalidate + resend once
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::{AccessToken, TokenGrant, TokenManager};
use crate::cache::{CacheMode, CacheTtls, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::logging::{ApiCallLogger, LogLevel, TracingLogger};
use crate::rate_limit::{CounterStore, MemoryCounterStore, RateLimitConfig, RateLimiter};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::transport::{
    ApiResult, HttpAuth, HttpClient, HttpMethod, HttpRequest, ReqwestHttpClient, Transport,
    DEFAULT_TIMEOUT_MS,
};
use crate::{MarketplaceError, MarketplaceId, ValidationError};

/// Request payload, serialized with the matching content type.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Xml(String),
    Form(Vec<(String, String)>),
}

impl RequestBody {
    fn content_type(&self) -> &'static str {
        match self {
            Self::Json(_) => "application/json",
            Self::Xml(_) => "text/xml",
            Self::Form(_) => "application/x-www-form-urlencoded",
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Xml(document) => document.clone(),
            Self::Form(fields) => encode_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
        }
    }
}

/// One adapter call, before URL resolution and authentication.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    /// Path relative to the adapter's base URL, or an absolute URL.
    pub endpoint: String,
    pub method: HttpMethod,
    pub query: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    pub headers: BTreeMap<String, String>,
    /// `None` disables caching for this call.
    pub cache_ttl: Option<Duration>,
    pub cache_mode: CacheMode,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            query: BTreeMap::new(),
            body: None,
            headers: BTreeMap::new(),
            cache_ttl: None,
            cache_mode: CacheMode::Use,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, endpoint)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_query_map(mut self, params: &BTreeMap<String, String>) -> Self {
        self.query
            .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn with_xml(mut self, document: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Xml(document.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn cached(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    fn is_cacheable(&self) -> bool {
        self.method.is_cacheable() && self.cache_ttl.is_some_and(|ttl| !ttl.is_zero())
    }
}

/// Where the access token goes on outgoing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlacement {
    /// `Authorization: Bearer|Basic ...` according to the token kind.
    Authorization,
    /// Raw token value in a marketplace-specific header.
    Header(&'static str),
    /// The adapter embeds the token in the request body itself.
    Embedded,
}

/// Pulls a human-readable message out of a failed response.
pub type ErrorExtractor = fn(&ApiResult) -> Option<String>;

/// Dependencies shared by the adapters a host builds.
#[derive(Clone)]
pub struct AdapterContext {
    pub http: Arc<dyn HttpClient>,
    pub cache: Option<ResponseCache>,
    pub ttls: CacheTtls,
    pub counters: Arc<dyn CounterStore>,
    pub logger: Arc<dyn ApiCallLogger>,
    pub clock: Arc<dyn Clock>,
    pub retry: RetryConfig,
    /// Overrides the marketplace's published limits when set.
    pub rate_limits: Option<RateLimitConfig>,
    pub timeout: Duration,
    pub cancel: CancellationToken,
    /// `cache` is still the built-in memory cache and follows `clock`.
    default_cache: bool,
}

impl Default for AdapterContext {
    fn default() -> Self {
        Self {
            http: Arc::new(ReqwestHttpClient::default()),
            cache: Some(ResponseCache::in_memory(Arc::new(SystemClock))),
            ttls: CacheTtls::default(),
            counters: Arc::new(MemoryCounterStore::new()),
            logger: Arc::new(TracingLogger),
            clock: Arc::new(SystemClock),
            retry: RetryConfig::default(),
            rate_limits: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            cancel: CancellationToken::new(),
            default_cache: true,
        }
    }
}

impl AdapterContext {
    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }

    pub fn with_cache(mut self, cache: Option<ResponseCache>) -> Self {
        self.cache = cache;
        self.default_cache = false;
        self
    }

    pub fn with_ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = ttls;
        self
    }

    pub fn with_counter_store(mut self, counters: Arc<dyn CounterStore>) -> Self {
        self.counters = counters;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn ApiCallLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Replaces the clock. The built-in memory cache is rebuilt on it so
    /// entries expire on the same time source as tokens and rate windows.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        if self.default_cache {
            self.cache = Some(ResponseCache::in_memory(Arc::clone(&clock)));
        }
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limits(mut self, limits: RateLimitConfig) -> Self {
        self.rate_limits = Some(limits);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Marketplace-specific pieces a pipeline is assembled from.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub marketplace: MarketplaceId,
    /// Seller account the rate-limit windows are counted for.
    pub account: String,
    pub base_url: String,
    pub grant: TokenGrant,
    pub placement: AuthPlacement,
    pub extract_error: ErrorExtractor,
}

/// Token manager, rate limiter, retry executor and cache composed for one
/// adapter instance. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RequestPipeline {
    marketplace: MarketplaceId,
    base_url: String,
    placement: AuthPlacement,
    extract_error: ErrorExtractor,
    tokens: Arc<TokenManager>,
    limiter: RateLimiter,
    executor: RetryExecutor,
    cache: Option<ResponseCache>,
    ttls: CacheTtls,
    logger: Arc<dyn ApiCallLogger>,
    timeout_ms: u64,
    cancel: CancellationToken,
}

impl RequestPipeline {
    pub fn new(spec: PipelineSpec, context: &AdapterContext) -> Result<Self, ValidationError> {
        context.retry.validate()?;
        let limits = context
            .rate_limits
            .unwrap_or_else(|| RateLimitConfig::for_marketplace(spec.marketplace));
        let limiter = RateLimiter::new(
            spec.marketplace,
            spec.account,
            limits,
            Arc::clone(&context.counters),
            Arc::clone(&context.clock),
        )?;

        let transport = Transport::new(Arc::clone(&context.http));
        let executor = RetryExecutor::new(
            spec.marketplace,
            transport,
            context.retry.clone(),
            Arc::clone(&context.logger),
        );
        let tokens = TokenManager::new(
            spec.marketplace,
            spec.grant,
            executor.clone(),
            Arc::clone(&context.clock),
            context.cancel.clone(),
        );

        Ok(Self {
            marketplace: spec.marketplace,
            base_url: spec.base_url.trim_end_matches('/').to_owned(),
            placement: spec.placement,
            extract_error: spec.extract_error,
            tokens: Arc::new(tokens),
            limiter,
            executor,
            cache: context.cache.clone(),
            ttls: context.ttls,
            logger: Arc::clone(&context.logger),
            timeout_ms: u64::try_from(context.timeout.as_millis()).unwrap_or(u64::MAX),
            cancel: context.cancel.clone(),
        })
    }

    pub const fn marketplace(&self) -> MarketplaceId {
        self.marketplace
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    pub const fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    pub fn logger(&self) -> &dyn ApiCallLogger {
        self.logger.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Current valid token, obtained or refreshed as needed.
    pub async fn access_token(&self) -> Result<AccessToken, MarketplaceError> {
        self.tokens.get_valid_token().await
    }

    /// Absolute URL for `endpoint` including the encoded query string.
    pub fn url_for(&self, endpoint: &str, query: &BTreeMap<String, String>) -> String {
        let mut url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_owned()
        } else if endpoint.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        };
        if !query.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&encode_pairs(
                query.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            ));
        }
        url
    }

    /// Sends `spec` and returns the successful result.
    ///
    /// Non-2xx answers become [`MarketplaceError::Api`] (or
    /// [`MarketplaceError::Authentication`] for a persistent 401) carrying the
    /// marketplace's own error message.
    pub async fn send(&self, spec: RequestSpec) -> Result<ApiResult, MarketplaceError> {
        let url = self.url_for(&spec.endpoint, &spec.query);
        let cache = self.cache.as_ref().filter(|_| spec.is_cacheable());
        let cache_key = ResponseCache::cache_key(spec.method, &url, &spec.query);

        if let Some(cache) = cache.filter(|_| spec.cache_mode.reads()) {
            if let Some(hit) = cache.get(&cache_key).await {
                debug!(marketplace = %self.marketplace, endpoint = %spec.endpoint, "cache hit");
                return Ok(hit);
            }
        }

        let (token, mut result) = self.dispatch(&spec, &url).await?;
        if result.http_status == 401
            && self.tokens.is_refreshable()
            && self.placement != AuthPlacement::Embedded
        {
            let context = BTreeMap::from([(String::from("endpoint"), spec.endpoint.clone())]);
            self.logger.log(
                self.marketplace,
                LogLevel::Warn,
                "token rejected, refreshing and resending once",
                &context,
            );
            self.tokens.invalidate(&token).await;
            result = self.dispatch(&spec, &url).await?.1;
        }

        if !result.success {
            return Err(self.failure(&spec.endpoint, &result));
        }

        if let (Some(cache), Some(ttl)) = (cache, spec.cache_ttl) {
            if spec.cache_mode.writes() {
                cache.set(&cache_key, &result, ttl).await;
            }
        }
        Ok(result)
    }

    /// Sends once and returns the token the request carried with the result.
    async fn dispatch(
        &self,
        spec: &RequestSpec,
        url: &str,
    ) -> Result<(AccessToken, ApiResult), MarketplaceError> {
        let token = self.tokens.get_valid_token().await?;
        self.limiter.admit()?;
        let request = self.build_request(spec, url, &token);
        let result = self
            .executor
            .execute(request, &spec.endpoint, &self.cancel)
            .await?;
        Ok((token, result))
    }

    fn build_request(&self, spec: &RequestSpec, url: &str, token: &AccessToken) -> HttpRequest {
        let mut request = HttpRequest::new(spec.method, url)
            .with_timeout_ms(self.timeout_ms)
            .with_header("accept", "application/json");

        if let Some(body) = &spec.body {
            request = request
                .with_header("content-type", body.content_type())
                .with_body(body.render());
        }

        let auth = match self.placement {
            AuthPlacement::Authorization => token.http_auth(),
            AuthPlacement::Header(name) => HttpAuth::Header {
                name: name.to_owned(),
                value: token.value().to_owned(),
            },
            AuthPlacement::Embedded => HttpAuth::None,
        };
        request = request.with_auth(&auth);

        for (name, value) in &spec.headers {
            request = request.with_header(name.as_str(), value.as_str());
        }
        request
    }

    fn failure(&self, endpoint: &str, result: &ApiResult) -> MarketplaceError {
        let message = (self.extract_error)(result)
            .or_else(|| result.error.clone())
            .unwrap_or_else(|| format!("HTTP {}", result.http_status));
        if result.http_status == 401 {
            return MarketplaceError::Authentication {
                marketplace: self.marketplace,
                message,
            };
        }
        MarketplaceError::Api {
            marketplace: self.marketplace,
            endpoint: endpoint.to_owned(),
            status: result.http_status,
            message,
        }
    }

    /// Error for a response that succeeded at HTTP level but failed in its
    /// envelope.
    pub fn envelope_failure(&self, endpoint: &str, status: u16, message: String) -> MarketplaceError {
        MarketplaceError::Api {
            marketplace: self.marketplace,
            endpoint: endpoint.to_owned(),
            status,
            message,
        }
    }

    /// Error for a 2xx response whose body cannot be interpreted.
    pub fn decode_failure(&self, endpoint: &str, message: impl Into<String>) -> MarketplaceError {
        MarketplaceError::Decode {
            marketplace: self.marketplace,
            endpoint: endpoint.to_owned(),
            message: message.into(),
        }
    }
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("marketplace", &self.marketplace)
            .field("base_url", &self.base_url)
            .field("placement", &self.placement)
            .field("tokens", &self.tokens)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

fn encode_pairs<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .map(|(name, value)| {
            format!(
                "{}={}",
                urlencoding::encode(name),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}
