//! TOML configuration for hosts embedding the framework.
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "pretty"
//!
//! [http]
//! timeout_secs = 30
//!
//! [retry]
//! max_attempts = 3
//!
//! [cache]
//! backend = "file"
//! dir = ".pazarsync-cache"
//!
//! [marketplaces.trendyol]
//! api_key = "..."
//! supplier_id = "12345"
//! per_minute = 50
//! ```
//!
//! Secrets may be left out of the file and supplied through
//! `PAZARSYNC_<MARKETPLACE>_<FIELD>` and `PAZARSYNC_WEBHOOK_SECRET`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::{BatchCoordinator, DEFAULT_CHUNK_SIZE, DEFAULT_PACING};
use crate::cache::{
    CacheTtls, FileCacheBackend, ResponseCache, CATEGORY_TREE_TTL, PRODUCT_TTL,
};
use crate::clock::Clock;
use crate::credentials::{Credentials, CredentialsConfig};
use crate::pipeline::AdapterContext;
use crate::rate_limit::RateLimitConfig;
use crate::retry::{Backoff, RetryConfig};
use crate::transport::{ReqwestHttpClient, DEFAULT_TIMEOUT_MS};
use crate::webhook::WebhookVerifier;
use crate::{MarketplaceId, ValidationError};

pub const DEFAULT_CONFIG_PATH: &str = "pazarsync.toml";
pub const WEBHOOK_SECRET_ENV: &str = "PAZARSYNC_WEBHOOK_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),

    #[error("no [marketplaces.{0}] section and no PAZARSYNC_{upper}_* variables", upper = .0.as_str().to_ascii_uppercase())]
    MissingMarketplace(MarketplaceId),

    #[error("webhook secret is not configured (set [webhook] secret or {WEBHOOK_SECRET_ENV})")]
    MissingWebhookSecret,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_MS / 1000,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            factor: 2.0,
            max_delay_ms: 60_000,
            jitter: false,
        }
    }
}

impl RetrySettings {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            backoff: Backoff {
                base: Duration::from_millis(self.base_delay_ms),
                factor: self.factor,
                max: Duration::from_millis(self.max_delay_ms),
                jitter: self.jitter,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    File,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub dir: PathBuf,
    pub product_ttl_secs: u64,
    pub category_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            dir: PathBuf::from(".pazarsync-cache"),
            product_ttl_secs: PRODUCT_TTL.as_secs(),
            category_ttl_secs: CATEGORY_TREE_TTL.as_secs(),
        }
    }
}

impl CacheSettings {
    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            product: Duration::from_secs(self.product_ttl_secs),
            category_tree: Duration::from_secs(self.category_ttl_secs),
        }
    }

    /// The configured cache, or `None` when caching is disabled.
    pub fn build(&self, clock: Arc<dyn Clock>) -> Option<ResponseCache> {
        match self.backend {
            CacheBackendKind::Memory => Some(ResponseCache::in_memory(clock)),
            CacheBackendKind::File => Some(ResponseCache::new(Arc::new(
                FileCacheBackend::with_clock(self.dir.clone(), clock),
            ))),
            CacheBackendKind::None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub chunk_size: usize,
    pub pacing_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            pacing_ms: DEFAULT_PACING.as_millis() as u64,
        }
    }
}

impl BatchSettings {
    pub fn coordinator(&self) -> BatchCoordinator {
        BatchCoordinator::new(Duration::from_millis(self.pacing_ms))
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub secret: Option<String>,
}

impl std::fmt::Debug for WebhookSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSettings")
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Credentials plus optional rate limit overrides for one marketplace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceSettings {
    #[serde(flatten)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub per_minute: Option<u32>,
    #[serde(default)]
    pub per_hour: Option<u32>,
}

impl MarketplaceSettings {
    /// Published limits with any configured override applied.
    pub fn rate_limits(&self, marketplace: MarketplaceId) -> RateLimitConfig {
        let defaults = RateLimitConfig::for_marketplace(marketplace);
        RateLimitConfig::new(
            self.per_minute.unwrap_or(defaults.per_minute),
            self.per_hour.unwrap_or(defaults.per_hour),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub logging: LoggingConfig,
    pub http: HttpConfig,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub batch: BatchSettings,
    pub webhook: WebhookSettings,
    pub marketplaces: BTreeMap<MarketplaceId, MarketplaceSettings>,
}

impl SyncConfig {
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.retry.retry_config().validate()?;
        if self.batch.chunk_size == 0 {
            return Err(ValidationError::ZeroChunkSize);
        }
        for (marketplace, settings) in &self.marketplaces {
            settings.rate_limits(*marketplace).validate()?;
        }
        Ok(())
    }

    /// Applies `PAZARSYNC_*` overrides read through `lookup`.
    ///
    /// A marketplace without a config section gets one when any of its
    /// variables is set.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for marketplace in MarketplaceId::ALL {
            let mut settings = self
                .marketplaces
                .get(&marketplace)
                .cloned()
                .unwrap_or_default();
            let before = settings.clone();
            settings
                .credentials
                .apply_env(&marketplace.env_prefix(), &lookup);
            if settings != before || self.marketplaces.contains_key(&marketplace) {
                self.marketplaces.insert(marketplace, settings);
            }
        }
        if let Some(secret) = lookup(WEBHOOK_SECRET_ENV).filter(|value| !value.is_empty()) {
            self.webhook.secret = Some(secret);
        }
    }

    /// Applies overrides from the process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    pub fn credentials(&self, marketplace: MarketplaceId) -> Result<Credentials, ConfigError> {
        let settings = self
            .marketplaces
            .get(&marketplace)
            .ok_or(ConfigError::MissingMarketplace(marketplace))?;
        Ok(Credentials::new(marketplace, settings.credentials.clone())?)
    }

    /// Shared context built from the `[http]`, `[retry]` and `[cache]`
    /// sections.
    pub fn adapter_context(&self) -> AdapterContext {
        let http = match &self.http.user_agent {
            Some(agent) => ReqwestHttpClient::with_user_agent(agent),
            None => ReqwestHttpClient::new(),
        };
        let context = AdapterContext::default();
        let cache = self.cache.build(Arc::clone(&context.clock));
        context
            .with_http_client(Arc::new(http))
            .with_cache(cache)
            .with_ttls(self.cache.ttls())
            .with_retry(self.retry.retry_config())
            .with_timeout(Duration::from_secs(self.http.timeout_secs))
    }

    /// `base` narrowed to one marketplace's rate limits.
    pub fn context_for(&self, base: &AdapterContext, marketplace: MarketplaceId) -> AdapterContext {
        let limits = self
            .marketplaces
            .get(&marketplace)
            .map(|settings| settings.rate_limits(marketplace))
            .unwrap_or_else(|| RateLimitConfig::for_marketplace(marketplace));
        base.clone().with_rate_limits(limits)
    }

    pub fn webhook_verifier(&self) -> Result<WebhookVerifier, ConfigError> {
        self.webhook
            .secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .map(WebhookVerifier::new)
            .ok_or(ConfigError::MissingWebhookSecret)
    }
}
