use thiserror::Error;

use crate::rate_limit::WindowGranularity;
use crate::transport::TransportError;
use crate::MarketplaceId;

/// Validation errors for credentials, configuration and request construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown marketplace '{value}', expected one of amazon, trendyol, hepsiburada, ebay")]
    UnknownMarketplace { value: String },
    #[error("unknown auth scheme '{value}', expected api_key_secret, oauth2_refresh or basic_session")]
    UnknownAuthScheme { value: String },
    #[error("{marketplace}: missing required credential field '{field}'")]
    MissingCredential {
        marketplace: MarketplaceId,
        field: &'static str,
    },
    #[error("{marketplace}: auth scheme '{scheme}' is not supported by this marketplace")]
    UnsupportedScheme {
        marketplace: MarketplaceId,
        scheme: &'static str,
    },
    #[error("{marketplace}: unknown region '{value}'")]
    UnknownRegion {
        marketplace: MarketplaceId,
        value: String,
    },
    #[error("credentials for {actual} cannot build a {expected} adapter")]
    MarketplaceMismatch {
        expected: MarketplaceId,
        actual: MarketplaceId,
    },
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("rate limit for {window} windows must be greater than zero")]
    ZeroRateLimit { window: WindowGranularity },
    #[error("retry attempts must be greater than zero")]
    ZeroAttempts,
    #[error("invalid filter '{value}', expected key=value")]
    InvalidFilter { value: String },
    #[error("{field} must be a JSON object")]
    ExpectedObject { field: &'static str },
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },
    #[error("'{name}' is not a valid XML element or attribute name")]
    InvalidXmlName { name: String },
}

/// Coarse error classification used by callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    RateLimited,
    Transport,
    Api,
    Validation,
    Cache,
    Decode,
    Cancelled,
}

/// Top-level error returned by pipeline and adapter operations.
///
/// Every variant names the marketplace, and request-level variants also name
/// the endpoint, so callers can decide on retries without inspecting strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarketplaceError {
    #[error("{marketplace}: authentication failed: {message}")]
    Authentication {
        marketplace: MarketplaceId,
        message: String,
    },

    #[error("{marketplace}: {window} rate limit of {limit} requests exceeded")]
    RateLimitExceeded {
        marketplace: MarketplaceId,
        window: WindowGranularity,
        limit: u32,
    },

    #[error("{marketplace} {endpoint}: transport error: {source}")]
    Transport {
        marketplace: MarketplaceId,
        endpoint: String,
        #[source]
        source: TransportError,
    },

    #[error("{marketplace} {endpoint}: HTTP {status}: {message}")]
    Api {
        marketplace: MarketplaceId,
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("{marketplace} {endpoint}: malformed response: {message}")]
    Decode {
        marketplace: MarketplaceId,
        endpoint: String,
        message: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl MarketplaceError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimited,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Api { .. } => ErrorKind::Api,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Cache(_) => ErrorKind::Cache,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. } => true,
            Self::Transport { source, .. } => source.retryable(),
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub const fn marketplace(&self) -> Option<MarketplaceId> {
        match self {
            Self::Authentication { marketplace, .. }
            | Self::RateLimitExceeded { marketplace, .. }
            | Self::Transport { marketplace, .. }
            | Self::Api { marketplace, .. }
            | Self::Decode { marketplace, .. } => Some(*marketplace),
            Self::Validation(ValidationError::MissingCredential { marketplace, .. })
            | Self::Validation(ValidationError::UnsupportedScheme { marketplace, .. })
            | Self::Validation(ValidationError::UnknownRegion { marketplace, .. })
            | Self::Validation(ValidationError::MarketplaceMismatch {
                expected: marketplace,
                ..
            }) => {
                Some(*marketplace)
            }
            _ => None,
        }
    }
}

/// Failure of a cache backend. Never fatal for a request: the pipeline logs it
/// and treats the lookup as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache backend error: {0}")]
    Backend(String),
}

impl From<CacheError> for MarketplaceError {
    fn from(error: CacheError) -> Self {
        Self::Cache(error.to_string())
    }
}
