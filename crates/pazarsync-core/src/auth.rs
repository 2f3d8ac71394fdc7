//! Credential lifecycle: token acquisition, caching and renewal.
//!
//! A [`TokenManager`] owns the single live [`AccessToken`] for one set of
//! credentials. The token slot is guarded by an async mutex that is held for
//! the whole refresh, so concurrent callers queue behind one in-flight grant
//! and reuse its result.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::retry::RetryExecutor;
use crate::transport::{ApiResult, HttpAuth, HttpRequest};
use crate::{MarketplaceError, MarketplaceId, ValidationError};

/// Renewal margin subtracted from reported lifetimes, capped at half the
/// lifetime for short-lived tokens.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(60);
/// Lifetime assumed when a session grant does not report one.
pub const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(3_600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthScheme {
    #[serde(rename = "api_key_secret")]
    ApiKeySecret,
    #[serde(rename = "oauth2_refresh")]
    OAuth2Refresh,
    #[serde(rename = "basic_session")]
    BasicSession,
}

impl AuthScheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApiKeySecret => "api_key_secret",
            Self::OAuth2Refresh => "oauth2_refresh",
            Self::BasicSession => "basic_session",
        }
    }

    pub const fn default_for(marketplace: MarketplaceId) -> Self {
        match marketplace {
            MarketplaceId::Amazon => Self::OAuth2Refresh,
            MarketplaceId::Trendyol | MarketplaceId::Ebay => Self::ApiKeySecret,
            MarketplaceId::Hepsiburada => Self::BasicSession,
        }
    }

    pub const fn supported_by(marketplace: MarketplaceId) -> &'static [AuthScheme] {
        match marketplace {
            MarketplaceId::Amazon => &[Self::OAuth2Refresh],
            MarketplaceId::Trendyol | MarketplaceId::Ebay => &[Self::ApiKeySecret],
            MarketplaceId::Hepsiburada => &[Self::BasicSession],
        }
    }

    /// Whether a rejected token can be replaced by asking again.
    pub const fn is_refreshable(self) -> bool {
        !matches!(self, Self::ApiKeySecret)
    }
}

impl Display for AuthScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthScheme {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "api_key_secret" => Ok(Self::ApiKeySecret),
            "oauth2_refresh" => Ok(Self::OAuth2Refresh),
            "basic_session" => Ok(Self::BasicSession),
            other => Err(ValidationError::UnknownAuthScheme {
                value: other.to_owned(),
            }),
        }
    }
}

/// How a token value is presented to the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Bearer,
    /// Pre-encoded `base64(key:secret)`.
    Basic,
    /// Opaque value embedded by the adapter, e.g. in a request document.
    Raw,
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken {
    #[serde(skip)]
    value: String,
    pub kind: TokenKind,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    /// Already reduced by [`EXPIRY_BUFFER`]; `None` for long-lived credentials.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl AccessToken {
    pub fn new(
        value: impl Into<String>,
        kind: TokenKind,
        issued_at: OffsetDateTime,
        expires_at: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            value: value.into(),
            kind,
            issued_at,
            expires_at,
        }
    }

    /// Token that expires `lifetime - min(EXPIRY_BUFFER, lifetime / 2)` after
    /// `issued_at`.
    pub fn expiring(
        value: impl Into<String>,
        kind: TokenKind,
        issued_at: OffsetDateTime,
        lifetime: Duration,
    ) -> Self {
        let usable = lifetime - EXPIRY_BUFFER.min(lifetime / 2);
        Self::new(value, kind, issued_at, Some(issued_at + usable))
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }

    pub fn http_auth(&self) -> HttpAuth {
        match self.kind {
            TokenKind::Bearer => HttpAuth::BearerToken(self.value.clone()),
            TokenKind::Basic => HttpAuth::Basic(self.value.clone()),
            TokenKind::Raw => HttpAuth::None,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"***")
            .field("kind", &self.kind)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// How new tokens are obtained.
#[derive(Clone, PartialEq, Eq)]
pub enum TokenGrant {
    /// Long-lived credential; never refreshed and never sent over the wire
    /// to obtain.
    Static(AccessToken),
    /// OAuth2 `refresh_token` grant posted as a form.
    OAuth2Refresh {
        token_url: String,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    /// Username/password exchanged for a session token.
    BasicSession {
        login_url: String,
        username: String,
        password: String,
    },
}

impl TokenGrant {
    /// Basic credential built once from an API key pair.
    pub fn api_key_secret(api_key: &str, api_secret: &str, now: OffsetDateTime) -> Self {
        let encoded = STANDARD.encode(format!("{api_key}:{api_secret}"));
        Self::Static(AccessToken::new(encoded, TokenKind::Basic, now, None))
    }

    /// Opaque long-lived token.
    pub fn long_lived(token: &str, now: OffsetDateTime) -> Self {
        Self::Static(AccessToken::new(token, TokenKind::Raw, now, None))
    }

    fn endpoint(&self) -> &str {
        match self {
            Self::Static(_) => "static",
            Self::OAuth2Refresh { token_url, .. } => token_url,
            Self::BasicSession { login_url, .. } => login_url,
        }
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(token) => f.debug_tuple("Static").field(token).finish(),
            Self::OAuth2Refresh { token_url, .. } => f
                .debug_struct("OAuth2Refresh")
                .field("token_url", token_url)
                .finish_non_exhaustive(),
            Self::BasicSession { login_url, .. } => f
                .debug_struct("BasicSession")
                .field("login_url", login_url)
                .finish_non_exhaustive(),
        }
    }
}

/// Lifecycle state reported by [`TokenManager::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenState {
    Empty,
    Requesting,
    Valid,
    Expired,
}

pub struct TokenManager {
    marketplace: MarketplaceId,
    grant: TokenGrant,
    executor: RetryExecutor,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    current: Mutex<Option<AccessToken>>,
    requesting: AtomicBool,
}

impl TokenManager {
    pub fn new(
        marketplace: MarketplaceId,
        grant: TokenGrant,
        executor: RetryExecutor,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            marketplace,
            grant,
            executor,
            clock,
            cancel,
            current: Mutex::new(None),
            requesting: AtomicBool::new(false),
        }
    }

    pub fn is_refreshable(&self) -> bool {
        !matches!(self.grant, TokenGrant::Static(_))
    }

    /// Returns the cached token, obtaining a new one when absent or expired.
    pub async fn get_valid_token(&self) -> Result<AccessToken, MarketplaceError> {
        if let TokenGrant::Static(token) = &self.grant {
            return Ok(token.clone());
        }

        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if token.is_valid_at(self.clock.now()) {
                return Ok(token.clone());
            }
            debug!(marketplace = %self.marketplace, "access token expired, refreshing");
        }

        self.requesting.store(true, Ordering::SeqCst);
        let outcome = self.request_token().await;
        self.requesting.store(false, Ordering::SeqCst);

        match outcome {
            Ok(token) => {
                info!(
                    marketplace = %self.marketplace,
                    expires_at = ?token.expires_at,
                    "access token obtained"
                );
                *current = Some(token.clone());
                Ok(token)
            }
            Err(error) => {
                warn!(marketplace = %self.marketplace, %error, "token request failed");
                *current = None;
                Err(error)
            }
        }
    }

    /// Drops `rejected` so the next call obtains a fresh token. A token that
    /// already replaced `rejected` is kept.
    pub async fn invalidate(&self, rejected: &AccessToken) {
        if !self.is_refreshable() {
            return;
        }
        let mut current = self.current.lock().await;
        if current.as_ref() == Some(rejected) {
            *current = None;
        }
    }

    pub fn state(&self) -> TokenState {
        if self.requesting.load(Ordering::SeqCst) {
            return TokenState::Requesting;
        }
        if let TokenGrant::Static(_) = self.grant {
            return TokenState::Valid;
        }
        match self.current.try_lock() {
            Ok(current) => match current.as_ref() {
                None => TokenState::Empty,
                Some(token) if token.is_valid_at(self.clock.now()) => TokenState::Valid,
                Some(_) => TokenState::Expired,
            },
            Err(_) => TokenState::Requesting,
        }
    }

    async fn request_token(&self) -> Result<AccessToken, MarketplaceError> {
        let request = match &self.grant {
            TokenGrant::Static(token) => return Ok(token.clone()),
            TokenGrant::OAuth2Refresh {
                token_url,
                client_id,
                client_secret,
                refresh_token,
            } => {
                let form = [
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                ]
                .iter()
                .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
                .collect::<Vec<_>>()
                .join("&");
                HttpRequest::post(token_url.as_str())
                    .with_header("content-type", "application/x-www-form-urlencoded")
                    .with_header("accept", "application/json")
                    .with_body(form)
            }
            TokenGrant::BasicSession {
                login_url,
                username,
                password,
            } => HttpRequest::post(login_url.as_str())
                .with_header("content-type", "application/json")
                .with_header("accept", "application/json")
                .with_body(json!({"username": username, "password": password}).to_string()),
        };

        let endpoint = self.grant.endpoint().to_owned();
        let result = self.executor.execute(request, &endpoint, &self.cancel).await?;
        if !result.success {
            return Err(self.failure(&result));
        }

        let issued_at = self.clock.now();
        let token_fields: &[&str] = match self.grant {
            TokenGrant::BasicSession { .. } => &["access_token", "id_token", "token"],
            _ => &["access_token"],
        };

        let value = token_fields
            .iter()
            .find_map(|field| string_field(&result, field))
            .ok_or_else(|| MarketplaceError::Authentication {
                marketplace: self.marketplace,
                message: String::from("token response did not contain a token"),
            })?;
        let lifetime = numeric_field(&result, "expires_in")
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SESSION_LIFETIME);

        Ok(AccessToken::expiring(value, TokenKind::Bearer, issued_at, lifetime))
    }

    fn failure(&self, result: &ApiResult) -> MarketplaceError {
        let message = ["error_description", "error", "message"]
            .iter()
            .find_map(|field| string_field(result, field))
            .or_else(|| result.error.clone())
            .unwrap_or_else(|| format!("HTTP {}", result.http_status));
        MarketplaceError::Authentication {
            marketplace: self.marketplace,
            message,
        }
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("marketplace", &self.marketplace)
            .field("grant", &self.grant)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lookup<'a>(result: &'a ApiResult, field: &str) -> Option<&'a Value> {
    let value = result.data.as_value()?;
    value
        .get(field)
        .or_else(|| value.get("data").and_then(|data| data.get(field)))
}

fn string_field(result: &ApiResult, field: &str) -> Option<String> {
    lookup(result, field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn numeric_field(result: &ApiResult, field: &str) -> Option<u64> {
    let value = lookup(result, field)?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
}
