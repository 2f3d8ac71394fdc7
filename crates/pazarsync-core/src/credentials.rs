//! Per-marketplace credential material.

use std::fmt::{Debug, Formatter};

use serde::{Deserialize, Serialize};

use crate::auth::AuthScheme;
use crate::{MarketplaceId, ValidationError};

/// Raw credential fields as they appear in configuration.
///
/// Which fields are required depends on the marketplace and its auth scheme;
/// [`Credentials::new`] checks them.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub scheme: Option<AuthScheme>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub region: Option<String>,
    pub merchant_id: Option<String>,
    pub supplier_id: Option<String>,
    pub seller_id: Option<String>,
    pub dev_id: Option<String>,
    pub auth_token: Option<String>,
    pub sandbox: bool,
}

/// Names of every string field, in declaration order.
const FIELDS: [&str; 13] = [
    "api_key",
    "api_secret",
    "client_id",
    "client_secret",
    "refresh_token",
    "username",
    "password",
    "region",
    "merchant_id",
    "supplier_id",
    "seller_id",
    "dev_id",
    "auth_token",
];

/// Fields never rendered by `Debug`.
const SECRET_FIELDS: [&str; 6] = [
    "api_secret",
    "client_secret",
    "refresh_token",
    "password",
    "auth_token",
    "api_key",
];

impl CredentialsConfig {
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "api_key" => &self.api_key,
            "api_secret" => &self.api_secret,
            "client_id" => &self.client_id,
            "client_secret" => &self.client_secret,
            "refresh_token" => &self.refresh_token,
            "username" => &self.username,
            "password" => &self.password,
            "region" => &self.region,
            "merchant_id" => &self.merchant_id,
            "supplier_id" => &self.supplier_id,
            "seller_id" => &self.seller_id,
            "dev_id" => &self.dev_id,
            "auth_token" => &self.auth_token,
            _ => return None,
        };
        value.as_deref().filter(|value| !value.trim().is_empty())
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
        Some(match name {
            "api_key" => &mut self.api_key,
            "api_secret" => &mut self.api_secret,
            "client_id" => &mut self.client_id,
            "client_secret" => &mut self.client_secret,
            "refresh_token" => &mut self.refresh_token,
            "username" => &mut self.username,
            "password" => &mut self.password,
            "region" => &mut self.region,
            "merchant_id" => &mut self.merchant_id,
            "supplier_id" => &mut self.supplier_id,
            "seller_id" => &mut self.seller_id,
            "dev_id" => &mut self.dev_id,
            "auth_token" => &mut self.auth_token,
            _ => return None,
        })
    }

    /// Overrides fields from `<prefix>_<FIELD>` variables, e.g.
    /// `PAZARSYNC_TRENDYOL_API_SECRET`.
    pub fn apply_env<F>(&mut self, prefix: &str, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for name in FIELDS {
            let variable = format!("{prefix}_{}", name.to_ascii_uppercase());
            if let Some(value) = lookup(&variable).filter(|value| !value.is_empty()) {
                if let Some(slot) = self.field_mut(name) {
                    *slot = Some(value);
                }
            }
        }
        if let Some(value) = lookup(&format!("{prefix}_SANDBOX")) {
            self.sandbox = matches!(value.trim(), "1" | "true" | "yes");
        }
    }
}

impl Debug for CredentialsConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("CredentialsConfig");
        debug.field("scheme", &self.scheme);
        for name in FIELDS {
            match self.field(name) {
                Some(_) if SECRET_FIELDS.contains(&name) => debug.field(name, &"***"),
                Some(value) => debug.field(name, &value),
                None => continue,
            };
        }
        debug.field("sandbox", &self.sandbox).finish()
    }
}

/// Validated credentials bound to one marketplace. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    marketplace: MarketplaceId,
    scheme: AuthScheme,
    config: CredentialsConfig,
}

impl Credentials {
    pub fn new(marketplace: MarketplaceId, config: CredentialsConfig) -> Result<Self, ValidationError> {
        let scheme = config
            .scheme
            .unwrap_or_else(|| AuthScheme::default_for(marketplace));
        if !AuthScheme::supported_by(marketplace).contains(&scheme) {
            return Err(ValidationError::UnsupportedScheme {
                marketplace,
                scheme: scheme.as_str(),
            });
        }
        for &field in Self::required_fields(marketplace) {
            if config.field(field).is_none() {
                return Err(ValidationError::MissingCredential { marketplace, field });
            }
        }
        Ok(Self {
            marketplace,
            scheme,
            config,
        })
    }

    fn required_fields(marketplace: MarketplaceId) -> &'static [&'static str] {
        match marketplace {
            MarketplaceId::Amazon => &["client_id", "client_secret", "refresh_token", "seller_id"],
            MarketplaceId::Trendyol => &["api_key", "api_secret", "supplier_id"],
            MarketplaceId::Hepsiburada => &["username", "password", "merchant_id"],
            MarketplaceId::Ebay => &["auth_token", "dev_id", "client_id", "client_secret"],
        }
    }

    pub const fn marketplace(&self) -> MarketplaceId {
        self.marketplace
    }

    pub const fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub const fn sandbox(&self) -> bool {
        self.config.sandbox
    }

    pub fn region(&self) -> Option<&str> {
        self.config.field("region")
    }

    /// A field checked at construction; empty string if absent.
    pub fn get(&self, name: &str) -> &str {
        self.config.field(name).unwrap_or_default()
    }

    /// Seller account identifier rate limits are tracked under. eBay has no
    /// seller id in its credentials, so the application id stands in.
    pub fn account_id(&self) -> &str {
        match self.marketplace {
            MarketplaceId::Amazon => self.get("seller_id"),
            MarketplaceId::Trendyol => self.get("supplier_id"),
            MarketplaceId::Hepsiburada => self.get("merchant_id"),
            MarketplaceId::Ebay => self.get("client_id"),
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("marketplace", &self.marketplace)
            .field("scheme", &self.scheme)
            .field("config", &self.config)
            .finish()
    }
}
