//! Marketplace adapters.
//!
//! Each adapter supplies URL templates, payload shapes and error extraction
//! for one marketplace and delegates everything else to its
//! [`RequestPipeline`].

pub mod amazon;
pub mod ebay;
pub mod hepsiburada;
pub mod trendyol;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::auth::{AccessToken, AuthScheme};
use crate::credentials::Credentials;
use crate::pipeline::{AdapterContext, RequestPipeline};
use crate::transport::ApiResult;
use crate::{MarketplaceError, MarketplaceId, ValidationError};

pub use amazon::AmazonAdapter;
pub use ebay::EbayAdapter;
pub use hepsiburada::HepsiburadaAdapter;
pub use trendyol::TrendyolAdapter;

/// Query filters passed through to a marketplace listing endpoint.
pub type Filters = BTreeMap<String, String>;

/// Wire and auth styles an adapter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilitySet {
    pub json_rest: bool,
    pub xml_rpc: bool,
    pub oauth2: bool,
    pub basic_auth: bool,
}

impl CapabilitySet {
    pub const fn new(json_rest: bool, xml_rpc: bool, oauth2: bool, basic_auth: bool) -> Self {
        Self {
            json_rest,
            xml_rpc,
            oauth2,
            basic_auth,
        }
    }

    pub fn labels(self) -> Vec<&'static str> {
        let mut values = Vec::with_capacity(4);
        if self.json_rest {
            values.push("json_rest");
        }
        if self.xml_rpc {
            values.push("xml_rpc");
        }
        if self.oauth2 {
            values.push("oauth2");
        }
        if self.basic_auth {
            values.push("basic_auth");
        }
        values
    }
}

/// Uniform page of items from a listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub marketplace: MarketplaceId,
    pub items: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl Listing {
    pub fn new(marketplace: MarketplaceId, items: Vec<Value>) -> Self {
        Self {
            marketplace,
            items,
            total: None,
            page: None,
            next_token: None,
        }
    }
}

/// Outcome of a write operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub marketplace: MarketplaceId,
    /// Marketplace-side tracking id (batch request id, SKU, item id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub data: Value,
}

/// Result of [`MarketplaceAdapter::authenticate`].
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub marketplace: MarketplaceId,
    pub scheme: AuthScheme,
    pub token: AccessToken,
    /// Marketplace answer to a connectivity check, when one is made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<Value>,
}

/// Common operation set of every marketplace.
///
/// Implementations must be `Send + Sync`; one adapter instance is meant to be
/// shared by all tasks talking to the same marketplace account.
pub trait MarketplaceAdapter: Send + Sync {
    fn id(&self) -> MarketplaceId;

    fn capabilities(&self) -> CapabilitySet;

    fn pipeline(&self) -> &RequestPipeline;

    /// Obtains (or validates) credentials and reports the resulting token.
    fn authenticate<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<AuthStatus, MarketplaceError>> + Send + 'a>>;

    /// `true` when [`authenticate`](Self::authenticate) succeeds.
    fn test_connection<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            match self.authenticate().await {
                Ok(_) => true,
                Err(error) => {
                    tracing::warn!(marketplace = %self.id(), error = %error, "connection test failed");
                    false
                }
            }
        })
    }

    fn get_products<'a>(
        &'a self,
        filters: Filters,
    ) -> Pin<Box<dyn Future<Output = Result<Listing, MarketplaceError>> + Send + 'a>>;

    /// Category tree, cached for a day where the marketplace allows GET.
    fn categories<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Listing, MarketplaceError>> + Send + 'a>>;

    fn create_or_update_product<'a>(
        &'a self,
        product: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>>;

    /// Sends several products. Marketplaces with a bulk endpoint override
    /// this; the default sends them one by one and stops at the first error.
    fn create_or_update_products<'a>(
        &'a self,
        products: Vec<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let mut results = Vec::with_capacity(products.len());
            for product in products {
                results.push(self.create_or_update_product(product).await?.data);
            }
            Ok(Ack {
                marketplace: self.id(),
                reference: None,
                data: Value::Array(results),
            })
        })
    }

    fn get_orders<'a>(
        &'a self,
        filters: Filters,
    ) -> Pin<Box<dyn Future<Output = Result<Listing, MarketplaceError>> + Send + 'a>>;

    fn update_order_status<'a>(
        &'a self,
        order_id: &'a str,
        status: &'a str,
        extra: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>>;

    fn update_price_and_inventory<'a>(
        &'a self,
        items: Vec<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>>;
}

/// Builds the adapter matching the credentials' marketplace.
pub fn build_adapter(
    credentials: &Credentials,
    context: &AdapterContext,
) -> Result<Arc<dyn MarketplaceAdapter>, ValidationError> {
    Ok(match credentials.marketplace() {
        MarketplaceId::Amazon => Arc::new(AmazonAdapter::new(credentials, context)?),
        MarketplaceId::Trendyol => Arc::new(TrendyolAdapter::new(credentials, context)?),
        MarketplaceId::Hepsiburada => Arc::new(HepsiburadaAdapter::new(credentials, context)?),
        MarketplaceId::Ebay => Arc::new(EbayAdapter::new(credentials, context)?),
    })
}

pub(crate) fn ensure_marketplace(
    credentials: &Credentials,
    expected: MarketplaceId,
) -> Result<(), ValidationError> {
    if credentials.marketplace() == expected {
        Ok(())
    } else {
        Err(ValidationError::MarketplaceMismatch {
            expected,
            actual: credentials.marketplace(),
        })
    }
}

/// Items under `pointer`: arrays as-is, a lone object as one item.
pub(crate) fn items_at(value: &Value, pointer: &str) -> Vec<Value> {
    match value.pointer(pointer) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(item) => vec![item.clone()],
    }
}

/// Unsigned number under `pointer`, accepting numeric strings.
pub(crate) fn number_at(value: &Value, pointer: &str) -> Option<u64> {
    let found = value.pointer(pointer)?;
    found
        .as_u64()
        .or_else(|| found.as_str().and_then(|raw| raw.trim().parse().ok()))
}

pub(crate) fn string_at(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// First non-empty message among `pointers`.
pub(crate) fn first_message(result: &ApiResult, pointers: &[&str]) -> Option<String> {
    let value = result.data.as_value()?;
    pointers.iter().find_map(|pointer| string_at(value, pointer))
}

pub(crate) fn expect_object(value: &Value, field: &'static str) -> Result<(), ValidationError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(ValidationError::ExpectedObject { field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn items_at_normalizes_single_objects() {
        let value = json!({"a": [1, 2], "b": {"id": 1}, "c": null});
        assert_eq!(items_at(&value, "/a").len(), 2);
        assert_eq!(items_at(&value, "/b"), vec![json!({"id": 1})]);
        assert!(items_at(&value, "/c").is_empty());
        assert!(items_at(&value, "/missing").is_empty());
    }

    #[test]
    fn numbers_accept_strings() {
        let value = json!({"total": "42", "page": 3});
        assert_eq!(number_at(&value, "/total"), Some(42));
        assert_eq!(number_at(&value, "/page"), Some(3));
    }

    #[test]
    fn capability_labels() {
        assert_eq!(
            CapabilitySet::new(true, false, true, false).labels(),
            vec!["json_rest", "oauth2"]
        );
    }
}
