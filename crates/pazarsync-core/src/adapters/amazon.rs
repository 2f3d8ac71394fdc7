//! Amazon Selling Partner API (JSON REST, LWA OAuth2 refresh-token grant).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;

use crate::adapters::{
    ensure_marketplace, expect_object, first_message, items_at, number_at, string_at, Ack,
    AuthStatus, CapabilitySet, Filters, Listing, MarketplaceAdapter,
};
use crate::auth::{AuthScheme, TokenGrant};
use crate::clock::Clock;
use crate::credentials::Credentials;
use crate::pipeline::{AdapterContext, AuthPlacement, PipelineSpec, RequestPipeline, RequestSpec};
use crate::transport::{ApiResult, HttpMethod};
use crate::{MarketplaceError, MarketplaceId, ValidationError};

/// Login With Amazon token endpoint.
pub const LWA_TOKEN_URL: &str = "https://api.amazon.com/auth/o2/token";

const ORDERS_PATH: &str = "orders/v0/orders";
const CATALOG_PATH: &str = "catalog/2022-04-01/items";
const LISTINGS_PATH: &str = "listings/2021-08-01/items";
const PRODUCT_TYPES_PATH: &str = "definitions/2020-09-01/productTypes";

/// Orders are listed from this far back when no date filter is given.
const DEFAULT_ORDER_WINDOW: Duration = Duration::from_secs(30 * 86_400);

/// SP-API selling region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    NorthAmerica,
    Europe,
    FarEast,
}

impl Region {
    pub const fn host(self, sandbox: bool) -> &'static str {
        match (self, sandbox) {
            (Self::NorthAmerica, false) => "https://sellingpartnerapi-na.amazon.com",
            (Self::NorthAmerica, true) => "https://sandbox.sellingpartnerapi-na.amazon.com",
            (Self::Europe, false) => "https://sellingpartnerapi-eu.amazon.com",
            (Self::Europe, true) => "https://sandbox.sellingpartnerapi-eu.amazon.com",
            (Self::FarEast, false) => "https://sellingpartnerapi-fe.amazon.com",
            (Self::FarEast, true) => "https://sandbox.sellingpartnerapi-fe.amazon.com",
        }
    }
}

/// Resolves a country code (`DE`) or region (`eu`) into the endpoint region
/// and the marketplace id requests are scoped to.
pub fn resolve_marketplace(code: &str) -> Option<(Region, &'static str)> {
    let resolved = match code.trim().to_ascii_uppercase().as_str() {
        "NA" | "US" => (Region::NorthAmerica, "ATVPDKIKX0DER"),
        "CA" => (Region::NorthAmerica, "A2EUQ1WTGCTBG2"),
        "MX" => (Region::NorthAmerica, "A1AM78C64UM0Y8"),
        "BR" => (Region::NorthAmerica, "A2Q3Y263D00KWC"),
        "EU" | "DE" => (Region::Europe, "A1PA6795UKMFR9"),
        "UK" | "GB" => (Region::Europe, "A1F83G8C2ARO7P"),
        "FR" => (Region::Europe, "A13V1IB3VIYZZH"),
        "IT" => (Region::Europe, "APJ6JRA9NG5V4"),
        "ES" => (Region::Europe, "A1RKKUPIHCS9HS"),
        "NL" => (Region::Europe, "A1805IZSGTT6HS"),
        "SE" => (Region::Europe, "A2NODRKZP88ZB9"),
        "PL" => (Region::Europe, "A1C3SOZRARQ6R3"),
        "TR" => (Region::Europe, "A33AVAJ2PDY3EV"),
        "AE" => (Region::Europe, "A2VIGQ35RCS4UG"),
        "IN" => (Region::Europe, "A21TJRUUN4KGV"),
        "FE" | "JP" => (Region::FarEast, "A1VC38T7YXB528"),
        "AU" => (Region::FarEast, "A39IBJ37TRP1C6"),
        "SG" => (Region::FarEast, "A19VAU5U5O7RUS"),
        _ => return None,
    };
    Some(resolved)
}

fn extract_error(result: &ApiResult) -> Option<String> {
    first_message(result, &["/errors/0/message", "/errors/0/code", "/message"])
}

pub struct AmazonAdapter {
    pipeline: RequestPipeline,
    seller_id: String,
    marketplace_id: &'static str,
    clock: Arc<dyn Clock>,
}

impl AmazonAdapter {
    pub fn new(credentials: &Credentials, context: &AdapterContext) -> Result<Self, ValidationError> {
        ensure_marketplace(credentials, MarketplaceId::Amazon)?;
        let code = credentials.region().unwrap_or("US");
        let (region, marketplace_id) =
            resolve_marketplace(code).ok_or_else(|| ValidationError::UnknownRegion {
                marketplace: MarketplaceId::Amazon,
                value: code.to_owned(),
            })?;
        let grant = TokenGrant::OAuth2Refresh {
            token_url: LWA_TOKEN_URL.to_owned(),
            client_id: credentials.get("client_id").to_owned(),
            client_secret: credentials.get("client_secret").to_owned(),
            refresh_token: credentials.get("refresh_token").to_owned(),
        };
        let pipeline = RequestPipeline::new(
            PipelineSpec {
                marketplace: MarketplaceId::Amazon,
                account: credentials.account_id().to_owned(),
                base_url: region.host(credentials.sandbox()).to_owned(),
                grant,
                placement: AuthPlacement::Header("x-amz-access-token"),
                extract_error,
            },
            context,
        )?;
        Ok(Self {
            pipeline,
            seller_id: credentials.get("seller_id").to_owned(),
            marketplace_id,
            clock: Arc::clone(&context.clock),
        })
    }

    pub fn marketplace_id(&self) -> &str {
        self.marketplace_id
    }

    fn listing_path(&self, sku: &str) -> String {
        format!(
            "{LISTINGS_PATH}/{}/{}",
            urlencoding::encode(&self.seller_id),
            urlencoding::encode(sku)
        )
    }

    fn scoped(&self, spec: RequestSpec) -> RequestSpec {
        spec.with_header("x-amz-marketplace-id", self.marketplace_id)
    }

    fn ack(&self, reference: Option<String>, result: ApiResult) -> Ack {
        Ack {
            marketplace: MarketplaceId::Amazon,
            reference,
            data: result.data.into_value(),
        }
    }

    fn sku_of(item: &Value) -> Result<String, ValidationError> {
        string_at(item, "/sku").ok_or(ValidationError::MissingField { field: "sku" })
    }
}

impl MarketplaceAdapter for AmazonAdapter {
    fn id(&self) -> MarketplaceId {
        MarketplaceId::Amazon
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(true, false, true, false)
    }

    fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    fn authenticate<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<AuthStatus, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let token = self.pipeline.access_token().await?;
            Ok(AuthStatus {
                marketplace: MarketplaceId::Amazon,
                scheme: AuthScheme::OAuth2Refresh,
                token,
                check: None,
            })
        })
    }

    fn get_products<'a>(
        &'a self,
        filters: Filters,
    ) -> Pin<Box<dyn Future<Output = Result<Listing, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let spec = RequestSpec::get(CATALOG_PATH)
                .with_query("marketplaceIds", self.marketplace_id)
                .with_query_map(&filters)
                .cached(self.pipeline.ttls().product);
            let result = self.pipeline.send(self.scoped(spec)).await?;
            let value = result.data.into_value();
            let mut listing = Listing::new(MarketplaceId::Amazon, items_at(&value, "/items"));
            listing.total = number_at(&value, "/numberOfResults");
            listing.next_token = string_at(&value, "/pagination/nextToken");
            Ok(listing)
        })
    }

    fn categories<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Listing, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let spec = RequestSpec::get(PRODUCT_TYPES_PATH)
                .with_query("marketplaceIds", self.marketplace_id)
                .cached(self.pipeline.ttls().category_tree);
            let result = self.pipeline.send(self.scoped(spec)).await?;
            let value = result.data.into_value();
            Ok(Listing::new(
                MarketplaceId::Amazon,
                items_at(&value, "/productTypes"),
            ))
        })
    }

    /// `product` is a listings item body (`productType`, `attributes`, ...)
    /// plus the `sku` it is stored under.
    fn create_or_update_product<'a>(
        &'a self,
        product: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            expect_object(&product, "product")?;
            let sku = Self::sku_of(&product)?;
            let mut body = product;
            if let Some(fields) = body.as_object_mut() {
                fields.remove("sku");
            }
            let spec = RequestSpec::put(self.listing_path(&sku))
                .with_query("marketplaceIds", self.marketplace_id)
                .with_json(body);
            let result = self.pipeline.send(self.scoped(spec)).await?;
            Ok(self.ack(Some(sku), result))
        })
    }

    fn get_orders<'a>(
        &'a self,
        filters: Filters,
    ) -> Pin<Box<dyn Future<Output = Result<Listing, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let mut spec = RequestSpec::get(ORDERS_PATH)
                .with_query("MarketplaceIds", self.marketplace_id)
                .with_query_map(&filters);
            if !spec.query.contains_key("CreatedAfter") && !spec.query.contains_key("LastUpdatedAfter")
            {
                let since = self.clock.now() - DEFAULT_ORDER_WINDOW;
                if let Ok(formatted) = since.format(&Rfc3339) {
                    spec = spec.with_query("CreatedAfter", formatted);
                }
            }
            let result = self.pipeline.send(self.scoped(spec)).await?;
            let value = result.data.into_value();
            let mut listing =
                Listing::new(MarketplaceId::Amazon, items_at(&value, "/payload/Orders"));
            listing.next_token = string_at(&value, "/payload/NextToken");
            Ok(listing)
        })
    }

    /// `shipped` confirms shipment with `extra` as the package detail; any
    /// other status is sent as an easy-ship shipment status update.
    fn update_order_status<'a>(
        &'a self,
        order_id: &'a str,
        status: &'a str,
        extra: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let order = urlencoding::encode(order_id);
            let spec = if status.eq_ignore_ascii_case("shipped") {
                RequestSpec::post(format!("{ORDERS_PATH}/{order}/shipmentConfirmation")).with_json(
                    json!({ "marketplaceId": self.marketplace_id, "packageDetail": extra }),
                )
            } else {
                let mut body = json!({ "marketplaceId": self.marketplace_id, "shipmentStatus": status });
                if let (Some(target), Value::Object(fields)) = (body.as_object_mut(), extra) {
                    target.extend(fields);
                }
                RequestSpec::post(format!("{ORDERS_PATH}/{order}/shipment")).with_json(body)
            };
            let result = self.pipeline.send(self.scoped(spec)).await?;
            Ok(self.ack(Some(order_id.to_owned()), result))
        })
    }

    /// Each item is `{sku, productType, price?, currency?, quantity?}` and is
    /// sent as a listings PATCH.
    fn update_price_and_inventory<'a>(
        &'a self,
        items: Vec<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let mut results = Vec::with_capacity(items.len());
            for item in items {
                expect_object(&item, "item")?;
                let sku = Self::sku_of(&item)?;
                let mut patches = Vec::new();
                if let Some(price) = item.get("price") {
                    let currency = item.get("currency").cloned().unwrap_or(json!("USD"));
                    patches.push(json!({
                        "op": "replace",
                        "path": "/attributes/purchasable_offer",
                        "value": [{
                            "marketplace_id": self.marketplace_id,
                            "currency": currency,
                            "our_price": [{"schedule": [{"value_with_tax": price}]}]
                        }]
                    }));
                }
                if let Some(quantity) = item.get("quantity") {
                    patches.push(json!({
                        "op": "replace",
                        "path": "/attributes/fulfillment_availability",
                        "value": [{"fulfillment_channel_code": "DEFAULT", "quantity": quantity}]
                    }));
                }
                let body = json!({
                    "productType": item.get("productType").cloned().unwrap_or(json!("PRODUCT")),
                    "patches": patches,
                });
                let spec = RequestSpec::new(HttpMethod::Patch, self.listing_path(&sku))
                    .with_query("marketplaceIds", self.marketplace_id)
                    .with_json(body);
                let result = self.pipeline.send(self.scoped(spec)).await?;
                results.push(json!({ "sku": sku, "response": result.data.into_value() }));
            }
            Ok(Ack {
                marketplace: MarketplaceId::Amazon,
                reference: None,
                data: Value::Array(results),
            })
        })
    }
}
