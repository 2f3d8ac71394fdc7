//! eBay Trading API (XML envelopes posted to a single `api.dll` endpoint).
//!
//! Every call is a POST whose body names the call and carries the user token
//! in a `RequesterCredentials` block; the call name also travels in the
//! `X-EBAY-API-CALL-NAME` header. Responses are flattened by [`crate::xml`]
//! and checked for `Ack=Failure` before being handed back.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use crate::adapters::{
    ensure_marketplace, expect_object, first_message, items_at, number_at, string_at, Ack,
    AuthStatus, CapabilitySet, Filters, Listing, MarketplaceAdapter,
};
use crate::auth::{AuthScheme, TokenGrant};
use crate::clock::Clock;
use crate::credentials::Credentials;
use crate::pipeline::{AdapterContext, AuthPlacement, PipelineSpec, RequestPipeline, RequestSpec};
use crate::transport::ApiResult;
use crate::xml;
use crate::{MarketplaceError, MarketplaceId, ValidationError};

pub const PRODUCTION_URL: &str = "https://api.ebay.com/ws/api.dll";
pub const SANDBOX_URL: &str = "https://api.sandbox.ebay.com/ws/api.dll";
pub const COMPATIBILITY_LEVEL: &str = "967";

const NAMESPACE: &str = "urn:ebay:apis:eBLBaseComponents";

/// `ReviseInventoryStatus` accepts at most this many items per call.
const INVENTORY_GROUP: usize = 4;

fn extract_error(result: &ApiResult) -> Option<String> {
    first_message(
        result,
        &[
            "/Errors/LongMessage",
            "/Errors/0/LongMessage",
            "/Errors/ShortMessage",
            "/Errors/0/ShortMessage",
        ],
    )
}

/// Maps listing filters onto Trading API request fields.
fn listing_fields(filters: &Filters) -> Result<String, ValidationError> {
    let mut fields = Map::new();
    let mut pagination = Map::new();
    for (name, value) in filters {
        match name.as_str() {
            "page" => {
                pagination.insert(String::from("PageNumber"), Value::String(value.clone()));
            }
            "per_page" | "size" => {
                pagination.insert(String::from("EntriesPerPage"), Value::String(value.clone()));
            }
            _ => {
                fields.insert(name.clone(), Value::String(value.clone()));
            }
        }
    }
    if !pagination.is_empty() {
        fields.insert(String::from("Pagination"), Value::Object(pagination));
    }
    xml::fields_from_json(&Value::Object(fields))
}

pub struct EbayAdapter {
    pipeline: RequestPipeline,
    dev_id: String,
    app_id: String,
    cert_id: String,
    site_id: String,
}

impl EbayAdapter {
    pub fn new(credentials: &Credentials, context: &AdapterContext) -> Result<Self, ValidationError> {
        ensure_marketplace(credentials, MarketplaceId::Ebay)?;
        let base_url = if credentials.sandbox() {
            SANDBOX_URL
        } else {
            PRODUCTION_URL
        };
        let grant = TokenGrant::long_lived(credentials.get("auth_token"), context.clock.now());
        let pipeline = RequestPipeline::new(
            PipelineSpec {
                marketplace: MarketplaceId::Ebay,
                account: credentials.account_id().to_owned(),
                base_url: base_url.to_owned(),
                grant,
                placement: AuthPlacement::Embedded,
                extract_error,
            },
            context,
        )?;
        Ok(Self {
            pipeline,
            dev_id: credentials.get("dev_id").to_owned(),
            app_id: credentials.get("client_id").to_owned(),
            cert_id: credentials.get("client_secret").to_owned(),
            site_id: credentials.region().unwrap_or("0").to_owned(),
        })
    }

    /// Full request document for `call` with `body` as its inner fields.
    pub fn envelope(call: &str, token: &str, body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <{call}Request xmlns=\"{NAMESPACE}\">\
             <RequesterCredentials>{}</RequesterCredentials>\
             {body}</{call}Request>",
            xml::element("eBayAuthToken", token)
        )
    }

    /// Posts one Trading API call and returns the flattened response.
    async fn call(&self, name: &str, body: &str) -> Result<Value, MarketplaceError> {
        let token = self.pipeline.access_token().await?;
        let spec = RequestSpec::post(self.pipeline.base_url())
            .with_xml(Self::envelope(name, token.value(), body))
            .with_header("X-EBAY-API-COMPATIBILITY-LEVEL", COMPATIBILITY_LEVEL)
            .with_header("X-EBAY-API-DEV-NAME", self.dev_id.as_str())
            .with_header("X-EBAY-API-APP-NAME", self.app_id.as_str())
            .with_header("X-EBAY-API-CERT-NAME", self.cert_id.as_str())
            .with_header("X-EBAY-API-CALL-NAME", name)
            .with_header("X-EBAY-API-SITEID", self.site_id.as_str());
        let result = self.pipeline.send(spec).await?;

        let status = result.http_status;
        let failed = result
            .data
            .pointer("/Ack")
            .and_then(Value::as_str)
            .is_some_and(|ack| ack == "Failure");
        if failed {
            let message = extract_error(&result).unwrap_or_else(|| String::from("Ack=Failure"));
            return Err(self.pipeline.envelope_failure(name, status, message));
        }
        if !result.data.as_value().is_some_and(Value::is_object) {
            return Err(self
                .pipeline
                .decode_failure(name, "expected an XML response document"));
        }
        Ok(result.data.into_value())
    }

    fn ack(reference: Option<String>, data: Value) -> Ack {
        Ack {
            marketplace: MarketplaceId::Ebay,
            reference,
            data,
        }
    }
}

impl MarketplaceAdapter for EbayAdapter {
    fn id(&self) -> MarketplaceId {
        MarketplaceId::Ebay
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(false, true, false, false)
    }

    fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    /// The token is long-lived, so the official time call serves as the check.
    fn authenticate<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<AuthStatus, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let token = self.pipeline.access_token().await?;
            let response = self.call("GeteBayOfficialTime", "").await?;
            Ok(AuthStatus {
                marketplace: MarketplaceId::Ebay,
                scheme: AuthScheme::ApiKeySecret,
                token,
                check: response.get("Timestamp").cloned(),
            })
        })
    }

    fn get_products<'a>(
        &'a self,
        filters: Filters,
    ) -> Pin<Box<dyn Future<Output = Result<Listing, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self.call("GetSellerList", &listing_fields(&filters)?).await?;
            let mut listing =
                Listing::new(MarketplaceId::Ebay, items_at(&response, "/ItemArray/Item"));
            listing.total = number_at(&response, "/PaginationResult/TotalNumberOfEntries");
            listing.page = number_at(&response, "/PageNumber");
            Ok(listing)
        })
    }

    fn categories<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Listing, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let body = format!(
                "{}{}",
                xml::element("CategorySiteID", &self.site_id),
                xml::element("DetailLevel", "ReturnAll")
            );
            let response = self.call("GetCategories", &body).await?;
            let mut listing = Listing::new(
                MarketplaceId::Ebay,
                items_at(&response, "/CategoryArray/Category"),
            );
            listing.total = number_at(&response, "/CategoryCount");
            Ok(listing)
        })
    }

    /// Revises the listing when the product carries an `ItemID`, otherwise
    /// adds a new fixed price listing.
    fn create_or_update_product<'a>(
        &'a self,
        product: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            expect_object(&product, "product")?;
            let call = if string_at(&product, "/ItemID").is_some() {
                "ReviseFixedPriceItem"
            } else {
                "AddFixedPriceItem"
            };
            let item = xml::from_json("Item", &product)?;
            let response = self.call(call, &item).await?;
            Ok(Self::ack(string_at(&response, "/ItemID"), response))
        })
    }

    fn get_orders<'a>(
        &'a self,
        filters: Filters,
    ) -> Pin<Box<dyn Future<Output = Result<Listing, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self.call("GetOrders", &listing_fields(&filters)?).await?;
            let mut listing =
                Listing::new(MarketplaceId::Ebay, items_at(&response, "/OrderArray/Order"));
            listing.total = number_at(&response, "/PaginationResult/TotalNumberOfEntries");
            listing.page = number_at(&response, "/PageNumber");
            Ok(listing)
        })
    }

    /// `status` is `shipped` or `paid`; `extra` fields (e.g. `Shipment`) are
    /// rendered into the `CompleteSale` request as-is.
    fn update_order_status<'a>(
        &'a self,
        order_id: &'a str,
        status: &'a str,
        extra: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let mut body = xml::element("OrderID", order_id);
            match status.to_ascii_lowercase().as_str() {
                "shipped" => body.push_str(&xml::element("Shipped", "true")),
                "paid" => body.push_str(&xml::element("Paid", "true")),
                _ => {}
            }
            body.push_str(&xml::fields_from_json(&extra)?);
            let response = self.call("CompleteSale", &body).await?;
            Ok(Self::ack(Some(order_id.to_owned()), response))
        })
    }

    fn update_price_and_inventory<'a>(
        &'a self,
        items: Vec<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let mut responses = Vec::new();
            for group in items.chunks(INVENTORY_GROUP) {
                let body = group
                    .iter()
                    .map(|item| xml::from_json("InventoryStatus", item))
                    .collect::<Result<String, _>>()?;
                responses.push(self.call("ReviseInventoryStatus", &body).await?);
            }
            Ok(Self::ack(None, Value::Array(responses)))
        })
    }
}
