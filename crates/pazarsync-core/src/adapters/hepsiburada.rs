//! Hepsiburada merchant API (JSON REST, session token from username/password).

use std::future::Future;
use std::pin::Pin;

use serde_json::{json, Value};

use crate::adapters::{
    ensure_marketplace, expect_object, first_message, items_at, number_at, string_at, Ack,
    AuthStatus, CapabilitySet, Filters, Listing, MarketplaceAdapter,
};
use crate::auth::{AuthScheme, TokenGrant};
use crate::credentials::Credentials;
use crate::pipeline::{AdapterContext, AuthPlacement, PipelineSpec, RequestPipeline, RequestSpec};
use crate::transport::ApiResult;
use crate::{MarketplaceError, MarketplaceId, ValidationError};

pub const PRODUCTION_URL: &str = "https://mpop.hepsiburada.com/api";
pub const SIT_URL: &str = "https://mpop-sit.hepsiburada.com/api";

fn extract_error(result: &ApiResult) -> Option<String> {
    first_message(
        result,
        &["/message", "/error_description", "/error", "/title"],
    )
}

/// Order filters use snake_case on our side and camelCase on the wire.
fn order_query(filters: &Filters) -> Filters {
    filters
        .iter()
        .map(|(name, value)| {
            let name = match name.as_str() {
                "start_date" => "startDate",
                "end_date" => "endDate",
                other => other,
            };
            (name.to_owned(), value.clone())
        })
        .collect()
}

pub struct HepsiburadaAdapter {
    pipeline: RequestPipeline,
    merchant_id: String,
}

impl HepsiburadaAdapter {
    pub fn new(credentials: &Credentials, context: &AdapterContext) -> Result<Self, ValidationError> {
        ensure_marketplace(credentials, MarketplaceId::Hepsiburada)?;
        let base_url = if credentials.sandbox() {
            SIT_URL
        } else {
            PRODUCTION_URL
        };
        let grant = TokenGrant::BasicSession {
            login_url: format!("{base_url}/authenticate"),
            username: credentials.get("username").to_owned(),
            password: credentials.get("password").to_owned(),
        };
        let pipeline = RequestPipeline::new(
            PipelineSpec {
                marketplace: MarketplaceId::Hepsiburada,
                account: credentials.account_id().to_owned(),
                base_url: base_url.to_owned(),
                grant,
                placement: AuthPlacement::Authorization,
                extract_error,
            },
            context,
        )?;
        Ok(Self {
            pipeline,
            merchant_id: credentials.get("merchant_id").to_owned(),
        })
    }

    fn page(&self, result: ApiResult) -> Listing {
        let value = result.data.into_value();
        let items = match &value {
            Value::Array(items) => items.clone(),
            _ => items_at(&value, "/data"),
        };
        let mut listing = Listing::new(MarketplaceId::Hepsiburada, items);
        listing.total = number_at(&value, "/totalCount").or_else(|| number_at(&value, "/total"));
        listing.page = number_at(&value, "/page");
        listing
    }

    fn ack(&self, reference: Option<String>, result: ApiResult) -> Ack {
        let data = result.data.into_value();
        Ack {
            marketplace: MarketplaceId::Hepsiburada,
            reference: reference.or_else(|| string_at(&data, "/trackingId")),
            data,
        }
    }
}

impl MarketplaceAdapter for HepsiburadaAdapter {
    fn id(&self) -> MarketplaceId {
        MarketplaceId::Hepsiburada
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(true, false, false, true)
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
                marketplace: MarketplaceId::Hepsiburada,
                scheme: AuthScheme::BasicSession,
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
            let result = self
                .pipeline
                .send(
                    RequestSpec::get("products")
                        .with_query("merchantId", self.merchant_id.as_str())
                        .with_query_map(&filters)
                        .cached(self.pipeline.ttls().product),
                )
                .await?;
            Ok(self.page(result))
        })
    }

    fn categories<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Listing, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let result = self
                .pipeline
                .send(RequestSpec::get("categories").cached(self.pipeline.ttls().category_tree))
                .await?;
            Ok(self.page(result))
        })
    }

    fn create_or_update_product<'a>(
        &'a self,
        product: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            expect_object(&product, "product")?;
            let reference = string_at(&product, "/merchantSku");
            let result = self
                .pipeline
                .send(RequestSpec::post("products").with_json(product))
                .await?;
            Ok(self.ack(reference, result))
        })
    }

    fn get_orders<'a>(
        &'a self,
        filters: Filters,
    ) -> Pin<Box<dyn Future<Output = Result<Listing, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let result = self
                .pipeline
                .send(RequestSpec::get("orders").with_query_map(&order_query(&filters)))
                .await?;
            Ok(self.page(result))
        })
    }

    /// `extra` is sent as the order's `trackingInfo`.
    fn update_order_status<'a>(
        &'a self,
        order_id: &'a str,
        status: &'a str,
        extra: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let body = json!({ "status": status, "trackingInfo": extra });
            let result = self
                .pipeline
                .send(
                    RequestSpec::put(format!("orders/{}/status", urlencoding::encode(order_id)))
                        .with_json(body),
                )
                .await?;
            Ok(self.ack(Some(order_id.to_owned()), result))
        })
    }

    fn update_price_and_inventory<'a>(
        &'a self,
        items: Vec<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let result = self
                .pipeline
                .send(RequestSpec::put("products/stock-price").with_json(json!({ "items": items })))
                .await?;
            Ok(self.ack(None, result))
        })
    }
}
