//! Trendyol supplier API (JSON REST, Basic auth from an API key pair).

use std::future::Future;
use std::pin::Pin;

use serde_json::{json, Value};

use crate::adapters::{
    ensure_marketplace, expect_object, first_message, items_at, number_at, string_at, Ack,
    AuthStatus, CapabilitySet, Filters, Listing, MarketplaceAdapter,
};
use crate::auth::{AuthScheme, TokenGrant};
use crate::clock::Clock;
use crate::credentials::Credentials;
use crate::pipeline::{AdapterContext, AuthPlacement, PipelineSpec, RequestPipeline, RequestSpec};
use crate::transport::ApiResult;
use crate::{MarketplaceError, MarketplaceId, ValidationError};

pub const PRODUCTION_URL: &str = "https://api.trendyol.com/sapigw";
pub const STAGE_URL: &str = "https://stageapi.trendyol.com/sapigw";

fn extract_error(result: &ApiResult) -> Option<String> {
    first_message(result, &["/message", "/errors/0/message", "/errors/0/key"])
}

pub struct TrendyolAdapter {
    pipeline: RequestPipeline,
    supplier_id: String,
}

impl TrendyolAdapter {
    pub fn new(credentials: &Credentials, context: &AdapterContext) -> Result<Self, ValidationError> {
        ensure_marketplace(credentials, MarketplaceId::Trendyol)?;
        let base_url = if credentials.sandbox() {
            STAGE_URL
        } else {
            PRODUCTION_URL
        };
        let grant = TokenGrant::api_key_secret(
            credentials.get("api_key"),
            credentials.get("api_secret"),
            context.clock.now(),
        );
        let pipeline = RequestPipeline::new(
            PipelineSpec {
                marketplace: MarketplaceId::Trendyol,
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
            supplier_id: credentials.get("supplier_id").to_owned(),
        })
    }

    fn supplier_path(&self, suffix: &str) -> String {
        format!("suppliers/{}/{suffix}", self.supplier_id)
    }

    fn page(&self, result: ApiResult) -> Listing {
        let value = result.data.into_value();
        let mut listing = Listing::new(MarketplaceId::Trendyol, items_at(&value, "/content"));
        listing.total = number_at(&value, "/totalElements");
        listing.page = number_at(&value, "/page");
        listing
    }

    fn ack(&self, result: ApiResult) -> Ack {
        let data = result.data.into_value();
        Ack {
            marketplace: MarketplaceId::Trendyol,
            reference: string_at(&data, "/batchRequestId"),
            data,
        }
    }

    async fn send_products(&self, items: Vec<Value>) -> Result<Ack, MarketplaceError> {
        let result = self
            .pipeline
            .send(RequestSpec::post(self.supplier_path("v2/products")).with_json(json!({ "items": items })))
            .await?;
        Ok(self.ack(result))
    }
}

impl MarketplaceAdapter for TrendyolAdapter {
    fn id(&self) -> MarketplaceId {
        MarketplaceId::Trendyol
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
            // Key pairs are only checked by the server, so fetch one cheap page.
            let sample = self
                .pipeline
                .send(
                    RequestSpec::get(self.supplier_path("products"))
                        .with_query("page", "0")
                        .with_query("size", "1"),
                )
                .await?;
            let listing = self.page(sample);
            Ok(AuthStatus {
                marketplace: MarketplaceId::Trendyol,
                scheme: AuthScheme::ApiKeySecret,
                token,
                check: Some(json!({ "totalElements": listing.total })),
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
                    RequestSpec::get(self.supplier_path("products"))
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
                .send(RequestSpec::get("product-categories").cached(self.pipeline.ttls().category_tree))
                .await?;
            let value = result.data.into_value();
            Ok(Listing::new(
                MarketplaceId::Trendyol,
                items_at(&value, "/categories"),
            ))
        })
    }

    fn create_or_update_product<'a>(
        &'a self,
        product: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            expect_object(&product, "product")?;
            match product.get("items") {
                Some(Value::Array(items)) => self.send_products(items.clone()).await,
                _ => self.send_products(vec![product]).await,
            }
        })
    }

    fn create_or_update_products<'a>(
        &'a self,
        products: Vec<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move { self.send_products(products).await })
    }

    fn get_orders<'a>(
        &'a self,
        filters: Filters,
    ) -> Pin<Box<dyn Future<Output = Result<Listing, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let result = self
                .pipeline
                .send(RequestSpec::get(self.supplier_path("orders")).with_query_map(&filters))
                .await?;
            Ok(self.page(result))
        })
    }

    /// `order_id` is the shipment package id; `extra` may carry `lines` and
    /// `params` (e.g. `invoiceNumber`).
    fn update_order_status<'a>(
        &'a self,
        order_id: &'a str,
        status: &'a str,
        extra: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let mut body = json!({ "status": status, "lines": [], "params": {} });
            if let (Some(target), Value::Object(fields)) = (body.as_object_mut(), extra) {
                target.extend(fields);
            }
            let result = self
                .pipeline
                .send(
                    RequestSpec::put(self.supplier_path(&format!("shipment-packages/{order_id}")))
                        .with_json(body),
                )
                .await?;
            let mut ack = self.ack(result);
            ack.reference = Some(order_id.to_owned());
            Ok(ack)
        })
    }

    fn update_price_and_inventory<'a>(
        &'a self,
        items: Vec<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Ack, MarketplaceError>> + Send + 'a>> {
        Box::pin(async move {
            let result = self
                .pipeline
                .send(
                    RequestSpec::post(self.supplier_path("products/price-and-inventory"))
                        .with_json(json!({ "items": items })),
                )
                .await?;
            Ok(self.ack(result))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialsConfig;

    #[test]
    fn stage_gateway_is_used_in_sandbox() {
        let credentials = Credentials::new(
            MarketplaceId::Trendyol,
            CredentialsConfig {
                api_key: Some(String::from("k")),
                api_secret: Some(String::from("s")),
                supplier_id: Some(String::from("42")),
                sandbox: true,
                ..CredentialsConfig::default()
            },
        )
        .expect("valid");
        let adapter =
            TrendyolAdapter::new(&credentials, &AdapterContext::default()).expect("adapter");

        assert_eq!(adapter.pipeline().base_url(), STAGE_URL);
        assert_eq!(adapter.supplier_path("orders"), "suppliers/42/orders");
    }

    #[test]
    fn error_message_falls_back_to_errors_array() {
        let result = ApiResult::from_response(crate::transport::HttpResponse::new(
            400,
            r#"{"errors":[{"key":"product.barcode.duplicate","message":"Barcode exists"}]}"#,
        ));
        assert_eq!(extract_error(&result).as_deref(), Some("Barcode exists"));
    }
}
