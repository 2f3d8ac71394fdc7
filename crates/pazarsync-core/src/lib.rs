//! # Pazarsync Core
//!
//! Shared client framework for e-commerce marketplace integrations.
//!
//! ## Overview
//!
//! Every marketplace adapter is built on the same request path:
//!
//! - **Transport** executes one HTTP call and parses the body as JSON, XML or text
//! - **Retry executor** repeats transport failures and 5xx answers with backoff
//! - **Response cache** stores successful GET results with a per-endpoint TTL
//! - **Rate limiter** admits calls against per-minute and per-hour windows
//! - **Token manager** obtains and refreshes credentials, one refresh at a time
//! - **Batch coordinator** runs large item lists in paced, isolated chunks
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Amazon, Trendyol, Hepsiburada and eBay adapters |
//! | [`auth`] | Auth schemes, access tokens and the token manager |
//! | [`batch`] | Chunked batch execution |
//! | [`cache`] | Response cache and its memory/file backends |
//! | [`clock`] | Wall clock abstraction |
//! | [`config`] | TOML configuration |
//! | [`credentials`] | Per-marketplace credential validation |
//! | [`error`] | Error types |
//! | [`logging`] | API call logging |
//! | [`marketplace`] | Marketplace identifiers |
//! | [`pipeline`] | Request pipeline shared by every adapter |
//! | [`rate_limit`] | Fixed-window rate limiting |
//! | [`retry`] | Retry executor and backoff |
//! | [`transport`] | HTTP transport abstraction |
//! | [`webhook`] | Webhook signature verification |
//! | [`xml`] | XML/JSON bridging for XML envelopes |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pazarsync_core::{build_adapter, AdapterContext, Credentials, CredentialsConfig, MarketplaceId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials::new(
//!         MarketplaceId::Trendyol,
//!         CredentialsConfig {
//!             api_key: Some("key".into()),
//!             api_secret: Some("secret".into()),
//!             supplier_id: Some("12345".into()),
//!             ..CredentialsConfig::default()
//!         },
//!     )?;
//!     let adapter = build_adapter(&credentials, &AdapterContext::default())?;
//!
//!     let orders = adapter.get_orders(Default::default()).await?;
//!     println!("{} orders", orders.items.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  CLI / Host          │
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ MarketplaceAdapter   │────▶│ Batch Coordinator│
//! │ (URLs, payloads)     │     └──────────────────┘
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ RequestPipeline      │────▶│ Response Cache   │
//! │                      │────▶│ Token Manager    │
//! │                      │────▶│ Rate Limiter     │
//! └──────────┬───────────┘     └──────────────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ Retry Executor       │────▶│ Transport        │
//! │                      │     │ (reqwest)        │
//! └──────────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Adapter operations return [`MarketplaceError`], which always names the
//! marketplace:
//!
//! ```rust
//! use pazarsync_core::{ErrorKind, MarketplaceError};
//!
//! fn handle_error(error: MarketplaceError) {
//!     match error.kind() {
//!         ErrorKind::RateLimited => {
//!             // Wait for the next window
//!         }
//!         ErrorKind::Authentication => {
//!             // Check credentials
//!         }
//!         _ if error.is_retryable() => {
//!             // Try again later
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - Secrets are redacted from every `Debug` implementation and never logged
//! - All HTTP requests use TLS via rustls
//! - Webhook signatures are compared in constant time

use std::future::Future;
use std::pin::Pin;

pub mod adapters;
pub mod auth;
pub mod batch;
pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod marketplace;
pub mod pipeline;
pub mod rate_limit;
pub mod retry;
pub mod transport;
pub mod webhook;
pub mod xml;

/// Boxed future returned by object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// Adapters
pub use adapters::{
    build_adapter, Ack, AmazonAdapter, AuthStatus, CapabilitySet, EbayAdapter, Filters,
    HepsiburadaAdapter, Listing, MarketplaceAdapter, TrendyolAdapter,
};

// Authentication
pub use auth::{AccessToken, AuthScheme, TokenGrant, TokenKind, TokenManager, TokenState};

// Batching
pub use batch::{BatchCoordinator, BatchJob, BatchResult, BatchSummary};

// Caching
pub use cache::{
    CacheBackend, CacheMode, CacheStats, CacheTtls, FileCacheBackend, MemoryCacheBackend,
    ResponseCache,
};

// Clock
pub use clock::{Clock, ManualClock, SystemClock};

// Configuration
pub use config::{ConfigError, SyncConfig};

// Credentials
pub use credentials::{Credentials, CredentialsConfig};

// Error types
pub use error::{CacheError, ErrorKind, MarketplaceError, ValidationError};

// Logging
pub use logging::{ApiCallLogger, ApiCallRecord, LogLevel, TracingLogger};

// Marketplace identifiers
pub use marketplace::MarketplaceId;

// Request pipeline
pub use pipeline::{AdapterContext, AuthPlacement, RequestBody, RequestPipeline, RequestSpec};

// Rate limiting
pub use rate_limit::{
    CounterStore, MemoryCounterStore, RateLimitConfig, RateLimitSnapshot, RateLimiter,
    WindowGranularity,
};

// Retry logic
pub use retry::{Backoff, RetryConfig, RetryExecutor};

// Transport
pub use transport::{
    ApiResult, HttpAuth, HttpClient, HttpMethod, HttpRequest, HttpResponse, Payload,
    ReqwestHttpClient, Transport, TransportError, TransportErrorKind,
};

// Webhooks
pub use webhook::{WebhookEvent, WebhookVerifier};
