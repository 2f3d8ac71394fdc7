//! CLI argument definitions for pazarsync.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `auth` | Authenticate against a marketplace |
//! | `products` | List products |
//! | `categories` | List the category tree |
//! | `orders` | List orders |
//! | `order-status` | Update the status of one order |
//! | `push-products` | Create or update products in paced chunks |
//! | `verify-webhook` | Check a webhook signature |
//! | `cache` | Manage the response cache |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `pazarsync.toml` | Configuration file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! pazarsync auth trendyol
//! pazarsync orders hepsiburada --filter status=Open --pretty
//! pazarsync push-products amazon --file items.json --chunk-size 20
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pazarsync_core::MarketplaceId;

/// Marketplace synchronization CLI.
///
/// Talks to Amazon, Trendyol, Hepsiburada and eBay through one shared client
/// framework with token management, rate limiting, retries and caching.
#[derive(Debug, Parser)]
#[command(name = "pazarsync", author, version, about = "Marketplace synchronization CLI")]
pub struct Cli {
    /// Configuration file. A missing default file means built-in defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Authenticate and report the token's expiry.
    ///
    /// # Examples
    ///
    ///   pazarsync auth amazon
    Auth(MarketplaceArgs),

    /// List products.
    ///
    /// # Examples
    ///
    ///   pazarsync products trendyol --filter page=0 --filter size=50
    Products(ListingArgs),

    /// List the marketplace category tree.
    Categories(MarketplaceArgs),

    /// List orders.
    ///
    /// # Examples
    ///
    ///   pazarsync orders hepsiburada --filter start_date=2024-01-01
    Orders(ListingArgs),

    /// Update the status of one order.
    ///
    /// # Examples
    ///
    ///   pazarsync order-status ebay 12-34567-89012 shipped
    OrderStatus(OrderStatusArgs),

    /// Create or update products from a JSON array file in paced chunks.
    ///
    /// Exits with code 4 when any chunk fails.
    PushProducts(PushProductsArgs),

    /// Validate a webhook signature with the configured secret.
    VerifyWebhook(VerifyWebhookArgs),

    /// Response cache management.
    Cache(CacheArgs),
}

#[derive(Debug, Args)]
pub struct MarketplaceArgs {
    /// amazon, trendyol, hepsiburada or ebay.
    pub marketplace: MarketplaceId,
}

#[derive(Debug, Args)]
pub struct ListingArgs {
    pub marketplace: MarketplaceId,

    /// Query filter as key=value; repeatable.
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,
}

#[derive(Debug, Args)]
pub struct OrderStatusArgs {
    pub marketplace: MarketplaceId,

    pub order_id: String,

    pub status: String,

    /// Extra field as key=value; repeatable.
    #[arg(long = "extra", value_name = "KEY=VALUE")]
    pub extra: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PushProductsArgs {
    pub marketplace: MarketplaceId,

    /// JSON file holding an array of product objects.
    #[arg(long)]
    pub file: PathBuf,

    /// Products per call; defaults to `[batch] chunk_size`.
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Pause between chunks; defaults to `[batch] pacing_ms`.
    #[arg(long)]
    pub pacing_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct VerifyWebhookArgs {
    /// File with the raw request body.
    #[arg(long)]
    pub payload_file: PathBuf,

    /// Hex signature sent with the webhook.
    #[arg(long)]
    pub signature: String,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Remove every cached response from the configured backend.
    Clear,
}
