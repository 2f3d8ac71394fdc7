use pazarsync_core::{Filters, MarketplaceAdapter};

use crate::error::CliError;

use super::CommandResult;

pub async fn products(
    adapter: &dyn MarketplaceAdapter,
    filters: Filters,
) -> Result<CommandResult, CliError> {
    let listing = adapter.get_products(filters).await?;
    Ok(CommandResult::ok(serde_json::to_value(listing)?))
}

pub async fn categories(adapter: &dyn MarketplaceAdapter) -> Result<CommandResult, CliError> {
    let listing = adapter.categories().await?;
    Ok(CommandResult::ok(serde_json::to_value(listing)?))
}

pub async fn orders(
    adapter: &dyn MarketplaceAdapter,
    filters: Filters,
) -> Result<CommandResult, CliError> {
    let listing = adapter.get_orders(filters).await?;
    Ok(CommandResult::ok(serde_json::to_value(listing)?))
}
