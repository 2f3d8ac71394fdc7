use std::sync::Arc;

use pazarsync_core::MarketplaceAdapter;
use serde_json::json;

use crate::error::CliError;

use super::CommandResult;

pub async fn run(adapter: &Arc<dyn MarketplaceAdapter>) -> Result<CommandResult, CliError> {
    let status = adapter.authenticate().await?;
    let pipeline = adapter.pipeline();
    Ok(CommandResult::ok(json!({
        "auth": serde_json::to_value(&status)?,
        "capabilities": adapter.capabilities().labels(),
        "token_state": serde_json::to_value(pipeline.tokens().state())?,
        "rate_limits": serde_json::to_value(pipeline.limiter().snapshot())?,
    })))
}
