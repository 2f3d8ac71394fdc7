use std::sync::Arc;

use pazarsync_core::{MarketplaceError, SystemClock, SyncConfig};
use serde_json::json;

use crate::error::CliError;

use super::CommandResult;

pub async fn clear(config: &SyncConfig) -> Result<CommandResult, CliError> {
    let backend = serde_json::to_value(config.cache.backend)?;
    let cleared = match config.cache.build(Arc::new(SystemClock)) {
        Some(cache) => {
            cache.clear().await.map_err(MarketplaceError::from)?;
            true
        }
        None => false,
    };
    Ok(CommandResult::ok(json!({ "backend": backend, "cleared": cleared })))
}
