use pazarsync_core::MarketplaceAdapter;

use crate::cli::OrderStatusArgs;
use crate::error::CliError;

use super::{extra_fields, CommandResult};

pub async fn run(
    adapter: &dyn MarketplaceAdapter,
    args: &OrderStatusArgs,
) -> Result<CommandResult, CliError> {
    let extra = extra_fields(&args.extra)?;
    let ack = adapter
        .update_order_status(&args.order_id, &args.status, extra)
        .await?;
    Ok(CommandResult::ok(serde_json::to_value(ack)?))
}
