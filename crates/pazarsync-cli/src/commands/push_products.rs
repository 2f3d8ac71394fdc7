use std::time::Duration;

use pazarsync_core::{BatchCoordinator, BatchSummary};
use serde_json::{json, Value};
use tracing::info;

use crate::cli::PushProductsArgs;
use crate::error::CliError;

use super::{CommandResult, Session};

pub async fn run(session: &Session<'_>, args: &PushProductsArgs) -> Result<CommandResult, CliError> {
    let content = std::fs::read_to_string(&args.file)?;
    let products: Vec<Value> = serde_json::from_str(&content)?;

    let adapter = session.adapter(args.marketplace)?;
    let chunk_size = args.chunk_size.unwrap_or(session.config.batch.chunk_size);
    let coordinator = match args.pacing_ms {
        Some(pacing_ms) => BatchCoordinator::new(Duration::from_millis(pacing_ms)),
        None => session.config.batch.coordinator(),
    };
    info!(
        marketplace = %args.marketplace,
        products = products.len(),
        chunk_size,
        "pushing products"
    );

    let results = coordinator
        .run_batches(
            products,
            chunk_size,
            |chunk| {
                let adapter = adapter.clone();
                async move { adapter.create_or_update_products(chunk).await }
            },
            &session.cancel,
        )
        .await?;

    let summary = BatchSummary::of(&results);
    let result = CommandResult::ok(json!({
        "marketplace": args.marketplace,
        "summary": serde_json::to_value(summary)?,
        "chunks": serde_json::to_value(&results)?,
    }));
    if summary.all_succeeded() {
        Ok(result)
    } else {
        Ok(result.with_failure(CliError::BatchFailed {
            failed: summary.failed,
            chunks: summary.chunks,
        }))
    }
}
