mod auth;
mod cache;
mod listing;
mod order_status;
mod push_products;
mod webhook;

use std::path::Path;
use std::sync::Arc;

use pazarsync_core::config::DEFAULT_CONFIG_PATH;
use pazarsync_core::{
    build_adapter, AdapterContext, Filters, MarketplaceAdapter, MarketplaceId, SyncConfig,
    ValidationError,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{CacheCommand, Cli, Command};
use crate::error::CliError;

/// Output of one command. `failure` is reported after `data` is printed.
pub struct CommandResult {
    pub data: Value,
    pub failure: Option<CliError>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            failure: None,
        }
    }

    pub fn with_failure(mut self, failure: CliError) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Loads `path`, or the default file when present, then applies
/// `PAZARSYNC_*` environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig, CliError> {
    let mut config = match path {
        Some(path) => SyncConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => SyncConfig::load(DEFAULT_CONFIG_PATH)?,
        None => SyncConfig::default(),
    };
    config.apply_process_env();
    config.validate()?;
    Ok(config)
}

pub async fn run(cli: &Cli, config: &SyncConfig) -> Result<CommandResult, CliError> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });
    let context = config.adapter_context().with_cancellation(cancel.clone());
    let session = Session {
        config,
        context,
        cancel,
    };

    match &cli.command {
        Command::Auth(args) => auth::run(&session.adapter(args.marketplace)?).await,
        Command::Products(args) => {
            let adapter = session.adapter(args.marketplace)?;
            listing::products(adapter.as_ref(), parse_filters(&args.filters)?).await
        }
        Command::Categories(args) => {
            listing::categories(session.adapter(args.marketplace)?.as_ref()).await
        }
        Command::Orders(args) => {
            let adapter = session.adapter(args.marketplace)?;
            listing::orders(adapter.as_ref(), parse_filters(&args.filters)?).await
        }
        Command::OrderStatus(args) => {
            order_status::run(session.adapter(args.marketplace)?.as_ref(), args).await
        }
        Command::PushProducts(args) => push_products::run(&session, args).await,
        Command::VerifyWebhook(args) => webhook::run(config, args),
        Command::Cache(args) => match args.command {
            CacheCommand::Clear => cache::clear(config).await,
        },
    }
}

/// Configuration plus the shared adapter context for one invocation.
pub struct Session<'a> {
    pub config: &'a SyncConfig,
    pub context: AdapterContext,
    pub cancel: CancellationToken,
}

impl Session<'_> {
    pub fn adapter(
        &self,
        marketplace: MarketplaceId,
    ) -> Result<Arc<dyn MarketplaceAdapter>, CliError> {
        let credentials = self.config.credentials(marketplace)?;
        let context = self.config.context_for(&self.context, marketplace);
        Ok(build_adapter(&credentials, &context)?)
    }
}

/// Parses repeated `key=value` arguments.
pub fn parse_filters(raw: &[String]) -> Result<Filters, ValidationError> {
    raw.iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_owned(), value.trim().to_owned()))
            }
            _ => Err(ValidationError::InvalidFilter {
                value: pair.clone(),
            }),
        })
        .collect()
}

/// `key=value` arguments as a JSON object of strings.
pub fn extra_fields(raw: &[String]) -> Result<Value, ValidationError> {
    let fields: Map<String, Value> = parse_filters(raw)?
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    Ok(Value::Object(fields))
}
