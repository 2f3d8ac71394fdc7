//! API call logging.
//!
//! The framework reports through [`ApiCallLogger`] so hosts can route records
//! into their own storage; [`TracingLogger`] emits structured `tracing` events.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::transport::HttpMethod;
use crate::MarketplaceId;

/// Severity for free-form framework log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One outbound attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCallRecord {
    pub request_id: Uuid,
    pub marketplace: MarketplaceId,
    pub endpoint: String,
    pub method: HttpMethod,
    /// `None` when the attempt failed below HTTP (timeout, DNS, TLS).
    pub status: Option<u16>,
    pub duration_ms: u64,
    pub attempt: u32,
    pub error: Option<String>,
}

pub trait ApiCallLogger: Send + Sync {
    fn log_api_call(&self, record: &ApiCallRecord);

    fn log(
        &self,
        marketplace: MarketplaceId,
        level: LogLevel,
        message: &str,
        context: &BTreeMap<String, String>,
    );
}

/// Default logger writing to the `tracing` subscriber installed by the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl ApiCallLogger for TracingLogger {
    fn log_api_call(&self, record: &ApiCallRecord) {
        match (record.status, record.error.as_deref()) {
            (Some(status), _) if status < 400 => info!(
                request_id = %record.request_id,
                marketplace = %record.marketplace,
                endpoint = %record.endpoint,
                method = %record.method,
                status,
                duration_ms = record.duration_ms,
                attempt = record.attempt,
                "api call"
            ),
            (status, error) => warn!(
                request_id = %record.request_id,
                marketplace = %record.marketplace,
                endpoint = %record.endpoint,
                method = %record.method,
                status = ?status,
                duration_ms = record.duration_ms,
                attempt = record.attempt,
                error = error.unwrap_or_default(),
                "api call failed"
            ),
        }
    }

    fn log(
        &self,
        marketplace: MarketplaceId,
        level: LogLevel,
        message: &str,
        context: &BTreeMap<String, String>,
    ) {
        match level {
            LogLevel::Debug => debug!(%marketplace, ?context, "{message}"),
            LogLevel::Info => info!(%marketplace, ?context, "{message}"),
            LogLevel::Warn => warn!(%marketplace, ?context, "{message}"),
            LogLevel::Error => error!(%marketplace, ?context, "{message}"),
        }
    }
}
