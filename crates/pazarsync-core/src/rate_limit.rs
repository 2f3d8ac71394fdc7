//! Fixed-window request admission.
//!
//! Every outbound call is counted in a minute bucket and an hour bucket. A
//! call that pushes either counter past its limit is rejected immediately with
//! [`MarketplaceError::RateLimitExceeded`]; the limiter never sleeps.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::{MarketplaceError, MarketplaceId, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowGranularity {
    Minute,
    Hour,
}

impl WindowGranularity {
    pub const fn seconds(self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
        }
    }

    /// Epoch bucket containing `unix_seconds`.
    pub const fn bucket(self, unix_seconds: i64) -> i64 {
        unix_seconds.div_euclid(self.seconds())
    }
}

impl Display for WindowGranularity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-minute and per-hour limits for one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1_000,
        }
    }
}

impl RateLimitConfig {
    pub const fn new(per_minute: u32, per_hour: u32) -> Self {
        Self {
            per_minute,
            per_hour,
        }
    }

    /// Published limits of each marketplace.
    pub const fn for_marketplace(marketplace: MarketplaceId) -> Self {
        match marketplace {
            MarketplaceId::Amazon => Self::new(60, 1_000),
            MarketplaceId::Trendyol => Self::new(100, 1_000),
            MarketplaceId::Hepsiburada => Self::new(60, 1_000),
            MarketplaceId::Ebay => Self::new(60, 5_000),
        }
    }

    pub const fn limit(&self, window: WindowGranularity) -> u32 {
        match window {
            WindowGranularity::Minute => self.per_minute,
            WindowGranularity::Hour => self.per_hour,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for window in [WindowGranularity::Minute, WindowGranularity::Hour] {
            if self.limit(window) == 0 {
                return Err(ValidationError::ZeroRateLimit { window });
            }
        }
        Ok(())
    }
}

/// Shared storage for window counters.
///
/// Implementations must reset a counter when it is incremented for a newer
/// bucket than the one it currently holds.
pub trait CounterStore: Send + Sync {
    /// Increments the counter for `key` in `bucket` and returns the new count.
    fn increment(&self, key: &str, bucket: i64) -> u64;

    /// Current count for `key` in `bucket`; zero if the stored bucket differs.
    fn current(&self, key: &str, bucket: i64) -> u64;
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    bucket: i64,
    count: u64,
}

/// Mutex-protected in-process counter map.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, WindowCounter>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&self, key: &str, bucket: i64) -> u64 {
        let mut counters = self.counters.lock();
        let counter = counters
            .entry(key.to_owned())
            .or_insert(WindowCounter { bucket, count: 0 });
        if counter.bucket != bucket {
            *counter = WindowCounter { bucket, count: 0 };
        }
        counter.count += 1;
        counter.count
    }

    fn current(&self, key: &str, bucket: i64) -> u64 {
        self.counters
            .lock()
            .get(key)
            .filter(|counter| counter.bucket == bucket)
            .map_or(0, |counter| counter.count)
    }
}

/// Counter state of one window at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowSnapshot {
    pub granularity: WindowGranularity,
    pub window_start: i64,
    pub count: u64,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    pub marketplace: MarketplaceId,
    pub minute: WindowSnapshot,
    pub hour: WindowSnapshot,
}

/// Minute and hour admission for one seller account on one marketplace.
///
/// Counters are keyed `{marketplace}:{account}:{window}`, so limiters of
/// different accounts can share one [`CounterStore`].
#[derive(Clone)]
pub struct RateLimiter {
    marketplace: MarketplaceId,
    account: String,
    config: RateLimitConfig,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(
        marketplace: MarketplaceId,
        account: impl Into<String>,
        config: RateLimitConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            marketplace,
            account: account.into(),
            config,
            store,
            clock,
        })
    }

    pub const fn config(&self) -> RateLimitConfig {
        self.config
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn key(&self, window: WindowGranularity) -> String {
        format!("{}:{}:{}", self.marketplace, self.account, window)
    }

    /// Counts one call against both windows.
    pub fn admit(&self) -> Result<(), MarketplaceError> {
        let now = self.clock.now_unix();
        let minute = self.store.increment(
            &self.key(WindowGranularity::Minute),
            WindowGranularity::Minute.bucket(now),
        );
        let hour = self.store.increment(
            &self.key(WindowGranularity::Hour),
            WindowGranularity::Hour.bucket(now),
        );

        for (window, count) in [
            (WindowGranularity::Minute, minute),
            (WindowGranularity::Hour, hour),
        ] {
            let limit = self.config.limit(window);
            if count > u64::from(limit) {
                return Err(MarketplaceError::RateLimitExceeded {
                    marketplace: self.marketplace,
                    window,
                    limit,
                });
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        let now = self.clock.now_unix();
        let window = |granularity: WindowGranularity| {
            let bucket = granularity.bucket(now);
            WindowSnapshot {
                granularity,
                window_start: bucket * granularity.seconds(),
                count: self.store.current(&self.key(granularity), bucket),
                limit: self.config.limit(granularity),
            }
        };
        RateLimitSnapshot {
            marketplace: self.marketplace,
            minute: window(WindowGranularity::Minute),
            hour: window(WindowGranularity::Hour),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("marketplace", &self.marketplace)
            .field("account", &self.account)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn limiter(config: RateLimitConfig, clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(
            MarketplaceId::Amazon,
            "A2SELLER",
            config,
            Arc::new(MemoryCounterStore::new()),
            clock,
        )
        .expect("valid limits")
    }

    #[test]
    fn sixty_first_call_in_a_minute_is_rejected() {
        // Start of a minute bucket.
        let clock = Arc::new(ManualClock::at_unix(1_700_000_040));
        let limiter = limiter(RateLimitConfig::new(60, 1_000), clock.clone());

        for _ in 0..60 {
            limiter.admit().expect("within limit");
        }
        let error = limiter.admit().expect_err("61st call");
        assert_eq!(
            error,
            MarketplaceError::RateLimitExceeded {
                marketplace: MarketplaceId::Amazon,
                window: WindowGranularity::Minute,
                limit: 60,
            }
        );

        clock.advance(Duration::from_secs(60));
        limiter.admit().expect("new minute bucket");
    }

    #[test]
    fn hour_limit_applies_across_minutes() {
        let clock = Arc::new(ManualClock::at_unix(1_699_999_200));
        let limiter = limiter(RateLimitConfig::new(10, 15), clock.clone());

        for _ in 0..10 {
            limiter.admit().expect("first minute");
        }
        clock.advance(Duration::from_secs(60));
        for _ in 0..5 {
            limiter.admit().expect("second minute");
        }
        let error = limiter.admit().expect_err("hour exhausted");
        assert!(matches!(
            error,
            MarketplaceError::RateLimitExceeded {
                window: WindowGranularity::Hour,
                limit: 15,
                ..
            }
        ));
    }

    #[test]
    fn snapshot_reports_current_buckets() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let limiter = limiter(RateLimitConfig::default(), clock);
        limiter.admit().expect("admit");
        limiter.admit().expect("admit");

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.minute.count, 2);
        assert_eq!(snapshot.minute.window_start, 1_699_999_980);
        assert_eq!(snapshot.hour.count, 2);
        assert_eq!(snapshot.hour.limit, 1_000);
    }

    #[test]
    fn accounts_sharing_a_store_count_separately() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_unix(1_700_000_040));
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let account = |id: &str| {
            RateLimiter::new(
                MarketplaceId::Trendyol,
                id,
                RateLimitConfig::new(1, 10),
                Arc::clone(&store),
                Arc::clone(&clock),
            )
            .expect("valid limits")
        };
        let first = account("12345");
        let second = account("99999");

        first.admit().expect("first account");
        second.admit().expect("second account has its own window");
        assert!(first.admit().is_err());
        assert_eq!(store.current("trendyol:12345:minute", 28_333_334), 2);
        assert_eq!(second.snapshot().minute.count, 1);
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert_eq!(
            RateLimitConfig::new(0, 10).validate(),
            Err(ValidationError::ZeroRateLimit {
                window: WindowGranularity::Minute
            })
        );
    }

    #[test]
    fn marketplace_defaults() {
        assert_eq!(
            RateLimitConfig::for_marketplace(MarketplaceId::Trendyol),
            RateLimitConfig::new(100, 1_000)
        );
        assert_eq!(
            RateLimitConfig::for_marketplace(MarketplaceId::Ebay).per_hour,
            5_000
        );
    }
}
