//! Retry executor with exponential backoff.
//!
//! Transport failures and 5xx answers are retried; 4xx answers are returned
//! immediately. Backoff sleeps observe the caller's cancellation token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::logging::{ApiCallLogger, ApiCallRecord};
use crate::transport::{ApiResult, HttpRequest, Transport};
use crate::{MarketplaceError, MarketplaceId, ValidationError};

/// Wait between attempts: `base * factor^n` after failed attempt `n`,
/// capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
    /// Scales each delay by a random factor in `[0.5, 1.5]`.
    pub jitter: bool,
}

impl Default for Backoff {
    /// 2s after the first failure, 4s after the second.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl Backoff {
    /// The same `delay` after every failure.
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            factor: 1.0,
            max: delay,
            jitter: false,
        }
    }

    pub fn delay(self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let seconds = (self.base.as_secs_f64() * self.factor.powi(exponent))
            .min(self.max.as_secs_f64());
        let seconds = if self.jitter {
            seconds * (0.5 + fastrand::f64())
        } else {
            seconds
        };
        Duration::try_from_secs_f64(seconds).unwrap_or(self.max)
    }
}

/// Configuration for the retry executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// The backoff strategy to use between attempts.
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::fixed(delay),
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::ZeroAttempts);
        }
        Ok(())
    }

    /// Only server-side failures are worth repeating.
    pub const fn should_retry_status(&self, status: u16) -> bool {
        status >= 500
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// Sleeps for `duration` unless `cancel` fires first.
pub async fn cancellable_sleep(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), MarketplaceError> {
    if duration.is_zero() {
        return if cancel.is_cancelled() {
            Err(MarketplaceError::Cancelled)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(MarketplaceError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Runs a request through the transport with bounded, logged attempts.
#[derive(Clone)]
pub struct RetryExecutor {
    marketplace: MarketplaceId,
    transport: Transport,
    config: RetryConfig,
    logger: Arc<dyn ApiCallLogger>,
}

impl RetryExecutor {
    pub fn new(
        marketplace: MarketplaceId,
        transport: Transport,
        config: RetryConfig,
        logger: Arc<dyn ApiCallLogger>,
    ) -> Self {
        Self {
            marketplace,
            transport,
            config,
            logger,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Executes `request`, retrying transport errors and 5xx answers.
    ///
    /// Returns the last 5xx [`ApiResult`] when attempts run out on server
    /// errors, or the last transport error wrapped in
    /// [`MarketplaceError::Transport`].
    pub async fn execute(
        &self,
        request: HttpRequest,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<ApiResult, MarketplaceError> {
        let request_id = Uuid::new_v4();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(MarketplaceError::Cancelled);
            }

            let started = Instant::now();
            let outcome = self.transport.execute(request.clone()).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            self.logger.log_api_call(&ApiCallRecord {
                request_id,
                marketplace: self.marketplace,
                endpoint: endpoint.to_owned(),
                method: request.method,
                status: outcome.as_ref().ok().map(|result| result.http_status),
                duration_ms,
                attempt,
                error: match &outcome {
                    Ok(result) => result.error.clone(),
                    Err(error) => Some(error.to_string()),
                },
            });

            let retryable = match &outcome {
                Ok(result) => self.config.should_retry_status(result.http_status),
                Err(error) => error.retryable(),
            };

            if !retryable || attempt >= max_attempts {
                return outcome.map_err(|source| MarketplaceError::Transport {
                    marketplace: self.marketplace,
                    endpoint: endpoint.to_owned(),
                    source,
                });
            }

            cancellable_sleep(self.config.delay_for_attempt(attempt), cancel).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HttpClient, HttpResponse, TransportError};
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, VecDeque};
    use std::future::Future;
    use std::pin::Pin;

    use crate::logging::LogLevel;

    struct ScriptedHttpClient {
        script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        calls: Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedHttpClient {
        fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<tokio::time::Instant> {
            self.calls.lock().clone()
        }
    }

    impl HttpClient for ScriptedHttpClient {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>
        {
            self.calls.lock().push(tokio::time::Instant::now());
            let next = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::connect("script exhausted")));
            Box::pin(async move { next })
        }
    }

    #[derive(Default)]
    struct CountingLogger {
        attempts: Mutex<Vec<u32>>,
    }

    impl ApiCallLogger for CountingLogger {
        fn log_api_call(&self, record: &ApiCallRecord) {
            self.attempts.lock().push(record.attempt);
        }

        fn log(&self, _: MarketplaceId, _: LogLevel, _: &str, _: &BTreeMap<String, String>) {}
    }

    fn executor(client: Arc<ScriptedHttpClient>, config: RetryConfig) -> (RetryExecutor, Arc<CountingLogger>) {
        let logger = Arc::new(CountingLogger::default());
        let executor = RetryExecutor::new(
            MarketplaceId::Trendyol,
            Transport::new(client),
            config,
            logger.clone(),
        );
        (executor, logger)
    }

    #[test]
    fn default_backoff_doubles_from_two_seconds() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let backoff = Backoff {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
            ..Backoff::default()
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(500));
    }

    #[test]
    fn jittered_backoff_stays_within_half_either_side() {
        let backoff = Backoff {
            base: Duration::from_millis(100),
            max: Duration::from_secs(10),
            jitter: true,
            ..Backoff::default()
        };
        for _ in 0..20 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_millis(100), "{delay:?}");
            assert!(delay <= Duration::from_millis(300), "{delay:?}");
        }
    }

    #[test]
    fn fixed_and_no_retry_configs() {
        let fixed = RetryConfig::fixed(Duration::from_millis(500), 2);
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(fixed.delay_for_attempt(5), Duration::from_millis(500));
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
        assert_eq!(
            RetryConfig::exponential(0).validate(),
            Err(ValidationError::ZeroAttempts)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_retried_with_exponential_delays() {
        let client = ScriptedHttpClient::new(vec![
            Err(TransportError::timeout("t1")),
            Err(TransportError::timeout("t2")),
            Err(TransportError::timeout("t3")),
        ]);
        let (executor, logger) = executor(client.clone(), RetryConfig::default());

        let error = executor
            .execute(
                HttpRequest::get("https://api.test/orders"),
                "/orders",
                &CancellationToken::new(),
            )
            .await
            .expect_err("all attempts fail");

        assert!(matches!(
            error,
            MarketplaceError::Transport { ref source, .. } if source.message() == "t3"
        ));
        let calls = client.call_times();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(2));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(4));
        assert_eq!(*logger.attempts.lock(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_returned_without_retry() {
        let client = ScriptedHttpClient::new(vec![Ok(HttpResponse::new(
            400,
            r#"{"message":"bad barcode"}"#,
        ))]);
        let (executor, _) = executor(client.clone(), RetryConfig::default());

        let result = executor
            .execute(
                HttpRequest::get("https://api.test/products"),
                "/products",
                &CancellationToken::new(),
            )
            .await
            .expect("4xx is an ApiResult");

        assert!(!result.success);
        assert_eq!(result.http_status, 400);
        assert_eq!(client.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_then_success_returns_success() {
        let client = ScriptedHttpClient::new(vec![
            Ok(HttpResponse::new(503, "unavailable")),
            Ok(HttpResponse::ok_json(r#"{"ok":true}"#)),
        ]);
        let (executor, _) = executor(client.clone(), RetryConfig::default());

        let result = executor
            .execute(
                HttpRequest::get("https://api.test/orders"),
                "/orders",
                &CancellationToken::new(),
            )
            .await
            .expect("second attempt succeeds");

        assert!(result.success);
        assert_eq!(client.call_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_server_errors_return_last_result() {
        let client = ScriptedHttpClient::new(vec![
            Ok(HttpResponse::new(500, "a")),
            Ok(HttpResponse::new(502, "b")),
        ]);
        let (executor, _) = executor(client, RetryConfig::exponential(2));

        let result = executor
            .execute(
                HttpRequest::get("https://api.test/orders"),
                "/orders",
                &CancellationToken::new(),
            )
            .await
            .expect("5xx surfaces as a result");

        assert_eq!(result.http_status, 502);
        assert_eq!(result.raw_body, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let client = ScriptedHttpClient::new(vec![Err(TransportError::connect("down"))]);
        let (executor, _) = executor(client.clone(), RetryConfig::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let error = executor
            .execute(HttpRequest::get("https://api.test/orders"), "/orders", &cancel)
            .await
            .expect_err("cancelled during backoff");

        assert_eq!(error, MarketplaceError::Cancelled);
        assert_eq!(client.call_times().len(), 1);
    }
}
