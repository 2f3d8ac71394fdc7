//! Chunked batch execution with per-chunk failure isolation.
//!
//! Items are split into ordered chunks that run one after another with a
//! fixed pause in between. A failed chunk is recorded and the run moves on;
//! the result list always has exactly one entry per chunk, in chunk order.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::retry::cancellable_sleep;
use crate::{MarketplaceError, ValidationError};

pub const DEFAULT_CHUNK_SIZE: usize = 50;
pub const DEFAULT_PACING: Duration = Duration::from_millis(250);

/// Items to process, how many go into one call and a label for logs.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob<T> {
    pub items: Vec<T>,
    pub chunk_size: usize,
    pub operation: String,
}

impl<T> BatchJob<T> {
    pub fn new(operation: impl Into<String>, items: Vec<T>, chunk_size: usize) -> Self {
        Self {
            items,
            chunk_size,
            operation: operation.into(),
        }
    }

    /// Number of chunks the job splits into.
    pub fn chunk_count(&self) -> usize {
        if self.chunk_size == 0 {
            0
        } else {
            self.items.len().div_ceil(self.chunk_size)
        }
    }
}

/// Outcome of one chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult<R> {
    pub index: usize,
    pub success: bool,
    #[serde(
        serialize_with = "serialize_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<MarketplaceError>,
    pub item_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<R>,
    pub duration_ms: u64,
}

fn serialize_error<S: Serializer>(
    error: &Option<MarketplaceError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_str(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Summary counts over a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub chunks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items: usize,
    pub failed_items: usize,
}

impl BatchSummary {
    pub fn of<R>(results: &[BatchResult<R>]) -> Self {
        let mut summary = Self {
            chunks: results.len(),
            succeeded: 0,
            failed: 0,
            items: 0,
            failed_items: 0,
        };
        for result in results {
            summary.items += result.item_count;
            if result.success {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
                summary.failed_items += result.item_count;
            }
        }
        summary
    }

    pub const fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchCoordinator {
    pacing: Duration,
}

impl Default for BatchCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_PACING)
    }
}

impl BatchCoordinator {
    pub const fn new(pacing: Duration) -> Self {
        Self { pacing }
    }

    pub const fn pacing(&self) -> Duration {
        self.pacing
    }

    /// Runs `operation` over `ceil(len / chunk_size)` ordered chunks.
    ///
    /// Once `cancel` fires, the chunk in flight finishes (or is abandoned
    /// during pacing) and every remaining chunk is reported as cancelled.
    pub async fn run_batches<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        chunk_size: usize,
        mut operation: F,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchResult<R>>, ValidationError>
    where
        T: Clone,
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<R, MarketplaceError>>,
    {
        if chunk_size == 0 {
            return Err(ValidationError::ZeroChunkSize);
        }

        let chunks: Vec<Vec<T>> = items.chunks(chunk_size).map(<[T]>::to_vec).collect();
        let total = chunks.len();
        let mut results = Vec::with_capacity(total);
        let mut cancelled = cancel.is_cancelled();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let item_count = chunk.len();

            if !cancelled && index > 0 && !self.pacing.is_zero() {
                cancelled = cancellable_sleep(self.pacing, cancel).await.is_err();
            }
            if cancelled || cancel.is_cancelled() {
                cancelled = true;
                results.push(BatchResult {
                    index,
                    success: false,
                    error: Some(MarketplaceError::Cancelled),
                    item_count,
                    output: None,
                    duration_ms: 0,
                });
                continue;
            }

            let started = Instant::now();
            let outcome = operation(chunk).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            match outcome {
                Ok(output) => {
                    debug!(chunk = index + 1, total, item_count, duration_ms, "batch chunk succeeded");
                    results.push(BatchResult {
                        index,
                        success: true,
                        error: None,
                        item_count,
                        output: Some(output),
                        duration_ms,
                    });
                }
                Err(error) => {
                    warn!(chunk = index + 1, total, item_count, error = %error, "batch chunk failed");
                    results.push(BatchResult {
                        index,
                        success: false,
                        error: Some(error),
                        item_count,
                        output: None,
                        duration_ms,
                    });
                }
            }
        }

        Ok(results)
    }

    /// Runs a prepared [`BatchJob`].
    pub async fn run_job<T, R, F, Fut>(
        &self,
        job: BatchJob<T>,
        operation: F,
        cancel: &CancellationToken,
    ) -> Result<Vec<BatchResult<R>>, ValidationError>
    where
        T: Clone,
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<R, MarketplaceError>>,
    {
        debug!(
            operation = %job.operation,
            items = job.items.len(),
            chunk_size = job.chunk_size,
            "starting batch job"
        );
        self.run_batches(job.items, job.chunk_size, operation, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MarketplaceId;

    fn api_error() -> MarketplaceError {
        MarketplaceError::Api {
            marketplace: MarketplaceId::Trendyol,
            endpoint: String::from("products"),
            status: 400,
            message: String::from("invalid barcode"),
        }
    }

    #[tokio::test]
    async fn splits_into_ceil_chunks_in_order() {
        let coordinator = BatchCoordinator::new(Duration::ZERO);
        let items: Vec<u32> = (0..130).collect();

        let results = coordinator
            .run_batches(
                items,
                50,
                |chunk| async move { Ok::<_, MarketplaceError>(chunk[0]) },
                &CancellationToken::new(),
            )
            .await
            .expect("valid chunk size");

        let counts: Vec<usize> = results.iter().map(|r| r.item_count).collect();
        assert_eq!(counts, vec![50, 50, 30]);
        let firsts: Vec<Option<u32>> = results.iter().map(|r| r.output).collect();
        assert_eq!(firsts, vec![Some(0), Some(50), Some(100)]);
    }

    #[tokio::test]
    async fn failed_chunk_does_not_stop_the_run() {
        let coordinator = BatchCoordinator::new(Duration::ZERO);
        let mut call = 0;

        let results = coordinator
            .run_batches(
                (0..130).collect::<Vec<u32>>(),
                50,
                |_chunk| {
                    call += 1;
                    let current = call;
                    async move {
                        if current == 2 {
                            Err(api_error())
                        } else {
                            Ok(())
                        }
                    }
                },
                &CancellationToken::new(),
            )
            .await
            .expect("valid chunk size");

        let flags: Vec<bool> = results.iter().map(|r| r.success).collect();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(results[1].error, Some(api_error()));

        let summary = BatchSummary::of(&results);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failed_items, 50);
        assert!(!summary.all_succeeded());
    }

    #[tokio::test]
    async fn zero_chunk_size_is_rejected() {
        let error = BatchCoordinator::default()
            .run_batches(
                vec![1, 2, 3],
                0,
                |_chunk| async { Ok::<_, MarketplaceError>(()) },
                &CancellationToken::new(),
            )
            .await
            .expect_err("zero chunk size");
        assert_eq!(error, ValidationError::ZeroChunkSize);
    }

    #[tokio::test]
    async fn empty_input_yields_no_chunks() {
        let results = BatchCoordinator::default()
            .run_batches(
                Vec::<u8>::new(),
                10,
                |_chunk| async { Ok::<_, MarketplaceError>(()) },
                &CancellationToken::new(),
            )
            .await
            .expect("valid");
        assert!(results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_separates_chunks() {
        let coordinator = BatchCoordinator::new(Duration::from_millis(500));
        let started = tokio::time::Instant::now();
        let mut offsets = Vec::new();

        coordinator
            .run_batches(
                vec![1, 2, 3],
                1,
                |_chunk| {
                    offsets.push(started.elapsed());
                    async { Ok::<_, MarketplaceError>(()) }
                },
                &CancellationToken::new(),
            )
            .await
            .expect("valid");

        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_millis(1000)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_marks_remaining_chunks() {
        let coordinator = BatchCoordinator::new(Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let results = coordinator
            .run_batches(
                vec![1, 2, 3],
                1,
                |_chunk| async { Ok::<_, MarketplaceError>(()) },
                &cancel,
            )
            .await
            .expect("valid");

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert_eq!(results[1].error, Some(MarketplaceError::Cancelled));
        assert_eq!(results[2].error, Some(MarketplaceError::Cancelled));
    }

    #[test]
    fn failed_chunks_serialize_error_text() {
        let result: BatchResult<()> = BatchResult {
            index: 1,
            success: false,
            error: Some(api_error()),
            item_count: 50,
            output: None,
            duration_ms: 3,
        };
        let value = serde_json::to_value(&result).expect("serializable");
        assert_eq!(
            value["error"],
            serde_json::json!("trendyol products: HTTP 400: invalid barcode")
        );
        assert!(value.get("output").is_none());
    }
}
