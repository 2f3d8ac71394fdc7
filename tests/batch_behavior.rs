//! Behavior-driven tests for chunked batch execution
//!
//! A batch run drives a real adapter through the batch coordinator and must
//! keep going past a failed chunk, keep chunk order, pace chunks and stop
//! cleanly on cancellation.

use std::sync::Arc;
use std::time::Duration;

use pazarsync_core::{
    build_adapter, BatchCoordinator, BatchJob, BatchSummary, ErrorKind, MarketplaceAdapter,
    MarketplaceError, ValidationError,
};
use pazarsync_tests::*;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn products(count: usize) -> Vec<Value> {
    (0..count)
        .map(|index| json!({"barcode": format!("BC-{index:04}"), "quantity": index}))
        .collect()
}

fn items_in(request: &HttpRequest) -> usize {
    request
        .body
        .as_deref()
        .and_then(|body| serde_json::from_str::<Value>(body).ok())
        .and_then(|body| body["items"].as_array().map(Vec::len))
        .unwrap_or_default()
}

fn trendyol(http: &Arc<FakeHttpClient>) -> Arc<dyn MarketplaceAdapter> {
    build_adapter(&trendyol_credentials(), &context(Arc::clone(http), manual_clock()))
        .expect("adapter")
}

// =============================================================================
// Batch Coordinator: Failure Isolation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_middle_chunk_fails_the_others_still_run() {
    // Given: 130 products, chunks of 50 and a server rejecting the second call
    let http = FakeHttpClient::scripted(vec![
        Ok(HttpResponse::ok_json(r#"{"batchRequestId":"b-1"}"#)),
        Ok(HttpResponse::new(400, r#"{"errors":[{"message":"duplicate barcode"}]}"#)),
        Ok(HttpResponse::ok_json(r#"{"batchRequestId":"b-3"}"#)),
    ]);
    let adapter = trendyol(&http);
    let coordinator = BatchCoordinator::default();

    // When: The products are pushed in chunks
    let results = coordinator
        .run_batches(
            products(130),
            50,
            |chunk| {
                let adapter = Arc::clone(&adapter);
                async move { adapter.create_or_update_products(chunk).await }
            },
            &CancellationToken::new(),
        )
        .await
        .expect("valid chunk size");

    // Then: Three results in order, only the second failed
    let outcomes: Vec<bool> = results.iter().map(|result| result.success).collect();
    assert_eq!(outcomes, vec![true, false, true]);
    let counts: Vec<usize> = results.iter().map(|result| result.item_count).collect();
    assert_eq!(counts, vec![50, 50, 30]);
    let indexes: Vec<usize> = results.iter().map(|result| result.index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);

    let error = results[1].error.as_ref().expect("failed chunk keeps its error");
    assert_eq!(error.status(), Some(400));
    assert!(error.to_string().contains("duplicate barcode"));
    assert_eq!(
        results[2].output.as_ref().and_then(|ack| ack.reference.as_deref()),
        Some("b-3")
    );

    let sent: Vec<usize> = http
        .requests()
        .iter()
        .map(|recorded| items_in(&recorded.request))
        .collect();
    assert_eq!(sent, vec![50, 50, 30]);

    let summary = BatchSummary::of(&results);
    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_items, 50);
    assert!(!summary.all_succeeded());
}

#[tokio::test(start_paused = true)]
async fn when_chunks_run_they_are_paced_apart() {
    // Given: A coordinator pacing chunks by 250ms
    let http = FakeHttpClient::always(200, r#"{"batchRequestId":"b"}"#);
    let adapter = trendyol(&http);
    let coordinator = BatchCoordinator::new(Duration::from_millis(250));

    // When: Four chunks run
    let results = coordinator
        .run_batches(
            products(8),
            2,
            |chunk| {
                let adapter = Arc::clone(&adapter);
                async move { adapter.create_or_update_products(chunk).await }
            },
            &CancellationToken::new(),
        )
        .await
        .expect("valid chunk size");

    // Then: Each call starts one pacing interval after the previous one
    assert_eq!(results.len(), 4);
    let requests = http.requests();
    for pair in requests.windows(2) {
        assert_eq!(pair[1].at - pair[0].at, Duration::from_millis(250));
    }
}

#[tokio::test]
async fn when_job_is_run_every_item_lands_in_exactly_one_chunk() {
    // Given: A prepared job of 101 barcodes in chunks of 25
    let job = BatchJob::new("push-products", products(101), 25);
    assert_eq!(job.chunk_count(), 5);
    let coordinator = BatchCoordinator::new(Duration::ZERO);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

    // When: The job runs
    let results = coordinator
        .run_job(
            job,
            |chunk: Vec<Value>| {
                let seen = Arc::clone(&seen);
                async move {
                    let mut seen = seen.lock();
                    seen.extend(chunk.iter().map(|item| item["barcode"].clone()));
                    Ok::<usize, MarketplaceError>(chunk.len())
                }
            },
            &CancellationToken::new(),
        )
        .await
        .expect("valid job");

    // Then: Items are covered once each, in order
    assert_eq!(results.len(), 5);
    assert_eq!(results[4].output, Some(1));
    let seen = seen.lock();
    assert_eq!(seen.len(), 101);
    assert_eq!(seen[0], json!("BC-0000"));
    assert_eq!(seen[100], json!("BC-0100"));
}

// =============================================================================
// Batch Coordinator: Edge Cases
// =============================================================================

#[tokio::test]
async fn when_chunk_size_is_zero_the_run_is_rejected() {
    let coordinator = BatchCoordinator::default();
    let calls = Arc::new(parking_lot::Mutex::new(0_usize));

    let result = coordinator
        .run_batches(
            products(3),
            0,
            |_chunk| {
                let calls = Arc::clone(&calls);
                async move {
                    *calls.lock() += 1;
                    Ok::<(), MarketplaceError>(())
                }
            },
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.map(|results| results.len()), Err(ValidationError::ZeroChunkSize));
    assert_eq!(*calls.lock(), 0);
}

#[tokio::test]
async fn when_there_are_no_items_no_chunk_runs() {
    let http = FakeHttpClient::always(200, "{}");
    let adapter = trendyol(&http);

    let results = BatchCoordinator::default()
        .run_batches(
            Vec::new(),
            50,
            |chunk| {
                let adapter = Arc::clone(&adapter);
                async move { adapter.create_or_update_products(chunk).await }
            },
            &CancellationToken::new(),
        )
        .await
        .expect("valid chunk size");

    assert!(results.is_empty());
    assert_eq!(http.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn when_cancelled_between_chunks_the_rest_are_reported_cancelled() {
    // Given: A run that is cancelled while the first chunk is in flight
    let http = FakeHttpClient::always(200, r#"{"batchRequestId":"b"}"#);
    let adapter = trendyol(&http);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    // When: Three chunks are scheduled
    let results = BatchCoordinator::default()
        .run_batches(
            products(6),
            2,
            |chunk| {
                let adapter = Arc::clone(&adapter);
                let trigger = trigger.clone();
                async move {
                    let ack = adapter.create_or_update_products(chunk).await;
                    trigger.cancel();
                    ack
                }
            },
            &cancel,
        )
        .await
        .expect("valid chunk size");

    // Then: The first chunk completed and the others never reached the server
    assert_eq!(http.request_count(), 1);
    assert_eq!(results.len(), 3);
    assert!(results[0].success);
    for result in &results[1..] {
        assert!(!result.success);
        assert_eq!(
            result.error.as_ref().map(MarketplaceError::kind),
            Some(ErrorKind::Cancelled)
        );
    }
}

#[tokio::test]
async fn when_results_are_serialized_errors_are_messages() {
    let http = FakeHttpClient::always(500, r#"{"message":"internal"}"#);
    let adapter = trendyol(&http);

    let results = BatchCoordinator::new(Duration::ZERO)
        .run_batches(
            products(1),
            10,
            |chunk| {
                let adapter = Arc::clone(&adapter);
                async move { adapter.create_or_update_products(chunk).await }
            },
            &CancellationToken::new(),
        )
        .await
        .expect("valid chunk size");

    let value = serde_json::to_value(&results).expect("serializable");
    assert_eq!(value[0]["success"], json!(false));
    assert_eq!(value[0]["item_count"], json!(1));
    assert!(value[0]["error"]
        .as_str()
        .is_some_and(|message| message.contains("HTTP 500") && message.contains("internal")));
    assert!(value[0].get("output").is_none());
}
