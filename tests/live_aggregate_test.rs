//! End-to-end tests for live queries over unflushed buckets.

mod common;

use common::{Harness, TestTransactionBuilder, MINUTE};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use tally_lib::aggregate::{FlushTask, LIMIT_EXCEEDED_BUCKET};
use tally_lib::core::ProfileNode;

const MS: u64 = 1_000_000;

#[test]
fn test_web_interval_summaries() {
    let harness = Harness::new(500);
    harness.add(&test_transaction!("GET /a", 10), 1_000);
    harness.add(&test_transaction!("GET /b", 20), 2_000);
    harness.add(&test_transaction!("GET /a", 30), 3_000);

    let overall = harness
        .repository
        .get_live_overall_summary("web", 0, MINUTE)
        .unwrap()
        .unwrap();
    assert_eq!(overall.initial_capture_time(), MINUTE);
    assert_eq!(overall.items().len(), 1);
    assert_eq!(overall.items()[0].transaction_count, 3);
    assert_eq!(overall.items()[0].total_duration_nanos, 60 * MS);

    let summaries = harness
        .repository
        .get_live_transaction_summaries("web", 0, MINUTE)
        .unwrap()
        .unwrap();
    let by_name: HashMap<_, _> = summaries.items()[0]
        .iter()
        .map(|s| (s.transaction_name.as_str(), (s.total_duration_nanos, s.transaction_count)))
        .collect();
    assert_eq!(by_name.len(), 2);
    assert_eq!(by_name["GET /a"], (40 * MS, 2));
    assert_eq!(by_name["GET /b"], (20 * MS, 1));
}

#[test]
fn test_error_summaries_and_points() {
    let harness = Harness::new(500);
    harness.add(&test_transaction!("GET /a", 10, error), 1_000);
    harness.add(&test_transaction!("GET /a", 10), 2_000);
    harness.add(&test_transaction!("GET /b", 10), 61_000);

    let overall = harness
        .repository
        .get_live_overall_error_summary("web", 0, 2 * MINUTE)
        .unwrap()
        .unwrap();
    let errors: Vec<_> = overall
        .items()
        .iter()
        .map(|s| (s.error_count, s.transaction_count))
        .collect();
    assert_eq!(errors, vec![(1, 2), (0, 1)]);

    let per_name = harness
        .repository
        .get_live_transaction_error_summaries("web", 0, MINUTE)
        .unwrap()
        .unwrap();
    assert_eq!(per_name.items()[0].len(), 1);
    assert_eq!(per_name.items()[0][0].transaction_name, "GET /a");
    assert_eq!(per_name.items()[0][0].error_count, 1);

    let points = harness
        .repository
        .get_live_error_points("web", Some("GET /a"), 0, 2 * MINUTE, 90_000)
        .unwrap()
        .unwrap();
    // "GET /a" only has data in the first bucket.
    assert_eq!(points.items().len(), 1);
    assert_eq!(points.items()[0].capture_time, MINUTE);
    assert_eq!(points.initial_capture_time(), MINUTE);
}

#[test]
fn test_live_capture_time_is_clamped_per_bucket() {
    let harness = Harness::new(500);
    harness.add(&test_transaction!("GET /a", 10), 1_000);
    harness.add(&test_transaction!("GET /a", 10), 61_000);

    let overview = harness
        .repository
        .get_live_overview_aggregates("web", None, 0, 2 * MINUTE, 90_000)
        .unwrap()
        .unwrap();
    let captures: Vec<_> = overview.items().iter().map(|a| a.capture_time).collect();
    assert_eq!(captures, vec![MINUTE, 90_000]);
    assert_eq!(overview.items()[0].root_timers.len(), 1);
    assert_eq!(overview.items()[0].root_timers[0].name, "http request");
}

#[test]
fn test_percentiles() {
    let harness = Harness::new(500);
    for duration in 1..=100 {
        harness.add(&test_transaction!("GET /a", duration), 1_000);
    }

    let result = harness
        .repository
        .get_live_percentile_aggregates("web", Some("GET /a"), 0, MINUTE, MINUTE)
        .unwrap()
        .unwrap();
    let aggregate = &result.items()[0];
    assert_eq!(aggregate.transaction_count, 100);
    let percentiles = aggregate.percentiles.unwrap();
    assert_eq!(percentiles.max_nanos, 100 * MS);
    assert!(percentiles.p50_nanos >= 45 * MS && percentiles.p50_nanos <= 55 * MS);
    assert!(percentiles.p50_nanos <= percentiles.p95_nanos);
    assert!(percentiles.p95_nanos <= percentiles.p99_nanos);
}

#[test]
fn test_queries_and_profiles() {
    let harness = Harness::new(500);
    let checkout = TestTransactionBuilder::new("POST /checkout")
        .query("sql", "select * from carts", 5)
        .query("sql", "update orders", 9)
        .profile(ProfileNode::new("main", 3).child(ProfileNode::new("handle", 3)))
        .build();
    harness.add(&checkout, 1_000);
    harness.add(&checkout, 2_000);

    let queries = harness
        .repository
        .get_live_queries("web", Some("POST /checkout"), 0, MINUTE)
        .unwrap()
        .unwrap();
    let sql = &queries.items()[0]["sql"];
    assert_eq!(sql.len(), 2);
    assert_eq!(sql[0].query_text, "update orders");
    assert_eq!(sql[0].execution_count, 2);
    assert!(sql.iter().all(|q| q.query_text != LIMIT_EXCEEDED_BUCKET));

    let profile = harness
        .repository
        .get_live_profile("web", None, 0, MINUTE)
        .unwrap()
        .unwrap();
    assert_eq!(profile.items()[0].frame, "main");
    assert_eq!(profile.items()[0].sample_count, 6);
}

#[test]
fn test_range_boundaries() {
    let harness = Harness::new(500);
    harness.add(&test_transaction!("GET /a", 10), 1_000);

    // The bucket's capture time is 60000: excluded as `from`, included as `to`.
    assert!(harness
        .repository
        .get_live_overall_summary("web", MINUTE, 2 * MINUTE)
        .unwrap()
        .is_none());
    assert!(harness
        .repository
        .get_live_overall_summary("web", MINUTE - 1, MINUTE)
        .unwrap()
        .is_some());
    assert!(harness
        .repository
        .get_live_overall_summary("web", 0, MINUTE - 1)
        .unwrap()
        .is_none());
}

#[test]
fn test_absence_is_repeatable() {
    let harness = Harness::new(500);
    harness.add(&test_transaction!("GET /a", 10), 1_000);

    for _ in 0..3 {
        assert!(harness
            .repository
            .get_live_overall_summary("batch", 0, MINUTE)
            .unwrap()
            .is_none());
        assert!(harness
            .repository
            .get_live_queries("web", Some("GET /missing"), 0, MINUTE)
            .unwrap()
            .is_none());
    }
}

#[test]
fn test_clear_all_resets_live_queries() {
    let harness = Harness::new(500);
    harness.add(&test_transaction!("GET /a", 10), 1_000);
    assert!(harness
        .repository
        .get_live_overall_summary("web", 0, MINUTE)
        .unwrap()
        .is_some());

    harness.repository.clear_all();

    assert!(harness
        .repository
        .get_live_overall_summary("web", 0, MINUTE)
        .unwrap()
        .is_none());
    assert!(harness
        .repository
        .get_live_transaction_summaries("web", 0, MINUTE)
        .unwrap()
        .is_none());
    assert!(harness.sink.is_empty());
}

#[test]
fn test_flushed_buckets_leave_live_view() {
    let harness = Harness::new(500);
    harness.add(&test_transaction!("GET /a", 10), 1_000);
    harness.add(&test_transaction!("GET /a", 20), 61_000);

    assert_eq!(harness.aggregator.flush_completed(MINUTE + 1).unwrap(), 1);

    let intervals = harness.sink.intervals();
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].capture_time, MINUTE);
    assert_eq!(intervals[0].overall_aggregates["web"].transaction_count, 1);
    assert_eq!(
        intervals[0].transaction_aggregates["web"]["GET /a"].total_duration_nanos,
        10 * MS
    );

    let live = harness
        .repository
        .get_live_overall_summary("web", 0, 2 * MINUTE)
        .unwrap()
        .unwrap();
    assert_eq!(live.initial_capture_time(), 2 * MINUTE);
    assert_eq!(live.items()[0].total_duration_nanos, 20 * MS);
}

#[tokio::test]
async fn test_flush_task_drains_on_shutdown() {
    let harness = Harness::new(500);
    let task = FlushTask::spawn(std::sync::Arc::clone(&harness.aggregator));
    harness.add(&test_transaction!("GET /a", 10), 1_000);
    harness.add(&test_transaction!("GET /a", 10), 61_000);

    // Both buckets are long past, so ticks or the final drain flush them.
    task.shutdown().await.unwrap();

    assert_eq!(harness.sink.len(), 2);
    assert_eq!(harness.aggregator.bucket_count(), 0);
}
