//! Live queries over buckets that have not been flushed yet.
//!
//! Every query has the same shape: fetch the buckets whose capture time falls
//! in `(from, to]`, extract one item per bucket, drop the buckets that had
//! nothing, and report the rest together with the capture time of the first
//! bucket in range. That shape lives in [`LiveAggregateRepository::map`]; the
//! public entry points only choose the per-bucket accessor.

use crate::aggregate::{AggregateIntervalCollector, BucketSupplier};
use crate::core::{
    EpochMillis, ErrorPoint, OverallErrorSummary, OverallSummary, OverviewAggregate,
    PercentileAggregate, ProfileNode, QueryMap, Result, TransactionErrorSummary,
    TransactionSummary,
};
use std::sync::Arc;

/// Items gathered from the live buckets of one query
#[derive(Debug, Clone, PartialEq)]
pub struct LiveResult<T> {
    items: Vec<T>,
    initial_capture_time: EpochMillis,
}

impl<T> LiveResult<T> {
    /// One item per contributing bucket, oldest first
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Capture time of the first bucket in the queried range, whether or not
    /// it contributed an item
    pub fn initial_capture_time(&self) -> EpochMillis {
        self.initial_capture_time
    }

    /// Consume the result, keeping only the items
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

/// Read facade over the live buckets.
///
/// `from` is exclusive and `to` inclusive throughout.
pub struct LiveAggregateRepository<S> {
    supplier: Arc<S>,
}

impl<S: BucketSupplier> LiveAggregateRepository<S> {
    /// Create a repository reading from `supplier`
    pub fn new(supplier: Arc<S>) -> Self {
        Self { supplier }
    }

    /// Type-level summary per bucket
    pub fn get_live_overall_summary(
        &self,
        transaction_type: &str,
        from: EpochMillis,
        to: EpochMillis,
    ) -> Result<Option<LiveResult<OverallSummary>>> {
        self.map(from, to, |bucket| Ok(bucket.get_live_overall_summary(transaction_type)))
    }

    /// Per-name summaries per bucket
    pub fn get_live_transaction_summaries(
        &self,
        transaction_type: &str,
        from: EpochMillis,
        to: EpochMillis,
    ) -> Result<Option<LiveResult<Vec<TransactionSummary>>>> {
        self.map(from, to, |bucket| {
            Ok(bucket.get_live_transaction_summaries(transaction_type))
        })
    }

    /// Type-level error summary per bucket
    pub fn get_live_overall_error_summary(
        &self,
        transaction_type: &str,
        from: EpochMillis,
        to: EpochMillis,
    ) -> Result<Option<LiveResult<OverallErrorSummary>>> {
        self.map(from, to, |bucket| {
            Ok(bucket.get_live_overall_error_summary(transaction_type))
        })
    }

    /// Per-name error summaries per bucket
    pub fn get_live_transaction_error_summaries(
        &self,
        transaction_type: &str,
        from: EpochMillis,
        to: EpochMillis,
    ) -> Result<Option<LiveResult<Vec<TransactionErrorSummary>>>> {
        self.map(from, to, |bucket| {
            Ok(bucket.get_live_transaction_error_summaries(transaction_type))
        })
    }

    /// Overview aggregates; each bucket's snapshot is stamped with
    /// `min(live_capture_time, bucket capture time)`
    pub fn get_live_overview_aggregates(
        &self,
        transaction_type: &str,
        transaction_name: Option<&str>,
        from: EpochMillis,
        to: EpochMillis,
        live_capture_time: EpochMillis,
    ) -> Result<Option<LiveResult<OverviewAggregate>>> {
        self.map(from, to, |bucket| {
            Ok(bucket.get_live_overview_aggregate(
                transaction_type,
                transaction_name,
                live_capture_time,
            ))
        })
    }

    /// Percentile aggregates, stamped like the overview aggregates.
    ///
    /// Fails if any bucket's latency sketch is inconsistent.
    pub fn get_live_percentile_aggregates(
        &self,
        transaction_type: &str,
        transaction_name: Option<&str>,
        from: EpochMillis,
        to: EpochMillis,
        live_capture_time: EpochMillis,
    ) -> Result<Option<LiveResult<PercentileAggregate>>> {
        self.map(from, to, |bucket| {
            bucket.get_live_percentile_aggregate(
                transaction_type,
                transaction_name,
                live_capture_time,
            )
        })
    }

    /// Error counts per bucket
    pub fn get_live_error_points(
        &self,
        transaction_type: &str,
        transaction_name: Option<&str>,
        from: EpochMillis,
        to: EpochMillis,
        live_capture_time: EpochMillis,
    ) -> Result<Option<LiveResult<ErrorPoint>>> {
        self.map(from, to, |bucket| {
            Ok(bucket.get_live_error_point(transaction_type, transaction_name, live_capture_time))
        })
    }

    /// Query statistics per bucket, slowest first within each query type
    pub fn get_live_queries(
        &self,
        transaction_type: &str,
        transaction_name: Option<&str>,
        from: EpochMillis,
        to: EpochMillis,
    ) -> Result<Option<LiveResult<QueryMap>>> {
        self.map(from, to, |bucket| {
            Ok(bucket.get_live_queries(transaction_type, transaction_name))
        })
    }

    /// Merged profile per bucket; buckets without samples are skipped
    pub fn get_live_profile(
        &self,
        transaction_type: &str,
        transaction_name: Option<&str>,
        from: EpochMillis,
        to: EpochMillis,
    ) -> Result<Option<LiveResult<ProfileNode>>> {
        self.map(from, to, |bucket| {
            Ok(bucket.get_live_profile(transaction_type, transaction_name))
        })
    }

    /// Discard every live bucket
    pub fn clear_all(&self) {
        self.supplier.clear_all();
    }

    /// Apply `extract` to every live bucket in `(from, to]`.
    ///
    /// Returns `None` when no bucket is in range or no bucket yielded an item.
    /// The first extraction error aborts the query.
    pub fn map<T, F>(
        &self,
        from: EpochMillis,
        to: EpochMillis,
        mut extract: F,
    ) -> Result<Option<LiveResult<T>>>
    where
        F: FnMut(&AggregateIntervalCollector) -> Result<Option<T>>,
    {
        let buckets = self.supplier.buckets_in_range(from, to);
        let Some(first) = buckets.first() else {
            return Ok(None);
        };
        let initial_capture_time = first.capture_time();

        let mut items = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            if let Some(item) = extract(bucket)? {
                items.push(item);
            }
        }
        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(LiveResult {
            items,
            initial_capture_time,
        }))
    }
}
