//! Per-(type, name) metrics accumulator.
//!
//! [`AggregateCollector`] is plain mutable state with no synchronization of
//! its own. Every access from the bucket goes through [`GuardedCollector`],
//! which owns the collector behind a mutex and only hands it out inside a
//! closure, so a lock is always held for the full duration of an update or a
//! snapshot build.

use crate::core::{
    Aggregate, EpochMillis, ErrorPoint, OverallErrorSummary, OverallSummary, OverviewAggregate,
    PercentileAggregate, Percentiles, ProfileNode, QueryMap, QueryStats, Result, TallyError,
    TimerNode, Transaction, TransactionErrorSummary, TransactionSummary,
};
use parking_lot::Mutex;
use quantiles::ckms::CKMS;
use std::collections::HashMap;

/// Query text that absorbs every query past the per-type limit.
pub const LIMIT_EXCEEDED_BUCKET: &str = "LIMIT EXCEEDED BUCKET";

/// Relative error of the latency sketch.
const LATENCY_SKETCH_ERROR: f64 = 0.001;

/// Running totals, latency sketch, timers, queries and profile for one
/// transaction type or one transaction name within a bucket.
pub struct AggregateCollector {
    transaction_type: String,
    /// `None` for a type's overall collector
    transaction_name: Option<String>,
    max_queries_per_query_type: usize,
    transaction_count: u64,
    error_count: u64,
    total_duration_nanos: u64,
    max_duration_nanos: u64,
    latencies: CKMS<f64>,
    root_timers: Vec<TimerNode>,
    queries: HashMap<String, HashMap<String, QueryStats>>,
    profile: Option<ProfileNode>,
}

impl AggregateCollector {
    /// Create an empty collector
    pub fn new(
        transaction_type: &str,
        transaction_name: Option<&str>,
        max_queries_per_query_type: usize,
    ) -> Self {
        Self {
            transaction_type: transaction_type.to_string(),
            transaction_name: transaction_name.map(str::to_string),
            max_queries_per_query_type,
            transaction_count: 0,
            error_count: 0,
            total_duration_nanos: 0,
            max_duration_nanos: 0,
            latencies: CKMS::new(LATENCY_SKETCH_ERROR),
            root_timers: Vec::new(),
            queries: HashMap::new(),
            profile: None,
        }
    }

    /// Record the transaction's count, duration and error status
    pub fn add(&mut self, transaction: &Transaction) {
        let duration = transaction.duration_nanos();
        self.transaction_count += 1;
        self.total_duration_nanos = self.total_duration_nanos.saturating_add(duration);
        self.max_duration_nanos = self.max_duration_nanos.max(duration);
        if transaction.is_error() {
            self.error_count += 1;
        }
        self.latencies.insert(duration as f64);
    }

    /// Merge a timer tree
    pub fn add_timers(&mut self, root_timer: &TimerNode) {
        match self.root_timers.iter_mut().find(|t| t.name == root_timer.name) {
            Some(existing) => existing.merge(root_timer),
            None => self.root_timers.push(root_timer.clone()),
        }
    }

    /// Merge query statistics, keyed by query type
    pub fn add_queries(&mut self, queries: &HashMap<String, Vec<QueryStats>>) {
        for (query_type, stats) in queries {
            let by_text = self.queries.entry(query_type.clone()).or_default();
            for query in stats {
                if let Some(existing) = by_text.get_mut(&query.query_text) {
                    existing.merge(query);
                    continue;
                }
                // The overflow bucket doesn't count against the limit.
                let tracked =
                    by_text.len() - usize::from(by_text.contains_key(LIMIT_EXCEEDED_BUCKET));
                if tracked < self.max_queries_per_query_type {
                    by_text.insert(query.query_text.clone(), query.clone());
                } else {
                    by_text
                        .entry(LIMIT_EXCEEDED_BUCKET.to_string())
                        .or_insert_with(|| QueryStats::new(LIMIT_EXCEEDED_BUCKET, 0, 0, 0))
                        .merge(query);
                }
            }
        }
    }

    /// Merge a profile tree
    pub fn add_profile(&mut self, profile: &ProfileNode) {
        let Some(existing) = self.profile.as_mut() else {
            self.profile = Some(profile.clone());
            return;
        };
        if existing.frame == profile.frame {
            existing.merge(profile);
            return;
        }
        // Different root frames hang off a synthetic root.
        if existing.frame != SYNTHETIC_ROOT_FRAME {
            let previous = std::mem::replace(existing, ProfileNode::new(SYNTHETIC_ROOT_FRAME, 0));
            existing.children.push(previous);
        }
        existing.merge(&ProfileNode::new(SYNTHETIC_ROOT_FRAME, 0).child(profile.clone()));
        existing.sample_count = existing
            .children
            .iter()
            .map(|c| c.sample_count)
            .fold(0u64, u64::saturating_add);
    }

    /// Transactions recorded so far
    pub fn transaction_count(&self) -> u64 {
        self.transaction_count
    }

    /// Type-level totals
    pub fn live_overall_summary(&self) -> OverallSummary {
        OverallSummary {
            total_duration_nanos: self.total_duration_nanos,
            transaction_count: self.transaction_count,
        }
    }

    /// Totals for this collector's transaction name
    pub fn live_transaction_summary(&self) -> TransactionSummary {
        TransactionSummary {
            transaction_name: self.transaction_name.clone().unwrap_or_default(),
            total_duration_nanos: self.total_duration_nanos,
            transaction_count: self.transaction_count,
        }
    }

    /// Type-level error totals
    pub fn live_overall_error_summary(&self) -> OverallErrorSummary {
        OverallErrorSummary {
            error_count: self.error_count,
            transaction_count: self.transaction_count,
        }
    }

    /// Error totals for this collector's transaction name
    pub fn live_transaction_error_summary(&self) -> TransactionErrorSummary {
        TransactionErrorSummary {
            transaction_name: self.transaction_name.clone().unwrap_or_default(),
            error_count: self.error_count,
            transaction_count: self.transaction_count,
        }
    }

    /// Timer overview stamped with `capture_time`
    pub fn build_overview_aggregate(&self, capture_time: EpochMillis) -> OverviewAggregate {
        OverviewAggregate {
            capture_time,
            total_duration_nanos: self.total_duration_nanos,
            transaction_count: self.transaction_count,
            root_timers: self.root_timers.clone(),
        }
    }

    /// Percentile view stamped with `capture_time`; fails if the latency sketch is inconsistent
    pub fn build_percentile_aggregate(
        &self,
        capture_time: EpochMillis,
    ) -> Result<PercentileAggregate> {
        Ok(PercentileAggregate {
            capture_time,
            total_duration_nanos: self.total_duration_nanos,
            transaction_count: self.transaction_count,
            percentiles: self.percentiles()?,
        })
    }

    /// Error rate stamped with `capture_time`
    pub fn build_error_point(&self, capture_time: EpochMillis) -> ErrorPoint {
        ErrorPoint {
            capture_time,
            error_count: self.error_count,
            transaction_count: self.transaction_count,
        }
    }

    /// Snapshot of the merged queries, slowest first within each query type
    pub fn live_queries(&self) -> QueryMap {
        self.queries
            .iter()
            .map(|(query_type, by_text)| {
                let mut queries: Vec<QueryStats> = by_text.values().cloned().collect();
                queries.sort_by(|a, b| {
                    b.total_duration_nanos
                        .cmp(&a.total_duration_nanos)
                        .then_with(|| a.query_text.cmp(&b.query_text))
                });
                (query_type.clone(), queries)
            })
            .collect()
    }

    /// Merged profile, if any sample was recorded
    pub fn live_profile(&self) -> Option<ProfileNode> {
        self.profile.clone()
    }

    /// Build the immutable aggregate handed to durable storage
    pub fn build(&self, capture_time: EpochMillis) -> Result<Aggregate> {
        Ok(Aggregate {
            capture_time,
            total_duration_nanos: self.total_duration_nanos,
            transaction_count: self.transaction_count,
            error_count: self.error_count,
            percentiles: self.percentiles()?,
            root_timers: self.root_timers.clone(),
            queries: self.live_queries(),
            profile: self.profile.clone(),
        })
    }

    fn percentiles(&self) -> Result<Option<Percentiles>> {
        if self.transaction_count == 0 {
            return Ok(None);
        }
        if self.latencies.count() as u64 != self.transaction_count {
            return Err(self.build_error(format!(
                "latency sketch holds {} samples but {} transactions were recorded",
                self.latencies.count(),
                self.transaction_count
            )));
        }
        let quantile = |q: f64| -> Result<u64> {
            self.latencies
                .query(q)
                .map(|(_, value)| value as u64)
                .ok_or_else(|| self.build_error(format!("latency sketch has no value for q={}", q)))
        };
        Ok(Some(Percentiles {
            p50_nanos: quantile(0.50)?,
            p95_nanos: quantile(0.95)?,
            p99_nanos: quantile(0.99)?,
            max_nanos: self.max_duration_nanos,
        }))
    }

    fn build_error(&self, message: String) -> TallyError {
        match &self.transaction_name {
            Some(name) => TallyError::build(
                self.transaction_type.as_str(),
                format!("transaction '{}': {}", name, message),
            ),
            None => TallyError::build(self.transaction_type.as_str(), message),
        }
    }
}

const SYNTHETIC_ROOT_FRAME: &str = "<multiple root frames>";

/// An [`AggregateCollector`] bundled with the lock that guards it.
pub struct GuardedCollector {
    inner: Mutex<AggregateCollector>,
}

impl GuardedCollector {
    /// Wrap a collector
    pub fn new(collector: AggregateCollector) -> Self {
        Self {
            inner: Mutex::new(collector),
        }
    }

    /// Run `f` with exclusive access to the collector.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut AggregateCollector) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}
