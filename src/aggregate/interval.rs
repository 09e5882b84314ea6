//! The aggregation bucket for one fixed time interval.
//!
//! Writers call [`AggregateIntervalCollector::add`] from any thread while
//! readers take live snapshots of the same bucket. The outer maps only hand
//! out `Arc`s to guarded accumulators; no map lock is held while an
//! accumulator is locked, and an accumulator lock is never held while a map
//! is locked or while the sink runs.

use crate::aggregate::collector::{AggregateCollector, GuardedCollector};
use crate::aggregate::sink::{AggregateSink, OverallAggregates, TransactionAggregates};
use crate::aggregate::time::next_rollup_time;
use crate::core::{
    DiagnosticsSink, EpochMillis, ErrorPoint, OverallErrorSummary, OverallSummary,
    OverviewAggregate, PercentileAggregate, ProfileNode, QueryMap, Result, Transaction,
    TransactionErrorSummary, TransactionSummary,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Accumulators for one transaction type within a bucket: one overall, plus
/// one per transaction name up to the configured cap.
pub struct IntervalTypeCollector {
    transaction_type: String,
    overall: Arc<GuardedCollector>,
    by_name: DashMap<String, Arc<GuardedCollector>>,
    /// Name slots handed out so far; never exceeds `max_transactions_per_type`
    name_slots: AtomicUsize,
    max_transactions_per_type: usize,
    max_queries_per_query_type: usize,
}

impl IntervalTypeCollector {
    fn new(
        transaction_type: &str,
        max_transactions_per_type: usize,
        max_queries_per_query_type: usize,
    ) -> Self {
        Self {
            transaction_type: transaction_type.to_string(),
            overall: Arc::new(GuardedCollector::new(AggregateCollector::new(
                transaction_type,
                None,
                max_queries_per_query_type,
            ))),
            by_name: DashMap::new(),
            name_slots: AtomicUsize::new(0),
            max_transactions_per_type,
            max_queries_per_query_type,
        }
    }

    /// Record a transaction into the overall accumulator and, capacity
    /// permitting, its per-name accumulator.
    ///
    /// The two accumulators are locked one after the other, never together.
    pub fn add(&self, transaction: &Transaction, diagnostics: &dyn DiagnosticsSink) {
        self.overall.with(|collector| record(collector, transaction));

        let Some(collector) = self.transaction_collector_for(&transaction.transaction_name) else {
            diagnostics.transaction_name_limit_exceeded(
                &self.transaction_type,
                self.max_transactions_per_type,
            );
            return;
        };
        collector.with(|collector| record(collector, transaction));
    }

    /// The type-level accumulator
    pub fn overall(&self) -> &Arc<GuardedCollector> {
        &self.overall
    }

    /// The accumulator for one transaction name, if it is tracked
    pub fn transaction_collector(&self, transaction_name: &str) -> Option<Arc<GuardedCollector>> {
        self.by_name
            .get(transaction_name)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Every per-name accumulator, sorted by transaction name
    pub fn transaction_collectors(&self) -> Vec<(String, Arc<GuardedCollector>)> {
        let mut collectors: Vec<_> = self
            .by_name
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        collectors.sort_by(|a, b| a.0.cmp(&b.0));
        collectors
    }

    /// Number of transaction names tracked individually
    pub fn transaction_name_count(&self) -> usize {
        self.by_name.len()
    }

    /// The accumulator for `transaction_name`, created if a name slot is free.
    ///
    /// A slot is reserved before the map entry is taken. When two writers race
    /// to insert the same new name, the loser holds its slot until it releases
    /// it in the `Occupied` branch. In that window a third new name can be
    /// refused, and reported as over the limit, while fewer than
    /// `max_transactions_per_type` names are in the map. The map itself never
    /// exceeds the cap.
    fn transaction_collector_for(&self, transaction_name: &str) -> Option<Arc<GuardedCollector>> {
        if let Some(existing) = self.transaction_collector(transaction_name) {
            return Some(existing);
        }
        if !self.reserve_name_slot() {
            // The last slot may have gone to this very name.
            return self.transaction_collector(transaction_name);
        }
        match self.by_name.entry(transaction_name.to_string()) {
            Entry::Occupied(entry) => {
                // Another writer created it first.
                self.name_slots.fetch_sub(1, Ordering::AcqRel);
                Some(Arc::clone(entry.get()))
            },
            Entry::Vacant(entry) => {
                let collector = Arc::new(GuardedCollector::new(AggregateCollector::new(
                    &self.transaction_type,
                    Some(transaction_name),
                    self.max_queries_per_query_type,
                )));
                entry.insert(Arc::clone(&collector));
                Some(collector)
            },
        }
    }

    fn reserve_name_slot(&self) -> bool {
        self.name_slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |slots| {
                (slots < self.max_transactions_per_type).then_some(slots + 1)
            })
            .is_ok()
    }
}

fn record(collector: &mut AggregateCollector, transaction: &Transaction) {
    collector.add(transaction);
    collector.add_timers(&transaction.root_timer);
    collector.add_queries(&transaction.queries);
    if let Some(profile) = &transaction.profile {
        collector.add_profile(profile);
    }
}

/// The bucket: every accumulator for one interval, keyed by transaction type.
pub struct AggregateIntervalCollector {
    capture_time: EpochMillis,
    by_type: DashMap<String, Arc<IntervalTypeCollector>>,
    max_transactions_per_type: usize,
    max_queries_per_query_type: usize,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl AggregateIntervalCollector {
    /// Create a bucket covering the interval that contains `current_time`.
    ///
    /// The capture time is the first interval boundary at or after
    /// `current_time` and never changes.
    pub fn new(
        current_time: EpochMillis,
        interval_millis: u64,
        max_transactions_per_type: usize,
        max_queries_per_query_type: usize,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            capture_time: next_rollup_time(current_time, interval_millis),
            by_type: DashMap::new(),
            max_transactions_per_type,
            max_queries_per_query_type,
            diagnostics,
        }
    }

    /// End-of-interval timestamp identifying this bucket
    pub fn capture_time(&self) -> EpochMillis {
        self.capture_time
    }

    /// Record a completed transaction
    pub fn add(&self, transaction: &Transaction) {
        let type_collector = self.type_collector_for(&transaction.transaction_type);
        type_collector.add(transaction, self.diagnostics.as_ref());
    }

    /// Build the final aggregates and hand them to `sink` in one call.
    ///
    /// Each accumulator is locked only while its aggregate is built. A build
    /// failure aborts the flush and nothing is delivered.
    pub fn flush(&self, sink: &dyn AggregateSink) -> Result<()> {
        let mut overall_aggregates: OverallAggregates = HashMap::new();
        let mut transaction_aggregates: TransactionAggregates = HashMap::new();

        for (transaction_type, type_collector) in self.type_collectors() {
            let aggregate = type_collector
                .overall()
                .with(|collector| collector.build(self.capture_time))?;
            overall_aggregates.insert(transaction_type.clone(), aggregate);

            let collectors = type_collector.transaction_collectors();
            if collectors.is_empty() {
                continue;
            }
            let mut by_name = HashMap::with_capacity(collectors.len());
            for (transaction_name, collector) in collectors {
                let aggregate = collector.with(|collector| collector.build(self.capture_time))?;
                by_name.insert(transaction_name, aggregate);
            }
            transaction_aggregates.insert(transaction_type, by_name);
        }

        tracing::debug!(
            capture_time = self.capture_time,
            transaction_types = overall_aggregates.len(),
            "Flushing aggregate interval"
        );
        sink.collect(overall_aggregates, transaction_aggregates, self.capture_time)
    }

    /// Type-level totals; `None` if the type has no transactions in this bucket
    pub fn get_live_overall_summary(&self, transaction_type: &str) -> Option<OverallSummary> {
        let type_collector = self.type_collector(transaction_type)?;
        Some(type_collector.overall().with(|c| c.live_overall_summary()))
    }

    /// Per-name summaries sorted by transaction name; `None` if the type has
    /// no transactions in this bucket
    pub fn get_live_transaction_summaries(
        &self,
        transaction_type: &str,
    ) -> Option<Vec<TransactionSummary>> {
        let type_collector = self.type_collector(transaction_type)?;
        Some(
            type_collector
                .transaction_collectors()
                .into_iter()
                .map(|(_, collector)| collector.with(|c| c.live_transaction_summary()))
                .collect(),
        )
    }

    /// Type-level error totals; `None` if the type has no transactions in this bucket
    pub fn get_live_overall_error_summary(
        &self,
        transaction_type: &str,
    ) -> Option<OverallErrorSummary> {
        let type_collector = self.type_collector(transaction_type)?;
        Some(type_collector.overall().with(|c| c.live_overall_error_summary()))
    }

    /// Per-name error totals sorted by transaction name
    pub fn get_live_transaction_error_summaries(
        &self,
        transaction_type: &str,
    ) -> Option<Vec<TransactionErrorSummary>> {
        let type_collector = self.type_collector(transaction_type)?;
        Some(
            type_collector
                .transaction_collectors()
                .into_iter()
                .map(|(_, collector)| collector.with(|c| c.live_transaction_error_summary()))
                .collect(),
        )
    }

    /// Overview snapshot, stamped with `min(live_capture_time, capture_time)`
    pub fn get_live_overview_aggregate(
        &self,
        transaction_type: &str,
        transaction_name: Option<&str>,
        live_capture_time: EpochMillis,
    ) -> Option<OverviewAggregate> {
        let collector = self.collector(transaction_type, transaction_name)?;
        let captured_at = self.clamp(live_capture_time);
        Some(collector.with(|c| c.build_overview_aggregate(captured_at)))
    }

    /// Percentile snapshot, stamped with `min(live_capture_time, capture_time)`
    pub fn get_live_percentile_aggregate(
        &self,
        transaction_type: &str,
        transaction_name: Option<&str>,
        live_capture_time: EpochMillis,
    ) -> Result<Option<PercentileAggregate>> {
        let Some(collector) = self.collector(transaction_type, transaction_name) else {
            return Ok(None);
        };
        let captured_at = self.clamp(live_capture_time);
        collector.with(|c| c.build_percentile_aggregate(captured_at)).map(Some)
    }

    /// Error point, stamped with `min(live_capture_time, capture_time)`
    pub fn get_live_error_point(
        &self,
        transaction_type: &str,
        transaction_name: Option<&str>,
        live_capture_time: EpochMillis,
    ) -> Option<ErrorPoint> {
        let collector = self.collector(transaction_type, transaction_name)?;
        let captured_at = self.clamp(live_capture_time);
        Some(collector.with(|c| c.build_error_point(captured_at)))
    }

    /// Merged query statistics for the type or one of its names
    pub fn get_live_queries(
        &self,
        transaction_type: &str,
        transaction_name: Option<&str>,
    ) -> Option<QueryMap> {
        let collector = self.collector(transaction_type, transaction_name)?;
        Some(collector.with(|c| c.live_queries()))
    }

    /// Merged profile; `None` also when no profile has been recorded
    pub fn get_live_profile(
        &self,
        transaction_type: &str,
        transaction_name: Option<&str>,
    ) -> Option<ProfileNode> {
        let collector = self.collector(transaction_type, transaction_name)?;
        collector.with(|c| c.live_profile())
    }

    /// Drop every tracked transaction type
    pub fn clear(&self) {
        self.by_type.clear();
    }

    /// Number of transaction types seen in this bucket
    pub fn transaction_type_count(&self) -> usize {
        self.by_type.len()
    }

    /// Number of names tracked individually for a type
    pub fn transaction_name_count(&self, transaction_type: &str) -> usize {
        self.type_collector(transaction_type)
            .map_or(0, |c| c.transaction_name_count())
    }

    fn clamp(&self, live_capture_time: EpochMillis) -> EpochMillis {
        live_capture_time.min(self.capture_time)
    }

    fn type_collector_for(&self, transaction_type: &str) -> Arc<IntervalTypeCollector> {
        if let Some(existing) = self.type_collector(transaction_type) {
            return existing;
        }
        let entry = self
            .by_type
            .entry(transaction_type.to_string())
            .or_insert_with(|| {
                tracing::trace!(
                    transaction_type,
                    capture_time = self.capture_time,
                    "New transaction type in interval"
                );
                Arc::new(IntervalTypeCollector::new(
                    transaction_type,
                    self.max_transactions_per_type,
                    self.max_queries_per_query_type,
                ))
            });
        Arc::clone(entry.value())
    }

    fn type_collector(&self, transaction_type: &str) -> Option<Arc<IntervalTypeCollector>> {
        self.by_type
            .get(transaction_type)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn type_collectors(&self) -> Vec<(String, Arc<IntervalTypeCollector>)> {
        self.by_type
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    fn collector(
        &self,
        transaction_type: &str,
        transaction_name: Option<&str>,
    ) -> Option<Arc<GuardedCollector>> {
        let type_collector = self.type_collector(transaction_type)?;
        match transaction_name {
            None => Some(Arc::clone(type_collector.overall())),
            Some(name) => type_collector.transaction_collector(name),
        }
    }
}
