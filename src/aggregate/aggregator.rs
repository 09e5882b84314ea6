//! The live set of buckets and its flush loop.

use crate::aggregate::interval::AggregateIntervalCollector;
use crate::aggregate::sink::AggregateSink;
use crate::aggregate::time::{next_rollup_time, now_millis};
use crate::core::{AggregateConfig, DiagnosticsSink, EpochMillis, Result, Transaction};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Source of live buckets for read queries
pub trait BucketSupplier: Send + Sync {
    /// Buckets with `from < capture_time <= to`, ascending by capture time.
    /// Only buckets that have not been discarded are returned.
    fn buckets_in_range(
        &self,
        from: EpochMillis,
        to: EpochMillis,
    ) -> Vec<Arc<AggregateIntervalCollector>>;

    /// Discard every live bucket without flushing it
    fn clear_all(&self);
}

/// Creates buckets as transactions arrive, hands completed buckets to the
/// sink, and serves the live ones to readers.
pub struct Aggregator {
    config: AggregateConfig,
    interval_millis: u64,
    diagnostics: Arc<dyn DiagnosticsSink>,
    sink: Arc<dyn AggregateSink>,
    buckets: RwLock<BTreeMap<EpochMillis, Arc<AggregateIntervalCollector>>>,
    /// Highest capture time handed to the sink; only written under the
    /// `buckets` write lock
    flushed_through: AtomicU64,
}

impl Aggregator {
    /// Create an aggregator. `config` is expected to be validated.
    pub fn new(
        config: AggregateConfig,
        diagnostics: Arc<dyn DiagnosticsSink>,
        sink: Arc<dyn AggregateSink>,
    ) -> Self {
        let interval_millis = config.interval_millis().max(1);
        Self {
            config,
            interval_millis,
            diagnostics,
            sink,
            buckets: RwLock::new(BTreeMap::new()),
            flushed_through: AtomicU64::new(0),
        }
    }

    /// Aggregation settings
    pub fn config(&self) -> &AggregateConfig {
        &self.config
    }

    /// Record a transaction that completed at `now`.
    ///
    /// A transaction whose interval was already flushed lands in the
    /// interval right after the last flushed one, so no capture time reaches
    /// the sink twice.
    pub fn add(&self, transaction: &Transaction, now: EpochMillis) {
        self.bucket_for(now).add(transaction);
    }

    /// Flush and discard every bucket whose interval ended before `now`.
    ///
    /// Buckets are removed from the live set before flushing; one that fails
    /// to flush is lost. All due buckets are attempted and the first error is
    /// returned.
    pub fn flush_completed(&self, now: EpochMillis) -> Result<usize> {
        let due: Vec<_> = {
            let mut buckets = self.buckets.write();
            let live = buckets.split_off(&now);
            let due = std::mem::replace(&mut *buckets, live);
            self.mark_flushed(&due);
            due.into_values().collect()
        };
        self.flush_buckets(due)
    }

    /// Flush and discard every live bucket
    pub fn flush_all(&self) -> Result<usize> {
        let all: Vec<_> = {
            let mut buckets = self.buckets.write();
            let all = std::mem::take(&mut *buckets);
            self.mark_flushed(&all);
            all.into_values().collect()
        };
        self.flush_buckets(all)
    }

    /// Number of live buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    fn flush_buckets(&self, buckets: Vec<Arc<AggregateIntervalCollector>>) -> Result<usize> {
        let mut flushed = 0;
        let mut first_error = None;
        for bucket in buckets {
            match bucket.flush(self.sink.as_ref()) {
                Ok(()) => flushed += 1,
                Err(e) => {
                    tracing::error!(
                        capture_time = bucket.capture_time(),
                        category = e.category(),
                        "Failed to flush aggregate interval: {}",
                        e
                    );
                    first_error.get_or_insert(e);
                },
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    /// Raise the flushed-through watermark; caller holds the write lock
    fn mark_flushed(&self, flushed: &BTreeMap<EpochMillis, Arc<AggregateIntervalCollector>>) {
        if let Some(&last) = flushed.keys().next_back() {
            self.flushed_through.fetch_max(last, Ordering::AcqRel);
        }
    }

    fn bucket_for(&self, now: EpochMillis) -> Arc<AggregateIntervalCollector> {
        let mut capture_time = next_rollup_time(now, self.interval_millis);
        // Flushed buckets are no longer in the map, so a hit is always live.
        if let Some(bucket) = self.buckets.read().get(&capture_time) {
            return Arc::clone(bucket);
        }
        let mut buckets = self.buckets.write();
        let flushed_through = self.flushed_through.load(Ordering::Acquire);
        if capture_time <= flushed_through {
            let late_by = flushed_through - capture_time;
            capture_time = flushed_through.saturating_add(self.interval_millis);
            tracing::debug!(
                capture_time,
                late_by,
                "Interval already flushed, recording into the next one"
            );
        }
        let bucket = buckets.entry(capture_time).or_insert_with(|| {
            tracing::debug!(capture_time, "Opening aggregate interval");
            Arc::new(AggregateIntervalCollector::new(
                capture_time,
                self.interval_millis,
                self.config.max_transactions_per_type,
                self.config.max_queries_per_query_type,
                Arc::clone(&self.diagnostics),
            ))
        });
        Arc::clone(bucket)
    }
}

impl BucketSupplier for Aggregator {
    fn buckets_in_range(
        &self,
        from: EpochMillis,
        to: EpochMillis,
    ) -> Vec<Arc<AggregateIntervalCollector>> {
        if to <= from {
            return Vec::new();
        }
        self.buckets
            .read()
            .range((Bound::Excluded(from), Bound::Included(to)))
            .map(|(_, bucket)| Arc::clone(bucket))
            .collect()
    }

    fn clear_all(&self) {
        let buckets = std::mem::take(&mut *self.buckets.write());
        for bucket in buckets.values() {
            bucket.clear();
        }
        tracing::info!(discarded = buckets.len(), "Cleared all live aggregate intervals");
    }
}

/// Background task that flushes completed buckets on a fixed tick.
pub struct FlushTask {
    aggregator: Arc<Aggregator>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl FlushTask {
    /// Start the flush loop on the current tokio runtime
    pub fn spawn(aggregator: Arc<Aggregator>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let handle = {
            let aggregator = Arc::clone(&aggregator);
            let shutdown = Arc::clone(&shutdown);
            let notify = Arc::clone(&notify);
            tokio::spawn(async move {
                // `interval` panics on a zero period.
                let period = aggregator
                    .config()
                    .flush_check_interval
                    .max(Duration::from_millis(1));
                let mut interval = tokio::time::interval(period);
                while !shutdown.load(Ordering::Acquire) {
                    tokio::select! {
                        _ = interval.tick() => {
                            // Errors are logged per bucket; the loop keeps going.
                            if let Ok(flushed) = aggregator.flush_completed(now_millis()) {
                                if flushed > 0 {
                                    tracing::debug!("Flushed {} aggregate intervals", flushed);
                                }
                            }
                        }
                        _ = notify.notified() => {}
                    }
                }
            })
        };
        Self {
            aggregator,
            shutdown,
            notify,
            handle,
        }
    }

    /// Stop the loop and flush whatever is still live
    pub async fn shutdown(self) -> Result<usize> {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_one();
        if let Err(e) = self.handle.await {
            tracing::warn!("Flush task ended abnormally: {}", e);
        }
        self.aggregator.flush_all()
    }
}
