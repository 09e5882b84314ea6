//! Durable-storage handoff for flushed buckets.

use crate::core::{Aggregate, EpochMillis, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Overall aggregates keyed by transaction type
pub type OverallAggregates = HashMap<String, Aggregate>;

/// Per-name aggregates keyed by transaction type, then transaction name
pub type TransactionAggregates = HashMap<String, HashMap<String, Aggregate>>;

/// Receives the finalized aggregates of one bucket
pub trait AggregateSink: Send + Sync {
    /// Persist one bucket. Called once per bucket, with no accumulator lock held.
    fn collect(
        &self,
        overall_aggregates: OverallAggregates,
        transaction_aggregates: TransactionAggregates,
        capture_time: EpochMillis,
    ) -> Result<()>;
}

/// One flushed bucket as seen by [`MemorySink`]
#[derive(Debug, Clone)]
pub struct FlushedInterval {
    /// End of the flushed interval
    pub capture_time: EpochMillis,
    /// Overall aggregate per transaction type
    pub overall_aggregates: OverallAggregates,
    /// Per-name aggregates per transaction type
    pub transaction_aggregates: TransactionAggregates,
}

/// Keeps flushed buckets in memory, in flush order.
#[derive(Debug, Default)]
pub struct MemorySink {
    intervals: Mutex<Vec<FlushedInterval>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All buckets flushed so far
    pub fn intervals(&self) -> Vec<FlushedInterval> {
        self.intervals.lock().clone()
    }

    /// Number of buckets flushed so far
    pub fn len(&self) -> usize {
        self.intervals.lock().len()
    }

    /// True if nothing has been flushed
    pub fn is_empty(&self) -> bool {
        self.intervals.lock().is_empty()
    }
}

impl AggregateSink for MemorySink {
    fn collect(
        &self,
        overall_aggregates: OverallAggregates,
        transaction_aggregates: TransactionAggregates,
        capture_time: EpochMillis,
    ) -> Result<()> {
        self.intervals.lock().push(FlushedInterval {
            capture_time,
            overall_aggregates,
            transaction_aggregates,
        });
        Ok(())
    }
}
