//! Interval aggregation.
//!
//! Transactions are folded into fixed-width buckets
//! ([`AggregateIntervalCollector`]). Each bucket keeps one accumulator per
//! transaction type and one per transaction name, and can be read while it is
//! still being written. The [`Aggregator`] owns the live buckets and hands
//! completed ones to an [`AggregateSink`].

pub mod aggregator;
pub mod collector;
pub mod interval;
pub mod sink;
pub mod time;

pub use aggregator::{Aggregator, BucketSupplier, FlushTask};
pub use collector::{AggregateCollector, GuardedCollector, LIMIT_EXCEEDED_BUCKET};
pub use interval::{AggregateIntervalCollector, IntervalTypeCollector};
pub use sink::{
    AggregateSink, FlushedInterval, MemorySink, OverallAggregates, TransactionAggregates,
};
pub use time::{next_rollup_time, now_millis};
