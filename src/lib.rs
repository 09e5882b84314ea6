//! Tally - live interval aggregation for application performance monitoring.
//!
//! Tally folds completed transactions into fixed-width time buckets and
//! answers "live" queries against buckets that are still being written,
//! before they are finalized and handed to durable storage.
//!
//! # Features
//!
//! - **Concurrent buckets**: many writer and reader threads per bucket, with one
//!   lock per accumulator
//! - **Bounded cardinality**: per-type cap on individually tracked transaction
//!   names, overflow folded into the type's overall aggregate
//! - **Live range queries**: merge results across every bucket in `(from, to]`
//!
//! # Architecture
//!
//! - `core`: Domain types, configuration, errors, diagnostics, logging
//! - `aggregate`: Accumulators, buckets, the live bucket set and its flush task
//! - `live`: Range queries over live buckets
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tally_lib::aggregate::{now_millis, Aggregator, MemorySink};
//! use tally_lib::core::{Config, TimerNode, Transaction, WarnOnceDiagnostics};
//! use tally_lib::live::LiveAggregateRepository;
//!
//! fn main() -> tally_lib::Result<()> {
//!     let config = Config::new()?;
//!     let aggregator = Arc::new(Aggregator::new(
//!         config.aggregate,
//!         Arc::new(WarnOnceDiagnostics::new()),
//!         Arc::new(MemorySink::new()),
//!     ));
//!     let transaction = Transaction::builder()
//!         .transaction_type("web")
//!         .transaction_name("GET /users")
//!         .root_timer(TimerNode::new("http request", 12_000_000))
//!         .build()?;
//!     let now = now_millis();
//!     aggregator.add(&transaction, now);
//!
//!     let repository = LiveAggregateRepository::new(aggregator);
//!     let summary = repository.get_live_overall_summary("web", now - 3_600_000, now + 60_000)?;
//!     assert!(summary.is_some());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod aggregate;
pub mod core;
pub mod live;

// Re-export core types for convenience
pub use crate::core::{Config, Result, TallyError};
