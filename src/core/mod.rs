//! Core domain models, configuration and error handling for tally.
//!
//! This module contains the fundamental types shared by the aggregation
//! buckets and the live query surface.

#![warn(missing_docs)]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use config::{AggregateConfig, Config, ConfigBuilder, LogLevel, LoggingConfig};
pub use diagnostics::{DiagnosticsSink, WarnOnceDiagnostics};
pub use error::{Result, TallyError};
pub use logging::init_logging;
pub use types::{
    Aggregate, EpochMillis, ErrorPoint, OverallErrorSummary, OverallSummary, OverviewAggregate,
    PercentileAggregate, Percentiles, ProfileNode, QueryMap, QueryStats, TimerNode, Transaction,
    TransactionBuilder, TransactionErrorSummary, TransactionSummary,
};
