use crate::core::error::{Result, TallyError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Milliseconds since the Unix epoch.
pub type EpochMillis = u64;

/// A node of a transaction's timer tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerNode {
    /// Timer name
    pub name: String,
    /// Total time spent in this timer
    pub total_nanos: u64,
    /// Number of times this timer was entered
    pub count: u64,
    /// Nested timers
    pub children: Vec<TimerNode>,
}

impl TimerNode {
    /// Creates a timer entered once
    pub fn new<S: Into<String>>(name: S, total_nanos: u64) -> Self {
        Self {
            name: name.into(),
            total_nanos,
            count: 1,
            children: Vec::new(),
        }
    }

    /// Appends a nested timer
    pub fn child(mut self, child: TimerNode) -> Self {
        self.children.push(child);
        self
    }

    /// Merges another timer tree into this one, matching children by name.
    pub fn merge(&mut self, other: &TimerNode) {
        self.total_nanos = self.total_nanos.saturating_add(other.total_nanos);
        self.count = self.count.saturating_add(other.count);
        for other_child in &other.children {
            match self.children.iter_mut().find(|c| c.name == other_child.name) {
                Some(existing) => existing.merge(other_child),
                None => self.children.push(other_child.clone()),
            }
        }
    }
}

/// Aggregated statistics for a single query text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStats {
    /// The query text (SQL, key, URL, ...)
    pub query_text: String,
    /// Total time spent executing
    pub total_duration_nanos: u64,
    /// Number of executions
    pub execution_count: u64,
    /// Total rows returned
    pub total_rows: u64,
}

impl QueryStats {
    /// Creates stats for a query text
    pub fn new<S: Into<String>>(
        query_text: S,
        total_duration_nanos: u64,
        execution_count: u64,
        total_rows: u64,
    ) -> Self {
        Self {
            query_text: query_text.into(),
            total_duration_nanos,
            execution_count,
            total_rows,
        }
    }

    /// Adds another query's totals to this one
    pub fn merge(&mut self, other: &QueryStats) {
        self.total_duration_nanos = self
            .total_duration_nanos
            .saturating_add(other.total_duration_nanos);
        self.execution_count = self.execution_count.saturating_add(other.execution_count);
        self.total_rows = self.total_rows.saturating_add(other.total_rows);
    }
}

/// A node of a sampled stack profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileNode {
    /// Stack frame
    pub frame: String,
    /// Samples that passed through this frame
    pub sample_count: u64,
    /// Callee frames
    pub children: Vec<ProfileNode>,
}

impl ProfileNode {
    /// Creates a frame with the given sample count
    pub fn new<S: Into<String>>(frame: S, sample_count: u64) -> Self {
        Self {
            frame: frame.into(),
            sample_count,
            children: Vec::new(),
        }
    }

    /// Appends a callee frame
    pub fn child(mut self, child: ProfileNode) -> Self {
        self.children.push(child);
        self
    }

    /// Merges another profile tree into this one, matching children by frame.
    pub fn merge(&mut self, other: &ProfileNode) {
        self.sample_count = self.sample_count.saturating_add(other.sample_count);
        for other_child in &other.children {
            match self.children.iter_mut().find(|c| c.frame == other_child.frame) {
                Some(existing) => existing.merge(other_child),
                None => self.children.push(other_child.clone()),
            }
        }
    }
}

/// A completed transaction handed over by instrumentation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction type, e.g. "Web" or "Background"
    pub transaction_type: String,
    /// Transaction name, e.g. "GET /users"
    pub transaction_name: String,
    /// Root of the timer tree; its total is the transaction duration
    pub root_timer: TimerNode,
    /// Query statistics keyed by query type
    pub queries: HashMap<String, Vec<QueryStats>>,
    /// Optional sampled profile
    pub profile: Option<ProfileNode>,
    /// Error message if the transaction failed
    pub error: Option<String>,
}

impl Transaction {
    /// Creates a new transaction builder
    pub fn builder() -> TransactionBuilder {
        TransactionBuilder::default()
    }

    /// Returns the transaction duration in nanoseconds
    pub fn duration_nanos(&self) -> u64 {
        self.root_timer.total_nanos
    }

    /// Returns true if the transaction ended in error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Builder for creating transactions
#[derive(Default)]
pub struct TransactionBuilder {
    transaction_type: Option<String>,
    transaction_name: Option<String>,
    root_timer: Option<TimerNode>,
    queries: HashMap<String, Vec<QueryStats>>,
    profile: Option<ProfileNode>,
    error: Option<String>,
}

impl TransactionBuilder {
    /// Set the transaction type (required, non-empty)
    pub fn transaction_type<S: Into<String>>(mut self, transaction_type: S) -> Self {
        self.transaction_type = Some(transaction_type.into());
        self
    }

    /// Set the transaction name (required)
    pub fn transaction_name<S: Into<String>>(mut self, transaction_name: S) -> Self {
        self.transaction_name = Some(transaction_name.into());
        self
    }

    /// Set the root timer; its total is the transaction's duration (required)
    pub fn root_timer(mut self, root_timer: TimerNode) -> Self {
        self.root_timer = Some(root_timer);
        self
    }

    /// Add statistics for one query of `query_type`
    pub fn query<S: Into<String>>(mut self, query_type: S, query: QueryStats) -> Self {
        self.queries.entry(query_type.into()).or_default().push(query);
        self
    }

    /// Attach a sampled profile
    pub fn profile(mut self, profile: ProfileNode) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Mark the transaction as failed
    pub fn error<S: Into<String>>(mut self, message: S) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Build the transaction, failing if a required field is missing
    pub fn build(self) -> Result<Transaction> {
        let transaction_type = self
            .transaction_type
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                TallyError::InvalidTransaction("transaction_type is required".to_string())
            })?;
        let transaction_name = self
            .transaction_name
            .ok_or_else(|| {
                TallyError::InvalidTransaction("transaction_name is required".to_string())
            })?;
        let root_timer = self
            .root_timer
            .ok_or_else(|| TallyError::InvalidTransaction("root_timer is required".to_string()))?;
        Ok(Transaction {
            transaction_type,
            transaction_name,
            root_timer,
            queries: self.queries,
            profile: self.profile,
            error: self.error,
        })
    }
}

/// Totals for a whole transaction type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallSummary {
    /// Sum of transaction durations
    pub total_duration_nanos: u64,
    /// Number of transactions
    pub transaction_count: u64,
}

/// Totals for one transaction name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    /// Transaction name
    pub transaction_name: String,
    /// Sum of transaction durations
    pub total_duration_nanos: u64,
    /// Number of transactions
    pub transaction_count: u64,
}

/// Error totals for a whole transaction type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallErrorSummary {
    /// Number of failed transactions
    pub error_count: u64,
    /// Number of transactions
    pub transaction_count: u64,
}

/// Error totals for one transaction name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionErrorSummary {
    /// Transaction name
    pub transaction_name: String,
    /// Number of failed transactions
    pub error_count: u64,
    /// Number of transactions
    pub transaction_count: u64,
}

/// Point-in-time overview of one accumulator, used for charts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewAggregate {
    /// Snapshot time
    pub capture_time: EpochMillis,
    /// Sum of transaction durations
    pub total_duration_nanos: u64,
    /// Number of transactions
    pub transaction_count: u64,
    /// Merged timer trees, one per distinct root timer name
    pub root_timers: Vec<TimerNode>,
}

/// Latency percentiles in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    /// Median
    pub p50_nanos: u64,
    /// 95th percentile
    pub p95_nanos: u64,
    /// 99th percentile
    pub p99_nanos: u64,
    /// Slowest transaction
    pub max_nanos: u64,
}

/// Point-in-time percentile view of one accumulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileAggregate {
    /// Snapshot time
    pub capture_time: EpochMillis,
    /// Sum of transaction durations
    pub total_duration_nanos: u64,
    /// Number of transactions
    pub transaction_count: u64,
    /// `None` until the first transaction is recorded
    pub percentiles: Option<Percentiles>,
}

/// Point-in-time error rate of one accumulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPoint {
    /// Snapshot time
    pub capture_time: EpochMillis,
    /// Number of failed transactions
    pub error_count: u64,
    /// Number of transactions
    pub transaction_count: u64,
}

/// Query statistics keyed by query type
pub type QueryMap = HashMap<String, Vec<QueryStats>>;

/// Immutable snapshot of one accumulator, handed to durable storage on flush
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    /// End of the interval
    pub capture_time: EpochMillis,
    /// Sum of transaction durations
    pub total_duration_nanos: u64,
    /// Number of transactions
    pub transaction_count: u64,
    /// Number of failed transactions
    pub error_count: u64,
    /// `None` if no transaction was recorded
    pub percentiles: Option<Percentiles>,
    /// Merged timer trees, one per root timer name
    pub root_timers: Vec<TimerNode>,
    /// Query statistics, slowest first per query type
    pub queries: QueryMap,
    /// Merged profile, if any sample was recorded
    pub profile: Option<ProfileNode>,
}
