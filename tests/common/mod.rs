//! Common test utilities and fixtures.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tally_lib::aggregate::{Aggregator, MemorySink};
use tally_lib::core::{
    AggregateConfig, DiagnosticsSink, ProfileNode, QueryStats, TimerNode, Transaction,
    WarnOnceDiagnostics,
};
use tally_lib::live::LiveAggregateRepository;

/// One minute, in milliseconds
pub const MINUTE: u64 = 60_000;

/// Test fixture builder for creating transactions with sensible defaults.
pub struct TestTransactionBuilder {
    transaction_type: String,
    transaction_name: String,
    duration_ms: u64,
    error: Option<String>,
    queries: Vec<(String, QueryStats)>,
    profile: Option<ProfileNode>,
}

impl TestTransactionBuilder {
    pub fn new(transaction_name: &str) -> Self {
        Self {
            transaction_type: "web".to_string(),
            transaction_name: transaction_name.to_string(),
            duration_ms: 100,
            error: None,
            queries: Vec::new(),
            profile: None,
        }
    }

    pub fn transaction_type(mut self, transaction_type: &str) -> Self {
        self.transaction_type = transaction_type.to_string();
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn with_error(mut self) -> Self {
        self.error = Some("Test error".to_string());
        self
    }

    pub fn query(mut self, query_type: &str, query_text: &str, duration_ms: u64) -> Self {
        self.queries.push((
            query_type.to_string(),
            QueryStats::new(query_text, duration_ms * 1_000_000, 1, 1),
        ));
        self
    }

    pub fn profile(mut self, profile: ProfileNode) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn build(self) -> Transaction {
        let mut builder = Transaction::builder()
            .transaction_type(self.transaction_type)
            .transaction_name(self.transaction_name)
            .root_timer(TimerNode::new("http request", self.duration_ms * 1_000_000));
        for (query_type, stats) in self.queries {
            builder = builder.query(query_type, stats);
        }
        if let Some(profile) = self.profile {
            builder = builder.profile(profile);
        }
        if let Some(error) = self.error {
            builder = builder.error(error);
        }
        builder.build().unwrap()
    }
}

/// Aggregation settings with a one minute interval and the given name cap
pub fn aggregate_config(max_transactions_per_type: usize) -> AggregateConfig {
    AggregateConfig {
        interval: Duration::from_millis(MINUTE),
        max_transactions_per_type,
        max_queries_per_query_type: 100,
        flush_check_interval: Duration::from_millis(10),
    }
}

/// Aggregator, sink and repository wired together
pub struct Harness {
    pub aggregator: Arc<Aggregator>,
    pub sink: Arc<MemorySink>,
    pub diagnostics: Arc<WarnOnceDiagnostics>,
    pub repository: LiveAggregateRepository<Aggregator>,
}

impl Harness {
    pub fn new(max_transactions_per_type: usize) -> Self {
        let sink = Arc::new(MemorySink::new());
        let diagnostics = Arc::new(WarnOnceDiagnostics::new());
        let aggregator = Arc::new(Aggregator::new(
            aggregate_config(max_transactions_per_type),
            Arc::clone(&diagnostics) as Arc<dyn DiagnosticsSink>,
            Arc::clone(&sink) as Arc<dyn tally_lib::aggregate::AggregateSink>,
        ));
        let repository = LiveAggregateRepository::new(Arc::clone(&aggregator));
        Self {
            aggregator,
            sink,
            diagnostics,
            repository,
        }
    }

    /// Record `transaction` as completing at `now`
    pub fn add(&self, transaction: &Transaction, now: u64) {
        self.aggregator.add(transaction, now);
    }
}

/// Macro for creating a test transaction quickly.
#[macro_export]
macro_rules! test_transaction {
    ($name:expr, $duration_ms:expr) => {
        TestTransactionBuilder::new($name)
            .duration_ms($duration_ms)
            .build()
    };
    ($name:expr, $duration_ms:expr, error) => {
        TestTransactionBuilder::new($name)
            .duration_ms($duration_ms)
            .with_error()
            .build()
    };
}
