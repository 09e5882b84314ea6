//! Diagnostics side channel for the aggregation path.
//!
//! The write path never fails; conditions worth an operator's attention are
//! reported here instead. Implementations are injected into each bucket so the
//! "warn once" state has an explicit owner rather than living in a global.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Receives diagnostic events from the aggregation core
pub trait DiagnosticsSink: Send + Sync {
    /// A transaction name was folded into the overall aggregate because its
    /// type already tracks `limit` distinct names in the current bucket.
    fn transaction_name_limit_exceeded(&self, transaction_type: &str, limit: usize);
}

/// Logs the cardinality warning the first time it happens and counts every
/// occurrence afterwards.
///
/// One instance is shared by every bucket of an aggregator; the flag is never
/// reset.
#[derive(Debug, Default)]
pub struct WarnOnceDiagnostics {
    warned: AtomicBool,
    limit_exceeded_count: AtomicU64,
}

impl WarnOnceDiagnostics {
    /// Create a new diagnostics sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the cardinality warning has been logged
    pub fn has_warned(&self) -> bool {
        self.warned.load(Ordering::Acquire)
    }

    /// Number of transactions that were not tracked by name
    pub fn limit_exceeded_count(&self) -> u64 {
        self.limit_exceeded_count.load(Ordering::Relaxed)
    }
}

impl DiagnosticsSink for WarnOnceDiagnostics {
    fn transaction_name_limit_exceeded(&self, transaction_type: &str, limit: usize) {
        self.limit_exceeded_count.fetch_add(1, Ordering::Relaxed);
        if !self.warned.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                transaction_type,
                limit,
                "the max transaction names per transaction type was exceeded during the \
                 current interval; consider raising max_transactions_per_type or reducing \
                 the number of distinct transaction names"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_warns_only_once() {
        let diagnostics = WarnOnceDiagnostics::new();
        assert!(!diagnostics.has_warned());

        diagnostics.transaction_name_limit_exceeded("web", 10);
        diagnostics.transaction_name_limit_exceeded("web", 10);
        diagnostics.transaction_name_limit_exceeded("background", 10);

        assert!(diagnostics.has_warned());
        assert_eq!(diagnostics.limit_exceeded_count(), 3);
    }

    #[test]
    fn test_concurrent_reports_are_all_counted() {
        let diagnostics = Arc::new(WarnOnceDiagnostics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let diagnostics = Arc::clone(&diagnostics);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        diagnostics.transaction_name_limit_exceeded("web", 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(diagnostics.has_warned());
        assert_eq!(diagnostics.limit_exceeded_count(), 800);
    }
}
