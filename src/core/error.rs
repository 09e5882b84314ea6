use thiserror::Error;

/// Errors produced by tally
#[derive(Error, Debug)]
pub enum TallyError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A transaction is missing required data
    #[error("Invalid transaction data: {0}")]
    InvalidTransaction(String),

    /// An accumulator's state was inconsistent while building a snapshot
    #[error("Aggregate build failed for transaction type '{transaction_type}': {message}")]
    Build {
        /// Type of the failing accumulator
        transaction_type: String,
        /// What was inconsistent
        message: String,
    },

    /// The durable-storage sink rejected a flush
    #[error("Aggregate sink error: {0}")]
    Sink(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tally operations
pub type Result<T> = std::result::Result<T, TallyError>;

impl TallyError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new aggregate build error
    pub fn build<T: Into<String>, S: Into<String>>(transaction_type: T, msg: S) -> Self {
        Self::Build {
            transaction_type: transaction_type.into(),
            message: msg.into(),
        }
    }

    /// Creates a new sink error
    pub fn sink<S: Into<String>>(msg: S) -> Self {
        Self::Sink(msg.into())
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::InvalidTransaction(_) => "validation",
            Self::Build { .. } => "build",
            Self::Sink(_) => "sink",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TallyError::config("interval must be positive");
        assert_eq!(err.to_string(), "Configuration error: interval must be positive");
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_build_error_names_transaction_type() {
        let err = TallyError::build("web", "latency histogram is empty");
        assert_eq!(
            err.to_string(),
            "Aggregate build failed for transaction type 'web': latency histogram is empty"
        );
        assert_eq!(err.category(), "build");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: TallyError = io.into();
        assert_eq!(err.category(), "io");
    }
}
