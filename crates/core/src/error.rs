use thiserror::Error;

/// Shared error type used across all Tally crates.
#[derive(Debug, Error)]
pub enum AppError {
    /// Rejected input (missing wallet/signature, non-numeric amounts, repeat writes).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Failure while scanning or aggregating the ledger store.
    #[error("Aggregation error: {0}")]
    Aggregation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] eyre::Error),
}
