//! Error types for the sync daemon.

use thiserror::Error;

/// Top-level error type for sync pipeline operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// State store errors.
    #[error("store error: {0}")]
    Store(#[from] joysync_store::StoreError),

    /// Upstream metadata API errors.
    #[error("youtube error: {0}")]
    Youtube(#[from] joysync_youtube::YoutubeError),

    /// Chain transport errors.
    #[error("chain error: {0}")]
    Chain(#[from] joysync_chain::ChainError),

    /// Read-model errors.
    #[error("indexer error: {0}")]
    Indexer(#[from] joysync_indexer::IndexerError),

    /// Storage fleet errors.
    #[error("fleet error: {0}")]
    Fleet(#[from] joysync_fleet::FleetError),

    /// Domain rule violations.
    #[error("domain error: {0}")]
    Domain(#[from] joysync_types::DomainError),

    /// Configuration errors.
    #[error("configuration error: {0}")]
    Config(String),

    /// The affected quota pool is exhausted for the rest of the UTC day.
    #[error("quota pool {0} exhausted")]
    QuotaExhausted(&'static str),

    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sync pipeline operations.
pub type SyncResult<T> = Result<T, SyncError>;
