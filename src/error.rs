use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by [`crate::collector::SnapshotCollector::collect`].
///
/// A partial snapshot is not an error; see
/// [`crate::collector::SnapshotResult::is_partial`].
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("invalid collection request: {0}")]
    InvalidRequest(String),

    /// The timeout elapsed before a single candle was stored.
    #[error("no candles received within {timeout:?}")]
    CollectionTimeout { timeout: Duration },

    /// The worker could not establish the upstream subscription.
    #[error("candle feed unavailable: {reason}")]
    FeedUnavailable { reason: String },

    /// The feed ended or failed on its own before any candle was stored.
    #[error("candle feed closed before any candle arrived: {reason}")]
    FeedClosed { reason: String },

    /// The worker ignored the kill request for longer than the grace period
    /// and has been detached. Callers should treat this as fatal.
    #[error("collection worker still running {grace:?} after termination request")]
    WorkerTerminationFailure { grace: Duration },

    #[error("failed to spawn collection worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failures of the chart composer.
#[derive(Debug, Error)]
pub enum ChartError {
    #[error("indicator map has no \"volume\" series")]
    MissingVolume,

    #[error("series {name} has {actual} points, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("heatmap cell ({x}, {y}) is outside the axis labels")]
    CellOutOfRange { x: usize, y: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
