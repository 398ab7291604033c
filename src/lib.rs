// =============================================================================
// candle-snapshot - timeout-bounded OHLCV snapshots and multi-panel charts
// =============================================================================

pub mod chart;
pub mod collector;
pub mod error;
pub mod indicators;
pub mod market_data;
pub mod runtime_config;
pub mod types;

pub use collector::{CollectionRequest, SnapshotCollector, SnapshotResult};
pub use error::{ChartError, CollectError};
pub use types::{CandleRecord, CompletionPolicy, SnapshotKey};
