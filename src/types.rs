// =============================================================================
// Shared types used across the snapshot collector and chart composer
// =============================================================================

use std::cmp::Ordering;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One completed candle exactly as the feed delivered it, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleEvent {
    pub symbol: String,
    pub interval: String,
    /// Interval start, epoch milliseconds.
    pub open_time: i64,
    /// Interval end, epoch milliseconds.
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One aggregated trading interval for one symbol.
///
/// Always satisfies `low <= min(open, close)` and `max(open, close) <= high`;
/// the only way to build one from feed data is [`CandleRecord::try_from`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl CandleRecord {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            timestamp: self.timestamp,
            symbol: self.symbol.clone(),
        }
    }
}

impl TryFrom<CandleEvent> for CandleRecord {
    type Error = anyhow::Error;

    fn try_from(event: CandleEvent) -> Result<Self> {
        let prices = [event.open, event.high, event.low, event.close, event.volume];
        if prices.iter().any(|v| !v.is_finite()) {
            bail!("non-finite value in candle for {}", event.symbol);
        }
        if event.volume < 0.0 {
            bail!("negative volume {} for {}", event.volume, event.symbol);
        }
        if event.low > event.high
            || event.low > event.open.min(event.close)
            || event.high < event.open.max(event.close)
        {
            bail!(
                "candle for {} violates low <= open, close <= high (o={} h={} l={} c={})",
                event.symbol,
                event.open,
                event.high,
                event.low,
                event.close
            );
        }

        let timestamp = Utc
            .timestamp_millis_opt(event.open_time)
            .single()
            .with_context(|| format!("open time {} out of range", event.open_time))?;

        Ok(Self {
            timestamp,
            symbol: event.symbol,
            open: event.open,
            high: event.high,
            low: event.low,
            close: event.close,
            volume: event.volume,
        })
    }
}

/// Key of a snapshot entry. Orders by timestamp first, so iterating a
/// snapshot walks it chronologically.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
}

impl Ord for SnapshotKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.symbol.cmp(&other.symbol))
    }
}

impl PartialOrd for SnapshotKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timestamp.to_rfc3339())
    }
}

/// When a collection run may stop before its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionPolicy {
    /// The first stored candle ends the run, whichever symbol it belongs to.
    FirstEvent,
    /// Every requested symbol must have at least one stored candle.
    EverySymbol,
    /// Never stop early; always wait for the timeout.
    FullTimeout,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self::FirstEvent
    }
}

impl std::fmt::Display for CompletionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FirstEvent => write!(f, "FirstEvent"),
            Self::EverySymbol => write!(f, "EverySymbol"),
            Self::FullTimeout => write!(f, "FullTimeout"),
        }
    }
}

/// Why a collection run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// The completion policy was met.
    Satisfied,
    /// The feed ended or failed on its own.
    StreamEnded,
    /// The timeout expired and the worker was killed.
    TimedOut,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Satisfied => write!(f, "Satisfied"),
            Self::StreamEnded => write!(f, "StreamEnded"),
            Self::TimedOut => write!(f, "TimedOut"),
        }
    }
}
