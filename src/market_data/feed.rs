// =============================================================================
// Candle Feed - boundary to the streaming market-data source
// =============================================================================
//
// A feed is a factory: every `subscribe` call opens a fresh upstream
// subscription owned by the caller, so nothing is shared between
// collection runs.  The collector's worker pumps the returned stream on its
// own event loop.
// =============================================================================

use anyhow::Result;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;

use crate::types::CandleEvent;

/// Stream of completed candles pushed by a feed, one item per closed candle
/// per symbol.  An `Err` item means the upstream connection broke.
pub type CandleStream = BoxStream<'static, Result<CandleEvent>>;

/// Data channel of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Candles,
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub symbols: Vec<String>,
    pub channel: Channel,
    pub interval: String,
}

impl Subscription {
    pub fn candles(symbols: Vec<String>, interval: impl Into<String>) -> Self {
        Self {
            symbols,
            channel: Channel::Candles,
            interval: interval.into(),
        }
    }
}

/// A push-based candle source.
pub trait CandleFeed: Send + Sync + 'static {
    /// Whether `interval` is one the upstream understands.
    fn supports_interval(&self, interval: &str) -> bool;

    /// The upstream's own identifier for `symbol`.  Two spellings with the
    /// same canonical form name the same instrument.
    fn canonical_symbol(&self, symbol: &str) -> String {
        symbol.to_string()
    }

    /// Establish the upstream subscription.  An error here means the feed is
    /// unavailable; errors after this point arrive through the stream.
    fn subscribe<'a>(&'a self, subscription: &'a Subscription) -> BoxFuture<'a, Result<CandleStream>>;
}
